// service/commission_service.rs
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::types::BigDecimal;

use crate::{
    config::Config,
    models::usermodel::{month_start, MembershipTier, UserQuota},
    service::error::ServiceError,
};

/// Which allowance waived the commission on a contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FreeCredit {
    Initial,
    Monthly,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommissionQuote {
    pub price: BigDecimal,
    pub tier: MembershipTier,
    pub rate: BigDecimal,
    pub commission: BigDecimal,
    pub flat_fee_applied: bool,
    pub free_credit: Option<FreeCredit>,
}

impl CommissionQuote {
    pub fn is_waived(&self) -> bool {
        self.free_credit.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct CommissionPolicy {
    pub free_rate: BigDecimal,
    pub pro_rate: BigDecimal,
    pub super_pro_rate: BigDecimal,
    pub flat_fee: BigDecimal,
    pub flat_fee_threshold: BigDecimal,
    pub min_job_price: BigDecimal,
    pub monthly_free_pro: i32,
    pub monthly_free_super_pro: i32,
}

impl Default for CommissionPolicy {
    fn default() -> Self {
        Self {
            free_rate: BigDecimal::new(8.into(), 2),
            pro_rate: BigDecimal::new(3.into(), 2),
            super_pro_rate: BigDecimal::new(2.into(), 2),
            flat_fee: BigDecimal::from(1_000),
            flat_fee_threshold: BigDecimal::from(8_000),
            min_job_price: BigDecimal::from(5_000),
            monthly_free_pro: 1,
            monthly_free_super_pro: 3,
        }
    }
}

impl CommissionPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            flat_fee: config.commission_flat_fee.clone(),
            flat_fee_threshold: config.commission_flat_fee_threshold.clone(),
            min_job_price: config.min_job_price.clone(),
            ..Self::default()
        }
    }

    pub fn rate_for(&self, tier: MembershipTier) -> &BigDecimal {
        match tier {
            MembershipTier::Free => &self.free_rate,
            MembershipTier::Pro => &self.pro_rate,
            MembershipTier::SuperPro => &self.super_pro_rate,
        }
    }

    pub fn monthly_allowance(&self, tier: MembershipTier) -> i32 {
        match tier {
            MembershipTier::Free => 0,
            MembershipTier::Pro => self.monthly_free_pro,
            MembershipTier::SuperPro => self.monthly_free_super_pro,
        }
    }

    pub fn ensure_price_allowed(&self, price: &BigDecimal) -> Result<(), ServiceError> {
        if *price < self.min_job_price {
            return Err(ServiceError::Validation(format!(
                "Price must be at least {} ARS",
                self.min_job_price
            )));
        }
        Ok(())
    }

    /// Commission owed on `price` ignoring any free allowance.
    pub fn charged_commission(&self, price: &BigDecimal, tier: MembershipTier) -> (BigDecimal, bool) {
        let proportional = (self.rate_for(tier) * price).round(2);
        if *price < self.flat_fee_threshold && proportional < self.flat_fee {
            (self.flat_fee.clone(), true)
        } else {
            (proportional, false)
        }
    }

    /// Initial signup credits are spent before the tier's monthly ones.
    pub fn available_credit(&self, quota: &UserQuota, now: DateTime<Utc>) -> Option<FreeCredit> {
        if quota.initial_free_contracts > 0 {
            Some(FreeCredit::Initial)
        } else if quota.monthly_used_at(now) < self.monthly_allowance(quota.membership_tier) {
            Some(FreeCredit::Monthly)
        } else {
            None
        }
    }

    pub fn quote(&self, price: &BigDecimal, quota: &UserQuota, now: DateTime<Utc>) -> CommissionQuote {
        let tier = quota.membership_tier;
        let rate = self.rate_for(tier).clone();

        if let Some(credit) = self.available_credit(quota, now) {
            return CommissionQuote {
                price: price.clone(),
                tier,
                rate,
                commission: BigDecimal::from(0),
                flat_fee_applied: false,
                free_credit: Some(credit),
            };
        }

        let (commission, flat_fee_applied) = self.charged_commission(price, tier);
        CommissionQuote {
            price: price.clone(),
            tier,
            rate,
            commission,
            flat_fee_applied,
            free_credit: None,
        }
    }

    /// Commission change caused by repricing a contract. Waived contracts stay waived.
    pub fn commission_delta(
        &self,
        current_commission: &BigDecimal,
        commission_waived: bool,
        new_price: &BigDecimal,
        tier: MembershipTier,
    ) -> BigDecimal {
        if commission_waived {
            return BigDecimal::from(0);
        }
        let (new_commission, _) = self.charged_commission(new_price, tier);
        new_commission - current_commission
    }
}

/// Spends one credit on the locked quota row. The caller persists it in the
/// same transaction as the contract insert.
pub fn consume_credit(quota: &mut UserQuota, credit: FreeCredit, now: DateTime<Utc>) {
    match credit {
        FreeCredit::Initial => {
            quota.initial_free_contracts = (quota.initial_free_contracts - 1).max(0);
        }
        FreeCredit::Monthly => {
            let current_month = month_start(now);
            if quota.monthly_period_start < current_month {
                quota.monthly_period_start = current_month;
                quota.monthly_free_contracts_used = 0;
            }
            quota.monthly_free_contracts_used += 1;
        }
    }
    quota.updated_at = now;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    fn quota(tier: MembershipTier, initial: i32, monthly_used: i32) -> UserQuota {
        let mut quota = UserQuota::empty(Uuid::new_v4(), now());
        quota.membership_tier = tier;
        quota.initial_free_contracts = initial;
        quota.monthly_free_contracts_used = monthly_used;
        quota
    }

    #[test]
    fn small_jobs_pay_the_flat_fee() {
        let policy = CommissionPolicy::default();
        let quote = policy.quote(&BigDecimal::from(6_000), &quota(MembershipTier::Free, 0, 0), now());
        assert_eq!(quote.commission, BigDecimal::from(1_000));
        assert!(quote.flat_fee_applied);
        assert!(!quote.is_waived());
    }

    #[test]
    fn free_tier_pays_eight_percent() {
        let policy = CommissionPolicy::default();
        let quote = policy.quote(&BigDecimal::from(20_000), &quota(MembershipTier::Free, 0, 0), now());
        assert_eq!(quote.commission, BigDecimal::from(1_600));
        assert!(!quote.flat_fee_applied);
    }

    #[test]
    fn paid_tiers_use_their_rate() {
        let policy = CommissionPolicy::default();
        let pro = policy.quote(&BigDecimal::from(20_000), &quota(MembershipTier::Pro, 0, 1), now());
        assert_eq!(pro.commission, BigDecimal::from(600));
        let super_pro = policy.quote(&BigDecimal::from(50_000), &quota(MembershipTier::SuperPro, 0, 3), now());
        assert_eq!(super_pro.commission, BigDecimal::from(1_000));
    }

    #[test]
    fn free_credit_waives_commission_and_decrements_once() {
        let policy = CommissionPolicy::default();
        let mut q = quota(MembershipTier::Pro, 1, 1);
        let quote = policy.quote(&BigDecimal::from(20_000), &q, now());
        assert_eq!(quote.commission, BigDecimal::from(0));
        assert_eq!(quote.free_credit, Some(FreeCredit::Initial));

        consume_credit(&mut q, FreeCredit::Initial, now());
        assert_eq!(q.initial_free_contracts, 0);
        assert_eq!(q.monthly_free_contracts_used, 1);
    }

    #[test]
    fn monthly_allowance_resets_with_the_calendar() {
        let policy = CommissionPolicy::default();
        let mut q = quota(MembershipTier::Pro, 0, 1);
        assert_eq!(policy.available_credit(&q, now()), None);

        let next_month = Utc.with_ymd_and_hms(2024, 7, 2, 8, 0, 0).unwrap();
        assert_eq!(policy.available_credit(&q, next_month), Some(FreeCredit::Monthly));

        consume_credit(&mut q, FreeCredit::Monthly, next_month);
        assert_eq!(q.monthly_free_contracts_used, 1);
        assert_eq!(q.monthly_period_start, Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap());
        assert_eq!(policy.available_credit(&q, next_month), None);
    }

    #[test]
    fn free_members_have_no_monthly_allowance() {
        let policy = CommissionPolicy::default();
        assert_eq!(policy.available_credit(&quota(MembershipTier::Free, 0, 0), now()), None);
    }

    #[test]
    fn repricing_a_waived_contract_costs_nothing() {
        let policy = CommissionPolicy::default();
        let delta = policy.commission_delta(
            &BigDecimal::from(0),
            true,
            &BigDecimal::from(30_000),
            MembershipTier::Free,
        );
        assert_eq!(delta, BigDecimal::from(0));

        let delta = policy.commission_delta(
            &BigDecimal::from(1_600),
            false,
            &BigDecimal::from(25_000),
            MembershipTier::Free,
        );
        assert_eq!(delta, BigDecimal::from(400));
    }

    #[test]
    fn minimum_price_is_enforced() {
        let policy = CommissionPolicy::default();
        assert!(policy.ensure_price_allowed(&BigDecimal::from(4_999)).is_err());
        assert!(policy.ensure_price_allowed(&BigDecimal::from(5_000)).is_ok());
    }
}
