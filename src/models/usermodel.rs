use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize, Serialize, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "membership_tier", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MembershipTier {
    Free,
    Pro,
    SuperPro,
}

impl MembershipTier {
    pub fn to_str(&self) -> &str {
        match self {
            MembershipTier::Free => "free",
            MembershipTier::Pro => "pro",
            MembershipTier::SuperPro => "super_pro",
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    User,
    Admin,
}

/// Identity extracted from the bearer token issued by the auth service.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub role: UserRole,
    pub email: Option<String>,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserQuota {
    pub user_id: Uuid,
    pub membership_tier: MembershipTier,
    pub initial_free_contracts: i32,
    pub monthly_free_contracts_used: i32,
    pub monthly_period_start: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserQuota {
    /// A user without a quota row is a free member with nothing left.
    pub fn empty(user_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            membership_tier: MembershipTier::Free,
            initial_free_contracts: 0,
            monthly_free_contracts_used: 0,
            monthly_period_start: month_start(now),
            updated_at: now,
        }
    }

    /// Monthly usage as seen at `now`; a stale period counts as zero used.
    pub fn monthly_used_at(&self, now: DateTime<Utc>) -> i32 {
        if self.monthly_period_start < month_start(now) {
            0
        } else {
            self.monthly_free_contracts_used
        }
    }
}

pub fn month_start(at: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(at.year(), at.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(at)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_month_resets_usage() {
        let now = Utc.with_ymd_and_hms(2024, 5, 12, 10, 0, 0).unwrap();
        let mut quota = UserQuota::empty(Uuid::new_v4(), now);
        quota.monthly_free_contracts_used = 2;
        assert_eq!(quota.monthly_used_at(now), 2);

        quota.monthly_period_start = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();
        assert_eq!(quota.monthly_used_at(now), 0);
    }

    #[test]
    fn month_start_truncates() {
        let at = Utc.with_ymd_and_hms(2024, 2, 29, 23, 59, 59).unwrap();
        assert_eq!(month_start(at), Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap());
    }
}
