// service/price_modification_service.rs
use sqlx::types::BigDecimal;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    db::{amendmentdb::AmendmentExt, contractdb::ContractExt, quotadb::QuotaExt},
    models::{
        amendmentmodel::{PriceModification, PriceModificationStatus},
        contractmodel::{AmendmentType, Contract, ContractRole},
        ledgermodel::{LedgerEntryKind, NewLedgerEntry},
        usermodel::AuthUser,
    },
    service::{
        amendment_service::{
            client_tier, ensure_counterparty, ensure_party, ensure_requester, lock_amendment_contract, lock_contract,
            record_ledger, reserve_slot, AmendmentContext, AmendmentEffect, AmendmentOutcome,
        },
        contract_service::ContractStateMachine,
        error::ServiceError,
        payment_provider::{PaymentGateway, PaymentRequest},
    },
    utils::pairing_code::generate_payment_reference,
};

pub const MAX_REASON_CHARS: usize = 200;

/// How a new price settles against the current one.
#[derive(Debug, Clone, PartialEq)]
pub enum PriceSettlement {
    /// The requester owes the difference before the change applies.
    PaymentRequired(BigDecimal),
    /// The difference goes back to the requester's balance.
    Credit(BigDecimal),
    Unchanged,
}

pub fn settle_price(current_price: &BigDecimal, new_price: &BigDecimal) -> PriceSettlement {
    let difference = (new_price - current_price).round(2);
    let zero = BigDecimal::from(0);
    if difference > zero {
        PriceSettlement::PaymentRequired(difference)
    } else if difference < zero {
        PriceSettlement::Credit(-difference)
    } else {
        PriceSettlement::Unchanged
    }
}

#[derive(Debug, Clone)]
pub struct PriceModificationService {
    context: AmendmentContext,
    payment_gateway: Arc<dyn PaymentGateway>,
}

impl PriceModificationService {
    pub fn new(context: AmendmentContext, payment_gateway: Arc<dyn PaymentGateway>) -> Self {
        Self {
            context,
            payment_gateway,
        }
    }

    pub fn gateway(&self) -> &dyn PaymentGateway {
        self.payment_gateway.as_ref()
    }

    /// Records the ledger rows and contract change of an applied modification.
    async fn apply_locked(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        contract: &mut Contract,
        modification: &PriceModification,
        settlement: &PriceSettlement,
    ) -> Result<Vec<AmendmentEffect>, ServiceError> {
        let db_client = &self.context.db_client;
        ContractStateMachine::new(contract).apply_price_change(modification)?;

        let mut effects = vec![AmendmentEffect::PriceChanged {
            price: contract.price.clone(),
            commission: contract.commission.clone(),
        }];

        match settlement {
            PriceSettlement::PaymentRequired(amount) => {
                record_ledger(
                    db_client,
                    tx,
                    NewLedgerEntry {
                        contract_id: contract.id,
                        user_id: modification.requester_id,
                        kind: LedgerEntryKind::PriceDifferenceCharge,
                        amount: amount.clone(),
                        amendment_id: Some(modification.id),
                        description: format!("Price difference paid for {}", modification.summary()),
                    },
                    &mut effects,
                )
                .await?;
            }
            PriceSettlement::Credit(amount) => {
                db_client
                    .credit_user_balance(tx, modification.requester_id, amount)
                    .await?;
                effects.push(AmendmentEffect::BalanceCredited { amount: amount.clone() });
                record_ledger(
                    db_client,
                    tx,
                    NewLedgerEntry {
                        contract_id: contract.id,
                        user_id: modification.requester_id,
                        kind: LedgerEntryKind::PriceDifferenceCredit,
                        amount: amount.clone(),
                        amendment_id: Some(modification.id),
                        description: format!("Price difference credited for {}", modification.summary()),
                    },
                    &mut effects,
                )
                .await?;
            }
            PriceSettlement::Unchanged => {}
        }

        if modification.commission_delta != BigDecimal::from(0) {
            record_ledger(
                db_client,
                tx,
                NewLedgerEntry {
                    contract_id: contract.id,
                    user_id: contract.client_id,
                    kind: LedgerEntryKind::CommissionAdjustment,
                    amount: modification.commission_delta.clone(),
                    amendment_id: Some(modification.id),
                    description: format!("Commission adjusted for {}", modification.summary()),
                },
                &mut effects,
            )
            .await?;
        }

        db_client.save_contract(tx, contract).await?;
        self.context
            .audit_service
            .log_amendment(
                tx,
                Some(modification.requester_id),
                contract.id,
                AmendmentType::PriceModification,
                modification.id,
                "applied",
            )
            .await?;
        Ok(effects)
    }

    pub async fn submit(
        &self,
        user: &AuthUser,
        contract_id: Uuid,
        new_price: BigDecimal,
        reason: Option<String>,
    ) -> Result<AmendmentOutcome, ServiceError> {
        let reason = reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
        if reason.as_ref().is_some_and(|r| r.chars().count() > MAX_REASON_CHARS) {
            return Err(ServiceError::Validation(format!(
                "reason cannot exceed {} characters",
                MAX_REASON_CHARS
            )));
        }
        self.context.policy.ensure_price_allowed(&new_price)?;

        let db_client = &self.context.db_client;
        let mut tx = db_client.begin().await?;

        let mut contract = lock_contract(db_client, &mut tx, contract_id).await?;
        if ensure_party(&contract, user.id)? != ContractRole::Client {
            return Err(ServiceError::WrongParty("client".to_string()));
        }
        ContractStateMachine::new(&mut contract).ensure_can_accept(AmendmentType::PriceModification)?;

        if db_client.count_job_proposals(&mut tx, contract.job_id).await? > 0 {
            return Err(ServiceError::ProposalsAlreadyReceived(contract.job_id));
        }

        let tier = client_tier(db_client, contract.client_id).await?;
        let commission_delta = self.context.policy.commission_delta(
            &contract.commission,
            contract.commission_waived,
            &new_price,
            tier,
        );
        let settlement = settle_price(&contract.price, &new_price);

        let amount = match &settlement {
            PriceSettlement::PaymentRequired(amount) => amount.clone(),
            _ => {
                let modification = db_client
                    .insert_price_modification(
                        &mut tx,
                        contract_id,
                        user.id,
                        &contract.price,
                        &new_price,
                        &commission_delta,
                        reason.as_deref(),
                        PriceModificationStatus::Applied,
                    )
                    .await?;
                let effects = self
                    .apply_locked(&mut tx, &mut contract, &modification, &settlement)
                    .await?;
                tx.commit().await?;

                db_client.invalidate_contract(contract_id).await;
                self.context
                    .notification_service
                    .notify_price_applied(contract.doer_id, contract_id, modification.id, &modification.summary())
                    .await;

                return Ok(
                    AmendmentOutcome::new(AmendmentType::PriceModification, modification.id, modification.status)
                        .with_effects(effects),
                );
            }
        };

        let modification = db_client
            .insert_price_modification(
                &mut tx,
                contract_id,
                user.id,
                &contract.price,
                &new_price,
                &commission_delta,
                reason.as_deref(),
                PriceModificationStatus::PaymentRequired,
            )
            .await?;
        reserve_slot(db_client, &mut tx, &mut contract, AmendmentType::PriceModification, modification.id).await?;
        self.context
            .audit_service
            .log_amendment(
                &mut tx,
                Some(user.id),
                contract_id,
                AmendmentType::PriceModification,
                modification.id,
                "payment_required",
            )
            .await?;
        tx.commit().await?;
        db_client.invalidate_contract(contract_id).await;

        // The modification stays awaiting payment if the gateway fails; the
        // requester can withdraw it.
        let reference = generate_payment_reference();
        let payment = self
            .payment_gateway
            .require_payment(&PaymentRequest {
                user_id: user.id,
                email: user.email.clone(),
                amount: amount.clone(),
                reference: reference.clone(),
                metadata: serde_json::json!({
                    "contract_id": contract_id,
                    "price_modification_id": modification.id,
                }),
            })
            .await?;

        let mut tx = db_client.begin().await?;
        let modification = db_client
            .set_price_modification_payment(&mut tx, modification.id, &payment.reference, &payment.payment_url)
            .await?;
        tx.commit().await?;

        self.context
            .notification_service
            .notify_payment_required(user.id, contract_id, modification.id, &amount, &payment.payment_url)
            .await;

        Ok(
            AmendmentOutcome::new(AmendmentType::PriceModification, modification.id, modification.status)
                .with_effects(vec![AmendmentEffect::PaymentRequired {
                    amount,
                    reference: payment.reference,
                    payment_url: payment.payment_url,
                }]),
        )
    }

    /// Resumes a modification once the payment collaborator confirms funds.
    /// Replays of an already applied reference are answered without effect.
    pub async fn confirm_payment(
        &self,
        payment_reference: &str,
        amount_paid: &BigDecimal,
    ) -> Result<AmendmentOutcome, ServiceError> {
        let db_client = &self.context.db_client;
        let mut tx = db_client.begin().await?;

        let unknown_reference = || ServiceError::PaymentMismatch(format!("unknown payment reference {}", payment_reference));
        let contract_id = db_client
            .price_modification_contract_id(payment_reference)
            .await?
            .ok_or_else(unknown_reference)?;
        let mut contract = lock_contract(db_client, &mut tx, contract_id).await?;
        let modification = db_client
            .lock_price_modification_by_reference(&mut tx, payment_reference)
            .await?
            .ok_or_else(unknown_reference)?;

        match modification.status {
            PriceModificationStatus::PaymentRequired => {}
            PriceModificationStatus::Applied => {
                tracing::info!("Payment {} was already applied", payment_reference);
                return Ok(AmendmentOutcome::new(
                    AmendmentType::PriceModification,
                    modification.id,
                    modification.status,
                ));
            }
            _ => {
                return Err(ServiceError::AmendmentNotPending(
                    AmendmentType::PriceModification,
                    modification.id,
                ))
            }
        }

        let expected = modification.price_difference.round(2);
        if amount_paid.round(2) != expected {
            return Err(ServiceError::PaymentMismatch(format!(
                "expected {} ARS for reference {}, received {}",
                expected, payment_reference, amount_paid
            )));
        }

        let closed = db_client
            .close_price_modification(&mut tx, modification.id, PriceModificationStatus::Applied, None)
            .await?
            .ok_or(ServiceError::AmendmentNotPending(AmendmentType::PriceModification, modification.id))?;
        let effects = self
            .apply_locked(&mut tx, &mut contract, &modification, &PriceSettlement::PaymentRequired(expected))
            .await?;
        tx.commit().await?;

        db_client.invalidate_contract(contract.id).await;
        tracing::info!(
            "Price modification {} applied on contract {} after payment {}",
            modification.id,
            contract.id,
            payment_reference
        );
        self.context
            .notification_service
            .notify_price_applied(contract.doer_id, contract.id, modification.id, &modification.summary())
            .await;

        Ok(AmendmentOutcome::new(AmendmentType::PriceModification, closed.id, closed.status).with_effects(effects))
    }

    /// Acceptance happens through payment; the counterparty can only refuse
    /// while the difference is still owed.
    pub async fn respond(
        &self,
        responder_id: Uuid,
        modification_id: Uuid,
        accept: bool,
    ) -> Result<AmendmentOutcome, ServiceError> {
        if accept {
            return Err(ServiceError::Validation(
                "price modifications take effect once the difference is paid".to_string(),
            ));
        }
        self.close_awaiting_payment(responder_id, modification_id, PriceModificationStatus::Rejected)
            .await
    }

    pub async fn withdraw(&self, user_id: Uuid, modification_id: Uuid) -> Result<AmendmentOutcome, ServiceError> {
        self.close_awaiting_payment(user_id, modification_id, PriceModificationStatus::Withdrawn)
            .await
    }

    async fn close_awaiting_payment(
        &self,
        user_id: Uuid,
        modification_id: Uuid,
        status: PriceModificationStatus,
    ) -> Result<AmendmentOutcome, ServiceError> {
        let db_client = &self.context.db_client;
        let mut tx = db_client.begin().await?;

        let mut contract =
            lock_amendment_contract(db_client, &mut tx, AmendmentType::PriceModification, modification_id).await?;
        let modification = db_client
            .lock_price_modification(&mut tx, modification_id)
            .await?
            .ok_or(ServiceError::AmendmentNotFound(AmendmentType::PriceModification, modification_id))?;

        let withdrawing = status == PriceModificationStatus::Withdrawn;
        if withdrawing {
            ensure_requester(modification.requester_id, user_id)?;
        } else {
            ensure_counterparty(&contract, modification.requester_id, user_id, AmendmentType::PriceModification)?;
        }
        if modification.status != PriceModificationStatus::PaymentRequired {
            return Err(ServiceError::AmendmentNotPending(AmendmentType::PriceModification, modification_id));
        }

        ContractStateMachine::new(&mut contract).release_amendment(AmendmentType::PriceModification, modification.id)?;
        let responder = if withdrawing { None } else { Some(user_id) };
        let closed = db_client
            .close_price_modification(&mut tx, modification.id, status, responder)
            .await?
            .ok_or(ServiceError::AmendmentNotPending(AmendmentType::PriceModification, modification_id))?;
        db_client.save_contract(&mut tx, &contract).await?;
        self.context
            .audit_service
            .log_amendment(
                &mut tx,
                Some(user_id),
                contract.id,
                AmendmentType::PriceModification,
                modification.id,
                if withdrawing { "withdrawn" } else { "rejected" },
            )
            .await?;
        tx.commit().await?;

        db_client.invalidate_contract(contract.id).await;
        let notifications = &self.context.notification_service;
        if withdrawing {
            notifications
                .notify_amendment_withdrawn(contract.doer_id, contract.id, AmendmentType::PriceModification, modification.id)
                .await;
        } else {
            notifications
                .notify_amendment_answered(
                    modification.requester_id,
                    contract.id,
                    AmendmentType::PriceModification,
                    modification.id,
                    false,
                    &modification.summary(),
                )
                .await;
        }

        Ok(AmendmentOutcome::new(AmendmentType::PriceModification, closed.id, closed.status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::contractmodel::{fixtures, ContractStatus},
        service::{payment_provider::ManualGateway, testing},
    };
    use chrono::Utc;
    use sqlx::PgPool;

    fn modification(contract: &Contract, new_price: i64, status: PriceModificationStatus) -> PriceModification {
        let now = Utc::now();
        PriceModification {
            id: Uuid::new_v4(),
            contract_id: contract.id,
            requester_id: contract.client_id,
            previous_price: contract.price.clone(),
            new_price: BigDecimal::from(new_price),
            price_difference: BigDecimal::from(new_price) - &contract.price,
            commission_delta: BigDecimal::from(400),
            reason: None,
            status,
            payment_reference: None,
            payment_url: None,
            responded_by: None,
            applied_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn settlement_follows_the_sign_of_the_difference() {
        let current = BigDecimal::from(20_000);
        assert_eq!(
            settle_price(&current, &BigDecimal::from(25_000)),
            PriceSettlement::PaymentRequired(BigDecimal::from(5_000))
        );
        assert_eq!(
            settle_price(&current, &BigDecimal::from(18_000)),
            PriceSettlement::Credit(BigDecimal::from(2_000))
        );
        assert_eq!(settle_price(&current, &current), PriceSettlement::Unchanged);
    }

    #[test]
    fn immediate_price_change_never_holds_the_marker() {
        let mut contract = fixtures::contract();
        let cheaper = modification(&contract, 18_000, PriceModificationStatus::Applied);

        ContractStateMachine::new(&mut contract).apply_price_change(&cheaper).unwrap();
        assert_eq!(contract.price, BigDecimal::from(18_000));
        assert_eq!(contract.commission, BigDecimal::from(2_000));
        assert!(contract.pending_amendment().is_none());
    }

    #[test]
    fn paid_price_change_releases_its_marker() {
        let mut contract = fixtures::contract();
        let dearer = modification(&contract, 25_000, PriceModificationStatus::PaymentRequired);

        let mut machine = ContractStateMachine::new(&mut contract);
        machine.reserve_amendment(AmendmentType::PriceModification, dearer.id).unwrap();
        machine.apply_price_change(&dearer).unwrap();
        assert_eq!(contract.price, BigDecimal::from(25_000));
        assert!(contract.pending_amendment().is_none());
    }

    #[test]
    fn price_change_waits_for_another_pending_amendment() {
        let mut contract = fixtures::contract();
        let dearer = modification(&contract, 25_000, PriceModificationStatus::Applied);

        let mut machine = ContractStateMachine::new(&mut contract);
        machine.reserve_amendment(AmendmentType::TaskClaim, Uuid::new_v4()).unwrap();
        assert!(matches!(
            machine.apply_price_change(&dearer),
            Err(ServiceError::AmendmentAlreadyPending { pending: AmendmentType::TaskClaim, .. })
        ));
        assert_eq!(contract.price, BigDecimal::from(20_000));
    }

    fn service(pool: &PgPool) -> PriceModificationService {
        PriceModificationService::new(
            testing::context(pool),
            Arc::new(ManualGateway::new("whsec".to_string(), "http://localhost/pay".to_string())),
        )
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs DATABASE_URL pointing at Postgres"]
    async fn job_with_proposals_keeps_its_price(pool: PgPool) {
        let seeded = testing::seed_contract(&pool, ContractStatus::Active).await;
        sqlx::query("INSERT INTO proposals (job_id, doer_id) VALUES ($1, $2)")
            .bind(seeded.job_id)
            .bind(Uuid::new_v4())
            .execute(&pool)
            .await
            .unwrap();

        let result = service(&pool)
            .submit(&testing::user(seeded.client_id), seeded.id, BigDecimal::from(30_000), None)
            .await;
        assert!(matches!(result, Err(ServiceError::ProposalsAlreadyReceived(job)) if job == seeded.job_id));

        assert_eq!(testing::count_rows(&pool, "price_modifications", seeded.id).await, 0);
        let (_, marker, _) = testing::stored_contract(&pool, seeded.id).await;
        assert!(marker.is_none());
        let price: BigDecimal = sqlx::query_scalar("SELECT price FROM contracts WHERE id = $1")
            .bind(seeded.id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(price, BigDecimal::from(20_000));
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs DATABASE_URL pointing at Postgres"]
    async fn a_payment_is_applied_once(pool: PgPool) {
        let seeded = testing::seed_contract(&pool, ContractStatus::Active).await;
        let prices = service(&pool);

        let outcome = prices
            .submit(&testing::user(seeded.client_id), seeded.id, BigDecimal::from(25_000), None)
            .await
            .unwrap();
        assert_eq!(outcome.status, "payment_required");
        let reference = outcome
            .effects
            .iter()
            .find_map(|effect| match effect {
                AmendmentEffect::PaymentRequired { reference, .. } => Some(reference.clone()),
                _ => None,
            })
            .unwrap();

        assert!(matches!(
            prices.confirm_payment(&reference, &BigDecimal::from(4_000)).await,
            Err(ServiceError::PaymentMismatch(_))
        ));
        assert!(matches!(
            prices.confirm_payment("PMOD_unknown", &BigDecimal::from(5_000)).await,
            Err(ServiceError::PaymentMismatch(_))
        ));

        let paid = BigDecimal::from(5_000);
        let (first, replay) = tokio::join!(
            prices.confirm_payment(&reference, &paid),
            prices.confirm_payment(&reference, &paid)
        );
        assert_eq!(first.unwrap().status, "applied");
        assert_eq!(replay.unwrap().status, "applied");

        let charges: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM contract_ledger_entries WHERE contract_id = $1 AND kind = 'price_difference_charge'",
        )
        .bind(seeded.id)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(charges, 1);

        let (status, marker, _) = testing::stored_contract(&pool, seeded.id).await;
        assert_eq!(status, ContractStatus::Active);
        assert!(marker.is_none());
    }
}
