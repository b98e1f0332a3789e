// service/extension_service.rs
use chrono::{DateTime, Utc};
use sqlx::types::BigDecimal;
use uuid::Uuid;

use crate::{
    db::{amendmentdb::AmendmentExt, contractdb::ContractExt},
    models::{
        amendmentmodel::{ExtensionRequest, ExtensionStatus},
        contractmodel::{AmendmentType, Contract},
        ledgermodel::{LedgerEntryKind, NewLedgerEntry},
    },
    service::{
        amendment_service::{
            ensure_counterparty, ensure_party, ensure_requester, lock_amendment_contract, lock_contract, record_ledger,
            reserve_slot, AmendmentContext, AmendmentEffect, AmendmentOutcome,
        },
        contract_service::ContractStateMachine,
        error::ServiceError,
    },
};

pub const MAX_EXTENSION_DAYS: i32 = 365;
pub const MAX_NOTES_CHARS: usize = 500;

pub fn validate_extension(
    extension_days: i32,
    extension_amount: &BigDecimal,
    extension_notes: Option<String>,
) -> Result<Option<String>, ServiceError> {
    if !(1..=MAX_EXTENSION_DAYS).contains(&extension_days) {
        return Err(ServiceError::Validation(format!(
            "extension days must be between 1 and {}",
            MAX_EXTENSION_DAYS
        )));
    }
    if *extension_amount < BigDecimal::from(0) {
        return Err(ServiceError::Validation("extension amount cannot be negative".to_string()));
    }

    let notes = extension_notes
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());
    if notes.as_ref().is_some_and(|n| n.chars().count() > MAX_NOTES_CHARS) {
        return Err(ServiceError::Validation(format!(
            "extension notes cannot exceed {} characters",
            MAX_NOTES_CHARS
        )));
    }
    Ok(notes)
}

#[derive(Debug, Clone)]
pub struct ExtensionService {
    context: AmendmentContext,
}

impl ExtensionService {
    pub fn new(context: AmendmentContext) -> Self {
        Self { context }
    }

    pub async fn submit(
        &self,
        requester_id: Uuid,
        contract_id: Uuid,
        extension_days: i32,
        extension_amount: BigDecimal,
        extension_notes: Option<String>,
    ) -> Result<AmendmentOutcome, ServiceError> {
        let notes = validate_extension(extension_days, &extension_amount, extension_notes)?;

        let db_client = &self.context.db_client;
        let mut tx = db_client.begin().await?;

        let mut contract = lock_contract(db_client, &mut tx, contract_id).await?;
        ensure_party(&contract, requester_id)?;
        ContractStateMachine::new(&mut contract).ensure_can_accept(AmendmentType::ExtensionRequest)?;

        let request = db_client
            .insert_extension_request(
                &mut tx,
                contract_id,
                requester_id,
                extension_days,
                &extension_amount,
                notes.as_deref(),
            )
            .await?;
        reserve_slot(db_client, &mut tx, &mut contract, AmendmentType::ExtensionRequest, request.id).await?;

        self.context
            .audit_service
            .log_amendment(&mut tx, Some(requester_id), contract_id, AmendmentType::ExtensionRequest, request.id, "submitted")
            .await?;
        tx.commit().await?;

        db_client.invalidate_contract(contract_id).await;
        if let Some(counterparty) = contract.counterparty_of(requester_id) {
            self.context
                .notification_service
                .notify_amendment_submitted(
                    counterparty,
                    &contract,
                    AmendmentType::ExtensionRequest,
                    request.id,
                    &request.summary(),
                )
                .await;
        }

        Ok(AmendmentOutcome::new(AmendmentType::ExtensionRequest, request.id, request.status))
    }

    async fn lock_request(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        request_id: Uuid,
    ) -> Result<(ExtensionRequest, Contract), ServiceError> {
        let db_client = &self.context.db_client;
        let contract = lock_amendment_contract(db_client, tx, AmendmentType::ExtensionRequest, request_id).await?;
        let request = db_client
            .lock_extension_request(tx, request_id)
            .await?
            .ok_or(ServiceError::AmendmentNotFound(AmendmentType::ExtensionRequest, request_id))?;
        Ok((request, contract))
    }

    /// Moves an overdue request to `expired` and frees the contract. Nothing
    /// is escalated.
    async fn expire_locked(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        contract: &mut Contract,
        request: &ExtensionRequest,
    ) -> Result<(), ServiceError> {
        let db_client = &self.context.db_client;
        if contract.pending_amendment() == Some((AmendmentType::ExtensionRequest, request.id)) {
            ContractStateMachine::new(contract).release_amendment(AmendmentType::ExtensionRequest, request.id)?;
        }
        db_client
            .close_extension_request(tx, request.id, ExtensionStatus::Expired, None, None)
            .await?;
        self.context
            .audit_service
            .log_amendment(tx, None, contract.id, AmendmentType::ExtensionRequest, request.id, "expired")
            .await?;
        Ok(())
    }

    pub async fn respond(
        &self,
        responder_id: Uuid,
        request_id: Uuid,
        approve: bool,
        response_reason: Option<&str>,
    ) -> Result<AmendmentOutcome, ServiceError> {
        let db_client = &self.context.db_client;
        let mut tx = db_client.begin().await?;

        let (request, mut contract) = self.lock_request(&mut tx, request_id).await?;
        ensure_counterparty(&contract, request.requester_id, responder_id, AmendmentType::ExtensionRequest)?;
        if request.status != ExtensionStatus::Pending {
            return Err(ServiceError::AmendmentNotPending(AmendmentType::ExtensionRequest, request_id));
        }

        if request.is_expired_at(Utc::now(), self.context.windows.extension) {
            self.expire_locked(&mut tx, &mut contract, &request).await?;
            db_client.save_contract(&mut tx, &contract).await?;
            tx.commit().await?;

            db_client.invalidate_contract(contract.id).await;
            self.context
                .notification_service
                .notify_extension_expired(request.requester_id, contract.id, request.id)
                .await;
            return Err(ServiceError::AmendmentNotPending(AmendmentType::ExtensionRequest, request_id));
        }

        let mut effects = Vec::new();
        let status = if approve {
            ContractStateMachine::new(&mut contract).apply_extension(&request)?;
            effects.push(AmendmentEffect::ContractExtended {
                end_date: contract.end_date,
            });

            if request.extension_amount > BigDecimal::from(0) {
                record_ledger(
                    db_client,
                    &mut tx,
                    NewLedgerEntry {
                        contract_id: contract.id,
                        user_id: contract.client_id,
                        kind: LedgerEntryKind::ExtensionPayment,
                        amount: request.extension_amount.clone(),
                        amendment_id: Some(request.id),
                        description: format!("Payment for a {} day extension", request.extension_days),
                    },
                    &mut effects,
                )
                .await?;
            }
            ExtensionStatus::Approved
        } else {
            ContractStateMachine::new(&mut contract).release_amendment(AmendmentType::ExtensionRequest, request.id)?;
            ExtensionStatus::Rejected
        };

        let closed = db_client
            .close_extension_request(&mut tx, request.id, status, Some(responder_id), response_reason)
            .await?
            .ok_or(ServiceError::AmendmentNotPending(AmendmentType::ExtensionRequest, request_id))?;
        db_client.save_contract(&mut tx, &contract).await?;
        self.context
            .audit_service
            .log_amendment(
                &mut tx,
                Some(responder_id),
                contract.id,
                AmendmentType::ExtensionRequest,
                request.id,
                if approve { "approved" } else { "rejected" },
            )
            .await?;
        tx.commit().await?;

        db_client.invalidate_contract(contract.id).await;
        self.context
            .notification_service
            .notify_amendment_answered(
                request.requester_id,
                contract.id,
                AmendmentType::ExtensionRequest,
                request.id,
                approve,
                &request.summary(),
            )
            .await;

        Ok(AmendmentOutcome::new(AmendmentType::ExtensionRequest, closed.id, closed.status).with_effects(effects))
    }

    pub async fn withdraw(&self, user_id: Uuid, request_id: Uuid) -> Result<AmendmentOutcome, ServiceError> {
        let db_client = &self.context.db_client;
        let mut tx = db_client.begin().await?;

        let (request, mut contract) = self.lock_request(&mut tx, request_id).await?;
        ensure_requester(request.requester_id, user_id)?;
        if request.status != ExtensionStatus::Pending {
            return Err(ServiceError::AmendmentNotPending(AmendmentType::ExtensionRequest, request_id));
        }

        ContractStateMachine::new(&mut contract).release_amendment(AmendmentType::ExtensionRequest, request.id)?;

        let closed = db_client
            .close_extension_request(&mut tx, request.id, ExtensionStatus::Withdrawn, None, None)
            .await?
            .ok_or(ServiceError::AmendmentNotPending(AmendmentType::ExtensionRequest, request_id))?;
        db_client.save_contract(&mut tx, &contract).await?;
        self.context
            .audit_service
            .log_amendment(&mut tx, Some(user_id), contract.id, AmendmentType::ExtensionRequest, request.id, "withdrawn")
            .await?;
        tx.commit().await?;

        db_client.invalidate_contract(contract.id).await;
        if let Some(counterparty) = contract.counterparty_of(user_id) {
            self.context
                .notification_service
                .notify_amendment_withdrawn(counterparty, contract.id, AmendmentType::ExtensionRequest, request.id)
                .await;
        }

        Ok(AmendmentOutcome::new(AmendmentType::ExtensionRequest, closed.id, closed.status))
    }

    /// Lazily expires every overdue extension request on a contract.
    pub async fn expire_overdue(&self, contract_id: Uuid, now: DateTime<Utc>) -> Result<usize, ServiceError> {
        let db_client = &self.context.db_client;
        let mut tx = db_client.begin().await?;

        let mut contract = lock_contract(db_client, &mut tx, contract_id).await?;
        let overdue: Vec<ExtensionRequest> = db_client
            .lock_pending_extension_requests(&mut tx, contract_id)
            .await?
            .into_iter()
            .filter(|r| r.is_expired_at(now, self.context.windows.extension))
            .collect();
        if overdue.is_empty() {
            return Ok(0);
        }

        for request in &overdue {
            self.expire_locked(&mut tx, &mut contract, request).await?;
        }
        db_client.save_contract(&mut tx, &contract).await?;
        tx.commit().await?;

        db_client.invalidate_contract(contract_id).await;
        for request in &overdue {
            tracing::info!("Extension request {} on contract {} expired", request.id, contract_id);
            self.context
                .notification_service
                .notify_extension_expired(request.requester_id, contract_id, request.id)
                .await;
        }

        Ok(overdue.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{amendmentmodel::fixtures as amendments, contractmodel::fixtures};
    use chrono::Duration;

    #[test]
    fn extension_input_bounds() {
        assert!(validate_extension(0, &BigDecimal::from(0), None).is_err());
        assert!(validate_extension(MAX_EXTENSION_DAYS + 1, &BigDecimal::from(0), None).is_err());
        assert!(validate_extension(7, &BigDecimal::from(-5), None).is_err());
        assert!(validate_extension(7, &BigDecimal::from(0), Some("x".repeat(MAX_NOTES_CHARS + 1))).is_err());
        assert_eq!(
            validate_extension(7, &BigDecimal::from(1_500), Some("  rain delays ".to_string())).unwrap(),
            Some("rain delays".to_string())
        );
        assert_eq!(validate_extension(1, &BigDecimal::from(0), Some("   ".to_string())).unwrap(), None);
    }

    #[test]
    fn extension_expiry_is_age_based() {
        let contract = fixtures::contract();
        let request = amendments::extension_request(&contract, 3);
        let window = Duration::hours(48);

        assert!(!request.is_expired_at(request.created_at + Duration::hours(47), window));
        assert!(request.is_expired_at(request.created_at + Duration::hours(49), window));

        let mut approved = request.clone();
        approved.status = ExtensionStatus::Approved;
        assert!(!approved.is_expired_at(request.created_at + Duration::days(10), window));
    }
}
