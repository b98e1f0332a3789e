// service/change_request_service.rs
use chrono::Utc;
use sqlx::types::BigDecimal;
use uuid::Uuid;

use crate::{
    db::{amendmentdb::AmendmentExt, contractdb::ContractExt},
    models::{
        amendmentmodel::{ChangeRequest, ChangeRequestStatus, ChangeRequestType, NewTerms},
        contractmodel::{AmendmentType, Contract, ContractStatus},
        ledgermodel::{LedgerEntryKind, NewLedgerEntry},
    },
    service::{
        amendment_service::{
            client_tier, ensure_counterparty, ensure_party, ensure_requester, lock_amendment_contract,
            lock_contract, record_ledger, reserve_slot, AmendmentContext, AmendmentEffect, AmendmentOutcome,
        },
        contract_service::ContractStateMachine,
        error::ServiceError,
        event_bus::ContractEvent,
    },
};

pub const MAX_REASON_CHARS: usize = 1000;
pub const MAX_DESCRIPTION_CHARS: usize = 500;

/// Checks a change request against the contract it targets and returns the
/// trimmed reason and the terms to store.
pub fn validate_change_request(
    contract: &Contract,
    request_type: ChangeRequestType,
    reason: &str,
    terms: NewTerms,
) -> Result<(String, NewTerms), ServiceError> {
    let reason = reason.trim();
    if reason.is_empty() || reason.chars().count() > MAX_REASON_CHARS {
        return Err(ServiceError::Validation(format!(
            "reason must be between 1 and {} characters",
            MAX_REASON_CHARS
        )));
    }

    if request_type == ChangeRequestType::Cancel {
        return Ok((reason.to_string(), NewTerms::default()));
    }

    if terms.is_empty() {
        return Err(ServiceError::Validation(
            "a modify request must propose at least one new term".to_string(),
        ));
    }
    if let Some(price) = &terms.price {
        if *price < BigDecimal::from(0) {
            return Err(ServiceError::Validation("price cannot be negative".to_string()));
        }
    }
    if let Some(description) = &terms.description {
        if description.chars().count() > MAX_DESCRIPTION_CHARS {
            return Err(ServiceError::Validation(format!(
                "description cannot exceed {} characters",
                MAX_DESCRIPTION_CHARS
            )));
        }
    }

    let start = terms.start_date.unwrap_or(contract.start_date);
    let end = terms.end_date.unwrap_or(contract.end_date);
    if start >= end {
        return Err(ServiceError::InvalidDateOrdering(format!(
            "start date {} must be before end date {}",
            start.format("%Y-%m-%d"),
            end.format("%Y-%m-%d")
        )));
    }

    let terms = NewTerms {
        description: terms
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty()),
        ..terms
    };
    Ok((reason.to_string(), terms))
}

/// Effects of an accepted request, read off the contract before and after.
fn change_effects(before: &Contract, after: &Contract) -> Vec<AmendmentEffect> {
    let mut effects = Vec::new();
    if after.status == ContractStatus::Cancelled {
        effects.push(AmendmentEffect::ContractCancelled);
        return effects;
    }
    if before.start_date != after.start_date || before.end_date != after.end_date {
        effects.push(AmendmentEffect::ScheduleChanged {
            start_date: after.start_date,
            end_date: after.end_date,
        });
    }
    if before.price != after.price {
        effects.push(AmendmentEffect::PriceChanged {
            price: after.price.clone(),
            commission: after.commission.clone(),
        });
    }
    if before.description != after.description {
        effects.push(AmendmentEffect::DescriptionChanged);
    }
    effects
}

#[derive(Debug, Clone)]
pub struct ChangeRequestService {
    context: AmendmentContext,
}

impl ChangeRequestService {
    pub fn new(context: AmendmentContext) -> Self {
        Self { context }
    }

    pub async fn submit(
        &self,
        requester_id: Uuid,
        contract_id: Uuid,
        request_type: ChangeRequestType,
        reason: &str,
        terms: NewTerms,
    ) -> Result<AmendmentOutcome, ServiceError> {
        let db_client = &self.context.db_client;
        let mut tx = db_client.begin().await?;

        let mut contract = lock_contract(db_client, &mut tx, contract_id).await?;
        ensure_party(&contract, requester_id)?;
        ContractStateMachine::new(&mut contract).ensure_can_accept(AmendmentType::ChangeRequest)?;

        let (reason, terms) = validate_change_request(&contract, request_type, reason, terms)?;

        let request = db_client
            .insert_change_request(&mut tx, contract_id, requester_id, request_type, &reason, &terms)
            .await?;
        reserve_slot(db_client, &mut tx, &mut contract, AmendmentType::ChangeRequest, request.id).await?;

        self.context
            .audit_service
            .log_amendment(&mut tx, Some(requester_id), contract_id, AmendmentType::ChangeRequest, request.id, "submitted")
            .await?;
        tx.commit().await?;

        db_client.invalidate_contract(contract_id).await;

        if let Some(counterparty) = contract.counterparty_of(requester_id) {
            self.context
                .notification_service
                .notify_amendment_submitted(
                    counterparty,
                    &contract,
                    AmendmentType::ChangeRequest,
                    request.id,
                    &request.changes_summary(&contract),
                )
                .await;
        }

        Ok(AmendmentOutcome::new(AmendmentType::ChangeRequest, request.id, request.status))
    }

    async fn lock_request(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        request_id: Uuid,
    ) -> Result<(ChangeRequest, Contract), ServiceError> {
        let db_client = &self.context.db_client;
        let contract = lock_amendment_contract(db_client, tx, AmendmentType::ChangeRequest, request_id).await?;
        let request = db_client
            .lock_change_request(tx, request_id)
            .await?
            .ok_or(ServiceError::AmendmentNotFound(AmendmentType::ChangeRequest, request_id))?;
        Ok((request, contract))
    }

    pub async fn respond(
        &self,
        responder_id: Uuid,
        request_id: Uuid,
        accept: bool,
        response_reason: Option<&str>,
    ) -> Result<AmendmentOutcome, ServiceError> {
        let db_client = &self.context.db_client;
        let mut tx = db_client.begin().await?;

        let (request, mut contract) = self.lock_request(&mut tx, request_id).await?;
        ensure_counterparty(&contract, request.requester_id, responder_id, AmendmentType::ChangeRequest)?;
        if request.status != ChangeRequestStatus::Pending {
            return Err(ServiceError::AmendmentNotPending(AmendmentType::ChangeRequest, request_id));
        }

        let before = contract.clone();
        let mut effects = Vec::new();

        let status = if accept {
            let commission_delta = match &request.new_price {
                Some(price) if request.request_type == ChangeRequestType::Modify => {
                    let tier = client_tier(db_client, contract.client_id).await?;
                    self.context
                        .policy
                        .commission_delta(&contract.commission, contract.commission_waived, price, tier)
                }
                _ => BigDecimal::from(0),
            };

            ContractStateMachine::new(&mut contract).apply_change_request_result(&request, &commission_delta)?;
            effects = change_effects(&before, &contract);

            if commission_delta != BigDecimal::from(0) {
                record_ledger(
                    db_client,
                    &mut tx,
                    NewLedgerEntry {
                        contract_id: contract.id,
                        user_id: contract.client_id,
                        kind: LedgerEntryKind::CommissionAdjustment,
                        amount: commission_delta,
                        amendment_id: Some(request.id),
                        description: format!("Commission adjusted after change request {}", request.id),
                    },
                    &mut effects,
                )
                .await?;
            }
            ChangeRequestStatus::Accepted
        } else {
            ContractStateMachine::new(&mut contract).release_amendment(AmendmentType::ChangeRequest, request.id)?;
            ChangeRequestStatus::Rejected
        };

        let closed = db_client
            .close_change_request(&mut tx, request.id, status, Some(responder_id), response_reason)
            .await?
            .ok_or(ServiceError::AmendmentNotPending(AmendmentType::ChangeRequest, request_id))?;
        let contract = db_client.save_contract(&mut tx, &contract).await?;

        let audit = &self.context.audit_service;
        audit
            .log_amendment(
                &mut tx,
                Some(responder_id),
                contract.id,
                AmendmentType::ChangeRequest,
                request.id,
                if accept { "accepted" } else { "rejected" },
            )
            .await?;
        if before.status != contract.status {
            audit
                .log_status_change(&mut tx, Some(responder_id), contract.id, before.status, contract.status)
                .await?;
        }
        tx.commit().await?;

        db_client.invalidate_contract(contract.id).await;

        let notifications = &self.context.notification_service;
        notifications
            .notify_amendment_answered(
                request.requester_id,
                contract.id,
                AmendmentType::ChangeRequest,
                request.id,
                accept,
                &request.changes_summary(&before),
            )
            .await;
        if before.status != contract.status {
            notifications.publish(ContractEvent::ContractStatusChanged {
                contract_id: contract.id,
                from: before.status,
                to: contract.status,
                timestamp: Utc::now(),
            });
        }

        Ok(AmendmentOutcome::new(AmendmentType::ChangeRequest, closed.id, closed.status).with_effects(effects))
    }

    pub async fn withdraw(&self, user_id: Uuid, request_id: Uuid) -> Result<AmendmentOutcome, ServiceError> {
        let db_client = &self.context.db_client;
        let mut tx = db_client.begin().await?;

        let (request, mut contract) = self.lock_request(&mut tx, request_id).await?;
        ensure_requester(request.requester_id, user_id)?;
        if request.status != ChangeRequestStatus::Pending {
            return Err(ServiceError::AmendmentNotPending(AmendmentType::ChangeRequest, request_id));
        }

        ContractStateMachine::new(&mut contract).release_amendment(AmendmentType::ChangeRequest, request.id)?;

        let closed = db_client
            .close_change_request(&mut tx, request.id, ChangeRequestStatus::Withdrawn, None, None)
            .await?
            .ok_or(ServiceError::AmendmentNotPending(AmendmentType::ChangeRequest, request_id))?;
        db_client.save_contract(&mut tx, &contract).await?;
        self.context
            .audit_service
            .log_amendment(&mut tx, Some(user_id), contract.id, AmendmentType::ChangeRequest, request.id, "withdrawn")
            .await?;
        tx.commit().await?;

        db_client.invalidate_contract(contract.id).await;
        if let Some(counterparty) = contract.counterparty_of(user_id) {
            self.context
                .notification_service
                .notify_amendment_withdrawn(counterparty, contract.id, AmendmentType::ChangeRequest, request.id)
                .await;
        }

        Ok(AmendmentOutcome::new(AmendmentType::ChangeRequest, closed.id, closed.status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::contractmodel::fixtures;
    use chrono::Duration;

    #[test]
    fn reason_is_trimmed_and_bounded() {
        let contract = fixtures::contract();
        let (reason, terms) =
            validate_change_request(&contract, ChangeRequestType::Cancel, "  moving abroad  ", NewTerms::default())
                .unwrap();
        assert_eq!(reason, "moving abroad");
        assert!(terms.is_empty());

        assert!(matches!(
            validate_change_request(&contract, ChangeRequestType::Cancel, "   ", NewTerms::default()),
            Err(ServiceError::Validation(_))
        ));
        let long = "x".repeat(MAX_REASON_CHARS + 1);
        assert!(validate_change_request(&contract, ChangeRequestType::Cancel, &long, NewTerms::default()).is_err());
    }

    #[test]
    fn modify_needs_terms() {
        let contract = fixtures::contract();
        assert!(matches!(
            validate_change_request(&contract, ChangeRequestType::Modify, "scope", NewTerms::default()),
            Err(ServiceError::Validation(_))
        ));
    }

    #[test]
    fn cancel_drops_any_terms() {
        let contract = fixtures::contract();
        let terms = NewTerms {
            price: Some(BigDecimal::from(1)),
            ..NewTerms::default()
        };
        let (_, terms) = validate_change_request(&contract, ChangeRequestType::Cancel, "done", terms).unwrap();
        assert!(terms.is_empty());
    }

    #[test]
    fn proposed_dates_must_stay_ordered() {
        let contract = fixtures::contract();
        let terms = NewTerms {
            end_date: Some(contract.start_date - Duration::days(1)),
            ..NewTerms::default()
        };
        assert!(matches!(
            validate_change_request(&contract, ChangeRequestType::Modify, "earlier", terms),
            Err(ServiceError::InvalidDateOrdering(_))
        ));

        let both = NewTerms {
            start_date: Some(contract.start_date + Duration::days(2)),
            end_date: Some(contract.start_date + Duration::days(1)),
            ..NewTerms::default()
        };
        assert!(validate_change_request(&contract, ChangeRequestType::Modify, "swap", both).is_err());
    }

    #[test]
    fn negative_price_and_long_description_are_rejected() {
        let contract = fixtures::contract();
        let negative = NewTerms {
            price: Some(BigDecimal::from(-1)),
            ..NewTerms::default()
        };
        assert!(validate_change_request(&contract, ChangeRequestType::Modify, "cheaper", negative).is_err());

        let wordy = NewTerms {
            description: Some("y".repeat(MAX_DESCRIPTION_CHARS + 1)),
            ..NewTerms::default()
        };
        assert!(validate_change_request(&contract, ChangeRequestType::Modify, "details", wordy).is_err());
    }

    #[test]
    fn effects_describe_what_changed() {
        let before = fixtures::contract();
        let mut after = before.clone();
        after.price = BigDecimal::from(25_000);
        after.end_date = before.end_date + Duration::days(3);

        let effects = change_effects(&before, &after);
        assert_eq!(effects.len(), 2);
        assert!(matches!(effects[0], AmendmentEffect::ScheduleChanged { .. }));
        assert!(matches!(effects[1], AmendmentEffect::PriceChanged { .. }));

        after.status = ContractStatus::Cancelled;
        assert_eq!(change_effects(&before, &after), vec![AmendmentEffect::ContractCancelled]);
    }
}
