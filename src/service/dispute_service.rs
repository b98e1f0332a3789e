// service/dispute_service.rs
use chrono::Utc;
use serde::Serialize;
use sqlx::types::BigDecimal;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    db::{contractdb::ContractExt, db::DBClient, disputedb::DisputeExt},
    models::{
        contractmodel::{Contract, ContractStatus},
        disputemodel::*,
        usermodel::AuthUser,
    },
    service::{
        audit_service::AuditService,
        contract_service::ContractStateMachine,
        error::ServiceError,
        event_bus::ContractEvent,
        notification_service::NotificationService,
    },
};

pub const MAX_DISPUTE_REASON_CHARS: usize = 1000;

#[derive(Debug, Serialize)]
pub struct DisputeCreationResult {
    pub dispute: Dispute,
    pub contract: Contract,
}

#[derive(Debug, Serialize)]
pub struct DisputeResolutionResult {
    pub dispute: Dispute,
    pub contract: Contract,
}

/// Contract status a resolution leads to.
pub fn resolved_contract_status(resolution: DisputeResolutionType) -> ContractStatus {
    match resolution {
        DisputeResolutionType::Released | DisputeResolutionType::Partial => ContractStatus::Completed,
        DisputeResolutionType::Refunded => ContractStatus::Cancelled,
    }
}

pub fn validate_resolution_amount(
    resolution: DisputeResolutionType,
    amount: Option<&BigDecimal>,
    contract_price: &BigDecimal,
) -> Result<(), ServiceError> {
    match (resolution, amount) {
        (DisputeResolutionType::Partial, None) => Err(ServiceError::Validation(
            "a partial resolution needs an amount".to_string(),
        )),
        (_, Some(amount)) if *amount <= BigDecimal::from(0) || amount > contract_price => {
            Err(ServiceError::Validation(format!(
                "resolution amount must be positive and at most the contract price of {} ARS",
                contract_price
            )))
        }
        _ => Ok(()),
    }
}

fn ensure_admin(user: &AuthUser) -> Result<(), ServiceError> {
    if !user.is_admin() {
        return Err(ServiceError::WrongParty("admin".to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DisputeService {
    db_client: Arc<DBClient>,
    notification_service: Arc<NotificationService>,
    audit_service: Arc<AuditService>,
}

impl DisputeService {
    pub fn new(
        db_client: Arc<DBClient>,
        notification_service: Arc<NotificationService>,
        audit_service: Arc<AuditService>,
    ) -> Self {
        Self {
            db_client,
            notification_service,
            audit_service,
        }
    }

    /// Opened directly by a party. A contract negotiating an amendment has
    /// to settle or withdraw it first.
    pub async fn create_dispute(
        &self,
        raised_by: Uuid,
        contract_id: Uuid,
        reason: String,
        category: DisputeCategory,
        priority: DisputePriority,
    ) -> Result<DisputeCreationResult, ServiceError> {
        let reason = reason.trim().to_string();
        if reason.is_empty() || reason.chars().count() > MAX_DISPUTE_REASON_CHARS {
            return Err(ServiceError::Validation(format!(
                "reason must be between 1 and {} characters",
                MAX_DISPUTE_REASON_CHARS
            )));
        }

        let mut tx = self.db_client.begin().await?;
        let mut contract = self
            .db_client
            .lock_contract(&mut tx, contract_id)
            .await?
            .ok_or(ServiceError::ContractNotFound(contract_id))?;

        let against = contract
            .counterparty_of(raised_by)
            .ok_or(ServiceError::NotContractParty(raised_by, contract_id))?;
        if let Some((pending, _)) = contract.pending_amendment() {
            return Err(ServiceError::AmendmentAlreadyPending { contract_id, pending });
        }
        if contract.status == ContractStatus::Disputed {
            return Err(ServiceError::InvalidContractStatus(contract_id, contract.status));
        }

        let from = ContractStateMachine::new(&mut contract).transition(ContractStatus::Disputed)?;

        let dispute = self
            .db_client
            .insert_dispute(
                &mut tx,
                &NewDispute {
                    contract_id,
                    initiator_id: raised_by,
                    respondent_id: against,
                    reason,
                    category,
                    priority,
                    importance_level: importance_level(priority, &contract.price),
                    source_amendment_type: None,
                    source_amendment_id: None,
                    support_ticket_id: None,
                },
            )
            .await?;
        let contract = self.db_client.save_contract(&mut tx, &contract).await?;

        self.audit_service
            .log_status_change(&mut tx, Some(raised_by), contract_id, from, ContractStatus::Disputed)
            .await?;
        self.audit_service
            .log_dispute(&mut tx, Some(raised_by), &dispute, "dispute_opened")
            .await?;
        tx.commit().await?;

        self.db_client.invalidate_contract(contract_id).await;
        self.notification_service.notify_dispute_opened(&dispute).await;
        self.notification_service.publish(ContractEvent::ContractStatusChanged {
            contract_id,
            from,
            to: ContractStatus::Disputed,
            timestamp: Utc::now(),
        });

        Ok(DisputeCreationResult { dispute, contract })
    }

    pub async fn get_dispute(&self, user: &AuthUser, dispute_id: Uuid) -> Result<Dispute, ServiceError> {
        let dispute = self
            .db_client
            .get_dispute(dispute_id)
            .await?
            .ok_or(ServiceError::DisputeNotFound(dispute_id))?;

        let involved = dispute.initiator_id == user.id || dispute.respondent_id == user.id;
        if !involved && !user.is_admin() {
            return Err(ServiceError::NotContractParty(user.id, dispute.contract_id));
        }
        Ok(dispute)
    }

    pub async fn get_contract_disputes(&self, user: &AuthUser, contract_id: Uuid) -> Result<Vec<Dispute>, ServiceError> {
        let contract = self
            .db_client
            .get_contract(contract_id)
            .await?
            .ok_or(ServiceError::ContractNotFound(contract_id))?;
        if !contract.is_party(user.id) && !user.is_admin() {
            return Err(ServiceError::NotContractParty(user.id, contract_id));
        }
        Ok(self.db_client.get_contract_disputes(contract_id).await?)
    }

    pub async fn update_dispute_status(
        &self,
        admin: &AuthUser,
        dispute_id: Uuid,
        status: DisputeStatus,
    ) -> Result<Dispute, ServiceError> {
        ensure_admin(admin)?;

        let mut tx = self.db_client.begin().await?;
        let dispute = self
            .db_client
            .lock_dispute(&mut tx, dispute_id)
            .await?
            .ok_or(ServiceError::DisputeNotFound(dispute_id))?;

        if !dispute.status.can_move_to(status) {
            return Err(ServiceError::InvalidDisputeTransition(format!(
                "{:?} to {:?}",
                dispute.status, status
            )));
        }

        let updated = self.db_client.update_dispute_status(&mut tx, dispute_id, status).await?;
        self.audit_service
            .log_dispute(&mut tx, Some(admin.id), &updated, "dispute_status_changed")
            .await?;
        tx.commit().await?;

        Ok(updated)
    }

    pub async fn resolve_dispute(
        &self,
        admin: &AuthUser,
        dispute_id: Uuid,
        resolution: DisputeResolutionType,
        resolution_amount: Option<BigDecimal>,
        resolution_notes: Option<String>,
    ) -> Result<DisputeResolutionResult, ServiceError> {
        ensure_admin(admin)?;

        // Contract row first, as every amendment path locks it.
        let contract_id = self
            .db_client
            .get_dispute(dispute_id)
            .await?
            .ok_or(ServiceError::DisputeNotFound(dispute_id))?
            .contract_id;

        let mut tx = self.db_client.begin().await?;
        let mut contract = self
            .db_client
            .lock_contract(&mut tx, contract_id)
            .await?
            .ok_or(ServiceError::ContractNotFound(contract_id))?;
        let dispute = self
            .db_client
            .lock_dispute(&mut tx, dispute_id)
            .await?
            .ok_or(ServiceError::DisputeNotFound(dispute_id))?;
        if dispute.status.is_resolved() {
            return Err(ServiceError::InvalidDisputeTransition(format!(
                "dispute {} is already resolved",
                dispute_id
            )));
        }

        validate_resolution_amount(resolution, resolution_amount.as_ref(), &contract.price)?;

        let resolved = self
            .db_client
            .resolve_dispute(
                &mut tx,
                dispute_id,
                resolution,
                resolution_amount.as_ref(),
                resolution_notes.as_deref(),
                admin.id,
            )
            .await?;

        // Other disputes or a manual reactivation may already have moved the contract on.
        let status_change = if contract.status == ContractStatus::Disputed {
            let to = resolved_contract_status(resolution);
            let from = ContractStateMachine::new(&mut contract).transition(to)?;
            contract = self.db_client.save_contract(&mut tx, &contract).await?;
            self.audit_service
                .log_status_change(&mut tx, Some(admin.id), contract.id, from, to)
                .await?;
            Some((from, to))
        } else {
            None
        };

        self.audit_service
            .log_dispute(&mut tx, Some(admin.id), &resolved, "dispute_resolved")
            .await?;
        tx.commit().await?;

        self.db_client.invalidate_contract(contract.id).await;
        tracing::info!(
            "Dispute {} resolved as {} by admin {}",
            dispute_id,
            resolution.to_str(),
            admin.id
        );
        self.notification_service.notify_dispute_resolved(&resolved).await;
        if let Some((from, to)) = status_change {
            self.notification_service.publish(ContractEvent::ContractStatusChanged {
                contract_id: contract.id,
                from,
                to,
                timestamp: Utc::now(),
            });
        }

        Ok(DisputeResolutionResult {
            dispute: resolved,
            contract,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{contractmodel::fixtures, usermodel::UserRole};

    #[test]
    fn resolutions_close_the_contract() {
        assert_eq!(resolved_contract_status(DisputeResolutionType::Released), ContractStatus::Completed);
        assert_eq!(resolved_contract_status(DisputeResolutionType::Partial), ContractStatus::Completed);
        assert_eq!(resolved_contract_status(DisputeResolutionType::Refunded), ContractStatus::Cancelled);

        let mut contract = fixtures::contract();
        contract.status = ContractStatus::Disputed;
        ContractStateMachine::new(&mut contract)
            .transition(resolved_contract_status(DisputeResolutionType::Refunded))
            .unwrap();
        assert!(contract.status.is_terminal());
    }

    #[test]
    fn partial_resolution_amount_is_bounded_by_the_price() {
        let price = BigDecimal::from(20_000);
        assert!(validate_resolution_amount(DisputeResolutionType::Partial, None, &price).is_err());
        assert!(validate_resolution_amount(DisputeResolutionType::Partial, Some(&BigDecimal::from(25_000)), &price).is_err());
        assert!(validate_resolution_amount(DisputeResolutionType::Partial, Some(&BigDecimal::from(0)), &price).is_err());
        assert!(validate_resolution_amount(DisputeResolutionType::Partial, Some(&BigDecimal::from(5_000)), &price).is_ok());
        assert!(validate_resolution_amount(DisputeResolutionType::Released, None, &price).is_ok());
    }

    #[test]
    fn only_admins_manage_disputes() {
        let user = AuthUser {
            id: Uuid::new_v4(),
            role: UserRole::User,
            email: None,
        };
        assert!(matches!(ensure_admin(&user), Err(ServiceError::WrongParty(_))));
        let admin = AuthUser {
            role: UserRole::Admin,
            ..user
        };
        assert!(ensure_admin(&admin).is_ok());
    }
}
