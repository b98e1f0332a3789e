// service/contract_service.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::BigDecimal;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    db::{contractdb::ContractExt, db::DBClient, quotadb::QuotaExt},
    models::{
        amendmentmodel::{extended_end_date, ChangeRequest, ChangeRequestType, ExtensionRequest, PriceModification, TaskClaim},
        contractmodel::*,
        ledgermodel::{LedgerEntryKind, NewLedgerEntry},
        usermodel::{AuthUser, UserQuota},
    },
    service::{
        audit_service::AuditService,
        commission_service::{consume_credit, CommissionPolicy, CommissionQuote},
        error::ServiceError,
        event_bus::ContractEvent,
        notification_service::NotificationService,
    },
    utils::pairing_code::{generate_pairing_code, pairing_code_expiry},
};

/// The party who did not issue the code confirms it before it expires.
pub fn check_pairing_code(contract: &Contract, user_id: Uuid, code: &str, now: DateTime<Utc>) -> Result<(), ServiceError> {
    if !contract.is_party(user_id) {
        return Err(ServiceError::NotContractParty(user_id, contract.id));
    }
    if contract.pairing_code_issued_by == Some(user_id) {
        return Err(ServiceError::WrongParty("other party".to_string()));
    }
    match (&contract.pairing_code, contract.pairing_code_expires_at) {
        (Some(expected), Some(expires_at)) if expected == code.trim() && expires_at > now => Ok(()),
        _ => Err(ServiceError::Validation("pairing code is invalid or expired".to_string())),
    }
}

/// Guards every mutation of a contract loaded under a row lock. Nothing here
/// touches the store; callers persist the contract afterwards in the same
/// transaction.
#[derive(Debug)]
pub struct ContractStateMachine<'a> {
    contract: &'a mut Contract,
}

impl<'a> ContractStateMachine<'a> {
    pub fn new(contract: &'a mut Contract) -> Self {
        Self { contract }
    }

    pub fn can_accept_amendment(&self, amendment_type: AmendmentType) -> bool {
        self.ensure_can_accept(amendment_type).is_ok()
    }

    pub fn ensure_can_accept(&self, amendment_type: AmendmentType) -> Result<(), ServiceError> {
        self.ensure_amendable()?;

        if amendment_type == AmendmentType::ExtensionRequest && self.contract.has_been_extended {
            return Err(ServiceError::AlreadyExtended(self.contract.id));
        }

        if let Some((pending, _)) = self.contract.pending_amendment() {
            return Err(ServiceError::AmendmentAlreadyPending {
                contract_id: self.contract.id,
                pending,
            });
        }

        Ok(())
    }

    fn ensure_amendable(&self) -> Result<(), ServiceError> {
        let status = self.contract.status;
        if status.is_terminal() {
            return Err(ServiceError::TerminalContract(self.contract.id, status));
        }
        if !status.accepts_amendments() {
            return Err(ServiceError::InvalidContractStatus(self.contract.id, status));
        }
        Ok(())
    }

    pub fn reserve_amendment(&mut self, amendment_type: AmendmentType, amendment_id: Uuid) -> Result<(), ServiceError> {
        self.ensure_can_accept(amendment_type)?;
        self.contract.active_amendment_type = Some(amendment_type);
        self.contract.active_amendment_id = Some(amendment_id);
        if amendment_type == AmendmentType::TaskClaim {
            self.contract.has_pending_task_claim = true;
        }
        Ok(())
    }

    fn ensure_holds(&self, amendment_type: AmendmentType, amendment_id: Uuid) -> Result<(), ServiceError> {
        match self.contract.pending_amendment() {
            Some((kind, id)) if kind == amendment_type && id == amendment_id => Ok(()),
            other => Err(ServiceError::Integrity(format!(
                "contract {} marker is {:?}, expected {} {}",
                self.contract.id,
                other,
                amendment_type.to_str(),
                amendment_id
            ))),
        }
    }

    /// Clears the pending marker; it must belong to the given amendment.
    pub fn release_amendment(&mut self, amendment_type: AmendmentType, amendment_id: Uuid) -> Result<(), ServiceError> {
        self.ensure_holds(amendment_type, amendment_id)?;
        self.contract.active_amendment_type = None;
        self.contract.active_amendment_id = None;
        if amendment_type == AmendmentType::TaskClaim {
            self.contract.has_pending_task_claim = false;
        }
        Ok(())
    }

    fn is_valid_transition(from: ContractStatus, to: ContractStatus) -> bool {
        matches!(
            (from, to),
            (ContractStatus::Pending, ContractStatus::Active)
                | (ContractStatus::Pending, ContractStatus::Cancelled)
                | (ContractStatus::Pending, ContractStatus::Disputed)
                | (ContractStatus::Active, ContractStatus::Completed)
                | (ContractStatus::Active, ContractStatus::Cancelled)
                | (ContractStatus::Active, ContractStatus::Disputed)
                | (ContractStatus::Disputed, ContractStatus::Active)
                | (ContractStatus::Disputed, ContractStatus::Completed)
                | (ContractStatus::Disputed, ContractStatus::Cancelled)
        )
    }

    pub fn transition(&mut self, to: ContractStatus) -> Result<ContractStatus, ServiceError> {
        let from = self.contract.status;
        if from.is_terminal() {
            return Err(ServiceError::TerminalContract(self.contract.id, from));
        }
        if !Self::is_valid_transition(from, to) {
            return Err(ServiceError::InvalidStatusTransition {
                contract_id: self.contract.id,
                from,
                to,
            });
        }
        if to == ContractStatus::Completed {
            if let Some((pending, _)) = self.contract.pending_amendment() {
                return Err(ServiceError::AmendmentAlreadyPending {
                    contract_id: self.contract.id,
                    pending,
                });
            }
        }

        self.contract.status = to;
        Ok(from)
    }

    pub fn apply_extension(&mut self, request: &ExtensionRequest) -> Result<(), ServiceError> {
        self.ensure_amendable()?;
        if self.contract.has_been_extended {
            return Err(ServiceError::AlreadyExtended(self.contract.id));
        }
        self.ensure_holds(AmendmentType::ExtensionRequest, request.id)?;

        let new_end = extended_end_date(self.contract.original_end_date, request.extension_days);
        if new_end <= self.contract.start_date {
            return Err(ServiceError::InvalidDateOrdering(
                "extended end date must fall after the start date".to_string(),
            ));
        }

        self.contract.end_date = new_end;
        self.contract.has_been_extended = true;
        self.release_amendment(AmendmentType::ExtensionRequest, request.id)
    }

    /// Reprices the contract. A modification applied at submission never held
    /// the marker; one that waited for payment releases it here.
    pub fn apply_price_change(&mut self, modification: &PriceModification) -> Result<(), ServiceError> {
        self.ensure_amendable()?;
        if modification.new_price < BigDecimal::from(0) {
            return Err(ServiceError::Validation("price cannot be negative".to_string()));
        }

        match self.contract.pending_amendment() {
            None => {}
            Some((AmendmentType::PriceModification, id)) if id == modification.id => {
                self.release_amendment(AmendmentType::PriceModification, id)?;
            }
            Some((pending, _)) => {
                return Err(ServiceError::AmendmentAlreadyPending {
                    contract_id: self.contract.id,
                    pending,
                });
            }
        }

        self.contract.price = modification.new_price.clone();
        self.contract.commission = &self.contract.commission + &modification.commission_delta;
        Ok(())
    }

    pub fn apply_task_claim_result(&mut self, claim: &TaskClaim, accepted: bool) -> Result<(), ServiceError> {
        self.ensure_amendable()?;
        self.ensure_holds(AmendmentType::TaskClaim, claim.id)?;

        if accepted {
            if claim.new_end_date <= self.contract.start_date {
                return Err(ServiceError::InvalidDateOrdering(
                    "the new end date must fall after the contract start date".to_string(),
                ));
            }
            self.release_amendment(AmendmentType::TaskClaim, claim.id)?;
            self.contract.end_date = claim.new_end_date;
        } else {
            self.release_amendment(AmendmentType::TaskClaim, claim.id)?;
            self.transition(ContractStatus::Disputed)?;
        }
        Ok(())
    }

    /// Applies an accepted change request.
    pub fn apply_change_request_result(
        &mut self,
        request: &ChangeRequest,
        commission_delta: &BigDecimal,
    ) -> Result<(), ServiceError> {
        self.ensure_amendable()?;
        self.ensure_holds(AmendmentType::ChangeRequest, request.id)?;

        match request.request_type {
            ChangeRequestType::Cancel => {
                self.release_amendment(AmendmentType::ChangeRequest, request.id)?;
                self.transition(ContractStatus::Cancelled)?;
            }
            ChangeRequestType::Modify => {
                let start = request.new_start_date.unwrap_or(self.contract.start_date);
                let end = request.new_end_date.unwrap_or(self.contract.end_date);
                if start >= end {
                    return Err(ServiceError::InvalidDateOrdering(format!(
                        "start date {} must be before end date {}",
                        start.format("%Y-%m-%d"),
                        end.format("%Y-%m-%d")
                    )));
                }

                self.release_amendment(AmendmentType::ChangeRequest, request.id)?;
                self.contract.start_date = start;
                self.contract.end_date = end;
                if let Some(price) = &request.new_price {
                    self.contract.price = price.clone();
                    self.contract.commission = &self.contract.commission + commission_delta;
                }
                if let Some(description) = &request.new_description {
                    self.contract.description = Some(description.clone());
                }
            }
        }
        Ok(())
    }
}

/// Values handed over by the proposal-approval collaborator.
#[derive(Debug, Clone)]
pub struct CreateContractInput {
    pub job_id: Uuid,
    pub client_id: Uuid,
    pub doer_id: Uuid,
    pub price: BigDecimal,
    pub description: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub tasks: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractDetails {
    #[serde(flatten)]
    pub contract: Contract,
    pub tasks: Vec<ContractTask>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PairingCode {
    pub contract_id: Uuid,
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ContractService {
    db_client: Arc<DBClient>,
    policy: CommissionPolicy,
    notification_service: Arc<NotificationService>,
    audit_service: Arc<AuditService>,
}

impl ContractService {
    pub fn new(
        db_client: Arc<DBClient>,
        policy: CommissionPolicy,
        notification_service: Arc<NotificationService>,
        audit_service: Arc<AuditService>,
    ) -> Self {
        Self {
            db_client,
            policy,
            notification_service,
            audit_service,
        }
    }

    pub async fn create_contract(
        &self,
        actor: &AuthUser,
        input: CreateContractInput,
    ) -> Result<ContractDetails, ServiceError> {
        if actor.id != input.client_id && !actor.is_admin() {
            return Err(ServiceError::WrongParty("client".to_string()));
        }
        if input.client_id == input.doer_id {
            return Err(ServiceError::Validation("client and doer must be different users".to_string()));
        }
        if input.start_date >= input.end_date {
            return Err(ServiceError::InvalidDateOrdering(
                "start date must be before end date".to_string(),
            ));
        }
        self.policy.ensure_price_allowed(&input.price)?;

        let now = Utc::now();
        let mut tx = self.db_client.begin().await?;

        let mut quota = self.db_client.lock_user_quota(&mut tx, input.client_id).await?;
        let quote = self.policy.quote(&input.price, &quota, now);
        if let Some(credit) = quote.free_credit {
            consume_credit(&mut quota, credit, now);
            self.db_client.save_user_quota(&mut tx, &quota).await?;
        }

        let new_contract = NewContract {
            client_id: input.client_id,
            doer_id: input.doer_id,
            job_id: input.job_id,
            price: input.price.clone(),
            commission: quote.commission.clone(),
            commission_waived: quote.is_waived(),
            description: input.description.clone(),
            start_date: input.start_date,
            end_date: input.end_date,
            pairing_code: generate_pairing_code(),
            pairing_code_expires_at: pairing_code_expiry(now),
            pairing_code_issued_by: input.client_id,
        };

        let contract = self.db_client.insert_contract(&mut tx, &new_contract).await?;
        let tasks = self
            .db_client
            .insert_contract_tasks(&mut tx, contract.id, &input.tasks)
            .await?;

        let description = if quote.is_waived() {
            "Commission waived by free contract credit".to_string()
        } else {
            format!("Commission at {} of {} ARS", quote.rate, contract.price)
        };
        self.db_client
            .insert_ledger_entry(
                &mut tx,
                &NewLedgerEntry {
                    contract_id: contract.id,
                    user_id: contract.client_id,
                    kind: LedgerEntryKind::Commission,
                    amount: contract.commission.clone(),
                    amendment_id: None,
                    description,
                },
            )
            .await?;

        self.audit_service.log_contract_created(&mut tx, &contract).await?;
        tx.commit().await?;

        tracing::info!(
            "Contract {} created for job {} (commission {}, waived: {})",
            contract.id,
            contract.job_id,
            contract.commission,
            contract.commission_waived
        );

        Ok(ContractDetails { contract, tasks })
    }

    pub async fn get_contract(&self, user: &AuthUser, contract_id: Uuid) -> Result<ContractDetails, ServiceError> {
        let cache_key = Contract::cache_key(contract_id);
        let details = match self.db_client.cache_get::<ContractDetails>(&cache_key).await {
            Some(details) => details,
            None => {
                let contract = self
                    .db_client
                    .get_contract(contract_id)
                    .await?
                    .ok_or(ServiceError::ContractNotFound(contract_id))?;
                let tasks = self.db_client.get_contract_tasks(contract_id).await?;
                let details = ContractDetails { contract, tasks };
                self.db_client.cache_set(&cache_key, &details).await;
                details
            }
        };

        if !details.contract.is_party(user.id) && !user.is_admin() {
            return Err(ServiceError::NotContractParty(user.id, contract_id));
        }
        Ok(details)
    }

    /// Loads a contract the user takes part in, bypassing the cache.
    pub async fn load_for_party(&self, user_id: Uuid, contract_id: Uuid) -> Result<Contract, ServiceError> {
        let contract = self
            .db_client
            .get_contract(contract_id)
            .await?
            .ok_or(ServiceError::ContractNotFound(contract_id))?;
        if !contract.is_party(user_id) {
            return Err(ServiceError::NotContractParty(user_id, contract_id));
        }
        Ok(contract)
    }

    pub async fn activate_contract(&self, user: &AuthUser, contract_id: Uuid) -> Result<Contract, ServiceError> {
        self.change_status(user, contract_id, ContractStatus::Active, None).await
    }

    /// Delivery is confirmed by the client.
    pub async fn complete_contract(&self, user: &AuthUser, contract_id: Uuid) -> Result<Contract, ServiceError> {
        self.change_status(user, contract_id, ContractStatus::Completed, Some(ContractRole::Client))
            .await
    }

    async fn change_status(
        &self,
        user: &AuthUser,
        contract_id: Uuid,
        to: ContractStatus,
        required_role: Option<ContractRole>,
    ) -> Result<Contract, ServiceError> {
        let mut tx = self.db_client.begin().await?;
        let mut contract = self
            .db_client
            .lock_contract(&mut tx, contract_id)
            .await?
            .ok_or(ServiceError::ContractNotFound(contract_id))?;

        let role = contract
            .role_of(user.id)
            .ok_or(ServiceError::NotContractParty(user.id, contract_id))?;
        if let Some(required) = required_role {
            if role != required {
                return Err(ServiceError::WrongParty(format!("{:?}", required).to_lowercase()));
            }
        }

        let from = ContractStateMachine::new(&mut contract).transition(to)?;
        let contract = self.db_client.save_contract(&mut tx, &contract).await?;
        self.audit_service
            .log_status_change(&mut tx, Some(user.id), contract_id, from, to)
            .await?;
        tx.commit().await?;

        self.db_client.invalidate_contract(contract_id).await;
        self.notification_service.publish(ContractEvent::ContractStatusChanged {
            contract_id,
            from,
            to,
            timestamp: Utc::now(),
        });

        Ok(contract)
    }

    pub async fn regenerate_pairing_code(&self, user: &AuthUser, contract_id: Uuid) -> Result<PairingCode, ServiceError> {
        let contract = self.load_for_party(user.id, contract_id).await?;
        if contract.status.is_terminal() {
            return Err(ServiceError::TerminalContract(contract_id, contract.status));
        }

        let code = generate_pairing_code();
        let expires_at = pairing_code_expiry(Utc::now());
        self.db_client
            .set_pairing_code(contract_id, &code, expires_at, user.id)
            .await?;
        self.db_client.invalidate_contract(contract_id).await;

        Ok(PairingCode {
            contract_id,
            code,
            expires_at,
        })
    }

    /// A matching, unexpired code proves both parties met; a pending contract
    /// starts. The code is spent only when the confirmation commits.
    pub async fn confirm_pairing(&self, user: &AuthUser, contract_id: Uuid, code: &str) -> Result<Contract, ServiceError> {
        let mut tx = self.db_client.begin().await?;
        let mut contract = self
            .db_client
            .lock_contract(&mut tx, contract_id)
            .await?
            .ok_or(ServiceError::ContractNotFound(contract_id))?;
        check_pairing_code(&contract, user.id, code, Utc::now())?;

        self.db_client.clear_pairing_code(&mut tx, contract_id).await?;
        let activated = if contract.status == ContractStatus::Pending {
            Some(ContractStateMachine::new(&mut contract).transition(ContractStatus::Active)?)
        } else {
            None
        };
        let contract = self.db_client.save_contract(&mut tx, &contract).await?;
        if let Some(from) = activated {
            self.audit_service
                .log_status_change(&mut tx, Some(user.id), contract_id, from, contract.status)
                .await?;
        }
        tx.commit().await?;

        self.db_client.invalidate_contract(contract_id).await;
        if let Some(from) = activated {
            self.notification_service.publish(ContractEvent::ContractStatusChanged {
                contract_id,
                from,
                to: contract.status,
                timestamp: Utc::now(),
            });
        }
        Ok(contract)
    }

    /// Only the doer reports task progress, and never while a task claim is open.
    pub async fn update_task_status(
        &self,
        user: &AuthUser,
        contract_id: Uuid,
        task_id: Uuid,
        status: TaskStatus,
    ) -> Result<ContractTask, ServiceError> {
        let mut tx = self.db_client.begin().await?;
        let contract = self
            .db_client
            .lock_contract(&mut tx, contract_id)
            .await?
            .ok_or(ServiceError::ContractNotFound(contract_id))?;

        match contract.role_of(user.id) {
            Some(ContractRole::Doer) => {}
            Some(ContractRole::Client) => return Err(ServiceError::WrongParty("doer".to_string())),
            None => return Err(ServiceError::NotContractParty(user.id, contract_id)),
        }
        if contract.status != ContractStatus::Active {
            return Err(ServiceError::InvalidContractStatus(contract_id, contract.status));
        }
        if contract.has_pending_task_claim {
            return Err(ServiceError::AmendmentAlreadyPending {
                contract_id,
                pending: AmendmentType::TaskClaim,
            });
        }

        let task = self
            .db_client
            .update_task_status(&mut tx, contract_id, task_id, status)
            .await?
            .ok_or(ServiceError::TaskNotFound(task_id))?;
        tx.commit().await?;

        self.db_client.invalidate_contract(contract_id).await;
        Ok(task)
    }

    pub async fn quote_commission(&self, user: &AuthUser, price: &BigDecimal) -> Result<CommissionQuote, ServiceError> {
        self.policy.ensure_price_allowed(price)?;
        let now = Utc::now();
        let quota = self
            .db_client
            .get_user_quota(user.id)
            .await?
            .unwrap_or_else(|| UserQuota::empty(user.id, now));
        Ok(self.policy.quote(price, &quota, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::amendmentmodel::{fixtures as amendments, ChangeRequestType};
    use crate::models::contractmodel::fixtures;
    use crate::service::testing;
    use chrono::{Duration, TimeZone};
    use sqlx::PgPool;

    #[test]
    fn every_pending_amendment_blocks_every_other_type() {
        for pending in AmendmentType::ALL {
            for incoming in AmendmentType::ALL {
                let mut contract = fixtures::contract();
                ContractStateMachine::new(&mut contract)
                    .reserve_amendment(pending, Uuid::new_v4())
                    .unwrap();

                let machine = ContractStateMachine::new(&mut contract);
                assert!(!machine.can_accept_amendment(incoming));
                match machine.ensure_can_accept(incoming) {
                    Err(ServiceError::AmendmentAlreadyPending { pending: found, .. }) => {
                        assert_eq!(found, pending, "{:?} then {:?}", pending, incoming)
                    }
                    other => panic!("{:?} then {:?} gave {:?}", pending, incoming, other),
                }
            }
        }
    }

    #[test]
    fn terminal_and_disputed_contracts_refuse_amendments() {
        let mut contract = fixtures::contract();
        contract.status = ContractStatus::Completed;
        assert!(matches!(
            ContractStateMachine::new(&mut contract).ensure_can_accept(AmendmentType::ChangeRequest),
            Err(ServiceError::TerminalContract(_, ContractStatus::Completed))
        ));

        contract.status = ContractStatus::Disputed;
        assert!(matches!(
            ContractStateMachine::new(&mut contract).ensure_can_accept(AmendmentType::TaskClaim),
            Err(ServiceError::InvalidContractStatus(_, ContractStatus::Disputed))
        ));
    }

    #[test]
    fn extension_applies_once_from_the_original_end_date() {
        let mut contract = fixtures::contract();
        contract.original_end_date = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        contract.end_date = contract.original_end_date;

        let first = amendments::extension_request(&contract, 7);
        let mut machine = ContractStateMachine::new(&mut contract);
        machine.reserve_amendment(AmendmentType::ExtensionRequest, first.id).unwrap();
        machine.apply_extension(&first).unwrap();

        assert_eq!(contract.end_date, Utc.with_ymd_and_hms(2024, 1, 17, 0, 0, 0).unwrap());
        assert!(contract.has_been_extended);
        assert!(contract.pending_amendment().is_none());

        let second = amendments::extension_request(&contract, 3);
        let mut machine = ContractStateMachine::new(&mut contract);
        assert!(matches!(
            machine.reserve_amendment(AmendmentType::ExtensionRequest, second.id),
            Err(ServiceError::AlreadyExtended(_))
        ));
        assert!(matches!(machine.apply_extension(&second), Err(ServiceError::AlreadyExtended(_))));
        assert!(contract.has_been_extended);
    }

    #[test]
    fn earlier_rejected_extensions_do_not_shift_the_new_end_date() {
        let mut contract = fixtures::contract();
        contract.original_end_date = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        contract.end_date = contract.original_end_date;

        let rejected = amendments::extension_request(&contract, 30);
        let mut machine = ContractStateMachine::new(&mut contract);
        machine.reserve_amendment(AmendmentType::ExtensionRequest, rejected.id).unwrap();
        machine.release_amendment(AmendmentType::ExtensionRequest, rejected.id).unwrap();

        let approved = amendments::extension_request(&contract, 7);
        let mut machine = ContractStateMachine::new(&mut contract);
        machine.reserve_amendment(AmendmentType::ExtensionRequest, approved.id).unwrap();
        machine.apply_extension(&approved).unwrap();
        assert_eq!(contract.end_date, Utc.with_ymd_and_hms(2024, 1, 17, 0, 0, 0).unwrap());
    }

    #[test]
    fn releasing_someone_elses_marker_is_an_integrity_error() {
        let mut contract = fixtures::contract();
        let mut machine = ContractStateMachine::new(&mut contract);
        machine.reserve_amendment(AmendmentType::ChangeRequest, Uuid::new_v4()).unwrap();
        assert!(matches!(
            machine.release_amendment(AmendmentType::ChangeRequest, Uuid::new_v4()),
            Err(ServiceError::Integrity(_))
        ));
    }

    #[test]
    fn accepted_task_claim_moves_the_end_date() {
        let mut contract = fixtures::contract();
        let new_end = contract.end_date + Duration::days(5);
        let claim = amendments::task_claim(&contract, vec![Uuid::new_v4()], new_end);

        let mut machine = ContractStateMachine::new(&mut contract);
        machine.reserve_amendment(AmendmentType::TaskClaim, claim.id).unwrap();
        assert!(contract.has_pending_task_claim);

        ContractStateMachine::new(&mut contract)
            .apply_task_claim_result(&claim, true)
            .unwrap();
        assert_eq!(contract.end_date, new_end);
        assert!(!contract.has_pending_task_claim);
        assert_eq!(contract.status, ContractStatus::Active);
    }

    #[test]
    fn rejected_task_claim_disputes_the_contract() {
        let mut contract = fixtures::contract();
        let original_end = contract.end_date;
        let claim = amendments::task_claim(&contract, vec![Uuid::new_v4()], original_end + Duration::days(5));

        let mut machine = ContractStateMachine::new(&mut contract);
        machine.reserve_amendment(AmendmentType::TaskClaim, claim.id).unwrap();
        machine.apply_task_claim_result(&claim, false).unwrap();

        assert_eq!(contract.status, ContractStatus::Disputed);
        assert_eq!(contract.end_date, original_end);
        assert!(!contract.has_pending_task_claim);
        assert!(contract.pending_amendment().is_none());
    }

    #[test]
    fn cancellation_request_cancels_the_contract() {
        let mut contract = fixtures::contract();
        let mut request = amendments::change_request(&contract, contract.created_at);
        request.request_type = ChangeRequestType::Cancel;

        let mut machine = ContractStateMachine::new(&mut contract);
        machine.reserve_amendment(AmendmentType::ChangeRequest, request.id).unwrap();
        machine
            .apply_change_request_result(&request, &BigDecimal::from(0))
            .unwrap();
        assert_eq!(contract.status, ContractStatus::Cancelled);
        assert!(!ContractStateMachine::new(&mut contract).can_accept_amendment(AmendmentType::ChangeRequest));
    }

    #[test]
    fn modify_request_checks_date_ordering_before_mutating() {
        let mut contract = fixtures::contract();
        let mut request = amendments::change_request(&contract, contract.created_at);
        request.new_start_date = Some(contract.end_date + Duration::days(1));

        let mut machine = ContractStateMachine::new(&mut contract);
        machine.reserve_amendment(AmendmentType::ChangeRequest, request.id).unwrap();
        assert!(matches!(
            machine.apply_change_request_result(&request, &BigDecimal::from(400)),
            Err(ServiceError::InvalidDateOrdering(_))
        ));
        assert_eq!(contract.price, BigDecimal::from(20_000));
        assert!(contract.pending_amendment().is_some());
    }

    #[test]
    fn modify_request_applies_new_terms() {
        let mut contract = fixtures::contract();
        let request = amendments::change_request(&contract, contract.created_at);

        let mut machine = ContractStateMachine::new(&mut contract);
        machine.reserve_amendment(AmendmentType::ChangeRequest, request.id).unwrap();
        machine
            .apply_change_request_result(&request, &BigDecimal::from(400))
            .unwrap();
        assert_eq!(contract.price, BigDecimal::from(25_000));
        assert_eq!(contract.commission, BigDecimal::from(2_000));
    }

    #[test]
    fn status_transitions_follow_the_table() {
        let mut contract = fixtures::contract();
        contract.status = ContractStatus::Pending;
        let mut machine = ContractStateMachine::new(&mut contract);
        assert!(matches!(
            machine.transition(ContractStatus::Completed),
            Err(ServiceError::InvalidStatusTransition { .. })
        ));
        assert_eq!(machine.transition(ContractStatus::Active).unwrap(), ContractStatus::Pending);

        machine.reserve_amendment(AmendmentType::PriceModification, Uuid::new_v4()).unwrap();
        assert!(matches!(
            machine.transition(ContractStatus::Completed),
            Err(ServiceError::AmendmentAlreadyPending { .. })
        ));

        contract.active_amendment_id = None;
        contract.active_amendment_type = None;
        let mut machine = ContractStateMachine::new(&mut contract);
        machine.transition(ContractStatus::Completed).unwrap();
        assert!(matches!(
            machine.transition(ContractStatus::Active),
            Err(ServiceError::TerminalContract(_, ContractStatus::Completed))
        ));
    }

    #[test]
    fn only_the_other_party_confirms_a_pairing_code() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap();
        let mut contract = fixtures::contract();
        contract.pairing_code = Some("482913".to_string());
        contract.pairing_code_expires_at = Some(now + Duration::minutes(10));
        contract.pairing_code_issued_by = Some(contract.client_id);

        assert!(check_pairing_code(&contract, contract.doer_id, " 482913 ", now).is_ok());
        assert!(matches!(
            check_pairing_code(&contract, contract.client_id, "482913", now),
            Err(ServiceError::WrongParty(_))
        ));
        assert!(matches!(
            check_pairing_code(&contract, Uuid::new_v4(), "482913", now),
            Err(ServiceError::NotContractParty(_, _))
        ));
    }

    #[test]
    fn wrong_expired_or_spent_codes_are_refused() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap();
        let mut contract = fixtures::contract();
        contract.pairing_code = Some("482913".to_string());
        contract.pairing_code_expires_at = Some(now - Duration::seconds(1));
        contract.pairing_code_issued_by = Some(contract.doer_id);

        assert!(check_pairing_code(&contract, contract.client_id, "482913", now).is_err());

        contract.pairing_code_expires_at = Some(now + Duration::minutes(15));
        assert!(check_pairing_code(&contract, contract.client_id, "000000", now).is_err());

        contract.pairing_code = None;
        contract.pairing_code_expires_at = None;
        assert!(matches!(
            check_pairing_code(&contract, contract.client_id, "482913", now),
            Err(ServiceError::Validation(_))
        ));
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs DATABASE_URL pointing at Postgres"]
    async fn pairing_is_confirmed_by_the_other_party_and_spent_once(pool: PgPool) {
        let seeded = testing::seed_contract(&pool, ContractStatus::Pending).await;
        let context = testing::context(&pool);
        let contracts = ContractService::new(
            context.db_client.clone(),
            context.policy.clone(),
            context.notification_service.clone(),
            context.audit_service.clone(),
        );
        let client = testing::user(seeded.client_id);
        let doer = testing::user(seeded.doer_id);

        let issued = contracts.regenerate_pairing_code(&client, seeded.id).await.unwrap();
        assert!(matches!(
            contracts.confirm_pairing(&client, seeded.id, &issued.code).await,
            Err(ServiceError::WrongParty(_))
        ));

        let activated = contracts.confirm_pairing(&doer, seeded.id, &issued.code).await.unwrap();
        assert_eq!(activated.status, ContractStatus::Active);
        assert!(activated.pairing_code.is_none());
        assert!(contracts.confirm_pairing(&doer, seeded.id, &issued.code).await.is_err());
    }
}
