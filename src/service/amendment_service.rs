// service/amendment_service.rs
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::{types::BigDecimal, Postgres, Transaction};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    config::Config,
    db::{amendmentdb::AmendmentExt, contractdb::ContractExt, db::DBClient, quotadb::QuotaExt},
    models::{
        amendmentmodel::{AmendmentHistoryEntry, ChangeRequestType, NewTerms},
        contractmodel::{AmendmentType, Contract, ContractRole},
        ledgermodel::{LedgerEntryKind, NewLedgerEntry},
        usermodel::{AuthUser, MembershipTier},
    },
    service::{
        audit_service::AuditService,
        change_request_service::ChangeRequestService,
        commission_service::CommissionPolicy,
        contract_service::ContractStateMachine,
        error::ServiceError,
        escalation_service::EscalationService,
        extension_service::ExtensionService,
        notification_service::NotificationService,
        payment_provider::PaymentGateway,
        price_modification_service::PriceModificationService,
        task_claim_service::TaskClaimService,
    },
};

/// Response windows after which unanswered requests stop waiting.
#[derive(Debug, Clone, Copy)]
pub struct AmendmentWindows {
    pub change_request: Duration,
    pub extension: Duration,
}

impl AmendmentWindows {
    pub fn from_config(config: &Config) -> Self {
        Self {
            change_request: Duration::hours(config.change_request_expiry_hours),
            extension: Duration::hours(config.extension_expiry_hours),
        }
    }
}

/// Collaborators every amendment type needs.
#[derive(Debug, Clone)]
pub struct AmendmentContext {
    pub db_client: Arc<DBClient>,
    pub policy: CommissionPolicy,
    pub windows: AmendmentWindows,
    pub notification_service: Arc<NotificationService>,
    pub audit_service: Arc<AuditService>,
}

#[derive(Debug, Clone)]
pub enum AmendmentPayload {
    ChangeRequest {
        request_type: ChangeRequestType,
        reason: String,
        terms: NewTerms,
    },
    ExtensionRequest {
        extension_days: i32,
        extension_amount: BigDecimal,
        extension_notes: Option<String>,
    },
    PriceModification {
        new_price: BigDecimal,
        reason: Option<String>,
    },
    TaskClaim {
        claimed_task_ids: Vec<Uuid>,
        new_end_date: DateTime<Utc>,
        reason: Option<String>,
    },
}

impl AmendmentPayload {
    pub fn amendment_type(&self) -> AmendmentType {
        match self {
            AmendmentPayload::ChangeRequest { .. } => AmendmentType::ChangeRequest,
            AmendmentPayload::ExtensionRequest { .. } => AmendmentType::ExtensionRequest,
            AmendmentPayload::PriceModification { .. } => AmendmentType::PriceModification,
            AmendmentPayload::TaskClaim { .. } => AmendmentType::TaskClaim,
        }
    }
}

/// What an amendment did to the contract and around it.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum AmendmentEffect {
    ScheduleChanged {
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
    },
    PriceChanged {
        price: BigDecimal,
        commission: BigDecimal,
    },
    DescriptionChanged,
    ContractCancelled,
    ContractDisputed,
    ContractExtended {
        end_date: DateTime<Utc>,
    },
    TasksReset {
        task_ids: Vec<Uuid>,
    },
    DisputeOpened {
        dispute_id: Uuid,
    },
    PaymentRequired {
        amount: BigDecimal,
        reference: String,
        payment_url: String,
    },
    BalanceCredited {
        amount: BigDecimal,
    },
    LedgerRecorded {
        kind: LedgerEntryKind,
        amount: BigDecimal,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct AmendmentOutcome {
    pub amendment_type: AmendmentType,
    pub amendment_id: Uuid,
    pub status: String,
    pub effects: Vec<AmendmentEffect>,
}

impl AmendmentOutcome {
    pub fn new<S: Serialize>(amendment_type: AmendmentType, amendment_id: Uuid, status: S) -> Self {
        let status = serde_json::to_value(status)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        Self {
            amendment_type,
            amendment_id,
            status,
            effects: Vec::new(),
        }
    }

    pub fn with_effects(mut self, effects: Vec<AmendmentEffect>) -> Self {
        self.effects = effects;
        self
    }
}

pub(crate) async fn lock_contract(
    db_client: &DBClient,
    tx: &mut Transaction<'_, Postgres>,
    contract_id: Uuid,
) -> Result<Contract, ServiceError> {
    db_client
        .lock_contract(tx, contract_id)
        .await?
        .ok_or(ServiceError::ContractNotFound(contract_id))
}

/// Locks the contract owning an amendment. Callers lock the amendment row
/// afterwards, so every path takes the contract lock first.
pub(crate) async fn lock_amendment_contract(
    db_client: &DBClient,
    tx: &mut Transaction<'_, Postgres>,
    amendment_type: AmendmentType,
    amendment_id: Uuid,
) -> Result<Contract, ServiceError> {
    let contract_id = db_client
        .amendment_contract_id(amendment_type, amendment_id)
        .await?
        .ok_or(ServiceError::AmendmentNotFound(amendment_type, amendment_id))?;
    lock_contract(db_client, tx, contract_id).await
}

pub(crate) fn ensure_party(contract: &Contract, user_id: Uuid) -> Result<ContractRole, ServiceError> {
    contract
        .role_of(user_id)
        .ok_or(ServiceError::NotContractParty(user_id, contract.id))
}

/// The requester never answers their own amendment.
pub(crate) fn ensure_counterparty(
    contract: &Contract,
    requester_id: Uuid,
    responder_id: Uuid,
    amendment_type: AmendmentType,
) -> Result<(), ServiceError> {
    if responder_id == requester_id || !contract.is_party(responder_id) {
        return Err(ServiceError::NotCounterparty(responder_id, amendment_type));
    }
    Ok(())
}

/// Parties and admins may read a contract's amendments.
pub(crate) fn ensure_can_read(contract: &Contract, user: &AuthUser) -> Result<(), ServiceError> {
    if !contract.is_party(user.id) && !user.is_admin() {
        return Err(ServiceError::NotContractParty(user.id, contract.id));
    }
    Ok(())
}

pub(crate) fn ensure_requester(requester_id: Uuid, user_id: Uuid) -> Result<(), ServiceError> {
    if requester_id != user_id {
        return Err(ServiceError::WrongParty("requester".to_string()));
    }
    Ok(())
}

/// Sets the pending marker in memory and in the store. The store update is
/// guarded, so a concurrent holder shows up here even without the row lock.
pub(crate) async fn reserve_slot(
    db_client: &DBClient,
    tx: &mut Transaction<'_, Postgres>,
    contract: &mut Contract,
    amendment_type: AmendmentType,
    amendment_id: Uuid,
) -> Result<(), ServiceError> {
    ContractStateMachine::new(contract).reserve_amendment(amendment_type, amendment_id)?;

    if !db_client
        .claim_amendment_slot(tx, contract.id, amendment_type, amendment_id)
        .await?
    {
        return Err(ServiceError::AmendmentAlreadyPending {
            contract_id: contract.id,
            pending: amendment_type,
        });
    }
    Ok(())
}

pub(crate) async fn client_tier(db_client: &DBClient, client_id: Uuid) -> Result<MembershipTier, ServiceError> {
    Ok(db_client
        .get_user_quota(client_id)
        .await?
        .map(|quota| quota.membership_tier)
        .unwrap_or(MembershipTier::Free))
}

pub(crate) async fn record_ledger(
    db_client: &DBClient,
    tx: &mut Transaction<'_, Postgres>,
    entry: NewLedgerEntry,
    effects: &mut Vec<AmendmentEffect>,
) -> Result<(), ServiceError> {
    let recorded = db_client.insert_ledger_entry(tx, &entry).await?;
    effects.push(AmendmentEffect::LedgerRecorded {
        kind: recorded.kind,
        amount: recorded.amount,
    });
    Ok(())
}

/// Entry point for the four amendment types.
#[derive(Debug, Clone)]
pub struct AmendmentService {
    context: AmendmentContext,
    change_requests: Arc<ChangeRequestService>,
    extensions: Arc<ExtensionService>,
    price_modifications: Arc<PriceModificationService>,
    task_claims: Arc<TaskClaimService>,
    escalation: Arc<EscalationService>,
}

impl AmendmentService {
    pub fn new(context: AmendmentContext, payment_gateway: Arc<dyn PaymentGateway>) -> Self {
        Self {
            change_requests: Arc::new(ChangeRequestService::new(context.clone())),
            extensions: Arc::new(ExtensionService::new(context.clone())),
            price_modifications: Arc::new(PriceModificationService::new(context.clone(), payment_gateway)),
            task_claims: Arc::new(TaskClaimService::new(context.clone())),
            escalation: Arc::new(EscalationService::new(context.clone())),
            context,
        }
    }

    pub fn price_modifications(&self) -> &PriceModificationService {
        &self.price_modifications
    }

    pub async fn submit(
        &self,
        user: &AuthUser,
        contract_id: Uuid,
        payload: AmendmentPayload,
    ) -> Result<AmendmentOutcome, ServiceError> {
        tracing::debug!(
            "User {} submitting {} on contract {}",
            user.id,
            payload.amendment_type().to_str(),
            contract_id
        );

        match payload {
            AmendmentPayload::ChangeRequest {
                request_type,
                reason,
                terms,
            } => {
                self.change_requests
                    .submit(user.id, contract_id, request_type, &reason, terms)
                    .await
            }
            AmendmentPayload::ExtensionRequest {
                extension_days,
                extension_amount,
                extension_notes,
            } => {
                self.extensions
                    .submit(user.id, contract_id, extension_days, extension_amount, extension_notes)
                    .await
            }
            AmendmentPayload::PriceModification { new_price, reason } => {
                self.price_modifications
                    .submit(user, contract_id, new_price, reason)
                    .await
            }
            AmendmentPayload::TaskClaim {
                claimed_task_ids,
                new_end_date,
                reason,
            } => {
                self.task_claims
                    .submit(user.id, contract_id, claimed_task_ids, new_end_date, reason)
                    .await
            }
        }
    }

    pub async fn respond(
        &self,
        user: &AuthUser,
        amendment_type: AmendmentType,
        amendment_id: Uuid,
        accept: bool,
        reason: Option<String>,
    ) -> Result<AmendmentOutcome, ServiceError> {
        let reason = reason.as_deref();
        match amendment_type {
            AmendmentType::ChangeRequest => {
                self.change_requests
                    .respond(user.id, amendment_id, accept, reason)
                    .await
            }
            AmendmentType::ExtensionRequest => {
                self.extensions.respond(user.id, amendment_id, accept, reason).await
            }
            AmendmentType::PriceModification => {
                self.price_modifications
                    .respond(user.id, amendment_id, accept)
                    .await
            }
            AmendmentType::TaskClaim => {
                self.task_claims.respond(user.id, amendment_id, accept, reason).await
            }
        }
    }

    pub async fn withdraw(
        &self,
        user: &AuthUser,
        amendment_type: AmendmentType,
        amendment_id: Uuid,
    ) -> Result<AmendmentOutcome, ServiceError> {
        match amendment_type {
            AmendmentType::ChangeRequest => self.change_requests.withdraw(user.id, amendment_id).await,
            AmendmentType::ExtensionRequest => self.extensions.withdraw(user.id, amendment_id).await,
            AmendmentType::PriceModification => self.price_modifications.withdraw(user.id, amendment_id).await,
            AmendmentType::TaskClaim => self.task_claims.withdraw(user.id, amendment_id).await,
        }
    }

    /// Runs the lazy escalation and expiry checks for one contract. Failures
    /// leave the requests pending for the next read.
    pub async fn refresh_contract(&self, contract_id: Uuid) {
        let now = Utc::now();
        if let Err(e) = self.escalation.escalate_overdue(contract_id, now).await {
            tracing::warn!("Lazy escalation failed for contract {}: {}", contract_id, e);
        }
        if let Err(e) = self.extensions.expire_overdue(contract_id, now).await {
            tracing::warn!("Lazy extension expiry failed for contract {}: {}", contract_id, e);
        }
    }

    /// One pass over every contract holding an overdue request.
    pub async fn sweep(&self) -> Result<usize, ServiceError> {
        let now = Utc::now();
        let contract_ids = self
            .context
            .db_client
            .contracts_with_overdue_amendments(
                now - self.context.windows.change_request,
                now - self.context.windows.extension,
            )
            .await?;

        for contract_id in &contract_ids {
            self.refresh_contract(*contract_id).await;
        }
        Ok(contract_ids.len())
    }

    pub async fn history(&self, user: &AuthUser, contract_id: Uuid) -> Result<Vec<AmendmentHistoryEntry>, ServiceError> {
        let db_client = &self.context.db_client;
        let contract = db_client
            .get_contract(contract_id)
            .await?
            .ok_or(ServiceError::ContractNotFound(contract_id))?;
        ensure_can_read(&contract, user)?;

        self.refresh_contract(contract_id).await;
        let contract = db_client
            .get_contract(contract_id)
            .await?
            .ok_or(ServiceError::ContractNotFound(contract_id))?;

        let cache_key = Contract::history_cache_key(contract_id);
        if let Some(entries) = db_client.cache_get::<Vec<AmendmentHistoryEntry>>(&cache_key).await {
            return Ok(entries);
        }

        let entries: Vec<AmendmentHistoryEntry> = db_client
            .list_contract_amendments(contract_id)
            .await?
            .into_iter()
            .map(|record| AmendmentHistoryEntry::from_record(record, &contract))
            .collect();

        db_client.cache_set(&cache_key, &entries).await;
        Ok(entries)
    }

    pub async fn get_amendment(
        &self,
        user: &AuthUser,
        amendment_type: AmendmentType,
        amendment_id: Uuid,
    ) -> Result<AmendmentHistoryEntry, ServiceError> {
        let db_client = &self.context.db_client;
        let record = db_client
            .get_amendment(amendment_type, amendment_id)
            .await?
            .ok_or(ServiceError::AmendmentNotFound(amendment_type, amendment_id))?;

        let contract_id = record.contract_id();
        let contract = db_client
            .get_contract(contract_id)
            .await?
            .ok_or(ServiceError::ContractNotFound(contract_id))?;
        ensure_can_read(&contract, user)?;

        Ok(AmendmentHistoryEntry::from_record(record, &contract))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{
            amendmentmodel::{ChangeRequestStatus, CHANGE_REQUEST_EXPIRY_HOURS},
            contractmodel::{fixtures, ContractStatus},
        },
        service::{payment_provider::ManualGateway, testing},
    };
    use sqlx::PgPool;

    #[test]
    fn only_the_other_party_may_answer() {
        let contract = fixtures::contract();
        let kind = AmendmentType::ExtensionRequest;

        assert!(ensure_counterparty(&contract, contract.doer_id, contract.client_id, kind).is_ok());
        assert!(matches!(
            ensure_counterparty(&contract, contract.doer_id, contract.doer_id, kind),
            Err(ServiceError::NotCounterparty(_, AmendmentType::ExtensionRequest))
        ));
        assert!(matches!(
            ensure_counterparty(&contract, contract.doer_id, Uuid::new_v4(), kind),
            Err(ServiceError::NotCounterparty(_, _))
        ));
    }

    #[test]
    fn outcome_reports_snake_case_status() {
        let outcome = AmendmentOutcome::new(
            AmendmentType::ChangeRequest,
            Uuid::new_v4(),
            ChangeRequestStatus::EscalatedToSupport,
        );
        assert_eq!(outcome.status, "escalated_to_support");
        assert!(outcome.effects.is_empty());
    }

    #[test]
    fn effects_serialize_with_a_tag() {
        let json = serde_json::to_value(AmendmentEffect::TasksReset {
            task_ids: vec![Uuid::nil()],
        })
        .unwrap();
        assert_eq!(json["effect"], "tasks_reset");
    }

    #[test]
    fn payload_reports_its_type() {
        let payload = AmendmentPayload::PriceModification {
            new_price: BigDecimal::from(9_000),
            reason: None,
        };
        assert_eq!(payload.amendment_type(), AmendmentType::PriceModification);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs DATABASE_URL pointing at Postgres"]
    async fn strangers_reading_history_trigger_no_escalation(pool: PgPool) {
        let seeded = testing::seed_contract(&pool, ContractStatus::Active).await;
        let amendments = AmendmentService::new(
            testing::context(&pool),
            Arc::new(ManualGateway::new("whsec".to_string(), "http://localhost/pay".to_string())),
        );
        let client = testing::user(seeded.client_id);

        let submitted = amendments
            .submit(
                &client,
                seeded.id,
                AmendmentPayload::ChangeRequest {
                    request_type: ChangeRequestType::Cancel,
                    reason: "The client is moving abroad".to_string(),
                    terms: NewTerms::default(),
                },
            )
            .await
            .unwrap();
        sqlx::query("UPDATE change_requests SET created_at = $2 WHERE id = $1")
            .bind(submitted.amendment_id)
            .bind(Utc::now() - Duration::hours(CHANGE_REQUEST_EXPIRY_HOURS + 1))
            .execute(&pool)
            .await
            .unwrap();

        let stranger = testing::user(Uuid::new_v4());
        assert!(matches!(
            amendments.history(&stranger, seeded.id).await,
            Err(ServiceError::NotContractParty(_, _))
        ));
        assert_eq!(testing::count_rows(&pool, "support_tickets", seeded.id).await, 0);

        let history = amendments.history(&client, seeded.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(testing::count_rows(&pool, "support_tickets", seeded.id).await, 1);
    }
}
