// service/task_claim_service.rs
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use uuid::Uuid;

use crate::{
    db::{amendmentdb::AmendmentExt, contractdb::ContractExt, disputedb::DisputeExt},
    models::{
        amendmentmodel::{TaskClaim, TaskClaimStatus},
        contractmodel::{AmendmentType, Contract, ContractRole, ContractTask, TaskStatus},
        disputemodel::{importance_level, DisputeCategory, DisputePriority, NewDispute},
    },
    service::{
        amendment_service::{
            ensure_counterparty, ensure_party, ensure_requester, lock_amendment_contract, lock_contract, reserve_slot,
            AmendmentContext, AmendmentEffect, AmendmentOutcome,
        },
        contract_service::ContractStateMachine,
        error::ServiceError,
        event_bus::ContractEvent,
    },
};

/// Returns the distinct claimed ids once every one of them names an
/// unfinished task of this contract.
pub fn validate_claimed_tasks(tasks: &[ContractTask], claimed: &[Uuid]) -> Result<Vec<Uuid>, ServiceError> {
    let mut seen = HashSet::new();
    let distinct: Vec<Uuid> = claimed.iter().copied().filter(|id| seen.insert(*id)).collect();
    if distinct.is_empty() {
        return Err(ServiceError::Validation("at least one task must be claimed".to_string()));
    }

    for id in &distinct {
        let task = tasks
            .iter()
            .find(|t| t.id == *id)
            .ok_or(ServiceError::TaskNotFound(*id))?;
        if task.status == TaskStatus::Completed {
            return Err(ServiceError::Validation(format!(
                "task '{}' is already completed and cannot be claimed",
                task.title
            )));
        }
    }
    Ok(distinct)
}

/// The dispute a rejected claim turns into. The client keeps the initiative.
pub fn task_claim_dispute(contract: &Contract, claim: &TaskClaim, rejection_reason: Option<&str>) -> NewDispute {
    let rejection = rejection_reason
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or("no reason given");

    let mut reason = format!("Task claim rejected by the doer: {}", rejection);
    if let Some(claim_reason) = claim.reason.as_deref().filter(|r| !r.trim().is_empty()) {
        reason.push_str(&format!(". Client's claim: {}", claim_reason.trim()));
    }

    NewDispute {
        contract_id: contract.id,
        initiator_id: claim.requester_id,
        respondent_id: contract.doer_id,
        reason,
        category: DisputeCategory::TaskClaim,
        priority: DisputePriority::High,
        importance_level: importance_level(DisputePriority::High, &contract.price),
        source_amendment_type: Some(AmendmentType::TaskClaim),
        source_amendment_id: Some(claim.id),
        support_ticket_id: None,
    }
}

#[derive(Debug, Clone)]
pub struct TaskClaimService {
    context: AmendmentContext,
}

impl TaskClaimService {
    pub fn new(context: AmendmentContext) -> Self {
        Self { context }
    }

    pub async fn submit(
        &self,
        requester_id: Uuid,
        contract_id: Uuid,
        claimed_task_ids: Vec<Uuid>,
        new_end_date: DateTime<Utc>,
        reason: Option<String>,
    ) -> Result<AmendmentOutcome, ServiceError> {
        if new_end_date <= Utc::now() {
            return Err(ServiceError::InvalidDateOrdering(
                "the new end date must be in the future".to_string(),
            ));
        }
        let reason = reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());

        let db_client = &self.context.db_client;
        let mut tx = db_client.begin().await?;

        let mut contract = lock_contract(db_client, &mut tx, contract_id).await?;
        if ensure_party(&contract, requester_id)? != ContractRole::Client {
            return Err(ServiceError::WrongParty("client".to_string()));
        }
        ContractStateMachine::new(&mut contract).ensure_can_accept(AmendmentType::TaskClaim)?;
        if new_end_date <= contract.start_date {
            return Err(ServiceError::InvalidDateOrdering(
                "the new end date must fall after the contract start date".to_string(),
            ));
        }

        let tasks = db_client.lock_contract_tasks(&mut tx, contract_id).await?;
        let task_ids = validate_claimed_tasks(&tasks, &claimed_task_ids)?;

        let claim = db_client
            .insert_task_claim(&mut tx, contract_id, requester_id, &task_ids, new_end_date, reason.as_deref())
            .await?;
        reserve_slot(db_client, &mut tx, &mut contract, AmendmentType::TaskClaim, claim.id).await?;

        self.context
            .audit_service
            .log_amendment(&mut tx, Some(requester_id), contract_id, AmendmentType::TaskClaim, claim.id, "submitted")
            .await?;
        tx.commit().await?;

        db_client.invalidate_contract(contract_id).await;
        self.context
            .notification_service
            .notify_amendment_submitted(contract.doer_id, &contract, AmendmentType::TaskClaim, claim.id, &claim.summary())
            .await;

        Ok(AmendmentOutcome::new(AmendmentType::TaskClaim, claim.id, claim.status))
    }

    async fn lock_claim(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        claim_id: Uuid,
    ) -> Result<(TaskClaim, Contract), ServiceError> {
        let db_client = &self.context.db_client;
        let contract = lock_amendment_contract(db_client, tx, AmendmentType::TaskClaim, claim_id).await?;
        let claim = db_client
            .lock_task_claim(tx, claim_id)
            .await?
            .ok_or(ServiceError::AmendmentNotFound(AmendmentType::TaskClaim, claim_id))?;
        Ok((claim, contract))
    }

    /// Only the doer answers. A rejection always ends in a dispute.
    pub async fn respond(
        &self,
        responder_id: Uuid,
        claim_id: Uuid,
        accept: bool,
        response_reason: Option<&str>,
    ) -> Result<AmendmentOutcome, ServiceError> {
        let db_client = &self.context.db_client;
        let mut tx = db_client.begin().await?;

        let (claim, mut contract) = self.lock_claim(&mut tx, claim_id).await?;
        ensure_counterparty(&contract, claim.requester_id, responder_id, AmendmentType::TaskClaim)?;
        if contract.role_of(responder_id) != Some(ContractRole::Doer) {
            return Err(ServiceError::NotCounterparty(responder_id, AmendmentType::TaskClaim));
        }
        if claim.status != TaskClaimStatus::Pending {
            return Err(ServiceError::AmendmentNotPending(AmendmentType::TaskClaim, claim_id));
        }

        let previous_status = contract.status;
        let mut effects = Vec::new();
        let mut dispute = None;

        let status = if accept {
            ContractStateMachine::new(&mut contract).apply_task_claim_result(&claim, true)?;
            db_client
                .reset_tasks_to_pending(&mut tx, contract.id, &claim.claimed_task_ids)
                .await?;
            effects.push(AmendmentEffect::ScheduleChanged {
                start_date: contract.start_date,
                end_date: contract.end_date,
            });
            effects.push(AmendmentEffect::TasksReset {
                task_ids: claim.claimed_task_ids.clone(),
            });
            TaskClaimStatus::Accepted
        } else {
            ContractStateMachine::new(&mut contract).apply_task_claim_result(&claim, false)?;
            let opened = db_client
                .insert_dispute(&mut tx, &task_claim_dispute(&contract, &claim, response_reason))
                .await?;
            db_client.link_task_claim_dispute(&mut tx, claim.id, opened.id).await?;
            effects.push(AmendmentEffect::ContractDisputed);
            effects.push(AmendmentEffect::DisputeOpened { dispute_id: opened.id });
            dispute = Some(opened);
            TaskClaimStatus::Rejected
        };

        let closed = db_client
            .close_task_claim(&mut tx, claim.id, status, Some(responder_id), response_reason)
            .await?
            .ok_or(ServiceError::AmendmentNotPending(AmendmentType::TaskClaim, claim_id))?;
        let contract = db_client.save_contract(&mut tx, &contract).await?;

        let audit = &self.context.audit_service;
        audit
            .log_amendment(
                &mut tx,
                Some(responder_id),
                contract.id,
                AmendmentType::TaskClaim,
                claim.id,
                if accept { "accepted" } else { "rejected" },
            )
            .await?;
        if let Some(dispute) = &dispute {
            audit
                .log_status_change(&mut tx, Some(responder_id), contract.id, previous_status, contract.status)
                .await?;
            audit.log_dispute(&mut tx, Some(responder_id), dispute, "dispute_opened").await?;
        }
        tx.commit().await?;

        db_client.invalidate_contract(contract.id).await;

        let notifications = &self.context.notification_service;
        notifications
            .notify_amendment_answered(
                claim.requester_id,
                contract.id,
                AmendmentType::TaskClaim,
                claim.id,
                accept,
                &claim.summary(),
            )
            .await;
        if let Some(dispute) = &dispute {
            tracing::info!(
                "Task claim {} rejected; dispute {} opened on contract {}",
                claim.id,
                dispute.id,
                contract.id
            );
            notifications.notify_dispute_opened(dispute).await;
            notifications.publish(ContractEvent::ContractStatusChanged {
                contract_id: contract.id,
                from: previous_status,
                to: contract.status,
                timestamp: Utc::now(),
            });
        }

        Ok(AmendmentOutcome::new(AmendmentType::TaskClaim, closed.id, closed.status).with_effects(effects))
    }

    pub async fn withdraw(&self, user_id: Uuid, claim_id: Uuid) -> Result<AmendmentOutcome, ServiceError> {
        let db_client = &self.context.db_client;
        let mut tx = db_client.begin().await?;

        let (claim, mut contract) = self.lock_claim(&mut tx, claim_id).await?;
        ensure_requester(claim.requester_id, user_id)?;
        if claim.status != TaskClaimStatus::Pending {
            return Err(ServiceError::AmendmentNotPending(AmendmentType::TaskClaim, claim_id));
        }

        ContractStateMachine::new(&mut contract).release_amendment(AmendmentType::TaskClaim, claim.id)?;

        let closed = db_client
            .close_task_claim(&mut tx, claim.id, TaskClaimStatus::Withdrawn, None, None)
            .await?
            .ok_or(ServiceError::AmendmentNotPending(AmendmentType::TaskClaim, claim_id))?;
        db_client.save_contract(&mut tx, &contract).await?;
        self.context
            .audit_service
            .log_amendment(&mut tx, Some(user_id), contract.id, AmendmentType::TaskClaim, claim.id, "withdrawn")
            .await?;
        tx.commit().await?;

        db_client.invalidate_contract(contract.id).await;
        self.context
            .notification_service
            .notify_amendment_withdrawn(contract.doer_id, contract.id, AmendmentType::TaskClaim, claim.id)
            .await;

        Ok(AmendmentOutcome::new(AmendmentType::TaskClaim, closed.id, closed.status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{
            amendmentmodel::fixtures as amendments,
            contractmodel::{fixtures, ContractStatus},
        },
        service::testing,
    };
    use chrono::Duration;
    use sqlx::PgPool;

    #[test]
    fn claimed_tasks_must_exist_and_be_unfinished() {
        let contract = fixtures::contract();
        let open = fixtures::task(contract.id, TaskStatus::InProgress);
        let done = fixtures::task(contract.id, TaskStatus::Completed);
        let tasks = vec![open.clone(), done.clone()];

        assert_eq!(validate_claimed_tasks(&tasks, &[open.id, open.id]).unwrap(), vec![open.id]);
        assert!(matches!(
            validate_claimed_tasks(&tasks, &[done.id]),
            Err(ServiceError::Validation(_))
        ));
        let stranger = Uuid::new_v4();
        assert!(matches!(
            validate_claimed_tasks(&tasks, &[open.id, stranger]),
            Err(ServiceError::TaskNotFound(id)) if id == stranger
        ));
        assert!(validate_claimed_tasks(&tasks, &[]).is_err());
    }

    #[test]
    fn rejected_claim_yields_one_dispute_citing_the_rejection() {
        let mut contract = fixtures::contract();
        let claim = amendments::task_claim(&contract, vec![Uuid::new_v4()], contract.end_date + Duration::days(4));

        let mut machine = ContractStateMachine::new(&mut contract);
        machine.reserve_amendment(AmendmentType::TaskClaim, claim.id).unwrap();
        machine.apply_task_claim_result(&claim, false).unwrap();

        let dispute = task_claim_dispute(&contract, &claim, Some("  the tiles were finished on Monday "));
        assert_eq!(contract.status, ContractStatus::Disputed);
        assert_eq!(dispute.contract_id, contract.id);
        assert_eq!(dispute.initiator_id, contract.client_id);
        assert_eq!(dispute.respondent_id, contract.doer_id);
        assert_eq!(dispute.category, DisputeCategory::TaskClaim);
        assert_eq!(dispute.priority, DisputePriority::High);
        assert_eq!(dispute.source_amendment_id, Some(claim.id));
        assert!(dispute.reason.contains("the tiles were finished on Monday"));
        assert!(dispute.reason.contains("Tiles in the bathroom are not finished"));
    }

    #[test]
    fn dispute_reason_has_a_fallback() {
        let contract = fixtures::contract();
        let mut claim = amendments::task_claim(&contract, vec![Uuid::new_v4()], contract.end_date);
        claim.reason = None;
        let dispute = task_claim_dispute(&contract, &claim, Some("   "));
        assert_eq!(dispute.reason, "Task claim rejected by the doer: no reason given");
    }

    #[test]
    fn accepted_claim_opens_no_dispute_and_moves_the_end_date() {
        let mut contract = fixtures::contract();
        let new_end = contract.end_date + Duration::days(6);
        let claim = amendments::task_claim(&contract, vec![Uuid::new_v4()], new_end);

        let mut machine = ContractStateMachine::new(&mut contract);
        machine.reserve_amendment(AmendmentType::TaskClaim, claim.id).unwrap();
        machine.apply_task_claim_result(&claim, true).unwrap();

        assert_eq!(contract.end_date, new_end);
        assert_eq!(contract.status, ContractStatus::Active);
        assert!(!contract.has_pending_task_claim);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs DATABASE_URL pointing at Postgres"]
    async fn rejected_claim_disputes_the_contract_in_one_step(pool: PgPool) {
        let seeded = testing::seed_contract(&pool, ContractStatus::Active).await;
        let task_ids = testing::seed_tasks(&pool, seeded.id, &["Prime walls", "Second coat"]).await;
        let claims = TaskClaimService::new(testing::context(&pool));

        let submitted = claims
            .submit(
                seeded.client_id,
                seeded.id,
                vec![task_ids[0]],
                Utc::now() + Duration::days(20),
                Some("Walls were left patchy".to_string()),
            )
            .await
            .unwrap();
        let (_, marker, task_claim_open) = testing::stored_contract(&pool, seeded.id).await;
        assert_eq!(marker, Some(submitted.amendment_id));
        assert!(task_claim_open);

        let answered = claims
            .respond(seeded.doer_id, submitted.amendment_id, false, None)
            .await
            .unwrap();
        assert_eq!(answered.status, "rejected");
        assert!(matches!(
            claims.respond(seeded.doer_id, submitted.amendment_id, false, None).await,
            Err(ServiceError::AmendmentNotPending(AmendmentType::TaskClaim, _))
        ));

        assert_eq!(testing::count_rows(&pool, "disputes", seeded.id).await, 1);
        let (status, marker, task_claim_open) = testing::stored_contract(&pool, seeded.id).await;
        assert_eq!(status, ContractStatus::Disputed);
        assert!(marker.is_none());
        assert!(!task_claim_open);

        let linked: Option<Uuid> = sqlx::query_scalar("SELECT dispute_id FROM task_claims WHERE id = $1")
            .bind(submitted.amendment_id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert!(linked.is_some());
    }
}
