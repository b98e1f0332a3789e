// service/escalation_service.rs
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    db::{amendmentdb::AmendmentExt, contractdb::ContractExt, disputedb::DisputeExt, supportdb::SupportExt},
    models::{
        amendmentmodel::ChangeRequest,
        contractmodel::{AmendmentType, Contract, ContractStatus},
        disputemodel::{importance_level, Dispute, DisputeCategory, DisputePriority, NewDispute},
        supportmodel::{NewSupportTicket, TicketCategory, TicketPriority},
    },
    service::{
        amendment_service::{lock_contract, AmendmentContext},
        contract_service::ContractStateMachine,
        error::ServiceError,
        event_bus::ContractEvent,
    },
};

/// Support ticket and dispute raised for one unanswered change request.
#[derive(Debug, Clone)]
pub struct EscalationPlan {
    pub ticket: NewSupportTicket,
    pub dispute: NewDispute,
}

pub fn plan_escalation(contract: &Contract, request: &ChangeRequest) -> EscalationPlan {
    let summary = request.changes_summary(contract);
    let respondent_id = contract.counterparty_of(request.requester_id).unwrap_or(contract.doer_id);

    EscalationPlan {
        ticket: NewSupportTicket {
            user_id: request.requester_id,
            contract_id: Some(contract.id),
            source_amendment_id: Some(request.id),
            title: format!("Unanswered change request on contract {}", contract.id),
            description: summary.clone(),
            category: TicketCategory::Contract,
            priority: TicketPriority::High,
        },
        dispute: NewDispute {
            contract_id: contract.id,
            initiator_id: request.requester_id,
            respondent_id,
            reason: format!("Change request left unanswered past its response window.\n{}", summary),
            category: DisputeCategory::ContractChange,
            priority: DisputePriority::High,
            importance_level: importance_level(DisputePriority::High, &contract.price),
            source_amendment_type: Some(AmendmentType::ChangeRequest),
            source_amendment_id: Some(request.id),
            support_ticket_id: None,
        },
    }
}

#[derive(Debug, Clone)]
pub struct Escalation {
    pub change_request_id: Uuid,
    pub support_ticket_id: Uuid,
    pub dispute: Dispute,
    pub summary: String,
}

#[derive(Debug, Clone)]
pub struct EscalationService {
    context: AmendmentContext,
}

impl EscalationService {
    pub fn new(context: AmendmentContext) -> Self {
        Self { context }
    }

    /// Escalates the contract's overdue change requests. Ticket, dispute and
    /// status change commit together; two concurrent callers serialize on the
    /// contract row and the second one finds nothing left to escalate.
    pub async fn escalate_overdue(&self, contract_id: Uuid, now: DateTime<Utc>) -> Result<Vec<Escalation>, ServiceError> {
        let db_client = &self.context.db_client;
        let mut tx = db_client.begin().await?;

        let mut contract = lock_contract(db_client, &mut tx, contract_id).await?;
        let overdue: Vec<ChangeRequest> = db_client
            .lock_pending_change_requests(&mut tx, contract_id)
            .await?
            .into_iter()
            .filter(|r| r.requires_urgent_attention_at(now, self.context.windows.change_request))
            .collect();
        if overdue.is_empty() {
            return Ok(Vec::new());
        }

        let previous_status = contract.status;
        let mut escalations = Vec::new();

        for request in &overdue {
            let plan = plan_escalation(&contract, request);

            let ticket = match db_client.create_support_ticket(&mut tx, &plan.ticket).await? {
                Some(ticket) => ticket,
                None => {
                    tracing::warn!("Change request {} already has a support ticket", request.id);
                    continue;
                }
            };
            if db_client
                .escalate_change_request(&mut tx, request.id, ticket.id)
                .await?
                .is_none()
            {
                return Err(ServiceError::Integrity(format!(
                    "change request {} left pending while its ticket was created",
                    request.id
                )));
            }

            let dispute = db_client
                .insert_dispute(
                    &mut tx,
                    &NewDispute {
                        support_ticket_id: Some(ticket.id),
                        ..plan.dispute
                    },
                )
                .await?;

            let holds_marker = contract.pending_amendment() == Some((AmendmentType::ChangeRequest, request.id));
            let already_disputed = contract.status == ContractStatus::Disputed;
            let mut machine = ContractStateMachine::new(&mut contract);
            if holds_marker {
                machine.release_amendment(AmendmentType::ChangeRequest, request.id)?;
            }
            if !already_disputed {
                machine.transition(ContractStatus::Disputed)?;
            }

            let audit = &self.context.audit_service;
            audit
                .log_amendment(&mut tx, None, contract_id, AmendmentType::ChangeRequest, request.id, "escalated")
                .await?;
            audit.log_dispute(&mut tx, None, &dispute, "dispute_opened").await?;

            escalations.push(Escalation {
                change_request_id: request.id,
                support_ticket_id: ticket.id,
                dispute,
                summary: plan.ticket.description.clone(),
            });
        }

        if escalations.is_empty() {
            return Ok(escalations);
        }

        db_client.save_contract(&mut tx, &contract).await?;
        if previous_status != contract.status {
            self.context
                .audit_service
                .log_status_change(&mut tx, None, contract_id, previous_status, contract.status)
                .await?;
        }
        tx.commit().await?;

        db_client.invalidate_contract(contract_id).await;

        let notifications = &self.context.notification_service;
        for escalation in &escalations {
            notifications
                .notify_escalation(
                    &contract,
                    escalation.change_request_id,
                    escalation.support_ticket_id,
                    escalation.dispute.id,
                    &escalation.summary,
                )
                .await;
            notifications.notify_dispute_opened(&escalation.dispute).await;
        }
        if previous_status != contract.status {
            notifications.publish(ContractEvent::ContractStatusChanged {
                contract_id,
                from: previous_status,
                to: contract.status,
                timestamp: Utc::now(),
            });
        }

        Ok(escalations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{
            amendmentmodel::{fixtures as amendments, ChangeRequestStatus, ChangeRequestType, NewTerms, CHANGE_REQUEST_EXPIRY_HOURS},
            contractmodel::fixtures,
        },
        service::{change_request_service::ChangeRequestService, testing},
    };
    use chrono::Duration;
    use sqlx::PgPool;

    #[test]
    fn plan_carries_the_changes_summary_and_source() {
        let contract = fixtures::contract();
        let request = amendments::change_request(&contract, contract.created_at);
        let plan = plan_escalation(&contract, &request);

        assert_eq!(plan.ticket.description, request.changes_summary(&contract));
        assert_eq!(plan.ticket.priority, TicketPriority::High);
        assert_eq!(plan.ticket.category, TicketCategory::Contract);
        assert_eq!(plan.ticket.source_amendment_id, Some(request.id));

        assert_eq!(plan.dispute.initiator_id, contract.client_id);
        assert_eq!(plan.dispute.respondent_id, contract.doer_id);
        assert_eq!(plan.dispute.category, DisputeCategory::ContractChange);
        assert_eq!(plan.dispute.source_amendment_id, Some(request.id));
    }

    #[test]
    fn only_overdue_pending_requests_qualify() {
        let contract = fixtures::contract();
        let created = contract.created_at;
        let request = amendments::change_request(&contract, created);
        let window = Duration::hours(48);

        assert!(!request.requires_urgent_attention_at(created + Duration::hours(47), window));
        assert!(request.requires_urgent_attention_at(created + Duration::hours(49), window));
    }

    #[test]
    fn escalated_request_is_no_longer_overdue() {
        let contract = fixtures::contract();
        let created = contract.created_at;
        let mut request = amendments::change_request(&contract, created);
        request.status = ChangeRequestStatus::EscalatedToSupport;
        request.support_ticket_id = Some(Uuid::new_v4());

        assert!(!request.requires_urgent_attention_at(created + Duration::hours(49), Duration::hours(48)));
    }

    #[test]
    fn escalation_frees_the_contract_and_disputes_it() {
        let mut contract = fixtures::contract();
        let request = amendments::change_request(&contract, contract.created_at);

        let mut machine = ContractStateMachine::new(&mut contract);
        machine.reserve_amendment(AmendmentType::ChangeRequest, request.id).unwrap();
        machine.release_amendment(AmendmentType::ChangeRequest, request.id).unwrap();
        machine.transition(ContractStatus::Disputed).unwrap();

        assert_eq!(contract.status, ContractStatus::Disputed);
        assert!(contract.pending_amendment().is_none());
    }

    async fn overdue_change_request(pool: &PgPool) -> (AmendmentContext, testing::SeededContract, Uuid) {
        let context = testing::context(pool);
        let seeded = testing::seed_contract(pool, ContractStatus::Active).await;
        let outcome = ChangeRequestService::new(context.clone())
            .submit(
                seeded.client_id,
                seeded.id,
                ChangeRequestType::Cancel,
                "The client is moving abroad",
                NewTerms::default(),
            )
            .await
            .unwrap();
        (context, seeded, outcome.amendment_id)
    }

    fn past_the_window() -> DateTime<Utc> {
        Utc::now() + Duration::hours(CHANGE_REQUEST_EXPIRY_HOURS + 1)
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs DATABASE_URL pointing at Postgres"]
    async fn concurrent_passes_open_one_ticket_and_one_dispute(pool: PgPool) {
        let (context, seeded, request_id) = overdue_change_request(&pool).await;
        let escalation = EscalationService::new(context);
        let later = past_the_window();

        let (first, second) = tokio::join!(
            escalation.escalate_overdue(seeded.id, later),
            escalation.escalate_overdue(seeded.id, later)
        );
        assert_eq!(first.unwrap().len() + second.unwrap().len(), 1);
        assert!(escalation.escalate_overdue(seeded.id, later).await.unwrap().is_empty());

        assert_eq!(testing::count_rows(&pool, "support_tickets", seeded.id).await, 1);
        assert_eq!(testing::count_rows(&pool, "disputes", seeded.id).await, 1);

        let (status, marker, _) = testing::stored_contract(&pool, seeded.id).await;
        assert_eq!(status, ContractStatus::Disputed);
        assert!(marker.is_none());

        let request_status: ChangeRequestStatus = sqlx::query_scalar("SELECT status FROM change_requests WHERE id = $1")
            .bind(request_id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(request_status, ChangeRequestStatus::EscalatedToSupport);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs DATABASE_URL pointing at Postgres"]
    async fn answering_while_escalating_settles_one_way(pool: PgPool) {
        let (context, seeded, request_id) = overdue_change_request(&pool).await;
        let change_requests = ChangeRequestService::new(context.clone());
        let escalation = EscalationService::new(context);

        let (answer, escalated) = tokio::join!(
            change_requests.respond(seeded.doer_id, request_id, false, Some("Not agreed")),
            escalation.escalate_overdue(seeded.id, past_the_window())
        );

        // Both paths lock the contract row first, so neither aborts on a lock cycle.
        match (answer, escalated) {
            (Ok(_), Ok(escalations)) => {
                assert!(escalations.is_empty());
                assert_eq!(testing::count_rows(&pool, "disputes", seeded.id).await, 0);
            }
            (Err(ServiceError::AmendmentNotPending(AmendmentType::ChangeRequest, _)), Ok(escalations)) => {
                assert_eq!(escalations.len(), 1);
                assert_eq!(testing::count_rows(&pool, "disputes", seeded.id).await, 1);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs DATABASE_URL pointing at Postgres"]
    async fn store_keeps_one_pending_request_per_contract(pool: PgPool) {
        let (_, seeded, _) = overdue_change_request(&pool).await;

        let duplicate = sqlx::query(
            "INSERT INTO change_requests (contract_id, requester_id, request_type, reason) VALUES ($1, $2, 'cancel', 'again')",
        )
        .bind(seeded.id)
        .bind(seeded.doer_id)
        .execute(&pool)
        .await;
        assert!(duplicate.is_err());
    }
}
