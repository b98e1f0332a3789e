// services/notification_service.rs
use std::sync::Arc;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    db::db::DBClient,
    models::{
        contractmodel::{AmendmentType, Contract},
        disputemodel::Dispute,
    },
    service::event_bus::{ContractEvent, EventBus},
};

/// Fire-and-forget delivery: a notification that cannot be stored is logged
/// and dropped, it never fails the operation that triggered it.
#[derive(Debug, Clone)]
pub struct NotificationService {
    db_client: Arc<DBClient>,
    event_bus: Arc<EventBus>,
}

impl NotificationService {
    pub fn new(db_client: Arc<DBClient>, event_bus: Arc<EventBus>) -> Self {
        Self { db_client, event_bus }
    }

    pub fn publish(&self, event: ContractEvent) {
        self.event_bus.publish(event);
    }

    pub async fn notify_amendment_submitted(
        &self,
        recipient_id: Uuid,
        contract: &Contract,
        amendment_type: AmendmentType,
        amendment_id: Uuid,
        summary: &str,
    ) {
        tracing::info!(
            "Amendment submitted: {} {} on contract {}",
            amendment_type.to_str(),
            amendment_id,
            contract.id
        );

        self.store_notification(
            recipient_id,
            "amendment_submitted",
            Some(contract.id),
            Some(serde_json::json!({
                "amendment_type": amendment_type,
                "amendment_id": amendment_id,
                "summary": summary,
            })),
            format!("A new {} is waiting for your answer", amendment_type.label()),
        )
        .await;

        self.publish(ContractEvent::AmendmentSubmitted {
            contract_id: contract.id,
            amendment_type,
            amendment_id,
            summary: summary.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub async fn notify_amendment_answered(
        &self,
        requester_id: Uuid,
        contract_id: Uuid,
        amendment_type: AmendmentType,
        amendment_id: Uuid,
        accepted: bool,
        summary: &str,
    ) {
        let (kind, verb) = if accepted {
            ("amendment_accepted", "accepted")
        } else {
            ("amendment_rejected", "rejected")
        };

        self.store_notification(
            requester_id,
            kind,
            Some(contract_id),
            Some(serde_json::json!({
                "amendment_type": amendment_type,
                "amendment_id": amendment_id,
                "summary": summary,
            })),
            format!("Your {} was {}", amendment_type.label(), verb),
        )
        .await;

        let timestamp = Utc::now();
        let summary = summary.to_string();
        self.publish(if accepted {
            ContractEvent::AmendmentAccepted { contract_id, amendment_type, amendment_id, summary, timestamp }
        } else {
            ContractEvent::AmendmentRejected { contract_id, amendment_type, amendment_id, summary, timestamp }
        });
    }

    pub async fn notify_amendment_withdrawn(
        &self,
        recipient_id: Uuid,
        contract_id: Uuid,
        amendment_type: AmendmentType,
        amendment_id: Uuid,
    ) {
        self.store_notification(
            recipient_id,
            "amendment_withdrawn",
            Some(contract_id),
            Some(serde_json::json!({
                "amendment_type": amendment_type,
                "amendment_id": amendment_id,
            })),
            format!("The {} on your contract was withdrawn", amendment_type.label()),
        )
        .await;

        self.publish(ContractEvent::AmendmentWithdrawn {
            contract_id,
            amendment_type,
            amendment_id,
            timestamp: Utc::now(),
        });
    }

    pub async fn notify_extension_expired(&self, requester_id: Uuid, contract_id: Uuid, amendment_id: Uuid) {
        self.store_notification(
            requester_id,
            "extension_expired",
            Some(contract_id),
            Some(serde_json::json!({ "amendment_id": amendment_id })),
            "Your extension request expired without an answer".to_string(),
        )
        .await;

        self.publish(ContractEvent::AmendmentExpired {
            contract_id,
            amendment_type: AmendmentType::ExtensionRequest,
            amendment_id,
            timestamp: Utc::now(),
        });
    }

    pub async fn notify_escalation(
        &self,
        contract: &Contract,
        amendment_id: Uuid,
        support_ticket_id: Uuid,
        dispute_id: Uuid,
        summary: &str,
    ) {
        tracing::info!(
            "Change request {} on contract {} escalated to support ticket {}",
            amendment_id,
            contract.id,
            support_ticket_id
        );

        for user_id in [contract.client_id, contract.doer_id] {
            self.store_notification(
                user_id,
                "change_request_escalated",
                Some(contract.id),
                Some(serde_json::json!({
                    "amendment_id": amendment_id,
                    "support_ticket_id": support_ticket_id,
                    "dispute_id": dispute_id,
                })),
                "An unanswered change request was sent to support for review".to_string(),
            )
            .await;
        }

        self.publish(ContractEvent::AmendmentEscalated {
            contract_id: contract.id,
            amendment_type: AmendmentType::ChangeRequest,
            amendment_id,
            support_ticket_id,
            dispute_id,
            summary: summary.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub async fn notify_payment_required(
        &self,
        requester_id: Uuid,
        contract_id: Uuid,
        amendment_id: Uuid,
        amount: &sqlx::types::BigDecimal,
        payment_url: &str,
    ) {
        self.store_notification(
            requester_id,
            "price_difference_payment_required",
            Some(contract_id),
            Some(serde_json::json!({
                "amendment_id": amendment_id,
                "amount": amount.to_string(),
                "payment_url": payment_url,
            })),
            format!("Pay {} ARS to apply the new contract price", amount),
        )
        .await;
    }

    /// A price change that needed nobody's consent took effect.
    pub async fn notify_price_applied(
        &self,
        recipient_id: Uuid,
        contract_id: Uuid,
        amendment_id: Uuid,
        summary: &str,
    ) {
        self.store_notification(
            recipient_id,
            "contract_price_changed",
            Some(contract_id),
            Some(serde_json::json!({
                "amendment_id": amendment_id,
                "summary": summary,
            })),
            format!("The contract price changed. {}", summary),
        )
        .await;

        self.publish(ContractEvent::AmendmentAccepted {
            contract_id,
            amendment_type: AmendmentType::PriceModification,
            amendment_id,
            summary: summary.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub async fn notify_dispute_opened(&self, dispute: &Dispute) {
        self.store_notification(
            dispute.respondent_id,
            "dispute_opened",
            Some(dispute.contract_id),
            Some(serde_json::json!({
                "dispute_id": dispute.id,
                "category": dispute.category,
                "reason": dispute.reason,
            })),
            format!("A dispute was opened on your contract: {}", dispute.reason),
        )
        .await;

        self.publish(ContractEvent::DisputeOpened {
            contract_id: dispute.contract_id,
            dispute_id: dispute.id,
            importance_level: dispute.importance_level,
            timestamp: Utc::now(),
        });
    }

    pub async fn notify_dispute_resolved(&self, dispute: &Dispute) {
        let resolution_type = dispute.resolution_type.clone().unwrap_or_default();
        for user_id in [dispute.initiator_id, dispute.respondent_id] {
            self.store_notification(
                user_id,
                "dispute_resolved",
                Some(dispute.contract_id),
                Some(serde_json::json!({
                    "dispute_id": dispute.id,
                    "resolution_type": resolution_type,
                    "resolution_amount": dispute.resolution_amount.as_ref().map(|a| a.to_string()),
                })),
                format!("Your dispute was resolved ({})", resolution_type),
            )
            .await;
        }

        self.publish(ContractEvent::DisputeResolved {
            contract_id: dispute.contract_id,
            dispute_id: dispute.id,
            resolution_type,
            timestamp: Utc::now(),
        });
    }

    async fn store_notification(
        &self,
        user_id: Uuid,
        notification_type: &str,
        contract_id: Option<Uuid>,
        metadata: Option<serde_json::Value>,
        message: String,
    ) {
        let result = sqlx::query(
            r#"
            INSERT INTO notifications (user_id, notification_type, contract_id, metadata, message)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(user_id)
        .bind(notification_type)
        .bind(contract_id)
        .bind(metadata)
        .bind(&message)
        .execute(&self.db_client.pool)
        .await;

        if let Err(e) = result {
            tracing::warn!(
                "Failed to store {} notification for user {}: {}",
                notification_type,
                user_id,
                e
            );
        }
    }

    pub async fn get_user_notifications(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<UserNotification>, sqlx::Error> {
        sqlx::query_as::<_, UserNotification>(
            r#"
            SELECT id, user_id, notification_type, contract_id, metadata, message, is_read, created_at
            FROM notifications
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.db_client.pool)
        .await
    }
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct UserNotification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub notification_type: String,
    pub contract_id: Option<Uuid>,
    pub metadata: Option<serde_json::Value>,
    pub message: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}
