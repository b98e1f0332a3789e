// services/audit_service.rs
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Postgres, Transaction};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    db::db::DBClient,
    models::{
        contractmodel::{AmendmentType, Contract, ContractStatus},
        disputemodel::Dispute,
    },
    service::error::ServiceError,
};

/// Audit rows are written inside the transaction of the change they record,
/// so a rolled back change leaves no trail.
#[derive(Debug, Clone)]
pub struct AuditService {
    db_client: Arc<DBClient>,
}

impl AuditService {
    pub fn new(db_client: Arc<DBClient>) -> Self {
        Self { db_client }
    }

    pub async fn log_contract_created(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        contract: &Contract,
    ) -> Result<(), ServiceError> {
        self.log_audit_event(
            tx,
            Some(contract.client_id),
            "contract_created",
            Some(contract.id),
            Some(contract.doer_id),
            Some(serde_json::json!({
                "job_id": contract.job_id,
                "price": contract.price.to_string(),
                "commission": contract.commission.to_string(),
                "commission_waived": contract.commission_waived,
            })),
            "Contract created from an approved proposal".to_string(),
        )
        .await
    }

    pub async fn log_status_change(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        actor_id: Option<Uuid>,
        contract_id: Uuid,
        from: ContractStatus,
        to: ContractStatus,
    ) -> Result<(), ServiceError> {
        self.log_audit_event(
            tx,
            actor_id,
            "contract_status_changed",
            Some(contract_id),
            None,
            Some(serde_json::json!({ "from": from, "to": to })),
            format!("Contract moved from {} to {}", from.to_str(), to.to_str()),
        )
        .await
    }

    pub async fn log_amendment(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        actor_id: Option<Uuid>,
        contract_id: Uuid,
        amendment_type: AmendmentType,
        amendment_id: Uuid,
        outcome: &str,
    ) -> Result<(), ServiceError> {
        self.log_audit_event(
            tx,
            actor_id,
            &format!("{}_{}", amendment_type.to_str(), outcome),
            Some(contract_id),
            None,
            Some(serde_json::json!({
                "amendment_type": amendment_type,
                "amendment_id": amendment_id,
            })),
            format!("{} {}", amendment_type.label(), outcome),
        )
        .await
    }

    pub async fn log_dispute(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        actor_id: Option<Uuid>,
        dispute: &Dispute,
        action: &str,
    ) -> Result<(), ServiceError> {
        self.log_audit_event(
            tx,
            actor_id,
            action,
            Some(dispute.contract_id),
            Some(dispute.respondent_id),
            Some(serde_json::json!({
                "dispute_id": dispute.id,
                "status": dispute.status,
                "category": dispute.category,
                "priority": dispute.priority,
            })),
            format!("Dispute {}: {}", action, dispute.reason),
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn log_audit_event(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        actor_id: Option<Uuid>,
        action: &str,
        contract_id: Option<Uuid>,
        target_user_id: Option<Uuid>,
        metadata: Option<serde_json::Value>,
        description: String,
    ) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs
            (actor_id, action, contract_id, target_user_id, metadata, description, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            "#,
        )
        .bind(actor_id)
        .bind(action)
        .bind(contract_id)
        .bind(target_user_id)
        .bind(metadata)
        .bind(description)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    pub async fn get_contract_audit_logs(
        &self,
        contract_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditLog>, ServiceError> {
        let logs = sqlx::query_as::<_, AuditLog>(
            r#"
            SELECT id, actor_id, action, contract_id, target_user_id, metadata, description, created_at
            FROM audit_logs
            WHERE contract_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(contract_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db_client.pool)
        .await?;

        Ok(logs)
    }
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct AuditLog {
    pub id: Uuid,
    pub actor_id: Option<Uuid>,
    pub action: String,
    pub contract_id: Option<Uuid>,
    pub target_user_id: Option<Uuid>,
    pub metadata: Option<serde_json::Value>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}
