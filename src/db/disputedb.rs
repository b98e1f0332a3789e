// db/disputedb.rs
use async_trait::async_trait;
use sqlx::{types::BigDecimal, Error, Postgres, Transaction};
use uuid::Uuid;

use super::db::DBClient;
use crate::models::disputemodel::*;

#[async_trait]
pub trait DisputeExt {
    async fn insert_dispute(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        dispute: &NewDispute,
    ) -> Result<Dispute, Error>;

    async fn get_dispute(&self, dispute_id: Uuid) -> Result<Option<Dispute>, Error>;

    async fn lock_dispute(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        dispute_id: Uuid,
    ) -> Result<Option<Dispute>, Error>;

    async fn update_dispute_status(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        dispute_id: Uuid,
        status: DisputeStatus,
    ) -> Result<Dispute, Error>;

    async fn resolve_dispute(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        dispute_id: Uuid,
        resolution: DisputeResolutionType,
        resolution_amount: Option<&BigDecimal>,
        resolution_notes: Option<&str>,
        resolved_by: Uuid,
    ) -> Result<Dispute, Error>;

    async fn get_contract_disputes(&self, contract_id: Uuid) -> Result<Vec<Dispute>, Error>;
}

#[async_trait]
impl DisputeExt for DBClient {
    async fn insert_dispute(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        dispute: &NewDispute,
    ) -> Result<Dispute, Error> {
        sqlx::query_as::<_, Dispute>(
            r#"
            INSERT INTO disputes
            (contract_id, initiator_id, respondent_id, reason, category, priority, importance_level,
             status, source_amendment_type, source_amendment_id, support_ticket_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'open', $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(dispute.contract_id)
        .bind(dispute.initiator_id)
        .bind(dispute.respondent_id)
        .bind(&dispute.reason)
        .bind(dispute.category)
        .bind(dispute.priority)
        .bind(dispute.importance_level)
        .bind(dispute.source_amendment_type)
        .bind(dispute.source_amendment_id)
        .bind(dispute.support_ticket_id)
        .fetch_one(&mut **tx)
        .await
    }

    async fn get_dispute(&self, dispute_id: Uuid) -> Result<Option<Dispute>, Error> {
        sqlx::query_as::<_, Dispute>("SELECT * FROM disputes WHERE id = $1")
            .bind(dispute_id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn lock_dispute(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        dispute_id: Uuid,
    ) -> Result<Option<Dispute>, Error> {
        sqlx::query_as::<_, Dispute>("SELECT * FROM disputes WHERE id = $1 FOR UPDATE")
            .bind(dispute_id)
            .fetch_optional(&mut **tx)
            .await
    }

    async fn update_dispute_status(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        dispute_id: Uuid,
        status: DisputeStatus,
    ) -> Result<Dispute, Error> {
        sqlx::query_as::<_, Dispute>(
            "UPDATE disputes SET status = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(dispute_id)
        .bind(status)
        .fetch_one(&mut **tx)
        .await
    }

    async fn resolve_dispute(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        dispute_id: Uuid,
        resolution: DisputeResolutionType,
        resolution_amount: Option<&BigDecimal>,
        resolution_notes: Option<&str>,
        resolved_by: Uuid,
    ) -> Result<Dispute, Error> {
        sqlx::query_as::<_, Dispute>(
            r#"
            UPDATE disputes
            SET status = $2,
                resolution_type = $3,
                resolution_amount = $4,
                resolution_notes = $5,
                resolved_by = $6,
                resolved_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(dispute_id)
        .bind(resolution.status())
        .bind(resolution.to_str())
        .bind(resolution_amount)
        .bind(resolution_notes)
        .bind(resolved_by)
        .fetch_one(&mut **tx)
        .await
    }

    async fn get_contract_disputes(&self, contract_id: Uuid) -> Result<Vec<Dispute>, Error> {
        sqlx::query_as::<_, Dispute>(
            "SELECT * FROM disputes WHERE contract_id = $1 ORDER BY created_at DESC",
        )
        .bind(contract_id)
        .fetch_all(&self.pool)
        .await
    }
}
