// db/amendmentdb.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{types::BigDecimal, Error, Postgres, Transaction};
use uuid::Uuid;

use super::db::DBClient;
use crate::models::{amendmentmodel::*, contractmodel::AmendmentType};

#[async_trait]
pub trait AmendmentExt {
    // Change requests
    async fn insert_change_request(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        contract_id: Uuid,
        requester_id: Uuid,
        request_type: ChangeRequestType,
        reason: &str,
        terms: &NewTerms,
    ) -> Result<ChangeRequest, Error>;

    async fn lock_change_request(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<Option<ChangeRequest>, Error>;

    /// Moves a still-pending change request to a terminal status.
    async fn close_change_request(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        status: ChangeRequestStatus,
        responder_id: Option<Uuid>,
        response_reason: Option<&str>,
    ) -> Result<Option<ChangeRequest>, Error>;

    /// Guarded on `status = 'pending'`; returns None when another caller escalated first.
    async fn escalate_change_request(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        support_ticket_id: Uuid,
    ) -> Result<Option<ChangeRequest>, Error>;

    async fn lock_pending_change_requests(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        contract_id: Uuid,
    ) -> Result<Vec<ChangeRequest>, Error>;

    // Extension requests
    async fn insert_extension_request(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        contract_id: Uuid,
        requester_id: Uuid,
        extension_days: i32,
        extension_amount: &BigDecimal,
        extension_notes: Option<&str>,
    ) -> Result<ExtensionRequest, Error>;

    async fn lock_extension_request(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<Option<ExtensionRequest>, Error>;

    async fn close_extension_request(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        status: ExtensionStatus,
        responder_id: Option<Uuid>,
        response_reason: Option<&str>,
    ) -> Result<Option<ExtensionRequest>, Error>;

    async fn lock_pending_extension_requests(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        contract_id: Uuid,
    ) -> Result<Vec<ExtensionRequest>, Error>;

    // Price modifications
    #[allow(clippy::too_many_arguments)]
    async fn insert_price_modification(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        contract_id: Uuid,
        requester_id: Uuid,
        previous_price: &BigDecimal,
        new_price: &BigDecimal,
        commission_delta: &BigDecimal,
        reason: Option<&str>,
        status: PriceModificationStatus,
    ) -> Result<PriceModification, Error>;

    async fn set_price_modification_payment(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        payment_reference: &str,
        payment_url: &str,
    ) -> Result<PriceModification, Error>;

    async fn lock_price_modification(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<Option<PriceModification>, Error>;

    async fn lock_price_modification_by_reference(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        payment_reference: &str,
    ) -> Result<Option<PriceModification>, Error>;

    /// Leaves the payment-required sub-state; guarded so it happens once.
    async fn close_price_modification(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        status: PriceModificationStatus,
        responder_id: Option<Uuid>,
    ) -> Result<Option<PriceModification>, Error>;

    // Task claims
    async fn insert_task_claim(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        contract_id: Uuid,
        requester_id: Uuid,
        claimed_task_ids: &[Uuid],
        new_end_date: DateTime<Utc>,
        reason: Option<&str>,
    ) -> Result<TaskClaim, Error>;

    async fn lock_task_claim(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<Option<TaskClaim>, Error>;

    async fn close_task_claim(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        status: TaskClaimStatus,
        responder_id: Option<Uuid>,
        response_reason: Option<&str>,
    ) -> Result<Option<TaskClaim>, Error>;

    async fn link_task_claim_dispute(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        dispute_id: Uuid,
    ) -> Result<TaskClaim, Error>;

    // Shared reads
    async fn get_amendment(
        &self,
        amendment_type: AmendmentType,
        id: Uuid,
    ) -> Result<Option<AmendmentRecord>, Error>;

    async fn list_contract_amendments(&self, contract_id: Uuid) -> Result<Vec<AmendmentRecord>, Error>;

    /// Unlocked read; an amendment never moves to another contract.
    async fn amendment_contract_id(
        &self,
        amendment_type: AmendmentType,
        id: Uuid,
    ) -> Result<Option<Uuid>, Error>;

    async fn price_modification_contract_id(&self, payment_reference: &str) -> Result<Option<Uuid>, Error>;
}

#[async_trait]
impl AmendmentExt for DBClient {
    async fn insert_change_request(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        contract_id: Uuid,
        requester_id: Uuid,
        request_type: ChangeRequestType,
        reason: &str,
        terms: &NewTerms,
    ) -> Result<ChangeRequest, Error> {
        sqlx::query_as::<_, ChangeRequest>(
            r#"
            INSERT INTO change_requests
            (contract_id, requester_id, request_type, reason, status,
             new_price, new_start_date, new_end_date, new_description)
            VALUES ($1, $2, $3, $4, 'pending', $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(contract_id)
        .bind(requester_id)
        .bind(request_type)
        .bind(reason)
        .bind(&terms.price)
        .bind(terms.start_date)
        .bind(terms.end_date)
        .bind(&terms.description)
        .fetch_one(&mut **tx)
        .await
    }

    async fn lock_change_request(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<Option<ChangeRequest>, Error> {
        sqlx::query_as::<_, ChangeRequest>("SELECT * FROM change_requests WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
    }

    async fn close_change_request(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        status: ChangeRequestStatus,
        responder_id: Option<Uuid>,
        response_reason: Option<&str>,
    ) -> Result<Option<ChangeRequest>, Error> {
        sqlx::query_as::<_, ChangeRequest>(
            r#"
            UPDATE change_requests
            SET status = $2,
                responded_by = $3,
                response_reason = $4,
                responded_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(responder_id)
        .bind(response_reason)
        .fetch_optional(&mut **tx)
        .await
    }

    async fn escalate_change_request(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        support_ticket_id: Uuid,
    ) -> Result<Option<ChangeRequest>, Error> {
        sqlx::query_as::<_, ChangeRequest>(
            r#"
            UPDATE change_requests
            SET status = 'escalated_to_support',
                support_ticket_id = $2,
                escalated_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(support_ticket_id)
        .fetch_optional(&mut **tx)
        .await
    }

    async fn lock_pending_change_requests(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        contract_id: Uuid,
    ) -> Result<Vec<ChangeRequest>, Error> {
        sqlx::query_as::<_, ChangeRequest>(
            r#"
            SELECT * FROM change_requests
            WHERE contract_id = $1 AND status = 'pending'
            ORDER BY created_at ASC
            FOR UPDATE
            "#,
        )
        .bind(contract_id)
        .fetch_all(&mut **tx)
        .await
    }

    async fn insert_extension_request(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        contract_id: Uuid,
        requester_id: Uuid,
        extension_days: i32,
        extension_amount: &BigDecimal,
        extension_notes: Option<&str>,
    ) -> Result<ExtensionRequest, Error> {
        sqlx::query_as::<_, ExtensionRequest>(
            r#"
            INSERT INTO extension_requests
            (contract_id, requester_id, extension_days, extension_amount, extension_notes, status)
            VALUES ($1, $2, $3, $4, $5, 'pending')
            RETURNING *
            "#,
        )
        .bind(contract_id)
        .bind(requester_id)
        .bind(extension_days)
        .bind(extension_amount)
        .bind(extension_notes)
        .fetch_one(&mut **tx)
        .await
    }

    async fn lock_extension_request(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<Option<ExtensionRequest>, Error> {
        sqlx::query_as::<_, ExtensionRequest>("SELECT * FROM extension_requests WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
    }

    async fn close_extension_request(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        status: ExtensionStatus,
        responder_id: Option<Uuid>,
        response_reason: Option<&str>,
    ) -> Result<Option<ExtensionRequest>, Error> {
        sqlx::query_as::<_, ExtensionRequest>(
            r#"
            UPDATE extension_requests
            SET status = $2,
                approved_by = CASE WHEN $2 = 'approved'::extension_status THEN $3 ELSE NULL END,
                response_reason = $4,
                responded_at = CASE WHEN $3 IS NULL THEN NULL ELSE NOW() END,
                updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(responder_id)
        .bind(response_reason)
        .fetch_optional(&mut **tx)
        .await
    }

    async fn lock_pending_extension_requests(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        contract_id: Uuid,
    ) -> Result<Vec<ExtensionRequest>, Error> {
        sqlx::query_as::<_, ExtensionRequest>(
            r#"
            SELECT * FROM extension_requests
            WHERE contract_id = $1 AND status = 'pending'
            ORDER BY created_at ASC
            FOR UPDATE
            "#,
        )
        .bind(contract_id)
        .fetch_all(&mut **tx)
        .await
    }

    async fn insert_price_modification(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        contract_id: Uuid,
        requester_id: Uuid,
        previous_price: &BigDecimal,
        new_price: &BigDecimal,
        commission_delta: &BigDecimal,
        reason: Option<&str>,
        status: PriceModificationStatus,
    ) -> Result<PriceModification, Error> {
        sqlx::query_as::<_, PriceModification>(
            r#"
            INSERT INTO price_modifications
            (contract_id, requester_id, previous_price, new_price, price_difference,
             commission_delta, reason, status, applied_at)
            VALUES ($1, $2, $3, $4, $4 - $3, $5, $6, $7,
                    CASE WHEN $7 = 'applied'::price_modification_status THEN NOW() ELSE NULL END)
            RETURNING *
            "#,
        )
        .bind(contract_id)
        .bind(requester_id)
        .bind(previous_price)
        .bind(new_price)
        .bind(commission_delta)
        .bind(reason)
        .bind(status)
        .fetch_one(&mut **tx)
        .await
    }

    async fn set_price_modification_payment(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        payment_reference: &str,
        payment_url: &str,
    ) -> Result<PriceModification, Error> {
        sqlx::query_as::<_, PriceModification>(
            r#"
            UPDATE price_modifications
            SET payment_reference = $2, payment_url = $3, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(payment_reference)
        .bind(payment_url)
        .fetch_one(&mut **tx)
        .await
    }

    async fn lock_price_modification(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<Option<PriceModification>, Error> {
        sqlx::query_as::<_, PriceModification>("SELECT * FROM price_modifications WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
    }

    async fn lock_price_modification_by_reference(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        payment_reference: &str,
    ) -> Result<Option<PriceModification>, Error> {
        sqlx::query_as::<_, PriceModification>(
            "SELECT * FROM price_modifications WHERE payment_reference = $1 FOR UPDATE",
        )
        .bind(payment_reference)
        .fetch_optional(&mut **tx)
        .await
    }

    async fn close_price_modification(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        status: PriceModificationStatus,
        responder_id: Option<Uuid>,
    ) -> Result<Option<PriceModification>, Error> {
        sqlx::query_as::<_, PriceModification>(
            r#"
            UPDATE price_modifications
            SET status = $2,
                responded_by = $3,
                applied_at = CASE WHEN $2 = 'applied'::price_modification_status THEN NOW() ELSE NULL END,
                updated_at = NOW()
            WHERE id = $1 AND status = 'payment_required'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(responder_id)
        .fetch_optional(&mut **tx)
        .await
    }

    async fn insert_task_claim(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        contract_id: Uuid,
        requester_id: Uuid,
        claimed_task_ids: &[Uuid],
        new_end_date: DateTime<Utc>,
        reason: Option<&str>,
    ) -> Result<TaskClaim, Error> {
        sqlx::query_as::<_, TaskClaim>(
            r#"
            INSERT INTO task_claims
            (contract_id, requester_id, claimed_task_ids, new_end_date, reason, status)
            VALUES ($1, $2, $3, $4, $5, 'pending')
            RETURNING *
            "#,
        )
        .bind(contract_id)
        .bind(requester_id)
        .bind(claimed_task_ids)
        .bind(new_end_date)
        .bind(reason)
        .fetch_one(&mut **tx)
        .await
    }

    async fn lock_task_claim(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<Option<TaskClaim>, Error> {
        sqlx::query_as::<_, TaskClaim>("SELECT * FROM task_claims WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
    }

    async fn close_task_claim(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        status: TaskClaimStatus,
        responder_id: Option<Uuid>,
        response_reason: Option<&str>,
    ) -> Result<Option<TaskClaim>, Error> {
        sqlx::query_as::<_, TaskClaim>(
            r#"
            UPDATE task_claims
            SET status = $2,
                responded_by = $3,
                response_reason = $4,
                responded_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(responder_id)
        .bind(response_reason)
        .fetch_optional(&mut **tx)
        .await
    }

    async fn link_task_claim_dispute(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        dispute_id: Uuid,
    ) -> Result<TaskClaim, Error> {
        sqlx::query_as::<_, TaskClaim>(
            "UPDATE task_claims SET dispute_id = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(dispute_id)
        .fetch_one(&mut **tx)
        .await
    }

    async fn get_amendment(
        &self,
        amendment_type: AmendmentType,
        id: Uuid,
    ) -> Result<Option<AmendmentRecord>, Error> {
        let record = match amendment_type {
            AmendmentType::ChangeRequest => {
                sqlx::query_as::<_, ChangeRequest>("SELECT * FROM change_requests WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?
                    .map(AmendmentRecord::ChangeRequest)
            }
            AmendmentType::ExtensionRequest => {
                sqlx::query_as::<_, ExtensionRequest>("SELECT * FROM extension_requests WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?
                    .map(AmendmentRecord::ExtensionRequest)
            }
            AmendmentType::PriceModification => {
                sqlx::query_as::<_, PriceModification>("SELECT * FROM price_modifications WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?
                    .map(AmendmentRecord::PriceModification)
            }
            AmendmentType::TaskClaim => {
                sqlx::query_as::<_, TaskClaim>("SELECT * FROM task_claims WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?
                    .map(AmendmentRecord::TaskClaim)
            }
        };

        Ok(record)
    }

    async fn amendment_contract_id(
        &self,
        amendment_type: AmendmentType,
        id: Uuid,
    ) -> Result<Option<Uuid>, Error> {
        let query = match amendment_type {
            AmendmentType::ChangeRequest => "SELECT contract_id FROM change_requests WHERE id = $1",
            AmendmentType::ExtensionRequest => "SELECT contract_id FROM extension_requests WHERE id = $1",
            AmendmentType::PriceModification => "SELECT contract_id FROM price_modifications WHERE id = $1",
            AmendmentType::TaskClaim => "SELECT contract_id FROM task_claims WHERE id = $1",
        };

        sqlx::query_scalar::<_, Uuid>(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn price_modification_contract_id(&self, payment_reference: &str) -> Result<Option<Uuid>, Error> {
        sqlx::query_scalar::<_, Uuid>("SELECT contract_id FROM price_modifications WHERE payment_reference = $1")
            .bind(payment_reference)
            .fetch_optional(&self.pool)
            .await
    }

    async fn list_contract_amendments(&self, contract_id: Uuid) -> Result<Vec<AmendmentRecord>, Error> {
        let change_requests = sqlx::query_as::<_, ChangeRequest>(
            "SELECT * FROM change_requests WHERE contract_id = $1",
        )
        .bind(contract_id)
        .fetch_all(&self.pool)
        .await?;

        let extension_requests = sqlx::query_as::<_, ExtensionRequest>(
            "SELECT * FROM extension_requests WHERE contract_id = $1",
        )
        .bind(contract_id)
        .fetch_all(&self.pool)
        .await?;

        let price_modifications = sqlx::query_as::<_, PriceModification>(
            "SELECT * FROM price_modifications WHERE contract_id = $1",
        )
        .bind(contract_id)
        .fetch_all(&self.pool)
        .await?;

        let task_claims = sqlx::query_as::<_, TaskClaim>(
            "SELECT * FROM task_claims WHERE contract_id = $1",
        )
        .bind(contract_id)
        .fetch_all(&self.pool)
        .await?;

        let mut records: Vec<AmendmentRecord> = change_requests
            .into_iter()
            .map(AmendmentRecord::ChangeRequest)
            .chain(extension_requests.into_iter().map(AmendmentRecord::ExtensionRequest))
            .chain(price_modifications.into_iter().map(AmendmentRecord::PriceModification))
            .chain(task_claims.into_iter().map(AmendmentRecord::TaskClaim))
            .collect();
        records.sort_by_key(|r| r.created_at());

        Ok(records)
    }
}
