// db/contractdb.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Error, Postgres, Transaction};
use uuid::Uuid;

use super::db::DBClient;
use crate::models::contractmodel::*;

#[async_trait]
pub trait ContractExt {
    async fn get_contract(&self, contract_id: Uuid) -> Result<Option<Contract>, Error>;

    /// Row-locks the contract for the rest of the transaction.
    async fn lock_contract(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        contract_id: Uuid,
    ) -> Result<Option<Contract>, Error>;

    async fn insert_contract(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        contract: &NewContract,
    ) -> Result<Contract, Error>;

    /// Writes every mutable column of a contract loaded with `lock_contract`.
    async fn save_contract(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        contract: &Contract,
    ) -> Result<Contract, Error>;

    /// Check-and-set of the pending amendment marker. Returns false when
    /// another amendment already holds it.
    async fn claim_amendment_slot(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        contract_id: Uuid,
        amendment_type: AmendmentType,
        amendment_id: Uuid,
    ) -> Result<bool, Error>;

    async fn insert_contract_tasks(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        contract_id: Uuid,
        titles: &[String],
    ) -> Result<Vec<ContractTask>, Error>;

    async fn get_contract_tasks(&self, contract_id: Uuid) -> Result<Vec<ContractTask>, Error>;

    async fn lock_contract_tasks(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        contract_id: Uuid,
    ) -> Result<Vec<ContractTask>, Error>;

    async fn reset_tasks_to_pending(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        contract_id: Uuid,
        task_ids: &[Uuid],
    ) -> Result<u64, Error>;

    async fn update_task_status(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        contract_id: Uuid,
        task_id: Uuid,
        status: TaskStatus,
    ) -> Result<Option<ContractTask>, Error>;

    async fn set_pairing_code(
        &self,
        contract_id: Uuid,
        code: &str,
        expires_at: DateTime<Utc>,
        issued_by: Uuid,
    ) -> Result<Contract, Error>;

    async fn clear_pairing_code(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        contract_id: Uuid,
    ) -> Result<Contract, Error>;

    async fn count_job_proposals(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        job_id: Uuid,
    ) -> Result<i64, Error>;

    /// Contracts holding a change request or extension request older than its cutoff.
    async fn contracts_with_overdue_amendments(
        &self,
        change_request_cutoff: DateTime<Utc>,
        extension_cutoff: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, Error>;
}

#[async_trait]
impl ContractExt for DBClient {
    async fn get_contract(&self, contract_id: Uuid) -> Result<Option<Contract>, Error> {
        sqlx::query_as::<_, Contract>("SELECT * FROM contracts WHERE id = $1")
            .bind(contract_id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn lock_contract(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        contract_id: Uuid,
    ) -> Result<Option<Contract>, Error> {
        sqlx::query_as::<_, Contract>("SELECT * FROM contracts WHERE id = $1 FOR UPDATE")
            .bind(contract_id)
            .fetch_optional(&mut **tx)
            .await
    }

    async fn insert_contract(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        contract: &NewContract,
    ) -> Result<Contract, Error> {
        sqlx::query_as::<_, Contract>(
            r#"
            INSERT INTO contracts
            (client_id, doer_id, job_id, price, commission, commission_waived, description,
             status, start_date, end_date, original_end_date,
             pairing_code, pairing_code_expires_at, pairing_code_issued_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', $8, $9, $9, $10, $11, $12)
            RETURNING *
            "#,
        )
        .bind(contract.client_id)
        .bind(contract.doer_id)
        .bind(contract.job_id)
        .bind(&contract.price)
        .bind(&contract.commission)
        .bind(contract.commission_waived)
        .bind(&contract.description)
        .bind(contract.start_date)
        .bind(contract.end_date)
        .bind(&contract.pairing_code)
        .bind(contract.pairing_code_expires_at)
        .bind(contract.pairing_code_issued_by)
        .fetch_one(&mut **tx)
        .await
    }

    async fn save_contract(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        contract: &Contract,
    ) -> Result<Contract, Error> {
        sqlx::query_as::<_, Contract>(
            r#"
            UPDATE contracts
            SET price = $2,
                commission = $3,
                description = $4,
                status = $5,
                start_date = $6,
                end_date = $7,
                has_been_extended = $8,
                has_pending_task_claim = $9,
                active_amendment_id = $10,
                active_amendment_type = $11,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(contract.id)
        .bind(&contract.price)
        .bind(&contract.commission)
        .bind(&contract.description)
        .bind(contract.status)
        .bind(contract.start_date)
        .bind(contract.end_date)
        .bind(contract.has_been_extended)
        .bind(contract.has_pending_task_claim)
        .bind(contract.active_amendment_id)
        .bind(contract.active_amendment_type)
        .fetch_one(&mut **tx)
        .await
    }

    async fn claim_amendment_slot(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        contract_id: Uuid,
        amendment_type: AmendmentType,
        amendment_id: Uuid,
    ) -> Result<bool, Error> {
        let result = sqlx::query(
            r#"
            UPDATE contracts
            SET active_amendment_id = $2,
                active_amendment_type = $3,
                has_pending_task_claim = ($3 = 'task_claim'::amendment_type),
                updated_at = NOW()
            WHERE id = $1 AND active_amendment_id IS NULL
            "#,
        )
        .bind(contract_id)
        .bind(amendment_id)
        .bind(amendment_type)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn insert_contract_tasks(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        contract_id: Uuid,
        titles: &[String],
    ) -> Result<Vec<ContractTask>, Error> {
        if titles.is_empty() {
            return Ok(Vec::new());
        }

        sqlx::query_as::<_, ContractTask>(
            r#"
            INSERT INTO contract_tasks (contract_id, title)
            SELECT $1, title FROM UNNEST($2::text[]) AS t(title)
            RETURNING *
            "#,
        )
        .bind(contract_id)
        .bind(titles)
        .fetch_all(&mut **tx)
        .await
    }

    async fn get_contract_tasks(&self, contract_id: Uuid) -> Result<Vec<ContractTask>, Error> {
        sqlx::query_as::<_, ContractTask>(
            "SELECT * FROM contract_tasks WHERE contract_id = $1 ORDER BY created_at ASC",
        )
        .bind(contract_id)
        .fetch_all(&self.pool)
        .await
    }

    async fn lock_contract_tasks(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        contract_id: Uuid,
    ) -> Result<Vec<ContractTask>, Error> {
        sqlx::query_as::<_, ContractTask>(
            "SELECT * FROM contract_tasks WHERE contract_id = $1 ORDER BY created_at ASC FOR UPDATE",
        )
        .bind(contract_id)
        .fetch_all(&mut **tx)
        .await
    }

    async fn reset_tasks_to_pending(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        contract_id: Uuid,
        task_ids: &[Uuid],
    ) -> Result<u64, Error> {
        let result = sqlx::query(
            r#"
            UPDATE contract_tasks
            SET status = 'pending', updated_at = NOW()
            WHERE contract_id = $1 AND id = ANY($2)
            "#,
        )
        .bind(contract_id)
        .bind(task_ids)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected())
    }

    async fn update_task_status(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        contract_id: Uuid,
        task_id: Uuid,
        status: TaskStatus,
    ) -> Result<Option<ContractTask>, Error> {
        sqlx::query_as::<_, ContractTask>(
            r#"
            UPDATE contract_tasks
            SET status = $3, updated_at = NOW()
            WHERE contract_id = $1 AND id = $2
            RETURNING *
            "#,
        )
        .bind(contract_id)
        .bind(task_id)
        .bind(status)
        .fetch_optional(&mut **tx)
        .await
    }

    async fn set_pairing_code(
        &self,
        contract_id: Uuid,
        code: &str,
        expires_at: DateTime<Utc>,
        issued_by: Uuid,
    ) -> Result<Contract, Error> {
        sqlx::query_as::<_, Contract>(
            r#"
            UPDATE contracts
            SET pairing_code = $2, pairing_code_expires_at = $3, pairing_code_issued_by = $4, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(contract_id)
        .bind(code)
        .bind(expires_at)
        .bind(issued_by)
        .fetch_one(&self.pool)
        .await
    }

    async fn clear_pairing_code(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        contract_id: Uuid,
    ) -> Result<Contract, Error> {
        sqlx::query_as::<_, Contract>(
            r#"
            UPDATE contracts
            SET pairing_code = NULL, pairing_code_expires_at = NULL, pairing_code_issued_by = NULL, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(contract_id)
        .fetch_one(&mut **tx)
        .await
    }

    async fn count_job_proposals(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        job_id: Uuid,
    ) -> Result<i64, Error> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM proposals WHERE job_id = $1")
            .bind(job_id)
            .fetch_one(&mut **tx)
            .await
    }

    async fn contracts_with_overdue_amendments(
        &self,
        change_request_cutoff: DateTime<Utc>,
        extension_cutoff: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, Error> {
        sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT DISTINCT contract_id FROM (
                SELECT contract_id FROM change_requests
                WHERE status = 'pending' AND created_at < $1
                UNION
                SELECT contract_id FROM extension_requests
                WHERE status = 'pending' AND created_at < $2
            ) overdue
            "#,
        )
        .bind(change_request_cutoff)
        .bind(extension_cutoff)
        .fetch_all(&self.pool)
        .await
    }
}
