// db/quotadb.rs
use async_trait::async_trait;
use sqlx::{types::BigDecimal, Error, Postgres, Transaction};
use uuid::Uuid;

use super::db::DBClient;
use crate::models::{
    ledgermodel::{LedgerEntry, NewLedgerEntry},
    usermodel::UserQuota,
};

#[async_trait]
pub trait QuotaExt {
    async fn get_user_quota(&self, user_id: Uuid) -> Result<Option<UserQuota>, Error>;

    /// Creates the row when missing so concurrent creations by the same user
    /// always serialize on it.
    async fn lock_user_quota(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
    ) -> Result<UserQuota, Error>;

    async fn save_user_quota(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        quota: &UserQuota,
    ) -> Result<UserQuota, Error>;

    async fn credit_user_balance(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
        amount: &BigDecimal,
    ) -> Result<BigDecimal, Error>;

    async fn insert_ledger_entry(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        entry: &NewLedgerEntry,
    ) -> Result<LedgerEntry, Error>;

    async fn get_contract_ledger(&self, contract_id: Uuid) -> Result<Vec<LedgerEntry>, Error>;
}

#[async_trait]
impl QuotaExt for DBClient {
    async fn get_user_quota(&self, user_id: Uuid) -> Result<Option<UserQuota>, Error> {
        sqlx::query_as::<_, UserQuota>("SELECT * FROM user_quotas WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn lock_user_quota(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
    ) -> Result<UserQuota, Error> {
        sqlx::query("INSERT INTO user_quotas (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(user_id)
            .execute(&mut **tx)
            .await?;

        sqlx::query_as::<_, UserQuota>("SELECT * FROM user_quotas WHERE user_id = $1 FOR UPDATE")
            .bind(user_id)
            .fetch_one(&mut **tx)
            .await
    }

    async fn save_user_quota(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        quota: &UserQuota,
    ) -> Result<UserQuota, Error> {
        sqlx::query_as::<_, UserQuota>(
            r#"
            UPDATE user_quotas
            SET initial_free_contracts = $2,
                monthly_free_contracts_used = $3,
                monthly_period_start = $4,
                updated_at = NOW()
            WHERE user_id = $1
            RETURNING *
            "#,
        )
        .bind(quota.user_id)
        .bind(quota.initial_free_contracts)
        .bind(quota.monthly_free_contracts_used)
        .bind(quota.monthly_period_start)
        .fetch_one(&mut **tx)
        .await
    }

    async fn credit_user_balance(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
        amount: &BigDecimal,
    ) -> Result<BigDecimal, Error> {
        sqlx::query_scalar::<_, BigDecimal>(
            r#"
            INSERT INTO user_balances (user_id, balance)
            VALUES ($1, $2)
            ON CONFLICT (user_id)
            DO UPDATE SET balance = user_balances.balance + EXCLUDED.balance, updated_at = NOW()
            RETURNING balance
            "#,
        )
        .bind(user_id)
        .bind(amount)
        .fetch_one(&mut **tx)
        .await
    }

    async fn insert_ledger_entry(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        entry: &NewLedgerEntry,
    ) -> Result<LedgerEntry, Error> {
        sqlx::query_as::<_, LedgerEntry>(
            r#"
            INSERT INTO contract_ledger_entries
            (contract_id, user_id, kind, amount, amendment_id, description)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(entry.contract_id)
        .bind(entry.user_id)
        .bind(entry.kind)
        .bind(&entry.amount)
        .bind(entry.amendment_id)
        .bind(&entry.description)
        .fetch_one(&mut **tx)
        .await
    }

    async fn get_contract_ledger(&self, contract_id: Uuid) -> Result<Vec<LedgerEntry>, Error> {
        sqlx::query_as::<_, LedgerEntry>(
            "SELECT * FROM contract_ledger_entries WHERE contract_id = $1 ORDER BY created_at ASC",
        )
        .bind(contract_id)
        .fetch_all(&self.pool)
        .await
    }
}
