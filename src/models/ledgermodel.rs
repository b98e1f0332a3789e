use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::BigDecimal;
use uuid::Uuid;

#[derive(Debug, Deserialize, Serialize, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "ledger_entry_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryKind {
    Commission,
    CommissionAdjustment,
    ExtensionPayment,
    PriceDifferenceCharge,
    PriceDifferenceCredit,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub contract_id: Uuid,
    pub user_id: Uuid,
    pub kind: LedgerEntryKind,
    pub amount: BigDecimal,
    pub amendment_id: Option<Uuid>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// A ledger row queued by the engine, written in the same transaction as the contract change.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLedgerEntry {
    pub contract_id: Uuid,
    pub user_id: Uuid,
    pub kind: LedgerEntryKind,
    pub amount: BigDecimal,
    pub amendment_id: Option<Uuid>,
    pub description: String,
}
