// models/disputemodel.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::BigDecimal;
use uuid::Uuid;

use crate::models::contractmodel::AmendmentType;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "dispute_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DisputeStatus {
    Open,
    InReview,
    AwaitingInfo,
    ResolvedReleased,
    ResolvedRefunded,
    ResolvedPartial,
}

impl DisputeStatus {
    pub fn is_resolved(&self) -> bool {
        matches!(
            self,
            DisputeStatus::ResolvedReleased
                | DisputeStatus::ResolvedRefunded
                | DisputeStatus::ResolvedPartial
        )
    }

    /// Review transitions an admin may make before resolving.
    pub fn can_move_to(&self, to: DisputeStatus) -> bool {
        matches!(
            (self, to),
            (DisputeStatus::Open, DisputeStatus::InReview)
                | (DisputeStatus::Open, DisputeStatus::AwaitingInfo)
                | (DisputeStatus::InReview, DisputeStatus::AwaitingInfo)
                | (DisputeStatus::AwaitingInfo, DisputeStatus::InReview)
        )
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq, PartialOrd, Ord)]
#[sqlx(type_name = "dispute_priority", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DisputePriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl DisputePriority {
    pub fn weight(&self) -> i32 {
        match self {
            DisputePriority::Low => 1,
            DisputePriority::Medium => 2,
            DisputePriority::High => 3,
            DisputePriority::Urgent => 4,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "dispute_category", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DisputeCategory {
    TaskClaim,
    ContractChange,
    Payment,
    Quality,
    Other,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DisputeResolutionType {
    Released,
    Refunded,
    Partial,
}

impl DisputeResolutionType {
    pub fn to_str(&self) -> &str {
        match self {
            DisputeResolutionType::Released => "released",
            DisputeResolutionType::Refunded => "refunded",
            DisputeResolutionType::Partial => "partial",
        }
    }

    pub fn status(&self) -> DisputeStatus {
        match self {
            DisputeResolutionType::Released => DisputeStatus::ResolvedReleased,
            DisputeResolutionType::Refunded => DisputeStatus::ResolvedRefunded,
            DisputeResolutionType::Partial => DisputeStatus::ResolvedPartial,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Dispute {
    pub id: Uuid,
    pub contract_id: Uuid,
    pub initiator_id: Uuid,
    pub respondent_id: Uuid,
    pub reason: String,
    pub category: DisputeCategory,
    pub priority: DisputePriority,
    pub importance_level: i32,
    pub status: DisputeStatus,
    pub source_amendment_type: Option<AmendmentType>,
    pub source_amendment_id: Option<Uuid>,
    pub support_ticket_id: Option<Uuid>,
    pub resolution_type: Option<String>,
    pub resolution_amount: Option<BigDecimal>,
    pub resolution_notes: Option<String>,
    pub resolved_by: Option<Uuid>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A dispute about to be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewDispute {
    pub contract_id: Uuid,
    pub initiator_id: Uuid,
    pub respondent_id: Uuid,
    pub reason: String,
    pub category: DisputeCategory,
    pub priority: DisputePriority,
    pub importance_level: i32,
    pub source_amendment_type: Option<AmendmentType>,
    pub source_amendment_id: Option<Uuid>,
    pub support_ticket_id: Option<Uuid>,
}

/// Contracts at or above this price get one extra importance level.
pub const HIGH_VALUE_CONTRACT_PRICE: i64 = 100_000;

pub fn importance_level(priority: DisputePriority, contract_price: &BigDecimal) -> i32 {
    let mut level = priority.weight();
    if *contract_price >= BigDecimal::from(HIGH_VALUE_CONTRACT_PRICE) {
        level += 1;
    }
    level.min(5)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn importance_grows_with_priority_and_value() {
        assert_eq!(importance_level(DisputePriority::Low, &BigDecimal::from(10_000)), 1);
        assert_eq!(importance_level(DisputePriority::High, &BigDecimal::from(150_000)), 4);
        assert_eq!(importance_level(DisputePriority::Urgent, &BigDecimal::from(100_000)), 5);
    }

    #[test]
    fn review_transitions() {
        assert!(DisputeStatus::Open.can_move_to(DisputeStatus::InReview));
        assert!(DisputeStatus::AwaitingInfo.can_move_to(DisputeStatus::InReview));
        assert!(!DisputeStatus::ResolvedRefunded.can_move_to(DisputeStatus::InReview));
        assert!(!DisputeStatus::InReview.can_move_to(DisputeStatus::Open));
        assert!(DisputeResolutionType::Partial.status().is_resolved());
    }
}
