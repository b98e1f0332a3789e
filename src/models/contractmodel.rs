// models/contractmodel.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::BigDecimal;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "contract_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    Pending,
    Active,
    Completed,
    Cancelled,
    Disputed,
}

impl ContractStatus {
    pub fn to_str(&self) -> &str {
        match self {
            ContractStatus::Pending => "pending",
            ContractStatus::Active => "active",
            ContractStatus::Completed => "completed",
            ContractStatus::Cancelled => "cancelled",
            ContractStatus::Disputed => "disputed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ContractStatus::Completed | ContractStatus::Cancelled)
    }

    /// Only pending and active agreements can be renegotiated.
    pub fn accepts_amendments(&self) -> bool {
        matches!(self, ContractStatus::Pending | ContractStatus::Active)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "amendment_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AmendmentType {
    ChangeRequest,
    ExtensionRequest,
    PriceModification,
    TaskClaim,
}

impl AmendmentType {
    pub const ALL: [AmendmentType; 4] = [
        AmendmentType::ChangeRequest,
        AmendmentType::ExtensionRequest,
        AmendmentType::PriceModification,
        AmendmentType::TaskClaim,
    ];

    pub fn to_str(&self) -> &str {
        match self {
            AmendmentType::ChangeRequest => "change_request",
            AmendmentType::ExtensionRequest => "extension_request",
            AmendmentType::PriceModification => "price_modification",
            AmendmentType::TaskClaim => "task_claim",
        }
    }

    pub fn label(&self) -> &str {
        match self {
            AmendmentType::ChangeRequest => "change request",
            AmendmentType::ExtensionRequest => "extension request",
            AmendmentType::PriceModification => "price modification",
            AmendmentType::TaskClaim => "task claim",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContractRole {
    Client,
    Doer,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Contract {
    pub id: Uuid,
    pub client_id: Uuid,
    pub doer_id: Uuid,
    pub job_id: Uuid,
    pub price: BigDecimal,
    pub commission: BigDecimal,
    pub commission_waived: bool,
    pub description: Option<String>,
    pub status: ContractStatus,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub original_end_date: DateTime<Utc>,
    pub has_been_extended: bool,
    pub has_pending_task_claim: bool,
    pub active_amendment_id: Option<Uuid>,
    pub active_amendment_type: Option<AmendmentType>,
    #[serde(skip_serializing)]
    pub pairing_code: Option<String>,
    #[serde(skip_serializing)]
    pub pairing_code_expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing)]
    pub pairing_code_issued_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contract {
    pub fn role_of(&self, user_id: Uuid) -> Option<ContractRole> {
        if user_id == self.client_id {
            Some(ContractRole::Client)
        } else if user_id == self.doer_id {
            Some(ContractRole::Doer)
        } else {
            None
        }
    }

    pub fn is_party(&self, user_id: Uuid) -> bool {
        self.role_of(user_id).is_some()
    }

    pub fn counterparty_of(&self, user_id: Uuid) -> Option<Uuid> {
        match self.role_of(user_id)? {
            ContractRole::Client => Some(self.doer_id),
            ContractRole::Doer => Some(self.client_id),
        }
    }

    /// The denormalized "one pending amendment" marker.
    pub fn pending_amendment(&self) -> Option<(AmendmentType, Uuid)> {
        match (self.active_amendment_type, self.active_amendment_id) {
            (Some(kind), Some(id)) => Some((kind, id)),
            _ => None,
        }
    }

    pub fn cache_key(contract_id: Uuid) -> String {
        format!("contract:{}", contract_id)
    }

    pub fn history_cache_key(contract_id: Uuid) -> String {
        format!("contract_amendments:{}", contract_id)
    }
}

/// Values the proposal-approval collaborator hands over when a contract is born.
#[derive(Debug, Clone)]
pub struct NewContract {
    pub client_id: Uuid,
    pub doer_id: Uuid,
    pub job_id: Uuid,
    pub price: BigDecimal,
    pub commission: BigDecimal,
    pub commission_waived: bool,
    pub description: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub pairing_code: String,
    pub pairing_code_expires_at: DateTime<Utc>,
    pub pairing_code_issued_by: Uuid,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "task_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ContractTask {
    pub id: Uuid,
    pub contract_id: Uuid,
    pub title: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::TimeZone;

    pub fn contract() -> Contract {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 10, 18, 0, 0).unwrap();
        Contract {
            id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            doer_id: Uuid::new_v4(),
            job_id: Uuid::new_v4(),
            price: BigDecimal::from(20_000),
            commission: BigDecimal::from(1_600),
            commission_waived: false,
            description: Some("Paint two bedrooms".to_string()),
            status: ContractStatus::Active,
            start_date: start,
            end_date: end,
            original_end_date: end,
            has_been_extended: false,
            has_pending_task_claim: false,
            active_amendment_id: None,
            active_amendment_type: None,
            pairing_code: None,
            pairing_code_expires_at: None,
            pairing_code_issued_by: None,
            created_at: start,
            updated_at: start,
        }
    }

    pub fn task(contract_id: Uuid, status: TaskStatus) -> ContractTask {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        ContractTask {
            id: Uuid::new_v4(),
            contract_id,
            title: "Prime walls".to_string(),
            status,
            created_at: at,
            updated_at: at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counterparty_is_the_other_side() {
        let contract = fixtures::contract();
        assert_eq!(contract.counterparty_of(contract.client_id), Some(contract.doer_id));
        assert_eq!(contract.counterparty_of(contract.doer_id), Some(contract.client_id));
        assert_eq!(contract.counterparty_of(Uuid::new_v4()), None);
    }

    #[test]
    fn terminal_statuses() {
        assert!(ContractStatus::Completed.is_terminal());
        assert!(ContractStatus::Cancelled.is_terminal());
        assert!(!ContractStatus::Disputed.is_terminal());
        assert!(!ContractStatus::Disputed.accepts_amendments());
        assert!(ContractStatus::Pending.accepts_amendments());
    }

    #[test]
    fn pending_marker_requires_both_columns() {
        let mut contract = fixtures::contract();
        assert!(contract.pending_amendment().is_none());
        contract.active_amendment_type = Some(AmendmentType::TaskClaim);
        assert!(contract.pending_amendment().is_none());
        let id = Uuid::new_v4();
        contract.active_amendment_id = Some(id);
        assert_eq!(contract.pending_amendment(), Some((AmendmentType::TaskClaim, id)));
    }
}
