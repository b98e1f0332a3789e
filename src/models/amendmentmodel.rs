// models/amendmentmodel.rs
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::BigDecimal;
use uuid::Uuid;

use crate::models::contractmodel::{AmendmentType, Contract};

/// Age after which an unanswered change request is escalated to support.
pub const CHANGE_REQUEST_EXPIRY_HOURS: i64 = 48;
/// Age after which an unanswered extension request lapses.
pub const EXTENSION_REQUEST_EXPIRY_HOURS: i64 = 48;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "change_request_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ChangeRequestType {
    Cancel,
    Modify,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "change_request_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ChangeRequestStatus {
    Pending,
    Accepted,
    Rejected,
    EscalatedToSupport,
    Withdrawn,
}

/// Terms a `modify` change request proposes. Absent fields stay as they are.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NewTerms {
    pub price: Option<BigDecimal>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub description: Option<String>,
}

impl NewTerms {
    pub fn is_empty(&self) -> bool {
        self.price.is_none()
            && self.start_date.is_none()
            && self.end_date.is_none()
            && self.description.as_deref().map_or(true, |d| d.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ChangeRequest {
    pub id: Uuid,
    pub contract_id: Uuid,
    pub requester_id: Uuid,
    pub request_type: ChangeRequestType,
    pub reason: String,
    pub status: ChangeRequestStatus,
    pub new_price: Option<BigDecimal>,
    pub new_start_date: Option<DateTime<Utc>>,
    pub new_end_date: Option<DateTime<Utc>>,
    pub new_description: Option<String>,
    pub response_reason: Option<String>,
    pub responded_by: Option<Uuid>,
    pub responded_at: Option<DateTime<Utc>>,
    pub escalated_at: Option<DateTime<Utc>>,
    pub support_ticket_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChangeRequest {
    pub fn new_terms(&self) -> NewTerms {
        NewTerms {
            price: self.new_price.clone(),
            start_date: self.new_start_date,
            end_date: self.new_end_date,
            description: self.new_description.clone(),
        }
    }

    /// Age-based expiry, recomputed on every read.
    pub fn is_expired_at(&self, now: DateTime<Utc>, window: Duration) -> bool {
        now.signed_duration_since(self.created_at) > window
    }

    /// Still waiting on the counterparty and already past the response window.
    pub fn requires_urgent_attention_at(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.status == ChangeRequestStatus::Pending && self.is_expired_at(now, window)
    }

    /// Human readable diff between the contract's current terms and the requested ones.
    pub fn changes_summary(&self, contract: &Contract) -> String {
        let mut lines = Vec::new();
        match self.request_type {
            ChangeRequestType::Cancel => {
                lines.push("Cancellation of the contract requested".to_string());
            }
            ChangeRequestType::Modify => {
                if let Some(price) = &self.new_price {
                    lines.push(format!("Price: {} → {} ARS", contract.price, price));
                }
                if let Some(start) = self.new_start_date {
                    lines.push(format!(
                        "Start date: {} → {}",
                        contract.start_date.format("%Y-%m-%d"),
                        start.format("%Y-%m-%d")
                    ));
                }
                if let Some(end) = self.new_end_date {
                    lines.push(format!(
                        "End date: {} → {}",
                        contract.end_date.format("%Y-%m-%d"),
                        end.format("%Y-%m-%d")
                    ));
                }
                if let Some(description) = &self.new_description {
                    lines.push(format!("Description: {}", description));
                }
            }
        }
        lines.push(format!("Reason: {}", self.reason));
        lines.join("\n")
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "extension_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ExtensionStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
    Withdrawn,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ExtensionRequest {
    pub id: Uuid,
    pub contract_id: Uuid,
    pub requester_id: Uuid,
    pub extension_days: i32,
    pub extension_amount: BigDecimal,
    pub extension_notes: Option<String>,
    pub status: ExtensionStatus,
    pub approved_by: Option<Uuid>,
    pub responded_at: Option<DateTime<Utc>>,
    pub response_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExtensionRequest {
    pub fn is_expired_at(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.status == ExtensionStatus::Pending
            && now.signed_duration_since(self.created_at) > window
    }

    pub fn summary(&self) -> String {
        format!(
            "Extend by {} day(s), additional payment {} ARS",
            self.extension_days, self.extension_amount
        )
    }
}

/// Extensions always count from the original end date, never the current one.
pub fn extended_end_date(original_end_date: DateTime<Utc>, extension_days: i32) -> DateTime<Utc> {
    original_end_date + Duration::days(i64::from(extension_days))
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "price_modification_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PriceModificationStatus {
    Applied,
    PaymentRequired,
    Rejected,
    Withdrawn,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PriceModification {
    pub id: Uuid,
    pub contract_id: Uuid,
    pub requester_id: Uuid,
    pub previous_price: BigDecimal,
    pub new_price: BigDecimal,
    pub price_difference: BigDecimal,
    pub commission_delta: BigDecimal,
    pub reason: Option<String>,
    pub status: PriceModificationStatus,
    pub payment_reference: Option<String>,
    pub payment_url: Option<String>,
    pub responded_by: Option<Uuid>,
    pub applied_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PriceModification {
    pub fn summary(&self) -> String {
        format!("Price: {} → {} ARS", self.previous_price, self.new_price)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "task_claim_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskClaimStatus {
    Pending,
    Accepted,
    Rejected,
    Withdrawn,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TaskClaim {
    pub id: Uuid,
    pub contract_id: Uuid,
    pub requester_id: Uuid,
    pub claimed_task_ids: Vec<Uuid>,
    pub new_end_date: DateTime<Utc>,
    pub reason: Option<String>,
    pub status: TaskClaimStatus,
    pub response_reason: Option<String>,
    pub responded_by: Option<Uuid>,
    pub responded_at: Option<DateTime<Utc>>,
    pub dispute_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskClaim {
    pub fn summary(&self) -> String {
        format!(
            "{} task(s) claimed as unfinished, new end date {}",
            self.claimed_task_ids.len(),
            self.new_end_date.format("%Y-%m-%d")
        )
    }
}

/// Any of the four amendment records, as returned by the contract history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "amendment_type", content = "record", rename_all = "snake_case")]
pub enum AmendmentRecord {
    ChangeRequest(ChangeRequest),
    ExtensionRequest(ExtensionRequest),
    PriceModification(PriceModification),
    TaskClaim(TaskClaim),
}

impl AmendmentRecord {
    pub fn amendment_type(&self) -> AmendmentType {
        match self {
            AmendmentRecord::ChangeRequest(_) => AmendmentType::ChangeRequest,
            AmendmentRecord::ExtensionRequest(_) => AmendmentType::ExtensionRequest,
            AmendmentRecord::PriceModification(_) => AmendmentType::PriceModification,
            AmendmentRecord::TaskClaim(_) => AmendmentType::TaskClaim,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            AmendmentRecord::ChangeRequest(r) => r.id,
            AmendmentRecord::ExtensionRequest(r) => r.id,
            AmendmentRecord::PriceModification(r) => r.id,
            AmendmentRecord::TaskClaim(r) => r.id,
        }
    }

    pub fn contract_id(&self) -> Uuid {
        match self {
            AmendmentRecord::ChangeRequest(r) => r.contract_id,
            AmendmentRecord::ExtensionRequest(r) => r.contract_id,
            AmendmentRecord::PriceModification(r) => r.contract_id,
            AmendmentRecord::TaskClaim(r) => r.contract_id,
        }
    }

    pub fn requester_id(&self) -> Uuid {
        match self {
            AmendmentRecord::ChangeRequest(r) => r.requester_id,
            AmendmentRecord::ExtensionRequest(r) => r.requester_id,
            AmendmentRecord::PriceModification(r) => r.requester_id,
            AmendmentRecord::TaskClaim(r) => r.requester_id,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            AmendmentRecord::ChangeRequest(r) => r.created_at,
            AmendmentRecord::ExtensionRequest(r) => r.created_at,
            AmendmentRecord::PriceModification(r) => r.created_at,
            AmendmentRecord::TaskClaim(r) => r.created_at,
        }
    }

    pub fn status_str(&self) -> String {
        let value = match self {
            AmendmentRecord::ChangeRequest(r) => serde_json::to_value(r.status),
            AmendmentRecord::ExtensionRequest(r) => serde_json::to_value(r.status),
            AmendmentRecord::PriceModification(r) => serde_json::to_value(r.status),
            AmendmentRecord::TaskClaim(r) => serde_json::to_value(r.status),
        };
        value
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default()
    }

    pub fn summary(&self, contract: &Contract) -> String {
        match self {
            AmendmentRecord::ChangeRequest(r) => r.changes_summary(contract),
            AmendmentRecord::ExtensionRequest(r) => r.summary(),
            AmendmentRecord::PriceModification(r) => r.summary(),
            AmendmentRecord::TaskClaim(r) => r.summary(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmendmentHistoryEntry {
    pub amendment_type: AmendmentType,
    pub amendment_id: Uuid,
    pub requester_id: Uuid,
    pub status: String,
    pub summary: String,
    pub created_at: DateTime<Utc>,
    pub details: AmendmentRecord,
}

impl AmendmentHistoryEntry {
    pub fn from_record(record: AmendmentRecord, contract: &Contract) -> Self {
        Self {
            amendment_type: record.amendment_type(),
            amendment_id: record.id(),
            requester_id: record.requester_id(),
            status: record.status_str(),
            summary: record.summary(contract),
            created_at: record.created_at(),
            details: record,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::contractmodel::fixtures;
    use chrono::TimeZone;

    #[test]
    fn change_request_expires_after_two_days() {
        let contract = fixtures::contract();
        let created = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let request = super::fixtures::change_request(&contract, created);
        let window = Duration::hours(CHANGE_REQUEST_EXPIRY_HOURS);

        let before = created + Duration::hours(47);
        assert!(!request.is_expired_at(before, window));
        assert!(!request.requires_urgent_attention_at(before, window));

        let after = created + Duration::hours(49);
        assert!(request.is_expired_at(after, window));
        assert!(request.requires_urgent_attention_at(after, window));
    }

    #[test]
    fn answered_change_request_is_never_urgent() {
        let contract = fixtures::contract();
        let created = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let mut request = super::fixtures::change_request(&contract, created);
        request.status = ChangeRequestStatus::Rejected;
        let window = Duration::hours(CHANGE_REQUEST_EXPIRY_HOURS);
        let later = created + Duration::days(5);
        assert!(request.is_expired_at(later, window));
        assert!(!request.requires_urgent_attention_at(later, window));
    }

    #[test]
    fn extension_counts_from_original_end_date() {
        let original = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 1, 17, 0, 0, 0).unwrap();
        assert_eq!(extended_end_date(original, 7), expected);
    }

    #[test]
    fn empty_terms_detection() {
        assert!(NewTerms::default().is_empty());
        let blank_description = NewTerms {
            description: Some("   ".to_string()),
            ..NewTerms::default()
        };
        assert!(blank_description.is_empty());
        let priced = NewTerms {
            price: Some(BigDecimal::from(0)),
            ..NewTerms::default()
        };
        assert!(!priced.is_empty());
    }

    #[test]
    fn changes_summary_lists_requested_terms() {
        let contract = fixtures::contract();
        let mut request = super::fixtures::change_request(&contract, contract.created_at);
        request.new_end_date = Some(Utc.with_ymd_and_hms(2024, 1, 20, 0, 0, 0).unwrap());
        let summary = request.changes_summary(&contract);
        assert!(summary.contains("Price: 20000 → 25000 ARS"));
        assert!(summary.contains("End date: 2024-01-10 → 2024-01-20"));
        assert!(summary.contains("Reason: Client needs the job finished earlier"));
    }

    #[test]
    fn history_entry_reports_snake_case_status() {
        let contract = fixtures::contract();
        let mut request = super::fixtures::change_request(&contract, contract.created_at);
        request.status = ChangeRequestStatus::EscalatedToSupport;
        let entry = AmendmentHistoryEntry::from_record(AmendmentRecord::ChangeRequest(request), &contract);
        assert_eq!(entry.status, "escalated_to_support");
        assert_eq!(entry.amendment_type, AmendmentType::ChangeRequest);
    }
}
