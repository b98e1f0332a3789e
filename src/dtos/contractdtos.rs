use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::BigDecimal;
use uuid::Uuid;
use validator::Validate;

use crate::{
    models::{
        amendmentmodel::{ChangeRequestType, NewTerms},
        contractmodel::TaskStatus,
        disputemodel::{DisputeCategory, DisputePriority, DisputeResolutionType, DisputeStatus},
    },
    service::{
        amendment_service::AmendmentPayload, contract_service::CreateContractInput, error::ServiceError,
    },
    utils::decimal::money_from_f64,
};

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub status: String,
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(message: &str, data: T) -> Self {
        Self {
            status: "success".to_string(),
            message: message.to_string(),
            data: Some(data),
        }
    }
}

fn money(value: f64) -> Result<BigDecimal, ServiceError> {
    money_from_f64(value).map_err(ServiceError::Validation)
}

fn optional_money(value: Option<f64>) -> Result<Option<BigDecimal>, ServiceError> {
    value.map(money).transpose()
}

// Contract DTOs
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateContractDto {
    pub job_id: Uuid,
    pub client_id: Uuid,
    pub doer_id: Uuid,

    #[validate(range(min = 0.0, message = "Price must be positive"))]
    pub price: f64,

    #[validate(length(max = 2000, message = "Description cannot exceed 2000 characters"))]
    pub description: Option<String>,

    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,

    #[serde(default)]
    #[validate(length(max = 100, message = "A contract holds at most 100 tasks"))]
    pub tasks: Vec<String>,
}

impl CreateContractDto {
    pub fn into_input(self) -> Result<CreateContractInput, ServiceError> {
        let tasks = self
            .tasks
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();

        Ok(CreateContractInput {
            job_id: self.job_id,
            client_id: self.client_id,
            doer_id: self.doer_id,
            price: money(self.price)?,
            description: self.description,
            start_date: self.start_date,
            end_date: self.end_date,
            tasks,
        })
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct ConfirmPairingDto {
    #[validate(length(equal = 6, message = "Pairing code must be 6 digits"))]
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTaskStatusDto {
    pub status: TaskStatus,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CommissionQuoteQuery {
    #[validate(range(min = 0.0, message = "Price must be positive"))]
    pub price: f64,
}

// Amendment DTOs
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct NewTermsDto {
    pub price: Option<f64>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub description: Option<String>,
}

impl NewTermsDto {
    fn into_terms(self) -> Result<NewTerms, ServiceError> {
        Ok(NewTerms {
            price: optional_money(self.price)?,
            start_date: self.start_date,
            end_date: self.end_date,
            description: self.description,
        })
    }
}

/// Body of `POST /contracts/:id/amendments`, tagged by amendment type.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubmitAmendmentDto {
    ChangeRequest {
        request_type: ChangeRequestType,
        reason: String,
        #[serde(default)]
        new_terms: Option<NewTermsDto>,
    },
    ExtensionRequest {
        extension_days: i32,
        #[serde(default)]
        extension_amount: Option<f64>,
        #[serde(default)]
        extension_notes: Option<String>,
    },
    PriceModification {
        new_price: f64,
        #[serde(default)]
        reason: Option<String>,
    },
    TaskClaim {
        claimed_task_ids: Vec<Uuid>,
        new_end_date: DateTime<Utc>,
        #[serde(default)]
        reason: Option<String>,
    },
}

impl SubmitAmendmentDto {
    pub fn into_payload(self) -> Result<AmendmentPayload, ServiceError> {
        let payload = match self {
            SubmitAmendmentDto::ChangeRequest {
                request_type,
                reason,
                new_terms,
            } => AmendmentPayload::ChangeRequest {
                request_type,
                reason,
                terms: new_terms.unwrap_or_default().into_terms()?,
            },
            SubmitAmendmentDto::ExtensionRequest {
                extension_days,
                extension_amount,
                extension_notes,
            } => AmendmentPayload::ExtensionRequest {
                extension_days,
                extension_amount: optional_money(extension_amount)?.unwrap_or_else(|| BigDecimal::from(0)),
                extension_notes,
            },
            SubmitAmendmentDto::PriceModification { new_price, reason } => AmendmentPayload::PriceModification {
                new_price: money(new_price)?,
                reason,
            },
            SubmitAmendmentDto::TaskClaim {
                claimed_task_ids,
                new_end_date,
                reason,
            } => AmendmentPayload::TaskClaim {
                claimed_task_ids,
                new_end_date,
                reason,
            },
        };
        Ok(payload)
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct RespondAmendmentDto {
    pub accept: bool,

    #[validate(length(max = 1000, message = "Reason cannot exceed 1000 characters"))]
    pub reason: Option<String>,
}

// Dispute DTOs
#[derive(Debug, Deserialize, Validate)]
pub struct OpenDisputeDto {
    #[validate(length(min = 1, max = 1000, message = "Reason must be between 1 and 1000 characters"))]
    pub reason: String,

    pub category: DisputeCategory,

    #[serde(default = "default_priority")]
    pub priority: DisputePriority,
}

fn default_priority() -> DisputePriority {
    DisputePriority::Medium
}

#[derive(Debug, Deserialize)]
pub struct UpdateDisputeStatusDto {
    pub status: DisputeStatus,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ResolveDisputeDto {
    pub resolution_type: DisputeResolutionType,

    #[validate(range(min = 0.0, message = "Resolution amount must be positive"))]
    pub resolution_amount: Option<f64>,

    #[validate(length(max = 2000, message = "Notes cannot exceed 2000 characters"))]
    pub resolution_notes: Option<String>,
}

impl ResolveDisputeDto {
    pub fn amount(&self) -> Result<Option<BigDecimal>, ServiceError> {
        optional_money(self.resolution_amount)
    }
}

// Listing queries
#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl PageQuery {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(50).clamp(1, 200)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

// Payment webhook
#[derive(Debug, Deserialize)]
pub struct PaymentWebhookEvent {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct PaymentWebhookData {
    pub reference: String,
    /// Minor units, as the provider reports them.
    pub amount: i64,
}

impl PaymentWebhookData {
    pub fn amount_paid(&self) -> BigDecimal {
        BigDecimal::new(self.amount.into(), 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn amendment_body_is_tagged_by_type() {
        let dto: SubmitAmendmentDto = serde_json::from_value(json!({
            "type": "extension_request",
            "extension_days": 7,
            "extension_notes": "rain delays"
        }))
        .unwrap();

        match dto.into_payload().unwrap() {
            AmendmentPayload::ExtensionRequest {
                extension_days,
                extension_amount,
                extension_notes,
            } => {
                assert_eq!(extension_days, 7);
                assert_eq!(extension_amount, BigDecimal::from(0));
                assert_eq!(extension_notes.as_deref(), Some("rain delays"));
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn change_request_without_terms_is_a_cancellation_shape() {
        let dto: SubmitAmendmentDto = serde_json::from_value(json!({
            "type": "change_request",
            "request_type": "cancel",
            "reason": "Client moved abroad"
        }))
        .unwrap();

        match dto.into_payload().unwrap() {
            AmendmentPayload::ChangeRequest { request_type, terms, .. } => {
                assert_eq!(request_type, ChangeRequestType::Cancel);
                assert!(terms.is_empty());
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn prices_are_rounded_to_cents() {
        let dto: SubmitAmendmentDto = serde_json::from_value(json!({
            "type": "price_modification",
            "new_price": 24999.999
        }))
        .unwrap();

        match dto.into_payload().unwrap() {
            AmendmentPayload::PriceModification { new_price, .. } => {
                assert_eq!(new_price, BigDecimal::from(25_000));
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn unknown_amendment_types_are_rejected() {
        let parsed = serde_json::from_value::<SubmitAmendmentDto>(json!({ "type": "refund" }));
        assert!(parsed.is_err());
    }

    #[test]
    fn webhook_amounts_are_minor_units() {
        let data = PaymentWebhookData {
            reference: "pm_ref".to_string(),
            amount: 500_050,
        };
        assert_eq!(data.amount_paid(), "5000.50".parse::<BigDecimal>().unwrap());
    }
}
