use thiserror::Error;
use uuid::Uuid;
use crate::{
    models::contractmodel::{AmendmentType, ContractStatus},
    error::HttpError,
};
use axum::http::StatusCode;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Contract {0} not found")]
    ContractNotFound(Uuid),

    #[error("No {} with id {1}", .0.label())]
    AmendmentNotFound(AmendmentType, Uuid),

    #[error("Dispute {0} not found")]
    DisputeNotFound(Uuid),

    #[error("Task {0} does not belong to this contract")]
    TaskNotFound(Uuid),

    #[error("Contract {0} has already been extended once")]
    AlreadyExtended(Uuid),

    #[error("Contract {contract_id} already has a pending {}", .pending.label())]
    AmendmentAlreadyPending { contract_id: Uuid, pending: AmendmentType },

    #[error("Invalid date ordering: {0}")]
    InvalidDateOrdering(String),

    #[error("User {0} is not the counterparty of this {}", .1.label())]
    NotCounterparty(Uuid, AmendmentType),

    #[error("User {0} is not a party to contract {1}")]
    NotContractParty(Uuid, Uuid),

    #[error("Only the {0} may perform this action")]
    WrongParty(String),

    #[error("Contract {0} is {} and can no longer change", .1.to_str())]
    TerminalContract(Uuid, ContractStatus),

    #[error("Contract {0} is {} and does not accept this operation", .1.to_str())]
    InvalidContractStatus(Uuid, ContractStatus),

    #[error("Contract {contract_id} cannot move from {} to {}", .from.to_str(), .to.to_str())]
    InvalidStatusTransition { contract_id: Uuid, from: ContractStatus, to: ContractStatus },

    #[error("This {} is no longer pending", .0.label())]
    AmendmentNotPending(AmendmentType, Uuid),

    #[error("Job {0} already has proposals; its price can no longer change")]
    ProposalsAlreadyReceived(Uuid),

    #[error("Invalid dispute transition: {0}")]
    InvalidDisputeTransition(String),

    #[error("Payment confirmation does not match: {0}")]
    PaymentMismatch(String),

    #[error("Payment provider error: {0}")]
    Payment(String),

    #[error("Integrity violation: {0}")]
    Integrity(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Other error: {0}")]
    Other(String),
}

impl From<ServiceError> for HttpError {
    fn from(error: ServiceError) -> Self {
        let status = error.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("service failure: {}", error);
        }
        HttpError::new(error.to_string(), status)
    }
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::Validation(err.to_string())
    }
}

impl From<String> for ServiceError {
    fn from(err: String) -> Self {
        ServiceError::Other(err)
    }
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::ContractNotFound(_)
            | ServiceError::AmendmentNotFound(_, _)
            | ServiceError::DisputeNotFound(_) => StatusCode::NOT_FOUND,

            ServiceError::TaskNotFound(_)
            | ServiceError::InvalidDateOrdering(_)
            | ServiceError::PaymentMismatch(_)
            | ServiceError::Validation(_) => StatusCode::BAD_REQUEST,

            ServiceError::NotCounterparty(_, _)
            | ServiceError::NotContractParty(_, _)
            | ServiceError::WrongParty(_) => StatusCode::FORBIDDEN,

            ServiceError::AlreadyExtended(_)
            | ServiceError::AmendmentAlreadyPending { .. }
            | ServiceError::TerminalContract(_, _)
            | ServiceError::InvalidContractStatus(_, _)
            | ServiceError::InvalidStatusTransition { .. }
            | ServiceError::AmendmentNotPending(_, _)
            | ServiceError::ProposalsAlreadyReceived(_)
            | ServiceError::InvalidDisputeTransition(_) => StatusCode::CONFLICT,

            ServiceError::Payment(_) => StatusCode::BAD_GATEWAY,

            ServiceError::Integrity(_)
            | ServiceError::Database(_)
            | ServiceError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invariant_violations_are_conflicts() {
        let id = Uuid::new_v4();
        assert_eq!(ServiceError::AlreadyExtended(id).status_code(), StatusCode::CONFLICT);
        assert_eq!(
            ServiceError::AmendmentAlreadyPending { contract_id: id, pending: AmendmentType::TaskClaim }
                .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::NotCounterparty(id, AmendmentType::ExtensionRequest).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ServiceError::InvalidDateOrdering("start after end".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn messages_name_the_amendment() {
        let id = Uuid::new_v4();
        let err = ServiceError::AmendmentAlreadyPending {
            contract_id: id,
            pending: AmendmentType::PriceModification,
        };
        assert!(err.to_string().ends_with("already has a pending price modification"));
    }

    #[test]
    fn integrity_maps_to_server_error() {
        let http: HttpError = ServiceError::Integrity("marker mismatch".into()).into();
        assert_eq!(http.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
