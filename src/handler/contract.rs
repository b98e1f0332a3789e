// handler/contract.rs
use std::sync::Arc;

use axum::{
    extract::{Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Extension, Json, Router,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::quotadb::QuotaExt,
    dtos::contractdtos::*,
    error::{ErrorMessage, HttpError},
    models::usermodel::AuthUser,
    service::error::ServiceError,
    utils::decimal::money_from_f64,
    AppState,
};

pub fn contract_handler() -> Router {
    Router::new()
        .route("/", post(create_contract))
        .route("/:contract_id", get(get_contract))
        .route("/:contract_id/activate", put(activate_contract))
        .route("/:contract_id/complete", put(complete_contract))
        .route("/:contract_id/pairing-code", post(regenerate_pairing_code))
        .route("/:contract_id/pairing-code/confirm", post(confirm_pairing))
        .route("/:contract_id/tasks/:task_id", put(update_task_status))
        .route("/:contract_id/ledger", get(get_contract_ledger))
        .route("/:contract_id/audit", get(get_contract_audit))
        // Amendments
        .route(
            "/:contract_id/amendments",
            post(super::amendment::submit_amendment).get(super::amendment::get_amendment_history),
        )
        // Disputes
        .route(
            "/:contract_id/disputes",
            post(super::dispute::open_dispute).get(super::dispute::get_contract_disputes),
        )
}

pub async fn create_contract(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<CreateContractDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let input = body.into_input()?;
    let details = app_state.contract_service.create_contract(&user, input).await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success("Contract created successfully", details)),
    ))
}

pub async fn get_contract(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(contract_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let mut details = app_state.contract_service.get_contract(&user, contract_id).await?;

    // Overdue amendments are settled before the contract is shown.
    if details.contract.pending_amendment().is_some() {
        app_state.amendment_service.refresh_contract(contract_id).await;
        details = app_state.contract_service.get_contract(&user, contract_id).await?;
    }

    Ok(Json(ApiResponse::success("Contract retrieved successfully", details)))
}

pub async fn activate_contract(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(contract_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let contract = app_state.contract_service.activate_contract(&user, contract_id).await?;

    Ok(Json(ApiResponse::success("Contract activated", contract)))
}

pub async fn complete_contract(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(contract_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let contract = app_state.contract_service.complete_contract(&user, contract_id).await?;

    Ok(Json(ApiResponse::success("Contract completed", contract)))
}

pub async fn regenerate_pairing_code(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(contract_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let code = app_state
        .contract_service
        .regenerate_pairing_code(&user, contract_id)
        .await?;

    Ok(Json(ApiResponse::success("Pairing code issued", code)))
}

pub async fn confirm_pairing(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(contract_id): Path<Uuid>,
    Json(body): Json<ConfirmPairingDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let contract = app_state
        .contract_service
        .confirm_pairing(&user, contract_id, body.code.trim())
        .await?;

    Ok(Json(ApiResponse::success("Pairing confirmed", contract)))
}

pub async fn update_task_status(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path((contract_id, task_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<UpdateTaskStatusDto>,
) -> Result<impl IntoResponse, HttpError> {
    let task = app_state
        .contract_service
        .update_task_status(&user, contract_id, task_id, body.status)
        .await?;

    Ok(Json(ApiResponse::success("Task updated", task)))
}

pub async fn get_contract_ledger(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(contract_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    if !user.is_admin() {
        app_state.contract_service.load_for_party(user.id, contract_id).await?;
    }

    let entries = app_state
        .db_client
        .get_contract_ledger(contract_id)
        .await
        .map_err(ServiceError::from)?;

    Ok(Json(ApiResponse::success("Ledger retrieved successfully", entries)))
}

pub async fn get_contract_audit(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(contract_id): Path<Uuid>,
    Query(page): Query<PageQuery>,
) -> Result<impl IntoResponse, HttpError> {
    if !user.is_admin() {
        return Err(HttpError::forbidden(ErrorMessage::PermissionDenied.to_string()));
    }

    let logs = app_state
        .audit_service
        .get_contract_audit_logs(contract_id, page.limit(), page.offset())
        .await?;

    Ok(Json(ApiResponse::success("Audit trail retrieved successfully", logs)))
}

pub async fn quote_commission(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<CommissionQuoteQuery>,
) -> Result<impl IntoResponse, HttpError> {
    query
        .validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let price = money_from_f64(query.price).map_err(HttpError::bad_request)?;
    let quote = app_state.contract_service.quote_commission(&user, &price).await?;

    Ok(Json(ApiResponse::success("Commission quoted", quote)))
}
