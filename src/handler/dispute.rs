// handler/dispute.rs
use std::sync::Arc;

use axum::{
    extract::Path,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
    Extension, Json, Router,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::contractdtos::*,
    error::HttpError,
    models::usermodel::AuthUser,
    AppState,
};

pub fn dispute_handler() -> Router {
    Router::new()
        .route("/:dispute_id", get(get_dispute))
        .route("/:dispute_id/status", put(update_dispute_status))
        .route("/:dispute_id/resolve", put(resolve_dispute))
}

pub async fn open_dispute(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(contract_id): Path<Uuid>,
    Json(body): Json<OpenDisputeDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let result = app_state
        .dispute_service
        .create_dispute(user.id, contract_id, body.reason, body.category, body.priority)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success("Dispute opened", result)),
    ))
}

pub async fn get_contract_disputes(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(contract_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let disputes = app_state
        .dispute_service
        .get_contract_disputes(&user, contract_id)
        .await?;

    Ok(Json(ApiResponse::success("Disputes retrieved successfully", disputes)))
}

pub async fn get_dispute(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(dispute_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let dispute = app_state.dispute_service.get_dispute(&user, dispute_id).await?;

    Ok(Json(ApiResponse::success("Dispute retrieved successfully", dispute)))
}

pub async fn update_dispute_status(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(dispute_id): Path<Uuid>,
    Json(body): Json<UpdateDisputeStatusDto>,
) -> Result<impl IntoResponse, HttpError> {
    let dispute = app_state
        .dispute_service
        .update_dispute_status(&user, dispute_id, body.status)
        .await?;

    Ok(Json(ApiResponse::success("Dispute status updated", dispute)))
}

pub async fn resolve_dispute(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(dispute_id): Path<Uuid>,
    Json(body): Json<ResolveDisputeDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let amount = body.amount()?;
    let result = app_state
        .dispute_service
        .resolve_dispute(&user, dispute_id, body.resolution_type, amount, body.resolution_notes)
        .await?;

    Ok(Json(ApiResponse::success("Dispute resolved", result)))
}
