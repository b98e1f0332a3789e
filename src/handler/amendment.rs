// handler/amendment.rs
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
    models::{contractmodel::AmendmentType, usermodel::AuthUser},
    AppState,
};

/// Routes addressing one amendment by type and id. Submission and history
/// hang off the contract router.
pub fn amendment_handler() -> Router {
    Router::new()
        .route("/:amendment_type/:amendment_id", get(get_amendment))
        .route("/:amendment_type/:amendment_id/respond", put(respond_to_amendment))
        .route("/:amendment_type/:amendment_id/withdraw", put(withdraw_amendment))
}

pub async fn submit_amendment(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(contract_id): Path<Uuid>,
    Json(body): Json<SubmitAmendmentDto>,
) -> Result<impl IntoResponse, HttpError> {
    let payload = body.into_payload()?;
    let outcome = app_state
        .amendment_service
        .submit(&user, contract_id, payload)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success("Amendment submitted", outcome)),
    ))
}

pub async fn get_amendment_history(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(contract_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let history = app_state.amendment_service.history(&user, contract_id).await?;

    Ok(Json(ApiResponse::success("Amendment history retrieved successfully", history)))
}

pub async fn get_amendment(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path((amendment_type, amendment_id)): Path<(AmendmentType, Uuid)>,
) -> Result<impl IntoResponse, HttpError> {
    let entry = app_state
        .amendment_service
        .get_amendment(&user, amendment_type, amendment_id)
        .await?;

    Ok(Json(ApiResponse::success("Amendment retrieved successfully", entry)))
}

pub async fn respond_to_amendment(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path((amendment_type, amendment_id)): Path<(AmendmentType, Uuid)>,
    Json(body): Json<RespondAmendmentDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let outcome = app_state
        .amendment_service
        .respond(&user, amendment_type, amendment_id, body.accept, body.reason)
        .await?;

    let message = if body.accept {
        format!("{} accepted", amendment_type.label())
    } else {
        format!("{} rejected", amendment_type.label())
    };
    Ok(Json(ApiResponse::success(&message, outcome)))
}

pub async fn withdraw_amendment(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path((amendment_type, amendment_id)): Path<(AmendmentType, Uuid)>,
) -> Result<impl IntoResponse, HttpError> {
    let outcome = app_state
        .amendment_service
        .withdraw(&user, amendment_type, amendment_id)
        .await?;

    Ok(Json(ApiResponse::success("Amendment withdrawn", outcome)))
}
