// handler/payment_webhook.rs
use std::sync::Arc;

use axum::{
    body::Bytes,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};

use crate::{
    dtos::contractdtos::{ApiResponse, PaymentWebhookData, PaymentWebhookEvent},
    error::{ErrorMessage, HttpError},
    service::payment_provider::SIGNATURE_HEADER,
    AppState,
};

/// Payment collaborator callback. The signature covers the raw body, so the
/// body is only parsed after it has been verified.
pub async fn payment_webhook(
    Extension(app_state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, HttpError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| HttpError::bad_request("Missing or invalid payment signature"))?;

    let gateway = app_state.amendment_service.price_modifications().gateway();
    if !gateway.verify_signature(&body, signature) {
        tracing::warn!("Invalid {} webhook signature received", gateway.name());
        return Err(HttpError::new(
            ErrorMessage::InvalidSignature.to_string(),
            StatusCode::UNAUTHORIZED,
        ));
    }

    let event: PaymentWebhookEvent = serde_json::from_slice(&body)
        .map_err(|e| HttpError::bad_request(format!("Malformed webhook payload: {}", e)))?;

    match event.event.as_str() {
        "charge.success" => {
            let data: PaymentWebhookData = serde_json::from_value(event.data)
                .map_err(|e| HttpError::bad_request(format!("Malformed charge data: {}", e)))?;

            let outcome = app_state
                .amendment_service
                .price_modifications()
                .confirm_payment(&data.reference, &data.amount_paid())
                .await?;

            tracing::info!(
                "Payment {} confirmed price modification {}",
                data.reference,
                outcome.amendment_id
            );
            Ok(Json(ApiResponse::success("Payment applied", Some(outcome))))
        }
        other => {
            tracing::info!("Unhandled payment webhook event: {}", other);
            Ok(Json(ApiResponse::success("Event ignored", None)))
        }
    }
}
