// routes.rs
use std::sync::Arc;

use axum::{middleware, routing::{get, post}, Extension, Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::{
    handler::{
        amendment::amendment_handler,
        contract::{contract_handler, quote_commission},
        dispute::dispute_handler,
        events::{admin_events, get_notifications},
        payment_webhook::payment_webhook,
    },
    middleware::{admin_only, auth},
    AppState,
};

async fn health_check(Extension(app_state): Extension<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "message": "Server is running",
        "cache": app_state.db_client.cache_health().await,
        "event_subscribers": app_state.event_bus.subscriber_count(),
    }))
}

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let admin_routes = Router::new()
        .route("/events", get(admin_events))
        .layer(middleware::from_fn(admin_only))
        .layer(middleware::from_fn(auth));

    let protected_routes = Router::new()
        .nest("/contracts", contract_handler())
        .nest("/amendments", amendment_handler())
        .nest("/disputes", dispute_handler())
        .route("/commission/quote", get(quote_commission))
        .route("/notifications", get(get_notifications))
        .layer(middleware::from_fn(auth));

    // Signed by the payment provider, no bearer token.
    let webhook_routes = Router::new().route("/payments", post(payment_webhook));

    let api_route = Router::new()
        .merge(protected_routes)
        .nest("/admin", admin_routes)
        .nest("/webhooks", webhook_routes)
        .layer(TraceLayer::new_for_http())
        .layer(Extension(app_state.clone()));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_route)
        .layer(Extension(app_state))
}
