// handler/events.rs
use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::{
    extract::Query,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Extension, Json,
};
use futures::stream::{self, Stream};
use serde::Deserialize;
use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

use crate::{
    dtos::contractdtos::{ApiResponse, PageQuery},
    error::HttpError,
    models::usermodel::AuthUser,
    service::event_bus::ContractEvent,
    AppState,
};

#[derive(Debug, Default, Deserialize)]
pub struct EventFilter {
    /// Comma separated event types, e.g. `amendment.escalated,dispute.opened`.
    pub events: Option<String>,
    pub contract_id: Option<Uuid>,
}

impl EventFilter {
    fn accepts(&self, event: &ContractEvent) -> bool {
        if self.contract_id.is_some_and(|id| id != event.contract_id()) {
            return false;
        }
        match self.events.as_deref() {
            None | Some("all") => true,
            Some(list) => list.split(',').any(|t| t.trim() == event.event_type()),
        }
    }
}

fn sse_event(event: &ContractEvent) -> Event {
    match serde_json::to_string(event) {
        Ok(json) => Event::default().event(event.event_type()).data(json),
        Err(e) => {
            tracing::error!("Failed to serialize event: {}", e);
            Event::default().event("error").data("serialization failed")
        }
    }
}

fn event_stream(
    receiver: broadcast::Receiver<ContractEvent>,
    filter: EventFilter,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold((receiver, filter), |(mut receiver, filter)| async move {
        loop {
            match receiver.recv().await {
                Ok(event) if filter.accepts(&event) => {
                    let sse = sse_event(&event);
                    return Some((Ok(sse), (receiver, filter)));
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Admin event stream lagged, {} events dropped", skipped);
                    continue;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    })
}

/// Admin dashboard feed of every contract, amendment and dispute event.
pub async fn admin_events(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(filter): Query<EventFilter>,
) -> impl IntoResponse {
    tracing::info!(admin = %user.id, events = ?filter.events, "Admin event stream opened");

    let receiver = app_state.event_bus.subscribe();

    Sse::new(event_stream(receiver, filter)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}

pub async fn get_notifications(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(page): Query<PageQuery>,
) -> Result<impl IntoResponse, HttpError> {
    let notifications = app_state
        .notification_service
        .get_user_notifications(user.id, page.limit())
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?;

    Ok(Json(ApiResponse::success("Notifications retrieved successfully", notifications)))
}
