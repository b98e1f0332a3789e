//! Broadcast bus for contract and amendment events.
//!
//! The engine publishes and never waits: when nobody listens the event is
//! dropped, and subscribers that fall behind lose the oldest events.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::contractmodel::{AmendmentType, ContractStatus};

const EVENT_BUFFER: usize = 512;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ContractEvent {
    AmendmentSubmitted {
        contract_id: Uuid,
        amendment_type: AmendmentType,
        amendment_id: Uuid,
        summary: String,
        timestamp: DateTime<Utc>,
    },
    AmendmentAccepted {
        contract_id: Uuid,
        amendment_type: AmendmentType,
        amendment_id: Uuid,
        summary: String,
        timestamp: DateTime<Utc>,
    },
    AmendmentRejected {
        contract_id: Uuid,
        amendment_type: AmendmentType,
        amendment_id: Uuid,
        summary: String,
        timestamp: DateTime<Utc>,
    },
    AmendmentWithdrawn {
        contract_id: Uuid,
        amendment_type: AmendmentType,
        amendment_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    AmendmentExpired {
        contract_id: Uuid,
        amendment_type: AmendmentType,
        amendment_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    AmendmentEscalated {
        contract_id: Uuid,
        amendment_type: AmendmentType,
        amendment_id: Uuid,
        support_ticket_id: Uuid,
        dispute_id: Uuid,
        summary: String,
        timestamp: DateTime<Utc>,
    },
    DisputeOpened {
        contract_id: Uuid,
        dispute_id: Uuid,
        importance_level: i32,
        timestamp: DateTime<Utc>,
    },
    DisputeResolved {
        contract_id: Uuid,
        dispute_id: Uuid,
        resolution_type: String,
        timestamp: DateTime<Utc>,
    },
    ContractStatusChanged {
        contract_id: Uuid,
        from: ContractStatus,
        to: ContractStatus,
        timestamp: DateTime<Utc>,
    },
}

impl ContractEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            ContractEvent::AmendmentSubmitted { .. } => "amendment.submitted",
            ContractEvent::AmendmentAccepted { .. } => "amendment.accepted",
            ContractEvent::AmendmentRejected { .. } => "amendment.rejected",
            ContractEvent::AmendmentWithdrawn { .. } => "amendment.withdrawn",
            ContractEvent::AmendmentExpired { .. } => "amendment.expired",
            ContractEvent::AmendmentEscalated { .. } => "amendment.escalated",
            ContractEvent::DisputeOpened { .. } => "dispute.opened",
            ContractEvent::DisputeResolved { .. } => "dispute.resolved",
            ContractEvent::ContractStatusChanged { .. } => "contract.status",
        }
    }

    pub fn contract_id(&self) -> Uuid {
        match self {
            ContractEvent::AmendmentSubmitted { contract_id, .. }
            | ContractEvent::AmendmentAccepted { contract_id, .. }
            | ContractEvent::AmendmentRejected { contract_id, .. }
            | ContractEvent::AmendmentWithdrawn { contract_id, .. }
            | ContractEvent::AmendmentExpired { contract_id, .. }
            | ContractEvent::AmendmentEscalated { contract_id, .. }
            | ContractEvent::DisputeOpened { contract_id, .. }
            | ContractEvent::DisputeResolved { contract_id, .. }
            | ContractEvent::ContractStatusChanged { contract_id, .. } => *contract_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ContractEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUFFER);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ContractEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: ContractEvent) {
        let event_type = event.event_type();
        match self.sender.send(event) {
            Ok(subscribers) => {
                tracing::debug!(event_type, subscribers, "Event published");
            }
            Err(_) => {
                tracing::debug!(event_type, "Event published with no subscribers");
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn withdrawn(contract_id: Uuid) -> ContractEvent {
        ContractEvent::AmendmentWithdrawn {
            contract_id,
            amendment_type: AmendmentType::ExtensionRequest,
            amendment_id: Uuid::new_v4(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let contract_id = Uuid::new_v4();

        bus.publish(withdrawn(contract_id));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.contract_id(), contract_id);
        assert_eq!(event.event_type(), "amendment.withdrawn");
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(withdrawn(Uuid::new_v4()));
    }

    #[test]
    fn events_serialize_with_a_type_tag() {
        let json = serde_json::to_value(withdrawn(Uuid::new_v4())).unwrap();
        assert_eq!(json["type"], "amendment_withdrawn");
        assert_eq!(json["data"]["amendment_type"], "extension_request");
    }
}
