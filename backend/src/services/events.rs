//! Post-commit order events
//!
//! Delivery is best-effort: a failing sink is logged by the coordinator and
//! never reaches the caller.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;

use shared::Order;

/// Named order lifecycle events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OrderEventKind {
    #[serde(rename = "order:created")]
    Created,
    #[serde(rename = "order:updated")]
    Updated,
    #[serde(rename = "order:item-added")]
    ItemAdded,
    #[serde(rename = "order:item-removed")]
    ItemRemoved,
    #[serde(rename = "order:deleted")]
    Deleted,
}

impl OrderEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderEventKind::Created => "order:created",
            OrderEventKind::Updated => "order:updated",
            OrderEventKind::ItemAdded => "order:item-added",
            OrderEventKind::ItemRemoved => "order:item-removed",
            OrderEventKind::Deleted => "order:deleted",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderEvent {
    pub kind: OrderEventKind,
    pub order: Order,
    pub emitted_at: DateTime<Utc>,
}

impl OrderEvent {
    pub fn new(kind: OrderEventKind, order: Order) -> Self {
        Self {
            kind,
            order,
            emitted_at: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum EventError {
    #[error("event sink closed")]
    Closed,

    #[error("event delivery failed: {0}")]
    Delivery(String),
}

/// Destination for committed order events
pub trait EventSink: Send + Sync {
    /// Returns the number of subscribers reached
    fn publish(&self, event: OrderEvent) -> Result<usize, EventError>;
}

/// Fan-out over a tokio broadcast channel
pub struct BroadcastEventSink {
    tx: broadcast::Sender<OrderEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrderEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastEventSink {
    fn publish(&self, event: OrderEvent) -> Result<usize, EventError> {
        // No subscribers is not a failure
        Ok(self.tx.send(event).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{OrderState, OrderType};
    use uuid::Uuid;

    fn order() -> Order {
        let now = Utc::now();
        Order {
            id: Uuid::new_v4(),
            code: "SO-240307-1".into(),
            order_type: OrderType::Sale,
            state: OrderState::Draft,
            source_warehouse_id: None,
            destination_warehouse_id: None,
            customer_id: None,
            supplier_id: None,
            parent_order_id: None,
            notes: None,
            dispatched_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_event_names() {
        assert_eq!(OrderEventKind::ItemAdded.as_str(), "order:item-added");
        let json = serde_json::to_string(&OrderEventKind::Deleted).unwrap();
        assert_eq!(json, "\"order:deleted\"");
    }

    #[tokio::test]
    async fn test_broadcast_reaches_subscribers() {
        let sink = BroadcastEventSink::new(8);
        let mut rx = sink.subscribe();
        let reached = sink
            .publish(OrderEvent::new(OrderEventKind::Created, order()))
            .unwrap();
        assert_eq!(reached, 1);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, OrderEventKind::Created);
    }

    #[test]
    fn test_publish_without_subscribers_is_ok() {
        let sink = BroadcastEventSink::new(8);
        let reached = sink
            .publish(OrderEvent::new(OrderEventKind::Updated, order()))
            .unwrap();
        assert_eq!(reached, 0);
    }
}
