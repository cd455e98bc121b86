pub mod redpanda;

use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};

use crate::domain::order::OrderEvent;

pub use redpanda::RedpandaEventSink;

// ============================================================================
// Event Sinks - outbound lifecycle notifications
// ============================================================================
//
// The engine emits after a successful commit. A sink failure is logged and
// counted by the engine; it never undoes the committed command.
//
// ============================================================================

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: &OrderEvent) -> anyhow::Result<()>;
}

/// Records every event. Used by tests to assert what was emitted.
#[derive(Debug, Default)]
pub struct InMemoryEventSink {
    events: Mutex<Vec<OrderEvent>>,
}

impl InMemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<OrderEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn count(&self, event_type: &str) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }
}

#[async_trait]
impl EventSink for InMemoryEventSink {
    async fn emit(&self, event: &OrderEvent) -> anyhow::Result<()> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Ok(())
    }
}

/// Logs events as structured records. Default sink when no broker is configured.
#[derive(Debug, Default)]
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn emit(&self, event: &OrderEvent) -> anyhow::Result<()> {
        let payload = serde_json::to_string(event)?;
        tracing::info!(
            order_id = %event.order_id(),
            event_type = event.event_type(),
            payload = %payload,
            "Order event"
        );
        Ok(())
    }
}
