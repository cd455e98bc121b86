use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rdkafka::{
    config::ClientConfig,
    producer::{FutureProducer, FutureRecord},
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::EventSink;
use crate::domain::order::OrderEvent;
use crate::metrics::Metrics;
use crate::utils::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Wire format of one published lifecycle event.
#[derive(Debug, Serialize)]
pub struct EventEnvelope<'a> {
    pub event_id: Uuid,
    pub event_type: &'static str,
    pub order_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub event: &'a OrderEvent,
}

impl<'a> EventEnvelope<'a> {
    pub fn wrap(event: &'a OrderEvent) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            event_type: event.event_type(),
            order_id: event.order_id(),
            occurred_at: event.occurred_at(),
            event,
        }
    }
}

/// Publishes lifecycle events to a Redpanda (Kafka protocol) topic, keyed by
/// order id so every order's events stay in one partition.
pub struct RedpandaEventSink {
    producer: FutureProducer,
    topic: String,
    circuit_breaker: CircuitBreaker,
    metrics: Arc<Metrics>,
}

impl RedpandaEventSink {
    pub fn new(brokers: &str, topic: impl Into<String>, metrics: Arc<Metrics>) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .set("enable.idempotence", "true")
            .create()
            .context("Failed to create Redpanda producer")?;

        let cb_config = CircuitBreakerConfig {
            failure_threshold: 5,
            open_for: Duration::from_secs(30),
            success_threshold: 3,
        };

        Ok(Self {
            producer,
            topic: topic.into(),
            circuit_breaker: CircuitBreaker::new("redpanda", cb_config),
            metrics,
        })
    }

    async fn publish(&self, key: &str, payload: &str) -> Result<(), CircuitBreakerError<anyhow::Error>> {
        self.circuit_breaker
            .call(async {
                let record = FutureRecord::to(&self.topic).key(key).payload(payload);
                self.producer
                    .send(record, rdkafka::util::Timeout::After(SEND_TIMEOUT))
                    .await
                    .map_err(|(e, _)| anyhow::anyhow!("Kafka send error: {}", e))?;
                Ok::<(), anyhow::Error>(())
            })
            .await
    }
}

#[async_trait]
impl EventSink for RedpandaEventSink {
    async fn emit(&self, event: &OrderEvent) -> Result<()> {
        let envelope = EventEnvelope::wrap(event);
        let payload = serde_json::to_string(&envelope).context("Failed to serialize order event")?;
        let key = envelope.order_id.to_string();

        let result = self.publish(&key, &payload).await;
        self.metrics
            .update_circuit_breaker_state(self.circuit_breaker.state().await.as_gauge());

        match result {
            Ok(()) => {
                tracing::info!(
                    topic = %self.topic,
                    order_id = %key,
                    event_type = envelope.event_type,
                    "Published order event to Redpanda"
                );
                Ok(())
            }
            Err(CircuitBreakerError::CircuitOpen) => {
                tracing::error!(topic = %self.topic, "Circuit breaker open - Redpanda unavailable");
                Err(anyhow::anyhow!("Circuit breaker open for Redpanda"))
            }
            Err(CircuitBreakerError::OperationFailed(e)) => {
                tracing::error!(error = %e, topic = %self.topic, "Failed to publish to Redpanda");
                Err(e)
            }
        }
    }
}
