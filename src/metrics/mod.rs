// Private module declaration
mod server;

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry};

// Re-export for public API
pub use server::start_metrics_server;

// ============================================================================
// Metrics Module - Prometheus metrics for the order engine
// ============================================================================
//
// Provides metrics for:
// - Order commands (throughput by outcome, latency)
// - State transitions
// - Payment handler outcomes
// - Optimistic-concurrency conflict retries
// - Lifecycle events handed to the event sink
// - Event broker circuit breaker state
//
// All metrics are registered with Prometheus and can be scraped via /metrics
// ============================================================================

pub struct Metrics {
    registry: Registry,

    // Command Metrics
    pub commands_total: IntCounterVec,
    pub command_duration: HistogramVec,

    // Lifecycle Metrics
    pub transitions_total: IntCounterVec,
    pub payment_outcomes_total: IntCounterVec,

    // Concurrency Metrics
    pub conflict_retries_total: IntCounterVec,

    // Event Sink Metrics
    pub events_emitted_total: IntCounterVec,
    pub event_sink_failures_total: IntCounterVec,
    pub circuit_breaker_state: IntGauge,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        // Command Metrics
        let commands_total = IntCounterVec::new(
            Opts::new("order_commands_total", "Order commands handled, by outcome"),
            &["command", "outcome"],
        )?;
        registry.register(Box::new(commands_total.clone()))?;

        let command_duration = HistogramVec::new(
            HistogramOpts::new("order_command_duration_seconds", "Order command handling duration")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]),
            &["command"],
        )?;
        registry.register(Box::new(command_duration.clone()))?;

        // Lifecycle Metrics
        let transitions_total = IntCounterVec::new(
            Opts::new("order_state_transitions_total", "Committed order state transitions"),
            &["from_state", "to_state"],
        )?;
        registry.register(Box::new(transitions_total.clone()))?;

        let payment_outcomes_total = IntCounterVec::new(
            Opts::new("order_payment_outcomes_total", "Payment handler outcomes"),
            &["handler", "outcome"],
        )?;
        registry.register(Box::new(payment_outcomes_total.clone()))?;

        // Concurrency Metrics
        let conflict_retries_total = IntCounterVec::new(
            Opts::new("order_conflict_retries_total", "Commands re-run after a version conflict"),
            &["command"],
        )?;
        registry.register(Box::new(conflict_retries_total.clone()))?;

        // Event Sink Metrics
        let events_emitted_total = IntCounterVec::new(
            Opts::new("order_events_emitted_total", "Lifecycle events accepted by the event sink"),
            &["event_type"],
        )?;
        registry.register(Box::new(events_emitted_total.clone()))?;

        let event_sink_failures_total = IntCounterVec::new(
            Opts::new("order_event_sink_failures_total", "Lifecycle events the event sink rejected"),
            &["event_type"],
        )?;
        registry.register(Box::new(event_sink_failures_total.clone()))?;

        let circuit_breaker_state = IntGauge::new(
            "event_broker_circuit_breaker_state",
            "Event broker circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)",
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        Ok(Self {
            registry,
            commands_total,
            command_duration,
            transitions_total,
            payment_outcomes_total,
            conflict_retries_total,
            events_emitted_total,
            event_sink_failures_total,
            circuit_breaker_state,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// `outcome` is `ok`, an error code, or `storage_error`.
    pub fn record_command(&self, command: &str, outcome: &str, duration_secs: f64) {
        self.commands_total.with_label_values(&[command, outcome]).inc();
        self.command_duration.with_label_values(&[command]).observe(duration_secs);
    }

    pub fn record_transition(&self, from_state: &str, to_state: &str) {
        self.transitions_total.with_label_values(&[from_state, to_state]).inc();
    }

    pub fn record_payment_outcome(&self, handler: &str, outcome: &str) {
        self.payment_outcomes_total.with_label_values(&[handler, outcome]).inc();
    }

    pub fn record_conflict_retry(&self, command: &str) {
        self.conflict_retries_total.with_label_values(&[command]).inc();
    }

    pub fn record_event(&self, event_type: &str, delivered: bool) {
        if delivered {
            self.events_emitted_total.with_label_values(&[event_type]).inc();
        } else {
            self.event_sink_failures_total.with_label_values(&[event_type]).inc();
        }
    }

    pub fn update_circuit_breaker_state(&self, state: i64) {
        self.circuit_breaker_state.set(state);
    }
}
