use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Engine Configuration
// ============================================================================
//
// Environment variables:
// - DATABASE_URL             PostgreSQL store when set, in-memory otherwise
// - DATABASE_MAX_CONNECTIONS pool size (default 5)
// - REDPANDA_BROKERS         Redpanda event sink when set, tracing sink otherwise
// - ORDER_EVENTS_TOPIC       topic for lifecycle events (default "order-events")
// - PAYMENT_TIMEOUT_MS       bound on each payment handler call (default 10000)
// - METRICS_PORT             Prometheus endpoint port (default 9090)
// - CONFLICT_RETRY_ATTEMPTS  attempts for commands hitting a version conflict (default 3)
//
// ============================================================================

pub const DEFAULT_EVENTS_TOPIC: &str = "order-events";
pub const DEFAULT_PAYMENT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_METRICS_PORT: u16 = 9090;
pub const DEFAULT_CONFLICT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub redpanda_brokers: Option<String>,
    pub events_topic: String,
    pub payment_timeout: Duration,
    pub metrics_port: u16,
    pub conflict_retry_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            database_max_connections: DEFAULT_MAX_CONNECTIONS,
            redpanda_brokers: None,
            events_topic: DEFAULT_EVENTS_TOPIC.to_string(),
            payment_timeout: Duration::from_millis(DEFAULT_PAYMENT_TIMEOUT_MS),
            metrics_port: DEFAULT_METRICS_PORT,
            conflict_retry_attempts: DEFAULT_CONFLICT_RETRY_ATTEMPTS,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Ok(Self {
            database_url: get("DATABASE_URL"),
            database_max_connections: parse_or(get("DATABASE_MAX_CONNECTIONS"), "DATABASE_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?,
            redpanda_brokers: get("REDPANDA_BROKERS"),
            events_topic: get("ORDER_EVENTS_TOPIC").unwrap_or_else(|| DEFAULT_EVENTS_TOPIC.to_string()),
            payment_timeout: Duration::from_millis(parse_or(
                get("PAYMENT_TIMEOUT_MS"),
                "PAYMENT_TIMEOUT_MS",
                DEFAULT_PAYMENT_TIMEOUT_MS,
            )?),
            metrics_port: parse_or(get("METRICS_PORT"), "METRICS_PORT", DEFAULT_METRICS_PORT)?,
            conflict_retry_attempts: parse_or(
                get("CONFLICT_RETRY_ATTEMPTS"),
                "CONFLICT_RETRY_ATTEMPTS",
                DEFAULT_CONFLICT_RETRY_ATTEMPTS,
            )?,
        })
    }
}

fn parse_or<T>(value: Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match value {
        Some(raw) => raw.parse().with_context(|| format!("Invalid value for {key}: {raw:?}")),
        None => Ok(default),
    }
}
