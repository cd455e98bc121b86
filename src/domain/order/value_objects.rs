use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Order Value Objects
// ============================================================================

/// Monetary amount in minor units (cents).
pub type Money = i64;

/// Lifecycle state of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    Modifying,
    PaymentAdded,
    PaymentAuthorized,
    Shipped,
    Delivered,
    Canceled,
}

impl OrderState {
    pub const ALL: [OrderState; 6] = [
        OrderState::Modifying,
        OrderState::PaymentAdded,
        OrderState::PaymentAuthorized,
        OrderState::Shipped,
        OrderState::Delivered,
        OrderState::Canceled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::Modifying => "MODIFYING",
            OrderState::PaymentAdded => "PAYMENT_ADDED",
            OrderState::PaymentAuthorized => "PAYMENT_AUTHORIZED",
            OrderState::Shipped => "SHIPPED",
            OrderState::Delivered => "DELIVERED",
            OrderState::Canceled => "CANCELED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|state| state.as_str() == value)
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Customer email address, validated on construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Email(String);

impl Email {
    /// Parse and normalize an email address. Returns `None` when the format is invalid.
    pub fn parse(raw: &str) -> Option<Self> {
        let candidate = raw.trim();
        if candidate.is_empty() || candidate.chars().any(char::is_whitespace) {
            return None;
        }

        let (local, domain) = candidate.split_once('@')?;
        if local.is_empty() || domain.contains('@') {
            return None;
        }

        let (host, tld) = domain.rsplit_once('.')?;
        if host.is_empty() || tld.len() < 2 || domain.starts_with('.') {
            return None;
        }

        Some(Self(candidate.to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Email {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Shipping address embedded in the order row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub full_name: String,
    pub street_line_1: String,
    pub street_line_2: Option<String>,
    pub city: String,
    pub province: Option<String>,
    pub postal_code: String,
    /// ISO 3166-1 alpha-2 code of the destination country
    pub country_code: String,
    pub phone_number: Option<String>,
}

/// How to look up a single order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderLookup {
    Id(Uuid),
    Code(String),
}

/// Pagination window for order listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListInput {
    pub skip: usize,
    pub take: usize,
}

impl Default for ListInput {
    fn default() -> Self {
        Self { skip: 0, take: 50 }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
