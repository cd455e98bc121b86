use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::registry::{Registry, Strategy};
use crate::domain::order::{Money, OrderAggregate};

// ============================================================================
// Payment Handlers - pluggable payment provider integrations
// ============================================================================

/// Tagged outcome of asking a provider to create a payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CreatePaymentResult {
    /// Payment registered, funds not captured yet
    Created { amount: Money },
    /// Funds captured
    Authorized {
        amount: Money,
        transaction_id: String,
    },
    /// Provider refused the payment
    Declined {
        error: String,
        #[serde(default)]
        raw_error: Option<serde_json::Value>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizePaymentResult {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[async_trait]
pub trait PaymentHandler: Strategy {
    /// Human-readable provider name
    fn name(&self) -> &str;

    async fn create_payment(
        &self,
        order: &OrderAggregate,
        total_amount: Money,
        metadata: &serde_json::Value,
    ) -> anyhow::Result<CreatePaymentResult>;

    /// Capture a payment previously left in the created state.
    async fn authorize_payment(&self, order: &OrderAggregate) -> anyhow::Result<AuthorizePaymentResult>;
}

pub type PaymentHandlers = Registry<dyn PaymentHandler>;

/// Provider for development and tests.
///
/// Metadata flags: `"decline": true` declines, `"capture": false` leaves the
/// payment created but not authorized. Anything else authorizes immediately.
#[derive(Debug, Default)]
pub struct TestPaymentHandler;

impl TestPaymentHandler {
    pub const CODE: &'static str = "test-payment";
}

impl Strategy for TestPaymentHandler {
    fn code(&self) -> &str {
        Self::CODE
    }
}

#[async_trait]
impl PaymentHandler for TestPaymentHandler {
    fn name(&self) -> &str {
        "Test Payment"
    }

    async fn create_payment(
        &self,
        _order: &OrderAggregate,
        total_amount: Money,
        metadata: &serde_json::Value,
    ) -> anyhow::Result<CreatePaymentResult> {
        if metadata.get("decline").and_then(|v| v.as_bool()).unwrap_or(false) {
            return Ok(CreatePaymentResult::Declined {
                error: "Payment declined by test handler".to_string(),
                raw_error: Some(serde_json::json!({ "reason": "requested_decline" })),
            });
        }

        if !metadata.get("capture").and_then(|v| v.as_bool()).unwrap_or(true) {
            return Ok(CreatePaymentResult::Created { amount: total_amount });
        }

        Ok(CreatePaymentResult::Authorized {
            amount: total_amount,
            transaction_id: format!("test-{}", Uuid::new_v4()),
        })
    }

    async fn authorize_payment(&self, _order: &OrderAggregate) -> anyhow::Result<AuthorizePaymentResult> {
        Ok(AuthorizePaymentResult { success: true, error: None })
    }
}
