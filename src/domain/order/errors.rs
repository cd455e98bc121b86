use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state_machine::OrderAction;
use super::value_objects::OrderState;
use crate::store::StoreError;
use crate::utils::IsTransient;

// ============================================================================
// Order Business Rule Errors
// ============================================================================

/// Closed set of error codes surfaced to the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    OrderNotFound,
    LineNotFound,
    VariantNotFound,
    ForbiddenOrderAction,
    OrderTransitionError,
    NotEnoughStock,
    CustomerInvalidEmail,
    CustomerDisabled,
    CountryNotFound,
    MissingShippingAddress,
    ShippingMethodNotFound,
    MissingShippingPriceCalculator,
    PaymentMethodNotFound,
    MissingPaymentHandler,
    PaymentFailed,
    PaymentDeclined,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::OrderNotFound => "ORDER_NOT_FOUND",
            ErrorCode::LineNotFound => "LINE_NOT_FOUND",
            ErrorCode::VariantNotFound => "VARIANT_NOT_FOUND",
            ErrorCode::ForbiddenOrderAction => "FORBIDDEN_ORDER_ACTION",
            ErrorCode::OrderTransitionError => "ORDER_TRANSITION_ERROR",
            ErrorCode::NotEnoughStock => "NOT_ENOUGH_STOCK",
            ErrorCode::CustomerInvalidEmail => "CUSTOMER_INVALID_EMAIL",
            ErrorCode::CustomerDisabled => "CUSTOMER_DISABLED",
            ErrorCode::CountryNotFound => "COUNTRY_NOT_FOUND",
            ErrorCode::MissingShippingAddress => "MISSING_SHIPPING_ADDRESS",
            ErrorCode::ShippingMethodNotFound => "SHIPPING_METHOD_NOT_FOUND",
            ErrorCode::MissingShippingPriceCalculator => "MISSING_SHIPPING_PRICE_CALCULATOR",
            ErrorCode::PaymentMethodNotFound => "PAYMENT_METHOD_NOT_FOUND",
            ErrorCode::MissingPaymentHandler => "MISSING_PAYMENT_HANDLER",
            ErrorCode::PaymentFailed => "PAYMENT_FAILED",
            ErrorCode::PaymentDeclined => "PAYMENT_DECLINED",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum OrderError {
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Order line not found: {0}")]
    LineNotFound(Uuid),

    #[error("Variant not found: {0}")]
    VariantNotFound(Uuid),

    #[error("Action {action} is not allowed for order in state {state}")]
    ForbiddenAction { action: OrderAction, state: OrderState },

    #[error("Cannot transition order from {from} to {to}: {reason}")]
    InvalidTransition {
        from: OrderState,
        to: OrderState,
        reason: &'static str,
    },

    #[error("Not enough stock for variant {variant_id}: requested {requested}, available {available}")]
    NotEnoughStock {
        variant_id: Uuid,
        requested: u32,
        available: u32,
    },

    #[error("Invalid email format: {0}")]
    InvalidEmail(String),

    #[error("Customer is disabled: {0}")]
    CustomerDisabled(String),

    #[error("Country not found or disabled: {0}")]
    CountryNotFound(String),

    #[error("Order has no shipping address")]
    MissingShippingAddress,

    #[error("Shipping method not found: {0}")]
    ShippingMethodNotFound(Uuid),

    #[error("No shipping price calculator registered for code {0}")]
    MissingShippingPriceCalculator(String),

    #[error("Payment method not found: {0}")]
    PaymentMethodNotFound(Uuid),

    #[error("No payment handler registered for code {0}")]
    MissingPaymentHandler(String),

    #[error("Payment failed: {message}")]
    PaymentFailed {
        message: String,
        raw_error: Option<serde_json::Value>,
    },

    #[error("Payment declined: {message}")]
    PaymentDeclined {
        message: String,
        raw_error: Option<serde_json::Value>,
    },
}

impl OrderError {
    pub fn code(&self) -> ErrorCode {
        match self {
            OrderError::OrderNotFound(_) => ErrorCode::OrderNotFound,
            OrderError::LineNotFound(_) => ErrorCode::LineNotFound,
            OrderError::VariantNotFound(_) => ErrorCode::VariantNotFound,
            OrderError::ForbiddenAction { .. } => ErrorCode::ForbiddenOrderAction,
            OrderError::InvalidTransition { .. } => ErrorCode::OrderTransitionError,
            OrderError::NotEnoughStock { .. } => ErrorCode::NotEnoughStock,
            OrderError::InvalidEmail(_) => ErrorCode::CustomerInvalidEmail,
            OrderError::CustomerDisabled(_) => ErrorCode::CustomerDisabled,
            OrderError::CountryNotFound(_) => ErrorCode::CountryNotFound,
            OrderError::MissingShippingAddress => ErrorCode::MissingShippingAddress,
            OrderError::ShippingMethodNotFound(_) => ErrorCode::ShippingMethodNotFound,
            OrderError::MissingShippingPriceCalculator(_) => ErrorCode::MissingShippingPriceCalculator,
            OrderError::PaymentMethodNotFound(_) => ErrorCode::PaymentMethodNotFound,
            OrderError::MissingPaymentHandler(_) => ErrorCode::MissingPaymentHandler,
            OrderError::PaymentFailed { .. } => ErrorCode::PaymentFailed,
            OrderError::PaymentDeclined { .. } => ErrorCode::PaymentDeclined,
        }
    }

    /// Opaque provider payload attached to declined or failed payments.
    pub fn raw_error(&self) -> Option<&serde_json::Value> {
        match self {
            OrderError::PaymentFailed { raw_error, .. }
            | OrderError::PaymentDeclined { raw_error, .. } => raw_error.as_ref(),
            _ => None,
        }
    }
}

// ============================================================================
// Command Errors - domain refusals vs. infrastructure faults
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    Domain(#[from] OrderError),

    #[error("Storage failure: {0}")]
    Storage(StoreError),
}

impl CommandError {
    /// Error code when this is a domain refusal.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            CommandError::Domain(e) => Some(e.code()),
            CommandError::Storage(_) => None,
        }
    }
}

impl From<StoreError> for CommandError {
    fn from(error: StoreError) -> Self {
        match error {
            // A failed stock guard at commit time is the same business refusal as the
            // point-in-time check.
            StoreError::InsufficientStock { variant_id, requested, available } => {
                CommandError::Domain(OrderError::NotEnoughStock { variant_id, requested, available })
            }
            other => CommandError::Storage(other),
        }
    }
}

impl IsTransient for CommandError {
    fn is_transient(&self) -> bool {
        matches!(self, CommandError::Storage(e) if e.is_transient())
    }
}
