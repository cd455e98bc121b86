use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::OrderError;
use super::value_objects::OrderState;

// ============================================================================
// Order State Machine
// ============================================================================
//
// Two independent gates guard every mutating command:
// 1. Action permission - may this category of command run right now?
// 2. Transition validity - is (from, to) an edge of the state graph?
//
// Both are pure functions so they can be checked and tested in isolation.
//
// ============================================================================

/// Category of command checked by the action permission gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderAction {
    Modify,
    AddCustomer,
    AddShippingAddress,
    AddShipment,
    AddPayment,
    AuthorizePayment,
    MarkAsShipped,
    MarkAsDelivered,
    Cancel,
}

impl fmt::Display for OrderAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OrderAction::Modify => "modify",
            OrderAction::AddCustomer => "add_customer",
            OrderAction::AddShippingAddress => "add_shipping_address",
            OrderAction::AddShipment => "add_shipment",
            OrderAction::AddPayment => "add_payment",
            OrderAction::AuthorizePayment => "authorize_payment",
            OrderAction::MarkAsShipped => "mark_as_shipped",
            OrderAction::MarkAsDelivered => "mark_as_delivered",
            OrderAction::Cancel => "cancel",
        };
        f.write_str(name)
    }
}

/// Facts about an order that the permission gate depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderFacts {
    pub state: OrderState,
    pub has_customer: bool,
    pub has_shipping_address: bool,
    pub has_shipment: bool,
}

/// Action permission gate.
pub fn can_perform(facts: &OrderFacts, action: OrderAction) -> bool {
    use OrderState::*;

    match action {
        OrderAction::Modify | OrderAction::AddCustomer | OrderAction::AddShippingAddress => {
            facts.state == Modifying
        }
        OrderAction::AddShipment => facts.state == Modifying && facts.has_shipping_address,
        OrderAction::AddPayment => {
            facts.state == Modifying && facts.has_customer && facts.has_shipment
        }
        OrderAction::AuthorizePayment => facts.state == PaymentAdded,
        OrderAction::MarkAsShipped => facts.state == PaymentAuthorized,
        OrderAction::MarkAsDelivered => facts.state == Shipped,
        OrderAction::Cancel => facts.state != Canceled,
    }
}

pub fn ensure_can_perform(facts: &OrderFacts, action: OrderAction) -> Result<(), OrderError> {
    if can_perform(facts, action) {
        Ok(())
    } else {
        Err(OrderError::ForbiddenAction { action, state: facts.state })
    }
}

/// Transition edge table.
pub fn can_transition(from: OrderState, to: OrderState) -> bool {
    use OrderState::*;

    matches!(
        (from, to),
        (Modifying, PaymentAdded)
            | (Modifying, PaymentAuthorized)
            | (PaymentAdded, PaymentAuthorized)
            | (PaymentAuthorized, Shipped)
            | (Shipped, Delivered)
    ) || (to == Canceled && from != Canceled)
}

/// Transition validity gate: the edge must exist, and payment states need a customer
/// and a shipment on the freshly loaded order.
pub fn ensure_transition(facts: &OrderFacts, to: OrderState) -> Result<(), OrderError> {
    let from = facts.state;

    if !can_transition(from, to) {
        return Err(OrderError::InvalidTransition { from, to, reason: "no such edge" });
    }

    if matches!(to, OrderState::PaymentAdded | OrderState::PaymentAuthorized) {
        if !facts.has_customer {
            return Err(OrderError::InvalidTransition { from, to, reason: "order has no customer" });
        }
        if !facts.has_shipment {
            return Err(OrderError::InvalidTransition { from, to, reason: "order has no shipment" });
        }
    }

    Ok(())
}

// ============================================================================
// Unit Tests
// ============================================================================
