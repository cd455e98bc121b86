use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::aggregate::OrderAggregate;
use super::entities::{Order, PricedShippingMethod};
use super::value_objects::{Address, ListInput, OrderLookup};

// ============================================================================
// Order Commands - Represent caller intent
// ============================================================================

#[derive(Debug, Clone)]
pub enum OrderCommand {
    CreateOrder,
    AddLine {
        order_id: Uuid,
        variant_id: Uuid,
        quantity: u32,
    },
    UpdateLine {
        line_id: Uuid,
        quantity: u32,
    },
    RemoveLine {
        line_id: Uuid,
    },
    AddCustomer {
        order_id: Uuid,
        customer: CustomerInput,
    },
    AddShippingAddress {
        order_id: Uuid,
        address: Address,
    },
    FindAvailableShippingMethods {
        order_id: Uuid,
    },
    AddShipment {
        order_id: Uuid,
        method_id: Uuid,
    },
    AddPayment {
        order_id: Uuid,
        method_id: Uuid,
        metadata: serde_json::Value,
    },
    AuthorizePayment {
        order_id: Uuid,
    },
    MarkAsShipped {
        order_id: Uuid,
        tracking_code: String,
        carrier: String,
    },
    MarkAsDelivered {
        order_id: Uuid,
    },
    CancelOrder {
        order_id: Uuid,
    },
    FindOrder(OrderLookup),
    ListOrders(ListInput),
}

impl OrderCommand {
    /// Stable name used for logging and metrics labels.
    pub fn name(&self) -> &'static str {
        match self {
            OrderCommand::CreateOrder => "create_order",
            OrderCommand::AddLine { .. } => "add_line",
            OrderCommand::UpdateLine { .. } => "update_line",
            OrderCommand::RemoveLine { .. } => "remove_line",
            OrderCommand::AddCustomer { .. } => "add_customer",
            OrderCommand::AddShippingAddress { .. } => "add_shipping_address",
            OrderCommand::FindAvailableShippingMethods { .. } => "find_available_shipping_methods",
            OrderCommand::AddShipment { .. } => "add_shipment",
            OrderCommand::AddPayment { .. } => "add_payment",
            OrderCommand::AuthorizePayment { .. } => "authorize_payment",
            OrderCommand::MarkAsShipped { .. } => "mark_as_shipped",
            OrderCommand::MarkAsDelivered { .. } => "mark_as_delivered",
            OrderCommand::CancelOrder { .. } => "cancel_order",
            OrderCommand::FindOrder(_) => "find_order",
            OrderCommand::ListOrders(_) => "list_orders",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerInput {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
}

/// What a dispatched command returns.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Order(Box<OrderAggregate>),
    Orders(Vec<Order>),
    ShippingMethods(Vec<PricedShippingMethod>),
}

impl CommandOutcome {
    pub fn into_order(self) -> Option<OrderAggregate> {
        match self {
            CommandOutcome::Order(aggregate) => Some(*aggregate),
            _ => None,
        }
    }
}
