use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::value_objects::Money;

// ============================================================================
// Order Events - lifecycle notifications handed to the event sink
// ============================================================================

/// Order Event - Union type for all order lifecycle events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    Paid(OrderPaid),
    Shipped(OrderShipped),
    Delivered(OrderDelivered),
    Cancelled(OrderCancelled),
}

impl OrderEvent {
    pub fn order_id(&self) -> Uuid {
        match self {
            OrderEvent::Paid(e) => e.order_id,
            OrderEvent::Shipped(e) => e.order_id,
            OrderEvent::Delivered(e) => e.order_id,
            OrderEvent::Cancelled(e) => e.order_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::Paid(_) => "OrderPaid",
            OrderEvent::Shipped(_) => "OrderShipped",
            OrderEvent::Delivered(_) => "OrderDelivered",
            OrderEvent::Cancelled(_) => "OrderCancelled",
        }
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::Paid(e) => e.paid_at,
            OrderEvent::Shipped(e) => e.shipped_at,
            OrderEvent::Delivered(e) => e.delivered_at,
            OrderEvent::Cancelled(e) => e.cancelled_at,
        }
    }
}

// ============================================================================
// Individual Event Types
// ============================================================================

/// Order Paid - payment created or authorized, stock committed
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderPaid {
    pub order_id: Uuid,
    pub order_code: String,
    pub amount: Money,
    pub authorized: bool,
    pub paid_at: DateTime<Utc>,
}

/// Order Shipped - handed to the carrier
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderShipped {
    pub order_id: Uuid,
    pub tracking_code: String,
    pub carrier: String,
    pub shipped_at: DateTime<Utc>,
}

/// Order Delivered - lifecycle completed
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderDelivered {
    pub order_id: Uuid,
    pub delivered_at: DateTime<Utc>,
}

/// Order Cancelled - lifecycle ended early
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderCancelled {
    pub order_id: Uuid,
    pub cancelled_at: DateTime<Utc>,
}
