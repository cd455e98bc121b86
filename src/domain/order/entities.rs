use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::value_objects::{Address, Email, Money, OrderState};

// ============================================================================
// Order Entities - rows owned by the order aggregate
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub code: String,
    pub state: OrderState,
    pub customer_id: Option<Uuid>,
    pub shipping_address: Option<Address>,
    pub shipment_id: Option<Uuid>,
    pub payment_id: Option<Uuid>,
    pub subtotal: Money,
    pub total: Money,
    pub total_quantity: u32,
    pub placed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency counter, bumped by every commit
    pub version: i64,
}

impl Order {
    /// New empty order in the initial state.
    pub fn new(code: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            code: code.into(),
            state: OrderState::Modifying,
            customer_id: None,
            shipping_address: None,
            shipment_id: None,
            payment_id: None,
            subtotal: 0,
            total: 0,
            total_quantity: 0,
            placed_at: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    pub id: Uuid,
    pub order_id: Uuid,
    pub variant_id: Uuid,
    pub quantity: u32,
    pub unit_price: Money,
    pub line_price: Money,
}

impl OrderLine {
    /// Price a line from the variant's current price.
    pub fn priced(order_id: Uuid, variant: &Variant, quantity: u32) -> Self {
        let mut line = Self {
            id: Uuid::new_v4(),
            order_id,
            variant_id: variant.id,
            quantity,
            unit_price: 0,
            line_price: 0,
        };
        line.reprice(variant, quantity);
        line
    }

    /// Snapshot the variant's current price for the given quantity.
    pub fn reprice(&mut self, variant: &Variant, quantity: u32) {
        self.quantity = quantity;
        self.unit_price = variant.price;
        self.line_price = variant.price * Money::from(quantity);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    pub id: Uuid,
    pub sku: String,
    pub stock: u32,
    pub price: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shipment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub amount: Money,
    pub method: String,
    pub tracking_code: Option<String>,
    pub carrier: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub amount: Money,
    /// Payment method the provider was resolved from
    pub method_id: Uuid,
    pub method: String,
    pub transaction_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: Uuid,
    pub email: Email,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub enabled: bool,
}

// ============================================================================
// Reference Data - read-only from the order engine's perspective
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Country {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Zone {
    pub id: Uuid,
    pub name: String,
    pub country_ids: Vec<Uuid>,
}

/// Which calculator prices a shipping method, and with what arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceCalculatorConfig {
    pub code: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingMethod {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub zone_id: Uuid,
    pub price_calculator: PriceCalculatorConfig,
    pub enabled: bool,
}

/// A shipping method annotated with its price for a specific order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricedShippingMethod {
    #[serde(flatten)]
    pub method: ShippingMethod,
    pub price: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMethod {
    pub id: Uuid,
    pub name: String,
    pub handler_code: String,
    pub enabled: bool,
}
