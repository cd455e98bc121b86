use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::order::{
    Country, Customer, Email, ListInput, Order, OrderAggregate, OrderChanges, OrderLine, PaymentMethod,
    ShippingMethod, Variant, Zone,
};
use crate::utils::IsTransient;

// ============================================================================
// Order Store - persistence port for the order aggregate
// ============================================================================
//
// Responsibilities:
// 1. Load the whole aggregate (order + lines + customer + shipment + payment)
// 2. Serve read-only reference data (variants, countries, zones, methods)
// 3. Commit one command's changes atomically, guarded by the order version
//    and by per-variant stock checks
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Concurrency conflict on order {order_id}: expected version {expected}, found {actual}")]
    Conflict { order_id: Uuid, expected: i64, actual: i64 },

    #[error("Insufficient stock for variant {variant_id}: requested {requested}, available {available}")]
    InsufficientStock {
        variant_id: Uuid,
        requested: u32,
        available: u32,
    },

    /// Another commit created a customer with this email first.
    #[error("Customer email already registered: {0}")]
    CustomerEmailTaken(String),

    #[error("Order row missing at commit: {0}")]
    MissingOrder(Uuid),

    #[error("Variant row missing at commit: {0}")]
    MissingVariant(Uuid),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl IsTransient for StoreError {
    fn is_transient(&self) -> bool {
        match self {
            StoreError::Conflict { .. } | StoreError::CustomerEmailTaken(_) => true,
            StoreError::Database(e) => matches!(e, sqlx::Error::PoolTimedOut | sqlx::Error::Io(_)),
            _ => false,
        }
    }
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert a new empty order with the next sequential code.
    async fn create_order(&self) -> Result<Order, StoreError>;

    async fn load_order(&self, order_id: Uuid) -> Result<Option<OrderAggregate>, StoreError>;

    async fn load_order_by_code(&self, code: &str) -> Result<Option<OrderAggregate>, StoreError>;

    /// Orders in creation order.
    async fn list_orders(&self, window: ListInput) -> Result<Vec<Order>, StoreError>;

    async fn find_line(&self, line_id: Uuid) -> Result<Option<OrderLine>, StoreError>;

    async fn find_variant(&self, variant_id: Uuid) -> Result<Option<Variant>, StoreError>;

    async fn find_customer_by_email(&self, email: &Email) -> Result<Option<Customer>, StoreError>;

    async fn find_country_by_code(&self, code: &str) -> Result<Option<Country>, StoreError>;

    /// Enabled shipping methods whose zone contains the country.
    async fn find_shipping_methods_for_country(&self, country_id: Uuid) -> Result<Vec<ShippingMethod>, StoreError>;

    /// Enabled shipping method by id.
    async fn find_shipping_method(&self, method_id: Uuid) -> Result<Option<ShippingMethod>, StoreError>;

    /// Enabled payment method by id.
    async fn find_payment_method(&self, method_id: Uuid) -> Result<Option<PaymentMethod>, StoreError>;

    /// Apply every change of one command, or none of them.
    async fn commit(&self, changes: OrderChanges) -> Result<(), StoreError>;
}

/// Write side of the reference data the engine reads. Catalog management owns
/// these rows; the engine only uses this port to seed demo and test data.
#[async_trait]
pub trait CatalogWriter: Send + Sync {
    async fn upsert_variant(&self, variant: &Variant) -> Result<(), StoreError>;

    async fn upsert_country(&self, country: &Country) -> Result<(), StoreError>;

    /// Replaces the zone's member countries.
    async fn upsert_zone(&self, zone: &Zone) -> Result<(), StoreError>;

    async fn upsert_shipping_method(&self, method: &ShippingMethod) -> Result<(), StoreError>;

    async fn upsert_payment_method(&self, method: &PaymentMethod) -> Result<(), StoreError>;
}
