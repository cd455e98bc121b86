use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::repository::{CatalogWriter, OrderStore, StoreError};
use crate::domain::order::{
    Country, Customer, Email, ListInput, Order, OrderAggregate, OrderChanges, OrderLine, Payment,
    PaymentMethod, Shipment, ShippingMethod, Variant, Zone,
};

// ============================================================================
// In-Memory Order Store
// ============================================================================
//
// Used by tests and by the demo binary when no database is configured.
// A single write lock around all state makes every commit atomic: all guards
// are checked before the first mutation is applied.
//
// ============================================================================

#[derive(Default)]
struct MemoryState {
    orders: HashMap<Uuid, Order>,
    creation_order: Vec<Uuid>,
    lines: Vec<OrderLine>,
    variants: HashMap<Uuid, Variant>,
    customers: HashMap<Uuid, Customer>,
    shipments: HashMap<Uuid, Shipment>,
    payments: HashMap<Uuid, Payment>,
    countries: HashMap<Uuid, Country>,
    zones: HashMap<Uuid, Zone>,
    shipping_methods: HashMap<Uuid, ShippingMethod>,
    payment_methods: HashMap<Uuid, PaymentMethod>,
}

impl MemoryState {
    fn aggregate(&self, order: &Order) -> OrderAggregate {
        OrderAggregate {
            order: order.clone(),
            lines: self.lines.iter().filter(|l| l.order_id == order.id).cloned().collect(),
            customer: order.customer_id.and_then(|id| self.customers.get(&id).cloned()),
            shipment: order.shipment_id.and_then(|id| self.shipments.get(&id).cloned()),
            payment: order.payment_id.and_then(|id| self.payments.get(&id).cloned()),
        }
    }
}

#[derive(Default)]
pub struct InMemoryOrderStore {
    state: RwLock<MemoryState>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Reference data is owned by catalog management; these seed it.

    pub async fn insert_variant(&self, variant: Variant) {
        self.state.write().await.variants.insert(variant.id, variant);
    }

    pub async fn insert_customer(&self, customer: Customer) {
        self.state.write().await.customers.insert(customer.id, customer);
    }

    pub async fn insert_country(&self, country: Country) {
        self.state.write().await.countries.insert(country.id, country);
    }

    pub async fn insert_zone(&self, zone: Zone) {
        self.state.write().await.zones.insert(zone.id, zone);
    }

    pub async fn insert_shipping_method(&self, method: ShippingMethod) {
        self.state.write().await.shipping_methods.insert(method.id, method);
    }

    pub async fn insert_payment_method(&self, method: PaymentMethod) {
        self.state.write().await.payment_methods.insert(method.id, method);
    }

    pub async fn set_variant_price(&self, variant_id: Uuid, price: i64) {
        if let Some(variant) = self.state.write().await.variants.get_mut(&variant_id) {
            variant.price = price;
        }
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn create_order(&self) -> Result<Order, StoreError> {
        let mut state = self.state.write().await;
        let order = Order::new((state.orders.len() + 1).to_string());
        state.creation_order.push(order.id);
        state.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn load_order(&self, order_id: Uuid) -> Result<Option<OrderAggregate>, StoreError> {
        let state = self.state.read().await;
        Ok(state.orders.get(&order_id).map(|order| state.aggregate(order)))
    }

    async fn load_order_by_code(&self, code: &str) -> Result<Option<OrderAggregate>, StoreError> {
        let state = self.state.read().await;
        Ok(state.orders.values().find(|o| o.code == code).map(|order| state.aggregate(order)))
    }

    async fn list_orders(&self, window: ListInput) -> Result<Vec<Order>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .creation_order
            .iter()
            .skip(window.skip)
            .take(window.take)
            .filter_map(|id| state.orders.get(id).cloned())
            .collect())
    }

    async fn find_line(&self, line_id: Uuid) -> Result<Option<OrderLine>, StoreError> {
        Ok(self.state.read().await.lines.iter().find(|l| l.id == line_id).cloned())
    }

    async fn find_variant(&self, variant_id: Uuid) -> Result<Option<Variant>, StoreError> {
        Ok(self.state.read().await.variants.get(&variant_id).cloned())
    }

    async fn find_customer_by_email(&self, email: &Email) -> Result<Option<Customer>, StoreError> {
        Ok(self.state.read().await.customers.values().find(|c| &c.email == email).cloned())
    }

    async fn find_country_by_code(&self, code: &str) -> Result<Option<Country>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .countries
            .values()
            .find(|c| c.code.eq_ignore_ascii_case(code))
            .cloned())
    }

    async fn find_shipping_methods_for_country(&self, country_id: Uuid) -> Result<Vec<ShippingMethod>, StoreError> {
        let state = self.state.read().await;
        let mut methods: Vec<ShippingMethod> = state
            .shipping_methods
            .values()
            .filter(|m| m.enabled)
            .filter(|m| {
                state
                    .zones
                    .get(&m.zone_id)
                    .is_some_and(|zone| zone.country_ids.contains(&country_id))
            })
            .cloned()
            .collect();
        methods.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(methods)
    }

    async fn find_shipping_method(&self, method_id: Uuid) -> Result<Option<ShippingMethod>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .shipping_methods
            .get(&method_id)
            .filter(|m| m.enabled)
            .cloned())
    }

    async fn find_payment_method(&self, method_id: Uuid) -> Result<Option<PaymentMethod>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .payment_methods
            .get(&method_id)
            .filter(|m| m.enabled)
            .cloned())
    }

    async fn commit(&self, changes: OrderChanges) -> Result<(), StoreError> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let order_id = changes.order.id;

        // Guards first, so a failure leaves nothing half-applied.
        let current = state.orders.get(&order_id).ok_or(StoreError::MissingOrder(order_id))?;
        if current.version != changes.expected_version {
            return Err(StoreError::Conflict {
                order_id,
                expected: changes.expected_version,
                actual: current.version,
            });
        }

        if let Some(customer) = &changes.new_customer {
            if state.customers.values().any(|c| c.email == customer.email && c.id != customer.id) {
                return Err(StoreError::CustomerEmailTaken(customer.email.to_string()));
            }
        }

        let mut requested: HashMap<Uuid, u32> = HashMap::new();
        for decrement in &changes.stock_decrements {
            let total = requested.entry(decrement.variant_id).or_default();
            *total = total.saturating_add(decrement.quantity);
        }
        for (variant_id, quantity) in &requested {
            let variant = state.variants.get(variant_id).ok_or(StoreError::MissingVariant(*variant_id))?;
            if variant.stock < *quantity {
                return Err(StoreError::InsufficientStock {
                    variant_id: *variant_id,
                    requested: *quantity,
                    available: variant.stock,
                });
            }
        }

        // Apply
        for (variant_id, quantity) in requested {
            if let Some(variant) = state.variants.get_mut(&variant_id) {
                variant.stock -= quantity;
            }
        }

        if let Some(customer) = changes.new_customer {
            state.customers.insert(customer.id, customer);
        }

        state.lines.retain(|line| !changes.removed_line_ids.contains(&line.id));
        for line in changes.upserted_lines {
            match state.lines.iter_mut().find(|l| l.id == line.id) {
                Some(existing) => *existing = line,
                None => state.lines.push(line),
            }
        }

        if let Some(shipment) = changes.shipment {
            state.shipments.retain(|id, s| s.order_id != order_id || *id == shipment.id);
            state.shipments.insert(shipment.id, shipment);
        }

        if let Some(payment) = changes.payment {
            state.payments.insert(payment.id, payment);
        }

        state.orders.insert(order_id, changes.order);

        tracing::debug!(order_id = %order_id, "Committed order changes to memory store");
        Ok(())
    }
}

#[async_trait]
impl CatalogWriter for InMemoryOrderStore {
    async fn upsert_variant(&self, variant: &Variant) -> Result<(), StoreError> {
        self.insert_variant(variant.clone()).await;
        Ok(())
    }

    async fn upsert_country(&self, country: &Country) -> Result<(), StoreError> {
        self.insert_country(country.clone()).await;
        Ok(())
    }

    async fn upsert_zone(&self, zone: &Zone) -> Result<(), StoreError> {
        self.insert_zone(zone.clone()).await;
        Ok(())
    }

    async fn upsert_shipping_method(&self, method: &ShippingMethod) -> Result<(), StoreError> {
        self.insert_shipping_method(method.clone()).await;
        Ok(())
    }

    async fn upsert_payment_method(&self, method: &PaymentMethod) -> Result<(), StoreError> {
        self.insert_payment_method(method.clone()).await;
        Ok(())
    }
}
