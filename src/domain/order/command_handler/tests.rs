use async_trait::async_trait;
use futures_util::future::join_all;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::OrderCommandHandler;
use crate::domain::order::{
    Address, CommandError, CommandOutcome, Country, Customer, CustomerInput, Email, ErrorCode, ListInput, Money,
    Order, OrderAggregate, OrderChanges, OrderCommand, OrderEvent, OrderLine, OrderLookup, OrderState, PaymentMethod,
    PriceCalculatorConfig, ShippingMethod, Variant, Zone,
};
use crate::messaging::{EventSink, InMemoryEventSink};
use crate::metrics::Metrics;
use crate::store::{InMemoryOrderStore, OrderStore, StoreError};
use crate::strategies::{
    AuthorizePaymentResult, CreatePaymentResult, FlatPriceCalculator, PaymentHandler, PaymentHandlers,
    ShippingCalculators, Strategy, TestPaymentHandler,
};
use crate::utils::RetryConfig;

// ============================================================================
// Fixture
// ============================================================================

const STOCK: u32 = 10;
const PRICE: Money = 500;
const SHIPPING: Money = 300;

struct Fixture {
    store: Arc<InMemoryOrderStore>,
    sink: Arc<InMemoryEventSink>,
    metrics: Arc<Metrics>,
    engine: OrderCommandHandler,
    variant: Variant,
    country: Country,
    zone: Zone,
    shipping_method: ShippingMethod,
    test_payment: Uuid,
}

impl Fixture {
    async fn new() -> Self {
        let store = Arc::new(InMemoryOrderStore::new());
        Self::build(store.clone(), store, Arc::new(InMemoryEventSink::new())).await
    }

    /// `engine_store` may wrap `store`; reference data is seeded into `store`.
    async fn build(
        store: Arc<InMemoryOrderStore>,
        engine_store: Arc<dyn OrderStore>,
        sink: Arc<InMemoryEventSink>,
    ) -> Self {
        let variant = Variant { id: Uuid::new_v4(), sku: "TSHIRT-M".to_string(), stock: STOCK, price: PRICE };
        store.insert_variant(variant.clone()).await;

        let country = Country { id: Uuid::new_v4(), code: "US".to_string(), name: "United States".to_string(), enabled: true };
        store.insert_country(country.clone()).await;

        let zone = Zone { id: Uuid::new_v4(), name: "North America".to_string(), country_ids: vec![country.id] };
        store.insert_zone(zone.clone()).await;

        let shipping_method = shipping_method(zone.id, "Standard", FlatPriceCalculator::CODE, SHIPPING);
        store.insert_shipping_method(shipping_method.clone()).await;

        let metrics = Arc::new(Metrics::new().unwrap());
        let engine = engine(engine_store, sink.clone() as Arc<dyn EventSink>, metrics.clone());

        let fixture = Self {
            store,
            sink,
            metrics,
            engine,
            variant,
            country,
            zone,
            shipping_method,
            test_payment: Uuid::nil(),
        };
        let test_payment = fixture.payment_method(TestPaymentHandler::CODE).await;
        Self { test_payment, ..fixture }
    }

    async fn payment_method(&self, handler_code: &str) -> Uuid {
        let method = PaymentMethod {
            id: Uuid::new_v4(),
            name: format!("{handler_code} method"),
            handler_code: handler_code.to_string(),
            enabled: true,
        };
        self.store.insert_payment_method(method.clone()).await;
        method.id
    }

    async fn stock(&self, variant_id: Uuid) -> u32 {
        self.store.find_variant(variant_id).await.unwrap().unwrap().stock
    }

    async fn load(&self, order_id: Uuid) -> OrderAggregate {
        self.store.load_order(order_id).await.unwrap().unwrap()
    }

    async fn order_with_line(&self, variant_id: Uuid, quantity: u32) -> Uuid {
        let order_id = self.engine.create_order().await.unwrap().id();
        self.engine.add_line(order_id, variant_id, quantity).await.unwrap();
        order_id
    }

    /// Line, customer, address and shipment in place.
    async fn ready_to_pay(&self, variant_id: Uuid, quantity: u32) -> Uuid {
        let order_id = self.order_with_line(variant_id, quantity).await;
        self.engine.add_customer(order_id, customer_input("ada@example.com")).await.unwrap();
        self.engine.add_shipping_address(order_id, address(&self.country.code)).await.unwrap();
        self.engine.add_shipment(order_id, self.shipping_method.id).await.unwrap();
        order_id
    }

    async fn paid(&self) -> Uuid {
        let order_id = self.ready_to_pay(self.variant.id, 2).await;
        self.engine.add_payment(order_id, self.test_payment, serde_json::json!({})).await.unwrap();
        order_id
    }
}

fn engine(store: Arc<dyn OrderStore>, sink: Arc<dyn EventSink>, metrics: Arc<Metrics>) -> OrderCommandHandler {
    let payment_handlers = PaymentHandlers::new()
        .with(Arc::new(TestPaymentHandler))
        .with(Arc::new(FailingHandler))
        .with(Arc::new(PanickingHandler))
        .with(Arc::new(SlowHandler));
    let shipping_calculators = ShippingCalculators::new().with(Arc::new(FlatPriceCalculator));

    OrderCommandHandler::new(store, sink, payment_handlers, shipping_calculators, metrics)
        .with_payment_timeout(Duration::from_millis(50))
        .with_conflict_retry(RetryConfig::conflicts(3))
}

fn shipping_method(zone_id: Uuid, name: &str, calculator: &str, price: Money) -> ShippingMethod {
    ShippingMethod {
        id: Uuid::new_v4(),
        name: name.to_string(),
        description: None,
        zone_id,
        price_calculator: PriceCalculatorConfig {
            code: calculator.to_string(),
            args: serde_json::json!({ "price": price }),
        },
        enabled: true,
    }
}

fn customer_input(email: &str) -> CustomerInput {
    CustomerInput {
        email: email.to_string(),
        first_name: "Ada".to_string(),
        last_name: "Lovelace".to_string(),
        phone: None,
    }
}

fn address(country_code: &str) -> Address {
    Address {
        full_name: "Ada Lovelace".to_string(),
        street_line_1: "12 Analytical Way".to_string(),
        street_line_2: None,
        city: "Springfield".to_string(),
        province: None,
        postal_code: "62701".to_string(),
        country_code: country_code.to_string(),
        phone_number: None,
    }
}

fn code_of<T: std::fmt::Debug>(result: Result<T, CommandError>) -> ErrorCode {
    match result {
        Err(e) => e.code().unwrap_or_else(|| panic!("expected a domain error, got {e:?}")),
        Ok(value) => panic!("expected an error, got {value:?}"),
    }
}

// ============================================================================
// Test Collaborators
// ============================================================================

struct FailingHandler;

impl Strategy for FailingHandler {
    fn code(&self) -> &str {
        "broken"
    }
}

#[async_trait]
impl PaymentHandler for FailingHandler {
    fn name(&self) -> &str {
        "Broken gateway"
    }

    async fn create_payment(&self, _: &OrderAggregate, _: Money, _: &serde_json::Value) -> anyhow::Result<CreatePaymentResult> {
        Err(anyhow::anyhow!("gateway unreachable"))
    }

    async fn authorize_payment(&self, _: &OrderAggregate) -> anyhow::Result<AuthorizePaymentResult> {
        Err(anyhow::anyhow!("gateway unreachable"))
    }
}

struct PanickingHandler;

impl Strategy for PanickingHandler {
    fn code(&self) -> &str {
        "panics"
    }
}

#[async_trait]
impl PaymentHandler for PanickingHandler {
    fn name(&self) -> &str {
        "Panicking gateway"
    }

    async fn create_payment(&self, _: &OrderAggregate, _: Money, _: &serde_json::Value) -> anyhow::Result<CreatePaymentResult> {
        panic!("card parser exploded")
    }

    async fn authorize_payment(&self, _: &OrderAggregate) -> anyhow::Result<AuthorizePaymentResult> {
        panic!("card parser exploded")
    }
}

struct SlowHandler;

impl Strategy for SlowHandler {
    fn code(&self) -> &str {
        "slow"
    }
}

#[async_trait]
impl PaymentHandler for SlowHandler {
    fn name(&self) -> &str {
        "Slow gateway"
    }

    async fn create_payment(&self, _: &OrderAggregate, amount: Money, _: &serde_json::Value) -> anyhow::Result<CreatePaymentResult> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(CreatePaymentResult::Created { amount })
    }

    async fn authorize_payment(&self, _: &OrderAggregate) -> anyhow::Result<AuthorizePaymentResult> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(AuthorizePaymentResult { success: true, error: None })
    }
}

struct RejectingSink;

#[async_trait]
impl EventSink for RejectingSink {
    async fn emit(&self, _event: &OrderEvent) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("broker unavailable"))
    }
}

/// Delegates to an in-memory store but reports a version conflict for the
/// next `conflicts` commits.
struct FlakyStore {
    inner: Arc<InMemoryOrderStore>,
    conflicts: AtomicU32,
}

#[async_trait]
impl OrderStore for FlakyStore {
    async fn create_order(&self) -> Result<Order, StoreError> {
        self.inner.create_order().await
    }

    async fn load_order(&self, order_id: Uuid) -> Result<Option<OrderAggregate>, StoreError> {
        self.inner.load_order(order_id).await
    }

    async fn load_order_by_code(&self, code: &str) -> Result<Option<OrderAggregate>, StoreError> {
        self.inner.load_order_by_code(code).await
    }

    async fn list_orders(&self, window: ListInput) -> Result<Vec<Order>, StoreError> {
        self.inner.list_orders(window).await
    }

    async fn find_line(&self, line_id: Uuid) -> Result<Option<OrderLine>, StoreError> {
        self.inner.find_line(line_id).await
    }

    async fn find_variant(&self, variant_id: Uuid) -> Result<Option<Variant>, StoreError> {
        self.inner.find_variant(variant_id).await
    }

    async fn find_customer_by_email(&self, email: &Email) -> Result<Option<Customer>, StoreError> {
        let found = self.inner.find_customer_by_email(email).await;
        // Let a concurrent command run between this lookup and its commit.
        tokio::task::yield_now().await;
        found
    }

    async fn find_country_by_code(&self, code: &str) -> Result<Option<Country>, StoreError> {
        self.inner.find_country_by_code(code).await
    }

    async fn find_shipping_methods_for_country(&self, country_id: Uuid) -> Result<Vec<ShippingMethod>, StoreError> {
        self.inner.find_shipping_methods_for_country(country_id).await
    }

    async fn find_shipping_method(&self, method_id: Uuid) -> Result<Option<ShippingMethod>, StoreError> {
        self.inner.find_shipping_method(method_id).await
    }

    async fn find_payment_method(&self, method_id: Uuid) -> Result<Option<PaymentMethod>, StoreError> {
        self.inner.find_payment_method(method_id).await
    }

    async fn commit(&self, changes: OrderChanges) -> Result<(), StoreError> {
        let pending = self.conflicts.load(Ordering::SeqCst);
        if pending > 0 {
            self.conflicts.store(pending - 1, Ordering::SeqCst);
            return Err(StoreError::Conflict {
                order_id: changes.order.id,
                expected: changes.expected_version,
                actual: changes.expected_version + 1,
            });
        }
        self.inner.commit(changes).await
    }
}

// ============================================================================
// Checkout Scenarios
// ============================================================================

#[tokio::test]
async fn test_checkout_scenario_commits_stock_and_emits_once() {
    let f = Fixture::new().await;
    let order_id = f.engine.create_order().await.unwrap().id();

    let order = f.engine.add_line(order_id, f.variant.id, 2).await.unwrap();
    assert_eq!(order.lines.len(), 1);
    assert_eq!(order.lines[0].unit_price, 500);
    assert_eq!(order.lines[0].line_price, 1000);
    assert!(order.totals_consistent());
    assert_eq!(f.stock(f.variant.id).await, 10, "adding a line reserves nothing");

    f.engine.add_customer(order_id, customer_input("ada@example.com")).await.unwrap();
    f.engine.add_shipping_address(order_id, address("US")).await.unwrap();

    let order = f.engine.add_shipment(order_id, f.shipping_method.id).await.unwrap();
    assert_eq!(order.order.subtotal, 1000);
    assert_eq!(order.order.total, 1300);
    assert!(order.totals_consistent());

    let order = f.engine.add_payment(order_id, f.test_payment, serde_json::json!({})).await.unwrap();
    assert_eq!(order.state(), OrderState::PaymentAuthorized);
    assert!(order.order.placed_at.is_some());
    assert!(order.payment.as_ref().unwrap().transaction_id.is_some());
    assert_eq!(order.payment.as_ref().unwrap().amount, 1300);
    assert!(order.totals_consistent());
    assert_eq!(f.stock(f.variant.id).await, 8);

    assert_eq!(f.sink.count("OrderPaid"), 1);
    match &f.sink.events()[0] {
        OrderEvent::Paid(paid) => {
            assert_eq!(paid.order_id, order_id);
            assert_eq!(paid.amount, 1300);
            assert!(paid.authorized);
        }
        other => panic!("expected OrderPaid, got {other:?}"),
    }

    let stored = f.load(order_id).await;
    assert_eq!(stored, order);
}

#[tokio::test]
async fn test_add_line_beyond_stock_leaves_no_line() {
    let f = Fixture::new().await;
    let order_id = f.engine.create_order().await.unwrap().id();

    let result = f.engine.add_line(order_id, f.variant.id, 11).await;
    assert_eq!(code_of(result), ErrorCode::NotEnoughStock);

    let order = f.load(order_id).await;
    assert!(order.lines.is_empty());
    assert_eq!(order.order.total, 0);
    assert_eq!(order.order.version, 0);
}

#[tokio::test]
async fn test_fulfilment_runs_through_delivery() {
    let f = Fixture::new().await;
    let order_id = f.paid().await;

    let early = f.engine.mark_as_delivered(order_id).await;
    assert_eq!(code_of(early), ErrorCode::ForbiddenOrderAction);

    let shipped = f
        .engine
        .mark_as_shipped(order_id, "1Z999".to_string(), "UPS".to_string())
        .await
        .unwrap();
    assert_eq!(shipped.state(), OrderState::Shipped);
    let shipment = shipped.shipment.as_ref().unwrap();
    assert_eq!(shipment.tracking_code.as_deref(), Some("1Z999"));
    assert_eq!(shipment.carrier.as_deref(), Some("UPS"));

    let delivered = f.engine.mark_as_delivered(order_id).await.unwrap();
    assert_eq!(delivered.state(), OrderState::Delivered);
    assert!(delivered.totals_consistent());

    let types: Vec<_> = f.sink.events().iter().map(|e| e.event_type()).collect();
    assert_eq!(types, vec!["OrderPaid", "OrderShipped", "OrderDelivered"]);
}

// ============================================================================
// Line Manager
// ============================================================================

#[tokio::test]
async fn test_add_line_merges_into_existing_variant_line() {
    let f = Fixture::new().await;
    let order_id = f.order_with_line(f.variant.id, 2).await;

    let order = f.engine.add_line(order_id, f.variant.id, 3).await.unwrap();
    assert_eq!(order.lines.len(), 1);
    assert_eq!(order.lines[0].quantity, 5);
    assert_eq!(order.order.subtotal, 2500);
    assert_eq!(order.order.total_quantity, 5);

    // The merged quantity is checked as a whole.
    let result = f.engine.add_line(order_id, f.variant.id, 6).await;
    assert_eq!(code_of(result), ErrorCode::NotEnoughStock);
    assert_eq!(f.load(order_id).await.lines[0].quantity, 5);
}

#[tokio::test]
async fn test_update_line_to_zero_equals_remove() {
    let f = Fixture::new().await;
    let other = Variant { id: Uuid::new_v4(), sku: "MUG".to_string(), stock: 5, price: 900 };
    f.store.insert_variant(other.clone()).await;

    let updated_id = f.order_with_line(f.variant.id, 2).await;
    f.engine.add_line(updated_id, other.id, 1).await.unwrap();
    let removed_id = f.order_with_line(f.variant.id, 2).await;
    f.engine.add_line(removed_id, other.id, 1).await.unwrap();

    let line_of = |order: &OrderAggregate| order.line_for_variant(f.variant.id).unwrap().id;
    let via_update = f.engine.update_line(line_of(&f.load(updated_id).await), 0).await.unwrap();
    let via_remove = f.engine.remove_line(line_of(&f.load(removed_id).await)).await.unwrap();

    for order in [&via_update, &via_remove] {
        assert_eq!(order.lines.len(), 1);
        assert_eq!(order.lines[0].variant_id, other.id);
        assert_eq!(order.order.subtotal, 900);
        assert_eq!(order.order.total_quantity, 1);
        assert!(order.totals_consistent());
    }
}

#[tokio::test]
async fn test_update_line_reprices_at_current_price() {
    let f = Fixture::new().await;
    let order_id = f.order_with_line(f.variant.id, 2).await;
    let line_id = f.load(order_id).await.lines[0].id;

    f.store.set_variant_price(f.variant.id, 650).await;
    let order = f.engine.update_line(line_id, 3).await.unwrap();

    assert_eq!(order.lines[0].unit_price, 650);
    assert_eq!(order.lines[0].line_price, 1950);
    assert_eq!(order.order.subtotal, 1950);

    let result = f.engine.update_line(line_id, 11).await;
    assert_eq!(code_of(result), ErrorCode::NotEnoughStock);
}

#[tokio::test]
async fn test_unknown_references_are_reported() {
    let f = Fixture::new().await;
    let order_id = f.engine.create_order().await.unwrap().id();

    assert_eq!(code_of(f.engine.add_line(Uuid::new_v4(), f.variant.id, 1).await), ErrorCode::OrderNotFound);
    assert_eq!(code_of(f.engine.add_line(order_id, Uuid::new_v4(), 1).await), ErrorCode::VariantNotFound);
    assert_eq!(code_of(f.engine.update_line(Uuid::new_v4(), 1).await), ErrorCode::LineNotFound);
    assert_eq!(code_of(f.engine.remove_line(Uuid::new_v4()).await), ErrorCode::LineNotFound);
}

#[tokio::test]
async fn test_line_edits_are_forbidden_after_payment() {
    let f = Fixture::new().await;
    let order_id = f.paid().await;
    let line_id = f.load(order_id).await.lines[0].id;

    assert_eq!(code_of(f.engine.add_line(order_id, f.variant.id, 1).await), ErrorCode::ForbiddenOrderAction);
    assert_eq!(code_of(f.engine.update_line(line_id, 1).await), ErrorCode::ForbiddenOrderAction);
    assert_eq!(code_of(f.engine.remove_line(line_id).await), ErrorCode::ForbiddenOrderAction);
    assert_eq!(
        code_of(f.engine.add_shipping_address(order_id, address("US")).await),
        ErrorCode::ForbiddenOrderAction
    );
}

// ============================================================================
// Customer & Address
// ============================================================================

#[tokio::test]
async fn test_add_customer_validates_and_reuses_records() {
    let f = Fixture::new().await;
    let order_id = f.engine.create_order().await.unwrap().id();

    let invalid = f.engine.add_customer(order_id, customer_input("not-an-email")).await;
    assert_eq!(code_of(invalid), ErrorCode::CustomerInvalidEmail);

    let disabled = Customer {
        id: Uuid::new_v4(),
        email: Email::parse("blocked@example.com").unwrap(),
        first_name: "Blocked".to_string(),
        last_name: "User".to_string(),
        phone: None,
        enabled: false,
    };
    f.store.insert_customer(disabled).await;
    let refused = f.engine.add_customer(order_id, customer_input("blocked@example.com")).await;
    assert_eq!(code_of(refused), ErrorCode::CustomerDisabled);

    let first = f.engine.add_customer(order_id, customer_input("Ada@Example.com")).await.unwrap();
    let created = first.customer.clone().unwrap();
    assert_eq!(created.email.as_str(), "ada@example.com");
    assert_eq!(first.order.customer_id, Some(created.id));

    let other_order = f.engine.create_order().await.unwrap().id();
    let second = f.engine.add_customer(other_order, customer_input("ada@example.com")).await.unwrap();
    assert_eq!(second.customer.unwrap().id, created.id, "existing customer is attached, not duplicated");
}

#[tokio::test]
async fn test_shipping_address_requires_enabled_country() {
    let f = Fixture::new().await;
    let order_id = f.engine.create_order().await.unwrap().id();

    let unknown = f.engine.add_shipping_address(order_id, address("ZZ")).await;
    assert_eq!(code_of(unknown), ErrorCode::CountryNotFound);

    let closed = Country { id: Uuid::new_v4(), code: "FR".to_string(), name: "France".to_string(), enabled: false };
    f.store.insert_country(closed).await;
    let disabled = f.engine.add_shipping_address(order_id, address("FR")).await;
    assert_eq!(code_of(disabled), ErrorCode::CountryNotFound);

    let order = f.engine.add_shipping_address(order_id, address("us")).await.unwrap();
    assert_eq!(order.order.shipping_address.unwrap().country_code, "us");
}

// ============================================================================
// Shipping Resolver
// ============================================================================

#[tokio::test]
async fn test_available_methods_are_priced_and_filtered() {
    let f = Fixture::new().await;
    let order_id = f.order_with_line(f.variant.id, 1).await;

    assert!(f.engine.find_available_shipping_methods(order_id).await.unwrap().is_empty());

    let unpriced = shipping_method(f.zone.id, "Drone", "drone-rate", 999);
    f.store.insert_shipping_method(unpriced.clone()).await;
    let mut disabled = shipping_method(f.zone.id, "Courier", FlatPriceCalculator::CODE, 800);
    disabled.enabled = false;
    f.store.insert_shipping_method(disabled).await;

    f.engine.add_shipping_address(order_id, address("US")).await.unwrap();
    let methods = f.engine.find_available_shipping_methods(order_id).await.unwrap();

    assert_eq!(methods.len(), 1);
    assert_eq!(methods[0].method.id, f.shipping_method.id);
    assert_eq!(methods[0].price, SHIPPING);

    let missing = f.engine.add_shipment(order_id, unpriced.id).await;
    assert_eq!(code_of(missing), ErrorCode::MissingShippingPriceCalculator);
}

#[tokio::test]
async fn test_available_methods_empty_once_paid() {
    let f = Fixture::new().await;
    let order_id = f.paid().await;
    assert!(f.engine.find_available_shipping_methods(order_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_add_shipment_checks_address_and_method() {
    let f = Fixture::new().await;
    let order_id = f.order_with_line(f.variant.id, 1).await;

    let no_address = f.engine.add_shipment(order_id, f.shipping_method.id).await;
    assert_eq!(code_of(no_address), ErrorCode::MissingShippingAddress);

    f.engine.add_shipping_address(order_id, address("US")).await.unwrap();
    let unknown = f.engine.add_shipment(order_id, Uuid::new_v4()).await;
    assert_eq!(code_of(unknown), ErrorCode::ShippingMethodNotFound);
}

#[tokio::test]
async fn test_reselecting_shipment_replaces_previous() {
    let f = Fixture::new().await;
    let express = shipping_method(f.zone.id, "Express", FlatPriceCalculator::CODE, 1200);
    f.store.insert_shipping_method(express.clone()).await;

    let order_id = f.ready_to_pay(f.variant.id, 1).await;
    let order = f.engine.add_shipment(order_id, express.id).await.unwrap();

    assert_eq!(order.shipment.as_ref().unwrap().method, "Express");
    assert_eq!(order.order.total, 500 + 1200);
    assert!(order.totals_consistent());
    assert_eq!(f.load(order_id).await.shipment.unwrap().amount, 1200);
}

// ============================================================================
// Payment Orchestrator
// ============================================================================

#[tokio::test]
async fn test_add_payment_requires_customer_and_shipment() {
    let f = Fixture::new().await;
    let order_id = f.order_with_line(f.variant.id, 1).await;
    f.engine.add_shipping_address(order_id, address("US")).await.unwrap();
    f.engine.add_shipment(order_id, f.shipping_method.id).await.unwrap();

    let no_customer = f.engine.add_payment(order_id, f.test_payment, serde_json::json!({})).await;
    assert_eq!(code_of(no_customer), ErrorCode::ForbiddenOrderAction);

    let other = f.order_with_line(f.variant.id, 1).await;
    f.engine.add_customer(other, customer_input("ada@example.com")).await.unwrap();
    let no_shipment = f.engine.add_payment(other, f.test_payment, serde_json::json!({})).await;
    assert_eq!(code_of(no_shipment), ErrorCode::ForbiddenOrderAction);

    assert_eq!(f.stock(f.variant.id).await, STOCK);
    assert!(f.sink.events().is_empty());
}

#[tokio::test]
async fn test_declined_payment_changes_nothing() {
    let f = Fixture::new().await;
    let order_id = f.ready_to_pay(f.variant.id, 2).await;
    let before = f.load(order_id).await;

    let result = f
        .engine
        .add_payment(order_id, f.test_payment, serde_json::json!({ "decline": true }))
        .await;

    match result {
        Err(CommandError::Domain(e)) => {
            assert_eq!(e.code(), ErrorCode::PaymentDeclined);
            assert!(e.raw_error().is_some());
        }
        other => panic!("expected a declined payment, got {other:?}"),
    }

    assert_eq!(f.load(order_id).await, before);
    assert_eq!(f.stock(f.variant.id).await, STOCK);
    assert!(f.sink.events().is_empty());
}

#[tokio::test]
async fn test_created_payment_can_be_authorized_later() {
    let f = Fixture::new().await;
    let order_id = f.ready_to_pay(f.variant.id, 2).await;

    let order = f
        .engine
        .add_payment(order_id, f.test_payment, serde_json::json!({ "capture": false }))
        .await
        .unwrap();
    assert_eq!(order.state(), OrderState::PaymentAdded);
    assert!(order.payment.as_ref().unwrap().transaction_id.is_none());
    assert_eq!(f.stock(f.variant.id).await, 8);

    let order = f.engine.authorize_payment(order_id).await.unwrap();
    assert_eq!(order.state(), OrderState::PaymentAuthorized);

    let again = f.engine.authorize_payment(order_id).await;
    assert_eq!(code_of(again), ErrorCode::ForbiddenOrderAction);

    assert_eq!(f.sink.count("OrderPaid"), 1);
    assert_eq!(f.stock(f.variant.id).await, 8);
}

#[tokio::test]
async fn test_payment_method_resolution_errors() {
    let f = Fixture::new().await;
    let order_id = f.ready_to_pay(f.variant.id, 1).await;

    let unknown = f.engine.add_payment(order_id, Uuid::new_v4(), serde_json::json!({})).await;
    assert_eq!(code_of(unknown), ErrorCode::PaymentMethodNotFound);

    let unregistered = f.payment_method("wire-transfer").await;
    let missing = f.engine.add_payment(order_id, unregistered, serde_json::json!({})).await;
    assert_eq!(code_of(missing), ErrorCode::MissingPaymentHandler);
}

#[tokio::test]
async fn test_handler_failures_become_payment_failed() {
    let f = Fixture::new().await;
    let order_id = f.ready_to_pay(f.variant.id, 1).await;

    for handler_code in ["broken", "panics", "slow"] {
        let method = f.payment_method(handler_code).await;
        let result = f.engine.add_payment(order_id, method, serde_json::json!({})).await;

        match result {
            Err(CommandError::Domain(e)) => {
                assert_eq!(e.code(), ErrorCode::PaymentFailed, "{handler_code}");
                assert_eq!(e.raw_error().unwrap()["handler"], handler_code);
            }
            other => panic!("{handler_code}: expected PAYMENT_FAILED, got {other:?}"),
        }
    }

    let order = f.load(order_id).await;
    assert_eq!(order.state(), OrderState::Modifying);
    assert!(order.payment.is_none());
    assert_eq!(f.stock(f.variant.id).await, STOCK);
    assert_eq!(f.metrics.payment_outcomes_total.with_label_values(&["panics", "failed"]).get(), 1);
}

#[tokio::test]
async fn test_stock_is_rechecked_before_payment() {
    let f = Fixture::new().await;
    let order_id = f.ready_to_pay(f.variant.id, 4).await;

    f.store.insert_variant(Variant { stock: 3, ..f.variant.clone() }).await;

    let result = f.engine.add_payment(order_id, f.test_payment, serde_json::json!({})).await;
    assert_eq!(code_of(result), ErrorCode::NotEnoughStock);
    assert_eq!(f.load(order_id).await.state(), OrderState::Modifying);
    assert_eq!(f.stock(f.variant.id).await, 3);
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_cancel_from_every_live_state() {
    let f = Fixture::new().await;

    let modifying = f.engine.create_order().await.unwrap().id();
    let authorized = f.paid().await;
    let shipped = f.paid().await;
    f.engine.mark_as_shipped(shipped, "TRK".to_string(), "DHL".to_string()).await.unwrap();
    let delivered = f.paid().await;
    f.engine.mark_as_shipped(delivered, "TRK".to_string(), "DHL".to_string()).await.unwrap();
    f.engine.mark_as_delivered(delivered).await.unwrap();

    let stock_before = f.stock(f.variant.id).await;

    for order_id in [modifying, authorized, shipped, delivered] {
        let order = f.engine.cancel_order(order_id).await.unwrap();
        assert_eq!(order.state(), OrderState::Canceled);

        let twice = f.engine.cancel_order(order_id).await;
        assert_eq!(code_of(twice), ErrorCode::ForbiddenOrderAction);
    }

    assert_eq!(f.stock(f.variant.id).await, stock_before, "cancellation never restores stock");
    assert_eq!(f.sink.count("OrderCancelled"), 4);
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test]
async fn test_concurrent_add_line_calls_do_not_lose_updates() {
    let f = Fixture::new().await;
    let order_id = f.engine.create_order().await.unwrap().id();

    let results = join_all((0..8).map(|_| f.engine.add_line(order_id, f.variant.id, 1))).await;
    assert!(results.iter().all(|r| r.is_ok()));

    let order = f.load(order_id).await;
    assert_eq!(order.lines.len(), 1);
    assert_eq!(order.lines[0].quantity, 8);
    assert_eq!(order.order.version, 8);
    assert!(order.totals_consistent());
}

#[tokio::test]
async fn test_last_units_cannot_be_sold_twice() {
    let f = Fixture::new().await;
    let scarce = Variant { id: Uuid::new_v4(), sku: "LIMITED".to_string(), stock: 2, price: 4000 };
    f.store.insert_variant(scarce.clone()).await;

    let first = f.ready_to_pay(scarce.id, 2).await;
    let second = f.ready_to_pay(scarce.id, 2).await;

    let results = join_all([first, second].map(|order_id| {
        f.engine.add_payment(order_id, f.test_payment, serde_json::json!({}))
    }))
    .await;

    let paid = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(paid, 1);
    let refused = results.into_iter().find(|r| r.is_err()).unwrap();
    assert_eq!(code_of(refused), ErrorCode::NotEnoughStock);
    assert_eq!(f.stock(scarce.id).await, 0);
    assert_eq!(f.sink.count("OrderPaid"), 1);
}

#[tokio::test]
async fn test_version_conflict_is_retried_for_line_edits() {
    let memory = Arc::new(InMemoryOrderStore::new());
    let flaky = Arc::new(FlakyStore { inner: memory.clone(), conflicts: AtomicU32::new(0) });
    let f = Fixture::build(memory, flaky.clone(), Arc::new(InMemoryEventSink::new())).await;

    let order_id = f.engine.create_order().await.unwrap().id();
    flaky.conflicts.store(1, Ordering::SeqCst);

    let order = f.engine.add_line(order_id, f.variant.id, 2).await.unwrap();
    assert_eq!(order.lines[0].quantity, 2);
    assert_eq!(f.metrics.conflict_retries_total.with_label_values(&["add_line"]).get(), 1);
}

#[tokio::test]
async fn test_version_conflict_is_not_retried_for_payments() {
    let memory = Arc::new(InMemoryOrderStore::new());
    let flaky = Arc::new(FlakyStore { inner: memory.clone(), conflicts: AtomicU32::new(0) });
    let f = Fixture::build(memory, flaky.clone(), Arc::new(InMemoryEventSink::new())).await;

    let order_id = f.ready_to_pay(f.variant.id, 2).await;
    flaky.conflicts.store(1, Ordering::SeqCst);

    let result = f.engine.add_payment(order_id, f.test_payment, serde_json::json!({})).await;
    assert!(matches!(result, Err(CommandError::Storage(StoreError::Conflict { .. }))));
    assert_eq!(f.load(order_id).await.state(), OrderState::Modifying);
    assert_eq!(f.stock(f.variant.id).await, STOCK);
    assert!(f.sink.events().is_empty());
}

#[tokio::test]
async fn test_concurrent_new_customer_is_created_once() {
    let memory = Arc::new(InMemoryOrderStore::new());
    let flaky = Arc::new(FlakyStore { inner: memory.clone(), conflicts: AtomicU32::new(0) });
    let f = Fixture::build(memory, flaky, Arc::new(InMemoryEventSink::new())).await;

    let first = f.engine.create_order().await.unwrap().id();
    let second = f.engine.create_order().await.unwrap().id();

    let results = join_all([first, second].map(|order_id| {
        f.engine.add_customer(order_id, customer_input("new@example.com"))
    }))
    .await;

    let customer_ids: Vec<Uuid> = results
        .into_iter()
        .map(|r| r.unwrap().customer.unwrap().id)
        .collect();
    assert_eq!(customer_ids[0], customer_ids[1]);

    let email = Email::parse("new@example.com").unwrap();
    let stored = f.store.find_customer_by_email(&email).await.unwrap().unwrap();
    assert_eq!(stored.id, customer_ids[0]);
    assert_eq!(f.metrics.conflict_retries_total.with_label_values(&["add_customer"]).get(), 1);
}

// ============================================================================
// Queries, Dispatch & Events
// ============================================================================

#[tokio::test]
async fn test_find_and_list_orders() {
    let f = Fixture::new().await;
    let first = f.engine.create_order().await.unwrap();
    let second = f.engine.create_order().await.unwrap();
    assert_eq!((first.order.code.as_str(), second.order.code.as_str()), ("1", "2"));

    let by_id = f.engine.find_order(OrderLookup::Id(second.id())).await.unwrap();
    let by_code = f.engine.find_order(OrderLookup::Code("2".to_string())).await.unwrap();
    assert_eq!(by_id, by_code);

    let missing = f.engine.find_order(OrderLookup::Code("404".to_string())).await;
    assert_eq!(code_of(missing), ErrorCode::OrderNotFound);

    let listed = f.engine.list_orders(ListInput { skip: 1, take: 5 }).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, second.id());
}

#[tokio::test]
async fn test_handle_dispatches_and_records_outcomes() {
    let f = Fixture::new().await;

    let created = f.engine.handle(OrderCommand::CreateOrder).await.unwrap().into_order().unwrap();
    assert_eq!(created.state(), OrderState::Modifying);

    let refused = f
        .engine
        .handle(OrderCommand::AddLine { order_id: created.id(), variant_id: f.variant.id, quantity: 99 })
        .await;
    assert_eq!(code_of(refused), ErrorCode::NotEnoughStock);

    match f.engine.handle(OrderCommand::ListOrders(ListInput::default())).await.unwrap() {
        CommandOutcome::Orders(orders) => assert_eq!(orders.len(), 1),
        other => panic!("expected orders, got {other:?}"),
    }

    let commands = &f.metrics.commands_total;
    assert_eq!(commands.with_label_values(&["create_order", "ok"]).get(), 1);
    assert_eq!(commands.with_label_values(&["add_line", "NOT_ENOUGH_STOCK"]).get(), 1);
    assert_eq!(commands.with_label_values(&["list_orders", "ok"]).get(), 1);
}

#[tokio::test]
async fn test_sink_failure_does_not_fail_command() {
    let store = Arc::new(InMemoryOrderStore::new());
    let metrics = Arc::new(Metrics::new().unwrap());
    let engine = engine(store.clone(), Arc::new(RejectingSink), metrics.clone());

    let order_id = engine.create_order().await.unwrap().id();
    let order = engine.cancel_order(order_id).await.unwrap();

    assert_eq!(order.state(), OrderState::Canceled);
    assert_eq!(store.load_order(order_id).await.unwrap().unwrap().state(), OrderState::Canceled);
    assert_eq!(metrics.event_sink_failures_total.with_label_values(&["OrderCancelled"]).get(), 1);
    assert_eq!(metrics.transitions_total.with_label_values(&["MODIFYING", "CANCELED"]).get(), 1);
}
