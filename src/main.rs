use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use commerce_orders::config::EngineConfig;
use commerce_orders::domain::order::{
    Address, Country, CustomerInput, OrderCommandHandler, PaymentMethod, PriceCalculatorConfig, ShippingMethod,
    Variant, Zone,
};
use commerce_orders::messaging::{EventSink, RedpandaEventSink, TracingEventSink};
use commerce_orders::metrics::{self, Metrics};
use commerce_orders::store::{CatalogWriter, InMemoryOrderStore, OrderStore, PgOrderStore};
use commerce_orders::strategies::{
    FlatPriceCalculator, PaymentHandlers, ShippingCalculators, TestPaymentHandler,
};

// Fixed ids so re-running the demo against PostgreSQL updates rather than duplicates.
const DEMO_VARIANT: Uuid = Uuid::from_u128(0x0000_0001_0000_4000_8000_0000_0000_0001);
const DEMO_COUNTRY: Uuid = Uuid::from_u128(0x0000_0002_0000_4000_8000_0000_0000_0001);
const DEMO_ZONE: Uuid = Uuid::from_u128(0x0000_0003_0000_4000_8000_0000_0000_0001);
const DEMO_SHIPPING: Uuid = Uuid::from_u128(0x0000_0004_0000_4000_8000_0000_0000_0001);
const DEMO_PAYMENT: Uuid = Uuid::from_u128(0x0000_0005_0000_4000_8000_0000_0000_0001);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with environment-based filtering
    // Default to INFO level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,commerce_orders=debug")))
        .init();

    tracing::info!("🚀 Starting commerce order engine");

    let config = EngineConfig::from_env()?;

    // === 1. Metrics ===
    let metrics = Arc::new(Metrics::new()?);
    tracing::info!("📊 Metrics registry created with {} metrics", metrics.registry().gather().len());

    let metrics_registry = Arc::new(metrics.registry().clone());
    let metrics_port = config.metrics_port;
    std::thread::spawn(move || {
        let system = actix_web::rt::System::new();
        if let Err(e) = system.block_on(metrics::start_metrics_server(metrics_registry, metrics_port)) {
            tracing::error!("Metrics server error: {}", e);
        }
    });

    // === 2. Store ===
    let (store, catalog): (Arc<dyn OrderStore>, Arc<dyn CatalogWriter>) = match &config.database_url {
        Some(url) => {
            tracing::info!("Connecting to PostgreSQL...");
            let pg = Arc::new(PgOrderStore::connect(url, config.database_max_connections).await?);
            pg.migrate().await?;
            (pg.clone() as Arc<dyn OrderStore>, pg as Arc<dyn CatalogWriter>)
        }
        None => {
            tracing::info!("DATABASE_URL not set, using in-memory store");
            let memory = Arc::new(InMemoryOrderStore::new());
            (memory.clone() as Arc<dyn OrderStore>, memory as Arc<dyn CatalogWriter>)
        }
    };

    // === 3. Event sink ===
    let events: Arc<dyn EventSink> = match &config.redpanda_brokers {
        Some(brokers) => Arc::new(RedpandaEventSink::new(brokers, config.events_topic.clone(), metrics.clone())?),
        None => Arc::new(TracingEventSink),
    };

    // === 4. Strategies and engine ===
    let payment_handlers = PaymentHandlers::new().with(Arc::new(TestPaymentHandler));
    let shipping_calculators = ShippingCalculators::new().with(Arc::new(FlatPriceCalculator));

    let engine = OrderCommandHandler::new(store, events, payment_handlers, shipping_calculators, metrics.clone())
        .configured(&config);

    // === 5. Demonstrate the order lifecycle ===
    seed_demo_catalog(catalog.as_ref()).await?;
    run_demo(&engine).await?;

    tracing::info!("🎉 Demo complete!");
    Ok(())
}

async fn seed_demo_catalog(catalog: &dyn CatalogWriter) -> anyhow::Result<()> {
    catalog
        .upsert_variant(&Variant { id: DEMO_VARIANT, sku: "TSHIRT-M".to_string(), stock: 10, price: 500 })
        .await?;
    catalog
        .upsert_country(&Country { id: DEMO_COUNTRY, code: "US".to_string(), name: "United States".to_string(), enabled: true })
        .await?;
    catalog
        .upsert_zone(&Zone { id: DEMO_ZONE, name: "North America".to_string(), country_ids: vec![DEMO_COUNTRY] })
        .await?;
    catalog
        .upsert_shipping_method(&ShippingMethod {
            id: DEMO_SHIPPING,
            name: "Standard".to_string(),
            description: Some("3-5 business days".to_string()),
            zone_id: DEMO_ZONE,
            price_calculator: PriceCalculatorConfig {
                code: FlatPriceCalculator::CODE.to_string(),
                args: serde_json::json!({ "price": 300 }),
            },
            enabled: true,
        })
        .await?;
    catalog
        .upsert_payment_method(&PaymentMethod {
            id: DEMO_PAYMENT,
            name: "Test card".to_string(),
            handler_code: TestPaymentHandler::CODE.to_string(),
            enabled: true,
        })
        .await?;

    tracing::info!("Demo catalog seeded");
    Ok(())
}

async fn run_demo(engine: &OrderCommandHandler) -> anyhow::Result<()> {
    tracing::info!("📝 Demonstrating order lifecycle");

    let order = engine.create_order().await?;
    let order_id = order.id();
    tracing::info!("✅ Order created: {} (code {})", order_id, order.order.code);

    let order = engine.add_line(order_id, DEMO_VARIANT, 2).await?;
    tracing::info!("✅ Line added, subtotal {}", order.order.subtotal);

    engine
        .add_customer(
            order_id,
            CustomerInput {
                email: "ada@example.com".to_string(),
                first_name: "Ada".to_string(),
                last_name: "Lovelace".to_string(),
                phone: None,
            },
        )
        .await?;

    engine
        .add_shipping_address(
            order_id,
            Address {
                full_name: "Ada Lovelace".to_string(),
                street_line_1: "12 Analytical Way".to_string(),
                street_line_2: None,
                city: "Springfield".to_string(),
                province: Some("IL".to_string()),
                postal_code: "62701".to_string(),
                country_code: "US".to_string(),
                phone_number: None,
            },
        )
        .await?;

    let methods = engine.find_available_shipping_methods(order_id).await?;
    tracing::info!("✅ {} shipping method(s) available", methods.len());

    let order = engine.add_shipment(order_id, DEMO_SHIPPING).await?;
    tracing::info!("✅ Shipment selected, total {}", order.order.total);

    let order = engine.add_payment(order_id, DEMO_PAYMENT, serde_json::json!({})).await?;
    tracing::info!("✅ Payment recorded, state {}", order.state());

    engine.mark_as_shipped(order_id, "1Z999AA10123456784".to_string(), "UPS".to_string()).await?;
    let order = engine.mark_as_delivered(order_id).await?;
    tracing::info!("✅ Order delivered, state {}", order.state());

    let abandoned = engine.create_order().await?;
    let abandoned = engine.cancel_order(abandoned.id()).await?;
    tracing::info!("✅ Order {} cancelled", abandoned.order.code);

    Ok(())
}
