use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use uuid::Uuid;

use super::repository::{CatalogWriter, OrderStore, StoreError};
use crate::domain::order::{
    Country, Customer, Email, ListInput, Order, OrderAggregate, OrderChanges, OrderLine, OrderState, Payment,
    PaymentMethod, PriceCalculatorConfig, Shipment, ShippingMethod, Variant, Zone,
};

// ============================================================================
// PostgreSQL Order Store
// ============================================================================
//
// Commit protocol, all inside one transaction:
// 1. SELECT ... FOR UPDATE the order row and compare its version
// 2. Guarded stock decrements (stock = stock - q WHERE stock >= q)
// 3. Line / customer / shipment / payment writes
// 4. Order row update with the new version
//
// Any failed guard drops the transaction, which rolls everything back.
//
// ============================================================================

const SCHEMA: &str = include_str!("../../migrations/0001_orders.sql");

/// Advisory lock key serializing sequential order code allocation.
const ORDER_CODE_LOCK: i64 = 0x6f72_6465_7273;

const ORDER_COLUMNS: &str = "id, code, state, customer_id, shipping_address, shipment_id, payment_id, \
     subtotal, total, total_quantity, placed_at, created_at, updated_at, version";

pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        tracing::info!(max_connections, "Connected to PostgreSQL");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create tables and indexes if they do not exist yet.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        tracing::info!("Order schema is up to date");
        Ok(())
    }

    async fn assemble(&self, row: PgRow) -> Result<OrderAggregate, StoreError> {
        let order = order_from_row(&row)?;

        let lines = sqlx::query(
            "SELECT id, order_id, variant_id, quantity, unit_price, line_price
             FROM order_lines WHERE order_id = $1 ORDER BY position",
        )
        .bind(order.id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(line_from_row)
        .collect::<Result<Vec<_>, _>>()?;

        let customer = match order.customer_id {
            Some(id) => sqlx::query("SELECT id, email, first_name, last_name, phone, enabled FROM customers WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
                .as_ref()
                .map(customer_from_row)
                .transpose()?,
            None => None,
        };

        let shipment = match order.shipment_id {
            Some(id) => sqlx::query("SELECT id, order_id, amount, method, tracking_code, carrier FROM shipments WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
                .as_ref()
                .map(shipment_from_row)
                .transpose()?,
            None => None,
        };

        let payment = match order.payment_id {
            Some(id) => sqlx::query("SELECT id, order_id, amount, method_id, method, transaction_id FROM payments WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
                .as_ref()
                .map(payment_from_row)
                .transpose()?,
            None => None,
        };

        tracing::debug!(order_id = %order.id, line_count = lines.len(), "Loaded order aggregate");

        Ok(OrderAggregate { order, lines, customer, shipment, payment })
    }

    async fn decrement_stock(
        tx: &mut Transaction<'_, Postgres>,
        variant_id: Uuid,
        quantity: u32,
    ) -> Result<(), StoreError> {
        let updated = sqlx::query("UPDATE variants SET stock = stock - $1 WHERE id = $2 AND stock >= $1")
            .bind(i64::from(quantity))
            .bind(variant_id)
            .execute(&mut **tx)
            .await?
            .rows_affected();

        if updated == 1 {
            return Ok(());
        }

        let available: Option<i64> = sqlx::query_scalar("SELECT stock FROM variants WHERE id = $1")
            .bind(variant_id)
            .fetch_optional(&mut **tx)
            .await?;

        match available {
            None => Err(StoreError::MissingVariant(variant_id)),
            Some(available) => Err(StoreError::InsufficientStock {
                variant_id,
                requested: quantity,
                available: to_u32(available, "stock")?,
            }),
        }
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn create_order(&self) -> Result<Order, StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(ORDER_CODE_LOCK)
            .execute(&mut *tx)
            .await?;

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders")
            .fetch_one(&mut *tx)
            .await?;

        let order = Order::new((count + 1).to_string());

        sqlx::query(
            "INSERT INTO orders (id, code, state, subtotal, total, total_quantity, created_at, updated_at, version)
             VALUES ($1, $2, $3, 0, 0, 0, $4, $5, 0)",
        )
        .bind(order.id)
        .bind(&order.code)
        .bind(order.state.as_str())
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(order)
    }

    async fn load_order(&self, order_id: Uuid) -> Result<Option<OrderAggregate>, StoreError> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(self.assemble(row).await?)),
            None => Ok(None),
        }
    }

    async fn load_order_by_code(&self, code: &str) -> Result<Option<OrderAggregate>, StoreError> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE code = $1"))
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(self.assemble(row).await?)),
            None => Ok(None),
        }
    }

    async fn list_orders(&self, window: ListInput) -> Result<Vec<Order>, StoreError> {
        let skip = i64::try_from(window.skip).unwrap_or(i64::MAX);
        let take = i64::try_from(window.take).unwrap_or(i64::MAX);

        sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders ORDER BY created_at ASC, code ASC OFFSET $1 LIMIT $2"
        ))
        .bind(skip)
        .bind(take)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(order_from_row)
        .collect()
    }

    async fn find_line(&self, line_id: Uuid) -> Result<Option<OrderLine>, StoreError> {
        sqlx::query("SELECT id, order_id, variant_id, quantity, unit_price, line_price FROM order_lines WHERE id = $1")
            .bind(line_id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(line_from_row)
            .transpose()
    }

    async fn find_variant(&self, variant_id: Uuid) -> Result<Option<Variant>, StoreError> {
        sqlx::query("SELECT id, sku, stock, price FROM variants WHERE id = $1")
            .bind(variant_id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(|row| {
                Ok(Variant {
                    id: row.try_get("id")?,
                    sku: row.try_get("sku")?,
                    stock: to_u32(row.try_get("stock")?, "stock")?,
                    price: row.try_get("price")?,
                })
            })
            .transpose()
    }

    async fn find_customer_by_email(&self, email: &Email) -> Result<Option<Customer>, StoreError> {
        sqlx::query("SELECT id, email, first_name, last_name, phone, enabled FROM customers WHERE email = $1")
            .bind(email.as_str())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(customer_from_row)
            .transpose()
    }

    async fn find_country_by_code(&self, code: &str) -> Result<Option<Country>, StoreError> {
        sqlx::query("SELECT id, code, name, enabled FROM countries WHERE UPPER(code) = UPPER($1)")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(|row| {
                Ok(Country {
                    id: row.try_get("id")?,
                    code: row.try_get("code")?,
                    name: row.try_get("name")?,
                    enabled: row.try_get("enabled")?,
                })
            })
            .transpose()
    }

    async fn find_shipping_methods_for_country(&self, country_id: Uuid) -> Result<Vec<ShippingMethod>, StoreError> {
        sqlx::query(
            "SELECT sm.id, sm.name, sm.description, sm.zone_id, sm.price_calculator_code,
                    sm.price_calculator_args, sm.enabled
             FROM shipping_methods sm
             JOIN zone_countries zc ON zc.zone_id = sm.zone_id
             WHERE zc.country_id = $1 AND sm.enabled
             ORDER BY sm.name",
        )
        .bind(country_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(shipping_method_from_row)
        .collect()
    }

    async fn find_shipping_method(&self, method_id: Uuid) -> Result<Option<ShippingMethod>, StoreError> {
        sqlx::query(
            "SELECT id, name, description, zone_id, price_calculator_code, price_calculator_args, enabled
             FROM shipping_methods WHERE id = $1 AND enabled",
        )
        .bind(method_id)
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(shipping_method_from_row)
        .transpose()
    }

    async fn find_payment_method(&self, method_id: Uuid) -> Result<Option<PaymentMethod>, StoreError> {
        sqlx::query("SELECT id, name, handler_code, enabled FROM payment_methods WHERE id = $1 AND enabled")
            .bind(method_id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(|row| {
                Ok(PaymentMethod {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    handler_code: row.try_get("handler_code")?,
                    enabled: row.try_get("enabled")?,
                })
            })
            .transpose()
    }

    async fn commit(&self, changes: OrderChanges) -> Result<(), StoreError> {
        let order = &changes.order;
        let mut tx = self.pool.begin().await?;

        let current: Option<i64> = sqlx::query_scalar("SELECT version FROM orders WHERE id = $1 FOR UPDATE")
            .bind(order.id)
            .fetch_optional(&mut *tx)
            .await?;

        let current = current.ok_or(StoreError::MissingOrder(order.id))?;
        if current != changes.expected_version {
            return Err(StoreError::Conflict {
                order_id: order.id,
                expected: changes.expected_version,
                actual: current,
            });
        }

        for decrement in &changes.stock_decrements {
            Self::decrement_stock(&mut tx, decrement.variant_id, decrement.quantity).await?;
        }

        if let Some(customer) = &changes.new_customer {
            let inserted = sqlx::query(
                "INSERT INTO customers (id, email, first_name, last_name, phone, enabled)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 ON CONFLICT (email) DO NOTHING",
            )
            .bind(customer.id)
            .bind(customer.email.as_str())
            .bind(&customer.first_name)
            .bind(&customer.last_name)
            .bind(&customer.phone)
            .bind(customer.enabled)
            .execute(&mut *tx)
            .await?;

            // A concurrent command registered this email after our lookup.
            if inserted.rows_affected() == 0 {
                return Err(StoreError::CustomerEmailTaken(customer.email.to_string()));
            }
        }

        for line_id in &changes.removed_line_ids {
            sqlx::query("DELETE FROM order_lines WHERE id = $1")
                .bind(line_id)
                .execute(&mut *tx)
                .await?;
        }

        for line in &changes.upserted_lines {
            sqlx::query(
                "INSERT INTO order_lines (id, order_id, variant_id, quantity, unit_price, line_price)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 ON CONFLICT (id) DO UPDATE
                 SET quantity = EXCLUDED.quantity,
                     unit_price = EXCLUDED.unit_price,
                     line_price = EXCLUDED.line_price",
            )
            .bind(line.id)
            .bind(line.order_id)
            .bind(line.variant_id)
            .bind(i64::from(line.quantity))
            .bind(line.unit_price)
            .bind(line.line_price)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(shipment) = &changes.shipment {
            sqlx::query("DELETE FROM shipments WHERE order_id = $1 AND id <> $2")
                .bind(order.id)
                .bind(shipment.id)
                .execute(&mut *tx)
                .await?;

            sqlx::query(
                "INSERT INTO shipments (id, order_id, amount, method, tracking_code, carrier)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 ON CONFLICT (id) DO UPDATE
                 SET amount = EXCLUDED.amount,
                     method = EXCLUDED.method,
                     tracking_code = EXCLUDED.tracking_code,
                     carrier = EXCLUDED.carrier",
            )
            .bind(shipment.id)
            .bind(shipment.order_id)
            .bind(shipment.amount)
            .bind(&shipment.method)
            .bind(&shipment.tracking_code)
            .bind(&shipment.carrier)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(payment) = &changes.payment {
            sqlx::query(
                "INSERT INTO payments (id, order_id, amount, method_id, method, transaction_id)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(payment.id)
            .bind(payment.order_id)
            .bind(payment.amount)
            .bind(payment.method_id)
            .bind(&payment.method)
            .bind(&payment.transaction_id)
            .execute(&mut *tx)
            .await?;
        }

        let address = order
            .shipping_address
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::Corrupt(format!("unserializable shipping address: {e}")))?;

        sqlx::query(
            "UPDATE orders
             SET state = $2, customer_id = $3, shipping_address = $4, shipment_id = $5, payment_id = $6,
                 subtotal = $7, total = $8, total_quantity = $9, placed_at = $10, updated_at = $11,
                 version = $12
             WHERE id = $1",
        )
        .bind(order.id)
        .bind(order.state.as_str())
        .bind(order.customer_id)
        .bind(address)
        .bind(order.shipment_id)
        .bind(order.payment_id)
        .bind(order.subtotal)
        .bind(order.total)
        .bind(i64::from(order.total_quantity))
        .bind(order.placed_at)
        .bind(order.updated_at)
        .bind(order.version)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!(order_id = %order.id, version = order.version, "Committed order changes to PostgreSQL");
        Ok(())
    }
}

#[async_trait]
impl CatalogWriter for PgOrderStore {
    async fn upsert_variant(&self, variant: &Variant) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO variants (id, sku, stock, price) VALUES ($1, $2, $3, $4)
             ON CONFLICT (id) DO UPDATE SET sku = EXCLUDED.sku, stock = EXCLUDED.stock, price = EXCLUDED.price",
        )
        .bind(variant.id)
        .bind(&variant.sku)
        .bind(i64::from(variant.stock))
        .bind(variant.price)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_country(&self, country: &Country) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO countries (id, code, name, enabled) VALUES ($1, $2, $3, $4)
             ON CONFLICT (id) DO UPDATE SET code = EXCLUDED.code, name = EXCLUDED.name, enabled = EXCLUDED.enabled",
        )
        .bind(country.id)
        .bind(&country.code)
        .bind(&country.name)
        .bind(country.enabled)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_zone(&self, zone: &Zone) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO zones (id, name) VALUES ($1, $2) ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name")
            .bind(zone.id)
            .bind(&zone.name)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM zone_countries WHERE zone_id = $1")
            .bind(zone.id)
            .execute(&mut *tx)
            .await?;

        for country_id in &zone.country_ids {
            sqlx::query("INSERT INTO zone_countries (zone_id, country_id) VALUES ($1, $2)")
                .bind(zone.id)
                .bind(country_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn upsert_shipping_method(&self, method: &ShippingMethod) -> Result<(), StoreError> {
        let args = serde_json::to_string(&method.price_calculator.args)
            .map_err(|e| StoreError::Corrupt(format!("unserializable price calculator args: {e}")))?;

        sqlx::query(
            "INSERT INTO shipping_methods
                (id, name, description, zone_id, price_calculator_code, price_calculator_args, enabled)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (id) DO UPDATE
             SET name = EXCLUDED.name,
                 description = EXCLUDED.description,
                 zone_id = EXCLUDED.zone_id,
                 price_calculator_code = EXCLUDED.price_calculator_code,
                 price_calculator_args = EXCLUDED.price_calculator_args,
                 enabled = EXCLUDED.enabled",
        )
        .bind(method.id)
        .bind(&method.name)
        .bind(&method.description)
        .bind(method.zone_id)
        .bind(&method.price_calculator.code)
        .bind(args)
        .bind(method.enabled)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_payment_method(&self, method: &PaymentMethod) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO payment_methods (id, name, handler_code, enabled) VALUES ($1, $2, $3, $4)
             ON CONFLICT (id) DO UPDATE
             SET name = EXCLUDED.name, handler_code = EXCLUDED.handler_code, enabled = EXCLUDED.enabled",
        )
        .bind(method.id)
        .bind(&method.name)
        .bind(&method.handler_code)
        .bind(method.enabled)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ============================================================================
// Row Mapping
// ============================================================================

fn to_u32(value: i64, column: &str) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("{column} out of range: {value}")))
}

fn order_from_row(row: &PgRow) -> Result<Order, StoreError> {
    let state: String = row.try_get("state")?;
    let state = OrderState::parse(&state).ok_or_else(|| StoreError::Corrupt(format!("unknown order state {state}")))?;

    let address: Option<String> = row.try_get("shipping_address")?;
    let shipping_address = address
        .map(|json| serde_json::from_str(&json))
        .transpose()
        .map_err(|e| StoreError::Corrupt(format!("invalid shipping address: {e}")))?;

    Ok(Order {
        id: row.try_get("id")?,
        code: row.try_get("code")?,
        state,
        customer_id: row.try_get("customer_id")?,
        shipping_address,
        shipment_id: row.try_get("shipment_id")?,
        payment_id: row.try_get("payment_id")?,
        subtotal: row.try_get("subtotal")?,
        total: row.try_get("total")?,
        total_quantity: to_u32(row.try_get("total_quantity")?, "total_quantity")?,
        placed_at: row.try_get("placed_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        version: row.try_get("version")?,
    })
}

fn line_from_row(row: &PgRow) -> Result<OrderLine, StoreError> {
    Ok(OrderLine {
        id: row.try_get("id")?,
        order_id: row.try_get("order_id")?,
        variant_id: row.try_get("variant_id")?,
        quantity: to_u32(row.try_get("quantity")?, "quantity")?,
        unit_price: row.try_get("unit_price")?,
        line_price: row.try_get("line_price")?,
    })
}

fn customer_from_row(row: &PgRow) -> Result<Customer, StoreError> {
    let email: String = row.try_get("email")?;
    let email = Email::parse(&email).ok_or_else(|| StoreError::Corrupt(format!("invalid stored email {email}")))?;

    Ok(Customer {
        id: row.try_get("id")?,
        email,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        phone: row.try_get("phone")?,
        enabled: row.try_get("enabled")?,
    })
}

fn shipment_from_row(row: &PgRow) -> Result<Shipment, StoreError> {
    Ok(Shipment {
        id: row.try_get("id")?,
        order_id: row.try_get("order_id")?,
        amount: row.try_get("amount")?,
        method: row.try_get("method")?,
        tracking_code: row.try_get("tracking_code")?,
        carrier: row.try_get("carrier")?,
    })
}

fn payment_from_row(row: &PgRow) -> Result<Payment, StoreError> {
    Ok(Payment {
        id: row.try_get("id")?,
        order_id: row.try_get("order_id")?,
        amount: row.try_get("amount")?,
        method_id: row.try_get("method_id")?,
        method: row.try_get("method")?,
        transaction_id: row.try_get("transaction_id")?,
    })
}

fn shipping_method_from_row(row: &PgRow) -> Result<ShippingMethod, StoreError> {
    let args: String = row.try_get("price_calculator_args")?;
    let args = serde_json::from_str(&args)
        .map_err(|e| StoreError::Corrupt(format!("invalid price calculator args: {e}")))?;

    Ok(ShippingMethod {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        zone_id: row.try_get("zone_id")?,
        price_calculator: PriceCalculatorConfig {
            code: row.try_get("price_calculator_code")?,
            args,
        },
        enabled: row.try_get("enabled")?,
    })
}
