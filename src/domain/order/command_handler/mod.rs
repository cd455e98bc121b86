use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::aggregate::{OrderAggregate, OrderEdit};
use super::commands::{CommandOutcome, OrderCommand};
use super::entities::Order;
use super::errors::{CommandError, OrderError};
use super::events::{OrderCancelled, OrderDelivered, OrderEvent, OrderShipped};
use super::state_machine::{ensure_can_perform, OrderAction};
use super::value_objects::{ListInput, OrderLookup, OrderState};
use crate::config::EngineConfig;
use crate::messaging::EventSink;
use crate::metrics::Metrics;
use crate::store::{OrderLocks, OrderStore};
use crate::strategies::{PaymentHandlers, ShippingCalculators};
use crate::utils::{retry_on_transient, RetryConfig};

mod customer;
mod lines;
mod payment;
mod shipping;

#[cfg(test)]
mod tests;

// ============================================================================
// Order Command Handler
// ============================================================================
//
// Orchestrates: Command → lock → fresh load → gates → side effects → commit → event
//
// Every mutating command holds the order's lock from load to commit and
// writes through a single `OrderStore::commit`. Non-payment commands re-run
// on a version conflict; payment commands never do, since the provider has
// already been called by the time the commit happens.
//
// ============================================================================

pub struct OrderCommandHandler {
    store: Arc<dyn OrderStore>,
    events: Arc<dyn EventSink>,
    payment_handlers: PaymentHandlers,
    shipping_calculators: ShippingCalculators,
    locks: OrderLocks,
    metrics: Arc<Metrics>,
    payment_timeout: Duration,
    conflict_retry: RetryConfig,
}

impl OrderCommandHandler {
    pub fn new(
        store: Arc<dyn OrderStore>,
        events: Arc<dyn EventSink>,
        payment_handlers: PaymentHandlers,
        shipping_calculators: ShippingCalculators,
        metrics: Arc<Metrics>,
    ) -> Self {
        let defaults = EngineConfig::default();
        Self {
            store,
            events,
            payment_handlers,
            shipping_calculators,
            locks: OrderLocks::new(),
            metrics,
            payment_timeout: defaults.payment_timeout,
            conflict_retry: RetryConfig::conflicts(defaults.conflict_retry_attempts),
        }
    }

    /// Apply the tunables from the engine configuration.
    pub fn configured(self, config: &EngineConfig) -> Self {
        self.with_payment_timeout(config.payment_timeout)
            .with_conflict_retry(RetryConfig::conflicts(config.conflict_retry_attempts))
    }

    pub fn with_payment_timeout(mut self, timeout: Duration) -> Self {
        self.payment_timeout = timeout;
        self
    }

    pub fn with_conflict_retry(mut self, retry: RetryConfig) -> Self {
        self.conflict_retry = retry;
        self
    }

    /// Share a lock table with other handlers serving the same store.
    pub fn with_locks(mut self, locks: OrderLocks) -> Self {
        self.locks = locks;
        self
    }

    /// Dispatch a command, recording its outcome and latency.
    pub async fn handle(&self, command: OrderCommand) -> Result<CommandOutcome, CommandError> {
        let name = command.name();
        let started = Instant::now();

        let result = self.dispatch(command).await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(CommandError::Domain(e)) => e.code().as_str(),
            Err(CommandError::Storage(_)) => "storage_error",
        };
        self.metrics.record_command(name, outcome, started.elapsed().as_secs_f64());

        match &result {
            Ok(_) => tracing::debug!(command = name, "Order command handled"),
            Err(CommandError::Domain(e)) => {
                tracing::info!(command = name, code = %e.code(), error = %e, "Order command refused")
            }
            Err(CommandError::Storage(e)) => {
                tracing::error!(command = name, error = %e, "Order command failed")
            }
        }

        result
    }

    async fn dispatch(&self, command: OrderCommand) -> Result<CommandOutcome, CommandError> {
        let order = |aggregate: OrderAggregate| CommandOutcome::Order(Box::new(aggregate));

        match command {
            OrderCommand::CreateOrder => self.create_order().await.map(order),
            OrderCommand::AddLine { order_id, variant_id, quantity } => {
                self.add_line(order_id, variant_id, quantity).await.map(order)
            }
            OrderCommand::UpdateLine { line_id, quantity } => self.update_line(line_id, quantity).await.map(order),
            OrderCommand::RemoveLine { line_id } => self.remove_line(line_id).await.map(order),
            OrderCommand::AddCustomer { order_id, customer } => self.add_customer(order_id, customer).await.map(order),
            OrderCommand::AddShippingAddress { order_id, address } => {
                self.add_shipping_address(order_id, address).await.map(order)
            }
            OrderCommand::FindAvailableShippingMethods { order_id } => self
                .find_available_shipping_methods(order_id)
                .await
                .map(CommandOutcome::ShippingMethods),
            OrderCommand::AddShipment { order_id, method_id } => self.add_shipment(order_id, method_id).await.map(order),
            OrderCommand::AddPayment { order_id, method_id, metadata } => {
                self.add_payment(order_id, method_id, metadata).await.map(order)
            }
            OrderCommand::AuthorizePayment { order_id } => self.authorize_payment(order_id).await.map(order),
            OrderCommand::MarkAsShipped { order_id, tracking_code, carrier } => {
                self.mark_as_shipped(order_id, tracking_code, carrier).await.map(order)
            }
            OrderCommand::MarkAsDelivered { order_id } => self.mark_as_delivered(order_id).await.map(order),
            OrderCommand::CancelOrder { order_id } => self.cancel_order(order_id).await.map(order),
            OrderCommand::FindOrder(lookup) => self.find_order(lookup).await.map(order),
            OrderCommand::ListOrders(window) => self.list_orders(window).await.map(CommandOutcome::Orders),
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn create_order(&self) -> Result<OrderAggregate, CommandError> {
        let order = self.store.create_order().await?;
        tracing::info!(order_id = %order.id, code = %order.code, "Order created");
        Ok(OrderAggregate::new(order))
    }

    pub async fn find_order(&self, lookup: OrderLookup) -> Result<OrderAggregate, CommandError> {
        let found = match &lookup {
            OrderLookup::Id(id) => self.store.load_order(*id).await?,
            OrderLookup::Code(code) => self.store.load_order_by_code(code).await?,
        };

        found.ok_or_else(|| {
            let key = match lookup {
                OrderLookup::Id(id) => id.to_string(),
                OrderLookup::Code(code) => code,
            };
            OrderError::OrderNotFound(key).into()
        })
    }

    pub async fn list_orders(&self, window: ListInput) -> Result<Vec<Order>, CommandError> {
        Ok(self.store.list_orders(window).await?)
    }

    // ========================================================================
    // Fulfilment
    // ========================================================================

    pub async fn mark_as_shipped(
        &self,
        order_id: Uuid,
        tracking_code: String,
        carrier: String,
    ) -> Result<OrderAggregate, CommandError> {
        self.retry_conflicts("mark_as_shipped", move || {
            self.try_mark_as_shipped(order_id, tracking_code.clone(), carrier.clone())
        })
        .await
    }

    async fn try_mark_as_shipped(
        &self,
        order_id: Uuid,
        tracking_code: String,
        carrier: String,
    ) -> Result<OrderAggregate, CommandError> {
        let _guard = self.locks.acquire(order_id).await;
        let aggregate = self.load(order_id).await?;
        ensure_can_perform(&aggregate.facts(), OrderAction::MarkAsShipped)?;

        let mut edit = aggregate.edit();
        edit.transition(OrderState::Shipped)?;
        if !edit.set_tracking(tracking_code.clone(), carrier.clone()) {
            return Err(OrderError::InvalidTransition {
                from: edit.initial_state(),
                to: OrderState::Shipped,
                reason: "order has no shipment",
            }
            .into());
        }

        let aggregate = self.commit(edit).await?;
        self.emit(OrderEvent::Shipped(OrderShipped {
            order_id,
            tracking_code,
            carrier,
            shipped_at: aggregate.order.updated_at,
        }))
        .await;

        Ok(aggregate)
    }

    pub async fn mark_as_delivered(&self, order_id: Uuid) -> Result<OrderAggregate, CommandError> {
        self.retry_conflicts("mark_as_delivered", move || self.try_mark_as_delivered(order_id))
            .await
    }

    async fn try_mark_as_delivered(&self, order_id: Uuid) -> Result<OrderAggregate, CommandError> {
        let _guard = self.locks.acquire(order_id).await;
        let aggregate = self.load(order_id).await?;
        ensure_can_perform(&aggregate.facts(), OrderAction::MarkAsDelivered)?;

        let mut edit = aggregate.edit();
        edit.transition(OrderState::Delivered)?;

        let aggregate = self.commit(edit).await?;
        self.emit(OrderEvent::Delivered(OrderDelivered {
            order_id,
            delivered_at: aggregate.order.updated_at,
        }))
        .await;

        Ok(aggregate)
    }

    /// Cancel from any live state. Stock already committed by a payment stays decremented.
    pub async fn cancel_order(&self, order_id: Uuid) -> Result<OrderAggregate, CommandError> {
        self.retry_conflicts("cancel_order", move || self.try_cancel_order(order_id))
            .await
    }

    async fn try_cancel_order(&self, order_id: Uuid) -> Result<OrderAggregate, CommandError> {
        let _guard = self.locks.acquire(order_id).await;
        let aggregate = self.load(order_id).await?;
        ensure_can_perform(&aggregate.facts(), OrderAction::Cancel)?;

        let mut edit = aggregate.edit();
        edit.transition(OrderState::Canceled)?;

        let aggregate = self.commit(edit).await?;
        self.emit(OrderEvent::Cancelled(OrderCancelled {
            order_id,
            cancelled_at: aggregate.order.updated_at,
        }))
        .await;

        Ok(aggregate)
    }

    // ========================================================================
    // Shared Steps
    // ========================================================================

    async fn load(&self, order_id: Uuid) -> Result<OrderAggregate, CommandError> {
        let aggregate = self.store.load_order(order_id).await?;
        aggregate.ok_or_else(|| OrderError::OrderNotFound(order_id.to_string()).into())
    }

    /// Commit one edit and report any state change it made.
    async fn commit(&self, edit: OrderEdit) -> Result<OrderAggregate, CommandError> {
        let from = edit.initial_state();
        let (aggregate, changes) = edit.finish();

        self.store.commit(changes).await?;

        let to = aggregate.state();
        if from != to {
            self.metrics.record_transition(from.as_str(), to.as_str());
            tracing::info!(order_id = %aggregate.id(), from = %from, to = %to, "Order state changed");
        }

        Ok(aggregate)
    }

    async fn emit(&self, event: OrderEvent) {
        match self.events.emit(&event).await {
            Ok(()) => self.metrics.record_event(event.event_type(), true),
            Err(e) => {
                self.metrics.record_event(event.event_type(), false);
                tracing::warn!(
                    order_id = %event.order_id(),
                    event_type = event.event_type(),
                    error = %e,
                    "Event sink rejected order event"
                );
            }
        }
    }

    /// Re-run `attempt` while it fails with a version conflict.
    async fn retry_conflicts<T, F, Fut>(&self, command: &'static str, mut attempt: F) -> Result<T, CommandError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CommandError>>,
    {
        retry_on_transient(self.conflict_retry.clone(), |n| {
            if n > 1 {
                self.metrics.record_conflict_retry(command);
            }
            attempt()
        })
        .await
        .into_result()
    }
}
