use chrono::Utc;
use futures_util::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use uuid::Uuid;

use super::OrderCommandHandler;
use crate::domain::order::{
    ensure_can_perform, ensure_stock, ensure_transition, CommandError, OrderAction, OrderAggregate, OrderError,
    OrderEvent, OrderPaid, OrderState, Payment,
};
use crate::strategies::{CreatePaymentResult, PaymentHandler};

// ============================================================================
// Payment Orchestration
// ============================================================================
//
// Gates and the stock re-check run before the provider is called. The
// provider call is isolated: an error, a panic or a timeout all become
// PAYMENT_FAILED. Payment commands hold the order lock but are never retried
// on a conflict, so a provider is never asked twice for one command.
//
// ============================================================================

impl OrderCommandHandler {
    pub async fn add_payment(
        &self,
        order_id: Uuid,
        method_id: Uuid,
        metadata: serde_json::Value,
    ) -> Result<OrderAggregate, CommandError> {
        let _guard = self.locks.acquire(order_id).await;
        let aggregate = self.load(order_id).await?;

        let facts = aggregate.facts();
        ensure_can_perform(&facts, OrderAction::AddPayment)?;
        ensure_transition(&facts, OrderState::PaymentAdded)?;

        let method = self
            .store
            .find_payment_method(method_id)
            .await?
            .ok_or(OrderError::PaymentMethodNotFound(method_id))?;

        let handler = self
            .payment_handlers
            .get(&method.handler_code)
            .ok_or_else(|| OrderError::MissingPaymentHandler(method.handler_code.clone()))?;

        for line in &aggregate.lines {
            let variant = self
                .store
                .find_variant(line.variant_id)
                .await?
                .ok_or(OrderError::VariantNotFound(line.variant_id))?;
            ensure_stock(&variant, line.quantity)?;
        }

        let total = aggregate.order.total;
        let result = self
            .isolate(handler.as_ref(), handler.create_payment(&aggregate, total, &metadata))
            .await
            .inspect_err(|_| self.metrics.record_payment_outcome(handler.code(), "failed"))?;

        let (target, amount, transaction_id) = match result {
            CreatePaymentResult::Declined { error, raw_error } => {
                self.metrics.record_payment_outcome(handler.code(), "declined");
                tracing::warn!(order_id = %order_id, handler = handler.code(), reason = %error, "Payment declined");
                return Err(OrderError::PaymentDeclined { message: error, raw_error }.into());
            }
            CreatePaymentResult::Created { amount } => {
                self.metrics.record_payment_outcome(handler.code(), "created");
                (OrderState::PaymentAdded, amount, None)
            }
            CreatePaymentResult::Authorized { amount, transaction_id } => {
                self.metrics.record_payment_outcome(handler.code(), "authorized");
                (OrderState::PaymentAuthorized, amount, Some(transaction_id))
            }
        };

        let decrements: Vec<(Uuid, u32)> = aggregate
            .lines
            .iter()
            .map(|line| (line.variant_id, line.quantity))
            .collect();

        let payment = Payment {
            id: Uuid::new_v4(),
            order_id,
            amount,
            method_id: method.id,
            method: method.name.clone(),
            transaction_id,
        };

        let mut edit = aggregate.edit();
        edit.record_payment(payment);
        edit.transition(target)?;
        edit.stamp_placed_at(Utc::now());
        for (variant_id, quantity) in decrements {
            edit.decrement_stock(variant_id, quantity);
        }

        let aggregate = match self.commit(edit).await {
            Ok(aggregate) => aggregate,
            Err(e) => {
                // The provider already accepted; nothing here can take that back.
                tracing::error!(
                    order_id = %order_id,
                    handler = handler.code(),
                    error = %e,
                    "Payment accepted by provider but order commit failed"
                );
                return Err(e);
            }
        };

        tracing::info!(
            order_id = %order_id,
            handler = handler.code(),
            amount,
            state = %aggregate.state(),
            "Payment recorded"
        );

        self.emit(OrderEvent::Paid(OrderPaid {
            order_id,
            order_code: aggregate.order.code.clone(),
            amount,
            authorized: target == OrderState::PaymentAuthorized,
            paid_at: aggregate.order.placed_at.unwrap_or(aggregate.order.updated_at),
        }))
        .await;

        Ok(aggregate)
    }

    /// Capture a payment left in the created state.
    pub async fn authorize_payment(&self, order_id: Uuid) -> Result<OrderAggregate, CommandError> {
        let _guard = self.locks.acquire(order_id).await;
        let aggregate = self.load(order_id).await?;

        let facts = aggregate.facts();
        ensure_can_perform(&facts, OrderAction::AuthorizePayment)?;
        ensure_transition(&facts, OrderState::PaymentAuthorized)?;

        let method_id = aggregate
            .payment
            .as_ref()
            .map(|payment| payment.method_id)
            .ok_or(OrderError::InvalidTransition {
                from: facts.state,
                to: OrderState::PaymentAuthorized,
                reason: "order has no payment",
            })?;

        let method = self
            .store
            .find_payment_method(method_id)
            .await?
            .ok_or(OrderError::PaymentMethodNotFound(method_id))?;

        let handler = self
            .payment_handlers
            .get(&method.handler_code)
            .ok_or_else(|| OrderError::MissingPaymentHandler(method.handler_code.clone()))?;

        let result = self
            .isolate(handler.as_ref(), handler.authorize_payment(&aggregate))
            .await
            .inspect_err(|_| self.metrics.record_payment_outcome(handler.code(), "failed"))?;

        if !result.success {
            self.metrics.record_payment_outcome(handler.code(), "declined");
            let message = result.error.unwrap_or_else(|| "Payment authorization declined".to_string());
            tracing::warn!(order_id = %order_id, handler = handler.code(), reason = %message, "Authorization declined");
            return Err(OrderError::PaymentDeclined { message, raw_error: None }.into());
        }
        self.metrics.record_payment_outcome(handler.code(), "authorized");

        let mut edit = aggregate.edit();
        edit.transition(OrderState::PaymentAuthorized)?;

        let aggregate = self.commit(edit).await?;
        tracing::info!(order_id = %order_id, handler = handler.code(), "Payment authorized");
        Ok(aggregate)
    }

    /// Run a provider call under the payment timeout, turning errors and panics into PAYMENT_FAILED.
    async fn isolate<T, F>(&self, handler: &dyn PaymentHandler, call: F) -> Result<T, OrderError>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        let code = handler.code();
        let timeout_ms = self.payment_timeout.as_millis() as u64;

        match tokio::time::timeout(self.payment_timeout, AssertUnwindSafe(call).catch_unwind()).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(e))) => {
                tracing::warn!(handler = code, error = %e, "Payment handler returned an error");
                Err(OrderError::PaymentFailed {
                    message: e.to_string(),
                    raw_error: Some(serde_json::json!({ "handler": code, "error": format!("{e:#}") })),
                })
            }
            Ok(Err(panic)) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(handler = code, panic = %message, "Payment handler panicked");
                Err(OrderError::PaymentFailed {
                    message: format!("Payment handler {code} panicked: {message}"),
                    raw_error: Some(serde_json::json!({ "handler": code, "panic": message })),
                })
            }
            Err(_) => {
                tracing::warn!(handler = code, timeout_ms, "Payment handler timed out");
                Err(OrderError::PaymentFailed {
                    message: format!("Payment handler {code} timed out after {timeout_ms} ms"),
                    raw_error: Some(serde_json::json!({ "handler": code, "timeout_ms": timeout_ms })),
                })
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
