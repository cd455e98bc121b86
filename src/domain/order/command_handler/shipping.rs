use uuid::Uuid;

use super::OrderCommandHandler;
use crate::domain::order::{
    ensure_can_perform, CommandError, OrderAction, OrderAggregate, OrderError, OrderState, PricedShippingMethod,
    Shipment,
};

impl OrderCommandHandler {
    /// Enabled methods serving the order's destination, each priced for this order.
    ///
    /// Empty when the order has no shipping address or can no longer be modified.
    /// Methods whose price calculator is not registered are skipped.
    pub async fn find_available_shipping_methods(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<PricedShippingMethod>, CommandError> {
        let aggregate = self.load(order_id).await?;

        let Some(address) = aggregate.order.shipping_address.as_ref() else {
            return Ok(Vec::new());
        };
        if aggregate.state() != OrderState::Modifying {
            return Ok(Vec::new());
        }

        let Some(country) = self
            .store
            .find_country_by_code(&address.country_code)
            .await?
            .filter(|country| country.enabled)
        else {
            tracing::debug!(order_id = %order_id, country = %address.country_code, "Destination country unavailable");
            return Ok(Vec::new());
        };

        let candidates = self.store.find_shipping_methods_for_country(country.id).await?;
        let mut priced = Vec::with_capacity(candidates.len());

        for method in candidates {
            let Some(calculator) = self.shipping_calculators.get(&method.price_calculator.code) else {
                tracing::warn!(
                    order_id = %order_id,
                    method_id = %method.id,
                    calculator = %method.price_calculator.code,
                    "Skipping shipping method with unregistered price calculator"
                );
                continue;
            };

            let price = calculator.calculate_price(&aggregate, &method.price_calculator.args).await;
            priced.push(PricedShippingMethod { method, price });
        }

        Ok(priced)
    }

    /// Select a shipping method, replacing any previous shipment.
    pub async fn add_shipment(&self, order_id: Uuid, method_id: Uuid) -> Result<OrderAggregate, CommandError> {
        self.retry_conflicts("add_shipment", move || self.try_add_shipment(order_id, method_id))
            .await
    }

    async fn try_add_shipment(&self, order_id: Uuid, method_id: Uuid) -> Result<OrderAggregate, CommandError> {
        let _guard = self.locks.acquire(order_id).await;
        let aggregate = self.load(order_id).await?;

        if aggregate.order.shipping_address.is_none() {
            return Err(OrderError::MissingShippingAddress.into());
        }
        ensure_can_perform(&aggregate.facts(), OrderAction::AddShipment)?;

        let method = self
            .store
            .find_shipping_method(method_id)
            .await?
            .ok_or(OrderError::ShippingMethodNotFound(method_id))?;

        let calculator = self
            .shipping_calculators
            .get(&method.price_calculator.code)
            .ok_or_else(|| OrderError::MissingShippingPriceCalculator(method.price_calculator.code.clone()))?;

        let amount = calculator.calculate_price(&aggregate, &method.price_calculator.args).await;

        let mut edit = aggregate.edit();
        edit.set_shipment(Shipment {
            id: Uuid::new_v4(),
            order_id,
            amount,
            method: method.name.clone(),
            tracking_code: None,
            carrier: None,
        });

        let aggregate = self.commit(edit).await?;
        tracing::info!(
            order_id = %order_id,
            method = %method.name,
            amount,
            total = aggregate.order.total,
            "Shipment selected"
        );
        Ok(aggregate)
    }
}
