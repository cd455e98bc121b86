use uuid::Uuid;

use super::OrderCommandHandler;
use crate::domain::order::{
    ensure_can_perform, ensure_stock, CommandError, OrderAction, OrderAggregate, OrderError, OrderLine, Variant,
};

// Line edits. Quantities passed to the stock guard are always the absolute
// quantity the line would hold afterwards.

impl OrderCommandHandler {
    /// Add `quantity` of a variant. A variant already on the order is merged into its line.
    pub async fn add_line(
        &self,
        order_id: Uuid,
        variant_id: Uuid,
        quantity: u32,
    ) -> Result<OrderAggregate, CommandError> {
        self.retry_conflicts("add_line", move || self.try_add_line(order_id, variant_id, quantity))
            .await
    }

    async fn try_add_line(&self, order_id: Uuid, variant_id: Uuid, quantity: u32) -> Result<OrderAggregate, CommandError> {
        let _guard = self.locks.acquire(order_id).await;
        let aggregate = self.load(order_id).await?;
        ensure_can_perform(&aggregate.facts(), OrderAction::Modify)?;

        let variant = self
            .store
            .find_variant(variant_id)
            .await?
            .ok_or(OrderError::VariantNotFound(variant_id))?;

        let existing = aggregate
            .line_for_variant(variant_id)
            .map(|line| (line.id, line.quantity.saturating_add(quantity)));

        if let Some((line_id, merged)) = existing {
            tracing::debug!(order_id = %order_id, line_id = %line_id, quantity = merged, "Merging into existing line");
            return self.set_line_quantity(aggregate, line_id, &variant, merged).await;
        }

        if quantity == 0 {
            return Ok(aggregate);
        }

        ensure_stock(&variant, quantity)?;

        let line = OrderLine::priced(order_id, &variant, quantity);
        let line_id = line.id;
        let mut edit = aggregate.edit();
        edit.put_line(line);

        let aggregate = self.commit(edit).await?;
        tracing::info!(
            order_id = %order_id,
            line_id = %line_id,
            sku = %variant.sku,
            quantity,
            total = aggregate.order.total,
            "Order line added"
        );
        Ok(aggregate)
    }

    /// Set a line's quantity. Zero removes the line.
    pub async fn update_line(&self, line_id: Uuid, quantity: u32) -> Result<OrderAggregate, CommandError> {
        self.retry_conflicts("update_line", move || self.try_update_line(line_id, quantity))
            .await
    }

    async fn try_update_line(&self, line_id: Uuid, quantity: u32) -> Result<OrderAggregate, CommandError> {
        let order_id = self.owning_order(line_id).await?;
        let _guard = self.locks.acquire(order_id).await;
        let aggregate = self.load(order_id).await?;
        ensure_can_perform(&aggregate.facts(), OrderAction::Modify)?;

        let variant_id = aggregate
            .line(line_id)
            .map(|line| line.variant_id)
            .ok_or(OrderError::LineNotFound(line_id))?;

        if quantity == 0 {
            return self.drop_line(aggregate, line_id).await;
        }

        let variant = self
            .store
            .find_variant(variant_id)
            .await?
            .ok_or(OrderError::VariantNotFound(variant_id))?;

        self.set_line_quantity(aggregate, line_id, &variant, quantity).await
    }

    pub async fn remove_line(&self, line_id: Uuid) -> Result<OrderAggregate, CommandError> {
        self.retry_conflicts("remove_line", move || self.try_remove_line(line_id))
            .await
    }

    async fn try_remove_line(&self, line_id: Uuid) -> Result<OrderAggregate, CommandError> {
        let order_id = self.owning_order(line_id).await?;
        let _guard = self.locks.acquire(order_id).await;
        let aggregate = self.load(order_id).await?;
        ensure_can_perform(&aggregate.facts(), OrderAction::Modify)?;

        self.drop_line(aggregate, line_id).await
    }

    async fn owning_order(&self, line_id: Uuid) -> Result<Uuid, CommandError> {
        let line = self.store.find_line(line_id).await?;
        Ok(line.ok_or(OrderError::LineNotFound(line_id))?.order_id)
    }

    /// Reprice a line at the variant's current price for an absolute quantity.
    async fn set_line_quantity(
        &self,
        aggregate: OrderAggregate,
        line_id: Uuid,
        variant: &Variant,
        quantity: u32,
    ) -> Result<OrderAggregate, CommandError> {
        if quantity == 0 {
            return self.drop_line(aggregate, line_id).await;
        }

        ensure_stock(variant, quantity)?;

        let mut line = aggregate.line(line_id).cloned().ok_or(OrderError::LineNotFound(line_id))?;
        line.reprice(variant, quantity);

        let mut edit = aggregate.edit();
        edit.put_line(line);

        let aggregate = self.commit(edit).await?;
        tracing::info!(
            order_id = %aggregate.id(),
            line_id = %line_id,
            quantity,
            total = aggregate.order.total,
            "Order line updated"
        );
        Ok(aggregate)
    }

    async fn drop_line(&self, aggregate: OrderAggregate, line_id: Uuid) -> Result<OrderAggregate, CommandError> {
        let mut edit = aggregate.edit();
        if edit.remove_line(line_id).is_none() {
            return Err(OrderError::LineNotFound(line_id).into());
        }

        let aggregate = self.commit(edit).await?;
        tracing::info!(
            order_id = %aggregate.id(),
            line_id = %line_id,
            total = aggregate.order.total,
            "Order line removed"
        );
        Ok(aggregate)
    }
}
