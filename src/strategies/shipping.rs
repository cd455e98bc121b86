use async_trait::async_trait;

use super::registry::{Registry, Strategy};
use crate::domain::order::{Money, OrderAggregate};

/// Prices a shipping method for an order.
#[async_trait]
pub trait ShippingPriceCalculator: Strategy {
    /// `args` is the opaque argument object configured on the shipping method.
    async fn calculate_price(&self, order: &OrderAggregate, args: &serde_json::Value) -> Money;
}

pub type ShippingCalculators = Registry<dyn ShippingPriceCalculator>;

/// Same price for every order, read from `args.price`.
#[derive(Debug, Default)]
pub struct FlatPriceCalculator;

impl FlatPriceCalculator {
    pub const CODE: &'static str = "flat-price";
}

impl Strategy for FlatPriceCalculator {
    fn code(&self) -> &str {
        Self::CODE
    }
}

#[async_trait]
impl ShippingPriceCalculator for FlatPriceCalculator {
    async fn calculate_price(&self, _order: &OrderAggregate, args: &serde_json::Value) -> Money {
        args.get("price").and_then(|price| price.as_i64()).unwrap_or(0).max(0)
    }
}
