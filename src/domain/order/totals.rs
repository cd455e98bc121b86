use super::entities::{OrderLine, Shipment};
use super::value_objects::Money;

/// Derived order totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Totals {
    pub subtotal: Money,
    pub total: Money,
    pub total_quantity: u32,
}

/// Derive totals from the complete line set and shipment. Never patched incrementally.
pub fn recalculate(lines: &[OrderLine], shipment: Option<&Shipment>) -> Totals {
    let subtotal: Money = lines.iter().map(|line| line.line_price).sum();
    let total_quantity = lines.iter().fold(0u32, |sum, line| sum.saturating_add(line.quantity));
    let shipping = shipment.map_or(0, |s| s.amount);

    Totals {
        subtotal,
        total: subtotal + shipping,
        total_quantity,
    }
}
