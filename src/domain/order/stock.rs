use super::entities::Variant;
use super::errors::OrderError;

/// Point-in-time stock check against the variant's current counter.
///
/// The quantity is absolute: callers pass the full quantity the line would hold,
/// not the delta being added. Nothing is reserved here; stock is only committed
/// when a payment succeeds.
pub fn ensure_stock(variant: &Variant, quantity: u32) -> Result<(), OrderError> {
    if variant.stock >= quantity {
        Ok(())
    } else {
        Err(OrderError::NotEnoughStock {
            variant_id: variant.id,
            requested: quantity,
            available: variant.stock,
        })
    }
}
