// ============================================================================
// Strategies - pluggable payment and shipping capabilities
// ============================================================================
//
// Capabilities are registered by code in explicit registries that are handed
// to the order engine at construction. There is no global registration.
//
// ============================================================================

pub mod payment;
pub mod registry;
pub mod shipping;

pub use payment::{AuthorizePaymentResult, CreatePaymentResult, PaymentHandler, PaymentHandlers, TestPaymentHandler};
pub use registry::{Registry, Strategy};
pub use shipping::{FlatPriceCalculator, ShippingCalculators, ShippingPriceCalculator};
