// ============================================================================
// Order Domain - the order aggregate and its lifecycle
// ============================================================================
//
// - Value objects (OrderState, Email, Address, Money)
// - Entities (Order, OrderLine, Shipment, Payment, reference data)
// - State machine (action permission and transition validity gates)
// - Stock guard and totals recalculation
// - Aggregate + OrderEdit (change recording for one atomic commit)
// - Events handed to the event sink
// - Commands, errors and the command handler that orchestrates them
//
// ============================================================================

pub mod value_objects;
pub mod entities;
pub mod state_machine;
pub mod stock;
pub mod totals;
pub mod events;
pub mod commands;
pub mod errors;
pub mod aggregate;
pub mod command_handler;

// Re-export for convenience
pub use value_objects::*;
pub use entities::*;
pub use state_machine::*;
pub use stock::*;
pub use totals::*;
pub use events::*;
pub use commands::*;
pub use errors::*;
pub use aggregate::*;
pub use command_handler::*;
