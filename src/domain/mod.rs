// ============================================================================
// Domain Layer - Business Logic
// ============================================================================
//
// Pure order rules plus the command handler that applies them through the
// store, strategy registries and event sink ports.
//
// ============================================================================

pub mod order;
