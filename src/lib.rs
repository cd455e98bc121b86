//! Commerce order engine: the order aggregate, its state machine, line and
//! stock rules, shipping and payment orchestration, and the persistence and
//! event ports around them.

pub mod config;
pub mod domain;
pub mod messaging;
pub mod metrics;
pub mod store;
pub mod strategies;
pub mod utils;
