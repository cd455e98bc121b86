pub mod locks;
pub mod memory;
pub mod postgres;
pub mod repository;

pub use locks::OrderLocks;
pub use memory::InMemoryOrderStore;
pub use postgres::PgOrderStore;
pub use repository::{CatalogWriter, OrderStore, StoreError};
