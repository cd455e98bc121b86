use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

/// Unused entries are pruned once the table grows past this size.
const PRUNE_THRESHOLD: usize = 1024;

/// Per-order async mutexes serializing commands within this process.
///
/// A command holds the guard for its entire read, validate, provider call and
/// commit sequence, so two commands on the same order never interleave.
#[derive(Clone, Default)]
pub struct OrderLocks {
    table: Arc<Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>>,
}

impl OrderLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, order_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            if table.len() >= PRUNE_THRESHOLD {
                table.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            table.entry(order_id).or_default().clone()
        };

        lock.lock_owned().await
    }

    pub fn tracked(&self) -> usize {
        self.table.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
