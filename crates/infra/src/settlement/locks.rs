//! Per-order mutual exclusion.
//!
//! Callback handling, cancellation, retries and the sweeper all take the lock
//! of the order they touch. Holders of different orders never wait on each
//! other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use fmshop_core::OrderId;

#[derive(Debug, Default)]
pub struct OrderLocks {
    slots: Mutex<HashMap<OrderId, Arc<AsyncMutex<()>>>>,
}

impl OrderLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `order_id`. Released on drop.
    pub async fn lock(&self, order_id: OrderId) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            // Entries nobody holds or waits on are dropped here.
            slots.retain(|id, slot| *id == order_id || Arc::strong_count(slot) > 1);
            slots
                .entry(order_id)
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        debug!(%order_id, "waiting for order lock");
        slot.lock_owned().await
    }

    /// Number of tracked slots.
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn same_order_is_serialized() {
        let locks = Arc::new(OrderLocks::new());
        let order_id = OrderId::new();
        let inside = Arc::new(AtomicU32::new(0));
        let max_inside = Arc::new(AtomicU32::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let (locks, inside, max_inside) = (locks.clone(), inside.clone(), max_inside.clone());
            tasks.push(tokio::spawn(async move {
                let _guard = locks.lock(order_id).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_orders_do_not_block_and_slots_are_pruned() {
        let locks = OrderLocks::new();
        let a = locks.lock(OrderId::new()).await;
        let b = locks.lock(OrderId::new()).await;
        assert_eq!(locks.len(), 2);
        drop(a);
        drop(b);

        let _c = locks.lock(OrderId::new()).await;
        assert_eq!(locks.len(), 1);
    }
}
