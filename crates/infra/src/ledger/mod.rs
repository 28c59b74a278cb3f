//! Inventory ledger: per-product stock counters backed by an append-only
//! transaction log.
//!
//! Reservations are keyed by `(order_id, product_id)`. `release` and `commit`
//! act on the quantity recorded at reservation time and are idempotent: a
//! repeated call returns `false` and writes nothing.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use fmshop_core::{OrderId, ProductId};
use fmshop_inventory::{InventoryError, InventoryRecord, InventoryTransaction};

use crate::store::StoreError;

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryLedger;
pub use postgres::PostgresLedger;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of comparing the cached counter with a replay of the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerCheck {
    pub product_id: ProductId,
    pub recorded: i64,
    pub replayed: i64,
}

impl LedgerCheck {
    pub fn is_consistent(&self) -> bool {
        self.recorded == self.replayed
    }

    pub fn drift(&self) -> i64 {
        self.recorded - self.replayed
    }
}

#[async_trait]
pub trait InventoryLedger: Send + Sync {
    /// Stock intake; creates the record on first restock.
    async fn restock(
        &self,
        product_id: ProductId,
        quantity: u32,
        unit: Option<&str>,
    ) -> Result<InventoryTransaction, LedgerError>;

    /// Atomic decrement-if-available.
    async fn reserve(
        &self,
        order_id: OrderId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<InventoryTransaction, LedgerError>;

    /// Return a reservation to stock. `false` when already released.
    async fn release(&self, order_id: OrderId, product_id: ProductId) -> Result<bool, LedgerError>;

    /// Finalize a reservation. `false` when already committed.
    async fn commit(&self, order_id: OrderId, product_id: ProductId) -> Result<bool, LedgerError>;

    async fn record(&self, product_id: ProductId) -> Result<InventoryRecord, LedgerError>;

    /// The product's log in sequence order.
    async fn transactions(
        &self,
        product_id: ProductId,
    ) -> Result<Vec<InventoryTransaction>, LedgerError>;

    async fn verify(&self, product_id: ProductId) -> Result<LedgerCheck, LedgerError>;

    /// Recompute the counter from the log and store it.
    async fn rebuild(&self, product_id: ProductId) -> Result<InventoryRecord, LedgerError>;
}
