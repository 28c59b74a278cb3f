//! Inventory ledger domain module.
//!
//! Stock is tracked per product as an append-only log of
//! [`InventoryTransaction`]s. The current [`InventoryRecord`] is derived state:
//! it can always be rebuilt by replaying the log through [`StockItem`].
//!
//! Pure, deterministic domain logic (no IO, no locking, no storage).

pub mod error;
pub mod stock;
pub mod transaction;

pub use error::InventoryError;
pub use stock::{InventoryRecord, Reservation, ReservationState, StockCommand, StockItem};
pub use transaction::{InventoryTransaction, TransactionKind, net_quantity};
