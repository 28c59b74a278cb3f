//! Settlement: checkout, callback handling, cancellation and abandonment.
//!
//! The coordinator composes the inventory ledger, the settlement store and the
//! payment gateways. It owns no state of its own beyond per-order locks.

pub mod coordinator;
pub mod error;
pub mod locks;
pub mod sweeper;

pub use coordinator::{
    CheckoutCommand, CheckoutReceipt, OrderDetail, OrderStatusView, SettlementCoordinator,
    SettlementPolicy, SweepReport,
};
pub use error::SettlementError;
pub use locks::OrderLocks;
pub use sweeper::{AbandonmentSweeper, SweeperHandle};
