//! Orders domain module.
//!
//! An [`Order`] is created from a validated [`Cart`] with prices snapshotted
//! from the catalog, then moves through its status lifecycle only via
//! commands handled by the aggregate. No IO, no storage, no inventory calls:
//! reservation is owned by the settlement layer.

pub mod cart;
pub mod error;
pub mod order;

pub use cart::{Cart, CartItem, ProductSnapshot, ShippingInfo};
pub use error::OrderError;
pub use order::{
    CancelReason, Order, OrderCommand, OrderEvent, OrderItem, OrderParts, OrderStatus,
};
