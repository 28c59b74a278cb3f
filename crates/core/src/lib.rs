//! `fmshop-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives shared by the inventory,
//! order and payment modules (no infrastructure concerns).

pub mod aggregate;
pub mod error;
pub mod event;
pub mod id;
pub mod money;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use error::{DomainError, DomainResult};
pub use event::Event;
pub use id::{OrderId, PaymentId, ProductId, UserId};
pub use money::Money;
pub use value_object::ValueObject;
