use thiserror::Error;

use fmshop_core::{DomainError, ProductId};

use crate::order::OrderStatus;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrderError {
    #[error("cart is empty")]
    EmptyCart,

    #[error("quantity for product {0} must be positive")]
    InvalidQuantity(ProductId),

    #[error("product {0} is not in the catalog")]
    UnknownProduct(ProductId),

    #[error("cannot move order from {from} to {to}")]
    InvalidStateTransition { from: OrderStatus, to: OrderStatus },

    #[error(transparent)]
    Domain(#[from] DomainError),
}
