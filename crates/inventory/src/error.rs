use thiserror::Error;

use fmshop_core::{OrderId, ProductId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InventoryError {
    #[error("insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: i64,
    },

    #[error("quantity must be positive")]
    InvalidQuantity,

    #[error("no stock record for product {0}")]
    UnknownProduct(ProductId),

    #[error("order {order_id} already holds a reservation on product {product_id}")]
    DuplicateReservation {
        order_id: OrderId,
        product_id: ProductId,
    },

    #[error("order {order_id} holds no reservation on product {product_id}")]
    ReservationNotFound {
        order_id: OrderId,
        product_id: ProductId,
    },

    #[error("reservation of order {order_id} on product {product_id} is already committed")]
    ReservationCommitted {
        order_id: OrderId,
        product_id: ProductId,
    },

    #[error("reservation of order {order_id} on product {product_id} was released")]
    ReservationReleased {
        order_id: OrderId,
        product_id: ProductId,
    },
}
