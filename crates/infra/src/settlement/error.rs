use thiserror::Error;

use fmshop_core::{DomainError, Money, OrderId};
use fmshop_inventory::InventoryError;
use fmshop_orders::{OrderError, OrderStatus};
use fmshop_payments::{GatewayError, PaymentError, Provider};

use crate::ledger::LedgerError;
use crate::store::StoreError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SettlementError {
    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Gateway stayed unavailable; the order keeps its reservations and can be
    /// retried.
    #[error("payment for order {order_id} deferred: {message}")]
    PaymentDeferred { order_id: OrderId, message: String },

    #[error("no payment with {provider} reference {provider_ref}")]
    UnknownTransaction {
        provider: Provider,
        provider_ref: String,
    },

    #[error("amount mismatch: expected {expected}, provider reported {actual}")]
    AmountMismatch { expected: Money, actual: Money },

    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    #[error("order {order_id} is {status}")]
    InvalidOrderState {
        order_id: OrderId,
        status: OrderStatus,
    },

    #[error("order {order_id} used all {attempts} payment attempts")]
    PaymentAttemptsExhausted { order_id: OrderId, attempts: u32 },
}

impl From<LedgerError> for SettlementError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Inventory(e) => SettlementError::Inventory(e),
            LedgerError::Store(e) => SettlementError::Store(e),
        }
    }
}

impl SettlementError {
    /// Stable machine-readable code for API responses and logs.
    pub fn reason_code(&self) -> &'static str {
        match self {
            SettlementError::Order(e) => match e {
                OrderError::EmptyCart => "empty_cart",
                OrderError::InvalidQuantity(_) => "invalid_quantity",
                OrderError::UnknownProduct(_) => "unknown_product",
                OrderError::InvalidStateTransition { .. } => "invalid_state_transition",
                OrderError::Domain(DomainError::Overflow) => "amount_overflow",
                OrderError::Domain(_) => "invalid_order",
            },
            SettlementError::Inventory(e) => match e {
                InventoryError::InsufficientStock { .. } => "out_of_stock",
                InventoryError::InvalidQuantity => "invalid_quantity",
                InventoryError::UnknownProduct(_) => "unknown_product",
                _ => "inventory_conflict",
            },
            SettlementError::Gateway(e) => match e {
                GatewayError::Unavailable(_) => "gateway_unavailable",
                GatewayError::Rejected(_) | GatewayError::NotConfigured(_) => "gateway_rejected",
                GatewayError::InvalidSignature => "invalid_signature",
                GatewayError::MalformedPayload(_) => "malformed_callback",
            },
            SettlementError::Payment(_) => "invalid_state_transition",
            SettlementError::Store(_) => "store_error",
            SettlementError::PaymentDeferred { .. } => "gateway_unavailable",
            SettlementError::UnknownTransaction { .. } => "unknown_transaction",
            SettlementError::AmountMismatch { .. } => "amount_mismatch",
            SettlementError::OrderNotFound(_) => "order_not_found",
            SettlementError::InvalidOrderState { .. } => "invalid_state_transition",
            SettlementError::PaymentAttemptsExhausted { .. } => "payment_attempts_exhausted",
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            SettlementError::PaymentDeferred { .. } => true,
            SettlementError::Gateway(e) => e.is_retryable(),
            SettlementError::Store(e) => e.is_conflict(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fmshop_core::ProductId;

    #[test]
    fn stock_and_gateway_failures_have_distinct_codes() {
        let stock = SettlementError::from(LedgerError::Inventory(InventoryError::InsufficientStock {
            product_id: ProductId::new(),
            requested: 2,
            available: 0,
        }));
        assert_eq!(stock.reason_code(), "out_of_stock");
        assert!(!stock.is_retryable());

        let deferred = SettlementError::PaymentDeferred {
            order_id: OrderId::new(),
            message: "503".into(),
        };
        assert_eq!(deferred.reason_code(), "gateway_unavailable");
        assert!(deferred.is_retryable());

        let rejected = SettlementError::Gateway(GatewayError::Rejected("bad amount".into()));
        assert_eq!(rejected.reason_code(), "gateway_rejected");
        assert!(!rejected.is_retryable());
    }

    #[test]
    fn store_conflicts_are_retryable() {
        let conflict: SettlementError = StoreError::Conflict("v3".into()).into();
        assert!(conflict.is_retryable());
        let backend: SettlementError = StoreError::Backend("down".into()).into();
        assert!(!backend.is_retryable());
        assert_eq!(backend.reason_code(), "store_error");
    }

    #[test]
    fn order_domain_errors_are_not_quantity_errors() {
        let overflow = SettlementError::from(OrderError::Domain(DomainError::Overflow));
        assert_eq!(overflow.reason_code(), "amount_overflow");
        assert!(!overflow.is_retryable());

        let conflict = SettlementError::from(OrderError::Domain(DomainError::conflict("placed")));
        assert_eq!(conflict.reason_code(), "invalid_order");
    }
}
