use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use fmshop_infra::ledger::LedgerError;
use fmshop_infra::settlement::SettlementError;
use fmshop_infra::store::StoreError;
use fmshop_inventory::InventoryError;
use fmshop_orders::OrderError;
use fmshop_payments::GatewayError;

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
            "retryable": false,
        })),
    )
        .into_response()
}

pub fn status_for(err: &SettlementError) -> StatusCode {
    match err {
        SettlementError::Order(OrderError::InvalidStateTransition { .. }) => StatusCode::CONFLICT,
        SettlementError::Order(_) => StatusCode::BAD_REQUEST,
        SettlementError::Inventory(InventoryError::UnknownProduct(_)) => StatusCode::NOT_FOUND,
        SettlementError::Inventory(InventoryError::InvalidQuantity) => StatusCode::BAD_REQUEST,
        SettlementError::Inventory(_) => StatusCode::CONFLICT,
        SettlementError::Gateway(e) => match e {
            GatewayError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Rejected(_) | GatewayError::NotConfigured(_) => StatusCode::BAD_GATEWAY,
            GatewayError::InvalidSignature => StatusCode::UNAUTHORIZED,
            GatewayError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
        },
        SettlementError::Payment(_) => StatusCode::CONFLICT,
        SettlementError::Store(e) => match e {
            StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            StoreError::Conflict(_) | StoreError::Duplicate(_) => StatusCode::CONFLICT,
            StoreError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
        },
        SettlementError::PaymentDeferred { .. } => StatusCode::SERVICE_UNAVAILABLE,
        SettlementError::UnknownTransaction { .. } => StatusCode::NOT_FOUND,
        SettlementError::AmountMismatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        SettlementError::OrderNotFound(_) => StatusCode::NOT_FOUND,
        SettlementError::InvalidOrderState { .. } => StatusCode::CONFLICT,
        SettlementError::PaymentAttemptsExhausted { .. } => StatusCode::CONFLICT,
    }
}

/// `{error, message, retryable}`; deferred payments also carry the order id
/// so the client can retry against it.
pub fn settlement_error_to_response(err: SettlementError) -> axum::response::Response {
    let status = status_for(&err);
    let mut body = json!({
        "error": err.reason_code(),
        "message": err.to_string(),
        "retryable": err.is_retryable(),
    });
    if let SettlementError::PaymentDeferred { order_id, .. } = &err {
        body["order_id"] = json!(order_id);
    }
    (status, axum::Json(body)).into_response()
}

pub fn ledger_error_to_response(err: LedgerError) -> axum::response::Response {
    settlement_error_to_response(err.into())
}

pub fn parse_id<T: std::str::FromStr>(
    raw: &str,
    what: &'static str,
) -> Result<T, axum::response::Response> {
    raw.parse().map_err(|_| {
        json_error(
            StatusCode::BAD_REQUEST,
            "invalid_id",
            format!("{what} must be a UUID"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fmshop_core::{OrderId, ProductId};

    #[test]
    fn maps_failure_classes_to_statuses() {
        let stock = SettlementError::Inventory(InventoryError::InsufficientStock {
            product_id: ProductId::new(),
            requested: 3,
            available: 1,
        });
        assert_eq!(status_for(&stock), StatusCode::CONFLICT);

        let empty = SettlementError::Order(OrderError::EmptyCart);
        assert_eq!(status_for(&empty), StatusCode::BAD_REQUEST);

        let overflow = SettlementError::Order(OrderError::Domain(fmshop_core::DomainError::Overflow));
        assert_eq!(status_for(&overflow), StatusCode::BAD_REQUEST);

        let signature = SettlementError::Gateway(GatewayError::InvalidSignature);
        assert_eq!(status_for(&signature), StatusCode::UNAUTHORIZED);

        let rejected = SettlementError::Gateway(GatewayError::Rejected("amount".into()));
        assert_eq!(status_for(&rejected), StatusCode::BAD_GATEWAY);

        let missing = SettlementError::OrderNotFound(OrderId::new());
        assert_eq!(status_for(&missing), StatusCode::NOT_FOUND);

        let backend = SettlementError::Store(StoreError::Backend("io".into()));
        assert_eq!(status_for(&backend), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn deferred_payment_is_retryable_unavailable() {
        let err = SettlementError::PaymentDeferred {
            order_id: OrderId::new(),
            message: "timeout".into(),
        };
        assert_eq!(status_for(&err), StatusCode::SERVICE_UNAVAILABLE);
        assert!(err.is_retryable());
    }

    #[test]
    fn parse_id_rejects_garbage() {
        assert!(parse_id::<OrderId>("nope", "order id").is_err());
        assert!(parse_id::<OrderId>(&OrderId::new().to_string(), "order id").is_ok());
    }
}
