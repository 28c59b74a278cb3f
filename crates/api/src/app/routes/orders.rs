use axum::{
    Json, Router,
    extract::{Extension, Path},
    response::IntoResponse,
    routing::{get, post},
};

use fmshop_core::{OrderId, UserId};

use crate::app::state::AppState;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/status", get(get_order_status))
        .route("/orders/:id/cancel", post(cancel_order))
        .route("/orders/:id/retry-payment", post(retry_payment))
        .route("/orders/:id/reconcile", post(reconcile_payment))
        .route("/users/:id/orders", get(list_user_orders))
}

pub async fn get_order(
    Extension(state): Extension<AppState>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let order_id: OrderId = match errors::parse_id(&id, "order id") {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match state.coordinator.order_detail(order_id).await {
        Ok(detail) => Json(dto::OrderDetailResponse {
            order: dto::OrderResponse::from(&detail.order),
            payments: detail.payments,
        })
        .into_response(),
        Err(e) => errors::settlement_error_to_response(e),
    }
}

pub async fn get_order_status(
    Extension(state): Extension<AppState>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let order_id: OrderId = match errors::parse_id(&id, "order id") {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match state.coordinator.query_order_status(order_id).await {
        Ok(view) => Json(view).into_response(),
        Err(e) => errors::settlement_error_to_response(e),
    }
}

pub async fn cancel_order(
    Extension(state): Extension<AppState>,
    Path(id): Path<String>,
    Json(body): Json<dto::CancelOrderRequest>,
) -> axum::response::Response {
    let order_id: OrderId = match errors::parse_id(&id, "order id") {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match state.coordinator.cancel_order(order_id, body.user_id).await {
        Ok(order) => Json(dto::OrderResponse::from(&order)).into_response(),
        Err(e) => errors::settlement_error_to_response(e),
    }
}

pub async fn retry_payment(
    Extension(state): Extension<AppState>,
    Path(id): Path<String>,
    Json(body): Json<dto::RetryPaymentRequest>,
) -> axum::response::Response {
    let order_id: OrderId = match errors::parse_id(&id, "order id") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let method = match dto::parse_method(&body.method) {
        Ok(m) => m,
        Err(resp) => return resp,
    };

    match state.coordinator.retry_payment(order_id, method).await {
        Ok(receipt) => Json(receipt).into_response(),
        Err(e) => errors::settlement_error_to_response(e),
    }
}

pub async fn reconcile_payment(
    Extension(state): Extension<AppState>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let order_id: OrderId = match errors::parse_id(&id, "order id") {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match state.coordinator.reconcile_payment(order_id).await {
        Ok(view) => Json(view).into_response(),
        Err(e) => errors::settlement_error_to_response(e),
    }
}

pub async fn list_user_orders(
    Extension(state): Extension<AppState>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let user_id: UserId = match errors::parse_id(&id, "user id") {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match state.coordinator.orders_for_user(user_id).await {
        Ok(orders) => {
            let body: Vec<dto::OrderResponse> = orders.iter().map(dto::OrderResponse::from).collect();
            Json(body).into_response()
        }
        Err(e) => errors::settlement_error_to_response(e),
    }
}
