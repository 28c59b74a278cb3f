use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use fmshop_core::ProductId;

use crate::app::state::AppState;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/:product_id", get(get_inventory))
        .route("/:product_id/restock", post(restock))
        .route("/:product_id/rebuild", post(rebuild))
}

/// Record, log and a replay check in one response.
pub async fn get_inventory(
    Extension(state): Extension<AppState>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let product_id: ProductId = match errors::parse_id(&id, "product id") {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let ledger = state.coordinator.ledger();
    let record = match ledger.record(product_id).await {
        Ok(r) => r,
        Err(e) => return errors::ledger_error_to_response(e),
    };
    let transactions = match ledger.transactions(product_id).await {
        Ok(t) => t,
        Err(e) => return errors::ledger_error_to_response(e),
    };
    let check = match ledger.verify(product_id).await {
        Ok(c) => c,
        Err(e) => return errors::ledger_error_to_response(e),
    };

    Json(dto::InventoryResponse {
        record,
        transactions,
        check,
    })
    .into_response()
}

pub async fn restock(
    Extension(state): Extension<AppState>,
    Path(id): Path<String>,
    Json(body): Json<dto::RestockRequest>,
) -> axum::response::Response {
    let product_id: ProductId = match errors::parse_id(&id, "product id") {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match state
        .coordinator
        .ledger()
        .restock(product_id, body.quantity, body.unit.as_deref())
        .await
    {
        Ok(tx) => (StatusCode::CREATED, Json(tx)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

/// Recompute the counter from the log, repairing any drift.
pub async fn rebuild(
    Extension(state): Extension<AppState>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let product_id: ProductId = match errors::parse_id(&id, "product id") {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match state.coordinator.ledger().rebuild(product_id).await {
        Ok(record) => Json(record).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}
