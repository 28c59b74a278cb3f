use axum::{
    Json, Router,
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
};

use fmshop_infra::settlement::CheckoutCommand;

use crate::app::state::AppState;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new().route("/checkout", post(checkout))
}

pub async fn checkout(
    Extension(state): Extension<AppState>,
    Json(body): Json<dto::CheckoutRequest>,
) -> axum::response::Response {
    let method = match dto::parse_method(&body.method) {
        Ok(m) => m,
        Err(resp) => return resp,
    };

    let command = CheckoutCommand {
        user_id: body.user_id,
        items: body.items,
        shipping: body.shipping,
        method,
    };

    match state.coordinator.checkout(command).await {
        Ok(receipt) => (StatusCode::CREATED, Json(receipt)).into_response(),
        Err(e) => errors::settlement_error_to_response(e),
    }
}
