//! Provider callbacks. The raw body is handed to the gateway untouched; the
//! signature covers the exact bytes the provider sent.

use axum::{
    Json, Router,
    body::Bytes,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
};

use fmshop_payments::Provider;

use crate::app::errors;
use crate::app::state::AppState;

pub fn router() -> Router {
    Router::new()
        .route("/zalopay/callback", post(zalopay_callback))
        .route("/payos/webhook", post(payos_webhook))
}

pub async fn zalopay_callback(
    Extension(state): Extension<AppState>,
    body: Bytes,
) -> axum::response::Response {
    handle(&state, Provider::ZaloPay, &body, None).await
}

pub async fn payos_webhook(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    let signature = headers
        .get("x-signature")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    handle(&state, Provider::PayOs, &body, signature.as_deref()).await
}

/// Providers expect their own ack format with 200. Retryable failures answer
/// 503 so the provider redelivers.
async fn handle(
    state: &AppState,
    provider: Provider,
    body: &[u8],
    signature: Option<&str>,
) -> axum::response::Response {
    let outcome = state
        .coordinator
        .handle_callback(provider, body, signature)
        .await;

    let Some(ack) = state.coordinator.callback_response(provider, &outcome) else {
        return errors::json_error(
            StatusCode::NOT_FOUND,
            "gateway_rejected",
            format!("{provider} is not configured"),
        );
    };

    let status = match &outcome {
        Err(e) if e.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    (status, Json(ack)).into_response()
}
