use axum::Json;
use axum::extract::Extension;
use serde_json::json;

use crate::app::state::AppState;

pub async fn health(Extension(state): Extension<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "providers": state.coordinator.gateways().providers(),
    }))
}
