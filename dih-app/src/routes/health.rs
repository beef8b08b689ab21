use crate::server::AppState;
use axum::routing::get;
use axum::{Extension, Json};
use chrono::Utc;
use std::sync::Arc;

pub fn router() -> axum::Router {
    axum::Router::new().route("/api/health", get(get_health))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn get_health(Extension(state): Extension<Arc<AppState>>) -> Json<serde_json::Value> {
    let client = state.chat.client();
    Json(serde_json::json!({
        "status": "ok",
        "provider": client.provider(),
        "model": client.model_name(),
        "checked_at": Utc::now(),
    }))
}
