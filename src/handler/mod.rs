use crate::app::AppState;
use axum::{
    routing::{get, post},
    Json, Router,
};

pub mod status;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/twilio/status",
            get(status::liveness).post(status::status_webhook),
        )
        .route("/health", get(health))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
