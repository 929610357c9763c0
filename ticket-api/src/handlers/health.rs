use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::AppState;

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let store = match state.authenticator.store().ping().await {
        Ok(()) => "ok",
        Err(e) => {
            tracing::error!(error = %e, "Identity store health check failed");
            "unavailable"
        }
    };

    let status = if store == "ok" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if status.is_success() { "healthy" } else { "degraded" },
            "service": state.config.service_name,
            "version": state.config.service_version,
            "identityStore": store,
        })),
    )
}
