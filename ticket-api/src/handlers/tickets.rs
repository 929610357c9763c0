use axum::{http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use uuid::Uuid;

use crate::middleware::AuthUser;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTicketRequest {
    pub short_description: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketAccepted {
    pub requested_by: Uuid,
    pub short_description: String,
}

/// Accept a ticket request for forwarding.
pub async fn create_ticket(
    AuthUser(identity): AuthUser,
    Json(req): Json<CreateTicketRequest>,
) -> Result<(StatusCode, Json<TicketAccepted>), AppError> {
    let short_description = req.short_description.trim();
    if short_description.is_empty() {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "shortDescription must not be empty"
        )));
    }

    tracing::info!(
        identity_id = %identity.id,
        has_description = req.description.is_some(),
        "Ticket request accepted"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(TicketAccepted {
            requested_by: identity.id,
            short_description: short_description.to_string(),
        }),
    ))
}

/// Manager work queue.
pub async fn manager_queue(AuthUser(identity): AuthUser) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "viewer": identity.id,
        "role": identity.role,
        "items": [],
    }))
}
