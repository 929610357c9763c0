use axum::{
    extract::{Path, State},
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{middleware::AuthUser, models::Identity, services::GateError, AppState};

pub async fn get_me(AuthUser(identity): AuthUser) -> Json<Identity> {
    Json(identity)
}

/// Fetch an identity by local id. Ownership is enforced by the route's
/// owner-or-admin layer.
pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Identity>, AppError> {
    let identity = state
        .authenticator
        .store()
        .find_by_id(user_id)
        .await
        .map_err(GateError::from)?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("User {} not found", user_id)))?;

    Ok(Json(identity))
}
