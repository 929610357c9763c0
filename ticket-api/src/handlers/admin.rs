use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use service_core::error::AppError;

use crate::{
    middleware::AuthUser,
    services::{BucketKey, Tier},
    AppState,
};

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub tier: Tier,
    pub key: String,
    /// False when there was no state to clear.
    pub cleared: bool,
}

/// Clear one caller's bucket in one tier.
pub async fn reset_rate_limit(
    State(state): State<AppState>,
    AuthUser(admin): AuthUser,
    Path((tier, key)): Path<(String, String)>,
) -> Result<Json<ResetResponse>, AppError> {
    let tier: Tier = tier
        .parse()
        .map_err(|e: String| AppError::BadRequest(anyhow::anyhow!(e)))?;

    let bucket = BucketKey::from(key.as_str());
    let cleared = state.admission.reset_bucket(&bucket, tier);

    tracing::info!(
        admin_id = %admin.id,
        tier = %tier,
        key = %bucket,
        cleared,
        "Rate limit bucket reset"
    );

    Ok(Json(ResetResponse { tier, key, cleared }))
}
