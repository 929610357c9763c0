use axum::Json;
use serde::Serialize;

use crate::{middleware::MaybeAuthUser, models::Identity};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<Identity>,
}

/// Report whether the presented credential resolves to an identity.
pub async fn session(MaybeAuthUser(identity): MaybeAuthUser) -> Json<SessionResponse> {
    Json(SessionResponse {
        authenticated: identity.is_some(),
        user: identity,
    })
}
