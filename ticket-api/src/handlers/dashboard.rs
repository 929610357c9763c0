use axum::Json;
use serde_json::{json, Value};

use crate::middleware::MaybeAuthUser;

/// Dashboard shell. Anonymous viewers get the public variant.
pub async fn dashboard(MaybeAuthUser(identity): MaybeAuthUser) -> Json<Value> {
    match identity {
        Some(identity) => Json(json!({
            "viewer": identity.display_name(),
            "role": identity.role,
            "personalized": true,
        })),
        None => Json(json!({ "viewer": null, "personalized": false })),
    }
}
