use axum::{
    extract::{Path, Request, State},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;
use std::collections::HashMap;
use uuid::Uuid;

use super::auth::Caller;
use crate::{
    models::{Identity, Role},
    services::GateError,
};

/// Path parameter naming the owner of the addressed resource.
pub const OWNER_PATH_PARAM: &str = "user_id";
/// Fallback carrier for routes whose path does not name the owner.
pub const OWNER_HEADER: &str = "x-resource-owner";

/// Roles allowed past a [`require_roles`] layer.
#[derive(Debug, Clone, Copy)]
pub struct RequiredRoles(pub &'static [Role]);

pub fn role_permits(role: Role, allowed: &[Role]) -> bool {
    allowed.contains(&role)
}

/// Allow the resource owner, or any admin.
pub fn owner_or_admin(identity: Option<&Identity>, owner: Option<&str>) -> Result<(), GateError> {
    match (identity, owner) {
        (None, None) => Err(GateError::OwnerNotSpecified),
        (None, Some(_)) => Err(GateError::NoIdentity),
        (Some(identity), _) if identity.is_admin() => Ok(()),
        (Some(_), None) => Err(GateError::OwnerNotSpecified),
        (Some(identity), Some(owner)) => {
            if owner.trim().parse::<Uuid>().is_ok_and(|owner| owner == identity.id) {
                Ok(())
            } else {
                Err(GateError::NotOwner)
            }
        }
    }
}

pub async fn require_roles(
    State(RequiredRoles(allowed)): State<RequiredRoles>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let path = req.uri().path().to_string();
    let identity = req
        .extensions()
        .get::<Caller>()
        .and_then(|c| c.identity.as_ref())
        .ok_or(GateError::NoIdentity)?;

    if !role_permits(identity.role, allowed) {
        tracing::warn!(
            identity_id = %identity.id,
            role = %identity.role,
            required = ?allowed,
            path = %path,
            "Insufficient role"
        );
        return Err(GateError::InsufficientRole {
            role: identity.role,
            required: allowed,
        }
        .into());
    }

    Ok(next.run(req).await)
}

pub async fn require_owner_or_admin(
    params: Option<Path<HashMap<String, String>>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let owner = params
        .as_ref()
        .and_then(|Path(p)| p.get(OWNER_PATH_PARAM).cloned())
        .or_else(|| {
            req.headers()
                .get(OWNER_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        });

    let identity = req.extensions().get::<Caller>().and_then(|c| c.identity.as_ref());

    if let Err(e) = owner_or_admin(identity, owner.as_deref()) {
        tracing::warn!(
            identity_id = ?identity.map(|i| i.id),
            role = ?identity.map(|i| i.role),
            owner = ?owner,
            path = %req.uri().path(),
            reason = %e,
            "Resource access denied"
        );
        return Err(e.into());
    }

    Ok(next.run(req).await)
}
