use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use service_core::{error::AppError, middleware::ClientOrigin};

use crate::{models::Identity, services::GateError, AppState};

/// Who is calling, as resolved by the authentication layer. Inserted into
/// request extensions for the admission and role layers and for handlers.
#[derive(Debug, Clone)]
pub struct Caller {
    pub identity: Option<Identity>,
    pub origin: ClientOrigin,
}

/// Mandatory authentication: reject unless a valid bearer token resolves to
/// an identity.
pub async fn require_auth(
    State(state): State<AppState>,
    origin: ClientOrigin,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let (mut parts, body) = req.into_parts();

    let identity = state
        .authenticator
        .authenticate(&parts.headers, origin, parts.uri.path())
        .await?;

    parts.extensions.insert(Caller {
        identity: Some(identity),
        origin,
    });

    Ok(next.run(Request::from_parts(parts, body)).await)
}

/// Optional authentication: attach the identity when the credential is good,
/// continue anonymously when it is missing or bad.
pub async fn optional_auth(
    State(state): State<AppState>,
    origin: ClientOrigin,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let (mut parts, body) = req.into_parts();

    let identity = state
        .authenticator
        .authenticate_optional(&parts.headers, origin, parts.uri.path())
        .await?;

    parts.extensions.insert(Caller { identity, origin });

    Ok(next.run(Request::from_parts(parts, body)).await)
}

/// Extractor for handlers behind [`require_auth`].
pub struct AuthUser(pub Identity);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Caller>()
            .and_then(|c| c.identity.clone())
            .map(AuthUser)
            .ok_or_else(|| GateError::NoIdentity.into())
    }
}

/// Extractor for handlers behind [`optional_auth`]; `None` for anonymous callers.
pub struct MaybeAuthUser(pub Option<Identity>);

#[async_trait]
impl<S> FromRequestParts<S> for MaybeAuthUser
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeAuthUser(
            parts
                .extensions
                .get::<Caller>()
                .and_then(|c| c.identity.clone()),
        ))
    }
}
