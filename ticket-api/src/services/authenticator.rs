//! Bearer-token authentication with transparent identity provisioning.

use axum::http::{header, HeaderMap};
use chrono::Utc;
use service_core::middleware::ClientOrigin;
use std::sync::Arc;

use super::error::GateError;
use super::identity_store::{IdentityStore, StoreError};
use super::jwt::JwtService;
use crate::models::{Identity, IdentityClaims, NewIdentity};

const BEARER_PREFIX: &str = "Bearer ";

/// Resolves a verified identity from the `Authorization` header, creating a
/// local record the first time a subject is seen.
#[derive(Clone)]
pub struct Authenticator {
    jwt: JwtService,
    store: Arc<dyn IdentityStore>,
}

impl Authenticator {
    pub fn new(jwt: JwtService, store: Arc<dyn IdentityStore>) -> Self {
        Self { jwt, store }
    }

    pub fn store(&self) -> &Arc<dyn IdentityStore> {
        &self.store
    }

    /// Mandatory authentication. Every failure is an error.
    pub async fn authenticate(
        &self,
        headers: &HeaderMap,
        origin: ClientOrigin,
        path: &str,
    ) -> Result<Identity, GateError> {
        let claims = match self.verify_header(headers) {
            Ok(claims) => claims,
            Err(e) => {
                tracing::warn!(%origin, path, reason = %e, "Authentication failed");
                return Err(e);
            }
        };

        let identity = self.provision(&claims).await.map_err(|e| {
            tracing::error!(%origin, path, subject = %claims.sub, error = %e, "Identity provisioning failed");
            GateError::from(e)
        })?;

        tracing::info!(
            %origin,
            path,
            identity_id = %identity.id,
            role = %identity.role,
            "Authenticated request"
        );

        Ok(identity)
    }

    /// Optional authentication. Credential problems downgrade the request to
    /// anonymous; a failing identity store is still reported.
    pub async fn authenticate_optional(
        &self,
        headers: &HeaderMap,
        origin: ClientOrigin,
        path: &str,
    ) -> Result<Option<Identity>, GateError> {
        match self.authenticate(headers, origin, path).await {
            Ok(identity) => Ok(Some(identity)),
            Err(e) if e.is_credential_failure() => {
                tracing::debug!(%origin, path, reason = %e, "Proceeding anonymously");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn verify_header(&self, headers: &HeaderMap) -> Result<IdentityClaims, GateError> {
        let value = headers
            .get(header::AUTHORIZATION)
            .ok_or(GateError::MissingCredential)?;

        let token = value
            .to_str()
            .ok()
            .and_then(|v| v.strip_prefix(BEARER_PREFIX))
            .ok_or(GateError::MalformedHeader)?
            .trim();

        if token.is_empty() {
            return Err(GateError::EmptyToken);
        }

        Ok(self.jwt.verify(token)?)
    }

    /// Find or create the local identity for verified claims, then record the
    /// login. The role of an existing identity is left untouched.
    pub async fn provision(&self, claims: &IdentityClaims) -> Result<Identity, StoreError> {
        let now = Utc::now();

        if let Some(existing) = self.store.find_by_subject(&claims.sub).await? {
            return self.store.touch_last_login(existing.id, now).await;
        }

        match self.store.create(NewIdentity::from(claims)).await {
            Ok(created) => {
                tracing::info!(
                    identity_id = %created.id,
                    role = %created.role,
                    "Provisioned new identity"
                );
                Ok(created)
            }
            Err(StoreError::Conflict(subject)) => {
                // Lost a race with a concurrent first login for this subject.
                tracing::debug!(subject = %subject, "Identity created concurrently, re-fetching");
                let existing = self.store.find_by_subject(&subject).await?.ok_or_else(|| {
                    StoreError::Unavailable(anyhow::anyhow!(
                        "Identity for subject {} conflicted but could not be read back",
                        subject
                    ))
                })?;
                self.store.touch_last_login(existing.id, now).await
            }
            Err(e) => Err(e),
        }
    }
}
