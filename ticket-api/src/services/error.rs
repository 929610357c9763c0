use service_core::error::AppError;
use thiserror::Error;

use super::admission::Rejection;
use super::identity_store::StoreError;
use super::jwt::TokenError;
use crate::models::Role;

/// Why the gate refused a request.
#[derive(Error, Debug)]
pub enum GateError {
    #[error("Missing Authorization header")]
    MissingCredential,

    #[error("Authorization header must use the Bearer scheme")]
    MalformedHeader,

    #[error("Bearer token is empty")]
    EmptyToken,

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Authentication required")]
    NoIdentity,

    #[error("Role {role} is not permitted; requires one of {}", format_roles(.required))]
    InsufficientRole {
        role: Role,
        required: &'static [Role],
    },

    #[error("Resource owner not specified")]
    OwnerNotSpecified,

    #[error("Access restricted to the resource owner or an administrator")]
    NotOwner,

    #[error("{}", .0.tier.rejection_message())]
    RateLimited(Rejection),
}

fn format_roles(roles: &[Role]) -> String {
    roles
        .iter()
        .map(Role::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

impl GateError {
    /// Credential problems, as opposed to backing-store or policy failures.
    pub fn is_credential_failure(&self) -> bool {
        matches!(
            self,
            GateError::MissingCredential
                | GateError::MalformedHeader
                | GateError::EmptyToken
                | GateError::Token(_)
        )
    }
}

impl From<Rejection> for GateError {
    fn from(rejection: Rejection) -> Self {
        GateError::RateLimited(rejection)
    }
}

impl From<GateError> for AppError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::MissingCredential
            | GateError::MalformedHeader
            | GateError::EmptyToken
            | GateError::Token(_)
            | GateError::NoIdentity => AppError::Unauthenticated(anyhow::anyhow!(err.to_string())),
            GateError::InsufficientRole { .. } | GateError::OwnerNotSpecified | GateError::NotOwner => {
                AppError::Unauthorized(anyhow::anyhow!(err.to_string()))
            }
            GateError::Store(e) => AppError::IdentityStore(anyhow::Error::new(e)),
            GateError::RateLimited(rejection) => AppError::TooManyRequests {
                code: rejection.tier.error_code(),
                message: rejection.tier.rejection_message().to_string(),
                retry_after_ms: rejection.retry_after_ms(),
            },
        }
    }
}
