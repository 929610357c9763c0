//! Request-gate services: token verification, identity provisioning and
//! admission control.

pub mod admission;
mod authenticator;
pub mod error;
pub mod identity_store;
mod jwt;

pub use admission::{
    Admission, AdmissionControl, AdmissionController, BucketKey, KeySource, Rejection, Tier, TierPolicies,
    TierPolicy,
};
pub use authenticator::Authenticator;
pub use error::GateError;
pub use identity_store::{IdentityStore, InMemoryIdentityStore, PgIdentityStore, StoreError};
pub use jwt::{JwtService, TokenError};
