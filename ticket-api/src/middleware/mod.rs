pub mod auth;
pub mod rate_limit;
pub mod roles;

pub use auth::{optional_auth, require_auth, AuthUser, Caller, MaybeAuthUser};
pub use rate_limit::{admission_middleware, TierGate};
pub use roles::{
    owner_or_admin, require_owner_or_admin, require_roles, role_permits, RequiredRoles,
};
