pub mod identity;
pub mod role;

pub use identity::{Identity, IdentityClaims, NewIdentity};
pub use role::Role;
