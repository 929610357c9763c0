//! Capability tiers assigned to identities.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordered capability tier: `User < Manager < Admin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Manager,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Manager => "manager",
            Role::Admin => "admin",
        }
    }

    /// Derive a role from identity-provider group claims. `admin` wins over
    /// `manager`; anything else is a plain `user`.
    pub fn from_groups<S: AsRef<str>>(groups: &[S]) -> Self {
        let has = |name: &str| groups.iter().any(|g| g.as_ref() == name);

        if has("admin") {
            Role::Admin
        } else if has("manager") {
            Role::Manager
        } else {
            Role::User
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Role::User),
            "manager" => Ok(Role::Manager),
            "admin" => Ok(Role::Admin),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}
