//! Identity model - the local record of an authenticated principal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Role;

/// Verified JWT payload issued by the external identity provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// Subject (stable external id)
    pub sub: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub given_name: String,
    #[serde(default)]
    pub family_name: String,
    /// Issuer
    pub iss: String,
    /// Audience
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    /// Group memberships, used to derive the role on first sight
    #[serde(default)]
    pub groups: Vec<String>,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

/// Fields required to provision a new identity.
#[derive(Debug, Clone)]
pub struct NewIdentity {
    pub subject_id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
}

impl From<&IdentityClaims> for NewIdentity {
    fn from(claims: &IdentityClaims) -> Self {
        Self {
            subject_id: claims.sub.clone(),
            email: claims.email.clone(),
            first_name: claims.given_name.clone(),
            last_name: claims.family_name.clone(),
            role: Role::from_groups(&claims.groups),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: Uuid,
    pub subject_id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub last_login_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Identity {
    /// Materialize a freshly provisioned identity.
    pub fn new(new: NewIdentity) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            subject_id: new.subject_id,
            email: new.email,
            first_name: new.first_name,
            last_name: new.last_name,
            role: new.role,
            last_login_at: now,
            created_at: now,
        }
    }

    pub fn display_name(&self) -> String {
        let full = format!("{} {}", self.first_name, self.last_name);
        let full = full.trim();
        if full.is_empty() {
            self.email.clone()
        } else {
            full.to_string()
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(groups: &[&str]) -> IdentityClaims {
        IdentityClaims {
            sub: "sub-1".to_string(),
            email: "ada@example.com".to_string(),
            given_name: "Ada".to_string(),
            family_name: "Lovelace".to_string(),
            iss: "https://idp.example.com".to_string(),
            aud: None,
            groups: groups.iter().map(|g| g.to_string()).collect(),
            iat: 0,
            exp: 0,
        }
    }

    #[test]
    fn test_new_identity_copies_claims() {
        let identity = Identity::new(NewIdentity::from(&claims(&["manager"])));

        assert_eq!(identity.subject_id, "sub-1");
        assert_eq!(identity.email, "ada@example.com");
        assert_eq!(identity.role, Role::Manager);
        assert_eq!(identity.display_name(), "Ada Lovelace");
        assert_eq!(identity.created_at, identity.last_login_at);
    }

    #[test]
    fn test_display_name_falls_back_to_email() {
        let mut c = claims(&[]);
        c.given_name.clear();
        c.family_name.clear();

        let identity = Identity::new(NewIdentity::from(&c));
        assert_eq!(identity.display_name(), "ada@example.com");
    }

    #[test]
    fn test_claims_default_missing_groups() {
        let json = r#"{"sub":"s","iss":"i","iat":1,"exp":2}"#;
        let c: IdentityClaims = serde_json::from_str(json).unwrap();
        assert!(c.groups.is_empty());
        assert!(c.aud.is_none());
    }
}
