//! Bearer token verification against the identity provider's signing key.

use chrono::Utc;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use secrecy::ExposeSecret;
use std::fs;
use thiserror::Error;

use crate::config::JwtConfig;
use crate::models::IdentityClaims;

/// Why a bearer token was not accepted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("Malformed token: {0}")]
    Malformed(String),

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Token issuer is not trusted")]
    UntrustedIssuer,

    #[error("Token audience does not match")]
    InvalidAudience,

    #[error("Token expired")]
    Expired,
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => TokenError::InvalidSignature,
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidIssuer => TokenError::UntrustedIssuer,
            ErrorKind::InvalidAudience => TokenError::InvalidAudience,
            _ => TokenError::Malformed(err.to_string()),
        }
    }
}

/// Verifies identity-provider tokens. Signs only when an encoding key is
/// configured (shared secret, or a private key for local tooling and tests).
#[derive(Clone)]
pub struct JwtService {
    algorithm: Algorithm,
    decoding_key: DecodingKey,
    encoding_key: Option<EncodingKey>,
    issuer: String,
    audience: Option<String>,
    leeway_seconds: u64,
}

impl JwtService {
    /// Build from configuration: HS256 with `secret`, otherwise RS256 with
    /// the PEM public key at `public_key_path`.
    pub fn new(config: &JwtConfig) -> Result<Self, anyhow::Error> {
        let service = if let Some(secret) = &config.secret {
            tracing::info!("JWT verifier initialized with HS256 shared secret");
            Self::from_secret(secret.expose_secret().as_bytes(), &config.issuer)
        } else if let Some(public_key_path) = &config.public_key_path {
            let public_key_pem = fs::read_to_string(public_key_path).map_err(|e| {
                anyhow::anyhow!("Failed to read public key from {}: {}", public_key_path, e)
            })?;
            let decoding_key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
                .map_err(|e| anyhow::anyhow!("Failed to parse public key: {}", e))?;

            let encoding_key = match &config.private_key_path {
                Some(path) => {
                    let pem = fs::read_to_string(path).map_err(|e| {
                        anyhow::anyhow!("Failed to read private key from {}: {}", path, e)
                    })?;
                    Some(
                        EncodingKey::from_rsa_pem(pem.as_bytes())
                            .map_err(|e| anyhow::anyhow!("Failed to parse private key: {}", e))?,
                    )
                }
                None => None,
            };

            tracing::info!("JWT verifier initialized with RS256 public key");
            Self {
                algorithm: Algorithm::RS256,
                decoding_key,
                encoding_key,
                issuer: config.issuer.clone(),
                audience: None,
                leeway_seconds: 0,
            }
        } else {
            return Err(anyhow::anyhow!(
                "Either JWT_SECRET or JWT_PUBLIC_KEY_PATH must be configured"
            ));
        };

        Ok(service
            .with_audience(config.audience.clone())
            .with_leeway(config.leeway_seconds))
    }

    pub fn from_secret(secret: &[u8], issuer: &str) -> Self {
        Self {
            algorithm: Algorithm::HS256,
            decoding_key: DecodingKey::from_secret(secret),
            encoding_key: Some(EncodingKey::from_secret(secret)),
            issuer: issuer.to_string(),
            audience: None,
            leeway_seconds: 0,
        }
    }

    pub fn with_audience(mut self, audience: Option<String>) -> Self {
        self.audience = audience;
        self
    }

    pub fn with_leeway(mut self, leeway_seconds: u64) -> Self {
        self.leeway_seconds = leeway_seconds;
        self
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Sign arbitrary claims with the configured key.
    pub fn sign(&self, claims: &IdentityClaims) -> Result<String, anyhow::Error> {
        let key = self
            .encoding_key
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("No signing key configured"))?;

        encode(&Header::new(self.algorithm), claims, key)
            .map_err(|e| anyhow::anyhow!("Failed to encode token: {}", e))
    }

    /// Verify signature, issuer and expiry, in that order.
    pub fn verify(&self, token: &str) -> Result<IdentityClaims, TokenError> {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = self.leeway_seconds;
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        match &self.audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }

        let claims = decode::<IdentityClaims>(token, &self.decoding_key, &validation)?.claims;

        if claims.iss != self.issuer {
            return Err(TokenError::UntrustedIssuer);
        }

        if claims.sub.trim().is_empty() {
            return Err(TokenError::Malformed("empty subject".to_string()));
        }

        // The decoder already enforces exp (with leeway); this check is the
        // strict one that reports a token expiring this very second.
        if Utc::now().timestamp() >= claims.exp {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }
}
