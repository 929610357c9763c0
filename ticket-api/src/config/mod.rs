use secrecy::Secret;
use service_core::config as core_config;
use service_core::error::AppError;
use std::{env, str::FromStr, time::Duration};

use crate::services::admission::{TierPolicies, TierPolicy};

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    /// OTLP collector; span export is off when unset.
    pub otlp_endpoint: Option<String>,
    /// Postgres identity store; the in-memory store is used when unset.
    pub database: Option<DatabaseConfig>,
    pub jwt: JwtConfig,
    pub rate_limit: RateLimitConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// HS256 shared secret. Takes precedence over the key paths.
    pub secret: Option<Secret<String>>,
    /// RS256 verification key (PEM).
    pub public_key_path: Option<String>,
    /// RS256 signing key (PEM), only needed by local tooling.
    pub private_key_path: Option<String>,
    pub issuer: String,
    pub audience: Option<String>,
    pub leeway_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub policies: TierPolicies,
    /// How often idle buckets are swept from memory.
    pub sweep_interval_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            policies: TierPolicies::default(),
            sweep_interval_seconds: 300,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

impl ApiConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        Self::from_lookup(common, |key| env::var(key).ok())
    }

    /// Build from an arbitrary variable source. `from_env` passes the process
    /// environment; tests pass a map.
    pub fn from_lookup<F>(common: core_config::Config, lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup: &lookup };

        let environment: Environment = vars
            .get("ENVIRONMENT", Some("dev"), false)?
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let database = match vars.optional("DATABASE_URL") {
            Some(url) => Some(DatabaseConfig {
                url,
                max_connections: vars.parse("DATABASE_MAX_CONNECTIONS", Some("10"), false)?,
                min_connections: vars.parse("DATABASE_MIN_CONNECTIONS", Some("1"), false)?,
            }),
            None => None,
        };

        let defaults = TierPolicies::default();

        let config = ApiConfig {
            common,
            environment,
            service_name: vars.get("SERVICE_NAME", Some("ticket-api"), false)?,
            service_version: vars.get("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), false)?,
            log_level: vars.get("LOG_LEVEL", Some("info"), false)?,
            otlp_endpoint: vars.optional("OTLP_ENDPOINT"),
            database,
            jwt: JwtConfig {
                secret: vars.optional("JWT_SECRET").map(Secret::new),
                public_key_path: vars.optional("JWT_PUBLIC_KEY_PATH"),
                private_key_path: vars.optional("JWT_PRIVATE_KEY_PATH"),
                issuer: vars.get("JWT_ISSUER", None, is_prod)?,
                audience: vars.optional("JWT_AUDIENCE"),
                leeway_seconds: vars.parse("JWT_LEEWAY_SECONDS", Some("0"), false)?,
            },
            rate_limit: RateLimitConfig {
                policies: TierPolicies {
                    general: vars.tier("GENERAL", &defaults.general)?,
                    authentication: vars.tier("AUTH", &defaults.authentication)?,
                    ticket_creation: vars.tier("TICKET", &defaults.ticket_creation)?,
                },
                sweep_interval_seconds: vars.parse(
                    "RATE_LIMIT_SWEEP_INTERVAL_SECONDS",
                    Some("300"),
                    false,
                )?,
            },
            security: SecurityConfig {
                allowed_origins: vars
                    .get("ALLOWED_ORIGINS", Some("http://localhost:3000"), is_prod)?
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.jwt.secret.is_none() && self.jwt.public_key_path.is_none() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Either JWT_SECRET or JWT_PUBLIC_KEY_PATH must be set"
            )));
        }

        for (name, policy) in [
            ("GENERAL", &self.rate_limit.policies.general),
            ("AUTH", &self.rate_limit.policies.authentication),
            ("TICKET", &self.rate_limit.policies.ticket_creation),
        ] {
            if policy.points == 0 {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "RATE_LIMIT_{}_POINTS must be positive",
                    name
                )));
            }
            if policy.window.is_zero() {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "RATE_LIMIT_{}_WINDOW_SECONDS must be positive",
                    name
                )));
            }
        }

        if self.rate_limit.sweep_interval_seconds == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "RATE_LIMIT_SWEEP_INTERVAL_SECONDS must be positive"
            )));
        }

        if self.environment == Environment::Prod {
            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }

            if self.database.is_none() {
                tracing::warn!("DATABASE_URL not set in production; identities will not survive restarts");
            }
        }

        Ok(())
    }
}

struct Vars<'a, F> {
    lookup: &'a F,
}

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    fn get(&self, key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
        match self.optional(key) {
            Some(val) => Ok(val),
            None => {
                if is_prod {
                    Err(AppError::ConfigError(anyhow::anyhow!(
                        "{} is required in production but not set",
                        key
                    )))
                } else if let Some(def) = default {
                    Ok(def.to_string())
                } else {
                    Err(AppError::ConfigError(anyhow::anyhow!(
                        "{} is required but not set",
                        key
                    )))
                }
            }
        }
    }

    fn parse<T>(&self, key: &str, default: Option<&str>, is_prod: bool) -> Result<T, AppError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(key, default, is_prod)?
            .trim()
            .parse()
            .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
    }

    /// Per-tier numbers fall back to the built-in table in every environment.
    fn tier(&self, name: &str, defaults: &TierPolicy) -> Result<TierPolicy, AppError> {
        let points = defaults.points.to_string();
        let window = defaults.window.as_secs().to_string();
        let block = defaults.block_duration.as_secs().to_string();

        Ok(TierPolicy {
            points: self.parse(&format!("RATE_LIMIT_{}_POINTS", name), Some(&points), false)?,
            window: Duration::from_secs(self.parse(
                &format!("RATE_LIMIT_{}_WINDOW_SECONDS", name),
                Some(&window),
                false,
            )?),
            block_duration: Duration::from_secs(self.parse(
                &format!("RATE_LIMIT_{}_BLOCK_SECONDS", name),
                Some(&block),
                false,
            )?),
            // Key sources are fixed per tier; only the numbers are tunable.
            key_source: defaults.key_source,
        })
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" | "development" | "test" => Ok(Environment::Dev),
            "prod" | "production" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
