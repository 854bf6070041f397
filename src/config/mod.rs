use std::env;
use std::net::SocketAddr;

use chrono::Duration;
use thiserror::Error;

pub mod cors;
pub mod security;

pub use cors::create_cors_layer;
pub use security::create_security_headers_layer;

const DEFAULT_DATABASE_URL: &str = "postgres://localhost/conference";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3001";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_TICKET_TTL_SECS: i64 = 604_800;
const DEFAULT_LEGACY_PREFIX: &str = "CONF";
const DEFAULT_LEGACY_MAX_AGE_SECS: i64 = 604_800;
const DEFAULT_ADMISSION_ATTEMPTS: u32 = 3;

/// Minimum length of the HMAC key used to sign tickets.
pub const MIN_TICKET_SECRET_LEN: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// What happens to earlier tickets of an enrollment when a new one is issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReissuePolicy {
    /// Every issued ticket stays redeemable until used or expired.
    AllowMany,
    /// Issuing revokes all unused tickets for the same user and activity.
    InvalidatePrevious,
}

impl ReissuePolicy {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "allow-many" | "allow_many" => Some(Self::AllowMany),
            "invalidate-previous" | "invalidate_previous" => Some(Self::InvalidatePrevious),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LegacyTicketConfig {
    pub prefix: String,
    pub max_age: Duration,
}

#[derive(Debug, Clone)]
pub struct TicketConfig {
    pub secret: String,
    pub ttl: Duration,
    pub reissue_policy: ReissuePolicy,
    /// `None` disables the legacy fallback entirely.
    pub legacy: Option<LegacyTicketConfig>,
}

#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    pub max_attempts: u32,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_ADMISSION_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub bind_addr: SocketAddr,
    pub cors_allowed_origins: Vec<String>,
    pub production: bool,
    pub ticket: TicketConfig,
    pub admission: AdmissionConfig,
}

impl Config {
    /// Loads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url =
            lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

        let max_connections = parse_or("DATABASE_MAX_CONNECTIONS", &lookup, DEFAULT_MAX_CONNECTIONS)?;

        let bind_raw = lookup("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_raw.parse().map_err(|e| ConfigError::Invalid {
            name: "BIND_ADDR",
            reason: format!("{e}"),
        })?;

        let cors_allowed_origins = lookup("CORS_ALLOWED_ORIGINS")
            .unwrap_or_else(|| cors::DEFAULT_ALLOWED_ORIGINS.to_string())
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(String::from)
            .collect();

        let production = lookup("RUST_ENV")
            .map(|v| v.eq_ignore_ascii_case("production"))
            .unwrap_or(false);

        let admission = AdmissionConfig {
            max_attempts: parse_or("ADMISSION_MAX_ATTEMPTS", &lookup, DEFAULT_ADMISSION_ATTEMPTS)?,
        };
        if admission.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                name: "ADMISSION_MAX_ATTEMPTS",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            database_url,
            max_connections,
            bind_addr,
            cors_allowed_origins,
            production,
            ticket: TicketConfig::from_lookup(&lookup)?,
            admission,
        })
    }
}

impl TicketConfig {
    fn from_lookup<F>(lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let secret = lookup("TICKET_SECRET").ok_or(ConfigError::Missing("TICKET_SECRET"))?;
        if secret.chars().count() < MIN_TICKET_SECRET_LEN {
            return Err(ConfigError::Invalid {
                name: "TICKET_SECRET",
                reason: format!("must be at least {MIN_TICKET_SECRET_LEN} characters"),
            });
        }

        let ttl_secs = parse_or("TICKET_TTL_SECONDS", lookup, DEFAULT_TICKET_TTL_SECS)?;
        if ttl_secs <= 0 {
            return Err(ConfigError::Invalid {
                name: "TICKET_TTL_SECONDS",
                reason: "must be positive".to_string(),
            });
        }

        let reissue_policy = match lookup("TICKET_REISSUE_POLICY") {
            None => ReissuePolicy::AllowMany,
            Some(raw) => ReissuePolicy::parse(&raw).ok_or_else(|| ConfigError::Invalid {
                name: "TICKET_REISSUE_POLICY",
                reason: format!("expected allow-many or invalidate-previous, got '{raw}'"),
            })?,
        };

        let legacy_enabled = parse_or("LEGACY_TICKETS_ENABLED", lookup, true)?;
        let legacy = if legacy_enabled {
            let prefix = lookup("LEGACY_TICKET_PREFIX")
                .unwrap_or_else(|| DEFAULT_LEGACY_PREFIX.to_string());
            if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(ConfigError::Invalid {
                    name: "LEGACY_TICKET_PREFIX",
                    reason: "must be non-empty ASCII alphanumeric".to_string(),
                });
            }
            let max_age_secs = parse_or(
                "LEGACY_TICKET_MAX_AGE_SECONDS",
                lookup,
                DEFAULT_LEGACY_MAX_AGE_SECS,
            )?;
            Some(LegacyTicketConfig {
                prefix,
                max_age: Duration::seconds(max_age_secs),
            })
        } else {
            None
        };

        Ok(Self {
            secret,
            ttl: Duration::seconds(ttl_secs),
            reissue_policy,
            legacy,
        })
    }
}

fn parse_or<T, F>(name: &'static str, lookup: &F, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
    }
}
