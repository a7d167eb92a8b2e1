//! Typed application configuration parsed from environment variables.
//!
//! SYSTEM CONTEXT
//! ==============
//! `main` loads an optional `.env` file, then builds one `AppConfig` that is
//! shared read-only through `AppState`. Billing thresholds live here so the
//! pricing rules stay pure functions of their inputs.

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_LATE_CANCEL_THRESHOLD_HOURS: i64 = 12;
pub const DEFAULT_MAX_LATE_CANCELLATIONS: i32 = 4;
const DEFAULT_SUBSCRIPTION_SWEEP_SECS: u64 = 300;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("{key} has an invalid value: {value}")]
    Invalid { key: &'static str, value: String },
    #[error("set exactly one of JWT_SECRET or JWT_PUBLIC_KEY_PEM")]
    AmbiguousJwtKey,
}

/// How bearer tokens are verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JwtKey {
    /// HS256 shared secret.
    Secret(String),
    /// RS256 public key in PEM form (e.g. the Keycloak realm key).
    RsaPublicPem(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JwtConfig {
    pub key: JwtKey,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

/// Billing knobs consumed by the booking and subscription services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillingConfig {
    pub late_cancel_threshold_hours: i64,
    pub max_late_cancellations: i32,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            late_cancel_threshold_hours: DEFAULT_LATE_CANCEL_THRESHOLD_HOURS,
            max_late_cancellations: DEFAULT_MAX_LATE_CANCELLATIONS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    pub db_max_connections: u32,
    pub jwt: JwtConfig,
    pub cors_allowed_origins: Vec<String>,
    pub billing: BillingConfig,
    pub subscription_sweep_secs: u64,
    pub subscription_sweeper_enabled: bool,
}

impl AppConfig {
    /// Build the configuration from the process environment.
    ///
    /// Required:
    /// - `DATABASE_URL`
    /// - one of `JWT_SECRET` / `JWT_PUBLIC_KEY_PEM`
    ///
    /// Optional:
    /// - `PORT` (8080), `DB_MAX_CONNECTIONS` (5)
    /// - `JWT_ISSUER`, `JWT_AUDIENCE`
    /// - `CORS_ALLOWED_ORIGINS` (`*`)
    /// - `LATE_CANCEL_THRESHOLD_HOURS` (12), `MAX_LATE_CANCELLATIONS` (4)
    /// - `SUBSCRIPTION_SWEEP_SECS` (300), `SUBSCRIPTION_SWEEPER` (true)
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` naming the offending variable.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env_string("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let jwt_key = match (env_string("JWT_SECRET"), env_string("JWT_PUBLIC_KEY_PEM")) {
            (Some(secret), None) => JwtKey::Secret(secret),
            (None, Some(pem)) => JwtKey::RsaPublicPem(pem),
            (None, None) => return Err(ConfigError::Missing("JWT_SECRET")),
            (Some(_), Some(_)) => return Err(ConfigError::AmbiguousJwtKey),
        };

        let billing = BillingConfig {
            late_cancel_threshold_hours: env_parse_strict(
                "LATE_CANCEL_THRESHOLD_HOURS",
                DEFAULT_LATE_CANCEL_THRESHOLD_HOURS,
            )?,
            max_late_cancellations: env_parse_strict("MAX_LATE_CANCELLATIONS", DEFAULT_MAX_LATE_CANCELLATIONS)?,
        };
        if billing.max_late_cancellations < 1 {
            return Err(ConfigError::Invalid {
                key: "MAX_LATE_CANCELLATIONS",
                value: billing.max_late_cancellations.to_string(),
            });
        }

        Ok(Self {
            database_url,
            port: env_parse_strict("PORT", DEFAULT_PORT)?,
            db_max_connections: env_parse("DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS),
            jwt: JwtConfig { key: jwt_key, issuer: env_string("JWT_ISSUER"), audience: env_string("JWT_AUDIENCE") },
            cors_allowed_origins: parse_origins(env_string("CORS_ALLOWED_ORIGINS").as_deref().unwrap_or("*")),
            billing,
            subscription_sweep_secs: env_parse("SUBSCRIPTION_SWEEP_SECS", DEFAULT_SUBSCRIPTION_SWEEP_SECS).max(1),
            subscription_sweeper_enabled: env_bool("SUBSCRIPTION_SWEEPER").unwrap_or(true),
        })
    }
}

/// Split a comma-separated origin list, dropping blanks.
pub(crate) fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// Like `env_parse`, but a present-but-unparseable value is an error.
fn env_parse_strict<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr + Copy,
{
    match env_string(key) {
        None => Ok(default),
        Some(raw) => {
            let parsed = raw.trim().parse::<T>();
            parsed.map_err(|_| ConfigError::Invalid { key, value: raw })
        }
    }
}

pub(crate) fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .and_then(|raw| match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
