/// Configuration management for the authentication engine
use crate::db::DatabaseOptions;
use crate::error::{AuthError, AuthResult};
use crate::obfuscate::{DEFAULT_PRIME, DEFAULT_XOR};
use crate::password::{MAX_COST, MIN_COST};
use crate::token::parse_key_material;
use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Prefix shared by every environment variable the engine reads
pub const ENV_PREFIX: &str = "AUTHED_";

/// Substrings that mark an environment variable as secret
const SECRET_MARKERS: [&str; 4] = ["token", "password", "key", "secret"];

/// Main engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub database: DatabaseConfig,
    pub token: TokenConfig,
    pub hashing: HashingConfig,
    pub ids: IdConfig,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
    pub busy_timeout_secs: u64,
}

/// Token signing and claim encryption
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    pub secret: String,
    /// 32 bytes as hex, base64 or raw
    pub encryption_key: String,
    pub algorithm: Algorithm,
    pub ttl_secs: u64,
    pub issuer: String,
    /// Clock skew tolerated on `exp` and `nbf`
    pub leeway_secs: u64,
}

/// Password hashing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashingConfig {
    /// Fixed cost; skips calibration when set
    pub cost: Option<u32>,
    pub start_cost: u32,
    pub target_ms: u64,
}

/// Public id obfuscation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdConfig {
    pub prime: u64,
    pub xor: u64,
}

impl DatabaseConfig {
    pub fn options(&self) -> DatabaseOptions {
        DatabaseOptions {
            max_connections: self.max_connections,
            busy_timeout: Duration::from_secs(self.busy_timeout_secs),
            ..Default::default()
        }
    }
}

impl HashingConfig {
    pub fn target(&self) -> Duration {
        Duration::from_millis(self.target_ms)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/authed.sqlite"),
            max_connections: 10,
            busy_timeout_secs: 5,
        }
    }
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self {
            cost: None,
            start_cost: 14,
            target_ms: 3000,
        }
    }
}

impl Default for IdConfig {
    fn default() -> Self {
        Self {
            prime: DEFAULT_PRIME,
            xor: DEFAULT_XOR,
        }
    }
}

impl TokenConfig {
    pub fn with_secrets(secret: impl Into<String>, encryption_key: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            encryption_key: encryption_key.into(),
            algorithm: Algorithm::HS256,
            ttl_secs: 7 * 24 * 60 * 60,
            issuer: "auth.service".to_string(),
            leeway_secs: 60,
        }
    }
}

impl EngineConfig {
    /// Defaults everywhere except the two secrets
    pub fn with_secrets(secret: impl Into<String>, encryption_key: impl Into<String>) -> Self {
        Self {
            database: DatabaseConfig::default(),
            token: TokenConfig::with_secrets(secret, encryption_key),
            hashing: HashingConfig::default(),
            ids: IdConfig::default(),
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> AuthResult<Self> {
        dotenv::dotenv().ok();

        let defaults = DatabaseConfig::default();
        let database = DatabaseConfig {
            path: env_var("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.path),
            max_connections: parse_var("DB_MAX_CONNECTIONS", defaults.max_connections)?,
            busy_timeout_secs: parse_var("DB_BUSY_TIMEOUT_SECS", defaults.busy_timeout_secs)?,
        };

        let secret = env_var("TOKEN_SECRET")
            .ok_or_else(|| AuthError::Config("AUTHED_TOKEN_SECRET required".to_string()))?;
        let encryption_key = env_var("ENCRYPTION_KEY")
            .ok_or_else(|| AuthError::Config("AUTHED_ENCRYPTION_KEY required".to_string()))?;

        let mut token = TokenConfig::with_secrets(secret, encryption_key);
        token.algorithm = parse_var("TOKEN_ALGORITHM", token.algorithm)?;
        token.ttl_secs = parse_var("TOKEN_TTL_SECS", token.ttl_secs)?;
        token.leeway_secs = parse_var("TOKEN_LEEWAY_SECS", token.leeway_secs)?;
        if let Some(issuer) = env_var("TOKEN_ISSUER") {
            token.issuer = issuer;
        }

        let defaults = HashingConfig::default();
        let hashing = HashingConfig {
            cost: env_var("HASH_COST")
                .map(|raw| {
                    raw.parse()
                        .map_err(|_| AuthError::Config(format!("Invalid AUTHED_HASH_COST: {}", raw)))
                })
                .transpose()?,
            start_cost: parse_var("HASH_START_COST", defaults.start_cost)?,
            target_ms: parse_var("HASH_TARGET_MS", defaults.target_ms)?,
        };

        let defaults = IdConfig::default();
        let ids = IdConfig {
            prime: parse_var("ID_PRIME", defaults.prime)?,
            xor: parse_var("ID_XOR", defaults.xor)?,
        };

        Ok(EngineConfig {
            database,
            token,
            hashing,
            ids,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> AuthResult<()> {
        if self.token.secret.len() < 32 {
            return Err(AuthError::Config(
                "Token secret must be at least 32 characters".to_string(),
            ));
        }

        if parse_key_material(&self.token.encryption_key).is_none() {
            return Err(AuthError::Config(
                "Encryption key must be 32 bytes (64 hex digits, base64, or raw)".to_string(),
            ));
        }

        if !matches!(
            self.token.algorithm,
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
        ) {
            return Err(AuthError::Config(format!(
                "Token algorithm must be HS256, HS384 or HS512, got {:?}",
                self.token.algorithm
            )));
        }

        if self.token.ttl_secs == 0 {
            return Err(AuthError::Config("Token TTL cannot be zero".to_string()));
        }

        if self.token.issuer.is_empty() {
            return Err(AuthError::Config("Token issuer cannot be empty".to_string()));
        }

        let cost_range = MIN_COST..=MAX_COST;
        if let Some(cost) = self.hashing.cost {
            if !cost_range.contains(&cost) {
                return Err(AuthError::Config(format!(
                    "Hash cost {} outside {}..={}",
                    cost, MIN_COST, MAX_COST
                )));
            }
        }
        if !cost_range.contains(&self.hashing.start_cost) {
            return Err(AuthError::Config(format!(
                "Hash start cost {} outside {}..={}",
                self.hashing.start_cost, MIN_COST, MAX_COST
            )));
        }

        if self.ids.prime % 2 == 0 {
            return Err(AuthError::Config("Id prime must be odd".to_string()));
        }

        if self.database.max_connections == 0 {
            return Err(AuthError::Config(
                "Database pool needs at least one connection".to_string(),
            ));
        }

        Ok(())
    }
}

/// Hide values of variables whose names look secret
pub fn mask_env_value<'a>(name: &str, value: &'a str) -> &'a str {
    let lower = name.to_lowercase();
    if SECRET_MARKERS.iter().any(|marker| lower.contains(marker)) {
        "SECRET"
    } else {
        value
    }
}

/// Read `AUTHED_<name>`, treating empty as unset
fn env_var(name: &str) -> Option<String> {
    let full = format!("{}{}", ENV_PREFIX, name);
    let value = env::var(&full).ok().filter(|v| !v.is_empty())?;

    tracing::debug!(name = %full, value = %mask_env_value(&full, &value), "Loaded environment variable");
    Some(value)
}

fn parse_var<T: FromStr>(name: &str, default: T) -> AuthResult<T> {
    match env_var(name) {
        Some(raw) => raw
            .parse()
            .map_err(|_| AuthError::Config(format!("Invalid {}{}: {}", ENV_PREFIX, name, raw))),
        None => Ok(default),
    }
}
