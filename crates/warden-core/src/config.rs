//! Configuration loading for the trust-and-safety layer.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ConfigError;

pub const DEFAULT_REQUEST_TTL_SECS: u64 = 300;
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 300;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 1000;
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 32 * 1024;
pub const DEFAULT_AUDIT_CAPACITY: usize = 10_000;

/// Consent engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsentSettings {
    /// Lifetime of a pending consent request.
    pub request_ttl_secs: u64,
    /// Lifetime of an issued token, capped by the request expiry.
    pub token_ttl_secs: u64,
    /// Hex-encoded key for the token binding. Random per process when unset.
    pub token_secret: Option<String>,
}

impl Default for ConsentSettings {
    fn default() -> Self {
        Self {
            request_ttl_secs: DEFAULT_REQUEST_TTL_SECS,
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
            token_secret: None,
        }
    }
}

impl ConsentSettings {
    pub fn request_ttl(&self) -> Duration {
        Duration::from_secs(self.request_ttl_secs)
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    /// Decode the configured binding key, if any.
    pub fn secret_bytes(&self) -> Result<Option<Vec<u8>>, ConfigError> {
        match &self.token_secret {
            None => Ok(None),
            Some(hex_key) => {
                let bytes = hex::decode(hex_key.trim()).map_err(|e| {
                    ConfigError::InvalidValue {
                        key: "consent.token_secret".into(),
                        message: e.to_string(),
                    }
                })?;
                if bytes.len() < 16 {
                    return Err(ConfigError::InvalidValue {
                        key: "consent.token_secret".into(),
                        message: "key must be at least 16 bytes".into(),
                    });
                }
                Ok(Some(bytes))
            }
        }
    }
}

/// Tool gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    pub cache_ttl_secs: u64,
    pub cache_max_entries: usize,
    /// Also write an audit event when a call is served from cache.
    pub audit_cache_hits: bool,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            cache_max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            audit_cache_hits: false,
        }
    }
}

impl GatewaySettings {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Prompt-injection guard settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardSettings {
    /// Messages above this size are rejected without scanning.
    pub max_message_bytes: usize,
    /// Additional case-insensitive patterns appended to the built-in catalogue.
    pub extra_patterns: Vec<String>,
}

impl Default for GuardSettings {
    fn default() -> Self {
        Self {
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            extra_patterns: Vec::new(),
        }
    }
}

/// In-memory audit log settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSettings {
    pub capacity: usize,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_AUDIT_CAPACITY,
        }
    }
}

/// Top-level Warden configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    pub consent: ConsentSettings,
    pub gateway: GatewaySettings,
    pub guard: GuardSettings,
    pub audit: AuditSettings,
}

impl WardenConfig {
    /// Load config from a JSON file, falling back to defaults, then env vars.
    ///
    /// A missing file is not an error; a malformed one is.
    pub fn load(config_path: &Path) -> Result<Self, ConfigError> {
        let mut config = match std::fs::read_to_string(config_path) {
            Ok(raw) => {
                info!("Loading configuration from {}", config_path.display());
                serde_json::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config file at {}, using defaults", config_path.display());
                WardenConfig::default()
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `WARDEN_*` environment overrides.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(v) = env_parse("WARDEN_CONSENT_TTL_SECS")? {
            self.consent.request_ttl_secs = v;
        }
        if let Some(v) = env_parse("WARDEN_TOKEN_TTL_SECS")? {
            self.consent.token_ttl_secs = v;
        }
        if let Ok(secret) = std::env::var("WARDEN_TOKEN_SECRET") {
            self.consent.token_secret = Some(secret);
        }
        if let Some(v) = env_parse("WARDEN_CACHE_TTL_SECS")? {
            self.gateway.cache_ttl_secs = v;
        }
        if let Some(v) = env_parse("WARDEN_CACHE_MAX_ENTRIES")? {
            self.gateway.cache_max_entries = v;
        }
        if let Some(v) = env_parse("WARDEN_AUDIT_CACHE_HITS")? {
            self.gateway.audit_cache_hits = v;
        }
        if let Some(v) = env_parse("WARDEN_MAX_MESSAGE_BYTES")? {
            self.guard.max_message_bytes = v;
        }
        Ok(())
    }

    /// Reject values that would disable a temporal bound or a capacity.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero: [(&str, u64); 6] = [
            ("consent.request_ttl_secs", self.consent.request_ttl_secs),
            ("consent.token_ttl_secs", self.consent.token_ttl_secs),
            ("gateway.cache_ttl_secs", self.gateway.cache_ttl_secs),
            ("gateway.cache_max_entries", self.gateway.cache_max_entries as u64),
            ("guard.max_message_bytes", self.guard.max_message_bytes as u64),
            ("audit.capacity", self.audit.capacity as u64),
        ];
        for (key, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.into(),
                    message: "must be greater than zero".into(),
                });
            }
        }
        self.consent.secret_bytes()?;
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.into(),
                message: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}
