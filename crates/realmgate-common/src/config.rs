//! Configuration management for Realmgate

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Main configuration structure for Realmgate
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Security core configuration
    #[serde(default)]
    pub security: SecurityConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML/JSON file
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref())
            .await
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = if path.as_ref().extension().map_or(false, |ext| ext == "toml") {
            toml::from_str(&content)
                .map_err(|e| Error::Config(format!("Failed to parse TOML config: {}", e)))?
        } else {
            serde_json::from_str(&content)
                .map_err(|e| Error::Config(format!("Failed to parse JSON config: {}", e)))?
        };

        config.security.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Enable authentication; when off every login yields the AUTH_DISABLED context
    pub auth_enabled: bool,
    /// Realm names in priority order
    pub realms: Vec<String>,
    /// Authentication cache
    #[serde(default)]
    pub auth_cache: AuthCacheConfig,
    /// Local file-backed realm
    #[serde(default)]
    pub local: LocalRealmConfig,
    /// Hot reload of the local realm files
    #[serde(default)]
    pub reload: ReloadConfig,
    /// Role name to base mode name
    #[serde(default = "default_role_modes")]
    pub role_modes: BTreeMap<String, String>,
    /// Roles whose holders are administrators, if the role is also mapped
    #[serde(default = "default_admin_roles")]
    pub admin_roles: Vec<String>,
}

fn default_admin_roles() -> Vec<String> {
    vec!["admin".to_string()]
}

fn default_role_modes() -> BTreeMap<String, String> {
    [
        ("admin", "FULL"),
        ("architect", "FULL"),
        ("publisher", "TOKEN_WRITE"),
        ("reader", "READ"),
    ]
    .into_iter()
    .map(|(role, mode)| (role.to_string(), mode.to_string()))
    .collect()
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            auth_enabled: true,
            realms: vec!["local".to_string()],
            auth_cache: AuthCacheConfig::default(),
            local: LocalRealmConfig::default(),
            reload: ReloadConfig::default(),
            role_modes: default_role_modes(),
            admin_roles: default_admin_roles(),
        }
    }
}

impl SecurityConfig {
    /// Reject settings that cannot produce a working security core
    pub fn validate(&self) -> Result<()> {
        if self.auth_cache.use_ttl && self.auth_cache.ttl_ms == 0 {
            return Err(Error::Validation(
                "auth_cache.ttl_ms must be positive when auth_cache.use_ttl is set".to_string(),
            ));
        }
        if self.reload.enabled && self.reload.period_ms == 0 {
            return Err(Error::Validation("reload.period_ms must be positive".to_string()));
        }
        if self.reload.max_attempts == 0 {
            return Err(Error::Validation("reload.max_attempts must be at least 1".to_string()));
        }
        if self.local.max_failed_attempts == 0 {
            return Err(Error::Validation(
                "local.max_failed_attempts must be at least 1".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for realm in &self.realms {
            if !seen.insert(realm.as_str()) {
                return Err(Error::Validation(format!("realm '{}' is configured twice", realm)));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthCacheConfig {
    /// Cache successful authentications
    pub enabled: bool,
    /// Entry time-to-live in milliseconds
    pub ttl_ms: u64,
    /// Whether entries expire at all
    pub use_ttl: bool,
    /// Maximum number of cached entries
    pub max_capacity: usize,
}

impl Default for AuthCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_ms: 10 * 60 * 1000, // 10 minutes
            use_ttl: true,
            max_capacity: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalRealmConfig {
    /// User/credential file
    pub users_file: PathBuf,
    /// Role membership file
    pub roles_file: PathBuf,
    /// Group membership file
    pub groups_file: PathBuf,
    /// Consecutive failures before the realm reports TOO_MANY_ATTEMPTS
    pub max_failed_attempts: u32,
    /// How long a locked principal stays locked, in milliseconds
    pub lockout_duration_ms: u64,
    /// Credential hashing algorithm tag for new passwords
    pub hash_algorithm: String,
}

impl Default for LocalRealmConfig {
    fn default() -> Self {
        Self {
            users_file: PathBuf::from("data/dbms/auth"),
            roles_file: PathBuf::from("data/dbms/roles"),
            groups_file: PathBuf::from("data/dbms/groups"),
            max_failed_attempts: 3,
            lockout_duration_ms: 5_000,
            hash_algorithm: "PBKDF2-SHA256".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReloadConfig {
    /// Poll the local realm files for external changes
    pub enabled: bool,
    /// Delay before the first poll in milliseconds
    pub initial_delay_ms: u64,
    /// Poll period in milliseconds
    pub period_ms: u64,
    /// Consecutive failed reloads before the loop gives up
    pub max_attempts: u32,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay_ms: 5_000,
            period_ms: 5_000,
            max_attempts: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by RUST_LOG
    pub level: String,
    /// Emit JSON lines instead of human readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
