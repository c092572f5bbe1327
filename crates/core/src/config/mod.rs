//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (IMGD_*, nested keys split on `__`)
//! 2. TOML config file (if IMGD_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::cache::{LRU_COMPACTOR_INTERVAL, SQLITE_COMPACTOR_INTERVAL};
use crate::model::Status;

mod validation;

pub use validation::ConfigError;

/// Storage variant behind a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// Bounded in-memory LRU.
    #[default]
    Lru,
    /// Persistent SQLite file.
    Sqlite,
    /// LRU in front of SQLite.
    Tiered,
}

/// Settings for one of the three resolver caches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Name used in logs and health output.
    pub name: String,

    #[serde(default)]
    pub backend: CacheBackend,

    /// Maximum entries held by the LRU (lru and tiered backends).
    #[serde(default = "default_lru_size")]
    pub lru_size: usize,

    /// SQLite file (sqlite and tiered backends).
    pub path: PathBuf,

    /// Compaction period in seconds. 0 picks the backend default.
    #[serde(default)]
    pub compactor_interval_secs: u64,
}

impl CacheConfig {
    pub fn new(name: &str, path: &str) -> Self {
        Self {
            name: name.into(),
            backend: CacheBackend::Lru,
            lru_size: default_lru_size(),
            path: PathBuf::from(path),
            compactor_interval_secs: 0,
        }
    }

    pub fn lru_interval(&self) -> Duration {
        self.interval_or(LRU_COMPACTOR_INTERVAL)
    }

    pub fn sqlite_interval(&self) -> Duration {
        self.interval_or(SQLITE_COMPACTOR_INTERVAL)
    }

    fn interval_or(&self, default: Duration) -> Duration {
        match self.compactor_interval_secs {
            0 => default,
            secs => Duration::from_secs(secs),
        }
    }

    pub fn uses_lru(&self) -> bool {
        matches!(self.backend, CacheBackend::Lru | CacheBackend::Tiered)
    }

    pub fn uses_sqlite(&self) -> bool {
        matches!(self.backend, CacheBackend::Sqlite | CacheBackend::Tiered)
    }
}

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (IMGD_*)
/// 2. TOML config file (if IMGD_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP bind address.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Per-request upstream timeout in milliseconds.
    ///
    /// Set via IMGD_UPSTREAM_TIMEOUT_MS environment variable.
    #[serde(default = "default_timeout_ms")]
    pub upstream_timeout_ms: u64,

    /// User-Agent sent on every upstream request.
    #[serde(default = "default_user_agent")]
    pub useragent: String,

    /// UUID -> session profile base URL.
    #[serde(default = "default_sessionserver_url")]
    pub sessionserver_url: String,

    /// Username -> UUID base URL.
    #[serde(default = "default_profile_url")]
    pub profile_url: String,

    #[serde(default = "default_cache_uuid")]
    pub cache_uuid: CacheConfig,

    #[serde(default = "default_cache_userdata")]
    pub cache_userdata: CacheConfig,

    #[serde(default = "default_cache_textures")]
    pub cache_textures: CacheConfig,

    /// Emit and honor ETag / If-None-Match.
    #[serde(default = "default_true")]
    pub use_etags: bool,

    /// Client-facing `Cache-Control: max-age` in seconds.
    #[serde(default = "default_cache_control_ttl")]
    pub cache_control_ttl_secs: u64,

    /// Redirect `/skin/<username>` to `/skin/<uuid>`.
    #[serde(default)]
    pub redirect_username: bool,

    /// Send permissive CORS headers.
    #[serde(default = "default_true")]
    pub cors_allow_all: bool,

    /// Serve a stale Ok record when a refresh fails.
    #[serde(default = "default_true")]
    pub stale_on_error: bool,

    /// Status recorded for a session profile without textures: `generic` or `unknown`.
    #[serde(default = "default_empty_textures_status")]
    pub empty_textures_status: String,

    /// How long a cached user profile is served without a refresh.
    #[serde(default = "default_user_fresh_ttl")]
    pub user_fresh_ttl_secs: u64,

    #[serde(default = "default_texture_ttl")]
    pub texture_ttl_secs: u64,

    #[serde(default = "default_texture_failure_ttl")]
    pub texture_failure_ttl_secs: u64,

    #[serde(default = "default_texture_failure_cache_size")]
    pub texture_failure_cache_size: usize,

    /// Upper bound on a whole resolve, after which the fallback skin is served.
    #[serde(default = "default_request_deadline_ms")]
    pub request_deadline_ms: u64,
}

fn default_listen_addr() -> String {
    "0.0.0.0:4643".into()
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_user_agent() -> String {
    "minotar/imgd (https://github.com/minotar/imgd) - default".into()
}

fn default_sessionserver_url() -> String {
    "https://sessionserver.mojang.com/session/minecraft/profile/".into()
}

fn default_profile_url() -> String {
    "https://api.mojang.com/users/profiles/minecraft/".into()
}

fn default_lru_size() -> usize {
    10_000
}

fn default_cache_uuid() -> CacheConfig {
    CacheConfig::new("CacheUUID", "./imgd-uuid.sqlite")
}

fn default_cache_userdata() -> CacheConfig {
    CacheConfig::new("CacheUserData", "./imgd-userdata.sqlite")
}

fn default_cache_textures() -> CacheConfig {
    CacheConfig::new("CacheTextures", "./imgd-textures.sqlite")
}

fn default_true() -> bool {
    true
}

fn default_cache_control_ttl() -> u64 {
    6 * 60 * 60
}

fn default_empty_textures_status() -> String {
    "generic".into()
}

fn default_user_fresh_ttl() -> u64 {
    2 * 60 * 60
}

fn default_texture_ttl() -> u64 {
    30 * 24 * 60 * 60
}

fn default_texture_failure_ttl() -> u64 {
    15 * 60
}

fn default_texture_failure_cache_size() -> usize {
    4096
}

fn default_request_deadline_ms() -> u64 {
    20_000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            upstream_timeout_ms: default_timeout_ms(),
            useragent: default_user_agent(),
            sessionserver_url: default_sessionserver_url(),
            profile_url: default_profile_url(),
            cache_uuid: default_cache_uuid(),
            cache_userdata: default_cache_userdata(),
            cache_textures: default_cache_textures(),
            use_etags: true,
            cache_control_ttl_secs: default_cache_control_ttl(),
            redirect_username: false,
            cors_allow_all: true,
            stale_on_error: true,
            empty_textures_status: default_empty_textures_status(),
            user_fresh_ttl_secs: default_user_fresh_ttl(),
            texture_ttl_secs: default_texture_ttl(),
            texture_failure_ttl_secs: default_texture_failure_ttl(),
            texture_failure_cache_size: default_texture_failure_cache_size(),
            request_deadline_ms: default_request_deadline_ms(),
        }
    }
}

impl AppConfig {
    /// Upstream timeout as Duration for use with reqwest/tokio.
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_timeout_ms)
    }

    pub fn user_fresh_ttl(&self) -> Duration {
        Duration::from_secs(self.user_fresh_ttl_secs)
    }

    pub fn texture_ttl(&self) -> Duration {
        Duration::from_secs(self.texture_ttl_secs)
    }

    pub fn texture_failure_ttl(&self) -> Duration {
        Duration::from_secs(self.texture_failure_ttl_secs)
    }

    pub fn request_deadline(&self) -> Duration {
        Duration::from_millis(self.request_deadline_ms)
    }

    /// Parsed `empty_textures_status` knob.
    pub fn empty_textures_status(&self) -> Result<Status, ConfigError> {
        match self.empty_textures_status.to_ascii_lowercase().as_str() {
            "generic" => Ok(Status::ErrGeneric),
            "unknown" => Ok(Status::ErrUnknown),
            other => Err(ConfigError::Invalid {
                field: "empty_textures_status".into(),
                reason: format!("expected `generic` or `unknown`, got `{other}`"),
            }),
        }
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `IMGD_`
    /// 2. TOML file from `IMGD_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("IMGD_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("IMGD_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.upstream_timeout_ms, 10_000);
        assert_eq!(config.upstream_timeout(), Duration::from_secs(10));
        assert!(config.use_etags);
        assert!(config.stale_on_error);
        assert!(!config.redirect_username);
        assert_eq!(config.cache_control_ttl_secs, 21_600);
        assert_eq!(config.cache_uuid.name, "CacheUUID");
        assert_eq!(config.cache_textures.backend, CacheBackend::Lru);
        assert_eq!(config.user_fresh_ttl(), Duration::from_secs(7_200));
        assert_eq!(config.texture_failure_ttl(), Duration::from_secs(900));
    }

    #[test]
    fn test_empty_textures_status_knob() {
        let config = AppConfig::default();
        assert_eq!(config.empty_textures_status().unwrap(), Status::ErrGeneric);

        let config = AppConfig { empty_textures_status: "Unknown".into(), ..Default::default() };
        assert_eq!(config.empty_textures_status().unwrap(), Status::ErrUnknown);

        let config = AppConfig { empty_textures_status: "ratelimit".into(), ..Default::default() };
        assert!(matches!(config.empty_textures_status(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_compactor_interval_defaults() {
        let mut cfg = CacheConfig::new("c", "./c.sqlite");
        assert_eq!(cfg.lru_interval(), Duration::from_secs(5));
        assert_eq!(cfg.sqlite_interval(), Duration::from_secs(900));
        cfg.compactor_interval_secs = 30;
        assert_eq!(cfg.lru_interval(), Duration::from_secs(30));
        assert_eq!(cfg.sqlite_interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_nested_env_and_toml_layering() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "imgd.toml",
                r#"
                useragent = "from-file"
                [cache_uuid]
                name = "FileUUID"
                backend = "sqlite"
                path = "/tmp/uuid.sqlite"
                "#,
            )?;
            jail.set_env("IMGD_CONFIG_FILE", "imgd.toml");
            jail.set_env("IMGD_USERAGENT", "from-env");
            jail.set_env("IMGD_CACHE_UUID__LRU_SIZE", "42");

            let config = AppConfig::load().expect("load");
            assert_eq!(config.useragent, "from-env");
            assert_eq!(config.cache_uuid.name, "FileUUID");
            assert_eq!(config.cache_uuid.backend, CacheBackend::Sqlite);
            assert_eq!(config.cache_uuid.lru_size, 42);
            Ok(())
        });
    }
}
