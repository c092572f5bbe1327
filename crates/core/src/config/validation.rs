//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use std::collections::HashSet;

use thiserror::Error;
use url::Url;

use crate::config::{AppConfig, CacheConfig};

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

/// An upstream base must parse as an absolute http(s) URL with a host.
fn validate_base_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value).map_err(|e| invalid(field, format!("{value:?} does not parse: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(field, format!("unsupported scheme {:?}", url.scheme())));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid(field, format!("{value:?} has no host")));
    }
    Ok(())
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `upstream_timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - `useragent` is empty
    /// - an upstream base URL does not parse
    /// - an LRU-backed cache has `lru_size` 0
    /// - two persistent caches share one file
    /// - `request_deadline_ms` is shorter than `upstream_timeout_ms`
    /// - `empty_textures_status` is not `generic` or `unknown`
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upstream_timeout_ms < 100 {
            return Err(invalid("upstream_timeout_ms", "must be at least 100ms"));
        }
        if self.upstream_timeout_ms > 300_000 {
            return Err(invalid("upstream_timeout_ms", "must not exceed 5 minutes (300000ms)"));
        }

        if self.useragent.trim().is_empty() {
            return Err(ConfigError::Missing {
                field: "useragent".into(),
                hint: "Set IMGD_USERAGENT environment variable".into(),
            });
        }

        for (field, value) in [("sessionserver_url", &self.sessionserver_url), ("profile_url", &self.profile_url)] {
            validate_base_url(field, value)?;
        }

        let mut paths = HashSet::new();
        for (field, cache) in self.caches() {
            validate_cache(field, cache)?;
            if cache.uses_sqlite() && !paths.insert(cache.path.clone()) {
                return Err(invalid(field, format!("path {} is shared with another cache", cache.path.display())));
            }
        }

        if self.request_deadline_ms < self.upstream_timeout_ms {
            return Err(invalid("request_deadline_ms", "must be at least upstream_timeout_ms"));
        }

        if self.texture_failure_cache_size == 0 {
            return Err(invalid("texture_failure_cache_size", "must be greater than 0"));
        }

        self.empty_textures_status()?;

        if self.cache_control_ttl_secs == 0 && self.use_etags {
            tracing::warn!("cache_control_ttl_secs is 0; clients will revalidate every request");
        }

        Ok(())
    }

    /// The three resolver caches with their config keys.
    pub fn caches(&self) -> [(&'static str, &CacheConfig); 3] {
        [("cache_uuid", &self.cache_uuid), ("cache_userdata", &self.cache_userdata), ("cache_textures", &self.cache_textures)]
    }
}

fn validate_cache(field: &str, cache: &CacheConfig) -> Result<(), ConfigError> {
    if cache.name.trim().is_empty() {
        return Err(invalid(field, "name must not be empty"));
    }
    if cache.uses_lru() && cache.lru_size == 0 {
        return Err(invalid(field, "lru_size must be greater than 0"));
    }
    if cache.uses_sqlite() && cache.path.as_os_str().is_empty() {
        return Err(invalid(field, "path must be set for persistent backends"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheBackend;

    #[test]
    fn test_validate_default_config() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_timeout_too_small() {
        let config = AppConfig { upstream_timeout_ms: 50, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "upstream_timeout_ms"));
    }

    #[test]
    fn test_validate_timeout_exceeds_limit() {
        let config = AppConfig { upstream_timeout_ms: 301_000, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "upstream_timeout_ms"));
    }

    #[test]
    fn test_validate_empty_user_agent() {
        let config = AppConfig { useragent: String::new(), ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Missing { field, .. }) if field == "useragent"));
    }

    #[test]
    fn test_validate_bad_url() {
        let config = AppConfig { profile_url: "ftp://nope/".into(), ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field, .. }) if field == "profile_url"));
    }

    #[test]
    fn test_validate_unparseable_urls() {
        for (profile_url, sessionserver_url, field) in [
            ("http://", "https://sessionserver.mojang.com/session/minecraft/profile/", "profile_url"),
            ("https://api.mojang.com/users/profiles/minecraft/", "https://exa mple/ x", "sessionserver_url"),
            ("api.mojang.com/users/profiles/minecraft/", "https://sessionserver.mojang.com/", "profile_url"),
        ] {
            let config = AppConfig { profile_url: profile_url.into(), sessionserver_url: sessionserver_url.into(), ..Default::default() };
            assert!(
                matches!(config.validate(), Err(ConfigError::Invalid { field: f, .. }) if f == field),
                "{profile_url} / {sessionserver_url}"
            );
        }

        let config = AppConfig { profile_url: "http://127.0.0.1:8080/profile/".into(), ..Default::default() };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_lru_size() {
        let mut config = AppConfig::default();
        config.cache_userdata.lru_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field, .. }) if field == "cache_userdata"));

        config.cache_userdata.backend = CacheBackend::Sqlite;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_shared_sqlite_path() {
        let mut config = AppConfig::default();
        config.cache_uuid.backend = CacheBackend::Sqlite;
        config.cache_textures.backend = CacheBackend::Tiered;
        config.cache_textures.path = config.cache_uuid.path.clone();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field, .. }) if field == "cache_textures"));
    }

    #[test]
    fn test_validate_empty_textures_status() {
        let config = AppConfig { empty_textures_status: "sometimes".into(), ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field, .. }) if field == "empty_textures_status"));
    }

    #[test]
    fn test_validate_deadline_shorter_than_timeout() {
        let config = AppConfig { request_deadline_ms: 5_000, ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field, .. }) if field == "request_deadline_ms"));
    }
}
