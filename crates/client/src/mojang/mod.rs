//! Mojang API client.
//!
//! Thin HTTP client for the two profile endpoints and the texture CDN.
//!
//! ### Endpoints
//!
//! - **Username → UUID**: `GET {profile_url}{username}`, JSON `{"id", "name"}`.
//! - **UUID → session profile**: `GET {session_url}{uuid}`, JSON with a
//!   base64 `textures` property naming the skin and cape URLs.
//! - **Texture**: `GET {skin_url}`, a PNG.
//!
//! HTTP 204 means the user does not exist, 429 means rate limited, and any
//! other non-2xx status is a generic failure. No retries happen here; the
//! resolver decides what to cache.

pub mod error;
pub mod response;

pub use error::UpstreamError;
pub use response::{ApiProfile, SessionProfile};

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use imgd_core::AppConfig;
use reqwest::{StatusCode, header};
use serde::de::DeserializeOwned;

use crate::texture::Texture;

const DEFAULT_PROFILE_URL: &str = "https://api.mojang.com/users/profiles/minecraft/";

const DEFAULT_SESSION_URL: &str = "https://sessionserver.mojang.com/session/minecraft/profile/";

/// Default request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const DEFAULT_USER_AGENT: &str = "minotar/imgd (https://github.com/minotar/imgd) - default";

/// The upstream operations the resolver depends on.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Resolve a username to its UUID and canonical casing.
    async fn get_api_profile(&self, username: &str) -> Result<ApiProfile, UpstreamError>;

    /// Fetch the session profile for an undashed UUID.
    async fn get_session_profile(&self, uuid: &str) -> Result<SessionProfile, UpstreamError>;

    /// Download and validate a skin PNG.
    async fn get_texture(&self, url: &str) -> Result<Texture, UpstreamError>;
}

/// Upstream client configuration.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Base URL the username is appended to.
    pub profile_url: String,
    /// Base URL the UUID is appended to.
    pub session_url: String,
    /// Per-request timeout (default: 10s).
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            profile_url: DEFAULT_PROFILE_URL.to_string(),
            session_url: DEFAULT_SESSION_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl UpstreamConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            profile_url: config.profile_url.clone(),
            session_url: config.sessionserver_url.clone(),
            timeout: config.upstream_timeout(),
            user_agent: config.useragent.clone(),
        }
    }
}

/// reqwest-backed [`Upstream`].
#[derive(Debug, Clone)]
pub struct McClient {
    http: reqwest::Client,
    config: UpstreamConfig,
}

impl McClient {
    pub fn new(config: UpstreamConfig) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| UpstreamError::Network(Arc::new(e)))?;

        Ok(Self { http, config })
    }

    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    /// GET `url` and return the body of a 2xx response.
    ///
    /// `subject` names the username or UUID for [`UpstreamError::UnknownUser`].
    async fn fetch(&self, url: &str, subject: &str) -> Result<Bytes, UpstreamError> {
        let start = Instant::now();

        let response = self
            .http
            .get(url)
            .header(header::USER_AGENT, &self.config.user_agent)
            .send()
            .await?;

        let status = response.status();
        tracing::debug!(url, %status, elapsed = ?start.elapsed(), "upstream response");

        if status == StatusCode::NO_CONTENT {
            return Err(UpstreamError::UnknownUser(subject.to_string()));
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(UpstreamError::RateLimited);
        }

        if !status.is_success() {
            return Err(UpstreamError::HttpError { status: status.as_u16() });
        }

        Ok(response.bytes().await?)
    }

    async fn fetch_json<T: DeserializeOwned>(&self, url: &str, subject: &str) -> Result<T, UpstreamError> {
        let body = self.fetch(url, subject).await?;
        serde_json::from_slice(&body).map_err(|e| UpstreamError::Parse(e.to_string()))
    }
}

#[async_trait]
impl Upstream for McClient {
    async fn get_api_profile(&self, username: &str) -> Result<ApiProfile, UpstreamError> {
        let url = format!("{}{}", self.config.profile_url, username);
        self.fetch_json(&url, username).await
    }

    async fn get_session_profile(&self, uuid: &str) -> Result<SessionProfile, UpstreamError> {
        let url = format!("{}{}", self.config.session_url, uuid);
        let raw: response::RawSessionProfile = self.fetch_json(&url, uuid).await?;
        SessionProfile::try_from(raw)
    }

    async fn get_texture(&self, url: &str) -> Result<Texture, UpstreamError> {
        let png = self.fetch(url, url).await?;
        Texture::from_png(png).map_err(|e| UpstreamError::Parse(e.to_string()))
    }
}
