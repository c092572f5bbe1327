//! Upstream client error types.
//!
//! Every failure collapses into the closed set unknown / rate-limited /
//! generic, which is what the resolver caches.

use std::sync::Arc;

use imgd_core::Status;

/// Errors from the Mojang API client.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UpstreamError {
    /// Upstream affirms the user does not exist (HTTP 204).
    #[error("unknown user: {0}")]
    UnknownUser(String),

    /// Rate limited by upstream (HTTP 429).
    #[error("rate limited: too many requests")]
    RateLimited,

    /// Session profile carried no skin texture.
    #[error("no textures in session profile for {0}")]
    NoTextures(String),

    /// Non-2xx response other than 204/429.
    #[error("HTTP error: {status}")]
    HttpError { status: u16 },

    /// Request timeout.
    #[error("request timeout")]
    Timeout,

    /// Network error.
    #[error("network error: {0}")]
    Network(Arc<reqwest::Error>),

    /// Response body could not be decoded.
    #[error("parse error: {0}")]
    Parse(String),
}

impl UpstreamError {
    /// Status recorded for this failure. `empty_textures` is the policy for
    /// profiles without a skin.
    pub fn status(&self, empty_textures: Status) -> Status {
        match self {
            UpstreamError::UnknownUser(_) => Status::ErrUnknown,
            UpstreamError::RateLimited => Status::ErrRateLimit,
            UpstreamError::NoTextures(_) => empty_textures,
            UpstreamError::HttpError { .. }
            | UpstreamError::Timeout
            | UpstreamError::Network(_)
            | UpstreamError::Parse(_) => Status::ErrGeneric,
        }
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() { UpstreamError::Timeout } else { UpstreamError::Network(Arc::new(err)) }
    }
}
