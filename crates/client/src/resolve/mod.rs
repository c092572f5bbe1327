//! Player identifier to skin texture resolution.
//!
//! The [`Resolver`] walks username → UUID → session profile → texture,
//! consulting a cache at every step and the upstream only on a miss. Each
//! step has its own [`CoalesceGroup`], so concurrent requests for one key
//! share a single upstream call. Failures are cached with per-status TTLs,
//! and a refresh that fails falls back to the last good record when one
//! exists.
//!
//! Every terminal error ends in the default skin; [`Resolver::resolve`]
//! never fails.

mod stats;

pub use stats::StatsSnapshot;

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use imgd_core::cache::LruCache;
use imgd_core::config::ConfigError;
use imgd_core::model::normalize_uuid;
use imgd_core::{AppConfig, Cache, CoalesceGroup, Identifier, SharedClock, Status, UserProfile, UuidEntry};

use crate::mojang::{Upstream, UpstreamError};
use crate::texture::{Texture, TextureError};
use stats::Stats;

/// How long a username binding stays invalidated after a transfer is seen.
const INVALIDATION_TTL: Duration = Duration::from_secs(60);

/// Usernames answered with the default skin without any lookup.
const CHAR_USERNAMES: [&str; 2] = ["char", "mhf_steve"];

/// Terminal resolve failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("unknown user")]
    UnknownUser,

    #[error("rate limited upstream")]
    RateLimited,

    #[error("lookup failed: {0}")]
    Generic(String),

    #[error("request deadline exceeded")]
    DeadlineExceeded,

    /// The shared upstream call died before producing a result.
    #[error("lookup cancelled: {0}")]
    Cancelled(String),
}

impl ResolveError {
    /// Status reported for this failure.
    pub fn status(&self) -> Status {
        match self {
            ResolveError::UnknownUser => Status::ErrUnknown,
            ResolveError::RateLimited => Status::ErrRateLimit,
            ResolveError::Generic(_) | ResolveError::DeadlineExceeded | ResolveError::Cancelled(_) => Status::ErrGeneric,
        }
    }

    fn from_status(status: Status, detail: impl Into<String>) -> Self {
        match status {
            Status::ErrUnknown => ResolveError::UnknownUser,
            Status::ErrRateLimit => ResolveError::RateLimited,
            _ => ResolveError::Generic(detail.into()),
        }
    }
}

impl From<imgd_core::Error> for ResolveError {
    fn from(err: imgd_core::Error) -> Self {
        ResolveError::Cancelled(err.to_string())
    }
}

/// Resolver tuning.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Age up to which an Ok user profile is served without a refresh.
    pub user_fresh_ttl: Duration,
    pub texture_ttl: Duration,
    /// How long a failed texture download short-circuits retries.
    pub texture_failure_ttl: Duration,
    pub texture_failure_cache_size: NonZeroUsize,
    /// Serve the last Ok record when a refresh fails.
    pub stale_on_error: bool,
    /// Status recorded for a session profile without a skin.
    pub empty_textures_status: Status,
    /// Bound on a whole [`Resolver::resolve`].
    pub request_deadline: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            user_fresh_ttl: Duration::from_secs(2 * 60 * 60),
            texture_ttl: Duration::from_secs(30 * 24 * 60 * 60),
            texture_failure_ttl: Duration::from_secs(15 * 60),
            texture_failure_cache_size: NonZeroUsize::new(4096).unwrap_or(NonZeroUsize::MIN),
            stale_on_error: true,
            empty_textures_status: Status::ErrGeneric,
            request_deadline: Duration::from_secs(20),
        }
    }
}

impl ResolverConfig {
    pub fn from_app(config: &AppConfig) -> Result<Self, ConfigError> {
        let texture_failure_cache_size =
            NonZeroUsize::new(config.texture_failure_cache_size).ok_or_else(|| ConfigError::Invalid {
                field: "texture_failure_cache_size".into(),
                reason: "must be greater than 0".into(),
            })?;

        Ok(Self {
            user_fresh_ttl: config.user_fresh_ttl(),
            texture_ttl: config.texture_ttl(),
            texture_failure_ttl: config.texture_failure_ttl(),
            texture_failure_cache_size,
            stale_on_error: config.stale_on_error,
            empty_textures_status: config.empty_textures_status()?,
            request_deadline: config.request_deadline(),
        })
    }
}

/// The three resolver caches.
#[derive(Clone)]
pub struct Caches {
    /// Lowercased username → [`UuidEntry`].
    pub uuid: Arc<dyn Cache>,
    /// UUID → [`UserProfile`].
    pub userdata: Arc<dyn Cache>,
    /// Lowercased skin path → texture record.
    pub textures: Arc<dyn Cache>,
}

impl Caches {
    pub fn all(&self) -> [&Arc<dyn Cache>; 3] {
        [&self.uuid, &self.userdata, &self.textures]
    }
}

/// Outcome of [`Resolver::resolve`].
#[derive(Debug, Clone)]
pub struct Resolved {
    pub texture: Texture,
    /// Ok unless the default skin stands in for a failed lookup.
    pub status: Status,
    pub fallback: bool,
}

struct Inner {
    caches: Caches,
    failures: Arc<LruCache>,
    upstream: Arc<dyn Upstream>,
    clock: SharedClock,
    config: ResolverConfig,
    uuid_group: CoalesceGroup<UuidEntry>,
    user_group: CoalesceGroup<UserProfile>,
    texture_group: CoalesceGroup<Result<Texture, ResolveError>>,
    stats: Stats,
    steve: Texture,
}

/// Cheaply cloneable resolver handle.
#[derive(Clone)]
pub struct Resolver {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver").field("config", &self.inner.config).field("stats", &self.stats()).finish()
    }
}

impl Resolver {
    pub fn new(
        caches: Caches, upstream: Arc<dyn Upstream>, clock: SharedClock, config: ResolverConfig,
    ) -> Result<Self, TextureError> {
        let failures = LruCache::new("TextureFailures", config.texture_failure_cache_size, Arc::clone(&clock));
        let inner = Inner {
            caches,
            failures,
            upstream,
            clock,
            config,
            uuid_group: CoalesceGroup::new("uuid"),
            user_group: CoalesceGroup::new("userdata"),
            texture_group: CoalesceGroup::new("textures"),
            stats: Stats::default(),
            steve: Texture::steve()?,
        };
        Ok(Self { inner: Arc::new(inner) })
    }

    pub fn caches(&self) -> &Caches {
        &self.inner.caches
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Skin served for `char` and in place of failed lookups.
    pub fn default_skin(&self) -> &Texture {
        &self.inner.steve
    }

    /// Start the compactor of every cache.
    pub fn start(&self) {
        for cache in self.inner.caches.all() {
            cache.start();
        }
        self.inner.failures.start();
    }

    /// Stop compactors and close every cache, returning the first failure.
    pub async fn close(&self) -> Result<(), imgd_core::Error> {
        let mut first = None;
        if let Err(e) = self.inner.failures.close().await {
            first = Some(e);
        }
        for cache in self.inner.caches.all() {
            if let Err(e) = cache.close().await {
                tracing::error!(cache = cache.name(), error = %e, "failed to close cache");
                first = first.or(Some(e));
            }
        }
        first.map_or(Ok(()), Err)
    }

    /// Resolve to a texture, substituting the default skin for any failure.
    pub async fn resolve(&self, id: &Identifier) -> Resolved {
        let result = match tokio::time::timeout(self.inner.config.request_deadline, self.try_resolve(id)).await {
            Ok(result) => result,
            Err(_) => Err(ResolveError::DeadlineExceeded),
        };

        match result {
            Ok(texture) => Resolved { texture, status: Status::Ok, fallback: false },
            Err(err) => {
                Stats::bump(&self.inner.stats.fallbacks);
                tracing::info!(player = %id, error = %err, "serving default skin");
                Resolved { texture: self.inner.steve.clone(), status: err.status(), fallback: true }
            }
        }
    }

    pub async fn try_resolve(&self, id: &Identifier) -> Result<Texture, ResolveError> {
        let profile = match id {
            Identifier::Username(name) if is_char(name) => {
                Stats::bump(&self.inner.stats.char_hits);
                return Ok(self.inner.steve.clone());
            }
            Identifier::Username(name) => self.resolve_username(name).await?,
            Identifier::Uuid(uuid) => self.get_user(uuid).await?,
        };
        self.get_texture(&profile).await
    }

    /// Username path with one retry when the binding turns out to be stale.
    async fn resolve_username(&self, username: &str) -> Result<UserProfile, ResolveError> {
        let entry = self.get_uuid(username).await?;
        let profile = self.get_user(&entry.uuid).await?;
        if profile.username.eq_ignore_ascii_case(username) {
            return Ok(profile);
        }

        tracing::info!(username, uuid = %entry.uuid, canonical = %profile.username, "username moved, rebinding");
        self.invalidate_username(username).await;

        let entry = self.get_uuid(username).await?;
        let profile = self.get_user(&entry.uuid).await?;
        if !profile.username.eq_ignore_ascii_case(username) {
            tracing::warn!(username, uuid = %entry.uuid, canonical = %profile.username, "username mismatch after rebind");
        }
        Ok(profile)
    }

    /// Overwrite a username binding with a short-lived `Unset` marker.
    pub async fn invalidate_username(&self, username: &str) {
        let marker = UuidEntry::invalidated(self.inner.now());
        let key = username.to_ascii_lowercase();
        self.inner.write(self.inner.caches.uuid.as_ref(), &key, marker.encode(), INVALIDATION_TTL).await;
    }

    /// Username → UUID. Returns only Ok entries; cached failures surface as errors.
    pub async fn get_uuid(&self, username: &str) -> Result<UuidEntry, ResolveError> {
        let key = username.to_ascii_lowercase();
        let now = self.inner.now();

        let entry = match self.inner.cached_uuid(&key).await {
            Some(entry) if uuid_usable(&entry, now) => entry,
            _ => {
                let inner = Arc::clone(&self.inner);
                let owned = key.clone();
                self.inner.uuid_group.call(&key, move || inner.fetch_uuid(owned)).await?
            }
        };

        if entry.status.is_ok() { Ok(entry) } else { Err(ResolveError::from_status(entry.status, format!("uuid {}", entry.status))) }
    }

    /// UUID → session profile. Returns only Ok profiles.
    pub async fn get_user(&self, uuid: &str) -> Result<UserProfile, ResolveError> {
        let now = self.inner.now();

        let profile = match self.inner.cached_user(uuid).await {
            Some(profile) if self.inner.user_usable(&profile, now) => profile,
            _ => {
                let inner = Arc::clone(&self.inner);
                let owned = uuid.to_string();
                self.inner.user_group.call(uuid, move || inner.fetch_user(owned)).await?
            }
        };

        if profile.status.is_ok() {
            Ok(profile)
        } else {
            Err(ResolveError::from_status(profile.status, format!("profile {}", profile.status)))
        }
    }

    /// Skin texture for an Ok profile.
    pub async fn get_texture(&self, profile: &UserProfile) -> Result<Texture, ResolveError> {
        if !profile.status.is_ok() || profile.skin_path.is_empty() {
            return Err(ResolveError::from_status(profile.status, "profile has no skin"));
        }

        let key = profile.texture_key();
        if let Some(texture) = self.inner.cached_texture(&key).await {
            return Ok(texture);
        }
        if let Some(reason) = self.inner.cached_failure(&key).await {
            return Err(ResolveError::Generic(reason));
        }

        let inner = Arc::clone(&self.inner);
        let (owned, url) = (key.clone(), profile.skin_url());
        self.inner.texture_group.call(&key, move || inner.fetch_texture(owned, url)).await?
    }
}

fn is_char(username: &str) -> bool {
    CHAR_USERNAMES.iter().any(|c| c.eq_ignore_ascii_case(username))
}

fn uuid_usable(entry: &UuidEntry, now: u32) -> bool {
    entry.status != Status::Unset && entry.is_fresh(now)
}

impl Inner {
    fn now(&self) -> u32 {
        self.clock.unix_secs()
    }

    fn user_usable(&self, profile: &UserProfile, now: u32) -> bool {
        profile.is_fresh(now, self.config.user_fresh_ttl) || profile.is_negative_live(now)
    }

    /// Whether a failed refresh falls back to a stale Ok record, whatever the failure.
    fn keeps_stale(&self) -> bool {
        self.config.stale_on_error
    }

    async fn read(&self, cache: &dyn Cache, key: &str) -> Option<Bytes> {
        match cache.retrieve(key).await {
            Ok(value) => Some(value),
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                Stats::bump(&self.stats.cache_errors);
                tracing::warn!(cache = cache.name(), key, error = %e, "cache read failed");
                None
            }
        }
    }

    async fn write(&self, cache: &dyn Cache, key: &str, value: Bytes, ttl: Duration) {
        if let Err(e) = cache.insert_ttl(key, value, ttl).await {
            Stats::bump(&self.stats.cache_errors);
            tracing::warn!(cache = cache.name(), key, error = %e, "cache write failed");
        }
    }

    fn decode_failed(&self, cache: &str, key: &str, err: impl std::fmt::Display) {
        Stats::bump(&self.stats.cache_errors);
        tracing::warn!(cache, key, error = %err, "undecodable cache record");
    }

    async fn cached_uuid(&self, key: &str) -> Option<UuidEntry> {
        let raw = self.read(self.caches.uuid.as_ref(), key).await?;
        UuidEntry::decode(raw).map_err(|e| self.decode_failed(self.caches.uuid.name(), key, e)).ok()
    }

    async fn cached_user(&self, uuid: &str) -> Option<UserProfile> {
        let raw = self.read(self.caches.userdata.as_ref(), uuid).await?;
        UserProfile::decode(&raw).map_err(|e| self.decode_failed(self.caches.userdata.name(), uuid, e)).ok()
    }

    async fn cached_texture(&self, key: &str) -> Option<Texture> {
        let raw = self.read(self.caches.textures.as_ref(), key).await?;
        Texture::from_record(raw).map_err(|e| self.decode_failed(self.caches.textures.name(), key, e)).ok()
    }

    async fn cached_failure(&self, key: &str) -> Option<String> {
        let raw = self.read(self.failures.as_ref(), key).await?;
        Some(String::from_utf8_lossy(&raw).into_owned())
    }

    async fn fetch_uuid(self: Arc<Self>, key: String) -> UuidEntry {
        let prior = self.cached_uuid(&key).await;
        if let Some(entry) = prior.as_ref().filter(|e| uuid_usable(e, self.now())) {
            return entry.clone();
        }

        Stats::bump(&self.stats.api_calls);
        let result = self.upstream.get_api_profile(&key).await.and_then(|profile| {
            if !profile.name.eq_ignore_ascii_case(&key) {
                return Err(UpstreamError::Parse(format!("lookup for {key} answered for {:?}", profile.name)));
            }
            normalize_uuid(&profile.id).ok_or_else(|| UpstreamError::Parse(format!("invalid uuid {:?}", profile.id)))
        });

        let now = self.now();
        let entry = match result {
            Ok(uuid) => UuidEntry::ok(uuid, now),
            Err(err) => {
                let status = err.status(self.config.empty_textures_status);
                if let Some(stale) = prior.filter(|e| e.status.is_ok() && self.keeps_stale()) {
                    Stats::bump(&self.stats.stale_serves);
                    tracing::warn!(username = %key, error = %err, "keeping stale uuid binding");
                    return stale;
                }
                tracing::info!(username = %key, error = %err, %status, "username lookup failed");
                UuidEntry::failed(status, now)
            }
        };

        self.write(self.caches.uuid.as_ref(), &key, entry.encode(), entry.ttl()).await;
        entry
    }

    async fn fetch_user(self: Arc<Self>, uuid: String) -> UserProfile {
        let prior = self.cached_user(&uuid).await;
        if let Some(profile) = prior.as_ref().filter(|p| self.user_usable(p, self.now())) {
            return profile.clone();
        }

        Stats::bump(&self.stats.session_calls);
        let result = self.upstream.get_session_profile(&uuid).await.and_then(|session| {
            if session.name.is_empty() {
                return Err(UpstreamError::Parse(format!("session profile {uuid} has no name")));
            }
            match session.skin_url {
                Some(url) => Ok((session.name, url)),
                None => Err(UpstreamError::NoTextures(uuid.clone())),
            }
        });

        let now = self.now();
        let profile = match result {
            Ok((username, skin_url)) => UserProfile::ok(uuid.clone(), username, &skin_url, now),
            Err(err) => {
                let status = err.status(self.config.empty_textures_status);
                if let Some(stale) = prior.filter(|p| p.status.is_ok() && self.keeps_stale()) {
                    Stats::bump(&self.stats.stale_serves);
                    tracing::warn!(%uuid, error = %err, "serving stale profile");
                    return stale;
                }
                tracing::info!(%uuid, error = %err, %status, "session lookup failed");
                UserProfile::failed(uuid.clone(), status, now)
            }
        };

        match profile.encode() {
            Ok(raw) => self.write(self.caches.userdata.as_ref(), &uuid, raw, profile.ttl()).await,
            Err(e) => self.decode_failed(self.caches.userdata.name(), &uuid, e),
        }

        if profile.status.is_ok() {
            let binding = UuidEntry::ok(uuid.clone(), now);
            let key = profile.username.to_ascii_lowercase();
            self.write(self.caches.uuid.as_ref(), &key, binding.encode(), binding.ttl()).await;
        }

        profile
    }

    async fn fetch_texture(self: Arc<Self>, key: String, url: String) -> Result<Texture, ResolveError> {
        if let Some(texture) = self.cached_texture(&key).await {
            return Ok(texture);
        }
        if let Some(reason) = self.cached_failure(&key).await {
            return Err(ResolveError::Generic(reason));
        }

        Stats::bump(&self.stats.texture_calls);
        match self.upstream.get_texture(&url).await {
            Ok(texture) => {
                self.write(self.caches.textures.as_ref(), &key, texture.to_record(), self.config.texture_ttl).await;
                Ok(texture)
            }
            Err(err) => {
                tracing::warn!(%url, error = %err, "texture fetch failed");
                let reason = err.to_string();
                self.write(self.failures.as_ref(), &key, Bytes::from(reason.clone()), self.config.texture_failure_ttl)
                    .await;
                Err(ResolveError::from_status(err.status(Status::ErrGeneric), reason))
            }
        }
    }
}
