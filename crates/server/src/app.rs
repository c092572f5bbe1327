//! HTTP application wiring.
//!
//! Builds the axum router over a [`Resolver`]. Image routes accept a
//! username or UUID with an optional extension and width; a dashed UUID is
//! redirected to its plain form. Every image response carries the texture's
//! content hash as its ETag.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use bytes::Bytes;
use imgd_client::{Resolved, Resolver, StatsSnapshot};
use imgd_core::model::{is_dashed_uuid, normalize_uuid};
use imgd_core::{AppConfig, Cache, Identifier, Status};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::ServerError;
use crate::processing::{DEFAULT_WIDTH, ProcessError, Resource, encode_png, parse_width};

/// Probe key; longer than any valid username so it never shadows a player.
const HEALTH_KEY: &str = "_imgd_healthcheck_";

const HEALTH_TTL: Duration = Duration::from_secs(1);

/// Client-facing response settings.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub use_etags: bool,
    /// `Cache-Control: public, max-age` in seconds.
    pub cache_control_ttl: u64,
    /// 302 `/skin/<username>` to `/skin/<uuid>`.
    pub redirect_username: bool,
    pub cors_allow_all: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { use_etags: true, cache_control_ttl: 6 * 60 * 60, redirect_username: false, cors_allow_all: true }
    }
}

impl HttpConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            use_etags: config.use_etags,
            cache_control_ttl: config.cache_control_ttl_secs,
            redirect_username: config.redirect_username,
            cors_allow_all: config.cors_allow_all,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub resolver: Resolver,
    pub http: Arc<HttpConfig>,
}

impl AppState {
    pub fn new(resolver: Resolver, http: HttpConfig) -> Self {
        Self { resolver, http: Arc::new(http) }
    }

    fn etag_matches(&self, headers: &HeaderMap, etag: &str) -> bool {
        if !self.http.use_etags {
            return false;
        }
        headers
            .get(header::IF_NONE_MATCH)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| {
                v.split(',').any(|tag| {
                    let tag = tag.trim();
                    let tag = tag.strip_prefix("W/").unwrap_or(tag);
                    tag == "*" || tag.trim_matches('"') == etag
                })
            })
    }

    /// Headers shared by image and 304 responses.
    fn cache_headers(&self, etag: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&format!("public, max-age={}", self.http.cache_control_ttl)) {
            headers.insert(header::CACHE_CONTROL, value);
        }
        if let (true, Ok(value)) = (self.http.use_etags, HeaderValue::from_str(etag)) {
            headers.insert(header::ETAG, value);
        }
        headers
    }

    fn not_modified(&self, etag: &str) -> Response {
        (StatusCode::NOT_MODIFIED, self.cache_headers(etag)).into_response()
    }

    fn png(&self, body: Bytes, resolved: &Resolved, requested: &'static str) -> Response {
        let mut headers = self.cache_headers(&resolved.texture.etag());
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("image/png"));
        headers.insert("x-requested", HeaderValue::from_static(requested));
        headers.insert("x-result", HeaderValue::from_static(result_token(resolved.status)));
        (StatusCode::OK, headers, body).into_response()
    }
}

fn result_token(status: Status) -> &'static str {
    match status {
        Status::Ok => "ok",
        Status::ErrUnknown => "unknown",
        Status::ErrRateLimit => "ratelimit",
        Status::ErrGeneric | Status::Unset => "error",
    }
}

pub fn build_router(state: AppState) -> Router {
    let mut router = Router::new();

    for (route, resource) in Resource::ROUTES {
        router = router
            .route(
                &format!("/{route}/:player"),
                get(move |state: State<AppState>, Path(player): Path<String>, uri: Uri, headers: HeaderMap| {
                    render(state, resource, player, None, uri, headers)
                }),
            )
            .route(
                &format!("/{route}/:player/:width"),
                get(
                    move |state: State<AppState>,
                          Path((player, width)): Path<(String, String)>,
                          uri: Uri,
                          headers: HeaderMap| { render(state, resource, player, Some(width), uri, headers) },
                ),
            );
    }

    let router = router
        .route("/skin/:player", get(skin))
        .route("/download/:player", get(download))
        .route("/healthcheck", get(healthcheck))
        .route("/sizecheck", get(sizecheck))
        .fallback(not_found);

    let router = if state.http.cors_allow_all { router.layer(cors_layer()) } else { router };

    let trace_layer = TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
        tracing::info_span!("http.request", method = %request.method(), uri = %request.uri())
    });

    router.layer(trace_layer).with_state(state)
}

/// Any origin may issue GET requests.
fn cors_layer() -> CorsLayer {
    CorsLayer::new().allow_origin(Any).allow_methods([Method::GET])
}

/// Drop a trailing `.png`/`.svg` style extension.
fn strip_ext(raw: &str) -> &str {
    raw.split_once('.').map_or(raw, |(head, _)| head)
}

enum Player {
    Id(Identifier),
    Redirect(Response),
}

fn parse_player(raw: &str, uri: &Uri) -> Result<Player, ServerError> {
    let name = strip_ext(raw);

    if let Some(plain) = normalize_uuid(name).filter(|_| is_dashed_uuid(name)) {
        let location = uri.path().replacen(name, &plain, 1);
        return Ok(Player::Redirect(redirect(StatusCode::MOVED_PERMANENTLY, &location)));
    }

    Identifier::parse(name).map(Player::Id).map_err(|_| ServerError::InvalidPlayer(name.to_string()))
}

fn redirect(status: StatusCode, location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => (status, [(header::LOCATION, value)]).into_response(),
        Err(_) => StatusCode::BAD_REQUEST.into_response(),
    }
}

async fn render(
    State(state): State<AppState>, resource: Resource, player: String, width: Option<String>, uri: Uri,
    headers: HeaderMap,
) -> Result<Response, ServerError> {
    let id = match parse_player(&player, &uri)? {
        Player::Id(id) => id,
        Player::Redirect(response) => return Ok(response),
    };
    let width = width.as_deref().map_or(DEFAULT_WIDTH, |w| parse_width(strip_ext(w)));

    let resolved = state.resolver.resolve(&id).await;
    let etag = resolved.texture.etag();
    if state.etag_matches(&headers, &etag) {
        return Ok(state.not_modified(&etag));
    }

    let texture = resolved.texture.clone();
    let png = tokio::task::spawn_blocking(move || -> Result<Bytes, ProcessError> {
        let skin = texture.image().map_err(|e| ProcessError::Decode(e.to_string()))?;
        encode_png(resource.render(&skin, width)?)
    })
    .await
    .map_err(|e| ServerError::Processing(e.to_string()))??;

    tracing::debug!(player = %id, resource = resource.name(), width, result = result_token(resolved.status), "rendered");
    Ok(state.png(png, &resolved, resource.name()))
}

async fn skin(state: State<AppState>, Path(player): Path<String>, uri: Uri, headers: HeaderMap) -> Result<Response, ServerError> {
    serve_skin(state, player, uri, headers, false).await
}

async fn download(
    state: State<AppState>, Path(player): Path<String>, uri: Uri, headers: HeaderMap,
) -> Result<Response, ServerError> {
    serve_skin(state, player, uri, headers, true).await
}

async fn serve_skin(
    State(state): State<AppState>, player: String, uri: Uri, headers: HeaderMap, download: bool,
) -> Result<Response, ServerError> {
    let id = match parse_player(&player, &uri)? {
        Player::Id(id) => id,
        Player::Redirect(response) => return Ok(response),
    };

    let location = if !download && state.http.redirect_username {
        username_redirect(&state, &id, &player, &uri).await
    } else {
        None
    };
    if let Some(location) = location {
        return Ok(redirect(StatusCode::FOUND, &location));
    }

    let resolved = state.resolver.resolve(&id).await;
    let etag = resolved.texture.etag();
    if state.etag_matches(&headers, &etag) {
        return Ok(state.not_modified(&etag));
    }

    let requested = if download { "download" } else { "skin" };
    let mut response = state.png(resolved.texture.png().clone(), &resolved, requested);
    if download {
        response
            .headers_mut()
            .insert(header::CONTENT_DISPOSITION, HeaderValue::from_static("attachment; filename=\"skin.png\""));
    }
    Ok(response)
}

/// Location of the UUID form of a username skin request, when the username resolves.
async fn username_redirect(state: &AppState, id: &Identifier, raw: &str, uri: &Uri) -> Option<String> {
    let Identifier::Username(name) = id else {
        return None;
    };
    let entry = state.resolver.get_uuid(name).await.ok()?;
    Some(uri.path().replacen(strip_ext(raw), &entry.uuid, 1))
}

/// Write and read back a short-lived key in every cache.
async fn healthcheck(State(state): State<AppState>) -> Response {
    let mut healthy = true;
    let mut lines = Vec::new();

    for cache in state.resolver.caches().all() {
        match round_trip(cache.as_ref()).await {
            Ok(()) => lines.push(format!("{}: OK", cache.name())),
            Err(e) => {
                healthy = false;
                tracing::warn!(cache = cache.name(), error = %e, "healthcheck failed");
                lines.push(format!("{}: FAIL ({e})", cache.name()));
            }
        }
    }

    let status = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, lines.join("\n")).into_response()
}

async fn round_trip(cache: &dyn Cache) -> Result<(), imgd_core::Error> {
    let value = Bytes::from(chrono::Utc::now().to_rfc3339());
    cache.insert_ttl(HEALTH_KEY, value.clone(), HEALTH_TTL).await?;
    let stored = cache.retrieve(HEALTH_KEY).await?;
    if stored != value {
        return Err(imgd_core::Error::Decode(format!("{} returned a different value", cache.name())));
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct CacheSize {
    name: String,
    len: u64,
    size: u64,
}

#[derive(Debug, Serialize)]
struct SizeReport {
    caches: Vec<CacheSize>,
    resolver: StatsSnapshot,
}

async fn sizecheck(State(state): State<AppState>) -> Result<Response, Response> {
    let mut caches = Vec::new();
    for cache in state.resolver.caches().all() {
        let measured = async { Ok::<_, imgd_core::Error>((cache.len().await?, cache.size().await?)) }.await;
        let (len, size) = measured.map_err(|e| {
            tracing::warn!(cache = cache.name(), error = %e, "sizecheck failed");
            (StatusCode::SERVICE_UNAVAILABLE, format!("{}: {e}", cache.name())).into_response()
        })?;
        caches.push(CacheSize { name: cache.name().to_string(), len, size });
    }

    Ok(axum::Json(SizeReport { caches, resolver: state.resolver.stats() }).into_response())
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "404 not found").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_ext() {
        assert_eq!(strip_ext("clone1018.png"), "clone1018");
        assert_eq!(strip_ext("clone1018"), "clone1018");
        assert_eq!(strip_ext("100.svg"), "100");
    }

    #[test]
    fn test_parse_player_redirects_dashed() {
        let uri: Uri = "/avatar/d9135e08-2f22-44c8-9cb0-bee234155292.png".parse().unwrap();
        let Ok(Player::Redirect(resp)) = parse_player("d9135e08-2f22-44c8-9cb0-bee234155292.png", &uri) else {
            panic!("expected redirect");
        };
        assert_eq!(resp.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(resp.headers()[header::LOCATION], "/avatar/d9135e082f2244c89cb0bee234155292.png");
    }

    #[test]
    fn test_parse_player_rejects_garbage() {
        let uri: Uri = "/avatar/bad-name!".parse().unwrap();
        assert!(matches!(parse_player("bad-name!", &uri), Err(ServerError::InvalidPlayer(_))));
    }

    #[test]
    fn test_result_tokens() {
        assert_eq!(result_token(Status::Ok), "ok");
        assert_eq!(result_token(Status::ErrUnknown), "unknown");
        assert_eq!(result_token(Status::ErrRateLimit), "ratelimit");
    }
}
