mod config;
mod error;
mod media;
mod platform;
mod ratelimit;
mod resolver;
mod selector;
mod stream;

use axum::extract::rejection::QueryRejection;
use axum::extract::{Json, Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE};
use axum::http::{HeaderName, Method};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{middleware, Router};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use config::Settings;
use error::ApiError;
use media::{FormatSummary, Source};
use platform::{checked_url, Platform};
use ratelimit::RateLimiter;
use resolver::ResolverChain;

// ============= Application State =============

#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub http_client: reqwest::Client,
    pub resolvers: ResolverChain,
    pub rate_limiter: Option<Arc<RateLimiter>>,
}

impl AppState {
    pub fn new(settings: Settings, http_client: reqwest::Client, resolvers: ResolverChain) -> Self {
        let rate_limiter = (settings.rate_limit_per_minute > 0)
            .then(|| Arc::new(RateLimiter::per_minute(settings.rate_limit_per_minute)));
        Self {
            settings,
            http_client,
            resolvers,
            rate_limiter,
        }
    }
}

// ============= Request/Response Models =============

#[derive(Deserialize)]
struct InfoQuery {
    url: Option<String>,
}

#[derive(Serialize)]
struct InfoResponse {
    success: bool,
    title: String,
    thumbnail: String,
    duration: String,
    platform: Platform,
    source: Source,
    download_url: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    formats: Vec<FormatSummary>,
}

// ============= Handlers =============

/// GET /info, /download — metadata for the frontend
async fn info_handler(
    State(state): State<AppState>,
    query: Result<Query<InfoQuery>, QueryRejection>,
) -> Result<Json<InfoResponse>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::invalid_query(e.body_text()))?;
    let url = checked_url(query.url.as_deref())?;

    let media = state.resolvers.resolve(&url).await?;

    let formats = media
        .candidates
        .iter()
        .filter(|c| (c.has_video || c.has_audio) && selector::is_proxyable(c))
        .map(FormatSummary::from)
        .collect();

    Ok(Json(InfoResponse {
        success: true,
        title: media.title,
        thumbnail: media.thumbnail,
        duration: media.duration,
        platform: media.platform,
        source: media.source,
        download_url: url,
        formats,
    }))
}

/// GET /health — Health check endpoint
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "ok": true,
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        "version": env!("CARGO_PKG_VERSION"),
        "resolvers": state.resolvers.names(),
        "aggregator_enabled": state.settings.aggregator_enabled(),
    }))
}

/// 404 handler
async fn not_found_handler() -> ApiError {
    ApiError::not_found_route()
}

fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/info", get(info_handler))
        .route("/download", get(info_handler))
        .route("/proxy", get(stream::proxy_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            ratelimit::rate_limit,
        ))
        .route("/health", get(health_handler));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any)
        .expose_headers([
            CONTENT_DISPOSITION,
            HeaderName::from_static("x-filename"),
            CONTENT_LENGTH,
            CONTENT_RANGE,
        ]);

    Router::new()
        .merge(api.clone())
        .nest("/api", api)
        .fallback(not_found_handler)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

// ============= Main =============

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "linkgrab=info,tower_http=info".to_string()),
        )
        .init();

    if let Err(e) = run().await {
        eprintln!("Server error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::from_env();

    // No total timeout: a relayed download may legitimately run for minutes.
    let http_client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(settings.connect_timeout))
        .read_timeout(Duration::from_secs(settings.read_timeout))
        .pool_max_idle_per_host(20)
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()?;

    let resolvers = ResolverChain::from_settings(&settings, http_client.clone());

    info!("Starting server on port {}", settings.port);
    info!("Resolvers: {}", resolvers.names().join(" -> "));
    if !settings.aggregator_enabled() {
        info!("RAPIDAPI_KEY not set, aggregator resolver disabled");
    }
    if settings.rate_limit_per_minute > 0 {
        info!(
            "Rate limit: {} requests/minute per client",
            settings.rate_limit_per_minute
        );
    }

    let addr = format!("0.0.0.0:{}", settings.port);
    let state = AppState::new(settings, http_client, resolvers);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("linkgrab listening on {addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{Candidate, ResolvedMedia};
    use crate::resolver::{ResolveError, Resolver};
    use async_trait::async_trait;
    use axum::http::header::{LOCATION, RANGE, RETRY_AFTER, USER_AGENT};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get as get_route;
    use std::collections::HashMap;

    const PAGE: &str = "https://www.youtube.com/watch?v=abc";

    struct StaticResolver(Option<ResolvedMedia>);

    #[async_trait]
    impl Resolver for StaticResolver {
        fn name(&self) -> &'static str {
            "static"
        }

        async fn resolve(&self, _url: &str) -> Result<ResolvedMedia, ResolveError> {
            self.0
                .clone()
                .ok_or(ResolveError::NotFound("nothing here".into()))
        }
    }

    fn candidate(id: &str, url: String, video: bool, audio: bool, height: u32) -> Candidate {
        Candidate {
            format_id: id.into(),
            url,
            ext: Some(if video { "mp4" } else { "m4a" }.into()),
            has_video: video,
            has_audio: audio,
            height: (height > 0).then_some(height),
            protocol: Some("https".into()),
            ..Default::default()
        }
    }

    fn media_with(candidates: Vec<Candidate>) -> ResolvedMedia {
        let mut media = crate::resolver::tests::resolved("My: clip", Source::YtDlp, candidates);
        media.platform = Platform::YouTube;
        media
    }

    fn test_client() -> reqwest::Client {
        reqwest::Client::builder()
            .no_proxy()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap()
    }

    async fn bind() -> (tokio::net::TcpListener, SocketAddr) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    /// Serve the app on a loopback port and return its base URL.
    async fn spawn_app(media: Option<ResolvedMedia>, settings: Settings) -> String {
        let resolver: Arc<dyn Resolver> = Arc::new(StaticResolver(media));
        let state = AppState::new(settings, test_client(), ResolverChain::new(vec![resolver]));
        let app = build_router(state);

        let (listener, addr) = bind().await;
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });
        format!("http://{addr}")
    }

    async fn get(base: &str, path: &str) -> reqwest::Response {
        test_client()
            .get(format!("{base}{path}"))
            .send()
            .await
            .unwrap()
    }

    fn proxy_path(extra: &str) -> String {
        format!("/api/proxy?url={}{extra}", urlencoding::encode(PAGE))
    }

    /// Stand-in media host: `/media.mp4` honours `Range: bytes=0-3`,
    /// `/ua` echoes the user agent, `/forbidden` always refuses.
    async fn spawn_upstream() -> SocketAddr {
        let app = Router::new()
            .route(
                "/media.mp4",
                get_route(|headers: HeaderMap| async move {
                    match headers.get(RANGE).and_then(|r| r.to_str().ok()) {
                        Some("bytes=0-3") => (
                            StatusCode::PARTIAL_CONTENT,
                            [(CONTENT_RANGE, "bytes 0-3/10")],
                            "0123",
                        )
                            .into_response(),
                        _ => (StatusCode::OK, "0123456789").into_response(),
                    }
                }),
            )
            .route(
                "/ua",
                get_route(|headers: HeaderMap| async move {
                    headers
                        .get(USER_AGENT)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string()
                }),
            )
            .route("/forbidden", get_route(|| async { StatusCode::FORBIDDEN }));

        let (listener, addr) = bind().await;
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn test_health() {
        let base = spawn_app(None, Settings::default()).await;
        for path in ["/health", "/api/health"] {
            let response = get(&base, path).await;
            assert_eq!(response.status(), StatusCode::OK);
            let body: serde_json::Value = response.json().await.unwrap();
            assert_eq!(body["ok"], true);
            assert_eq!(body["aggregator_enabled"], false);
            assert_eq!(body["resolvers"][0], "static");
        }
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let base = spawn_app(None, Settings::default()).await;
        let response = get(&base, "/nope").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["error"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_info_requires_url() {
        let base = spawn_app(None, Settings::default()).await;

        let response = get(&base, "/api/download").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "EMPTY_URL");

        let response = get(&base, "/info?url=notaurl").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["error"], "INVALID_URL");
    }

    #[tokio::test]
    async fn test_info_lists_proxyable_formats() {
        let mut hls = candidate("hls", "https://cdn.example.com/x.m3u8".into(), true, true, 1080);
        hls.protocol = Some("m3u8_native".into());
        let media = media_with(vec![
            candidate("18", "https://cdn.example.com/18".into(), true, true, 360),
            candidate("140", "https://cdn.example.com/140".into(), false, true, 0),
            hls,
        ]);
        let base = spawn_app(Some(media), Settings::default()).await;

        let path = format!("/api/info?url={}", urlencoding::encode(PAGE));
        let response = get(&base, &path).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["title"], "My: clip");
        assert_eq!(body["platform"], "youtube");
        assert_eq!(body["source"], "ytdlp");
        assert_eq!(body["download_url"], PAGE);
        let formats = body["formats"].as_array().unwrap();
        assert_eq!(formats.len(), 2);
        assert_eq!(formats[0]["kind"], "progressive");
        assert_eq!(formats[1]["kind"], "audio");
    }

    #[tokio::test]
    async fn test_info_surfaces_resolver_failure() {
        let base = spawn_app(None, Settings::default()).await;
        let path = format!("/download?url={}", urlencoding::encode(PAGE));
        let response = get(&base, &path).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["error"], "FAILED_TO_FETCH");
    }

    #[tokio::test]
    async fn test_proxy_streams_progressive_file() {
        let upstream = spawn_upstream().await;
        let media = media_with(vec![
            candidate("137", format!("http://{upstream}/forbidden"), true, false, 1080),
            candidate("18", format!("http://{upstream}/media.mp4"), true, true, 360),
        ]);
        let base = spawn_app(Some(media), Settings::default()).await;

        let response = get(&base, &proxy_path("")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[CONTENT_DISPOSITION],
            "attachment; filename=\"My_ clip.mp4\""
        );
        assert_eq!(response.headers()["content-type"], "video/mp4");
        assert_eq!(response.headers()["cache-control"], "no-store");
        assert_eq!(&response.bytes().await.unwrap()[..], b"0123456789");
    }

    #[tokio::test]
    async fn test_proxy_forwards_range() {
        let upstream = spawn_upstream().await;
        let media = media_with(vec![candidate(
            "18",
            format!("http://{upstream}/media.mp4"),
            true,
            true,
            360,
        )]);
        let base = spawn_app(Some(media), Settings::default()).await;

        let response = test_client()
            .get(format!("{base}{}", proxy_path("&filename=custom")))
            .header(RANGE, "bytes=0-3")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[CONTENT_RANGE], "bytes 0-3/10");
        assert_eq!(
            response.headers()[CONTENT_DISPOSITION],
            "attachment; filename=\"custom.mp4\""
        );
        assert_eq!(&response.bytes().await.unwrap()[..], b"0123");
    }

    #[tokio::test]
    async fn test_proxy_uses_candidate_user_agent() {
        let upstream = spawn_upstream().await;
        let mut c = candidate("18", format!("http://{upstream}/ua"), true, true, 360);
        c.http_headers = HashMap::from([("User-Agent".to_string(), "format-ua/1.0".to_string())]);
        let base = spawn_app(Some(media_with(vec![c])), Settings::default()).await;

        let response = get(&base, &proxy_path("")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), "format-ua/1.0");
    }

    #[tokio::test]
    async fn test_proxy_redirect_mode() {
        let media = media_with(vec![candidate(
            "18",
            "https://cdn.example.com/18.mp4".into(),
            true,
            true,
            360,
        )]);
        let base = spawn_app(Some(media), Settings::default()).await;

        let response = get(&base, &proxy_path("&stream=0")).await;
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(response.headers()[LOCATION], "https://cdn.example.com/18.mp4");
    }

    #[tokio::test]
    async fn test_proxy_upstream_failure_is_bad_gateway() {
        let upstream = spawn_upstream().await;
        let media = media_with(vec![candidate(
            "18",
            format!("http://{upstream}/forbidden"),
            true,
            true,
            360,
        )]);
        let base = spawn_app(Some(media), Settings::default()).await;

        let response = get(&base, &proxy_path("")).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["error"], "UPSTREAM_ERROR");
        assert!(body["details"].as_str().unwrap().contains("403"));
    }

    #[tokio::test]
    async fn test_proxy_audio_policies() {
        let only_progressive = || {
            media_with(vec![candidate(
                "18",
                "https://cdn.example.com/18.mp4".into(),
                true,
                true,
                360,
            )])
        };

        let base = spawn_app(Some(only_progressive()), Settings::default()).await;
        let response = get(&base, &proxy_path("&type=audio&stream=0")).await;
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);

        let strict = Settings {
            audio_fallback: selector::AudioFallback::Strict,
            ..Settings::default()
        };
        let base = spawn_app(Some(only_progressive()), strict).await;
        let response = get(&base, &proxy_path("&type=audio&stream=0")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["error"], "NO_DIRECT_URL");
        assert!(body["details"].as_str().unwrap().contains("HLS"));
    }

    #[tokio::test]
    async fn test_proxy_explicit_format() {
        let media = media_with(vec![
            candidate("18", "https://cdn.example.com/18.mp4".into(), true, true, 360),
            candidate("22", "https://cdn.example.com/22.mp4".into(), true, true, 720),
        ]);
        let base = spawn_app(Some(media), Settings::default()).await;

        let response = get(&base, &proxy_path("&format_id=18&stream=0")).await;
        assert_eq!(response.headers()[LOCATION], "https://cdn.example.com/18.mp4");

        let response = get(&base, &proxy_path("&format_id=999&stream=0")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["error"], "FORMAT_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_proxy_rejects_bad_type() {
        let base = spawn_app(None, Settings::default()).await;
        let response = get(&base, &proxy_path("&type=gif")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["error"], "INVALID_QUERY");
    }

    #[tokio::test]
    async fn test_proxy_rejects_unknown_stream_mode() {
        let media = media_with(vec![candidate(
            "18",
            "https://cdn.example.com/18.mp4".into(),
            true,
            true,
            360,
        )]);
        let base = spawn_app(Some(media), Settings::default()).await;

        for mode in ["7", "2", "yes"] {
            let response = get(&base, &proxy_path(&format!("&stream={mode}"))).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            let body: serde_json::Value = response.json().await.unwrap();
            assert_eq!(body["error"], "INVALID_QUERY");
        }

        let response = get(&base, &proxy_path("&stream=0")).await;
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    }

    #[tokio::test]
    async fn test_rate_limit_applies_to_api_routes_only() {
        let settings = Settings {
            rate_limit_per_minute: 1,
            ..Settings::default()
        };
        let base = spawn_app(None, settings).await;

        let first = get(&base, "/api/info?url=bad").await;
        assert_eq!(first.status(), StatusCode::BAD_REQUEST);

        let second = get(&base, "/api/info?url=bad").await;
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(second.headers().contains_key(RETRY_AFTER));
        let body: serde_json::Value = second.json().await.unwrap();
        assert_eq!(body["error"], "RATE_LIMITED");

        let health = get(&base, "/api/health").await;
        assert_eq!(health.status(), StatusCode::OK);
    }
}
