use axum::{
    extract::State,
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use utoipa::{OpenApi, ToSchema};

use crate::{
    config::Config,
    proxy::{Origin, Served, WeatherProxy},
    snapshot::ResolveError,
};

const NO_CACHE: &str = "no-cache, must-revalidate";
const X_CACHE: HeaderName = HeaderName::from_static("x-cache");
const X_WEATHER_SOURCE: HeaderName = HeaderName::from_static("x-weather-source");

// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub proxy: Arc<WeatherProxy>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub version: String,
    pub cache: String,
    pub cache_ttl_secs: u64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(OpenApi)]
#[openapi(
    paths(current_weather, current_weather_uncached, health),
    components(schemas(HealthResponse, ErrorResponse)),
    tags((name = "weather", description = "Live weather station snapshot"))
)]
pub struct ApiDoc;

fn snapshot_response(served: Served, cors: bool) -> Response {
    let mut response = (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/json"),
            (header::CACHE_CONTROL, NO_CACHE),
        ],
        served.payload,
    )
        .into_response();

    let headers = response.headers_mut();
    if cors {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    }
    match served.origin {
        Origin::Cache => {
            headers.insert(X_CACHE, HeaderValue::from_static("HIT"));
        }
        Origin::Upstream => {
            headers.insert(X_CACHE, HeaderValue::from_static("MISS"));
            headers.insert(X_WEATHER_SOURCE, HeaderValue::from_static("upstream"));
        }
        Origin::Fallback => {
            headers.insert(X_CACHE, HeaderValue::from_static("MISS"));
            headers.insert(X_WEATHER_SOURCE, HeaderValue::from_static("fallback"));
        }
    }
    response
}

fn unavailable_response(err: &ResolveError, cors: bool) -> Response {
    tracing::error!("Failed to resolve weather snapshot: {}", err);

    let mut response = (
        StatusCode::SERVICE_UNAVAILABLE,
        [(header::CACHE_CONTROL, NO_CACHE)],
        Json(ErrorResponse {
            error: "weather data unavailable".to_string(),
        }),
    )
        .into_response();
    if cors {
        response
            .headers_mut()
            .insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    }
    response
}

// Route handlers
#[utoipa::path(
    get,
    path = "/current_weather",
    tag = "weather",
    responses(
        (status = 200, description = "Latest snapshot, forwarded byte for byte. X-Cache says HIT or MISS; on a MISS, X-Weather-Source says upstream or fallback."),
        (status = 503, description = "Neither the station nor the fallback file could be read", body = ErrorResponse)
    )
)]
pub async fn current_weather(State(state): State<AppState>) -> Response {
    match state.proxy.current_weather().await {
        Ok(served) => snapshot_response(served, true),
        Err(e) => unavailable_response(&e, true),
    }
}

#[utoipa::path(
    get,
    path = "/current_weather/uncached",
    tag = "weather",
    responses(
        (status = 200, description = "Snapshot resolved directly from the station or the fallback file"),
        (status = 503, description = "Neither the station nor the fallback file could be read", body = ErrorResponse)
    )
)]
pub async fn current_weather_uncached(State(state): State<AppState>) -> Response {
    match state.proxy.current_weather_uncached().await {
        Ok(served) => snapshot_response(served, false),
        Err(e) => unavailable_response(&e, false),
    }
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        cache: state.proxy.cache_description(),
        cache_ttl_secs: state.config.cache_ttl_secs,
    })
}

pub async fn openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

// Create the router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/current_weather", get(current_weather))
        .route("/current_weather.php", get(current_weather))
        .route("/current_weather/uncached", get(current_weather_uncached))
        .route("/current_weather_without_cache.php", get(current_weather_uncached))
        .route("/api-docs/openapi.json", get(openapi))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::snapshot::{FallbackFile, SnapshotResolver, UpstreamClient};
    use crate::test_support::{fallback_file, unreachable_url};
    use std::path::Path;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const LIVE: &str = r#"{"outTemp":{"value":15.2}}"#;

    async fn spawn_app(upstream_url: String, fallback: &Path) -> String {
        let config = Config {
            upstream_url,
            fallback_path: fallback.to_path_buf(),
            upstream_connect_timeout_secs: 1,
            upstream_timeout_secs: 1,
            ..Config::default()
        };
        let resolver = SnapshotResolver::new(
            UpstreamClient::new(&config).unwrap(),
            FallbackFile::new(&config.fallback_path),
        );
        let proxy = WeatherProxy::new(
            Arc::new(MemoryCache::new()),
            resolver,
            config.cache_key.clone(),
            config.cache_ttl(),
        );
        let state = AppState {
            config: Arc::new(config),
            proxy: Arc::new(proxy),
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, create_router(state)).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn header_str<'a>(response: &'a reqwest::Response, name: &str) -> Option<&'a str> {
        response.headers().get(name).and_then(|v| v.to_str().ok())
    }

    #[tokio::test]
    async fn test_current_weather_headers_and_body() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(LIVE))
            .mount(&mock_server)
            .await;
        let dir = tempfile::tempdir().unwrap();
        let base = spawn_app(mock_server.uri(), &dir.path().join("missing.json")).await;

        let response = reqwest::get(format!("{}/current_weather", base)).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(header_str(&response, "content-type"), Some("application/json"));
        assert_eq!(header_str(&response, "cache-control"), Some(NO_CACHE));
        assert_eq!(header_str(&response, "access-control-allow-origin"), Some("*"));
        assert_eq!(header_str(&response, "x-cache"), Some("MISS"));
        assert_eq!(header_str(&response, "x-weather-source"), Some("upstream"));
        assert_eq!(response.text().await.unwrap(), LIVE);

        // Legacy path shares the same cache entry.
        let response = reqwest::get(format!("{}/current_weather.php", base)).await.unwrap();
        assert_eq!(header_str(&response, "x-cache"), Some("HIT"));
        assert_eq!(header_str(&response, "x-weather-source"), None);
        assert_eq!(response.text().await.unwrap(), LIVE);
    }

    #[tokio::test]
    async fn test_fallback_is_flagged_in_headers_only() {
        let file = fallback_file(br#"{"outTemp":{"value":10.0}}"#);
        let base = spawn_app(unreachable_url(), file.path()).await;

        let response = reqwest::get(format!("{}/current_weather", base)).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(header_str(&response, "x-weather-source"), Some("fallback"));
        assert_eq!(response.text().await.unwrap(), r#"{"outTemp":{"value":10.0}}"#);
    }

    #[tokio::test]
    async fn test_total_failure_maps_to_service_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let base = spawn_app(unreachable_url(), &dir.path().join("missing.json")).await;

        for path in ["/current_weather", "/current_weather/uncached"] {
            let response = reqwest::get(format!("{}{}", base, path)).await.unwrap();
            assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
            assert_eq!(header_str(&response, "cache-control"), Some(NO_CACHE));

            let body: serde_json::Value = serde_json::from_str(&response.text().await.unwrap()).unwrap();
            assert_eq!(body["error"], "weather data unavailable");
        }
    }

    #[tokio::test]
    async fn test_uncached_goes_upstream_every_time() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(LIVE))
            .expect(2)
            .mount(&mock_server)
            .await;
        let dir = tempfile::tempdir().unwrap();
        let base = spawn_app(mock_server.uri(), &dir.path().join("missing.json")).await;

        for path in ["/current_weather/uncached", "/current_weather_without_cache.php"] {
            let response = reqwest::get(format!("{}{}", base, path)).await.unwrap();
            assert_eq!(header_str(&response, "x-cache"), Some("MISS"));
            assert_eq!(header_str(&response, "access-control-allow-origin"), None);
            assert_eq!(response.text().await.unwrap(), LIVE);
        }

        mock_server.verify().await;
    }

    #[tokio::test]
    async fn test_health_reports_cache_backend() {
        let dir = tempfile::tempdir().unwrap();
        let base = spawn_app(unreachable_url(), &dir.path().join("missing.json")).await;

        let response = reqwest::get(format!("{}/health", base)).await.unwrap();
        let body: serde_json::Value = serde_json::from_str(&response.text().await.unwrap()).unwrap();

        assert_eq!(body["status"], "healthy");
        assert_eq!(body["cache"], "memory");
        assert_eq!(body["cache_ttl_secs"], 10);
    }

    #[test]
    fn test_openapi_lists_weather_paths() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/current_weather"));
        assert!(doc.paths.paths.contains_key("/current_weather/uncached"));
        assert!(doc.paths.paths.contains_key("/health"));
    }
}
