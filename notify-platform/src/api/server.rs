//! HTTP front end: router assembly, middleware stack and serving.

use axum::Router;
use axum::extract::{DefaultBodyLimit, Request};
use axum::response::Response;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::classify::ServerErrorsFailureClass;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::Span;

use crate::api::jwt::JwtService;
use crate::api::routes;
use crate::audit::AuditSink;
use crate::database::repositories::{AuditRepository, NotificationRepository};
use crate::error::{Error, Result};
use crate::health::HealthChecker;
use crate::ingress::Ingress;

#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    pub listen: SocketAddr,
    /// Permissive CORS for browser dashboards.
    pub cors: bool,
    /// Largest accepted request body, in bytes.
    pub body_limit: usize,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8080),
            cors: true,
            body_limit: 256 * 1024,
        }
    }
}

impl ApiServerConfig {
    /// Overlay `API_BIND_ADDRESS`, `API_PORT`, `API_CORS` and
    /// `API_BODY_LIMIT` on the defaults. Unparsable values are ignored.
    pub fn from_env_or_default() -> Self {
        fn env<T: std::str::FromStr>(key: &str) -> Option<T> {
            std::env::var(key).ok()?.trim().parse().ok()
        }

        let mut config = Self::default();
        if let Some(ip) = env::<IpAddr>("API_BIND_ADDRESS") {
            config.listen.set_ip(ip);
        }
        if let Some(port) = env::<u16>("API_PORT") {
            config.listen.set_port(port);
        }
        if let Some(cors) = env::<bool>("API_CORS") {
            config.cors = cors;
        }
        if let Some(limit) = env::<usize>("API_BODY_LIMIT") {
            config.body_limit = limit;
        }
        config
    }
}

/// Handles shared by every request handler.
///
/// Each service is optional so a router can be built with only the parts a
/// test needs; handlers answer 503 for a missing one.
#[derive(Clone)]
pub struct AppState {
    pub start_time: Instant,
    pub jwt_service: Option<Arc<JwtService>>,
    pub ingress: Option<Arc<Ingress>>,
    pub notification_repository: Option<Arc<dyn NotificationRepository>>,
    pub audit_repository: Option<Arc<dyn AuditRepository>>,
    pub audit_sink: Option<Arc<dyn AuditSink>>,
    pub health_checker: Option<Arc<HealthChecker>>,
    /// Bound for the read queries issued directly by handlers.
    pub store_timeout: Duration,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            start_time: Instant::now(),
            jwt_service: None,
            ingress: None,
            notification_repository: None,
            audit_repository: None,
            audit_sink: None,
            health_checker: None,
            store_timeout: Duration::from_secs(2),
        }
    }
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_jwt_service(self, jwt: Arc<JwtService>) -> Self {
        Self {
            jwt_service: Some(jwt),
            ..self
        }
    }

    pub fn with_ingress(self, ingress: Arc<Ingress>) -> Self {
        Self {
            ingress: Some(ingress),
            ..self
        }
    }

    pub fn with_notification_repository(self, repo: Arc<dyn NotificationRepository>) -> Self {
        Self {
            notification_repository: Some(repo),
            ..self
        }
    }

    /// The audit reader and writer travel together.
    pub fn with_audit(self, repo: Arc<dyn AuditRepository>, sink: Arc<dyn AuditSink>) -> Self {
        Self {
            audit_repository: Some(repo),
            audit_sink: Some(sink),
            ..self
        }
    }

    pub fn with_health_checker(self, checker: Arc<HealthChecker>) -> Self {
        Self {
            health_checker: Some(checker),
            ..self
        }
    }

    pub fn with_store_timeout(self, store_timeout: Duration) -> Self {
        Self {
            store_timeout,
            ..self
        }
    }
}

fn is_health_path(req: &Request) -> bool {
    req.uri().path().starts_with("/health")
}

pub struct ApiServer {
    config: ApiServerConfig,
    state: AppState,
    cancel_token: CancellationToken,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig) -> Self {
        Self::with_state(config, AppState::new())
    }

    pub fn with_state(config: ApiServerConfig, state: AppState) -> Self {
        Self {
            config,
            state,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Cancelling this token drains in-flight requests and stops [`run`](Self::run).
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn build_router(&self) -> Router {
        // Request spans carry the `x-request-id`; health probes are polled
        // constantly and get no span.
        let trace = TraceLayer::new_for_http()
            .make_span_with(|req: &Request| {
                if is_health_path(req) {
                    return Span::none();
                }
                let request_id = req
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-");
                tracing::info_span!(
                    "http",
                    method = %req.method(),
                    path = %req.uri().path(),
                    request_id = %request_id,
                )
            })
            .on_request(())
            .on_response(|res: &Response, latency: Duration, span: &Span| {
                if span.is_disabled() {
                    return;
                }
                tracing::info!(
                    parent: span,
                    status = res.status().as_u16(),
                    latency_ms = latency.as_millis() as u64,
                    "Request completed"
                );
            })
            .on_failure(
                |class: ServerErrorsFailureClass, latency: Duration, span: &Span| {
                    if span.is_disabled() {
                        return;
                    }
                    tracing::error!(
                        parent: span,
                        %class,
                        latency_ms = latency.as_millis() as u64,
                        "Request failed"
                    );
                },
            );

        let mut router = routes::create_router(self.state.clone())
            .layer(DefaultBodyLimit::max(self.config.body_limit))
            .layer(trace);

        if self.config.cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        }

        // Outermost, so the id exists before the request span is created.
        router
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Serve until the cancellation token fires.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.listen)
            .await
            .map_err(|e| Error::config(format!("cannot listen on {}: {}", self.config.listen, e)))?;
        tracing::info!(addr = %self.config.listen, "HTTP API accepting connections");

        let stop = self.cancel_token.clone().cancelled_owned();
        axum::serve(listener, self.build_router())
            .with_graceful_shutdown(stop)
            .await?;

        tracing::info!("HTTP API stopped");
        Ok(())
    }

    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::StatusCode;
    use tower::ServiceExt;

    #[test]
    fn test_config_defaults() {
        let config = ApiServerConfig::default();
        assert_eq!(config.listen.to_string(), "0.0.0.0:8080");
        assert!(config.cors);
        assert_eq!(config.body_limit, 262_144);
    }

    #[test]
    fn test_shutdown_cancels_token() {
        let server = ApiServer::new(ApiServerConfig::default());
        let stop = server.cancel_token();
        server.shutdown();
        assert!(stop.is_cancelled());
    }

    #[tokio::test]
    async fn test_protected_route_without_jwt_is_unauthorized() {
        let router = ApiServer::new(ApiServerConfig::default()).build_router();
        let response = router
            .oneshot(
                axum::http::Request::builder()
                    .uri("/stats")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_liveness_is_public() {
        let router = ApiServer::new(ApiServerConfig::default()).build_router();
        let response = router
            .oneshot(
                axum::http::Request::builder()
                    .uri("/health/live")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_request_id_is_echoed() {
        let router = ApiServer::new(ApiServerConfig::default()).build_router();

        let response = router
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .uri("/health/live")
                    .header("x-request-id", "abc-123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers()["x-request-id"], "abc-123");

        let response = router
            .oneshot(
                axum::http::Request::builder()
                    .uri("/health/live")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(response.headers().contains_key("x-request-id"));
    }
}
