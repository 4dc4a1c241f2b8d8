//! End-to-end HTTP tests against in-memory SQLite, the in-memory broker and
//! the in-memory quota counter.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use notify_platform::api::{ApiServer, ApiServerConfig, AppState, JwtService};
use notify_platform::audit::DbAuditSink;
use notify_platform::broker::InMemoryBroker;
use notify_platform::database::repositories::{
    NotificationRepository, RateLimitRepository, SqlxAuditRepository, SqlxNotificationRepository,
    SqlxRateLimitRepository,
};
use notify_platform::database::{init_pool_with_size, run_migrations};
use notify_platform::domain::Channel;
use notify_platform::ingress::Ingress;
use notify_platform::ratelimit::{AdmissionGate, InMemoryQuotaCounter, RateLimitResolver};

const SECRET: &str = "integration-test-secret-32-chars!";

struct TestApp {
    router: Router,
    jwt: Arc<JwtService>,
    broker: InMemoryBroker,
    ledger: Arc<SqlxNotificationRepository>,
}

impl TestApp {
    async fn new() -> Self {
        let pool = init_pool_with_size("sqlite::memory:", 1).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let limits = Arc::new(SqlxRateLimitRepository::new(pool.clone()));
        limits.upsert(Some(1), Channel::Telegram, 2, 60).await.unwrap();

        let gate = Arc::new(AdmissionGate::new(
            RateLimitResolver::new(limits, Duration::from_secs(2)),
            Arc::new(InMemoryQuotaCounter::new()),
        ));
        let ledger = Arc::new(SqlxNotificationRepository::new(pool.clone()));
        let audit_repo = Arc::new(SqlxAuditRepository::new(pool.clone()));
        let audit_sink = Arc::new(DbAuditSink::new(audit_repo.clone(), Duration::from_secs(2)));
        let broker = InMemoryBroker::new();

        let ingress = Arc::new(Ingress::new(
            gate,
            ledger.clone(),
            Arc::new(broker.clone()),
            audit_sink.clone(),
        ));
        let jwt = Arc::new(JwtService::new(SECRET, None, "notify-platform", Some(3600)));

        let state = AppState::new()
            .with_jwt_service(jwt.clone())
            .with_ingress(ingress)
            .with_notification_repository(ledger.clone())
            .with_audit(audit_repo, audit_sink);

        Self {
            router: ApiServer::with_state(ApiServerConfig::default(), state).build_router(),
            jwt,
            broker,
            ledger,
        }
    }

    fn token(&self, user_id: i64) -> String {
        self.jwt.generate_token(user_id, vec![]).unwrap()
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, header::HeaderMap, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, headers, body)
    }

    async fn notify(&self, user_id: i64, body: Value) -> (StatusCode, header::HeaderMap, Value) {
        self.send(
            Request::post("/notify")
                .header(header::AUTHORIZATION, format!("Bearer {}", self.token(user_id)))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    async fn get(&self, user_id: i64, uri: &str) -> (StatusCode, Value) {
        let (status, _, body) = self
            .send(
                Request::get(uri)
                    .header(header::AUTHORIZATION, format!("Bearer {}", self.token(user_id)))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        (status, body)
    }
}

fn telegram(body: &str) -> Value {
    json!({"channel": "telegram", "recipient": "123456789", "body": body})
}

#[tokio::test]
async fn third_request_in_window_is_rate_limited() {
    let app = TestApp::new().await;

    let (status, _, first) = app.notify(1, telegram("one")).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(first["status"], "queued");
    assert_eq!(first["channel"], "telegram");

    let (status, _, _) = app.notify(1, telegram("two")).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, headers, body) = app.notify(1, telegram("three")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["code"], "RATE_LIMITED");
    let retry_after: u64 = headers
        .get(header::RETRY_AFTER)
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));

    assert_eq!(app.broker.published().len(), 2);
    assert_eq!(app.ledger.find_by_user(1, 50, None).await.unwrap().len(), 2);

    // Other channels and users have their own windows.
    let (status, _, _) = app.notify(2, telegram("other user")).await;
    assert_eq!(status, StatusCode::ACCEPTED);
}

#[tokio::test]
async fn invalid_request_reports_every_field_and_has_no_effects() {
    let app = TestApp::new().await;

    let (status, _, body) = app
        .notify(
            1,
            json!({"channel": "whatsapp", "recipient": "12", "subject": "s".repeat(300)}),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
    let fields: Vec<&str> = body["details"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["field"].as_str().unwrap())
        .collect();
    assert_eq!(fields, vec!["recipient", "body", "subject"]);

    assert!(app.broker.published().is_empty());
    assert!(app.ledger.find_by_user(1, 50, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn malformed_json_is_bad_request() {
    let app = TestApp::new().await;
    let (status, _, body) = app
        .send(
            Request::post("/notify")
                .header(header::AUTHORIZATION, format!("Bearer {}", app.token(1)))
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn missing_or_bad_token_is_unauthorized() {
    let app = TestApp::new().await;

    let (status, _, body) = app
        .send(
            Request::post("/notify")
                .body(Body::from(telegram("x").to_string()))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");

    let forged = JwtService::new("some-other-secret-entirely-here!!", None, "notify-platform", None)
        .generate_token(1, vec![])
        .unwrap();
    let (status, _, _) = app
        .send(
            Request::get("/stats")
                .header(header::AUTHORIZATION, format!("Bearer {}", forged))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(app.broker.published().is_empty());
}

#[tokio::test]
async fn publish_failure_is_bad_gateway_and_row_stays_queued() {
    let app = TestApp::new().await;
    app.broker.set_fail_publish(true);

    let (status, _, body) = app.notify(1, telegram("lost")).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    let id = body["details"]["id"].as_str().unwrap().to_string();

    let row = app.ledger.get(&id).await.unwrap();
    assert_eq!(row.status.as_str(), "queued");
}

#[tokio::test]
async fn history_stats_and_audit_are_scoped_to_the_caller() {
    let app = TestApp::new().await;

    app.notify(1, telegram("mine")).await;
    app.notify(
        1,
        json!({"channel": "email", "recipient": "me@example.com", "subject": "Hi", "body": "b"}),
    )
    .await;
    app.notify(2, telegram("theirs")).await;

    let (status, history) = app.get(1, "/history").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history.as_array().unwrap().len(), 2);

    let (_, filtered) = app.get(1, "/history?channel=email&limit=10").await;
    let filtered = filtered.as_array().unwrap();
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0]["channel"], "email");
    assert_eq!(filtered[0]["subject"], "Hi");

    let (status, _) = app.get(1, "/history?channel=fax").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, stats) = app.get(1, "/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["total"], 2);
    assert_eq!(stats["by_channel"]["telegram"], 1);
    assert_eq!(stats["by_status"]["queued"], 2);

    let (status, audit) = app.get(1, "/audit").await;
    assert_eq!(status, StatusCode::OK);
    let actions: Vec<&str> = audit
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["action"].as_str().unwrap())
        .collect();
    assert_eq!(actions.iter().filter(|a| **a == "NOTIFICATION_QUEUED").count(), 2);
    assert_eq!(actions.iter().filter(|a| **a == "HISTORY_VIEW").count(), 2);
}

#[tokio::test]
async fn health_routes_are_public() {
    let app = TestApp::new().await;
    for uri in ["/health", "/health/live", "/health/ready"] {
        let (status, _, _) = app
            .send(Request::get(uri).body(Body::empty()).unwrap())
            .await;
        assert_eq!(status, StatusCode::OK, "{uri}");
    }
}
