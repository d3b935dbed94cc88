use crate::auth::AuthService;
use crate::server::build_router;
use crate::server::config::{AuthConfig, UserConfig};
use axum::body::{Body, BodyDataStream};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use futures::StreamExt;
use herald_bus::MemoryBroker;
use herald_core::{BroadcastEngine, EngineConfig};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn auth_config() -> AuthConfig {
    let user = |id: &str, email: &str, permissions: &[&str]| UserConfig {
        id: id.to_string(),
        email: email.to_string(),
        password: "123".to_string(),
        name: email.to_string(),
        permissions: permissions.iter().map(|p| p.to_string()).collect(),
    };
    AuthConfig {
        jwt_secret: "test-secret".to_string(),
        token_ttl_secs: 60,
        users: vec![
            user("1", "cunha", &["newBloq", "newRent"]),
            user("2", "daniel", &["newBloq"]),
        ],
    }
}

struct TestApp {
    router: Router,
    engine: BroadcastEngine,
    auth: Arc<AuthService>,
}

impl TestApp {
    async fn new() -> Self {
        let broker = MemoryBroker::new();
        let engine = BroadcastEngine::new(
            EngineConfig {
                heartbeat_interval_ms: 0,
                ..EngineConfig::default()
            },
            Arc::new(broker.publisher()),
            Arc::new(broker.subscriber()),
        );
        engine.start().await.unwrap();
        let auth = Arc::new(AuthService::new(&auth_config()));
        let router = build_router(engine.clone(), auth.clone());
        Self {
            router,
            engine,
            auth,
        }
    }

    fn token(&self, email: &str) -> String {
        self.auth.login(email, "123").unwrap().0
    }

    async fn send(&self, request: Request<Body>) -> axum::response::Response {
        self.router.clone().oneshot(request).await.unwrap()
    }
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn authed(method: &str, uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

/// Read SSE output until `needle` shows up
async fn read_until(stream: &mut BodyDataStream, seen: &mut String, needle: &str) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !seen.contains(needle) {
            let chunk = stream.next().await.unwrap().unwrap();
            seen.push_str(std::str::from_utf8(&chunk).unwrap());
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {needle:?}, got {seen:?}"));
}

#[tokio::test]
async fn test_health_reports_bus_state() {
    let app = TestApp::new().await;
    let response = app
        .send(Request::get("/health").body(Body::empty()).unwrap())
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["bus"], "connected");
}

#[tokio::test]
async fn test_login() {
    let app = TestApp::new().await;
    let login = |password: &str| {
        Request::post("/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({ "email": "cunha", "password": password }).to_string(),
            ))
            .unwrap()
    };

    let response = app.send(login("123")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["user"], json!({ "id": "1", "email": "cunha", "name": "cunha" }));
    let token = body["token"].as_str().unwrap();
    assert_eq!(app.auth.verify(token).unwrap().identity.id, "1");

    let response = app.send(login("wrong")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "INVALID_CREDENTIALS");
}

#[tokio::test]
async fn test_routes_require_token() {
    let app = TestApp::new().await;
    for (method, uri) in [("GET", "/sse"), ("POST", "/rent"), ("POST", "/bloq"), ("GET", "/stats")] {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        assert_eq!(
            app.send(request).await.status(),
            StatusCode::UNAUTHORIZED,
            "{method} {uri}"
        );

        let response = app.send(authed(method, uri, "garbage")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}

#[tokio::test]
async fn test_publish_reports_receivers() {
    let app = TestApp::new().await;
    let token = app.token("daniel");

    let response = app.send(authed("POST", "/rent", &token)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({ "success": true, "receivers": 1 }));
}

#[tokio::test]
async fn test_publish_after_close_is_unavailable() {
    let app = TestApp::new().await;
    let token = app.token("daniel");
    app.engine.close().await.unwrap();

    let response = app.send(authed("POST", "/bloq", &token)).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(response).await["success"], false);
}

#[tokio::test]
async fn test_sse_stream_delivers_authorized_events() {
    let app = TestApp::new().await;
    let daniel = app.token("daniel");

    let response = app.send(authed("GET", "/sse", &daniel)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/event-stream"
    );
    let mut stream = response.into_body().into_data_stream();
    let mut seen = String::new();
    read_until(&mut stream, &mut seen, "event: connection").await;
    assert!(seen.contains(r#""connected":true"#));
    assert_eq!(app.engine.active_session_count(), 1);

    // daniel is not authorized for newRent; the later newBloq proves ordering
    let cunha = app.token("cunha");
    let response = app.send(authed("POST", "/rent", &cunha)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let response = app.send(authed("POST", "/bloq", &cunha)).await;
    assert_eq!(response.status(), StatusCode::OK);

    read_until(&mut stream, &mut seen, "event: newBloq").await;
    assert!(seen.contains("Bloq created at "));
    assert!(!seen.contains("newRent"));

    drop(stream);
    tokio::time::timeout(Duration::from_secs(5), async {
        while app.engine.active_session_count() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("session not unregistered after client went away");
}

#[tokio::test]
async fn test_sse_accepts_query_token() {
    let app = TestApp::new().await;
    let token = app.token("cunha");
    let request = Request::get(format!("/sse?token={}", token))
        .body(Body::empty())
        .unwrap();

    let response = app.send(request).await;
    assert_eq!(response.status(), StatusCode::OK);
    let mut stream = response.into_body().into_data_stream();
    let mut seen = String::new();
    read_until(&mut stream, &mut seen, "event: connection").await;
}

#[tokio::test]
async fn test_engine_close_ends_sse_stream() {
    let app = TestApp::new().await;
    let token = app.token("cunha");
    let response = app.send(authed("GET", "/sse", &token)).await;
    let mut stream = response.into_body().into_data_stream();
    let mut seen = String::new();
    read_until(&mut stream, &mut seen, "event: connection").await;

    app.engine.close().await.unwrap();
    read_until(&mut stream, &mut seen, "event: shutdown").await;

    let end = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .unwrap();
    assert!(end.is_none());
}

#[tokio::test]
async fn test_stats() {
    let app = TestApp::new().await;
    let token = app.token("cunha");
    let _sse = app.send(authed("GET", "/sse", &token)).await;

    let response = app.send(authed("GET", "/stats", &token)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["active_sessions"], 1);
    assert_eq!(body["sessions_by_event"], json!({ "newBloq": 1, "newRent": 1 }));
    assert_eq!(body["bus_state"], "connected");
}
