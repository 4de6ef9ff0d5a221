//! Tests for the HTTP API, driving the router in-process.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::header::{ACCEPT, COOKIE, ORIGIN, SET_COOKIE};
use axum::http::{Method, Request, StatusCode};
use axum::response::Response;
use cellhost_core::Registry;
use cellhost_server::{AppState, ServerConfig, create_router};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

// =============================================================================
// Test Helpers
// =============================================================================

fn app_with(config: ServerConfig) -> (Router, Arc<AppState>) {
    let state = Arc::new(AppState::new(Arc::new(Registry::default()), config));
    (create_router(state.clone()), state)
}

/// Router with authorization off.
fn open_app() -> Router {
    app_with(ServerConfig {
        authorization: false,
        ..ServerConfig::default()
    })
    .0
}

fn request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(ACCEPT, "application/json");
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone().oneshot(request).await.unwrap()
}

async fn body_text(response: Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}

// =============================================================================
// Registry Routes
// =============================================================================

#[tokio::test]
async fn test_manifest() {
    let app = open_app();
    let response = send(&app, request(Method::GET, "/", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let manifest = body_json(response).await;
    assert!(manifest["id"].as_str().unwrap().starts_with("rs-host-"));
    assert_eq!(manifest["cellhost"]["package"], json!("rs"));
    assert_eq!(manifest["instances"], json!([]));

    // Browsers get a page instead
    let page = Request::builder().uri("/").body(Body::empty()).unwrap();
    let response = send(&app, page).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("<h1>cellhost</h1>"));
}

#[tokio::test]
async fn test_instance_lifecycle() {
    let app = open_app();

    let response = send(&app, request(Method::POST, "/SqliteContext", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!("name://sqliteContext1"));

    let response = send(&app, request(Method::GET, "/sqliteContext1", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let snapshot = body_json(response).await;
    assert_eq!(snapshot["type"], json!("SqliteContext"));
    assert_eq!(snapshot["address"], json!("name://sqliteContext1"));

    let response = send(
        &app,
        request(
            Method::PUT,
            "/sqliteContext1!execute",
            Some(json!({"code": "SELECT 6 * 7 AS answer"})),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let cell = body_json(response).await;
    assert_eq!(cell["messages"], json!([]));
    assert_eq!(
        cell["outputs"][0]["value"]["data"],
        json!({"type": "table", "data": {"answer": [42]}})
    );

    let response = send(&app, request(Method::DELETE, "/sqliteContext1", None)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(&app, request(Method::GET, "/sqliteContext1", None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_post_with_name_and_options() {
    let app = open_app();
    let response = send(
        &app,
        request(Method::POST, "/SqliteContext", Some(json!({"name": "db", "max_rows": 5}))),
    )
    .await;
    assert_eq!(body_json(response).await, json!("name://db"));

    let response = send(&app, request(Method::GET, "/db", None)).await;
    assert_eq!(body_json(response).await["max_rows"], json!(5));
}

#[tokio::test]
async fn test_code_errors_are_data() {
    let app = open_app();
    send(&app, request(Method::POST, "/SqliteContext", None)).await;
    let response = send(
        &app,
        request(Method::PUT, "/sqliteContext1!execute", Some(json!({"code": "foo"}))),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let cell = body_json(response).await;
    assert_eq!(cell["messages"][0]["message"], json!("near \"foo\": syntax error"));
    assert_eq!(cell["messages"][0]["line"], json!(0));
}

#[tokio::test]
async fn test_api_misuse_is_rejected() {
    let app = open_app();

    let response = send(&app, request(Method::POST, "/fooType", None)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_text(response).await, "Unknown type: fooType");

    let response = send(&app, request(Method::PUT, "/nobody!execute", Some(json!({})))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send(&app, request(Method::DELETE, "/nobody", None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    send(&app, request(Method::POST, "/SqliteContext", None)).await;
    let response = send(&app, request(Method::PUT, "/sqliteContext1!foo", None)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_text(response).await, "Unknown method: foo");

    let response = send(&app, request(Method::PUT, "/sqliteContext1", None)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let bad_body = Request::builder()
        .method(Method::PUT)
        .uri("/sqliteContext1!execute")
        .body(Body::from("{"))
        .unwrap();
    let response = send(&app, bad_body).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_python_over_http() {
    let app = open_app();
    let response = send(&app, request(Method::POST, "/PythonContext", None)).await;
    assert_eq!(body_json(response).await, json!("name://pythonContext1"));

    let response = send(
        &app,
        request(
            Method::PUT,
            "/pythonContext1!execute",
            Some(json!({"cell": {"code": "y = 24\nfoo"}})),
        ),
    )
    .await;
    let cell = body_json(response).await;
    assert_eq!(cell["messages"].as_array().unwrap().len(), 1);
    assert_eq!(cell["messages"][0]["line"], json!(2));
}

// =============================================================================
// Authorization and CORS
// =============================================================================

#[tokio::test]
async fn test_ticket_exchanged_for_token() {
    let (app, state) = app_with(ServerConfig::default());

    let response = send(&app, request(Method::GET, "/", None)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = send(&app, request(Method::GET, "/?ticket=wrong", None)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let ticket = state.auth.ticket_create();
    let response = send(&app, request(Method::GET, &format!("/?ticket={ticket}"), None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = response
        .headers()
        .get(SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let token = cookie
        .strip_prefix("token=")
        .and_then(|rest| rest.split(';').next())
        .unwrap()
        .to_string();
    assert_eq!(token.len(), 64);

    // Tickets are single use
    let response = send(&app, request(Method::GET, &format!("/?ticket={ticket}"), None)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Tokens are not
    for _ in 0..2 {
        let mut with_token = request(Method::GET, "/", None);
        with_token
            .headers_mut()
            .insert(COOKIE, format!("token={token}").parse().unwrap());
        let response = send(&app, with_token).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn test_cors_only_for_local_origins() {
    let app = open_app();

    let mut local = request(Method::GET, "/", None);
    local
        .headers_mut()
        .insert(ORIGIN, "http://localhost:3000".parse().unwrap());
    let response = send(&app, local).await;
    assert_eq!(
        response.headers().get("access-control-allow-origin").unwrap(),
        "http://localhost:3000"
    );
    assert_eq!(
        response.headers().get("access-control-allow-credentials").unwrap(),
        "true"
    );

    let mut remote = request(Method::GET, "/", None);
    remote
        .headers_mut()
        .insert(ORIGIN, "http://evil.example:4000".parse().unwrap());
    let response = send(&app, remote).await;
    assert!(response.headers().get("access-control-allow-origin").is_none());
}

#[tokio::test]
async fn test_preflight_needs_no_credentials() {
    let (app, _state) = app_with(ServerConfig::default());
    let preflight = Request::builder()
        .method(Method::OPTIONS)
        .uri("/sqliteContext1!execute")
        .header(ORIGIN, "http://127.0.0.1:8080")
        .header("access-control-request-method", "PUT")
        .body(Body::empty())
        .unwrap();
    let response = send(&app, preflight).await;
    assert!(response.status().is_success());
    assert_eq!(
        response.headers().get("access-control-allow-origin").unwrap(),
        "http://127.0.0.1:8080"
    );
}
