//! HTTP routes for the cellhost server.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::header::{ACCEPT, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::get;
use axum::{Router, middleware};
use cellhost_core::Registry;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::ServerConfig;
use crate::auth::{self, Auth};
use crate::error::{HttpError, ServerError};

/// Hosts allowed to make cross-origin requests.
const LOCAL_HOSTS: [&str; 2] = ["127.0.0.1", "localhost"];

/// Application state shared across handlers.
pub struct AppState {
    pub registry: Arc<Registry>,
    pub config: ServerConfig,
    pub auth: Auth,
}

impl AppState {
    pub fn new(registry: Arc<Registry>, config: ServerConfig) -> Self {
        Self {
            registry,
            config,
            auth: Auth::default(),
        }
    }

    fn fail(&self, error: impl Into<ServerError>) -> HttpError {
        HttpError {
            error: error.into(),
            debug: self.config.debug,
        }
    }

    /// Run a registry operation off the async runtime. Context calls block
    /// for as long as the guest code runs.
    async fn blocking<T, F>(&self, operation: F) -> Result<T, HttpError>
    where
        T: Send + 'static,
        F: FnOnce(&Registry) -> cellhost_core::Result<T> + Send + 'static,
    {
        let registry = Arc::clone(&self.registry);
        tokio::task::spawn_blocking(move || operation(&registry))
            .await
            .map_err(|e| self.fail(ServerError::Task(e.to_string())))?
            .map_err(|e| self.fail(e))
    }
}

/// Create the router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(home_handler))
        .route(
            "/{*path}",
            get(get_handler)
                .post(post_handler)
                .put(put_handler)
                .delete(delete_handler),
        )
        .layer(middleware::from_fn_with_state(state.clone(), auth::authorize))
        .layer(cors_layer())
        .with_state(state)
}

/// Whether an origin such as `http://localhost:3000` names a local host.
fn is_local_origin(origin: &HeaderValue) -> bool {
    let Ok(origin) = origin.to_str() else {
        return false;
    };
    let Some(rest) = origin
        .strip_prefix("http://")
        .or_else(|| origin.strip_prefix("https://"))
    else {
        return false;
    };
    let host = rest.split(':').next().unwrap_or(rest);
    LOCAL_HOSTS.contains(&host)
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(|origin, _| is_local_origin(origin)))
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(24 * 60 * 60))
}

/// Decode an optional JSON request body. An empty body is `null`.
fn json_body(body: &Bytes) -> Result<serde_json::Value, ServerError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(serde_json::Value::Null);
    }
    Ok(serde_json::from_slice(body)?)
}

/// Manifest for JSON clients, a short landing page otherwise.
async fn home_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let wants_json = headers
        .get(ACCEPT)
        .and_then(|accept| accept.to_str().ok())
        .is_some_and(|accept| accept.contains("application/json"));
    if wants_json {
        Json(state.registry.manifest()).into_response()
    } else {
        Html(
            r#"<!DOCTYPE html>
<html>
<head><title>cellhost</title></head>
<body>
    <h1>cellhost</h1>
    <p>Request this page with <code>Accept: application/json</code> for the host manifest.</p>
    <ul>
        <li><code>POST /{type}</code> - Create an instance</li>
        <li><code>GET /{address}</code> - Get an instance</li>
        <li><code>PUT /{address}!{method}</code> - Call a method</li>
        <li><code>DELETE /{address}</code> - Delete an instance</li>
    </ul>
</body>
</html>"#,
        )
        .into_response()
    }
}

/// Create an instance. The body holds its options plus an optional `name`.
async fn post_handler(
    State(state): State<Arc<AppState>>,
    Path(type_name): Path<String>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, HttpError> {
    let mut options = json_body(&body).map_err(|e| state.fail(e))?;
    let name = options
        .as_object_mut()
        .and_then(|fields| fields.remove("name"))
        .and_then(|name| name.as_str().map(str::to_string));
    let address = state
        .blocking(move |registry| registry.post(&type_name, name.as_deref(), options))
        .await?;
    Ok(Json(serde_json::Value::String(address)))
}

async fn get_handler(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
) -> Result<Json<serde_json::Value>, HttpError> {
    let snapshot = state
        .blocking(move |registry| registry.get(&address))
        .await?;
    Ok(Json(snapshot))
}

/// Call a method. The path is `{address}!{method}`.
async fn put_handler(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, HttpError> {
    let Some((address, method)) = path
        .rsplit_once('!')
        .filter(|(address, method)| !address.is_empty() && !method.is_empty())
        .map(|(address, method)| (address.to_string(), method.to_string()))
    else {
        return Err(state.fail(ServerError::NoRoute(format!("PUT /{path}"))));
    };
    let args = json_body(&body).map_err(|e| state.fail(e))?;
    let result = state
        .blocking(move |registry| registry.put(&address, &method, args))
        .await?;
    Ok(Json(result))
}

async fn delete_handler(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
) -> Result<StatusCode, HttpError> {
    state
        .blocking(move |registry| registry.delete(&address))
        .await?;
    Ok(StatusCode::OK)
}
