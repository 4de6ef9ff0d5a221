//! cellhost HTTP server.
//!
//! Exposes a [`Registry`] over HTTP:
//!
//! - `GET /`: host manifest
//! - `POST /{type}`: create an instance, returns its address
//! - `GET /{address}`: instance snapshot
//! - `PUT /{address}!{method}`: call a method with JSON arguments
//! - `DELETE /{address}`: dispose of an instance
//!
//! Requests are authorized with one-use tickets exchanged for a token
//! cookie (see [`auth`]).

pub mod auth;
pub mod error;
pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use cellhost_core::Registry;

pub use auth::Auth;
pub use error::{ServerError, ServerResult};
pub use routes::{AppState, create_router};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Whether requests need a ticket or token.
    pub authorization: bool,
    /// Whether internal error responses carry the error detail.
    pub debug: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 2000,
            authorization: true,
            debug: false,
        }
    }
}

impl ServerConfig {
    pub fn address(&self) -> ServerResult<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|_| ServerError::InvalidAddress(format!("{}:{}", self.host, self.port)))
    }
}

/// Serve a registry until Ctrl+C.
pub async fn serve(registry: Arc<Registry>, config: ServerConfig) -> ServerResult<()> {
    let addr = config.address()?;
    let state = Arc::new(AppState::new(registry, config));

    if state.config.authorization {
        let ticket = state.auth.ticket_create();
        println!("Serving at http://{addr}/?ticket={ticket}");
    } else {
        println!("Serving at http://{addr}/");
    }
    tracing::info!("Starting cellhost server at http://{}", addr);

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received shutdown signal");
            let _ = shutdown_tx.send(());
        }
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        })
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}
