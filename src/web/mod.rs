//! Web server module.

mod handlers;

use crate::status::StatusStore;

use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<StatusStore>,
}

/// Read-only status server.
pub struct Server {
    addr: SocketAddr,
    state: AppState,
}

impl Server {
    pub fn new(addr: SocketAddr, store: Arc<StatusStore>) -> Self {
        Self {
            addr,
            state: AppState { store },
        }
    }

    /// Build the router with all routes.
    pub fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            .route("/", get(handlers::handle_dashboard))
            .route("/json", get(handlers::handle_json))
            .route("/api/status", get(handlers::handle_status))
            .route("/favicon.ico", get(handlers::handle_favicon))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Serve until the listener fails.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let router = self.routes();

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("Web server listening on {}", listener.local_addr()?);

        axum::serve(listener, router).await?;

        Ok(())
    }
}
