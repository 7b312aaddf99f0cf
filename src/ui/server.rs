//! Control API server

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use crate::config::UiConfig;
use crate::error::{Error, Result};
use crate::session::LiveHost;
use crate::ui::handlers;

/// Shared state for the handlers
pub struct AppState {
    pub host: Arc<LiveHost>,
}

/// HTTP control surface for a presentation layer
pub struct WebServer {
    config: UiConfig,
    state: Arc<AppState>,
}

impl WebServer {
    pub fn new(config: UiConfig, host: Arc<LiveHost>) -> Self {
        Self {
            config,
            state: Arc::new(AppState { host }),
        }
    }

    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/api/session", get(handlers::get_session))
            .route("/api/session/start", post(handlers::start_session))
            .route("/api/session/stop", post(handlers::stop_session))
            .route("/api/search", post(handlers::search))
            .route("/api/profiles", get(handlers::get_profiles))
            .route("/api/spectrum/:node", get(handlers::get_spectrum))
            .route("/api/devices", get(handlers::get_devices))
            .layer(cors)
            .with_state(self.state.clone())
    }

    pub fn address(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.config.bind_address, self.config.http_port)
            .parse()
            .map_err(|e| Error::Config(format!("invalid UI bind address: {e}")))
    }

    /// Serve until the listener fails
    pub async fn run(self) -> Result<()> {
        let addr = self.address()?;
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(%addr, "control API listening");

        axum::serve(listener, self.router()).await?;
        Ok(())
    }

    /// Run on a background task
    pub fn start_background(self) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move {
            let result = self.run().await;
            if let Err(e) = &result {
                tracing::error!(error = %e, "control API stopped");
            }
            result
        })
    }
}
