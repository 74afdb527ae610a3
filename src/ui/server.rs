//! HTTP and WebSocket server

use axum::{routing::get, Router};
use crossbeam_channel::Sender;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

use super::{handlers, websocket};
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::session::{DecodedChunk, SessionRegistry};

/// Shared state for every handler
pub struct AppState {
    pub config: AppConfig,
    pub registry: Arc<SessionRegistry>,
    /// Where inbound sessions deliver decoded audio
    pub consumer: Option<Sender<DecodedChunk>>,
    pub mode: String,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: AppConfig, registry: Arc<SessionRegistry>, mode: impl Into<String>) -> Self {
        Self {
            config,
            registry,
            consumer: None,
            mode: mode.into(),
            started_at: Instant::now(),
        }
    }

    pub fn with_consumer(mut self, tx: Sender<DecodedChunk>) -> Self {
        self.consumer = Some(tx);
        self
    }
}

pub struct WebServer {
    state: Arc<AppState>,
}

impl WebServer {
    pub fn new(state: AppState) -> Self {
        Self {
            state: Arc::new(state),
        }
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws/audio", get(websocket::audio_ws_handler))
            .route("/api/status", get(handlers::get_status))
            .route("/api/sessions", get(handlers::list_sessions))
            .route("/api/sessions/:id", get(handlers::get_session))
            .layer(
                ServiceBuilder::new().layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                ),
            )
            .with_state(Arc::clone(&self.state))
    }

    pub fn address(&self) -> Result<SocketAddr> {
        let ui = &self.state.config.ui;
        format!("{}:{}", ui.bind_address, ui.http_port)
            .parse()
            .map_err(|e| Error::Config(format!("invalid bind address: {}", e)))
    }

    /// Bind and serve until the listener fails
    pub async fn run(self) -> Result<()> {
        let addr = self.address()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Listening on {}", listener.local_addr()?);
        axum::serve(listener, self.router()).await?;
        Ok(())
    }

    pub fn start_background(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.run().await {
                tracing::error!("Web server error: {}", e);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_from_config() {
        let mut config = AppConfig::default();
        config.ui.bind_address = "127.0.0.1".into();
        config.ui.http_port = 9100;
        let server = WebServer::new(AppState::new(config, Arc::new(SessionRegistry::new()), "receiver"));
        assert_eq!(server.address().unwrap(), "127.0.0.1:9100".parse().unwrap());
    }

    #[test]
    fn test_bad_address_is_config_error() {
        let mut config = AppConfig::default();
        config.ui.bind_address = "not an address".into();
        let server = WebServer::new(AppState::new(config, Arc::new(SessionRegistry::new()), "receiver"));
        assert!(matches!(server.address(), Err(Error::Config(_))));
    }
}
