//! HTTP control server

use axum::{
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::error::Result;
use crate::network::TcpTransport;
use crate::session::SessionHandle;
use crate::ui::{handlers, websocket};

/// Shared state for all handlers
pub struct AppState {
    pub session: SessionHandle,
    /// Used by `POST /api/peers`; absent when peers are linked in-process
    pub transport: Option<TcpTransport>,
    /// Rate of the built-in tone source
    pub sample_rate: u32,
    pub started: Instant,
}

impl AppState {
    pub fn new(session: SessionHandle, transport: Option<TcpTransport>, sample_rate: u32) -> Self {
        Self {
            session,
            transport,
            sample_rate,
            started: Instant::now(),
        }
    }
}

/// Build the API router
pub fn router(state: Arc<AppState>, static_dir: Option<PathBuf>) -> Router {
    let api = Router::new()
        .route("/api/status", get(handlers::get_status))
        .route(
            "/api/tracks",
            get(handlers::get_tracks).post(handlers::create_track),
        )
        .route("/api/tracks/:id", delete(handlers::delete_track))
        .route("/api/tracks/:id/transport", post(handlers::transport))
        .route("/api/tracks/:id/record", post(handlers::start_record))
        .route("/api/tracks/:id/stop-record", post(handlers::stop_record))
        .route("/api/tracks/:id/export", get(handlers::export_track))
        .route(
            "/api/peers",
            get(handlers::get_peers).post(handlers::connect_peer),
        )
        .route("/api/history", get(handlers::get_history))
        .route("/ws", get(websocket::ws_handler))
        .with_state(state);

    let app = match static_dir {
        Some(dir) => api.fallback_service(ServeDir::new(dir)),
        None => api,
    };
    app.layer(CorsLayer::permissive())
}

pub struct WebServer {
    state: Arc<AppState>,
    addr: SocketAddr,
    static_dir: Option<PathBuf>,
}

impl WebServer {
    pub fn new(state: AppState, addr: SocketAddr) -> Self {
        Self {
            state: Arc::new(state),
            addr,
            static_dir: None,
        }
    }

    pub fn with_static_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.static_dir = dir;
        self
    }

    /// Serve until the process exits
    pub async fn run(self) -> Result<()> {
        let app = router(self.state, self.static_dir);
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("Control API listening on http://{}", self.addr);
        axum::serve(listener, app).await?;
        Ok(())
    }
}
