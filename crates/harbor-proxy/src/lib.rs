//! HTTP front door for Harbor.
//!
//! Serves the static chat frontend, reports aggregate health, and forwards
//! every `/v1/*` request verbatim to the inference server.

pub mod config;
mod error;
mod handlers;
mod server;

use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use axum::Router;
use harbor_backend::{BackendClient, BackendConfig};
use std::path::PathBuf;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

pub use config::ProxyConfig;
pub use error::ProxyError;
pub use server::{serve, shutdown_signal};

/// Largest request body accepted for forwarding.
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub backend: BackendClient,
    /// Client used for forwarding; never follows redirects.
    pub http: reqwest::Client,
    pub frontend_dir: PathBuf,
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(proxy: &ProxyConfig, backend: &BackendConfig) -> Result<Self, ProxyError> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            backend: BackendClient::with_client(
                http.clone(),
                backend.base_url(),
                backend.api_key.clone(),
            ),
            http,
            frontend_dir: proxy.frontend_dir.clone(),
            request_timeout: proxy.request_timeout,
        })
    }
}

/// Build the public router.
pub fn router(state: AppState) -> Router {
    let static_files = ServeDir::new(&state.frontend_dir);

    let forward = get(handlers::proxy::forward)
        .post(handlers::proxy::forward)
        .put(handlers::proxy::forward)
        .delete(handlers::proxy::forward)
        .patch(handlers::proxy::forward);

    // The catch-all needs a non-empty segment, so `/v1/` gets its own route.
    Router::new()
        .route("/", get(handlers::frontend::index))
        .route("/health", get(handlers::health::health_check))
        .route("/v1/", forward.clone())
        .route("/v1/*path", forward)
        .nest_service("/static", static_files)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
