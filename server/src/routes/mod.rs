//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! This module binds the drawing page, the websocket endpoint and the
//! health check under a single Axum router. Everything else is served as
//! static files from the public directory.

pub mod draw;
pub mod ws;

use std::path::PathBuf;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the full application router.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let public = ServeDir::new(public_dir()).append_index_html_on_directories(true);

    Router::new()
        .route("/", get(draw::redirect_root))
        .route("/draw", get(draw::draw_page))
        .route("/api/ws", get(ws::handle_ws))
        .route("/healthz", get(healthz))
        .fallback_service(public)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Resolve the directory holding `index.html` and the browser bundle.
pub(crate) fn public_dir() -> PathBuf {
    std::env::var("PUBLIC_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("public"))
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
