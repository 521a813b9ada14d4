//! Vida Plena server - session-authenticated conversational orchestrator.
//!
//! This crate serves the wellness assistant's HTTP surface:
//! - account registration, login, and cookie-bound server-side sessions
//! - profile and settings management over a SQLite credential store
//! - one shared multi-turn conversation with a remote generative model,
//!   with guided-interview seeding and mid-conversation reset
//!
//! ## Architecture
//!
//! ```text
//! Client → Access guard (protected routes) → handlers
//!              ↓                                ↓
//!        Session store ──── SQLite ──── Credential store
//!                                               ↓
//!                              Chat service → Gemini
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod auth;
pub mod chat;
pub mod provider;
pub mod routes;
pub mod session;
pub mod store;

pub use chat::ChatService;
pub use provider::{GeminiProvider, Provider};
pub use routes::AppState;
pub use session::SessionStore;
pub use store::UserStore;

use axum::Router;
use plena_common::Config;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Assemble the application state from configuration.
pub fn build_state(config: &Config) -> anyhow::Result<AppState> {
    let db = store::open_database(&config.db_path)
        .map_err(|e| anyhow::anyhow!("failed to open database: {e}"))?;

    let provider = Arc::new(GeminiProvider::new(
        &config.gemini_api_key,
        &config.gemini_model,
    ));

    Ok(AppState {
        users: UserStore::new(db.clone()),
        sessions: SessionStore::new(db),
        chat: Arc::new(ChatService::new(provider)),
        secure_cookies: config.production,
    })
}

/// Build the router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    routes::build_routes(state).layer(cors)
}

/// Start the server.
///
/// The conversation context is seeded before the listener accepts
/// requests; if seeding fails, the server still comes up and chat
/// requests report not-ready until a reset succeeds.
pub async fn start_server(config: &Config) -> anyhow::Result<()> {
    let state = build_state(config)?;

    if let Err(e) = state.chat.initialize().await {
        tracing::error!(error = %e, "Chat initialization failed; chat endpoints not ready");
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let router = build_router(state);

    tracing::info!("Starting Vida Plena server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
