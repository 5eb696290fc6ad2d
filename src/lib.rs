//! Server-sent-event relay.
//!
//! Client side: [`EventRelayStore`] keeps one shared SSE connection and fans
//! events out to handlers by subject. Server side: an axum router exposing
//! `/api/events/{file.<id>|project.<id>}` streams and a publish endpoint,
//! fanned out in-process or through Redis pub/sub.

pub mod client;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod repositories;
pub mod services;

pub use client::{ConnectionState, EventHandler, EventRelayStore, SseTransport};
pub use config::{Config, RelayConfig};
pub use error::{AppError, RelayError};
pub use handlers::http::AppState;
pub use models::event::{EventKind, RelayEvent};
pub use services::channel::ChannelService;

use axum::routing::get;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the API router (event streams, publish, health). Used by main and by integration tests.
pub fn create_app(state: AppState) -> axum::Router {
    axum::Router::new()
        .route(
            "/api/events/:channel",
            get(handlers::events).post(handlers::publish),
        )
        .route("/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
