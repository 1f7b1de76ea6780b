// ABOUTME: HTTP server for devstate, exposing the "set device state" operation over JSON.
// ABOUTME: Uses Axum with a shared persistence engine; file I/O runs on the blocking thread pool.

pub mod api;
pub mod app_state;
pub mod config;
pub mod routes;

pub use app_state::{AppState, SharedState};
pub use config::{ConfigError, DevstateConfig};
pub use routes::create_router;
