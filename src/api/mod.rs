//! HTTP API for the agent bridge.
//!
//! ## Endpoints
//!
//! - `GET /api/health` - Health check
//! - `GET /api/models` - All models declared by registered backends
//! - `GET /api/models/resolve?model=` - Backend that would run a model
//! - `GET /api/providers` - Registered backends with installation status
//! - `GET /api/providers/:name` - Installation status of one backend (name or alias)
//! - `POST /api/execute` - Run a prompt and stream normalized messages via SSE

mod providers;
mod routes;
pub mod types;

pub use routes::{router, serve, AppState};
pub use types::*;
