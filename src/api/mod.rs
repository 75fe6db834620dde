//! HTTP API for the mention gate.
//!
//! ## Endpoints
//!
//! - `POST /api/mention` - Process one mention (always 200; failures are in the body)
//! - `GET /api/quota/:user_id` - Current quota and usage history
//! - `GET /api/health` - Health check with cache counters

mod routes;

pub use routes::{router, serve, AppState};
