//! HTTP API for shhh.
//!
//! ## Endpoints
//!
//! - `POST /api/secret` - Encrypt and store a secret
//! - `POST /api/secret/read` - Decrypt a secret, consuming it on success
//! - `GET /api/health` - Health check

mod routes;
pub mod types;

pub use routes::{router, serve, AppState};
pub use types::*;
