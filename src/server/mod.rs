//! HTTP surfaces for the gate
//!
//! - `middleware`: axum layer guarding an application's own routes
//! - `forward_auth`: standalone `/authz` endpoint for reverse proxies

pub mod forward_auth;
pub mod middleware;

pub use forward_auth::{create_router, run_server};
pub use middleware::{decide_for, gate_layer, protect, redirect_response, REASON_HEADER};
