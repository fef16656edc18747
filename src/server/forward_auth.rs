//! Forward-auth endpoint for reverse proxies
//!
//! The proxy sends every page navigation to `GET /authz` with the original
//! URI in `X-Forwarded-Uri` (Traefik) or `X-Original-URI` (nginx
//! `auth_request`). A 2xx lets the navigation through; anything else is
//! returned to the browser as-is.

use crate::gate::{AccessDecision, AccessGate};
use crate::server::middleware::{decide_for, redirect_response};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use tracing::{debug, info};

const FORWARDED_URI_HEADERS: [&str; 2] = ["x-forwarded-uri", "x-original-uri"];

/// Create the forward-auth router
pub fn create_router(gate: AccessGate) -> Router {
    Router::new()
        .route("/authz", get(authz_handler))
        .route("/health", get(health_handler))
        .with_state(gate)
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn authz_handler(State(gate): State<AccessGate>, headers: HeaderMap) -> Response {
    let Some(uri) = forwarded_uri(&headers) else {
        debug!("Forward-auth request without forwarded URI");
        return (StatusCode::BAD_REQUEST, "missing X-Forwarded-Uri").into_response();
    };

    let path = forwarded_path(&uri);
    match decide_for(&gate, path, &headers).await {
        AccessDecision::Allow(_) => (StatusCode::OK, "ok").into_response(),
        AccessDecision::Redirect(redirect) => redirect_response(&redirect),
    }
}

fn forwarded_uri(headers: &HeaderMap) -> Option<String> {
    FORWARDED_URI_HEADERS
        .iter()
        .find_map(|name| headers.get(*name))
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Path component of a forwarded URI, which may be absolute and carry a query
fn forwarded_path(uri: &str) -> &str {
    let without_origin = match uri.find("://") {
        Some(i) => {
            let rest = &uri[i + 3..];
            rest.find('/').map_or("/", |j| &rest[j..])
        }
        None => uri,
    };

    let path = without_origin
        .split(['?', '#'])
        .next()
        .unwrap_or(without_origin);

    if path.is_empty() {
        "/"
    } else {
        path
    }
}

/// Serve the forward-auth router until `shutdown` resolves
pub async fn run_server<F>(bind_addr: SocketAddr, gate: AccessGate, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(gate);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(addr = %bind_addr, "Forward-auth server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
