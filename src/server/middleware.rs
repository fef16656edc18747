//! axum adapter: run the gate in front of page routes

use crate::gate::{AccessDecision, AccessGate, GateRequest, RedirectTo};
use axum::{
    extract::{Request, State},
    http::{
        header::{AUTHORIZATION, COOKIE, SET_COOKIE},
        HeaderMap, HeaderName, HeaderValue,
    },
    middleware::{self, Next},
    response::{IntoResponse, Redirect, Response},
    Router,
};
use tracing::warn;

/// Response header naming the rejection code
pub const REASON_HEADER: &str = "x-dts-gate-reason";

/// Wrap `router` so every request passes through the gate first
pub fn protect<S>(router: Router<S>, gate: AccessGate) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(middleware::from_fn_with_state(gate, gate_layer))
}

/// Middleware function for `axum::middleware::from_fn_with_state`
pub async fn gate_layer(State(gate): State<AccessGate>, request: Request, next: Next) -> Response {
    // Body is not Sync: nothing borrowed from the request may live across an await
    let parts = OwnedParts::new(request.uri().path(), request.headers());
    let decision = gate.decide_raw(&parts.as_gate_request()).await;

    match decision {
        AccessDecision::Allow(_) => next.run(request).await,
        AccessDecision::Redirect(redirect) => redirect_response(&redirect),
    }
}

/// Evaluate the gate for a wire path and the headers that came with it
pub async fn decide_for(gate: &AccessGate, path: &str, headers: &HeaderMap) -> AccessDecision {
    let parts = OwnedParts::new(path, headers);
    gate.decide_raw(&parts.as_gate_request()).await
}

/// The pieces of a request the gate reads
struct OwnedParts {
    path: String,
    cookies: Option<String>,
    authorization: Option<String>,
}

impl OwnedParts {
    fn new(path: &str, headers: &HeaderMap) -> Self {
        Self {
            path: path.to_string(),
            cookies: cookie_header(headers),
            authorization: headers
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        }
    }

    fn as_gate_request(&self) -> GateRequest<'_> {
        GateRequest {
            path: &self.path,
            cookies: self.cookies.as_deref(),
            authorization: self.authorization.as_deref(),
        }
    }
}

/// All `Cookie` headers joined; HTTP/2 clients may send one per cookie
fn cookie_header(headers: &HeaderMap) -> Option<String> {
    let parts: Vec<&str> = headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("; "))
    }
}

/// Redirect response, deleting the listed cookies
pub fn redirect_response(redirect: &RedirectTo) -> Response {
    let mut response = Redirect::temporary(&redirect.location).into_response();
    let headers = response.headers_mut();

    headers.insert(
        HeaderName::from_static(REASON_HEADER),
        HeaderValue::from_static(redirect.reason.code()),
    );

    for name in &redirect.clear_cookies {
        match HeaderValue::from_str(&format!("{}=; Path=/; Max-Age=0", name)) {
            Ok(value) => {
                headers.append(SET_COOKIE, value);
            }
            Err(e) => {
                warn!(cookie = %name, error = %e, "Cannot express cookie deletion as a header");
            }
        }
    }

    response
}
