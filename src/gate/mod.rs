//! Per-request access decision
//!
//! The gate walks a fixed sequence for every page navigation:
//!
//! 1. exact public route        -> allow, no credential looked at
//! 2. static/API/file-like path -> allow, the gate only governs pages
//! 3. no credential             -> redirect to the entry point
//! 4. credential not resolvable -> redirect to the entry point
//! 5. role not permitted        -> redirect to the forbidden page
//! 6. otherwise                 -> allow
//!
//! The gate never fails: every outcome is an [`AccessDecision`].

use crate::auth::{Credential, CredentialResolver, ResolveError, RoleClaim};
use crate::routes::{normalize_path, PathError, PermissionTable, PublicRoutes, StaticBypass};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Why a request was turned away
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("no credential presented")]
    MissingCredential,

    #[error("malformed credential: {0}")]
    MalformedCredential(String),

    #[error("credential expired")]
    ExpiredCredential,

    #[error("credential could not be resolved: {0}")]
    UnresolvableCredential(String),

    #[error("role {role} may not access {path}")]
    InsufficientRole { role: String, path: String },

    #[error(transparent)]
    MalformedPath(#[from] PathError),
}

impl Rejection {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Rejection::MissingCredential => "missing_credential",
            Rejection::MalformedCredential(_) => "malformed_credential",
            Rejection::ExpiredCredential => "expired_credential",
            Rejection::UnresolvableCredential(_) => "unresolvable_credential",
            Rejection::InsufficientRole { .. } => "insufficient_role",
            Rejection::MalformedPath(_) => "malformed_path",
        }
    }
}

impl From<ResolveError> for Rejection {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Malformed(detail) => Rejection::MalformedCredential(detail),
            ResolveError::Expired => Rejection::ExpiredCredential,
            ResolveError::Unresolvable(detail) => Rejection::UnresolvableCredential(detail),
        }
    }
}

/// Which terminal state let a request through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Admission {
    PublicRoute,
    StaticAsset,
    Authorized,
}

/// A rejected request: where to send it and what to forget
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectTo {
    pub location: String,
    pub reason: Rejection,
    /// Cookies the response should delete
    pub clear_cookies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Allow(Admission),
    Redirect(RedirectTo),
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allow(_))
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            AccessDecision::Allow(_) => None,
            AccessDecision::Redirect(r) => Some(&r.reason),
        }
    }
}

impl fmt::Display for AccessDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessDecision::Allow(admission) => write!(f, "allow ({:?})", admission),
            AccessDecision::Redirect(r) => write!(f, "redirect {} ({})", r.location, r.reason.code()),
        }
    }
}

/// Where unauthenticated visitors are sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryPoint {
    /// Login page, with the original path in a `redirect` query parameter
    #[default]
    Login,
    /// Standalone "unauthorized" page
    Unauthorized,
}

/// Redirect destinations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectPolicy {
    pub login: String,
    pub unauthorized: String,
    pub forbidden: String,
    pub unauthenticated: EntryPoint,
}

impl RedirectPolicy {
    fn entry_point(&self, path: &str) -> String {
        match self.unauthenticated {
            EntryPoint::Login => {
                let encoded: String = url::form_urlencoded::byte_serialize(path.as_bytes()).collect();
                let sep = if self.login.contains('?') { '&' } else { '?' };
                format!("{}{}redirect={}", self.login, sep, encoded)
            }
            EntryPoint::Unauthorized => self.unauthorized.clone(),
        }
    }
}

impl Default for RedirectPolicy {
    fn default() -> Self {
        Self {
            login: "/login".to_string(),
            unauthorized: "/unauthorized".to_string(),
            forbidden: "/forbidden".to_string(),
            unauthenticated: EntryPoint::Login,
        }
    }
}

/// Where a credential is read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialSource {
    /// Cookie holding the bearer token
    pub cookie: String,
    /// Fall back to `Authorization: Bearer <token>`
    pub accept_bearer_header: bool,
}

impl CredentialSource {
    pub fn extract(&self, request: &GateRequest<'_>) -> Option<Credential> {
        let from_cookie = request
            .cookies
            .and_then(|header| cookie_value(header, &self.cookie))
            .and_then(Credential::new);

        from_cookie.or_else(|| {
            if !self.accept_bearer_header {
                return None;
            }
            request
                .authorization
                .and_then(|value| {
                    let (scheme, token) = value.trim().split_once(' ')?;
                    scheme.eq_ignore_ascii_case("bearer").then_some(token)
                })
                .and_then(Credential::new)
        })
    }
}

impl Default for CredentialSource {
    fn default() -> Self {
        Self {
            cookie: "token".to_string(),
            accept_bearer_header: true,
        }
    }
}

/// Find `name` in a `Cookie` request header
fn cookie_value<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then(|| value.trim_matches('"'))
    })
}

/// What the gate needs to know about an inbound request
#[derive(Debug, Clone, Copy, Default)]
pub struct GateRequest<'a> {
    pub path: &'a str,
    /// Raw `Cookie` header
    pub cookies: Option<&'a str>,
    /// Raw `Authorization` header
    pub authorization: Option<&'a str>,
}

impl<'a> GateRequest<'a> {
    pub fn new(path: &'a str) -> Self {
        Self {
            path,
            cookies: None,
            authorization: None,
        }
    }

    pub fn with_cookies(mut self, header: &'a str) -> Self {
        self.cookies = Some(header);
        self
    }

    pub fn with_authorization(mut self, header: &'a str) -> Self {
        self.authorization = Some(header);
        self
    }
}

/// Everything the gate decides with, fixed at start-up
#[derive(Debug, Clone, Default)]
pub struct GateRules {
    pub public: PublicRoutes,
    pub bypass: StaticBypass,
    pub permissions: PermissionTable,
    pub credential: CredentialSource,
    pub redirects: RedirectPolicy,
    /// Cookies deleted when a credential is missing or unusable
    pub clear_cookies: Vec<String>,
}

struct GateInner {
    rules: GateRules,
    resolver: Arc<dyn CredentialResolver>,
}

/// Route access gate. Cheap to clone, safe to share across tasks.
#[derive(Clone)]
pub struct AccessGate {
    inner: Arc<GateInner>,
}

impl AccessGate {
    pub fn new(rules: GateRules, resolver: Arc<dyn CredentialResolver>) -> Self {
        Self {
            inner: Arc::new(GateInner { rules, resolver }),
        }
    }

    pub fn rules(&self) -> &GateRules {
        &self.inner.rules
    }

    pub fn resolver(&self) -> &dyn CredentialResolver {
        self.inner.resolver.as_ref()
    }

    /// Decide whether `request` may proceed
    pub async fn decide(&self, request: &GateRequest<'_>) -> AccessDecision {
        let decision = self.evaluate(request).await;

        match &decision {
            AccessDecision::Allow(admission) => {
                debug!(path = request.path, admission = ?admission, "Request allowed");
            }
            AccessDecision::Redirect(redirect) => {
                info!(
                    path = request.path,
                    reason = redirect.reason.code(),
                    location = %redirect.location,
                    strategy = self.inner.resolver.strategy(),
                    "Request redirected"
                );
            }
        }

        decision
    }

    /// Like [`decide`](Self::decide), for a path exactly as it arrived on the wire
    ///
    /// The path is normalized first; one without a canonical form is sent to
    /// the forbidden page without consulting any rule.
    pub async fn decide_raw(&self, request: &GateRequest<'_>) -> AccessDecision {
        match normalize_path(request.path) {
            Ok(path) => {
                let request = GateRequest {
                    path: &path,
                    ..*request
                };
                self.decide(&request).await
            }
            Err(err) => {
                info!(path = request.path, error = %err, "Request path rejected");
                AccessDecision::Redirect(RedirectTo {
                    location: self.inner.rules.redirects.forbidden.clone(),
                    reason: err.into(),
                    clear_cookies: Vec::new(),
                })
            }
        }
    }

    async fn evaluate(&self, request: &GateRequest<'_>) -> AccessDecision {
        let rules = &self.inner.rules;
        let path = request.path;

        if rules.public.contains(path) {
            return AccessDecision::Allow(Admission::PublicRoute);
        }

        if rules.bypass.matches(path) {
            return AccessDecision::Allow(Admission::StaticAsset);
        }

        let Some(credential) = rules.credential.extract(request) else {
            return self.unauthenticated(path, Rejection::MissingCredential);
        };

        let identity = match self.inner.resolver.resolve(&credential).await {
            Ok(identity) => identity,
            Err(err) => return self.unauthenticated(path, err.into()),
        };

        if let Some(role) = &identity.role {
            if !rules.permissions.permits(path, role) {
                return self.forbidden(path, role);
            }
        }

        AccessDecision::Allow(Admission::Authorized)
    }

    fn unauthenticated(&self, path: &str, reason: Rejection) -> AccessDecision {
        let rules = &self.inner.rules;
        AccessDecision::Redirect(RedirectTo {
            location: rules.redirects.entry_point(path),
            reason,
            clear_cookies: rules.clear_cookies.clone(),
        })
    }

    fn forbidden(&self, path: &str, role: &RoleClaim) -> AccessDecision {
        AccessDecision::Redirect(RedirectTo {
            location: self.inner.rules.redirects.forbidden.clone(),
            reason: Rejection::InsufficientRole {
                role: role.to_string(),
                path: path.to_string(),
            },
            clear_cookies: Vec::new(),
        })
    }
}

impl fmt::Debug for AccessGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessGate")
            .field("rules", &self.inner.rules)
            .field("strategy", &self.inner.resolver.strategy())
            .finish()
    }
}
