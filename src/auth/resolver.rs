//! Credential resolution strategies
//!
//! - [`RemoteResolver`]: asks an identity endpoint who the bearer is
//! - [`LocalResolver`]: decodes a structured token in-process

use crate::auth::roles::RoleClaim;
use crate::auth::tokens::{Credential, StructuredToken, TokenError, TokenVerifier, Unverified};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

/// Default bound on a single identity endpoint call
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(3);

/// Why a credential could not be turned into an identity
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("malformed credential: {0}")]
    Malformed(String),

    #[error("credential expired")]
    Expired,

    #[error("credential could not be resolved: {0}")]
    Unresolvable(String),
}

impl From<TokenError> for ResolveError {
    fn from(err: TokenError) -> Self {
        ResolveError::Malformed(err.to_string())
    }
}

/// Identity extracted from a credential for one request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub role: Option<RoleClaim>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Turns a bearer credential into an identity
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve(&self, credential: &Credential) -> Result<ResolvedIdentity, ResolveError>;

    /// Short name for logs
    fn strategy(&self) -> &'static str;
}

/// Resolves credentials by decoding a structured token locally
///
/// The verifier decides whether the signature is checked. With
/// [`Unverified`] the payload is trusted as-is.
#[derive(Debug, Clone)]
pub struct LocalResolver<V = Unverified> {
    verifier: V,
}

impl LocalResolver<Unverified> {
    /// Decode without any signature check
    pub fn unverified() -> Self {
        warn!("Local credential resolver built without signature verification; token payloads are trusted as-is");
        Self {
            verifier: Unverified,
        }
    }
}

impl<V: TokenVerifier> LocalResolver<V> {
    pub fn with_verifier(verifier: V) -> Self {
        if !verifier.is_verifying() {
            warn!("Local credential resolver built without signature verification; token payloads are trusted as-is");
        }
        Self { verifier }
    }

    /// Resolve against an explicit clock
    pub fn resolve_at(
        &self,
        credential: &Credential,
        now: DateTime<Utc>,
    ) -> Result<ResolvedIdentity, ResolveError> {
        let token = StructuredToken::decode(credential.as_str())?;
        self.verifier.verify(&token)?;

        let claims = token.into_claims();
        if claims.is_expired_at(now) {
            return Err(ResolveError::Expired);
        }

        Ok(ResolvedIdentity {
            role: claims.role.as_deref().map(RoleClaim::from_wire),
            expires_at: claims.expires_at(),
        })
    }
}

#[async_trait]
impl<V: TokenVerifier> CredentialResolver for LocalResolver<V> {
    async fn resolve(&self, credential: &Credential) -> Result<ResolvedIdentity, ResolveError> {
        self.resolve_at(credential, Utc::now())
    }

    fn strategy(&self) -> &'static str {
        "local"
    }
}

/// Body returned by the identity endpoint on success
#[derive(Debug, Deserialize)]
struct IdentityResponse {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    exp: Option<f64>,
}

/// Resolves credentials by asking an identity endpoint
///
/// The endpoint is authoritative. Any failure to get a usable answer (status,
/// network, timeout, body) is reported as [`ResolveError::Unresolvable`].
#[derive(Debug, Clone)]
pub struct RemoteResolver {
    client: reqwest::Client,
    endpoint: Url,
}

impl RemoteResolver {
    pub fn new(endpoint: Url, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, endpoint))
    }

    /// Use a caller-provided client (connection pool shared with other code)
    pub fn with_client(client: reqwest::Client, endpoint: Url) -> Self {
        Self { client, endpoint }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl CredentialResolver for RemoteResolver {
    async fn resolve(&self, credential: &Credential) -> Result<ResolvedIdentity, ResolveError> {
        let response = self
            .client
            .get(self.endpoint.clone())
            .header(AUTHORIZATION, format!("Bearer {}", credential.as_str()))
            .header(CONTENT_TYPE, "application/json")
            .header(CACHE_CONTROL, "no-store")
            .send()
            .await
            .map_err(|e| {
                warn!(endpoint = %self.endpoint, error = %e, "Identity endpoint request failed");
                ResolveError::Unresolvable(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            debug!(endpoint = %self.endpoint, status = %status, "Identity endpoint rejected credential");
            return Err(ResolveError::Unresolvable(format!("identity endpoint returned {}", status)));
        }

        let body: IdentityResponse = response.json().await.map_err(|e| {
            warn!(endpoint = %self.endpoint, error = %e, "Identity endpoint returned unreadable body");
            ResolveError::Unresolvable(e.to_string())
        })?;

        Ok(ResolvedIdentity {
            role: body.role.as_deref().map(RoleClaim::from_wire),
            expires_at: body
                .exp
                .and_then(|exp| DateTime::from_timestamp_millis((exp * 1000.0) as i64)),
        })
    }

    fn strategy(&self) -> &'static str {
        "remote"
    }
}
