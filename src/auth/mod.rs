//! Authentication: credentials, roles, and how credentials become identities
//!
//! Resolution strategies:
//! - `remote`: the identity endpoint is asked per request (authoritative)
//! - `local`: a structured `header.payload.signature` token is decoded in-process
//!
//! Roles:
//! - `DOCTOR`: patients, recommendations, doctor dashboard
//! - `ML_ENGINEER`: models, recommendations, ML engineer dashboard

mod resolver;
mod roles;
mod tokens;

pub use resolver::{
    CredentialResolver, LocalResolver, RemoteResolver, ResolveError, ResolvedIdentity,
    DEFAULT_REMOTE_TIMEOUT,
};
pub use roles::{Role, RoleClaim};
pub use tokens::{
    mint, Credential, Hs256Verifier, StructuredToken, TokenClaims, TokenError, TokenVerifier,
    Unverified,
};
