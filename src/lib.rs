//! dts-gate - route access-control gate for the Diabetes Treatment System
//!
//! Decides, per page navigation, whether a request may continue or must be
//! redirected: public and static paths pass, everything else needs a bearer
//! credential whose role is permitted for the path.

pub mod auth;
pub mod config;
pub mod gate;
pub mod routes;
pub mod server;

pub use auth::{Credential, CredentialResolver, LocalResolver, RemoteResolver, Role, RoleClaim};
pub use config::{ConfigError, GateConfig};
pub use gate::{AccessDecision, AccessGate, Admission, GateRequest, Rejection};
pub use routes::{normalize_path, PathError, PermissionTable, PublicRoutes, StaticBypass};
