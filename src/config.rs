//! Gate configuration file
//!
//! JSON, every field optional. Omitted fields fall back to the Diabetes
//! Treatment System front-end's routes and the remote resolver flavor.

use crate::auth::{
    CredentialResolver, Hs256Verifier, LocalResolver, RemoteResolver, Role,
    DEFAULT_REMOTE_TIMEOUT,
};
use crate::gate::{AccessGate, CredentialSource, EntryPoint, GateRules, RedirectPolicy};
use crate::routes::{PermissionTable, PublicRoutes, RouteError, StaticBypass};
use axum::http::HeaderValue;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_IDENTITY_ENDPOINT: &str = "http://localhost:8000/api/auth/me";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error("invalid identity endpoint '{0}'")]
    InvalidEndpoint(String),

    #[error("redirect target '{0}' cannot be empty")]
    EmptyRedirect(&'static str),

    #[error("redirect target {name} is not a valid Location header: {target:?}")]
    InvalidRedirect { name: &'static str, target: String },

    #[error("credential cookie name cannot be empty")]
    EmptyCookieName,

    #[error("hs256 secret cannot be empty")]
    EmptySecret,

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PermissionRule {
    pub prefix: String,
    pub roles: Vec<Role>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct StaticBypassConfig {
    pub prefixes: Vec<String>,
    pub file_extensions: bool,
}

impl Default for StaticBypassConfig {
    fn default() -> Self {
        let defaults = StaticBypass::default();
        Self {
            prefixes: defaults.prefixes().to_vec(),
            file_extensions: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct CredentialConfig {
    pub cookie: String,
    pub accept_bearer_header: bool,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        let defaults = CredentialSource::default();
        Self {
            cookie: defaults.cookie,
            accept_bearer_header: defaults.accept_bearer_header,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RedirectConfig {
    pub login: String,
    pub unauthorized: String,
    pub forbidden: String,
    /// Omitted: login for the remote flavor, unauthorized for local
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unauthenticated: Option<EntryPoint>,
}

impl Default for RedirectConfig {
    fn default() -> Self {
        let defaults = RedirectPolicy::default();
        Self {
            login: defaults.login,
            unauthorized: defaults.unauthorized,
            forbidden: defaults.forbidden,
            unauthenticated: None,
        }
    }
}

fn default_timeout_ms() -> u64 {
    DEFAULT_REMOTE_TIMEOUT.as_millis() as u64
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "strategy", rename_all = "lowercase")]
pub enum ResolverConfig {
    Remote {
        endpoint: String,
        #[serde(default = "default_timeout_ms")]
        timeout_ms: u64,
    },
    Local {
        /// Without a secret the token signature is not checked
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hs256_secret: Option<String>,
    },
}

impl ResolverConfig {
    fn is_remote(&self) -> bool {
        matches!(self, ResolverConfig::Remote { .. })
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        ResolverConfig::Remote {
            endpoint: DEFAULT_IDENTITY_ENDPOINT.to_string(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Top-level configuration document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct GateConfig {
    pub public_routes: Vec<String>,
    pub static_bypass: StaticBypassConfig,
    /// Checked in order; the first matching prefix decides
    pub permissions: Vec<PermissionRule>,
    pub credential: CredentialConfig,
    pub redirects: RedirectConfig,
    /// Omitted: the remote flavor clears `token` and `refresh_token`, local clears nothing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clear_cookies: Option<Vec<String>>,
    pub resolver: ResolverConfig,
}

impl Default for GateConfig {
    fn default() -> Self {
        let rule = |prefix: &str, roles: &[Role]| PermissionRule {
            prefix: prefix.to_string(),
            roles: roles.to_vec(),
        };

        Self {
            public_routes: ["/login", "/register", "/unauthorized", "/forbidden"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            static_bypass: StaticBypassConfig::default(),
            permissions: vec![
                rule("/dashboard/doctor", &[Role::Doctor]),
                rule("/dashboard/ml-engineer", &[Role::MlEngineer]),
                rule("/patients", &[Role::Doctor]),
                rule("/recommendations", &[Role::Doctor, Role::MlEngineer]),
                rule("/models", &[Role::MlEngineer]),
            ],
            credential: CredentialConfig::default(),
            redirects: RedirectConfig::default(),
            clear_cookies: None,
            resolver: ResolverConfig::default(),
        }
    }
}

impl GateConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Load `path` if given, otherwise the built-in defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Switch to local decoding, keeping any secret already configured
    pub fn use_local(&mut self) {
        if !matches!(self.resolver, ResolverConfig::Local { .. }) {
            self.resolver = ResolverConfig::Local { hs256_secret: None };
        }
    }

    /// Replace the HS256 secret of a local resolver; no effect on remote
    pub fn override_secret(&mut self, secret: Option<String>) {
        if let (ResolverConfig::Local { hs256_secret }, Some(secret)) = (&mut self.resolver, secret)
        {
            *hs256_secret = Some(secret);
        }
    }

    pub fn build_rules(&self) -> Result<GateRules, ConfigError> {
        let mut public = PublicRoutes::new();
        for route in &self.public_routes {
            public.add(route)?;
        }

        let mut bypass = StaticBypass::new(self.static_bypass.file_extensions);
        for prefix in &self.static_bypass.prefixes {
            bypass.add_prefix(prefix)?;
        }

        let mut permissions = PermissionTable::new();
        for rule in &self.permissions {
            permissions.register(&rule.prefix, rule.roles.iter().copied())?;
        }

        if self.credential.cookie.is_empty() {
            return Err(ConfigError::EmptyCookieName);
        }

        for (name, target) in [
            ("login", &self.redirects.login),
            ("unauthorized", &self.redirects.unauthorized),
            ("forbidden", &self.redirects.forbidden),
        ] {
            if target.is_empty() {
                return Err(ConfigError::EmptyRedirect(name));
            }
            if HeaderValue::from_str(target).is_err() {
                return Err(ConfigError::InvalidRedirect {
                    name,
                    target: target.clone(),
                });
            }
        }

        let remote = self.resolver.is_remote();
        let unauthenticated = self.redirects.unauthenticated.unwrap_or(if remote {
            EntryPoint::Login
        } else {
            EntryPoint::Unauthorized
        });
        let clear_cookies = match &self.clear_cookies {
            Some(names) => names.clone(),
            None if remote => vec![self.credential.cookie.clone(), "refresh_token".to_string()],
            None => Vec::new(),
        };

        Ok(GateRules {
            public,
            bypass,
            permissions,
            credential: CredentialSource {
                cookie: self.credential.cookie.clone(),
                accept_bearer_header: self.credential.accept_bearer_header,
            },
            redirects: RedirectPolicy {
                login: self.redirects.login.clone(),
                unauthorized: self.redirects.unauthorized.clone(),
                forbidden: self.redirects.forbidden.clone(),
                unauthenticated,
            },
            clear_cookies,
        })
    }

    pub fn build_resolver(&self) -> Result<Arc<dyn CredentialResolver>, ConfigError> {
        match &self.resolver {
            ResolverConfig::Remote {
                endpoint,
                timeout_ms,
            } => {
                let url = Url::parse(endpoint)
                    .ok()
                    .filter(|u| matches!(u.scheme(), "http" | "https"))
                    .ok_or_else(|| ConfigError::InvalidEndpoint(endpoint.clone()))?;
                let resolver = RemoteResolver::new(url, Duration::from_millis(*timeout_ms))
                    .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
                Ok(Arc::new(resolver))
            }
            ResolverConfig::Local {
                hs256_secret: Some(secret),
            } => {
                if secret.is_empty() {
                    return Err(ConfigError::EmptySecret);
                }
                Ok(Arc::new(LocalResolver::with_verifier(Hs256Verifier::new(
                    secret.as_bytes(),
                ))))
            }
            ResolverConfig::Local { hs256_secret: None } => Ok(Arc::new(LocalResolver::unverified())),
        }
    }

    pub fn build_gate(&self) -> Result<AccessGate, ConfigError> {
        let rules = self.build_rules()?;
        let resolver = self.build_resolver()?;
        Ok(AccessGate::new(rules, resolver))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::RoleClaim;
    use std::io::Write;

    #[test]
    fn test_empty_document_is_default() {
        let config = GateConfig::from_json("{}").unwrap();
        assert_eq!(config, GateConfig::default());
    }

    #[test]
    fn test_default_rules() {
        let rules = GateConfig::default().build_rules().unwrap();

        assert!(rules.public.contains("/login"));
        assert!(rules.public.contains("/register"));
        assert!(rules.bypass.matches("/api/recommendations"));
        assert_eq!(rules.permissions.len(), 5);
        assert!(!rules
            .permissions
            .permits("/patients/12", &RoleClaim::Known(Role::MlEngineer)));
        assert!(rules
            .permissions
            .permits("/recommendations", &RoleClaim::Known(Role::MlEngineer)));

        // Remote flavor preset
        assert_eq!(rules.redirects.unauthenticated, EntryPoint::Login);
        assert_eq!(rules.clear_cookies, vec!["token", "refresh_token"]);
    }

    #[test]
    fn test_local_flavor_preset() {
        let config = GateConfig::from_json(r#"{"resolver": {"strategy": "local"}}"#).unwrap();
        let rules = config.build_rules().unwrap();

        assert_eq!(rules.redirects.unauthenticated, EntryPoint::Unauthorized);
        assert!(rules.clear_cookies.is_empty());
    }

    #[test]
    fn test_explicit_values_override_flavor() {
        let config = GateConfig::from_json(
            r#"{
                "resolver": {"strategy": "local", "hs256_secret": "s3cret"},
                "redirects": {"unauthenticated": "login"},
                "clear_cookies": ["session"]
            }"#,
        )
        .unwrap();
        let rules = config.build_rules().unwrap();

        assert_eq!(rules.redirects.unauthenticated, EntryPoint::Login);
        assert_eq!(rules.clear_cookies, vec!["session"]);
        assert_eq!(config.build_resolver().unwrap().strategy(), "local");
    }

    #[test]
    fn test_permissions_keep_file_order() {
        let config = GateConfig::from_json(
            r#"{"permissions": [
                {"prefix": "/admin", "roles": ["DOCTOR"]},
                {"prefix": "/admin/public", "roles": ["DOCTOR", "ML_ENGINEER"]}
            ]}"#,
        )
        .unwrap();
        let rules = config.build_rules().unwrap();

        let prefixes: Vec<&str> = rules.permissions.entries().iter().map(|e| e.prefix()).collect();
        assert_eq!(prefixes, vec!["/admin", "/admin/public"]);
    }

    #[test]
    fn test_unknown_role_is_rejected() {
        let err = GateConfig::from_json(r#"{"permissions": [{"prefix": "/x", "roles": ["NURSE"]}]}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        assert!(GateConfig::from_json(r#"{"public_route": ["/login"]}"#).is_err());
    }

    #[test]
    fn test_invalid_routes_are_fatal() {
        let config = GateConfig::from_json(r#"{"public_routes": ["login"]}"#).unwrap();
        assert!(matches!(
            config.build_rules(),
            Err(ConfigError::Route(RouteError::NotAbsolute(_)))
        ));

        let config =
            GateConfig::from_json(r#"{"permissions": [{"prefix": "/x", "roles": []}]}"#).unwrap();
        assert!(matches!(
            config.build_rules(),
            Err(ConfigError::Route(RouteError::NoRoles(_)))
        ));

        let config = GateConfig::from_json(r#"{"redirects": {"forbidden": ""}}"#).unwrap();
        assert!(matches!(
            config.build_rules(),
            Err(ConfigError::EmptyRedirect("forbidden"))
        ));
    }

    #[test]
    fn test_redirect_targets_must_be_header_safe() {
        let config =
            GateConfig::from_json(r#"{"redirects": {"unauthorized": "/unauth\norized"}}"#).unwrap();
        assert!(matches!(
            config.build_rules(),
            Err(ConfigError::InvalidRedirect { name: "unauthorized", .. })
        ));

        let config = GateConfig::from_json(r#"{"redirects": {"login": "/sign-in?next=1"}}"#).unwrap();
        assert!(config.build_rules().is_ok());
    }

    #[test]
    fn test_invalid_resolver_is_fatal() {
        let config = GateConfig::from_json(
            r#"{"resolver": {"strategy": "remote", "endpoint": "not a url"}}"#,
        )
        .unwrap();
        assert!(matches!(
            config.build_resolver(),
            Err(ConfigError::InvalidEndpoint(_))
        ));

        let config = GateConfig::from_json(
            r#"{"resolver": {"strategy": "local", "hs256_secret": ""}}"#,
        )
        .unwrap();
        assert!(matches!(config.build_resolver(), Err(ConfigError::EmptySecret)));
    }

    #[test]
    fn test_remote_timeout_default() {
        let config = GateConfig::from_json(
            r#"{"resolver": {"strategy": "remote", "endpoint": "https://id.example.com/me"}}"#,
        )
        .unwrap();
        assert_eq!(
            config.resolver,
            ResolverConfig::Remote {
                endpoint: "https://id.example.com/me".to_string(),
                timeout_ms: 3000,
            }
        );
    }

    #[test]
    fn test_override_secret_only_for_local() {
        let mut config = GateConfig::default();
        config.override_secret(Some("abc".to_string()));
        assert!(config.resolver.is_remote());

        config.use_local();
        config.override_secret(Some("abc".to_string()));
        assert_eq!(
            config.resolver,
            ResolverConfig::Local {
                hs256_secret: Some("abc".to_string())
            }
        );
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"credential": {{"cookie": "dts_token"}}}}"#).unwrap();

        let config = GateConfig::load(file.path()).unwrap();
        assert_eq!(config.credential.cookie, "dts_token");
        assert!(config.credential.accept_bearer_header);

        let missing = GateConfig::load(Path::new("/nonexistent/dts-gate.json"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
