//! Route rules: which paths skip the gate and which roles may open the rest
//!
//! Rules match plain strings, so adapters first turn the wire path into its
//! canonical form with [`normalize_path`]. Three rule sets exist:
//! - public routes: exact matches, never need a credential
//! - static bypass: asset/API prefixes and file-like paths, never gated
//! - permission table: ordered `prefix -> roles`, the FIRST registered prefix
//!   that matches decides. A later, longer prefix never overrides an earlier one.

use crate::auth::{Role, RoleClaim};
use percent_encoding::percent_decode_str;
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("route cannot be empty")]
    Empty,

    #[error("route '{0}' must start with '/'")]
    NotAbsolute(String),

    #[error("route prefix '{0}' allows no roles")]
    NoRoles(String),
}

/// A request path that has no canonical form
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("invalid percent escape in '{0}'")]
    BadEscape(String),

    #[error("path '{0}' does not decode to UTF-8")]
    InvalidUtf8(String),

    #[error("path '{0}' decodes to a control character")]
    ControlCharacter(String),
}

/// Canonical form of a request path as sent on the wire
///
/// Percent-escapes are decoded once, then empty and `.` segments are dropped
/// and `..` pops the previous segment (never past the root). The result always
/// starts with `/` and has no trailing slash unless it is the root.
pub fn normalize_path(raw: &str) -> Result<String, PathError> {
    let bytes = raw.as_bytes();
    for (i, _) in bytes.iter().enumerate().filter(|(_, b)| **b == b'%') {
        let escape = bytes.get(i + 1..i + 3);
        if !escape.is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit)) {
            return Err(PathError::BadEscape(raw.to_string()));
        }
    }

    let decoded = percent_decode_str(raw)
        .decode_utf8()
        .map_err(|_| PathError::InvalidUtf8(raw.to_string()))?;
    if decoded.chars().any(char::is_control) {
        return Err(PathError::ControlCharacter(raw.to_string()));
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    Ok(format!("/{}", segments.join("/")))
}

fn validate_route(route: &str) -> Result<(), RouteError> {
    if route.is_empty() {
        return Err(RouteError::Empty);
    }
    if !route.starts_with('/') {
        return Err(RouteError::NotAbsolute(route.to_string()));
    }
    Ok(())
}

/// One `prefix -> allowed roles` rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionEntry {
    prefix: String,
    roles: BTreeSet<Role>,
}

impl PermissionEntry {
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn roles(&self) -> &BTreeSet<Role> {
        &self.roles
    }

    pub fn matches(&self, path: &str) -> bool {
        path.starts_with(&self.prefix)
    }

    pub fn allows(&self, role: &RoleClaim) -> bool {
        match role {
            RoleClaim::Known(role) => self.roles.contains(role),
            RoleClaim::Unrecognized(_) => false,
        }
    }
}

impl fmt::Display for PermissionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let roles: Vec<&str> = self.roles.iter().map(Role::as_str).collect();
        write!(f, "{} -> [{}]", self.prefix, roles.join(", "))
    }
}

/// Ordered prefix table deciding which roles may open a path
#[derive(Debug, Clone, Default)]
pub struct PermissionTable {
    entries: Vec<PermissionEntry>,
}

impl PermissionTable {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Append a rule. Earlier rules keep precedence.
    pub fn register(
        &mut self,
        prefix: &str,
        roles: impl IntoIterator<Item = Role>,
    ) -> Result<(), RouteError> {
        validate_route(prefix)?;

        let roles: BTreeSet<Role> = roles.into_iter().collect();
        if roles.is_empty() {
            return Err(RouteError::NoRoles(prefix.to_string()));
        }

        if let Some(earlier) = self.entries.iter().find(|e| prefix.starts_with(&e.prefix)) {
            warn!(
                prefix = prefix,
                shadowed_by = earlier.prefix(),
                "Permission rule is unreachable: an earlier prefix matches every path it would"
            );
        }

        self.entries.push(PermissionEntry {
            prefix: prefix.to_string(),
            roles,
        });
        Ok(())
    }

    /// Builder form of [`register`](Self::register)
    pub fn with(
        mut self,
        prefix: &str,
        roles: impl IntoIterator<Item = Role>,
    ) -> Result<Self, RouteError> {
        self.register(prefix, roles)?;
        Ok(self)
    }

    /// The rule that governs `path`, if any
    pub fn governing(&self, path: &str) -> Option<&PermissionEntry> {
        self.entries.iter().find(|e| e.matches(path))
    }

    /// Whether `role` may open `path`. Ungoverned paths are open to everyone.
    pub fn permits(&self, path: &str, role: &RoleClaim) -> bool {
        match self.governing(path) {
            Some(entry) => entry.allows(role),
            None => true,
        }
    }

    pub fn entries(&self) -> &[PermissionEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Exact-match paths reachable without a credential
#[derive(Debug, Clone, Default)]
pub struct PublicRoutes {
    routes: BTreeSet<String>,
}

impl PublicRoutes {
    pub fn new() -> Self {
        Self {
            routes: BTreeSet::new(),
        }
    }

    pub fn add(&mut self, route: &str) -> Result<(), RouteError> {
        validate_route(route)?;
        self.routes.insert(route.to_string());
        Ok(())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.routes.contains(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(String::as_str)
    }
}

/// Paths that are not page navigations: framework assets, API calls, files
#[derive(Debug, Clone)]
pub struct StaticBypass {
    prefixes: Vec<String>,
    file_extensions: bool,
}

impl StaticBypass {
    pub fn new(file_extensions: bool) -> Self {
        Self {
            prefixes: Vec::new(),
            file_extensions,
        }
    }

    pub fn add_prefix(&mut self, prefix: &str) -> Result<(), RouteError> {
        validate_route(prefix)?;
        self.prefixes.push(prefix.to_string());
        Ok(())
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    pub fn matches(&self, path: &str) -> bool {
        self.prefixes.iter().any(|p| path.starts_with(p.as_str()))
            || (self.file_extensions && has_file_extension(path))
    }
}

impl Default for StaticBypass {
    fn default() -> Self {
        Self {
            prefixes: vec!["/_next".to_string(), "/api".to_string(), "/static".to_string()],
            file_extensions: true,
        }
    }
}

/// Last path segment has a dot followed by at least one character
fn has_file_extension(path: &str) -> bool {
    let last = path.rsplit('/').next().unwrap_or(path);
    last.rfind('.').is_some_and(|i| i + 1 < last.len())
}
