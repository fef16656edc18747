//! Roles known to the Diabetes Treatment System

use serde::{Deserialize, Serialize};
use std::fmt;

/// A role that can be granted access to a route prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    /// Clinician: patients, recommendations, doctor dashboard
    #[serde(rename = "DOCTOR")]
    Doctor,
    /// Model maintainer: models, recommendations, ML dashboard
    #[serde(rename = "ML_ENGINEER")]
    MlEngineer,
}

impl Role {
    pub const ALL: [Role; 2] = [Role::Doctor, Role::MlEngineer];

    /// Wire name as carried in tokens and identity responses
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Doctor => "DOCTOR",
            Role::MlEngineer => "ML_ENGINEER",
        }
    }

    /// Exact wire-name match, as used when reading credentials
    pub fn from_wire(s: &str) -> Option<Role> {
        Role::ALL.into_iter().find(|r| r.as_str() == s)
    }

    /// Lenient parse for operator input ("doctor", "ml-engineer", "ML_ENGINEER")
    pub fn parse(s: &str) -> Option<Role> {
        match s.to_uppercase().replace('-', "_").as_str() {
            "DOCTOR" => Some(Role::Doctor),
            "ML_ENGINEER" => Some(Role::MlEngineer),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The role a credential claims to hold
///
/// Tokens are issued by a separate service, so a claim can name a role this
/// gate does not know. Such a claim is still a role for permission checks; it
/// is just never a member of any allowed set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoleClaim {
    Known(Role),
    Unrecognized(String),
}

impl RoleClaim {
    pub fn from_wire(s: &str) -> Self {
        match Role::from_wire(s) {
            Some(role) => RoleClaim::Known(role),
            None => RoleClaim::Unrecognized(s.to_string()),
        }
    }

    pub fn role(&self) -> Option<Role> {
        match self {
            RoleClaim::Known(role) => Some(*role),
            RoleClaim::Unrecognized(_) => None,
        }
    }
}

impl From<Role> for RoleClaim {
    fn from(role: Role) -> Self {
        RoleClaim::Known(role)
    }
}

impl fmt::Display for RoleClaim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleClaim::Known(role) => write!(f, "{}", role),
            RoleClaim::Unrecognized(name) => write!(f, "{}", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_wire_names() {
        assert_eq!(Role::from_wire("DOCTOR"), Some(Role::Doctor));
        assert_eq!(Role::from_wire("ML_ENGINEER"), Some(Role::MlEngineer));
        assert_eq!(Role::from_wire("doctor"), None);
        assert_eq!(Role::MlEngineer.to_string(), "ML_ENGINEER");
    }

    #[test]
    fn test_role_parse_lenient() {
        assert_eq!(Role::parse("doctor"), Some(Role::Doctor));
        assert_eq!(Role::parse("ml-engineer"), Some(Role::MlEngineer));
        assert_eq!(Role::parse("ML_ENGINEER"), Some(Role::MlEngineer));
        assert_eq!(Role::parse("nurse"), None);
    }

    #[test]
    fn test_role_serde() {
        let json = serde_json::to_string(&vec![Role::Doctor, Role::MlEngineer]).unwrap();
        assert_eq!(json, r#"["DOCTOR","ML_ENGINEER"]"#);

        let parsed: Vec<Role> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, vec![Role::Doctor, Role::MlEngineer]);

        // Typos in configuration are rejected
        assert!(serde_json::from_str::<Role>(r#""DOCTR""#).is_err());
    }

    #[test]
    fn test_role_claim_from_wire() {
        assert_eq!(RoleClaim::from_wire("DOCTOR"), RoleClaim::Known(Role::Doctor));
        assert_eq!(
            RoleClaim::from_wire("PATIENT"),
            RoleClaim::Unrecognized("PATIENT".to_string())
        );
        assert_eq!(RoleClaim::from_wire("PATIENT").role(), None);
    }
}
