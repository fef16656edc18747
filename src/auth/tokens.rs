//! Bearer credentials and structured token decoding
//!
//! Structured tokens have three dot-separated base64url segments:
//! `header.payload.signature`. Only the payload carries claims the gate uses
//! (`role`, `exp`). Whether the signature is checked is decided by the
//! [`TokenVerifier`] the caller picks; [`Unverified`] skips it entirely.

use crate::auth::roles::Role;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("invalid token format: expected 3 segments, got {0}")]
    InvalidFormat(usize),

    #[error("empty token segment")]
    EmptySegment,

    #[error("token decode error: {0}")]
    DecodeError(String),

    #[error("invalid token signature")]
    InvalidSignature,
}

/// An opaque bearer credential presented by a client
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wrap a raw bearer string; blank input is treated as absent
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else if trimmed.len() == raw.len() {
            Some(Self(raw))
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential([REDACTED])")
    }
}

/// Claims read from a token payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Expiry in epoch seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
}

impl TokenClaims {
    /// A token without `exp` never counts as live
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.exp {
            None => true,
            Some(exp) => now.timestamp_millis() as f64 >= exp * 1000.0,
        }
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp
            .and_then(|exp| DateTime::from_timestamp_millis((exp * 1000.0) as i64))
    }
}

/// A structured token split into its segments, payload decoded
#[derive(Debug, Clone)]
pub struct StructuredToken<'a> {
    signing_input: &'a str,
    signature: &'a str,
    claims: TokenClaims,
}

impl<'a> StructuredToken<'a> {
    /// Split and decode without checking the signature
    pub fn decode(token: &'a str) -> Result<Self, TokenError> {
        let parts: Vec<&str> = token.split('.').collect();
        if parts.len() != 3 {
            return Err(TokenError::InvalidFormat(parts.len()));
        }
        if parts.iter().any(|p| p.is_empty()) {
            return Err(TokenError::EmptySegment);
        }

        let payload_json = decode_segment(parts[1])?;
        let claims: TokenClaims = serde_json::from_slice(&payload_json)
            .map_err(|e| TokenError::DecodeError(e.to_string()))?;

        // header.payload, without the trailing '.signature'
        let signing_input = &token[..parts[0].len() + 1 + parts[1].len()];

        Ok(Self {
            signing_input,
            signature: parts[2],
            claims,
        })
    }

    pub fn signing_input(&self) -> &str {
        self.signing_input
    }

    pub fn signature(&self) -> &str {
        self.signature
    }

    pub fn claims(&self) -> &TokenClaims {
        &self.claims
    }

    pub fn into_claims(self) -> TokenClaims {
        self.claims
    }
}

/// Decode one base64url segment, tolerating padding and the standard alphabet
fn decode_segment(segment: &str) -> Result<Vec<u8>, TokenError> {
    let normalized: String = segment
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            other => other,
        })
        .collect();

    URL_SAFE_NO_PAD
        .decode(normalized)
        .map_err(|e| TokenError::DecodeError(e.to_string()))
}

/// Checks the signature of a structured token
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &StructuredToken<'_>) -> Result<(), TokenError>;

    /// Whether this verifier actually checks anything
    fn is_verifying(&self) -> bool {
        true
    }
}

/// Accepts every signature: the payload is trusted as-is
///
/// Anyone able to craft a base64 string can claim any role. Use only where
/// the token has already been verified upstream.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unverified;

impl TokenVerifier for Unverified {
    fn verify(&self, _token: &StructuredToken<'_>) -> Result<(), TokenError> {
        Ok(())
    }

    fn is_verifying(&self) -> bool {
        false
    }
}

/// HMAC-SHA256 (`HS256`) signature check with a shared secret
#[derive(Clone)]
pub struct Hs256Verifier {
    secret: Vec<u8>,
}

impl Hs256Verifier {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.secret).expect("HMAC can take key of any size")
    }

    fn sign(&self, signing_input: &str) -> String {
        let mut mac = self.mac();
        mac.update(signing_input.as_bytes());
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }
}

impl TokenVerifier for Hs256Verifier {
    fn verify(&self, token: &StructuredToken<'_>) -> Result<(), TokenError> {
        let signature =
            decode_segment(token.signature()).map_err(|_| TokenError::InvalidSignature)?;

        let mut mac = self.mac();
        mac.update(token.signing_input().as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::InvalidSignature)
    }
}

impl fmt::Debug for Hs256Verifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hs256Verifier([REDACTED])")
    }
}

/// Build a structured token for `role` expiring at `expires_at`
///
/// With a verifier the token is HS256-signed; without one it carries
/// `alg: none` and a placeholder signature segment.
pub fn mint(
    role: Role,
    subject: Option<&str>,
    expires_at: DateTime<Utc>,
    signer: Option<&Hs256Verifier>,
) -> String {
    let alg = if signer.is_some() { "HS256" } else { "none" };
    let header = serde_json::json!({ "alg": alg, "typ": "JWT" });
    let claims = TokenClaims {
        role: Some(role.as_str().to_string()),
        exp: Some(expires_at.timestamp() as f64),
        sub: subject.map(str::to_string),
    };

    let header_b64 = URL_SAFE_NO_PAD.encode(header.to_string());
    let payload_b64 = URL_SAFE_NO_PAD.encode(
        serde_json::to_vec(&claims).expect("claims serialize to JSON"),
    );
    let signing_input = format!("{}.{}", header_b64, payload_b64);

    let signature = match signer {
        Some(signer) => signer.sign(&signing_input),
        None => "unsigned".to_string(),
    };

    format!("{}.{}", signing_input, signature)
}
