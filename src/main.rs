//! dts-gate CLI entry point

mod cli;

use crate::cli::{Cli, Commands};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use clap::Parser;
use dts_gate::auth::{mint, Credential, Hs256Verifier, Role, StructuredToken};
use dts_gate::gate::{AccessDecision, GateRequest};
use dts_gate::{normalize_path, GateConfig};
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Logs go to stderr; stdout carries command output
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let load_config = || -> Result<GateConfig> {
        let mut config = GateConfig::load_or_default(cli.config.as_deref())
            .context("Failed to load gate configuration")?;
        config.override_secret(cli.secret.clone());
        Ok(config)
    };

    match cli.command {
        Commands::Check { ref path, ref token, local } => {
            let mut config = load_config()?;
            if local {
                config.use_local();
                config.override_secret(cli.secret.clone());
            }
            check(config, path, token.as_deref()).await
        }
        Commands::Inspect { ref token } => inspect(token),
        Commands::Mint { ref role, ttl, ref subject } => {
            mint_token(role, ttl, subject.as_deref(), cli.secret.as_deref())
        }
        Commands::Config => show_config(load_config()?),
    }
}

async fn check(config: GateConfig, path: &str, token: Option<&str>) -> Result<()> {
    let gate = config.build_gate().context("Invalid gate configuration")?;

    let authorization = token.map(|t| format!("Bearer {}", t));
    let request = GateRequest {
        path,
        cookies: None,
        authorization: authorization.as_deref(),
    };

    let decision = gate.decide_raw(&request).await;
    let normalized = normalize_path(path).ok();
    let governing = normalized
        .as_deref()
        .and_then(|p| gate.rules().permissions.governing(p))
        .map(|entry| entry.to_string());

    let output = match &decision {
        AccessDecision::Allow(admission) => json!({
            "path": path,
            "normalized": normalized,
            "decision": "allow",
            "admission": admission,
            "governed_by": governing,
        }),
        AccessDecision::Redirect(redirect) => json!({
            "path": path,
            "normalized": normalized,
            "decision": "redirect",
            "location": redirect.location,
            "reason": redirect.reason.code(),
            "detail": redirect.reason.to_string(),
            "clear_cookies": redirect.clear_cookies,
            "governed_by": governing,
        }),
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn inspect(token: &str) -> Result<()> {
    let credential = Credential::new(token).context("Token is empty")?;
    let decoded = StructuredToken::decode(credential.as_str()).context("Invalid token")?;
    let claims = decoded.claims();

    let output = json!({
        "claims": claims,
        "expires_at": claims.expires_at().map(|t| t.to_rfc3339()),
        "expired": claims.is_expired_at(Utc::now()),
        "signature_verified": false,
    });

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn mint_token(role: &str, ttl: i64, subject: Option<&str>, secret: Option<&str>) -> Result<()> {
    let role = Role::parse(role).with_context(|| format!("Invalid role: {}", role))?;
    let expires_at = expiry_after(Utc::now(), ttl)?;
    let signer = secret.map(|s| Hs256Verifier::new(s.as_bytes()));

    if signer.is_none() {
        eprintln!("warning: no secret set, token is unsigned");
    }

    println!("{}", mint(role, subject, expires_at, signer.as_ref()));
    Ok(())
}

fn expiry_after(now: DateTime<Utc>, ttl: i64) -> Result<DateTime<Utc>> {
    if ttl <= 0 {
        bail!("TTL must be positive, got {}", ttl);
    }
    Duration::try_seconds(ttl)
        .and_then(|ttl| now.checked_add_signed(ttl))
        .with_context(|| format!("TTL of {} seconds is out of range", ttl))
}

fn show_config(config: GateConfig) -> Result<()> {
    let rules = config.build_rules().context("Invalid gate configuration")?;
    config.build_resolver().context("Invalid resolver configuration")?;

    println!("Resolver: {}", serde_json::to_string(&redacted_resolver(&config))?);
    println!("Credential cookie: {}", rules.credential.cookie);
    println!("Unauthenticated -> {:?}", rules.redirects.unauthenticated);
    println!("Forbidden -> {}", rules.redirects.forbidden);
    println!("Clears cookies: {:?}", rules.clear_cookies);
    println!("Public routes:");
    for route in rules.public.iter() {
        println!("  {}", route);
    }
    println!("Static bypass prefixes: {:?}", rules.bypass.prefixes());
    println!("Permissions (first match wins):");
    if rules.permissions.is_empty() {
        println!("  (none)");
    } else {
        for entry in rules.permissions.entries() {
            println!("  {}", entry);
        }
    }

    Ok(())
}

fn redacted_resolver(config: &GateConfig) -> serde_json::Value {
    let mut value = serde_json::to_value(&config.resolver).unwrap_or_default();
    if let Some(secret) = value.get_mut("hs256_secret") {
        *secret = json!("[REDACTED]");
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_after() {
        let now = Utc::now();
        assert_eq!(expiry_after(now, 600).unwrap(), now + Duration::seconds(600));

        assert!(expiry_after(now, 0).is_err());
        assert!(expiry_after(now, -60).is_err());
        assert!(expiry_after(now, i64::MAX).is_err());
        assert!(expiry_after(now, i64::MAX / 1_000).is_err());
    }
}
