//! CLI command definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "dts-gate")]
#[command(about = "Route access-control gate for the Diabetes Treatment System", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Gate configuration file (JSON); built-in defaults when omitted
    #[arg(long, env = "DTS_GATE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// HS256 secret for signing and verifying local tokens
    #[arg(long, env = "DTS_GATE_SECRET", global = true, hide_env_values = true)]
    pub secret: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Evaluate the gate for one request and print the decision as JSON
    ///
    /// Examples:
    ///   dts-gate check /dashboard/doctor --token "$TOKEN"
    ///   dts-gate check /models --local --token "$TOKEN"
    Check {
        /// Request path
        path: String,

        /// Bearer credential (omit to test the unauthenticated case)
        #[arg(long)]
        token: Option<String>,

        /// Decode tokens locally instead of using the configured resolver
        #[arg(long)]
        local: bool,
    },

    /// Decode a token's claims without verifying it
    Inspect {
        /// Structured token
        token: String,
    },

    /// Create a development token
    ///
    /// Signed with HS256 when --secret / DTS_GATE_SECRET is set, unsigned otherwise.
    ///
    /// Examples:
    ///   dts-gate mint --role doctor
    ///   dts-gate mint --role ml-engineer --ttl 600 --subject eng-7
    Mint {
        /// Role: doctor or ml-engineer
        #[arg(short, long, value_parser = parse_role)]
        role: String,

        /// Lifetime in seconds
        #[arg(long, default_value_t = 3600, value_parser = clap::value_parser!(i64).range(1..))]
        ttl: i64,

        /// Subject claim
        #[arg(long)]
        subject: Option<String>,
    },

    /// Validate the configuration and print the effective rules
    Config,
}

fn parse_role(s: &str) -> Result<String, String> {
    match dts_gate::Role::parse(s) {
        Some(role) => Ok(role.as_str().to_string()),
        None => Err(format!("Invalid role: {}. Must be doctor or ml-engineer", s)),
    }
}
