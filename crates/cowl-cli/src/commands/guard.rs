//! `cowl guard` subcommands.
//!
//! Evaluates a flow check for a context declared under `[contexts.<name>]` in
//! the configuration file.
//!
//! # Exit Codes
//!
//! - 0: the flow is allowed
//! - 1: error (unknown context, malformed label)
//! - 2: the flow is denied

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use cowl_core::config::CowlConfig;
use cowl_core::guard::{GuardDecision, guard_read, guard_write};
use cowl_core::sandbox::ContextPolicy;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{exit_codes, parse_optional, print_json};

/// Guard command group.
#[derive(Debug, Args)]
pub struct GuardCommand {
    #[command(subcommand)]
    pub subcommand: GuardSubcommand,
}

/// Guard subcommands.
#[derive(Debug, Subcommand)]
pub enum GuardSubcommand {
    /// May the context write data at the given label?
    Write(FlowArgs),

    /// May the context read data at the given label?
    Read(ReadArgs),
}

/// The context and data label of a flow.
#[derive(Debug, Args)]
pub struct FlowArgs {
    /// Name of a context from the configuration file.
    #[arg(long)]
    pub context: String,

    /// Privacy label of the data (default: public).
    #[arg(long)]
    pub privacy: Option<String>,

    /// Trust label of the data (default: public).
    #[arg(long)]
    pub trust: Option<String>,
}

/// Arguments for `cowl guard read`.
#[derive(Debug, Args)]
pub struct ReadArgs {
    #[command(flatten)]
    pub flow: FlowArgs,

    /// Allow raising the context's label to complete the read.
    #[arg(long)]
    pub taint: bool,
}

/// Result of a guard evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GuardResponse {
    /// `write` or `read`.
    pub operation: String,
    /// The configured context name.
    pub context: String,
    /// Whether the flow is allowed.
    pub allowed: bool,
    /// Human-readable decision.
    pub decision: String,
    /// Denial reason, if denied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// The context's privacy label after the check.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub privacy_after: Option<String>,
}

/// Runs a guard subcommand and returns the exit code.
pub fn run(cmd: &GuardCommand, config: &CowlConfig, json: bool) -> Result<u8> {
    let response = match &cmd.subcommand {
        GuardSubcommand::Write(args) => evaluate(config, args, None)?,
        GuardSubcommand::Read(args) => evaluate(config, &args.flow, Some(args.taint))?,
    };

    if json {
        print_json(&response)?;
    } else {
        println!(
            "{} as {}: {}",
            response.operation, response.context, response.decision
        );
    }

    Ok(if response.allowed {
        exit_codes::SUCCESS
    } else {
        exit_codes::DENIED
    })
}

/// Evaluates a write check, or a read check when `taint` is given.
fn evaluate(config: &CowlConfig, args: &FlowArgs, taint: Option<bool>) -> Result<GuardResponse> {
    let mut ctx = context_policy(config, &args.context)?;
    let privacy = parse_optional(args.privacy.as_deref(), "privacy")?;
    let trust = parse_optional(args.trust.as_deref(), "trust")?;
    let privs = ctx.privileges().clone();

    let (operation, decision) = match taint {
        None => ("write", guard_write(&ctx, &privacy, &trust, &privs)),
        Some(allow_taint) => (
            "read",
            guard_read(&mut ctx, &privacy, &trust, &privs, allow_taint),
        ),
    };

    if let Some(reason) = decision.deny_reason() {
        warn!(operation, context = %args.context, %reason, "flow denied");
    } else if decision == GuardDecision::AllowTainted {
        info!(context = %args.context, "read allowed by raising the context label");
    }

    Ok(GuardResponse {
        operation: operation.to_string(),
        context: args.context.clone(),
        allowed: decision.is_allowed(),
        decision: decision.to_string(),
        reason: decision.deny_reason().map(|r| r.as_str().to_string()),
        privacy_after: ctx.privacy().map(ToString::to_string),
    })
}

fn context_policy(config: &CowlConfig, name: &str) -> Result<ContextPolicy> {
    let entry = config
        .context(name)
        .with_context(|| format!("context '{name}' is not configured"))?;
    entry
        .to_policy()
        .with_context(|| format!("context '{name}' is invalid"))
}
