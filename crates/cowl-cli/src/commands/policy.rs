//! `cowl policy <privacy> [--privs <p>]` - derived network policy.

use anyhow::Result;
use clap::Args;
use cowl_core::policy::{NetworkPolicy, derive_policy};
use serde::{Deserialize, Serialize};

use super::{exit_codes, parse_label, parse_optional, print_json};

/// Arguments for `cowl policy`.
#[derive(Debug, Args)]
pub struct PolicyArgs {
    /// Privacy label of the context.
    pub privacy: String,

    /// Privileges the context owns.
    #[arg(long)]
    pub privs: Option<String>,
}

/// Result of `cowl policy`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyResponse {
    /// The privacy label with privileged clauses removed.
    pub effective: String,
    /// The derived policy.
    pub policy: NetworkPolicy,
    /// The content security policy to impose, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub csp: Option<String>,
}

/// Runs `cowl policy` and returns the exit code.
pub fn run(args: &PolicyArgs, json: bool) -> Result<u8> {
    let response = evaluate(args)?;
    if json {
        print_json(&response)?;
    } else {
        match &response.csp {
            Some(csp) => println!("{csp}"),
            None => println!("unrestricted (effective label {})", response.effective),
        }
    }
    Ok(exit_codes::SUCCESS)
}

fn evaluate(args: &PolicyArgs) -> Result<PolicyResponse> {
    let privacy = parse_label(&args.privacy, "privacy")?;
    let privs = parse_optional(args.privs.as_deref(), "privilege")?;
    let policy = derive_policy(&privacy, &privs);
    Ok(PolicyResponse {
        effective: privacy.reduce(&privs).to_string(),
        csp: policy
            .content_security_policy()
            .map(|csp| csp.render()),
        policy,
    })
}
