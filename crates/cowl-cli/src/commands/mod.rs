//! CLI command implementations.

pub mod guard;
pub mod label;
pub mod policy;

use anyhow::{Context, Result};
use cowl_core::label::Label;
use serde::Serialize;

/// Exit codes shared by all commands.
pub mod exit_codes {
    /// Success; the check passed.
    pub const SUCCESS: u8 = 0;
    /// The check was evaluated and failed: a flow was denied or a label does
    /// not subsume another.
    pub const DENIED: u8 = 2;
}

/// Parses a label expression given on the command line.
pub fn parse_label(expr: &str, what: &str) -> Result<Label> {
    expr.parse()
        .with_context(|| format!("invalid {what} label '{expr}'"))
}

/// Parses an optional label argument, defaulting to public.
pub fn parse_optional(expr: Option<&str>, what: &str) -> Result<Label> {
    expr.map_or_else(|| Ok(Label::public()), |e| parse_label(e, what))
}

/// Prints `value` as pretty JSON.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("failed to encode output")?;
    println!("{text}");
    Ok(())
}
