//! `cowl label` subcommands.
//!
//! - `cowl label normalize <expr>` - print the canonical form
//! - `cowl label combine <a> <b> --op and|or` - conjunction or disjunction
//! - `cowl label subsumes <a> <b> [--privs <p>]` - exit 0 if `a` subsumes `b`
//!   given the privileges, 2 otherwise

use anyhow::Result;
use clap::{Args, Subcommand, ValueEnum};
use cowl_core::label::Label;
use serde::{Deserialize, Serialize};

use super::{exit_codes, parse_label, parse_optional, print_json};

/// Label command group.
#[derive(Debug, Args)]
pub struct LabelCommand {
    #[command(subcommand)]
    pub subcommand: LabelSubcommand,
}

/// Label subcommands.
#[derive(Debug, Subcommand)]
pub enum LabelSubcommand {
    /// Print the canonical form of a label expression.
    Normalize(NormalizeArgs),

    /// Combine two labels.
    Combine(CombineArgs),

    /// Check whether one label subsumes another.
    Subsumes(SubsumesArgs),
}

/// Arguments for `cowl label normalize`.
#[derive(Debug, Args)]
pub struct NormalizeArgs {
    /// Label expression, e.g. `(a | b) & (c)`.
    pub expr: String,
}

/// How `cowl label combine` joins its operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CombineOp {
    /// Conjunction; at least as restrictive as both.
    And,
    /// Disjunction; at most as restrictive as either.
    Or,
}

/// Arguments for `cowl label combine`.
#[derive(Debug, Args)]
pub struct CombineArgs {
    /// Left operand.
    pub a: String,

    /// Right operand.
    pub b: String,

    /// Operator.
    #[arg(long, value_enum, default_value_t = CombineOp::And)]
    pub op: CombineOp,
}

/// Arguments for `cowl label subsumes`.
#[derive(Debug, Args)]
pub struct SubsumesArgs {
    /// The label expected to be at least as restrictive.
    pub a: String,

    /// The label expected to be at most as restrictive.
    pub b: String,

    /// Privileges available for discharging clauses.
    #[arg(long)]
    pub privs: Option<String>,
}

/// A label in canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LabelResponse {
    /// Canonical text.
    pub label: String,
    /// Number of clauses; zero for public.
    pub clauses: usize,
    /// Whether the label is `top`.
    pub top: bool,
    /// Every principal mentioned, sorted.
    pub principals: Vec<String>,
}

impl From<&Label> for LabelResponse {
    fn from(label: &Label) -> Self {
        Self {
            label: label.to_string(),
            clauses: label.clause_count(),
            top: label.is_top(),
            principals: label
                .principals()
                .into_iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

/// Result of `cowl label subsumes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubsumesResponse {
    /// Canonical left operand.
    pub a: String,
    /// Canonical right operand.
    pub b: String,
    /// Canonical privileges.
    pub privileges: String,
    /// Whether `a` subsumes `b` given the privileges.
    pub subsumes: bool,
}

/// Runs a label subcommand and returns the exit code.
pub fn run(cmd: &LabelCommand, json: bool) -> Result<u8> {
    match &cmd.subcommand {
        LabelSubcommand::Normalize(args) => {
            let label = parse_label(&args.expr, "input")?;
            print_label(&label, json)?;
            Ok(exit_codes::SUCCESS)
        },
        LabelSubcommand::Combine(args) => {
            let combined = combine(args)?;
            print_label(&combined, json)?;
            Ok(exit_codes::SUCCESS)
        },
        LabelSubcommand::Subsumes(args) => {
            let response = subsumes(args)?;
            if json {
                print_json(&response)?;
            } else if response.subsumes {
                println!("{} subsumes {}", response.a, response.b);
            } else {
                println!("{} does not subsume {}", response.a, response.b);
            }
            Ok(if response.subsumes {
                exit_codes::SUCCESS
            } else {
                exit_codes::DENIED
            })
        },
    }
}

fn combine(args: &CombineArgs) -> Result<Label> {
    let a = parse_label(&args.a, "left")?;
    let b = parse_label(&args.b, "right")?;
    Ok(match args.op {
        CombineOp::And => a.and(&b),
        CombineOp::Or => a.or(&b),
    })
}

fn subsumes(args: &SubsumesArgs) -> Result<SubsumesResponse> {
    let a = parse_label(&args.a, "left")?;
    let b = parse_label(&args.b, "right")?;
    let privs = parse_optional(args.privs.as_deref(), "privilege")?;
    Ok(SubsumesResponse {
        subsumes: a.subsumes(&privs, &b),
        a: a.to_string(),
        b: b.to_string(),
        privileges: privs.to_string(),
    })
}

fn print_label(label: &Label, json: bool) -> Result<()> {
    if json {
        print_json(&LabelResponse::from(label))
    } else {
        println!("{label}");
        Ok(())
    }
}
