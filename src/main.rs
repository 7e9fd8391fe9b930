//! Decoy CLI - inspect and query interception policy
//!
//! Commands:
//!   decoy policy show [--file F] [--json]       - Print the effective deny-list
//!   decoy policy check <TYPE> <MEMBER> [--file F] - Exit 1 if the target is restricted

use clap::{Parser, Subcommand};
use decoy::Policy;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "decoy")]
#[command(about = "Tools for working with Decoy interception policy", long_about = None)]
struct Cli {
    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect the target policy
    Policy {
        #[command(subcommand)]
        command: PolicyCommand,
    },
}

#[derive(Subcommand)]
enum PolicyCommand {
    /// Print the effective deny-list
    Show {
        /// Extra policy file merged over the builtin and $DECOY_POLICY rules
        #[arg(long, short = 'f')]
        file: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Report whether a member may be intercepted
    Check {
        /// Type name, e.g. `Billing::Gateway`
        type_name: String,

        /// Member name
        member: String,

        /// Extra policy file merged over the builtin and $DECOY_POLICY rules
        #[arg(long, short = 'f')]
        file: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::WARN
        })
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Policy { command } => match command {
            PolicyCommand::Show { file, json } => show_command(file.as_deref(), json),
            PolicyCommand::Check {
                type_name,
                member,
                file,
            } => check_command(&type_name, &member, file.as_deref()),
        },
    }
}

/// Builtin rules, then `$DECOY_POLICY`, then `--file`.
fn effective_policy(file: Option<&Path>) -> anyhow::Result<Policy> {
    let mut policy = Policy::from_env()?;
    if let Some(path) = file {
        tracing::debug!(path = %path.display(), "merging policy file");
        policy.merge(Policy::from_path(path)?);
    }
    Ok(policy)
}

fn show_command(file: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let policy = effective_policy(file)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&policy)?);
        return Ok(());
    }

    if policy.is_empty() {
        println!("(no restrictions)");
    }
    for (type_name, rules) in policy.entries() {
        println!("{type_name}: {}", rules.join(", "));
    }
    Ok(())
}

fn check_command(type_name: &str, member: &str, file: Option<&Path>) -> anyhow::Result<()> {
    let policy = effective_policy(file)?;

    if policy.is_restricted(type_name, member) {
        println!("{type_name}#{member}: restricted");
        std::process::exit(1);
    }
    println!("{type_name}#{member}: allowed");
    Ok(())
}
