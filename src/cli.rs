//! CLI command definitions using clap.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::types::HumanDuration;

/// notready - NodeClaim garbage collector
#[derive(Parser, Debug)]
#[command(name = "notready")]
#[command(version)]
#[command(about = "Deletes NodeClaims whose Node has been unreachable for too long")]
#[command(
    long_about = "notready watches NodeClaims and their Nodes. When a Node carries the node.kubernetes.io/unreachable taint for longer than the configured timeout, the NodeClaim that owns it is deleted so a replacement can be provisioned."
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Settings overrides accepted by every subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// How long a Node may stay unreachable before its NodeClaim is deleted
    #[arg(long, global = true, value_name = "DURATION")]
    pub unreachable_timeout: Option<HumanDuration>,

    /// Maximum reconciles running at once
    #[arg(long, global = true)]
    pub max_concurrent_reconciles: Option<usize>,

    /// Log filter directive (overridden by RUST_LOG)
    #[arg(long, global = true)]
    pub log_filter: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the controller against a cluster snapshot until interrupted
    Run {
        /// YAML or JSON file with nodeClaims and nodes
        #[arg(short, long)]
        snapshot: PathBuf,
    },

    /// Report what the controller would do for every NodeClaim, without deleting
    Check {
        /// YAML or JSON file with nodeClaims and nodes
        #[arg(short, long)]
        snapshot: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_run_with_overrides() {
        let cli = Cli::try_parse_from([
            "notready",
            "--unreachable-timeout",
            "15m",
            "--max-concurrent-reconciles",
            "10",
            "run",
            "--snapshot",
            "cluster.yaml",
        ]);
        assert!(cli.is_ok());
        let Ok(cli) = cli else { return };

        assert_eq!(cli.global.unreachable_timeout.map(|d| d.as_secs()), Some(900));
        assert_eq!(cli.global.max_concurrent_reconciles, Some(10));
        assert!(matches!(cli.command, Commands::Run { ref snapshot } if snapshot == &PathBuf::from("cluster.yaml")));
    }

    #[test]
    fn cli_accepts_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "notready",
            "check",
            "--snapshot",
            "cluster.json",
            "--log-filter",
            "debug",
        ]);
        assert!(cli.is_ok());
        let Ok(cli) = cli else { return };
        assert_eq!(cli.global.log_filter.as_deref(), Some("debug"));
        assert!(matches!(cli.command, Commands::Check { .. }));
    }

    #[test]
    fn cli_rejects_bad_duration() {
        let cli = Cli::try_parse_from([
            "notready",
            "--unreachable-timeout",
            "ten minutes",
            "run",
            "--snapshot",
            "cluster.yaml",
        ]);
        assert!(cli.is_err());
    }

    #[test]
    fn cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["notready"]).is_err());
    }
}
