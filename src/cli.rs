use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "atlas-reconcile")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Declarative reconciliation of MongoDB Atlas clusters and users", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Credentials file (defaults to credentials.toml in the config dir)
    #[arg(long, global = true, value_name = "FILE")]
    pub credentials: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Converge Atlas to the playbook
    Apply(ApplyArgs),

    /// Preview what apply would change
    Diff(PlanArgs),

    /// Show the current Atlas state of every declared resource
    Status(PlanArgs),

    /// Check a playbook without calling Atlas
    Validate {
        /// Playbook file (TOML)
        playbook: PathBuf,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Apply / Diff / Status
// ============================================================================

#[derive(Args)]
pub struct PlanArgs {
    /// Playbook file (TOML)
    pub playbook: PathBuf,

    /// Only consider matching resources (e.g., "cluster", "user.app_user")
    #[arg(short, long)]
    pub target: Option<String>,
}

#[derive(Args)]
pub struct ApplyArgs {
    /// Playbook file (TOML)
    pub playbook: PathBuf,

    /// Only apply matching resources (e.g., "cluster", "cluster.test-mongo")
    #[arg(short, long)]
    pub target: Option<String>,

    /// Dry run - show what would be done
    #[arg(short, long)]
    pub dry_run: bool,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Number of resources worked on in parallel
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Attempts per API call on transient errors
    #[arg(long)]
    pub retries: Option<u32>,

    /// Seconds between cluster status checks
    #[arg(long, value_name = "SECS")]
    pub poll_interval: Option<u64>,

    /// Seconds to wait for a cluster to settle
    #[arg(long, value_name = "SECS")]
    pub poll_timeout: Option<u64>,

    /// Write a JSON report of the run
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_apply() {
        let cli = Cli::try_parse_from([
            "atlas-reconcile",
            "-vv",
            "apply",
            "site.toml",
            "--dry-run",
            "--jobs",
            "8",
            "--poll-timeout",
            "600",
            "--target",
            "cluster",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Apply(args) => {
                assert_eq!(args.playbook, PathBuf::from("site.toml"));
                assert!(args.dry_run);
                assert!(!args.yes);
                assert_eq!(args.jobs, Some(8));
                assert_eq!(args.poll_timeout, Some(600));
                assert_eq!(args.poll_interval, None);
                assert_eq!(args.target.as_deref(), Some("cluster"));
            }
            _ => panic!("expected apply"),
        }
    }

    #[test]
    fn test_global_credentials_after_subcommand() {
        let cli = Cli::try_parse_from([
            "atlas-reconcile",
            "validate",
            "site.toml",
            "--credentials",
            "/tmp/creds.toml",
        ])
        .unwrap();
        assert_eq!(cli.credentials, Some(PathBuf::from("/tmp/creds.toml")));
    }
}
