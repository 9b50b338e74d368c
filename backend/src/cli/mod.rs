//! Command-line interface for Volume Keeper.

pub mod runner;

use clap::{Parser, Subcommand, ValueEnum};
use uuid::Uuid;

use crate::models::backup::{StorageKind, ALL_VOLUMES};

pub use runner::run;

/// Volume backup orchestrator
#[derive(Parser, Debug)]
#[command(name = "volume-keeper")]
#[command(about = "Back up server volumes from remote nodes", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    pub format: OutputFormat,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the scheduler until interrupted
    Serve,

    /// Back up a node now and wait for the result
    Backup {
        /// Node name
        #[arg(short, long)]
        node: String,

        /// Volume name, or all-volumes
        #[arg(short, long, default_value = ALL_VOLUMES)]
        volume: String,

        /// Storage kind (local, s3, sftp)
        #[arg(short, long, default_value = "local", value_parser = parse_storage_kind)]
        storage: StorageKind,
    },

    /// List the volumes present on a node
    Volumes {
        /// Node name
        #[arg(short, long)]
        node: String,
    },

    /// Check that a node is reachable and record its status
    TestNode {
        /// Node name
        #[arg(short, long)]
        node: String,
    },

    /// Show run counters and total stored bytes
    Stats,

    /// Print the log trail of a run
    Logs {
        /// Backup run id
        #[arg(short, long)]
        backup: Uuid,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

fn parse_storage_kind(value: &str) -> std::result::Result<StorageKind, String> {
    value.parse::<StorageKind>().map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_defaults() {
        let cli = Cli::try_parse_from(["volume-keeper", "backup", "--node", "alpha"]).unwrap();
        match cli.command {
            Command::Backup {
                node,
                volume,
                storage,
            } => {
                assert_eq!(node, "alpha");
                assert_eq!(volume, ALL_VOLUMES);
                assert_eq!(storage, StorageKind::Local);
            }
            other => panic!("unexpected command: {:?}", other),
        }
        assert_eq!(cli.format, OutputFormat::Text);
    }

    #[test]
    fn test_backup_storage_parsed() {
        let cli = Cli::try_parse_from([
            "volume-keeper",
            "--format",
            "json",
            "backup",
            "-n",
            "alpha",
            "-s",
            "sftp",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Command::Backup {
                storage: StorageKind::Sftp,
                ..
            }
        ));
        assert_eq!(cli.format, OutputFormat::Json);
    }

    #[test]
    fn test_unknown_storage_rejected() {
        assert!(Cli::try_parse_from(["volume-keeper", "backup", "-n", "a", "-s", "ftp"]).is_err());
    }
}
