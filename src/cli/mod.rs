//! Command-line interface, parsed with clap.

use clap::{Parser, Subcommand};

use crate::domain::ServiceKind;

/// Keeps a local library in sync with Crunchyroll and HiDive through
/// multi-downloader-nx.
#[derive(Parser)]
#[command(name = "mdnx-autodl")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the download loop until stopped (default)
    #[command(alias = "-d", alias = "--daemon")]
    Daemon,

    /// Run a single iteration and exit
    #[command(alias = "-c", alias = "--check")]
    Check,

    /// Refresh the catalog and print what is queued
    #[command(alias = "q", alias = "ls")]
    Queue,

    /// Log in to a service with the configured credentials
    Auth {
        /// crunchyroll or hidive
        service: ServiceKind,
    },

    /// Create default config file
    #[command(alias = "--init")]
    Init,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        let cli = Cli::try_parse_from(["mdnx-autodl"]).unwrap();
        assert!(cli.command.is_none());

        let cli = Cli::try_parse_from(["mdnx-autodl", "auth", "hidive"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Auth {
                service: ServiceKind::Hidive
            })
        ));

        assert!(Cli::try_parse_from(["mdnx-autodl", "auth", "netflix"]).is_err());
    }
}
