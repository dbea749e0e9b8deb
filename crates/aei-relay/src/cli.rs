//! Command-line interface

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "aei-relay", version, about = "Relay AEI train files from reader FTP uploads to an HTTP API")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Log at debug level regardless of LOG_LEVEL
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the scheduler, the delivery worker pool and the read API
    Run {
        /// Do not start the read API
        #[arg(long)]
        no_api: bool,
    },

    /// Run the ingestion coordinator once and print its summary
    IngestOnce,

    /// Apply database migrations and exit
    Migrate,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_subcommands() {
        let cli = Cli::parse_from(["aei-relay", "run", "--no-api"]);
        assert!(matches!(cli.command, Commands::Run { no_api: true }));

        let cli = Cli::parse_from(["aei-relay", "-v", "ingest-once"]);
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::IngestOnce));

        assert!(Cli::try_parse_from(["aei-relay"]).is_err());
    }
}
