//! CLI argument parsing for the dispatch-planner binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "dispatch-planner", about = "Route planning engine for last-mile delivery fleets")]
pub struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, default_value = "config.json")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Plan routes for a customer CSV file
    Plan {
        /// Customer file: id,name,coordinates,volume
        #[arg(long)]
        customers: PathBuf,
        /// Where to write the solution JSON; stdout when omitted
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Remove expired matrix cache entries
    SweepCache,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_command_parses() {
        let cli = Cli::try_parse_from([
            "dispatch-planner",
            "--config",
            "fleet.json",
            "plan",
            "--customers",
            "today.csv",
        ])
        .unwrap();

        assert_eq!(cli.config, PathBuf::from("fleet.json"));
        match cli.command {
            Command::Plan { customers, output } => {
                assert_eq!(customers, PathBuf::from("today.csv"));
                assert!(output.is_none());
            }
            _ => panic!("expected plan command"),
        }
    }

    #[test]
    fn test_sweep_cache_parses() {
        let cli = Cli::try_parse_from(["dispatch-planner", "sweep-cache"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("config.json"));
        assert!(matches!(cli.command, Command::SweepCache));
    }

    #[test]
    fn test_missing_subcommand_is_an_error() {
        assert!(Cli::try_parse_from(["dispatch-planner"]).is_err());
    }
}
