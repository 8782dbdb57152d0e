//! CLI interface for lob-pipeline
//!
//! Provides subcommands for:
//! - `process`: Replay JSONL captures into partitioned feature files
//! - `config`: Show the effective configuration

mod process;

pub use process::ProcessArgs;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "lob-pipeline")]
#[command(about = "Order book sampling and microstructure feature pipeline")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Replay feed captures through the pipeline
    Process(ProcessArgs),
    /// Show the effective configuration
    Config,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_parse_process_command() {
        let cli = Cli::parse_from([
            "lob-pipeline",
            "-c",
            "custom.toml",
            "process",
            "--input",
            "a.jsonl",
            "b.jsonl",
            "--output",
            "out",
        ]);

        assert_eq!(cli.config, "custom.toml");
        let Commands::Process(args) = cli.command else {
            panic!("expected process command");
        };
        assert_eq!(
            args.input,
            vec![PathBuf::from("a.jsonl"), PathBuf::from("b.jsonl")]
        );
        assert_eq!(args.output, Some(PathBuf::from("out")));
    }

    #[test]
    fn test_process_requires_input() {
        assert!(Cli::try_parse_from(["lob-pipeline", "process"]).is_err());
    }

    #[test]
    fn test_default_config_path() {
        let cli = Cli::parse_from(["lob-pipeline", "config"]);
        assert_eq!(cli.config, "config.toml");
        assert!(matches!(cli.command, Commands::Config));
    }
}
