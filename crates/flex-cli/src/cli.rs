use clap::{Args, Parser, Subcommand, ValueHint};
use std::path::PathBuf;

use crate::common::OutputFormat;

#[derive(Parser, Debug)]
#[command(author, version, about = "PCC flexibility area estimation", long_about = None)]
pub struct Cli {
    /// Set the logging level
    #[arg(long, default_value = "info")]
    pub log_level: tracing::Level,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Estimate the flexibility area of a scenario
    Run {
        /// Scenario file (JSON or YAML)
        #[arg(value_hint = ValueHint::FilePath)]
        scenario: PathBuf,
        #[command(flatten)]
        overrides: RunOverrides,
        /// Output format for the report
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
    /// Compare the network state before and after a scenario shift
    Compare {
        /// Scenario file (JSON or YAML)
        #[arg(value_hint = ValueHint::FilePath)]
        scenario: PathBuf,
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
    /// Summarize and compare the hulls of persisted point sets
    Hull {
        /// Labeled point set as LABEL=PATH (repeatable)
        #[arg(long = "set", value_parser = parse_labeled_path)]
        sets: Vec<(String, PathBuf)>,
        /// Scenario file whose `comparison` entries are added to the sets
        #[arg(long, value_hint = ValueHint::FilePath)]
        scenario: Option<PathBuf>,
        /// Write hull vertices and multiplicity grids of every set here
        #[arg(long, value_hint = ValueHint::DirPath)]
        export_dir: Option<PathBuf>,
        /// Rounding of the multiplicity grid cells
        #[arg(long, default_value_t = 1)]
        decimals: u32,
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
    /// Check a scenario file against the network it names
    Validate {
        /// Scenario file (JSON or YAML)
        #[arg(value_hint = ValueHint::FilePath)]
        scenario: PathBuf,
    },
}

/// Command-line values that take precedence over the scenario file.
#[derive(Args, Debug, Clone, Default)]
pub struct RunOverrides {
    /// Number of Monte Carlo samples
    #[arg(long)]
    pub samples: Option<usize>,
    /// Worker threads (0 = one per CPU)
    #[arg(long)]
    pub workers: Option<usize>,
    /// Sampler seed
    #[arg(long)]
    pub seed: Option<u64>,
    /// Directory of persisted point sets and exports
    #[arg(long, value_hint = ValueHint::DirPath)]
    pub results_dir: Option<PathBuf>,
}

fn parse_labeled_path(raw: &str) -> Result<(String, PathBuf), String> {
    match raw.split_once('=') {
        Some((label, path)) if !label.trim().is_empty() && !path.trim().is_empty() => {
            Ok((label.trim().to_string(), PathBuf::from(path.trim())))
        }
        _ => Err(format!("expected LABEL=PATH, got '{raw}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_labeled_path() {
        assert_eq!(
            parse_labeled_path("Normal Model=results/a.csv").unwrap(),
            ("Normal Model".to_string(), PathBuf::from("results/a.csv"))
        );
        assert!(parse_labeled_path("no-separator").is_err());
        assert!(parse_labeled_path("=x.csv").is_err());
    }

    #[test]
    fn test_run_overrides_parse() {
        let cli = Cli::parse_from([
            "flex-cli",
            "run",
            "scenario.json",
            "--samples",
            "50",
            "--seed",
            "7",
            "--format",
            "json",
        ]);
        match cli.command {
            Some(Commands::Run {
                overrides, format, ..
            }) => {
                assert_eq!(overrides.samples, Some(50));
                assert_eq!(overrides.seed, Some(7));
                assert_eq!(overrides.workers, None);
                assert_eq!(format, OutputFormat::Json);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
