//! CLI argument parsing
//!
//! # Usage
//!
//! ```bash
//! kidney-classifier run
//! kidney-classifier run --with-evaluation
//! kidney-classifier stage training
//! kidney-classifier validate --detailed
//! kidney-classifier predict scan.jpg
//! kidney-classifier serve --addr 0.0.0.0:8080
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use super::manager::{CONFIG_FILE_PATH, PARAMS_FILE_PATH};

/// Kidney CT scan classification pipeline
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "kidney-classifier")]
#[command(version)]
#[command(about = "Stage-based transfer-learning pipeline for kidney CT scan classification")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,

    /// Architecture document (stage directories, source URL, model paths)
    #[arg(long, global = true, default_value = CONFIG_FILE_PATH)]
    pub config: PathBuf,

    /// Hyperparameter document
    #[arg(long, global = true, default_value = PARAMS_FILE_PATH)]
    pub params: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run every stage in order
    Run(RunArgs),

    /// Run a single stage
    Stage(StageArgs),

    /// Validate both configuration documents without running anything
    Validate(ValidateArgs),

    /// Classify one image
    Predict(PredictArgs),

    /// Serve the upload page and prediction endpoint
    Serve(ServeArgs),
}

/// Arguments for the run command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct RunArgs {
    /// Also run the evaluation stage after training
    #[arg(long)]
    pub with_evaluation: bool,
}

/// Arguments for the stage command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct StageArgs {
    /// Stage to run: data_ingestion, prepare_base_model, training, evaluation
    #[arg(value_name = "NAME")]
    pub name: StageName,
}

/// Arguments for the validate command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct ValidateArgs {
    /// Print every stage record
    #[arg(short, long)]
    pub detailed: bool,
}

/// Arguments for the predict command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct PredictArgs {
    /// Image file to classify
    #[arg(value_name = "IMAGE")]
    pub image: PathBuf,

    /// Model file (defaults to training.trained_model_path)
    #[arg(short, long)]
    pub model: Option<PathBuf>,
}

/// Arguments for the serve command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct ServeArgs {
    /// Listen address
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub addr: String,

    /// Model file (defaults to training.trained_model_path)
    #[arg(short, long)]
    pub model: Option<PathBuf>,
}

/// Pipeline stage selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageName {
    DataIngestion,
    PrepareBaseModel,
    Training,
    Evaluation,
}

impl std::str::FromStr for StageName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "data_ingestion" | "ingestion" => Ok(StageName::DataIngestion),
            "prepare_base_model" | "base_model" => Ok(StageName::PrepareBaseModel),
            "training" | "train" => Ok(StageName::Training),
            "evaluation" | "eval" => Ok(StageName::Evaluation),
            _ => Err(format!(
                "Unknown stage: {}. Valid stages: data_ingestion, prepare_base_model, training, evaluation",
                s
            )),
        }
    }
}

/// Parse CLI arguments from a string slice (for testing)
pub fn parse_args<I, T>(args: I) -> Result<Cli, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    Cli::try_parse_from(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_defaults() {
        let cli = parse_args(["kidney-classifier", "run"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("config/config.yaml"));
        assert_eq!(cli.params, PathBuf::from("params.yaml"));
        match cli.command {
            Command::Run(args) => assert!(!args.with_evaluation),
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_parse_run_with_evaluation_and_paths() {
        let cli = parse_args([
            "kidney-classifier",
            "--config",
            "cfg.yaml",
            "run",
            "--with-evaluation",
            "--params",
            "p.yaml",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("cfg.yaml"));
        assert_eq!(cli.params, PathBuf::from("p.yaml"));
        assert_eq!(
            cli.command,
            Command::Run(RunArgs {
                with_evaluation: true
            })
        );
    }

    #[test]
    fn test_parse_stage_names() {
        for (arg, expected) in [
            ("data_ingestion", StageName::DataIngestion),
            ("prepare-base-model", StageName::PrepareBaseModel),
            ("train", StageName::Training),
            ("Evaluation", StageName::Evaluation),
        ] {
            let cli = parse_args(["kidney-classifier", "stage", arg]).unwrap();
            assert_eq!(cli.command, Command::Stage(StageArgs { name: expected }));
        }
    }

    #[test]
    fn test_parse_unknown_stage_fails() {
        assert!(parse_args(["kidney-classifier", "stage", "deploy"]).is_err());
    }

    #[test]
    fn test_parse_predict() {
        let cli = parse_args(["kidney-classifier", "predict", "scan.png", "--model", "m.json"])
            .unwrap();
        match cli.command {
            Command::Predict(args) => {
                assert_eq!(args.image, PathBuf::from("scan.png"));
                assert_eq!(args.model, Some(PathBuf::from("m.json")));
            }
            _ => panic!("Expected Predict command"),
        }
    }

    #[test]
    fn test_parse_serve_default_addr() {
        let cli = parse_args(["kidney-classifier", "-q", "serve"]).unwrap();
        assert!(cli.quiet);
        match cli.command {
            Command::Serve(args) => {
                assert_eq!(args.addr, "0.0.0.0:8080");
                assert!(args.model.is_none());
            }
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_missing_subcommand_fails() {
        assert!(parse_args(["kidney-classifier"]).is_err());
    }
}
