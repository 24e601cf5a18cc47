//! kidney-classifier CLI
//!
//! # Usage
//!
//! ```bash
//! # Ingestion, base model preparation and training
//! kidney-classifier run
//!
//! # Same, followed by evaluation and tracking
//! kidney-classifier run --with-evaluation
//!
//! # One stage
//! kidney-classifier stage evaluation
//!
//! # Check both documents
//! kidney-classifier validate --detailed
//!
//! # Classify an image, or serve the upload page
//! kidney-classifier predict scan.jpg
//! kidney-classifier serve --addr 127.0.0.1:8080
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use kidney_classifier::config::{
    Cli, Command, ConfigurationManager, PredictArgs, RunArgs, ServeArgs, StageArgs, ValidateArgs,
};
use kidney_classifier::logging::{init_logging, LOG_DIR};
use kidney_classifier::predict::{server, PredictionPipeline};
use kidney_classifier::stages::{pipeline_for, run_stage, Pipeline};
use tracing::error;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let _guard = match init_logging(Path::new(LOG_DIR), cli.verbose, cli.quiet) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: could not initialise logging: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = match &cli.command {
        Command::Run(args) => run_pipeline(&cli, args),
        Command::Stage(args) => run_single_stage(&cli, args),
        Command::Validate(args) => run_validate(&cli, args),
        Command::Predict(args) => run_predict(&cli, args),
        Command::Serve(args) => run_serve(&cli, args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn load_manager(cli: &Cli) -> Result<ConfigurationManager, String> {
    ConfigurationManager::new(&cli.config, &cli.params).map_err(|e| format!("Config error: {e}"))
}

fn run_pipeline(cli: &Cli, args: &RunArgs) -> Result<(), String> {
    let manager = load_manager(cli)?;
    let mut pipeline = Pipeline::new(manager, args.with_evaluation);
    pipeline.run().map_err(|e| e.to_string())
}

fn run_single_stage(cli: &Cli, args: &StageArgs) -> Result<(), String> {
    let manager = load_manager(cli)?;
    let mut stage = pipeline_for(args.name);
    run_stage(stage.as_mut(), &manager).map_err(|e| e.to_string())
}

fn run_validate(cli: &Cli, args: &ValidateArgs) -> Result<(), String> {
    let manager = load_manager(cli)?;
    let ingestion = manager
        .get_data_ingestion_config()
        .map_err(|e| format!("data_ingestion: {e}"))?;
    let prepare = manager
        .get_prepare_base_model_config()
        .map_err(|e| format!("prepare_base_model: {e}"))?;
    let training = manager
        .get_training_config()
        .map_err(|e| format!("training: {e}"))?;
    let evaluation = manager
        .get_evaluation_config()
        .map_err(|e| format!("evaluation: {e}"))?;

    if !cli.quiet {
        println!(
            "Configuration is valid ({} + {})",
            cli.config.display(),
            cli.params.display()
        );
    }
    if args.detailed {
        println!();
        println!("{ingestion:#?}");
        println!("{prepare:#?}");
        println!("{training:#?}");
        println!("{evaluation:#?}");
    }
    Ok(())
}

/// `--model` when given, otherwise `training.trained_model_path`
fn model_path(cli: &Cli, explicit: Option<&PathBuf>) -> Result<PathBuf, String> {
    if let Some(path) = explicit {
        return Ok(path.clone());
    }
    let manager = load_manager(cli)?;
    manager
        .config_tree()
        .section("training")
        .and_then(|section| section.path("trained_model_path"))
        .map_err(|e| format!("Config error: {e}"))
}

fn run_predict(cli: &Cli, args: &PredictArgs) -> Result<(), String> {
    let model = model_path(cli, args.model.as_ref())?;
    let pipeline = PredictionPipeline::load(&model).map_err(|e| e.to_string())?;
    let records = pipeline.predict(&args.image).map_err(|e| e.to_string())?;
    let json = serde_json::to_string(&records).map_err(|e| e.to_string())?;
    println!("{json}");
    Ok(())
}

fn run_serve(cli: &Cli, args: &ServeArgs) -> Result<(), String> {
    let address: SocketAddr = args
        .addr
        .parse()
        .map_err(|e| format!("Invalid listen address '{}': {e}", args.addr))?;
    let model = model_path(cli, args.model.as_ref())?;
    let pipeline = PredictionPipeline::load(&model).map_err(|e| e.to_string())?;

    let runtime = tokio::runtime::Runtime::new().map_err(|e| e.to_string())?;
    runtime
        .block_on(server::serve(address, Arc::new(pipeline)))
        .map_err(|e| e.to_string())
}
