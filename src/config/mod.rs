//! Layered YAML configuration
//!
//! Two documents drive a run: the architecture document (stage directories,
//! the dataset URL, model paths) and the params document (hyperparameters).
//!
//! # Example
//!
//! ```yaml
//! # config/config.yaml
//! artifacts_root: artifacts
//!
//! data_ingestion:
//!   root_dir: artifacts/data_ingestion
//!   source_URL: https://drive.google.com/file/d/<id>/view?usp=sharing
//!   local_data_file: artifacts/data_ingestion/data.zip
//!   unzip_dir: artifacts/data_ingestion
//! ```
//!
//! ```yaml
//! # params.yaml
//! IMAGE_SIZE: [224, 224, 3]
//! BATCH_SIZE: 16
//! EPOCHS: 5
//! ```

mod cli;
mod dirs;
mod entity;
mod manager;
mod store;
mod validate;

#[cfg(test)]
mod tests;

#[cfg(test)]
mod property_tests;

use std::path::PathBuf;

pub use cli::{
    parse_args, Cli, Command, PredictArgs, RunArgs, ServeArgs, StageArgs, StageName, ValidateArgs,
};
pub use dirs::create_directories;
pub use entity::{
    DataIngestionConfig, EvaluationConfig, FreezePolicy, PrepareBaseModelConfig, TrainingConfig,
    WeightSource, DEFAULT_SEED, DEFAULT_VALIDATION_SPLIT, TRAINING_DATA_SUBDIR,
};
pub use manager::{ConfigurationManager, CONFIG_FILE_PATH, PARAMS_FILE_PATH};
pub use store::{ConfigNode, ConfigTree};
pub use validate::ValidationError;

/// Failure to obtain a usable configuration document
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file is empty: {}", path.display())]
    Empty { path: PathBuf },

    #[error("Cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },
}
