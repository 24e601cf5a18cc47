//! Per-stage configuration records
//!
//! Each record is copied out of the configuration documents by
//! [`ConfigurationManager`](super::ConfigurationManager) and is never mutated
//! afterwards. Stages communicate only through the paths carried here.

use serde::Serialize;
use std::path::PathBuf;

/// Default fraction of each class held out for validation
pub const DEFAULT_VALIDATION_SPLIT: f64 = 0.20;

/// Default seed for shuffling, augmentation and weight initialisation
pub const DEFAULT_SEED: u64 = 42;

/// Subfolder of the ingestion unzip directory holding the class folders
pub const TRAINING_DATA_SUBDIR: &str = "kidney-ct-scan-image";

/// Data ingestion stage configuration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataIngestionConfig {
    pub root_dir: PathBuf,

    /// Sharing-style URL of the zipped dataset
    pub source_url: String,

    /// Where the downloaded archive is written
    pub local_data_file: PathBuf,

    /// Directory the archive is extracted into
    pub unzip_dir: PathBuf,
}

/// Where backbone weights come from
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "path", rename_all = "snake_case")]
pub enum WeightSource {
    /// Bundled pretrained initialisation (`imagenet`)
    Bundled,
    /// Seeded random initialisation (`none` or null)
    Random,
    /// A previously saved backbone file
    File(PathBuf),
}

impl WeightSource {
    /// Interpret the `WEIGHTS` parameter
    pub fn from_param(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            None => WeightSource::Random,
            Some(v) if v.eq_ignore_ascii_case("none") || v.eq_ignore_ascii_case("null") => {
                WeightSource::Random
            }
            Some(v) if v.eq_ignore_ascii_case("imagenet") => WeightSource::Bundled,
            Some(v) => WeightSource::File(PathBuf::from(v)),
        }
    }
}

/// Which backbone layers are frozen before fine-tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FreezePolicy {
    /// Every backbone layer is non-trainable
    All,
    /// All but the last N backbone layers are non-trainable
    AllButLast(usize),
    /// Every layer stays trainable
    None,
}

impl FreezePolicy {
    /// `freeze_all` wins over `freeze_till`; neither, or a `freeze_till` of
    /// zero, means nothing is frozen
    pub fn from_params(freeze_all: bool, freeze_till: Option<usize>) -> Self {
        match (freeze_all, freeze_till) {
            (true, _) => FreezePolicy::All,
            (false, Some(n)) if n > 0 => FreezePolicy::AllButLast(n),
            (false, _) => FreezePolicy::None,
        }
    }

    /// Whether the layer at `index` out of `total` should be frozen
    pub fn freezes(&self, index: usize, total: usize) -> bool {
        match *self {
            FreezePolicy::All => true,
            FreezePolicy::AllButLast(n) => index < total.saturating_sub(n),
            FreezePolicy::None => false,
        }
    }
}

/// Base-model preparation stage configuration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrepareBaseModelConfig {
    pub root_dir: PathBuf,
    pub base_model_path: PathBuf,
    pub updated_base_model_path: PathBuf,
    pub params_image_size: Vec<usize>,
    pub params_learning_rate: f64,
    pub params_include_top: bool,
    pub params_weights: WeightSource,
    pub params_classes: usize,
    pub freeze_policy: FreezePolicy,
    pub params_seed: u64,
}

/// Training stage configuration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingConfig {
    pub root_dir: PathBuf,
    pub trained_model_path: PathBuf,
    pub updated_base_model_path: PathBuf,

    /// `data_ingestion.unzip_dir` joined with [`TRAINING_DATA_SUBDIR`]
    pub training_data: PathBuf,

    pub params_epochs: usize,
    pub params_batch_size: usize,
    pub params_is_augmentation: bool,
    pub params_image_size: Vec<usize>,
    pub params_validation_split: f64,
    pub params_seed: u64,
}

/// Evaluation stage configuration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationConfig {
    pub root_dir: PathBuf,
    pub path_of_model: PathBuf,
    pub training_data: PathBuf,
    pub score_file: PathBuf,

    /// The whole params document, logged to the tracker
    pub all_params: serde_json::Value,

    pub mlflow_uri: String,
    pub params_image_size: Vec<usize>,
    pub params_batch_size: usize,
    pub params_validation_split: f64,
}
