//! Central source of stage configuration records

use std::path::{Path, PathBuf};

use super::dirs::create_directories;
use super::entity::{
    DataIngestionConfig, EvaluationConfig, FreezePolicy, PrepareBaseModelConfig, TrainingConfig,
    WeightSource, DEFAULT_SEED, DEFAULT_VALIDATION_SPLIT, TRAINING_DATA_SUBDIR,
};
use super::store::{ConfigNode, ConfigTree};
use super::validate::{
    validate_evaluation, validate_ingestion, validate_prepare_base_model, validate_training,
    ValidationError,
};
use crate::error::Result;

/// Default architecture document
pub const CONFIG_FILE_PATH: &str = "config/config.yaml";

/// Default hyperparameter document
pub const PARAMS_FILE_PATH: &str = "params.yaml";

/// Reads the architecture and params documents and hands out one
/// [validated](super::validate) record per stage
///
/// Every accessor provisions the directory its stage writes into. Nothing is
/// cached: repeated calls re-read the loaded trees and return equal records.
#[derive(Debug, Clone)]
pub struct ConfigurationManager {
    config: ConfigTree,
    params: ConfigTree,
}

impl ConfigurationManager {
    /// Load both documents and provision `artifacts_root`
    pub fn new(config_path: impl AsRef<Path>, params_path: impl AsRef<Path>) -> Result<Self> {
        let config = ConfigTree::load(config_path)?;
        let params = ConfigTree::load(params_path)?;
        Self::from_trees(config, params)
    }

    /// Build from documents already parsed
    pub fn from_trees(config: ConfigTree, params: ConfigTree) -> Result<Self> {
        let artifacts_root = config.root().path("artifacts_root")?;
        create_directories(&[artifacts_root], true)?;
        Ok(Self { config, params })
    }

    /// Load the documents at [`CONFIG_FILE_PATH`] and [`PARAMS_FILE_PATH`]
    pub fn with_default_paths() -> Result<Self> {
        Self::new(CONFIG_FILE_PATH, PARAMS_FILE_PATH)
    }

    pub fn config_tree(&self) -> &ConfigTree {
        &self.config
    }

    pub fn params_tree(&self) -> &ConfigTree {
        &self.params
    }

    fn stage_section(&self, name: &str) -> Result<(ConfigNode<'_>, PathBuf)> {
        let section = self.config.section(name)?;
        let root_dir = section.path("root_dir")?;
        create_directories(&[&root_dir], true)?;
        Ok((section, root_dir))
    }

    fn training_data(&self) -> Result<PathBuf> {
        let unzip_dir = self.config.section("data_ingestion")?.path("unzip_dir")?;
        Ok(unzip_dir.join(TRAINING_DATA_SUBDIR))
    }

    fn validation_split(&self) -> Result<f64> {
        Ok(self
            .params
            .root()
            .optional_f64("VALIDATION_SPLIT")?
            .unwrap_or(DEFAULT_VALIDATION_SPLIT))
    }

    fn seed(&self) -> Result<u64> {
        Ok(self
            .params
            .root()
            .optional_usize("SEED")?
            .map_or(DEFAULT_SEED, |s| s as u64))
    }

    pub fn get_data_ingestion_config(&self) -> Result<DataIngestionConfig> {
        let (section, root_dir) = self.stage_section("data_ingestion")?;

        let config = DataIngestionConfig {
            root_dir,
            source_url: section.string("source_URL")?,
            local_data_file: section.path("local_data_file")?,
            unzip_dir: section.path("unzip_dir")?,
        };
        validate_ingestion(&config)?;
        Ok(config)
    }

    pub fn get_prepare_base_model_config(&self) -> Result<PrepareBaseModelConfig> {
        let (section, root_dir) = self.stage_section("prepare_base_model")?;
        let params = self.params.root();

        let freeze_all = params.optional_bool("FREEZE_ALL")?.unwrap_or(true);
        let freeze_till = params.optional_usize("FREEZE_TILL")?;
        // WEIGHTS must be present, but null is a meaningful value
        if !params.has_key("WEIGHTS") {
            return Err(ValidationError::MissingKey("WEIGHTS".to_string()).into());
        }

        let config = PrepareBaseModelConfig {
            root_dir,
            base_model_path: section.path("base_model_path")?,
            updated_base_model_path: section.path("updated_base_model_path")?,
            params_image_size: params.usize_list("IMAGE_SIZE")?,
            params_learning_rate: params.f64("LEARNING_RATE")?,
            params_include_top: params.bool("INCLUDE_TOP")?,
            params_weights: WeightSource::from_param(params.optional_string("WEIGHTS")?.as_deref()),
            params_classes: params.usize("CLASSES")?,
            freeze_policy: FreezePolicy::from_params(freeze_all, freeze_till),
            params_seed: self.seed()?,
        };
        validate_prepare_base_model(&config)?;
        Ok(config)
    }

    pub fn get_training_config(&self) -> Result<TrainingConfig> {
        let (section, root_dir) = self.stage_section("training")?;
        let prepare_base_model = self.config.section("prepare_base_model")?;
        let params = self.params.root();

        let config = TrainingConfig {
            root_dir,
            trained_model_path: section.path("trained_model_path")?,
            updated_base_model_path: prepare_base_model.path("updated_base_model_path")?,
            training_data: self.training_data()?,
            params_epochs: params.usize("EPOCHS")?,
            params_batch_size: params.usize("BATCH_SIZE")?,
            params_is_augmentation: params.bool("AUGMENTATION")?,
            params_image_size: params.usize_list("IMAGE_SIZE")?,
            params_validation_split: self.validation_split()?,
            params_seed: self.seed()?,
        };
        validate_training(&config)?;
        Ok(config)
    }

    pub fn get_evaluation_config(&self) -> Result<EvaluationConfig> {
        let (section, root_dir) = self.stage_section("evaluation")?;
        let training = self.config.section("training")?;
        let params = self.params.root();

        let config = EvaluationConfig {
            root_dir,
            path_of_model: training.path("trained_model_path")?,
            training_data: self.training_data()?,
            score_file: section.path("score_file")?,
            all_params: self.params.to_json()?,
            mlflow_uri: section.string("mlflow_uri")?,
            params_image_size: params.usize_list("IMAGE_SIZE")?,
            params_batch_size: params.usize("BATCH_SIZE")?,
            params_validation_split: self.validation_split()?,
        };
        validate_evaluation(&config)?;
        Ok(config)
    }
}
