//! Configuration validation

use super::entity::{
    DataIngestionConfig, EvaluationConfig, PrepareBaseModelConfig, TrainingConfig,
};

/// Validation error type
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Missing configuration key: {0}")]
    MissingKey(String),

    #[error("Configuration key '{key}' has the wrong type (expected {expected})")]
    WrongType { key: String, expected: &'static str },

    #[error("Invalid source URL: '{0}' (must be an http(s) URL)")]
    InvalidSourceUrl(String),

    #[error("Invalid learning rate: {0} (must be > 0.0)")]
    InvalidLearningRate(f64),

    #[error("Invalid batch size: {0} (must be > 0)")]
    InvalidBatchSize(usize),

    #[error("Invalid epochs: {0} (must be > 0)")]
    InvalidEpochs(usize),

    #[error("Invalid class count: {0} (must be >= 2)")]
    InvalidClassCount(usize),

    #[error("Invalid image size: {0:?} (must be [height, width, channels], all > 0)")]
    InvalidImageSize(Vec<usize>),

    #[error("Invalid validation split: {0} (must be in [0.0, 1.0))")]
    InvalidValidationSplit(f64),

    #[error("Invalid freeze_till: {requested} (model has {available} layers)")]
    InvalidFreezeTill { requested: usize, available: usize },

    #[error("No images found under {0}")]
    EmptyDataset(String),

    #[error("{subset} split has {samples} samples, fewer than one batch of {batch_size}")]
    InsufficientSamples {
        subset: &'static str,
        samples: usize,
        batch_size: usize,
    },

    #[error("Model '{0}' is not compiled")]
    NotCompiled(String),

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Label {label} out of range for {classes} classes")]
    LabelOutOfRange { label: usize, classes: usize },

    #[error("Unknown stage: {0}")]
    UnknownStage(String),

    #[error("Pipeline has already run")]
    AlreadyRun,
}

fn check_learning_rate(lr: f64) -> Result<(), ValidationError> {
    if lr.is_finite() && lr > 0.0 {
        Ok(())
    } else {
        Err(ValidationError::InvalidLearningRate(lr))
    }
}

fn check_image_size(size: &[usize]) -> Result<(), ValidationError> {
    if size.len() == 3 && size.iter().all(|&d| d > 0) {
        Ok(())
    } else {
        Err(ValidationError::InvalidImageSize(size.to_vec()))
    }
}

fn check_batch_and_split(batch_size: usize, split: f64) -> Result<(), ValidationError> {
    if batch_size == 0 {
        return Err(ValidationError::InvalidBatchSize(batch_size));
    }
    if !(0.0..1.0).contains(&split) {
        return Err(ValidationError::InvalidValidationSplit(split));
    }
    Ok(())
}

/// Validate an ingestion record
pub fn validate_ingestion(config: &DataIngestionConfig) -> Result<(), ValidationError> {
    let url = config.source_url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ValidationError::InvalidSourceUrl(config.source_url.clone()));
    }
    Ok(())
}

/// Validate a base-model preparation record
///
/// Checks:
/// - Image size is `[h, w, c]`
/// - Learning rate is positive
/// - At least two classes
pub fn validate_prepare_base_model(config: &PrepareBaseModelConfig) -> Result<(), ValidationError> {
    check_image_size(&config.params_image_size)?;
    check_learning_rate(config.params_learning_rate)?;
    if config.params_classes < 2 {
        return Err(ValidationError::InvalidClassCount(config.params_classes));
    }
    Ok(())
}

/// Validate a training record
pub fn validate_training(config: &TrainingConfig) -> Result<(), ValidationError> {
    check_image_size(&config.params_image_size)?;
    if config.params_epochs == 0 {
        return Err(ValidationError::InvalidEpochs(config.params_epochs));
    }
    check_batch_and_split(config.params_batch_size, config.params_validation_split)
}

/// Validate an evaluation record
pub fn validate_evaluation(config: &EvaluationConfig) -> Result<(), ValidationError> {
    check_image_size(&config.params_image_size)?;
    check_batch_and_split(config.params_batch_size, config.params_validation_split)
}
