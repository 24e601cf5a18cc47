//! Pipeline stages
//!
//! Each stage component is constructed from one configuration record and
//! exposes its operations in the order its runner calls them:
//!
//! | Stage | Component | Operations |
//! |-------|-----------|------------|
//! | Data Ingestion | [`DataIngestion`] | `download_file`, `extract_zip_file` |
//! | Prepare Base Model | [`PrepareBaseModel`] | `get_base_model`, `update_base_model` |
//! | Model Training | [`Training`] | `get_base_model`, `train_valid_generator`, `train` |
//! | Evaluation | [`Evaluation`] | `evaluation`, `save_score`, `log_into_mlflow` |

mod evaluation;
mod prepare_base_model;
mod runner;
mod training;

pub use crate::ingest::DataIngestion;
pub use evaluation::{Evaluation, EXPERIMENT_NAME, REGISTERED_MODEL_NAME, RUN_NAME};
pub use prepare_base_model::PrepareBaseModel;
pub use runner::{
    pipeline_for, run_stage, DataIngestionPipeline, EvaluationPipeline, ModelTrainingPipeline,
    Pipeline, PipelineStage, PipelineState, PrepareBaseModelPipeline,
};
pub use training::{steps_for, Training, TrainingOutcome, FINE_TUNE_LEARNING_RATE};
