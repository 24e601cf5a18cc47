//! Stage runners and the pipeline driver

use std::fmt;

use tracing::{error, info, info_span};

use crate::config::{ConfigurationManager, StageName, ValidationError};
use crate::error::{Error, Result};
use crate::ingest::DataIngestion;
use crate::tracking::{tracker_for_uri, ExperimentTracker};

use super::evaluation::Evaluation;
use super::prepare_base_model::PrepareBaseModel;
use super::training::Training;

/// One runnable step of the pipeline
///
/// `main` builds the stage's configuration record from the manager,
/// constructs the stage component and calls its operations in order.
pub trait PipelineStage {
    fn name(&self) -> &'static str;

    fn main(&mut self, manager: &ConfigurationManager) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct DataIngestionPipeline;

impl PipelineStage for DataIngestionPipeline {
    fn name(&self) -> &'static str {
        "Data Ingestion stage"
    }

    fn main(&mut self, manager: &ConfigurationManager) -> Result<()> {
        let config = manager.get_data_ingestion_config()?;
        let ingestion = DataIngestion::new(config)?;
        ingestion.download_file()?;
        ingestion.extract_zip_file()
    }
}

#[derive(Debug, Default)]
pub struct PrepareBaseModelPipeline;

impl PipelineStage for PrepareBaseModelPipeline {
    fn name(&self) -> &'static str {
        "Prepare Base Model stage"
    }

    fn main(&mut self, manager: &ConfigurationManager) -> Result<()> {
        let config = manager.get_prepare_base_model_config()?;
        let mut prepare = PrepareBaseModel::new(config);
        prepare.get_base_model()?;
        prepare.update_base_model()
    }
}

#[derive(Debug, Default)]
pub struct ModelTrainingPipeline;

impl PipelineStage for ModelTrainingPipeline {
    fn name(&self) -> &'static str {
        "Model Training stage"
    }

    fn main(&mut self, manager: &ConfigurationManager) -> Result<()> {
        let config = manager.get_training_config()?;
        let mut training = Training::new(config);
        training.get_base_model()?;
        training.train_valid_generator()?;
        training.train()?;
        Ok(())
    }
}

/// Evaluates and publishes to the tracker named by `mlflow_uri`, unless a
/// tracker is supplied
#[derive(Default)]
pub struct EvaluationPipeline {
    tracker: Option<Box<dyn ExperimentTracker>>,
}

impl EvaluationPipeline {
    pub fn with_tracker(tracker: Box<dyn ExperimentTracker>) -> Self {
        Self {
            tracker: Some(tracker),
        }
    }
}

impl PipelineStage for EvaluationPipeline {
    fn name(&self) -> &'static str {
        "Evaluation stage"
    }

    fn main(&mut self, manager: &ConfigurationManager) -> Result<()> {
        let config = manager.get_evaluation_config()?;
        let mut tracker = match self.tracker.take() {
            Some(tracker) => tracker,
            None => tracker_for_uri(&config.mlflow_uri)?,
        };
        let mut evaluation = Evaluation::new(config);
        evaluation.evaluation()?;
        let logged = evaluation.log_into_mlflow(tracker.as_mut());
        self.tracker = Some(tracker);
        logged
    }
}

/// Runner for a stage chosen by name
pub fn pipeline_for(stage: StageName) -> Box<dyn PipelineStage> {
    match stage {
        StageName::DataIngestion => Box::new(DataIngestionPipeline),
        StageName::PrepareBaseModel => Box::new(PrepareBaseModelPipeline),
        StageName::Training => Box::new(ModelTrainingPipeline),
        StageName::Evaluation => Box::new(EvaluationPipeline::default()),
    }
}

/// Run one stage inside its span, logging start, completion or failure
///
/// A failure comes back wrapped in [`Error::Stage`].
pub fn run_stage(stage: &mut dyn PipelineStage, manager: &ConfigurationManager) -> Result<()> {
    let name = stage.name();
    let span = info_span!("stage", name);
    let _enter = span.enter();

    info!("*******************");
    info!(">>>>>> stage {name} started <<<<<<");
    match stage.main(manager) {
        Ok(()) => {
            info!(">>>>>> stage {name} completed <<<<<<\n\nx==========x");
            Ok(())
        }
        Err(e) => {
            error!("stage {name} failed: {e}");
            Err(Error::Stage {
                stage: name,
                source: Box::new(e),
            })
        }
    }
}

/// Where a [`Pipeline`] is in its single run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Ingesting,
    PreparingBaseModel,
    Training,
    Evaluating,
    Done,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineState::Idle => "idle",
            PipelineState::Ingesting => "ingesting",
            PipelineState::PreparingBaseModel => "preparing base model",
            PipelineState::Training => "training",
            PipelineState::Evaluating => "evaluating",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Runs the stages in order, once
pub struct Pipeline {
    manager: ConfigurationManager,
    stages: Vec<(PipelineState, Box<dyn PipelineStage>)>,
    state: PipelineState,
}

impl Pipeline {
    /// Ingestion, base-model preparation and training, plus evaluation
    /// when `with_evaluation`
    pub fn new(manager: ConfigurationManager, with_evaluation: bool) -> Self {
        let mut stages: Vec<(PipelineState, Box<dyn PipelineStage>)> = vec![
            (PipelineState::Ingesting, Box::new(DataIngestionPipeline)),
            (PipelineState::PreparingBaseModel, Box::new(PrepareBaseModelPipeline)),
            (PipelineState::Training, Box::new(ModelTrainingPipeline)),
        ];
        if with_evaluation {
            stages.push((PipelineState::Evaluating, Box::new(EvaluationPipeline::default())));
        }
        Self::with_stages(manager, stages)
    }

    pub fn with_stages(
        manager: ConfigurationManager,
        stages: Vec<(PipelineState, Box<dyn PipelineStage>)>,
    ) -> Self {
        Self {
            manager,
            stages,
            state: PipelineState::Idle,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn manager(&self) -> &ConfigurationManager {
        &self.manager
    }

    /// Run every stage; the first failure stops the run
    pub fn run(&mut self) -> Result<()> {
        if self.state != PipelineState::Idle {
            return Err(ValidationError::AlreadyRun.into());
        }
        for (state, stage) in &mut self.stages {
            self.state = *state;
            if let Err(e) = run_stage(stage.as_mut(), &self.manager) {
                self.state = PipelineState::Failed;
                return Err(e);
            }
        }
        self.state = PipelineState::Done;
        info!("Pipeline finished");
        Ok(())
    }
}
