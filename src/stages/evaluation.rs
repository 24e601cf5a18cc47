//! Scoring of the trained model and publication to the experiment tracker

use std::collections::BTreeMap;
use std::fs;

use tracing::{info, warn};

use crate::config::EvaluationConfig;
use crate::data::{ImageBatchIterator, ImageFolder, ImageShape, Subset};
use crate::error::{Error, Result};
use crate::model::{
    Classifier, CompileConfig, LossKind, Metric, ModelLoader, NetworkLoader, OptimizerSpec, Score,
};
use crate::tracking::{flatten_params, ExperimentTracker, RunStatus};

use super::training::FINE_TUNE_LEARNING_RATE;

pub const EXPERIMENT_NAME: &str = "Multi Class Classification Model Evaluation";
pub const RUN_NAME: &str = "Multi Class Classification";
pub const REGISTERED_MODEL_NAME: &str = "VGG16Model";
const MODEL_ARTIFACT_PATH: &str = "model";

/// Evaluates the trained model on the validation subset
pub struct Evaluation {
    config: EvaluationConfig,
    loader: Box<dyn ModelLoader>,
    model: Option<Box<dyn Classifier>>,
    valid_generator: Option<ImageBatchIterator>,
    score: Option<Score>,
}

impl Evaluation {
    pub fn new(config: EvaluationConfig) -> Self {
        Self::with_loader(config, Box::new(NetworkLoader))
    }

    pub fn with_loader(config: EvaluationConfig, loader: Box<dyn ModelLoader>) -> Self {
        Self {
            config,
            loader,
            model: None,
            valid_generator: None,
            score: None,
        }
    }

    pub fn config(&self) -> &EvaluationConfig {
        &self.config
    }

    pub fn score(&self) -> Option<Score> {
        self.score
    }

    /// The model loaded by the last [`Evaluation::evaluation`] call
    pub fn model(&self) -> Option<&dyn Classifier> {
        self.model.as_deref()
    }

    /// Ordered iterator over the validation subset of `training_data`
    pub fn build_validation_generator(&mut self) -> Result<()> {
        let shape = ImageShape::from_dims(&self.config.params_image_size)?;
        let folder = ImageFolder::scan(
            &self.config.training_data,
            Subset::Validation,
            self.config.params_validation_split,
        )?;
        self.valid_generator = Some(ImageBatchIterator::new(
            folder,
            shape,
            self.config.params_batch_size,
            0,
        ));
        Ok(())
    }

    /// Load and compile the model, evaluate it, and save the score
    pub fn evaluation(&mut self) -> Result<Score> {
        let mut model = self.loader.load(&self.config.path_of_model)?;
        model.compile(CompileConfig {
            optimizer: OptimizerSpec::adam(FINE_TUNE_LEARNING_RATE),
            loss: LossKind::SparseCategoricalCrossentropy,
            metrics: vec![Metric::Accuracy],
        });
        self.build_validation_generator()?;

        let valid = self
            .valid_generator
            .as_mut()
            .ok_or_else(|| Error::Serialization("validation iterator missing".to_string()))?;
        let score = model.evaluate(valid)?;
        info!("Evaluation: loss={:.4}, accuracy={:.4}", score.loss, score.accuracy);

        self.model = Some(model);
        self.score = Some(score);
        self.save_score()?;
        Ok(score)
    }

    /// Write `{"loss": .., "accuracy": ..}` to `score_file`
    pub fn save_score(&self) -> Result<()> {
        let score = self
            .score
            .ok_or_else(|| Error::Serialization("no score to save; run evaluation first".to_string()))?;
        let path = &self.config.score_file;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(&score)?)?;
        info!("json file saved at: {}", path.display());
        Ok(())
    }

    /// Send params, metrics and the model file to `tracker`
    ///
    /// The model is registered as a new version only on a remote backend.
    /// The run is closed as failed when any logging step fails.
    pub fn log_into_mlflow(&self, tracker: &mut dyn ExperimentTracker) -> Result<()> {
        let score = self
            .score
            .ok_or_else(|| Error::Tracking("no score to log; run evaluation first".to_string()))?;
        let run = tracker.start_run(EXPERIMENT_NAME, RUN_NAME)?;

        let logged = (|| -> Result<()> {
            tracker.log_params(&run, &flatten_params(&self.config.all_params))?;
            let metrics = BTreeMap::from([
                ("loss".to_string(), score.loss),
                ("accuracy".to_string(), score.accuracy),
            ]);
            tracker.log_metrics(&run, &metrics)?;
            let registered = tracker
                .backend()
                .is_remote()
                .then_some(REGISTERED_MODEL_NAME);
            tracker.log_model(&run, MODEL_ARTIFACT_PATH, &self.config.path_of_model, registered)
        })();

        match logged {
            Ok(()) => tracker.end_run(&run, RunStatus::Finished),
            Err(e) => {
                if let Err(close) = tracker.end_run(&run, RunStatus::Failed) {
                    warn!("Could not mark run {} as failed: {close}", run.run_id);
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::{FileTracker, RunHandle, TrackingBackend};
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingTracker {
        remote: bool,
        fail_metrics: bool,
        params: BTreeMap<String, String>,
        registered: Vec<Option<String>>,
        ended: Vec<RunStatus>,
    }

    impl ExperimentTracker for RecordingTracker {
        fn backend(&self) -> TrackingBackend {
            if self.remote {
                TrackingBackend::Remote
            } else {
                TrackingBackend::File
            }
        }

        fn start_run(&mut self, experiment: &str, run_name: &str) -> Result<RunHandle> {
            Ok(RunHandle {
                experiment_id: experiment.to_string(),
                run_id: "run-1".to_string(),
                run_name: run_name.to_string(),
            })
        }

        fn log_params(&mut self, _run: &RunHandle, params: &BTreeMap<String, String>) -> Result<()> {
            self.params.extend(params.clone());
            Ok(())
        }

        fn log_metrics(&mut self, _run: &RunHandle, _metrics: &BTreeMap<String, f64>) -> Result<()> {
            if self.fail_metrics {
                return Err(Error::Tracking("metrics rejected".to_string()));
            }
            Ok(())
        }

        fn log_model(
            &mut self,
            _run: &RunHandle,
            _artifact_path: &str,
            _model_file: &Path,
            registered_name: Option<&str>,
        ) -> Result<()> {
            self.registered.push(registered_name.map(str::to_string));
            Ok(())
        }

        fn end_run(&mut self, _run: &RunHandle, status: RunStatus) -> Result<()> {
            self.ended.push(status);
            Ok(())
        }
    }

    fn config(root: &Path) -> EvaluationConfig {
        EvaluationConfig {
            root_dir: root.to_path_buf(),
            path_of_model: root.join("model.json"),
            training_data: PathBuf::from("unused"),
            score_file: root.join("out/scores.json"),
            all_params: serde_json::json!({"EPOCHS": 1, "IMAGE_SIZE": [32, 32, 3]}),
            mlflow_uri: "mlruns".to_string(),
            params_image_size: vec![32, 32, 3],
            params_batch_size: 4,
            params_validation_split: 0.2,
        }
    }

    fn scored(root: &Path) -> Evaluation {
        let mut evaluation = Evaluation::new(config(root));
        evaluation.score = Some(Score {
            loss: 0.42,
            accuracy: 0.91,
        });
        evaluation
    }

    #[test]
    fn test_save_score_requires_score() {
        let tmp = TempDir::new().unwrap();
        assert!(Evaluation::new(config(tmp.path())).save_score().is_err());
    }

    #[test]
    fn test_save_score_writes_both_metrics() {
        let tmp = TempDir::new().unwrap();
        scored(tmp.path()).save_score().unwrap();
        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(tmp.path().join("out/scores.json")).unwrap())
                .unwrap();
        assert_eq!(written, serde_json::json!({"loss": 0.42, "accuracy": 0.91}));
    }

    #[test]
    fn test_registration_only_on_remote_backend() {
        let tmp = TempDir::new().unwrap();
        let evaluation = scored(tmp.path());

        let mut local = RecordingTracker::default();
        evaluation.log_into_mlflow(&mut local).unwrap();
        assert_eq!(local.registered, vec![None]);
        assert_eq!(local.params["IMAGE_SIZE"], "[32,32,3]");
        assert_eq!(local.ended, vec![RunStatus::Finished]);

        let mut remote = RecordingTracker {
            remote: true,
            ..Default::default()
        };
        evaluation.log_into_mlflow(&mut remote).unwrap();
        assert_eq!(remote.registered, vec![Some(REGISTERED_MODEL_NAME.to_string())]);
    }

    #[test]
    fn test_failed_logging_closes_run_as_failed() {
        let tmp = TempDir::new().unwrap();
        let mut tracker = RecordingTracker {
            fail_metrics: true,
            ..Default::default()
        };
        assert!(scored(tmp.path()).log_into_mlflow(&mut tracker).is_err());
        assert_eq!(tracker.ended, vec![RunStatus::Failed]);
        assert!(tracker.registered.is_empty());
    }

    #[test]
    fn test_file_tracker_receives_model() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("model.json"), "{}").unwrap();
        let mut tracker = FileTracker::new(tmp.path().join("mlruns"));
        scored(tmp.path()).log_into_mlflow(&mut tracker).unwrap();

        let experiments: Vec<_> = fs::read_dir(tmp.path().join("mlruns")).unwrap().collect();
        assert_eq!(experiments.len(), 1);
    }
}
