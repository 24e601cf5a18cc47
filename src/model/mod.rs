//! Classification model capability and its native implementation
//!
//! Stages talk to models through [`Classifier`] and [`ModelLoader`]; the
//! crate's own implementation is [`Network`], a small layer stack trained
//! with explicit backpropagation.

mod backbone;
mod layer;
mod loss;
mod network;
mod optim;

use std::path::Path;

use ndarray::Array3;
use serde::{Deserialize, Serialize};

use crate::data::DataIterator;
use crate::error::Result;

pub use backbone::{glorot_uniform, Backbone, PooledVgg16};
pub use layer::{Activation, Layer, LayerGrads, LayerKind};
pub use loss::{argmax, correct_predictions, LossKind, EPSILON};
pub use network::{ModelMetadata, Network, ParameterInfo};
pub use optim::{Adam, Optimizer, OptimizerSpec, Sgd};

/// Metrics reported next to the loss
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Accuracy,
}

/// Optimizer, loss and metrics fixed by `compile`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileConfig {
    pub optimizer: OptimizerSpec,
    pub loss: LossKind,
    pub metrics: Vec<Metric>,
}

/// How long `fit` runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitPlan {
    pub epochs: usize,
    pub steps_per_epoch: usize,
    pub validation_steps: usize,
}

/// Per-epoch training record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpochStats {
    pub epoch: usize,
    pub loss: f64,
    pub accuracy: f64,
    pub val_loss: Option<f64>,
    pub val_accuracy: Option<f64>,
}

/// Everything `fit` observed
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct History {
    pub epochs: Vec<EpochStats>,
}

impl History {
    pub fn last(&self) -> Option<&EpochStats> {
        self.epochs.last()
    }
}

/// Evaluation result, persisted as the score file
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub loss: f64,
    pub accuracy: f64,
}

/// An image classifier that can be compiled, trained, evaluated and saved
pub trait Classifier: Send + Sync {
    fn name(&self) -> &str;

    /// Replace the optimizer, loss and metrics used by `fit` and `evaluate`
    fn compile(&mut self, config: CompileConfig);

    fn fit(
        &mut self,
        train: &mut dyn DataIterator,
        valid: Option<&mut dyn DataIterator>,
        plan: &FitPlan,
    ) -> Result<History>;

    /// One full pass over `data`, including a short final batch
    fn evaluate(&self, data: &mut dyn DataIterator) -> Result<Score>;

    /// Class probabilities for one HWC image
    fn predict(&self, image: &Array3<f32>) -> Result<Vec<f32>>;

    fn save(&self, path: &Path) -> Result<()>;

    /// Class names in label order, empty when never trained on folders
    fn class_names(&self) -> &[String];

    fn set_class_names(&mut self, names: Vec<String>);
}

/// Loads persisted classifiers
pub trait ModelLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn Classifier>>;
}

/// Loads [`Network`] files
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkLoader;

impl ModelLoader for NetworkLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn Classifier>> {
        Ok(Box::new(Network::load(path)?))
    }
}
