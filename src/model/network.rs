//! Sequential layer stack with JSON persistence

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use ndarray::{Array2, Array3, Array4, ArrayD, Axis, Ix2, IxDyn};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::layer::{Activation, Layer, LayerKind};
use super::loss::{correct_predictions, LossKind};
use super::optim::Optimizer;
use super::{Classifier, CompileConfig, EpochStats, FitPlan, History, Score};
use crate::config::ValidationError;
use crate::data::{Batch, DataIterator};
use crate::error::{Error, Result};

const FORMAT_VERSION: u32 = 1;

/// Model metadata carried inside the saved file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// Model name/identifier
    pub name: String,

    /// Backbone the layers were built from
    pub architecture: String,

    /// Class names in label order
    #[serde(default)]
    pub class_names: Vec<String>,

    pub created_at: DateTime<Utc>,

    /// Custom metadata fields
    #[serde(default)]
    pub custom: BTreeMap<String, serde_json::Value>,
}

impl ModelMetadata {
    pub fn new(name: impl Into<String>, architecture: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            architecture: architecture.into(),
            class_names: Vec::new(),
            created_at: Utc::now(),
            custom: BTreeMap::new(),
        }
    }
}

/// Information about a model parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterInfo {
    /// Parameter name, `<layer>.<param>`
    pub name: String,

    pub shape: Vec<usize>,

    pub dtype: String,

    /// Whether the owning layer is trainable
    pub requires_grad: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum LayerSpec {
    AvgPool2d { pool: usize },
    ChannelAffine { activation: Activation },
    Flatten,
    Dense { activation: Activation },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LayerRecord {
    name: String,
    trainable: bool,
    kind: LayerSpec,
}

/// Serializable network state; parameter values are flattened into `data`
/// in layer order
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ModelState {
    format_version: u32,
    metadata: ModelMetadata,
    input_shape: [usize; 3],
    compile: Option<CompileConfig>,
    layers: Vec<LayerRecord>,
    parameters: Vec<ParameterInfo>,
    data: Vec<f32>,
}

fn param_names(kind: &LayerKind) -> &'static [&'static str] {
    match kind {
        LayerKind::ChannelAffine { .. } => &["scale", "shift"],
        LayerKind::Dense { .. } => &["kernel", "bias"],
        LayerKind::AvgPool2d { .. } | LayerKind::Flatten => &[],
    }
}

/// Hands out consecutive parameter tensors from a [`ModelState`]
struct ParamReader<'a> {
    infos: std::slice::Iter<'a, ParameterInfo>,
    data: &'a [f32],
    offset: usize,
}

impl ParamReader<'_> {
    fn take(&mut self, layer: &str) -> Result<ArrayD<f32>> {
        let info = self
            .infos
            .next()
            .ok_or_else(|| Error::Serialization(format!("missing parameters for layer '{layer}'")))?;
        let size: usize = info.shape.iter().product();
        let end = self.offset + size;
        let values = self
            .data
            .get(self.offset..end)
            .ok_or_else(|| Error::Serialization(format!("truncated data for '{}'", info.name)))?;
        self.offset = end;
        ArrayD::from_shape_vec(IxDyn(&info.shape), values.to_vec())
            .map_err(|e| Error::Serialization(format!("parameter '{}': {e}", info.name)))
    }
}

/// Running loss and accuracy over seen samples
#[derive(Debug, Default, Clone, Copy)]
struct Totals {
    loss_sum: f64,
    correct: usize,
    seen: usize,
}

impl Totals {
    fn add(&mut self, mean_loss: f64, correct: usize, samples: usize) {
        self.loss_sum += mean_loss * samples as f64;
        self.correct += correct;
        self.seen += samples;
    }

    fn loss(&self) -> f64 {
        if self.seen == 0 {
            0.0
        } else {
            self.loss_sum / self.seen as f64
        }
    }

    fn accuracy(&self) -> f64 {
        if self.seen == 0 {
            0.0
        } else {
            self.correct as f64 / self.seen as f64
        }
    }
}

/// A sequential network over NHWC image batches
#[derive(Debug, Clone, PartialEq)]
pub struct Network {
    metadata: ModelMetadata,
    input_shape: [usize; 3],
    layers: Vec<Layer>,
    compile: Option<CompileConfig>,
}

impl Network {
    pub fn new(metadata: ModelMetadata, input_shape: [usize; 3]) -> Self {
        Self {
            metadata,
            input_shape,
            layers: Vec::new(),
            compile: None,
        }
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut ModelMetadata {
        &mut self.metadata
    }

    pub fn input_shape(&self) -> [usize; 3] {
        self.input_shape
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layers_mut(&mut self) -> &mut [Layer] {
        &mut self.layers
    }

    pub fn compile_config(&self) -> Option<&CompileConfig> {
        self.compile.as_ref()
    }

    /// Append a layer after checking it accepts the current output shape
    pub fn push(&mut self, layer: Layer) -> Result<()> {
        let input = self.output_shape()?;
        layer.output_shape(&input)?;
        check_params(&layer)?;
        self.layers.push(layer);
        Ok(())
    }

    /// Drop every layer from `len` on
    pub fn truncate(&mut self, len: usize) {
        self.layers.truncate(len);
    }

    /// Per-sample output shape
    pub fn output_shape(&self) -> Result<Vec<usize>> {
        self.layers
            .iter()
            .try_fold(self.input_shape.to_vec(), |shape, layer| layer.output_shape(&shape))
    }

    /// Width of a flat output, e.g. the class count of a classifier head
    pub fn output_units(&self) -> Result<usize> {
        match self.output_shape()?.as_slice() {
            [units] => Ok(*units),
            other => Err(ValidationError::ShapeMismatch {
                expected: vec![0],
                actual: other.to_vec(),
            }
            .into()),
        }
    }

    /// `base` if no layer uses it yet, else `base_1`, `base_2`, ...
    pub fn unique_layer_name(&self, base: &str) -> String {
        let taken = |name: &str| self.layers.iter().any(|l| l.name == name);
        if !taken(base) {
            return base.to_string();
        }
        (1..)
            .map(|i| format!("{base}_{i}"))
            .find(|name| !taken(name))
            .unwrap_or_else(|| base.to_string())
    }

    pub fn param_count(&self) -> usize {
        self.layers.iter().map(Layer::param_count).sum()
    }

    pub fn trainable_param_count(&self) -> usize {
        self.layers
            .iter()
            .filter(|l| l.trainable)
            .map(Layer::param_count)
            .sum()
    }

    fn check_input(&self, shape: &[usize]) -> Result<()> {
        if shape.len() == 4 && shape[1..] == self.input_shape[..] {
            Ok(())
        } else {
            let mut expected = vec![shape.first().copied().unwrap_or(0)];
            expected.extend_from_slice(&self.input_shape);
            Err(ValidationError::ShapeMismatch {
                expected,
                actual: shape.to_vec(),
            }
            .into())
        }
    }

    /// Input followed by every layer's output
    fn activations(&self, input: ArrayD<f32>) -> Result<Vec<ArrayD<f32>>> {
        let mut acts = Vec::with_capacity(self.layers.len() + 1);
        acts.push(input);
        for layer in &self.layers {
            let next = layer.forward(&acts[acts.len() - 1])?;
            acts.push(next);
        }
        Ok(acts)
    }

    /// Class probabilities for a batch, `[N, classes]`
    pub fn forward(&self, images: &Array4<f32>) -> Result<Array2<f32>> {
        self.check_input(images.shape())?;
        let acts = self.activations(images.clone().into_dyn())?;
        to_probs(acts.last())
    }

    /// One optimizer step; returns the batch's mean loss and correct count
    pub fn train_on_batch(
        &mut self,
        batch: &Batch,
        optimizer: &mut dyn Optimizer,
        loss: LossKind,
    ) -> Result<(f64, usize)> {
        self.check_input(batch.images.shape())?;
        let acts = self.activations(batch.images.clone().into_dyn())?;
        let probs = to_probs(acts.last())?;
        let (value, grad) = loss.forward(&probs, &batch.labels)?;
        let correct = correct_predictions(&probs, &batch.labels);

        // nothing below the first trainable layer needs a gradient
        let Some(first) = self
            .layers
            .iter()
            .position(|l| l.trainable && l.param_count() > 0)
        else {
            return Ok((value, correct));
        };

        optimizer.begin_step();
        let mut grad = grad.into_dyn();
        for idx in (first..self.layers.len()).rev() {
            let grads = self.layers[idx].backward(&acts[idx], &acts[idx + 1], &grad)?;
            let layer = &mut self.layers[idx];
            if layer.trainable {
                for (p, (param, g)) in layer.params_mut().into_iter().zip(&grads.params).enumerate() {
                    optimizer.update(idx * 2 + p, param, g);
                }
            }
            grad = grads.input;
        }
        Ok((value, correct))
    }

    fn compiled(&self) -> Result<&CompileConfig> {
        self.compile
            .as_ref()
            .ok_or_else(|| ValidationError::NotCompiled(self.metadata.name.clone()).into())
    }

    /// Consume up to `limit` batches (all when `None`) without training
    fn run_eval(&self, data: &mut dyn DataIterator, limit: Option<usize>, loss: LossKind) -> Result<Totals> {
        let mut totals = Totals::default();
        let mut batches = 0;
        while limit.map_or(true, |l| batches < l) {
            let Some(batch) = data.next_batch()? else {
                break;
            };
            let probs = self.forward(&batch.images)?;
            let (value, _) = loss.forward(&probs, &batch.labels)?;
            totals.add(value, correct_predictions(&probs, &batch.labels), batch.len());
            batches += 1;
        }
        Ok(totals)
    }

    /// Layer table in the usual `Model: "name"` layout
    pub fn summary(&self) -> String {
        let mut out = format!("Model: \"{}\"\n", self.metadata.name);
        let rule = "_".repeat(78);
        out.push_str(&rule);
        out.push('\n');
        out.push_str(&format!(
            "{:<34}{:<24}{:>10}{:>10}\n",
            "Layer (type)", "Output Shape", "Param #", "Trainable"
        ));
        out.push_str(&"=".repeat(78));
        out.push('\n');

        let mut shape = self.input_shape.to_vec();
        for layer in &self.layers {
            shape = layer.output_shape(&shape).unwrap_or_default();
            let dims: Vec<String> = shape.iter().map(usize::to_string).collect();
            out.push_str(&format!(
                "{:<34}{:<24}{:>10}{:>10}\n",
                format!("{} ({})", layer.name, layer.kind.type_name()),
                format!("(None, {})", dims.join(", ")),
                layer.param_count(),
                layer.trainable
            ));
        }

        let total = self.param_count();
        let trainable = self.trainable_param_count();
        out.push_str(&"=".repeat(78));
        out.push('\n');
        out.push_str(&format!("Total params: {total}\n"));
        out.push_str(&format!("Trainable params: {trainable}\n"));
        out.push_str(&format!("Non-trainable params: {}\n", total - trainable));
        out.push_str(&rule);
        out
    }

    fn to_state(&self) -> ModelState {
        let mut parameters = Vec::new();
        let mut data = Vec::with_capacity(self.param_count());
        let layers = self
            .layers
            .iter()
            .map(|layer| {
                for (pname, param) in param_names(&layer.kind).iter().zip(layer.params()) {
                    parameters.push(ParameterInfo {
                        name: format!("{}.{pname}", layer.name),
                        shape: param.shape().to_vec(),
                        dtype: "f32".to_string(),
                        requires_grad: layer.trainable,
                    });
                    data.extend(param.iter().copied());
                }
                LayerRecord {
                    name: layer.name.clone(),
                    trainable: layer.trainable,
                    kind: match &layer.kind {
                        LayerKind::AvgPool2d { pool } => LayerSpec::AvgPool2d { pool: *pool },
                        LayerKind::ChannelAffine { activation, .. } => LayerSpec::ChannelAffine {
                            activation: *activation,
                        },
                        LayerKind::Flatten => LayerSpec::Flatten,
                        LayerKind::Dense { activation, .. } => LayerSpec::Dense {
                            activation: *activation,
                        },
                    },
                }
            })
            .collect();

        ModelState {
            format_version: FORMAT_VERSION,
            metadata: self.metadata.clone(),
            input_shape: self.input_shape,
            compile: self.compile.clone(),
            layers,
            parameters,
            data,
        }
    }

    fn from_state(state: ModelState) -> Result<Self> {
        if state.format_version != FORMAT_VERSION {
            return Err(Error::Serialization(format!(
                "unsupported model format version {}",
                state.format_version
            )));
        }
        let needed: usize = state
            .parameters
            .iter()
            .map(|p| p.shape.iter().product::<usize>())
            .sum();
        if needed != state.data.len() {
            return Err(Error::Serialization(format!(
                "parameter data holds {} values, shapes need {needed}",
                state.data.len()
            )));
        }

        let mut reader = ParamReader {
            infos: state.parameters.iter(),
            data: &state.data,
            offset: 0,
        };
        let mut network = Network::new(state.metadata.clone(), state.input_shape);
        for record in &state.layers {
            let kind = match record.kind {
                LayerSpec::AvgPool2d { pool } => LayerKind::AvgPool2d { pool },
                LayerSpec::ChannelAffine { activation } => LayerKind::ChannelAffine {
                    scale: reader.take(&record.name)?,
                    shift: reader.take(&record.name)?,
                    activation,
                },
                LayerSpec::Flatten => LayerKind::Flatten,
                LayerSpec::Dense { activation } => LayerKind::Dense {
                    weights: reader.take(&record.name)?,
                    bias: reader.take(&record.name)?,
                    activation,
                },
            };
            network.push(Layer {
                name: record.name.clone(),
                trainable: record.trainable,
                kind,
            })?;
        }
        if reader.infos.next().is_some() {
            return Err(Error::Serialization(
                "parameters left over after the last layer".to_string(),
            ));
        }
        network.compile = state.compile;
        Ok(network)
    }

    /// Load a network saved by [`Classifier::save`]
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::artifact(path, "model file not found"));
        }
        let content = fs::read_to_string(path).map_err(|e| Error::artifact(path, e.to_string()))?;
        let state: ModelState = serde_json::from_str(&content)
            .map_err(|e| Error::artifact(path, format!("invalid model file: {e}")))?;
        let network = Self::from_state(state).map_err(|e| Error::artifact(path, e.to_string()))?;
        debug!(
            "Loaded model '{}' with {} layers from {}",
            network.metadata.name,
            network.layers.len(),
            path.display()
        );
        Ok(network)
    }
}

fn check_params(layer: &Layer) -> Result<()> {
    let (expected, actual) = match &layer.kind {
        LayerKind::ChannelAffine { scale, shift, .. } => (scale.len(), shift.len()),
        LayerKind::Dense { weights, bias, .. } => {
            (weights.shape().get(1).copied().unwrap_or(0), bias.len())
        }
        LayerKind::AvgPool2d { .. } | LayerKind::Flatten => return Ok(()),
    };
    if expected == actual {
        Ok(())
    } else {
        Err(ValidationError::ShapeMismatch {
            expected: vec![expected],
            actual: vec![actual],
        }
        .into())
    }
}

fn to_probs(last: Option<&ArrayD<f32>>) -> Result<Array2<f32>> {
    let last = last.ok_or_else(|| ValidationError::ShapeMismatch {
        expected: vec![0, 0],
        actual: Vec::new(),
    })?;
    last.view()
        .into_dimensionality::<Ix2>()
        .map(|v| v.to_owned())
        .map_err(|_| {
            ValidationError::ShapeMismatch {
                expected: vec![last.shape().first().copied().unwrap_or(0), 0],
                actual: last.shape().to_vec(),
            }
            .into()
        })
}

impl Classifier for Network {
    fn name(&self) -> &str {
        &self.metadata.name
    }

    fn compile(&mut self, config: CompileConfig) {
        self.compile = Some(config);
    }

    fn fit(
        &mut self,
        train: &mut dyn DataIterator,
        mut valid: Option<&mut dyn DataIterator>,
        plan: &FitPlan,
    ) -> Result<History> {
        let compile = self.compiled()?.clone();
        if plan.steps_per_epoch == 0 {
            return Err(ValidationError::InsufficientSamples {
                subset: "training",
                samples: train.sample_count(),
                batch_size: train.batch_size(),
            }
            .into());
        }

        let mut optimizer = compile.optimizer.build();
        let mut history = History::default();
        train.reset();

        for epoch in 1..=plan.epochs {
            let mut totals = Totals::default();
            for _ in 0..plan.steps_per_epoch {
                let batch = train.next_cycled()?.ok_or_else(|| {
                    ValidationError::EmptyDataset("training iterator yielded no batches".to_string())
                })?;
                let (loss, correct) = self.train_on_batch(&batch, optimizer.as_mut(), compile.loss)?;
                totals.add(loss, correct, batch.len());
            }

            let validation = match valid.as_deref_mut() {
                Some(data) if plan.validation_steps > 0 => {
                    data.reset();
                    Some(self.run_eval(data, Some(plan.validation_steps), compile.loss)?)
                }
                _ => None,
            };

            let stats = EpochStats {
                epoch,
                loss: totals.loss(),
                accuracy: totals.accuracy(),
                val_loss: validation.map(|t| t.loss()),
                val_accuracy: validation.map(|t| t.accuracy()),
            };
            match (stats.val_loss, stats.val_accuracy) {
                (Some(val_loss), Some(val_accuracy)) => info!(
                    "Epoch {epoch}/{} - loss: {:.4} - accuracy: {:.4} - val_loss: {val_loss:.4} - val_accuracy: {val_accuracy:.4}",
                    plan.epochs, stats.loss, stats.accuracy
                ),
                _ => info!(
                    "Epoch {epoch}/{} - loss: {:.4} - accuracy: {:.4}",
                    plan.epochs, stats.loss, stats.accuracy
                ),
            }
            history.epochs.push(stats);
        }

        Ok(history)
    }

    fn evaluate(&self, data: &mut dyn DataIterator) -> Result<Score> {
        let loss = self.compiled()?.loss;
        data.reset();
        let totals = self.run_eval(data, None, loss)?;
        if totals.seen == 0 {
            return Err(ValidationError::InsufficientSamples {
                subset: "evaluation",
                samples: data.sample_count(),
                batch_size: data.batch_size(),
            }
            .into());
        }
        Ok(Score {
            loss: totals.loss(),
            accuracy: totals.accuracy(),
        })
    }

    fn predict(&self, image: &Array3<f32>) -> Result<Vec<f32>> {
        let batch = image.clone().insert_axis(Axis(0));
        let probs = self.forward(&batch)?;
        Ok(probs.row(0).to_vec())
    }

    fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, &self.to_state())?;
        writer.flush()?;
        debug!("Saved model '{}' to {}", self.metadata.name, path.display());
        Ok(())
    }

    fn class_names(&self) -> &[String] {
        &self.metadata.class_names
    }

    fn set_class_names(&mut self, names: Vec<String>) {
        self.metadata.class_names = names;
    }
}
