//! Single-image inference with a trained classifier
//!
//! The trained model is loaded once; each call decodes an image, resizes it
//! to the model's input size, rescales pixels by 1/255 and maps the arg-max
//! class index to a [`Diagnosis`]. Results are returned in the
//! `[{"image": "<label>"}]` shape used by the HTTP endpoint in [`server`].

pub mod server;

use std::fmt;
use std::path::Path;

use ndarray::Array3;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::ValidationError;
use crate::data::{decode_image, load_image, ImageShape};
use crate::error::Result;
use crate::model::{argmax, Classifier, Network};

/// Input size the shipped configuration trains at
pub const PREDICTION_IMAGE_SIZE: usize = 224;

/// Class index reported as "Normal"; every other index is "Tumor"
pub const NORMAL_CLASS_INDEX: usize = 1;

/// Outcome of one prediction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Diagnosis {
    Normal,
    Tumor,
}

impl Diagnosis {
    pub fn from_class_index(index: usize) -> Self {
        if index == NORMAL_CLASS_INDEX {
            Diagnosis::Normal
        } else {
            Diagnosis::Tumor
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Diagnosis::Normal => "Normal",
            Diagnosis::Tumor => "Tumor",
        }
    }
}

impl fmt::Display for Diagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a prediction response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub image: String,
}

impl From<Diagnosis> for PredictionRecord {
    fn from(diagnosis: Diagnosis) -> Self {
        Self {
            image: diagnosis.to_string(),
        }
    }
}

/// A loaded model ready to classify images
pub struct PredictionPipeline {
    model: Box<dyn Classifier>,
    shape: ImageShape,
}

impl PredictionPipeline {
    /// Wrap `model`, feeding it 224x224 RGB images
    pub fn new(model: Box<dyn Classifier>) -> Self {
        let shape = ImageShape::new(PREDICTION_IMAGE_SIZE, PREDICTION_IMAGE_SIZE, 3);
        Self::with_shape(model, shape)
    }

    pub fn with_shape(model: Box<dyn Classifier>, shape: ImageShape) -> Self {
        let names = model.class_names();
        if let Some(name) = names.get(NORMAL_CLASS_INDEX) {
            if name != Diagnosis::Normal.as_str() {
                warn!(
                    "Model '{}' stores class {} as '{}', predictions still report it as Normal",
                    model.name(),
                    NORMAL_CLASS_INDEX,
                    name
                );
            }
        }
        Self { model, shape }
    }

    /// Load a saved [`Network`], sizing inputs from its stored input shape
    ///
    /// Unlike [`PredictionPipeline::new`], which always resizes to 224×224×3,
    /// this follows the model so networks trained at other sizes still work.
    pub fn load(path: &Path) -> Result<Self> {
        let network = Network::load(path)?;
        let [height, width, channels] = network.input_shape();
        info!("Loaded prediction model from {}", path.display());
        Ok(Self::with_shape(
            Box::new(network),
            ImageShape::new(height, width, channels),
        ))
    }

    pub fn shape(&self) -> ImageShape {
        self.shape
    }

    pub fn model(&self) -> &dyn Classifier {
        self.model.as_ref()
    }

    /// Classify the image file at `path`
    pub fn predict(&self, path: &Path) -> Result<Vec<PredictionRecord>> {
        let image = load_image(path, self.shape)?;
        self.classify(&image)
    }

    /// Classify an encoded image (PNG, JPEG or BMP)
    pub fn predict_bytes(&self, bytes: &[u8]) -> Result<Vec<PredictionRecord>> {
        let image = decode_image(bytes, self.shape)?;
        self.classify(&image)
    }

    fn classify(&self, image: &Array3<f32>) -> Result<Vec<PredictionRecord>> {
        let probs = self.model.predict(image)?;
        let index = argmax(probs.iter().copied()).ok_or_else(|| ValidationError::ShapeMismatch {
            expected: vec![1],
            actual: vec![0],
        })?;
        let diagnosis = Diagnosis::from_class_index(index);
        info!("Predicted class {index} ({diagnosis})");
        Ok(vec![diagnosis.into()])
    }
}
