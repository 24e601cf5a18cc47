//! Pretrained feature extractors used for transfer learning

use ndarray::{ArrayD, IxDyn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use super::layer::{Activation, Layer, LayerKind};
use super::network::{ModelMetadata, Network};
use crate::config::{ValidationError, WeightSource};
use crate::error::Result;

/// Units of the classification top that ships with the backbone
pub const TOP_CLASSES: usize = 1000;

/// Seed behind the bundled top-layer weights
const BUNDLED_SEED: u64 = 16;

/// Glorot-uniform `[fan_in, fan_out]` matrix, `limit = sqrt(6 / (in + out))`
pub fn glorot_uniform(fan_in: usize, fan_out: usize, rng: &mut impl Rng) -> ArrayD<f32> {
    let limit = (6.0 / (fan_in + fan_out).max(1) as f32).sqrt();
    ArrayD::from_shape_simple_fn(IxDyn(&[fan_in, fan_out]), || rng.random_range(-limit..=limit))
}

/// Builds a feature extractor network
pub trait Backbone {
    fn name(&self) -> &str;

    /// Build for `input_shape` (`[h, w, c]`), optionally with the
    /// classification top, initialised from `weights`
    fn build(&self, input_shape: [usize; 3], include_top: bool, weights: &WeightSource) -> Result<Network>;
}

/// VGG16-shaped backbone: five blocks, each a 2x2 average pool followed by
/// a per-channel affine ReLU layer
#[derive(Debug, Clone)]
pub struct PooledVgg16 {
    seed: u64,
}

impl PooledVgg16 {
    pub const BLOCKS: usize = 5;

    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    fn blocks(&self, network: &mut Network, rng: Option<&mut StdRng>) -> Result<()> {
        let channels = network.input_shape()[2];
        let mut rng = rng;
        for block in 1..=Self::BLOCKS {
            network.push(Layer::new(format!("block{block}_pool"), LayerKind::AvgPool2d { pool: 2 }))?;
            let (scale, shift) = match rng.as_deref_mut() {
                Some(rng) => (
                    ArrayD::from_shape_simple_fn(IxDyn(&[channels]), || rng.random_range(0.8f32..1.2)),
                    ArrayD::from_shape_simple_fn(IxDyn(&[channels]), || rng.random_range(-0.05f32..0.05)),
                ),
                None => (
                    ArrayD::ones(IxDyn(&[channels])),
                    ArrayD::zeros(IxDyn(&[channels])),
                ),
            };
            network.push(Layer::new(
                format!("block{block}_affine"),
                LayerKind::ChannelAffine {
                    scale,
                    shift,
                    activation: Activation::Relu,
                },
            ))?;
        }
        Ok(())
    }

    fn top(network: &mut Network, rng: &mut StdRng) -> Result<()> {
        network.push(Layer::new("flatten", LayerKind::Flatten))?;
        let features = network.output_units()?;
        network.push(Layer::new(
            "predictions",
            LayerKind::Dense {
                weights: glorot_uniform(features, TOP_CLASSES, rng),
                bias: ArrayD::zeros(IxDyn(&[TOP_CLASSES])),
                activation: Activation::Softmax,
            },
        ))
    }

    fn from_file(&self, path: &std::path::Path, input_shape: [usize; 3], include_top: bool) -> Result<Network> {
        let mut network = Network::load(path)?;
        if network.input_shape() != input_shape {
            return Err(ValidationError::ShapeMismatch {
                expected: input_shape.to_vec(),
                actual: network.input_shape().to_vec(),
            }
            .into());
        }
        if !include_top {
            if let Some(flatten) = network
                .layers()
                .iter()
                .position(|l| l.kind == LayerKind::Flatten)
            {
                network.truncate(flatten);
            }
        }
        Ok(network)
    }
}

impl Default for PooledVgg16 {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_SEED)
    }
}

impl Backbone for PooledVgg16 {
    fn name(&self) -> &str {
        "vgg16"
    }

    fn build(&self, input_shape: [usize; 3], include_top: bool, weights: &WeightSource) -> Result<Network> {
        if let WeightSource::File(path) = weights {
            info!("Loading backbone weights from {}", path.display());
            return self.from_file(path, input_shape, include_top);
        }

        let mut network = Network::new(ModelMetadata::new(self.name(), self.name()), input_shape);
        let mut rng = match weights {
            WeightSource::Random => StdRng::seed_from_u64(self.seed),
            _ => StdRng::seed_from_u64(BUNDLED_SEED),
        };
        let random = matches!(weights, WeightSource::Random);
        self.blocks(&mut network, random.then_some(&mut rng))?;
        if include_top {
            Self::top(&mut network, &mut rng)?;
        }
        Ok(network)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Classifier;
    use tempfile::TempDir;

    #[test]
    fn test_glorot_bounds() {
        let mut rng = StdRng::seed_from_u64(1);
        let w = glorot_uniform(10, 6, &mut rng);
        let limit = (6.0f32 / 16.0).sqrt();
        assert_eq!(w.shape(), &[10, 6]);
        assert!(w.iter().all(|v| v.abs() <= limit));
    }

    #[test]
    fn test_backbone_without_top() {
        let net = PooledVgg16::default()
            .build([224, 224, 3], false, &WeightSource::Bundled)
            .unwrap();
        assert_eq!(net.layers().len(), 2 * PooledVgg16::BLOCKS);
        assert_eq!(net.output_shape().unwrap(), vec![7, 7, 3]);
        assert_eq!(net.layers()[1].name, "block1_affine");
    }

    #[test]
    fn test_backbone_with_top() {
        let net = PooledVgg16::default()
            .build([64, 64, 3], true, &WeightSource::Bundled)
            .unwrap();
        assert_eq!(net.output_units().unwrap(), TOP_CLASSES);
        assert_eq!(net.layers().last().unwrap().name, "predictions");
    }

    #[test]
    fn test_input_too_small() {
        assert!(PooledVgg16::default()
            .build([16, 16, 3], false, &WeightSource::Bundled)
            .is_err());
    }

    #[test]
    fn test_random_weights_are_seeded() {
        let a = PooledVgg16::new(7).build([32, 32, 3], false, &WeightSource::Random).unwrap();
        let b = PooledVgg16::new(7).build([32, 32, 3], false, &WeightSource::Random).unwrap();
        let c = PooledVgg16::new(8).build([32, 32, 3], false, &WeightSource::Random).unwrap();
        assert_eq!(a.layers(), b.layers());
        assert_ne!(a.layers(), c.layers());
    }

    #[test]
    fn test_weights_from_file_drop_top() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("vgg16.json");
        PooledVgg16::default()
            .build([32, 32, 3], true, &WeightSource::Bundled)
            .unwrap()
            .save(&path)
            .unwrap();

        let source = WeightSource::File(path);
        let net = PooledVgg16::default().build([32, 32, 3], false, &source).unwrap();
        assert_eq!(net.layers().len(), 2 * PooledVgg16::BLOCKS);
        assert!(PooledVgg16::default().build([64, 64, 3], false, &source).is_err());
    }
}
