//! Backbone construction and classifier-head preparation

use ndarray::{ArrayD, IxDyn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use crate::config::{FreezePolicy, PrepareBaseModelConfig, ValidationError};
use crate::error::Result;
use crate::model::{
    glorot_uniform, Activation, Backbone, Classifier, CompileConfig, Layer, LayerKind, LossKind,
    Metric, Network, OptimizerSpec, PooledVgg16,
};

/// Builds the backbone and the fine-tuning model derived from it
pub struct PrepareBaseModel {
    config: PrepareBaseModelConfig,
    backbone: Box<dyn Backbone>,
    model: Option<Network>,
    full_model: Option<Network>,
}

impl PrepareBaseModel {
    pub fn new(config: PrepareBaseModelConfig) -> Self {
        let backbone = Box::new(PooledVgg16::new(config.params_seed));
        Self::with_backbone(config, backbone)
    }

    pub fn with_backbone(config: PrepareBaseModelConfig, backbone: Box<dyn Backbone>) -> Self {
        Self {
            config,
            backbone,
            model: None,
            full_model: None,
        }
    }

    pub fn config(&self) -> &PrepareBaseModelConfig {
        &self.config
    }

    pub fn base_model(&self) -> Option<&Network> {
        self.model.as_ref()
    }

    pub fn full_model(&self) -> Option<&Network> {
        self.full_model.as_ref()
    }

    /// Build the backbone and save it to `base_model_path`
    pub fn get_base_model(&mut self) -> Result<()> {
        let input_shape = input_shape(&self.config.params_image_size)?;
        let model = self.backbone.build(
            input_shape,
            self.config.params_include_top,
            &self.config.params_weights,
        )?;
        info!(
            "Built backbone '{}' with {} layers ({} params)",
            self.backbone.name(),
            model.layers().len(),
            model.param_count()
        );
        model.save(&self.config.base_model_path)?;
        self.model = Some(model);
        Ok(())
    }

    /// Freeze the backbone, add the classifier head, compile, and save to
    /// `updated_base_model_path`
    pub fn update_base_model(&mut self) -> Result<()> {
        let base = match self.model.take() {
            Some(model) => model,
            None => Network::load(&self.config.base_model_path)?,
        };
        self.model = Some(base.clone());

        let full_model = Self::prepare_full_model(
            base,
            self.config.params_classes,
            self.config.freeze_policy,
            self.config.params_learning_rate as f32,
            self.config.params_seed,
        )?;
        full_model.save(&self.config.updated_base_model_path)?;
        self.full_model = Some(full_model);
        Ok(())
    }

    /// Apply `policy` to every existing layer, then append `flatten` and a
    /// `classes`-unit softmax layer compiled with SGD
    pub fn prepare_full_model(
        mut model: Network,
        classes: usize,
        policy: FreezePolicy,
        learning_rate: f32,
        seed: u64,
    ) -> Result<Network> {
        let total = model.layers().len();
        if let FreezePolicy::AllButLast(n) = policy {
            if n > total {
                return Err(ValidationError::InvalidFreezeTill {
                    requested: n,
                    available: total,
                }
                .into());
            }
        }
        for (index, layer) in model.layers_mut().iter_mut().enumerate() {
            layer.trainable = !policy.freezes(index, total);
        }

        let flatten = model.unique_layer_name("flatten");
        model.push(Layer::new(flatten, LayerKind::Flatten))?;
        let features = model.output_units()?;

        let mut rng = StdRng::seed_from_u64(seed);
        let dense = model.unique_layer_name("dense");
        model.push(Layer::new(
            dense,
            LayerKind::Dense {
                weights: glorot_uniform(features, classes, &mut rng),
                bias: ArrayD::zeros(IxDyn(&[classes])),
                activation: Activation::Softmax,
            },
        ))?;

        model.compile(CompileConfig {
            optimizer: OptimizerSpec::sgd(learning_rate),
            loss: LossKind::CategoricalCrossentropy,
            metrics: vec![Metric::Accuracy],
        });
        info!("\n{}", model.summary());
        Ok(model)
    }
}

fn input_shape(dims: &[usize]) -> Result<[usize; 3]> {
    match *dims {
        [h, w, c] => Ok([h, w, c]),
        _ => Err(ValidationError::InvalidImageSize(dims.to_vec()).into()),
    }
}
