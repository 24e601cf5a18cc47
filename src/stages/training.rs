//! Fine-tuning of the prepared model on the ingested image folders

use tracing::info;

use crate::config::{TrainingConfig, ValidationError};
use crate::data::{Augmentation, DataIterator, ImageBatchIterator, ImageFolder, ImageShape, Subset};
use crate::error::Result;
use crate::model::{
    Classifier, CompileConfig, FitPlan, History, LossKind, Metric, ModelLoader, NetworkLoader,
    OptimizerSpec,
};

/// Learning rate used when recompiling the loaded model
pub const FINE_TUNE_LEARNING_RATE: f32 = 0.001;

/// Whole batches in `samples`; a short final batch is not counted
pub fn steps_for(samples: usize, batch_size: usize) -> usize {
    samples / batch_size.max(1)
}

/// What one call to [`Training::train`] did
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingOutcome {
    pub steps_per_epoch: usize,
    pub validation_steps: usize,
    pub history: History,
}

/// Trains the updated base model and saves the result
pub struct Training {
    config: TrainingConfig,
    loader: Box<dyn ModelLoader>,
    model: Option<Box<dyn Classifier>>,
    train_generator: Option<ImageBatchIterator>,
    valid_generator: Option<ImageBatchIterator>,
}

impl Training {
    pub fn new(config: TrainingConfig) -> Self {
        Self::with_loader(config, Box::new(NetworkLoader))
    }

    pub fn with_loader(config: TrainingConfig, loader: Box<dyn ModelLoader>) -> Self {
        Self {
            config,
            loader,
            model: None,
            train_generator: None,
            valid_generator: None,
        }
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Load `updated_base_model_path` and recompile it with Adam and sparse
    /// categorical cross-entropy
    pub fn get_base_model(&mut self) -> Result<()> {
        let mut model = self.loader.load(&self.config.updated_base_model_path)?;
        model.compile(CompileConfig {
            optimizer: OptimizerSpec::adam(FINE_TUNE_LEARNING_RATE),
            loss: LossKind::SparseCategoricalCrossentropy,
            metrics: vec![Metric::Accuracy],
        });
        info!(
            "Loaded base model '{}' from {}",
            model.name(),
            self.config.updated_base_model_path.display()
        );
        self.model = Some(model);
        Ok(())
    }

    /// Build the shuffled training iterator and the ordered validation
    /// iterator over `training_data`
    pub fn train_valid_generator(&mut self) -> Result<()> {
        let shape = ImageShape::from_dims(&self.config.params_image_size)?;
        let batch_size = self.config.params_batch_size;
        let split = self.config.params_validation_split;
        let seed = self.config.params_seed;

        let valid = ImageFolder::scan(&self.config.training_data, Subset::Validation, split)?;
        self.valid_generator = Some(ImageBatchIterator::new(valid, shape, batch_size, seed));

        let train = ImageFolder::scan(&self.config.training_data, Subset::Training, split)?;
        let mut train = ImageBatchIterator::new(train, shape, batch_size, seed).shuffled();
        if self.config.params_is_augmentation {
            train = train.with_augmentation(Augmentation::default());
        }
        self.train_generator = Some(train);
        Ok(())
    }

    /// Fit for `params_epochs` epochs and save to `trained_model_path`
    ///
    /// Loads the model and builds the iterators first when that has not
    /// happened yet.
    pub fn train(&mut self) -> Result<TrainingOutcome> {
        if self.model.is_none() {
            self.get_base_model()?;
        }
        if self.train_generator.is_none() || self.valid_generator.is_none() {
            self.train_valid_generator()?;
        }
        let (Some(model), Some(train), Some(valid)) = (
            self.model.as_mut(),
            self.train_generator.as_mut(),
            self.valid_generator.as_mut(),
        ) else {
            return Err(ValidationError::EmptyDataset(
                self.config.training_data.display().to_string(),
            )
            .into());
        };

        let batch_size = train.batch_size();
        let steps_per_epoch = steps_for(train.sample_count(), batch_size);
        let validation_steps = steps_for(valid.sample_count(), valid.batch_size());
        if steps_per_epoch == 0 {
            return Err(ValidationError::InsufficientSamples {
                subset: "training",
                samples: train.sample_count(),
                batch_size,
            }
            .into());
        }
        info!(
            "Training for {} epochs: steps_per_epoch={}, validation_steps={}",
            self.config.params_epochs, steps_per_epoch, validation_steps
        );

        model.set_class_names(train.class_names().to_vec());
        let plan = FitPlan {
            epochs: self.config.params_epochs,
            steps_per_epoch,
            validation_steps,
        };
        let history = model.fit(train, Some(valid), &plan)?;

        model.save(&self.config.trained_model_path)?;
        info!("Saved trained model to {}", self.config.trained_model_path.display());

        Ok(TrainingOutcome {
            steps_per_epoch,
            validation_steps,
            history,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_steps_exact_multiple() {
        assert_eq!(steps_for(64, 32), 2);
    }

    #[test]
    fn test_steps_drop_short_batch() {
        assert_eq!(steps_for(80, 32), 2);
        assert_eq!(steps_for(20, 32), 0);
        assert_eq!(steps_for(0, 16), 0);
    }

    proptest! {
        #[test]
        fn prop_steps_are_whole_batches(samples in 0usize..10_000, batch in 1usize..512) {
            let steps = steps_for(samples, batch);
            prop_assert!(steps * batch <= samples);
            prop_assert!((steps + 1) * batch > samples);
        }
    }
}
