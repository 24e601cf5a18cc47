//! Cross-entropy losses over softmax outputs

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::config::ValidationError;
use crate::error::Result;

/// Probabilities are clipped to `[EPSILON, 1 - EPSILON]` before the log
pub const EPSILON: f32 = 1e-7;

/// Which cross-entropy the model was compiled with
///
/// Labels always arrive as class indices. `Categorical` treats them as the
/// one-hot vectors they index, which gives the same value and gradient as
/// `SparseCategorical`; the distinction is kept so a saved model records
/// what it was compiled with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossKind {
    CategoricalCrossentropy,
    SparseCategoricalCrossentropy,
}

impl LossKind {
    pub fn name(&self) -> &'static str {
        match self {
            LossKind::CategoricalCrossentropy => "categorical_crossentropy",
            LossKind::SparseCategoricalCrossentropy => "sparse_categorical_crossentropy",
        }
    }

    /// Mean loss over the batch and its gradient with respect to `probs`
    pub fn forward(&self, probs: &Array2<f32>, labels: &[usize]) -> Result<(f64, Array2<f32>)> {
        let (n, classes) = probs.dim();
        if labels.len() != n {
            return Err(ValidationError::ShapeMismatch {
                expected: vec![n],
                actual: vec![labels.len()],
            }
            .into());
        }

        let mut grad = Array2::zeros((n, classes));
        let mut total = 0.0f64;
        for (i, &label) in labels.iter().enumerate() {
            if label >= classes {
                return Err(ValidationError::LabelOutOfRange { label, classes }.into());
            }
            let p = probs[[i, label]];
            let clipped = p.clamp(EPSILON, 1.0 - EPSILON);
            total -= f64::from(clipped).ln();
            if p > EPSILON && p < 1.0 - EPSILON {
                grad[[i, label]] = -1.0 / (clipped * n as f32);
            }
        }

        let mean = if n == 0 { 0.0 } else { total / n as f64 };
        Ok((mean, grad))
    }
}

/// Number of rows whose argmax equals the label
pub fn correct_predictions(probs: &Array2<f32>, labels: &[usize]) -> usize {
    probs
        .rows()
        .into_iter()
        .zip(labels)
        .filter(|(row, label)| argmax(row.iter().copied()) == Some(**label))
        .count()
}

/// Index of the largest value; the first one wins ties
pub fn argmax(values: impl IntoIterator<Item = f32>) -> Option<usize> {
    values
        .into_iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}
