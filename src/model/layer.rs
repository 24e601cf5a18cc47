//! Network layers with explicit forward and backward passes
//!
//! Activations are batch-first: `[N, H, W, C]` through the backbone and
//! `[N, features]` after flattening.

use ndarray::{Array2, Array4, ArrayD, ArrayView2, Axis, Ix1, Ix2, Ix4, IxDyn};
use serde::{Deserialize, Serialize};

use crate::config::ValidationError;
use crate::error::Result;

/// Elementwise or row-wise output nonlinearity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Linear,
    Relu,
    Softmax,
}

/// Layer operation and its parameters
#[derive(Debug, Clone, PartialEq)]
pub enum LayerKind {
    /// Non-overlapping `pool x pool` average pooling; trailing rows and
    /// columns that do not fill a window are dropped
    AvgPool2d { pool: usize },
    /// `activation(x * scale + shift)` with one scale and shift per channel
    ChannelAffine {
        scale: ArrayD<f32>,
        shift: ArrayD<f32>,
        activation: Activation,
    },
    Flatten,
    /// `activation(x . weights + bias)`, weights shaped `[in, out]`
    Dense {
        weights: ArrayD<f32>,
        bias: ArrayD<f32>,
        activation: Activation,
    },
}

impl LayerKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            LayerKind::AvgPool2d { .. } => "AveragePooling2D",
            LayerKind::ChannelAffine { .. } => "ChannelAffine",
            LayerKind::Flatten => "Flatten",
            LayerKind::Dense { .. } => "Dense",
        }
    }
}

/// A named layer with a trainable flag
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    pub name: String,
    pub trainable: bool,
    pub kind: LayerKind,
}

/// Gradients produced by [`Layer::backward`]
#[derive(Debug)]
pub struct LayerGrads {
    pub input: ArrayD<f32>,
    /// One entry per parameter, in [`Layer::params`] order
    pub params: Vec<ArrayD<f32>>,
}

fn shape_mismatch(expected: &[usize], actual: &[usize]) -> ValidationError {
    ValidationError::ShapeMismatch {
        expected: expected.to_vec(),
        actual: actual.to_vec(),
    }
}

fn view2(x: &ArrayD<f32>) -> Result<ArrayView2<'_, f32>> {
    x.view()
        .into_dimensionality::<Ix2>()
        .map_err(|_| shape_mismatch(&[0, 0], x.shape()).into())
}

fn reshape(x: ArrayD<f32>, shape: &[usize]) -> Result<ArrayD<f32>> {
    let actual = x.shape().to_vec();
    let x = x.as_standard_layout().into_owned();
    x.into_shape_with_order(IxDyn(shape))
        .map_err(|_| shape_mismatch(shape, &actual).into())
}

fn softmax_rows(z: &mut Array2<f32>) {
    for mut row in z.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        if sum > 0.0 {
            row.mapv_inplace(|v| v / sum);
        }
    }
}

/// Gradient through `activation` given its output `y`
fn activation_backward(activation: Activation, y: &ArrayD<f32>, g: &ArrayD<f32>) -> Result<ArrayD<f32>> {
    match activation {
        Activation::Linear => Ok(g.clone()),
        Activation::Relu => Ok(ndarray::Zip::from(g)
            .and(y)
            .map_collect(|&g, &y| if y > 0.0 { g } else { 0.0 })),
        Activation::Softmax => {
            // dz = y * (g - <g, y>) per row
            let y2 = view2(y)?;
            let g2 = view2(g)?;
            let dot = (&g2 * &y2).sum_axis(Axis(1)).insert_axis(Axis(1));
            Ok((&y2 * &(&g2 - &dot)).into_dyn())
        }
    }
}

/// Sum over every axis but the last
fn sum_to_channels(x: ArrayD<f32>) -> Result<ArrayD<f32>> {
    let channels = x.shape().last().copied().unwrap_or(0);
    let rows = x.len() / channels.max(1);
    let flat = reshape(x, &[rows, channels])?;
    Ok(flat.sum_axis(Axis(0)))
}

impl Layer {
    pub fn new(name: impl Into<String>, kind: LayerKind) -> Self {
        Self {
            name: name.into(),
            trainable: true,
            kind,
        }
    }

    /// Parameters in a fixed order
    pub fn params(&self) -> Vec<&ArrayD<f32>> {
        match &self.kind {
            LayerKind::ChannelAffine { scale, shift, .. } => vec![scale, shift],
            LayerKind::Dense { weights, bias, .. } => vec![weights, bias],
            LayerKind::AvgPool2d { .. } | LayerKind::Flatten => Vec::new(),
        }
    }

    pub fn params_mut(&mut self) -> Vec<&mut ArrayD<f32>> {
        match &mut self.kind {
            LayerKind::ChannelAffine { scale, shift, .. } => vec![scale, shift],
            LayerKind::Dense { weights, bias, .. } => vec![weights, bias],
            LayerKind::AvgPool2d { .. } | LayerKind::Flatten => Vec::new(),
        }
    }

    pub fn param_count(&self) -> usize {
        self.params().iter().map(|p| p.len()).sum()
    }

    /// Per-sample output shape for a per-sample input shape
    pub fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        match &self.kind {
            LayerKind::AvgPool2d { pool } => match *input {
                [h, w, c] if *pool > 0 && h >= *pool && w >= *pool => {
                    Ok(vec![h / pool, w / pool, c])
                }
                _ => Err(shape_mismatch(&[*pool, *pool, 0], input).into()),
            },
            LayerKind::ChannelAffine { scale, .. } => {
                if input.last() == Some(&scale.len()) {
                    Ok(input.to_vec())
                } else {
                    Err(shape_mismatch(&[scale.len()], input).into())
                }
            }
            LayerKind::Flatten => Ok(vec![input.iter().product()]),
            LayerKind::Dense { weights, .. } => match (input, weights.shape()) {
                ([features], [w_in, w_out]) if features == w_in => Ok(vec![*w_out]),
                _ => Err(shape_mismatch(weights.shape(), input).into()),
            },
        }
    }

    pub fn forward(&self, x: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        match &self.kind {
            LayerKind::AvgPool2d { pool } => {
                let p = *pool;
                let x4 = x
                    .view()
                    .into_dimensionality::<Ix4>()
                    .map_err(|_| shape_mismatch(&[0, 0, 0, 0], x.shape()))?;
                let (n, h, w, c) = x4.dim();
                let (oh, ow) = (h / p, w / p);
                let norm = (p * p) as f32;
                let out = Array4::from_shape_fn((n, oh, ow, c), |(b, i, j, ch)| {
                    let mut sum = 0.0;
                    for di in 0..p {
                        for dj in 0..p {
                            sum += x4[[b, i * p + di, j * p + dj, ch]];
                        }
                    }
                    sum / norm
                });
                Ok(out.into_dyn())
            }
            LayerKind::ChannelAffine {
                scale,
                shift,
                activation,
            } => {
                let mut y = x * scale + shift;
                if *activation == Activation::Relu {
                    y.mapv_inplace(|v| v.max(0.0));
                }
                Ok(y)
            }
            LayerKind::Flatten => {
                let n = x.shape().first().copied().unwrap_or(0);
                let features = x.len() / n.max(1);
                reshape(x.clone(), &[n, features])
            }
            LayerKind::Dense {
                weights,
                bias,
                activation,
            } => {
                let x2 = view2(x)?;
                let w2 = view2(weights)?;
                if x2.ncols() != w2.nrows() {
                    return Err(shape_mismatch(weights.shape(), x.shape()).into());
                }
                let b1 = bias
                    .view()
                    .into_dimensionality::<Ix1>()
                    .map_err(|_| shape_mismatch(&[w2.ncols()], bias.shape()))?;
                let mut z = x2.dot(&w2) + &b1;
                match activation {
                    Activation::Linear => {}
                    Activation::Relu => z.mapv_inplace(|v| v.max(0.0)),
                    Activation::Softmax => softmax_rows(&mut z),
                }
                Ok(z.into_dyn())
            }
        }
    }

    /// Backpropagate `grad_out` given the input and output of the forward pass
    pub fn backward(
        &self,
        input: &ArrayD<f32>,
        output: &ArrayD<f32>,
        grad_out: &ArrayD<f32>,
    ) -> Result<LayerGrads> {
        match &self.kind {
            LayerKind::AvgPool2d { pool } => {
                let p = *pool;
                let g4 = grad_out
                    .view()
                    .into_dimensionality::<Ix4>()
                    .map_err(|_| shape_mismatch(output.shape(), grad_out.shape()))?;
                let in_shape = input.shape();
                let mut grad_in = ArrayD::zeros(IxDyn(in_shape));
                let norm = (p * p) as f32;
                let (n, oh, ow, c) = g4.dim();
                for b in 0..n {
                    for i in 0..oh {
                        for j in 0..ow {
                            for ch in 0..c {
                                let g = g4[[b, i, j, ch]] / norm;
                                for di in 0..p {
                                    for dj in 0..p {
                                        grad_in[[b, i * p + di, j * p + dj, ch].as_slice()] += g;
                                    }
                                }
                            }
                        }
                    }
                }
                Ok(LayerGrads {
                    input: grad_in,
                    params: Vec::new(),
                })
            }
            LayerKind::ChannelAffine {
                scale, activation, ..
            } => {
                let g_pre = activation_backward(*activation, output, grad_out)?;
                let d_scale = sum_to_channels(&g_pre * input)?;
                let d_shift = sum_to_channels(g_pre.clone())?;
                Ok(LayerGrads {
                    input: &g_pre * scale,
                    params: vec![d_scale, d_shift],
                })
            }
            LayerKind::Flatten => Ok(LayerGrads {
                input: reshape(grad_out.clone(), input.shape())?,
                params: Vec::new(),
            }),
            LayerKind::Dense {
                weights,
                activation,
                ..
            } => {
                let dz = activation_backward(*activation, output, grad_out)?;
                let dz2 = view2(&dz)?;
                let x2 = view2(input)?;
                let w2 = view2(weights)?;
                let d_weights = x2.t().dot(&dz2);
                let d_bias = dz2.sum_axis(Axis(0));
                let d_input = dz2.dot(&w2.t());
                Ok(LayerGrads {
                    input: d_input.into_dyn(),
                    params: vec![d_weights.into_dyn(), d_bias.into_dyn()],
                })
            }
        }
    }
}
