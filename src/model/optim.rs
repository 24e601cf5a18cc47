//! Gradient-descent optimizers
//!
//! Optimizer state is keyed by parameter slot (`layer_index * 2 +
//! param_index`), so frozen layers simply never touch their slots.

use std::collections::HashMap;

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

/// Serializable optimizer choice recorded at compile time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum OptimizerSpec {
    Sgd { learning_rate: f32, momentum: f32 },
    Adam {
        learning_rate: f32,
        beta1: f32,
        beta2: f32,
        epsilon: f32,
    },
}

impl OptimizerSpec {
    pub fn sgd(learning_rate: f32) -> Self {
        OptimizerSpec::Sgd {
            learning_rate,
            momentum: 0.0,
        }
    }

    /// Adam with the usual defaults
    pub fn adam(learning_rate: f32) -> Self {
        OptimizerSpec::Adam {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
        }
    }

    pub fn learning_rate(&self) -> f32 {
        match self {
            OptimizerSpec::Sgd { learning_rate, .. } | OptimizerSpec::Adam { learning_rate, .. } => {
                *learning_rate
            }
        }
    }

    /// Fresh optimizer state for this spec
    pub fn build(&self) -> Box<dyn Optimizer> {
        match *self {
            OptimizerSpec::Sgd {
                learning_rate,
                momentum,
            } => Box::new(Sgd::new(learning_rate, momentum)),
            OptimizerSpec::Adam {
                learning_rate,
                beta1,
                beta2,
                epsilon,
            } => Box::new(Adam::new(learning_rate, beta1, beta2, epsilon)),
        }
    }
}

/// Trait for optimization algorithms
pub trait Optimizer {
    /// Called once per batch before any `update`
    fn begin_step(&mut self) {}

    /// Apply one update to the parameter in `slot`
    fn update(&mut self, slot: usize, param: &mut ArrayD<f32>, grad: &ArrayD<f32>);

    fn lr(&self) -> f32;

    fn set_lr(&mut self, lr: f32);
}

/// SGD optimizer with optional momentum
pub struct Sgd {
    lr: f32,
    momentum: f32,
    velocities: HashMap<usize, ArrayD<f32>>,
}

impl Sgd {
    pub fn new(lr: f32, momentum: f32) -> Self {
        Self {
            lr,
            momentum,
            velocities: HashMap::new(),
        }
    }
}

impl Optimizer for Sgd {
    fn update(&mut self, slot: usize, param: &mut ArrayD<f32>, grad: &ArrayD<f32>) {
        if self.momentum > 0.0 {
            // v = momentum * v - lr * grad
            let velocity = match self.velocities.remove(&slot) {
                Some(v) => v * self.momentum - grad * self.lr,
                None => grad * (-self.lr),
            };
            *param += &velocity;
            self.velocities.insert(slot, velocity);
        } else {
            param.scaled_add(-self.lr, grad);
        }
    }

    fn lr(&self) -> f32 {
        self.lr
    }

    fn set_lr(&mut self, lr: f32) {
        self.lr = lr;
    }
}

/// Adam optimizer (Adaptive Moment Estimation)
pub struct Adam {
    lr: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    t: i32,
    moments: HashMap<usize, (ArrayD<f32>, ArrayD<f32>)>,
}

impl Adam {
    pub fn new(lr: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self {
            lr,
            beta1,
            beta2,
            epsilon,
            t: 0,
            moments: HashMap::new(),
        }
    }
}

impl Optimizer for Adam {
    fn begin_step(&mut self) {
        self.t += 1;
    }

    fn update(&mut self, slot: usize, param: &mut ArrayD<f32>, grad: &ArrayD<f32>) {
        let t = self.t.max(1);
        let lr_t = self.lr * (1.0 - self.beta2.powi(t)).sqrt() / (1.0 - self.beta1.powi(t));

        let (m, v) = self
            .moments
            .entry(slot)
            .or_insert_with(|| (ArrayD::zeros(grad.raw_dim()), ArrayD::zeros(grad.raw_dim())));

        // m_t = β1 * m_{t-1} + (1 - β1) * g
        m.zip_mut_with(grad, |m, &g| *m = self.beta1 * *m + (1.0 - self.beta1) * g);
        // v_t = β2 * v_{t-1} + (1 - β2) * g²
        v.zip_mut_with(grad, |v, &g| *v = self.beta2 * *v + (1.0 - self.beta2) * g * g);

        // θ_t = θ_{t-1} - lr_t * m_t / (√v_t + ε)
        let epsilon = self.epsilon;
        ndarray::Zip::from(param)
            .and(&*m)
            .and(&*v)
            .for_each(|p, &m, &v| *p -= lr_t * m / (v.sqrt() + epsilon));
    }

    fn lr(&self) -> f32 {
        self.lr
    }

    fn set_lr(&mut self, lr: f32) {
        self.lr = lr;
    }
}
