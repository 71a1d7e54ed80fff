//! Optimizers that turn accumulated gradients into parameter updates
//!
//! Every connectivity layer owns exactly one optimizer. The layer initializes
//! it with its [`ParameterLayout`], forwards the values of each pass through
//! the [`Optimizer::forward`] / [`Optimizer::backward`] hooks, and calls
//! [`Optimizer::update`] with its own [`Parameters`].
//!
//! # Available Optimizers
//!
//! - [`GradientDescent`]: `param -= learning_rate * gradient`
//! - [`Adam`]: adaptive moment estimation with bias correction
//! - [`NoneOptimizer`]: frozen parameters
//!
//! Whatever the rule, `update` zeroes the layer's gradient accumulators, so
//! gradient accumulation restarts exactly once per update.
//!
//! # Example
//!
//! ```
//! use neural_layers::layers::parameters::{ParameterLayout, Parameters};
//! use neural_layers::optimizers::{GradientDescent, Optimizer};
//!
//! let mut params = Parameters::new(vec![1.0, 2.0], vec![0.0]);
//! params.weights.gradient_mut().copy_from_slice(&[0.5, -0.5]);
//!
//! let mut optimizer = GradientDescent::new(0.1);
//! optimizer.initialize(params.layout());
//! optimizer.update(&mut params).unwrap();
//!
//! assert_eq!(params.weights.values(), &[0.95, 2.05]);
//! assert_eq!(params.weights.gradient(), &[0.0, 0.0]);
//! ```

pub mod adam;
pub mod gradient_descent;
pub mod none;

pub use adam::Adam;
pub use gradient_descent::GradientDescent;
pub use none::NoneOptimizer;

use crate::error::{NetError, NetResult};
use crate::layers::parameters::{ParameterLayout, Parameters};
use serde::{Deserialize, Serialize};

/// Parameter update rule bound to one connectivity layer.
pub trait Optimizer {
    /// Short identifier used in diagnostics.
    fn name(&self) -> &'static str;

    /// Allocates zero-filled state for `layout`, discarding any previous state.
    fn initialize(&mut self, layout: ParameterLayout);

    fn is_initialized(&self) -> bool;

    /// Observes the input of the bound layer's forward pass.
    fn forward(&mut self, _input: &[f32]) {}

    /// Observes the output error of the bound layer's backward pass.
    fn backward(&mut self, _output_error: &[f32]) {}

    /// Applies the accumulated gradient of `params` and zeroes it.
    ///
    /// # Errors
    ///
    /// - `NotInitialized` before [`Optimizer::initialize`]
    /// - `ShapeMismatch` when `params` disagrees with the initialized layout;
    ///   neither the parameters nor the optimizer state are touched in that case
    fn update(&mut self, params: &mut Parameters) -> NetResult<()>;

    /// Zeroes the optimizer state, keeping its layout.
    fn reset(&mut self);

    fn learning_rate(&self) -> f32;

    fn set_learning_rate(&mut self, lr: f32);

    /// Hyper-parameters needed to rebuild an equivalent optimizer.
    fn config(&self) -> OptimizerConfig;
}

fn default_beta1() -> f32 {
    0.9
}

fn default_beta2() -> f32 {
    0.999
}

fn default_epsilon() -> f32 {
    1e-8
}

/// Serializable optimizer selection, tagged by `type`.
///
/// ```json
/// { "type": "adam", "learning_rate": 0.001 }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OptimizerConfig {
    #[default]
    None,
    GradientDescent {
        learning_rate: f32,
    },
    Adam {
        learning_rate: f32,
        #[serde(default = "default_beta1")]
        beta1: f32,
        #[serde(default = "default_beta2")]
        beta2: f32,
        #[serde(default = "default_epsilon")]
        epsilon: f32,
    },
}

impl OptimizerConfig {
    /// Adam with the usual `beta1 = 0.9`, `beta2 = 0.999`, `epsilon = 1e-8`.
    pub fn adam(learning_rate: f32) -> Self {
        OptimizerConfig::Adam {
            learning_rate,
            beta1: default_beta1(),
            beta2: default_beta2(),
            epsilon: default_epsilon(),
        }
    }

    /// Checks hyper-parameter ranges.
    pub fn validate(&self) -> NetResult<()> {
        let check_lr = |lr: f32| {
            if lr.is_finite() && lr > 0.0 {
                Ok(())
            } else {
                Err(NetError::InvalidConfig(format!(
                    "learning_rate must be positive, got {}",
                    lr
                )))
            }
        };
        match *self {
            OptimizerConfig::None => Ok(()),
            OptimizerConfig::GradientDescent { learning_rate } => check_lr(learning_rate),
            OptimizerConfig::Adam {
                learning_rate,
                beta1,
                beta2,
                epsilon,
            } => {
                check_lr(learning_rate)?;
                for (name, beta) in [("beta1", beta1), ("beta2", beta2)] {
                    if !(beta > 0.0 && beta < 1.0) {
                        return Err(NetError::InvalidConfig(format!(
                            "{} must be in (0, 1), got {}",
                            name, beta
                        )));
                    }
                }
                if !(epsilon.is_finite() && epsilon > 0.0) {
                    return Err(NetError::InvalidConfig(format!(
                        "epsilon must be positive, got {}",
                        epsilon
                    )));
                }
                Ok(())
            }
        }
    }

    /// Validates and constructs the optimizer (uninitialized).
    pub fn build(&self) -> NetResult<Box<dyn Optimizer>> {
        self.validate()?;
        Ok(match *self {
            OptimizerConfig::None => Box::new(NoneOptimizer::new()),
            OptimizerConfig::GradientDescent { learning_rate } => {
                Box::new(GradientDescent::new(learning_rate))
            }
            OptimizerConfig::Adam {
                learning_rate,
                beta1,
                beta2,
                epsilon,
            } => Box::new(Adam::new(learning_rate, beta1, beta2, epsilon)),
        })
    }
}

/// Fails with `ShapeMismatch` unless `params` matches the layout the
/// optimizer was initialized with.
pub(crate) fn check_layout(
    optimizer: &str,
    layout: ParameterLayout,
    params: &Parameters,
) -> NetResult<()> {
    let context = |tensor: &str| format!("{} {} state", optimizer, tensor);
    let tensors = [
        ("weight", layout.weight_len, &params.weights),
        ("bias", layout.bias_len, &params.biases),
    ];
    for (tensor, expected, found) in tensors {
        if found.len() != expected {
            return Err(NetError::shape_mismatch(context(tensor), expected, found.len()));
        }
        if found.gradient().len() != expected {
            return Err(NetError::shape_mismatch(
                context(tensor),
                expected,
                found.gradient().len(),
            ));
        }
    }
    Ok(())
}
