//! Plain gradient descent
//!
//! Performs the basic update `parameter = parameter - learning_rate * gradient`
//! on the weights and biases of the bound layer.

use crate::error::{NetError, NetResult};
use crate::layers::parameters::{ParameterLayout, Parameters};
use crate::optimizers::{check_layout, Optimizer, OptimizerConfig};

/// Gradient descent without momentum.
///
/// `w = w - η * ∇L/∂w`
///
/// The gradient is whatever the layer accumulated since the previous update:
/// one sample when updating every sample, the sum over the batch otherwise.
///
/// # Example
///
/// ```
/// use neural_layers::layers::parameters::Parameters;
/// use neural_layers::optimizers::{GradientDescent, Optimizer};
///
/// let mut params = Parameters::new(vec![1.0, 2.0, 3.0], vec![0.0]);
/// params.weights.gradient_mut().copy_from_slice(&[1.0, 2.0, 3.0]);
///
/// let mut optimizer = GradientDescent::new(0.5);
/// optimizer.initialize(params.layout());
/// optimizer.update(&mut params).unwrap();
/// assert_eq!(params.weights.values(), &[0.5, 1.0, 1.5]);
/// ```
#[derive(Debug, Clone)]
pub struct GradientDescent {
    learning_rate: f32,
    layout: Option<ParameterLayout>,
    /// Backward passes seen since the last update.
    pending_samples: usize,
}

impl GradientDescent {
    /// Creates the optimizer; call [`Optimizer::initialize`] before updating.
    ///
    /// # Arguments
    ///
    /// * `learning_rate` - Step size (must be positive, see [`OptimizerConfig::validate`])
    pub fn new(learning_rate: f32) -> Self {
        Self {
            learning_rate,
            layout: None,
            pending_samples: 0,
        }
    }

    /// Number of backward passes accumulated into the gradient since the last update.
    pub fn pending_samples(&self) -> usize {
        self.pending_samples
    }
}

impl Optimizer for GradientDescent {
    fn name(&self) -> &'static str {
        "gradient_descent"
    }

    fn initialize(&mut self, layout: ParameterLayout) {
        self.layout = Some(layout);
        self.pending_samples = 0;
    }

    fn is_initialized(&self) -> bool {
        self.layout.is_some()
    }

    fn backward(&mut self, _output_error: &[f32]) {
        self.pending_samples += 1;
    }

    /// Applies `parameter[i] -= learning_rate * gradient[i]` to both tensors.
    fn update(&mut self, params: &mut Parameters) -> NetResult<()> {
        let layout = self
            .layout
            .ok_or_else(|| NetError::NotInitialized(self.name().to_string()))?;
        check_layout(self.name(), layout, params)?;

        for tensor in [&mut params.weights, &mut params.biases] {
            let (values, gradient) = tensor.split_mut();
            for (value, grad) in values.iter_mut().zip(gradient.iter_mut()) {
                *value -= self.learning_rate * *grad;
                *grad = 0.0;
            }
        }
        self.pending_samples = 0;
        Ok(())
    }

    fn reset(&mut self) {
        self.pending_samples = 0;
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, lr: f32) {
        self.learning_rate = lr;
    }

    fn config(&self) -> OptimizerConfig {
        OptimizerConfig::GradientDescent {
            learning_rate: self.learning_rate,
        }
    }
}
