//! Adam optimizer bound to one connectivity layer.
//!
//! Keeps a pair of moment vectors per parameter tensor, sized from the
//! [`ParameterLayout`] the layer hands over at initialize.

use crate::error::{NetError, NetResult};
use crate::layers::parameters::{ParameterLayout, ParameterTensor, Parameters};
use crate::optimizers::{check_layout, Optimizer, OptimizerConfig};

/// First and second moment estimates for one parameter tensor.
#[derive(Debug, Clone, Default)]
struct Moments {
    m: Vec<f32>,
    v: Vec<f32>,
}

impl Moments {
    fn zeros(len: usize) -> Self {
        Self {
            m: vec![0.0; len],
            v: vec![0.0; len],
        }
    }

    fn clear(&mut self) {
        self.m.fill(0.0);
        self.v.fill(0.0);
    }
}

/// Adam over a layer's [`Parameters`].
///
/// Each [`Optimizer::update`] first runs `check_layout` on both tensors, so
/// a mismatched gradient leaves values, moments and `t` untouched. Only then
/// does `t` advance, once for the whole layer, and every scalar `p` with
/// accumulated gradient `g` moves by
///
/// ```text
/// m ← β1·m + (1 − β1)·g          v ← β2·v + (1 − β2)·g²
/// p ← p − lr · (m / (1 − β1ᵗ)) / (√(v / (1 − β2ᵗ)) + ε)
/// ```
///
/// after which the gradient accumulator is cleared. Weights and biases
/// therefore always share one bias correction.
///
/// # Example
///
/// ```
/// use neural_layers::layers::parameters::Parameters;
/// use neural_layers::optimizers::{Adam, Optimizer};
///
/// let mut params = Parameters::new(vec![1.0, 2.0], vec![0.0]);
/// params.weights.gradient_mut().copy_from_slice(&[0.1, -0.2]);
///
/// let mut optimizer = Adam::new(0.001, 0.9, 0.999, 1e-8);
/// optimizer.initialize(params.layout());
/// optimizer.update(&mut params).unwrap();
///
/// assert_eq!(optimizer.step(), 1);
/// assert!(params.weights.values()[0] < 1.0);
/// assert!(params.weights.values()[1] > 2.0);
/// ```
///
/// # Reference
///
/// Kingma, D. P., & Ba, J. (2014). Adam: A method for stochastic optimization.
/// arXiv preprint arXiv:1412.6980.
#[derive(Debug, Clone)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    layout: Option<ParameterLayout>,
    weights: Moments,
    biases: Moments,
    /// Updates applied since the last initialize or reset.
    t: u64,
}

impl Adam {
    /// Unbound optimizer; hyper-parameters are checked by
    /// [`OptimizerConfig::validate`], not here.
    pub fn new(learning_rate: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self {
            learning_rate,
            beta1,
            beta2,
            epsilon,
            layout: None,
            weights: Moments::default(),
            biases: Moments::default(),
            t: 0,
        }
    }

    /// Number of updates applied since initialization.
    pub fn step(&self) -> u64 {
        self.t
    }

    /// Raw `(m, v)` estimates for the weight tensor.
    pub fn weight_moments(&self) -> (&[f32], &[f32]) {
        (&self.weights.m, &self.weights.v)
    }

    /// Raw `(m, v)` estimates for the bias tensor.
    pub fn bias_moments(&self) -> (&[f32], &[f32]) {
        (&self.biases.m, &self.biases.v)
    }

    /// Bias-corrected `(m_hat, v_hat)` for the weight tensor at the current step.
    ///
    /// Before the first update both are the raw (zero) estimates.
    pub fn corrected_weight_moments(&self) -> (Vec<f32>, Vec<f32>) {
        let (c1, c2) = self.bias_corrections();
        (
            self.weights.m.iter().map(|m| m / c1).collect(),
            self.weights.v.iter().map(|v| v / c2).collect(),
        )
    }

    fn bias_corrections(&self) -> (f32, f32) {
        if self.t == 0 {
            return (1.0, 1.0);
        }
        let t = i32::try_from(self.t).unwrap_or(i32::MAX);
        (1.0 - self.beta1.powi(t), 1.0 - self.beta2.powi(t))
    }

    fn apply(&self, tensor: &mut ParameterTensor, moments: &mut Moments) {
        let (bias_correction1, bias_correction2) = self.bias_corrections();
        let (values, gradient) = tensor.split_mut();
        for i in 0..values.len() {
            let g = gradient[i];
            moments.m[i] = self.beta1 * moments.m[i] + (1.0 - self.beta1) * g;
            moments.v[i] = self.beta2 * moments.v[i] + (1.0 - self.beta2) * g * g;

            let m_hat = moments.m[i] / bias_correction1;
            let v_hat = moments.v[i] / bias_correction2;

            values[i] -= self.learning_rate * m_hat / (v_hat.sqrt() + self.epsilon);
            gradient[i] = 0.0;
        }
    }
}

impl Optimizer for Adam {
    fn name(&self) -> &'static str {
        "adam"
    }

    fn initialize(&mut self, layout: ParameterLayout) {
        self.layout = Some(layout);
        self.weights = Moments::zeros(layout.weight_len);
        self.biases = Moments::zeros(layout.bias_len);
        self.t = 0;
    }

    fn is_initialized(&self) -> bool {
        self.layout.is_some()
    }

    /// Update parameters using the Adam rule.
    ///
    /// Both tensors are validated before anything changes; `t` then advances
    /// once and the same bias correction is applied to weights and biases.
    fn update(&mut self, params: &mut Parameters) -> NetResult<()> {
        let layout = self
            .layout
            .ok_or_else(|| NetError::NotInitialized(self.name().to_string()))?;
        check_layout(self.name(), layout, params)?;

        self.t += 1;
        let mut weights = std::mem::take(&mut self.weights);
        let mut biases = std::mem::take(&mut self.biases);
        self.apply(&mut params.weights, &mut weights);
        self.apply(&mut params.biases, &mut biases);
        self.weights = weights;
        self.biases = biases;
        Ok(())
    }

    /// Zeroes both moment estimates and the time step.
    fn reset(&mut self) {
        self.weights.clear();
        self.biases.clear();
        self.t = 0;
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, lr: f32) {
        self.learning_rate = lr;
    }

    fn config(&self) -> OptimizerConfig {
        OptimizerConfig::Adam {
            learning_rate: self.learning_rate,
            beta1: self.beta1,
            beta2: self.beta2,
            epsilon: self.epsilon,
        }
    }
}
