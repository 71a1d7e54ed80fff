//! Trainable parameters of connectivity layers.
//!
//! A [`ParameterTensor`] pairs parameter values with a gradient accumulator of
//! the same length. Backward passes add into the accumulator; the bound
//! optimizer consumes it in `update` and zeroes it.

use serde::{Deserialize, Serialize};

/// Parameter values plus their accumulated gradient.
///
/// Only the values are persisted; a restored tensor starts with a zero gradient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<f32>", into = "Vec<f32>")]
pub struct ParameterTensor {
    values: Vec<f32>,
    gradient: Vec<f32>,
}

impl ParameterTensor {
    pub fn zeros(len: usize) -> Self {
        Self::from(vec![0.0; len])
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [f32] {
        &mut self.values
    }

    pub fn gradient(&self) -> &[f32] {
        &self.gradient
    }

    pub fn gradient_mut(&mut self) -> &mut [f32] {
        &mut self.gradient
    }

    /// Values and gradient borrowed together, for in-place update rules.
    pub fn split_mut(&mut self) -> (&mut [f32], &mut [f32]) {
        (&mut self.values, &mut self.gradient)
    }

    pub fn zero_gradient(&mut self) {
        self.gradient.fill(0.0);
    }
}

impl From<Vec<f32>> for ParameterTensor {
    fn from(values: Vec<f32>) -> Self {
        let gradient = vec![0.0; values.len()];
        Self { values, gradient }
    }
}

impl From<ParameterTensor> for Vec<f32> {
    fn from(tensor: ParameterTensor) -> Self {
        tensor.values
    }
}

/// Lengths of the two tensors an optimizer tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParameterLayout {
    pub weight_len: usize,
    pub bias_len: usize,
}

impl ParameterLayout {
    pub fn total(&self) -> usize {
        self.weight_len + self.bias_len
    }
}

/// Weights and biases of one connectivity layer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Parameters {
    pub weights: ParameterTensor,
    pub biases: ParameterTensor,
}

impl Default for ParameterTensor {
    fn default() -> Self {
        Self::zeros(0)
    }
}

impl Parameters {
    pub fn new(weights: Vec<f32>, biases: Vec<f32>) -> Self {
        Self {
            weights: weights.into(),
            biases: biases.into(),
        }
    }

    pub fn zeros(layout: ParameterLayout) -> Self {
        Self {
            weights: ParameterTensor::zeros(layout.weight_len),
            biases: ParameterTensor::zeros(layout.bias_len),
        }
    }

    pub fn layout(&self) -> ParameterLayout {
        ParameterLayout {
            weight_len: self.weights.len(),
            bias_len: self.biases.len(),
        }
    }

    /// Number of trainable scalars.
    pub fn count(&self) -> usize {
        self.layout().total()
    }

    pub fn zero_gradients(&mut self) {
        self.weights.zero_gradient();
        self.biases.zero_gradient();
    }
}
