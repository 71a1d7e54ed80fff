//! Optimizer for frozen layers.

use crate::error::{NetError, NetResult};
use crate::layers::parameters::{ParameterLayout, Parameters};
use crate::optimizers::{check_layout, Optimizer, OptimizerConfig};

/// Leaves parameters untouched.
///
/// The gradient accumulator is still cleared on `update`, so a frozen layer
/// follows the same accumulate/reset cycle as a trainable one.
#[derive(Debug, Clone, Default)]
pub struct NoneOptimizer {
    layout: Option<ParameterLayout>,
}

impl NoneOptimizer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Optimizer for NoneOptimizer {
    fn name(&self) -> &'static str {
        "none"
    }

    fn initialize(&mut self, layout: ParameterLayout) {
        self.layout = Some(layout);
    }

    fn is_initialized(&self) -> bool {
        self.layout.is_some()
    }

    fn update(&mut self, params: &mut Parameters) -> NetResult<()> {
        let layout = self
            .layout
            .ok_or_else(|| NetError::NotInitialized(self.name().to_string()))?;
        check_layout(self.name(), layout, params)?;
        params.zero_gradients();
        Ok(())
    }

    fn reset(&mut self) {}

    fn learning_rate(&self) -> f32 {
        0.0
    }

    fn set_learning_rate(&mut self, _lr: f32) {}

    fn config(&self) -> OptimizerConfig {
        OptimizerConfig::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_keeps_values_and_clears_gradient() {
        let mut params = Parameters::new(vec![1.0, 2.0], vec![3.0]);
        params.weights.gradient_mut().fill(5.0);
        params.biases.gradient_mut().fill(5.0);

        let mut optimizer = NoneOptimizer::new();
        optimizer.initialize(params.layout());
        optimizer.update(&mut params).unwrap();

        assert_eq!(params.weights.values(), &[1.0, 2.0]);
        assert_eq!(params.biases.values(), &[3.0]);
        assert_eq!(params.weights.gradient(), &[0.0, 0.0]);
        assert_eq!(params.biases.gradient(), &[0.0]);
    }

    #[test]
    fn test_none_requires_initialize() {
        let mut params = Parameters::new(vec![1.0], vec![0.0]);
        assert!(NoneOptimizer::new().update(&mut params).is_err());
    }

    #[test]
    fn test_none_ignores_learning_rate() {
        let mut optimizer = NoneOptimizer::new();
        optimizer.set_learning_rate(1.0);
        assert_eq!(optimizer.learning_rate(), 0.0);
    }
}
