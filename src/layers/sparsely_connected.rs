//! Sparsely connected layer
//!
//! Same affine map as the fully connected layer, but only a random subset of
//! (output, input) pairs carries a weight. The subset is sampled once, when the
//! layer is first initialized, and stored in compressed-row form.

use crate::buffer::{DataOrdering, Map};
use crate::distribution::ParameterInitializer;
use crate::error::{NetError, NetResult};
use crate::layers::base::{InitConfig, LayerCore, Trainable};
use crate::layers::parameters::{ParameterLayout, Parameters};
use crate::layers::{Layer, LayerKind};
use crate::optimizers::{Optimizer, OptimizerConfig};
use crate::shape::{Dims, Shape};
use rand::distributions::{Bernoulli, Distribution};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::ops::Range;

/// Construction options of a [`SparselyConnected`] layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SparselyConnectedConfig {
    pub output_size: usize,
    /// Probability that any given (output, input) pair is connected.
    pub connection_probability: f64,
    #[serde(flatten)]
    pub init: InitConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub output_data_ordering: DataOrdering,
}

impl SparselyConnectedConfig {
    pub fn new(output_size: usize, connection_probability: f64) -> Self {
        Self {
            output_size,
            connection_probability,
            init: InitConfig::default(),
            optimizer: OptimizerConfig::None,
            output_data_ordering: DataOrdering::RowMajor,
        }
    }

    pub fn with_init(mut self, init: InitConfig) -> Self {
        self.init = init;
        self
    }

    pub fn with_optimizer(mut self, optimizer: OptimizerConfig) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn validate(&self) -> NetResult<()> {
        if self.output_size == 0 {
            return Err(NetError::InvalidConfig(
                "sparsely_connected output_size must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.connection_probability) {
            return Err(NetError::InvalidConfig(format!(
                "connection_probability must be in [0, 1], got {}",
                self.connection_probability
            )));
        }
        self.init.validate()?;
        self.optimizer.validate()
    }
}

/// Connectivity pattern in compressed sparse row form.
///
/// Row `r` owns weights `row_offsets[r]..row_offsets[r + 1]`; `col_indices`
/// gives the input index of each weight, ascending within a row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SparsityPattern {
    rows: usize,
    cols: usize,
    row_offsets: Vec<usize>,
    col_indices: Vec<usize>,
}

impl SparsityPattern {
    /// Connects each pair independently with probability `p`.
    pub fn sample(rows: usize, cols: usize, p: f64, seed: Option<u64>) -> NetResult<Self> {
        let bernoulli = Bernoulli::new(p)
            .map_err(|e| NetError::InvalidConfig(format!("connection_probability: {}", e)))?;
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut row_offsets = Vec::with_capacity(rows + 1);
        let mut col_indices = Vec::new();
        row_offsets.push(0);
        for _ in 0..rows {
            for col in 0..cols {
                if bernoulli.sample(&mut rng) {
                    col_indices.push(col);
                }
            }
            row_offsets.push(col_indices.len());
        }
        Ok(Self {
            rows,
            cols,
            row_offsets,
            col_indices,
        })
    }

    /// Range of weight indices belonging to output `row`.
    pub fn row(&self, row: usize) -> Range<usize> {
        self.row_offsets[row]..self.row_offsets[row + 1]
    }

    pub fn col_indices(&self) -> &[usize] {
        &self.col_indices
    }

    pub fn connection_count(&self) -> usize {
        self.col_indices.len()
    }

    pub fn is_connected(&self, row: usize, col: usize) -> bool {
        row < self.rows && self.col_indices[self.row(row)].binary_search(&col).is_ok()
    }

    fn matches(&self, rows: usize, cols: usize) -> bool {
        self.rows == rows && self.cols == cols
    }

    fn check(&self) -> NetResult<()> {
        let well_formed = self.row_offsets.len() == self.rows + 1
            && self.row_offsets.first() == Some(&0)
            && self.row_offsets.windows(2).all(|w| w[0] <= w[1])
            && self.row_offsets.last() == Some(&self.col_indices.len())
            && self.col_indices.iter().all(|&c| c < self.cols);
        if well_formed {
            Ok(())
        } else {
            Err(NetError::Codec("malformed sparsity pattern".to_string()))
        }
    }
}

#[derive(Serialize, Deserialize)]
struct SparselyConnectedState {
    config: SparselyConnectedConfig,
    input_shape: Shape,
    pattern: Option<SparsityPattern>,
    parameters: Option<Parameters>,
}

/// Connectivity layer with a fixed random sparsity pattern.
///
/// Only connected pairs hold parameters, so
/// `parameter_count() == connection_count() + output_size`.
pub struct SparselyConnected {
    core: LayerCore,
    config: SparselyConnectedConfig,
    pattern: Option<SparsityPattern>,
    trainable: Trainable,
}

impl SparselyConnected {
    pub fn new(config: SparselyConnectedConfig) -> NetResult<Self> {
        Self::with_state(config, Shape::dynamic(), None, None)
    }

    fn with_state(
        config: SparselyConnectedConfig,
        input_shape: Shape,
        pattern: Option<SparsityPattern>,
        parameters: Option<Parameters>,
    ) -> NetResult<Self> {
        config.validate()?;
        if let Some(pattern) = &pattern {
            pattern.check()?;
        }
        let optimizer = config.optimizer.build()?;
        let trainable = match parameters {
            Some(params) => Trainable::restored(config.init, optimizer, params),
            None => Trainable::new(config.init, optimizer),
        };
        let core = LayerCore::new(
            LayerKind::SparselyConnected,
            input_shape,
            Shape::vector(config.output_size),
        )
        .with_orderings(DataOrdering::RowMajor, config.output_data_ordering);
        Ok(Self {
            core,
            config,
            pattern,
            trainable,
        })
    }

    /// Rebuilds a layer, including its sparsity pattern, from [`Layer::save_state`] output.
    pub fn restore(state: serde_json::Value) -> NetResult<Self> {
        let state: SparselyConnectedState = serde_json::from_value(state)?;
        Self::with_state(
            state.config,
            state.input_shape,
            state.pattern,
            state.parameters,
        )
    }

    pub fn config(&self) -> &SparselyConnectedConfig {
        &self.config
    }

    pub fn pattern(&self) -> Option<&SparsityPattern> {
        self.pattern.as_ref()
    }

    fn ready_pattern(&self) -> NetResult<&SparsityPattern> {
        self.core.ensure_initialized()?;
        self.pattern
            .as_ref()
            .ok_or_else(|| NetError::NotInitialized(LayerKind::SparselyConnected.tag().to_string()))
    }

    /// Number of connected (output, input) pairs.
    pub fn connection_count(&self) -> usize {
        self.pattern.as_ref().map_or(0, |p| p.connection_count())
    }

    /// Fraction of possible pairs that are connected.
    pub fn density(&self) -> f64 {
        match &self.pattern {
            Some(p) if p.rows * p.cols > 0 => p.connection_count() as f64 / (p.rows * p.cols) as f64,
            _ => 0.0,
        }
    }

    pub fn is_connected(&self, row: usize, col: usize) -> bool {
        self.pattern
            .as_ref()
            .map_or(false, |p| p.is_connected(row, col))
    }

    /// One value per connection, in pattern order.
    pub fn weights(&self) -> &[f32] {
        self.trainable.params().weights.values()
    }

    pub fn biases(&self) -> &[f32] {
        self.trainable.params().biases.values()
    }

    pub fn weight_gradient(&self) -> &[f32] {
        self.trainable.params().weights.gradient()
    }

    pub fn bias_gradient(&self) -> &[f32] {
        self.trainable.params().biases.gradient()
    }

    pub fn parameters(&self) -> &Parameters {
        self.trainable.params()
    }

    /// Dense `output_size × input_size` view of the weights, zero where unconnected.
    pub fn dense_weights(&self) -> NetResult<Vec<f32>> {
        let pattern = self.ready_pattern()?;
        let weights = self.weights();
        let mut dense = vec![0.0; pattern.rows * pattern.cols];
        for row in 0..pattern.rows {
            for k in pattern.row(row) {
                dense[row * pattern.cols + pattern.col_indices[k]] = weights[k];
            }
        }
        Ok(dense)
    }

    pub fn set_weights(&mut self, weights: &[f32]) -> NetResult<()> {
        self.core.ensure_initialized()?;
        self.trainable.set_weights(weights, "sparsely_connected weights")
    }

    pub fn set_biases(&mut self, biases: &[f32]) -> NetResult<()> {
        self.core.ensure_initialized()?;
        self.trainable.set_biases(biases, "sparsely_connected biases")
    }

    pub fn optimizer(&self) -> &dyn Optimizer {
        self.trainable.optimizer()
    }

    pub fn set_optimizer(&mut self, optimizer: Box<dyn Optimizer>) {
        self.config.optimizer = optimizer.config();
        self.trainable.set_optimizer(optimizer);
    }

    pub fn set_initializers(
        &mut self,
        weights: Box<dyn ParameterInitializer>,
        biases: Box<dyn ParameterInitializer>,
    ) {
        self.trainable.set_initializers(weights, biases);
    }
}

impl Layer for SparselyConnected {
    fn kind(&self) -> LayerKind {
        LayerKind::SparselyConnected
    }

    fn core(&self) -> &LayerCore {
        &self.core
    }

    /// Samples the pattern on first use; later initializations keep it as long
    /// as the input size is unchanged and only resample the parameters.
    fn initialize(&mut self, input_shape: Option<Shape>) -> NetResult<()> {
        let input = self.core.resolve_input(input_shape)?;
        let (rows, cols) = (self.config.output_size, input.size());

        let pattern = match self.pattern.take() {
            Some(pattern) if pattern.matches(rows, cols) => pattern,
            _ => SparsityPattern::sample(
                rows,
                cols,
                self.config.connection_probability,
                self.config.init.seed.map(|s| s.wrapping_add(2)),
            )?,
        };
        let layout = ParameterLayout {
            weight_len: pattern.connection_count(),
            bias_len: rows,
        };
        self.pattern = Some(pattern);
        self.trainable.initialize(layout, cols)?;
        self.core.allocate(input, Dims::new(rows, 1, 1));
        Ok(())
    }

    fn forward(&mut self, input: &[f32]) -> NetResult<Map<'_>> {
        self.core.begin_forward(input)?;
        self.trainable.cache_input(input, "sparsely_connected input")?;

        let Some(pattern) = self.pattern.as_ref() else {
            return Err(NetError::NotInitialized(self.kind().tag().to_string()));
        };
        let params = self.trainable.params();
        let weights = params.weights.values();
        let biases = params.biases.values();
        let output = self.core.output_mut();
        for (row, out) in output.iter_mut().enumerate() {
            let mut sum = biases[row];
            for k in pattern.row(row) {
                sum += weights[k] * input[pattern.col_indices[k]];
            }
            *out = sum;
        }

        self.core.finish_forward();
        self.core.output_map()
    }

    fn backward(&mut self, output_error: &[f32]) -> NetResult<Map<'_>> {
        self.core.begin_backward(output_error)?;
        self.trainable.observe_error(output_error);
        let Some(pattern) = self.pattern.as_ref() else {
            return Err(NetError::NotInitialized(self.kind().tag().to_string()));
        };

        let (params, input) = self.trainable.parts_mut();
        let input_error = self.core.backward_error_mut();
        input_error.fill(0.0);

        let (weights, weight_gradient) = params.weights.split_mut();
        for (row, &e) in output_error.iter().enumerate() {
            for k in pattern.row(row) {
                let col = pattern.col_indices[k];
                input_error[col] += weights[k] * e;
                weight_gradient[k] += e * input[col];
            }
        }
        for (grad, e) in params.biases.gradient_mut().iter_mut().zip(output_error) {
            *grad += e;
        }

        self.core.backward_error_map()
    }

    fn update(&mut self) -> NetResult<()> {
        self.core.ensure_initialized()?;
        self.trainable.update()
    }

    fn has_parameters(&self) -> bool {
        true
    }

    fn parameter_count(&self) -> usize {
        self.trainable.params().count()
    }

    fn optimizer_name(&self) -> Option<&'static str> {
        Some(self.trainable.optimizer().name())
    }

    fn save_state(&self) -> NetResult<serde_json::Value> {
        let initialized = self.core.is_initialized();
        let state = SparselyConnectedState {
            config: self.config,
            input_shape: self.core.input_shape(),
            pattern: self.pattern.clone(),
            parameters: initialized.then(|| self.trainable.params().clone()),
        };
        Ok(serde_json::to_value(state)?)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{FullyConnected, FullyConnectedConfig};
    use approx::assert_relative_eq;

    fn layer(p: f64, seed: u64) -> SparselyConnected {
        let init = InitConfig {
            init_weight_std: 0.5,
            init_bias_mean: 0.25,
            init_bias_std: 0.0,
            ..InitConfig::seeded(seed)
        };
        let mut layer = SparselyConnected::new(SparselyConnectedConfig::new(4, p).with_init(init)).unwrap();
        layer.initialize(Some(Shape::vector(6))).unwrap();
        layer
    }

    #[test]
    fn test_zero_probability_outputs_bias() {
        let mut layer = layer(0.0, 1);
        assert_eq!(layer.connection_count(), 0);
        assert_eq!(layer.parameter_count(), 4);
        let output = layer.forward(&[3.0, -1.0, 2.0, 8.0, 0.5, 1.0]).unwrap();
        assert_eq!(&output[..], &[0.25; 4]);
    }

    #[test]
    fn test_full_probability_matches_dense() {
        let mut sparse = layer(1.0, 2);
        assert_eq!(sparse.connection_count(), 24);
        assert_relative_eq!(sparse.density(), 1.0);

        let mut dense = FullyConnected::new(FullyConnectedConfig::new(4)).unwrap();
        dense.initialize(Some(Shape::vector(6))).unwrap();
        dense.set_weights(&sparse.dense_weights().unwrap()).unwrap();
        dense.set_biases(sparse.biases()).unwrap();

        let input = [0.1, -0.2, 0.3, 0.4, -0.5, 0.6];
        let expected = dense.forward(&input).unwrap().to_vec();
        let actual = sparse.forward(&input).unwrap().to_vec();
        for (a, e) in actual.iter().zip(&expected) {
            assert_relative_eq!(a, e, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_pattern_is_reproducible_and_kept() {
        let mut a = layer(0.5, 7);
        let b = layer(0.5, 7);
        assert_eq!(a.pattern(), b.pattern());

        let before = a.pattern().cloned();
        a.initialize(Some(Shape::vector(6))).unwrap();
        assert_eq!(a.pattern().cloned(), before);
    }

    #[test]
    fn test_backward_touches_only_connections() {
        let mut layer = layer(0.5, 11);
        let input = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        layer.forward(&input).unwrap();
        let input_error = layer.backward(&[1.0, 1.0, 1.0, 1.0]).unwrap().to_vec();

        let dense = layer.dense_weights().unwrap();
        for col in 0..6 {
            let expected: f32 = (0..4).map(|row| dense[row * 6 + col]).sum();
            assert_relative_eq!(input_error[col], expected, epsilon = 1e-6);
        }
        let pattern = layer.pattern().unwrap();
        for (k, &col) in pattern.col_indices().iter().enumerate() {
            assert_relative_eq!(layer.weight_gradient()[k], input[col]);
        }
        assert_eq!(layer.bias_gradient(), &[1.0; 4]);
    }

    #[test]
    fn test_is_connected_agrees_with_dense_view() {
        let layer = layer(0.3, 5);
        let dense_mask: Vec<bool> = {
            let pattern = layer.pattern().unwrap();
            let mut mask = vec![false; 24];
            for row in 0..4 {
                for k in pattern.row(row) {
                    mask[row * 6 + pattern.col_indices()[k]] = true;
                }
            }
            mask
        };
        for row in 0..4 {
            for col in 0..6 {
                assert_eq!(layer.is_connected(row, col), dense_mask[row * 6 + col]);
            }
        }
        assert!(!layer.is_connected(9, 0));
    }

    #[test]
    fn test_invalid_probability() {
        assert!(matches!(
            SparselyConnected::new(SparselyConnectedConfig::new(2, 1.5)),
            Err(NetError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_restore_keeps_pattern_and_parameters() {
        let layer = layer(0.5, 21);
        let state = layer.save_state().unwrap();
        let mut restored = SparselyConnected::restore(state).unwrap();
        restored.initialize(None).unwrap();
        assert_eq!(restored.pattern(), layer.pattern());
        assert_eq!(restored.weights(), layer.weights());
        assert_eq!(restored.biases(), layer.biases());
    }
}
