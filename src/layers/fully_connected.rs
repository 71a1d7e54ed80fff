//! Fully connected layer
//!
//! Every output is an affine combination of every input: `y = W·x + b`, with
//! `W` stored row-major as `output_size × input_size`.

use crate::buffer::{DataOrdering, Map};
use crate::error::{NetError, NetResult};
use crate::layers::base::{InitConfig, LayerCore, Trainable};
use crate::layers::parameters::{ParameterLayout, Parameters};
use crate::layers::{Layer, LayerKind};
use crate::distribution::ParameterInitializer;
use crate::optimizers::{Optimizer, OptimizerConfig};
use crate::shape::{Dims, Shape};
use serde::{Deserialize, Serialize};
use std::any::Any;

/// Construction options of a [`FullyConnected`] layer.
///
/// ```json
/// {
///     "output_size": 16,
///     "init_weight_std": 0.1,
///     "seed": 42,
///     "optimizer": { "type": "adam", "learning_rate": 0.001 }
/// }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FullyConnectedConfig {
    pub output_size: usize,
    #[serde(flatten)]
    pub init: InitConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub output_data_ordering: DataOrdering,
}

impl FullyConnectedConfig {
    pub fn new(output_size: usize) -> Self {
        Self {
            output_size,
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
                "fully_connected output_size must be positive".to_string(),
            ));
        }
        self.init.validate()?;
        self.optimizer.validate()
    }
}

#[derive(Serialize, Deserialize)]
struct FullyConnectedState {
    config: FullyConnectedConfig,
    input_shape: Shape,
    parameters: Option<Parameters>,
}

/// Dense connectivity layer.
///
/// # Example
///
/// ```
/// use neural_layers::layers::{FullyConnected, FullyConnectedConfig, Layer};
/// use neural_layers::shape::Shape;
///
/// let mut layer = FullyConnected::new(FullyConnectedConfig::new(4)).unwrap();
/// layer.initialize(Some(Shape::vector(3))).unwrap();
/// assert_eq!(layer.parameter_count(), 3 * 4 + 4);
/// ```
pub struct FullyConnected {
    core: LayerCore,
    config: FullyConnectedConfig,
    trainable: Trainable,
}

impl FullyConnected {
    /// Creates an uninitialized layer; the input size is resolved at
    /// [`Layer::initialize`].
    pub fn new(config: FullyConnectedConfig) -> NetResult<Self> {
        Self::with_input(config, Shape::dynamic(), None)
    }

    fn with_input(
        config: FullyConnectedConfig,
        input_shape: Shape,
        parameters: Option<Parameters>,
    ) -> NetResult<Self> {
        config.validate()?;
        let optimizer = config.optimizer.build()?;
        let trainable = match parameters {
            Some(params) => Trainable::restored(config.init, optimizer, params),
            None => Trainable::new(config.init, optimizer),
        };
        let core = LayerCore::new(
            LayerKind::FullyConnected,
            input_shape,
            Shape::vector(config.output_size),
        )
        .with_orderings(DataOrdering::RowMajor, config.output_data_ordering);
        Ok(Self {
            core,
            config,
            trainable,
        })
    }

    /// Rebuilds a layer from [`Layer::save_state`] output.
    pub fn restore(state: serde_json::Value) -> NetResult<Self> {
        let state: FullyConnectedState = serde_json::from_value(state)?;
        Self::with_input(state.config, state.input_shape, state.parameters)
    }

    pub fn config(&self) -> &FullyConnectedConfig {
        &self.config
    }

    fn sizes(&self) -> NetResult<(usize, usize)> {
        Ok((self.core.output_dims()?.size(), self.core.input_dims()?.size()))
    }

    /// Row-major `output_size × input_size` weight matrix.
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

    pub fn set_weights(&mut self, weights: &[f32]) -> NetResult<()> {
        self.core.ensure_initialized()?;
        self.trainable.set_weights(weights, "fully_connected weights")
    }

    pub fn set_biases(&mut self, biases: &[f32]) -> NetResult<()> {
        self.core.ensure_initialized()?;
        self.trainable.set_biases(biases, "fully_connected biases")
    }

    pub fn optimizer(&self) -> &dyn Optimizer {
        self.trainable.optimizer()
    }

    pub fn set_optimizer(&mut self, optimizer: Box<dyn Optimizer>) {
        self.config.optimizer = optimizer.config();
        self.trainable.set_optimizer(optimizer);
    }

    /// Overrides the configured initial distribution for later initializations.
    pub fn set_initializers(
        &mut self,
        weights: Box<dyn ParameterInitializer>,
        biases: Box<dyn ParameterInitializer>,
    ) {
        self.trainable.set_initializers(weights, biases);
    }
}

impl Layer for FullyConnected {
    fn kind(&self) -> LayerKind {
        LayerKind::FullyConnected
    }

    fn core(&self) -> &LayerCore {
        &self.core
    }

    fn initialize(&mut self, input_shape: Option<Shape>) -> NetResult<()> {
        let input = self.core.resolve_input(input_shape)?;
        let (rows, cols) = (self.config.output_size, input.size());
        self.trainable.initialize(
            ParameterLayout {
                weight_len: rows * cols,
                bias_len: rows,
            },
            cols,
        )?;
        self.core.allocate(input, Dims::new(rows, 1, 1));
        Ok(())
    }

    fn forward(&mut self, input: &[f32]) -> NetResult<Map<'_>> {
        self.core.begin_forward(input)?;
        let (rows, cols) = self.sizes()?;
        self.trainable.cache_input(input, "fully_connected input")?;

        let params = self.trainable.params();
        let weights = params.weights.values();
        let biases = params.biases.values();
        let output = self.core.output_mut();
        for i in 0..rows {
            let row = &weights[i * cols..(i + 1) * cols];
            output[i] = biases[i] + row.iter().zip(input).map(|(w, x)| w * x).sum::<f32>();
        }

        self.core.finish_forward();
        self.core.output_map()
    }

    /// Computes `Wᵀ·e` and accumulates `e·xᵀ` into the weight gradient and
    /// `e` into the bias gradient.
    fn backward(&mut self, output_error: &[f32]) -> NetResult<Map<'_>> {
        self.core.begin_backward(output_error)?;
        let (rows, cols) = self.sizes()?;
        self.trainable.observe_error(output_error);

        let (params, input) = self.trainable.parts_mut();
        let input_error = self.core.backward_error_mut();
        input_error.fill(0.0);

        let (weights, weight_gradient) = params.weights.split_mut();
        for i in 0..rows {
            let e = output_error[i];
            let row = &weights[i * cols..(i + 1) * cols];
            let grad_row = &mut weight_gradient[i * cols..(i + 1) * cols];
            for j in 0..cols {
                input_error[j] += row[j] * e;
                grad_row[j] += e * input[j];
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
        let state = FullyConnectedState {
            config: self.config,
            input_shape: self.core.input_shape(),
            parameters: self
                .core
                .is_initialized()
                .then(|| self.trainable.params().clone()),
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
