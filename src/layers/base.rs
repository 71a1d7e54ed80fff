//! State shared by every layer kind.
//!
//! [`LayerCore`] holds the resolved shapes, the two owned buffers and the
//! lifecycle flags. [`Trainable`] adds what connectivity layers have in
//! common: parameters, the bound optimizer, initializers and the cached input
//! of the last forward pass.

use crate::buffer::{Buffer, DataOrdering, Map};
use crate::distribution::{self, ParameterInitializer};
use crate::error::{NetError, NetResult};
use crate::layers::parameters::{ParameterLayout, Parameters};
use crate::layers::LayerKind;
use crate::optimizers::Optimizer;
use crate::shape::{Dims, Shape};
use serde::{Deserialize, Serialize};

/// Shapes, buffers and lifecycle state of one layer.
#[derive(Debug)]
pub struct LayerCore {
    kind: LayerKind,
    input_shape: Shape,
    output_shape: Shape,
    input_ordering: DataOrdering,
    output_ordering: DataOrdering,
    output: Buffer,
    backward_error: Buffer,
    initialized: bool,
    forward_done: bool,
}

impl LayerCore {
    pub fn new(kind: LayerKind, input_shape: Shape, output_shape: Shape) -> Self {
        Self {
            kind,
            input_shape,
            output_shape,
            input_ordering: DataOrdering::RowMajor,
            output_ordering: DataOrdering::RowMajor,
            output: Buffer::default(),
            backward_error: Buffer::default(),
            initialized: false,
            forward_done: false,
        }
    }

    pub fn with_orderings(mut self, input: DataOrdering, output: DataOrdering) -> Self {
        self.input_ordering = input;
        self.output_ordering = output;
        self
    }

    pub fn kind(&self) -> LayerKind {
        self.kind
    }

    pub fn input_shape(&self) -> Shape {
        self.input_shape
    }

    pub fn output_shape(&self) -> Shape {
        self.output_shape
    }

    pub fn input_ordering(&self) -> DataOrdering {
        self.input_ordering
    }

    pub fn output_ordering(&self) -> DataOrdering {
        self.output_ordering
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Resolves the declared input shape against the one supplied by the
    /// previous layer.
    ///
    /// Shapes that disagree component-wise are still accepted when the
    /// supplied shape has the same number of elements: the flat data is then
    /// re-viewed through the declared shape.
    pub fn resolve_input(&self, supplied: Option<Shape>) -> NetResult<Dims> {
        let context = format!("{} input", self.kind);
        let shape = match supplied {
            None => self.input_shape,
            Some(supplied) => match self.input_shape.resolve(&supplied, &context) {
                Ok(shape) => shape,
                Err(err) => match supplied.size() {
                    Some(len) => self.input_shape.bind_len(len, &context).map_err(|_| err)?,
                    None => return Err(err),
                },
            },
        };
        shape.require_dims(self.kind.tag())
    }

    /// Records the resolved shapes and (re)allocates both buffers.
    pub fn allocate(&mut self, input: Dims, output: Dims) {
        self.input_shape = input.into();
        self.output_shape = output.into();
        self.output = Buffer::zeros(output.size());
        self.backward_error = Buffer::zeros(input.size());
        self.initialized = true;
        self.forward_done = false;
    }

    pub fn ensure_initialized(&self) -> NetResult<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(NetError::NotInitialized(self.kind.tag().to_string()))
        }
    }

    pub fn input_dims(&self) -> NetResult<Dims> {
        self.ensure_initialized()?;
        self.input_shape.require_dims(self.kind.tag())
    }

    pub fn output_dims(&self) -> NetResult<Dims> {
        self.ensure_initialized()?;
        self.output_shape.require_dims(self.kind.tag())
    }

    /// Checks readiness and the length of a forward input.
    pub fn begin_forward(&self, input: &[f32]) -> NetResult<()> {
        let expected = self.input_dims()?.size();
        if input.len() != expected {
            return Err(NetError::shape_mismatch(
                format!("{} input", self.kind),
                expected,
                input.len(),
            ));
        }
        Ok(())
    }

    /// Checks readiness, the error length and that a forward pass happened.
    pub fn begin_backward(&self, output_error: &[f32]) -> NetResult<()> {
        let expected = self.output_dims()?.size();
        if output_error.len() != expected {
            return Err(NetError::shape_mismatch(
                format!("{} output error", self.kind),
                expected,
                output_error.len(),
            ));
        }
        if !self.forward_done {
            return Err(NetError::MissingCache {
                layer: self.kind.tag().to_string(),
                what: "forward input",
            });
        }
        Ok(())
    }

    pub fn finish_forward(&mut self) {
        self.forward_done = true;
    }

    pub fn has_forward(&self) -> bool {
        self.forward_done
    }

    pub fn output_mut(&mut self) -> &mut [f32] {
        self.output.as_mut_slice()
    }

    pub fn backward_error_mut(&mut self) -> &mut [f32] {
        self.backward_error.as_mut_slice()
    }

    pub fn output_map(&self) -> NetResult<Map<'_>> {
        let dims = self.output_dims()?;
        self.output.map(dims, self.output_ordering)
    }

    pub fn backward_error_map(&self) -> NetResult<Map<'_>> {
        let dims = self.input_dims()?;
        self.backward_error.map(dims, self.input_ordering)
    }
}

fn default_init_std() -> f32 {
    1e-3
}

/// Initial parameter distribution of a connectivity layer.
///
/// Flattened into each connectivity layer's configuration, so the JSON fields
/// are `init_weight_mean`, `init_weight_std`, `init_bias_mean`,
/// `init_bias_std` and `seed`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InitConfig {
    #[serde(default)]
    pub init_weight_mean: f32,
    #[serde(default = "default_init_std")]
    pub init_weight_std: f32,
    #[serde(default)]
    pub init_bias_mean: f32,
    #[serde(default = "default_init_std")]
    pub init_bias_std: f32,
    /// Makes initialization reproducible; biases use `seed + 1`.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            init_weight_mean: 0.0,
            init_weight_std: default_init_std(),
            init_bias_mean: 0.0,
            init_bias_std: default_init_std(),
            seed: None,
        }
    }
}

impl InitConfig {
    /// Every parameter starts at zero.
    pub fn zeros() -> Self {
        Self {
            init_weight_std: 0.0,
            init_bias_std: 0.0,
            ..Self::default()
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> NetResult<()> {
        for (name, std) in [
            ("init_weight_std", self.init_weight_std),
            ("init_bias_std", self.init_bias_std),
        ] {
            if !(std.is_finite() && std >= 0.0) {
                return Err(NetError::InvalidConfig(format!(
                    "{} must be non-negative, got {}",
                    name, std
                )));
            }
        }
        for (name, mean) in [
            ("init_weight_mean", self.init_weight_mean),
            ("init_bias_mean", self.init_bias_mean),
        ] {
            if !mean.is_finite() {
                return Err(NetError::InvalidConfig(format!("{} must be finite", name)));
            }
        }
        Ok(())
    }

    fn initializers(
        &self,
    ) -> NetResult<(Box<dyn ParameterInitializer>, Box<dyn ParameterInitializer>)> {
        let weights =
            distribution::from_moments(self.init_weight_mean, self.init_weight_std, self.seed)?;
        let biases = distribution::from_moments(
            self.init_bias_mean,
            self.init_bias_std,
            self.seed.map(|s| s.wrapping_add(1)),
        )?;
        Ok((weights, biases))
    }
}

/// Parameters, optimizer and forward cache of a connectivity layer.
pub struct Trainable {
    params: Parameters,
    optimizer: Box<dyn Optimizer>,
    init: InitConfig,
    injected: Option<(Box<dyn ParameterInitializer>, Box<dyn ParameterInitializer>)>,
    /// Keep `params` on the next initialize.
    restored: bool,
    input_cache: Buffer,
}

impl Trainable {
    pub fn new(init: InitConfig, optimizer: Box<dyn Optimizer>) -> Self {
        Self {
            params: Parameters::default(),
            optimizer,
            init,
            injected: None,
            restored: false,
            input_cache: Buffer::default(),
        }
    }

    /// Wraps parameters loaded by the codec.
    pub fn restored(init: InitConfig, optimizer: Box<dyn Optimizer>, params: Parameters) -> Self {
        Self {
            params,
            restored: true,
            ..Self::new(init, optimizer)
        }
    }

    /// Samples parameters for `layout` (or keeps restored ones of the same
    /// layout), initializes the optimizer and sizes the input cache.
    pub fn initialize(&mut self, layout: ParameterLayout, input_len: usize) -> NetResult<()> {
        if self.restored && self.params.layout() == layout {
            self.params.zero_gradients();
        } else {
            let (weights, biases) = match self.injected.as_mut() {
                Some((weights, biases)) => (
                    weights.generate_vec(layout.weight_len),
                    biases.generate_vec(layout.bias_len),
                ),
                None => {
                    let (mut weights, mut biases) = self.init.initializers()?;
                    (
                        weights.generate_vec(layout.weight_len),
                        biases.generate_vec(layout.bias_len),
                    )
                }
            };
            self.params = Parameters::new(weights, biases);
        }
        self.restored = false;
        self.optimizer.initialize(layout);
        self.input_cache = Buffer::zeros(input_len);
        Ok(())
    }

    pub fn params(&self) -> &Parameters {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut Parameters {
        &mut self.params
    }

    /// Parameters together with the input of the last forward pass.
    pub fn parts_mut(&mut self) -> (&mut Parameters, &[f32]) {
        (&mut self.params, self.input_cache.as_slice())
    }

    pub fn init_config(&self) -> &InitConfig {
        &self.init
    }

    pub fn optimizer(&self) -> &dyn Optimizer {
        self.optimizer.as_ref()
    }

    /// Replaces the optimizer; it is initialized right away when the layer is.
    pub fn set_optimizer(&mut self, mut optimizer: Box<dyn Optimizer>) {
        if self.optimizer.is_initialized() {
            optimizer.initialize(self.params.layout());
        }
        self.optimizer = optimizer;
    }

    /// Uses explicit initializers instead of the configured distribution.
    pub fn set_initializers(
        &mut self,
        weights: Box<dyn ParameterInitializer>,
        biases: Box<dyn ParameterInitializer>,
    ) {
        self.injected = Some((weights, biases));
    }

    /// Stores the forward input and lets the optimizer observe it.
    pub fn cache_input(&mut self, input: &[f32], context: &str) -> NetResult<()> {
        self.input_cache.copy_from(input, context)?;
        self.optimizer.forward(input);
        Ok(())
    }

    pub fn cached_input(&self) -> &[f32] {
        self.input_cache.as_slice()
    }

    pub fn observe_error(&mut self, output_error: &[f32]) {
        self.optimizer.backward(output_error);
    }

    pub fn update(&mut self) -> NetResult<()> {
        self.optimizer.update(&mut self.params)
    }

    /// Overwrites weight values, keeping the layout.
    pub fn set_weights(&mut self, values: &[f32], context: &str) -> NetResult<()> {
        copy_values(self.params.weights.values_mut(), values, context)
    }

    pub fn set_biases(&mut self, values: &[f32], context: &str) -> NetResult<()> {
        copy_values(self.params.biases.values_mut(), values, context)
    }
}

fn copy_values(target: &mut [f32], values: &[f32], context: &str) -> NetResult<()> {
    if target.len() != values.len() {
        return Err(NetError::shape_mismatch(context, target.len(), values.len()));
    }
    target.copy_from_slice(values);
    Ok(())
}
