//! Activation layer
//!
//! Applies a pointwise [`Neuron`] function, optionally followed by a stochastic
//! [`Modifier`] while in training mode. Backward multiplies the incoming error
//! by the derivative evaluated at the cached forward input and output.

use crate::buffer::{Buffer, Map};
use crate::error::{NetError, NetResult};
use crate::layers::base::LayerCore;
use crate::layers::{Layer, LayerKind};
use crate::shape::Shape;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::any::Any;

/// Scale of the LeCun sigmoid, `1.7159 · tanh(2x/3)`.
const LECUN_SCALE: f32 = 1.7159;
const LECUN_SLOPE: f32 = 2.0 / 3.0;

/// Pointwise neuron function.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "function", rename_all = "snake_case")]
pub enum Neuron {
    Linear,
    RectifiedLinear,
    /// `x` for positive inputs, `leak_factor · x` otherwise.
    LeakyRectifiedLinear { leak_factor: f32 },
    /// Logistic function `1 / (1 + e^-x)`.
    Sigmoid,
    HyperbolicTangent,
    LeCunSigmoid,
    /// `x / (1 + |x|)`.
    SoftSign,
}

impl Neuron {
    pub fn validate(&self) -> NetResult<()> {
        if let Neuron::LeakyRectifiedLinear { leak_factor } = *self {
            if !(leak_factor > 0.0 && leak_factor <= 1.0) {
                return Err(NetError::InvalidConfig(format!(
                    "leak_factor must be in (0, 1], got {}",
                    leak_factor
                )));
            }
        }
        Ok(())
    }

    /// `f(x)`.
    pub fn value(&self, x: f32) -> f32 {
        match *self {
            Neuron::Linear => x,
            Neuron::RectifiedLinear => x.max(0.0),
            Neuron::LeakyRectifiedLinear { leak_factor } => {
                if x > 0.0 {
                    x
                } else {
                    leak_factor * x
                }
            }
            Neuron::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Neuron::HyperbolicTangent => x.tanh(),
            Neuron::LeCunSigmoid => LECUN_SCALE * (LECUN_SLOPE * x).tanh(),
            Neuron::SoftSign => x / (1.0 + x.abs()),
        }
    }

    /// `f'(x)`, given `x` and `y = f(x)`.
    pub fn derivative(&self, x: f32, y: f32) -> f32 {
        match *self {
            Neuron::Linear => 1.0,
            Neuron::RectifiedLinear => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Neuron::LeakyRectifiedLinear { leak_factor } => {
                if x > 0.0 {
                    1.0
                } else {
                    leak_factor
                }
            }
            Neuron::Sigmoid => y * (1.0 - y),
            Neuron::HyperbolicTangent => 1.0 - y * y,
            Neuron::LeCunSigmoid => {
                let t = (LECUN_SLOPE * x).tanh();
                LECUN_SCALE * LECUN_SLOPE * (1.0 - t * t)
            }
            Neuron::SoftSign => {
                let d = 1.0 + x.abs();
                1.0 / (d * d)
            }
        }
    }
}

/// Stochastic post-processing applied only in training mode.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Modifier {
    #[default]
    None,
    /// Each unit is kept when a uniform sample falls below `keep_probability`;
    /// dropped units output zero and pass no error.
    Dropout { keep_probability: f32 },
    /// Each unit's output and derivative are scaled by a uniform factor in `[0, 1)`.
    SoftDropout,
}

impl Modifier {
    pub fn validate(&self) -> NetResult<()> {
        if let Modifier::Dropout { keep_probability } = *self {
            if !(keep_probability > 0.0 && keep_probability <= 1.0) {
                return Err(NetError::InvalidConfig(format!(
                    "keep_probability must be in (0, 1], got {}",
                    keep_probability
                )));
            }
        }
        Ok(())
    }

    fn sample(&self, rng: &mut StdRng) -> f32 {
        match *self {
            Modifier::None => 1.0,
            Modifier::Dropout { keep_probability } => {
                if rng.gen::<f32>() < keep_probability {
                    1.0
                } else {
                    0.0
                }
            }
            Modifier::SoftDropout => rng.gen::<f32>(),
        }
    }
}

/// Construction options of an [`Activation`] layer.
///
/// ```json
/// { "neuron": { "function": "leaky_rectified_linear", "leak_factor": 0.1 } }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActivationConfig {
    pub neuron: Neuron,
    #[serde(default)]
    pub modifier: Modifier,
    /// Seeds the modifier's sampling.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl ActivationConfig {
    pub fn new(neuron: Neuron) -> Self {
        Self {
            neuron,
            modifier: Modifier::None,
            seed: None,
        }
    }

    pub fn with_modifier(mut self, modifier: Modifier, seed: Option<u64>) -> Self {
        self.modifier = modifier;
        self.seed = seed;
        self
    }

    pub fn validate(&self) -> NetResult<()> {
        self.neuron.validate()?;
        self.modifier.validate()
    }
}

#[derive(Serialize, Deserialize)]
struct ActivationState {
    config: ActivationConfig,
    input_shape: Shape,
}

fn modifier_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Pointwise activation layer; output shape equals input shape.
///
/// # Example
///
/// ```
/// use neural_layers::layers::{Activation, Layer, Neuron};
/// use neural_layers::shape::Shape;
///
/// let mut relu = Activation::new(Neuron::RectifiedLinear).unwrap();
/// relu.initialize(Some(Shape::vector(3))).unwrap();
/// assert_eq!(&relu.forward(&[-1.0, 0.0, 2.0]).unwrap()[..], &[0.0, 0.0, 2.0]);
/// assert_eq!(&relu.backward(&[5.0, 5.0, 5.0]).unwrap()[..], &[0.0, 0.0, 5.0]);
/// ```
pub struct Activation {
    core: LayerCore,
    config: ActivationConfig,
    training: bool,
    rng: StdRng,
    input_cache: Buffer,
    mask: Buffer,
}

impl Activation {
    pub fn new(neuron: Neuron) -> NetResult<Self> {
        Self::with_config(ActivationConfig::new(neuron))
    }

    pub fn with_config(config: ActivationConfig) -> NetResult<Self> {
        Self::with_input(config, Shape::dynamic())
    }

    fn with_input(config: ActivationConfig, input_shape: Shape) -> NetResult<Self> {
        config.validate()?;
        Ok(Self {
            core: LayerCore::new(LayerKind::Activation, input_shape, input_shape),
            config,
            training: true,
            rng: modifier_rng(config.seed),
            input_cache: Buffer::default(),
            mask: Buffer::default(),
        })
    }

    /// Rebuilds a layer from [`Layer::save_state`] output.
    pub fn restore(state: serde_json::Value) -> NetResult<Self> {
        let state: ActivationState = serde_json::from_value(state)?;
        Self::with_input(state.config, state.input_shape)
    }

    pub fn config(&self) -> &ActivationConfig {
        &self.config
    }

    pub fn neuron(&self) -> Neuron {
        self.config.neuron
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Per-unit factors applied by the last forward pass (all ones outside training).
    pub fn mask(&self) -> &[f32] {
        self.mask.as_slice()
    }
}

impl Layer for Activation {
    fn kind(&self) -> LayerKind {
        LayerKind::Activation
    }

    fn core(&self) -> &LayerCore {
        &self.core
    }

    fn initialize(&mut self, input_shape: Option<Shape>) -> NetResult<()> {
        let dims = self.core.resolve_input(input_shape)?;
        self.core.allocate(dims, dims);
        self.input_cache = Buffer::zeros(dims.size());
        self.mask = Buffer::zeros(dims.size());
        self.rng = modifier_rng(self.config.seed);
        Ok(())
    }

    fn forward(&mut self, input: &[f32]) -> NetResult<Map<'_>> {
        self.core.begin_forward(input)?;
        self.input_cache.copy_from(input, "activation input")?;

        let neuron = self.config.neuron;
        let modifier = if self.training {
            self.config.modifier
        } else {
            Modifier::None
        };
        let mask = self.mask.as_mut_slice();
        for m in mask.iter_mut() {
            *m = modifier.sample(&mut self.rng);
        }
        let output = self.core.output_mut();
        for ((y, &x), &m) in output.iter_mut().zip(input).zip(mask.iter()) {
            *y = neuron.value(x) * m;
        }

        self.core.finish_forward();
        self.core.output_map()
    }

    fn backward(&mut self, output_error: &[f32]) -> NetResult<Map<'_>> {
        self.core.begin_backward(output_error)?;
        let neuron = self.config.neuron;
        let inputs = self.input_cache.as_slice();
        let mask = self.mask.as_slice();

        let input_error = self.core.backward_error_mut();
        for (i, slot) in input_error.iter_mut().enumerate() {
            let x = inputs[i];
            *slot = if mask[i] == 0.0 {
                0.0
            } else {
                output_error[i] * neuron.derivative(x, neuron.value(x)) * mask[i]
            };
        }

        self.core.backward_error_map()
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn save_state(&self) -> NetResult<serde_json::Value> {
        let state = ActivationState {
            config: self.config,
            input_shape: self.core.input_shape(),
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
