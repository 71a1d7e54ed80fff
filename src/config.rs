//! Chain configuration
//!
//! This module describes a whole chain as data: the input shape, the hidden
//! layers in order and the update schedule. Configurations are read from
//! JSON files with [`load_config`] and turned into a ready-to-initialize
//! [`Chain`] with [`ChainConfig::build`].
//!
//! # Example
//!
//! ```json
//! {
//!   "input": { "height": 4 },
//!   "layers": [
//!     { "layer_type": "fully_connected", "output_size": 8,
//!       "optimizer": { "type": "adam", "learning_rate": 0.01 } },
//!     { "layer_type": "activation", "neuron": { "function": "hyperbolic_tangent" } },
//!     { "layer_type": "fully_connected", "output_size": 1 }
//!   ],
//!   "loss": "l1",
//!   "update_schedule": { "mode": "every_batch", "size": 8 }
//! }
//! ```

use crate::chain::{Chain, UpdateSchedule};
use crate::error::{NetError, NetResult};
use crate::layers::{
    Activation, ActivationConfig, Convolution, ConvolutionConfig, FullyConnected,
    FullyConnectedConfig, Input, Layer, LocalConvolution, Loss, Output, SparselyConnected,
    SparselyConnectedConfig,
};
use crate::shape::Shape;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// One hidden layer, tagged by `layer_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "layer_type", rename_all = "snake_case")]
pub enum LayerConfig {
    FullyConnected(FullyConnectedConfig),
    SparselyConnected(SparselyConnectedConfig),
    Convolution(ConvolutionConfig),
    LocalConvolution(ConvolutionConfig),
    Activation(ActivationConfig),
}

impl LayerConfig {
    pub fn validate(&self) -> NetResult<()> {
        match self {
            LayerConfig::FullyConnected(config) => config.validate(),
            LayerConfig::SparselyConnected(config) => config.validate(),
            LayerConfig::Convolution(config) | LayerConfig::LocalConvolution(config) => {
                config.validate()
            }
            LayerConfig::Activation(config) => config.validate(),
        }
    }

    /// Constructs the (uninitialized) layer.
    pub fn build(&self) -> NetResult<Box<dyn Layer>> {
        Ok(match *self {
            LayerConfig::FullyConnected(config) => Box::new(FullyConnected::new(config)?),
            LayerConfig::SparselyConnected(config) => Box::new(SparselyConnected::new(config)?),
            LayerConfig::Convolution(config) => Box::new(Convolution::new(config)?),
            LayerConfig::LocalConvolution(config) => Box::new(LocalConvolution::new(config)?),
            LayerConfig::Activation(config) => Box::new(Activation::with_config(config)?),
        })
    }
}

/// Description of a complete chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Shape of one sample; dynamic dimensions are bound from the first
    /// sample through [`Chain::initialize_from_sample`].
    pub input: Shape,
    pub layers: Vec<LayerConfig>,
    /// Declared output shape, checked against the last layer when present.
    #[serde(default)]
    pub output: Option<Shape>,
    /// Loss minimized through [`Chain::train_step`].
    #[serde(default)]
    pub loss: Loss,
    #[serde(default)]
    pub update_schedule: UpdateSchedule,
}

impl ChainConfig {
    /// Parses and validates a JSON configuration.
    pub fn from_json(json: &str) -> NetResult<Self> {
        let config: ChainConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> NetResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> NetResult<()> {
        if self.layers.is_empty() {
            return Err(NetError::InvalidConfig(
                "chain must contain at least one layer".to_string(),
            ));
        }
        self.input.validate("input")?;
        if let Some(shape) = self.output {
            shape.validate("output")?;
        }
        for (index, layer) in self.layers.iter().enumerate() {
            layer.validate().map_err(|err| match err {
                NetError::InvalidConfig(message) => {
                    NetError::InvalidConfig(format!("layer {}: {}", index + 1, message))
                }
                other => other,
            })?;
        }
        self.update_schedule.validate()
    }

    /// Constructs the chain. Call [`Chain::initialize`] (or
    /// [`Chain::initialize_from_sample`] for a dynamic input) before use.
    pub fn build(&self) -> NetResult<Chain> {
        self.validate()?;
        let mut chain = Chain::new(Input::new(self.input));
        for layer in &self.layers {
            chain.push_boxed(layer.build()?);
        }
        let output = self.output.map_or_else(Output::new, Output::with_shape);
        chain.set_output(output.with_loss(self.loss));
        chain.set_schedule(self.update_schedule)?;
        Ok(chain)
    }
}

/// Loads a chain configuration from a JSON file.
///
/// Reads the file at `path`, deserializes it into a [`ChainConfig`] and
/// validates every layer.
///
/// # Examples
///
/// ```no_run
/// use neural_layers::config::load_config;
///
/// let config = load_config("config/regression.json").unwrap();
/// let mut chain = config.build().unwrap();
/// chain.initialize().unwrap();
/// ```
pub fn load_config<P: AsRef<Path>>(path: P) -> NetResult<ChainConfig> {
    let contents = fs::read_to_string(path)?;
    ChainConfig::from_json(&contents)
}
