//! Layer abstractions for feed-forward chains
//!
//! This module provides the [`Layer`] trait and the closed set of layer kinds a
//! chain is built from: boundary layers ([`Input`], [`Output`]), connectivity
//! layers ([`FullyConnected`], [`SparselyConnected`], [`Convolution`],
//! [`LocalConvolution`]) and the pointwise [`Activation`] layer.
//!
//! Every layer owns two buffers: the value it produced in `forward` and the
//! error it produced in `backward` (the error with respect to its input). A
//! neighbour only ever borrows them as a [`Map`].

pub mod activation;
pub mod base;
pub mod convolution;
pub mod fully_connected;
pub mod input;
pub mod local_convolution;
pub mod output;
pub mod parameters;
pub mod sparsely_connected;

pub use activation::{Activation, ActivationConfig, Modifier, Neuron};
pub use base::{InitConfig, LayerCore};
pub use convolution::{Convolution, ConvolutionConfig, Filter};
pub use fully_connected::{FullyConnected, FullyConnectedConfig};
pub use input::Input;
pub use local_convolution::{LocalConvolution, LocalFilters};
pub use output::{Loss, Output};
pub use parameters::{ParameterLayout, ParameterTensor, Parameters};
pub use sparsely_connected::{SparselyConnected, SparselyConnectedConfig};

use crate::buffer::Map;
use crate::error::NetResult;
use crate::shape::Shape;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;

/// Tag identifying the role of a layer; also its persistence tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    Input,
    Output,
    FullyConnected,
    SparselyConnected,
    Convolution,
    LocalConvolution,
    Activation,
}

impl LayerKind {
    pub const ALL: [LayerKind; 7] = [
        LayerKind::Input,
        LayerKind::Output,
        LayerKind::FullyConnected,
        LayerKind::SparselyConnected,
        LayerKind::Convolution,
        LayerKind::LocalConvolution,
        LayerKind::Activation,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            LayerKind::Input => "input",
            LayerKind::Output => "output",
            LayerKind::FullyConnected => "fully_connected",
            LayerKind::SparselyConnected => "sparsely_connected",
            LayerKind::Convolution => "convolution",
            LayerKind::LocalConvolution => "local_convolution",
            LayerKind::Activation => "activation",
        }
    }

    pub fn from_tag(tag: &str) -> Option<LayerKind> {
        LayerKind::ALL.into_iter().find(|kind| kind.tag() == tag)
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Core trait for chain layers.
///
/// # Lifecycle
///
/// A layer starts uninitialized. [`Layer::initialize`] resolves its shapes,
/// allocates its buffers and (for connectivity layers) samples parameters and
/// initializes the bound optimizer. After that, `forward` and `backward` may
/// alternate freely; `backward` needs a `forward` since the last initialize.
///
/// # Example
///
/// ```
/// use neural_layers::layers::{FullyConnected, FullyConnectedConfig, Layer};
/// use neural_layers::shape::Shape;
///
/// let mut layer = FullyConnected::new(FullyConnectedConfig::new(2)).unwrap();
/// layer.initialize(Some(Shape::vector(3))).unwrap();
/// layer.set_weights(&[1.0, 0.0, 0.0, 0.0, 1.0, 0.0]).unwrap();
/// layer.set_biases(&[0.0, 0.0]).unwrap();
///
/// let output = layer.forward(&[1.0, 2.0, 3.0]).unwrap();
/// assert_eq!(&output[..], &[1.0, 2.0]);
///
/// let input_error = layer.backward(&[1.0, 1.0]).unwrap();
/// assert_eq!(&input_error[..], &[1.0, 1.0, 0.0]);
/// ```
pub trait Layer {
    fn kind(&self) -> LayerKind;

    /// Shared buffers, shapes and lifecycle state.
    fn core(&self) -> &LayerCore;

    /// Declared input shape before initialization, resolved shape after.
    fn input_shape(&self) -> Shape {
        self.core().input_shape()
    }

    fn output_shape(&self) -> Shape {
        self.core().output_shape()
    }

    /// Resolves shapes against `input_shape` (the previous layer's output
    /// shape, if any) and allocates buffers.
    ///
    /// Re-initializing discards buffers and caches and resamples parameters,
    /// except right after a restore from the codec, where the restored
    /// parameters are kept.
    ///
    /// # Errors
    ///
    /// - `NotInitializable` when a dimension is still dynamic
    /// - `ShapeMismatch` when `input_shape` conflicts with a declared one
    fn initialize(&mut self, input_shape: Option<Shape>) -> NetResult<()>;

    fn is_initialized(&self) -> bool {
        self.core().is_initialized()
    }

    /// Evaluates the layer on `input` and returns a view of its output buffer.
    fn forward(&mut self, input: &[f32]) -> NetResult<Map<'_>>;

    /// Propagates `output_error` and returns a view of the error with respect
    /// to the input. Connectivity layers also accumulate parameter gradients.
    fn backward(&mut self, output_error: &[f32]) -> NetResult<Map<'_>>;

    /// Applies the accumulated gradient through the bound optimizer.
    fn update(&mut self) -> NetResult<()> {
        Ok(())
    }

    fn has_parameters(&self) -> bool {
        false
    }

    /// Number of trainable scalars.
    fn parameter_count(&self) -> usize {
        0
    }

    /// Name of the bound optimizer, for layers with parameters.
    fn optimizer_name(&self) -> Option<&'static str> {
        None
    }

    /// The value written by the last `forward`.
    fn output_buffer(&self) -> NetResult<Map<'_>> {
        self.core().output_map()
    }

    /// The error written by the last `backward`.
    fn backward_error_buffer(&self) -> NetResult<Map<'_>> {
        self.core().backward_error_map()
    }

    /// Switches training-only behaviour such as dropout.
    fn set_training(&mut self, _training: bool) {}

    /// Configuration and parameters for the codec.
    fn save_state(&self) -> NetResult<serde_json::Value>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}
