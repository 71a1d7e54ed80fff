//! Input boundary layer.

use crate::buffer::Map;
use crate::error::{NetError, NetResult};
use crate::layers::base::LayerCore;
use crate::layers::{Layer, LayerKind};
use crate::shape::Shape;
use serde::{Deserialize, Serialize};
use std::any::Any;

#[derive(Serialize, Deserialize)]
struct InputState {
    shape: Shape,
}

/// First layer of a chain: copies external data into a buffer the next layer
/// can borrow.
///
/// The shape may contain dynamic dimensions; they are bound either by
/// [`Layer::initialize`] with an explicit shape or from the length of the
/// first sample through [`Input::bind_sample_len`].
pub struct Input {
    core: LayerCore,
}

impl Input {
    pub fn new(shape: Shape) -> Self {
        Self {
            core: LayerCore::new(LayerKind::Input, shape, shape),
        }
    }

    pub fn vector(size: usize) -> Self {
        Self::new(Shape::vector(size))
    }

    pub fn restore(state: serde_json::Value) -> NetResult<Self> {
        let state: InputState = serde_json::from_value(state)?;
        Ok(Self::new(state.shape))
    }

    /// Binds the dynamic dimensions from a sample length and initializes.
    ///
    /// A layer whose shape is already resolved only accepts its own size.
    pub fn bind_sample_len(&mut self, len: usize) -> NetResult<Shape> {
        let shape = self.core.input_shape().bind_len(len, "input sample")?;
        self.initialize(Some(shape))?;
        Ok(shape)
    }
}

impl Layer for Input {
    fn kind(&self) -> LayerKind {
        LayerKind::Input
    }

    fn core(&self) -> &LayerCore {
        &self.core
    }

    fn initialize(&mut self, input_shape: Option<Shape>) -> NetResult<()> {
        let dims = self.core.resolve_input(input_shape)?;
        self.core.allocate(dims, dims);
        Ok(())
    }

    fn forward(&mut self, input: &[f32]) -> NetResult<Map<'_>> {
        self.core.begin_forward(input)?;
        self.core.output_mut().copy_from_slice(input);
        self.core.finish_forward();
        self.core.output_map()
    }

    fn backward(&mut self, _output_error: &[f32]) -> NetResult<Map<'_>> {
        Err(NetError::NotSupported {
            layer: LayerKind::Input.tag().to_string(),
            operation: "backward",
        })
    }

    fn save_state(&self) -> NetResult<serde_json::Value> {
        Ok(serde_json::to_value(InputState {
            shape: self.core.input_shape(),
        })?)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
