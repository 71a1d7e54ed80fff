//! Output boundary layer.

use crate::buffer::Map;
use crate::error::{NetError, NetResult};
use crate::layers::base::LayerCore;
use crate::layers::{Layer, LayerKind};
use crate::shape::Shape;
use serde::{Deserialize, Serialize};
use std::any::Any;

/// Probabilities are clamped to `[P_FLOOR, 1 − P_FLOOR]` before taking logs.
const P_FLOOR: f32 = 1e-7;

/// Loss whose gradient [`Output::set_target`] injects as the output error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Loss {
    /// `½·Σ(v − t)²`, error `v − t`.
    #[default]
    L2,
    /// `Σ|v − t|`, error `sign(v − t)` (zero where they are equal).
    L1,
    /// Element-wise binary cross entropy of probabilities `v` against targets
    /// in `[0, 1]`: `−Σ[t·ln v + (1 − t)·ln(1 − v)]`.
    CrossEntropy,
    /// `Σ max(0, 1 − t·v)` for targets in `{−1, 1}`, error `−t` inside the
    /// margin and zero outside.
    Hinge,
}

impl Loss {
    /// Writes `∂loss/∂value` into `error` and returns the loss.
    pub fn evaluate(self, value: &[f32], target: &[f32], error: &mut [f32]) -> f32 {
        let mut total = 0.0;
        for ((e, &v), &t) in error.iter_mut().zip(value).zip(target) {
            let (loss, gradient) = match self {
                Loss::L2 => {
                    let d = v - t;
                    (0.5 * d * d, d)
                }
                Loss::L1 => {
                    let d = v - t;
                    let sign = if d > 0.0 {
                        1.0
                    } else if d < 0.0 {
                        -1.0
                    } else {
                        0.0
                    };
                    (d.abs(), sign)
                }
                Loss::CrossEntropy => {
                    let p = v.clamp(P_FLOOR, 1.0 - P_FLOOR);
                    (
                        -(t * p.ln() + (1.0 - t) * (1.0 - p).ln()),
                        (p - t) / (p * (1.0 - p)),
                    )
                }
                Loss::Hinge => {
                    let margin = 1.0 - t * v;
                    if margin > 0.0 {
                        (margin, -t)
                    } else {
                        (0.0, 0.0)
                    }
                }
            };
            *e = gradient;
            total += loss;
        }
        total
    }
}

#[derive(Serialize, Deserialize)]
struct OutputState {
    shape: Shape,
    #[serde(default)]
    loss: Loss,
}

/// Last layer of a chain: holds the final value and the error injected at the
/// start of the backward pass.
///
/// The error is either supplied directly ([`Output::set_error`], or a
/// non-empty slice passed to [`Layer::backward`]) or derived from a target
/// through the configured [`Loss`] ([`Output::set_target`]). A new forward
/// pass invalidates it.
pub struct Output {
    core: LayerCore,
    loss: Loss,
    error_ready: bool,
    last_loss: f32,
}

impl Output {
    /// Output whose shape is taken from the previous layer.
    pub fn new() -> Self {
        Self::with_shape(Shape::dynamic())
    }

    /// Output with a declared shape, checked against the previous layer.
    pub fn with_shape(shape: Shape) -> Self {
        Self {
            core: LayerCore::new(LayerKind::Output, shape, shape),
            loss: Loss::L2,
            error_ready: false,
            last_loss: 0.0,
        }
    }

    pub fn with_loss(mut self, loss: Loss) -> Self {
        self.loss = loss;
        self
    }

    pub fn restore(state: serde_json::Value) -> NetResult<Self> {
        let state: OutputState = serde_json::from_value(state)?;
        Ok(Self::with_shape(state.shape).with_loss(state.loss))
    }

    pub fn loss_function(&self) -> Loss {
        self.loss
    }

    /// Final value of the last forward pass.
    pub fn value(&self) -> NetResult<Map<'_>> {
        self.output_buffer()
    }

    /// Injects the gradient of the loss at `target`; with the default
    /// [`Loss::L2`] that is `value − target`.
    pub fn set_target(&mut self, target: &[f32]) -> NetResult<Map<'_>> {
        self.core.begin_backward(target)?;
        let value = self.core.output_map()?.to_vec();
        let mut error = vec![0.0; value.len()];
        self.last_loss = self.loss.evaluate(&value, target, &mut error);
        self.core.backward_error_mut().copy_from_slice(&error);
        self.error_ready = true;
        self.core.backward_error_map()
    }

    /// Injects an explicit error; it is scored as half its squared norm.
    pub fn set_error(&mut self, error: &[f32]) -> NetResult<Map<'_>> {
        self.core.begin_backward(error)?;
        self.core.backward_error_mut().copy_from_slice(error);
        self.last_loss = 0.5 * error.iter().map(|e| e * e).sum::<f32>();
        self.error_ready = true;
        self.core.backward_error_map()
    }

    /// Loss of the error injected since the last forward pass.
    pub fn loss(&self) -> NetResult<f32> {
        self.core.ensure_initialized()?;
        if !self.error_ready {
            return Err(NetError::MissingCache {
                layer: LayerKind::Output.tag().to_string(),
                what: "injected error",
            });
        }
        Ok(self.last_loss)
    }
}

impl Default for Output {
    fn default() -> Self {
        Self::new()
    }
}

impl Layer for Output {
    fn kind(&self) -> LayerKind {
        LayerKind::Output
    }

    fn core(&self) -> &LayerCore {
        &self.core
    }

    fn initialize(&mut self, input_shape: Option<Shape>) -> NetResult<()> {
        let dims = self.core.resolve_input(input_shape)?;
        self.core.allocate(dims, dims);
        self.error_ready = false;
        Ok(())
    }

    fn forward(&mut self, input: &[f32]) -> NetResult<Map<'_>> {
        self.core.begin_forward(input)?;
        self.core.output_mut().copy_from_slice(input);
        self.error_ready = false;
        self.core.finish_forward();
        self.core.output_map()
    }

    /// Returns the injected error; a non-empty `output_error` is injected first.
    fn backward(&mut self, output_error: &[f32]) -> NetResult<Map<'_>> {
        if !output_error.is_empty() {
            return self.set_error(output_error);
        }
        self.core.ensure_initialized()?;
        if !self.error_ready {
            return Err(NetError::MissingCache {
                layer: LayerKind::Output.tag().to_string(),
                what: "injected error",
            });
        }
        self.core.backward_error_map()
    }

    fn save_state(&self) -> NetResult<serde_json::Value> {
        Ok(serde_json::to_value(OutputState {
            shape: self.core.input_shape(),
            loss: self.loss,
        })?)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
