//! Ordered layer chains.
//!
//! A [`Chain`] runs `Input → hidden layers → Output`. Each layer reads its
//! input straight from the previous layer's output buffer and, going
//! backward, its output error straight from the next layer's backward-error
//! buffer, so nothing is copied between layers except at the two boundaries.
//!
//! Positions address the whole chain: `0` is the input layer, `1..=n` the
//! hidden layers in push order and `n + 1` the output layer.

use crate::buffer::Map;
use crate::codec::{Envelope, Registry, FORMAT_VERSION};
use crate::diagnostics::{Diagnostics, LogDiagnostics};
use crate::error::{NetError, NetResult};
use crate::layers::{Input, Layer, LayerKind, Output};
use serde::{Deserialize, Serialize};

const COMPONENT: &str = "neural_layers::chain";

/// When [`Chain::train_step`] applies the accumulated gradients.
///
/// Gradients are zeroed inside every update, whatever the schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum UpdateSchedule {
    /// Update after every sample.
    #[default]
    EverySample,
    /// Update after every `size` samples; gradients are summed over the batch.
    EveryBatch { size: usize },
    /// Never update from `train_step`; the caller calls [`Chain::update`].
    Manual,
}

impl UpdateSchedule {
    pub fn validate(&self) -> NetResult<()> {
        if let UpdateSchedule::EveryBatch { size: 0 } = self {
            return Err(NetError::InvalidConfig(
                "batch size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    fn is_due(&self, pending_samples: usize) -> bool {
        match *self {
            UpdateSchedule::EverySample => true,
            UpdateSchedule::EveryBatch { size } => pending_samples >= size,
            UpdateSchedule::Manual => false,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct ChainSnapshot {
    version: u32,
    update_schedule: UpdateSchedule,
    layers: Vec<Envelope>,
}

/// Input layer, hidden layers and output layer driven as one unit.
///
/// # Example
///
/// ```
/// use neural_layers::chain::Chain;
/// use neural_layers::layers::{Activation, FullyConnected, FullyConnectedConfig, Input, Neuron};
///
/// let mut chain = Chain::new(Input::vector(3));
/// chain.push(FullyConnected::new(FullyConnectedConfig::new(2)).unwrap());
/// chain.push(Activation::new(Neuron::Linear).unwrap());
/// chain.initialize().unwrap();
///
/// let output = chain.forward(&[1.0, 2.0, 3.0]).unwrap();
/// assert_eq!(output.len(), 2);
/// ```
pub struct Chain {
    input: Input,
    layers: Vec<Box<dyn Layer>>,
    output: Output,
    schedule: UpdateSchedule,
    pending_samples: usize,
    diagnostics: Box<dyn Diagnostics>,
}

impl Chain {
    pub fn new(input: Input) -> Self {
        Self {
            input,
            layers: Vec::new(),
            output: Output::new(),
            schedule: UpdateSchedule::default(),
            pending_samples: 0,
            diagnostics: Box::new(LogDiagnostics),
        }
    }

    /// Appends a hidden layer.
    pub fn push<L: Layer + 'static>(&mut self, layer: L) -> &mut Self {
        self.layers.push(Box::new(layer));
        self
    }

    pub fn push_boxed(&mut self, layer: Box<dyn Layer>) -> &mut Self {
        self.layers.push(layer);
        self
    }

    /// Replaces the default output layer, e.g. to declare its shape.
    pub fn set_output(&mut self, output: Output) {
        self.output = output;
    }

    pub fn set_diagnostics(&mut self, diagnostics: Box<dyn Diagnostics>) {
        self.diagnostics = diagnostics;
    }

    pub fn schedule(&self) -> UpdateSchedule {
        self.schedule
    }

    pub fn set_schedule(&mut self, schedule: UpdateSchedule) -> NetResult<()> {
        schedule.validate()?;
        self.schedule = schedule;
        Ok(())
    }

    /// Samples accumulated since the last update.
    pub fn pending_samples(&self) -> usize {
        self.pending_samples
    }

    /// Number of positions, boundaries included.
    pub fn len(&self) -> usize {
        self.layers.len() + 2
    }

    /// True when the chain has no hidden layers.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn layer(&self, position: usize) -> Option<&(dyn Layer + 'static)> {
        let hidden = self.layers.len();
        match position {
            0 => Some(&self.input as &(dyn Layer + 'static)),
            p if p <= hidden => Some(self.layers[p - 1].as_ref()),
            p if p == hidden + 1 => Some(&self.output as &(dyn Layer + 'static)),
            _ => None,
        }
    }

    pub fn layer_mut(&mut self, position: usize) -> Option<&mut (dyn Layer + 'static)> {
        let hidden = self.layers.len();
        match position {
            0 => Some(&mut self.input as &mut (dyn Layer + 'static)),
            p if p <= hidden => Some(self.layers[p - 1].as_mut()),
            p if p == hidden + 1 => Some(&mut self.output as &mut (dyn Layer + 'static)),
            _ => None,
        }
    }

    /// The layer at `position` as a concrete type.
    pub fn layer_as<T: 'static>(&self, position: usize) -> Option<&T> {
        self.layer(position)?.as_any().downcast_ref::<T>()
    }

    pub fn layer_as_mut<T: 'static>(&mut self, position: usize) -> Option<&mut T> {
        self.layer_mut(position)?.as_any_mut().downcast_mut::<T>()
    }

    pub fn input(&self) -> &Input {
        &self.input
    }

    pub fn output(&self) -> &Output {
        &self.output
    }

    pub fn is_initialized(&self) -> bool {
        self.input.is_initialized()
            && self.output.is_initialized()
            && self.layers.iter().all(|layer| layer.is_initialized())
    }

    /// Trainable scalars over all layers.
    pub fn parameter_count(&self) -> usize {
        self.layers.iter().map(|layer| layer.parameter_count()).sum()
    }

    /// Initializes every layer front to back, feeding each one the output
    /// shape of its predecessor.
    pub fn initialize(&mut self) -> NetResult<()> {
        self.input.initialize(None)?;
        self.initialize_after_input()
    }

    /// Binds the input's dynamic dimensions from `sample.len()`, then
    /// initializes the rest of the chain.
    pub fn initialize_from_sample(&mut self, sample: &[f32]) -> NetResult<()> {
        let shape = self.input.bind_sample_len(sample.len())?;
        self.diagnostics
            .debug(COMPONENT, &format!("input bound to {} from sample", shape));
        self.initialize_after_input()
    }

    fn initialize_after_input(&mut self) -> NetResult<()> {
        if self.pending_samples > 0 {
            self.diagnostics.warn(
                COMPONENT,
                &format!(
                    "re-initialization discards gradients of {} pending samples",
                    self.pending_samples
                ),
            );
        }
        let mut shape = self.input.output_shape();
        for (index, layer) in self.layers.iter_mut().enumerate() {
            layer.initialize(Some(shape))?;
            let mut message = format!(
                "layer {} ({}) initialized: {} -> {}",
                index + 1,
                layer.kind(),
                layer.input_shape(),
                layer.output_shape()
            );
            if let Some(optimizer) = layer.optimizer_name() {
                message.push_str(&format!(
                    ", {} parameters, optimizer {}",
                    layer.parameter_count(),
                    optimizer
                ));
            }
            self.diagnostics.info(COMPONENT, &message);
            shape = layer.output_shape();
        }
        self.output.initialize(Some(shape))?;
        self.pending_samples = 0;
        Ok(())
    }

    /// Runs the forward pass and returns a view of the output layer's value.
    pub fn forward(&mut self, sample: &[f32]) -> NetResult<Map<'_>> {
        self.input.forward(sample)?;
        let mut previous: &(dyn Layer + 'static) = &self.input;
        for layer in self.layers.iter_mut() {
            let value = previous.output_buffer()?;
            layer.forward(&value)?;
            previous = &**layer;
        }
        let value = previous.output_buffer()?;
        self.output.forward(&value)
    }

    /// Injects the gradient of the output's [`Loss`](crate::layers::Loss) at
    /// `target` and propagates it back. Returns the loss of the sample.
    pub fn backward_with_target(&mut self, target: &[f32]) -> NetResult<f32> {
        self.output.set_target(target)?;
        let loss = self.output.loss()?;
        self.propagate_back()?;
        Ok(loss)
    }

    /// Injects an explicit output error and propagates it back.
    pub fn backward_with_error(&mut self, error: &[f32]) -> NetResult<()> {
        self.output.set_error(error)?;
        self.propagate_back()
    }

    fn propagate_back(&mut self) -> NetResult<()> {
        let mut next: &(dyn Layer + 'static) = &self.output;
        for layer in self.layers.iter_mut().rev() {
            let error = next.backward_error_buffer()?;
            layer.backward(&error)?;
            next = &**layer;
        }
        Ok(())
    }

    /// Error with respect to the chain input, from the last backward pass.
    pub fn input_error(&self) -> NetResult<Map<'_>> {
        match self.layers.first() {
            Some(layer) => layer.backward_error_buffer(),
            None => self.output.backward_error_buffer(),
        }
    }

    /// Applies and clears the accumulated gradients of every layer.
    pub fn update(&mut self) -> NetResult<()> {
        for layer in self.layers.iter_mut() {
            layer.update()?;
        }
        self.diagnostics.debug(
            COMPONENT,
            &format!("update applied after {} samples", self.pending_samples),
        );
        self.pending_samples = 0;
        Ok(())
    }

    /// One forward/backward pass on `(sample, target)`, followed by an update
    /// when the schedule is due. Returns the loss of the sample.
    pub fn train_step(&mut self, sample: &[f32], target: &[f32]) -> NetResult<f32> {
        self.forward(sample)?;
        let loss = self.backward_with_target(target)?;
        self.pending_samples += 1;
        if self.schedule.is_due(self.pending_samples) {
            self.update()?;
        }
        Ok(loss)
    }

    /// Switches training-only behaviour (dropout) on every layer.
    pub fn set_training(&mut self, training: bool) {
        for layer in self.layers.iter_mut() {
            layer.set_training(training);
        }
    }

    /// Buffer the layer at `position` reads as input: the previous layer's
    /// output, or the copied sample for the input layer.
    pub fn input_buffer(&self, position: usize) -> NetResult<Map<'_>> {
        let producer = position.saturating_sub(1);
        self.layer(producer)
            .filter(|_| position < self.len())
            .ok_or_else(|| NetError::InvalidConfig(format!("no layer at position {}", position)))?
            .output_buffer()
    }

    /// Error buffer the layer at `position` produced in the last backward pass.
    pub fn backward_error_buffer(&self, position: usize) -> NetResult<Map<'_>> {
        if position == 0 {
            return Err(NetError::NotSupported {
                layer: LayerKind::Input.tag().to_string(),
                operation: "backward",
            });
        }
        self.layer(position)
            .ok_or_else(|| NetError::InvalidConfig(format!("no layer at position {}", position)))?
            .backward_error_buffer()
    }

    /// Persists every layer, boundaries included, with the update schedule.
    pub fn save(&self) -> NetResult<Vec<u8>> {
        let registry = Registry::empty();
        let mut layers = Vec::with_capacity(self.len());
        layers.push(registry.encode(&self.input)?);
        for layer in &self.layers {
            layers.push(registry.encode(layer.as_ref())?);
        }
        layers.push(registry.encode(&self.output)?);

        let snapshot = ChainSnapshot {
            version: FORMAT_VERSION,
            update_schedule: self.schedule,
            layers,
        };
        let bytes = serde_json::to_vec(&snapshot)?;
        self.diagnostics.info(
            COMPONENT,
            &format!("saved {} layers ({} bytes)", self.len(), bytes.len()),
        );
        Ok(bytes)
    }

    /// Restores a chain saved with [`Chain::save`]; call
    /// [`Chain::initialize`] before running it.
    pub fn load(bytes: &[u8]) -> NetResult<Chain> {
        Self::load_with_registry(bytes, &Registry::builtin())
    }

    pub fn load_with_registry(bytes: &[u8], registry: &Registry) -> NetResult<Chain> {
        let snapshot: ChainSnapshot = serde_json::from_slice(bytes)?;
        if snapshot.version > FORMAT_VERSION {
            return Err(NetError::Codec(format!(
                "chain format version {} is newer than supported version {}",
                snapshot.version, FORMAT_VERSION
            )));
        }
        snapshot.update_schedule.validate()?;

        let mut envelopes = snapshot.layers.into_iter();
        let input = match envelopes.next() {
            Some(envelope) if envelope.tag == LayerKind::Input.tag() => {
                Input::restore(envelope.payload)?
            }
            _ => return Err(NetError::Codec("chain must start with an input layer".to_string())),
        };
        let output = match envelopes.next_back() {
            Some(envelope) if envelope.tag == LayerKind::Output.tag() => {
                Output::restore(envelope.payload)?
            }
            _ => return Err(NetError::Codec("chain must end with an output layer".to_string())),
        };

        let mut chain = Chain::new(input);
        chain.set_output(output);
        chain.schedule = snapshot.update_schedule;
        for envelope in envelopes {
            chain.push_boxed(registry.decode(envelope)?);
        }
        chain.diagnostics.info(
            COMPONENT,
            &format!("loaded {} layers", chain.len()),
        );
        Ok(chain)
    }
}
