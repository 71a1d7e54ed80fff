//! Versioned persistence of layers.
//!
//! A layer is persisted as an [`Envelope`]: its type tag, the format version
//! and the payload produced by [`Layer::save_state`]. Loading dispatches on the
//! tag through a [`Registry`] that maps each tag to a loader function.
//!
//! ```
//! use neural_layers::codec;
//! use neural_layers::layers::{FullyConnected, FullyConnectedConfig, Layer};
//! use neural_layers::shape::Shape;
//!
//! let mut layer = FullyConnected::new(FullyConnectedConfig::new(2)).unwrap();
//! layer.initialize(Some(Shape::vector(3))).unwrap();
//!
//! let bytes = codec::save(&layer).unwrap();
//! let mut restored = codec::load(&bytes).unwrap();
//! restored.initialize(None).unwrap();
//! assert_eq!(restored.parameter_count(), layer.parameter_count());
//! ```

use crate::error::{NetError, NetResult};
use crate::layers::{
    Activation, Convolution, FullyConnected, Input, Layer, LayerKind, LocalConvolution, Output,
    SparselyConnected,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Version written by this build; older versions are still accepted.
pub const FORMAT_VERSION: u32 = 1;

/// Persisted form of one layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub tag: String,
    pub version: u32,
    pub payload: serde_json::Value,
}

/// Rebuilds a layer from its payload.
pub type Loader = fn(serde_json::Value) -> NetResult<Box<dyn Layer>>;

fn boxed<L: Layer + 'static>(layer: NetResult<L>) -> NetResult<Box<dyn Layer>> {
    Ok(Box::new(layer?))
}

/// Tag → loader table.
pub struct Registry {
    loaders: HashMap<String, Loader>,
}

impl Registry {
    pub fn empty() -> Self {
        Self {
            loaders: HashMap::new(),
        }
    }

    /// Registry with a loader for every built-in [`LayerKind`].
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(LayerKind::Input.tag(), |v| boxed(Input::restore(v)));
        registry.register(LayerKind::Output.tag(), |v| boxed(Output::restore(v)));
        registry.register(LayerKind::FullyConnected.tag(), |v| {
            boxed(FullyConnected::restore(v))
        });
        registry.register(LayerKind::SparselyConnected.tag(), |v| {
            boxed(SparselyConnected::restore(v))
        });
        registry.register(LayerKind::Convolution.tag(), |v| {
            boxed(Convolution::restore(v))
        });
        registry.register(LayerKind::LocalConvolution.tag(), |v| {
            boxed(LocalConvolution::restore(v))
        });
        registry.register(LayerKind::Activation.tag(), |v| {
            boxed(Activation::restore(v))
        });
        registry
    }

    /// Adds or replaces the loader for `tag`.
    pub fn register(&mut self, tag: &str, loader: Loader) {
        self.loaders.insert(tag.to_string(), loader);
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.loaders.contains_key(tag)
    }

    pub fn encode(&self, layer: &dyn Layer) -> NetResult<Envelope> {
        Ok(Envelope {
            tag: layer.kind().tag().to_string(),
            version: FORMAT_VERSION,
            payload: layer.save_state()?,
        })
    }

    /// Checks the version and dispatches on the tag.
    pub fn decode(&self, envelope: Envelope) -> NetResult<Box<dyn Layer>> {
        if envelope.version > FORMAT_VERSION {
            return Err(NetError::Codec(format!(
                "format version {} is newer than supported version {}",
                envelope.version, FORMAT_VERSION
            )));
        }
        let loader = self
            .loaders
            .get(&envelope.tag)
            .ok_or_else(|| NetError::Codec(format!("unknown layer tag '{}'", envelope.tag)))?;
        loader(envelope.payload)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Serializes one layer to bytes.
pub fn save(layer: &dyn Layer) -> NetResult<Vec<u8>> {
    let envelope = Registry::empty().encode(layer)?;
    Ok(serde_json::to_vec(&envelope)?)
}

/// Restores a layer saved with [`save`]; it must be initialized before use.
pub fn load(bytes: &[u8]) -> NetResult<Box<dyn Layer>> {
    let envelope: Envelope = serde_json::from_slice(bytes)?;
    Registry::builtin().decode(envelope)
}
