//! Feed-forward neural network layers
//!
//! This library provides composable layers for feed-forward networks with
//! backpropagation: boundary layers with a selectable loss, fully-connected,
//! sparsely-connected, convolution and locally connected convolution layers,
//! pointwise activations and pluggable optimizers.
//!
//! # Modules
//!
//! - `shape`: dimensions that may stay dynamic until initialization
//! - `buffer`: aligned owned buffers and the shaped views layers exchange
//! - `layers`: the `Layer` trait and every layer kind
//! - `optimizers`: `Optimizer` trait, gradient descent, Adam and a frozen variant
//! - `chain`: ordered execution of layers, training steps and persistence
//! - `config`: JSON chain configuration
//! - `codec`: versioned per-layer persistence
//! - `distribution`: parameter initializers
//! - `diagnostics`: injectable event sink backed by `log`
//! - `error`: the crate error type
//!
//! # Example
//!
//! ```
//! use neural_layers::chain::Chain;
//! use neural_layers::layers::{Activation, FullyConnected, FullyConnectedConfig, Input, Neuron};
//! use neural_layers::optimizers::OptimizerConfig;
//!
//! let mut chain = Chain::new(Input::vector(2));
//! chain.push(
//!     FullyConnected::new(FullyConnectedConfig::new(1).with_optimizer(OptimizerConfig::adam(0.01)))
//!         .unwrap(),
//! );
//! chain.push(Activation::new(Neuron::Sigmoid).unwrap());
//! chain.initialize().unwrap();
//!
//! let loss = chain.train_step(&[0.5, -0.5], &[1.0]).unwrap();
//! assert!(loss > 0.0);
//! ```

pub mod buffer;
pub mod chain;
pub mod codec;
pub mod config;
pub mod diagnostics;
pub mod distribution;
pub mod error;
pub mod layers;
pub mod optimizers;
pub mod shape;

pub use chain::{Chain, UpdateSchedule};
pub use error::{NetError, NetResult};
pub use layers::{Layer, LayerKind};
pub use shape::{Dim, Dims, Shape};
