//! Parameter initializers.
//!
//! Connectivity layers never sample random numbers themselves: they ask a
//! [`ParameterInitializer`] for one vector per parameter tensor when they are
//! initialized. The default initializers are built from the
//! `init_*_mean` / `init_*_std` configuration fields.

use crate::error::{NetError, NetResult};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

/// Source of initial parameter values.
pub trait ParameterInitializer {
    /// Draws one scalar.
    fn generate(&mut self) -> f32;

    /// Draws `len` scalars for a whole parameter tensor.
    fn generate_vec(&mut self, len: usize) -> Vec<f32> {
        (0..len).map(|_| self.generate()).collect()
    }
}

/// Gaussian initializer `N(mean, std²)`.
///
/// # Examples
///
/// ```
/// use neural_layers::distribution::{NormalInitializer, ParameterInitializer};
///
/// let mut a = NormalInitializer::new(0.0, 0.1, Some(7)).unwrap();
/// let mut b = NormalInitializer::new(0.0, 0.1, Some(7)).unwrap();
/// assert_eq!(a.generate_vec(4), b.generate_vec(4));
/// ```
pub struct NormalInitializer {
    distribution: Normal<f32>,
    rng: StdRng,
}

impl NormalInitializer {
    /// Creates the initializer; a `seed` makes the draws reproducible.
    ///
    /// Fails with `InvalidConfig` when `std` is negative or either value is not finite.
    pub fn new(mean: f32, std: f32, seed: Option<u64>) -> NetResult<Self> {
        if !mean.is_finite() || !std.is_finite() || std < 0.0 {
            return Err(NetError::InvalidConfig(format!(
                "initializer needs a finite mean and a non-negative std, got N({}, {})",
                mean, std
            )));
        }
        let distribution = Normal::new(mean, std)
            .map_err(|e| NetError::InvalidConfig(format!("initializer: {}", e)))?;
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self { distribution, rng })
    }
}

impl ParameterInitializer for NormalInitializer {
    fn generate(&mut self) -> f32 {
        self.distribution.sample(&mut self.rng)
    }
}

/// Fills every parameter with the same value.
#[derive(Debug, Clone, Copy)]
pub struct ConstantInitializer(pub f32);

impl ParameterInitializer for ConstantInitializer {
    fn generate(&mut self) -> f32 {
        self.0
    }

    fn generate_vec(&mut self, len: usize) -> Vec<f32> {
        vec![self.0; len]
    }
}

/// Initializer for `init_*_mean` / `init_*_std` settings.
///
/// A zero std yields a [`ConstantInitializer`].
pub fn from_moments(
    mean: f32,
    std: f32,
    seed: Option<u64>,
) -> NetResult<Box<dyn ParameterInitializer>> {
    if std == 0.0 && mean.is_finite() {
        return Ok(Box::new(ConstantInitializer(mean)));
    }
    Ok(Box::new(NormalInitializer::new(mean, std, seed)?))
}
