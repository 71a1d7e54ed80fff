//! Error types for the layer chain library.
//!
//! Every fallible operation returns `NetResult<T>`. None of these conditions are
//! recoverable by retrying the same call: the caller fixes configuration or call
//! ordering and runs initialize → forward → backward → update again.

use thiserror::Error;

/// All error conditions raised by layers, optimizers, the chain and the codec.
#[derive(Debug, Error)]
pub enum NetError {
    /// Declared/resolved dimensions conflict, or a gradient disagrees with the
    /// optimizer state it is applied to.
    #[error("shape mismatch in {context}: expected {expected}, found {found}")]
    ShapeMismatch {
        context: String,
        expected: String,
        found: String,
    },

    /// An operation requiring a prior `initialize` was invoked first.
    #[error("{0} is not initialized")]
    NotInitialized(String),

    /// Not enough shape information to resolve dimensions and allocate buffers.
    #[error("{layer} cannot be initialized: {reason}")]
    NotInitializable { layer: String, reason: String },

    /// The layer role does not implement the requested operation.
    #[error("{operation} is not supported by {layer}")]
    NotSupported {
        layer: String,
        operation: &'static str,
    },

    /// A pass consumed a cache (forward input, injected error) that was never filled.
    #[error("{layer}: {what} has not been computed")]
    MissingCache { layer: String, what: &'static str },

    /// A configuration value is out of its valid range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Persisted data could not be decoded into a layer.
    #[error("codec error: {0}")]
    Codec(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type NetResult<T> = Result<T, NetError>;

impl NetError {
    /// Builds a `ShapeMismatch` from anything displayable.
    pub fn shape_mismatch(
        context: impl Into<String>,
        expected: impl std::fmt::Display,
        found: impl std::fmt::Display,
    ) -> Self {
        NetError::ShapeMismatch {
            context: context.into(),
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }

    pub fn not_initializable(layer: impl Into<String>, reason: impl Into<String>) -> Self {
        NetError::NotInitializable {
            layer: layer.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_mismatch_message() {
        let err = NetError::shape_mismatch("fully_connected input", 3, 4);
        assert_eq!(
            err.to_string(),
            "shape mismatch in fully_connected input: expected 3, found 4"
        );
    }

    #[test]
    fn test_not_supported_message() {
        let err = NetError::NotSupported {
            layer: "input".to_string(),
            operation: "backward",
        };
        assert_eq!(err.to_string(), "backward is not supported by input");
    }

    #[test]
    fn test_json_error_converts() {
        let parse: Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: NetError = parse.unwrap_err().into();
        assert!(matches!(err, NetError::Json(_)));
    }
}
