// Tests for chain configuration parsing
//
// This file tests the config module including:
// - Loading valid JSON config files
// - Building and initializing chains from them
// - Handling invalid JSON, invalid values and missing files

use neural_layers::chain::UpdateSchedule;
use neural_layers::config::{load_config, ChainConfig, LayerConfig};
use neural_layers::error::NetError;
use neural_layers::layers::{FullyConnected, Layer, Neuron};
use neural_layers::optimizers::OptimizerConfig;
use neural_layers::shape::{Dim, Shape};
use std::io::Write;
use tempfile::NamedTempFile;

fn write_temp_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp config");
    file.write_all(contents.as_bytes())
        .expect("write temp config");
    file
}

const REGRESSION_CONFIG: &str = r#"{
    "input": { "height": 4 },
    "layers": [
        { "layer_type": "fully_connected", "output_size": 8, "seed": 1,
          "optimizer": { "type": "adam", "learning_rate": 0.01 } },
        { "layer_type": "activation", "neuron": { "function": "hyperbolic_tangent" } },
        { "layer_type": "sparsely_connected", "output_size": 4, "connection_probability": 0.5 },
        { "layer_type": "fully_connected", "output_size": 1,
          "optimizer": { "type": "gradient_descent", "learning_rate": 0.05 } }
    ],
    "update_schedule": { "mode": "every_batch", "size": 8 }
}"#;

// ============================================================================
// Valid Config Loading Tests
// ============================================================================

mod valid_config_tests {
    use super::*;

    #[test]
    fn test_load_regression_config() {
        let temp = write_temp_config(REGRESSION_CONFIG);
        let config = load_config(temp.path()).expect("Failed to load regression config");

        assert_eq!(config.input, Shape::vector(4));
        assert_eq!(config.layers.len(), 4);
        assert_eq!(config.update_schedule, UpdateSchedule::EveryBatch { size: 8 });
        match &config.layers[0] {
            LayerConfig::FullyConnected(fc) => {
                assert_eq!(fc.output_size, 8);
                assert_eq!(fc.init.seed, Some(1));
                assert_eq!(fc.optimizer, OptimizerConfig::adam(0.01));
            }
            other => panic!("unexpected first layer {:?}", other),
        }
        match &config.layers[1] {
            LayerConfig::Activation(activation) => {
                assert_eq!(activation.neuron, Neuron::HyperbolicTangent)
            }
            other => panic!("unexpected second layer {:?}", other),
        }
    }

    #[test]
    fn test_build_chain_from_file() {
        let temp = write_temp_config(REGRESSION_CONFIG);
        let mut chain = load_config(temp.path()).unwrap().build().unwrap();
        chain.initialize().unwrap();

        assert_eq!(chain.len(), 6);
        assert!(chain.is_initialized());
        assert_eq!(chain.output().output_shape(), Shape::vector(1));
        assert_eq!(chain.layer_as::<FullyConnected>(1).unwrap().weights().len(), 32);
        assert_eq!(chain.forward(&[0.0, 1.0, 0.0, -1.0]).unwrap().len(), 1);
    }

    #[test]
    fn test_defaults_when_fields_missing() {
        let config = ChainConfig::from_json(
            r#"{ "input": { "height": null },
                 "layers": [ { "layer_type": "activation", "neuron": { "function": "soft_sign" } } ] }"#,
        )
        .unwrap();
        assert_eq!(config.input.height, Dim::Dynamic);
        assert_eq!(config.input.width, Dim::Fixed(1));
        assert_eq!(config.update_schedule, UpdateSchedule::EverySample);
        assert_eq!(config.output, None);
    }

    #[test]
    fn test_convolution_config() {
        let config = ChainConfig::from_json(
            r#"{ "input": { "height": 5, "width": 5, "depth": 1 },
                 "layers": [ { "layer_type": "convolution", "output_height": 3,
                               "output_width": 3, "output_depth": 2 } ] }"#,
        )
        .unwrap();
        let mut chain = config.build().unwrap();
        chain.initialize().unwrap();
        assert_eq!(chain.output().output_shape(), Shape::new(3, 3, 2));
    }
}

// ============================================================================
// Invalid Config Tests
// ============================================================================

mod invalid_config_tests {
    use super::*;

    #[test]
    fn test_missing_file() {
        let result = load_config("/nonexistent/path/chain.json");
        assert!(matches!(result, Err(NetError::Io(_))));
    }

    #[test]
    fn test_invalid_json() {
        let temp = write_temp_config("{ not json");
        assert!(matches!(load_config(temp.path()), Err(NetError::Json(_))));
    }

    #[test]
    fn test_invalid_learning_rate() {
        let temp = write_temp_config(
            r#"{ "input": { "height": 2 },
                 "layers": [ { "layer_type": "fully_connected", "output_size": 1,
                               "optimizer": { "type": "gradient_descent", "learning_rate": -1.0 } } ] }"#,
        );
        assert!(matches!(
            load_config(temp.path()),
            Err(NetError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_invalid_connection_probability() {
        let result = ChainConfig::from_json(
            r#"{ "input": { "height": 2 },
                 "layers": [ { "layer_type": "sparsely_connected", "output_size": 1,
                               "connection_probability": 1.5 } ] }"#,
        );
        assert!(matches!(result, Err(NetError::InvalidConfig(_))));
    }

    #[test]
    fn test_invalid_batch_size() {
        let result = ChainConfig::from_json(
            r#"{ "input": { "height": 2 },
                 "layers": [ { "layer_type": "activation", "neuron": { "function": "linear" } } ],
                 "update_schedule": { "mode": "every_batch", "size": 0 } }"#,
        );
        assert!(matches!(result, Err(NetError::InvalidConfig(_))));
    }

    #[test]
    fn test_zero_dimension_rejected() {
        let result = ChainConfig::from_json(
            r#"{ "input": { "height": 0 },
                 "layers": [ { "layer_type": "activation", "neuron": { "function": "linear" } } ] }"#,
        );
        assert!(matches!(result, Err(NetError::Json(_))));
    }
}
