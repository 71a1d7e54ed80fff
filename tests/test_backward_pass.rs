// Tests for backward propagation: input errors, gradient accumulation and
// the error buffers exchanged between neighbouring layers.

use approx::assert_relative_eq;
use neural_layers::chain::Chain;
use neural_layers::error::NetError;
use neural_layers::layers::{
    Activation, ActivationConfig, Convolution, ConvolutionConfig, FullyConnected,
    FullyConnectedConfig, InitConfig, Input, Layer, Modifier, Neuron, SparselyConnected,
    SparselyConnectedConfig,
};
use neural_layers::shape::Shape;

// ============================================================================
// Connectivity layers
// ============================================================================

mod connectivity_tests {
    use super::*;

    #[test]
    fn test_selection_weights_scenario() {
        let mut chain = Chain::new(Input::vector(3));
        chain.push(FullyConnected::new(FullyConnectedConfig::new(2)).unwrap());
        chain.push(Activation::new(Neuron::Linear).unwrap());
        chain.initialize().unwrap();
        {
            let fc = chain.layer_as_mut::<FullyConnected>(1).unwrap();
            fc.set_weights(&[1.0, 0.0, 0.0, 0.0, 1.0, 0.0]).unwrap();
            fc.set_biases(&[0.0, 0.0]).unwrap();
        }

        chain.forward(&[1.0, 2.0, 3.0]).unwrap();
        chain.backward_with_error(&[1.0, 1.0]).unwrap();

        assert_eq!(&chain.input_error().unwrap()[..], &[1.0, 1.0, 0.0]);
        let fc = chain.layer_as::<FullyConnected>(1).unwrap();
        assert_eq!(fc.weight_gradient(), &[1.0, 2.0, 3.0, 1.0, 2.0, 3.0]);
        assert_eq!(fc.bias_gradient(), &[1.0, 1.0]);
    }

    #[test]
    fn test_gradients_accumulate_across_passes() {
        let mut layer =
            FullyConnected::new(FullyConnectedConfig::new(1).with_init(InitConfig::zeros()))
                .unwrap();
        layer.initialize(Some(Shape::vector(2))).unwrap();

        layer.forward(&[1.0, 2.0]).unwrap();
        layer.backward(&[1.0]).unwrap();
        layer.forward(&[3.0, -1.0]).unwrap();
        layer.backward(&[0.5]).unwrap();

        assert_eq!(layer.weight_gradient(), &[2.5, 1.5]);
        assert_eq!(layer.bias_gradient(), &[1.5]);

        layer.update().unwrap();
        assert_eq!(layer.weight_gradient(), &[0.0, 0.0]);
    }

    #[test]
    fn test_sparse_error_follows_connections() {
        let config = SparselyConnectedConfig::new(2, 0.0);
        let mut layer = SparselyConnected::new(config).unwrap();
        layer.initialize(Some(Shape::vector(3))).unwrap();
        layer.forward(&[1.0, 2.0, 3.0]).unwrap();
        let error = layer.backward(&[4.0, -1.0]).unwrap();
        assert_eq!(&error[..], &[0.0, 0.0, 0.0]);
        assert_eq!(layer.bias_gradient(), &[4.0, -1.0]);
    }

    #[test]
    fn test_convolution_error_counts_coverage() {
        let mut layer =
            Convolution::new(ConvolutionConfig::new(2, 1).with_init(InitConfig::zeros())).unwrap();
        layer.initialize(Some(Shape::new(3, 3, 1))).unwrap();
        layer.set_weights(&[1.0; 4]).unwrap();
        layer.forward(&[1.0; 9]).unwrap();

        let error = layer.backward(&[1.0; 4]).unwrap();
        assert_eq!(
            &error[..],
            &[1.0, 2.0, 1.0, 2.0, 4.0, 2.0, 1.0, 2.0, 1.0]
        );
        assert_eq!(layer.weight_gradient(), &[4.0; 4]);
        assert_eq!(layer.bias_gradient(), &[4.0]);
    }

    #[test]
    fn test_backward_before_forward() {
        let mut layer = FullyConnected::new(FullyConnectedConfig::new(2)).unwrap();
        layer.initialize(Some(Shape::vector(2))).unwrap();
        assert!(matches!(
            layer.backward(&[1.0, 1.0]),
            Err(NetError::MissingCache { .. })
        ));
    }

    #[test]
    fn test_error_length_checked() {
        let mut layer = FullyConnected::new(FullyConnectedConfig::new(2)).unwrap();
        layer.initialize(Some(Shape::vector(2))).unwrap();
        layer.forward(&[1.0, 1.0]).unwrap();
        assert!(matches!(
            layer.backward(&[1.0]),
            Err(NetError::ShapeMismatch { .. })
        ));
    }
}

// ============================================================================
// Activation layers
// ============================================================================

mod activation_tests {
    use super::*;

    fn backward_through(neuron: Neuron, input: &[f32]) -> Vec<f32> {
        let mut layer = Activation::new(neuron).unwrap();
        layer.initialize(Some(Shape::vector(input.len()))).unwrap();
        layer.forward(input).unwrap();
        layer.backward(&vec![1.0; input.len()]).unwrap().to_vec()
    }

    #[test]
    fn test_relu_derivative() {
        let error = backward_through(Neuron::RectifiedLinear, &[-1.0, 2.0, 0.5]);
        assert_eq!(error, vec![0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_leaky_relu_derivative() {
        let error = backward_through(
            Neuron::LeakyRectifiedLinear { leak_factor: 0.1 },
            &[-1.0, 2.0],
        );
        assert_relative_eq!(error[0], 0.1, epsilon = 1e-6);
        assert_relative_eq!(error[1], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_sigmoid_derivative_at_zero() {
        let error = backward_through(Neuron::Sigmoid, &[0.0]);
        assert_relative_eq!(error[0], 0.25, epsilon = 1e-6);
    }

    #[test]
    fn test_tanh_derivative_at_zero() {
        let error = backward_through(Neuron::HyperbolicTangent, &[0.0]);
        assert_relative_eq!(error[0], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_dropout_blocks_error_of_dropped_units() {
        let config = ActivationConfig::new(Neuron::Linear)
            .with_modifier(Modifier::Dropout { keep_probability: 0.5 }, Some(17));
        let mut layer = Activation::with_config(config).unwrap();
        layer.initialize(Some(Shape::vector(64))).unwrap();

        let output = layer.forward(&[1.0; 64]).unwrap().to_vec();
        let error = layer.backward(&[1.0; 64]).unwrap().to_vec();
        for (o, e) in output.iter().zip(&error) {
            assert_eq!(o, e);
        }
        assert!(output.iter().any(|&v| v == 0.0));
        assert!(output.iter().any(|&v| v != 0.0));
    }

    #[test]
    fn test_dropout_inactive_outside_training() {
        let config = ActivationConfig::new(Neuron::Linear)
            .with_modifier(Modifier::Dropout { keep_probability: 0.5 }, Some(17));
        let mut layer = Activation::with_config(config).unwrap();
        layer.set_training(false);
        layer.initialize(Some(Shape::vector(16))).unwrap();
        assert_eq!(&layer.forward(&[1.0; 16]).unwrap()[..], &[1.0; 16]);
    }
}

// ============================================================================
// Boundary layers and chains
// ============================================================================

mod boundary_tests {
    use super::*;

    #[test]
    fn test_input_backward_not_supported() {
        let mut input = Input::vector(2);
        input.initialize(None).unwrap();
        input.forward(&[1.0, 2.0]).unwrap();
        assert!(matches!(
            input.backward(&[1.0, 1.0]),
            Err(NetError::NotSupported { .. })
        ));
    }

    #[test]
    fn test_target_error_reaches_first_layer() {
        let mut chain = Chain::new(Input::vector(2));
        chain.push(
            FullyConnected::new(FullyConnectedConfig::new(1).with_init(InitConfig::zeros()))
                .unwrap(),
        );
        chain.initialize().unwrap();
        chain
            .layer_as_mut::<FullyConnected>(1)
            .unwrap()
            .set_weights(&[2.0, -1.0])
            .unwrap();

        chain.forward(&[1.0, 1.0]).unwrap();
        let loss = chain.backward_with_target(&[3.0]).unwrap();
        // value 1, target 3: error -2, loss 2.
        assert_relative_eq!(loss, 2.0, epsilon = 1e-6);
        assert_eq!(&chain.backward_error_buffer(2).unwrap()[..], &[-2.0]);
        assert_eq!(&chain.input_error().unwrap()[..], &[-4.0, 2.0]);
    }
}
