// Tests for numerical gradient checking using finite differences.
// These tests verify that the gradients accumulated by backward match
// central-difference approximations of the loss, half squared error unless
// stated otherwise.

use approx::assert_relative_eq;
use neural_layers::chain::Chain;
use neural_layers::layers::{
    Activation, Convolution, ConvolutionConfig, FullyConnected, FullyConnectedConfig, InitConfig,
    Input, Layer, LocalConvolution, Loss, Neuron, Output, SparselyConnected,
    SparselyConnectedConfig,
};
use neural_layers::shape::Shape;

const STEP: f32 = 1e-2;

fn seeded(seed: u64) -> InitConfig {
    InitConfig {
        init_weight_std: 0.5,
        init_bias_std: 0.5,
        ..InitConfig::seeded(seed)
    }
}

// Half squared error accumulated in f64.
fn half_squared_error(output: &[f32], target: &[f32]) -> f64 {
    output
        .iter()
        .zip(target)
        .map(|(&y, &t)| {
            let d = (y - t) as f64;
            0.5 * d * d
        })
        .sum()
}

// Runs forward then backward with error = output - target.
fn backprop<L: Layer>(layer: &mut L, input: &[f32], target: &[f32]) -> Vec<f32> {
    let output = layer.forward(input).unwrap().to_vec();
    let error: Vec<f32> = output.iter().zip(target).map(|(y, t)| y - t).collect();
    layer.backward(&error).unwrap().to_vec()
}

fn loss_of<L: Layer>(layer: &mut L, input: &[f32], target: &[f32]) -> f64 {
    let output = layer.forward(input).unwrap().to_vec();
    half_squared_error(&output, target)
}

// Compares `analytic[i]` with the central difference of `loss` around `values[i]`.
fn check_against_central_difference(
    values: &[f32],
    analytic: &[f32],
    mut loss: impl FnMut(&[f32]) -> f64,
) {
    assert_eq!(values.len(), analytic.len());
    for i in 0..values.len() {
        let mut plus = values.to_vec();
        plus[i] += STEP;
        let mut minus = values.to_vec();
        minus[i] -= STEP;
        let numeric = (loss(&plus) - loss(&minus)) / (2.0 * STEP as f64);
        assert_relative_eq!(
            analytic[i] as f64,
            numeric,
            epsilon = 2e-3,
            max_relative = 1e-2
        );
    }
}

// ============================================================================
// Fully-connected
// ============================================================================

mod fully_connected_tests {
    use super::*;

    fn layer() -> FullyConnected {
        let mut layer =
            FullyConnected::new(FullyConnectedConfig::new(3).with_init(seeded(21))).unwrap();
        layer.initialize(Some(Shape::vector(4))).unwrap();
        layer
    }

    const INPUT: [f32; 4] = [0.5, -1.0, 0.25, 2.0];
    const TARGET: [f32; 3] = [1.0, 0.0, -1.0];

    #[test]
    fn test_weight_gradient() {
        let mut layer = layer();
        backprop(&mut layer, &INPUT, &TARGET);
        let weights = layer.weights().to_vec();
        let analytic = layer.weight_gradient().to_vec();

        check_against_central_difference(&weights, &analytic, |w| {
            layer.set_weights(w).unwrap();
            loss_of(&mut layer, &INPUT, &TARGET)
        });
    }

    #[test]
    fn test_bias_gradient() {
        let mut layer = layer();
        backprop(&mut layer, &INPUT, &TARGET);
        let biases = layer.biases().to_vec();
        let analytic = layer.bias_gradient().to_vec();

        check_against_central_difference(&biases, &analytic, |b| {
            layer.set_biases(b).unwrap();
            loss_of(&mut layer, &INPUT, &TARGET)
        });
    }

    #[test]
    fn test_input_error() {
        let mut layer = layer();
        let analytic = backprop(&mut layer, &INPUT, &TARGET);

        check_against_central_difference(&INPUT, &analytic, |x| {
            loss_of(&mut layer, x, &TARGET)
        });
    }
}

// ============================================================================
// Sparsely-connected
// ============================================================================

mod sparsely_connected_tests {
    use super::*;

    const INPUT: [f32; 5] = [1.0, -0.5, 0.75, 0.0, -2.0];
    const TARGET: [f32; 4] = [0.5, 0.5, -0.5, 1.0];

    fn layer() -> SparselyConnected {
        let config = SparselyConnectedConfig::new(4, 0.5).with_init(seeded(31));
        let mut layer = SparselyConnected::new(config).unwrap();
        layer.initialize(Some(Shape::vector(5))).unwrap();
        layer
    }

    #[test]
    fn test_weight_gradient() {
        let mut layer = layer();
        backprop(&mut layer, &INPUT, &TARGET);
        let weights = layer.weights().to_vec();
        let analytic = layer.weight_gradient().to_vec();

        check_against_central_difference(&weights, &analytic, |w| {
            layer.set_weights(w).unwrap();
            loss_of(&mut layer, &INPUT, &TARGET)
        });
    }

    #[test]
    fn test_input_error() {
        let mut layer = layer();
        let analytic = backprop(&mut layer, &INPUT, &TARGET);

        check_against_central_difference(&INPUT, &analytic, |x| {
            loss_of(&mut layer, x, &TARGET)
        });
    }
}

// ============================================================================
// Convolution
// ============================================================================

mod convolution_tests {
    use super::*;

    fn input() -> Vec<f32> {
        (0..32).map(|i| ((i * 7 % 11) as f32 - 5.0) / 5.0).collect()
    }

    fn layer() -> Convolution {
        let config = ConvolutionConfig::new(3, 2)
            .with_stride(1, 2)
            .with_init(seeded(41));
        let mut layer = Convolution::new(config).unwrap();
        layer.initialize(Some(Shape::new(4, 4, 2))).unwrap();
        layer
    }

    fn target(len: usize) -> Vec<f32> {
        (0..len).map(|i| (i as f32 * 0.3).sin()).collect()
    }

    #[test]
    fn test_weight_gradient() {
        let mut layer = layer();
        let input = input();
        let target = target(layer.output_shape().size().unwrap());
        backprop(&mut layer, &input, &target);
        let weights = layer.weights().to_vec();
        let analytic = layer.weight_gradient().to_vec();

        check_against_central_difference(&weights, &analytic, |w| {
            layer.set_weights(w).unwrap();
            loss_of(&mut layer, &input, &target)
        });
    }

    #[test]
    fn test_bias_gradient() {
        let mut layer = layer();
        let input = input();
        let target = target(layer.output_shape().size().unwrap());
        backprop(&mut layer, &input, &target);
        let biases = layer.biases().to_vec();
        let analytic = layer.bias_gradient().to_vec();

        check_against_central_difference(&biases, &analytic, |b| {
            layer.set_biases(b).unwrap();
            loss_of(&mut layer, &input, &target)
        });
    }

    #[test]
    fn test_input_error() {
        let mut layer = layer();
        let input = input();
        let target = target(layer.output_shape().size().unwrap());
        let analytic = backprop(&mut layer, &input, &target);

        check_against_central_difference(&input, &analytic, |x| {
            loss_of(&mut layer, x, &target)
        });
    }
}

// ============================================================================
// Locally connected convolution
// ============================================================================

mod local_convolution_tests {
    use super::*;

    fn input() -> Vec<f32> {
        (0..30).map(|i| ((i * 5 % 13) as f32 - 6.0) / 6.0).collect()
    }

    fn layer() -> LocalConvolution {
        let config = ConvolutionConfig::new(2, 2)
            .with_stride(2, 1)
            .with_init(seeded(45));
        let mut layer = LocalConvolution::new(config).unwrap();
        layer.initialize(Some(Shape::new(5, 3, 2))).unwrap();
        layer
    }

    fn target(len: usize) -> Vec<f32> {
        (0..len).map(|i| (i as f32 * 0.7).cos()).collect()
    }

    #[test]
    fn test_weight_gradient() {
        let mut layer = layer();
        let input = input();
        let target = target(layer.output_shape().size().unwrap());
        backprop(&mut layer, &input, &target);
        let weights = layer.weights().to_vec();
        let analytic = layer.weight_gradient().to_vec();

        check_against_central_difference(&weights, &analytic, |w| {
            layer.set_weights(w).unwrap();
            loss_of(&mut layer, &input, &target)
        });
    }

    #[test]
    fn test_bias_gradient() {
        let mut layer = layer();
        let input = input();
        let target = target(layer.output_shape().size().unwrap());
        backprop(&mut layer, &input, &target);
        let biases = layer.biases().to_vec();
        let analytic = layer.bias_gradient().to_vec();

        check_against_central_difference(&biases, &analytic, |b| {
            layer.set_biases(b).unwrap();
            loss_of(&mut layer, &input, &target)
        });
    }

    #[test]
    fn test_input_error() {
        let mut layer = layer();
        let input = input();
        let target = target(layer.output_shape().size().unwrap());
        let analytic = backprop(&mut layer, &input, &target);

        check_against_central_difference(&input, &analytic, |x| {
            loss_of(&mut layer, x, &target)
        });
    }
}

// ============================================================================
// Whole chain with nonlinear activations
// ============================================================================

mod chain_tests {
    use super::*;

    const INPUT: [f32; 3] = [0.4, -0.8, 1.2];
    const TARGET: [f32; 2] = [0.25, -0.5];

    fn chain(neuron: Neuron) -> Chain {
        let mut chain = Chain::new(Input::vector(3));
        chain.push(FullyConnected::new(FullyConnectedConfig::new(4).with_init(seeded(51))).unwrap());
        chain.push(Activation::new(neuron).unwrap());
        chain.push(FullyConnected::new(FullyConnectedConfig::new(2).with_init(seeded(52))).unwrap());
        chain.initialize().unwrap();
        chain
    }

    fn chain_loss(chain: &mut Chain) -> f64 {
        let output = chain.forward(&INPUT).unwrap().to_vec();
        half_squared_error(&output, &TARGET)
    }

    fn check_first_layer(neuron: Neuron) {
        let mut chain = chain(neuron);
        chain.forward(&INPUT).unwrap();
        chain.backward_with_target(&TARGET).unwrap();
        let first = chain.layer_as::<FullyConnected>(1).unwrap();
        let weights = first.weights().to_vec();
        let analytic = first.weight_gradient().to_vec();

        check_against_central_difference(&weights, &analytic, |w| {
            chain
                .layer_as_mut::<FullyConnected>(1)
                .unwrap()
                .set_weights(w)
                .unwrap();
            chain_loss(&mut chain)
        });
    }

    #[test]
    fn test_through_tanh() {
        check_first_layer(Neuron::HyperbolicTangent);
    }

    #[test]
    fn test_through_sigmoid() {
        check_first_layer(Neuron::Sigmoid);
    }

    #[test]
    fn test_through_lecun_sigmoid() {
        check_first_layer(Neuron::LeCunSigmoid);
    }

    #[test]
    fn test_through_soft_sign() {
        check_first_layer(Neuron::SoftSign);
    }

    #[test]
    fn test_cross_entropy_output() {
        let target = [1.0, 0.0];
        let mut chain = chain(Neuron::HyperbolicTangent);
        chain.push(Activation::new(Neuron::Sigmoid).unwrap());
        chain.set_output(Output::new().with_loss(Loss::CrossEntropy));
        chain.initialize().unwrap();

        chain.forward(&INPUT).unwrap();
        chain.backward_with_target(&target).unwrap();
        let last = chain.layer_as::<FullyConnected>(3).unwrap();
        let weights = last.weights().to_vec();
        let analytic = last.weight_gradient().to_vec();

        check_against_central_difference(&weights, &analytic, |w| {
            chain
                .layer_as_mut::<FullyConnected>(3)
                .unwrap()
                .set_weights(w)
                .unwrap();
            chain.forward(&INPUT).unwrap();
            chain.backward_with_target(&target).unwrap() as f64
        });
    }
}
