//! Locally connected convolution layer
//!
//! Same sliding-window geometry as [`Convolution`](crate::layers::Convolution),
//! but weights are not shared: every output position `(i, j)` owns its own
//! bank of `K` kernels and `K` biases.
//!
//! ```text
//! y[i, j, k] = b[i, j, k] + Σ_{r, c, d} K_{i,j,k}[r, c, d] · x[i·row_stride + r, j·col_stride + c, d]
//! ```

use crate::buffer::Map;
use crate::distribution::ParameterInitializer;
use crate::error::{NetError, NetResult};
use crate::layers::base::{LayerCore, Trainable};
use crate::layers::convolution::{resolve_axis, ConvolutionConfig, Filter};
use crate::layers::parameters::{ParameterLayout, Parameters};
use crate::layers::{Layer, LayerKind};
use crate::optimizers::Optimizer;
use crate::shape::{Dim, Dims, Shape};
use serde::{Deserialize, Serialize};
use std::any::Any;

/// Filter bank repeated over an `rows × cols` grid of output positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalFilters {
    pub filter: Filter,
    pub rows: usize,
    pub cols: usize,
}

impl LocalFilters {
    pub fn positions(&self) -> usize {
        self.rows * self.cols
    }

    pub fn layout(&self) -> ParameterLayout {
        let bank = self.filter.layout();
        ParameterLayout {
            weight_len: self.positions() * bank.weight_len,
            bias_len: self.positions() * bank.bias_len,
        }
    }

    /// Index of the first kernel value of the bank at `(row, col)`.
    #[inline]
    fn bank_start(&self, row: usize, col: usize) -> usize {
        (row * self.cols + col) * self.filter.layout().weight_len
    }

    /// Index of `b[row, col, kernel]`.
    #[inline]
    pub fn bias_offset(&self, row: usize, col: usize, kernel: usize) -> usize {
        (row * self.cols + col) * self.filter.count + kernel
    }

    /// Index of `K_{row,col,kernel}[r, c, channel]` in the weight tensor.
    #[inline]
    pub fn offset(
        &self,
        row: usize,
        col: usize,
        kernel: usize,
        r: usize,
        c: usize,
        channel: usize,
    ) -> usize {
        self.bank_start(row, col) + self.filter.offset(kernel, r, c, channel)
    }
}

#[derive(Serialize, Deserialize)]
struct LocalConvolutionState {
    config: ConvolutionConfig,
    input_shape: Shape,
    parameters: Option<Parameters>,
}

/// Convolution without weight sharing.
///
/// Configured exactly like a [`Convolution`](crate::layers::Convolution);
/// only the parameter count differs.
///
/// ```
/// use neural_layers::layers::{ConvolutionConfig, Layer, LocalConvolution};
/// use neural_layers::shape::Shape;
///
/// let mut layer = LocalConvolution::new(ConvolutionConfig::new(2, 1)).unwrap();
/// layer.initialize(Some(Shape::new(3, 3, 1))).unwrap();
/// // Four positions, each with one 2x2 kernel and one bias.
/// assert_eq!(layer.parameter_count(), 4 * (4 + 1));
/// ```
pub struct LocalConvolution {
    core: LayerCore,
    config: ConvolutionConfig,
    filters: Option<LocalFilters>,
    trainable: Trainable,
}

impl LocalConvolution {
    pub fn new(config: ConvolutionConfig) -> NetResult<Self> {
        let input_shape = config.input_shape.unwrap_or_else(Shape::dynamic);
        Self::with_state(config, input_shape, None)
    }

    fn with_state(
        config: ConvolutionConfig,
        input_shape: Shape,
        parameters: Option<Parameters>,
    ) -> NetResult<Self> {
        config.validate()?;
        let optimizer = config.optimizer.build()?;
        let trainable = match parameters {
            Some(params) => Trainable::restored(config.init, optimizer, params),
            None => Trainable::new(config.init, optimizer),
        };
        let output_shape = Shape {
            height: config.output_height,
            width: config.output_width,
            depth: Dim::Fixed(config.output_depth),
        };
        let core = LayerCore::new(LayerKind::LocalConvolution, input_shape, output_shape)
            .with_orderings(config.input_data_ordering, config.output_data_ordering);
        Ok(Self {
            core,
            config,
            filters: None,
            trainable,
        })
    }

    pub fn restore(state: serde_json::Value) -> NetResult<Self> {
        let state: LocalConvolutionState = serde_json::from_value(state)?;
        Self::with_state(state.config, state.input_shape, state.parameters)
    }

    pub fn config(&self) -> &ConvolutionConfig {
        &self.config
    }

    pub fn filters(&self) -> Option<LocalFilters> {
        self.filters
    }

    /// Kernel `k` of the bank at output position `(row, col)`.
    pub fn kernel(&self, row: usize, col: usize, k: usize) -> Option<&[f32]> {
        let filters = self.filters?;
        if row >= filters.rows || col >= filters.cols || k >= filters.filter.count {
            return None;
        }
        let start = filters.offset(row, col, k, 0, 0, 0);
        self.weights().get(start..start + filters.filter.kernel_len())
    }

    pub fn weights(&self) -> &[f32] {
        self.trainable.params().weights.values()
    }

    pub fn biases(&self) -> &[f32] {
        self.trainable.params().biases.values()
    }

    pub fn weight_gradient(&self) -> &[f32] {
        self.trainable.params().weights.gradient()
    }

    pub fn bias_gradient(&self) -> &[f32] {
        self.trainable.params().biases.gradient()
    }

    pub fn parameters(&self) -> &Parameters {
        self.trainable.params()
    }

    pub fn set_weights(&mut self, weights: &[f32]) -> NetResult<()> {
        self.core.ensure_initialized()?;
        self.trainable.set_weights(weights, "local_convolution weights")
    }

    pub fn set_biases(&mut self, biases: &[f32]) -> NetResult<()> {
        self.core.ensure_initialized()?;
        self.trainable.set_biases(biases, "local_convolution biases")
    }

    pub fn optimizer(&self) -> &dyn Optimizer {
        self.trainable.optimizer()
    }

    pub fn set_optimizer(&mut self, optimizer: Box<dyn Optimizer>) {
        self.config.optimizer = optimizer.config();
        self.trainable.set_optimizer(optimizer);
    }

    pub fn set_initializers(
        &mut self,
        weights: Box<dyn ParameterInitializer>,
        biases: Box<dyn ParameterInitializer>,
    ) {
        self.trainable.set_initializers(weights, biases);
    }

    fn geometry(&self) -> NetResult<(LocalFilters, Dims, Dims)> {
        let filters = self.filters.ok_or_else(|| {
            NetError::NotInitialized(LayerKind::LocalConvolution.tag().to_string())
        })?;
        Ok((filters, self.core.input_dims()?, self.core.output_dims()?))
    }
}

impl Layer for LocalConvolution {
    fn kind(&self) -> LayerKind {
        LayerKind::LocalConvolution
    }

    fn core(&self) -> &LayerCore {
        &self.core
    }

    fn initialize(&mut self, input_shape: Option<Shape>) -> NetResult<()> {
        let input = self.core.resolve_input(input_shape)?;
        let (kernel_height, rows) = resolve_axis(
            "height",
            input.height,
            self.config.filter_height,
            self.config.output_height,
            self.config.stride,
        )?;
        let (kernel_width, cols) = resolve_axis(
            "width",
            input.width,
            self.config.filter_width,
            self.config.output_width,
            self.config.col_stride(),
        )?;
        let filters = LocalFilters {
            filter: Filter {
                count: self.config.output_depth,
                kernel_height,
                kernel_width,
                depth: input.depth,
            },
            rows,
            cols,
        };

        self.trainable.initialize(filters.layout(), input.size())?;
        self.filters = Some(filters);
        self.core
            .allocate(input, Dims::new(rows, cols, filters.filter.count));
        Ok(())
    }

    fn forward(&mut self, input: &[f32]) -> NetResult<Map<'_>> {
        self.core.begin_forward(input)?;
        let (filters, in_dims, out_dims) = self.geometry()?;
        let filter = filters.filter;
        let (row_stride, col_stride) = (self.config.stride, self.config.col_stride());
        let (in_order, out_order) = (self.core.input_ordering(), self.core.output_ordering());
        self.trainable.cache_input(input, "local_convolution input")?;

        let params = self.trainable.params();
        let weights = params.weights.values();
        let biases = params.biases.values();
        let output = self.core.output_mut();
        for i in 0..out_dims.height {
            for j in 0..out_dims.width {
                for k in 0..filter.count {
                    let mut sum = biases[filters.bias_offset(i, j, k)];
                    for r in 0..filter.kernel_height {
                        for c in 0..filter.kernel_width {
                            let (row, col) = (i * row_stride + r, j * col_stride + c);
                            for d in 0..filter.depth {
                                sum += weights[filters.offset(i, j, k, r, c, d)]
                                    * input[in_order.offset(in_dims, row, col, d)];
                            }
                        }
                    }
                    output[out_order.offset(out_dims, i, j, k)] = sum;
                }
            }
        }

        self.core.finish_forward();
        self.core.output_map()
    }

    /// Like the shared-weight backward pass, except each position accumulates
    /// into its own kernels and bias.
    fn backward(&mut self, output_error: &[f32]) -> NetResult<Map<'_>> {
        self.core.begin_backward(output_error)?;
        let (filters, in_dims, out_dims) = self.geometry()?;
        let filter = filters.filter;
        let (row_stride, col_stride) = (self.config.stride, self.config.col_stride());
        let (in_order, out_order) = (self.core.input_ordering(), self.core.output_ordering());
        self.trainable.observe_error(output_error);

        let (params, input) = self.trainable.parts_mut();
        let input_error = self.core.backward_error_mut();
        input_error.fill(0.0);

        let (weights, weight_gradient) = params.weights.split_mut();
        let bias_gradient = params.biases.gradient_mut();
        for i in 0..out_dims.height {
            for j in 0..out_dims.width {
                for k in 0..filter.count {
                    let e = output_error[out_order.offset(out_dims, i, j, k)];
                    bias_gradient[filters.bias_offset(i, j, k)] += e;
                    for r in 0..filter.kernel_height {
                        for c in 0..filter.kernel_width {
                            let (row, col) = (i * row_stride + r, j * col_stride + c);
                            for d in 0..filter.depth {
                                let w = filters.offset(i, j, k, r, c, d);
                                let x = in_order.offset(in_dims, row, col, d);
                                input_error[x] += weights[w] * e;
                                weight_gradient[w] += input[x] * e;
                            }
                        }
                    }
                }
            }
        }

        self.core.backward_error_map()
    }

    fn update(&mut self) -> NetResult<()> {
        self.core.ensure_initialized()?;
        self.trainable.update()
    }

    fn has_parameters(&self) -> bool {
        true
    }

    fn parameter_count(&self) -> usize {
        self.trainable.params().count()
    }

    fn optimizer_name(&self) -> Option<&'static str> {
        Some(self.trainable.optimizer().name())
    }

    fn save_state(&self) -> NetResult<serde_json::Value> {
        let mut config = self.config;
        if let Some(filters) = self.filters {
            config.filter_height = Some(filters.filter.kernel_height);
            config.filter_width = Some(filters.filter.kernel_width);
        }
        let state = LocalConvolutionState {
            config,
            input_shape: self.core.input_shape(),
            parameters: self
                .core
                .is_initialized()
                .then(|| self.trainable.params().clone()),
        };
        Ok(serde_json::to_value(state)?)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::Convolution;

    fn initialized(config: ConvolutionConfig, input: Shape) -> LocalConvolution {
        let mut layer = LocalConvolution::new(config).unwrap();
        layer.initialize(Some(input)).unwrap();
        layer
    }

    #[test]
    fn test_geometry_and_parameter_count() {
        let layer = initialized(ConvolutionConfig::new(2, 3), Shape::new(4, 5, 2));
        let filters = layer.filters().unwrap();
        assert_eq!((filters.rows, filters.cols), (3, 4));
        assert_eq!(layer.output_shape(), Shape::new(3, 4, 3));
        assert_eq!(layer.parameter_count(), 12 * (3 * 8 + 3));
    }

    #[test]
    fn test_positions_use_their_own_kernels() {
        let mut layer = initialized(ConvolutionConfig::new(2, 1), Shape::new(3, 3, 1));
        layer
            .set_weights(&[
                1.0, 1.0, 1.0, 1.0, // (0, 0)
                0.0, 0.0, 0.0, 0.0, // (0, 1)
                1.0, 0.0, 0.0, 0.0, // (1, 0)
                0.0, 0.0, 0.0, 2.0, // (1, 1)
            ])
            .unwrap();
        layer.set_biases(&[0.0, 0.5, 0.0, -1.0]).unwrap();

        let input: Vec<f32> = (1..=9).map(|v| v as f32).collect();
        let output = layer.forward(&input).unwrap().to_vec();
        // Windows: {1,2,4,5}, {2,3,5,6}, {4,5,7,8}, {5,6,8,9}.
        assert_eq!(output, vec![12.0, 0.5, 4.0, 17.0]);
    }

    #[test]
    fn test_backward_accumulates_per_position() {
        let mut layer = initialized(ConvolutionConfig::new(2, 1), Shape::new(3, 3, 1));
        layer.set_weights(&[1.0; 16]).unwrap();
        layer.set_biases(&[0.0; 4]).unwrap();
        let input: Vec<f32> = (1..=9).map(|v| v as f32).collect();
        layer.forward(&input).unwrap();

        let input_error = layer.backward(&[1.0, 0.0, 0.0, 2.0]).unwrap().to_vec();
        assert_eq!(
            input_error,
            vec![1.0, 1.0, 0.0, 1.0, 3.0, 2.0, 0.0, 2.0, 2.0]
        );
        assert_eq!(&layer.weight_gradient()[..4], &[1.0, 2.0, 4.0, 5.0]);
        assert_eq!(&layer.weight_gradient()[4..12], &[0.0; 8]);
        assert_eq!(&layer.weight_gradient()[12..], &[10.0, 12.0, 16.0, 18.0]);
        assert_eq!(layer.bias_gradient(), &[1.0, 0.0, 0.0, 2.0]);
    }

    #[test]
    fn test_matches_convolution_when_banks_are_equal() {
        let config = ConvolutionConfig::new(2, 2).with_stride(1, 2);
        let input_shape = Shape::new(3, 4, 2);
        let mut shared = Convolution::new(config).unwrap();
        shared.initialize(Some(input_shape)).unwrap();
        let kernels: Vec<f32> = (0..16).map(|v| v as f32 * 0.1 - 0.7).collect();
        shared.set_weights(&kernels).unwrap();
        shared.set_biases(&[0.25, -0.5]).unwrap();

        let mut local = initialized(config, input_shape);
        let positions = local.filters().unwrap().positions();
        local.set_weights(&kernels.repeat(positions)).unwrap();
        local.set_biases(&[0.25f32, -0.5].repeat(positions)).unwrap();

        let input: Vec<f32> = (0..24).map(|v| (v as f32 * 0.37).sin()).collect();
        let expected = shared.forward(&input).unwrap().to_vec();
        let output = local.forward(&input).unwrap().to_vec();
        assert_eq!(output.len(), expected.len());
        for (a, b) in output.iter().zip(&expected) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_kernel_accessor() {
        let mut layer = initialized(ConvolutionConfig::new(1, 2), Shape::new(1, 2, 1));
        layer.set_weights(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(layer.kernel(0, 1, 0), Some(&[3.0][..]));
        assert_eq!(layer.kernel(0, 1, 1), Some(&[4.0][..]));
        assert!(layer.kernel(1, 0, 0).is_none());
        assert!(layer.kernel(0, 0, 2).is_none());
    }

    #[test]
    fn test_restore_keeps_banks() {
        let mut config = ConvolutionConfig::new(1, 1).with_init(crate::layers::InitConfig {
            init_weight_std: 0.5,
            ..crate::layers::InitConfig::seeded(4)
        });
        config.filter_width = None;
        config.output_width = Dim::Fixed(2);
        let layer = initialized(config, Shape::new(2, 3, 1));

        let mut restored = LocalConvolution::restore(layer.save_state().unwrap()).unwrap();
        restored.initialize(None).unwrap();
        assert_eq!(restored.filters(), layer.filters());
        assert_eq!(restored.weights(), layer.weights());
    }
}
