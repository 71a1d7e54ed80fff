//! Convolution layer
//!
//! A bank of equally shaped filters slid over a `height × width × depth` input
//! volume (cross-correlation, no padding). Filter `k` produces output channel
//! `k`:
//!
//! ```text
//! y[i, j, k] = b[k] + Σ_{r, c, d} K_k[r, c, d] · x[i·row_stride + r, j·col_stride + c, d]
//! ```
//!
//! Output extents follow `OH = (H − kh) / row_stride + 1` and
//! `OW = (W − kw) / col_stride + 1`. When a kernel extent is left open it is
//! derived from the declared output extent instead.

use crate::buffer::{DataOrdering, Map};
use crate::distribution::ParameterInitializer;
use crate::error::{NetError, NetResult};
use crate::layers::base::{InitConfig, LayerCore, Trainable};
use crate::layers::parameters::{ParameterLayout, Parameters};
use crate::layers::{Layer, LayerKind};
use crate::optimizers::{Optimizer, OptimizerConfig};
use crate::shape::{Dim, Dims, Shape};
use serde::{Deserialize, Serialize};
use std::any::Any;

fn dynamic_dim() -> Dim {
    Dim::Dynamic
}

fn unit_stride() -> usize {
    1
}

/// Construction options of a [`Convolution`] layer.
///
/// ```json
/// {
///     "input_shape": { "height": 28, "width": 28, "depth": 1 },
///     "filter_height": 5,
///     "filter_width": 5,
///     "output_depth": 8,
///     "stride": 1
/// }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConvolutionConfig {
    /// Volume the incoming data is viewed as; must hold as many elements as
    /// the previous layer produces. Taken from the previous layer when absent.
    #[serde(default)]
    pub input_shape: Option<Shape>,
    #[serde(default)]
    pub filter_height: Option<usize>,
    #[serde(default)]
    pub filter_width: Option<usize>,
    #[serde(default = "dynamic_dim")]
    pub output_height: Dim,
    #[serde(default = "dynamic_dim")]
    pub output_width: Dim,
    /// Number of filters, i.e. output channels.
    pub output_depth: usize,
    /// Row stride; also the column stride unless `col_stride` is set.
    #[serde(default = "unit_stride")]
    pub stride: usize,
    #[serde(default)]
    pub col_stride: Option<usize>,
    #[serde(flatten)]
    pub init: InitConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub input_data_ordering: DataOrdering,
    #[serde(default)]
    pub output_data_ordering: DataOrdering,
}

impl ConvolutionConfig {
    /// `filter_count` square `kernel_size` filters with unit stride.
    pub fn new(kernel_size: usize, filter_count: usize) -> Self {
        Self {
            input_shape: None,
            filter_height: Some(kernel_size),
            filter_width: Some(kernel_size),
            output_height: Dim::Dynamic,
            output_width: Dim::Dynamic,
            output_depth: filter_count,
            stride: 1,
            col_stride: None,
            init: InitConfig::default(),
            optimizer: OptimizerConfig::None,
            input_data_ordering: DataOrdering::RowMajor,
            output_data_ordering: DataOrdering::RowMajor,
        }
    }

    pub fn with_init(mut self, init: InitConfig) -> Self {
        self.init = init;
        self
    }

    pub fn with_optimizer(mut self, optimizer: OptimizerConfig) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn with_stride(mut self, row_stride: usize, col_stride: usize) -> Self {
        self.stride = row_stride;
        self.col_stride = Some(col_stride);
        self
    }

    pub fn col_stride(&self) -> usize {
        self.col_stride.unwrap_or(self.stride)
    }

    pub fn validate(&self) -> NetResult<()> {
        if self.output_depth == 0 {
            return Err(NetError::InvalidConfig(
                "convolution output_depth (filter count) must be positive".to_string(),
            ));
        }
        if self.stride == 0 || self.col_stride() == 0 {
            return Err(NetError::InvalidConfig(
                "convolution strides must be positive".to_string(),
            ));
        }
        if self.filter_height == Some(0) || self.filter_width == Some(0) {
            return Err(NetError::InvalidConfig(
                "convolution filter extents must be positive".to_string(),
            ));
        }
        self.output_height.validate("convolution output_height")?;
        self.output_width.validate("convolution output_width")?;
        if let Some(shape) = self.input_shape {
            shape.validate("convolution input_shape")?;
        }
        self.init.validate()?;
        self.optimizer.validate()
    }
}

/// Geometry of a filter bank: `count` kernels of `kernel_height ×
/// kernel_width × depth` plus one bias each.
///
/// Kernel values are stored kernel by kernel, row-major, depth innermost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub count: usize,
    pub kernel_height: usize,
    pub kernel_width: usize,
    pub depth: usize,
}

impl Filter {
    pub fn kernel_len(&self) -> usize {
        self.kernel_height * self.kernel_width * self.depth
    }

    pub fn layout(&self) -> ParameterLayout {
        ParameterLayout {
            weight_len: self.count * self.kernel_len(),
            bias_len: self.count,
        }
    }

    /// Index of `K_kernel[row, col, channel]` in the weight tensor.
    #[inline]
    pub fn offset(&self, kernel: usize, row: usize, col: usize, channel: usize) -> usize {
        ((kernel * self.kernel_height + row) * self.kernel_width + col) * self.depth + channel
    }
}

/// Resolves one spatial axis: `(kernel, output)` extents for an input extent.
pub(crate) fn resolve_axis(
    axis: &str,
    input: usize,
    kernel: Option<usize>,
    declared_output: Dim,
    stride: usize,
) -> NetResult<(usize, usize)> {
    match (kernel, declared_output) {
        (Some(kernel), declared) => {
            if kernel > input {
                return Err(NetError::shape_mismatch(
                    format!("convolution filter {}", axis),
                    format!("at most {}", input),
                    kernel,
                ));
            }
            let output = (input - kernel) / stride + 1;
            declared.bind(output, &format!("convolution output {}", axis))?;
            Ok((kernel, output))
        }
        (None, Dim::Fixed(output)) => {
            let span = output.checked_sub(1).and_then(|steps| steps.checked_mul(stride));
            let span = match span {
                Some(span) if span < input => span,
                _ => {
                    return Err(NetError::not_initializable(
                        LayerKind::Convolution.tag(),
                        format!(
                            "output {} {} with stride {} does not fit input {} {}",
                            axis, output, stride, axis, input
                        ),
                    ))
                }
            };
            Ok((input - span, output))
        }
        (None, Dim::Dynamic) => Err(NetError::not_initializable(
            LayerKind::Convolution.tag(),
            format!("neither filter {} nor output {} is known", axis, axis),
        )),
    }
}

#[derive(Serialize, Deserialize)]
struct ConvolutionState {
    config: ConvolutionConfig,
    input_shape: Shape,
    parameters: Option<Parameters>,
}

/// Filter-bank convolution layer.
///
/// # Example
///
/// ```
/// use neural_layers::layers::{Convolution, ConvolutionConfig, Layer};
/// use neural_layers::shape::Shape;
///
/// let mut conv = Convolution::new(ConvolutionConfig::new(2, 1)).unwrap();
/// conv.initialize(Some(Shape::new(3, 3, 1))).unwrap();
/// conv.set_weights(&[1.0; 4]).unwrap();
/// conv.set_biases(&[0.0]).unwrap();
///
/// let output = conv.forward(&[1.0; 9]).unwrap();
/// assert_eq!(&output[..], &[4.0; 4]);
/// assert_eq!(conv.output_shape(), Shape::new(2, 2, 1));
/// ```
pub struct Convolution {
    core: LayerCore,
    config: ConvolutionConfig,
    filter: Option<Filter>,
    trainable: Trainable,
}

impl Convolution {
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
        let core = LayerCore::new(LayerKind::Convolution, input_shape, output_shape)
            .with_orderings(config.input_data_ordering, config.output_data_ordering);
        Ok(Self {
            core,
            config,
            filter: None,
            trainable,
        })
    }

    /// Rebuilds a layer from [`Layer::save_state`] output.
    pub fn restore(state: serde_json::Value) -> NetResult<Self> {
        let state: ConvolutionState = serde_json::from_value(state)?;
        Self::with_state(state.config, state.input_shape, state.parameters)
    }

    pub fn config(&self) -> &ConvolutionConfig {
        &self.config
    }

    /// Filter geometry, known once initialized.
    pub fn filter(&self) -> Option<Filter> {
        self.filter
    }

    /// All kernels, see [`Filter::offset`] for the layout.
    pub fn weights(&self) -> &[f32] {
        self.trainable.params().weights.values()
    }

    /// Values of kernel `k`, or `None` when out of range or uninitialized.
    pub fn kernel(&self, k: usize) -> Option<&[f32]> {
        let filter = self.filter?;
        if k >= filter.count {
            return None;
        }
        let len = filter.kernel_len();
        self.weights().get(k * len..(k + 1) * len)
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
        self.trainable.set_weights(weights, "convolution weights")
    }

    pub fn set_biases(&mut self, biases: &[f32]) -> NetResult<()> {
        self.core.ensure_initialized()?;
        self.trainable.set_biases(biases, "convolution biases")
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

    fn geometry(&self) -> NetResult<(Filter, Dims, Dims)> {
        let filter = self
            .filter
            .ok_or_else(|| NetError::NotInitialized(LayerKind::Convolution.tag().to_string()))?;
        Ok((filter, self.core.input_dims()?, self.core.output_dims()?))
    }
}

impl Layer for Convolution {
    fn kind(&self) -> LayerKind {
        LayerKind::Convolution
    }

    fn core(&self) -> &LayerCore {
        &self.core
    }

    fn initialize(&mut self, input_shape: Option<Shape>) -> NetResult<()> {
        let input = self.core.resolve_input(input_shape)?;
        let (kernel_height, output_height) = resolve_axis(
            "height",
            input.height,
            self.config.filter_height,
            self.config.output_height,
            self.config.stride,
        )?;
        let (kernel_width, output_width) = resolve_axis(
            "width",
            input.width,
            self.config.filter_width,
            self.config.output_width,
            self.config.col_stride(),
        )?;
        let filter = Filter {
            count: self.config.output_depth,
            kernel_height,
            kernel_width,
            depth: input.depth,
        };

        self.trainable.initialize(filter.layout(), input.size())?;
        self.filter = Some(filter);
        self.core.allocate(
            input,
            Dims::new(output_height, output_width, filter.count),
        );
        Ok(())
    }

    fn forward(&mut self, input: &[f32]) -> NetResult<Map<'_>> {
        self.core.begin_forward(input)?;
        let (filter, in_dims, out_dims) = self.geometry()?;
        let (row_stride, col_stride) = (self.config.stride, self.config.col_stride());
        let (in_order, out_order) = (self.core.input_ordering(), self.core.output_ordering());
        self.trainable.cache_input(input, "convolution input")?;

        let params = self.trainable.params();
        let weights = params.weights.values();
        let biases = params.biases.values();
        let output = self.core.output_mut();
        for i in 0..out_dims.height {
            for j in 0..out_dims.width {
                for k in 0..filter.count {
                    let mut sum = biases[k];
                    for r in 0..filter.kernel_height {
                        for c in 0..filter.kernel_width {
                            let (row, col) = (i * row_stride + r, j * col_stride + c);
                            for d in 0..filter.depth {
                                sum += weights[filter.offset(k, r, c, d)]
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

    /// Scatters each output error back through its receptive field and
    /// accumulates `dK_k += Σ patch · e_k`, `db_k += Σ e_k`.
    fn backward(&mut self, output_error: &[f32]) -> NetResult<Map<'_>> {
        self.core.begin_backward(output_error)?;
        let (filter, in_dims, out_dims) = self.geometry()?;
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
                    bias_gradient[k] += e;
                    for r in 0..filter.kernel_height {
                        for c in 0..filter.kernel_width {
                            let (row, col) = (i * row_stride + r, j * col_stride + c);
                            for d in 0..filter.depth {
                                let w = filter.offset(k, r, c, d);
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

    /// Persists the resolved kernel extents so a restored layer rebuilds the
    /// same filter bank.
    fn save_state(&self) -> NetResult<serde_json::Value> {
        let mut config = self.config;
        if let Some(filter) = self.filter {
            config.filter_height = Some(filter.kernel_height);
            config.filter_width = Some(filter.kernel_width);
        }
        let state = ConvolutionState {
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
