// Copyright 2025 Irreducible Inc.

use anyhow::{ensure, Context, Result};
use rayon::prelude::*;
use tensormem_runtime::{DataType, TensorInfo, TensorShape};

/// A numeric layer mapping one `f32` tensor to another.
///
/// Layer parameters (weights, window sizes, ...) are fixed at construction. [`Kernel::configure`]
/// validates the tensor shapes the layer will run on, [`Kernel::run`] computes the output.
pub trait Kernel: Send + Sync {
	fn configure(&mut self, input: &TensorInfo, output: &TensorInfo) -> Result<()>;

	/// Number of `f32` scratch elements [`Kernel::run`] expects in `workspace`.
	fn workspace_len(&self) -> usize {
		0
	}

	fn run(&self, input: &[f32], output: &mut [f32], workspace: &mut [f32]) -> Result<()>;
}

fn check_f32(info: &TensorInfo) -> Result<()> {
	ensure!(
		info.data_type() == DataType::F32,
		"expected an f32 tensor, got {:?}",
		info.data_type()
	);
	Ok(())
}

fn check_lens(input: &[f32], output: &[f32], shapes: &(TensorShape, TensorShape)) -> Result<()> {
	let (input_shape, output_shape) = shapes;
	ensure!(input.len() == input_shape.total_size()?, "input holds {} elements", input.len());
	ensure!(output.len() == output_shape.total_size()?, "output holds {} elements", output.len());
	Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PadStride {
	pub stride: usize,
	pub pad: usize,
}

/// Output extent of a sliding window along one dimension.
fn window_output(extent: usize, window: usize, pad_stride: PadStride) -> Option<usize> {
	let padded = extent + 2 * pad_stride.pad;
	(padded >= window && pad_stride.stride > 0).then(|| (padded - window) / pad_stride.stride + 1)
}

/// 2D convolution lowered to a matrix product over an im2col workspace.
#[derive(Debug)]
pub struct Convolution {
	kernel_size: usize,
	out_channels: usize,
	pad_stride: PadStride,
	/// Laid out as `[out_channel][in_channel][ky][kx]`.
	weights: Vec<f32>,
	biases: Vec<f32>,
	shapes: Option<(TensorShape, TensorShape)>,
}

impl Convolution {
	pub fn new(
		kernel_size: usize,
		out_channels: usize,
		pad_stride: PadStride,
		weights: Vec<f32>,
		biases: Vec<f32>,
	) -> Self {
		Self {
			kernel_size,
			out_channels,
			pad_stride,
			weights,
			biases,
			shapes: None,
		}
	}

	/// Output shape for an input of `input` shape.
	pub fn output_shape(&self, input: &TensorShape) -> Option<TensorShape> {
		let width = window_output(input.x(), self.kernel_size, self.pad_stride)?;
		let height = window_output(input.y(), self.kernel_size, self.pad_stride)?;
		Some(TensorShape::new(&[width, height, self.out_channels]))
	}

	fn rows(&self, in_channels: usize) -> usize {
		self.kernel_size * self.kernel_size * in_channels
	}
}

impl Kernel for Convolution {
	fn configure(&mut self, input: &TensorInfo, output: &TensorInfo) -> Result<()> {
		check_f32(input)?;
		check_f32(output)?;

		let expected = self
			.output_shape(&input.shape())
			.context("convolution window does not fit the input")?;
		ensure!(output.shape() == expected, "convolution output must be {expected}");
		ensure!(
			self.weights.len() == self.rows(input.shape().z()) * self.out_channels,
			"convolution expects {} weights",
			self.rows(input.shape().z()) * self.out_channels
		);
		ensure!(
			self.biases.len() == self.out_channels,
			"convolution expects {} biases",
			self.out_channels
		);

		self.shapes = Some((input.shape(), output.shape()));
		Ok(())
	}

	fn workspace_len(&self) -> usize {
		self.shapes.map_or(0, |(input, output)| {
			self.rows(input.z()) * output.x() * output.y()
		})
	}

	fn run(&self, input: &[f32], output: &mut [f32], workspace: &mut [f32]) -> Result<()> {
		let shapes = self.shapes.context("convolution is not configured")?;
		check_lens(input, output, &shapes)?;
		ensure!(workspace.len() >= self.workspace_len(), "convolution workspace is too small");

		let (input_shape, output_shape) = shapes;
		let (in_width, in_height) = (input_shape.x(), input_shape.y());
		let (out_width, out_height) = (output_shape.x(), output_shape.y());
		let k = self.kernel_size;
		let PadStride { stride, pad } = self.pad_stride;
		let cols = out_width * out_height;
		let rows = self.rows(input_shape.z());
		let columns = &mut workspace[..rows * cols];

		columns
			.par_chunks_mut(cols)
			.enumerate()
			.for_each(|(row, column)| {
				let (channel, ky, kx) = (row / (k * k), row / k % k, row % k);
				let plane = &input[channel * in_width * in_height..][..in_width * in_height];
				for oy in 0..out_height {
					for ox in 0..out_width {
						let iy = (oy * stride + ky).checked_sub(pad).filter(|&iy| iy < in_height);
						let ix = (ox * stride + kx).checked_sub(pad).filter(|&ix| ix < in_width);
						column[oy * out_width + ox] = match (iy, ix) {
							(Some(iy), Some(ix)) => plane[iy * in_width + ix],
							_ => 0.0,
						};
					}
				}
			});

		let columns = &*columns;
		output
			.par_chunks_mut(cols)
			.zip(self.weights.par_chunks(rows))
			.zip(self.biases.par_iter())
			.for_each(|((out_plane, filter), &bias)| {
				out_plane.fill(bias);
				for (row, &weight) in filter.iter().enumerate() {
					let column = &columns[row * cols..][..cols];
					for (out, &value) in out_plane.iter_mut().zip(column) {
						*out += weight * value;
					}
				}
			});

		Ok(())
	}
}

/// Elementwise rectified linear unit.
#[derive(Debug, Default)]
pub struct Relu {
	shapes: Option<(TensorShape, TensorShape)>,
}

impl Kernel for Relu {
	fn configure(&mut self, input: &TensorInfo, output: &TensorInfo) -> Result<()> {
		check_f32(input)?;
		check_f32(output)?;
		ensure!(input.shape() == output.shape(), "activation output must match its input");
		self.shapes = Some((input.shape(), output.shape()));
		Ok(())
	}

	fn run(&self, input: &[f32], output: &mut [f32], _workspace: &mut [f32]) -> Result<()> {
		check_lens(input, output, &self.shapes.context("activation is not configured")?)?;
		output
			.par_iter_mut()
			.zip(input.par_iter())
			.for_each(|(out, &value)| *out = value.max(0.0));
		Ok(())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolingType {
	Max,
	Average,
}

/// Square-window pooling over each channel.
#[derive(Debug)]
pub struct Pooling {
	pooling_type: PoolingType,
	window: usize,
	stride: usize,
	shapes: Option<(TensorShape, TensorShape)>,
}

impl Pooling {
	pub fn new(pooling_type: PoolingType, window: usize, stride: usize) -> Self {
		Self {
			pooling_type,
			window,
			stride,
			shapes: None,
		}
	}

	pub fn output_shape(&self, input: &TensorShape) -> Option<TensorShape> {
		let pad_stride = PadStride {
			stride: self.stride,
			pad: 0,
		};
		let mut shape = *input;
		shape
			.set(0, window_output(input.x(), self.window, pad_stride)?)
			.set(1, window_output(input.y(), self.window, pad_stride)?);
		Some(shape)
	}
}

impl Kernel for Pooling {
	fn configure(&mut self, input: &TensorInfo, output: &TensorInfo) -> Result<()> {
		check_f32(input)?;
		check_f32(output)?;
		let expected = self
			.output_shape(&input.shape())
			.context("pooling window does not fit the input")?;
		ensure!(output.shape() == expected, "pooling output must be {expected}");
		self.shapes = Some((input.shape(), output.shape()));
		Ok(())
	}

	fn run(&self, input: &[f32], output: &mut [f32], _workspace: &mut [f32]) -> Result<()> {
		let shapes = self.shapes.context("pooling is not configured")?;
		check_lens(input, output, &shapes)?;

		let (input_shape, output_shape) = shapes;
		let (in_width, in_height) = (input_shape.x(), input_shape.y());
		let (out_width, out_height) = (output_shape.x(), output_shape.y());
		let area = (self.window * self.window) as f32;

		output
			.par_chunks_mut(out_width * out_height)
			.zip(input.par_chunks(in_width * in_height))
			.for_each(|(out_plane, plane)| {
				for oy in 0..out_height {
					for ox in 0..out_width {
						let window = (0..self.window).flat_map(|wy| {
							let row = (oy * self.stride + wy) * in_width + ox * self.stride;
							plane[row..row + self.window].iter().copied()
						});
						out_plane[oy * out_width + ox] = match self.pooling_type {
							PoolingType::Max => window.fold(f32::NEG_INFINITY, f32::max),
							PoolingType::Average => window.sum::<f32>() / area,
						};
					}
				}
			});

		Ok(())
	}
}

/// Dense layer over the flattened input.
#[derive(Debug)]
pub struct FullyConnected {
	/// Laid out as `[output][input]`.
	weights: Vec<f32>,
	biases: Vec<f32>,
	shapes: Option<(TensorShape, TensorShape)>,
}

impl FullyConnected {
	pub fn new(weights: Vec<f32>, biases: Vec<f32>) -> Self {
		Self {
			weights,
			biases,
			shapes: None,
		}
	}
}

impl Kernel for FullyConnected {
	fn configure(&mut self, input: &TensorInfo, output: &TensorInfo) -> Result<()> {
		check_f32(input)?;
		check_f32(output)?;
		let (n_inputs, n_outputs) = (input.element_count()?, output.element_count()?);
		ensure!(
			self.biases.len() == n_outputs,
			"fully connected layer expects {n_outputs} outputs"
		);
		ensure!(
			self.weights.len() == n_inputs * n_outputs,
			"fully connected layer expects {} weights",
			n_inputs * n_outputs
		);
		self.shapes = Some((input.shape(), output.shape()));
		Ok(())
	}

	fn run(&self, input: &[f32], output: &mut [f32], _workspace: &mut [f32]) -> Result<()> {
		let shapes = self
			.shapes
			.context("fully connected layer is not configured")?;
		check_lens(input, output, &shapes)?;
		output
			.par_iter_mut()
			.zip(self.weights.par_chunks(input.len()))
			.zip(self.biases.par_iter())
			.for_each(|((out, row), &bias)| {
				*out = bias + row.iter().zip(input).map(|(w, x)| w * x).sum::<f32>();
			});
		Ok(())
	}
}

/// Numerically stable softmax over the whole tensor.
#[derive(Debug, Default)]
pub struct Softmax {
	shapes: Option<(TensorShape, TensorShape)>,
}

impl Kernel for Softmax {
	fn configure(&mut self, input: &TensorInfo, output: &TensorInfo) -> Result<()> {
		check_f32(input)?;
		check_f32(output)?;
		ensure!(input.shape() == output.shape(), "softmax output must match its input");
		self.shapes = Some((input.shape(), output.shape()));
		Ok(())
	}

	fn run(&self, input: &[f32], output: &mut [f32], _workspace: &mut [f32]) -> Result<()> {
		check_lens(input, output, &self.shapes.context("softmax is not configured")?)?;

		let max = input.iter().copied().fold(f32::NEG_INFINITY, f32::max);
		for (out, &value) in output.iter_mut().zip(input) {
			*out = (value - max).exp();
		}
		let sum: f32 = output.iter().sum();
		for out in output.iter_mut() {
			*out /= sum;
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn info(dims: &[usize]) -> TensorInfo {
		TensorInfo::new(TensorShape::new(dims), DataType::F32)
	}

	fn run_configured(
		kernel: &mut dyn Kernel,
		input_dims: &[usize],
		output_dims: &[usize],
		input: &[f32],
	) -> Vec<f32> {
		kernel.configure(&info(input_dims), &info(output_dims)).unwrap();
		let mut output = vec![0.0; info(output_dims).element_count().unwrap()];
		let mut workspace = vec![0.0; kernel.workspace_len()];
		kernel.run(input, &mut output, &mut workspace).unwrap();
		output
	}

	#[test]
	fn test_relu() {
		let output = run_configured(&mut Relu::default(), &[4], &[4], &[-1.0, 0.0, 2.0, -0.5]);
		assert_eq!(output, vec![0.0, 0.0, 2.0, 0.0]);
	}

	#[test]
	fn test_pooling() {
		let input = (0..16).map(|v| v as f32).collect::<Vec<_>>();

		let mut max = Pooling::new(PoolingType::Max, 2, 2);
		assert_eq!(
			run_configured(&mut max, &[4, 4, 1], &[2, 2, 1], &input),
			vec![5.0, 7.0, 13.0, 15.0]
		);

		let mut average = Pooling::new(PoolingType::Average, 2, 2);
		assert_eq!(
			run_configured(&mut average, &[4, 4, 1], &[2, 2, 1], &input),
			vec![2.5, 4.5, 10.5, 12.5]
		);
	}

	#[test]
	fn test_pooling_rejects_wrong_output() {
		let mut pool = Pooling::new(PoolingType::Max, 2, 2);
		assert!(pool.configure(&info(&[4, 4, 1]), &info(&[4, 4, 1])).is_err());
	}

	#[test]
	fn test_convolution_with_padding() {
		// A 3x3 box filter with zero padding sums each pixel's neighbourhood.
		let pad_stride = PadStride { stride: 1, pad: 1 };
		let mut conv = Convolution::new(3, 1, pad_stride, vec![1.0; 9], vec![0.5]);
		let output = run_configured(&mut conv, &[3, 3, 1], &[3, 3, 1], &[1.0; 9]);
		assert_eq!(output, vec![4.5, 6.5, 4.5, 6.5, 9.5, 6.5, 4.5, 6.5, 4.5]);
		assert_eq!(conv.workspace_len(), 81);
	}

	#[test]
	fn test_convolution_channels() {
		// 1x1 kernels mixing two input channels into two output channels.
		let weights = vec![1.0, 2.0, -1.0, 0.0];
		let pad_stride = PadStride { stride: 1, pad: 0 };
		let mut conv = Convolution::new(1, 2, pad_stride, weights, vec![0.0, 1.0]);
		let input = [1.0, 1.0, 10.0, 10.0];
		let output = run_configured(&mut conv, &[2, 1, 2], &[2, 1, 2], &input);
		assert_eq!(output, vec![21.0, 21.0, 0.0, 0.0]);
	}

	#[test]
	fn test_convolution_rejects_bad_weights() {
		let pad_stride = PadStride { stride: 1, pad: 1 };
		let mut conv = Convolution::new(3, 2, pad_stride, vec![0.0; 9], vec![0.0; 2]);
		assert!(conv.configure(&info(&[8, 8, 1]), &info(&[8, 8, 2])).is_err());
	}

	#[test]
	fn test_fully_connected() {
		let mut fc = FullyConnected::new(vec![1.0, 2.0, 3.0, 0.0, 0.0, 1.0], vec![0.0, -1.0]);
		let output = run_configured(&mut fc, &[3], &[2], &[1.0, 1.0, 1.0]);
		assert_eq!(output, vec![6.0, 0.0]);
	}

	#[test]
	fn test_softmax() {
		let output = run_configured(&mut Softmax::default(), &[3], &[3], &[1.0, 1.0, 1.0]);
		for value in &output {
			assert!((value - 1.0 / 3.0).abs() < 1e-6);
		}

		let output = run_configured(&mut Softmax::default(), &[2], &[2], &[1000.0, 0.0]);
		assert!((output[0] - 1.0).abs() < 1e-6);
	}

	#[test]
	fn test_run_before_configure() {
		let relu = Relu::default();
		assert!(relu.run(&[1.0], &mut [0.0], &mut []).is_err());
	}
}
