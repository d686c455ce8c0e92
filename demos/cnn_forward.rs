// Copyright 2025 Irreducible Inc.

//! Forward pass of a small CNN with every intermediate tensor served from pooled memory.
//!
//! Layer outputs live in a "transitions" memory manager with two memory groups that take turns,
//! so the whole pass needs two blobs. Convolution scratch lives in a separate "layers" manager
//! whose groups are only bound while their layer runs.

use anyhow::{anyhow, Result};
use bytesize::ByteSize;
use clap::{value_parser, Parser};
use demos::kernels::{
	Convolution, FullyConnected, Kernel, PadStride, Pooling, PoolingType, Relu, Softmax,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use tensormem_runtime::{
	BoundedAllocator, DataType, Lifetime, LogicalBuffer, MemoryGroup, MemoryManager, TensorInfo,
	TensorShape,
};
use tensormem_utils::{rayon::adjust_thread_pool, tracing::init_tracing};
use tracing::{debug, info, info_span};

const INPUT_DIMS: [usize; 3] = [32, 32, 1];
const N_CLASSES: usize = 128;

#[derive(Debug, Parser)]
struct Args {
	/// Seed for the random weights and input image.
	#[arg(long, default_value_t = 0)]
	seed: u64,
	/// Memory budget shared by both memory managers.
	#[arg(long, default_value = "16MiB")]
	capacity: ByteSize,
	/// Number of forward passes over the same input.
	#[arg(long, default_value_t = 1, value_parser = value_parser!(u32).range(1..))]
	passes: u32,
}

struct Stage {
	name: &'static str,
	kernel: Box<dyn Kernel>,
	output: TensorInfo,
}

fn f32_info(dims: &[usize]) -> TensorInfo {
	TensorInfo::new(TensorShape::new(dims), DataType::F32)
}

fn random_vec(rng: &mut impl Rng, len: usize, scale: f32) -> Vec<f32> {
	(0..len).map(|_| rng.gen_range(-scale..scale)).collect()
}

fn conv(
	rng: &mut impl Rng,
	in_channels: usize,
	kernel_size: usize,
	out_channels: usize,
) -> Convolution {
	let fan_in = kernel_size * kernel_size * in_channels;
	let scale = (fan_in as f32).sqrt().recip();
	Convolution::new(
		kernel_size,
		out_channels,
		PadStride {
			stride: 1,
			pad: kernel_size / 2,
		},
		random_vec(rng, fan_in * out_channels, scale),
		random_vec(rng, out_channels, scale),
	)
}

/// Builds and configures the layers: conv0, act0, pool0, conv1, act1, pool1, fc0, act2, softmax.
fn build_stages(rng: &mut impl Rng) -> Result<Vec<Stage>> {
	let conv0 = conv(rng, INPUT_DIMS[2], 5, 8);
	let conv1 = conv(rng, 8, 3, 16);
	let fc_inputs = 8 * 8 * 16;
	let fc_scale = (fc_inputs as f32).sqrt().recip();
	let fc0 = FullyConnected::new(
		random_vec(rng, fc_inputs * N_CLASSES, fc_scale),
		random_vec(rng, N_CLASSES, fc_scale),
	);

	let layers: [(&'static str, Box<dyn Kernel>, &[usize]); 9] = [
		("conv0", Box::new(conv0), &[32, 32, 8]),
		("act0", Box::<Relu>::default(), &[32, 32, 8]),
		("pool0", Box::new(Pooling::new(PoolingType::Max, 2, 2)), &[16, 16, 8]),
		("conv1", Box::new(conv1), &[16, 16, 16]),
		("act1", Box::<Relu>::default(), &[16, 16, 16]),
		("pool1", Box::new(Pooling::new(PoolingType::Average, 2, 2)), &[8, 8, 16]),
		("fc0", Box::new(fc0), &[N_CLASSES]),
		("act2", Box::<Relu>::default(), &[N_CLASSES]),
		("softmax", Box::<Softmax>::default(), &[N_CLASSES]),
	];

	let mut input = f32_info(&INPUT_DIMS);
	layers
		.into_iter()
		.map(|(name, mut kernel, dims)| {
			let output = f32_info(dims);
			kernel
				.configure(&input, &output)
				.map_err(|err| err.context(format!("failed to configure {name}")))?;
			input = output;
			Ok(Stage {
				name,
				kernel,
				output,
			})
		})
		.collect()
}

fn as_f32(bytes: &[u8]) -> Result<&[f32]> {
	bytemuck::try_cast_slice(bytes).map_err(|err| anyhow!("tensor memory is not f32: {err:?}"))
}

fn as_f32_mut(bytes: &mut [u8]) -> Result<&mut [f32]> {
	bytemuck::try_cast_slice_mut(bytes).map_err(|err| anyhow!("tensor memory is not f32: {err:?}"))
}

fn summarize(name: &str, shape: TensorShape, values: &[f32]) {
	let min = values.iter().copied().fold(f32::INFINITY, f32::min);
	let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
	let mean = values.iter().sum::<f32>() / values.len() as f32;
	info!(stage = name, %shape, min, max, mean, "tensor summary");
}

fn main() -> Result<()> {
	adjust_thread_pool()
		.as_ref()
		.expect("failed to init thread pool");

	let args = Args::parse();

	init_tracing();

	let mut rng = StdRng::seed_from_u64(args.seed);
	let stages = build_stages(&mut rng)?;
	let image = random_vec(&mut rng, f32_info(&INPUT_DIMS).element_count()?, 1.0);

	let allocator = BoundedAllocator::new(usize::try_from(args.capacity.as_u64())?);
	let mut transitions = MemoryManager::<&BoundedAllocator>::new();
	let mut layers = MemoryManager::<&BoundedAllocator>::new();

	let last_op = stages.len() - 1;
	let mut groups = [MemoryGroup::new(&mut transitions), MemoryGroup::new(&mut transitions)];
	let mut outputs = Vec::<LogicalBuffer>::with_capacity(stages.len());
	// Per stage, the scratch group and buffer of the layers manager.
	let mut workspaces = Vec::<Option<(MemoryGroup, LogicalBuffer)>>::with_capacity(stages.len());

	for (op, stage) in stages.iter().enumerate() {
		let output = transitions.declare_tensor(&stage.output)?;
		groups[op % 2].manage(
			&mut transitions,
			output,
			Lifetime::new(op, (op + 1).min(last_op))?,
		)?;
		outputs.push(output);

		let workspace = match stage.kernel.workspace_len() {
			0 => None,
			len => {
				let mut group = MemoryGroup::new(&mut layers);
				let buffer = layers.declare_tensor(&f32_info(&[len]))?;
				group.manage(&mut layers, buffer, Lifetime::single(op))?;
				Some((group, buffer))
			}
		};
		workspaces.push(workspace);
	}

	layers.populate(&allocator, 1)?;
	transitions.populate(&allocator, 2)?;

	for pass in 0..args.passes {
		let _span = info_span!("forward_pass", pass).entered();
		let last_pass = pass + 1 == args.passes;

		for group in &mut groups {
			group.acquire(&transitions)?;
		}

		for (op, stage) in stages.iter().enumerate() {
			let _span = info_span!("stage", name = stage.name).entered();

			let mut scratch: &mut [f32] = &mut [];
			if let Some((group, buffer)) = &mut workspaces[op] {
				group.acquire(&layers)?;
				scratch = as_f32_mut(layers.buffer_mut(group, buffer.id())?)?;
			}

			let output_group = &groups[op % 2];
			if op == 0 {
				let output = as_f32_mut(transitions.buffer_mut(output_group, outputs[op].id())?)?;
				stage.kernel.run(&image, output, scratch)?;
			} else {
				let input_group = &groups[(op - 1) % 2];
				let mut views = transitions.buffers_mut(&[
					(input_group, outputs[op - 1].id()),
					(output_group, outputs[op].id()),
				])?;
				let (Some(output), Some(input)) = (views.pop(), views.pop()) else {
					unreachable!("two regions were requested")
				};
				stage.kernel.run(as_f32(input)?, as_f32_mut(output)?, scratch)?;
			}

			if let Some((group, _)) = &mut workspaces[op] {
				group.release()?;
			}

			let values = as_f32(transitions.buffer(output_group, outputs[op].id())?)?;
			if last_pass {
				summarize(stage.name, stage.output.shape(), values);
			} else {
				debug!(stage = stage.name, "stage done");
			}
		}

		if last_pass {
			let probabilities =
				as_f32(transitions.buffer(&groups[last_op % 2], outputs[last_op].id())?)?;
			let mut classes = (0..probabilities.len()).collect::<Vec<_>>();
			classes.sort_by(|&a, &b| probabilities[b].total_cmp(&probabilities[a]));
			for (rank, &class) in classes.iter().take(3).enumerate() {
				println!("#{}: class {class} with p = {:.4}", rank + 1, probabilities[class]);
			}
		}

		for group in &mut groups {
			group.release()?;
		}
	}

	let naive = outputs.iter().map(|buffer| buffer.size() as u64).sum::<u64>();
	println!(
		"Transition tensors: {} pooled in {} blobs, {} if allocated separately",
		ByteSize::b(transitions.footprint() as u64),
		transitions.pool().blobs().len(),
		ByteSize::b(naive),
	);
	println!(
		"Layer workspaces: {} pooled in {} blobs",
		ByteSize::b(layers.footprint() as u64),
		layers.pool().blobs().len(),
	);
	println!(
		"Allocator: {} of {} in use",
		ByteSize::b(allocator.in_use() as u64),
		ByteSize::b(allocator.capacity() as u64),
	);

	Ok(())
}
