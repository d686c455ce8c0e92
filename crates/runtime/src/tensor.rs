// Copyright 2025 Irreducible Inc.

//! Tensor metadata used to size logical buffers.

use std::fmt;

use getset::CopyGetters;
use tensormem_utils::checked_arithmetics::checked_product;

use crate::error::Error;

/// Maximum number of dimensions of a [`TensorShape`].
pub const MAX_DIMS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
	U8,
	S8,
	U16,
	S16,
	F16,
	U32,
	S32,
	F32,
	U64,
	S64,
	F64,
}

impl DataType {
	/// Size of one element in bytes.
	pub const fn element_size(self) -> usize {
		match self {
			Self::U8 | Self::S8 => 1,
			Self::U16 | Self::S16 | Self::F16 => 2,
			Self::U32 | Self::S32 | Self::F32 => 4,
			Self::U64 | Self::S64 | Self::F64 => 8,
		}
	}
}

/// Extent of a tensor along each dimension, innermost (x) first.
///
/// Dimensions beyond [`Self::num_dimensions`] have extent 1.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorShape {
	dims: [usize; MAX_DIMS],
	num_dimensions: usize,
}

impl TensorShape {
	/// ## Preconditions
	///
	/// - `dims` has at most [`MAX_DIMS`] entries
	pub fn new(dims: &[usize]) -> Self {
		assert!(dims.len() <= MAX_DIMS, "tensor shapes have at most {MAX_DIMS} dimensions");

		let mut shape = Self {
			dims: [1; MAX_DIMS],
			num_dimensions: dims.len(),
		};
		shape.dims[..dims.len()].copy_from_slice(dims);
		shape
	}

	pub fn num_dimensions(&self) -> usize {
		self.num_dimensions
	}

	pub fn dims(&self) -> &[usize] {
		&self.dims[..self.num_dimensions]
	}

	pub fn dim(&self, index: usize) -> usize {
		self.dims.get(index).copied().unwrap_or(1)
	}

	pub fn x(&self) -> usize {
		self.dims[0]
	}

	pub fn y(&self) -> usize {
		self.dims[1]
	}

	pub fn z(&self) -> usize {
		self.dims[2]
	}

	/// Sets the extent of dimension `index`, growing the rank if needed.
	///
	/// ## Preconditions
	///
	/// - `index` is less than [`MAX_DIMS`]
	pub fn set(&mut self, index: usize, value: usize) -> &mut Self {
		assert!(index < MAX_DIMS, "tensor shapes have at most {MAX_DIMS} dimensions");

		self.dims[index] = value;
		self.num_dimensions = self.num_dimensions.max(index + 1);
		self
	}

	/// Number of elements.
	pub fn total_size(&self) -> Result<usize, Error> {
		checked_product(self.dims().iter().copied()).ok_or(Error::SizeOverflow)
	}
}

impl fmt::Debug for TensorShape {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("TensorShape").field(&self.dims()).finish()
	}
}

impl fmt::Display for TensorShape {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut dims = self.dims().iter();
		if let Some(first) = dims.next() {
			write!(f, "{first}")?;
		}
		for dim in dims {
			write!(f, "x{dim}")?;
		}
		Ok(())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, CopyGetters)]
#[get_copy = "pub"]
pub struct TensorInfo {
	shape: TensorShape,
	data_type: DataType,
}

impl TensorInfo {
	pub const fn new(shape: TensorShape, data_type: DataType) -> Self {
		Self { shape, data_type }
	}

	pub fn element_count(&self) -> Result<usize, Error> {
		self.shape.total_size()
	}

	/// Size in bytes.
	pub fn total_size(&self) -> Result<usize, Error> {
		self.element_count()?
			.checked_mul(self.data_type.element_size())
			.ok_or(Error::SizeOverflow)
	}
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;

	use super::*;

	#[test]
	fn test_shape_accessors() {
		let shape = TensorShape::new(&[32, 16, 8]);
		assert_eq!((shape.x(), shape.y(), shape.z()), (32, 16, 8));
		assert_eq!(shape.dim(5), 1);
		assert_eq!(shape.total_size().unwrap(), 4096);
		assert_eq!(shape.to_string(), "32x16x8");

		let vector = TensorShape::new(&[128]);
		assert_eq!(vector.y(), 1);
		assert_eq!(vector.num_dimensions(), 1);
	}

	#[test]
	fn test_shape_set_grows_rank() {
		let mut shape = TensorShape::new(&[32, 32, 8]);
		let x = shape.x();
		shape.set(0, x / 2).set(1, 16);
		assert_eq!(shape.dims(), &[16, 16, 8]);

		shape.set(3, 2);
		assert_eq!(shape.num_dimensions(), 4);
		assert_eq!(shape.total_size().unwrap(), 4096);
	}

	#[test]
	fn test_info_total_size() {
		let info = TensorInfo::new(TensorShape::new(&[5, 5, 1, 8]), DataType::F32);
		assert_eq!(info.element_count().unwrap(), 200);
		assert_eq!(info.total_size().unwrap(), 800);
		assert_eq!(
			TensorInfo::new(TensorShape::new(&[3]), DataType::F16)
				.total_size()
				.unwrap(),
			6
		);
	}

	#[test]
	fn test_info_overflow() {
		let info = TensorInfo::new(TensorShape::new(&[usize::MAX, 2]), DataType::U8);
		assert_matches!(info.total_size(), Err(Error::SizeOverflow));
		let info = TensorInfo::new(TensorShape::new(&[usize::MAX]), DataType::F32);
		assert_matches!(info.total_size(), Err(Error::SizeOverflow));
	}
}
