// Copyright 2025 Irreducible Inc.

//! Reference layers for the demo programs.
//!
//! The kernels are plain loops over `f32` tensors in NCHW order (x fastest). They exist to give
//! the memory plans of the demos some real work to do, not to be fast or numerically tuned.

pub mod kernels;
