// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # tensor-core
//!
//! Lightweight tensor types shared by the container codec and its callers.
//!
//! This crate provides:
//! - [`Tensor`]: an n-dimensional tensor over a shared byte buffer, with
//!   strided views and a force-to-contiguous operation.
//! - [`Shape`]: runtime shape descriptors.
//! - [`DType`]: element data types (bool, signed/unsigned integers, f16,
//!   bf16, f32, f64, c64).
//!
//! # Design Goals
//! - Zero-copy views wherever possible.
//! - Cheap clones: buffers are reference-counted and never mutated in place.
//! - Clean error types via `thiserror`.

mod dtype;
mod error;
mod shape;
mod tensor;

pub use dtype::DType;
pub use error::TensorError;
pub use shape::Shape;
pub use tensor::Tensor;
