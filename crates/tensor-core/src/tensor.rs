// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Core tensor type with shared storage and strided layouts.

use crate::{DType, Shape, TensorError};
use std::sync::Arc;

/// An n-dimensional tensor over a shared, immutable byte buffer.
///
/// Cloning a `Tensor` is cheap: the buffer is reference-counted. Layout
/// changes such as [`permute`](Tensor::permute) produce strided views over
/// the same buffer; [`contiguous`](Tensor::contiguous) materializes a view
/// back into row-major order.
///
/// # Memory Layout
/// Elements are stored little-endian. `strides` are measured in elements,
/// not bytes. A freshly constructed tensor is always row-major (C) order.
#[derive(Debug, Clone)]
pub struct Tensor {
    shape: Shape,
    dtype: DType,
    strides: Vec<usize>,
    data: Arc<[u8]>,
}

impl Tensor {
    /// Creates a new tensor filled with zeros.
    ///
    /// # Examples
    /// ```
    /// use tensor_core::{Tensor, Shape, DType};
    /// let t = Tensor::zeros(Shape::matrix(2, 3), DType::F32);
    /// assert_eq!(t.size_bytes(), 24); // 2 * 3 * 4 bytes
    /// ```
    pub fn zeros(shape: Shape, dtype: DType) -> Self {
        let size = shape.size_bytes(dtype);
        Self {
            strides: shape.strides(),
            shape,
            dtype,
            data: vec![0u8; size].into(),
        }
    }

    /// Creates a row-major tensor from raw little-endian bytes.
    ///
    /// Returns an error if the buffer size does not match `shape.size_bytes(dtype)`.
    pub fn from_bytes(shape: Shape, dtype: DType, data: Vec<u8>) -> Result<Self, TensorError> {
        let expected = shape.size_bytes(dtype);
        if data.len() != expected {
            return Err(TensorError::BufferSizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            strides: shape.strides(),
            shape,
            dtype,
            data: data.into(),
        })
    }

    /// Creates a tensor from a slice of `f32` values.
    ///
    /// # Examples
    /// ```
    /// use tensor_core::{Tensor, Shape};
    /// let t = Tensor::from_f32(Shape::vector(3), &[1.0, 2.0, 3.0]).unwrap();
    /// assert_eq!(t.to_f32_vec().unwrap(), vec![1.0, 2.0, 3.0]);
    /// ```
    pub fn from_f32(shape: Shape, values: &[f32]) -> Result<Self, TensorError> {
        let expected_elements = shape.num_elements();
        if values.len() != expected_elements {
            return Err(TensorError::BufferSizeMismatch {
                expected: expected_elements * DType::F32.size_bytes(),
                actual: values.len() * DType::F32.size_bytes(),
            });
        }
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::from_bytes(shape, DType::F32, bytes)
    }

    /// Returns the tensor's shape.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Returns the tensor's data type.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Returns the element strides of this tensor's layout.
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    /// Returns the logical size of this tensor in bytes.
    pub fn size_bytes(&self) -> usize {
        self.shape.size_bytes(self.dtype)
    }

    /// Returns `true` if the elements are laid out in row-major order.
    pub fn is_contiguous(&self) -> bool {
        self.shape.num_elements() <= 1 || self.strides == self.shape.strides()
    }

    /// Returns the backing buffer in storage order.
    ///
    /// Storage order equals logical row-major order only when
    /// [`is_contiguous`](Tensor::is_contiguous) holds.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Returns a strided view with the axes reordered.
    ///
    /// `axes[i]` names the source axis that becomes axis `i`. The buffer
    /// is shared; no bytes are copied.
    pub fn permute(&self, axes: &[usize]) -> Result<Self, TensorError> {
        let rank = self.shape.rank();
        let mut seen = vec![false; rank];
        let valid = axes.len() == rank
            && axes
                .iter()
                .all(|&a| a < rank && !std::mem::replace(&mut seen[a], true));
        if !valid {
            return Err(TensorError::InvalidPermutation {
                axes: axes.to_vec(),
                shape: self.shape.clone(),
            });
        }

        let dims = axes.iter().map(|&a| self.shape.dims()[a]).collect();
        let strides = axes.iter().map(|&a| self.strides[a]).collect();
        Ok(Self {
            shape: Shape::new(dims),
            dtype: self.dtype,
            strides,
            data: Arc::clone(&self.data),
        })
    }

    /// Forces the tensor into a row-major, fully materialized layout.
    ///
    /// Returns a cheap clone when the tensor is already contiguous.
    pub fn contiguous(&self) -> Self {
        if self.is_contiguous() {
            return self.clone();
        }

        let elem = self.dtype.size_bytes();
        let dims = self.shape.dims();
        let mut out = Vec::with_capacity(self.size_bytes());
        let mut index = vec![0usize; dims.len()];

        for _ in 0..self.shape.num_elements() {
            let src: usize = index
                .iter()
                .zip(&self.strides)
                .map(|(i, s)| i * s)
                .sum::<usize>()
                * elem;
            out.extend_from_slice(&self.data[src..src + elem]);

            // Advance the row-major odometer.
            for axis in (0..dims.len()).rev() {
                index[axis] += 1;
                if index[axis] < dims[axis] {
                    break;
                }
                index[axis] = 0;
            }
        }

        Self {
            strides: self.shape.strides(),
            shape: self.shape.clone(),
            dtype: self.dtype,
            data: out.into(),
        }
    }

    /// Decodes the elements as `f32` values in logical row-major order.
    pub fn to_f32_vec(&self) -> Result<Vec<f32>, TensorError> {
        if self.dtype != DType::F32 {
            return Err(TensorError::UnsupportedDType {
                op: "to_f32_vec",
                dtype: self.dtype,
            });
        }
        let dense = self.contiguous();
        Ok(dense
            .as_bytes()
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }
}
