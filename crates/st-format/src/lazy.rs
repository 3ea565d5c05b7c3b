// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Deferred tensor reads.
//!
//! A [`LazyTensor`] is bound at load time to an immutable
//! `(reader, absolute offset, shape, dtype)` tuple and holds no tensor
//! bytes until it is realized. Realization reads the range once and caches
//! the result; clones share the cache, so realizing any clone again never
//! touches the reader.
//!
//! ```text
//!   load() ──► LazyTensor { Unrealized } ──realize()──► Tensor
//!                     │                                   ▲
//!                     └──── cached, later realize() ──────┘
//! ```

use crate::stream::Reader;
use crate::FormatError;
use rayon::prelude::*;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use tensor_core::{DType, Shape, Tensor};

struct Inner {
    source: Arc<dyn Reader>,
    offset: u64,
    shape: Shape,
    dtype: DType,
    realized: Mutex<Option<Tensor>>,
}

/// A tensor whose bytes are read from a stream on first demand.
///
/// Cheap to clone and safe to realize from any thread. The reader must stay
/// open and unmodified for as long as any unrealized clone is alive.
#[derive(Clone)]
pub struct LazyTensor {
    inner: Arc<Inner>,
}

impl LazyTensor {
    /// Binds a handle to `shape`/`dtype` bytes at absolute `offset` in `source`.
    ///
    /// Nothing is read here.
    pub fn new(source: Arc<dyn Reader>, offset: u64, shape: Shape, dtype: DType) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                offset,
                shape,
                dtype,
                realized: Mutex::new(None),
            }),
        }
    }

    /// Returns the tensor's shape.
    pub fn shape(&self) -> &Shape {
        &self.inner.shape
    }

    /// Returns the tensor's data type.
    pub fn dtype(&self) -> DType {
        self.inner.dtype
    }

    /// Returns the absolute byte offset of the tensor in its stream.
    pub fn offset(&self) -> u64 {
        self.inner.offset
    }

    /// Returns the tensor's size in bytes.
    pub fn size_bytes(&self) -> usize {
        self.inner.shape.size_bytes(self.inner.dtype)
    }

    /// Returns the diagnostic label of the bound stream.
    pub fn source_label(&self) -> String {
        self.inner.source.label()
    }

    /// Returns `true` once the bytes have been read.
    pub fn is_realized(&self) -> bool {
        self.lock().is_some()
    }

    /// Reads the tensor bytes, or returns the cached tensor.
    ///
    /// Concurrent callers on the same handle are serialized; the stream is
    /// read at most once per successful realization.
    pub fn realize(&self) -> Result<Tensor, FormatError> {
        let mut realized = self.lock();
        if let Some(tensor) = realized.as_ref() {
            return Ok(tensor.clone());
        }

        let io_err = |e: io::Error| FormatError::io(self.inner.source.label(), e);
        let size = self.checked_size().ok_or_else(|| {
            io_err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} {} tensor overflows", self.inner.shape, self.inner.dtype),
            ))
        })?;

        // The stream must hold the whole range before anything is allocated.
        let stream_len = self.inner.source.stream_len().map_err(io_err)?;
        let fits = self
            .inner
            .offset
            .checked_add(size as u64)
            .is_some_and(|end| end <= stream_len);
        if !fits {
            return Err(io_err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "read of {size} bytes at offset {} exceeds stream length {stream_len}",
                    self.inner.offset
                ),
            )));
        }

        let mut buf = vec![0u8; size];
        self.inner
            .source
            .read_at(&mut buf, self.inner.offset)
            .map_err(io_err)?;
        tracing::trace!(
            "realized {} {} tensor at offset {} of '{}'",
            self.inner.shape,
            self.inner.dtype,
            self.inner.offset,
            self.inner.source.label(),
        );

        let tensor = Tensor::from_bytes(self.inner.shape.clone(), self.inner.dtype, buf)?;
        *realized = Some(tensor.clone());
        Ok(tensor)
    }

    fn checked_size(&self) -> Option<usize> {
        self.inner
            .shape
            .checked_num_elements()?
            .checked_mul(self.inner.dtype.size_bytes())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Tensor>> {
        // A panic mid-read leaves `None` behind, which is still consistent.
        self.inner
            .realized
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for LazyTensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyTensor")
            .field("source", &self.inner.source.label())
            .field("offset", &self.inner.offset)
            .field("shape", &self.inner.shape)
            .field("dtype", &self.inner.dtype)
            .field("realized", &self.is_realized())
            .finish()
    }
}

/// Realizes a batch of handles in parallel, preserving order.
///
/// Fails with the first error encountered; handles realized before the
/// failure keep their cached bytes.
pub fn realize_all<'a, I>(handles: I) -> Result<Vec<Tensor>, FormatError>
where
    I: IntoIterator<Item = &'a LazyTensor>,
{
    let handles: Vec<&LazyTensor> = handles.into_iter().collect();
    handles.into_par_iter().map(LazyTensor::realize).collect()
}
