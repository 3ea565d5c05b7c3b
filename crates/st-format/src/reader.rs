// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Container loading.
//!
//! Loading parses only the length prefix and the JSON header. Every tensor
//! comes back as a [`LazyTensor`] bound to the stream at
//! `8 + header_length + data_offsets[0]`; payload bytes are read when the
//! handle is realized.

use crate::header::{self, Header};
use crate::lazy::{self, LazyTensor};
use crate::stream::{FileReader, MmapReader, Reader};
use crate::{FormatConfig, FormatError};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tensor_core::Tensor;

/// Size of the little-endian header length prefix.
pub const LENGTH_PREFIX: u64 = 8;

/// The result of a successful [`load`].
#[derive(Debug, Clone, Default)]
pub struct LoadedContainer {
    /// Tensor handles keyed by name, in header order.
    pub tensors: IndexMap<String, LazyTensor>,
    /// The `__metadata__` dictionary (empty if the header had none).
    pub metadata: HashMap<String, String>,
}

impl LoadedContainer {
    /// Looks up a tensor handle by name.
    pub fn get(&self, name: &str) -> Option<&LazyTensor> {
        self.tensors.get(name)
    }

    /// Returns the number of tensors.
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    /// Returns `true` if the container holds no tensors.
    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Iterates tensor names in header order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }

    /// Realizes every handle (in parallel) and returns the tensors by name.
    pub fn realize_all(&self) -> Result<IndexMap<String, Tensor>, FormatError> {
        let tensors = lazy::realize_all(self.tensors.values())?;
        Ok(self.tensors.keys().cloned().zip(tensors).collect())
    }
}

/// Reads and decodes the header without binding any tensor handles.
///
/// Returns the header together with its encoded length `L`.
pub fn read_header(stream: &dyn Reader) -> Result<(Header, u64), FormatError> {
    read_header_with(stream, &FormatConfig::default())
}

/// Like [`read_header`], with an explicit header length ceiling.
pub fn read_header_with(
    stream: &dyn Reader,
    config: &FormatConfig,
) -> Result<(Header, u64), FormatError> {
    if !stream.is_open() || !stream.good() {
        return Err(FormatError::StreamUnavailable {
            label: stream.label(),
        });
    }

    let mut prefix = [0u8; LENGTH_PREFIX as usize];
    stream
        .read_at(&mut prefix, 0)
        .map_err(|e| FormatError::io(stream.label(), e))?;
    let length = u64::from_le_bytes(prefix);

    let max = config.max_header_length.min(header::MAX_HEADER_LENGTH);
    if length == 0 || length >= max {
        return Err(FormatError::InvalidHeaderLength {
            label: stream.label(),
            length,
            max,
        });
    }

    let mut bytes = vec![0u8; length as usize];
    stream
        .read_at(&mut bytes, LENGTH_PREFIX)
        .map_err(|e| FormatError::io(stream.label(), e))?;

    let header = header::decode(&bytes)?;
    tracing::debug!("'{}': {} byte header, {}", stream.label(), length, header.summary());
    Ok((header, length))
}

/// Loads a container from `stream` with the default configuration.
pub fn load(stream: Arc<dyn Reader>) -> Result<LoadedContainer, FormatError> {
    load_with(stream, &FormatConfig::default())
}

/// Loads a container from `stream`.
///
/// Reads nothing past the header. Every entry's range must lie inside the
/// payload the stream actually holds. Any structural error aborts the load;
/// no partial mapping is returned.
pub fn load_with(
    stream: Arc<dyn Reader>,
    config: &FormatConfig,
) -> Result<LoadedContainer, FormatError> {
    let (header, length) = read_header_with(stream.as_ref(), config)?;
    let payload_base = LENGTH_PREFIX + length;
    let stream_len = stream
        .stream_len()
        .map_err(|e| FormatError::io(stream.label(), e))?;
    let available = stream_len.saturating_sub(payload_base);

    if let Some((name, entry)) = header.entries.iter().find(|(_, e)| e.end() > available) {
        return Err(FormatError::InvalidOffsets {
            tensor: name.clone(),
            detail: format!(
                "range ends at {} but '{}' holds only {available} payload bytes",
                entry.end(),
                stream.label()
            ),
        });
    }

    // end <= available <= stream_len - payload_base, so no offset overflows.
    let tensors = header
        .entries
        .into_iter()
        .map(|(name, entry)| {
            let handle = LazyTensor::new(
                Arc::clone(&stream),
                payload_base + entry.start(),
                entry.shape,
                entry.dtype.dtype(),
            );
            (name, handle)
        })
        .collect::<IndexMap<_, _>>();

    tracing::info!(
        "loaded '{}': {} tensors, {} metadata keys",
        stream.label(),
        tensors.len(),
        header.metadata.len()
    );

    Ok(LoadedContainer {
        tensors,
        metadata: header.metadata,
    })
}

/// Opens `path` and loads it with the default configuration.
pub fn load_file(path: impl AsRef<Path>) -> Result<LoadedContainer, FormatError> {
    load_file_with(path, &FormatConfig::default())
}

/// Opens `path` (memory-mapped if `config.use_mmap`) and loads it.
///
/// The returned handles keep the file open until the last one is dropped.
pub fn load_file_with(
    path: impl AsRef<Path>,
    config: &FormatConfig,
) -> Result<LoadedContainer, FormatError> {
    let path = path.as_ref();
    let stream: Arc<dyn Reader> = if config.use_mmap {
        Arc::new(MmapReader::open(path))
    } else {
        Arc::new(FileReader::open(path))
    };
    load_with(stream, config)
}
