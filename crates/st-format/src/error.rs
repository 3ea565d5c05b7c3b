// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for container encoding and decoding.

use tensor_core::DType;

/// Errors that can occur while loading or saving a container.
///
/// Every error is fatal to the enclosing `load`/`save` call; no partial
/// result is ever returned alongside one.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    /// The stream is not open, or is in a failed state.
    #[error("stream '{label}' is not open or not usable")]
    StreamUnavailable { label: String },

    /// The 8-byte header length prefix is zero or at/above the ceiling.
    #[error("invalid header length {length} in '{label}' (must be in 1..{max})")]
    InvalidHeaderLength { label: String, length: u64, max: u64 },

    /// The header is not valid JSON, or its top level is not an object.
    #[error("malformed header: {detail}")]
    MalformedHeader { detail: String },

    /// A tensor entry lacks one of `dtype`, `shape`, `data_offsets`.
    #[error("tensor '{tensor}' is missing required field '{field}'")]
    MissingField { tensor: String, field: &'static str },

    /// A tensor entry field is present but has the wrong JSON shape.
    #[error("tensor '{tensor}' field '{field}' must be {expected}")]
    TypeMismatch {
        tensor: String,
        field: &'static str,
        expected: &'static str,
    },

    /// A dtype string outside the fixed tag enumeration.
    #[error("unknown dtype tag '{tag}'")]
    UnknownTypeTag { tag: String },

    /// A runtime element type the container cannot represent.
    #[error("dtype {dtype} cannot be stored in a safetensors container")]
    UnsupportedType { dtype: DType },

    /// The byte range of a tensor entry is inconsistent.
    #[error("tensor '{tensor}' has invalid data offsets: {detail}")]
    InvalidOffsets { tensor: String, detail: String },

    /// A tensor with zero bytes was passed to `save`.
    #[error("cannot serialize empty tensor '{name}'")]
    EmptyTensor { name: String },

    /// The same tensor name appears more than once in the input to `save`.
    #[error("duplicate tensor name '{name}'")]
    DuplicateTensor { name: String },

    /// A tensor uses the name reserved for the metadata dictionary.
    #[error("tensor name '{name}' is reserved")]
    ReservedName { name: String },

    /// An I/O operation on a stream failed.
    #[error("I/O error on '{label}': {source}")]
    Io {
        label: String,
        #[source]
        source: std::io::Error,
    },

    /// The tensor runtime rejected an operation.
    #[error("tensor error: {0}")]
    Tensor(#[from] tensor_core::TensorError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl FormatError {
    pub(crate) fn io(label: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            label: label.into(),
            source,
        }
    }
}
