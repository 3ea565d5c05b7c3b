// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Element type tags as spelled in the container header.
//!
//! [`TypeTag::as_str`] and [`TypeTag::dtype`] are exhaustive matches; the
//! reverse lookups are derived from them over [`TypeTag::ALL`], so encode
//! and decode cannot drift apart.
//!
//! `C64` is not yet part of the upstream safetensors format
//! (huggingface/safetensors#389); its spelling and layout may change.

use crate::FormatError;
use std::fmt;
use std::str::FromStr;
use tensor_core::DType;

/// The closed set of element types a container can store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Bool,
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F16,
    BF16,
    F32,
    C64,
}

impl TypeTag {
    /// Every storable type, in the order the header spellings are usually listed.
    pub const ALL: [TypeTag; 13] = [
        TypeTag::F32,
        TypeTag::F16,
        TypeTag::BF16,
        TypeTag::I64,
        TypeTag::I32,
        TypeTag::I16,
        TypeTag::I8,
        TypeTag::U64,
        TypeTag::U32,
        TypeTag::U16,
        TypeTag::U8,
        TypeTag::Bool,
        TypeTag::C64,
    ];

    /// Returns the canonical header spelling, e.g. `"BF16"`.
    pub fn as_str(self) -> &'static str {
        match self {
            TypeTag::Bool => "BOOL",
            TypeTag::U8 => "U8",
            TypeTag::U16 => "U16",
            TypeTag::U32 => "U32",
            TypeTag::U64 => "U64",
            TypeTag::I8 => "I8",
            TypeTag::I16 => "I16",
            TypeTag::I32 => "I32",
            TypeTag::I64 => "I64",
            TypeTag::F16 => "F16",
            TypeTag::BF16 => "BF16",
            TypeTag::F32 => "F32",
            TypeTag::C64 => "C64",
        }
    }

    /// Returns the runtime element type.
    pub fn dtype(self) -> DType {
        match self {
            TypeTag::Bool => DType::Bool,
            TypeTag::U8 => DType::U8,
            TypeTag::U16 => DType::U16,
            TypeTag::U32 => DType::U32,
            TypeTag::U64 => DType::U64,
            TypeTag::I8 => DType::I8,
            TypeTag::I16 => DType::I16,
            TypeTag::I32 => DType::I32,
            TypeTag::I64 => DType::I64,
            TypeTag::F16 => DType::F16,
            TypeTag::BF16 => DType::BF16,
            TypeTag::F32 => DType::F32,
            TypeTag::C64 => DType::C64,
        }
    }

    /// Returns the element width in bytes.
    pub fn element_size(self) -> usize {
        self.dtype().size_bytes()
    }

    /// Maps a runtime element type to its tag.
    pub fn from_dtype(dtype: DType) -> Result<Self, FormatError> {
        Self::ALL
            .into_iter()
            .find(|tag| tag.dtype() == dtype)
            .ok_or(FormatError::UnsupportedType { dtype })
    }
}

impl FromStr for TypeTag {
    type Err = FormatError;

    /// Exact, case-sensitive match against the header spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|tag| tag.as_str() == s)
            .ok_or_else(|| FormatError::UnknownTypeTag { tag: s.to_string() })
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl serde::Serialize for TypeTag {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Returns the header tag string for a runtime element type.
pub fn tag_of(dtype: DType) -> Result<&'static str, FormatError> {
    TypeTag::from_dtype(dtype).map(TypeTag::as_str)
}

/// Returns the runtime element type for a header tag string.
pub fn type_of(tag: &str) -> Result<DType, FormatError> {
    tag.parse::<TypeTag>().map(TypeTag::dtype)
}
