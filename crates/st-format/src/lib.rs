// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # st-format
//!
//! Reader and writer for the safetensors container format.
//!
//! ```text
//! offset 0       : u64 little-endian header length L
//! offset 8       : L bytes of UTF-8 JSON header
//! offset 8 + L   : tensor payloads, back to back
//! ```
//!
//! This crate provides:
//! - [`load`] / [`load_file`]: parse the header and return one
//!   [`LazyTensor`] per entry; payload bytes are read on demand.
//! - [`save`] / [`save_file`]: materialize tensors, assign contiguous
//!   offsets, and write the container in a single ordered pass.
//! - [`tag_of`] / [`type_of`]: the mapping between [`tensor_core::DType`]
//!   and header dtype strings.
//! - [`Reader`] / [`Writer`]: the stream abstractions, with file,
//!   memory-mapped and in-memory implementations.
//!
//! # Example
//! ```no_run
//! use st_format::{load_file, save_file};
//! use tensor_core::{Shape, Tensor};
//! use std::collections::HashMap;
//!
//! let w = Tensor::from_f32(Shape::matrix(2, 2), &[1.0, 2.0, 3.0, 4.0]).unwrap();
//! let meta = HashMap::from([("format".to_string(), "pt".to_string())]);
//! let path = save_file("weights", [("w", w)], Some(&meta)).unwrap();
//!
//! let loaded = load_file(&path).unwrap();
//! let w = loaded.get("w").unwrap().realize().unwrap();
//! assert_eq!(w.to_f32_vec().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
//! ```

mod config;
mod error;
pub mod header;
mod lazy;
mod reader;
pub mod stream;
mod tag;
mod writer;

pub use config::FormatConfig;
pub use error::FormatError;
pub use header::{Header, TensorEntry, MAX_HEADER_LENGTH, METADATA_KEY};
pub use lazy::{realize_all, LazyTensor};
pub use reader::{
    load, load_file, load_file_with, load_with, read_header, read_header_with, LoadedContainer,
    LENGTH_PREFIX,
};
pub use stream::{FileReader, FileWriter, MemoryReader, MmapReader, Reader, Writer};
pub use tag::{tag_of, type_of, TypeTag};
pub use writer::{
    save, save_file, save_file_with, save_with, with_extension, Materialize, EXTENSION,
};
