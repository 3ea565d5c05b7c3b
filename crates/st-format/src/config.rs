// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Codec configuration loaded from TOML files or constructed programmatically.
//!
//! # TOML Format
//! ```toml
//! max_header_length = 100000000
//! parallel_materialize = true
//! write_buffer_bytes = 8388608
//! use_mmap = true
//! ```
//!
//! Every field is optional; missing fields take their defaults.

use crate::header::MAX_HEADER_LENGTH;
use crate::stream::DEFAULT_WRITE_BUFFER;
use crate::FormatError;
use std::path::Path;

/// Tunables for [`load_with`](crate::load_with) and [`save_with`](crate::save_with).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct FormatConfig {
    /// Header length ceiling (exclusive). May be lowered, never raised
    /// above [`MAX_HEADER_LENGTH`].
    pub max_header_length: u64,
    /// Materialize save inputs on the rayon pool instead of one by one.
    pub parallel_materialize: bool,
    /// `BufWriter` capacity used by [`save_file_with`](crate::save_file_with).
    pub write_buffer_bytes: usize,
    /// Memory-map files in [`load_file_with`](crate::load_file_with)
    /// instead of using positioned reads.
    pub use_mmap: bool,
}

impl FormatConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, FormatError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            FormatError::Config(format!("cannot read config '{}': {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parses and validates configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, FormatError> {
        let config: Self = toml::from_str(toml_str)
            .map_err(|e| FormatError::Config(format!("TOML parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String, FormatError> {
        toml::to_string_pretty(self)
            .map_err(|e| FormatError::Config(format!("TOML serialise error: {e}")))
    }

    /// Checks that every field is within range.
    pub fn validate(&self) -> Result<(), FormatError> {
        if self.max_header_length < 2 || self.max_header_length > MAX_HEADER_LENGTH {
            return Err(FormatError::Config(format!(
                "max_header_length {} must be in 2..={MAX_HEADER_LENGTH}",
                self.max_header_length
            )));
        }
        if self.write_buffer_bytes == 0 {
            return Err(FormatError::Config(
                "write_buffer_bytes must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

impl Default for FormatConfig {
    fn default() -> Self {
        Self {
            max_header_length: MAX_HEADER_LENGTH,
            parallel_materialize: true,
            write_buffer_bytes: DEFAULT_WRITE_BUFFER,
            use_mmap: true,
        }
    }
}
