// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Container saving.
//!
//! `save` runs in four phases:
//!
//! 1. collect the input once into an ordered `Vec<(name, tensor)>`;
//! 2. materialize every tensor into a dense buffer (barrier);
//! 3. assign contiguous offsets walking the `Vec` front to back;
//! 4. write the length prefix, the header, then the payloads walking the
//!    same `Vec` front to back.
//!
//! Nothing is written to the stream until phases 1-3 and header encoding
//! have succeeded.

use crate::header::{self, TensorEntry, MAX_HEADER_LENGTH};
use crate::lazy::LazyTensor;
use crate::stream::{FileWriter, Writer};
use crate::{FormatConfig, FormatError, TypeTag};
use rayon::prelude::*;
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tensor_core::Tensor;

/// Canonical container file extension, including the dot.
pub const EXTENSION: &str = ".safetensors";

/// Something that can be forced into a dense, row-major [`Tensor`].
pub trait Materialize: Send {
    /// Produces the tensor with its bytes laid out contiguously.
    fn materialize(self) -> Result<Tensor, FormatError>;
}

impl Materialize for Tensor {
    fn materialize(self) -> Result<Tensor, FormatError> {
        Ok(self.contiguous())
    }
}

impl Materialize for &Tensor {
    fn materialize(self) -> Result<Tensor, FormatError> {
        Ok(self.contiguous())
    }
}

impl Materialize for LazyTensor {
    fn materialize(self) -> Result<Tensor, FormatError> {
        self.realize()
    }
}

impl Materialize for &LazyTensor {
    fn materialize(self) -> Result<Tensor, FormatError> {
        self.realize()
    }
}

/// Saves `tensors` to `stream` with the default configuration.
///
/// See [`save_with`].
pub fn save<W, I, K, T>(
    stream: &mut W,
    tensors: I,
    metadata: Option<&HashMap<String, String>>,
) -> Result<(), FormatError>
where
    W: Writer + ?Sized,
    I: IntoIterator<Item = (K, T)>,
    K: Into<String>,
    T: Materialize,
{
    save_with(stream, tensors, metadata, &FormatConfig::default())
}

/// Saves `tensors` and `metadata` to `stream` as one container.
///
/// Tensors are laid out in the iteration order of `tensors`. On error the
/// stream is left untouched unless the failure is an I/O error during the
/// final write, in which case the caller should discard the output.
pub fn save_with<W, I, K, T>(
    stream: &mut W,
    tensors: I,
    metadata: Option<&HashMap<String, String>>,
    config: &FormatConfig,
) -> Result<(), FormatError>
where
    W: Writer + ?Sized,
    I: IntoIterator<Item = (K, T)>,
    K: Into<String>,
    T: Materialize,
{
    if !stream.is_open() || !stream.good() {
        return Err(FormatError::StreamUnavailable {
            label: stream.label(),
        });
    }
    let encoded = encode_container(&stream.label(), tensors, metadata, config)?;
    encoded.write_to(stream)
}

/// A fully validated container waiting to be written.
struct Encoded {
    header: Vec<u8>,
    tensors: Vec<(String, Tensor)>,
    payload_len: u64,
}

/// Runs every check and encodes the header; touches no stream.
///
/// `label` names the destination in errors.
fn encode_container<I, K, T>(
    label: &str,
    tensors: I,
    metadata: Option<&HashMap<String, String>>,
    config: &FormatConfig,
) -> Result<Encoded, FormatError>
where
    I: IntoIterator<Item = (K, T)>,
    K: Into<String>,
    T: Materialize,
{
    // 1. One ordered sequence drives both the offset and the write pass.
    let (names, pending): (Vec<String>, Vec<T>) =
        tensors.into_iter().map(|(k, t)| (k.into(), t)).unzip();
    header::check_names(names.iter().map(String::as_str))?;

    // 2. Barrier: everything is dense before any offset is assigned.
    let dense: Vec<Tensor> = if config.parallel_materialize {
        pending
            .into_par_iter()
            .map(Materialize::materialize)
            .collect::<Result<_, _>>()?
    } else {
        pending
            .into_iter()
            .map(Materialize::materialize)
            .collect::<Result<_, _>>()?
    };
    let ordered: Vec<(String, Tensor)> = names.into_iter().zip(dense).collect();

    // 3. Offsets.
    let mut entries = Vec::with_capacity(ordered.len());
    let mut offset = 0u64;
    for (name, tensor) in &ordered {
        if tensor.size_bytes() == 0 {
            return Err(FormatError::EmptyTensor { name: name.clone() });
        }
        let dtype = TypeTag::from_dtype(tensor.dtype())?;
        let entry = TensorEntry::new(dtype, tensor.shape().clone(), offset).ok_or_else(|| {
            FormatError::InvalidOffsets {
                tensor: name.clone(),
                detail: format!("range starting at {offset} overflows"),
            }
        })?;
        offset = entry.end();
        entries.push((name.clone(), entry));
    }

    let header = header::encode(&entries, metadata)?;
    let length = header.len() as u64;
    let max = config.max_header_length.min(MAX_HEADER_LENGTH);
    if length >= max {
        return Err(FormatError::InvalidHeaderLength {
            label: label.to_string(),
            length,
            max,
        });
    }

    Ok(Encoded {
        header,
        tensors: ordered,
        payload_len: offset,
    })
}

impl Encoded {
    /// 4. Length prefix, header, then payloads in the same order as step 3.
    fn write_to<W: Writer + ?Sized>(&self, stream: &mut W) -> Result<(), FormatError> {
        let label = stream.label();
        let io = |e| FormatError::io(label.as_str(), e);
        let length = self.header.len() as u64;

        stream.write(&length.to_le_bytes()).map_err(io)?;
        stream.write(&self.header).map_err(io)?;
        for (_, tensor) in &self.tensors {
            stream.write(tensor.as_bytes()).map_err(io)?;
        }
        stream.flush().map_err(io)?;

        tracing::info!(
            "saved '{}': {} tensors, {:.2} MB payload, {} byte header",
            label,
            self.tensors.len(),
            self.payload_len as f64 / (1024.0 * 1024.0),
            length,
        );
        Ok(())
    }
}

/// Appends [`EXTENSION`] to `path` unless it already ends with it.
///
/// The check is an exact, case-sensitive suffix match on the whole name,
/// so `model.SAFETENSORS` becomes `model.SAFETENSORS.safetensors`.
pub fn with_extension(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    if path.as_os_str().as_encoded_bytes().ends_with(EXTENSION.as_bytes()) {
        return path.to_path_buf();
    }
    let mut name = OsString::from(path.as_os_str());
    name.push(EXTENSION);
    PathBuf::from(name)
}

/// Saves to a file with the default configuration.
///
/// See [`save_file_with`].
pub fn save_file<I, K, T>(
    path: impl AsRef<Path>,
    tensors: I,
    metadata: Option<&HashMap<String, String>>,
) -> Result<PathBuf, FormatError>
where
    I: IntoIterator<Item = (K, T)>,
    K: Into<String>,
    T: Materialize,
{
    save_file_with(path, tensors, metadata, &FormatConfig::default())
}

/// Saves to `path` after normalizing its extension with [`with_extension`].
///
/// The file is created only after every tensor has been materialized and
/// checked, so a failed save leaves an existing file untouched unless the
/// write itself fails. Returns the path actually written.
pub fn save_file_with<I, K, T>(
    path: impl AsRef<Path>,
    tensors: I,
    metadata: Option<&HashMap<String, String>>,
    config: &FormatConfig,
) -> Result<PathBuf, FormatError>
where
    I: IntoIterator<Item = (K, T)>,
    K: Into<String>,
    T: Materialize,
{
    let path = with_extension(path);
    let encoded = encode_container(&path.display().to_string(), tensors, metadata, config)?;

    let mut writer = FileWriter::with_capacity(&path, config.write_buffer_bytes);
    if !writer.is_open() {
        return Err(FormatError::StreamUnavailable {
            label: writer.label(),
        });
    }
    encoded.write_to(&mut writer)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{load, MemoryReader, Reader};
    use std::io;
    use std::sync::Arc;
    use tensor_core::{DType, Shape};

    // ── Helpers ─────────────────────────────────────────────────

    fn u8_tensor(values: &[u8]) -> Tensor {
        Tensor::from_bytes(Shape::vector(values.len()), DType::U8, values.to_vec()).unwrap()
    }

    fn header_json(bytes: &[u8]) -> String {
        let len = u64::from_le_bytes(bytes[..8].try_into().unwrap()) as usize;
        String::from_utf8(bytes[8..8 + len].to_vec()).unwrap()
    }

    /// A writer that is never usable.
    struct ClosedWriter;

    impl Writer for ClosedWriter {
        fn label(&self) -> String {
            "closed".into()
        }
        fn is_open(&self) -> bool {
            false
        }
        fn good(&self) -> bool {
            false
        }
        fn write(&mut self, _buf: &[u8]) -> io::Result<()> {
            unreachable!("closed writer must not be written to")
        }
    }

    /// A writer that fails after `budget` bytes.
    struct FailingWriter {
        budget: usize,
    }

    impl Writer for FailingWriter {
        fn label(&self) -> String {
            "failing".into()
        }
        fn is_open(&self) -> bool {
            true
        }
        fn good(&self) -> bool {
            true
        }
        fn write(&mut self, buf: &[u8]) -> io::Result<()> {
            if buf.len() > self.budget {
                return Err(io::Error::new(io::ErrorKind::WriteZero, "disk full"));
            }
            self.budget -= buf.len();
            Ok(())
        }
    }

    // ── Layout ──────────────────────────────────────────────────

    #[test]
    fn test_offsets_follow_input_order() {
        let mut out = Vec::new();
        let tensors = vec![
            ("c", u8_tensor(&[1, 2, 3])),
            ("a", u8_tensor(&[4])),
            ("b", u8_tensor(&[5, 6])),
        ];
        save(&mut out, tensors, None).unwrap();

        let json = header_json(&out);
        assert_eq!(
            json,
            r#"{"__metadata__":{},"c":{"dtype":"U8","shape":[3],"data_offsets":[0,3]},"a":{"dtype":"U8","shape":[1],"data_offsets":[3,4]},"b":{"dtype":"U8","shape":[2],"data_offsets":[4,6]}}"#
        );
        assert_eq!(&out[8 + json.len()..], &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_permuted_tensor_is_written_dense() {
        // [[0, 1, 2], [3, 4, 5]] transposed -> [[0, 3], [1, 4], [2, 5]]
        let t = Tensor::from_bytes(Shape::matrix(2, 3), DType::U8, (0..6).collect()).unwrap();
        let transposed = t.permute(&[1, 0]).unwrap();
        assert!(!transposed.is_contiguous());

        let mut out = Vec::new();
        save(&mut out, [("t", &transposed)], None).unwrap();
        let json = header_json(&out);
        assert!(json.contains(r#""shape":[3,2]"#));
        assert_eq!(&out[8 + json.len()..], &[0, 3, 1, 4, 2, 5]);
    }

    #[test]
    fn test_sequential_and_parallel_agree() {
        let tensors = || (0..16u8).map(|i| (format!("t{i}"), u8_tensor(&[i; 3])));
        let mut parallel = Vec::new();
        let mut sequential = Vec::new();
        save(&mut parallel, tensors(), None).unwrap();
        let config = FormatConfig {
            parallel_materialize: false,
            ..Default::default()
        };
        save_with(&mut sequential, tensors(), None, &config).unwrap();
        assert_eq!(parallel, sequential);
    }

    #[test]
    fn test_resave_lazy_handles() {
        let mut first = Vec::new();
        let meta = HashMap::from([("k".to_string(), "v".to_string())]);
        save(&mut first, [("x", u8_tensor(&[9, 8, 7]))], Some(&meta)).unwrap();

        let loaded = load(Arc::new(MemoryReader::new(first.clone())) as Arc<dyn Reader>).unwrap();
        let mut second = Vec::new();
        save(&mut second, &loaded.tensors, Some(&loaded.metadata)).unwrap();
        assert_eq!(first, second);
    }

    // ── Rejections ──────────────────────────────────────────────

    #[test]
    fn test_empty_tensor_writes_nothing() {
        let mut out = Vec::new();
        let empty = Tensor::zeros(Shape::new(vec![2, 0]), DType::F32);
        let result = save(&mut out, [("ok", u8_tensor(&[1])), ("e", empty)], None);
        assert!(matches!(result, Err(FormatError::EmptyTensor { ref name }) if name == "e"));
        assert!(out.is_empty());
    }

    #[test]
    fn test_unsupported_dtype_writes_nothing() {
        let mut out = Vec::new();
        let t = Tensor::zeros(Shape::vector(2), DType::F64);
        assert!(matches!(
            save(&mut out, [("d", t)], None),
            Err(FormatError::UnsupportedType { dtype: DType::F64 })
        ));
        assert!(out.is_empty());
    }

    #[test]
    fn test_reserved_and_duplicate_names() {
        let mut out = Vec::new();
        assert!(matches!(
            save(&mut out, [("__metadata__", u8_tensor(&[1]))], None),
            Err(FormatError::ReservedName { .. })
        ));
        assert!(matches!(
            save(&mut out, [("a", u8_tensor(&[1])), ("a", u8_tensor(&[2]))], None),
            Err(FormatError::DuplicateTensor { .. })
        ));
        assert!(out.is_empty());
    }

    #[test]
    fn test_closed_stream_is_unavailable() {
        let result = save(&mut ClosedWriter, [("a", u8_tensor(&[1]))], None);
        assert!(matches!(
            result,
            Err(FormatError::StreamUnavailable { ref label }) if label == "closed"
        ));
    }

    #[test]
    fn test_write_failure_is_io() {
        let mut sink = FailingWriter { budget: 10 };
        match save(&mut sink, [("a", u8_tensor(&[1]))], None) {
            Err(FormatError::Io { label, source }) => {
                assert_eq!(label, "failing");
                assert_eq!(source.kind(), io::ErrorKind::WriteZero);
            }
            other => panic!("expected Io error, got {other:?}"),
        }
    }

    #[test]
    fn test_header_ceiling_on_save() {
        let config = FormatConfig {
            max_header_length: 32,
            ..Default::default()
        };
        let mut out = Vec::new();
        let result = save_with(&mut out, [("tensor", u8_tensor(&[1]))], None, &config);
        assert!(matches!(result, Err(FormatError::InvalidHeaderLength { max: 32, .. })));
        assert!(out.is_empty());
    }

    #[test]
    fn test_failed_save_file_keeps_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = save_file(dir.path().join("model"), [("w", u8_tensor(&[1, 2, 3]))], None)
            .unwrap();
        let before = std::fs::read(&path).unwrap();

        let empty = Tensor::zeros(Shape::vector(0), DType::F32);
        assert!(matches!(
            save_file(&path, [("e", empty)], None),
            Err(FormatError::EmptyTensor { .. })
        ));
        let wide = Tensor::zeros(Shape::vector(2), DType::F64);
        assert!(matches!(
            save_file(&path, [("d", wide)], None),
            Err(FormatError::UnsupportedType { .. })
        ));
        assert!(matches!(
            save_file(&path, [("__metadata__", u8_tensor(&[1]))], None),
            Err(FormatError::ReservedName { .. })
        ));
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[test]
    fn test_failed_save_file_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let empty = Tensor::zeros(Shape::vector(0), DType::U8);
        assert!(save_file(dir.path().join("fresh"), [("e", empty)], None).is_err());
        assert!(!dir.path().join("fresh.safetensors").exists());
    }

    // ── Paths ───────────────────────────────────────────────────

    #[test]
    fn test_with_extension() {
        assert_eq!(with_extension("model"), PathBuf::from("model.safetensors"));
        assert_eq!(
            with_extension("dir/model.safetensors"),
            PathBuf::from("dir/model.safetensors")
        );
        assert_eq!(with_extension("model.bin"), PathBuf::from("model.bin.safetensors"));
        assert_eq!(
            with_extension("model.SAFETENSORS"),
            PathBuf::from("model.SAFETENSORS.safetensors")
        );
        assert_eq!(with_extension("safetensors"), PathBuf::from("safetensors.safetensors"));
        assert_eq!(with_extension(".safetensors"), PathBuf::from(".safetensors"));
    }
}
