// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! JSON header encoding and decoding.
//!
//! # Format
//! ```json
//! {
//!   "__metadata__": { "format": "pt" },
//!   "embed.weight": {
//!     "dtype": "F32",
//!     "shape": [50257, 768],
//!     "data_offsets": [0, 154389504]
//!   }
//! }
//! ```
//!
//! `data_offsets` are relative to the start of the payload region, which
//! begins right after the header. Unknown fields inside an entry are
//! ignored.

use crate::{FormatError, TypeTag};
use serde::ser::SerializeMap;
use std::collections::{BTreeMap, HashMap, HashSet};
use tensor_core::Shape;

/// Reserved top-level key holding the free-form string metadata.
pub const METADATA_KEY: &str = "__metadata__";

/// Hard ceiling on the header length prefix, in bytes (exclusive).
pub const MAX_HEADER_LENGTH: u64 = 100_000_000;

/// One tensor's record in the header.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct TensorEntry {
    /// Element type.
    pub dtype: TypeTag,
    /// Dimensions, outermost first.
    pub shape: Shape,
    /// `[start, end)` byte range relative to the payload region.
    pub data_offsets: [u64; 2],
}

impl TensorEntry {
    /// Creates an entry whose byte range starts at `start` and spans the
    /// size implied by `shape` and `dtype`.
    ///
    /// Returns `None` if the size or the end offset overflows.
    pub fn new(dtype: TypeTag, shape: Shape, start: u64) -> Option<Self> {
        let len = shape
            .checked_num_elements()
            .and_then(|n| n.checked_mul(dtype.element_size()))
            .and_then(|len| u64::try_from(len).ok())?;
        let end = start.checked_add(len)?;
        Some(Self {
            dtype,
            shape,
            data_offsets: [start, end],
        })
    }

    /// Start of the byte range.
    pub fn start(&self) -> u64 {
        self.data_offsets[0]
    }

    /// End of the byte range (exclusive).
    pub fn end(&self) -> u64 {
        self.data_offsets[1]
    }

    /// Length of the byte range.
    pub fn byte_len(&self) -> u64 {
        self.end().saturating_sub(self.start())
    }
}

/// A decoded header: tensor entries in header order plus metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    /// Tensor entries, in the order they appear in the JSON object.
    pub entries: Vec<(String, TensorEntry)>,
    /// The `__metadata__` dictionary (empty if absent).
    pub metadata: HashMap<String, String>,
}

impl Header {
    /// Looks up an entry by tensor name.
    pub fn get(&self, name: &str) -> Option<&TensorEntry> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, e)| e)
    }

    /// Returns the number of tensor entries.
    pub fn num_tensors(&self) -> usize {
        self.entries.len()
    }

    /// Returns the length of the payload region the entries describe.
    pub fn payload_len(&self) -> u64 {
        self.entries.iter().map(|(_, e)| e.end()).max().unwrap_or(0)
    }

    /// Encodes this header to JSON bytes.
    pub fn encode(&self) -> Result<Vec<u8>, FormatError> {
        encode(&self.entries, Some(&self.metadata))
    }

    /// Returns a one-line human-readable description.
    pub fn summary(&self) -> String {
        format!(
            "{} tensors, {:.2} MB payload, {} metadata keys",
            self.entries.len(),
            self.payload_len() as f64 / (1024.0 * 1024.0),
            self.metadata.len(),
        )
    }
}

/// Serializes `__metadata__` first, then the entries in slice order.
struct HeaderRepr<'a> {
    entries: &'a [(String, TensorEntry)],
    metadata: BTreeMap<&'a str, &'a str>,
}

impl serde::Serialize for HeaderRepr<'_> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len() + 1))?;
        map.serialize_entry(METADATA_KEY, &self.metadata)?;
        for (name, entry) in self.entries {
            map.serialize_entry(name, entry)?;
        }
        map.end()
    }
}

/// Encodes entries and metadata into header JSON bytes.
///
/// The entries are written in slice order; callers must emit payload
/// bytes in that same order for the offsets to hold. Absent metadata is
/// written as an empty object, never `null`. Metadata keys are sorted so
/// the output is deterministic.
pub fn encode(
    entries: &[(String, TensorEntry)],
    metadata: Option<&HashMap<String, String>>,
) -> Result<Vec<u8>, FormatError> {
    check_names(entries.iter().map(|(n, _)| n.as_str()))?;

    let metadata: BTreeMap<&str, &str> = metadata
        .map(|m| m.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect())
        .unwrap_or_default();
    let repr = HeaderRepr { entries, metadata };

    serde_json::to_vec(&repr).map_err(|e| FormatError::MalformedHeader {
        detail: format!("cannot serialize header: {e}"),
    })
}

/// Decodes header JSON bytes.
///
/// Checks the structure of every entry and that the byte ranges tile the
/// payload region from 0 without gaps or overlaps.
pub fn decode(bytes: &[u8]) -> Result<Header, FormatError> {
    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| FormatError::MalformedHeader {
            detail: format!("invalid JSON: {e}"),
        })?;

    let serde_json::Value::Object(object) = value else {
        return Err(FormatError::MalformedHeader {
            detail: "top-level value is not an object".into(),
        });
    };

    let mut header = Header::default();
    for (name, value) in object {
        if name == METADATA_KEY {
            header.metadata = decode_metadata(value)?;
            continue;
        }
        let entry = decode_entry(&name, &value)?;
        header.entries.push((name, entry));
    }

    check_layout(&header.entries)?;
    Ok(header)
}

/// Rejects the reserved metadata key and repeated names.
pub(crate) fn check_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Result<(), FormatError> {
    let mut seen = HashSet::new();
    for name in names {
        if name == METADATA_KEY {
            return Err(FormatError::ReservedName { name: name.into() });
        }
        if !seen.insert(name) {
            return Err(FormatError::DuplicateTensor { name: name.into() });
        }
    }
    Ok(())
}

/// Flattens `__metadata__` to strings; non-string values keep their JSON text.
fn decode_metadata(value: serde_json::Value) -> Result<HashMap<String, String>, FormatError> {
    match value {
        serde_json::Value::Object(map) => Ok(map
            .into_iter()
            .map(|(k, v)| match v {
                serde_json::Value::String(s) => (k, s),
                other => (k, other.to_string()),
            })
            .collect()),
        serde_json::Value::Null => Ok(HashMap::new()),
        _ => Err(FormatError::MalformedHeader {
            detail: format!("'{METADATA_KEY}' is not an object"),
        }),
    }
}

fn decode_entry(name: &str, value: &serde_json::Value) -> Result<TensorEntry, FormatError> {
    let object = value.as_object().ok_or_else(|| FormatError::MalformedHeader {
        detail: format!("entry '{name}' is not an object"),
    })?;

    let field = |field: &'static str| {
        object.get(field).ok_or_else(|| FormatError::MissingField {
            tensor: name.to_string(),
            field,
        })
    };
    let mismatch = |field: &'static str, expected: &'static str| FormatError::TypeMismatch {
        tensor: name.to_string(),
        field,
        expected,
    };

    let dtype_value = field("dtype")?;
    let shape_value = field("shape")?;
    let offsets_value = field("data_offsets")?;

    let dtype: TypeTag = dtype_value
        .as_str()
        .ok_or_else(|| mismatch("dtype", "a string"))?
        .parse()?;

    let dims = shape_value
        .as_array()
        .and_then(|dims| {
            dims.iter()
                .map(|d| d.as_u64().and_then(|d| usize::try_from(d).ok()))
                .collect::<Option<Vec<usize>>>()
        })
        .ok_or_else(|| mismatch("shape", "an array of non-negative integers"))?;

    let data_offsets = offsets_value
        .as_array()
        .and_then(|offsets| match offsets.as_slice() {
            [start, end] => Some([start.as_u64()?, end.as_u64()?]),
            _ => None,
        })
        .ok_or_else(|| mismatch("data_offsets", "a [start, end] pair of unsigned integers"))?;

    let entry = TensorEntry {
        dtype,
        shape: Shape::new(dims),
        data_offsets,
    };
    check_entry(name, &entry)?;
    Ok(entry)
}

/// The byte range must match the size implied by shape and dtype.
fn check_entry(name: &str, entry: &TensorEntry) -> Result<(), FormatError> {
    let invalid = |detail: String| FormatError::InvalidOffsets {
        tensor: name.to_string(),
        detail,
    };

    if entry.end() < entry.start() {
        return Err(invalid(format!(
            "end {} is before start {}",
            entry.end(),
            entry.start()
        )));
    }

    let expected = entry
        .shape
        .checked_num_elements()
        .and_then(|n| n.checked_mul(entry.dtype.element_size()))
        .ok_or_else(|| invalid(format!("shape {} overflows", entry.shape)))?;

    if entry.byte_len() != expected as u64 {
        return Err(invalid(format!(
            "range holds {} bytes but {} {} needs {expected}",
            entry.byte_len(),
            entry.shape,
            entry.dtype,
        )));
    }
    Ok(())
}

/// Ranges, sorted by position, must tile `[0, payload_len)` exactly.
fn check_layout(entries: &[(String, TensorEntry)]) -> Result<(), FormatError> {
    let mut order: Vec<&(String, TensorEntry)> = entries.iter().collect();
    order.sort_by_key(|(_, e)| (e.start(), e.end()));

    let mut cursor = 0u64;
    for (name, entry) in order {
        if entry.start() != cursor {
            return Err(FormatError::InvalidOffsets {
                tensor: name.clone(),
                detail: format!(
                    "range starts at {} but the previous range ends at {cursor}",
                    entry.start()
                ),
            });
        }
        cursor = entry.end();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(dtype: TypeTag, dims: Vec<usize>, start: u64) -> TensorEntry {
        TensorEntry::new(dtype, Shape::new(dims), start).unwrap()
    }

    #[test]
    fn test_entry_new_rejects_overflow() {
        assert!(TensorEntry::new(TypeTag::U8, Shape::vector(10), u64::MAX - 5).is_none());
        assert!(TensorEntry::new(TypeTag::F32, Shape::new(vec![usize::MAX, 2]), 0).is_none());
        assert!(TensorEntry::new(TypeTag::I64, Shape::vector(usize::MAX / 4), 0).is_none());

        let e = TensorEntry::new(TypeTag::F16, Shape::matrix(2, 3), 8).unwrap();
        assert_eq!(e.data_offsets, [8, 20]);
    }

    #[test]
    fn test_encode_empty_metadata() {
        let bytes = encode(&[], None).unwrap();
        assert_eq!(std::str::from_utf8(&bytes).unwrap(), r#"{"__metadata__":{}}"#);
    }

    #[test]
    fn test_encode_layout() {
        let entries = vec![
            ("w".to_string(), entry(TypeTag::F32, vec![2, 2], 0)),
            ("b".to_string(), entry(TypeTag::BF16, vec![3], 16)),
        ];
        let meta = HashMap::from([("format".to_string(), "test".to_string())]);
        let json = String::from_utf8(encode(&entries, Some(&meta)).unwrap()).unwrap();
        assert_eq!(
            json,
            r#"{"__metadata__":{"format":"test"},"w":{"dtype":"F32","shape":[2,2],"data_offsets":[0,16]},"b":{"dtype":"BF16","shape":[3],"data_offsets":[16,22]}}"#
        );
    }

    #[test]
    fn test_encode_sorts_metadata() {
        let meta = HashMap::from([
            ("zeta".to_string(), "1".to_string()),
            ("alpha".to_string(), "2".to_string()),
        ]);
        let json = String::from_utf8(encode(&[], Some(&meta)).unwrap()).unwrap();
        assert_eq!(json, r#"{"__metadata__":{"alpha":"2","zeta":"1"}}"#);
    }

    #[test]
    fn test_encode_rejects_reserved_and_duplicate_names() {
        let reserved = vec![(METADATA_KEY.to_string(), entry(TypeTag::U8, vec![1], 0))];
        assert!(matches!(
            encode(&reserved, None),
            Err(FormatError::ReservedName { .. })
        ));

        let dup = vec![
            ("a".to_string(), entry(TypeTag::U8, vec![1], 0)),
            ("a".to_string(), entry(TypeTag::U8, vec![1], 1)),
        ];
        assert!(matches!(
            encode(&dup, None),
            Err(FormatError::DuplicateTensor { ref name }) if name == "a"
        ));
    }

    #[test]
    fn test_decode_preserves_header_order() {
        let json = br#"{
            "z": {"dtype": "U8", "shape": [2], "data_offsets": [0, 2]},
            "__metadata__": {"k": "v"},
            "a": {"dtype": "I16", "shape": [1], "data_offsets": [2, 4]}
        }"#;
        let header = decode(json).unwrap();
        let names: Vec<&str> = header.entries.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["z", "a"]);
        assert_eq!(header.metadata.get("k").map(String::as_str), Some("v"));
        assert_eq!(header.payload_len(), 4);
    }

    #[test]
    fn test_decode_roundtrips_encode() {
        let original = Header {
            entries: vec![
                ("x".to_string(), entry(TypeTag::C64, vec![2, 1], 0)),
                ("y".to_string(), entry(TypeTag::Bool, vec![5], 16)),
            ],
            metadata: HashMap::from([("a".to_string(), "b".to_string())]),
        };
        assert_eq!(decode(&original.encode().unwrap()).unwrap(), original);
    }

    #[test]
    fn test_decode_missing_metadata_is_empty() {
        let header = decode(br#"{"w": {"dtype": "U8", "shape": [1], "data_offsets": [0, 1]}}"#)
            .unwrap();
        assert!(header.metadata.is_empty());

        let header = decode(br#"{"__metadata__": null}"#).unwrap();
        assert!(header.metadata.is_empty());
    }

    #[test]
    fn test_decode_coerces_metadata_values() {
        let header =
            decode(br#"{"__metadata__": {"n": 3, "f": true, "s": "text", "l": [1]}}"#).unwrap();
        assert_eq!(header.metadata["n"], "3");
        assert_eq!(header.metadata["f"], "true");
        assert_eq!(header.metadata["s"], "text");
        assert_eq!(header.metadata["l"], "[1]");
    }

    #[test]
    fn test_decode_rejects_non_object() {
        assert!(matches!(
            decode(b"[1, 2, 3]"),
            Err(FormatError::MalformedHeader { .. })
        ));
        assert!(matches!(
            decode(b"{not json"),
            Err(FormatError::MalformedHeader { .. })
        ));
        assert!(matches!(
            decode(br#"{"__metadata__": "oops"}"#),
            Err(FormatError::MalformedHeader { .. })
        ));
    }

    #[test]
    fn test_decode_missing_fields() {
        for (json, missing) in [
            (r#"{"t": {"shape": [1], "data_offsets": [0, 1]}}"#, "dtype"),
            (r#"{"t": {"dtype": "U8", "data_offsets": [0, 1]}}"#, "shape"),
            (r#"{"t": {"dtype": "U8", "shape": [1]}}"#, "data_offsets"),
        ] {
            match decode(json.as_bytes()) {
                Err(FormatError::MissingField { tensor, field }) => {
                    assert_eq!(tensor, "t");
                    assert_eq!(field, missing);
                }
                other => panic!("expected MissingField({missing}), got {other:?}"),
            }
        }
    }

    #[test]
    fn test_decode_type_mismatches() {
        for (json, bad) in [
            (r#"{"t": {"dtype": 4, "shape": [1], "data_offsets": [0, 1]}}"#, "dtype"),
            (r#"{"t": {"dtype": "U8", "shape": [-1], "data_offsets": [0, 1]}}"#, "shape"),
            (r#"{"t": {"dtype": "U8", "shape": [1.5], "data_offsets": [0, 1]}}"#, "shape"),
            (r#"{"t": {"dtype": "U8", "shape": 1, "data_offsets": [0, 1]}}"#, "shape"),
            (r#"{"t": {"dtype": "U8", "shape": [1], "data_offsets": [0, 1, 2]}}"#, "data_offsets"),
            (r#"{"t": {"dtype": "U8", "shape": [1], "data_offsets": [0]}}"#, "data_offsets"),
        ] {
            match decode(json.as_bytes()) {
                Err(FormatError::TypeMismatch { field, .. }) => assert_eq!(field, bad),
                other => panic!("expected TypeMismatch({bad}), got {other:?}"),
            }
        }
    }

    #[test]
    fn test_decode_unknown_dtype() {
        let json = br#"{"t": {"dtype": "Q4", "shape": [1], "data_offsets": [0, 1]}}"#;
        assert!(matches!(
            decode(json),
            Err(FormatError::UnknownTypeTag { ref tag }) if tag == "Q4"
        ));
    }

    #[test]
    fn test_decode_tolerates_extra_fields() {
        let json = br#"{"t": {"dtype": "U8", "shape": [2], "data_offsets": [0, 2], "note": "x"}}"#;
        assert_eq!(decode(json).unwrap().get("t").unwrap().byte_len(), 2);
    }

    #[test]
    fn test_decode_rejects_size_mismatch() {
        let json = br#"{"t": {"dtype": "F32", "shape": [2], "data_offsets": [0, 4]}}"#;
        assert!(matches!(
            decode(json),
            Err(FormatError::InvalidOffsets { .. })
        ));

        let json = br#"{"t": {"dtype": "U8", "shape": [0], "data_offsets": [4, 0]}}"#;
        assert!(matches!(
            decode(json),
            Err(FormatError::InvalidOffsets { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_gaps_and_overlaps() {
        let gap = br#"{
            "a": {"dtype": "U8", "shape": [2], "data_offsets": [0, 2]},
            "b": {"dtype": "U8", "shape": [2], "data_offsets": [3, 5]}
        }"#;
        assert!(matches!(decode(gap), Err(FormatError::InvalidOffsets { .. })));

        let overlap = br#"{
            "a": {"dtype": "U8", "shape": [2], "data_offsets": [0, 2]},
            "b": {"dtype": "U8", "shape": [2], "data_offsets": [1, 3]}
        }"#;
        assert!(matches!(decode(overlap), Err(FormatError::InvalidOffsets { .. })));
    }

    #[test]
    fn test_decode_accepts_any_physical_order() {
        let json = br#"{
            "second": {"dtype": "U8", "shape": [2], "data_offsets": [4, 6]},
            "first": {"dtype": "U32", "shape": [1], "data_offsets": [0, 4]}
        }"#;
        let header = decode(json).unwrap();
        assert_eq!(header.entries[0].0, "second");
        assert_eq!(header.payload_len(), 6);
    }

    #[test]
    fn test_summary() {
        let header = Header {
            entries: vec![("w".to_string(), entry(TypeTag::F32, vec![4], 0))],
            metadata: HashMap::new(),
        };
        assert!(header.summary().starts_with("1 tensors"));
    }
}
