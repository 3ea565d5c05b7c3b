// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Byte streams the codec reads from and writes to.
//!
//! Readers serve *positioned* reads through `&self`, so any number of lazy
//! tensors bound to one reader can be realized concurrently. Writers are
//! sequential and exclusively borrowed for the duration of a save.
//!
//! File-backed streams report a failed open through [`Reader::is_open`] /
//! [`Writer::is_open`] instead of failing construction, so the pipelines
//! can surface it as a stream error naming the path.

use std::fs::File;
use std::io::{self, BufWriter, Write as _};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Default `BufWriter` capacity for [`FileWriter`].
pub const DEFAULT_WRITE_BUFFER: usize = 8 * 1024 * 1024;

/// A source of bytes supporting thread-safe positioned reads.
pub trait Reader: Send + Sync {
    /// Name used in diagnostics (usually a path).
    fn label(&self) -> String;

    /// Returns `true` if the underlying resource was opened successfully.
    fn is_open(&self) -> bool;

    /// Returns `false` once a read has failed.
    fn good(&self) -> bool;

    /// Returns the total length of the stream in bytes.
    fn stream_len(&self) -> io::Result<u64>;

    /// Fills `buf` with the bytes starting at `offset`.
    ///
    /// Fails with [`io::ErrorKind::UnexpectedEof`] if the stream ends first.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()>;
}

/// A sequential byte sink.
pub trait Writer {
    /// Name used in diagnostics (usually a path).
    fn label(&self) -> String;

    /// Returns `true` if the underlying resource was opened successfully.
    fn is_open(&self) -> bool;

    /// Returns `false` once a write has failed.
    fn good(&self) -> bool;

    /// Appends all of `buf`.
    fn write(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Pushes buffered bytes to the underlying resource.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn not_open() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "stream is not open")
}

// ── File reader ────────────────────────────────────────────────

/// Reads a file with positioned reads on the OS handle (`pread`).
#[derive(Debug)]
pub struct FileReader {
    path: PathBuf,
    file: Option<File>,
    healthy: AtomicBool,
}

impl FileReader {
    /// Opens `path` for reading. Check [`Reader::is_open`] for the outcome.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let file = match File::open(&path) {
            Ok(file) => Some(file),
            Err(e) => {
                tracing::warn!("file reader: cannot open '{}': {e}", path.display());
                None
            }
        };
        Self {
            path,
            file,
            healthy: AtomicBool::new(true),
        }
    }

    /// Returns the file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Reader for FileReader {
    fn label(&self) -> String {
        self.path.display().to_string()
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn good(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    fn stream_len(&self) -> io::Result<u64> {
        let file = self.file.as_ref().ok_or_else(not_open)?;
        Ok(file.metadata()?.len())
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        let file = self.file.as_ref().ok_or_else(not_open)?;
        read_exact_at(file, buf, offset).inspect_err(|_| {
            self.healthy.store(false, Ordering::Release);
        })
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    std::os::unix::fs::FileExt::read_exact_at(file, buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => {
                buf = &mut std::mem::take(&mut buf)[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

// ── Memory-mapped reader ───────────────────────────────────────

/// Reads a memory-mapped file. Reads are plain slice copies.
pub struct MmapReader {
    path: PathBuf,
    mmap: Option<memmap2::Mmap>,
    healthy: AtomicBool,
}

impl MmapReader {
    /// Maps `path` read-only. Check [`Reader::is_open`] for the outcome.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let mmap = File::open(&path).and_then(|file| {
            // SAFETY: the map is read-only; the file must stay unmodified
            // while any tensor bound to this reader is alive.
            unsafe { memmap2::Mmap::map(&file) }
        });
        let mmap = match mmap {
            Ok(mmap) => {
                tracing::debug!(
                    "mmap reader: mapped {} ({:.2} MB)",
                    path.display(),
                    mmap.len() as f64 / (1024.0 * 1024.0),
                );
                Some(mmap)
            }
            Err(e) => {
                tracing::warn!("mmap reader: cannot map '{}': {e}", path.display());
                None
            }
        };
        Self {
            path,
            mmap,
            healthy: AtomicBool::new(true),
        }
    }

    /// Returns the mapped length in bytes (0 if not open).
    pub fn len(&self) -> usize {
        self.mmap.as_ref().map_or(0, |m| m.len())
    }

    /// Returns `true` if nothing is mapped.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Reader for MmapReader {
    fn label(&self) -> String {
        self.path.display().to_string()
    }

    fn is_open(&self) -> bool {
        self.mmap.is_some()
    }

    fn good(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    fn stream_len(&self) -> io::Result<u64> {
        let mmap = self.mmap.as_ref().ok_or_else(not_open)?;
        Ok(mmap.len() as u64)
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        let mmap = self.mmap.as_ref().ok_or_else(not_open)?;
        copy_range(mmap, buf, offset).inspect_err(|_| {
            self.healthy.store(false, Ordering::Release);
        })
    }
}

impl std::fmt::Debug for MmapReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MmapReader")
            .field("path", &self.path)
            .field("len", &self.len())
            .finish()
    }
}

fn copy_range(src: &[u8], buf: &mut [u8], offset: u64) -> io::Result<()> {
    let start = usize::try_from(offset).map_err(|_| io::Error::from(io::ErrorKind::UnexpectedEof))?;
    let bytes = start
        .checked_add(buf.len())
        .and_then(|end| src.get(start..end))
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "read of {} bytes at offset {offset} exceeds stream length {}",
                    buf.len(),
                    src.len()
                ),
            )
        })?;
    buf.copy_from_slice(bytes);
    Ok(())
}

// ── In-memory reader ───────────────────────────────────────────

/// Reads from a shared in-memory buffer.
#[derive(Debug, Clone)]
pub struct MemoryReader {
    label: String,
    data: Arc<[u8]>,
}

impl MemoryReader {
    /// Wraps `data`, labelled `<memory>`.
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self::with_label("<memory>", data)
    }

    /// Wraps `data` with a custom diagnostic label.
    pub fn with_label(label: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            label: label.into(),
            data: data.into(),
        }
    }

    /// Returns the wrapped bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl Reader for MemoryReader {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn is_open(&self) -> bool {
        true
    }

    fn good(&self) -> bool {
        true
    }

    fn stream_len(&self) -> io::Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        copy_range(&self.data, buf, offset)
    }
}

// ── Writers ────────────────────────────────────────────────────

/// Writes to a file through a `BufWriter`.
#[derive(Debug)]
pub struct FileWriter {
    path: PathBuf,
    inner: Option<BufWriter<File>>,
    healthy: bool,
}

impl FileWriter {
    /// Creates (or truncates) `path`. Check [`Writer::is_open`] for the outcome.
    pub fn create(path: impl AsRef<Path>) -> Self {
        Self::with_capacity(path, DEFAULT_WRITE_BUFFER)
    }

    /// Like [`create`](FileWriter::create) with an explicit buffer capacity.
    pub fn with_capacity(path: impl AsRef<Path>, capacity: usize) -> Self {
        let path = path.as_ref().to_path_buf();
        let inner = match File::create(&path) {
            Ok(file) => Some(BufWriter::with_capacity(capacity, file)),
            Err(e) => {
                tracing::warn!("file writer: cannot create '{}': {e}", path.display());
                None
            }
        };
        Self {
            path,
            inner,
            healthy: true,
        }
    }

    /// Returns the file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Writer for FileWriter {
    fn label(&self) -> String {
        self.path.display().to_string()
    }

    fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    fn good(&self) -> bool {
        self.healthy
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        let inner = self.inner.as_mut().ok_or_else(not_open)?;
        let result = inner.write_all(buf);
        self.healthy &= result.is_ok();
        result
    }

    fn flush(&mut self) -> io::Result<()> {
        let inner = self.inner.as_mut().ok_or_else(not_open)?;
        let result = inner.flush();
        self.healthy &= result.is_ok();
        result
    }
}

/// An in-memory sink; always open.
impl Writer for Vec<u8> {
    fn label(&self) -> String {
        "<memory>".to_string()
    }

    fn is_open(&self) -> bool {
        true
    }

    fn good(&self) -> bool {
        true
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        self.extend_from_slice(buf);
        Ok(())
    }
}
