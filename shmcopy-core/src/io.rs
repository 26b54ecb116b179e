// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Byte sources and sinks at the two ends of a copy.

use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{CopyError, CopyResult};

/// Delivers the stream in chunks.
pub trait ByteSource {
    /// Fill `buf` with the next chunk. Returns 0 at end of stream.
    fn read_chunk(&mut self, buf: &mut [u8]) -> CopyResult<usize>;
}

/// Consumes the stream in chunks.
pub trait ByteSink {
    /// Write the whole chunk.
    fn write_chunk(&mut self, chunk: &[u8]) -> CopyResult<()>;

    /// Push buffered bytes to the underlying storage.
    fn flush(&mut self) -> CopyResult<()> {
        Ok(())
    }
}

/// Reads a file from start to end.
#[derive(Debug)]
pub struct FileSource {
    path: PathBuf,
    file: File,
}

impl FileSource {
    /// Open `path` for reading. Missing files and permission problems fail here.
    pub fn open(path: impl AsRef<Path>) -> CopyResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| {
            CopyError::io(format!("opening source file {}", path.display()), e)
        })?;
        Ok(Self { path, file })
    }
}

impl ByteSource for FileSource {
    /// Reads until `buf` is full or the file ends, so only the last chunk is short.
    fn read_chunk(&mut self, buf: &mut [u8]) -> CopyResult<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(CopyError::io(
                        format!("reading source file {}", self.path.display()),
                        e,
                    ))
                }
            }
        }
        Ok(filled)
    }
}

/// Writes a file, truncating anything already there.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    file: File,
}

impl FileSink {
    /// Create or truncate `path`.
    pub fn create(path: impl AsRef<Path>) -> CopyResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).map_err(|e| {
            CopyError::io(format!("opening target file {}", path.display()), e)
        })?;
        Ok(Self { path, file })
    }
}

impl ByteSink for FileSink {
    fn write_chunk(&mut self, chunk: &[u8]) -> CopyResult<()> {
        self.file.write_all(chunk).map_err(|e| {
            CopyError::io(format!("writing target file {}", self.path.display()), e)
        })
    }

    fn flush(&mut self) -> CopyResult<()> {
        self.file.sync_all().map_err(|e| {
            CopyError::io(format!("syncing target file {}", self.path.display()), e)
        })
    }
}

impl ByteSource for &[u8] {
    fn read_chunk(&mut self, buf: &mut [u8]) -> CopyResult<usize> {
        let len = buf.len().min(self.len());
        let (chunk, rest) = self.split_at(len);
        buf[..len].copy_from_slice(chunk);
        *self = rest;
        Ok(len)
    }
}

impl ByteSink for Vec<u8> {
    fn write_chunk(&mut self, chunk: &[u8]) -> CopyResult<()> {
        self.extend_from_slice(chunk);
        Ok(())
    }
}

/// True when both paths name the same file.
///
/// Falls back to comparing the paths as given when either cannot be resolved,
/// e.g. because the destination does not exist yet.
pub fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_source_is_io_error() {
        let dir = TempDir::new().unwrap();
        let err = FileSource::open(dir.path().join("nonexistent.txt")).unwrap_err();
        assert!(matches!(err, CopyError::Io { .. }));
        assert!(err.to_string().contains("nonexistent.txt"));
    }

    #[test]
    fn test_source_fills_whole_chunks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("source.bin");
        std::fs::write(&path, vec![7u8; 10]).unwrap();

        let mut source = FileSource::open(&path).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(source.read_chunk(&mut buf).unwrap(), 4);
        assert_eq!(source.read_chunk(&mut buf).unwrap(), 4);
        assert_eq!(source.read_chunk(&mut buf).unwrap(), 2);
        assert_eq!(source.read_chunk(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_sink_truncates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("target.bin");
        std::fs::write(&path, b"old contents").unwrap();

        let mut sink = FileSink::create(&path).unwrap();
        sink.write_chunk(b"new").unwrap();
        sink.flush().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"new");
    }

    #[test]
    fn test_slice_source_and_vec_sink() {
        let mut source: &[u8] = b"hello world";
        let mut sink = Vec::new();
        let mut buf = [0u8; 4];
        loop {
            let n = source.read_chunk(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            sink.write_chunk(&buf[..n]).unwrap();
        }
        assert_eq!(sink, b"hello world");
    }

    #[test]
    fn test_same_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"x").unwrap();

        let dotted = dir.path().join(".").join("a.txt");
        assert!(same_file(&path, &dotted));
        assert!(!same_file(&path, &dir.path().join("b.txt")));
    }
}
