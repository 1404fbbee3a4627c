//! A [`Stream`] adapter over `std::fs::File`.
//!
//! Thin by design: every operation maps directly onto the corresponding
//! standard library call, with no buffering or checkpoint support of its
//! own — callers that want prefetching wrap this in [`crate::prefetch::PrefetchBuffer`].

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{Error, Operation, Result};
use crate::stream::{Seekable, Stream};

/// Wraps an open [`File`] as a [`Stream`].
pub struct FileStream {
    file: File,
    eof: bool,
}

impl FileStream {
    /// Opens `path` for reading.
    pub fn open(path: impl AsRef<Path>) -> Result<FileStream> {
        let file = File::open(path).map_err(|e| Error::io(Operation::New, e))?;
        Ok(FileStream { file, eof: false })
    }

    /// Wraps an already-open file.
    pub fn from_file(file: File) -> FileStream {
        FileStream { file, eof: false }
    }
}

impl Stream for FileStream {
    fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
        let n = self.file.read(dst).map_err(|e| Error::io(Operation::Read, e))?;
        if n < dst.len() {
            self.eof = true;
        }
        Ok(n)
    }

    fn write(&mut self, src: &[u8]) -> Result<usize> {
        self.file.write(src).map_err(|e| Error::io(Operation::Write, e))
    }

    fn flush(&mut self) -> Result<()> {
        self.file.flush().map_err(|e| Error::io(Operation::Flush, e))
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let off = self.file.seek(pos).map_err(|e| Error::io(Operation::Seek, e))?;
        self.eof = false;
        Ok(off)
    }

    fn tell(&self) -> Result<u64> {
        // std::io::Seek requires &mut, but SeekFrom::Current(0) is the
        // conventional zero-cost way to query position without moving it;
        // a RefCell would add overhead disproportionate to the need.
        let mut file = self.file.try_clone().map_err(|e| Error::io(Operation::Tell, e))?;
        file.seek(SeekFrom::Current(0)).map_err(|e| Error::io(Operation::Tell, e))
    }

    fn eof(&self) -> bool {
        self.eof
    }

    fn error(&self) -> Option<&Error> {
        None
    }

    fn length(&self) -> Option<u64> {
        self.file.metadata().ok().map(|m| m.len())
    }

    fn seekable(&self) -> Seekable {
        Seekable::Supported
    }
}
