//! The polymorphic stream contract every adapter in this crate implements.
//!
//! This replaces the capability-record-of-function-pointers approach to
//! "some streams support some operations" with ordinary trait defaults: an
//! adapter that does not support an operation simply does not override it,
//! and the caller gets back [`Error::unsupported`](crate::error::Error::unsupported)
//! instead of dereferencing a null pointer.

use std::io::SeekFrom;

use crate::error::{Error, Operation, Result};

/// Whether and how a [`Stream`] supports [`Stream::seek`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Seekable {
    /// Seeking is not available at all.
    NotSupported,
    /// Seeking to an arbitrary offset is available.
    Supported,
    /// Seeking is available but implemented by discarding and re-fetching
    /// data rather than a true positional seek (e.g. a producer that must
    /// restart its source).
    Emulated,
    /// Seeking is only exact when the target offset is one the stream has
    /// already recorded as a checkpoint.
    CheckpointsOnly,
}

/// A byte stream that may support reading, writing, seeking, and checkpoint
/// based random access, in any combination.
///
/// Every method has a default that reports the operation unsupported;
/// concrete adapters override only what they can actually do.
pub trait Stream {
    /// Reads up to `dst.len()` bytes into `dst`, returning the number of
    /// bytes actually read. A short read that is not EOF and not an error is
    /// legal for sources with internal chunking (e.g. HTTP); callers should
    /// loop until `dst` is full, `eof()` is true, or `error()` is `Some`.
    fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
        let _ = dst;
        Err(Error::unsupported(Operation::Read))
    }

    /// Returns a zero-copy view of whatever bytes are immediately available
    /// without consuming them. Adapters that cannot expose their internal
    /// buffer return an empty slice.
    fn input(&self) -> &[u8] {
        &[]
    }

    /// Consumes `len` bytes previously returned by [`Stream::input`].
    fn dispose(&mut self, len: usize) -> Result<usize> {
        let _ = len;
        Err(Error::unsupported(Operation::Dispose))
    }

    /// Writes `src` and returns the number of bytes accepted.
    fn write(&mut self, src: &[u8]) -> Result<usize> {
        let _ = src;
        Err(Error::unsupported(Operation::Write))
    }

    /// Flushes any buffered writes.
    fn flush(&mut self) -> Result<()> {
        Err(Error::unsupported(Operation::Flush))
    }

    /// Repositions the stream and returns the new absolute offset.
    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let _ = pos;
        Err(Error::unsupported(Operation::Seek))
    }

    /// Returns the current logical position.
    fn tell(&self) -> Result<u64> {
        Err(Error::unsupported(Operation::Tell))
    }

    /// `true` once the stream has delivered its last byte.
    fn eof(&self) -> bool {
        false
    }

    /// The last error recorded by the stream, if any, distinct from EOF.
    fn error(&self) -> Option<&Error> {
        None
    }

    /// The total length of the stream, if known in advance.
    fn length(&self) -> Option<u64> {
        None
    }

    /// Whether, and how, this stream supports [`Stream::seek`].
    fn seekable(&self) -> Seekable {
        Seekable::NotSupported
    }

    /// The number of checkpoints known to the stream, if it supports them.
    fn checkpoint_count(&self) -> Option<u64> {
        None
    }

    /// The byte offset of checkpoint `index`.
    fn checkpoint_offset(&self, index: u64) -> Result<u64> {
        let _ = index;
        Err(Error::unsupported(Operation::Checkpoint))
    }

    /// Opaque metadata associated with checkpoint `index`.
    fn checkpoint_metadata(&self, index: u64) -> Result<&[u8]> {
        let _ = index;
        Err(Error::unsupported(Operation::Checkpoint))
    }

    /// Seeks exactly to checkpoint `index`.
    fn seek_to_checkpoint(&mut self, index: u64) -> Result<()> {
        let _ = index;
        Err(Error::unsupported(Operation::Checkpoint))
    }
}
