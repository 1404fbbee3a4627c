//! Threaded circular buffer, prefetch buffer, and HTTP range-seek stream
//! adapters behind one [`Stream`] trait.
//!
//! ```no_run
//! use seekio::file::FileStream;
//! use seekio::prefetch::PrefetchBuffer;
//! use seekio::stream::Stream;
//! use std::io::SeekFrom;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let file = FileStream::open("data.bin")?;
//! let mut buffered = PrefetchBuffer::with_defaults(file)?;
//!
//! let mut buf = [0u8; 4096];
//! buffered.read(&mut buf)?;
//! buffered.seek(SeekFrom::Start(0))?;
//! # Ok(())
//! # }
//! ```
//!
//! The three modules that matter most are [`ring`] (the bounded SPSC
//! circular buffer), [`prefetch`] (the background-filling adapter built on
//! top of it), and [`http`] (an HTTP range-seek client built the same way).
//! [`file`] exists so a pipeline can be assembled uniformly out of local and
//! remote sources.

pub mod error;
pub mod file;
#[cfg(feature = "http")]
pub mod http;
pub mod prefetch;
pub mod ring;
pub mod stream;

#[cfg(test)]
mod testutil;

pub use error::{Error, Operation, Result};
pub use stream::{Seekable, Stream};
