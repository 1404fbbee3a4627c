//! Prefetch-buffer adapter: wraps an inner [`Stream`] with a background
//! filler thread and a [`Ring`], converting seeks on the resulting stream
//! into a producer-abort/consumer-reset protocol rather than ever seeking
//! the ring directly.

use std::io::SeekFrom;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use log::{debug, trace, warn};

use crate::error::{Error, Operation, Result};
use crate::ring::Ring;
use crate::stream::{Seekable, Stream};

/// Default ring capacity used by [`PrefetchBuffer::with_defaults`]: 1 GiB.
pub const DEFAULT_BUFFER_SIZE: usize = 1 << 30;
/// Default chunk size the filler thread requests per inner read.
pub const DEFAULT_STEP_SIZE: usize = 16 * 1024;

struct SeekState {
    requested: bool,
    offset: u64,
    result: Option<std::result::Result<(), String>>,
    // Set once the consumer drops the PrefetchBuffer, so the filler thread
    // exits its EOF wait instead of waiting for a seek forever.
    shutdown: bool,
}

struct Shared {
    ring: Ring,
    seek: Mutex<SeekState>,
    seek_cond: Condvar,
    // Probed once from the inner stream before the filler loop starts;
    // streams in scope here (file, HTTP) know their length up front or
    // after the first response, so a live round-trip per call is never
    // needed.
    length: Mutex<Option<u64>>,
    last_error: Mutex<Option<String>>,
}

/// A [`Stream`] adapter that prefetches an inner stream's bytes into a
/// [`Ring`] on a background thread.
pub struct PrefetchBuffer {
    shared: Arc<Shared>,
    filler: Option<JoinHandle<()>>,
    pos: u64,
    eof: bool,
}

impl PrefetchBuffer {
    /// Wraps `inner`, buffering up to `buffer_size` bytes ahead and reading
    /// from `inner` in chunks of at most `step_size` bytes.
    pub fn new<S>(inner: S, buffer_size: usize, step_size: usize) -> Result<PrefetchBuffer>
    where
        S: Stream + Send + 'static,
    {
        let ring = Ring::new(buffer_size)
            .map_err(|e| Error::io(Operation::New, e))?;
        let shared = Arc::new(Shared {
            ring,
            seek: Mutex::new(SeekState {
                requested: false,
                offset: 0,
                result: None,
                shutdown: false,
            }),
            seek_cond: Condvar::new(),
            length: Mutex::new(None),
            last_error: Mutex::new(None),
        });

        let filler_shared = shared.clone();
        let filler = thread::Builder::new()
            .name("prefetch-filler".into())
            .spawn(move || fill_loop(filler_shared, inner, step_size))
            .expect("failed to spawn prefetch filler thread");

        Ok(PrefetchBuffer {
            shared,
            filler: Some(filler),
            pos: 0,
            eof: false,
        })
    }

    /// Wraps `inner` using [`DEFAULT_BUFFER_SIZE`] and [`DEFAULT_STEP_SIZE`].
    pub fn with_defaults<S>(inner: S) -> Result<PrefetchBuffer>
    where
        S: Stream + Send + 'static,
    {
        Self::new(inner, DEFAULT_BUFFER_SIZE, DEFAULT_STEP_SIZE)
    }
}

fn fill_loop<S: Stream>(shared: Arc<Shared>, mut inner: S, step_size: usize) {
    *shared.length.lock().unwrap() = inner.length();
    loop {
        {
            let mut state = shared.seek.lock().unwrap();
            if state.requested {
                let offset = state.offset;
                trace!("prefetch filler: seeking inner stream to {}", offset);
                let result = inner.seek(SeekFrom::Start(offset)).map(|_| ());
                if result.is_ok() {
                    shared.ring.reset();
                } else if let Err(ref e) = result {
                    warn!("prefetch filler: inner seek failed: {:?}", e);
                }
                state.result = Some(result.map_err(|e| format!("{}", e)));
                state.requested = false;
                shared.seek_cond.notify_all();
            }
            if state.shutdown {
                return;
            }
        }

        let moved = shared.ring.write2(
            |buf| match inner.read(buf) {
                Ok(n) => n,
                Err(e) => {
                    warn!("prefetch filler: inner read failed: {}", e);
                    *shared.last_error.lock().unwrap() = Some(format!("{}", e));
                    0
                }
            },
            step_size,
        );

        // An inner stream like `HttpStream` only learns its length once its
        // first response headers are parsed, which happens inside the read
        // above, not at filler startup; keep probing until it resolves.
        {
            let mut length = shared.length.lock().unwrap();
            if length.is_none() {
                *length = inner.length();
            }
        }

        if moved < step_size {
            let _ = shared.ring.close_write();
            let mut state = shared.seek.lock().unwrap();
            while !state.requested && !state.shutdown && !shared.ring.is_read_closed() {
                state = shared.seek_cond.wait(state).unwrap();
            }
            if state.shutdown || (shared.ring.is_read_closed() && !state.requested) {
                return;
            }
        }
    }
}

impl PrefetchBuffer {
    fn translate_whence(&self, pos: SeekFrom) -> Result<u64> {
        match pos {
            SeekFrom::Start(o) => Ok(o),
            SeekFrom::Current(delta) => {
                let target = self.pos as i64 + delta;
                if target < 0 {
                    return Err(Error::invalid_argument(Operation::Seek, "negative offset"));
                }
                Ok(target as u64)
            }
            SeekFrom::End(_) => Err(Error::invalid_argument(
                Operation::Seek,
                "seek from end requires a known stream length",
            )),
        }
    }
}

impl Stream for PrefetchBuffer {
    fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
        let n = self.shared.ring.read(dst);
        if n < dst.len() {
            self.eof = true;
        }
        self.pos += n as u64;
        Ok(n)
    }

    fn input(&self) -> &[u8] {
        self.shared.ring.input_some()
    }

    fn dispose(&mut self, len: usize) -> Result<usize> {
        let n = self.shared.ring.dispose_some(len);
        self.pos += n as u64;
        Ok(n)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let target = self.translate_whence(pos)?;
        debug!("prefetch buffer: seeking to {}", target);

        let mut state = self.shared.seek.lock().unwrap();
        state.offset = target;
        state.requested = true;
        state.result = None;
        // Unblock a writer that might be parked on a full ring so the
        // filler thread observes the seek request promptly.
        let _ = self.shared.ring.close_read();
        self.shared.seek_cond.notify_all();
        while state.requested {
            state = self.shared.seek_cond.wait(state).unwrap();
        }
        let result = state.result.take();
        drop(state);

        match result {
            Some(Ok(())) => {
                self.pos = target;
                self.eof = false;
                Ok(target)
            }
            Some(Err(msg)) => Err(Error::message(Operation::Seek, msg)),
            None => Err(Error::invalid_argument(Operation::Seek, "seek did not complete")),
        }
    }

    fn tell(&self) -> Result<u64> {
        Ok(self.pos)
    }

    fn eof(&self) -> bool {
        self.eof
    }

    fn length(&self) -> Option<u64> {
        *self.shared.length.lock().unwrap()
    }

    // The inner stream is owned by the filler thread, not borrowed by this
    // struct, so there is no `&Error` with a lifetime this method could
    // hand back. `last_error_message` mirrors the filler's last failure as
    // an owned string instead; this trait method stays `None` rather than
    // fabricate a borrow.
    fn error(&self) -> Option<&Error> {
        None
    }

    fn seekable(&self) -> Seekable {
        Seekable::Supported
    }
}

impl PrefetchBuffer {
    /// The inner stream's last read failure, if any, mirrored across the
    /// filler thread boundary as an owned message.
    pub fn last_error_message(&self) -> Option<String> {
        self.shared.last_error.lock().unwrap().clone()
    }
}


impl Drop for PrefetchBuffer {
    fn drop(&mut self) {
        {
            let mut state = self.shared.seek.lock().unwrap();
            state.shutdown = true;
            let _ = self.shared.ring.close_read();
            self.shared.seek_cond.notify_all();
        }
        if let Some(handle) = self.filler.take() {
            let _ = handle.join();
        }
    }
}
