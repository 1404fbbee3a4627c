//! HTTP range-seek stream adapter.
//!
//! Drives one [`curl::easy::Easy2`] handle through a pause/resume/abort state
//! machine so that [`HttpStream::read`] returns exactly the bytes asked for
//! (or end-of-stream), and [`HttpStream::seek`] is realized by cancelling
//! whatever transfer is in flight and reissuing a ranged request rather than
//! attempting to seek a socket directly.

mod header;

use std::io::SeekFrom;
use std::sync::Mutex;
use std::time::Duration;

use curl::easy::{Easy2, Handler, WriteError};
use curl::multi::{Easy2Handle, Multi};
use log::{debug, trace, warn};

use crate::error::{Error, Operation, Result};
use crate::stream::{Seekable, Stream};

use header::{HeaderState, RangeAllowed};

/// Transfer lifecycle for one [`HttpStream`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum HttpState {
    Ready,
    Working,
    Paused,
    AbortRequested,
    Aborted,
}

// Scoped, raw-pointer view of the consumer's output buffer, bound for the
// duration of one `read` call. A `&mut [u8]` can't be stored on the handler
// across the callback boundary the way curl's C API expects, so this plays
// the same role the original's output-buffer descriptor did.
struct OutBuf {
    ptr: *mut u8,
    len: usize,
    off: usize,
}

impl OutBuf {
    fn empty() -> Self {
        OutBuf { ptr: std::ptr::null_mut(), len: 0, off: 0 }
    }

    fn remaining(&self) -> usize {
        self.len - self.off
    }

    unsafe fn copy_in(&mut self, src: &[u8]) {
        std::ptr::copy_nonoverlapping(src.as_ptr(), self.ptr.add(self.off), src.len());
        self.off += src.len();
    }
}

// SAFETY: the pointer is only dereferenced synchronously within the same
// thread's `read` call that set it, and is cleared before that call returns.
unsafe impl Send for OutBuf {}

struct HttpHandler {
    header_state: HeaderState,
    state: HttpState,
    outbuf: OutBuf,
    // Bytes of the current curl-owned chunk already drained into a prior,
    // now-full output buffer; the next `write` call resumes from here.
    curlbuf_off: usize,
    http_off: u64,
    requested_offset: u64,
}

impl HttpHandler {
    fn new() -> Self {
        HttpHandler {
            header_state: HeaderState::new(),
            state: HttpState::Ready,
            outbuf: OutBuf::empty(),
            curlbuf_off: 0,
            http_off: 0,
            requested_offset: 0,
        }
    }
}

impl Handler for HttpHandler {
    fn write(&mut self, data: &[u8]) -> std::result::Result<usize, WriteError> {
        if self.state == HttpState::AbortRequested {
            trace!("http: write callback observed abort request");
            self.state = HttpState::Aborted;
            return Ok(0);
        }

        let out_avail = self.outbuf.remaining();
        if out_avail == 0 {
            self.state = HttpState::Paused;
            return Err(WriteError::Pause);
        }

        let in_avail = data.len() - self.curlbuf_off;
        if in_avail < out_avail {
            unsafe { self.outbuf.copy_in(&data[self.curlbuf_off..]) };
            self.curlbuf_off = 0;
            self.http_off += in_avail as u64;
            Ok(data.len())
        } else {
            unsafe { self.outbuf.copy_in(&data[self.curlbuf_off..self.curlbuf_off + out_avail]) };
            self.curlbuf_off += out_avail;
            self.http_off += out_avail as u64;
            self.state = HttpState::Paused;
            Err(WriteError::Pause)
        }
    }

    fn header(&mut self, data: &[u8]) -> bool {
        let line = String::from_utf8_lossy(data);
        self.header_state.process(line.trim_end(), self.requested_offset)
    }

    fn debug(&mut self, kind: curl::easy::InfoType, data: &[u8]) {
        if log::log_enabled!(log::Level::Trace) {
            trace!("curl[{:?}]: {}", kind, String::from_utf8_lossy(data).trim_end());
        }
    }
}

static LIBRARY_REFCOUNT: Mutex<usize> = Mutex::new(0);

/// Initializes curl's process-wide global state, if not already done by
/// another live [`HttpStream`]. Idempotent; normally callers never need to
/// invoke this directly since [`HttpStream::new`] does it automatically.
pub fn library_init() {
    let mut count = LIBRARY_REFCOUNT.lock().unwrap();
    if *count == 0 {
        trace!("http: initializing curl global state");
        curl::init();
    }
    *count += 1;
}

/// Tears down curl's process-wide global state once every live
/// [`HttpStream`] that initialized it has released its reference.
pub fn library_cleanup() {
    let mut count = LIBRARY_REFCOUNT.lock().unwrap();
    if *count > 0 {
        *count -= 1;
    }
}

/// A [`Stream`] reading an HTTP resource with pause/resume and range-seek
/// support.
pub struct HttpStream {
    multi: Multi,
    handle: Option<Easy2Handle<HttpHandler>>,
    url: String,
    last_error: Option<Error>,
}

impl HttpStream {
    /// Opens `url` for reading, starting at offset 0.
    pub fn new(url: impl Into<String>) -> Result<HttpStream> {
        library_init();
        let url = url.into();
        let multi = Multi::new();
        let handle = Self::build_handle(&url, 0)?;
        let handle = multi
            .add2(handle)
            .map_err(|e| Error::message(Operation::New, format!("{}", e)))?;
        Ok(HttpStream { multi, handle: Some(handle), url, last_error: None })
    }

    fn build_handle(url: &str, offset: u64) -> Result<Easy2<HttpHandler>> {
        let mut easy = Easy2::new(HttpHandler::new());
        easy.url(url).map_err(|e| Error::transport(Operation::New, e))?;
        easy.get(true).map_err(|e| Error::transport(Operation::New, e))?;
        if offset > 0 {
            easy.range(&format!("{}-", offset)).map_err(|e| Error::transport(Operation::New, e))?;
        }
        easy.get_mut().http_off = offset;
        easy.get_mut().requested_offset = offset;
        Ok(easy)
    }

    fn handler_state(&self) -> HttpState {
        self.handle.as_ref().expect("handle present").get_ref().state
    }

    fn set_handler_state(&mut self, state: HttpState) {
        self.handle.as_mut().expect("handle present").get_mut().state = state;
    }

    // Cancels any transfer in progress. Mirrors the original's cancellation
    // subroutine: a paused transfer is unpaused only long enough to observe
    // the abort and die; a transfer not yet started needs no cancellation at
    // all, only a reset of the chunk bookmark.
    fn cancel_transfer(&mut self) -> Result<()> {
        match self.handler_state() {
            HttpState::Ready => {
                self.handle.as_mut().unwrap().get_mut().curlbuf_off = 0;
                return Ok(());
            }
            HttpState::Paused => {
                self.set_handler_state(HttpState::AbortRequested);
                self.handle
                    .as_mut()
                    .unwrap()
                    .unpause_write()
                    .map_err(|e| Error::transport(Operation::Seek, e))?;
            }
            HttpState::Working => {
                self.set_handler_state(HttpState::AbortRequested);
            }
            HttpState::AbortRequested | HttpState::Aborted => {}
        }

        loop {
            let running = self
                .multi
                .perform()
                .map_err(|e| Error::transport(Operation::Seek, e))?;
            self.drain_messages();
            if running == 0 {
                break;
            }
        }
        Ok(())
    }

    fn drain_messages(&mut self) {
        let mut failure = None;
        self.multi.messages(|msg| {
            if let Some(result) = msg.result() {
                if let Err(e) = result {
                    failure = Some(e);
                }
            }
        });
        if let Some(e) = failure {
            warn!("http: transfer completed with error: {}", e);
            self.last_error = Some(Error::transport(Operation::Read, e));
        }
    }
}

impl Stream for HttpStream {
    fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
        if dst.is_empty() {
            return Ok(0);
        }

        {
            let was_paused = self.handler_state() == HttpState::Paused;
            let handler = self.handle.as_mut().unwrap().get_mut();
            handler.outbuf = OutBuf { ptr: dst.as_mut_ptr(), len: dst.len(), off: 0 };
            handler.header_state.begin_response();
            // Always (re-)enter Working here: the resume case is exactly the
            // one where `state` is still `Paused` from the previous call, and
            // it must be cleared or a fully-drained, re-delivered chunk (0
            // fresh bytes, `curlbuf_off` already caught up) would look like a
            // real pause to the loop below and cut the read short.
            handler.state = HttpState::Working;
            if was_paused {
                self.handle
                    .as_mut()
                    .unwrap()
                    .unpause_write()
                    .map_err(|e| Error::transport(Operation::Read, e))?;
            }
        }

        loop {
            let running = self
                .multi
                .perform()
                .map_err(|e| Error::transport(Operation::Read, e))?;
            self.drain_messages();

            // Exit once the caller's buffer is full, not on `state ==
            // Paused`: the write callback also returns without filling the
            // buffer (and without pausing) when a re-delivered chunk has
            // nothing left to drain, which must not end the read early.
            if self.handle.as_ref().unwrap().get_ref().outbuf.remaining() == 0 {
                break;
            }
            if running == 0 {
                self.set_handler_state(HttpState::Ready);
                break;
            }
            self.multi
                .wait(&mut [], Duration::from_millis(500))
                .map_err(|e| Error::transport(Operation::Read, e))?;
        }

        let n = self.handle.as_ref().unwrap().get_ref().outbuf.off;
        self.handle.as_mut().unwrap().get_mut().outbuf = OutBuf::empty();
        debug!("http: read {} bytes (off now {})", n, self.handle.as_ref().unwrap().get_ref().http_off);
        Ok(n)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let target = match pos {
            SeekFrom::Start(o) => o,
            SeekFrom::Current(d) => {
                let cur = self.handle.as_ref().unwrap().get_ref().http_off as i64;
                let t = cur + d;
                if t < 0 {
                    return Err(Error::invalid_argument(Operation::Seek, "negative offset"));
                }
                t as u64
            }
            SeekFrom::End(d) => {
                let len = self
                    .length()
                    .ok_or_else(|| Error::invalid_argument(Operation::Seek, "length unknown"))?;
                let t = len as i64 + d;
                if t < 0 {
                    return Err(Error::invalid_argument(Operation::Seek, "negative offset"));
                }
                t as u64
            }
        };

        debug!("http: seeking to {}", target);
        self.cancel_transfer()?;

        let old = self
            .multi
            .remove2(self.handle.take().expect("handle present"))
            .map_err(|e| Error::message(Operation::Seek, format!("{}", e)))?;
        let _ = old.into_inner();

        let new_handle = Self::build_handle(&self.url, target)?;
        let new_handle = self
            .multi
            .add2(new_handle)
            .map_err(|e| Error::message(Operation::Seek, format!("{}", e)))?;
        self.handle = Some(new_handle);

        Ok(target)
    }

    fn tell(&self) -> Result<u64> {
        Ok(self.handle.as_ref().unwrap().get_ref().http_off)
    }

    fn eof(&self) -> bool {
        let handler = self.handle.as_ref().unwrap().get_ref();
        match handler.header_state.length {
            Some(len) => handler.http_off >= len,
            None => false,
        }
    }

    fn error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }

    fn length(&self) -> Option<u64> {
        self.handle.as_ref().unwrap().get_ref().header_state.length
    }

    fn seekable(&self) -> Seekable {
        match self.handle.as_ref().unwrap().get_ref().header_state.range_allowed {
            RangeAllowed::Yes => Seekable::Supported,
            RangeAllowed::No | RangeAllowed::Unknown => Seekable::NotSupported,
        }
    }
}

impl Drop for HttpStream {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Ok(easy) = self.multi.remove2(handle) {
                let _ = easy.into_inner();
            }
        }
        library_cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TestServer;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn range_capable_server_full_read_matches_body() {
        init_logging();
        let body = (0..1_048_576usize).map(|i| (i % 251) as u8).collect::<Vec<_>>();
        let server = TestServer::run(body.clone(), true);
        let mut stream = HttpStream::new(server.url("/")).unwrap();

        let mut got = Vec::new();
        let mut buf = [0u8; 512];
        loop {
            let n = stream.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            got.extend_from_slice(&buf[..n]);
            if stream.eof() {
                break;
            }
        }
        assert_eq!(got, body);
        assert_eq!(stream.length(), Some(body.len() as u64));
    }

    #[test]
    fn range_capable_server_seek_then_read_matches_tail() {
        init_logging();
        let body = (0..1_048_576usize).map(|i| (i % 251) as u8).collect::<Vec<_>>();
        let server = TestServer::run(body.clone(), true);
        let mut stream = HttpStream::new(server.url("/")).unwrap();

        let mut warm = [0u8; 16];
        stream.read(&mut warm).unwrap();
        assert_eq!(stream.seekable(), Seekable::Supported);

        stream.seek(SeekFrom::Start(524_288)).unwrap();
        let mut got = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = stream.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            got.extend_from_slice(&buf[..n]);
            if stream.eof() {
                break;
            }
        }
        assert_eq!(got, &body[524_288..]);
    }

    #[test]
    fn no_range_server_reports_not_seekable() {
        init_logging();
        let body = b"short fixed body, no ranges here".to_vec();
        let server = TestServer::run(body.clone(), false);
        let mut stream = HttpStream::new(server.url("/")).unwrap();

        let mut buf = [0u8; 8];
        stream.read(&mut buf).unwrap();
        assert_eq!(stream.seekable(), Seekable::NotSupported);
    }
}
