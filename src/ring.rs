//! A single-producer/single-consumer blocking circular buffer.
//!
//! The buffer reserves one extra byte of storage beyond the capacity a
//! caller asks for, so that the "full" and "empty" states can be told apart
//! from the two offsets alone, without a separate element counter. This is
//! the `+1`-slot revision of the two variants this design is known to have
//! carried historically; it is the one whose wrap-around arithmetic stays
//! consistent at every call site, including the callback-driven write used
//! by the prefetch filler.
//!
//! Exactly one thread may call the read-side methods and exactly one thread
//! may call the write-side methods for the lifetime of a given [`Ring`]. This
//! is a contract of the type, not something enforced at runtime.

use std::cell::UnsafeCell;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};

use crate::error::{Error, Operation};

/// A bounded SPSC circular byte buffer with blocking and non-blocking
/// read/write, zero-copy peek access, and independent half-shutdown of each
/// side.
pub struct Ring {
    data: UnsafeCell<Box<[u8]>>,
    // Storage length, i.e. requested capacity + 1.
    size: usize,
    r_off: AtomicUsize,
    w_off: AtomicUsize,
    r_closed: AtomicBool,
    w_closed: AtomicBool,
    // Signaled by the consumer whenever it advances r_off or closes the
    // read side; waited on by the producer when full.
    r_lock: Mutex<()>,
    r_cond: Condvar,
    // Signaled by the producer whenever it advances w_off or closes the
    // write side; waited on by the consumer when empty.
    w_lock: Mutex<()>,
    w_cond: Condvar,
}

// SAFETY: `data` is only ever accessed through the disjoint regions each
// side's offset describes, and the two offsets are each written by exactly
// one of the two threads that are allowed to use the buffer.
unsafe impl Sync for Ring {}
unsafe impl Send for Ring {}

impl Ring {
    /// Allocates a new ring able to hold `capacity` bytes. Returns an error
    /// if `capacity` is zero.
    pub fn new(capacity: usize) -> io::Result<Ring> {
        if capacity == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "ring buffer capacity must be non-zero",
            ));
        }
        let size = capacity + 1;
        Ok(Ring {
            data: UnsafeCell::new(vec![0u8; size].into_boxed_slice()),
            size,
            r_off: AtomicUsize::new(0),
            w_off: AtomicUsize::new(0),
            r_closed: AtomicBool::new(false),
            w_closed: AtomicBool::new(false),
            r_lock: Mutex::new(()),
            r_cond: Condvar::new(),
            w_lock: Mutex::new(()),
            w_cond: Condvar::new(),
        })
    }

    /// The user-requested capacity (excludes the reserved slot).
    pub fn capacity(&self) -> usize {
        self.size - 1
    }

    /// The number of bytes currently buffered and unread.
    pub fn len(&self) -> usize {
        let w = self.w_off.load(Ordering::Acquire);
        let r = self.r_off.load(Ordering::Acquire);
        if w >= r {
            w - r
        } else {
            self.size - r + w
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn free(&self) -> usize {
        self.capacity() - self.len()
    }

    pub fn is_read_closed(&self) -> bool {
        self.r_closed.load(Ordering::Acquire)
    }

    pub fn is_write_closed(&self) -> bool {
        self.w_closed.load(Ordering::Acquire)
    }

    fn data_slice(&self) -> &[u8] {
        unsafe { &*self.data.get() }
    }

    #[allow(clippy::mut_from_ref)]
    fn data_slice_mut(&self) -> &mut [u8] {
        unsafe { &mut *self.data.get() }
    }

    /// Non-blocking read of up to `out.len()` bytes. Returns the number of
    /// bytes copied, which may be zero.
    pub fn read_some(&self, out: &mut [u8]) -> usize {
        let avail = self.len().min(out.len());
        if avail == 0 {
            return 0;
        }
        let r = self.r_off.load(Ordering::Acquire);
        let data = self.data_slice();
        let first = avail.min(self.size - r);
        out[..first].copy_from_slice(&data[r..r + first]);
        if first < avail {
            out[first..avail].copy_from_slice(&data[..avail - first]);
        }
        self.advance_read(avail);
        avail
    }

    fn advance_read(&self, n: usize) {
        let r = self.r_off.load(Ordering::Acquire);
        self.r_off.store((r + n) % self.size, Ordering::Release);
        let _g = self.r_lock.lock().unwrap();
        self.r_cond.notify_all();
    }

    /// Blocking read. Waits for data while the buffer is empty and the
    /// writer side is still open; returns early (possibly with 0 bytes) once
    /// the writer side closes.
    pub fn read(&self, out: &mut [u8]) -> usize {
        let mut total = 0;
        while total < out.len() {
            let n = self.read_some(&mut out[total..]);
            if n > 0 {
                total += n;
                continue;
            }
            if self.is_write_closed() {
                break;
            }
            let guard = self.w_lock.lock().unwrap();
            if self.is_empty() && !self.is_write_closed() {
                let _unused = self.w_cond.wait(guard).unwrap();
            }
        }
        total
    }

    /// Returns the longest contiguous run of unread bytes starting at the
    /// current read offset, without consuming them. The slice borrows the
    /// ring's storage directly.
    pub fn input_some(&self) -> &[u8] {
        let len = self.len();
        if len == 0 {
            return &[];
        }
        let r = self.r_off.load(Ordering::Acquire);
        let first = len.min(self.size - r);
        &self.data_slice()[r..r + first]
    }

    /// Consumes up to `len` bytes previously returned by [`Ring::input_some`].
    pub fn dispose_some(&self, len: usize) -> usize {
        let n = self.len().min(len);
        if n > 0 {
            self.advance_read(n);
        }
        n
    }

    /// Non-blocking write of up to `data.len()` bytes. Returns the number of
    /// bytes copied, which may be zero.
    pub fn write_some(&self, data: &[u8]) -> usize {
        if self.is_read_closed() {
            return 0;
        }
        let avail = self.free().min(data.len());
        if avail == 0 {
            return 0;
        }
        let n = self.copy_in(data, avail);
        self.advance_write(n);
        n
    }

    // Copies up to `avail` bytes from `data` into free space, handling the
    // wrap case where the reserved slot sits at offset 0 (see module docs:
    // the write window must stop one byte short of the read offset so that
    // "full" stays distinguishable from "empty").
    fn copy_in(&self, data: &[u8], avail: usize) -> usize {
        let w = self.w_off.load(Ordering::Acquire);
        let r = self.r_off.load(Ordering::Acquire);
        let data_buf = self.data_slice_mut();
        if w >= r {
            let end_room = if r == 0 { self.size - w - 1 } else { self.size - w };
            let first = avail.min(end_room);
            data_buf[w..w + first].copy_from_slice(&data[..first]);
            let mut copied = first;
            if first < avail && r > 0 {
                let second = (avail - first).min(r - 1);
                data_buf[..second].copy_from_slice(&data[first..first + second]);
                copied += second;
            }
            copied
        } else {
            let room = (r - 1) - w;
            let n = avail.min(room);
            data_buf[w..w + n].copy_from_slice(&data[..n]);
            n
        }
    }

    fn advance_write(&self, n: usize) {
        let w = self.w_off.load(Ordering::Acquire);
        self.w_off.store((w + n) % self.size, Ordering::Release);
        let _g = self.w_lock.lock().unwrap();
        self.w_cond.notify_all();
    }

    /// Blocking write. Waits for space while the buffer is full and the
    /// reader side is still open; returns early once the reader side closes.
    pub fn write(&self, data: &[u8]) -> usize {
        let mut total = 0;
        while total < data.len() {
            let n = self.write_some(&data[total..]);
            if n > 0 {
                total += n;
                continue;
            }
            if self.is_read_closed() {
                break;
            }
            let guard = self.r_lock.lock().unwrap();
            if self.free() == 0 && !self.is_read_closed() {
                let _unused = self.r_cond.wait(guard).unwrap();
            }
        }
        total
    }

    /// Non-blocking, callback-driven write. Calls `writer` over one or two
    /// contiguous free sub-regions up to `len` bytes total, summing the
    /// returned counts. If `writer` ever returns fewer bytes than the region
    /// it was given, no further sub-region is attempted and the second
    /// element of the result is `true` (end of the producer's input).
    pub fn write_some2<F>(&self, mut writer: F, len: usize) -> (usize, bool)
    where
        F: FnMut(&mut [u8]) -> usize,
    {
        if self.is_read_closed() {
            return (0, false);
        }
        let avail = self.free().min(len);
        if avail == 0 {
            return (0, false);
        }
        let w = self.w_off.load(Ordering::Acquire);
        let r = self.r_off.load(Ordering::Acquire);
        let data_buf = self.data_slice_mut();
        let mut total = 0;
        let mut eof = false;

        if w >= r {
            let end_room = if r == 0 { self.size - w - 1 } else { self.size - w };
            let first = avail.min(end_room);
            let n = writer(&mut data_buf[w..w + first]);
            total += n;
            if n < first {
                eof = true;
            } else if first < avail && r > 0 {
                let second = (avail - first).min(r - 1);
                let n2 = writer(&mut data_buf[..second]);
                total += n2;
                if n2 < second {
                    eof = true;
                }
            }
        } else {
            let room = (r - 1) - w;
            let n = avail.min(room);
            let got = writer(&mut data_buf[w..w + n]);
            total += got;
            if got < n {
                eof = true;
            }
        }

        if total > 0 {
            self.advance_write(total);
        }
        (total, eof)
    }

    /// Blocking callback-driven write. Loops [`Ring::write_some2`] until
    /// `len` bytes have been moved, the reader side closes, or the writer
    /// callback reports it has no more data.
    pub fn write2<F>(&self, mut writer: F, len: usize) -> usize
    where
        F: FnMut(&mut [u8]) -> usize,
    {
        let mut total = 0;
        while total < len {
            let (n, eof) = self.write_some2(&mut writer, len - total);
            total += n;
            if eof {
                break;
            }
            if n > 0 {
                continue;
            }
            if self.is_read_closed() {
                break;
            }
            let guard = self.r_lock.lock().unwrap();
            if self.free() == 0 && !self.is_read_closed() {
                let _unused = self.r_cond.wait(guard).unwrap();
            }
        }
        total
    }

    /// Closes the read side. Wakes any writer blocked on space.
    pub fn close_read(&self) -> Result<(), Error> {
        if self.r_closed.swap(true, Ordering::AcqRel) {
            return Err(Error::already_closed(Operation::Close));
        }
        let _g = self.r_lock.lock().unwrap();
        self.r_cond.notify_all();
        Ok(())
    }

    /// Closes the write side. Wakes any reader blocked on data.
    pub fn close_write(&self) -> Result<(), Error> {
        if self.w_closed.swap(true, Ordering::AcqRel) {
            return Err(Error::already_closed(Operation::Close));
        }
        let _g = self.w_lock.lock().unwrap();
        self.w_cond.notify_all();
        Ok(())
    }

    /// Resets both offsets to zero and reopens both half-shutdowns. The
    /// caller must guarantee neither side is concurrently reading or
    /// writing; this is used by the prefetch buffer's filler thread
    /// immediately after a successful seek, with the consumer's read side
    /// held closed (to interrupt a writer blocked on a full buffer) only for
    /// the duration of the seek.
    pub fn reset(&self) {
        self.r_off.store(0, Ordering::Release);
        self.w_off.store(0, Ordering::Release);
        self.r_closed.store(false, Ordering::Release);
        self.w_closed.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn zero_capacity_rejected() {
        assert!(Ring::new(0).is_err());
    }

    #[test]
    fn sequential_write_read() {
        let ring = Ring::new(1024 * 1024).unwrap();
        let data: Vec<u8> = (0..50u8).collect();
        assert_eq!(ring.write(&data), 50);
        let mut out = [0u8; 50];
        assert_eq!(ring.read(&mut out), 50);
        assert_eq!(&out[..], &data[..]);
    }

    #[test]
    fn partial_read_returns_available() {
        let ring = Ring::new(1024).unwrap();
        let data: Vec<u8> = (0..50u8).collect();
        assert_eq!(ring.write_some(&data), 50);
        let mut out = [0u8; 60];
        assert_eq!(ring.read_some(&mut out), 50);
    }

    #[test]
    fn input_some_then_dispose() {
        let ring = Ring::new(1024).unwrap();
        let data: Vec<u8> = (0..50u8).collect();
        ring.write_some(&data);
        assert_eq!(ring.dispose_some(30), 30);
        let remaining = ring.input_some().to_vec();
        assert_eq!(remaining.len(), 10);
        assert_eq!(remaining, &data[30..40]);
    }

    #[test]
    fn wrap_around() {
        let ring = Ring::new(16).unwrap();
        let first: Vec<u8> = (0..15u8).collect();
        assert_eq!(ring.write_some(&first), 15);
        let mut sink = [0u8; 10];
        assert_eq!(ring.read_some(&mut sink), 10);
        assert_eq!(sink, first[..10]);

        let second: Vec<u8> = (100..110u8).collect();
        assert_eq!(ring.write_some(&second), 10);

        let mut out = [0u8; 15];
        assert_eq!(ring.read_some(&mut out), 15);
        let mut expect = first[10..15].to_vec();
        expect.extend_from_slice(&second);
        assert_eq!(&out[..], &expect[..]);
    }

    #[test]
    fn full_and_empty_distinguished() {
        let ring = Ring::new(4).unwrap();
        assert_eq!(ring.write_some(&[1, 2, 3, 4, 5]), 4);
        assert_eq!(ring.len(), 4);
        assert_eq!(ring.write_some(&[9]), 0);
        let mut out = [0u8; 4];
        assert_eq!(ring.read_some(&mut out), 4);
        assert_eq!(ring.len(), 0);
    }

    #[test]
    fn close_write_then_read_drains_then_zero() {
        let ring = Ring::new(16).unwrap();
        ring.write_some(&[1, 2, 3]);
        ring.close_write().unwrap();
        let mut out = [0u8; 16];
        assert_eq!(ring.read(&mut out), 3);
        assert_eq!(ring.read(&mut out), 0);
    }

    #[test]
    fn close_read_stops_writer() {
        let ring = Ring::new(4).unwrap();
        ring.write_some(&[1, 2, 3, 4]);
        ring.close_read().unwrap();
        assert_eq!(ring.write(&[5]), 0);
    }

    #[test]
    fn double_close_errors() {
        let ring = Ring::new(4).unwrap();
        ring.close_read().unwrap();
        assert!(ring.close_read().is_err());
    }

    #[test]
    fn threaded_producer_consumer() {
        let ring = Arc::new(Ring::new(509).unwrap());
        let total_bytes = 4 * 1024 * 1024;
        let expected: Vec<u8> = (0..total_bytes).map(|i| (i % 251) as u8).collect();

        let w_ring = ring.clone();
        let w_data = expected.clone();
        let writer = thread::spawn(move || {
            let mut off = 0;
            while off < w_data.len() {
                let chunk = 997.min(w_data.len() - off);
                let n = w_ring.write(&w_data[off..off + chunk]);
                off += n;
            }
            w_ring.close_write().unwrap();
        });

        let mut got = Vec::with_capacity(expected.len());
        let mut buf = [0u8; 613];
        loop {
            let n = ring.read(&mut buf);
            if n == 0 {
                break;
            }
            got.extend_from_slice(&buf[..n]);
        }
        writer.join().unwrap();
        assert_eq!(got, expected);
    }
}
