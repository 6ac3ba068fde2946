//! Chunked, pooled-buffer I/O on top of a non-blocking socket.
//!
//! [`InputStream`] accumulates bytes read off the wire into a queue of
//! pooled [`Buffer`] slabs and lets callers consume them as a flat byte
//! stream without ever copying the whole backlog into one contiguous
//! allocation. [`OutputStream`] is the mirror image for writes.

use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};

use crate::pool::{Buffer, BufferPool};

/// Outcome of a single [`InputStream::recv`] call.
#[derive(Debug, PartialEq, Eq)]
pub enum RecvOutcome {
    /// Read at least one byte; the stream has `total` bytes buffered.
    Filled { total: usize },
    /// The socket had nothing more to offer right now.
    WouldBlock,
    /// The peer performed an orderly shutdown (`read` returned `0`).
    Closed,
}

/// A queue of filled (or partially filled) pooled buffers, consumed in FIFO
/// order. Mirrors `SocketInStream`'s buffer-deque discipline.
#[derive(Default)]
pub struct InputStream {
    buffers: VecDeque<Buffer>,
}

impl InputStream {
    pub fn new() -> Self {
        Self { buffers: VecDeque::new() }
    }

    /// Total bytes currently buffered and not yet consumed.
    pub fn len(&self) -> usize {
        self.buffers.iter().map(|b| b.readable().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads as much as the socket will currently give us, growing the
    /// buffer queue from `pool` as needed. Keeps reading (and acquiring
    /// fresh slabs) as long as a slab comes back completely full, since
    /// that is the only way to tell more bytes might still be waiting.
    pub fn recv(&mut self, sock: &mut impl Read, pool: &mut BufferPool) -> io::Result<RecvOutcome> {
        let mut any = false;
        let mut peer_closed = false;
        loop {
            if self.buffers.back().is_none_or(Buffer::is_full) {
                self.buffers.push_back(pool.acquire());
            }
            let buf = self.buffers.back_mut().expect("just pushed");
            match sock.read(buf.writable()) {
                Ok(0) => {
                    peer_closed = true;
                    break;
                }
                Ok(n) => {
                    buf.advance_write(n);
                    any = true;
                    // Keep issuing reads into this same buffer's remaining
                    // window: either it fills and the top of the loop moves
                    // to a fresh slab, or a later read call reports
                    // would-block/0/error and we stop there.
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        // drop a freshly acquired, still-empty tail slab rather than leaving
        // it queued forever
        if self.buffers.back().is_some_and(Buffer::is_empty) {
            let empty = self.buffers.pop_back().expect("checked above");
            pool.release(empty);
        }
        if peer_closed && !any {
            return Ok(RecvOutcome::Closed);
        }
        if any {
            Ok(RecvOutcome::Filled { total: self.len() })
        } else {
            Ok(RecvOutcome::WouldBlock)
        }
    }

    /// Copies up to `out.len()` bytes from the front of the stream into
    /// `out` without consuming them. Returns the number of bytes copied.
    pub fn peek(&self, out: &mut [u8]) -> usize {
        let mut copied = 0;
        for buf in &self.buffers {
            if copied == out.len() {
                break;
            }
            let readable = buf.readable();
            let take = readable.len().min(out.len() - copied);
            out[copied..copied + take].copy_from_slice(&readable[..take]);
            copied += take;
        }
        copied
    }

    /// Discards `count` bytes from the front of the stream, releasing any
    /// buffer slab that becomes fully drained back to `pool`.
    pub fn pop_front(&mut self, mut count: usize, pool: &mut BufferPool) {
        while count > 0 {
            let Some(front) = self.buffers.front_mut() else { break };
            let avail = front.readable().len();
            let take = avail.min(count);
            front.advance_read(take);
            count -= take;
            if front.is_empty() {
                let drained = self.buffers.pop_front().expect("front just checked");
                pool.release(drained);
            } else {
                break;
            }
        }
    }

    /// Copies exactly `count` bytes out of the stream into a freshly
    /// allocated vector, consuming them from the queue and releasing
    /// drained slabs back to `pool`. Panics if fewer than `count` bytes are
    /// buffered — callers must check [`InputStream::len`] first.
    pub fn extract(&mut self, count: usize, pool: &mut BufferPool) -> Vec<u8> {
        let mut out = Vec::with_capacity(count);
        self.extract_into(&mut out, count, pool);
        out
    }

    /// Like [`InputStream::extract`] but appends into an existing buffer
    /// and unmasks each byte against `mask` as it is copied, with
    /// `mask_offset` the running count of payload bytes already unmasked
    /// for the enclosing frame.
    pub fn masked_extract_into(
        &mut self,
        out: &mut Vec<u8>,
        count: usize,
        mask: [u8; 4],
        mask_offset: usize,
        pool: &mut BufferPool,
    ) -> usize {
        let mut remaining = count;
        let mut produced = 0;
        while remaining > 0 {
            let Some(front) = self.buffers.front_mut() else { break };
            let readable = front.readable();
            let take = readable.len().min(remaining);
            if take == 0 {
                break;
            }
            out.extend(readable[..take].iter().enumerate().map(|(i, b)| b ^ mask[(mask_offset + produced + i) & 3]));
            front.advance_read(take);
            remaining -= take;
            produced += take;
            if front.is_empty() {
                let drained = self.buffers.pop_front().expect("front just checked");
                pool.release(drained);
            }
        }
        produced
    }

    fn extract_into(&mut self, out: &mut Vec<u8>, count: usize, pool: &mut BufferPool) {
        let mut remaining = count;
        while remaining > 0 {
            let Some(front) = self.buffers.front_mut() else { break };
            let readable = front.readable();
            let take = readable.len().min(remaining);
            if take == 0 {
                break;
            }
            out.extend_from_slice(&readable[..take]);
            front.advance_read(take);
            remaining -= take;
            if front.is_empty() {
                let drained = self.buffers.pop_front().expect("front just checked");
                pool.release(drained);
            }
        }
    }

    /// Clears every buffered slab, releasing all of them back to `pool`.
    pub fn clear(&mut self, pool: &mut BufferPool) {
        while let Some(buf) = self.buffers.pop_front() {
            pool.release(buf);
        }
    }
}

/// Outcome of a single [`OutputStream::flush`] call.
#[derive(Debug, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Everything queued was written; the socket is caught up.
    Drained,
    /// The socket would block; `remaining` bytes are still queued.
    WouldBlock { remaining: usize },
}

/// A queue of pooled buffer slabs awaiting write, consumed from the head.
/// Mirrors [`InputStream`]'s pooled-slab discipline instead of backing
/// every enqueued frame with its own unpooled `Vec`.
#[derive(Default)]
pub struct OutputStream {
    buffers: VecDeque<Buffer>,
}

impl OutputStream {
    pub fn new() -> Self {
        Self { buffers: VecDeque::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.iter().all(Buffer::is_empty)
    }

    /// Bytes still queued to be written, across every backlogged slab.
    pub fn pending_bytes(&self) -> usize {
        self.buffers.iter().map(|b| b.readable().len()).sum()
    }

    /// Copies `bytes` onto the tail, acquiring fresh slabs from `pool` as
    /// needed -- the same growth discipline [`InputStream::recv`] uses.
    pub fn enqueue(&mut self, bytes: &[u8], pool: &mut BufferPool) {
        let mut remaining = bytes;
        while !remaining.is_empty() {
            if self.buffers.back().is_none_or(Buffer::is_full) {
                self.buffers.push_back(pool.acquire());
            }
            let buf = self.buffers.back_mut().expect("just pushed");
            let writable = buf.writable();
            let take = writable.len().min(remaining.len());
            writable[..take].copy_from_slice(&remaining[..take]);
            buf.advance_write(take);
            remaining = &remaining[take..];
        }
    }

    /// Writes as much of the backlog as the socket currently accepts,
    /// releasing each slab back to `pool` as it drains.
    pub fn flush(&mut self, sock: &mut impl Write, pool: &mut BufferPool) -> io::Result<FlushOutcome> {
        while let Some(front) = self.buffers.front_mut() {
            let readable = front.readable();
            if readable.is_empty() {
                let drained = self.buffers.pop_front().expect("front just checked");
                pool.release(drained);
                continue;
            }
            match sock.write(readable) {
                Ok(0) => return Ok(FlushOutcome::WouldBlock { remaining: self.pending_bytes() }),
                Ok(n) => {
                    front.advance_read(n);
                    if front.is_empty() {
                        let drained = self.buffers.pop_front().expect("front just checked");
                        pool.release(drained);
                    }
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                    return Ok(FlushOutcome::WouldBlock { remaining: self.pending_bytes() });
                }
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(FlushOutcome::Drained)
    }

    /// Releases every queued slab back to `pool`, discarding unsent bytes.
    pub fn clear(&mut self, pool: &mut BufferPool) {
        while let Some(buf) = self.buffers.pop_front() {
            pool.release(buf);
        }
    }
}
