use std::collections::VecDeque;

/// Default slab size for a freshly constructed [`BufferPool`].
pub const DEFAULT_BUFFER_SIZE: usize = 4096;
/// Default number of slabs a [`BufferPool`] keeps on its free list before it
/// starts dropping returned slabs instead of recycling them.
pub const DEFAULT_POOL_CAP: usize = 1000;

/// A single fixed-capacity byte slab owned by exactly one stream at a time.
///
/// `begin..end` is the readable window, `end..capacity` is the writable
/// tail. Not `Clone`/`Copy`: buffers move between a stream and the pool,
/// never duplicate.
pub struct Buffer {
    data: Box<[u8]>,
    begin: usize,
    end: usize,
}

impl Buffer {
    fn new(slab_size: usize) -> Self {
        Self { data: vec![0u8; slab_size].into_boxed_slice(), begin: 0, end: 0 }
    }

    #[inline]
    pub fn readable(&self) -> &[u8] {
        &self.data[self.begin..self.end]
    }

    #[inline]
    pub fn writable(&mut self) -> &mut [u8] {
        &mut self.data[self.end..]
    }

    #[inline]
    pub fn advance_write(&mut self, count: usize) {
        self.end = (self.end + count).min(self.data.len());
    }

    #[inline]
    pub fn advance_read(&mut self, count: usize) {
        self.begin = (self.begin + count).min(self.end);
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.end == self.data.len()
    }

    fn clear(&mut self) {
        self.begin = 0;
        self.end = 0;
    }
}

/// Free list of fixed-size buffer slabs, scoped to one event loop.
///
/// Acquiring a buffer never blocks and never fails: an empty pool just
/// allocates a fresh slab. Releasing a buffer recycles it onto the free list
/// until `cap`, after which the slab is dropped.
pub struct BufferPool {
    free: VecDeque<Buffer>,
    slab_size: usize,
    cap: usize,
}

impl BufferPool {
    pub fn new(slab_size: usize, cap: usize) -> Self {
        Self { free: VecDeque::new(), slab_size, cap }
    }

    #[inline]
    pub fn acquire(&mut self) -> Buffer {
        self.free.pop_front().unwrap_or_else(|| Buffer::new(self.slab_size))
    }

    #[inline]
    pub fn release(&mut self, mut buf: Buffer) {
        buf.clear();
        if self.free.len() < self.cap {
            self.free.push_back(buf);
        }
    }

    /// Number of slabs currently held on the free list.
    pub fn len(&self) -> usize {
        self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.free.is_empty()
    }

    pub fn slab_size(&self) -> usize {
        self.slab_size
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE, DEFAULT_POOL_CAP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_on_empty_pool_allocates() {
        let mut pool = BufferPool::new(16, 2);
        let buf = pool.acquire();
        assert_eq!(buf.readable().len(), 0);
        assert_eq!(buf.writable().len(), 16);
    }

    #[test]
    fn release_recycles_up_to_cap() {
        let mut pool = BufferPool::new(16, 2);
        let a = pool.acquire();
        let b = pool.acquire();
        let c = pool.acquire();
        pool.release(a);
        pool.release(b);
        pool.release(c);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn released_buffer_is_cleared() {
        let mut pool = BufferPool::new(16, 2);
        let mut buf = pool.acquire();
        buf.writable()[..5].copy_from_slice(b"hello");
        buf.advance_write(5);
        pool.release(buf);
        let reused = pool.acquire();
        assert_eq!(reused.readable().len(), 0);
    }

    #[test]
    fn advance_write_clamped_to_capacity() {
        let mut pool = BufferPool::new(4, 4);
        let mut buf = pool.acquire();
        buf.advance_write(100);
        assert!(buf.is_full());
        assert_eq!(buf.readable().len(), 4);
    }

    #[test]
    fn advance_read_clamped_to_written() {
        let mut pool = BufferPool::new(4, 4);
        let mut buf = pool.acquire();
        buf.advance_write(2);
        buf.advance_read(100);
        assert!(buf.is_empty());
    }
}
