use std::sync::atomic::{AtomicUsize, Ordering};
use parking_lot::Mutex;

/// Buffer pool for scratch space reuse across scans.
///
/// Buffers are cleared before they go back on the free list, so nothing read
/// by one scan is visible to the next.
pub struct BufferPool {
    free: Mutex<Vec<Vec<u8>>>,
    max_pooled: usize,
    max_capacity: usize,
    pub reused: AtomicUsize,
    pub allocated: AtomicUsize,
}

impl BufferPool {
    pub fn new(max_pooled: usize) -> Self {
        BufferPool {
            free: Mutex::new(Vec::with_capacity(max_pooled)),
            max_pooled,
            max_capacity: 4 * 1024 * 1024,   // don't hoard buffers grown by huge records
            reused: AtomicUsize::new(0),
            allocated: AtomicUsize::new(0),
        }
    }

    /// Empty buffer with at least `size` bytes of capacity
    pub fn get(&self, size: usize) -> Vec<u8> {
        if let Some(mut buf) = self.free.lock().pop() {
            self.reused.fetch_add(1, Ordering::Relaxed);
            buf.reserve(size);
            return buf;
        }

        self.allocated.fetch_add(1, Ordering::Relaxed);
        Vec::with_capacity(size.max(256).next_power_of_two())
    }

    pub fn put(&self, mut buf: Vec<u8>) {
        if buf.capacity() > self.max_capacity {
            return;
        }
        buf.clear();

        let mut free = self.free.lock();
        if free.len() < self.max_pooled {
            free.push(buf);
        }
    }

    pub fn pooled(&self) -> usize {
        self.free.lock().len()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        BufferPool::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_returned_buffers_are_cleared_and_reused() {
        let pool = BufferPool::new(4);
        let mut buf = pool.get(16);
        buf.extend_from_slice(b"secret record bytes");
        pool.put(buf);
        assert_eq!(pool.pooled(), 1);

        let again = pool.get(8);
        assert!(again.is_empty());
        assert_eq!(pool.reused.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_pool_is_bounded() {
        let pool = BufferPool::new(2);
        for _ in 0..5 {
            pool.put(Vec::with_capacity(32));
        }
        assert_eq!(pool.pooled(), 2);
    }
}
