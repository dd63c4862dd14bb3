//! Buffer allocator with a size ceiling.
//!
//! Stands in for memory pressure: any request above the limit fails, which
//! drives the link probe down to a smaller transfer size.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::transfer::{BufferAllocator, HeapAllocator};

/// Allocator refusing buffers larger than `max_len`.
#[derive(Debug, Clone)]
pub struct LimitedAllocator {
    max_len: usize,
    requests: Arc<Mutex<Vec<usize>>>,
}

impl LimitedAllocator {
    /// Refuse allocations above `max_len` bytes.
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every size requested so far, in order, including refused ones.
    pub fn requests(&self) -> Vec<usize> {
        self.requests.lock().clone()
    }
}

impl BufferAllocator for LimitedAllocator {
    fn allocate(&self, len: usize) -> Option<Vec<u8>> {
        self.requests.lock().push(len);
        if len > self.max_len {
            return None;
        }
        HeapAllocator.allocate(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit() {
        let alloc = LimitedAllocator::new(1024);
        assert!(alloc.allocate(2048).is_none());
        assert_eq!(alloc.allocate(1024).map(|b| b.len()), Some(1024));

        // Clones share the request log
        let clone = alloc.clone();
        assert_eq!(clone.requests(), vec![2048, 1024]);
    }
}
