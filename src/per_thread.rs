//! Concurrency layer: fans requests out across `K` independent sub-heaps by
//! hashing the calling thread's id, so unrelated threads rarely contend.
//!
//! Grounded on the source material's `ThreadHeap<NumHeaps, PerThreadHeap>`.

use crate::heap::Heap;
use crate::thread_id;
use core::array;

pub struct ThreadHeap<const K: usize, S: Heap + Default> {
    heaps: [S; K],
}

impl<const K: usize, S: Heap + Default> ThreadHeap<K, S> {
    pub fn new() -> Self {
        Self {
            heaps: array::from_fn(|_| S::default()),
        }
    }

    #[inline]
    fn slot(&self) -> &S {
        let idx = (thread_id::current() as usize) % K;
        &self.heaps[idx]
    }
}

impl<const K: usize, S: Heap + Default> Default for ThreadHeap<K, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const K: usize, S: Heap + Default> Heap for ThreadHeap<K, S> {
    const ALIGNMENT: usize = S::ALIGNMENT;

    unsafe fn malloc(&self, size: usize) -> *mut u8 {
        unsafe { self.slot().malloc(size) }
    }

    unsafe fn free(&self, ptr: *mut u8) {
        // Routed by the freeing thread's id, same as malloc -- a block
        // freed by a different thread than allocated it returns to that
        // thread's slot, not its origin slot.
        unsafe { self.slot().free(ptr) };
    }

    unsafe fn get_size(&self, ptr: *mut u8) -> usize {
        unsafe { self.slot().get_size(ptr) }
    }
}

unsafe impl<const K: usize, S: Heap + Default + Sync> Sync for ThreadHeap<K, S> {}
unsafe impl<const K: usize, S: Heap + Default + Send> Send for ThreadHeap<K, S> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::BumpHeap;
    use crate::locked::LockedHeap;
    use crate::source::MmapHeap;
    use crate::sync::SpinLock;
    use alloc::sync::Arc;

    type Slot = LockedHeap<SpinLock, BumpHeap<MmapHeap, 65536, 16>>;

    #[test]
    fn distinct_threads_can_allocate_concurrently() {
        let heap: Arc<ThreadHeap<4, Slot>> = Arc::new(ThreadHeap::new());
        let mut handles = alloc::vec::Vec::new();
        for _ in 0..8 {
            let h = Arc::clone(&heap);
            handles.push(std::thread::spawn(move || unsafe { h.malloc(64) }));
        }
        for handle in handles {
            assert!(!handle.join().unwrap().is_null());
        }
    }
}
