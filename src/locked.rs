//! Concurrency layer: wraps every operation of a super-heap in a lock.
//!
//! Grounded on the source material's `LockedHeap<LockType, Super>`.

use crate::heap::Heap;
use crate::sync::Lock;

pub struct LockedHeap<Lk: Lock + Default, S: Heap> {
    lock: Lk,
    super_heap: S,
}

impl<Lk: Lock + Default, S: Heap> LockedHeap<Lk, S> {
    pub fn new(super_heap: S) -> Self {
        Self {
            lock: Lk::default(),
            super_heap,
        }
    }

    /// Acquire the lock without releasing it — used by the composite's
    /// fork-safety `lock_all`/`unlock_all` (§5).
    pub fn lock(&self) {
        self.lock.lock();
    }

    pub fn unlock(&self) {
        self.lock.unlock();
    }
}

impl<Lk: Lock + Default, S: Heap> Heap for LockedHeap<Lk, S> {
    const ALIGNMENT: usize = S::ALIGNMENT;

    unsafe fn malloc(&self, size: usize) -> *mut u8 {
        self.lock.lock();
        let ptr = unsafe { self.super_heap.malloc(size) };
        self.lock.unlock();
        ptr
    }

    unsafe fn free(&self, ptr: *mut u8) {
        self.lock.lock();
        unsafe { self.super_heap.free(ptr) };
        self.lock.unlock();
    }

    unsafe fn get_size(&self, ptr: *mut u8) -> usize {
        self.lock.lock();
        let sz = unsafe { self.super_heap.get_size(ptr) };
        self.lock.unlock();
        sz
    }
}

unsafe impl<Lk: Lock + Default, S: Heap> Sync for LockedHeap<Lk, S> {}
unsafe impl<Lk: Lock + Default + Send, S: Heap + Send> Send for LockedHeap<Lk, S> {}

impl<Lk: Lock + Default, S: Heap + Default> Default for LockedHeap<Lk, S> {
    fn default() -> Self {
        Self::new(S::default())
    }
}
