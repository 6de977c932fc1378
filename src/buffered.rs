//! Concurrency layer: batches frees in a per-thread buffer and amortizes
//! the lock over `CAPACITY` frees instead of taking it on every one.
//! `malloc` always takes the lock; on a failed allocation it drains the
//! calling thread's own batch and retries once before giving up, so memory
//! sitting in an unflushed buffer isn't reported as exhausted.
//!
//! Grounded on the source material's `BufferedLockedHeap<Size, LockType,
//! Super>` (`__thread void** freeBuffer` / `__thread int freeIndex`).
//!
//! Single-instance caveat: the per-thread buffer lives in a `thread_local!`
//! keyed by the monomorphized `(CAPACITY, Lk, S)` type, not by `self`. Two
//! live `BufferedLockedHeap<CAPACITY, Lk, S>` instances with identical type
//! parameters on the same thread would share one buffer and corrupt each
//! other's batch — construct at most one instance per monomorphization.

use crate::heap::Heap;
use crate::sync::Lock;

struct Buffer<const CAPACITY: usize> {
    slots: [*mut u8; CAPACITY],
    len: usize,
}

impl<const CAPACITY: usize> Buffer<CAPACITY> {
    const fn new() -> Self {
        Self {
            slots: [core::ptr::null_mut(); CAPACITY],
            len: 0,
        }
    }
}

pub struct BufferedLockedHeap<const CAPACITY: usize, Lk: Lock + Default, S: Heap> {
    lock: Lk,
    super_heap: S,
}

impl<const CAPACITY: usize, Lk: Lock + Default, S: Heap> BufferedLockedHeap<CAPACITY, Lk, S> {
    pub fn new(super_heap: S) -> Self {
        Self {
            lock: Lk::default(),
            super_heap,
        }
    }

    fn drain(&self, buf: &mut Buffer<CAPACITY>) {
        self.lock.lock();
        for i in 0..buf.len {
            unsafe { self.super_heap.free(buf.slots[i]) };
        }
        self.lock.unlock();
        buf.len = 0;
    }

    /// Run `f` against this thread's batch buffer. The buffer is a
    /// `thread_local!` declared here, inside a generic method, so it
    /// monomorphizes one instance per `(CAPACITY, Lk, S)` — both `malloc`
    /// and `free` must route through this single method so they share the
    /// same buffer rather than each getting an independent one.
    #[cfg(feature = "std")]
    fn with_buffer<R>(&self, f: impl FnOnce(&Self, &mut Buffer<CAPACITY>) -> R) -> R {
        std::thread_local! {
            static BUF: core::cell::UnsafeCell<Buffer<CAPACITY>> =
                const { core::cell::UnsafeCell::new(Buffer::new()) };
        }
        BUF.with(|cell| {
            let buf = unsafe { &mut *cell.get() };
            f(self, buf)
        })
    }
}

impl<const CAPACITY: usize, Lk: Lock + Default, S: Heap> Heap
    for BufferedLockedHeap<CAPACITY, Lk, S>
{
    const ALIGNMENT: usize = S::ALIGNMENT;

    #[cfg(feature = "std")]
    unsafe fn malloc(&self, size: usize) -> *mut u8 {
        self.lock.lock();
        let ptr = unsafe { self.super_heap.malloc(size) };
        self.lock.unlock();
        if !ptr.is_null() {
            return ptr;
        }
        // The super-heap may be starved only because this thread is sitting
        // on a batch of not-yet-returned frees; drain it and retry once
        // before reporting failure.
        self.with_buffer(|this, buf| {
            if buf.len == 0 {
                return core::ptr::null_mut();
            }
            crate::stat_inc!(buffer_drains);
            this.drain(buf);
            this.lock.lock();
            let ptr = unsafe { this.super_heap.malloc(size) };
            this.lock.unlock();
            ptr
        })
    }

    #[cfg(not(feature = "std"))]
    unsafe fn malloc(&self, size: usize) -> *mut u8 {
        self.lock.lock();
        let ptr = unsafe { self.super_heap.malloc(size) };
        self.lock.unlock();
        ptr
    }

    #[cfg(feature = "std")]
    unsafe fn free(&self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        self.with_buffer(|this, buf| {
            if buf.len == CAPACITY {
                crate::stat_inc!(buffer_drains);
                this.drain(buf);
            }
            buf.slots[buf.len] = ptr;
            buf.len += 1;
            crate::stat_inc!(buffered_frees);
        });
    }

    #[cfg(not(feature = "std"))]
    unsafe fn free(&self, ptr: *mut u8) {
        // Without std there is no thread-local storage available, so every
        // free goes straight through the lock — identical to `LockedHeap`.
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

unsafe impl<const CAPACITY: usize, Lk: Lock + Default, S: Heap> Sync
    for BufferedLockedHeap<CAPACITY, Lk, S>
{
}
unsafe impl<const CAPACITY: usize, Lk: Lock + Default + Send, S: Heap + Send> Send
    for BufferedLockedHeap<CAPACITY, Lk, S>
{
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::arena::BumpHeap;
    use crate::source::MmapHeap;
    use crate::sync::SpinLock;

    type Inner = BumpHeap<MmapHeap, 65536, 16>;

    #[test]
    fn buffers_frees_up_to_capacity() {
        let heap: BufferedLockedHeap<8, SpinLock, Inner> =
            BufferedLockedHeap::new(BumpHeap::new(MmapHeap::new()));
        unsafe {
            let ptrs: alloc::vec::Vec<_> = (0..20).map(|_| heap.malloc(32)).collect();
            for p in ptrs {
                heap.free(p);
            }
        }
    }
}
