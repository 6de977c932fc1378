//! Concurrency layer: a private sub-heap per thread, created lazily on
//! first use and torn down when the thread exits.
//!
//! Grounded on the source material's `ThreadSpecificHeap<PerThreadHeap>`
//! (`pthread_once`/`pthread_key_create`/`pthread_getspecific`). Rust's
//! `std::thread_local!` already provides the lazy-init-plus-destructor
//! machinery the source material hand-rolls with a pthread key, so this
//! layer is built directly on it instead of reimplementing a key/once
//! state machine (that state machine reappears in `shim.rs`, where what
//! must survive being invoked before thread-local storage is safe to use
//! is the shim's own bootstrap, not ordinary per-thread allocation).
//!
//! Single-instance caveat: the backing `thread_local!` in `with_heap`
//! lives inside a generic method, so its storage is keyed by the
//! monomorphized type `S`, not by `self`. Two live `ThreadSpecificHeap<S>`
//! instances with the same `S` on one thread would share the same private
//! sub-heap instead of each getting their own, and corrupt each other's
//! state. Construct at most one `ThreadSpecificHeap<S>` per concrete `S`.

use crate::heap::Heap;
use core::cell::UnsafeCell;
use core::marker::PhantomData;

/// Wraps a thread-local `S`, default-constructed on first access per
/// thread and dropped when that thread exits. `S` itself needs no internal
/// synchronization: each thread owns a private instance.
pub struct ThreadSpecificHeap<S: Heap + Default + 'static> {
    _marker: PhantomData<S>,
}

impl<S: Heap + Default + 'static> ThreadSpecificHeap<S> {
    pub const fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }

    #[inline]
    fn with_heap<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        std::thread_local! {
            static HEAP: UnsafeCell<Option<Box<dyn core::any::Any>>> =
                const { UnsafeCell::new(None) };
        }
        // The thread_local above is typed `dyn Any` so one definition
        // serves every `S`; downcast back to the concrete type on access,
        // initializing lazily the first time this thread sees this `S`.
        HEAP.with(|cell| {
            let slot = unsafe { &mut *cell.get() };
            if slot.is_none() {
                *slot = Some(Box::new(S::default()) as Box<dyn core::any::Any>);
            }
            let heap = slot.as_ref().unwrap().downcast_ref::<S>().unwrap();
            f(heap)
        })
    }
}

impl<S: Heap + Default + 'static> Default for ThreadSpecificHeap<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Heap + Default + 'static> Heap for ThreadSpecificHeap<S> {
    const ALIGNMENT: usize = S::ALIGNMENT;

    unsafe fn malloc(&self, size: usize) -> *mut u8 {
        self.with_heap(|h| unsafe { h.malloc(size) })
    }

    unsafe fn free(&self, ptr: *mut u8) {
        self.with_heap(|h| unsafe { h.free(ptr) })
    }

    unsafe fn get_size(&self, ptr: *mut u8) -> usize {
        self.with_heap(|h| unsafe { h.get_size(ptr) })
    }
}

unsafe impl<S: Heap + Default + 'static> Sync for ThreadSpecificHeap<S> {}
unsafe impl<S: Heap + Default + Send + 'static> Send for ThreadSpecificHeap<S> {}
