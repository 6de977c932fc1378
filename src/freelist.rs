//! Freelist/cache layer: holds freed blocks of one size class on an
//! intrusive list and reuses them before going to the super-heap.
//!
//! Grounded on the source material's `FreelistHeap` and `BoundedFreeListHeap`.
//! Both are single-size-class heaps — the segregated-fits dispatcher
//! (`segregated.rs`) is what fans a request out across many of these.

use crate::heap::Heap;
use crate::list::FreeList;
use core::cell::UnsafeCell;

/// An unbounded freelist: every freed block is kept and reused; `clear`
/// returns them all to `S`.
pub struct FreelistHeap<S: Heap> {
    super_heap: S,
    list: UnsafeCell<FreeList>,
}

impl<S: Heap> FreelistHeap<S> {
    pub const fn new(super_heap: S) -> Self {
        Self {
            super_heap,
            list: UnsafeCell::new(FreeList::new()),
        }
    }

    /// Return every held block to the super-heap.
    ///
    /// # Safety
    /// No block held here may still be referenced afterward.
    pub unsafe fn clear(&self) {
        let list = unsafe { &mut *self.list.get() };
        loop {
            let p = list.pop();
            if p.is_null() {
                break;
            }
            unsafe { self.super_heap.free(p) };
        }
    }
}

impl<S: Heap> Heap for FreelistHeap<S> {
    const ALIGNMENT: usize = S::ALIGNMENT;

    unsafe fn malloc(&self, size: usize) -> *mut u8 {
        let list = unsafe { &mut *self.list.get() };
        let ptr = list.pop();
        if !ptr.is_null() {
            return ptr;
        }
        unsafe { self.super_heap.malloc(size) }
    }

    unsafe fn free(&self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        let list = unsafe { &mut *self.list.get() };
        unsafe { list.push(ptr) };
    }
}

unsafe impl<S: Heap + Send> Send for FreelistHeap<S> {}
unsafe impl<S: Heap + Sync> Sync for FreelistHeap<S> {}

impl<S: Heap + Default> Default for FreelistHeap<S> {
    fn default() -> Self {
        Self::new(S::default())
    }
}

/// A freelist capped at `CAPACITY` held blocks. On overflow, the whole
/// held set (not just the newest block) drains back to `S` in one pass —
/// matching the source material's "beware: `free` on overflow calls
/// `clear()`" note — and the triggering block is then kept, so the list
/// never silently leaks the pointer that pushed it over the cap.
pub struct BoundedFreelistHeap<S: Heap, const CAPACITY: usize> {
    super_heap: S,
    list: UnsafeCell<FreeList>,
    count: core::sync::atomic::AtomicUsize,
}

impl<S: Heap, const CAPACITY: usize> BoundedFreelistHeap<S, CAPACITY> {
    pub const fn new(super_heap: S) -> Self {
        Self {
            super_heap,
            list: UnsafeCell::new(FreeList::new()),
            count: core::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// # Safety
    /// No block held here may still be referenced afterward.
    pub unsafe fn clear(&self) {
        let list = unsafe { &mut *self.list.get() };
        loop {
            let p = list.pop();
            if p.is_null() {
                break;
            }
            unsafe { self.super_heap.free(p) };
        }
        self.count.store(0, core::sync::atomic::Ordering::Relaxed);
    }
}

impl<S: Heap, const CAPACITY: usize> Heap for BoundedFreelistHeap<S, CAPACITY> {
    const ALIGNMENT: usize = S::ALIGNMENT;

    unsafe fn malloc(&self, size: usize) -> *mut u8 {
        use core::sync::atomic::Ordering;
        let list = unsafe { &mut *self.list.get() };
        let ptr = list.pop();
        if !ptr.is_null() {
            self.count.fetch_sub(1, Ordering::Relaxed);
            return ptr;
        }
        unsafe { self.super_heap.malloc(size) }
    }

    unsafe fn free(&self, ptr: *mut u8) {
        use core::sync::atomic::Ordering;
        if ptr.is_null() {
            return;
        }
        if self.count.load(Ordering::Relaxed) < CAPACITY {
            let list = unsafe { &mut *self.list.get() };
            unsafe { list.push(ptr) };
            self.count.fetch_add(1, Ordering::Relaxed);
        } else {
            unsafe { self.clear() };
            let list = unsafe { &mut *self.list.get() };
            unsafe { list.push(ptr) };
            self.count.store(1, Ordering::Relaxed);
        }
    }
}

unsafe impl<S: Heap + Send, const N: usize> Send for BoundedFreelistHeap<S, N> {}
unsafe impl<S: Heap + Sync, const N: usize> Sync for BoundedFreelistHeap<S, N> {}

impl<S: Heap + Default, const N: usize> Default for BoundedFreelistHeap<S, N> {
    fn default() -> Self {
        Self::new(S::default())
    }
}
