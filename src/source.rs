//! Top / source layer: the bottom of every composite, backed directly by
//! the OS virtual-memory interface in [`crate::platform`].
//!
//! Grounded on the source material's `SizedMmapHeap`/`MmapHeap`.

use crate::heap::Heap;
use crate::platform::{self, PAGE_SIZE};
use crate::sync::SpinMutex;

/// A raw heap over OS pages. `malloc` rounds up to a whole number of pages
/// and zeroes the result (the OS already zeroes fresh anonymous mappings);
/// `free` requires the caller to supply the original size, since this layer
/// itself keeps no bookkeeping (`SizedMmapHeap` in the source material).
pub struct SizedMmapHeap;

impl SizedMmapHeap {
    pub const fn new() -> Self {
        Self
    }

    /// Allocate at least `size` bytes, rounded up to a page multiple.
    ///
    /// # Safety
    /// None beyond the usual: the returned pointer must be freed exactly
    /// once, via [`Self::free_sized`] with the *rounded-up* size.
    #[inline]
    pub unsafe fn malloc_sized(&self, size: usize) -> (*mut u8, usize) {
        let rounded = platform::round_up_to_page(size.max(1));
        let ptr = unsafe { platform::page_alloc(rounded) };
        if !ptr.is_null() {
            crate::stat_inc!(os_alloc_count);
            crate::stat_add!(os_alloc_bytes, rounded);
        }
        (ptr, rounded)
    }

    /// # Safety
    /// `ptr`/`size` must match a prior `malloc_sized` call exactly.
    #[inline]
    pub unsafe fn free_sized(&self, ptr: *mut u8, size: usize) {
        if ptr.is_null() {
            return;
        }
        unsafe { platform::page_dealloc(ptr, size) };
    }
}

impl Default for SizedMmapHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl Heap for SizedMmapHeap {
    const ALIGNMENT: usize = PAGE_SIZE;

    unsafe fn malloc(&self, size: usize) -> *mut u8 {
        unsafe { self.malloc_sized(size).0 }
    }

    /// A sizeless `free` has no meaning for this layer (see [`MmapHeap`] for
    /// the bookkeeping variant); this is a no-op intentionally left unsafe
    /// to call, matching the source material's split between the
    /// `free(ptr, size)` and `free(ptr)` overloads.
    unsafe fn free(&self, _ptr: *mut u8) {}
}

const TRACK_CAPACITY: usize = 1 << 16;

struct TrackTable {
    keys: [*mut u8; TRACK_CAPACITY],
    sizes: [usize; TRACK_CAPACITY],
}

unsafe impl Send for TrackTable {}

impl TrackTable {
    const fn new() -> Self {
        Self {
            keys: [core::ptr::null_mut(); TRACK_CAPACITY],
            sizes: [0; TRACK_CAPACITY],
        }
    }

    #[inline]
    fn slot_for(ptr: *mut u8) -> usize {
        let h = (ptr as usize) >> PAGE_SIZE.trailing_zeros();
        h % TRACK_CAPACITY
    }

    fn insert(&mut self, ptr: *mut u8, size: usize) {
        let mut idx = Self::slot_for(ptr);
        for _ in 0..TRACK_CAPACITY {
            if self.keys[idx].is_null() {
                self.keys[idx] = ptr;
                self.sizes[idx] = size;
                return;
            }
            idx = (idx + 1) % TRACK_CAPACITY;
        }
        // Table is full: caller's working set exceeded our tracking
        // capacity. There is no recovery path that doesn't itself
        // allocate, so we drop the record; the block then leaks instead
        // of being returned to the OS on free.
    }

    fn remove(&mut self, ptr: *mut u8) -> usize {
        let mut idx = Self::slot_for(ptr);
        for _ in 0..TRACK_CAPACITY {
            if self.keys[idx] == ptr {
                let sz = self.sizes[idx];
                self.keys[idx] = core::ptr::null_mut();
                self.sizes[idx] = 0;
                return sz;
            }
            if self.keys[idx].is_null() {
                return 0;
            }
            idx = (idx + 1) % TRACK_CAPACITY;
        }
        0
    }

    fn get(&self, ptr: *mut u8) -> usize {
        let mut idx = Self::slot_for(ptr);
        for _ in 0..TRACK_CAPACITY {
            if self.keys[idx] == ptr {
                return self.sizes[idx];
            }
            if self.keys[idx].is_null() {
                return 0;
            }
            idx = (idx + 1) % TRACK_CAPACITY;
        }
        0
    }
}

/// `SizedMmapHeap` plus a side table mapping live block -> size, so plain
/// `free(ptr)` (no size argument) is possible. The side table is a
/// fixed-capacity, open-addressed array allocated once from a dedicated
/// page (not through the public `Heap` surface), so tracking allocations
/// never recurse into the composite being tracked — matching the source
/// material's note that `MyMap`'s backing heap is a private, unshared
/// allocator (`LockedHeap<FreelistHeap<ZoneHeap<SizedMmapHeap>>>`).
pub struct MmapHeap {
    inner: SizedMmapHeap,
    table: SpinMutex<&'static mut TrackTable>,
}

impl MmapHeap {
    pub fn new() -> Self {
        let bytes = platform::round_up_to_page(core::mem::size_of::<TrackTable>());
        let raw = unsafe { platform::page_alloc(bytes) };
        let table: &'static mut TrackTable = unsafe {
            let p = raw as *mut TrackTable;
            p.write(TrackTable::new());
            &mut *p
        };
        Self {
            inner: SizedMmapHeap::new(),
            table: SpinMutex::new(table),
        }
    }
}

impl Default for MmapHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl Heap for MmapHeap {
    const ALIGNMENT: usize = SizedMmapHeap::ALIGNMENT;

    unsafe fn malloc(&self, size: usize) -> *mut u8 {
        let (ptr, rounded) = unsafe { self.inner.malloc_sized(size) };
        if ptr.is_null() {
            return ptr;
        }
        self.table.lock().insert(ptr, rounded);
        ptr
    }

    unsafe fn free(&self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        let size = self.table.lock().remove(ptr);
        if size > 0 {
            unsafe { self.inner.free_sized(ptr, size) };
        }
    }

    unsafe fn get_size(&self, ptr: *mut u8) -> usize {
        self.table.lock().get(ptr)
    }
}

unsafe impl Send for MmapHeap {}
unsafe impl Sync for MmapHeap {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sized_roundtrip() {
        let h = SizedMmapHeap::new();
        unsafe {
            let (ptr, sz) = h.malloc_sized(100);
            assert!(!ptr.is_null());
            assert_eq!(sz % PAGE_SIZE, 0);
            *ptr = 7;
            assert_eq!(*ptr, 7);
            h.free_sized(ptr, sz);
        }
    }

    #[test]
    fn tracked_free_without_size() {
        let h = MmapHeap::new();
        unsafe {
            let ptr = h.malloc(500);
            assert!(!ptr.is_null());
            assert!(h.get_size(ptr) >= 500);
            h.free(ptr);
            assert_eq!(h.get_size(ptr), 0);
        }
    }

    #[test]
    fn free_null_is_noop() {
        let h = MmapHeap::new();
        unsafe { h.free(core::ptr::null_mut()) };
    }
}
