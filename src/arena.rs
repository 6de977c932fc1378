//! Arena/bump layer: hands out memory by bumping a pointer through chunks
//! obtained from a super-heap; individual blocks are never reclaimed.
//!
//! Grounded on the source material's `BumpAlloc`/`BumpHeap` and `ZoneHeap`.

use crate::heap::{gcd, Heap};
use core::cell::UnsafeCell;
use core::mem::size_of;
use core::ptr;

struct BumpState {
    bump: *mut u8,
    remaining: usize,
}

/// Bumps a pointer through fixed-size chunks pulled from `S`. `free` is
/// always a no-op — callers that need reclamation use a freelist layer on
/// top of this one, exactly as the source material composes `FreelistHeap<
/// BumpAlloc<...>>`. Single-threaded by itself; an outer concurrency layer
/// (§5) provides exclusion, exactly as the source material relies on an
/// outer `LockedHeap`.
pub struct BumpHeap<S: Heap, const CHUNK_SIZE: usize, const ALIGNMENT: usize = 1> {
    super_heap: S,
    state: UnsafeCell<BumpState>,
}

impl<S: Heap, const CHUNK_SIZE: usize, const ALIGNMENT: usize> BumpHeap<S, CHUNK_SIZE, ALIGNMENT> {
    pub const fn new(super_heap: S) -> Self {
        assert!(ALIGNMENT.is_power_of_two());
        assert!(gcd(CHUNK_SIZE, ALIGNMENT) == ALIGNMENT);
        Self {
            super_heap,
            state: UnsafeCell::new(BumpState {
                bump: ptr::null_mut(),
                remaining: 0,
            }),
        }
    }

    fn refill(&self, state: &mut BumpState, size: usize) {
        crate::stat_inc!(arena_refills);
        let size = size.max(CHUNK_SIZE);
        state.bump = unsafe { self.super_heap.malloc(size) };
        state.remaining = if state.bump.is_null() { 0 } else { size };
    }
}

impl<S: Heap, const CHUNK_SIZE: usize, const ALIGNMENT: usize> Heap
    for BumpHeap<S, CHUNK_SIZE, ALIGNMENT>
{
    const ALIGNMENT: usize = gcd(S::ALIGNMENT, ALIGNMENT);

    unsafe fn malloc(&self, size: usize) -> *mut u8 {
        let state = unsafe { &mut *self.state.get() };
        let new_size = (size + ALIGNMENT - 1) & !(ALIGNMENT - 1);
        if state.remaining < new_size {
            self.refill(state, new_size);
            if state.bump.is_null() {
                return ptr::null_mut();
            }
        }
        let old = state.bump;
        state.bump = unsafe { old.add(new_size) };
        state.remaining -= new_size;
        old
    }

    unsafe fn free(&self, _ptr: *mut u8) {}
}

unsafe impl<S: Heap + Send, const C: usize, const A: usize> Send for BumpHeap<S, C, A> {}
unsafe impl<S: Heap + Sync, const C: usize, const A: usize> Sync for BumpHeap<S, C, A> {}

impl<S: Heap + Default, const CHUNK_SIZE: usize, const ALIGNMENT: usize> Default
    for BumpHeap<S, CHUNK_SIZE, ALIGNMENT>
{
    fn default() -> Self {
        Self::new(S::default())
    }
}

struct ArenaHeader {
    next: *mut ArenaHeader,
    size: usize,
}

struct ZoneState {
    remaining: usize,
    space: *mut u8,
    current: *mut ArenaHeader,
    past: *mut ArenaHeader,
}

/// Carves blocks out of chunks ("arenas") pulled from `S`; unlike
/// [`BumpHeap`], keeps the arena chain so [`ZoneHeap::clear`] (and `Drop`)
/// can return every chunk to `S` at once. Individual `free` calls remain
/// no-ops.
pub struct ZoneHeap<S: Heap, const CHUNK_SIZE: usize> {
    super_heap: S,
    state: UnsafeCell<ZoneState>,
}

impl<S: Heap, const CHUNK_SIZE: usize> ZoneHeap<S, CHUNK_SIZE> {
    pub const fn new(super_heap: S) -> Self {
        Self {
            super_heap,
            state: UnsafeCell::new(ZoneState {
                remaining: 0,
                space: ptr::null_mut(),
                current: ptr::null_mut(),
                past: ptr::null_mut(),
            }),
        }
    }

    /// Return every arena chunk to the super-heap. Safe to call repeatedly.
    ///
    /// # Safety
    /// No block carved from this heap may still be in use.
    pub unsafe fn clear(&self) {
        let state = unsafe { &mut *self.state.get() };
        let mut p = state.past;
        while !p.is_null() {
            let next = unsafe { (*p).next };
            unsafe { self.super_heap.free(p as *mut u8) };
            p = next;
        }
        if !state.current.is_null() {
            unsafe { self.super_heap.free(state.current as *mut u8) };
        }
        state.current = ptr::null_mut();
        state.past = ptr::null_mut();
        state.remaining = 0;
    }

    fn zone_malloc(&self, state: &mut ZoneState, size: usize) -> *mut u8 {
        const ALIGN: usize = 16;
        let size = (size + ALIGN - 1) & !(ALIGN - 1);
        if state.current.is_null() || state.remaining < size {
            if !state.current.is_null() {
                unsafe { (*state.current).next = state.past };
                state.past = state.current;
            }
            let alloc_size = size.max(CHUNK_SIZE);
            let total = alloc_size + size_of::<ArenaHeader>();
            let raw = unsafe { self.super_heap.malloc(total) };
            if raw.is_null() {
                state.current = ptr::null_mut();
                return ptr::null_mut();
            }
            let header = raw as *mut ArenaHeader;
            unsafe {
                (*header).next = ptr::null_mut();
                (*header).size = total;
            }
            state.current = header;
            state.space = unsafe { raw.add(size_of::<ArenaHeader>()) };
            state.remaining = alloc_size;
        }
        let ptr = state.space;
        state.space = unsafe { state.space.add(size) };
        state.remaining -= size;
        ptr
    }
}

impl<S: Heap, const CHUNK_SIZE: usize> Heap for ZoneHeap<S, CHUNK_SIZE> {
    // zone_malloc carves at a fixed 16-byte granularity regardless of what S
    // promises, so the delivered alignment never exceeds that.
    const ALIGNMENT: usize = gcd(16, S::ALIGNMENT);

    unsafe fn malloc(&self, size: usize) -> *mut u8 {
        let state = unsafe { &mut *self.state.get() };
        self.zone_malloc(state, size)
    }

    unsafe fn free(&self, _ptr: *mut u8) {}
}

impl<S: Heap, const CHUNK_SIZE: usize> Drop for ZoneHeap<S, CHUNK_SIZE> {
    fn drop(&mut self) {
        unsafe { self.clear() };
    }
}

unsafe impl<S: Heap + Send, const C: usize> Send for ZoneHeap<S, C> {}
unsafe impl<S: Heap + Sync, const C: usize> Sync for ZoneHeap<S, C> {}

impl<S: Heap + Default, const CHUNK_SIZE: usize> Default for ZoneHeap<S, CHUNK_SIZE> {
    fn default() -> Self {
        Self::new(S::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MmapHeap;

    #[test]
    fn bump_carves_sequential_blocks() {
        let bump: BumpHeap<MmapHeap, 4096, 8> = BumpHeap::new(MmapHeap::new());
        unsafe {
            let a = bump.malloc(64);
            let b = bump.malloc(64);
            assert!(!a.is_null() && !b.is_null());
            assert_ne!(a, b);
            assert_eq!((a as usize) % 8, 0);
            bump.free(a); // no-op, must not corrupt state
            let c = bump.malloc(64);
            assert_ne!(c, a);
        }
    }

    #[test]
    fn bump_refills_across_chunks() {
        let bump: BumpHeap<MmapHeap, 64, 8> = BumpHeap::new(MmapHeap::new());
        unsafe {
            // Each request exceeds the chunk size, forcing a refill every time.
            let a = bump.malloc(100);
            let b = bump.malloc(100);
            assert!(!a.is_null() && !b.is_null());
        }
    }

    #[test]
    fn zone_reclaims_arenas_on_drop() {
        let zone: ZoneHeap<MmapHeap, 4096> = ZoneHeap::new(MmapHeap::new());
        unsafe {
            for _ in 0..100 {
                let p = zone.malloc(128);
                assert!(!p.is_null());
            }
            zone.clear();
        }
    }
}
