//! Example composites: stacks the layers from [`crate::source`] through
//! [`crate::ansi`] into ready-to-use allocators, the way the source
//! material's `examples/kingsley/libkingsley.cpp` wires `TopHeap` and
//! `TheCustomHeapType` for a process-wide drop-in allocator.
//!
//! `Top` plays the role of the source material's `TopHeap`: a zone-backed
//! big-object heap that also answers `get_size`. One simplification from
//! the source material: `TopHeap` there is a `UniqueHeap` — a single shared
//! instance injected into every small-object bin. Here each small-object
//! bin default-constructs its own independent `Top` instead (`segregated`
//! module, per-class `[L; N]` array); sharing one instance across the
//! array would need `Arc` plumbing that adds little for the extra
//! complexity it costs. Recorded as a deliberate simplification.

use crate::ansi::AnsiHeap;
use crate::arena::ZoneHeap;
use crate::freelist::FreelistHeap;
use crate::header::SizeHeap;
use crate::kingsley::KingsleyHeap;
use crate::locked::LockedHeap;
use crate::source::MmapHeap;
use crate::sync::SpinLock;
#[cfg(feature = "std")]
use crate::thread_specific::ThreadSpecificHeap;

/// The big-object / fallback heap backing every composite below: a
/// size-header wrapping a zone allocator wrapping the OS source layer.
pub type Top = SizeHeap<ZoneHeap<MmapHeap, 65536>>;

/// Per-class small-object subheap: a freelist of recycled blocks, refilled
/// from `Top` on a miss.
pub type Little = FreelistHeap<Top>;

/// The Kingsley power-of-two segregated-fits heap over `Little`/`Top`.
pub type Kingsley = KingsleyHeap<Little, Top>;

/// Unsynchronized Kingsley composite, for single-threaded embedding —
/// mirrors the source material's `TheCustomHeapType` exactly (no internal
/// lock; callers provide their own exclusion).
pub type UnsyncKingsleyHeap = AnsiHeap<Kingsley>;

/// Process-wide Kingsley composite: every operation takes a single spinlock
/// around the whole segregated-fits heap. Suitable as a `#[global_allocator]`
/// backing type or for the interposition shim.
pub type LockedKingsleyHeap = AnsiHeap<LockedHeap<SpinLock, Kingsley>>;

/// Thread-cached Kingsley composite: each thread gets its own private
/// Kingsley instance via [`ThreadSpecificHeap`], so steady-state allocation
/// never takes a lock at all. Cross-thread frees still work (the block's
/// header, not its origin heap, carries its size), but return the memory to
/// the *freeing* thread's instance rather than back to the instance that
/// carved it — the same tradeoff [`crate::per_thread::ThreadHeap`] documents.
#[cfg(feature = "std")]
pub type ThreadCachedKingsleyHeap = AnsiHeap<ThreadSpecificHeap<Kingsley>>;

/// Acquire every lock in a [`LockedKingsleyHeap`], in a fixed order, so the
/// heap is left in a consistent state across a `fork()` in the parent before
/// it forks (§5 "fork safety"). The child must call
/// [`unlock_after_fork`] before doing anything else that allocates.
pub fn lock_before_fork(heap: &LockedKingsleyHeap) {
    heap.inner().lock();
}

/// Release the lock taken by [`lock_before_fork`]. Must be called in both
/// the parent and the child after a `fork()`.
pub fn unlock_after_fork(heap: &LockedKingsleyHeap) {
    heap.inner().unlock();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsync_composite_round_trips() {
        let heap = UnsyncKingsleyHeap::default();
        let ptr = heap.malloc(40);
        assert!(!ptr.is_null());
        heap.free(ptr);
    }

    #[test]
    fn locked_composite_serves_concurrent_threads() {
        use alloc::sync::Arc;

        let heap: Arc<LockedKingsleyHeap> = Arc::new(LockedKingsleyHeap::default());
        let mut handles = alloc::vec::Vec::new();
        for _ in 0..8 {
            let h = Arc::clone(&heap);
            handles.push(std::thread::spawn(move || {
                let mut ptrs = alloc::vec::Vec::new();
                for _ in 0..200 {
                    ptrs.push(h.malloc(64));
                }
                ptrs
            }));
        }
        let mut all = alloc::vec::Vec::new();
        for h in handles {
            all.extend(h.join().unwrap());
        }
        assert!(all.iter().all(|p| !p.is_null()));
    }

    #[test]
    #[cfg(feature = "std")]
    fn thread_cached_composite_serves_each_thread() {
        use alloc::sync::Arc;

        let heap: Arc<ThreadCachedKingsleyHeap> = Arc::new(ThreadCachedKingsleyHeap::default());
        let ptr = heap.malloc(32);
        assert!(!ptr.is_null());
        let h2 = Arc::clone(&heap);
        let other = std::thread::spawn(move || h2.malloc(32)).join().unwrap();
        assert!(!other.is_null());
    }
}
