//! Allocation statistics counters.
//!
//! All counters use `Relaxed` ordering — they are observational only and not
//! used as synchronization primitives. The layers' own locks provide the
//! ordering guarantees for correctness; these counters are purely for
//! monitoring.
//!
//! # Usage
//!
//! ```ignore
//! let snap = heaplayers::stats::snapshot();
//! println!("allocs: {}", snap.alloc_count);
//! ```
//!
//! Obtain a [`Snapshot`] with [`snapshot()`]. Individual counter loads are
//! individually atomic but not globally consistent with each other.

use core::sync::atomic::{AtomicU64, Ordering};

pub(crate) struct Stats {
    // ---- Global allocation stats ----
    /// Total calls to malloc with size > 0.
    pub alloc_count: AtomicU64,
    /// Total calls to free with a non-null pointer.
    pub dealloc_count: AtomicU64,
    /// Total calls to realloc (after null/zero-size guards).
    pub realloc_count: AtomicU64,
    /// Sum of all requested byte sizes passed to malloc.
    pub alloc_bytes: AtomicU64,

    // ---- Segregated-fits tier breakdown ----
    /// Allocations served from a segregated-fits small-object bin.
    pub small_bin_hits: AtomicU64,
    /// Requests that missed every small bin and fell through to the big heap.
    pub big_heap_allocs: AtomicU64,
    /// Times the lenient `SegHeap` demoted a big-heap block back into a bin.
    pub bin_demotions: AtomicU64,

    // ---- Arena / source tier ----
    /// Calls to `platform::page_alloc`.
    pub os_alloc_count: AtomicU64,
    /// Bytes requested from the OS via `platform::page_alloc`.
    pub os_alloc_bytes: AtomicU64,
    /// Times an arena layer refilled from its super-heap (chunk exhausted).
    pub arena_refills: AtomicU64,

    // ---- Concurrency tier ----
    /// Frees absorbed into a per-thread buffer instead of taking the lock.
    pub buffered_frees: AtomicU64,
    /// Times a buffered-free layer drained its buffer under the lock.
    pub buffer_drains: AtomicU64,
}

impl Stats {
    const fn new() -> Self {
        Self {
            alloc_count: AtomicU64::new(0),
            dealloc_count: AtomicU64::new(0),
            realloc_count: AtomicU64::new(0),
            alloc_bytes: AtomicU64::new(0),
            small_bin_hits: AtomicU64::new(0),
            big_heap_allocs: AtomicU64::new(0),
            bin_demotions: AtomicU64::new(0),
            os_alloc_count: AtomicU64::new(0),
            os_alloc_bytes: AtomicU64::new(0),
            arena_refills: AtomicU64::new(0),
            buffered_frees: AtomicU64::new(0),
            buffer_drains: AtomicU64::new(0),
        }
    }
}

pub(crate) static STATS: Stats = Stats::new();

/// A point-in-time snapshot of all allocation statistics.
///
/// Fields are plain `u64` values loaded from the global atomic counters.
/// Individual fields are each atomically read, but the snapshot as a whole
/// is not globally consistent — concurrent allocations may race between loads.
/// For monitoring purposes this is always sufficient.
///
/// Obtain a snapshot with [`snapshot()`].
#[derive(Clone, Copy, Debug, Default)]
pub struct Snapshot {
    pub alloc_count: u64,
    pub dealloc_count: u64,
    pub realloc_count: u64,
    pub alloc_bytes: u64,
    pub small_bin_hits: u64,
    pub big_heap_allocs: u64,
    pub bin_demotions: u64,
    pub os_alloc_count: u64,
    pub os_alloc_bytes: u64,
    pub arena_refills: u64,
    pub buffered_frees: u64,
    pub buffer_drains: u64,
}

/// Load all counters with `Relaxed` ordering and return a [`Snapshot`].
pub fn snapshot() -> Snapshot {
    let s = &STATS;
    Snapshot {
        alloc_count: s.alloc_count.load(Ordering::Relaxed),
        dealloc_count: s.dealloc_count.load(Ordering::Relaxed),
        realloc_count: s.realloc_count.load(Ordering::Relaxed),
        alloc_bytes: s.alloc_bytes.load(Ordering::Relaxed),
        small_bin_hits: s.small_bin_hits.load(Ordering::Relaxed),
        big_heap_allocs: s.big_heap_allocs.load(Ordering::Relaxed),
        bin_demotions: s.bin_demotions.load(Ordering::Relaxed),
        os_alloc_count: s.os_alloc_count.load(Ordering::Relaxed),
        os_alloc_bytes: s.os_alloc_bytes.load(Ordering::Relaxed),
        arena_refills: s.arena_refills.load(Ordering::Relaxed),
        buffered_frees: s.buffered_frees.load(Ordering::Relaxed),
        buffer_drains: s.buffer_drains.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reads_zero_initialized_counters() {
        let snap = snapshot();
        let _ = snap.alloc_count;
    }
}
