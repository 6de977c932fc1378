//! Platform thread-identity abstraction.
//!
//! The source material's `CPUInfo::getThreadId` reaches for a raw OS thread
//! id (`gettid`/`GetCurrentThreadId`/...) so it can be used as a hash key
//! and as an ownership tag for the recursive lock. Rust's stdlib doesn't
//! expose a numeric id that cheaply, so instead each thread lazily claims
//! a small sequential integer the first time it's observed, cached in a
//! thread-local. It serves exactly the same two roles: a hash key for
//! [`crate::per_thread::ThreadHeap`] and an ownership tag for
//! [`crate::sync::RecursiveSpinLock`].

use core::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

#[cfg(feature = "std")]
std::thread_local! {
    static THIS_THREAD: u64 = NEXT_ID.fetch_add(1, Ordering::Relaxed);
}

/// A small, process-unique, nonzero id for the calling thread. Stable for
/// the lifetime of the thread; ids may be reused after a thread exits only
/// in the sense that a freshly spawned thread never observes an id already
/// retired (ids are never freed, only handed out once each).
#[cfg(feature = "std")]
#[inline]
pub fn current() -> u64 {
    THIS_THREAD.with(|&id| id)
}

/// Without `std`, there is no thread-local storage available, so every
/// caller is treated as the same thread. This is only safe for the
/// single-threaded composites the `no_std`-only build targets.
#[cfg(not(feature = "std"))]
#[inline]
pub fn current() -> u64 {
    0
}

/// A sentinel meaning "no thread owns this," distinct from every value
/// `current()` can return.
pub const NONE: u64 = 0;

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use alloc::vec::Vec;
    use std::sync::mpsc;

    #[test]
    fn current_is_stable_within_a_thread() {
        let a = current();
        let b = current();
        assert_eq!(a, b);
        assert_ne!(a, NONE);
    }

    #[test]
    fn different_threads_get_different_ids() {
        let (tx, rx) = mpsc::channel();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let tx = tx.clone();
                std::thread::spawn(move || {
                    tx.send(current()).unwrap();
                })
            })
            .collect();
        drop(tx);
        for h in handles {
            h.join().unwrap();
        }
        let mut ids: Vec<u64> = rx.iter().collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 4);
    }
}
