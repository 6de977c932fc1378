//! Lightweight synchronization primitives for use in the allocator.
//!
//! We cannot use `std::sync::Mutex` because it allocates. Instead we provide
//! a simple test-and-set spinlock and a `SpinMutex<T>` wrapper.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

/// A simple test-and-set spinlock.
pub struct SpinLock {
    locked: AtomicBool,
}

impl Default for SpinLock {
    fn default() -> Self {
        Self::new()
    }
}

impl SpinLock {
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn lock(&self) {
        if self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            return;
        }
        self.lock_slow();
    }

    #[cold]
    fn lock_slow(&self) {
        loop {
            // Spin while locked (read-only, doesn't invalidate cache line)
            while self.locked.load(Ordering::Relaxed) {
                core::hint::spin_loop();
            }
            if self
                .locked
                .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
        }
    }

    #[inline]
    pub fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    #[inline]
    pub fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }
}

unsafe impl Send for SpinLock {}
unsafe impl Sync for SpinLock {}

/// The lock interface [`crate::locked::LockedHeap`] and
/// [`crate::buffered::BufferedLockedHeap`] are generic over (§4.7:
/// "parameterized by lock kind"). [`SpinLock`] and [`RecursiveSpinLock`]
/// both implement it.
pub trait Lock {
    fn lock(&self);
    fn unlock(&self);
}

impl Lock for SpinLock {
    #[inline]
    fn lock(&self) {
        SpinLock::lock(self)
    }

    #[inline]
    fn unlock(&self) {
        SpinLock::unlock(self)
    }
}

/// A recursive spinlock: the owning thread may lock it again without
/// deadlocking itself, at the cost of a depth counter. Used by the
/// interposition shim to guard lazy TLS-key creation, where the creation
/// path can itself trigger a reentrant allocation on the same thread.
/// Grounded on the source material's `RecursiveLockType<BaseLock>`.
pub struct RecursiveSpinLock {
    base: SpinLock,
    owner: core::sync::atomic::AtomicU64,
    depth: core::cell::UnsafeCell<u64>,
}

unsafe impl Send for RecursiveSpinLock {}
unsafe impl Sync for RecursiveSpinLock {}

impl RecursiveSpinLock {
    pub const fn new() -> Self {
        Self {
            base: SpinLock::new(),
            owner: core::sync::atomic::AtomicU64::new(crate::thread_id::NONE),
            depth: core::cell::UnsafeCell::new(0),
        }
    }
}

impl Default for RecursiveSpinLock {
    fn default() -> Self {
        Self::new()
    }
}

impl Lock for RecursiveSpinLock {
    fn lock(&self) {
        let me = crate::thread_id::current();
        if self.owner.load(Ordering::Relaxed) == me {
            unsafe { *self.depth.get() += 1 };
            return;
        }
        self.base.lock();
        self.owner.store(me, Ordering::Relaxed);
        unsafe { *self.depth.get() = 1 };
    }

    fn unlock(&self) {
        let me = crate::thread_id::current();
        debug_assert_eq!(self.owner.load(Ordering::Relaxed), me);
        unsafe {
            *self.depth.get() -= 1;
            if *self.depth.get() == 0 {
                self.owner.store(crate::thread_id::NONE, Ordering::Relaxed);
                self.base.unlock();
            }
        }
    }
}

/// A mutex that uses a spinlock for synchronization.
/// Does not allocate and can be used in a `static`.
pub struct SpinMutex<T> {
    lock: SpinLock,
    data: UnsafeCell<T>,
}

impl<T> SpinMutex<T> {
    pub const fn new(val: T) -> Self {
        Self {
            lock: SpinLock::new(),
            data: UnsafeCell::new(val),
        }
    }

    #[inline]
    pub fn lock(&self) -> SpinMutexGuard<'_, T> {
        self.lock.lock();
        SpinMutexGuard { mutex: self }
    }

    #[inline]
    pub fn try_lock(&self) -> Option<SpinMutexGuard<'_, T>> {
        if self.lock.try_lock() {
            Some(SpinMutexGuard { mutex: self })
        } else {
            None
        }
    }
}

unsafe impl<T: Send> Send for SpinMutex<T> {}
unsafe impl<T: Send> Sync for SpinMutex<T> {}

/// RAII guard for `SpinMutex`. Unlocks on drop.
pub struct SpinMutexGuard<'a, T> {
    mutex: &'a SpinMutex<T>,
}

impl<T> Deref for SpinMutexGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for SpinMutexGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> Drop for SpinMutexGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        self.mutex.lock.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;
    use std::sync::Arc;

    #[test]
    fn test_spinlock_basic() {
        let lock = SpinLock::new();
        lock.lock();
        lock.unlock();
    }

    #[test]
    fn test_spinlock_try() {
        let lock = SpinLock::new();
        assert!(lock.try_lock());
        assert!(!lock.try_lock());
        lock.unlock();
        assert!(lock.try_lock());
        lock.unlock();
    }

    #[test]
    fn test_spinmutex_basic() {
        let mutex = SpinMutex::new(42u64);
        {
            let guard = mutex.lock();
            assert_eq!(*guard, 42);
        }
        {
            let mut guard = mutex.lock();
            *guard = 100;
        }
        {
            let guard = mutex.lock();
            assert_eq!(*guard, 100);
        }
    }

    #[test]
    fn test_spinmutex_concurrent() {
        let mutex = Arc::new(SpinMutex::new(0u64));
        let num_threads = 8;
        let iterations = 10_000;

        let handles: Vec<_> = (0..num_threads)
            .map(|_| {
                let m = Arc::clone(&mutex);
                std::thread::spawn(move || {
                    for _ in 0..iterations {
                        let mut guard = m.lock();
                        *guard += 1;
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        let guard = mutex.lock();
        assert_eq!(*guard, num_threads * iterations);
    }

    #[test]
    fn test_recursive_spinlock_same_thread() {
        let lock = RecursiveSpinLock::new();
        lock.lock();
        lock.lock();
        lock.lock();
        lock.unlock();
        lock.unlock();
        lock.unlock();
        // Fully released: another "thread" (here, same thread after full
        // release) can acquire it fresh.
        lock.lock();
        lock.unlock();
    }

    #[test]
    fn test_recursive_spinlock_excludes_other_threads() {
        use std::sync::Arc;

        let lock = Arc::new(RecursiveSpinLock::new());
        lock.lock();
        lock.lock();

        let other = Arc::clone(&lock);
        let handle = std::thread::spawn(move || {
            assert!(!other.base.try_lock());
        });
        handle.join().unwrap();

        lock.unlock();
        lock.unlock();
    }
}
