//! Process-wide interposition shim: the C ABI entry points (and the C++
//! `operator new`/`operator delete` family) that let this crate replace the
//! system allocator for an entire process.
//!
//! Grounded on the source material's `wrapper.cpp` (`xxmalloc`-family glue),
//! `gnuwrapper.cpp`/`macwrapper.cpp` (the libc name surface), and
//! `generic-memalign.cpp` (aligned allocation without a native path).
//! Gated behind the `ffi` feature (which implies `std`) — this module only
//! matters when the crate is actually linked in as a process's allocator.

#![cfg(feature = "ffi")]

use crate::arena::BumpHeap;
use crate::composite::LockedKingsleyHeap;
use crate::source::SizedMmapHeap;
use crate::sync::{Lock, RecursiveSpinLock};
use core::cell::Cell;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicU8, Ordering};

const NEEDS_KEY: u8 = 0;
const CREATING_KEY: u8 = 1;
const DONE: u8 = 2;

static COMPOSITE_STATE: AtomicU8 = AtomicU8::new(NEEDS_KEY);
static COMPOSITE_LOCK: RecursiveSpinLock = RecursiveSpinLock::new();
static mut COMPOSITE_STORAGE: MaybeUninit<LockedKingsleyHeap> = MaybeUninit::uninit();

/// Allocation-free-to-construct fallback heap type for calls that re-enter
/// the shim before (or while) the main composite is bootstrapped.
type BootstrapHeap = BumpHeap<SizedMmapHeap, 1048576, 16>;

/// e.g. the first per-thread setup on a thread triggering a nested
/// allocation that routes back through this same shim. Backed by a plain
/// OS-page source with no lazy std machinery of its own, so it never
/// recurses.
static BOOTSTRAP: BootstrapHeap = BumpHeap::new(SizedMmapHeap::new());

std::thread_local! {
    static SHIM_DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// Lazily constructs the process-wide composite exactly once, using a
/// `{NEEDS_KEY, CREATING_KEY, DONE}` state machine under a recursive
/// spinlock instead of `std::sync::OnceLock` — the std primitives that back
/// `OnceLock`/`Mutex` are themselves not guaranteed allocation-free on every
/// platform, which would recurse back into this shim on first use.
fn composite() -> &'static LockedKingsleyHeap {
    loop {
        match COMPOSITE_STATE.load(Ordering::Acquire) {
            DONE => return unsafe { &*(&raw const COMPOSITE_STORAGE).cast::<LockedKingsleyHeap>() },
            _ => {
                COMPOSITE_LOCK.lock();
                if COMPOSITE_STATE.load(Ordering::Relaxed) == NEEDS_KEY {
                    COMPOSITE_STATE.store(CREATING_KEY, Ordering::Relaxed);
                    unsafe {
                        (*(&raw mut COMPOSITE_STORAGE)).write(LockedKingsleyHeap::default());
                    }
                    COMPOSITE_STATE.store(DONE, Ordering::Release);
                }
                COMPOSITE_LOCK.unlock();
                if COMPOSITE_STATE.load(Ordering::Relaxed) != DONE {
                    core::hint::spin_loop();
                }
            }
        }
    }
}

/// Runs `f` against the process composite, unless this thread is already
/// inside the shim (a reentrant call), in which case `g` runs against the
/// allocation-free bootstrap heap instead.
#[inline]
fn dispatch<R>(f: impl FnOnce(&LockedKingsleyHeap) -> R, g: impl FnOnce(&BootstrapHeap) -> R) -> R {
    let reentered = SHIM_DEPTH.with(|d| {
        let depth = d.get();
        d.set(depth + 1);
        depth > 0
    });
    let result = if reentered { g(&BOOTSTRAP) } else { f(composite()) };
    SHIM_DEPTH.with(|d| d.set(d.get() - 1));
    result
}

fn xxmalloc(size: usize) -> *mut u8 {
    crate::stat_inc!(alloc_count);
    crate::stat_add!(alloc_bytes, size);
    dispatch(
        |c| c.inner().ansi_malloc(size),
        |b| unsafe { crate::heap::Heap::malloc(b, size) },
    )
}

fn xxfree(ptr: *mut u8) {
    if ptr.is_null() {
        return;
    }
    crate::stat_inc!(dealloc_count);
    dispatch(
        |c| c.inner().ansi_free(ptr),
        |b| unsafe { crate::heap::Heap::free(b, ptr) },
    )
}

fn xxmalloc_usable_size(ptr: *mut u8) -> usize {
    dispatch(
        |c| c.inner().ansi_get_size(ptr),
        |b| unsafe { crate::heap::Heap::get_size(b, ptr) },
    )
}

fn xxmemalign(alignment: usize, size: usize) -> *mut u8 {
    dispatch(
        |c| c.inner().ansi_aligned_allocate(alignment, size),
        |b| {
            // The bootstrap heap's own natural alignment (16) already
            // satisfies small requests; anything stricter has no
            // allocation-free over-allocation path here and fails.
            if alignment <= 16 {
                unsafe { crate::heap::Heap::malloc(b, size) }
            } else {
                core::ptr::null_mut()
            }
        },
    )
}

/// `AnsiHeap` only exposes `malloc`/`free`/... as inherent methods on the
/// concrete type produced for each composite, not behind a trait — give the
/// shim a small extension trait so `dispatch`'s two branches share one
/// call shape regardless of which composite variant backs `c`.
trait AnsiOps {
    fn ansi_malloc(&self, size: usize) -> *mut u8;
    fn ansi_free(&self, ptr: *mut u8);
    fn ansi_get_size(&self, ptr: *mut u8) -> usize;
    fn ansi_aligned_allocate(&self, alignment: usize, size: usize) -> *mut u8;
}

impl<S: crate::heap::Heap> AnsiOps for crate::ansi::AnsiHeap<S> {
    fn ansi_malloc(&self, size: usize) -> *mut u8 {
        self.malloc(size)
    }
    fn ansi_free(&self, ptr: *mut u8) {
        self.free(ptr)
    }
    fn ansi_get_size(&self, ptr: *mut u8) -> usize {
        self.get_size(ptr)
    }
    fn ansi_aligned_allocate(&self, alignment: usize, size: usize) -> *mut u8 {
        self.aligned_allocate(alignment, size)
    }
}

macro_rules! shim_fn {
    ($plain:literal, $name:ident ( $($arg:ident : $ty:ty),* ) -> $ret:ty $body:block) => {
        #[cfg_attr(not(feature = "testing"), unsafe(export_name = $plain))]
        #[cfg_attr(feature = "testing", unsafe(export_name = concat!("heaplayers_locked_", $plain)))]
        pub unsafe extern "C" fn $name($($arg: $ty),*) -> $ret $body
    };
}

shim_fn!("malloc", heaplayers_malloc(size: usize) -> *mut u8 {
    xxmalloc(size)
});

shim_fn!("free", heaplayers_free(ptr: *mut u8) -> () {
    xxfree(ptr)
});

shim_fn!("calloc", heaplayers_calloc(count: usize, size: usize) -> *mut u8 {
    let Some(total) = count.checked_mul(size) else {
        return core::ptr::null_mut();
    };
    let ptr = xxmalloc(total);
    if !ptr.is_null() {
        unsafe { core::ptr::write_bytes(ptr, 0, total) };
    }
    ptr
});

shim_fn!("realloc", heaplayers_realloc(ptr: *mut u8, size: usize) -> *mut u8 {
    crate::stat_inc!(realloc_count);
    if ptr.is_null() {
        return xxmalloc(size);
    }
    if size == 0 {
        xxfree(ptr);
        return core::ptr::null_mut();
    }
    let old_size = xxmalloc_usable_size(ptr);
    let new_ptr = xxmalloc(size);
    if !new_ptr.is_null() {
        let copy_len = old_size.min(size);
        unsafe { core::ptr::copy_nonoverlapping(ptr, new_ptr, copy_len) };
    }
    xxfree(ptr);
    new_ptr
});

shim_fn!("recalloc", heaplayers_recalloc(ptr: *mut u8, count: usize, size: usize) -> *mut u8 {
    let Some(total) = count.checked_mul(size) else {
        return core::ptr::null_mut();
    };
    let old_size = if ptr.is_null() { 0 } else { xxmalloc_usable_size(ptr) };
    let new_ptr = unsafe { heaplayers_realloc(ptr, total) };
    if !new_ptr.is_null() && total > old_size {
        unsafe {
            core::ptr::write_bytes(new_ptr.add(old_size), 0, total - old_size);
        }
    }
    new_ptr
});

shim_fn!("malloc_usable_size", heaplayers_malloc_usable_size(ptr: *mut u8) -> usize {
    xxmalloc_usable_size(ptr)
});

shim_fn!("memalign", heaplayers_memalign(alignment: usize, size: usize) -> *mut u8 {
    xxmemalign(alignment, size)
});

shim_fn!("aligned_alloc", heaplayers_aligned_alloc(alignment: usize, size: usize) -> *mut u8 {
    xxmemalign(alignment, size)
});

shim_fn!("valloc", heaplayers_valloc(size: usize) -> *mut u8 {
    xxmemalign(crate::platform::PAGE_SIZE, size)
});

shim_fn!("pvalloc", heaplayers_pvalloc(size: usize) -> *mut u8 {
    let rounded = crate::platform::round_up_to_page(size);
    xxmemalign(crate::platform::PAGE_SIZE, rounded)
});

#[cfg_attr(not(feature = "testing"), unsafe(export_name = "posix_memalign"))]
#[cfg_attr(
    feature = "testing",
    unsafe(export_name = "heaplayers_locked_posix_memalign")
)]
pub unsafe extern "C" fn heaplayers_posix_memalign(
    memptr: *mut *mut u8,
    alignment: usize,
    size: usize,
) -> i32 {
    const EINVAL: i32 = 22;
    const ENOMEM: i32 = 12;
    if alignment == 0 || (alignment & (alignment - 1)) != 0 {
        return EINVAL;
    }
    let ptr = xxmemalign(alignment, size);
    if ptr.is_null() {
        return ENOMEM;
    }
    unsafe { *memptr = ptr };
    0
}

shim_fn!("strdup", heaplayers_strdup(s: *const core::ffi::c_char) -> *mut core::ffi::c_char {
    if s.is_null() {
        return core::ptr::null_mut();
    }
    let len = unsafe { core::ffi::CStr::from_ptr(s) }.to_bytes_with_nul().len();
    let ptr = xxmalloc(len) as *mut core::ffi::c_char;
    if !ptr.is_null() {
        unsafe { core::ptr::copy_nonoverlapping(s, ptr, len) };
    }
    ptr
});

shim_fn!("strndup", heaplayers_strndup(s: *const core::ffi::c_char, n: usize) -> *mut core::ffi::c_char {
    if s.is_null() {
        return core::ptr::null_mut();
    }
    let full = unsafe { core::ffi::CStr::from_ptr(s) }.to_bytes();
    let take = full.len().min(n);
    let ptr = xxmalloc(take + 1) as *mut core::ffi::c_char;
    if !ptr.is_null() {
        unsafe {
            core::ptr::copy_nonoverlapping(s, ptr, take);
            *ptr.add(take) = 0;
        }
    }
    ptr
});

#[cfg_attr(not(feature = "testing"), unsafe(export_name = "xxmalloc_lock"))]
#[cfg_attr(
    feature = "testing",
    unsafe(export_name = "heaplayers_locked_xxmalloc_lock")
)]
pub unsafe extern "C" fn heaplayers_xxmalloc_lock() {
    composite().inner().lock();
}

#[cfg_attr(not(feature = "testing"), unsafe(export_name = "xxmalloc_unlock"))]
#[cfg_attr(
    feature = "testing",
    unsafe(export_name = "heaplayers_locked_xxmalloc_unlock")
)]
pub unsafe extern "C" fn heaplayers_xxmalloc_unlock() {
    composite().inner().unlock();
}

/// Abort path for the throwing `operator new` family: a `no_std` shim can't
/// unwind a C++ exception on allocation failure, so a null result aborts the
/// process instead. Deviation from standard C++ `new` semantics, recorded
/// as a resolved Open Question in DESIGN.md.
#[cold]
fn new_failed() -> ! {
    panic!("heaplayers: out of memory in operator new");
}

macro_rules! operator_new {
    ($mangled:literal, $name:ident, nothrow) => {
        #[unsafe(export_name = $mangled)]
        pub unsafe extern "C" fn $name(size: usize) -> *mut u8 {
            xxmalloc(size)
        }
    };
    ($mangled:literal, $name:ident) => {
        #[unsafe(export_name = $mangled)]
        pub unsafe extern "C" fn $name(size: usize) -> *mut u8 {
            let ptr = xxmalloc(size);
            if ptr.is_null() {
                new_failed();
            }
            ptr
        }
    };
}

macro_rules! operator_new_aligned {
    ($mangled:literal, $name:ident, nothrow) => {
        #[unsafe(export_name = $mangled)]
        pub unsafe extern "C" fn $name(size: usize, alignment: usize) -> *mut u8 {
            xxmemalign(alignment, size)
        }
    };
    ($mangled:literal, $name:ident) => {
        #[unsafe(export_name = $mangled)]
        pub unsafe extern "C" fn $name(size: usize, alignment: usize) -> *mut u8 {
            let ptr = xxmemalign(alignment, size);
            if ptr.is_null() {
                new_failed();
            }
            ptr
        }
    };
}

macro_rules! operator_delete {
    ($mangled:literal, $name:ident ()) => {
        #[unsafe(export_name = $mangled)]
        pub unsafe extern "C" fn $name(ptr: *mut u8) {
            xxfree(ptr)
        }
    };
    ($mangled:literal, $name:ident ( $($arg:ident : $ty:ty),+ )) => {
        #[unsafe(export_name = $mangled)]
        pub unsafe extern "C" fn $name(ptr: *mut u8, $($arg: $ty),+) {
            $(let _ = $arg;)+
            xxfree(ptr)
        }
    };
}

#[cfg(not(feature = "testing"))]
mod operator_new_delete {
    use super::*;

    operator_new!("_Znwm", op_new);
    operator_new!("_Znam", op_new_array);
    operator_new_aligned!("_ZnwmSt11align_val_t", op_new_aligned);
    operator_new_aligned!("_ZnamSt11align_val_t", op_new_array_aligned);
    operator_new!("_ZnwmRKSt9nothrow_t", op_new_nothrow, nothrow);
    operator_new!("_ZnamRKSt9nothrow_t", op_new_array_nothrow, nothrow);
    operator_new_aligned!("_ZnwmSt11align_val_tRKSt9nothrow_t", op_new_aligned_nothrow, nothrow);
    operator_new_aligned!("_ZnamSt11align_val_tRKSt9nothrow_t", op_new_array_aligned_nothrow, nothrow);

    operator_delete!("_ZdlPv", op_delete());
    operator_delete!("_ZdaPv", op_delete_array());
    operator_delete!("_ZdlPvm", op_delete_sized(size: usize));
    operator_delete!("_ZdaPvm", op_delete_array_sized(size: usize));
    operator_delete!("_ZdlPvSt11align_val_t", op_delete_aligned(alignment: usize));
    operator_delete!("_ZdaPvSt11align_val_t", op_delete_array_aligned(alignment: usize));
    operator_delete!("_ZdlPvmSt11align_val_t", op_delete_sized_aligned(size: usize, alignment: usize));
    operator_delete!("_ZdaPvmSt11align_val_t", op_delete_array_sized_aligned(size: usize, alignment: usize));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malloc_free_round_trip() {
        unsafe {
            let ptr = heaplayers_malloc(64);
            assert!(!ptr.is_null());
            heaplayers_free(ptr);
        }
    }

    #[test]
    fn calloc_zeroes() {
        unsafe {
            let ptr = heaplayers_calloc(8, 8);
            assert!(!ptr.is_null());
            let bytes = core::slice::from_raw_parts(ptr, 64);
            assert!(bytes.iter().all(|&b| b == 0));
            heaplayers_free(ptr);
        }
    }

    #[test]
    fn posix_memalign_rejects_bad_alignment() {
        unsafe {
            let mut out: *mut u8 = core::ptr::null_mut();
            let rc = heaplayers_posix_memalign(&mut out as *mut _, 3, 16);
            assert_eq!(rc, 22);
        }
    }

    #[test]
    fn reentrant_call_on_same_thread_uses_bootstrap() {
        SHIM_DEPTH.with(|d| d.set(1));
        let ptr = xxmalloc(32);
        assert!(!ptr.is_null());
        SHIM_DEPTH.with(|d| d.set(0));
    }
}
