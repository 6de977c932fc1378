//! OS source-layer primitives: acquire/release page-granular virtual memory.
//!
//! This is the bottom of the stack (§4.1 "Source layer"). It must never call
//! the public allocation surface — doing so through an installed
//! interposition shim would recurse forever.

#[cfg(windows)]
mod windows;

#[cfg(unix)]
mod unix;

#[cfg(miri)]
mod miri;

/// OS page size used as the source layer's declared alignment. 16 KiB on
/// Apple Silicon, 4 KiB elsewhere (§4.1).
#[cfg(all(target_os = "macos", target_arch = "aarch64"))]
pub const PAGE_SIZE: usize = 16384;
#[cfg(not(all(target_os = "macos", target_arch = "aarch64")))]
pub const PAGE_SIZE: usize = 4096;

/// Round `n` up to the next multiple of [`PAGE_SIZE`].
#[inline]
pub const fn round_up_to_page(n: usize) -> usize {
    (n + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// Acquire a fresh, page-aligned raw region of at least `size` bytes.
///
/// Returns null on failure. The region is private and anonymous; memory is
/// zero-initialized by the OS. `size` is rounded up to the page size by the
/// caller if it isn't already a multiple.
///
/// # Safety
/// Caller must eventually call [`page_dealloc`] with the returned pointer
/// and the same `size` used here.
#[inline]
pub unsafe fn page_alloc(size: usize) -> *mut u8 {
    cfg_if::cfg_if! {
        if #[cfg(miri)] {
            unsafe { miri::page_alloc(size) }
        } else if #[cfg(windows)] {
            unsafe { windows::page_alloc(size) }
        } else if #[cfg(unix)] {
            unsafe { unix::page_alloc(size) }
        } else {
            compile_error!("heaplayers: unsupported platform (need unix or windows source layer)")
        }
    }
}

/// Release virtual memory previously returned by [`page_alloc`].
///
/// # Safety
/// `ptr`/`size` must match a prior, still-live `page_alloc` call.
#[inline]
pub unsafe fn page_dealloc(ptr: *mut u8, size: usize) {
    cfg_if::cfg_if! {
        if #[cfg(miri)] {
            unsafe { miri::page_dealloc(ptr, size) };
        } else if #[cfg(windows)] {
            let _ = size;
            unsafe { windows::page_dealloc(ptr) };
        } else if #[cfg(unix)] {
            unsafe { unix::page_dealloc(ptr, size) };
        }
    }
}

/// Hint that `[ptr, ptr+size)` may be returned to the OS without
/// invalidating the mapping (`advise_release` in §4.1).
///
/// # Safety
/// `ptr`/`size` must refer to a range within a live `page_alloc` allocation.
#[inline]
pub unsafe fn page_advise_release(ptr: *mut u8, size: usize) {
    cfg_if::cfg_if! {
        if #[cfg(miri)] {
            unsafe { miri::page_decommit(ptr, size) };
        } else if #[cfg(windows)] {
            unsafe { windows::page_decommit(ptr, size) };
        } else if #[cfg(unix)] {
            unsafe { unix::page_decommit(ptr, size) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_and_dealloc() {
        unsafe {
            let ptr = page_alloc(PAGE_SIZE);
            assert!(!ptr.is_null());
            assert_eq!((ptr as usize) % PAGE_SIZE, 0);
            for i in 0..PAGE_SIZE {
                *ptr.add(i) = (i & 0xFF) as u8;
            }
            for i in 0..PAGE_SIZE {
                assert_eq!(*ptr.add(i), (i & 0xFF) as u8);
            }
            page_dealloc(ptr, PAGE_SIZE);
        }
    }

    #[test]
    fn test_alloc_multiple_pages() {
        unsafe {
            let size = PAGE_SIZE * 8;
            let ptr = page_alloc(size);
            assert!(!ptr.is_null());
            *ptr = 0xAA;
            *ptr.add(size - 1) = 0xBB;
            assert_eq!(*ptr, 0xAA);
            assert_eq!(*ptr.add(size - 1), 0xBB);
            page_dealloc(ptr, size);
        }
    }

    #[test]
    fn test_round_up_to_page() {
        assert_eq!(round_up_to_page(1), PAGE_SIZE);
        assert_eq!(round_up_to_page(PAGE_SIZE), PAGE_SIZE);
        assert_eq!(round_up_to_page(PAGE_SIZE + 1), PAGE_SIZE * 2);
    }
}
