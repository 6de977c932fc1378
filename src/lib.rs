#![cfg_attr(not(any(test, feature = "std")), no_std)]

//! heaplayers: a toolkit for composing general-purpose memory allocators
//! out of small, reusable layers — an arena/bump source, a freelist cache,
//! a segregated-fits dispatcher, object-representation headers, and a
//! choice of concurrency strategies — instead of shipping one fixed
//! allocator design.
//!
//! Each layer implements [`heap::Heap`] and wraps a "super" heap it
//! delegates to for anything it doesn't handle itself; stacking layers
//! composes their behavior, the way the source material's template mixins
//! do. [`composite`] wires a complete, ready-to-use allocator ([`kingsley`]'s
//! power-of-two size classes over [`segregated::StrictSegHeap`]) out of the
//! pieces the other modules provide.
//!
//! # Usage
//!
//! ```ignore
//! use heaplayers::composite::LockedKingsleyHeap;
//! use heaplayers::ansi::AnsiHeap;
//!
//! let heap = LockedKingsleyHeap::default();
//! let ptr = heap.malloc(64);
//! heap.free(ptr);
//! ```
//!
//! With the `ffi` feature, [`shim`] exports the C ABI surface
//! (`malloc`/`free`/`realloc`/...) and the C++ `operator new`/`delete`
//! family, so the crate can be linked in as a process's allocator.

#[cfg(any(test, feature = "std"))]
extern crate std;
extern crate alloc;

pub mod ansi;
pub mod arena;
pub mod bitmap;
pub mod buffered;
pub mod composite;
pub mod freelist;
pub mod header;
pub mod heap;
pub mod kingsley;
pub mod list;
pub mod locked;
pub mod macros;
pub mod per_thread;
pub mod platform;
pub mod segregated;
#[cfg(feature = "ffi")]
pub mod shim;
pub mod source;
pub mod stats;
pub mod sync;
pub mod thread_id;
#[cfg(feature = "std")]
pub mod thread_specific;

/// The alignment every layer's `ALIGNMENT` composes down to in the absence
/// of a stricter requirement from a header or concurrency wrapper — see
/// Open Question #1 in `DESIGN.md`.
pub const NATURAL_ALIGNMENT: usize = 16;

pub use ansi::AnsiHeap;
pub use heap::Heap;

// Panic handler for staticlib builds (no_std has no default panic handler).
// Only active when panic="abort" (i.e., the `fast` profile), not during normal checks.
#[cfg(all(feature = "ffi", not(test), not(feature = "std"), panic = "abort"))]
#[panic_handler]
fn panic(_: &core::panic::PanicInfo) -> ! {
    unsafe extern "C" {
        fn abort() -> !;
    }
    unsafe { abort() }
}
