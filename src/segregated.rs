//! Segregated-fits layer: dispatches a request to one of `N` homogeneous
//! subheaps ("bins") by size class, falling back to a big-object heap for
//! anything too large.
//!
//! Grounded on the source material's `SegHeap` (lenient, upward sweep with
//! demotion) and `StrictSegHeap` (direct-to-big-heap, no splitting). Per
//! Design Note resolution (§9), only `StrictSegHeap` backs the shipped
//! Kingsley composite; `SegHeap` is kept as a usable, independently tested
//! building block.

use crate::bitmap::BinBitmap;
use crate::heap::Heap;
use core::array;

/// Maps sizes to classes and back. A ZST implementing this (e.g.
/// [`crate::kingsley::Kingsley`]) plays the role the source material gives
/// a pair of free function template parameters.
pub trait ClassMap {
    fn size_to_class(size: usize) -> usize;
    fn class_to_size(class: usize) -> usize;
}

/// A segregated-fits heap with lenient fallback: on a bin miss, sweeps
/// upward through the bitmap for the next nonempty bin before giving up to
/// the big heap, then demotes the newly marked class on free so a block
/// never sits in a bin larger than it needs. Grounded on `SegHeap`.
pub struct SegHeap<const N: usize, const WORDS: usize, C: ClassMap, L: Heap + Default, B: Heap> {
    little: [L; N],
    big: B,
    bitmap: core::cell::UnsafeCell<BinBitmap<WORDS>>,
    max_object_size: usize,
    _marker: core::marker::PhantomData<C>,
}

impl<const N: usize, const WORDS: usize, C: ClassMap, L: Heap + Default, B: Heap>
    SegHeap<N, WORDS, C, L, B>
{
    pub fn new(big: B) -> Self {
        Self {
            little: array::from_fn(|_| L::default()),
            big,
            bitmap: core::cell::UnsafeCell::new(BinBitmap::new(N)),
            max_object_size: C::class_to_size(N - 1),
            _marker: core::marker::PhantomData,
        }
    }

    fn bitmap(&self) -> &mut BinBitmap<WORDS> {
        unsafe { &mut *self.bitmap.get() }
    }
}

impl<const N: usize, const WORDS: usize, C: ClassMap, L: Heap + Default, B: Heap> Heap
    for SegHeap<N, WORDS, C, L, B>
{
    const ALIGNMENT: usize = crate::heap::gcd(L::ALIGNMENT, B::ALIGNMENT);

    unsafe fn malloc(&self, size: usize) -> *mut u8 {
        if size > self.max_object_size {
            return unsafe { self.big.malloc(size) };
        }
        let mut class = C::size_to_class(size);
        let bitmap = self.bitmap();
        loop {
            match bitmap.next_set_from(class) {
                Some(found) => {
                    let ptr = unsafe { self.little[found].malloc(size) };
                    if !ptr.is_null() {
                        return ptr;
                    }
                    bitmap.unmark(found);
                    class = found + 1;
                }
                None => return unsafe { self.big.malloc(size) },
            }
        }
    }

    unsafe fn free(&self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        let object_size = unsafe { self.big.get_size(ptr) };
        if object_size == 0 || object_size > self.max_object_size {
            unsafe { self.big.free(ptr) };
            return;
        }
        let mut class = C::size_to_class(object_size);
        while class > 0 && C::class_to_size(class) > object_size {
            class -= 1;
        }
        unsafe { self.little[class].free(ptr) };
        self.bitmap().mark(class);
        crate::stat_inc!(bin_demotions);
    }

    unsafe fn get_size(&self, ptr: *mut u8) -> usize {
        unsafe { self.big.get_size(ptr) }
    }
}

unsafe impl<const N: usize, const WORDS: usize, C: ClassMap, L: Heap + Default + Send, B: Heap + Send>
    Send for SegHeap<N, WORDS, C, L, B>
{
}

impl<const N: usize, const WORDS: usize, C: ClassMap, L: Heap + Default, B: Heap + Default> Default
    for SegHeap<N, WORDS, C, L, B>
{
    fn default() -> Self {
        Self::new(B::default())
    }
}

/// Like [`SegHeap`] but never splits or sweeps: a bin miss goes straight to
/// the big heap. Grounded on `StrictSegHeap`; this is what backs the
/// shipped Kingsley composite.
pub struct StrictSegHeap<const N: usize, C: ClassMap, L: Heap + Default, B: Heap> {
    little: [L; N],
    big: B,
    max_object_size: usize,
    _marker: core::marker::PhantomData<C>,
}

impl<const N: usize, C: ClassMap, L: Heap + Default, B: Heap> StrictSegHeap<N, C, L, B> {
    pub fn new(big: B) -> Self {
        Self {
            little: array::from_fn(|_| L::default()),
            big,
            max_object_size: C::class_to_size(N - 1),
            _marker: core::marker::PhantomData,
        }
    }
}

impl<const N: usize, C: ClassMap, L: Heap + Default, B: Heap> Heap for StrictSegHeap<N, C, L, B> {
    const ALIGNMENT: usize = crate::heap::gcd(L::ALIGNMENT, B::ALIGNMENT);

    unsafe fn malloc(&self, size: usize) -> *mut u8 {
        let class = C::size_to_class(size);
        let real_size = C::class_to_size(class);
        debug_assert!(real_size >= size);

        let ptr = if real_size <= self.max_object_size {
            unsafe { self.little[class].malloc(real_size) }
        } else {
            core::ptr::null_mut()
        };
        if !ptr.is_null() {
            crate::stat_inc!(small_bin_hits);
            return ptr;
        }
        crate::stat_inc!(big_heap_allocs);
        unsafe { self.big.malloc(real_size) }
    }

    unsafe fn free(&self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        let object_size = unsafe { self.big.get_size(ptr) };
        if object_size == 0 || object_size > self.max_object_size {
            unsafe { self.big.free(ptr) };
            return;
        }
        let mut class = C::size_to_class(object_size);
        while class > 0 && C::class_to_size(class) > object_size {
            class -= 1;
        }
        unsafe { self.little[class].free(ptr) };
    }

    unsafe fn get_size(&self, ptr: *mut u8) -> usize {
        unsafe { self.big.get_size(ptr) }
    }
}

unsafe impl<const N: usize, C: ClassMap, L: Heap + Default + Send, B: Heap + Send> Send
    for StrictSegHeap<N, C, L, B>
{
}

impl<const N: usize, C: ClassMap, L: Heap + Default, B: Heap + Default> Default
    for StrictSegHeap<N, C, L, B>
{
    fn default() -> Self {
        Self::new(B::default())
    }
}
