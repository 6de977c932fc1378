//! Packed per-class bin bitmap used by the segregated-fits dispatcher to
//! find the next nonempty size class without scanning every bin.
//!
//! One bit per class; bits are packed into `usize` words. Grounded on the
//! source material's `SegHeap::binmap`/`idx2block`/`idx2bit`.

const BITS_PER_WORD: usize = usize::BITS as usize;
const SHIFT_PER_WORD: u32 = usize::BITS.trailing_zeros();

/// A bitmap over up to `WORDS * usize::BITS` bins, packed into `usize`
/// words. `WORDS` is a compile-time capacity; `bins` (set at construction)
/// is the number of bins actually in use, so callers with an odd bin count
/// (e.g. Kingsley's 29) don't need `WORDS` to divide evenly.
pub struct BinBitmap<const WORDS: usize> {
    words: [usize; WORDS],
    bins: usize,
}

impl<const WORDS: usize> BinBitmap<WORDS> {
    /// `bins` must be `<= WORDS * usize::BITS`.
    pub const fn new(bins: usize) -> Self {
        assert!(bins <= WORDS * BITS_PER_WORD);
        Self {
            words: [0; WORDS],
            bins,
        }
    }

    #[inline]
    fn word_of(idx: usize) -> usize {
        idx >> SHIFT_PER_WORD
    }

    #[inline]
    fn bit_of(idx: usize) -> usize {
        1usize << (idx & (BITS_PER_WORD - 1))
    }

    #[inline]
    pub fn mark(&mut self, idx: usize) {
        debug_assert!(idx < self.bins);
        self.words[Self::word_of(idx)] |= Self::bit_of(idx);
    }

    #[inline]
    pub fn unmark(&mut self, idx: usize) {
        debug_assert!(idx < self.bins);
        self.words[Self::word_of(idx)] &= !Self::bit_of(idx);
    }

    #[inline]
    pub fn is_set(&self, idx: usize) -> bool {
        debug_assert!(idx < self.bins);
        self.words[Self::word_of(idx)] & Self::bit_of(idx) != 0
    }

    pub fn clear(&mut self) {
        for w in self.words.iter_mut() {
            *w = 0;
        }
    }

    /// Find the lowest set bit at index `>= from`, within `[0, bins)`. None
    /// if no bin at or above `from` is marked (mirrors the upward sweep in
    /// the source material's `malloc`).
    pub fn next_set_from(&self, from: usize) -> Option<usize> {
        if from >= self.bins {
            return None;
        }
        let mut block = Self::word_of(from);
        let mut map = self.words[block] & !(Self::bit_of(from).wrapping_sub(1));
        loop {
            if map == 0 {
                block += 1;
                if block >= WORDS {
                    return None;
                }
                map = self.words[block];
                continue;
            }
            let bit = map.trailing_zeros() as usize;
            let idx = (block << SHIFT_PER_WORD) + bit;
            if idx >= self.bins {
                return None;
            }
            return Some(idx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_and_find() {
        let mut bm: BinBitmap<1> = BinBitmap::new(29);
        assert_eq!(bm.next_set_from(0), None);
        bm.mark(5);
        bm.mark(20);
        assert_eq!(bm.next_set_from(0), Some(5));
        assert_eq!(bm.next_set_from(5), Some(5));
        assert_eq!(bm.next_set_from(6), Some(20));
        assert_eq!(bm.next_set_from(21), None);
        bm.unmark(5);
        assert_eq!(bm.next_set_from(0), Some(20));
    }

    #[test]
    fn spans_multiple_words() {
        let mut bm: BinBitmap<4> = BinBitmap::new(200);
        bm.mark(0);
        bm.mark(63);
        bm.mark(64);
        bm.mark(199);
        assert_eq!(bm.next_set_from(1), Some(63));
        assert_eq!(bm.next_set_from(64), Some(64));
        assert_eq!(bm.next_set_from(65), Some(199));
        assert!(bm.is_set(199));
        bm.clear();
        assert_eq!(bm.next_set_from(0), None);
    }
}
