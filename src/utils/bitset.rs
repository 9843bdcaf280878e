//! A growable bit vector keyed by arena indices.
//!
//! The IR addresses values, instructions and blocks through dense `usize` handles, so sets of
//! them are most compactly represented as bit vectors. [`BitSet`] is used for liveness sets,
//! visited sets during traversals, and block membership tests.
//!
//! Unlike a fixed-capacity bit vector, [`BitSet`] grows on insertion. Arenas only ever grow while
//! a set is alive (new values are created by the very passes that track them), and queries for
//! indices beyond the current capacity simply answer `false`.
//!
//! # Example
//!
//! ```rust
//! use irscope::utils::BitSet;
//!
//! let mut set = BitSet::new(16);
//! assert!(set.insert(3));
//! assert!(!set.insert(3));
//! set.insert(130);
//!
//! assert!(set.contains(130));
//! assert!(!set.contains(4000));
//! assert_eq!(set.iter().collect::<Vec<_>>(), vec![3, 130]);
//! ```

/// A growable bit vector for sets of small integers.
///
/// Equality compares the set contents, independent of the capacity each side grew to.
#[derive(Clone, Default)]
pub struct BitSet {
    /// The bits, stored as a vector of words.
    words: Vec<u64>,
}

impl BitSet {
    /// Creates a new empty bit set with room for `capacity` elements.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            words: vec![0; capacity.div_ceil(64)],
        }
    }

    /// Returns `true` if the bit set has no bits set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Sets the bit at the given index, growing the set if needed.
    ///
    /// Returns `true` if the bit was not set before.
    pub fn insert(&mut self, index: usize) -> bool {
        let word = index / 64;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        let mask = 1u64 << (index % 64);
        let fresh = self.words[word] & mask == 0;
        self.words[word] |= mask;
        fresh
    }

    /// Clears the bit at the given index.
    ///
    /// Returns `true` if the bit was set before.
    pub fn remove(&mut self, index: usize) -> bool {
        let Some(word) = self.words.get_mut(index / 64) else {
            return false;
        };
        let mask = 1u64 << (index % 64);
        let present = *word & mask != 0;
        *word &= !mask;
        present
    }

    /// Returns `true` if the bit at the given index is set.
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        self.words
            .get(index / 64)
            .is_some_and(|word| word & (1u64 << (index % 64)) != 0)
    }

    /// Returns the number of bits set.
    #[must_use]
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Clears all bits.
    pub fn clear(&mut self) {
        self.words.fill(0);
    }

    /// Computes the union with another bit set (in place).
    ///
    /// Returns `true` if `self` changed.
    pub fn union_with(&mut self, other: &Self) -> bool {
        if other.words.len() > self.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        let mut changed = false;
        for (a, b) in self.words.iter_mut().zip(other.words.iter()) {
            let old = *a;
            *a |= *b;
            changed |= old != *a;
        }
        changed
    }

    /// Removes all bits that are set in `other` from `self`.
    ///
    /// Returns `true` if `self` changed.
    pub fn difference_with(&mut self, other: &Self) -> bool {
        let mut changed = false;
        for (a, b) in self.words.iter_mut().zip(other.words.iter()) {
            let old = *a;
            *a &= !*b;
            changed |= old != *a;
        }
        changed
    }

    /// Returns `true` if every bit set in `other` is also set in `self`.
    #[must_use]
    pub fn is_superset(&self, other: &Self) -> bool {
        other.words.iter().enumerate().all(|(i, &b)| {
            let a = self.words.get(i).copied().unwrap_or(0);
            a & b == b
        })
    }

    /// Returns an iterator over the indices of set bits, in ascending order.
    pub fn iter(&self) -> BitSetIter<'_> {
        BitSetIter {
            words: &self.words,
            word_idx: 0,
            current: self.words.first().copied().unwrap_or(0),
        }
    }
}

impl PartialEq for BitSet {
    fn eq(&self, other: &Self) -> bool {
        let (short, long) = if self.words.len() <= other.words.len() {
            (&self.words, &other.words)
        } else {
            (&other.words, &self.words)
        };
        short.iter().zip(long.iter()).all(|(a, b)| a == b)
            && long[short.len()..].iter().all(|&w| w == 0)
    }
}

impl Eq for BitSet {}

impl std::fmt::Debug for BitSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl FromIterator<usize> for BitSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut set = BitSet::default();
        for index in iter {
            set.insert(index);
        }
        set
    }
}

/// Iterator over the set bits in a `BitSet`.
pub struct BitSetIter<'a> {
    words: &'a [u64],
    word_idx: usize,
    current: u64,
}

impl Iterator for BitSetIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current != 0 {
                let bit = self.current.trailing_zeros() as usize;
                self.current &= self.current - 1;
                return Some(self.word_idx * 64 + bit);
            }
            self.word_idx += 1;
            self.current = *self.words.get(self.word_idx)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitset_basic() {
        let mut bs = BitSet::new(100);
        assert!(bs.is_empty());
        assert_eq!(bs.count(), 0);

        assert!(bs.insert(0));
        assert!(bs.insert(50));
        assert!(bs.insert(99));
        assert!(!bs.insert(99));

        assert!(!bs.is_empty());
        assert_eq!(bs.count(), 3);
        assert!(bs.contains(50));
        assert!(!bs.contains(1));
    }

    #[test]
    fn test_bitset_grows_on_insert() {
        let mut bs = BitSet::new(0);
        assert!(!bs.contains(1000));
        bs.insert(1000);
        assert!(bs.contains(1000));
        assert_eq!(bs.count(), 1);
    }

    #[test]
    fn test_bitset_remove() {
        let mut bs = BitSet::new(100);
        bs.insert(42);
        assert!(bs.remove(42));
        assert!(!bs.contains(42));
        assert!(!bs.remove(42));
        assert!(!bs.remove(5000));
    }

    #[test]
    fn test_bitset_union_and_difference() {
        let mut a: BitSet = [0, 1].into_iter().collect();
        let b: BitSet = [1, 2, 200].into_iter().collect();

        assert!(a.union_with(&b));
        assert!(!a.union_with(&b));
        assert_eq!(a.iter().collect::<Vec<_>>(), vec![0, 1, 2, 200]);

        assert!(a.difference_with(&b));
        assert_eq!(a.iter().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn test_bitset_equality_ignores_capacity() {
        let mut a = BitSet::new(10);
        let mut b = BitSet::new(1000);
        a.insert(7);
        b.insert(7);
        assert_eq!(a, b);
        b.insert(900);
        assert_ne!(a, b);
        assert!(b.is_superset(&a));
        assert!(!a.is_superset(&b));
    }

    #[test]
    fn test_bitset_iter_across_words() {
        let bs: BitSet = [5, 63, 64, 127, 128].into_iter().collect();
        assert_eq!(bs.iter().collect::<Vec<_>>(), vec![5, 63, 64, 127, 128]);
    }
}
