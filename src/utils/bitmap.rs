//! Bitmap data structure helper, used for counting quorum acknowledgments
//! by server index.

use std::fmt;

use crate::utils::PaxlabError;

use fixedbitset::FixedBitSet;

/// Compact bitmap for server index -> bool mapping.
#[derive(Clone, PartialEq, Eq)]
pub struct Bitmap(FixedBitSet);

impl Bitmap {
    /// Creates a new all-false bitmap of given size.
    pub fn new(size: usize) -> Self {
        if size == 0 {
            panic!("invalid bitmap size {}", size);
        }
        Bitmap(FixedBitSet::with_capacity(size))
    }

    /// Sets bit at index to true. Returns `Ok(true)` if the bit was newly
    /// set, `Ok(false)` if it was already set.
    #[inline]
    pub fn set(&mut self, idx: usize) -> Result<bool, PaxlabError> {
        if idx >= self.0.len() {
            return Err(PaxlabError::msg(format!(
                "index {} out of bound",
                idx
            )));
        }
        Ok(!self.0.put(idx))
    }

    /// Returns the size of the bitmap.
    #[inline]
    pub fn size(&self) -> usize {
        self.0.len()
    }

    /// Returns the number of trues in the bitmap.
    #[inline]
    pub fn count(&self) -> usize {
        self.0.count_ones(..)
    }

    /// True if strictly more than half of the bits are set.
    #[inline]
    pub fn is_majority(&self) -> bool {
        self.count() > self.size() / 2
    }

    /// Iterates over the indices of set bits.
    #[inline]
    fn ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.ones()
    }
}

// Implement `Debug` trait manually for better trace printing.
impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{{}; {:?}}}", self.size(), self.ones().collect::<Vec<_>>())
    }
}

#[cfg(test)]
mod bitmap_tests {
    use super::*;

    #[test]
    #[should_panic]
    fn bitmap_new_panic() {
        Bitmap::new(0);
    }

    #[test]
    fn bitmap_set() {
        let mut map = Bitmap::new(5);
        assert_eq!(map.set(0), Ok(true));
        assert_eq!(map.set(0), Ok(false));
        assert_eq!(map.set(2), Ok(true));
        assert!(map.set(5).is_err());
        assert_eq!(map.ones().collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn bitmap_majority() {
        let mut map = Bitmap::new(4);
        map.set(1).unwrap();
        map.set(3).unwrap();
        assert_eq!(map.count(), 2);
        assert!(!map.is_majority());
        map.set(0).unwrap();
        assert!(map.is_majority());
    }

    #[test]
    fn bitmap_debug() {
        let mut map = Bitmap::new(3);
        map.set(0).unwrap();
        map.set(2).unwrap();
        assert_eq!(format!("{:?}", map), "{3; [0, 2]}");
    }
}
