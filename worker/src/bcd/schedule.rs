use std::ops::Range;

use rand::{Rng, seq::SliceRandom};

/// Defines how far blocks may run ahead of each other.
#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    pub tau: usize,
}

impl Schedule {
    pub fn new(tau: usize) -> Self {
        Self { tau }
    }

    /// Returns the position that must be done before `pos` is issued.
    #[inline]
    pub fn gate(&self, pos: usize) -> Option<usize> {
        pos.checked_sub(self.tau + 1)
    }

    /// Returns the positions whose tiles are needed while `pos` is the newest.
    #[inline]
    pub fn window(&self, pos: usize, n: usize) -> Range<usize> {
        pos.min(n)..(pos + self.tau + 1).min(n)
    }

    /// Returns the block order of a pass over `n` blocks.
    pub fn order<R: Rng>(&self, n: usize, shuffle: bool, rng: &mut R) -> Vec<usize> {
        let mut order: Vec<usize> = (0..n).collect();
        if shuffle {
            order.shuffle(rng);
        }

        order
    }
}
