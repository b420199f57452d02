mod kv_match;

use std::ops::{Add, Div, Mul, Sub};

pub use kv_match::{DEFAULT_GRAIN, find_positions, kv_match, kv_match_ragged, kv_match_ragged_into};

use crate::{Result, StoreErr};

/// A 64-bit feature identifier.
pub type FeaId = u64;

/// A value type the matching routines can combine.
pub trait Element:
    Copy
    + Default
    + Send
    + Sync
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
{
}

impl<T> Element for T where
    T: Copy
        + Default
        + Send
        + Sync
        + Add<Output = T>
        + Sub<Output = T>
        + Mul<Output = T>
        + Div<Output = T>
{
}

/// How a matched source value is combined into its destination slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    Plus,
    Minus,
    Times,
    Divide,
}

impl AssignOp {
    /// Combines `src` into `dst`.
    #[inline]
    pub fn apply<V: Element>(self, dst: &mut V, src: V) {
        *dst = match self {
            Self::Assign => src,
            Self::Plus => *dst + src,
            Self::Minus => *dst - src,
            Self::Times => *dst * src,
            Self::Divide => *dst / src,
        };
    }
}

/// Checks that `ids` is strictly increasing.
///
/// # Returns
/// An `UnsortedIds` error pointing at the first offending position.
pub fn check_sorted(ids: &[FeaId]) -> Result<()> {
    match ids.windows(2).position(|w| w[0] >= w[1]) {
        Some(i) => Err(StoreErr::UnsortedIds { position: i + 1 }),
        None => Ok(()),
    }
}
