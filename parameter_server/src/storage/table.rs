use std::mem;

use crate::keys::{self, FeaId};

/// A growable table of entries ordered by their feature id.
///
/// The key space is kept sorted so every lookup is a merge-join against the
/// caller's sorted id list.
#[derive(Debug, Default)]
pub struct KeyedTable<E> {
    keys: Vec<FeaId>,
    entries: Vec<E>,
    grain: usize,
}

impl<E: Default> KeyedTable<E> {
    /// Creates a new empty `KeyedTable`.
    ///
    /// # Arguments
    /// * `grain` - The sequential merge threshold used on lookups.
    pub fn new(grain: usize) -> Self {
        Self {
            keys: Vec::new(),
            entries: Vec::new(),
            grain,
        }
    }

    /// Returns the amount of entries in the table.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Returns the sorted key space.
    pub fn keys(&self) -> &[FeaId] {
        &self.keys
    }

    pub fn entries(&self) -> &[E] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut [E] {
        &mut self.entries
    }

    /// Adds a default entry for every id in `ids` the table doesn't hold yet.
    ///
    /// # Arguments
    /// * `ids` - A strictly increasing id list.
    ///
    /// # Returns
    /// The amount of inserted entries.
    pub fn insert(&mut self, ids: &[FeaId]) -> usize {
        let missing = self
            .positions(ids)
            .iter()
            .filter(|pos| pos.is_none())
            .count();

        if missing == 0 {
            return 0;
        }

        let old_keys = mem::take(&mut self.keys);
        let mut old_entries = mem::take(&mut self.entries).into_iter();
        self.keys.reserve(old_keys.len() + missing);
        self.entries.reserve(old_keys.len() + missing);

        let (mut i, mut j) = (0, 0);
        while i < old_keys.len() || j < ids.len() {
            let take_old = j == ids.len() || (i < old_keys.len() && old_keys[i] <= ids[j]);
            if take_old {
                if j < ids.len() && old_keys[i] == ids[j] {
                    j += 1;
                }
                self.keys.push(old_keys[i]);
                self.entries.push(old_entries.next().unwrap_or_default());
                i += 1;
            } else {
                self.keys.push(ids[j]);
                self.entries.push(E::default());
                j += 1;
            }
        }

        missing
    }

    /// Finds the position of every id in the table.
    pub fn positions(&self, ids: &[FeaId]) -> Vec<Option<usize>> {
        keys::find_positions(&self.keys, ids, self.grain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_merges_new_ids_in_order() {
        let mut table = KeyedTable::<u32>::new(2);
        assert_eq!(table.insert(&[3, 7, 9]), 3);

        table.entries_mut().iter_mut().for_each(|e| *e = 1);
        assert_eq!(table.insert(&[1, 7, 8, 12]), 3);

        assert_eq!(table.keys(), [1, 3, 7, 8, 9, 12]);
        assert_eq!(table.entries(), [0, 1, 1, 0, 1, 0]);
    }

    #[test]
    fn insert_of_known_ids_is_a_no_op() {
        let mut table = KeyedTable::<u32>::new(2);
        table.insert(&[2, 4]);
        assert_eq!(table.insert(&[2, 4]), 0);
        assert_eq!(table.insert(&[]), 0);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn positions_miss_absent_ids() {
        let mut table = KeyedTable::<u32>::new(1);
        table.insert(&[10, 20, 30]);
        assert_eq!(table.positions(&[5, 20, 30, 31]), [None, Some(1), Some(2), None]);
    }
}
