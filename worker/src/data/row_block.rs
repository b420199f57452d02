use std::ops::Range;

use parameter_server::FeaId;

/// A block of rows in compressed sparse row layout.
///
/// Row `i` owns the entries `offsets[i]..offsets[i + 1]` of `index` and
/// `values`. Binary features leave `values` empty, every entry then weighs one.
#[derive(Debug, Clone, PartialEq)]
pub struct RowBlock<I = FeaId> {
    pub offsets: Vec<usize>,
    pub labels: Vec<f32>,
    pub index: Vec<I>,
    pub values: Option<Vec<f32>>,
}

impl<I> Default for RowBlock<I> {
    fn default() -> Self {
        Self {
            offsets: vec![0],
            labels: Vec::new(),
            index: Vec::new(),
            values: None,
        }
    }
}

impl<I: Copy> RowBlock<I> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the amount of rows.
    #[inline]
    pub fn rows(&self) -> usize {
        self.labels.len()
    }

    /// Returns the amount of stored entries.
    #[inline]
    pub fn nnz(&self) -> usize {
        self.index.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Returns the entry range of row `i`.
    #[inline]
    pub fn row(&self, i: usize) -> Range<usize> {
        self.offsets[i]..self.offsets[i + 1]
    }

    /// Returns the value of entry `k`.
    #[inline]
    pub fn value(&self, k: usize) -> f32 {
        self.values.as_ref().map_or(1., |values| values[k])
    }

    /// Appends a row.
    ///
    /// # Arguments
    /// * `label` - The row's label, positive or not.
    /// * `index` - The row's features.
    /// * `values` - The feature values, `None` for binary features.
    pub fn push_row(&mut self, label: f32, index: &[I], values: Option<&[f32]>) {
        if let Some(row) = values {
            let all = self.values.get_or_insert_with(|| vec![1.; self.index.len()]);
            all.extend_from_slice(row);
        } else if let Some(all) = &mut self.values {
            all.extend(std::iter::repeat_n(1., index.len()));
        }

        self.labels.push(label);
        self.index.extend_from_slice(index);
        self.offsets.push(self.index.len());
    }

    /// Copies the rows in `rows` into a new block.
    pub fn slice(&self, rows: Range<usize>) -> Self {
        let entries = self.offsets[rows.start]..self.offsets[rows.end];
        let base = entries.start;

        Self {
            offsets: self.offsets[rows.start..=rows.end].iter().map(|o| o - base).collect(),
            labels: self.labels[rows].to_vec(),
            index: self.index[entries.clone()].to_vec(),
            values: self.values.as_ref().map(|v| v[entries].to_vec()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block() -> RowBlock {
        let mut block = RowBlock::new();
        block.push_row(1., &[3, 7], None);
        block.push_row(-1., &[2], Some(&[0.5]));
        block.push_row(1., &[1, 7, 9], None);
        block
    }

    #[test]
    fn mixed_values_backfill_ones() {
        let block = block();
        assert_eq!(block.rows(), 3);
        assert_eq!(block.nnz(), 6);
        assert_eq!(block.values, Some(vec![1., 1., 0.5, 1., 1., 1.]));
        assert_eq!(block.value(2), 0.5);
        assert_eq!(block.row(2), 3..6);
    }

    #[test]
    fn slice_rebases_offsets() {
        let part = block().slice(1..3);
        assert_eq!(part.offsets, [0, 1, 4]);
        assert_eq!(part.labels, [-1., 1.]);
        assert_eq!(part.index, [2, 1, 7, 9]);
        assert_eq!(part.values, Some(vec![0.5, 1., 1., 1.]));
    }

    #[test]
    fn empty_slice() {
        let part = block().slice(1..1);
        assert!(part.is_empty());
        assert_eq!(part.offsets, [0]);
    }
}
