use std::{ops::Range, sync::Arc};

use parameter_server::{FeaId, keys};

use super::{Localized, RowBlock};

/// A row partition with its feature ids remapped to a local vocabulary.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    /// The partition's distinct feature ids, strictly increasing.
    pub ids: Arc<[FeaId]>,
    /// The rows, indexing into `ids`.
    pub rows: RowBlock<u32>,
}

impl Partition {
    pub fn new(localized: Localized) -> Self {
        Self {
            ids: localized.ids.into(),
            rows: localized.rows,
        }
    }

    #[inline]
    pub fn num_rows(&self) -> usize {
        self.rows.rows()
    }
}

/// The columns of one partition restricted to one feature block, in
/// compressed sparse column layout.
///
/// Column `c` holds the rows `rows[col_offsets[c]..col_offsets[c + 1]]`,
/// ascending. `colmap[p]` is the column of the block's `p`-th feature, or
/// `-1` if no row of the partition has it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tile {
    pub colmap: Vec<i32>,
    pub col_offsets: Vec<usize>,
    pub rows: Vec<u32>,
    pub values: Option<Vec<f32>>,
}

impl Tile {
    /// Builds the tile of `part` over the sorted feature ids `block`.
    pub fn build(part: &Partition, block: &[FeaId]) -> Self {
        let mut colmap = vec![-1; block.len()];
        let (Some(first), Some(last)) = (block.first(), block.last()) else {
            return Self {
                colmap,
                col_offsets: vec![0],
                ..Default::default()
            };
        };

        let lo = part.ids.partition_point(|id| id < first);
        let hi = part.ids.partition_point(|id| id <= last);
        let positions = keys::find_positions(block, &part.ids[lo..hi], keys::DEFAULT_GRAIN);

        let mut local_to_col = vec![u32::MAX; part.ids.len()];
        let mut cols = 0;
        for (l, pos) in positions.iter().enumerate() {
            if let Some(p) = *pos {
                colmap[p] = cols as i32;
                local_to_col[lo + l] = cols;
                cols += 1;
            }
        }

        let rows = &part.rows;
        let mut col_offsets = vec![0; cols as usize + 1];
        for &l in &rows.index {
            let c = local_to_col[l as usize];
            if c != u32::MAX {
                col_offsets[c as usize + 1] += 1;
            }
        }

        for c in 0..cols as usize {
            col_offsets[c + 1] += col_offsets[c];
        }

        let nnz = col_offsets[cols as usize];
        let mut cursor = col_offsets.clone();
        let mut tile_rows = vec![0; nnz];
        let mut values = rows.values.as_ref().map(|_| vec![0.; nnz]);

        for r in 0..rows.rows() {
            for k in rows.row(r) {
                let c = local_to_col[rows.index[k] as usize];
                if c == u32::MAX {
                    continue;
                }

                let at = &mut cursor[c as usize];
                tile_rows[*at] = r as u32;
                if let Some(values) = &mut values {
                    values[*at] = rows.value(k);
                }
                *at += 1;
            }
        }

        Self {
            colmap,
            col_offsets,
            rows: tile_rows,
            values,
        }
    }

    /// Returns the amount of columns.
    #[inline]
    pub fn cols(&self) -> usize {
        self.col_offsets.len().saturating_sub(1)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cols() == 0
    }

    /// Returns the entry range of column `c`.
    #[inline]
    pub fn col(&self, c: usize) -> Range<usize> {
        self.col_offsets[c]..self.col_offsets[c + 1]
    }

    /// Returns the column of the block's `p`-th feature.
    #[inline]
    pub fn column_of(&self, p: usize) -> Option<usize> {
        usize::try_from(self.colmap[p]).ok()
    }

    #[inline]
    pub fn value(&self, k: usize) -> f32 {
        self.values.as_ref().map_or(1., |values| values[k])
    }
}
