use parameter_server::FeaId;
use rayon::prelude::*;

use super::RowBlock;

/// A row block whose feature ids were remapped to a dense local vocabulary.
#[derive(Debug, Clone, PartialEq)]
pub struct Localized {
    /// The distinct feature ids of the block, strictly increasing.
    pub ids: Vec<FeaId>,
    /// How many entries of the block refer to each id.
    pub counts: Vec<f32>,
    /// The block with every id replaced by its position in `ids`.
    pub rows: RowBlock<u32>,
}

/// Remaps the feature ids of `block` to positions in its sorted vocabulary.
pub fn localize(block: RowBlock) -> Localized {
    let RowBlock {
        offsets,
        labels,
        index,
        values,
    } = block;

    let mut pairs: Vec<(FeaId, usize)> = index
        .into_par_iter()
        .enumerate()
        .map(|(k, id)| (id, k))
        .collect();
    pairs.par_sort_unstable();

    let mut ids = Vec::new();
    let mut counts: Vec<f32> = Vec::new();
    let mut local = vec![0; pairs.len()];

    for &(id, k) in &pairs {
        if ids.last() != Some(&id) {
            ids.push(id);
            counts.push(0.);
        }

        let last = ids.len() - 1;
        counts[last] += 1.;
        local[k] = last as u32;
    }

    Localized {
        ids,
        counts,
        rows: RowBlock {
            offsets,
            labels,
            index: local,
            values,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_sorted_and_counted() {
        let mut block = RowBlock::new();
        block.push_row(1., &[90, 7], None);
        block.push_row(-1., &[7, 12, 90], None);
        block.push_row(1., &[12], Some(&[2.]));

        let Localized { ids, counts, rows } = localize(block.clone());
        assert_eq!(ids, [7, 12, 90]);
        assert_eq!(counts, [2., 2., 2.]);
        assert_eq!(rows.index, [2, 0, 0, 1, 2, 1]);
        assert_eq!(rows.offsets, block.offsets);
        assert_eq!(rows.values, block.values);

        let restored: Vec<_> = rows.index.iter().map(|&l| ids[l as usize]).collect();
        assert_eq!(restored, block.index);
    }

    #[test]
    fn empty_block() {
        let localized = localize(RowBlock::new());
        assert!(localized.ids.is_empty());
        assert!(localized.rows.is_empty());
    }
}
