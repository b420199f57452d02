use std::collections::BTreeSet;

use parameter_server::FeaId;
use rand::{Rng, SeedableRng, rngs::StdRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use super::RowBlock;

/// The specification for generated sparse logistic data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticSpec {
    pub rows: usize,
    pub val_rows: usize,
    /// Size of the feature vocabulary.
    pub features: usize,
    /// Distinct features per row.
    pub nnz_per_row: usize,
    /// Popularity skew, 1 is uniform and larger values favor a few features.
    pub skew: f64,
    pub seed: u64,
}

impl Default for SyntheticSpec {
    fn default() -> Self {
        Self {
            rows: 10_000,
            val_rows: 2_000,
            features: 5_000,
            nnz_per_row: 12,
            skew: 2.,
            seed: 0,
        }
    }
}

/// Seeded generator of binary-feature rows labeled by a hidden sparse
/// logistic model.
#[derive(Debug, Clone)]
pub struct SyntheticData {
    spec: SyntheticSpec,
    truth: Vec<f32>,
}

impl SyntheticData {
    pub fn new(spec: SyntheticSpec) -> Self {
        let mut rng = StdRng::seed_from_u64(spec.seed);
        let truth = (0..spec.features)
            .map(|_| match rng.random_bool(0.5) {
                true => rng.sample::<f32, _>(StandardNormal),
                false => 0.,
            })
            .collect();

        Self { spec, truth }
    }

    /// Maps a vocabulary index onto a spread out 64-bit feature id.
    #[inline]
    pub fn feature_id(index: usize) -> FeaId {
        (index as FeaId + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
    }

    pub fn train(&self) -> RowBlock {
        self.generate(self.spec.rows, 1)
    }

    pub fn validation(&self) -> RowBlock {
        self.generate(self.spec.val_rows, 2)
    }

    fn generate(&self, rows: usize, stream: u64) -> RowBlock {
        let SyntheticSpec {
            features,
            nnz_per_row,
            skew,
            seed,
            ..
        } = self.spec;

        let mut rng = StdRng::seed_from_u64(seed.wrapping_add(stream));
        let mut block = RowBlock::new();
        if features == 0 {
            return block;
        }

        let nnz = nnz_per_row.min(features);
        let mut picked = BTreeSet::new();
        let mut index = Vec::with_capacity(nnz);

        for _ in 0..rows {
            picked.clear();
            for _ in 0..nnz * 8 {
                let u: f64 = rng.random();
                picked.insert(((features as f64 * u.powf(skew)) as usize).min(features - 1));
                if picked.len() == nnz {
                    break;
                }
            }

            let margin: f32 = picked.iter().map(|&f| self.truth[f]).sum();
            let positive = rng.random::<f32>() < 1. / (1. + (-margin).exp());
            let label = if positive { 1. } else { -1. };

            index.clear();
            index.extend(picked.iter().map(|&f| Self::feature_id(f)));
            block.push_row(label, &index, None);
        }

        block
    }
}
