use log::trace;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::{ModelStats, Updater};
use crate::{
    Result, StoreErr,
    initialization::{InitSpec, ParamGen},
    keys::{DEFAULT_GRAIN, FeaId},
    storage::KeyedTable,
    store::{ValueKind, Values},
};

/// Hyper-parameters of the `SgdUpdater`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SgdUpdaterConfig {
    /// FTRL learning rate numerator of the linear weights.
    pub alpha: f32,
    /// FTRL learning rate smoothing term.
    pub beta: f32,
    pub l1: f32,
    pub l2: f32,
    /// Embedding dimension, zero disables embeddings.
    pub v_dim: usize,
    /// Feature count an embedding is allocated at.
    pub v_threshold: f32,
    pub v_alpha: f32,
    pub v_beta: f32,
    pub v_l2: f32,
    pub v_init: InitSpec,
    pub seed: Option<u64>,
    /// Sequential merge threshold of the key lookups.
    pub grain: usize,
}

impl Default for SgdUpdaterConfig {
    fn default() -> Self {
        Self {
            alpha: 0.01,
            beta: 1.,
            l1: 1.,
            l2: 0.,
            v_dim: 0,
            v_threshold: 10.,
            v_alpha: 0.01,
            v_beta: 1.,
            v_l2: 0.01,
            v_init: InitSpec::default(),
            seed: None,
            grain: DEFAULT_GRAIN,
        }
    }
}

#[derive(Debug, Default)]
struct Entry {
    count: f32,
    w: f32,
    z: f32,
    sqrt_n: f32,
    v: Vec<f32>,
    v_sqrt_n: Vec<f32>,
}

struct Model {
    table: KeyedTable<Entry>,
    init: Box<dyn ParamGen>,
}

/// FTRL-proximal linear weights plus AdaGrad embeddings.
///
/// Feature counts create entries, an entry gets its embedding the first time
/// its count reaches `v_threshold`. Pulling `Weight` returns `1 + v_dim`
/// values for features with an embedding, one for the rest and none for
/// unknown ids.
pub struct SgdUpdater {
    config: SgdUpdaterConfig,
    model: RwLock<Model>,
}

impl SgdUpdater {
    /// Creates a new empty `SgdUpdater`.
    ///
    /// # Returns
    /// An error if the embedding initializer can't be built.
    pub fn new(config: SgdUpdaterConfig) -> Result<Self> {
        let init = config.v_init.build(config.seed)?;
        let model = Model {
            table: KeyedTable::new(config.grain),
            init,
        };

        Ok(Self {
            config,
            model: RwLock::new(model),
        })
    }

    fn add_counts(&self, ids: &[FeaId], values: &Values) -> Result<()> {
        if values.lens.is_some() {
            return Err(StoreErr::Unsupported {
                op: "push ragged",
                kind: ValueKind::FeaCount,
            });
        }

        let SgdUpdaterConfig {
            v_dim, v_threshold, ..
        } = self.config;

        let mut model = self.model.write();
        let Model { table, init } = &mut *model;
        let inserted = table.insert(ids);
        let positions = table.positions(ids);
        let entries = table.entries_mut();

        let mut allocated = 0;
        for (pos, &count) in positions.iter().zip(&values.vals) {
            let Some(p) = *pos else { continue };
            let entry = &mut entries[p];
            entry.count += count;

            if v_dim > 0 && entry.v.is_empty() && entry.count >= v_threshold {
                entry.v = init.sample(v_dim);
                entry.v_sqrt_n = vec![0.; v_dim];
                allocated += 1;
            }
        }

        trace!(inserted = inserted, allocated = allocated; "feature counts merged");
        Ok(())
    }

    fn apply_gradients(&self, ids: &[FeaId], values: &Values) -> Result<()> {
        let mut model = self.model.write();
        let positions = model.table.positions(ids);
        let entries = model.table.entries_mut();

        // Reject the whole push before touching any entry.
        for ((id, pos), slot) in ids.iter().zip(&positions).zip(values.slots()) {
            if slot.is_empty() {
                continue;
            }

            let Some(p) = *pos else {
                return Err(StoreErr::UnknownFeature { id: *id });
            };

            let full = 1 + entries[p].v.len();
            if slot.len() != 1 && slot.len() != full {
                return Err(StoreErr::LengthMismatch {
                    id: *id,
                    expected: full,
                    got: slot.len(),
                });
            }
        }

        for (pos, slot) in positions.iter().zip(values.slots()) {
            let (Some(p), Some((&gw, gv))) = (*pos, slot.split_first()) else {
                continue;
            };

            let entry = &mut entries[p];
            self.ftrl(entry, gw);
            if !gv.is_empty() {
                self.adagrad(entry, gv);
            }
        }

        Ok(())
    }

    fn ftrl(&self, entry: &mut Entry, g: f32) {
        let SgdUpdaterConfig {
            alpha, beta, l1, l2, ..
        } = self.config;

        let sqrt_n = (entry.sqrt_n * entry.sqrt_n + g * g).sqrt();
        let sigma = (sqrt_n - entry.sqrt_n) / alpha;
        entry.z += g - sigma * entry.w;
        entry.sqrt_n = sqrt_n;

        entry.w = match entry.z.abs() <= l1 {
            true => 0.,
            false => -(entry.z - entry.z.signum() * l1) / ((beta + sqrt_n) / alpha + l2),
        };
    }

    fn adagrad(&self, entry: &mut Entry, grad: &[f32]) {
        let SgdUpdaterConfig {
            v_alpha,
            v_beta,
            v_l2,
            ..
        } = self.config;

        entry
            .v
            .iter_mut()
            .zip(entry.v_sqrt_n.iter_mut())
            .zip(grad)
            .for_each(|((v, n), &g)| {
                let g = g + v_l2 * *v;
                *n = (*n * *n + g * g).sqrt();
                *v -= v_alpha / (v_beta + *n) * g;
            });
    }
}

impl Updater for SgdUpdater {
    fn get(&self, ids: &[FeaId], kind: ValueKind) -> Result<Values> {
        let model = self.model.read();
        let positions = model.table.positions(ids);
        let entries = model.table.entries();

        match kind {
            ValueKind::FeaCount => {
                let vals = positions
                    .iter()
                    .map(|pos| pos.map_or(0., |p| entries[p].count))
                    .collect();

                Ok(Values::scalar(vals))
            }
            ValueKind::Weight => {
                let mut vals = Vec::with_capacity(ids.len());
                let mut lens = Vec::with_capacity(ids.len());

                for pos in &positions {
                    match pos {
                        Some(p) => {
                            let entry = &entries[*p];
                            vals.push(entry.w);
                            vals.extend_from_slice(&entry.v);
                            lens.push(1 + entry.v.len() as u32);
                        }
                        None => lens.push(0),
                    }
                }

                Ok(Values::ragged(vals, lens))
            }
            ValueKind::Gradient => Err(StoreErr::Unsupported { op: "pull", kind }),
        }
    }

    fn update(&self, ids: &[FeaId], kind: ValueKind, values: &Values) -> Result<()> {
        match kind {
            ValueKind::FeaCount => self.add_counts(ids, values),
            ValueKind::Gradient => self.apply_gradients(ids, values),
            ValueKind::Weight => Err(StoreErr::Unsupported { op: "push", kind }),
        }
    }

    fn stats(&self) -> ModelStats {
        let model = self.model.read();
        let entries = model.table.entries();

        ModelStats {
            features: entries.len(),
            nnz_w: entries.iter().filter(|e| e.w != 0.).count(),
            nnz_v: entries.iter().filter(|e| !e.v.is_empty()).count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn updater(v_dim: usize) -> SgdUpdater {
        let config = SgdUpdaterConfig {
            l1: 0.,
            v_dim,
            v_threshold: 2.,
            v_init: InitSpec::Const { value: 0.5 },
            ..Default::default()
        };

        SgdUpdater::new(config).unwrap()
    }

    #[test]
    fn counts_accumulate_and_create_entries() {
        let updater = updater(0);
        updater.update(&[1, 4], ValueKind::FeaCount, &Values::scalar(vec![1., 2.])).unwrap();
        updater.update(&[4, 9], ValueKind::FeaCount, &Values::scalar(vec![3., 1.])).unwrap();

        let counts = updater.get(&[1, 4, 7, 9], ValueKind::FeaCount).unwrap();
        assert_eq!(counts.vals, [1., 5., 0., 1.]);
        assert_eq!(updater.stats().features, 3);
    }

    #[test]
    fn weights_have_zero_length_for_unknown_ids() {
        let updater = updater(0);
        updater.update(&[2], ValueKind::FeaCount, &Values::scalar(vec![1.])).unwrap();

        let weights = updater.get(&[1, 2, 3], ValueKind::Weight).unwrap();
        assert_eq!(weights.lens, Some(vec![0, 1, 0]));
        assert_eq!(weights.vals, [0.]);
    }

    #[test]
    fn embeddings_appear_at_the_count_threshold() {
        let updater = updater(3);
        let ids = [5, 6];
        updater.update(&ids, ValueKind::FeaCount, &Values::scalar(vec![1., 2.])).unwrap();

        let weights = updater.get(&ids, ValueKind::Weight).unwrap();
        assert_eq!(weights.lens, Some(vec![1, 4]));
        assert_eq!(&weights.vals[1..], [0., 0.5, 0.5, 0.5]);
        assert_eq!(updater.stats().nnz_v, 1);
    }

    #[test]
    fn gradients_move_weights_against_their_sign() {
        let updater = updater(2);
        updater.update(&[1, 2], ValueKind::FeaCount, &Values::scalar(vec![5., 5.])).unwrap();

        let grads = Values::ragged(vec![1., 0.2, 0.2, -1.], vec![3, 1]);
        updater.update(&[1, 2], ValueKind::Gradient, &grads).unwrap();

        let weights = updater.get(&[1, 2], ValueKind::Weight).unwrap();
        assert!(weights.vals[0] < 0.);
        assert!(weights.vals[1] < 0.5 && weights.vals[2] < 0.5);
        assert!(weights.vals[3] > 0.);
        assert_eq!(updater.stats().nnz_w, 2);
    }

    #[test]
    fn l1_keeps_small_gradients_at_zero() {
        let config = SgdUpdaterConfig {
            l1: 10.,
            ..Default::default()
        };
        let updater = SgdUpdater::new(config).unwrap();
        updater.update(&[1], ValueKind::FeaCount, &Values::scalar(vec![1.])).unwrap();
        updater.update(&[1], ValueKind::Gradient, &Values::scalar(vec![0.5])).unwrap();

        assert_eq!(updater.stats().nnz_w, 0);
    }

    #[test]
    fn rejected_pushes_change_nothing() {
        let updater = updater(2);
        updater.update(&[1, 2], ValueKind::FeaCount, &Values::scalar(vec![5., 1.])).unwrap();

        let unknown = Values::scalar(vec![1., 1.]);
        let err = updater.update(&[1, 3], ValueKind::Gradient, &unknown);
        assert!(matches!(err, Err(StoreErr::UnknownFeature { id: 3 })));

        let wrong_len = Values::ragged(vec![1., 1., 1., 1.], vec![1, 3]);
        let err = updater.update(&[1, 2], ValueKind::Gradient, &wrong_len);
        assert!(matches!(
            err,
            Err(StoreErr::LengthMismatch { id: 2, expected: 1, got: 3 })
        ));

        assert_eq!(updater.stats().nnz_w, 0);
    }
}
