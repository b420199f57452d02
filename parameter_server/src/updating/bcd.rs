use log::{debug, trace};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::{ModelStats, Updater};
use crate::{
    Result, StoreErr,
    initialization::{InitSpec, ParamGen},
    keys::{self, AssignOp, DEFAULT_GRAIN, FeaId},
    store::{ValueKind, Values},
};

/// Hyper-parameters of the `BcdUpdater`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BcdUpdaterConfig {
    pub l1: f32,
    pub l2: f32,
    /// Embedding dimension, zero disables embeddings.
    pub v_dim: usize,
    /// Feature count an embedding is allocated at.
    pub v_threshold: f32,
    pub v_l2: f32,
    /// Step scale of the embedding updates.
    pub v_lr: f32,
    /// Initial step bound of every slot.
    pub delta_init: f32,
    /// Upper bound of the step bound.
    pub delta_max: f32,
    /// Slack added to the step bound after every update.
    pub delta_c: f32,
    pub v_init: InitSpec,
    pub seed: Option<u64>,
    /// Sequential merge threshold of the key lookups.
    pub grain: usize,
}

impl Default for BcdUpdaterConfig {
    fn default() -> Self {
        Self {
            l1: 1.,
            l2: 0.01,
            v_dim: 0,
            v_threshold: 10.,
            v_l2: 0.01,
            v_lr: 0.9,
            delta_init: 1.,
            delta_max: 5.,
            delta_c: 0.1,
            v_init: InitSpec::default(),
            seed: None,
            grain: DEFAULT_GRAIN,
        }
    }
}

/// The model in ragged layout: `lens[p]` weights per key starting at
/// `offsets[p]`, the linear weight first.
struct Model {
    keys: Vec<FeaId>,
    counts: Vec<f32>,
    lens: Vec<u32>,
    offsets: Vec<usize>,
    weights: Vec<f32>,
    deltas: Vec<f32>,
    regions: Vec<f32>,
    init: Box<dyn ParamGen>,
}

impl Model {
    fn slot(&self, p: usize) -> std::ops::Range<usize> {
        self.offsets[p]..self.offsets[p] + self.lens[p] as usize
    }

    fn reindex(&mut self) {
        self.offsets.clear();
        self.offsets.reserve(self.lens.len());

        let mut offset = 0;
        for &len in &self.lens {
            self.offsets.push(offset);
            offset += len as usize;
        }
    }

    /// Adds a bare weight entry for every unknown id.
    fn insert(&mut self, ids: &[FeaId], grain: usize, delta_init: f32) -> usize {
        let missing = keys::find_positions(&self.keys, ids, grain)
            .iter()
            .filter(|p| p.is_none())
            .count();

        if missing == 0 {
            return 0;
        }

        let n = self.keys.len() + missing;
        let mut keys = Vec::with_capacity(n);
        let mut counts = Vec::with_capacity(n);
        let mut lens = Vec::with_capacity(n);
        let mut weights = Vec::with_capacity(self.weights.len() + missing);
        let mut deltas = Vec::with_capacity(self.deltas.len() + missing);
        let mut regions = Vec::with_capacity(deltas.capacity());

        let (mut i, mut j) = (0, 0);
        while i < self.keys.len() || j < ids.len() {
            if j == ids.len() || (i < self.keys.len() && self.keys[i] <= ids[j]) {
                if j < ids.len() && self.keys[i] == ids[j] {
                    j += 1;
                }

                let slot = self.slot(i);
                keys.push(self.keys[i]);
                counts.push(self.counts[i]);
                lens.push(self.lens[i]);
                weights.extend_from_slice(&self.weights[slot.clone()]);
                deltas.extend_from_slice(&self.deltas[slot.clone()]);
                regions.extend_from_slice(&self.regions[slot]);
                i += 1;
            } else {
                keys.push(ids[j]);
                counts.push(0.);
                lens.push(1);
                weights.push(0.);
                deltas.push(0.);
                regions.push(delta_init);
                j += 1;
            }
        }

        self.keys = keys;
        self.counts = counts;
        self.lens = lens;
        self.weights = weights;
        self.deltas = deltas;
        self.regions = regions;
        self.reindex();
        missing
    }

    /// Appends a freshly initialized embedding to every key in `grown`.
    fn grow(&mut self, grown: &[usize], v_dim: usize, delta_init: f32) {
        let mut weights = Vec::with_capacity(self.weights.len() + grown.len() * v_dim);
        let mut deltas = Vec::with_capacity(weights.capacity());
        let mut regions = Vec::with_capacity(weights.capacity());
        let mut next = grown.iter().peekable();

        for p in 0..self.keys.len() {
            let slot = self.slot(p);
            weights.extend_from_slice(&self.weights[slot.clone()]);
            deltas.extend_from_slice(&self.deltas[slot.clone()]);
            regions.extend_from_slice(&self.regions[slot]);

            if next.next_if_eq(&&p).is_some() {
                let v = self.init.sample(v_dim);
                deltas.extend_from_slice(&v);
                regions.extend(std::iter::repeat_n(delta_init, v_dim));
                weights.extend(v);
                self.lens[p] += v_dim as u32;
            }
        }

        self.weights = weights;
        self.deltas = deltas;
        self.regions = regions;
        self.reindex();
    }
}

/// Diagonal Newton updates on pushed `[g, h]` pairs.
///
/// Every weight slot receives two values per push: the gradient and the
/// diagonal curvature bound. Linear weights take an L1/L2 regularized Newton
/// step, embeddings a scaled L2 regularized one. Every step is clipped to
/// the slot's trust region, which then becomes `min(delta_max, 2 |d| + delta_c)`.
/// Pulling `Weight` returns the last applied change of every slot so learners
/// can patch their predictions incrementally.
pub struct BcdUpdater {
    config: BcdUpdaterConfig,
    model: RwLock<Model>,
}

impl BcdUpdater {
    /// Creates a new empty `BcdUpdater`.
    ///
    /// # Returns
    /// An error if the embedding initializer can't be built.
    pub fn new(config: BcdUpdaterConfig) -> Result<Self> {
        let model = Model {
            keys: Vec::new(),
            counts: Vec::new(),
            lens: Vec::new(),
            offsets: Vec::new(),
            weights: Vec::new(),
            deltas: Vec::new(),
            regions: Vec::new(),
            init: config.v_init.build(config.seed)?,
        };

        Ok(Self {
            config,
            model: RwLock::new(model),
        })
    }

    /// Reads the current weights, not the deltas, of `ids`.
    pub fn weights(&self, ids: &[FeaId]) -> Result<Values> {
        let model = self.model.read();
        let (vals, lens, _) = keys::kv_match_ragged(
            &model.keys,
            &model.weights,
            &model.lens,
            ids,
            AssignOp::Assign,
            self.config.grain,
        )?;

        Ok(Values::ragged(vals, lens))
    }

    fn add_counts(&self, ids: &[FeaId], values: &Values) -> Result<()> {
        if values.lens.is_some() {
            return Err(StoreErr::Unsupported {
                op: "push ragged",
                kind: ValueKind::FeaCount,
            });
        }

        let grain = self.config.grain;
        let mut model = self.model.write();
        let inserted = model.insert(ids, grain, self.config.delta_init);

        let Model {
            keys: space,
            counts,
            ..
        } = &mut *model;
        keys::kv_match(ids, &values.vals, space, counts, 1, AssignOp::Plus, grain)?;

        trace!(inserted = inserted; "feature counts merged");
        Ok(())
    }

    fn apply_gradients(&self, ids: &[FeaId], values: &Values) -> Result<()> {
        let Some(lens) = values.lens.as_deref() else {
            return Err(StoreErr::Unsupported {
                op: "push scalar",
                kind: ValueKind::Gradient,
            });
        };

        let BcdUpdaterConfig {
            l1,
            l2,
            v_dim,
            v_threshold,
            v_l2,
            v_lr,
            delta_init,
            delta_max,
            delta_c,
            grain,
            ..
        } = self.config;

        let mut model = self.model.write();
        let positions = keys::find_positions(&model.keys, ids, grain);

        for ((id, pos), &len) in ids.iter().zip(&positions).zip(lens) {
            if len == 0 {
                continue;
            }

            let Some(p) = *pos else {
                return Err(StoreErr::UnknownFeature { id: *id });
            };

            let expected = 2 * model.lens[p] as usize;
            if len as usize != expected {
                return Err(StoreErr::LengthMismatch {
                    id: *id,
                    expected,
                    got: len as usize,
                });
            }
        }

        let mut grown = Vec::new();
        for (pos, slot) in positions.iter().zip(values.slots()) {
            let Some(p) = *pos else { continue };
            if slot.is_empty() {
                continue;
            }

            let range = model.slot(p);
            let Model {
                weights,
                deltas,
                regions,
                counts,
                ..
            } = &mut *model;
            let weights = &mut weights[range.clone()];
            let deltas = &mut deltas[range.clone()];
            let regions = &mut regions[range];

            for (k, gh) in slot.chunks_exact(2).enumerate() {
                let (g, h) = (gh[0], gh[1]);
                let w = weights[k];
                let d = match k {
                    0 => newton_l1(w, g + l2 * w, h + l2, l1),
                    _ if h + v_l2 > 0. => -v_lr * (g + v_l2 * w) / (h + v_l2),
                    _ => 0.,
                };

                // steps stay inside the region the curvature was bounded over
                let d = d.max(-regions[k]).min(regions[k]);
                regions[k] = (d.abs() * 2. + delta_c).min(delta_max);
                weights[k] += d;
                deltas[k] = d;
            }

            if v_dim > 0 && weights.len() == 1 && counts[p] >= v_threshold && weights[0] != 0. {
                grown.push(p);
            }
        }

        if !grown.is_empty() {
            debug!(grown = grown.len(); "allocating embeddings");
            model.grow(&grown, v_dim, delta_init);
        }

        Ok(())
    }
}

/// The minimizer of `g * d + h * d^2 / 2 + l1 * |w + d|`.
fn newton_l1(w: f32, g: f32, h: f32, l1: f32) -> f32 {
    if h <= 0. {
        return 0.;
    }

    if g + l1 <= h * w {
        -(g + l1) / h
    } else if g - l1 >= h * w {
        -(g - l1) / h
    } else {
        -w
    }
}

impl Updater for BcdUpdater {
    fn get(&self, ids: &[FeaId], kind: ValueKind) -> Result<Values> {
        let model = self.model.read();
        let grain = self.config.grain;

        match kind {
            ValueKind::FeaCount => {
                let mut counts = vec![0.; ids.len()];
                let (space, known) = (&model.keys, &model.counts);
                keys::kv_match(space, known, ids, &mut counts, 1, AssignOp::Assign, grain)?;
                Ok(Values::scalar(counts))
            }
            ValueKind::Weight => {
                let (vals, lens, _) = keys::kv_match_ragged(
                    &model.keys,
                    &model.deltas,
                    &model.lens,
                    ids,
                    AssignOp::Assign,
                    grain,
                )?;

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

        ModelStats {
            features: model.keys.len(),
            nnz_w: model.offsets.iter().filter(|&&o| model.weights[o] != 0.).count(),
            nnz_v: model.lens.iter().filter(|&&l| l > 1).count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn updater(v_dim: usize) -> BcdUpdater {
        let config = BcdUpdaterConfig {
            l1: 0.,
            l2: 0.,
            delta_init: f32::INFINITY,
            delta_max: f32::INFINITY,
            v_dim,
            v_threshold: 2.,
            v_init: InitSpec::Const { value: 0.25 },
            ..Default::default()
        };

        BcdUpdater::new(config).unwrap()
    }

    #[test]
    fn newton_step_soft_thresholds() {
        assert_eq!(newton_l1(0., 1., 2., 0.), -0.5);
        assert_eq!(newton_l1(0., 0.5, 1., 1.), 0.);
        assert_eq!(newton_l1(1., 0., 1., 0.5), -0.5);
        assert_eq!(newton_l1(0.1, 0., 1., 1.), -0.1);
        assert_eq!(newton_l1(1., 1., 0., 0.), 0.);
    }

    #[test]
    fn pull_returns_the_last_delta() {
        let updater = updater(0);
        updater.update(&[1, 2], ValueKind::FeaCount, &Values::scalar(vec![1., 1.])).unwrap();

        let grads = Values::ragged(vec![2., 1., -1., 4.], vec![2, 2]);
        updater.update(&[1, 2], ValueKind::Gradient, &grads).unwrap();
        let deltas = updater.get(&[1, 2], ValueKind::Weight).unwrap();
        assert_eq!(deltas.vals, [-2., 0.25]);

        updater.update(&[1, 2], ValueKind::Gradient, &grads).unwrap();
        assert_eq!(updater.weights(&[1, 2]).unwrap().vals, [-4., 0.5]);
    }

    #[test]
    fn embeddings_grow_for_frequent_nonzero_features() {
        let updater = updater(2);
        updater.update(&[1, 2, 3], ValueKind::FeaCount, &Values::scalar(vec![3., 1., 3.])).unwrap();

        // feature 3 keeps a zero weight, feature 2 is too rare
        let grads = Values::ragged(vec![1., 1., 1., 1., 0., 1.], vec![2, 2, 2]);
        updater.update(&[1, 2, 3], ValueKind::Gradient, &grads).unwrap();

        let deltas = updater.get(&[1, 2, 3], ValueKind::Weight).unwrap();
        assert_eq!(deltas.lens, Some(vec![3, 1, 1]));
        assert_eq!(deltas.vals, [-1., 0.25, 0.25, -1., 0.]);

        let stats = updater.stats();
        assert_eq!(stats, ModelStats { features: 3, nnz_w: 2, nnz_v: 1 });

        let grads = Values::ragged(vec![0., 1., 1., 1., 1., 1.], vec![6]);
        updater.update(&[1], ValueKind::Gradient, &grads).unwrap();
        let weights = updater.weights(&[1]).unwrap();
        assert_eq!(weights.vals[0], -1.);
        assert!(weights.vals[1] < 0.25);
    }

    #[test]
    fn unknown_or_misshaped_gradients_are_rejected() {
        let updater = updater(0);
        updater.update(&[1], ValueKind::FeaCount, &Values::scalar(vec![1.])).unwrap();

        let grads = Values::ragged(vec![1., 1., 1., 1.], vec![2, 2]);
        let err = updater.update(&[1, 5], ValueKind::Gradient, &grads);
        assert!(matches!(err, Err(StoreErr::UnknownFeature { id: 5 })));

        let grads = Values::ragged(vec![1., 1., 1.], vec![3]);
        let err = updater.update(&[1], ValueKind::Gradient, &grads);
        assert!(matches!(err, Err(StoreErr::LengthMismatch { id: 1, expected: 2, got: 3 })));

        let err = updater.update(&[1], ValueKind::Gradient, &Values::scalar(vec![1.]));
        assert!(matches!(err, Err(StoreErr::Unsupported { .. })));
        assert_eq!(updater.weights(&[1]).unwrap().vals, [0.]);
    }

    #[test]
    fn steps_are_clipped_to_the_trust_region() {
        let config = BcdUpdaterConfig {
            l1: 0.,
            l2: 0.,
            delta_init: 0.5,
            delta_max: 2.,
            delta_c: 0.1,
            ..Default::default()
        };
        let updater = BcdUpdater::new(config).unwrap();
        updater.update(&[1], ValueKind::FeaCount, &Values::scalar(vec![1.])).unwrap();

        let grads = Values::ragged(vec![-4., 1.], vec![2]);
        updater.update(&[1], ValueKind::Gradient, &grads).unwrap();
        assert_eq!(updater.get(&[1], ValueKind::Weight).unwrap().vals, [0.5]);

        // the region grew to 2 * 0.5 + 0.1
        updater.update(&[1], ValueKind::Gradient, &grads).unwrap();
        assert_eq!(updater.get(&[1], ValueKind::Weight).unwrap().vals, [1.1]);

        // and is capped at delta_max
        updater.update(&[1], ValueKind::Gradient, &grads).unwrap();
        updater.update(&[1], ValueKind::Gradient, &grads).unwrap();
        assert_eq!(updater.get(&[1], ValueKind::Weight).unwrap().vals, [2.]);
    }

    #[test]
    fn zero_length_slots_are_skipped() {
        let updater = updater(0);
        updater.update(&[1, 2], ValueKind::FeaCount, &Values::scalar(vec![1., 1.])).unwrap();

        let grads = Values::ragged(vec![1., 1.], vec![0, 2]);
        updater.update(&[1, 2], ValueKind::Gradient, &grads).unwrap();
        assert_eq!(updater.weights(&[1, 2]).unwrap().vals, [0., -1.]);
    }
}
