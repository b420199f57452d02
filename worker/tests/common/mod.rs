#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::atomic::{AtomicUsize, Ordering},
};

use parameter_server::{FeaId, ModelStats, Result, StoreErr, Updater, ValueKind, Values};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng, rngs::StdRng, seq::IndexedRandom};
use worker::data::RowBlock;

/// Routes the learners' logs to the test output, `RUST_LOG` picks the level.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Keeps feature counts, accepts gradients and never moves a weight.
#[derive(Default)]
pub struct IdentityUpdater {
    counts: Mutex<HashMap<FeaId, f32>>,
    gradients: AtomicUsize,
}

impl IdentityUpdater {
    pub fn gradient_pushes(&self) -> usize {
        self.gradients.load(Ordering::SeqCst)
    }
}

impl Updater for IdentityUpdater {
    fn get(&self, ids: &[FeaId], kind: ValueKind) -> Result<Values> {
        match kind {
            ValueKind::FeaCount => {
                let counts = self.counts.lock();
                let vals = ids.iter().map(|id| counts.get(id).copied().unwrap_or(0.)).collect();
                Ok(Values::scalar(vals))
            }
            ValueKind::Weight => Ok(Values::scalar(vec![0.; ids.len()])),
            ValueKind::Gradient => Err(StoreErr::Unsupported { op: "pull", kind }),
        }
    }

    fn update(&self, ids: &[FeaId], kind: ValueKind, values: &Values) -> Result<()> {
        match kind {
            ValueKind::FeaCount => {
                let mut counts = self.counts.lock();
                for (id, count) in ids.iter().zip(&values.vals) {
                    *counts.entry(*id).or_default() += count;
                }
                Ok(())
            }
            ValueKind::Gradient => {
                if values.slots().any(|slot| slot.len() != 2) {
                    return Err(StoreErr::Unsupported { op: "push", kind });
                }
                self.gradients.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            ValueKind::Weight => Err(StoreErr::Unsupported { op: "push", kind }),
        }
    }

    fn stats(&self) -> ModelStats {
        ModelStats {
            features: self.counts.lock().len(),
            ..Default::default()
        }
    }
}

/// Generates rows whose features all come from one group, groups taking
/// turns. Features of different groups never share a row.
pub fn grouped_rows(groups: &[Vec<FeaId>], rows: usize, seed: u64) -> RowBlock {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut block = RowBlock::new();

    for r in 0..rows {
        let group = &groups[r % groups.len()];
        let mut picked: Vec<FeaId> = group.choose_multiple(&mut rng, 2).copied().collect();
        picked.sort_unstable();

        // the smallest feature of the row decides the label most of the time
        let positive = (picked[0] % 2 == 0) ^ rng.random_bool(0.2);
        block.push_row(if positive { 1. } else { -1. }, &picked, None);
    }

    block
}

/// Three groups of four features each.
pub fn groups() -> Vec<Vec<FeaId>> {
    (0..3).map(|g| (0..4).map(|f| 100 * (g + 1) + f).collect()).collect()
}
