mod common;

use std::{io, sync::Arc, time::Duration};

use common::{IdentityUpdater, grouped_rows, groups, init_logging};
use parameter_server::{
    BcdUpdater, BcdUpdaterConfig, DeferredStore, FeaId, LocalStore, ModelStats, Store, Updater,
    ValueKind, Values,
};
use worker::{
    BcdConfig, BcdLearner, EpochReport, Learner, PrefetchPolicy,
    data::{ChunkReader, RowBlock},
    loss::{RowCache, Slots, offsets_of, predict},
};

const ROWS: usize = 180;
const BLOCKS: usize = 3;
const TILES: usize = 2;

fn config(tau: usize) -> BcdConfig {
    BcdConfig {
        tau,
        num_blocks: BLOCKS,
        rows_per_part: ROWS / TILES,
        tail_feature_filter: 1.,
        seed: Some(9),
        ..Default::default()
    }
}

fn train() -> ChunkReader {
    ChunkReader::new(grouped_rows(&groups(), ROWS, 4), ROWS / TILES)
}

fn learner(config: BcdConfig, store: Arc<dyn Store>) -> io::Result<BcdLearner> {
    Ok(BcdLearner::new(config, 0, store, train(), Vec::<RowBlock>::new())?)
}

fn deferred<U: Updater + 'static>(updater: U, seed: u64) -> io::Result<Arc<dyn Store>> {
    let store = DeferredStore::new(updater, Duration::from_micros(500), Some(seed));
    let store = store.map_err(io::Error::other)?;
    Ok(Arc::new(store))
}

#[test]
fn identity_pass_counts_every_row_for_any_look_ahead() -> io::Result<()> {
    init_logging();
    let run = |tau: usize| -> io::Result<EpochReport> {
        let mut learner = learner(config(tau), deferred(IdentityUpdater::default(), tau as u64)?)?;
        assert_eq!(learner.num_blocks(), BLOCKS);
        Ok(learner.run_epoch(0)?)
    };

    let sync = run(0)?;
    let ahead = run(1)?;

    assert_eq!(sync.train.count, ROWS as u64);
    assert_eq!(ahead.train, sync.train);
    assert!(ahead.peak_in_flight <= 2);
    assert_eq!(sync.peak_in_flight, 1);
    Ok(())
}

#[test]
fn every_block_pushes_once_per_pass() -> io::Result<()> {
    init_logging();
    const EPOCHS: usize = 3;

    let updater = Arc::new(IdentityUpdater::default());
    let store: Arc<dyn Store> = Arc::new(LocalStore::new(SharedIdentity(Arc::clone(&updater))));
    let mut learner = learner(config(1), store)?;

    for epoch in 0..EPOCHS {
        learner.run_epoch(epoch)?;
    }

    assert_eq!(updater.gradient_pushes(), EPOCHS * BLOCKS);
    Ok(())
}

#[test]
fn non_interacting_blocks_match_the_synchronous_schedule() -> io::Result<()> {
    init_logging();
    const EPOCHS: usize = 4;

    type Run = (Vec<EpochReport>, Vec<Vec<f32>>);

    let run = |tau: usize, prefetch: PrefetchPolicy| -> io::Result<Run> {
        let updater = BcdUpdater::new(BcdUpdaterConfig {
            l1: 0.05,
            ..Default::default()
        })
        .map_err(io::Error::other)?;

        let config = BcdConfig { prefetch, ..config(tau) };
        let mut learner = learner(config, deferred(updater, 31 + tau as u64)?)?;

        let mut reports = Vec::new();
        for epoch in 0..EPOCHS {
            reports.push(learner.run_epoch(epoch)?);
        }

        let preds = (0..TILES).filter_map(|part| learner.predictions(part)).collect();
        Ok((reports, preds))
    };

    let (sync, sync_preds) = run(0, PrefetchPolicy::Eager)?;
    for (tau, prefetch) in [(1, PrefetchPolicy::Eager), (2, PrefetchPolicy::Windowed)] {
        let (ahead, ahead_preds) = run(tau, prefetch)?;

        assert_eq!(ahead_preds, sync_preds);
        for (a, s) in ahead.iter().zip(&sync) {
            assert_eq!(a.train, s.train);
            assert!(a.peak_in_flight <= tau + 1);
        }
    }

    Ok(())
}

#[test]
fn trust_regions_stay_bounded() -> io::Result<()> {
    init_logging();
    let config = BcdConfig {
        delta_max: 0.5,
        delta_init: 0.5,
        ..config(1)
    };
    let updater = BcdUpdater::new(BcdUpdaterConfig {
        l1: 0.,
        ..Default::default()
    })
    .map_err(io::Error::other)?;

    let store: Arc<dyn Store> = Arc::new(LocalStore::new(updater));
    let mut learner = learner(config, store)?;
    learner.run_epoch(0)?;
    learner.run_epoch(1)?;

    for index in 0..BLOCKS {
        let block = learner.block(index).ok_or_else(|| io::Error::other("block missing"))?;
        assert!(block.weights.iter().any(|&w| w != 0.));
        assert!(block.delta.iter().all(|&d| d > 0. && d <= 0.5));
    }
    Ok(())
}

#[test]
fn embeddings_grow_and_incremental_predictions_stay_exact() -> io::Result<()> {
    init_logging();
    const V_DIM: usize = 2;
    const EPOCHS: usize = 3;

    let updater = BcdUpdater::new(BcdUpdaterConfig {
        l1: 0.,
        v_dim: V_DIM,
        v_threshold: 1.,
        seed: Some(12),
        ..Default::default()
    })
    .map_err(io::Error::other)?;
    let local = Arc::new(LocalStore::new(updater));
    let store: Arc<dyn Store> = Arc::clone(&local) as Arc<dyn Store>;

    let mut learner = BcdLearner::new(config(1), V_DIM, store, train(), Vec::<RowBlock>::new())?;
    for epoch in 0..EPOCHS {
        let report = learner.run_epoch(epoch)?;
        assert_eq!(report.train.count, ROWS as u64);
    }
    assert!(local.stats().nnz_v > 0);

    // stitch the blocks back into one model over the sorted feature ids
    let (mut ids, mut lens, mut weights) = (Vec::new(), Vec::new(), Vec::new());
    for index in 0..learner.num_blocks() {
        let block = learner.block(index).ok_or_else(|| io::Error::other("block missing"))?;
        assert!(block.lens.iter().all(|&len| len == 1 || len as usize == 1 + V_DIM));

        // the local mirror tracks the store's weights exactly
        let stored = local.updater().weights(&block.ids).map_err(io::Error::other)?;
        assert_eq!(stored.vals, block.weights);
        assert_eq!(stored.lens.as_deref(), Some(&block.lens[..]));

        ids.extend_from_slice(&block.ids);
        lens.extend_from_slice(&block.lens);
        weights.extend_from_slice(&block.weights);
    }
    assert!(lens.iter().any(|&len| len > 1));

    let offsets = offsets_of(&lens);
    let slots = Slots {
        lens: &lens,
        offsets: &offsets,
        weights: &weights,
    };

    let rows = grouped_rows(&groups(), ROWS, 4);
    let mut local_rows = RowBlock::<u32>::new();
    for r in 0..rows.rows() {
        let index: Vec<u32> = rows.index[rows.row(r)]
            .iter()
            .filter_map(|id| ids.binary_search(id).ok().map(|p| p as u32))
            .collect();
        local_rows.push_row(rows.labels[r], &index, None);
    }

    let mut full = RowCache::new(ROWS, V_DIM);
    predict(&local_rows, slots, &mut full);

    let incremental: Vec<f32> = (0..TILES)
        .filter_map(|part| learner.predictions(part))
        .flatten()
        .collect();
    assert_eq!(incremental.len(), ROWS);
    for (inc, exact) in incremental.iter().zip(&full.pred) {
        let tolerance = 1e-4 * (1. + exact.abs());
        assert!((inc - exact).abs() <= tolerance, "incremental {inc} vs full {exact}");
    }

    Ok(())
}

/// Lets a test keep a handle on the updater it hands to a store.
struct SharedIdentity(Arc<IdentityUpdater>);

impl Updater for SharedIdentity {
    fn get(&self, ids: &[FeaId], kind: ValueKind) -> parameter_server::Result<Values> {
        self.0.get(ids, kind)
    }

    fn update(
        &self,
        ids: &[FeaId],
        kind: ValueKind,
        values: &Values,
    ) -> parameter_server::Result<()> {
        self.0.update(ids, kind, values)
    }

    fn stats(&self) -> ModelStats {
        self.0.stats()
    }
}
