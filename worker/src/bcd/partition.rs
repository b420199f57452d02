use std::sync::Arc;

use log::{debug, info};
use parameter_server::{FeaId, PushCallback, Store, ValueKind, Values};
use parking_lot::Mutex;
use rayon::prelude::*;

use super::FeatureBlock;
use crate::{
    Result, WorkerErr,
    config::BcdConfig,
    data::{Partition, RowBlock, balanced_range, localize},
};

/// The data and feature split of a block coordinate descent run.
#[derive(Debug)]
pub struct Layout {
    /// Training partitions first, then validation ones.
    pub parts: Vec<Arc<Partition>>,
    pub num_train: usize,
    pub blocks: Vec<FeatureBlock>,
}

/// Splits the data into row partitions and the surviving features into blocks.
///
/// Every training partition pushes its feature counts, the global counts of
/// the union are pulled back and features seen fewer than
/// `tail_feature_filter` times are dropped. The survivors are cut into
/// `num_blocks` contiguous ranges of equal size, empty ranges are skipped.
///
/// # Returns
/// `EmptyData` if there are no training rows, or the first store failure.
pub fn partition<T, V>(store: &dyn Store, train: T, val: V, config: &BcdConfig) -> Result<Layout>
where
    T: IntoIterator<Item = RowBlock>,
    V: IntoIterator<Item = RowBlock>,
{
    let train: Vec<RowBlock> = train.into_iter().filter(|b| !b.is_empty()).collect();
    let val: Vec<RowBlock> = val.into_iter().filter(|b| !b.is_empty()).collect();
    if train.is_empty() {
        return Err(WorkerErr::EmptyData);
    }

    let num_train = train.len();
    let localized: Vec<_> = train.into_par_iter().chain(val).map(localize).collect();

    let failure: Arc<Mutex<Option<WorkerErr>>> = Arc::default();
    let mut last = 0;
    for part in &localized[..num_train] {
        let sink = Arc::clone(&failure);
        let notify: PushCallback = Box::new(move |res| {
            if let Err(e) = res {
                sink.lock().get_or_insert(e.into());
            }
        });

        let ids: Arc<[FeaId]> = Arc::from(part.ids.as_slice());
        let counts = Values::scalar(part.counts.clone());
        last = store.push(ids, ValueKind::FeaCount, counts, Some(notify))?;
    }

    store.wait(last);
    if let Some(e) = failure.lock().take() {
        return Err(e);
    }

    let mut union: Vec<FeaId> = localized[..num_train]
        .iter()
        .flat_map(|part| part.ids.iter().copied())
        .collect();
    union.par_sort_unstable();
    union.dedup();

    let union: Arc<[FeaId]> = union.into();
    let counts = store.pull_wait(Arc::clone(&union), ValueKind::FeaCount)?;
    let kept: Vec<FeaId> = union
        .iter()
        .zip(&counts.vals)
        .filter(|&(_, &count)| count >= config.tail_feature_filter)
        .map(|(&id, _)| id)
        .collect();

    debug!(features = union.len(), kept = kept.len(); "tail features filtered");

    let mut blocks = Vec::with_capacity(config.num_blocks);
    for b in 0..config.num_blocks {
        let range = balanced_range(kept.len(), b, config.num_blocks);
        if range.is_empty() {
            continue;
        }

        let ids: Arc<[FeaId]> = Arc::from(&kept[range]);
        blocks.push(FeatureBlock::new(blocks.len(), ids, config.delta_init));
    }

    let parts: Vec<_> = localized.into_iter().map(|l| Arc::new(Partition::new(l))).collect();
    info!(
        train_parts = num_train,
        val_parts = parts.len() - num_train,
        blocks = blocks.len(),
        features = kept.len();
        "data partitioned"
    );

    Ok(Layout {
        parts,
        num_train,
        blocks,
    })
}
