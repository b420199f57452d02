use std::{mem, sync::Arc, thread, time::Instant};

use log::{debug, info};
use parameter_server::Store;
use parking_lot::Mutex;
use rand::{SeedableRng, rngs::StdRng};
use tracker::Tracker;

use super::{
    FeatureBlock, Schedule,
    partition::partition,
    pipeline::{BlockJob, BlockOutcome, Context, Evaluation, run_block},
};
use crate::{
    Result, WorkerErr,
    config::{BcdConfig, PrefetchPolicy},
    data::{MemTileStore, RowBlock},
    learner::{EpochReport, Learner, StopCriteria},
    loss::LogitLoss,
    metrics::Progress,
};

/// What the blocks of the current pass reported.
#[derive(Default)]
struct PassOutcome {
    eval: Option<Evaluation>,
    error: Option<WorkerErr>,
}

/// Block coordinate descent over feature blocks, with up to `tau + 1`
/// blocks in flight.
///
/// Every pass walks the blocks in order (shuffled if configured). A block
/// computes its gradient over every training tile, pushes it, pulls the
/// resulting change and patches the predictions of every partition. Block
/// `i` is issued once block `i - tau - 1` is done, the last block once every
/// other block is done so it scores the whole pass.
pub struct BcdLearner {
    config: BcdConfig,
    schedule: Schedule,
    ctx: Arc<Context>,
    tracker: Tracker<BlockJob, BlockOutcome>,
    outcome: Arc<Mutex<PassOutcome>>,
    rng: StdRng,
}

impl BcdLearner {
    /// Creates a new `BcdLearner`, partitioning the data and pushing its
    /// feature counts to `store`.
    ///
    /// # Arguments
    /// * `config` - The learner's bounds.
    /// * `v_dim` - The embedding dimension of the store's updater.
    /// * `store` - The store holding the model.
    /// * `train` - The training partitions.
    /// * `val` - The validation partitions, scored but never trained on.
    ///
    /// # Returns
    /// An error if the config is invalid, the data is empty or the store fails.
    pub fn new<T, V>(
        config: BcdConfig,
        v_dim: usize,
        store: Arc<dyn Store>,
        train: T,
        val: V,
    ) -> Result<Self>
    where
        T: IntoIterator<Item = RowBlock>,
        V: IntoIterator<Item = RowBlock>,
    {
        config.validate()?;

        let layout = partition(store.as_ref(), train, val, &config)?;
        let ids = layout.blocks.iter().map(|b| Arc::clone(&b.ids)).collect();
        let threads = thread::available_parallelism().map_or(1, |n| n.get().min(4));
        let tiles = MemTileStore::new(layout.parts.clone(), ids, threads)?;

        let ctx = Arc::new(Context::new(
            store,
            Arc::new(tiles),
            Box::new(LogitLoss),
            layout,
            v_dim,
            &config,
        ));

        let runner = Arc::clone(&ctx);
        let tracker = Tracker::with_consumer(move |job, done| run_block(&runner, job, done))?;

        let outcome: Arc<Mutex<PassOutcome>> = Arc::default();
        let sink = Arc::clone(&outcome);
        tracker.set_monitor(move |BlockOutcome { block, result }| {
            let mut pass = sink.lock();
            match result {
                Ok(Some(eval)) => pass.eval = Some(eval),
                Ok(None) => {}
                Err(e) => {
                    debug!(block = block; "recording block failure");
                    pass.error.get_or_insert(e);
                }
            }
        });

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Ok(Self {
            schedule: Schedule::new(config.tau),
            config,
            ctx,
            tracker,
            outcome,
            rng,
        })
    }

    pub fn num_blocks(&self) -> usize {
        self.ctx.num_blocks()
    }

    /// Returns the current predictions of partition `part`, training
    /// partitions first.
    pub fn predictions(&self, part: usize) -> Option<Vec<f32>> {
        Some(self.ctx.parts.get(part)?.cache.read().pred.clone())
    }

    /// Returns a copy of feature block `index` with its local weights and
    /// trust regions.
    pub fn block(&self, index: usize) -> Option<FeatureBlock> {
        self.ctx.block(index)
    }

    /// Issues every block of a pass in `order` and drains them.
    fn run_pass(&mut self, order: &[usize]) -> Result<()> {
        let n = order.len();
        self.ctx.begin_pass(n);

        if self.config.prefetch == PrefetchPolicy::Eager {
            order.iter().for_each(|&block| self.ctx.prefetch(block));
        }

        for (pos, &block) in order.iter().enumerate() {
            if let Some(gate) = self.schedule.gate(pos) {
                self.ctx.gates.wait(gate);
            }

            let last = pos + 1 == n;
            if last {
                self.ctx.gates.wait_all(pos);
            }

            if self.outcome.lock().error.is_some() {
                break;
            }

            if self.config.prefetch == PrefetchPolicy::Windowed {
                for w in self.schedule.window(pos, n) {
                    self.ctx.prefetch(order[w]);
                }
            }

            if let Err(e) = self.tracker.issue([BlockJob { block, pos, last }]) {
                self.tracker.wait(0);
                return Err(e.into());
            }
        }

        self.tracker.wait(0);
        Ok(())
    }
}

impl Learner for BcdLearner {
    fn run_epoch(&mut self, epoch: usize) -> Result<EpochReport> {
        let start = Instant::now();
        let before = self.ctx.store.stats();

        let order = self
            .schedule
            .order(self.num_blocks(), self.config.shuffle_blocks, &mut self.rng);
        debug!(epoch = epoch, blocks = order.len(); "starting pass");

        self.run_pass(&order)?;

        let pass = mem::take(&mut *self.outcome.lock());
        if let Some(e) = pass.error {
            return Err(e);
        }

        let Evaluation { mut train, val } = match pass.eval {
            Some(eval) => eval,
            None => self.ctx.evaluate(),
        };

        let after = self.ctx.store.stats();
        train.merge(&Progress {
            new_w: after.nnz_w as i64 - before.nnz_w as i64,
            new_v: after.nnz_v as i64 - before.nnz_v as i64,
            ..Default::default()
        });

        info!(epoch = epoch, features = after.features, nnz_w = after.nnz_w; "model updated");

        Ok(EpochReport {
            epoch,
            train,
            val,
            peak_in_flight: self.ctx.peak_in_flight(),
            elapsed: start.elapsed(),
        })
    }

    fn criteria(&self) -> StopCriteria {
        StopCriteria {
            max_epochs: self.config.max_epochs,
            stop_rel_objv: self.config.stop_rel_objv,
        }
    }
}
