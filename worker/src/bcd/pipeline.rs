use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use log::{trace, warn};
use parameter_server::{PullCallback, PushCallback, Store, ValueKind, Values};
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use tracker::Completion;

use super::{FeatureBlock, Gates, Layout, TrustRegion};
use crate::{
    Result, WorkerErr,
    config::{BcdConfig, PrefetchPolicy},
    data::{Partition, TileStore},
    handoff::Handoff,
    loss::{self, Loss, RowCache},
    metrics::Progress,
};

/// Where a block is in its pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Idle,
    GradientComputed,
    Pushed,
    DeltaPulled,
    Done,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::Idle => "idle",
            Stage::GradientComputed => "gradient_computed",
            Stage::Pushed => "pushed",
            Stage::DeltaPulled => "delta_pulled",
            Stage::Done => "done",
        }
    }
}

/// A block to run at a position of the pass order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockJob {
    pub block: usize,
    pub pos: usize,
    /// Whether this is the last position, which scores the pass.
    pub last: bool,
}

/// The scores of every partition after a pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub train: Progress,
    pub val: Option<Progress>,
}

/// What a block's pass ended with.
#[derive(Debug)]
pub struct BlockOutcome {
    pub block: usize,
    pub result: Result<Option<Evaluation>>,
}

/// A row partition and its running predictions.
#[derive(Debug)]
pub struct PartData {
    pub part: Arc<Partition>,
    pub cache: RwLock<RowCache>,
}

/// Everything the blocks of a run share.
pub struct Context {
    pub store: Arc<dyn Store>,
    pub tiles: Arc<dyn TileStore>,
    pub loss: Box<dyn Loss>,
    pub parts: Vec<PartData>,
    pub num_train: usize,
    pub gates: Gates,
    blocks: Vec<Mutex<Option<FeatureBlock>>>,
    trust: TrustRegion,
    dim: usize,
    delta_init: f32,
    evict: bool,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl Context {
    pub fn new(
        store: Arc<dyn Store>,
        tiles: Arc<dyn TileStore>,
        loss: Box<dyn Loss>,
        layout: Layout,
        dim: usize,
        config: &BcdConfig,
    ) -> Self {
        let Layout {
            parts,
            num_train,
            blocks,
        } = layout;

        let parts = parts
            .into_iter()
            .map(|part| PartData {
                cache: RwLock::new(RowCache::new(part.num_rows(), dim)),
                part,
            })
            .collect();

        Self {
            store,
            tiles,
            loss,
            parts,
            num_train,
            gates: Gates::default(),
            blocks: blocks.into_iter().map(|b| Mutex::new(Some(b))).collect(),
            trust: TrustRegion {
                max: config.delta_max,
                c: config.delta_c,
            },
            dim,
            delta_init: config.delta_init,
            evict: config.prefetch == PrefetchPolicy::Windowed,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Returns a copy of block `index`, `None` while a stage holds it.
    pub fn block(&self, index: usize) -> Option<FeatureBlock> {
        self.blocks.get(index)?.lock().clone()
    }

    /// Closes every gate and clears the in-flight peak.
    pub fn begin_pass(&self, n: usize) {
        self.gates.reset(n);
        self.peak.store(0, Ordering::SeqCst);
    }

    /// Returns the most blocks that were between pushed and done at once
    /// since the pass began.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Starts building the tiles of `block` for every partition.
    pub fn prefetch(&self, block: usize) {
        for part in 0..self.parts.len() {
            self.tiles.prefetch(part, block);
        }
    }

    /// Scores the current predictions of every partition.
    pub fn evaluate(&self) -> Evaluation {
        let score = |parts: &[PartData]| {
            let fragments: Vec<Progress> = parts
                .par_iter()
                .map(|data| {
                    let cache = data.cache.read();
                    Progress::evaluate(&data.part.rows.labels, &cache.pred, self.loss.as_ref())
                })
                .collect();

            fragments.iter().fold(Progress::default(), |mut total, fragment| {
                total.merge(fragment);
                total
            })
        };

        let (train, val) = self.parts.split_at(self.num_train);
        Evaluation {
            train: score(train),
            val: (!val.is_empty()).then(|| score(val)),
        }
    }

    /// Sums the `[g, h]` pairs of `block` over every training partition.
    fn gradient(&self, block: &FeatureBlock) -> Vec<f32> {
        let size = 2 * block.weights.len();
        let partials: Vec<Option<Vec<f32>>> = self.parts[..self.num_train]
            .par_iter()
            .enumerate()
            .map(|(i, data)| {
                let tile = self.tiles.fetch(i, block.index);
                if tile.is_empty() {
                    return None;
                }

                let cache = data.cache.read();
                let mut out = vec![0.; size];
                loss::tile_gradient(
                    &tile,
                    &data.part.rows.labels,
                    &cache,
                    block.slots(),
                    &block.delta,
                    self.loss.as_ref(),
                    &mut out,
                );
                Some(out)
            })
            .collect();

        // summed in partition order so every run adds up the same way
        let mut grad = vec![0.; size];
        for partial in partials.into_iter().flatten() {
            grad.iter_mut().zip(partial).for_each(|(g, p)| *g += p);
        }

        grad
    }

    /// Moves the predictions of every partition by `deltas`.
    fn patch_predictions(&self, block: &FeatureBlock, deltas: &[f32]) {
        self.parts.par_iter().enumerate().for_each(|(i, data)| {
            let tile = self.tiles.fetch(i, block.index);
            if !tile.is_empty() {
                loss::apply_delta(&tile, &mut data.cache.write(), block.slots(), deltas);
            }
        });
    }

    fn enter_flight(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave_flight(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Runs one block through its stages.
///
/// The gradient is computed on the calling thread, everything after the push
/// continues from the store's callbacks. The block's gate opens and `done`
/// completes once the block is done or failed.
pub fn run_block(ctx: &Arc<Context>, job: BlockJob, done: Completion<BlockOutcome>) {
    let Some(block) = ctx.blocks.get(job.block).and_then(|slot| slot.lock().take()) else {
        ctx.gates.open(job.pos);
        done.complete(BlockOutcome {
            block: job.block,
            result: Err(WorkerErr::BlockUnavailable { block: job.block }),
        });
        return;
    };

    let mut task = BlockTask {
        ctx: Arc::clone(ctx),
        job,
        block,
        stage: Stage::Idle,
        done,
    };

    let grad = task.ctx.gradient(&task.block);
    task.advance(Stage::GradientComputed);
    task.push(grad);
}

/// A block owned by its running pass.
struct BlockTask {
    ctx: Arc<Context>,
    job: BlockJob,
    block: FeatureBlock,
    stage: Stage,
    done: Completion<BlockOutcome>,
}

impl BlockTask {
    fn advance(&mut self, stage: Stage) {
        self.stage = stage;
        trace!(block = self.job.block, pos = self.job.pos, stage = stage.name(); "block advanced");
    }

    fn push(mut self, grad: Vec<f32>) {
        let store = Arc::clone(&self.ctx.store);
        let ids = Arc::clone(&self.block.ids);
        let values = Values::ragged(grad, self.block.gradient_lens());

        self.ctx.enter_flight();
        self.advance(Stage::Pushed);

        let task = Handoff::new(self);
        let resume = task.share();
        let notify: PushCallback = Box::new(move |res| {
            if let Some(task) = resume.take() {
                match res {
                    Ok(()) => task.pull(),
                    Err(e) => task.fail(e.into()),
                }
            }
        });

        if let Err(e) = store.push(ids, ValueKind::Gradient, values, Some(notify)) {
            if let Some(task) = task.take() {
                task.fail(e.into());
            }
        }
    }

    fn pull(self) {
        let store = Arc::clone(&self.ctx.store);
        let ids = Arc::clone(&self.block.ids);

        let task = Handoff::new(self);
        let resume = task.share();
        let notify: PullCallback = Box::new(move |res| {
            if let Some(task) = resume.take() {
                match res {
                    Ok(deltas) => task.on_pulled(deltas),
                    Err(e) => task.fail(e.into()),
                }
            }
        });

        if let Err(e) = store.pull(ids, ValueKind::Weight, notify) {
            if let Some(task) = task.take() {
                task.fail(e.into());
            }
        }
    }

    fn on_pulled(mut self, deltas: Values) {
        self.advance(Stage::DeltaPulled);
        match self.apply(&deltas) {
            Ok(eval) => self.release(Ok(eval)),
            Err(e) => self.fail(e),
        }
    }

    fn apply(&mut self, deltas: &Values) -> Result<Option<Evaluation>> {
        self.block.fit_layout(deltas, self.ctx.dim, self.ctx.delta_init)?;
        self.ctx.patch_predictions(&self.block, &deltas.vals);
        self.block.apply(&deltas.vals, self.ctx.trust);
        self.advance(Stage::Done);

        Ok(self.job.last.then(|| self.ctx.evaluate()))
    }

    fn fail(self, e: WorkerErr) {
        warn!(block = self.job.block, stage = self.stage.name(); "block failed: {e}");
        self.release(Err(e));
    }

    fn release(self, result: Result<Option<Evaluation>>) {
        let BlockTask {
            ctx,
            job,
            block,
            stage,
            done,
        } = self;

        if stage >= Stage::Pushed {
            ctx.leave_flight();
        }

        if ctx.evict {
            for part in 0..ctx.parts.len() {
                ctx.tiles.evict(part, job.block);
            }
        }

        *ctx.blocks[job.block].lock() = Some(block);
        ctx.gates.open(job.pos);
        done.complete(BlockOutcome {
            block: job.block,
            result,
        });
    }
}
