use std::{
    mem,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use log::{debug, warn};
use parameter_server::{PullCallback, PushCallback, Store, ValueKind, Values};
use parking_lot::Mutex;
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use tracker::{Completion, Tracker};

use super::Batch;
use crate::{
    Result, WorkerErr,
    config::SgdConfig,
    data::RowBlock,
    handoff::Handoff,
    learner::{EpochReport, Learner, StopCriteria},
    loss::{LogitLoss, Loss},
    metrics::Progress,
};

struct BatchJob {
    batch: Arc<Batch>,
    train: bool,
    push_counts: bool,
}

struct BatchOutcome {
    train: bool,
    result: Result<Progress>,
}

#[derive(Default)]
struct EpochOutcome {
    train: Progress,
    val: Progress,
    error: Option<WorkerErr>,
}

/// What every batch of a run shares.
struct Shared {
    store: Arc<dyn Store>,
    loss: Box<dyn Loss>,
    dim: usize,
    last_push: AtomicU64,
    failure: Mutex<Option<WorkerErr>>,
}

impl Shared {
    fn record(&self, e: WorkerErr) {
        warn!("gradient push failed: {e}");
        self.failure.lock().get_or_insert(e);
    }

    fn notify_failure(self: &Arc<Self>) -> PushCallback {
        let shared = Arc::clone(self);
        Box::new(move |res| {
            if let Err(e) = res {
                shared.record(e.into());
            }
        })
    }

    /// Scores the batch and, when training, pushes its gradient.
    fn finish(self: &Arc<Self>, job: &BatchJob, weights: Values) -> Result<Progress> {
        let (progress, grad) =
            job.batch.process(&weights, self.dim, self.loss.as_ref(), job.train)?;

        if let Some(grad) = grad {
            let ids = Arc::clone(&job.batch.ids);
            let ts = self
                .store
                .push(ids, ValueKind::Gradient, grad, Some(self.notify_failure()))?;
            self.last_push.fetch_max(ts, Ordering::SeqCst);
        }

        Ok(progress)
    }
}

/// Runs one batch: optionally pushes its feature counts, then pulls its
/// weights and finishes from the pull's callback.
fn run_batch(shared: &Arc<Shared>, job: BatchJob, done: Completion<BatchOutcome>) {
    let train = job.train;
    let ids = Arc::clone(&job.batch.ids);

    if job.push_counts {
        let counts = Values::scalar(job.batch.counts.clone());
        let pushed = shared
            .store
            .push(Arc::clone(&ids), ValueKind::FeaCount, counts, Some(shared.notify_failure()));

        if let Err(e) = pushed {
            done.complete(BatchOutcome {
                train,
                result: Err(e.into()),
            });
            return;
        }
    }

    let done = Handoff::new(done);
    let resume = done.share();
    let runner = Arc::clone(shared);
    let notify: PullCallback = Box::new(move |res| {
        if let Some(done) = resume.take() {
            let result = res
                .map_err(WorkerErr::from)
                .and_then(|weights| runner.finish(&job, weights));
            done.complete(BatchOutcome { train, result });
        }
    });

    if let Err(e) = shared.store.pull(ids, ValueKind::Weight, notify) {
        if let Some(done) = done.take() {
            done.complete(BatchOutcome {
                train,
                result: Err(e.into()),
            });
        }
    }
}

/// Asynchronous minibatch SGD with at most `max_concurrency` batches in flight.
///
/// The first epoch pushes every batch's feature counts ahead of its pull so
/// the store knows the features. Every training batch pulls its weights,
/// scores its rows and pushes its gradient without waiting for it to be
/// applied. Validation batches are scored once the training batches drained.
pub struct SgdLearner {
    config: SgdConfig,
    shared: Arc<Shared>,
    train: Vec<Arc<Batch>>,
    val: Vec<Arc<Batch>>,
    tracker: Tracker<BatchJob, BatchOutcome>,
    outcome: Arc<Mutex<EpochOutcome>>,
    counted: bool,
    rng: StdRng,
}

impl SgdLearner {
    /// Creates a new `SgdLearner`.
    ///
    /// # Arguments
    /// * `config` - The learner's bounds.
    /// * `v_dim` - The embedding dimension of the store's updater.
    /// * `store` - The store holding the model.
    /// * `train` - The training minibatches.
    /// * `val` - The validation minibatches.
    ///
    /// # Returns
    /// An error if the config is invalid or there's no training data.
    pub fn new<T, V>(
        config: SgdConfig,
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

        let batches = |blocks: Vec<RowBlock>| -> Vec<Arc<Batch>> {
            blocks
                .into_iter()
                .filter(|block| !block.is_empty())
                .enumerate()
                .map(|(i, block)| Arc::new(Batch::new(i, block)))
                .collect()
        };

        let train = batches(train.into_iter().collect());
        let val = batches(val.into_iter().collect());
        if train.is_empty() {
            return Err(WorkerErr::EmptyData);
        }

        let shared = Arc::new(Shared {
            store,
            loss: Box::new(LogitLoss),
            dim: v_dim,
            last_push: AtomicU64::new(0),
            failure: Mutex::new(None),
        });

        let runner = Arc::clone(&shared);
        let tracker = Tracker::with_consumer(move |job, done| run_batch(&runner, job, done))?;

        let outcome: Arc<Mutex<EpochOutcome>> = Arc::default();
        let sink = Arc::clone(&outcome);
        tracker.set_monitor(move |BatchOutcome { train, result }| {
            let mut epoch = sink.lock();
            match result {
                Ok(progress) if train => epoch.train.merge(&progress),
                Ok(progress) => epoch.val.merge(&progress),
                Err(e) => {
                    epoch.error.get_or_insert(e);
                }
            }
        });

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        debug!(train = train.len(), val = val.len(); "minibatches ready");

        Ok(Self {
            config,
            shared,
            train,
            val,
            tracker,
            outcome,
            counted: false,
            rng,
        })
    }

    /// Issues `jobs` keeping at most `max_concurrency` in flight, then drains.
    ///
    /// # Returns
    /// The most jobs that were in flight at once.
    fn dispatch<I>(&self, jobs: I) -> Result<usize>
    where
        I: IntoIterator<Item = BatchJob>,
    {
        let mut peak = 0;

        for job in jobs {
            if self.outcome.lock().error.is_some() {
                break;
            }

            self.tracker.wait(self.config.max_concurrency - 1);
            if let Err(e) = self.tracker.issue([job]) {
                self.tracker.wait(0);
                return Err(e.into());
            }

            peak = peak.max(self.tracker.num_remains());
        }

        self.tracker.wait(0);
        Ok(peak)
    }
}

impl Learner for SgdLearner {
    fn run_epoch(&mut self, epoch: usize) -> Result<EpochReport> {
        let start = Instant::now();
        let before = self.shared.store.stats();

        let mut order: Vec<usize> = (0..self.train.len()).collect();
        if self.config.shuffle {
            order.shuffle(&mut self.rng);
        }

        let push_counts = !self.counted;
        let jobs = order.into_iter().map(|i| BatchJob {
            batch: Arc::clone(&self.train[i]),
            train: true,
            push_counts,
        });
        let peak = self.dispatch(jobs)?;
        self.counted = true;

        self.shared.store.wait(self.shared.last_push.load(Ordering::SeqCst));
        if let Some(e) = self.shared.failure.lock().take() {
            return Err(e);
        }

        let jobs = self.val.iter().map(|batch| BatchJob {
            batch: Arc::clone(batch),
            train: false,
            push_counts: false,
        });
        self.dispatch(jobs)?;

        let outcome = mem::take(&mut *self.outcome.lock());
        if let Some(e) = outcome.error {
            return Err(e);
        }

        let mut train = outcome.train;
        let after = self.shared.store.stats();
        train.new_w = after.nnz_w as i64 - before.nnz_w as i64;
        train.new_v = after.nnz_v as i64 - before.nnz_v as i64;

        Ok(EpochReport {
            epoch,
            train,
            val: (!self.val.is_empty()).then_some(outcome.val),
            peak_in_flight: peak,
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
