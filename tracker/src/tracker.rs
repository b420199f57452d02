use std::{
    collections::{HashSet, VecDeque},
    sync::Arc,
    thread::{self, JoinHandle},
};

use log::{debug, trace, warn};
use parking_lot::{Condvar, Mutex};

use crate::{Result, TrackerErr};

type Monitor<R> = Arc<Mutex<dyn FnMut(R) + Send>>;

struct State<J> {
    pending: VecDeque<J>,
    running: HashSet<u64>,
    next_id: u64,
    has_consumer: bool,
    stopped: bool,
}

impl<J> State<J> {
    fn remains(&self) -> usize {
        self.pending.len() + self.running.len()
    }
}

struct Shared<J, R> {
    state: Mutex<State<J>>,
    job_ready: Condvar,
    drained: Condvar,
    monitor: Mutex<Option<Monitor<R>>>,
}

impl<J, R> Shared<J, R> {
    /// Hands `value` to the monitor and releases the running slot `id`.
    fn finish(&self, id: u64, value: R) {
        // the registry lock is released before the call so a monitor may replace itself
        let monitor = self.monitor.lock().clone();
        if let Some(monitor) = monitor {
            let mut monitor = monitor.lock();
            (*monitor)(value);
        }

        self.state.lock().running.remove(&id);
        self.drained.notify_all();
    }
}

/// The completion handle of a dispatched job.
///
/// The job keeps its slot in the tracker until `complete` is called. Dropping
/// the handle without completing it leaks that slot for good.
pub struct Completion<R> {
    id: u64,
    release: Option<Box<dyn FnOnce(R) + Send>>,
}

impl<R> Completion<R> {
    /// The dispatch id of the job, strictly increasing in dispatch order.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Marks the job as completed with its return value.
    ///
    /// # Arguments
    /// * `value` - The job's result, handed to the tracker's monitor if there is one.
    pub fn complete(mut self, value: R) {
        if let Some(release) = self.release.take() {
            release(value);
        }
    }
}

impl<R> Drop for Completion<R> {
    fn drop(&mut self) {
        if self.release.is_some() {
            warn!(job_id = self.id; "job dropped without completing, its slot leaks");
        }
    }
}

/// A thread-safe job queue drained by a single consumer thread.
///
/// Producers `issue` jobs from any thread, the consumer thread dispatches them in
/// FIFO order. A job counts as remaining from the moment it's issued until its
/// `Completion` is completed.
pub struct Tracker<J, R = ()> {
    shared: Arc<Shared<J, R>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl<J, R> Default for Tracker<J, R>
where
    J: Send + 'static,
    R: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<J, R> Tracker<J, R>
where
    J: Send + 'static,
    R: Send + 'static,
{
    /// Creates a new `Tracker` without a consumer.
    ///
    /// # Returns
    /// A new `Tracker` instance.
    pub fn new() -> Self {
        let state = State {
            pending: VecDeque::new(),
            running: HashSet::new(),
            next_id: 0,
            has_consumer: false,
            stopped: false,
        };

        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                job_ready: Condvar::new(),
                drained: Condvar::new(),
                monitor: Mutex::new(None),
            }),
            consumer: Mutex::new(None),
        }
    }

    /// Creates a new `Tracker` and registers its consumer.
    ///
    /// # Arguments
    /// * `consumer` - The function every job is dispatched to.
    ///
    /// # Returns
    /// A new `Tracker` instance or a `TrackerErr` if the consumer thread couldn't be spawned.
    pub fn with_consumer<F>(consumer: F) -> Result<Self>
    where
        F: FnMut(J, Completion<R>) + Send + 'static,
    {
        let tracker = Self::new();
        tracker.set_consumer(consumer)?;
        Ok(tracker)
    }

    /// Registers the consumer and starts the consumer thread.
    ///
    /// The consumer runs on the tracker's own thread, one job at a time, and may
    /// complete each job inline or move the `Completion` elsewhere.
    ///
    /// # Arguments
    /// * `consumer` - The function every job is dispatched to.
    ///
    /// # Returns
    /// `ConsumerAlreadySet` if called twice, or `Spawn` if the thread couldn't be started.
    pub fn set_consumer<F>(&self, consumer: F) -> Result<()>
    where
        F: FnMut(J, Completion<R>) + Send + 'static,
    {
        let mut handle = self.consumer.lock();
        if handle.is_some() {
            return Err(TrackerErr::ConsumerAlreadySet);
        }

        let shared = Arc::clone(&self.shared);
        let thread = thread::Builder::new()
            .name("tracker-consumer".into())
            .spawn(move || consume(shared, consumer))?;

        self.shared.state.lock().has_consumer = true;
        *handle = Some(thread);
        Ok(())
    }

    /// Registers the monitor that receives every job's return value.
    ///
    /// The monitor runs on whichever thread completes the job, before the job's
    /// slot is released, and calls to it are serialized. A monitor may call
    /// `set_monitor`, the replacement receives the results of later completions.
    ///
    /// # Arguments
    /// * `monitor` - The callback to hand job results to.
    pub fn set_monitor<F>(&self, monitor: F)
    where
        F: FnMut(R) + Send + 'static,
    {
        let monitor: Monitor<R> = Arc::new(Mutex::new(monitor));
        *self.shared.monitor.lock() = Some(monitor);
    }

    /// Enqueues jobs and returns immediately.
    ///
    /// # Arguments
    /// * `jobs` - The jobs to enqueue, dispatched in iteration order.
    ///
    /// # Returns
    /// `NoConsumer` if no consumer was registered yet.
    pub fn issue<I>(&self, jobs: I) -> Result<()>
    where
        I: IntoIterator<Item = J>,
    {
        let jobs: Vec<J> = jobs.into_iter().collect();
        let issued = jobs.len();

        {
            let mut state = self.shared.state.lock();
            if !state.has_consumer {
                return Err(TrackerErr::NoConsumer);
            }

            state.pending.extend(jobs);
        }

        if issued > 0 {
            self.shared.job_ready.notify_one();
        }

        trace!(issued = issued; "issued jobs");
        Ok(())
    }

    /// Enqueues jobs and blocks until every job of this tracker is completed.
    ///
    /// # Arguments
    /// * `jobs` - The jobs to enqueue.
    ///
    /// # Returns
    /// `NoConsumer` if no consumer was registered yet.
    pub fn issue_and_wait<I>(&self, jobs: I) -> Result<()>
    where
        I: IntoIterator<Item = J>,
    {
        self.issue(jobs)?;
        self.wait(0);
        Ok(())
    }

    /// Blocks until at most `n` jobs remain pending or running.
    ///
    /// Must not be called from inside the consumer or from a completion path
    /// with `n` smaller than the jobs that path is holding.
    ///
    /// # Arguments
    /// * `n` - The amount of remaining jobs to wait for.
    pub fn wait(&self, n: usize) {
        let mut state = self.shared.state.lock();
        self.shared
            .drained
            .wait_while(&mut state, |state| state.remains() > n);
    }

    /// Returns the amount of pending plus running jobs at this moment.
    pub fn num_remains(&self) -> usize {
        self.shared.state.lock().remains()
    }

    /// Discards every job that wasn't dispatched yet, running jobs are unaffected.
    pub fn clear(&self) {
        let discarded = {
            let mut state = self.shared.state.lock();
            let discarded = state.pending.len();
            state.pending.clear();
            discarded
        };

        self.shared.drained.notify_all();
        debug!(discarded = discarded; "cleared pending jobs");
    }
}

impl<J, R> Drop for Tracker<J, R> {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.stopped = true;
            state.pending.clear();
        }

        self.shared.job_ready.notify_all();

        if let Some(handle) = self.consumer.get_mut().take() {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!("tracker consumer thread panicked");
            }
        }
    }
}

/// The consumer thread's loop, dispatches jobs until the tracker is dropped.
fn consume<J, R, F>(shared: Arc<Shared<J, R>>, mut consumer: F)
where
    J: Send + 'static,
    R: Send + 'static,
    F: FnMut(J, Completion<R>),
{
    loop {
        let (id, job) = {
            let mut state = shared.state.lock();
            shared
                .job_ready
                .wait_while(&mut state, |state| state.pending.is_empty() && !state.stopped);

            if state.stopped {
                break;
            }

            let Some(job) = state.pending.pop_front() else {
                continue;
            };

            let id = state.next_id;
            state.next_id += 1;
            state.running.insert(id);
            (id, job)
        };

        let slot = Arc::clone(&shared);
        let completion = Completion {
            id,
            release: Some(Box::new(move |value| slot.finish(id, value))),
        };

        trace!(job_id = id; "dispatching job");
        consumer(job, completion);
    }

    debug!("tracker consumer stopped");
}
