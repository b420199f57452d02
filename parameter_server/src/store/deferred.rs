use std::{sync::Arc, time::Duration};

use log::{debug, error};
use rand::{Rng, SeedableRng, rngs::StdRng};
use tokio::runtime::{self, Runtime};
use tracker::{Completion, Tracker};

use super::{
    PullCallback, PushCallback, Store, Timestamp, ValueKind, Values, store::validate,
    timeline::Timeline,
};
use crate::{
    Result,
    keys::FeaId,
    updating::{ModelStats, Updater},
};

enum Op {
    Push {
        values: Values,
        on_complete: Option<PushCallback>,
    },
    Pull {
        on_complete: PullCallback,
    },
}

struct Request {
    ts: Timestamp,
    ids: Arc<[FeaId]>,
    kind: ValueKind,
    op: Op,
}

/// A store whose requests complete asynchronously after a random latency.
///
/// Requests are applied to the updater in issue order by a dedicated
/// dispatch thread, their callbacks fire later on a blocking pool, so
/// completions may arrive in any order. This mimics a remote server and
/// lets learners overlap several blocks.
pub struct DeferredStore<U: Updater> {
    updater: Arc<U>,
    timeline: Arc<Timeline>,
    tracker: Tracker<Request>,
    runtime: Option<Runtime>,
}

impl<U: Updater + 'static> DeferredStore<U> {
    /// Creates a new `DeferredStore`.
    ///
    /// # Arguments
    /// * `updater` - The model owner requests are applied to.
    /// * `max_latency` - The upper bound of the random completion delay.
    /// * `seed` - An optional seed for the delays.
    ///
    /// # Returns
    /// An error if the completion runtime or the dispatch thread can't start.
    pub fn new(updater: U, max_latency: Duration, seed: Option<u64>) -> Result<Self> {
        let runtime = runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("store-completion")
            .enable_time()
            .build()?;

        let updater = Arc::new(updater);
        let timeline = Arc::new(Timeline::new());
        let tracker = Tracker::new();

        let handle = runtime.handle().clone();
        let model = Arc::clone(&updater);
        let clock = Arc::clone(&timeline);
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let max_micros = max_latency.as_micros() as u64;

        tracker.set_consumer(move |request: Request, done: Completion<()>| {
            let ts = request.ts;
            let notify = apply(model.as_ref(), request);
            let delay = match max_micros {
                0 => Duration::ZERO,
                max => Duration::from_micros(rng.random_range(0..=max)),
            };

            let clock = Arc::clone(&clock);
            handle.spawn(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }

                let finished = tokio::task::spawn_blocking(move || {
                    notify();
                    clock.complete(ts);
                    done.complete(());
                })
                .await;

                if let Err(e) = finished {
                    error!(ts = ts; "store completion failed: {e}");
                }
            });
        })?;

        Ok(Self {
            updater,
            timeline,
            tracker,
            runtime: Some(runtime),
        })
    }

    pub fn updater(&self) -> &U {
        &self.updater
    }

    /// Stamps `op` and hands it to the dispatch thread.
    fn submit(&self, ids: Arc<[FeaId]>, kind: ValueKind, op: Op) -> Result<Timestamp> {
        let ts = self.timeline.issue();

        if let Err(e) = self.tracker.issue([Request { ts, ids, kind, op }]) {
            // never dispatched, so nothing else would complete it
            self.timeline.complete(ts);
            return Err(e.into());
        }

        Ok(ts)
    }
}

/// Applies a request to the model right away, returning the notification to
/// deliver once its latency elapsed.
fn apply<U: Updater>(updater: &U, request: Request) -> Box<dyn FnOnce() + Send> {
    let Request { ts, ids, kind, op } = request;

    match op {
        Op::Push { values, on_complete } => {
            let res = match ids.is_empty() {
                true => Ok(()),
                false => updater.update(&ids, kind, &values),
            };

            Box::new(move || match on_complete {
                Some(notify) => notify(res),
                None => {
                    if let Err(e) = res {
                        error!(ts = ts; "push failed: {e}");
                    }
                }
            })
        }
        Op::Pull { on_complete } => {
            let res = match ids.is_empty() {
                true => Ok(Values::default()),
                false => updater.get(&ids, kind),
            };

            Box::new(move || on_complete(res))
        }
    }
}

impl<U: Updater + 'static> Store for DeferredStore<U> {
    fn push(
        &self,
        ids: Arc<[FeaId]>,
        kind: ValueKind,
        values: Values,
        on_complete: Option<PushCallback>,
    ) -> Result<Timestamp> {
        validate(&ids, Some(&values))?;

        let op = Op::Push {
            values,
            on_complete,
        };
        self.submit(ids, kind, op)
    }

    fn pull(
        &self,
        ids: Arc<[FeaId]>,
        kind: ValueKind,
        on_complete: PullCallback,
    ) -> Result<Timestamp> {
        validate(&ids, None)?;
        self.submit(ids, kind, Op::Pull { on_complete })
    }

    fn wait(&self, ts: Timestamp) {
        self.timeline.wait(ts);
    }

    fn stats(&self) -> ModelStats {
        self.updater.stats()
    }
}

impl<U: Updater> Drop for DeferredStore<U> {
    fn drop(&mut self) {
        self.tracker.wait(0);
        if let Some(runtime) = self.runtime.take() {
            debug!(issued = self.timeline.last_issued(); "shutting down deferred store");
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        thread,
    };

    use parking_lot::Mutex;
    use rand::seq::SliceRandom;

    use super::*;
    use crate::{LocalStore, StoreErr};

    /// Sums pushed counts per id.
    #[derive(Default)]
    struct Counter {
        counts: Mutex<HashMap<FeaId, f32>>,
    }

    impl Updater for Counter {
        fn get(&self, ids: &[FeaId], kind: ValueKind) -> Result<Values> {
            if kind != ValueKind::FeaCount {
                return Err(StoreErr::Unsupported { op: "pull", kind });
            }

            let counts = self.counts.lock();
            let vals = ids.iter().map(|id| counts.get(id).copied().unwrap_or(0.)).collect();
            Ok(Values::scalar(vals))
        }

        fn update(&self, ids: &[FeaId], _: ValueKind, values: &Values) -> Result<()> {
            let mut counts = self.counts.lock();
            for (id, v) in ids.iter().zip(&values.vals) {
                *counts.entry(*id).or_default() += v;
            }

            Ok(())
        }

        fn stats(&self) -> ModelStats {
            ModelStats {
                features: self.counts.lock().len(),
                ..Default::default()
            }
        }
    }

    fn deferred(seed: u64) -> DeferredStore<Counter> {
        DeferredStore::new(Counter::default(), Duration::from_millis(3), Some(seed)).unwrap()
    }

    #[test]
    fn timestamps_strictly_increase() {
        let store = deferred(1);
        let ids: Arc<[FeaId]> = Arc::from(vec![1, 2]);

        let mut last = 0;
        for _ in 0..20 {
            let ts = store
                .push(Arc::clone(&ids), ValueKind::FeaCount, Values::scalar(vec![1., 1.]), None)
                .unwrap();
            assert!(ts > last);
            last = ts;
        }

        store.wait(last);
        assert_eq!(store.stats().features, 2);
    }

    #[test]
    fn wait_covers_every_earlier_callback() {
        let store = deferred(2);
        let fired = Arc::new(AtomicUsize::new(0));

        let mut rng = StdRng::seed_from_u64(9);
        let mut last = 0;
        for i in 0..200u64 {
            let fired_cb = Arc::clone(&fired);
            let ids: Arc<[FeaId]> = Arc::from(vec![i % 7]);
            let notify: PushCallback = Box::new(move |res| {
                res.unwrap();
                fired_cb.fetch_add(1, Ordering::SeqCst);
            });

            last = store
                .push(ids, ValueKind::FeaCount, Values::scalar(vec![1.]), Some(notify))
                .unwrap();

            if rng.random_bool(0.1) {
                let seen = fired.load(Ordering::SeqCst);
                store.wait(last);
                assert!(fired.load(Ordering::SeqCst) >= (i + 1) as usize);
                assert!(fired.load(Ordering::SeqCst) >= seen);
            }
        }

        store.wait(last);
        assert_eq!(fired.load(Ordering::SeqCst), 200);
    }

    #[test]
    fn pull_after_completed_push_observes_it() {
        let store = deferred(3);
        let ids: Arc<[FeaId]> = Arc::from(vec![3, 5, 8]);

        for round in 1..=10 {
            store
                .push_wait(Arc::clone(&ids), ValueKind::FeaCount, Values::scalar(vec![1., 2., 3.]))
                .unwrap();
            let values = store.pull_wait(Arc::clone(&ids), ValueKind::FeaCount).unwrap();
            let r = round as f32;
            assert_eq!(values.vals, [r, 2. * r, 3. * r]);
        }
    }

    #[test]
    fn concurrent_pushes_are_all_applied() {
        const THREADS: usize = 4;
        const PUSHES: usize = 50;

        let store = Arc::new(deferred(4));
        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let mut rng = StdRng::seed_from_u64(t as u64);
                    let mut ids: Vec<FeaId> = (0..10).collect();
                    let mut last = 0;
                    for _ in 0..PUSHES {
                        ids.shuffle(&mut rng);
                        let mut some: Vec<_> = ids[..5].to_vec();
                        some.sort_unstable();
                        let ones = Values::scalar(vec![1.; 5]);
                        last = store.push(some.into(), ValueKind::FeaCount, ones, None).unwrap();
                    }
                    store.wait(last);
                })
            })
            .collect();

        handles.into_iter().for_each(|h| h.join().unwrap());

        let all: Arc<[FeaId]> = (0..10).collect();
        store.wait(store.timeline.last_issued());
        let counts = store.pull_wait(all, ValueKind::FeaCount).unwrap();
        assert_eq!(counts.vals.iter().sum::<f32>(), (THREADS * PUSHES * 5) as f32);
    }

    #[test]
    fn overlapping_pulls_see_whole_pushes() {
        const WRITERS: usize = 3;
        const READERS: usize = 3;
        const ROUNDS: usize = 40;
        const IDS: u64 = 16;

        let store = Arc::new(deferred(7));
        let ids: Arc<[FeaId]> = (0..IDS).collect();

        let writers: Vec<_> = (0..WRITERS)
            .map(|_| {
                let store = Arc::clone(&store);
                let ids = Arc::clone(&ids);
                thread::spawn(move || {
                    for _ in 0..ROUNDS {
                        let ones = Values::scalar(vec![1.; IDS as usize]);
                        store.push(Arc::clone(&ids), ValueKind::FeaCount, ones, None).unwrap();
                    }
                })
            })
            .collect();

        let readers: Vec<_> = (0..READERS)
            .map(|_| {
                let store = Arc::clone(&store);
                let ids = Arc::clone(&ids);
                thread::spawn(move || {
                    let mut last = 0.;
                    for _ in 0..ROUNDS {
                        let counts = store.pull_wait(Arc::clone(&ids), ValueKind::FeaCount);
                        let counts = counts.unwrap().vals;
                        let first = counts[0];
                        assert!(counts.iter().all(|&c| c == first), "torn pull: {counts:?}");
                        assert!(first >= last);
                        last = first;
                    }
                })
            })
            .collect();

        writers.into_iter().chain(readers).for_each(|h| h.join().unwrap());

        store.wait(store.timeline.last_issued());
        let counts = store.pull_wait(ids, ValueKind::FeaCount).unwrap();
        assert_eq!(counts.vals, vec![(WRITERS * ROUNDS) as f32; IDS as usize]);
    }

    #[test]
    fn undispatched_requests_do_not_stall_wait() {
        let store = DeferredStore {
            updater: Arc::new(Counter::default()),
            timeline: Arc::new(Timeline::new()),
            tracker: Tracker::new(),
            runtime: None,
        };

        let ids: Arc<[FeaId]> = Arc::from(vec![1]);
        let err = store.push(Arc::clone(&ids), ValueKind::FeaCount, Values::scalar(vec![1.]), None);
        assert!(matches!(err, Err(StoreErr::Dispatch(_))));
        let err = store.pull(ids, ValueKind::FeaCount, Box::new(|_| {}));
        assert!(matches!(err, Err(StoreErr::Dispatch(_))));

        assert_eq!(store.timeline.last_issued(), 2);
        store.wait(2);
        assert!(store.timeline.is_done(2));
    }

    #[test]
    fn malformed_requests_fail_before_issuing() {
        let store = deferred(5);
        let unsorted: Arc<[FeaId]> = Arc::from(vec![2, 1]);
        let err = store.push(unsorted, ValueKind::FeaCount, Values::scalar(vec![1., 1.]), None);
        assert!(matches!(err, Err(StoreErr::UnsortedIds { position: 1 })));

        let ids: Arc<[FeaId]> = Arc::from(vec![1, 2]);
        let err = store.push(ids, ValueKind::FeaCount, Values::scalar(vec![1.]), None);
        assert!(matches!(err, Err(StoreErr::SizeMismatch { .. })));
        assert_eq!(store.timeline.last_issued(), 0);
    }

    #[test]
    fn failures_reach_the_callback() {
        let store = deferred(6);
        let ids: Arc<[FeaId]> = Arc::from(vec![1]);
        let err = store.pull_wait(ids, ValueKind::Weight);
        assert!(matches!(err, Err(StoreErr::Unsupported { op: "pull", .. })));
    }

    #[test]
    fn local_store_completes_inline() {
        let store = LocalStore::new(Counter::default());
        let ids: Arc<[FeaId]> = Arc::from(vec![4]);

        let ts = store
            .push(Arc::clone(&ids), ValueKind::FeaCount, Values::scalar(vec![2.]), None)
            .unwrap();
        store.wait(ts);

        let (tx, rx) = std::sync::mpsc::channel();
        let notify: PullCallback = Box::new(move |res| tx.send(res).unwrap());
        store.pull(ids, ValueKind::FeaCount, notify).unwrap();
        assert_eq!(rx.try_recv().unwrap().unwrap().vals, [2.]);
    }
}
