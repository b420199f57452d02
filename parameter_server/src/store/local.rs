use std::sync::Arc;

use log::error;

use super::{
    PullCallback, PushCallback, Store, Timestamp, ValueKind, Values, store::validate,
    timeline::Timeline,
};
use crate::{
    Result,
    keys::FeaId,
    updating::{ModelStats, Updater},
};

/// A store that applies every request to its updater on the caller's thread.
///
/// Callbacks run before `push`/`pull` return, so every timestamp is already
/// completed when handed back.
pub struct LocalStore<U: Updater> {
    updater: U,
    timeline: Timeline,
}

impl<U: Updater> LocalStore<U> {
    /// Creates a new `LocalStore`.
    ///
    /// # Arguments
    /// * `updater` - The model owner requests are applied to.
    pub fn new(updater: U) -> Self {
        Self {
            updater,
            timeline: Timeline::new(),
        }
    }

    pub fn updater(&self) -> &U {
        &self.updater
    }
}

impl<U: Updater> Store for LocalStore<U> {
    fn push(
        &self,
        ids: Arc<[FeaId]>,
        kind: ValueKind,
        values: Values,
        on_complete: Option<PushCallback>,
    ) -> Result<Timestamp> {
        validate(&ids, Some(&values))?;

        let ts = self.timeline.issue();
        let res = match ids.is_empty() {
            true => Ok(()),
            false => self.updater.update(&ids, kind, &values),
        };

        match on_complete {
            Some(notify) => notify(res),
            None => {
                if let Err(e) = res {
                    error!(ts = ts; "push failed: {e}");
                }
            }
        }

        self.timeline.complete(ts);
        Ok(ts)
    }

    fn pull(
        &self,
        ids: Arc<[FeaId]>,
        kind: ValueKind,
        on_complete: PullCallback,
    ) -> Result<Timestamp> {
        validate(&ids, None)?;

        let ts = self.timeline.issue();
        let res = match ids.is_empty() {
            true => Ok(Values::default()),
            false => self.updater.get(&ids, kind),
        };

        on_complete(res);
        self.timeline.complete(ts);
        Ok(ts)
    }

    fn wait(&self, ts: Timestamp) {
        self.timeline.wait(ts);
    }

    fn stats(&self) -> ModelStats {
        self.updater.stats()
    }
}
