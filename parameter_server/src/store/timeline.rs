use std::collections::BTreeSet;

use parking_lot::{Condvar, Mutex};

use super::Timestamp;

#[derive(Debug, Default)]
struct State {
    last: Timestamp,
    outstanding: BTreeSet<Timestamp>,
}

/// Issues strictly increasing timestamps and tracks which are still
/// outstanding.
#[derive(Debug, Default)]
pub struct Timeline {
    state: Mutex<State>,
    completed: Condvar,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues the next timestamp and marks it outstanding.
    pub fn issue(&self) -> Timestamp {
        let mut state = self.state.lock();
        state.last += 1;
        let ts = state.last;
        state.outstanding.insert(ts);
        ts
    }

    /// Marks `ts` as completed and wakes every waiter.
    pub fn complete(&self, ts: Timestamp) {
        self.state.lock().outstanding.remove(&ts);
        self.completed.notify_all();
    }

    /// Blocks until every timestamp up to and including `ts` completed.
    pub fn wait(&self, ts: Timestamp) {
        let mut state = self.state.lock();
        self.completed
            .wait_while(&mut state, |s| s.outstanding.first().is_some_and(|&first| first <= ts));
    }

    /// Returns whether every timestamp up to `ts` completed.
    pub fn is_done(&self, ts: Timestamp) -> bool {
        self.state
            .lock()
            .outstanding
            .first()
            .is_none_or(|&first| first > ts)
    }

    /// Returns the last issued timestamp, zero if none was issued yet.
    pub fn last_issued(&self) -> Timestamp {
        self.state.lock().last
    }
}
