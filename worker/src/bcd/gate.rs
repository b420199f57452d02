use parking_lot::{Condvar, Mutex};

/// One gate per position of a pass, opened once that position is done.
#[derive(Debug, Default)]
pub struct Gates {
    open: Mutex<Vec<bool>>,
    changed: Condvar,
}

impl Gates {
    /// Closes every gate and resizes to `n` positions.
    pub fn reset(&self, n: usize) {
        let mut open = self.open.lock();
        open.clear();
        open.resize(n, false);
    }

    pub fn open(&self, pos: usize) {
        if let Some(gate) = self.open.lock().get_mut(pos) {
            *gate = true;
        }

        self.changed.notify_all();
    }

    pub fn is_open(&self, pos: usize) -> bool {
        self.open.lock().get(pos).copied().unwrap_or(false)
    }

    /// Blocks until the gate of `pos` is open.
    pub fn wait(&self, pos: usize) {
        let mut open = self.open.lock();
        self.changed
            .wait_while(&mut open, |open| !open.get(pos).copied().unwrap_or(true));
    }

    /// Blocks until every gate before `end` is open.
    pub fn wait_all(&self, end: usize) {
        let mut open = self.open.lock();
        self.changed
            .wait_while(&mut open, |open| open.iter().take(end).any(|gate| !gate));
    }
}
