use std::sync::Arc;

use parking_lot::Mutex;

/// A value shared between a store callback and the code issuing it.
///
/// Whichever side runs first takes the value, so it's neither lost when the
/// issue fails nor used twice when the callback fires inline.
pub(crate) struct Handoff<T>(Arc<Mutex<Option<T>>>);

impl<T> Handoff<T> {
    pub fn new(value: T) -> Self {
        Self(Arc::new(Mutex::new(Some(value))))
    }

    pub fn share(&self) -> Self {
        Self(Arc::clone(&self.0))
    }

    pub fn take(&self) -> Option<T> {
        self.0.lock().take()
    }
}
