use std::sync::Arc;

use tokio::sync::oneshot;

use crate::{
    Result, StoreErr,
    keys::{self, FeaId},
    updating::ModelStats,
};

/// Identifies a push or pull issued by a store, strictly increasing per store.
pub type Timestamp = u64;

/// Invoked once a push was applied, with its outcome.
pub type PushCallback = Box<dyn FnOnce(Result<()>) + Send>;

/// Invoked once a pull was served, with the values or the failure.
pub type PullCallback = Box<dyn FnOnce(Result<Values>) + Send>;

/// The kind of value exchanged for a list of feature ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    FeaCount,
    Gradient,
    Weight,
}

/// The values exchanged for an id list.
///
/// Without `lens` every id owns exactly one value, otherwise `lens[i]` values
/// belong to the i-th id, in id order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Values {
    pub vals: Vec<f32>,
    pub lens: Option<Vec<u32>>,
}

impl Values {
    /// Creates one value per id.
    pub fn scalar(vals: Vec<f32>) -> Self {
        Self { vals, lens: None }
    }

    /// Creates variable length values, `lens[i]` of them for the i-th id.
    pub fn ragged(vals: Vec<f32>, lens: Vec<u32>) -> Self {
        Self {
            vals,
            lens: Some(lens),
        }
    }

    /// Returns the amount of ids these values describe.
    pub fn len(&self) -> usize {
        match &self.lens {
            Some(lens) => lens.len(),
            None => self.vals.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the values of each id in order.
    pub fn slots(&self) -> impl Iterator<Item = &[f32]> + '_ {
        let lens = self.lens.as_deref();
        let mut offset = 0;

        (0..self.len()).map(move |i| {
            let len = lens.map_or(1, |lens| lens[i] as usize);
            let slot = &self.vals[offset..offset + len];
            offset += len;
            slot
        })
    }

    /// Checks that these values describe exactly `nids` ids.
    ///
    /// # Returns
    /// A `SizeMismatch` error if either the length list or the value buffer
    /// has the wrong size.
    pub fn check(&self, nids: usize) -> Result<()> {
        let expected = match &self.lens {
            Some(lens) if lens.len() != nids => {
                return Err(StoreErr::SizeMismatch {
                    expected: nids,
                    got: lens.len(),
                });
            }
            Some(lens) => lens.iter().map(|&l| l as usize).sum(),
            None => nids,
        };

        if self.vals.len() != expected {
            return Err(StoreErr::SizeMismatch {
                expected,
                got: self.vals.len(),
            });
        }

        Ok(())
    }
}

/// The push/pull interface learners use to synchronize with the model.
///
/// Both operations return a timestamp right away. Callbacks run exactly once,
/// before the timestamp counts as completed, and every operation issued
/// after a completed push observes it.
pub trait Store: Send + Sync {
    /// Sends `values` for `ids` to be merged into the model.
    ///
    /// # Arguments
    /// * `ids` - A strictly increasing id list.
    /// * `kind` - What the values represent.
    /// * `values` - The values, matching `ids`.
    /// * `on_complete` - An optional callback invoked once the push was applied.
    ///
    /// # Returns
    /// The push's timestamp, or an error if `ids` or `values` are malformed.
    fn push(
        &self,
        ids: Arc<[FeaId]>,
        kind: ValueKind,
        values: Values,
        on_complete: Option<PushCallback>,
    ) -> Result<Timestamp>;

    /// Requests the values of `kind` held for `ids`.
    ///
    /// # Arguments
    /// * `ids` - A strictly increasing id list.
    /// * `kind` - Which values to fetch.
    /// * `on_complete` - Receives the values, in `ids` order.
    ///
    /// # Returns
    /// The pull's timestamp, or an error if `ids` is malformed.
    fn pull(&self, ids: Arc<[FeaId]>, kind: ValueKind, on_complete: PullCallback)
    -> Result<Timestamp>;

    /// Blocks until every operation with a timestamp up to `ts` completed.
    fn wait(&self, ts: Timestamp);

    /// Returns a snapshot of the model statistics.
    fn stats(&self) -> ModelStats;

    /// Pushes and blocks until the push was applied.
    fn push_wait(&self, ids: Arc<[FeaId]>, kind: ValueKind, values: Values) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let notify: PushCallback = Box::new(move |res| {
            let _ = tx.send(res);
        });

        self.push(ids, kind, values, Some(notify))?;
        rx.blocking_recv().map_err(|_| StoreErr::Disconnected)?
    }

    /// Pulls and blocks until the values arrive.
    fn pull_wait(&self, ids: Arc<[FeaId]>, kind: ValueKind) -> Result<Values> {
        let (tx, rx) = oneshot::channel();
        let notify: PullCallback = Box::new(move |res| {
            let _ = tx.send(res);
        });

        self.pull(ids, kind, notify)?;
        rx.blocking_recv().map_err(|_| StoreErr::Disconnected)?
    }
}

/// Checks an incoming request before it gets a timestamp.
pub(super) fn validate(ids: &[FeaId], values: Option<&Values>) -> Result<()> {
    keys::check_sorted(ids)?;
    if let Some(values) = values {
        values.check(ids.len())?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_values_have_one_slot_per_id() {
        let values = Values::scalar(vec![1., 2., 3.]);
        assert!(values.check(3).is_ok());
        assert!(matches!(
            values.check(2),
            Err(StoreErr::SizeMismatch { expected: 2, got: 3 })
        ));
        assert_eq!(values.slots().collect::<Vec<_>>(), [&[1.][..], &[2.], &[3.]]);
    }

    #[test]
    fn ragged_values_split_by_length() {
        let values = Values::ragged(vec![1., 2., 3.], vec![0, 2, 1]);
        assert!(values.check(3).is_ok());
        assert_eq!(values.slots().collect::<Vec<_>>(), [&[][..], &[1., 2.], &[3.]]);

        let short = Values::ragged(vec![1.], vec![2]);
        assert!(matches!(short.check(1), Err(StoreErr::SizeMismatch { expected: 2, got: 1 })));
        assert!(matches!(short.check(2), Err(StoreErr::SizeMismatch { expected: 2, got: 1 })));
    }

    #[test]
    fn unsorted_ids_are_rejected() {
        assert!(validate(&[1, 1], None).is_err());
        assert!(validate(&[1, 2], Some(&Values::scalar(vec![0.; 2]))).is_ok());
    }
}
