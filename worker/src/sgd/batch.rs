use std::sync::Arc;

use parameter_server::{FeaId, Values};

use crate::{
    Result, WorkerErr,
    data::{Localized, RowBlock, localize},
    loss::{self, Loss, RowCache, Slots, offsets_of},
    metrics::Progress,
};

/// A minibatch with its features remapped to the batch's own vocabulary.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub index: usize,
    pub ids: Arc<[FeaId]>,
    pub counts: Vec<f32>,
    pub rows: RowBlock<u32>,
}

impl Batch {
    pub fn new(index: usize, block: RowBlock) -> Self {
        let Localized { ids, counts, rows } = localize(block);

        Self {
            index,
            ids: ids.into(),
            counts,
            rows,
        }
    }

    /// Predicts the batch from its pulled weights.
    ///
    /// # Arguments
    /// * `weights` - The pulled weights, an empty slot for unknown features.
    /// * `dim` - The embedding dimension.
    /// * `loss` - The loss to score and differentiate.
    /// * `train` - Whether to compute the gradient.
    ///
    /// # Returns
    /// The batch's score and its gradient in the layout of `weights`, or
    /// `LayoutMismatch` if a slot is neither empty, bare nor complete.
    pub fn process(
        &self,
        weights: &Values,
        dim: usize,
        loss: &dyn Loss,
        train: bool,
    ) -> Result<(Progress, Option<Values>)> {
        let lens = match &weights.lens {
            Some(lens) => lens.clone(),
            None => vec![1; weights.vals.len()],
        };

        self.check(lens.len(), self.ids.len())?;
        if let Some(&bad) = lens.iter().find(|&&len| len > 1 && len as usize != 1 + dim) {
            return Err(WorkerErr::LayoutMismatch {
                block: self.index,
                got: bad as usize,
                expected: 1 + dim,
            });
        }

        let offsets = offsets_of(&lens);
        let slots = Slots {
            lens: &lens,
            offsets: &offsets,
            weights: &weights.vals,
        };

        let mut cache = RowCache::new(self.rows.rows(), dim);
        loss::predict(&self.rows, slots, &mut cache);
        let progress = Progress::evaluate(&self.rows.labels, &cache.pred, loss);

        let grad = train.then(|| {
            let grad = loss::batch_gradient(&self.rows, slots, &cache, loss);
            Values::ragged(grad, lens.clone())
        });

        Ok((progress, grad))
    }

    fn check(&self, got: usize, expected: usize) -> Result<()> {
        if got != expected {
            return Err(WorkerErr::LayoutMismatch {
                block: self.index,
                got,
                expected,
            });
        }

        Ok(())
    }
}
