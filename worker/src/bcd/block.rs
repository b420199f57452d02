use std::sync::Arc;

use parameter_server::{FeaId, Values};

use crate::{
    Result, WorkerErr,
    loss::{Slots, offsets_of},
};

/// The trust region recurrence `min(max, |dw| * 2 + c)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrustRegion {
    pub max: f32,
    pub c: f32,
}

impl TrustRegion {
    /// Returns the step bound of a slot that just moved by `dw`.
    #[inline]
    pub fn next(&self, dw: f32) -> f32 {
        (dw.abs() * 2. + self.c).min(self.max)
    }
}

/// A contiguous range of the surviving feature ids, with a local mirror of
/// their weights.
///
/// Every feature owns `lens[p]` slots starting at `offsets[p]`: its linear
/// weight, then its embedding once the store allocated one.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureBlock {
    pub index: usize,
    pub ids: Arc<[FeaId]>,
    pub lens: Vec<u32>,
    pub offsets: Vec<usize>,
    pub weights: Vec<f32>,
    /// The trust region of every slot.
    pub delta: Vec<f32>,
}

impl FeatureBlock {
    /// Creates a block of bare linear weights, all zero.
    pub fn new(index: usize, ids: Arc<[FeaId]>, delta_init: f32) -> Self {
        let n = ids.len();

        Self {
            index,
            ids,
            lens: vec![1; n],
            offsets: (0..n).collect(),
            weights: vec![0.; n],
            delta: vec![delta_init; n],
        }
    }

    /// Returns the amount of features.
    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn slots(&self) -> Slots<'_> {
        Slots {
            lens: &self.lens,
            offsets: &self.offsets,
            weights: &self.weights,
        }
    }

    /// Returns the lengths of a gradient push, a `[g, h]` pair per slot.
    pub fn gradient_lens(&self) -> Vec<u32> {
        self.lens.iter().map(|len| 2 * len).collect()
    }

    /// Grows the layout to match the pulled `deltas`.
    ///
    /// A bare weight may gain an embedding of exactly `dim` slots, grown slots
    /// start at zero with a trust region of `delta_init`. Any other change of
    /// layout is an error.
    pub fn fit_layout(&mut self, deltas: &Values, dim: usize, delta_init: f32) -> Result<()> {
        let Some(lens) = &deltas.lens else {
            return self.check(deltas.vals.len(), self.weights.len());
        };

        self.check(lens.len(), self.len())?;
        if *lens == self.lens {
            return Ok(());
        }

        let total: usize = lens.iter().map(|&len| len as usize).sum();
        let mut weights = Vec::with_capacity(total);
        let mut delta = Vec::with_capacity(total);

        for (p, (&old, &new)) in self.lens.iter().zip(lens).enumerate() {
            if new != old {
                let expected = if old == 1 { 1 + dim } else { old as usize };
                self.check(new as usize, expected)?;
            }

            let slot = self.offsets[p]..self.offsets[p] + old as usize;
            weights.extend_from_slice(&self.weights[slot.clone()]);
            delta.extend_from_slice(&self.delta[slot]);

            let grown = new.saturating_sub(old) as usize;
            weights.extend(std::iter::repeat_n(0., grown));
            delta.extend(std::iter::repeat_n(delta_init, grown));
        }

        self.lens.clone_from(lens);
        self.offsets = offsets_of(&self.lens);
        self.weights = weights;
        self.delta = delta;
        Ok(())
    }

    /// Adds `deltas` to the mirrored weights and moves every trust region.
    pub fn apply(&mut self, deltas: &[f32], trust: TrustRegion) {
        for ((w, delta), &dw) in self.weights.iter_mut().zip(&mut self.delta).zip(deltas) {
            *w += dw;
            *delta = trust.next(dw);
        }
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
