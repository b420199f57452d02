//! Losses and the factorization machine kernels built on them.
//!
//! A row's prediction is `sum(w_j x_j) + 1/2 sum_k ((sum v_jk x_j)^2 - sum v_jk^2 x_j^2)`,
//! the per-row cache keeps the inner sums `xv_k = sum v_jk x_j`.

mod csc;
mod csr;
mod logit;

use std::ops::Range;

pub use csc::{apply_delta, tile_gradient};
pub use csr::{batch_gradient, predict};
pub use logit::LogitLoss;

/// A margin loss over labels in `{-1, 1}`, any positive label counting as 1.
pub trait Loss: Send + Sync {
    /// The loss of predicting `pred` for `label`.
    fn loss(&self, label: f32, pred: f32) -> f64;

    /// The derivative of the loss with respect to the prediction.
    fn dual(&self, label: f32, pred: f32) -> f32;

    /// An upper bound of the second derivative over `[pred - reach, pred + reach]`.
    fn curvature(&self, pred: f32, reach: f32) -> f32;
}

/// Per-feature weight slots in ragged layout, the linear weight first.
#[derive(Debug, Clone, Copy)]
pub struct Slots<'a> {
    pub lens: &'a [u32],
    pub offsets: &'a [usize],
    pub weights: &'a [f32],
}

impl<'a> Slots<'a> {
    #[inline]
    pub fn range(&self, p: usize) -> Range<usize> {
        self.offsets[p]..self.offsets[p] + self.lens[p] as usize
    }

    #[inline]
    pub fn slot(&self, p: usize) -> &'a [f32] {
        &self.weights[self.range(p)]
    }
}

/// Returns the start of every slot of a ragged layout.
pub fn offsets_of(lens: &[u32]) -> Vec<usize> {
    lens.iter()
        .scan(0, |offset, &len| {
            let start = *offset;
            *offset += len as usize;
            Some(start)
        })
        .collect()
}

/// Running predictions of a set of rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowCache {
    pub pred: Vec<f32>,
    /// `dim` embedding sums per row.
    pub xv: Vec<f32>,
    pub dim: usize,
}

impl RowCache {
    pub fn new(rows: usize, dim: usize) -> Self {
        Self {
            pred: vec![0.; rows],
            xv: vec![0.; rows * dim],
            dim,
        }
    }

    #[inline]
    pub fn xv(&self, row: usize) -> &[f32] {
        &self.xv[row * self.dim..(row + 1) * self.dim]
    }
}
