use std::cmp::Ordering;

use crate::loss::Loss;

/// The running totals of one pass over the data.
///
/// Every evaluated fragment of rows contributes its objective, accuracy and,
/// when it holds both labels, its AUC. Fragments evaluated anywhere are
/// combined with `merge`.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Progress {
    pub count: u64,
    pub objv: f64,
    pub auc: f64,
    pub correct: u64,
    /// Fragments that contributed to `auc`.
    pub fragments: u64,
    /// Change of nonzero linear weights over the pass.
    pub new_w: i64,
    /// Change of allocated embeddings over the pass.
    pub new_v: i64,
}

impl Progress {
    /// Scores one fragment of rows.
    ///
    /// # Arguments
    /// * `labels` - The rows' labels, positive or not.
    /// * `preds` - The rows' predictions.
    /// * `loss` - The loss the objective is measured with.
    pub fn evaluate<L: Loss + ?Sized>(labels: &[f32], preds: &[f32], loss: &L) -> Self {
        let objv = labels.iter().zip(preds).map(|(&y, &p)| loss.loss(y, p)).sum();
        let correct = labels
            .iter()
            .zip(preds)
            .filter(|&(&y, &p)| (y > 0.) == (p > 0.))
            .count();

        let (auc, fragments) = match auc(labels, preds) {
            Some(auc) => (auc, 1),
            None => (0., 0),
        };

        Self {
            count: labels.len() as u64,
            objv,
            auc,
            correct: correct as u64,
            fragments,
            ..Default::default()
        }
    }

    pub fn merge(&mut self, other: &Progress) {
        self.count += other.count;
        self.objv += other.objv;
        self.auc += other.auc;
        self.correct += other.correct;
        self.fragments += other.fragments;
        self.new_w += other.new_w;
        self.new_v += other.new_v;
    }

    /// Returns the objective per row.
    pub fn mean_objv(&self) -> f64 {
        match self.count {
            0 => 0.,
            n => self.objv / n as f64,
        }
    }

    /// Returns the average AUC of the scored fragments.
    pub fn mean_auc(&self) -> f64 {
        match self.fragments {
            0 => 0.,
            n => self.auc / n as f64,
        }
    }

    pub fn accuracy(&self) -> f64 {
        match self.count {
            0 => 0.,
            n => self.correct as f64 / n as f64,
        }
    }
}

/// The area under the ROC curve, `None` unless both labels are present.
fn auc(labels: &[f32], preds: &[f32]) -> Option<f64> {
    let mut order: Vec<usize> = (0..labels.len()).collect();
    order.sort_unstable_by(|&a, &b| preds[a].partial_cmp(&preds[b]).unwrap_or(Ordering::Equal));

    let positives = labels.iter().filter(|&&y| y > 0.).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }

    // ties share their average rank
    let mut rank_sum = 0.;
    let mut i = 0;
    while i < order.len() {
        let mut j = i + 1;
        while j < order.len() && preds[order[j]] == preds[order[i]] {
            j += 1;
        }

        let rank = (i + j + 1) as f64 / 2.;
        let tied_positives = order[i..j].iter().filter(|&&r| labels[r] > 0.).count();
        rank_sum += rank * tied_positives as f64;
        i = j;
    }

    let (p, n) = (positives as f64, negatives as f64);
    Some((rank_sum - p * (p + 1.) / 2.) / (p * n))
}
