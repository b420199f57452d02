use super::{Loss, RowCache, Slots};
use crate::data::RowBlock;

/// Predicts every row of `rows` from the weights of its local features.
///
/// Features with an empty slot contribute nothing.
pub fn predict(rows: &RowBlock<u32>, slots: Slots<'_>, cache: &mut RowCache) {
    let dim = cache.dim;

    for r in 0..rows.rows() {
        let xv = &mut cache.xv[r * dim..(r + 1) * dim];
        xv.fill(0.);

        let mut pred = 0.;
        let mut squares = 0.;
        for k in rows.row(r) {
            let Some((&w, v)) = slots.slot(rows.index[k] as usize).split_first() else {
                continue;
            };

            let x = rows.value(k);
            pred += w * x;
            for (acc, &v) in xv.iter_mut().zip(v) {
                *acc += v * x;
                squares += v * v * x * x;
            }
        }

        let sums: f32 = xv.iter().map(|s| s * s).sum();
        cache.pred[r] = pred + 0.5 * (sums - squares);
    }
}

/// Returns the loss gradient of every slot, in the layout of `slots`.
pub fn batch_gradient<L: Loss + ?Sized>(
    rows: &RowBlock<u32>,
    slots: Slots<'_>,
    cache: &RowCache,
    loss: &L,
) -> Vec<f32> {
    let mut grad = vec![0.; slots.weights.len()];

    for r in 0..rows.rows() {
        let dual = loss.dual(rows.labels[r], cache.pred[r]);
        let xv = cache.xv(r);

        for k in rows.row(r) {
            let p = rows.index[k] as usize;
            let range = slots.range(p);
            if range.is_empty() {
                continue;
            }

            let x = rows.value(k);
            let weights = &slots.weights[range.clone()];
            let grad = &mut grad[range];
            grad[0] += dual * x;

            for ((g, &v), &s) in grad[1..].iter_mut().zip(&weights[1..]).zip(xv) {
                *g += dual * x * (s - v * x);
            }
        }
    }

    grad
}
