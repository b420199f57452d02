use super::{Loss, RowCache, Slots};
use crate::data::Tile;

/// Accumulates the `[g, h]` pair of every slot whose feature is in `tile`.
///
/// `delta` bounds how far each slot may move, the curvature of a row is
/// bounded over the predictions that move can reach. `out` holds two values
/// per slot of `slots`.
pub fn tile_gradient<L: Loss + ?Sized>(
    tile: &Tile,
    labels: &[f32],
    cache: &RowCache,
    slots: Slots<'_>,
    delta: &[f32],
    loss: &L,
    out: &mut [f32],
) {
    for p in 0..slots.lens.len() {
        let Some(c) = tile.column_of(p) else { continue };
        let range = slots.range(p);
        let weights = &slots.weights[range.clone()];
        let delta = &delta[range.clone()];
        let out = &mut out[2 * range.start..2 * range.end];

        for k in tile.col(c) {
            let r = tile.rows[k] as usize;
            let x = tile.value(k);
            let pred = cache.pred[r];
            let dual = loss.dual(labels[r], pred);

            out[0] += dual * x;
            out[1] += loss.curvature(pred, delta[0] * x.abs()) * x * x;

            let xv = cache.xv(r);
            for j in 1..weights.len() {
                let grad = x * (xv[j - 1] - weights[j] * x);
                out[2 * j] += dual * grad;
                out[2 * j + 1] += loss.curvature(pred, delta[j] * grad.abs()) * grad * grad;
            }
        }
    }
}

/// Moves the predictions of the rows in `tile` by the change `deltas` makes
/// to the weights in `slots`.
///
/// `slots` must hold the weights before the change, `deltas` follows its layout.
pub fn apply_delta(tile: &Tile, cache: &mut RowCache, slots: Slots<'_>, deltas: &[f32]) {
    let dim = cache.dim;

    for p in 0..slots.lens.len() {
        let Some(c) = tile.column_of(p) else { continue };
        let range = slots.range(p);
        let Some((&dw, dv)) = deltas[range.clone()].split_first() else {
            continue;
        };
        let v = &slots.weights[range.start + 1..range.end];

        for k in tile.col(c) {
            let r = tile.rows[k] as usize;
            let x = tile.value(k);
            let xv = &mut cache.xv[r * dim..(r + 1) * dim];

            let mut change = dw * x;
            for ((s, &d), &v) in xv.iter_mut().zip(dv).zip(v) {
                change += d * x * (*s - v * x);
                *s += d * x;
            }

            cache.pred[r] += change;
        }
    }
}
