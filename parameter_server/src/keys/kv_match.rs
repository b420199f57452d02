use super::{AssignOp, Element, FeaId};
use crate::{Result, StoreErr};

/// Destination ranges at or below this many keys are merged sequentially.
pub const DEFAULT_GRAIN: usize = 1 << 12;

/// Past this size ratio the longer side is binary searched instead of walked.
const GALLOP_RATIO: usize = 8;

/// Combines the values of every key present in both `src_keys` and
/// `dst_keys` into the destination, `width` values per key.
///
/// Both key lists must be strictly increasing. Destination slots without a
/// matching source key are left untouched. Ranges wider than `grain`
/// destination keys are split in halves processed concurrently.
///
/// # Returns
/// The number of matched keys, or a `SizeMismatch` error if a value buffer
/// isn't `width` times as long as its key list.
pub fn kv_match<V: Element>(
    src_keys: &[FeaId],
    src_vals: &[V],
    dst_keys: &[FeaId],
    dst_vals: &mut [V],
    width: usize,
    op: AssignOp,
    grain: usize,
) -> Result<usize> {
    check_len(src_keys.len() * width, src_vals.len())?;
    check_len(dst_keys.len() * width, dst_vals.len())?;

    let (Some(&first), Some(&last)) = (dst_keys.first(), dst_keys.last()) else {
        return Ok(0);
    };

    if width == 0 {
        return Ok(0);
    }

    let lo = src_keys.partition_point(|&k| k < first);
    let hi = src_keys.partition_point(|&k| k <= last);
    let src = Fixed {
        keys: &src_keys[lo..hi],
        vals: &src_vals[lo * width..hi * width],
    };

    Ok(match_fixed(src, dst_keys, dst_vals, width, op, grain.max(1)))
}

/// Like `kv_match` for variable-length values, writing into a destination
/// whose per-key lengths are already known.
///
/// A matched source key with a zero length leaves its destination slot
/// untouched, any other length must equal the destination's.
///
/// # Returns
/// The number of matched keys, a `SizeMismatch` error if a length list
/// doesn't add up to its value buffer, or a `LengthMismatch` error naming the
/// first offending key.
#[allow(clippy::too_many_arguments)]
pub fn kv_match_ragged_into<V: Element>(
    src_keys: &[FeaId],
    src_vals: &[V],
    src_lens: &[u32],
    dst_keys: &[FeaId],
    dst_vals: &mut [V],
    dst_lens: &[u32],
    op: AssignOp,
    grain: usize,
) -> Result<usize> {
    let src_offsets = offsets(src_keys.len(), src_lens, src_vals.len())?;
    let dst_offsets = offsets(dst_keys.len(), dst_lens, dst_vals.len())?;

    if src_keys.is_empty() || dst_keys.is_empty() {
        return Ok(0);
    }

    let src = RaggedRef {
        keys: src_keys,
        offsets: &src_offsets,
        vals: src_vals,
    };

    let dst = RaggedMut {
        keys: dst_keys,
        offsets: &dst_offsets,
        vals: dst_vals,
    };

    match_ragged(src, dst, op, grain.max(1))
}

/// Gathers variable-length values for `dst_keys` into freshly allocated
/// buffers. Keys missing from the source get a zero length.
///
/// # Returns
/// The destination values and lengths plus the number of matched keys.
pub fn kv_match_ragged<V: Element>(
    src_keys: &[FeaId],
    src_vals: &[V],
    src_lens: &[u32],
    dst_keys: &[FeaId],
    op: AssignOp,
    grain: usize,
) -> Result<(Vec<V>, Vec<u32>, usize)> {
    let mut dst_lens = vec![0u32; dst_keys.len()];
    kv_match(src_keys, src_lens, dst_keys, &mut dst_lens, 1, AssignOp::Assign, grain)?;

    let total = dst_lens.iter().map(|&l| l as usize).sum();
    let mut dst_vals = vec![V::default(); total];
    let matched = kv_match_ragged_into(
        src_keys,
        src_vals,
        src_lens,
        dst_keys,
        &mut dst_vals,
        &dst_lens,
        op,
        grain,
    )?;

    Ok((dst_vals, dst_lens, matched))
}

/// Finds the position of every id inside the sorted key `space`.
pub fn find_positions(space: &[FeaId], ids: &[FeaId], grain: usize) -> Vec<Option<usize>> {
    let mut positions = vec![None; ids.len()];
    if !space.is_empty() && !ids.is_empty() {
        match_positions(space, 0, ids, &mut positions, grain.max(1));
    }

    positions
}

fn check_len(expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(StoreErr::SizeMismatch { expected, got });
    }

    Ok(())
}

fn offsets(nkeys: usize, lens: &[u32], nvals: usize) -> Result<Vec<usize>> {
    check_len(nkeys, lens.len())?;

    let mut offsets = Vec::with_capacity(nkeys + 1);
    let mut total = 0;
    offsets.push(total);
    for &len in lens {
        total += len as usize;
        offsets.push(total);
    }

    check_len(total, nvals)?;
    Ok(offsets)
}

/// Calls `f(i, j)` for every `a[i] == b[j]` in increasing key order.
fn for_each_match(a: &[FeaId], b: &[FeaId], mut f: impl FnMut(usize, usize)) {
    if a.len() > GALLOP_RATIO * b.len() {
        let mut i = 0;
        for (j, key) in b.iter().enumerate() {
            i += a[i..].partition_point(|k| k < key);
            if i == a.len() {
                break;
            }
            if a[i] == *key {
                f(i, j);
                i += 1;
            }
        }
        return;
    }

    if b.len() > GALLOP_RATIO * a.len() {
        let mut j = 0;
        for (i, key) in a.iter().enumerate() {
            j += b[j..].partition_point(|k| k < key);
            if j == b.len() {
                break;
            }
            if b[j] == *key {
                f(i, j);
                j += 1;
            }
        }
        return;
    }

    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                f(i, j);
                i += 1;
                j += 1;
            }
        }
    }
}

struct Fixed<'a, V> {
    keys: &'a [FeaId],
    vals: &'a [V],
}

fn match_fixed<V: Element>(
    src: Fixed<'_, V>,
    dst_keys: &[FeaId],
    dst_vals: &mut [V],
    width: usize,
    op: AssignOp,
    grain: usize,
) -> usize {
    if dst_keys.len() <= grain || src.keys.is_empty() {
        let mut matched = 0;
        for_each_match(src.keys, dst_keys, |i, j| {
            let from = &src.vals[i * width..(i + 1) * width];
            let into = &mut dst_vals[j * width..(j + 1) * width];
            into.iter_mut().zip(from).for_each(|(d, &s)| op.apply(d, s));
            matched += 1;
        });
        return matched;
    }

    let mid = dst_keys.len() / 2;
    let split = src.keys.partition_point(|&k| k < dst_keys[mid]);

    let (src_lkeys, src_rkeys) = src.keys.split_at(split);
    let (src_lvals, src_rvals) = src.vals.split_at(split * width);
    let (dst_lkeys, dst_rkeys) = dst_keys.split_at(mid);
    let (dst_lvals, dst_rvals) = dst_vals.split_at_mut(mid * width);

    let left = Fixed {
        keys: src_lkeys,
        vals: src_lvals,
    };

    let right = Fixed {
        keys: src_rkeys,
        vals: src_rvals,
    };

    let (l, r) = rayon::join(
        || match_fixed(left, dst_lkeys, dst_lvals, width, op, grain),
        || match_fixed(right, dst_rkeys, dst_rvals, width, op, grain),
    );

    l + r
}

/// A ragged key range; `offsets` has one more entry than `keys` and is
/// absolute, `vals` starts at `offsets[0]`.
struct RaggedRef<'a, V> {
    keys: &'a [FeaId],
    offsets: &'a [usize],
    vals: &'a [V],
}

impl<'a, V> RaggedRef<'a, V> {
    fn slot(&self, i: usize) -> &'a [V] {
        let base = self.offsets[0];
        &self.vals[self.offsets[i] - base..self.offsets[i + 1] - base]
    }

    fn split_at(self, k: usize) -> (Self, Self) {
        let (lvals, rvals) = self.vals.split_at(self.offsets[k] - self.offsets[0]);
        let left = Self {
            keys: &self.keys[..k],
            offsets: &self.offsets[..=k],
            vals: lvals,
        };
        let right = Self {
            keys: &self.keys[k..],
            offsets: &self.offsets[k..],
            vals: rvals,
        };
        (left, right)
    }
}

struct RaggedMut<'a, V> {
    keys: &'a [FeaId],
    offsets: &'a [usize],
    vals: &'a mut [V],
}

impl<'a, V> RaggedMut<'a, V> {
    fn len_of(&self, j: usize) -> usize {
        self.offsets[j + 1] - self.offsets[j]
    }

    fn slot_mut(&mut self, j: usize) -> &mut [V] {
        let base = self.offsets[0];
        &mut self.vals[self.offsets[j] - base..self.offsets[j + 1] - base]
    }

    fn split_at(self, k: usize) -> (Self, Self) {
        let (lvals, rvals) = self.vals.split_at_mut(self.offsets[k] - self.offsets[0]);
        let left = Self {
            keys: &self.keys[..k],
            offsets: &self.offsets[..=k],
            vals: lvals,
        };
        let right = Self {
            keys: &self.keys[k..],
            offsets: &self.offsets[k..],
            vals: rvals,
        };
        (left, right)
    }
}

fn match_ragged<V: Element>(
    src: RaggedRef<'_, V>,
    mut dst: RaggedMut<'_, V>,
    op: AssignOp,
    grain: usize,
) -> Result<usize> {
    if dst.keys.len() <= grain || src.keys.is_empty() {
        let mut matched = 0;
        let mut mismatch = None;
        let dst_keys = dst.keys;

        for_each_match(src.keys, dst_keys, |i, j| {
            if mismatch.is_some() {
                return;
            }

            matched += 1;
            let from = src.slot(i);
            if from.is_empty() {
                return;
            }

            let expected = dst.len_of(j);
            if from.len() != expected {
                mismatch = Some(StoreErr::LengthMismatch {
                    id: dst_keys[j],
                    expected,
                    got: from.len(),
                });
                return;
            }

            let into = dst.slot_mut(j);
            into.iter_mut().zip(from).for_each(|(d, &s)| op.apply(d, s));
        });

        return match mismatch {
            Some(e) => Err(e),
            None => Ok(matched),
        };
    }

    let mid = dst.keys.len() / 2;
    let split = src.keys.partition_point(|&k| k < dst.keys[mid]);

    let (src_left, src_right) = src.split_at(split);
    let (dst_left, dst_right) = dst.split_at(mid);

    let (l, r) = rayon::join(
        || match_ragged(src_left, dst_left, op, grain),
        || match_ragged(src_right, dst_right, op, grain),
    );

    Ok(l? + r?)
}

fn match_positions(
    space: &[FeaId],
    base: usize,
    ids: &[FeaId],
    positions: &mut [Option<usize>],
    grain: usize,
) {
    if ids.len() <= grain || space.is_empty() {
        for_each_match(space, ids, |i, j| positions[j] = Some(base + i));
        return;
    }

    let mid = ids.len() / 2;
    let split = space.partition_point(|&k| k < ids[mid]);

    let (lspace, rspace) = space.split_at(split);
    let (lids, rids) = ids.split_at(mid);
    let (lpos, rpos) = positions.split_at_mut(mid);

    rayon::join(
        || match_positions(lspace, base, lids, lpos, grain),
        || match_positions(rspace, base + split, rids, rpos, grain),
    );
}
