use std::ops::Range;

use super::RowBlock;

/// Splits `total` items into `parts` contiguous ranges and returns the `part`-th.
///
/// Properties:
/// - Ranges are contiguous, disjoint and cover `[0..total)`.
/// - Sizes differ by at most 1 (balanced partition).
pub fn balanced_range(total: usize, part: usize, parts: usize) -> Range<usize> {
    assert!(parts > 0);
    assert!(part < parts);

    let base = total / parts;
    let rem = total % parts;

    let start = part * base + part.min(rem);
    let extra = if part < rem { 1 } else { 0 };
    let end = start + base + extra;

    start..end
}

/// Reads an in-memory block as a sequence of blocks of at most `chunk_rows` rows.
#[derive(Debug, Clone)]
pub struct ChunkReader {
    block: RowBlock,
    chunk_rows: usize,
    cursor: usize,
}

impl ChunkReader {
    pub fn new(block: RowBlock, chunk_rows: usize) -> Self {
        assert!(chunk_rows > 0, "chunk_rows must be > 0");

        Self {
            block,
            chunk_rows,
            cursor: 0,
        }
    }

    #[inline]
    pub fn reset(&mut self) {
        self.cursor = 0;
    }
}

impl Iterator for ChunkReader {
    type Item = RowBlock;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.block.rows() {
            return None;
        }

        let end = (self.cursor + self.chunk_rows).min(self.block.rows());
        let chunk = self.block.slice(self.cursor..end);
        self.cursor = end;
        Some(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balanced_range_sizes() {
        // total 10, parts 3 => sizes 4,3,3
        assert_eq!(balanced_range(10, 0, 3), 0..4);
        assert_eq!(balanced_range(10, 1, 3), 4..7);
        assert_eq!(balanced_range(10, 2, 3), 7..10);
        assert_eq!(balanced_range(2, 2, 3), 2..2);
    }

    #[test]
    fn chunks_respect_size_and_reset() {
        let mut block = RowBlock::new();
        for i in 0..5 {
            block.push_row(i as f32, &[i], None);
        }

        let mut reader = ChunkReader::new(block, 2);
        let sizes: Vec<_> = reader.by_ref().map(|c| c.rows()).collect();
        assert_eq!(sizes, [2, 2, 1]);
        assert!(reader.next().is_none());

        reader.reset();
        assert_eq!(reader.next().unwrap().labels, [0., 1.]);
    }
}
