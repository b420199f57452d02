use std::{collections::HashMap, io, sync::Arc};

use log::trace;
use parameter_server::FeaId;
use parking_lot::{Condvar, Mutex};
use rayon::{ThreadPool, ThreadPoolBuilder};

use super::{Partition, Tile};
use crate::Result;

/// Serves the tile of every (partition, block) pair.
pub trait TileStore: Send + Sync {
    /// Starts building a tile in the background, a no-op if it's known already.
    fn prefetch(&self, part: usize, block: usize);

    /// Returns a tile, blocking until it's built.
    fn fetch(&self, part: usize, block: usize) -> Arc<Tile>;

    /// Drops a cached tile.
    fn evict(&self, part: usize, block: usize);
}

enum Slot {
    Pending,
    Ready(Arc<Tile>),
}

struct Inner {
    parts: Vec<Arc<Partition>>,
    blocks: Vec<Arc<[FeaId]>>,
    cache: Mutex<HashMap<(usize, usize), Slot>>,
    ready: Condvar,
}

impl Inner {
    fn build(&self, part: usize, block: usize) -> Arc<Tile> {
        let tile = Arc::new(Tile::build(&self.parts[part], &self.blocks[block]));
        self.cache.lock().insert((part, block), Slot::Ready(Arc::clone(&tile)));
        self.ready.notify_all();

        trace!(part = part, block = block, cols = tile.cols(); "tile built");
        tile
    }
}

/// Builds tiles from in-memory partitions and caches them.
///
/// Prefetched tiles are built on a dedicated pool so that fetching from the
/// global rayon pool never waits on work queued behind itself.
pub struct MemTileStore {
    inner: Arc<Inner>,
    pool: ThreadPool,
}

impl MemTileStore {
    /// Creates a new `MemTileStore`.
    ///
    /// # Arguments
    /// * `parts` - The row partitions, indexed by `part`.
    /// * `blocks` - The sorted feature ids of every block, indexed by `block`.
    /// * `threads` - The size of the prefetch pool.
    ///
    /// # Returns
    /// An error if the prefetch pool can't be started.
    pub fn new(
        parts: Vec<Arc<Partition>>,
        blocks: Vec<Arc<[FeaId]>>,
        threads: usize,
    ) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("tile-prefetch-{i}"))
            .build()
            .map_err(io::Error::other)?;

        let inner = Inner {
            parts,
            blocks,
            cache: Mutex::new(HashMap::new()),
            ready: Condvar::new(),
        };

        Ok(Self {
            inner: Arc::new(inner),
            pool,
        })
    }

    /// Returns the amount of cached or pending tiles.
    pub fn cached(&self) -> usize {
        self.inner.cache.lock().len()
    }
}

impl TileStore for MemTileStore {
    fn prefetch(&self, part: usize, block: usize) {
        {
            let mut cache = self.inner.cache.lock();
            if cache.contains_key(&(part, block)) {
                return;
            }
            cache.insert((part, block), Slot::Pending);
        }

        let inner = Arc::clone(&self.inner);
        self.pool.spawn(move || {
            inner.build(part, block);
        });
    }

    fn fetch(&self, part: usize, block: usize) -> Arc<Tile> {
        let mut cache = self.inner.cache.lock();
        loop {
            match cache.get(&(part, block)) {
                Some(Slot::Ready(tile)) => return Arc::clone(tile),
                Some(Slot::Pending) => self.inner.ready.wait(&mut cache),
                None => break,
            }
        }

        cache.insert((part, block), Slot::Pending);
        drop(cache);
        self.inner.build(part, block)
    }

    fn evict(&self, part: usize, block: usize) {
        let mut cache = self.inner.cache.lock();
        if let Some(Slot::Ready(_)) = cache.get(&(part, block)) {
            cache.remove(&(part, block));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{RowBlock, localize};

    fn store() -> MemTileStore {
        let mut block = RowBlock::new();
        block.push_row(1., &[1, 2], None);
        block.push_row(-1., &[2, 3], None);

        let parts = vec![Arc::new(Partition::new(localize(block)))];
        let blocks: Vec<Arc<[FeaId]>> = vec![Arc::from(vec![1, 2]), Arc::from(vec![3])];
        MemTileStore::new(parts, blocks, 2).unwrap()
    }

    #[test]
    fn prefetched_and_inline_tiles_match() {
        let store = store();
        store.prefetch(0, 0);
        let prefetched = store.fetch(0, 0);

        let expected = Tile::build(&store.inner.parts[0], &store.inner.blocks[0]);
        assert_eq!(*prefetched, expected);
        assert_eq!(*store.fetch(0, 1), Tile::build(&store.inner.parts[0], &store.inner.blocks[1]));
        assert_eq!(store.cached(), 2);
    }

    #[test]
    fn fetch_reuses_the_cached_tile() {
        let store = store();
        let a = store.fetch(0, 1);
        let b = store.fetch(0, 1);
        assert!(Arc::ptr_eq(&a, &b));

        store.evict(0, 1);
        assert_eq!(store.cached(), 0);
        assert!(!Arc::ptr_eq(&a, &store.fetch(0, 1)));
    }
}
