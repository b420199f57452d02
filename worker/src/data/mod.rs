mod localizer;
mod reader;
mod row_block;
mod synthetic;
mod tile;
mod tile_store;

pub use localizer::{Localized, localize};
pub use reader::{ChunkReader, balanced_range};
pub use row_block::RowBlock;
pub use synthetic::{SyntheticData, SyntheticSpec};
pub use tile::{Partition, Tile};
pub use tile_store::{MemTileStore, TileStore};
