mod table;

pub use table::KeyedTable;
