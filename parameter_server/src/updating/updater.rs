use crate::{
    Result,
    keys::FeaId,
    store::{ValueKind, Values},
};

/// Counters describing the model an updater holds.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ModelStats {
    /// Features with an entry in the model.
    pub features: usize,
    /// Features whose linear weight is nonzero.
    pub nnz_w: usize,
    /// Features holding an embedding.
    pub nnz_v: usize,
}

/// Owns the model state and defines how pushed values change it.
///
/// Implementations resolve the sorted id lists against their sorted key
/// space and must tolerate concurrent calls.
pub trait Updater: Send + Sync {
    /// Reads the values of `kind` for `ids`.
    ///
    /// # Arguments
    /// * `ids` - A strictly increasing id list.
    /// * `kind` - Which values to read.
    ///
    /// # Returns
    /// The values in `ids` order, or `Unsupported` if the kind can't be read.
    fn get(&self, ids: &[FeaId], kind: ValueKind) -> Result<Values>;

    /// Merges pushed values into the model, either entirely or not at all.
    ///
    /// # Arguments
    /// * `ids` - A strictly increasing id list.
    /// * `kind` - What the values represent.
    /// * `values` - The pushed values, already checked against `ids`.
    ///
    /// # Returns
    /// An error describing why the push was rejected.
    fn update(&self, ids: &[FeaId], kind: ValueKind, values: &Values) -> Result<()>;

    /// Returns a snapshot of the model counters.
    fn stats(&self) -> ModelStats;
}
