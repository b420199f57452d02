//! Key-value synchronization between learners and the model.
//!
//! Workers `push` deltas (feature counts, gradients) and `pull` values (weights)
//! for sorted feature-id sets through a `Store`; a pluggable `Updater` owns the
//! model and resolves every id list against its sorted key space with a
//! parallel merge-join.

pub mod error;
pub mod initialization;
pub mod keys;
pub mod storage;
pub mod store;
pub mod updating;

pub use error::{Result, StoreErr};
pub use keys::FeaId;
pub use store::{
    DeferredStore, LocalStore, PullCallback, PushCallback, Store, Timestamp, ValueKind, Values,
};
pub use updating::{BcdUpdater, BcdUpdaterConfig, ModelStats, SgdUpdater, SgdUpdaterConfig, Updater};
