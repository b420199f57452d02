//! Learners that train sparse factorization machines against a store.
//!
//! Data arrives as CSR `RowBlock`s. The `sgd` learner streams minibatches
//! through pull, predict and push; the `bcd` learner splits the features
//! into blocks and overlaps up to `tau + 1` of them per pass.

pub mod bcd;
pub mod builder;
pub mod config;
pub mod data;
pub mod error;
mod handoff;
pub mod learner;
pub mod loss;
pub mod metrics;
pub mod sgd;

pub use bcd::BcdLearner;
pub use builder::LearnerBuilder;
pub use config::{BcdConfig, LearnerSpec, PrefetchPolicy, SgdConfig, StoreSpec};
pub use error::{Result, WorkerErr};
pub use learner::{EpochReport, Learner, LogReporter, Reporter, StopCriteria};
pub use metrics::Progress;
pub use sgd::SgdLearner;
