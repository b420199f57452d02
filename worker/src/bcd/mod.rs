//! Block coordinate descent over feature blocks.
//!
//! The surviving features are split into contiguous blocks and every pass
//! runs each block through gradient, push, pull and patch stages, overlapping
//! up to `tau + 1` blocks.

mod block;
mod gate;
mod learner;
mod partition;
mod pipeline;
mod schedule;

pub use block::{FeatureBlock, TrustRegion};
pub use gate::Gates;
pub use learner::BcdLearner;
pub use partition::{Layout, partition};
pub use pipeline::{BlockJob, BlockOutcome, Context, Evaluation, PartData, Stage, run_block};
pub use schedule::Schedule;
