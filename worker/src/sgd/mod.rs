//! Asynchronous minibatch SGD against a store.

mod batch;
mod learner;

pub use batch::Batch;
pub use learner::SgdLearner;
