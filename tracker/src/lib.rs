//! Bounded-concurrency job dispatch.
//!
//! A `Tracker` owns a FIFO of jobs and a dedicated consumer thread that hands
//! them one at a time to a consumer function. Every dispatched job carries a
//! `Completion` handle, the job only stops counting towards `num_remains` once
//! that handle is completed, which may happen inline or later from any thread.

mod error;
mod tracker;

pub use error::{Result, TrackerErr};
pub use tracker::{Completion, Tracker};
