use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use log::info;

use crate::{Result, metrics::Progress};

/// What one pass over the data produced.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochReport {
    pub epoch: usize,
    pub train: Progress,
    pub val: Option<Progress>,
    /// The most units of work that were in flight at once.
    pub peak_in_flight: usize,
    pub elapsed: Duration,
}

/// Receives the report of every finished epoch.
pub trait Reporter {
    fn report(&mut self, report: &EpochReport);
}

/// Logs every epoch as a structured `info` line.
#[derive(Debug, Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn report(&mut self, report: &EpochReport) {
        let EpochReport {
            epoch,
            train,
            val,
            peak_in_flight,
            elapsed,
        } = report;

        info!(
            epoch = epoch,
            rows = train.count,
            objv = train.mean_objv(),
            auc = train.mean_auc(),
            accuracy = train.accuracy(),
            new_w = train.new_w,
            new_v = train.new_v,
            peak_in_flight = peak_in_flight,
            elapsed_ms = elapsed.as_millis() as u64;
            "training pass finished"
        );

        if let Some(val) = val {
            info!(
                epoch = epoch,
                rows = val.count,
                objv = val.mean_objv(),
                auc = val.mean_auc(),
                accuracy = val.accuracy();
                "validation pass finished"
            );
        }
    }
}

impl<F: FnMut(&EpochReport)> Reporter for F {
    fn report(&mut self, report: &EpochReport) {
        self(report)
    }
}

/// When to stop training.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopCriteria {
    pub max_epochs: usize,
    /// The relative objective change below which training converged.
    pub stop_rel_objv: f32,
}

impl StopCriteria {
    /// Returns whether the objective moved from `prev` to `curr` by less
    /// than the relative threshold.
    pub fn converged(&self, prev: f64, curr: f64) -> bool {
        if prev == 0. {
            return curr == 0.;
        }

        ((prev - curr) / prev).abs() < self.stop_rel_objv as f64
    }
}

/// A training algorithm that runs one pass over its data at a time.
pub trait Learner {
    /// Runs one pass over the training data, then scores the validation data.
    fn run_epoch(&mut self, epoch: usize) -> Result<EpochReport>;

    fn criteria(&self) -> StopCriteria;

    /// Runs passes until a stop criterion is met.
    ///
    /// `stop` is checked between epochs, an epoch in progress always finishes.
    ///
    /// # Returns
    /// The report of every finished epoch, or the first error.
    fn run(&mut self, stop: &AtomicBool, reporter: &mut dyn Reporter) -> Result<Vec<EpochReport>> {
        let criteria = self.criteria();
        let mut reports: Vec<EpochReport> = Vec::new();

        for epoch in 0..criteria.max_epochs {
            if stop.load(Ordering::Relaxed) {
                info!(epoch = epoch; "stop requested");
                break;
            }

            let report = self.run_epoch(epoch)?;
            reporter.report(&report);

            let prev = reports.last().map(|r| r.train.objv);
            let curr = report.train.objv;
            reports.push(report);

            if prev.is_some_and(|prev| criteria.converged(prev, curr)) {
                info!(epoch = epoch; "objective converged");
                break;
            }
        }

        Ok(reports)
    }
}
