use parameter_server::{BcdUpdaterConfig, SgdUpdaterConfig};
use serde::{Deserialize, Serialize};

use crate::{Result, WorkerErr};

/// Which tiles the block pipeline builds ahead of time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrefetchPolicy {
    /// Every tile of the pass at its start, kept across passes.
    #[default]
    Eager,
    /// Only the tiles of the next `tau + 1` blocks, dropped once a block is done.
    Windowed,
}

/// Execution bounds of the asynchronous minibatch learner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SgdConfig {
    pub max_epochs: usize,
    /// Stop once the training objective changes by less than this ratio.
    pub stop_rel_objv: f32,
    /// Rows per minibatch.
    pub batch_size: usize,
    /// Minibatches allowed in flight at once.
    pub max_concurrency: usize,
    /// Shuffle the minibatch order every epoch.
    pub shuffle: bool,
    pub seed: Option<u64>,
}

impl Default for SgdConfig {
    fn default() -> Self {
        Self {
            max_epochs: 20,
            stop_rel_objv: 1e-5,
            batch_size: 100,
            max_concurrency: 2,
            shuffle: true,
            seed: None,
        }
    }
}

impl SgdConfig {
    /// Checks every bound the learner relies on.
    pub fn validate(&self) -> Result<()> {
        positive("batch_size", self.batch_size)?;
        positive("max_concurrency", self.max_concurrency)
    }
}

/// Execution bounds of the block coordinate descent learner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BcdConfig {
    pub max_epochs: usize,
    /// Stop once the training objective changes by less than this ratio.
    pub stop_rel_objv: f32,
    /// Blocks allowed to run ahead of the oldest unfinished one.
    pub tau: usize,
    /// Feature blocks the surviving features are split into.
    pub num_blocks: usize,
    /// Rows per data partition.
    pub rows_per_part: usize,
    /// Features seen fewer times than this are dropped.
    pub tail_feature_filter: f32,
    /// Initial trust region of every feature.
    pub delta_init: f32,
    /// Upper bound of the trust region.
    pub delta_max: f32,
    /// Slack added to the trust region after every update.
    pub delta_c: f32,
    pub prefetch: PrefetchPolicy,
    /// Shuffle the block order every pass.
    pub shuffle_blocks: bool,
    pub seed: Option<u64>,
}

impl Default for BcdConfig {
    fn default() -> Self {
        Self {
            max_epochs: 20,
            stop_rel_objv: 1e-5,
            tau: 0,
            num_blocks: 4,
            rows_per_part: 1000,
            tail_feature_filter: 4.,
            delta_init: 1.,
            delta_max: 5.,
            delta_c: 0.1,
            prefetch: PrefetchPolicy::Eager,
            shuffle_blocks: false,
            seed: None,
        }
    }
}

impl BcdConfig {
    /// Checks every bound the learner relies on.
    pub fn validate(&self) -> Result<()> {
        positive("num_blocks", self.num_blocks)?;
        positive("rows_per_part", self.rows_per_part)?;

        if !(self.delta_max > 0. && self.delta_init > 0.) {
            return Err(WorkerErr::InvalidConfig {
                field: "delta_init/delta_max",
                reason: "must be positive".into(),
            });
        }

        Ok(())
    }
}

/// How the store completes requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreSpec {
    /// Inline, on the calling thread.
    #[default]
    Local,
    /// Later, after a random delay of up to `max_latency_ms`.
    Deferred {
        #[serde(default)]
        max_latency_ms: u64,
        #[serde(default)]
        seed: Option<u64>,
    },
}

/// The learner to train with, plus the updater it pairs with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearnerSpec {
    Sgd {
        #[serde(default)]
        learner: SgdConfig,
        #[serde(default)]
        updater: SgdUpdaterConfig,
    },
    Bcd {
        #[serde(default)]
        learner: BcdConfig,
        #[serde(default)]
        updater: BcdUpdaterConfig,
    },
}

impl LearnerSpec {
    /// Returns how many rows every block read from the data source should hold.
    pub fn chunk_rows(&self) -> usize {
        match self {
            LearnerSpec::Sgd { learner, .. } => learner.batch_size,
            LearnerSpec::Bcd { learner, .. } => learner.rows_per_part,
        }
    }
}

fn positive(field: &'static str, value: usize) -> Result<()> {
    if value == 0 {
        return Err(WorkerErr::InvalidConfig {
            field,
            reason: "must be greater than zero".into(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let spec: LearnerSpec = serde_json::from_str(r#"{"bcd":{"learner":{"tau":2}}}"#).unwrap();
        let LearnerSpec::Bcd { learner, updater } = spec else {
            panic!("expected a bcd spec");
        };

        assert_eq!(learner.tau, 2);
        assert_eq!(learner.num_blocks, BcdConfig::default().num_blocks);
        assert_eq!(updater, BcdUpdaterConfig::default());
    }

    #[test]
    fn store_spec_variants() {
        let spec: StoreSpec = serde_json::from_str(r#"{"deferred":{"max_latency_ms":5}}"#).unwrap();
        assert_eq!(
            spec,
            StoreSpec::Deferred {
                max_latency_ms: 5,
                seed: None
            }
        );

        let spec: StoreSpec = serde_json::from_str(r#""local""#).unwrap();
        assert_eq!(spec, StoreSpec::Local);
    }

    #[test]
    fn prefetch_policy_is_snake_case() {
        let policy: PrefetchPolicy = serde_json::from_str(r#""windowed""#).unwrap();
        assert_eq!(policy, PrefetchPolicy::Windowed);
    }

    #[test]
    fn zero_sizes_are_rejected() {
        let config = SgdConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(WorkerErr::InvalidConfig { field: "batch_size", .. })
        ));

        let config = BcdConfig {
            delta_max: 0.,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(BcdConfig::default().validate().is_ok());
    }
}
