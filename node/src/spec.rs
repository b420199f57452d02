use serde::{Deserialize, Serialize};
use worker::{BcdConfig, LearnerSpec, StoreSpec, data::SyntheticSpec};

/// Everything a training run is configured with, loaded from one JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSpec {
    pub store: StoreSpec,
    pub learner: LearnerSpec,
    pub data: SyntheticSpec,
}

impl Default for NodeSpec {
    fn default() -> Self {
        Self {
            store: StoreSpec::default(),
            learner: LearnerSpec::Bcd {
                learner: BcdConfig::default(),
                updater: Default::default(),
            },
            data: SyntheticSpec::default(),
        }
    }
}
