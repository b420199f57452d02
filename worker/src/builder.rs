use std::{sync::Arc, time::Duration};

use parameter_server::{BcdUpdater, DeferredStore, LocalStore, SgdUpdater, Store, Updater};

use crate::{
    Result,
    bcd::BcdLearner,
    config::{LearnerSpec, StoreSpec},
    data::RowBlock,
    learner::Learner,
    sgd::SgdLearner,
};

pub struct LearnerBuilder;

impl LearnerBuilder {
    /// Builds a learner and the store it trains against.
    ///
    /// # Args
    /// * `spec` - Which learner to build, with its updater's hyper-parameters.
    /// * `store` - How the store completes requests.
    /// * `train` - The training row blocks.
    /// * `val` - The validation row blocks.
    ///
    /// # Returns
    /// The learner and its store, or the first construction error.
    pub fn build<T, V>(
        spec: LearnerSpec,
        store: &StoreSpec,
        train: T,
        val: V,
    ) -> Result<(Box<dyn Learner + Send>, Arc<dyn Store>)>
    where
        T: IntoIterator<Item = RowBlock>,
        V: IntoIterator<Item = RowBlock>,
    {
        match spec {
            LearnerSpec::Sgd { learner, updater } => {
                let dim = updater.v_dim;
                let store = build_store(SgdUpdater::new(updater)?, store)?;
                let learner = SgdLearner::new(learner, dim, Arc::clone(&store), train, val)?;
                Ok((Box::new(learner), store))
            }
            LearnerSpec::Bcd { learner, mut updater } => {
                // the store clips steps to the same regions the learner tracks
                updater.delta_init = learner.delta_init;
                updater.delta_max = learner.delta_max;
                updater.delta_c = learner.delta_c;

                let dim = updater.v_dim;
                let store = build_store(BcdUpdater::new(updater)?, store)?;
                let learner = BcdLearner::new(learner, dim, Arc::clone(&store), train, val)?;
                Ok((Box::new(learner), store))
            }
        }
    }
}

fn build_store<U: Updater + 'static>(updater: U, spec: &StoreSpec) -> Result<Arc<dyn Store>> {
    let store: Arc<dyn Store> = match *spec {
        StoreSpec::Local => Arc::new(LocalStore::new(updater)),
        StoreSpec::Deferred {
            max_latency_ms,
            seed,
        } => Arc::new(DeferredStore::new(
            updater,
            Duration::from_millis(max_latency_ms),
            seed,
        )?),
    };

    Ok(store)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use super::*;
    use crate::{
        config::{BcdConfig, SgdConfig},
        data::{SyntheticData, SyntheticSpec},
        learner::LogReporter,
    };

    fn data() -> SyntheticData {
        SyntheticData::new(SyntheticSpec {
            rows: 200,
            val_rows: 0,
            features: 30,
            ..Default::default()
        })
    }

    #[test]
    fn builds_both_learners() {
        let specs = [
            LearnerSpec::Sgd {
                learner: SgdConfig {
                    max_epochs: 1,
                    ..Default::default()
                },
                updater: Default::default(),
            },
            LearnerSpec::Bcd {
                learner: BcdConfig {
                    max_epochs: 1,
                    tail_feature_filter: 1.,
                    ..Default::default()
                },
                updater: Default::default(),
            },
        ];

        for spec in specs {
            let store_spec = StoreSpec::Deferred {
                max_latency_ms: 1,
                seed: Some(1),
            };
            let (train, val) = ([data().train()], [data().validation()]);
            let (mut learner, store) =
                LearnerBuilder::build(spec, &store_spec, train, val).unwrap();

            let reports = learner.run(&AtomicBool::new(false), &mut LogReporter).unwrap();
            assert_eq!(reports.len(), 1);
            assert_eq!(reports[0].train.count, 200);
            assert!(reports[0].val.is_none());
            assert!(store.stats().features > 0);
        }
    }
}
