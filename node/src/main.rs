mod spec;

use std::{
    env, fs, io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use log::{info, warn};
use tokio::{signal, task};
use worker::{
    EpochReport, LearnerBuilder, LogReporter, Reporter,
    data::{ChunkReader, SyntheticData},
};

use crate::spec::NodeSpec;

/// Logs every epoch and remembers the last one.
#[derive(Default)]
struct Summary {
    last: Option<EpochReport>,
}

impl Reporter for Summary {
    fn report(&mut self, report: &EpochReport) {
        LogReporter.report(report);
        self.last = Some(report.clone());
    }
}

fn load_spec() -> io::Result<NodeSpec> {
    let Some(path) = env::args().nth(1) else {
        info!("no config given, training with the defaults");
        return Ok(NodeSpec::default());
    };

    let raw = fs::read_to_string(&path)?;
    let spec = serde_json::from_str(&raw).map_err(io::Error::other)?;
    info!(path = path.as_str(); "config loaded");
    Ok(spec)
}

fn train(spec: NodeSpec, stop: &AtomicBool) -> io::Result<Summary> {
    let data = SyntheticData::new(spec.data);
    let rows = spec.learner.chunk_rows();
    let train = ChunkReader::new(data.train(), rows);
    let val = ChunkReader::new(data.validation(), rows);

    let (mut learner, store) =
        LearnerBuilder::build(spec.learner, &spec.store, train, val).map_err(io::Error::other)?;

    let mut summary = Summary::default();
    let reports = learner.run(stop, &mut summary).map_err(io::Error::other)?;

    let stats = store.stats();
    info!(
        epochs = reports.len(),
        features = stats.features,
        nnz_w = stats.nnz_w,
        nnz_v = stats.nnz_v;
        "training finished"
    );

    Ok(summary)
}

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let spec = load_spec()?;
    let stop = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&stop);
    let mut training = task::spawn_blocking(move || train(spec, &flag));

    let summary = tokio::select! {
        ret = &mut training => ret.map_err(io::Error::other)??,
        _ = signal::ctrl_c() => {
            warn!("received SIGINT, stopping after the current epoch");
            stop.store(true, Ordering::SeqCst);
            training.await.map_err(io::Error::other)??
        }
    };

    if let Some(last) = summary.last {
        info!(
            epoch = last.epoch,
            objv = last.train.mean_objv(),
            auc = last.train.mean_auc();
            "last epoch"
        );
    }

    Ok(())
}
