use std::{error::Error, fmt, io};

use parameter_server::StoreErr;
use tracker::TrackerErr;

/// The worker module's result type.
pub type Result<T> = std::result::Result<T, WorkerErr>;

/// Learner failures.
#[derive(Debug)]
pub enum WorkerErr {
    Io(io::Error),
    Store(StoreErr),
    Dispatch(TrackerErr),
    /// A configuration value is out of its valid range.
    InvalidConfig { field: &'static str, reason: String },
    /// The training reader produced no rows.
    EmptyData,
    /// The store answered with a value layout the learner didn't expect.
    LayoutMismatch {
        block: usize,
        got: usize,
        expected: usize,
    },
    /// A feature block was issued while another stage still held it.
    BlockUnavailable { block: usize },
}

impl fmt::Display for WorkerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerErr::Io(e) => write!(f, "io error: {e}"),
            WorkerErr::Store(e) => write!(f, "{e}"),
            WorkerErr::Dispatch(e) => write!(f, "{e}"),
            WorkerErr::InvalidConfig { field, reason } => {
                write!(f, "invalid config: {field} {reason}")
            }
            WorkerErr::EmptyData => f.write_str("the training data is empty"),
            WorkerErr::LayoutMismatch {
                block,
                got,
                expected,
            } => write!(
                f,
                "value layout mismatch at block {block}: got {got} slots, expected {expected}"
            ),
            WorkerErr::BlockUnavailable { block } => {
                write!(f, "feature block {block} is held by another stage")
            }
        }
    }
}

impl Error for WorkerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WorkerErr::Io(e) => Some(e),
            WorkerErr::Store(e) => Some(e),
            WorkerErr::Dispatch(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for WorkerErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<StoreErr> for WorkerErr {
    fn from(value: StoreErr) -> Self {
        Self::Store(value)
    }
}

impl From<TrackerErr> for WorkerErr {
    fn from(value: TrackerErr) -> Self {
        Self::Dispatch(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<WorkerErr> for io::Error {
    fn from(value: WorkerErr) -> Self {
        match value {
            WorkerErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
