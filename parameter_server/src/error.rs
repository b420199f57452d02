use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

use tracker::TrackerErr;

use crate::{initialization::InitErr, keys::FeaId, store::ValueKind};

/// The parameter server's result type.
pub type Result<T> = std::result::Result<T, StoreErr>;

/// Errors raised by stores, updaters and the key matching routines.
#[derive(Debug)]
pub enum StoreErr {
    /// The id list isn't strictly increasing at `position`.
    UnsortedIds { position: usize },
    /// A value buffer doesn't have the length the id list requires.
    SizeMismatch { expected: usize, got: usize },
    /// The slot length sent for `id` doesn't match the one stored for it.
    LengthMismatch { id: FeaId, expected: usize, got: usize },
    /// A non-empty value was sent for an id the model doesn't hold.
    UnknownFeature { id: FeaId },
    /// The updater doesn't handle this kind of value in this direction.
    Unsupported { op: &'static str, kind: ValueKind },
    /// A completion callback was dropped without ever being invoked.
    Disconnected,
    Init(InitErr),
    Dispatch(TrackerErr),
    Io(io::Error),
}

impl Display for StoreErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsortedIds { position } => {
                write!(f, "store error: ids are not strictly increasing at position {position}")
            }
            Self::SizeMismatch { expected, got } => {
                write!(f, "store error: expected a buffer of {expected} values, got {got}")
            }
            Self::LengthMismatch { id, expected, got } => {
                write!(f, "store error: feature {id} holds {expected} values, got {got}")
            }
            Self::UnknownFeature { id } => write!(f, "store error: unknown feature {id}"),
            Self::Unsupported { op, kind } => write!(f, "store error: cannot {op} {kind:?} values"),
            Self::Disconnected => {
                f.write_str("store error: the request was dropped before completing")
            }
            Self::Init(e) => write!(f, "store error: {e}"),
            Self::Dispatch(e) => write!(f, "store error: {e}"),
            Self::Io(e) => write!(f, "store error: {e}"),
        }
    }
}

impl Error for StoreErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Init(e) => Some(e),
            Self::Dispatch(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<InitErr> for StoreErr {
    fn from(value: InitErr) -> Self {
        Self::Init(value)
    }
}

impl From<TrackerErr> for StoreErr {
    fn from(value: TrackerErr) -> Self {
        Self::Dispatch(value)
    }
}

impl From<io::Error> for StoreErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}
