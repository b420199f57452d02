use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

/// The tracker module's result type.
pub type Result<T> = std::result::Result<T, TrackerErr>;

/// Misuse of a `Tracker` detected at the call site.
#[derive(Debug)]
pub enum TrackerErr {
    /// Jobs were issued before any consumer was registered.
    NoConsumer,
    /// A consumer was already registered for this tracker.
    ConsumerAlreadySet,
    /// The consumer thread couldn't be spawned.
    Spawn(io::Error),
}

impl Display for TrackerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackerErr::NoConsumer => {
                f.write_str("tracker error: jobs issued before a consumer was set")
            }
            TrackerErr::ConsumerAlreadySet => {
                f.write_str("tracker error: the consumer was already set")
            }
            TrackerErr::Spawn(e) => {
                write!(f, "tracker error: failed to spawn the consumer thread: {e}")
            }
        }
    }
}

impl Error for TrackerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TrackerErr::Spawn(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for TrackerErr {
    fn from(value: io::Error) -> Self {
        Self::Spawn(value)
    }
}
