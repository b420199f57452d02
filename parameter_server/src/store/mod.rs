mod deferred;
mod local;
mod store;
mod timeline;

pub use deferred::DeferredStore;
pub use local::LocalStore;
pub use store::{PullCallback, PushCallback, Store, Timestamp, ValueKind, Values};
pub use timeline::Timeline;
