mod bcd;
mod sgd;
mod updater;

pub use bcd::{BcdUpdater, BcdUpdaterConfig};
pub use sgd::{SgdUpdater, SgdUpdaterConfig};
pub use updater::{ModelStats, Updater};
