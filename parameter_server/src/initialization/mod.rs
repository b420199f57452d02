mod constant;
mod error;
mod param_gen;
mod random;
mod spec;

pub use constant::ConstParamGen;
pub use error::{InitErr, Result};
pub use param_gen::ParamGen;
pub use random::RandParamGen;
pub use spec::InitSpec;
