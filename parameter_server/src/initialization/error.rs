use std::{
    error::Error,
    fmt::{self, Display},
};

use rand_distr::{NormalError, uniform::Error as UniformError};

pub type Result<T> = std::result::Result<T, InitErr>;

/// The embedding initializer's distribution parameters are invalid.
#[derive(Debug)]
pub enum InitErr {
    Normal(NormalError),
    Uniform(UniformError),
}

impl From<NormalError> for InitErr {
    fn from(value: NormalError) -> Self {
        Self::Normal(value)
    }
}

impl From<UniformError> for InitErr {
    fn from(value: UniformError) -> Self {
        Self::Uniform(value)
    }
}

impl Display for InitErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal(e) => write!(f, "invalid normal initializer: {e}"),
            Self::Uniform(e) => write!(f, "invalid uniform initializer: {e}"),
        }
    }
}

impl Error for InitErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Normal(e) => Some(e),
            Self::Uniform(e) => Some(e),
        }
    }
}
