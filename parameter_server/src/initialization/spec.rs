use rand::{SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};

use super::{ConstParamGen, ParamGen, RandParamGen, Result};

/// The specification for the `ParamGen` used on freshly allocated parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitSpec {
    Const { value: f32 },
    Uniform { scale: f32 },
    Normal { mean: f32, std_dev: f32 },
}

impl Default for InitSpec {
    fn default() -> Self {
        Self::Uniform { scale: 0.01 }
    }
}

impl InitSpec {
    /// Builds the parameter generator this spec describes.
    ///
    /// # Arguments
    /// * `seed` - An optional seed for the rng, the os entropy is used otherwise.
    ///
    /// # Returns
    /// A boxed generator, or an error if the distribution parameters are invalid.
    pub fn build(self, seed: Option<u64>) -> Result<Box<dyn ParamGen>> {
        let param_gen: Box<dyn ParamGen> = match self {
            Self::Const { value } => Box::new(ConstParamGen::new(value)),
            Self::Uniform { scale } => Box::new(RandParamGen::uniform(generate_rng(seed), scale)?),
            Self::Normal { mean, std_dev } => {
                Box::new(RandParamGen::normal(generate_rng(seed), mean, std_dev)?)
            }
        };

        Ok(param_gen)
    }
}

fn generate_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}
