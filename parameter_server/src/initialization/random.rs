use rand::Rng;
use rand_distr::{Distribution, Normal, Uniform};

use super::{ParamGen, Result};

/// Draws embedding slots from `distribution`.
///
/// Embeddings must not start at zero, otherwise the pairwise term of the
/// prediction and every embedding gradient stay zero forever.
pub struct RandParamGen<R: Rng, D: Distribution<f32>> {
    rng: R,
    distribution: D,
}

impl<R: Rng, D: Distribution<f32>> RandParamGen<R, D> {
    pub fn new(rng: R, distribution: D) -> Self {
        Self { rng, distribution }
    }
}

impl<R: Rng> RandParamGen<R, Uniform<f32>> {
    /// Samples from `[-scale, scale)`.
    ///
    /// # Returns
    /// An error if `scale` isn't a positive finite number.
    pub fn uniform(rng: R, scale: f32) -> Result<Self> {
        Ok(Self::new(rng, Uniform::new(-scale, scale)?))
    }
}

impl<R: Rng> RandParamGen<R, Normal<f32>> {
    /// Samples from `N(mean, std_dev^2)`.
    ///
    /// # Returns
    /// An error if `std_dev` isn't finite.
    pub fn normal(rng: R, mean: f32, std_dev: f32) -> Result<Self> {
        Ok(Self::new(rng, Normal::new(mean, std_dev)?))
    }
}

impl<R, D> ParamGen for RandParamGen<R, D>
where
    R: Rng + Send + Sync,
    D: Distribution<f32> + Send + Sync,
{
    fn fill(&mut self, out: &mut [f32]) {
        for slot in out {
            *slot = self.distribution.sample(&mut self.rng);
        }
    }
}
