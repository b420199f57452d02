/// A `ParamGen` generates the initial values of freshly allocated parameters.
pub trait ParamGen: Send + Sync {
    /// Should overwrite every slot of `out` with a generated value.
    ///
    /// # Arguments
    /// * `out` - The parameters to initialize.
    fn fill(&mut self, out: &mut [f32]);

    /// Generates `n` parameters.
    ///
    /// # Arguments
    /// * `n` - The amount of parameters to generate.
    ///
    /// # Returns
    /// A vector holding the generated values.
    fn sample(&mut self, n: usize) -> Vec<f32> {
        let mut out = vec![0.; n];
        self.fill(&mut out);
        out
    }
}
