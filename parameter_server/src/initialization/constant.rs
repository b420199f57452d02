use super::ParamGen;

/// Starts every embedding slot at the same value, mostly useful to make
/// freshly grown embeddings predictable in tests.
pub struct ConstParamGen {
    value: f32,
}

impl ConstParamGen {
    pub fn new(value: f32) -> Self {
        Self { value }
    }
}

impl ParamGen for ConstParamGen {
    fn fill(&mut self, out: &mut [f32]) {
        out.fill(self.value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_embedding_slot_gets_the_value() {
        const V_DIM: usize = 4;

        let mut param_gen = ConstParamGen::new(0.25);
        assert_eq!(param_gen.sample(V_DIM), [0.25; V_DIM]);
        assert!(param_gen.sample(0).is_empty());

        let mut embedding = [1., 2.];
        param_gen.fill(&mut embedding);
        assert_eq!(embedding, [0.25, 0.25]);
    }
}
