use super::Loss;

/// The logistic loss `ln(1 + exp(-y p))`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogitLoss;

#[inline]
fn sign(label: f32) -> f32 {
    if label > 0. { 1. } else { -1. }
}

impl Loss for LogitLoss {
    fn loss(&self, label: f32, pred: f32) -> f64 {
        let m = -(sign(label) * pred) as f64;
        match m > 0. {
            true => m + (-m).exp().ln_1p(),
            false => m.exp().ln_1p(),
        }
    }

    fn dual(&self, label: f32, pred: f32) -> f32 {
        let y = sign(label);
        -y / (1. + (y * pred).exp())
    }

    fn curvature(&self, pred: f32, reach: f32) -> f32 {
        let z = (pred.abs() - reach).max(0.);
        1. / (2. + z.exp() + (-z).exp())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loss_at_zero_is_ln2() {
        let loss = LogitLoss;
        assert!((loss.loss(1., 0.) - 2f64.ln()).abs() < 1e-12);
        assert!((loss.loss(0., 0.) - 2f64.ln()).abs() < 1e-12);
        assert!(loss.loss(1., 50.) < 1e-20);
        assert!((loss.loss(-1., 50.) - 50.).abs() < 1e-9);
    }

    #[test]
    fn dual_pushes_towards_the_label() {
        let loss = LogitLoss;
        assert_eq!(loss.dual(1., 0.), -0.5);
        assert_eq!(loss.dual(-1., 0.), 0.5);
        assert!(loss.dual(1., 3.) > -0.1);
    }

    #[test]
    fn curvature_bound_widens_with_reach() {
        let loss = LogitLoss;
        assert_eq!(loss.curvature(0., 0.), 0.25);
        assert_eq!(loss.curvature(2., 3.), 0.25);
        assert!(loss.curvature(2., 0.) < loss.curvature(2., 1.));
    }
}
