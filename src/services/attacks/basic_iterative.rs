use super::{clip_unit, value_and_grad, FixedEpsilonAttack};
use crate::services::classifiers::ImageClassifier;
use candle_core::{Result, Tensor};

/// Iterated FGSM projected back onto the L-inf ball after every step.
pub struct LinfBasicIterative {
    /// Step size as a fraction of epsilon.
    pub rel_stepsize: f64,
    pub steps: usize,
}

impl Default for LinfBasicIterative {
    fn default() -> Self {
        Self {
            rel_stepsize: 0.2,
            steps: 10,
        }
    }
}

impl FixedEpsilonAttack for LinfBasicIterative {
    fn perturb(&self, model: &dyn ImageClassifier, images: &Tensor, labels: &Tensor, epsilon: f64) -> Result<Tensor> {
        let stepsize = self.rel_stepsize * epsilon;
        let mut adv = images.clone();

        for _ in 0..self.steps {
            let (_, grad) = value_and_grad(&adv, |x| {
                candle_nn::loss::cross_entropy(&model.logits(x)?, labels)
            })?;
            let stepped = (&adv + (grad.sign()? * stepsize)?)?;
            let delta = (stepped - images)?.clamp(-epsilon, epsilon)?;
            adv = clip_unit(&(images + delta)?)?;
        }

        Ok(adv)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::{Attack, Fixed};
    use super::*;

    #[test]
    fn test_bim_stays_in_ball() {
        let model = rgb_model();
        let x = flat_image(0.6, 0.45, 0.4);
        let y = labels(&[0]);

        let outcome = Fixed(LinfBasicIterative::default()).run(&model, &x, &y, &[0.02, 0.2]).unwrap();
        assert!(max_abs_diff(&outcome.advs[0], &x) <= 0.02 + 1e-6);
        assert!(max_abs_diff(&outcome.advs[1], &x) <= 0.2 + 1e-6);
        assert_eq!(outcome.success, vec![false, true]);
    }
}
