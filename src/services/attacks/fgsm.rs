use super::{value_and_grad, FixedEpsilonAttack};
use crate::services::classifiers::ImageClassifier;
use candle_core::{Result, Tensor};

/// One step of `epsilon` along the sign of the cross-entropy gradient.
pub struct FastGradientSign;

impl FixedEpsilonAttack for FastGradientSign {
    fn perturb(&self, model: &dyn ImageClassifier, images: &Tensor, labels: &Tensor, epsilon: f64) -> Result<Tensor> {
        let (_, grad) = value_and_grad(images, |x| {
            candle_nn::loss::cross_entropy(&model.logits(x)?, labels)
        })?;
        images + (grad.sign()? * epsilon)?
    }
}
