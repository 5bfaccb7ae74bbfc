use super::FixedEpsilonAttack;
use crate::services::classifiers::ImageClassifier;
use candle_core::{Result, Tensor};

/// Adds noise drawn uniformly from `[-epsilon, epsilon]`.
pub struct AdditiveUniformNoise;

impl FixedEpsilonAttack for AdditiveUniformNoise {
    fn perturb(&self, _model: &dyn ImageClassifier, images: &Tensor, _labels: &Tensor, epsilon: f64) -> Result<Tensor> {
        let noise = images.rand_like(-1.0, 1.0)?;
        images + (noise * epsilon)?
    }
}
