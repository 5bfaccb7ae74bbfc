use super::{clip_unit, value_and_grad, MinimizationAttack, Norm};
use crate::services::classifiers::ImageClassifier;
use candle_core::{Result, Tensor, D};

/// NewtonFool: Newton steps that drive the softmax probability of the true
/// class down towards chance level.
pub struct NewtonFool {
    pub steps: usize,
    pub stepsize: f64,
}

impl Default for NewtonFool {
    fn default() -> Self {
        Self {
            steps: 100,
            stepsize: 0.01,
        }
    }
}

impl NewtonFool {
    fn attack_one(&self, model: &dyn ImageClassifier, x: &Tensor, label: usize) -> Result<Tensor> {
        let x_sq_norm = x.sqr()?.sum_all()?.to_scalar::<f32>()? as f64;
        let mut adv = x.clone();

        for _ in 0..self.steps {
            let mut classes = 0;
            let mut predicted = label;
            let (prob, grad) = value_and_grad(&adv, |a| {
                let logits = model.logits(a)?;
                classes = logits.dim(D::Minus1)?;
                predicted = logits.argmax(D::Minus1)?.flatten_all()?.to_vec1::<u32>()?[0] as usize;
                candle_nn::ops::softmax(&logits, D::Minus1)?.narrow(1, label, 1)
            })?;

            if predicted != label {
                break;
            }

            let prob = prob.flatten_all()?.to_vec1::<f32>()?[0] as f64;
            let grad_sq_norm = grad.sqr()?.sum_all()?.to_scalar::<f32>()? as f64;
            if grad_sq_norm <= f64::EPSILON {
                break;
            }

            let min_prob = 1.0 / classes.max(1) as f64;
            let num = (self.stepsize * x_sq_norm * grad_sq_norm).min(prob - min_prob);
            let eta = (grad * (num / grad_sq_norm))?;
            adv = clip_unit(&(adv - eta)?)?;
        }

        Ok(adv)
    }
}

impl MinimizationAttack for NewtonFool {
    fn norm(&self) -> Norm {
        Norm::L2
    }

    fn minimize(&self, model: &dyn ImageClassifier, images: &Tensor, labels: &Tensor) -> Result<Tensor> {
        let labels = labels.to_vec1::<u32>()?;
        let mut rows = Vec::with_capacity(labels.len());
        for (i, &label) in labels.iter().enumerate() {
            rows.push(self.attack_one(model, &images.narrow(0, i, 1)?, label as usize)?);
        }
        Tensor::cat(&rows, 0)
    }
}
