use super::{clip_unit, value_and_grad, MinimizationAttack, Norm};
use crate::services::classifiers::ImageClassifier;
use candle_core::{Result, Tensor, D};

/// DeepFool under the L-inf norm: repeatedly linearize the decision
/// boundaries of the top candidate classes and step across the closest one.
pub struct LinfDeepFool {
    pub steps: usize,
    /// Number of top-ranked classes considered, the true class included.
    pub candidates: usize,
    pub overshoot: f64,
}

impl Default for LinfDeepFool {
    fn default() -> Self {
        Self {
            steps: 50,
            candidates: 10,
            overshoot: 0.02,
        }
    }
}

impl LinfDeepFool {
    fn attack_one(&self, model: &dyn ImageClassifier, x: &Tensor, label: usize) -> Result<Tensor> {
        let scores = model.logits(x)?.flatten_all()?.to_vec1::<f32>()?;
        let mut ranked: Vec<usize> = (0..scores.len()).collect();
        ranked.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
        let others: Vec<usize> = ranked
            .into_iter()
            .filter(|&k| k != label)
            .take(self.candidates.saturating_sub(1))
            .collect();

        let mut total = x.zeros_like()?;
        let mut adv = x.clone();

        for _ in 0..self.steps {
            if model.logits(&adv)?.argmax(D::Minus1)?.flatten_all()?.to_vec1::<u32>()?[0] as usize != label {
                break;
            }

            // (distance, direction) towards the closest boundary
            let mut best: Option<(f32, Tensor)> = None;
            for &k in &others {
                let (f, w) = value_and_grad(&adv, |a| {
                    let logits = model.logits(a)?;
                    logits.narrow(1, k, 1)? - logits.narrow(1, label, 1)?
                })?;
                let f = f.flatten_all()?.to_vec1::<f32>()?[0];
                let w_l1 = w.abs()?.sum_all()?.to_scalar::<f32>()?;
                let distance = f.abs() / (w_l1 + 1e-8);

                if best.as_ref().map_or(true, |(d, _)| distance < *d) {
                    best = Some((distance, w));
                }
            }

            let Some((distance, w)) = best else {
                break;
            };
            total = (total + (w.sign()? * (distance as f64 + 1e-4))?)?;
            adv = clip_unit(&(x + (&total * (1.0 + self.overshoot))?)?)?;
        }

        Ok(adv)
    }
}

impl MinimizationAttack for LinfDeepFool {
    fn norm(&self) -> Norm {
        Norm::Linf
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
