use super::{MinimizationAttack, Norm};
use crate::services::classifiers::ImageClassifier;
use candle_core::{Result, Tensor, Var};
use tracing::debug;

/// Carlini & Wagner L2 attack: Adam on a tanh reparameterization of the
/// image, with a binary search over the trade-off constant.
pub struct L2CarliniWagner {
    pub binary_search_steps: usize,
    pub steps: usize,
    pub stepsize: f64,
    pub confidence: f64,
    pub initial_const: f64,
    pub abort_early: bool,
}

impl Default for L2CarliniWagner {
    fn default() -> Self {
        Self {
            binary_search_steps: 9,
            steps: 1000,
            stepsize: 0.01,
            confidence: 0.0,
            initial_const: 0.001,
            abort_early: true,
        }
    }
}

/// Keeps `tanh` away from +-1 so the inverse stays finite.
const TANH_SHRINK: f64 = 0.999999;

fn to_attack_space(x: &Tensor) -> Result<Tensor> {
    // atanh(y) = 0.5 * ln((1 + y) / (1 - y)), y in (-1, 1)
    let y = x.affine(2.0 * TANH_SHRINK, -TANH_SHRINK)?;
    let num = y.affine(1.0, 1.0)?;
    let den = y.affine(-1.0, 1.0)?;
    (num / den)?.log()?.affine(0.5, 0.0)
}

fn to_model_space(w: &Tensor) -> Result<Tensor> {
    w.tanh()?.affine(0.5 / TANH_SHRINK, 0.5)?.clamp(0f32, 1f32)
}

struct Adam {
    m: Tensor,
    v: Tensor,
    t: i32,
}

impl Adam {
    const BETA1: f64 = 0.9;
    const BETA2: f64 = 0.999;
    const EPSILON: f64 = 1e-8;

    fn new(like: &Tensor) -> Result<Self> {
        Ok(Self {
            m: like.zeros_like()?,
            v: like.zeros_like()?,
            t: 0,
        })
    }

    /// Update to add to the parameters.
    fn step(&mut self, grad: &Tensor, lr: f64) -> Result<Tensor> {
        self.t += 1;
        self.m = ((&self.m * Self::BETA1)? + (grad * (1.0 - Self::BETA1))?)?;
        self.v = ((&self.v * Self::BETA2)? + (grad.sqr()? * (1.0 - Self::BETA2))?)?;
        let m_hat = (&self.m / (1.0 - Self::BETA1.powi(self.t)))?;
        let v_hat = (&self.v / (1.0 - Self::BETA2.powi(self.t)))?;
        (m_hat / v_hat.sqrt()?.affine(1.0, Self::EPSILON)?)? * -lr
    }
}

impl L2CarliniWagner {
    fn attack_one(&self, model: &dyn ImageClassifier, x: &Tensor, label: usize) -> Result<Tensor> {
        let x_attack = to_attack_space(x)?;
        let reconstructed = to_model_space(&x_attack)?;

        let mut lower = 0.0f64;
        let mut upper = f64::INFINITY;
        let mut consts = self.initial_const;

        let mut best_adv = x.clone();
        let mut best_dist = f64::INFINITY;
        let check_every = self.steps.div_ceil(10).max(1);

        for search in 0..self.binary_search_steps {
            if self.binary_search_steps >= 10 && search + 1 == self.binary_search_steps && upper.is_finite() {
                consts = upper;
            }

            let delta = Var::from_tensor(&x_attack.zeros_like()?)?;
            let mut adam = Adam::new(&x_attack)?;
            let mut found = false;
            let mut previous_loss = f64::INFINITY;

            for step in 0..self.steps {
                let adv = to_model_space(&(&x_attack + delta.as_tensor())?)?;
                let logits = model.logits(&adv)?;
                let scores = logits.flatten_all()?.to_vec1::<f32>()?;

                let runner_up = scores
                    .iter()
                    .enumerate()
                    .filter(|&(k, _)| k != label)
                    .max_by(|a, b| a.1.total_cmp(b.1))
                    .map(|(k, _)| k)
                    .unwrap_or(label);

                let margin = (logits.narrow(1, label, 1)? - logits.narrow(1, runner_up, 1)?)?;
                let is_adv_loss = margin.affine(1.0, self.confidence)?.maximum(0f32)?.affine(consts, 0.0)?;
                let squared_norm = (&adv - &reconstructed)?.sqr()?.sum_all()?;
                let loss = (is_adv_loss.sum_all()? + &squared_norm)?;

                let grads = loss.backward()?;
                let Some(grad) = grads.get(delta.as_tensor()) else {
                    candle_core::bail!("carlini-wagner loss does not depend on the perturbation");
                };
                let update = adam.step(grad, self.stepsize)?;
                delta.set(&(delta.as_tensor() + update)?)?;

                let loss = loss.to_scalar::<f32>()? as f64;
                if self.abort_early && step % check_every == 0 {
                    if !(loss <= previous_loss * 0.9999) {
                        break;
                    }
                    previous_loss = loss;
                }

                let predicted = scores
                    .iter()
                    .enumerate()
                    .max_by(|a, b| a.1.total_cmp(b.1))
                    .map(|(k, _)| k)
                    .unwrap_or(label);
                if predicted != label {
                    found = true;
                    let dist = squared_norm.to_scalar::<f32>()? as f64;
                    if dist < best_dist {
                        best_dist = dist;
                        best_adv = adv.detach();
                    }
                }
            }

            if found {
                upper = upper.min(consts);
            } else {
                lower = lower.max(consts);
            }
            consts = if upper.is_finite() {
                (lower + upper) / 2.0
            } else {
                consts * 10.0
            };
            debug!(search, consts, found, "Carlini-Wagner binary search step");
        }

        Ok(best_adv)
    }
}

impl MinimizationAttack for L2CarliniWagner {
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

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::{Attack, Minimizing};
    use super::*;

    #[test]
    fn test_tanh_space_round_trip() {
        let x = flat_image(0.0, 0.5, 1.0);
        let back = to_model_space(&to_attack_space(&x).unwrap()).unwrap();
        assert!(max_abs_diff(&back, &x) < 1e-4);
    }

    #[test]
    fn test_carlini_wagner_finds_adversarial() {
        let model = rgb_model();
        let x = flat_image(0.55, 0.5, 0.3);
        let y = labels(&[0]);
        let attack = L2CarliniWagner {
            binary_search_steps: 5,
            steps: 200,
            stepsize: 0.05,
            initial_const: 10.0,
            ..Default::default()
        };

        let outcome = Minimizing(attack).run(&model, &x, &y, &[100.0]).unwrap();
        assert_eq!(outcome.success, vec![true]);
    }
}
