//! Adversarial attacks.
//!
//! Every attack works on `(N, 3, H, W)` batches in `[0, 1]` and returns one
//! adversarial batch per requested epsilon. Two families exist: fixed
//! attacks take a step of a given size and are rerun per epsilon, while
//! minimization attacks search the smallest perturbation once and restrict
//! it to each epsilon ball afterwards.

mod basic_iterative;
mod carlini_wagner;
mod deepfool;
mod fgsm;
mod newton_fool;
mod spatial;
mod uniform_noise;

pub use basic_iterative::LinfBasicIterative;
pub use carlini_wagner::L2CarliniWagner;
pub use deepfool::LinfDeepFool;
pub use fgsm::FastGradientSign;
pub use newton_fool::NewtonFool;
pub use spatial::SpatialAttack;
pub use uniform_noise::AdditiveUniformNoise;

use crate::error::AppResult;
use crate::services::classifiers::{predicted_classes, ImageClassifier};
use crate::services::registry::{parse_index, Descriptor};
use candle_core::{Result, Tensor, Var};
use tracing::debug;

#[derive(Debug)]
pub struct AttackOutcome {
    /// One adversarial batch per epsilon, clipped to `[0, 1]`.
    pub advs: Vec<Tensor>,
    /// Per epsilon: whether the first image is misclassified.
    pub success: Vec<bool>,
}

pub trait Attack: Send + Sync {
    /// `labels` holds the true class of each image as `u32`.
    fn run(
        &self,
        model: &dyn ImageClassifier,
        images: &Tensor,
        labels: &Tensor,
        epsilons: &[f64],
    ) -> Result<AttackOutcome>;
}

/// Attacks parameterized directly by the perturbation budget.
pub trait FixedEpsilonAttack: Send + Sync {
    fn perturb(&self, model: &dyn ImageClassifier, images: &Tensor, labels: &Tensor, epsilon: f64) -> Result<Tensor>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Norm {
    Linf,
    L2,
}

/// Attacks that look for the smallest adversarial perturbation.
pub trait MinimizationAttack: Send + Sync {
    fn norm(&self) -> Norm;

    fn minimize(&self, model: &dyn ImageClassifier, images: &Tensor, labels: &Tensor) -> Result<Tensor>;
}

pub struct Fixed<A>(pub A);

impl<A: FixedEpsilonAttack> Attack for Fixed<A> {
    fn run(
        &self,
        model: &dyn ImageClassifier,
        images: &Tensor,
        labels: &Tensor,
        epsilons: &[f64],
    ) -> Result<AttackOutcome> {
        let mut advs = Vec::with_capacity(epsilons.len());
        let mut success = Vec::with_capacity(epsilons.len());
        for &epsilon in epsilons {
            let adv = clip_unit(&self.0.perturb(model, images, labels, epsilon)?)?;
            success.push(first_misclassified(model, &adv, labels)?);
            advs.push(adv);
        }
        Ok(AttackOutcome { advs, success })
    }
}

pub struct Minimizing<A>(pub A);

impl<A: MinimizationAttack> Attack for Minimizing<A> {
    fn run(
        &self,
        model: &dyn ImageClassifier,
        images: &Tensor,
        labels: &Tensor,
        epsilons: &[f64],
    ) -> Result<AttackOutcome> {
        let unrestricted = clip_unit(&self.0.minimize(model, images, labels)?)?;

        let mut advs = Vec::with_capacity(epsilons.len());
        let mut success = Vec::with_capacity(epsilons.len());
        for &epsilon in epsilons {
            let adv = restrict(images, &unrestricted, self.0.norm(), epsilon)?;
            success.push(first_misclassified(model, &adv, labels)?);
            advs.push(adv);
        }
        Ok(AttackOutcome { advs, success })
    }
}

pub fn clip_unit(x: &Tensor) -> Result<Tensor> {
    x.clamp(0f32, 1f32)
}

/// Project `adv` onto the epsilon ball around `images`, then clip.
pub fn restrict(images: &Tensor, adv: &Tensor, norm: Norm, epsilon: f64) -> Result<Tensor> {
    let delta = (adv - images)?;
    let delta = match norm {
        Norm::Linf => delta.clamp(-epsilon, epsilon)?,
        Norm::L2 => {
            let norms = l2_norms(&delta)?.affine(1.0, 1e-12)?;
            let factor = norms.recip()?.affine(epsilon, 0.0)?.minimum(1.0)?;
            delta.broadcast_mul(&factor)?
        }
    };
    clip_unit(&(images + delta)?)
}

/// Per-image L2 norm, shaped `(N, 1, 1, 1)`.
pub fn l2_norms(x: &Tensor) -> Result<Tensor> {
    x.sqr()?.sum_keepdim((1, 2, 3))?.sqrt()
}

/// Per-image flag: top-1 class differs from the label.
pub fn misclassified(model: &dyn ImageClassifier, images: &Tensor, labels: &Tensor) -> Result<Vec<bool>> {
    let flags = predicted_classes(model, images)?.ne(labels)?.to_vec1::<u8>()?;
    Ok(flags.into_iter().map(|f| f != 0).collect())
}

fn first_misclassified(model: &dyn ImageClassifier, images: &Tensor, labels: &Tensor) -> Result<bool> {
    Ok(misclassified(model, images, labels)?.first().copied().unwrap_or(false))
}

/// Value of `objective` at `x` and its gradient with respect to `x`.
/// Non-scalar objectives are summed before differentiating.
pub fn value_and_grad<F>(x: &Tensor, objective: F) -> Result<(Tensor, Tensor)>
where
    F: FnOnce(&Tensor) -> Result<Tensor>,
{
    let var = Var::from_tensor(&x.detach())?;
    let value = objective(var.as_tensor())?;
    let grads = value.sum_all()?.backward()?;
    let grad = grads
        .get(var.as_tensor())
        .cloned()
        .ok_or_else(|| candle_core::Error::Msg("objective does not depend on the input".to_string()))?;
    Ok((value.detach(), grad))
}

/// `n` evenly spaced values from `start` to `end`, both included.
pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

/// The class-id tensor the attacks expect.
pub fn label_tensor(labels: &[u32], device: &candle_core::Device) -> Result<Tensor> {
    Tensor::new(labels, device)
}

pub struct AttackEntry {
    pub descriptor: Descriptor,
    pub attack: Box<dyn Attack>,
}

pub struct AttackRegistry {
    entries: Vec<AttackEntry>,
}

impl AttackRegistry {
    pub fn new(entries: Vec<AttackEntry>) -> Self {
        Self { entries }
    }

    pub fn builtin() -> Self {
        let entry = |name: &str, paper: &str, attack: Box<dyn Attack>| AttackEntry {
            descriptor: Descriptor::new(name, paper),
            attack,
        };

        Self::new(vec![
            entry(
                "LinfDeepFool",
                "https://arxiv.org/abs/1511.04599",
                Box::new(Minimizing(LinfDeepFool::default())),
            ),
            entry(
                "FastGradientSignMethod",
                "https://arxiv.org/abs/1412.6572",
                Box::new(Fixed(FastGradientSign)),
            ),
            entry(
                "LinfBasicIterativeMethod",
                "https://arxiv.org/abs/1607.02533",
                Box::new(Fixed(LinfBasicIterative::default())),
            ),
            entry(
                "AdditiveUniformNoise",
                "https://dl.acm.org/citation.cfm?id=3134635",
                Box::new(Fixed(AdditiveUniformNoise)),
            ),
            entry(
                "NewtonFool",
                "https://arxiv.org/abs/1607.02533",
                Box::new(Minimizing(NewtonFool::default())),
            ),
            entry(
                "Spatial Attack",
                "https://arxiv.org/abs/1801.02612",
                Box::new(SpatialAttack::default()),
            ),
            entry(
                "L2CarliniWagner",
                "https://arxiv.org/abs/1608.04644",
                Box::new(Minimizing(L2CarliniWagner::default())),
            ),
        ])
    }

    pub fn all(&self) -> Vec<Descriptor> {
        self.entries.iter().map(|e| e.descriptor.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, raw_id: &str) -> AppResult<&AttackEntry> {
        let index = parse_index(raw_id, self.entries.len(), "attack")?;
        debug!(attack = %self.entries[index].descriptor.name, "Attack selected");
        Ok(&self.entries[index])
    }
}
