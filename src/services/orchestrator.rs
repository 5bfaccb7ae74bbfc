//! Runs one attack end to end: classify, perturb, render, re-classify.

use crate::error::{AppError, AppResult};
use crate::services::attacks::{label_tensor, linspace, AttackRegistry};
use crate::services::classifiers::{predict, predict_tensor, prep_tensor, ClassifierRegistry, Prediction};
use crate::utils::imaging::{tensor_to_bytes, GridOptions, ImageExt};
use candle_core::Tensor;
use image::DynamicImage;
use std::sync::Arc;
use tracing::info;

/// Robust runs sweep this many epsilons from 0 to [`ROBUST_MAX_EPSILON`].
pub const ROBUST_STEPS: usize = 20;
pub const ROBUST_MAX_EPSILON: f64 = 0.005;
/// Value range drawn for the difference image.
pub const DIFFERENCE_BOUNDS: (f32, f32) = (-0.1, 0.1);

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub robust: bool,
    /// Multiplies the 100 px cell of the rendered images.
    pub scale: f64,
    pub ext: ImageExt,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            robust: false,
            scale: 1.0,
            ext: ImageExt::Jpeg,
        }
    }
}

#[derive(Debug)]
pub struct AttackRun {
    /// Encoded images, in `RunOptions::ext` format.
    pub original_image: Vec<u8>,
    pub result_image: Vec<u8>,
    pub difference_image: Vec<u8>,
    pub success: Vec<bool>,
    pub epsilons: Vec<f64>,
    /// Top-1 prediction for the unperturbed image.
    pub original_label: Prediction,
    /// Top-1 prediction for the adversarial image.
    pub result_label: Prediction,
}

pub struct Orchestrator {
    classifiers: Arc<ClassifierRegistry>,
    attacks: Arc<AttackRegistry>,
    epsilon: f64,
}

impl Orchestrator {
    pub fn new(classifiers: Arc<ClassifierRegistry>, attacks: Arc<AttackRegistry>, epsilon: f64) -> Self {
        Self {
            classifiers,
            attacks,
            epsilon,
        }
    }

    pub fn classifiers(&self) -> &ClassifierRegistry {
        &self.classifiers
    }

    pub fn attacks(&self) -> &AttackRegistry {
        &self.attacks
    }

    pub fn epsilons(&self, robust: bool) -> Vec<f64> {
        if robust {
            linspace(0.0, ROBUST_MAX_EPSILON, ROBUST_STEPS)
        } else {
            vec![self.epsilon]
        }
    }

    /// Top `n` predictions of a registry classifier.
    pub fn classify(&self, image: &DynamicImage, classifier_id: &str, n: usize) -> AppResult<Vec<Prediction>> {
        let entry = self.classifiers.get(classifier_id)?;
        let model = entry.model()?;
        Ok(predict(model.as_ref(), self.classifiers.labels(), image, n)?)
    }

    pub fn run_attack(
        &self,
        image: &DynamicImage,
        classifier_id: &str,
        attack_id: &str,
        options: &RunOptions,
    ) -> AppResult<AttackRun> {
        let entry = self.classifiers.get(classifier_id)?;
        let attack = self.attacks.get(attack_id)?;
        let model = entry.model()?;
        let labels = self.classifiers.labels();

        let images = prep_tensor(model.as_ref(), image)?;
        let original_label = top1(predict_tensor(model.as_ref(), labels, &images, 1)?)?;
        let target = label_tensor(&[original_label.index as u32], model.device())?;

        let epsilons = self.epsilons(options.robust);
        info!(
            classifier = %entry.descriptor.name,
            attack = %attack.descriptor.name,
            label = %original_label.label,
            epsilons = epsilons.len(),
            "Running attack"
        );

        let outcome = attack.attack.run(model.as_ref(), &images, &target, &epsilons)?;
        let adversarial: &Tensor = outcome
            .advs
            .first()
            .ok_or_else(|| AppError::Internal("attack returned no adversarial".to_string()))?;
        let difference = (adversarial - &images)?;
        let result_label = top1(predict_tensor(model.as_ref(), labels, adversarial, 1)?)?;

        let grid = GridOptions::default().with_scale(options.scale);
        let diff_grid = grid.clone().with_bounds(DIFFERENCE_BOUNDS.0, DIFFERENCE_BOUNDS.1);

        let run = AttackRun {
            original_image: tensor_to_bytes(&images, options.ext, &grid)?,
            result_image: tensor_to_bytes(adversarial, options.ext, &grid)?,
            difference_image: tensor_to_bytes(&difference, options.ext, &diff_grid)?,
            success: outcome.success,
            epsilons,
            original_label,
            result_label,
        };

        info!(
            attack = %attack.descriptor.name,
            before = %run.original_label.label,
            after = %run.result_label.label,
            success = ?run.success.first(),
            "Attack finished"
        );
        Ok(run)
    }
}

fn top1(predictions: Vec<Prediction>) -> AppResult<Prediction> {
    predictions
        .into_iter()
        .next()
        .ok_or_else(|| AppError::Internal("classifier returned no prediction".to_string()))
}
