use super::{linspace, misclassified, Attack, AttackOutcome};
use crate::services::classifiers::ImageClassifier;
use candle_core::{Result, Tensor};

/// Grid search over rotations and translations. The perturbation is not
/// norm-bounded, so every epsilon gets the same result.
pub struct SpatialAttack {
    /// Pixels, in both directions.
    pub max_translation: f64,
    pub num_translations: usize,
    /// Degrees, in both directions.
    pub max_rotation: f64,
    pub num_rotations: usize,
}

impl Default for SpatialAttack {
    fn default() -> Self {
        Self {
            max_translation: 6.0,
            num_translations: 6,
            max_rotation: 20.0,
            num_rotations: 5,
        }
    }
}

/// Rotate one `(C, H, W)` image about its center and shift it by
/// `(tx, ty)` pixels. Uncovered pixels become zero.
pub fn rotate_translate(image: &[f32], dims: (usize, usize, usize), angle: f64, tx: f64, ty: f64) -> Vec<f32> {
    let (c, h, w) = dims;
    let (sin, cos) = angle.to_radians().sin_cos();
    let cx = (w as f64 - 1.0) / 2.0;
    let cy = (h as f64 - 1.0) / 2.0;

    let mut out = vec![0f32; c * h * w];
    for y in 0..h {
        for x in 0..w {
            let dx = x as f64 - cx - tx;
            let dy = y as f64 - cy - ty;
            let sx = cos * dx + sin * dy + cx;
            let sy = -sin * dx + cos * dy + cy;
            for ch in 0..c {
                let plane = &image[ch * h * w..(ch + 1) * h * w];
                out[ch * h * w + y * w + x] = bilinear(plane, h, w, sx, sy);
            }
        }
    }
    out
}

fn bilinear(plane: &[f32], h: usize, w: usize, sx: f64, sy: f64) -> f32 {
    let x0 = sx.floor();
    let y0 = sy.floor();
    let fx = sx - x0;
    let fy = sy - y0;

    let at = |xi: f64, yi: f64| -> f64 {
        if xi < 0.0 || yi < 0.0 || xi >= w as f64 || yi >= h as f64 {
            0.0
        } else {
            plane[yi as usize * w + xi as usize] as f64
        }
    };

    let v = (1.0 - fx) * (1.0 - fy) * at(x0, y0)
        + fx * (1.0 - fy) * at(x0 + 1.0, y0)
        + (1.0 - fx) * fy * at(x0, y0 + 1.0)
        + fx * fy * at(x0 + 1.0, y0 + 1.0);
    v as f32
}

impl Attack for SpatialAttack {
    fn run(
        &self,
        model: &dyn ImageClassifier,
        images: &Tensor,
        labels: &Tensor,
        epsilons: &[f64],
    ) -> Result<AttackOutcome> {
        let (n, c, h, w) = images.dims4()?;
        let size = c * h * w;
        let original = images.flatten_all()?.to_vec1::<f32>()?;

        let mut best = original.clone();
        let mut found = vec![false; n];

        'search: for angle in linspace(-self.max_rotation, self.max_rotation, self.num_rotations) {
            for tx in linspace(-self.max_translation, self.max_translation, self.num_translations) {
                for ty in linspace(-self.max_translation, self.max_translation, self.num_translations) {
                    let mut candidate = Vec::with_capacity(original.len());
                    for i in 0..n {
                        let image = &original[i * size..(i + 1) * size];
                        candidate.extend(rotate_translate(image, (c, h, w), angle, tx, ty));
                    }

                    let batch = Tensor::from_vec(candidate, (n, c, h, w), images.device())?;
                    let flags = misclassified(model, &batch, labels)?;
                    let batch = batch.flatten_all()?.to_vec1::<f32>()?;
                    for (i, &is_adv) in flags.iter().enumerate() {
                        if is_adv && !found[i] {
                            best[i * size..(i + 1) * size].copy_from_slice(&batch[i * size..(i + 1) * size]);
                            found[i] = true;
                        }
                    }

                    if found.iter().all(|&f| f) {
                        break 'search;
                    }
                }
            }
        }

        let adv = Tensor::from_vec(best, (n, c, h, w), images.device())?;
        let first = found.first().copied().unwrap_or(false);
        Ok(AttackOutcome {
            advs: vec![adv; epsilons.len()],
            success: vec![first; epsilons.len()],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_translation_shifts_pixels() {
        let mut plane = vec![0f32; 16];
        plane[4 + 1] = 1.0; // (x=1, y=1)
        let out = rotate_translate(&plane, (1, 4, 4), 0.0, 1.0, 2.0);
        assert!((out[3 * 4 + 2] - 1.0).abs() < 1e-6);
        assert!((out.iter().sum::<f32>() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_identity_transform() {
        let plane: Vec<f32> = (0..9).map(|v| v as f32).collect();
        assert_eq!(rotate_translate(&plane, (1, 3, 3), 0.0, 0.0, 0.0), plane);
    }

    #[test]
    fn test_spatial_moves_content_out_of_frame() {
        // red block in the center, faint green everywhere: green wins until
        // part of the green border is shifted out
        let mut data = vec![0f32; 3 * 64];
        for y in 2..6 {
            for x in 2..6 {
                data[y * 8 + x] = 0.5;
            }
        }
        for v in &mut data[64..128] {
            *v = 0.14;
        }
        let x = Tensor::from_vec(data, (1, 3, 8, 8), &Device::Cpu).unwrap();
        let y = labels(&[1]);
        let model = rgb_model();
        assert_eq!(misclassified(&model, &x, &y).unwrap(), vec![false]);

        let outcome = SpatialAttack::default().run(&model, &x, &y, &[0.1, 0.2]).unwrap();
        assert_eq!(outcome.advs.len(), 2);
        assert_eq!(outcome.success, vec![true, true]);
        assert_eq!(misclassified(&model, &outcome.advs[0], &y).unwrap(), vec![true]);
    }
}
