//! Request and response bodies of the JSON API.

use crate::error::{AppError, AppResult};
use crate::services::orchestrator::AttackRun;
use crate::utils::imaging::encode_base64;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct LabelForm {
    pub class_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ClassifyForm {
    pub image_data: String,
    pub classifier_id: String,
}

#[derive(Debug, Deserialize)]
pub struct AttackForm {
    pub image_data: String,
    pub classifier_id: String,
    pub attack_id: String,
    pub robust: Option<String>,
    pub scale: Option<String>,
}

impl AttackForm {
    pub fn robust(&self) -> bool {
        matches!(
            self.robust.as_deref().map(str::to_ascii_lowercase).as_deref(),
            Some("1" | "true" | "on" | "yes")
        )
    }

    pub fn scale(&self) -> AppResult<f64> {
        match self.scale.as_deref().map(str::trim) {
            None | Some("") => Ok(1.0),
            Some(raw) => raw
                .parse::<f64>()
                .ok()
                .filter(|s| s.is_finite() && *s > 0.0 && *s <= 10.0)
                .ok_or_else(|| AppError::Unprocessable("scale has to be a number in (0, 10]".to_string())),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ConfusionForm {
    pub y_before: String,
    pub y_after: String,
}

impl ConfusionForm {
    fn split(raw: &str) -> Vec<String> {
        if raw.trim().is_empty() {
            return Vec::new();
        }
        raw.split(',').map(|s| s.trim().to_string()).collect()
    }

    pub fn before(&self) -> Vec<String> {
        Self::split(&self.y_before)
    }

    pub fn after(&self) -> Vec<String> {
        Self::split(&self.y_after)
    }
}

#[derive(Debug, Serialize)]
pub struct AttackResponse {
    pub original_image: String,
    pub result_image: String,
    pub difference_image: String,
    pub success: Vec<bool>,
    pub epsilons: Vec<f64>,
}

impl From<&AttackRun> for AttackResponse {
    fn from(run: &AttackRun) -> Self {
        Self {
            original_image: encode_base64(&run.original_image),
            result_image: encode_base64(&run.result_image),
            difference_image: encode_base64(&run.difference_image),
            success: run.success.clone(),
            epsilons: run.epsilons.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(robust: Option<&str>, scale: Option<&str>) -> AttackForm {
        AttackForm {
            image_data: String::new(),
            classifier_id: "0".into(),
            attack_id: "1".into(),
            robust: robust.map(Into::into),
            scale: scale.map(Into::into),
        }
    }

    #[test]
    fn test_attack_form_options() {
        assert!(!form(None, None).robust());
        assert!(form(Some("True"), None).robust());
        assert!(!form(Some("false"), None).robust());
        assert_eq!(form(None, None).scale().unwrap(), 1.0);
        assert_eq!(form(None, Some("2.5")).scale().unwrap(), 2.5);
        assert!(form(None, Some("big")).scale().is_err());
        assert!(form(None, Some("-1")).scale().is_err());
    }

    #[test]
    fn test_confusion_form_split() {
        let form = ConfusionForm {
            y_before: "cat, dog,cat".into(),
            y_after: "".into(),
        };
        assert_eq!(form.before(), vec!["cat", "dog", "cat"]);
        assert!(form.after().is_empty());
    }
}
