use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Extensions accepted for uploaded model files.
pub const MODEL_EXTENSIONS: [&str; 7] = ["h5", "pb", "pickle", "pt", "pth", "onnx", "safetensors"];
/// Extensions accepted for uploaded pictures.
pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// A model file uploaded by a user.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Classifier {
    pub id: i64,
    pub name: String,
    pub file_path: String,
    pub upload_date: DateTime<Utc>,
    pub user_id: i64,
}

impl Classifier {
    pub fn file_name(&self) -> &str {
        std::path::Path::new(&self.file_path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.file_path)
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct UploadClassifierForm {
    #[validate(length(min = 2, max = 15, message = "Name must be between 2 and 15 characters."))]
    pub name: String,
}

pub fn allowed_extension(file_name: &str, allowed: &[&str]) -> bool {
    crate::utils::imaging::extension_of(file_name)
        .map(|ext| allowed.contains(&ext.as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_extension() {
        assert!(allowed_extension("net.H5", &MODEL_EXTENSIONS));
        assert!(allowed_extension("weights.safetensors", &MODEL_EXTENSIONS));
        assert!(!allowed_extension("net.exe", &MODEL_EXTENSIONS));
        assert!(!allowed_extension("noext", &MODEL_EXTENSIONS));
        assert!(allowed_extension("cat.jpeg", &IMAGE_EXTENSIONS));
    }

    #[test]
    fn test_file_name() {
        let classifier = Classifier {
            id: 1,
            name: "mine".into(),
            file_path: "static/models/0123456789abcdef.h5".into(),
            upload_date: Utc::now(),
            user_id: 1,
        };
        assert_eq!(classifier.file_name(), "0123456789abcdef.h5");
    }
}
