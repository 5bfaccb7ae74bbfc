//! Files owned by database rows: uploaded models, report images and
//! profile pictures.
//!
//! Deleting a row (and its cascade) goes in three steps: collect the
//! paths, delete the row, then remove the files. A failed delete leaves
//! every file in place.

use crate::db::Database;
use crate::error::AppResult;
use crate::models::auth::{User, DEFAULT_PROFILE_PICTURE};
use crate::models::classifier::Classifier;
use crate::models::config::StorageConfig;
use crate::models::report::{Report, ReportData};
use crate::utils::imaging::remove_file;
use std::path::PathBuf;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct StorageService {
    db: Database,
    config: StorageConfig,
}

impl StorageService {
    pub fn new(db: Database, config: StorageConfig) -> Self {
        Self { db, config }
    }

    /// Rendered images of a report. Data that does not follow the page
    /// layout (reports posted through the API) owns no files.
    pub fn report_files(&self, report: &Report) -> Vec<PathBuf> {
        let Ok(data) = serde_json::from_value::<ReportData>(report.data.0.clone()) else {
            return Vec::new();
        };
        let dir = self.config.dir(&self.config.reports_dir);
        data.images
            .iter()
            .flat_map(|images| [&images.original, &images.result, &images.difference])
            .map(|name| dir.join(name))
            .collect()
    }

    /// The model file plus the images of every report filed under it.
    pub async fn classifier_files(&self, classifier: &Classifier) -> AppResult<Vec<PathBuf>> {
        let mut files = vec![PathBuf::from(&classifier.file_path)];
        for report in self.db.reports().list_by_classifier(classifier.id).await? {
            files.extend(self.report_files(&report));
        }
        Ok(files)
    }

    /// Everything a user's account cascade takes with it.
    pub async fn user_files(&self, user: &User) -> AppResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        for classifier in self.db.users().get_classifiers(user.id).await? {
            files.extend(self.classifier_files(&classifier).await?);
        }
        if let Some(picture) = self.profile_picture(&user.image_file) {
            files.push(picture);
        }
        Ok(files)
    }

    /// Path of an uploaded profile picture; the shared default is never one.
    pub fn profile_picture(&self, image_file: &str) -> Option<PathBuf> {
        (image_file != DEFAULT_PROFILE_PICTURE)
            .then(|| self.config.dir(&self.config.profile_pictures_dir).join(image_file))
    }

    /// Remove files whose rows are already gone. Failures are logged, not
    /// returned: the delete itself has succeeded.
    pub async fn remove_all(&self, files: Vec<PathBuf>) {
        for path in files {
            match remove_file(&path).await {
                Ok(()) => debug!(path = %path.display(), "File removed"),
                Err(e) => warn!(path = %path.display(), error = %e, "Could not remove file"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::report::{ConfusionMatrix, ReportImages};
    use chrono::Utc;
    use serde_json::json;
    use std::path::Path;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"x").unwrap();
    }

    fn report_data(names: [&str; 3]) -> serde_json::Value {
        let data = ReportData {
            classifier: "RGB".into(),
            attack: "FastGradientSignMethod".into(),
            y_before: vec!["red".into()],
            y_after: vec!["green".into()],
            confusion_matrix: ConfusionMatrix {
                labels: vec!["green".into(), "red".into()],
                matrix: vec![vec![0, 0], vec![1, 0]],
            },
            images: vec![ReportImages {
                original: names[0].into(),
                result: names[1].into(),
                difference: names[2].into(),
            }],
        };
        serde_json::to_value(data).unwrap()
    }

    #[tokio::test]
    async fn test_user_files_cover_the_cascade() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            static_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let db = Database::in_memory().await.unwrap();
        let storage = StorageService::new(db.clone(), config.clone());

        let mut user = db.users().add("uma", "uma@example.com", "hash").await.unwrap();
        user.image_file = "face.jpg".into();
        db.users().update(&user).await.unwrap();
        let picture = config.dir("profile_pictures").join("face.jpg");
        touch(&picture);

        let model_path = config.dir("models").join("net.h5");
        touch(&model_path);
        let model = db
            .classifiers()
            .add("net", &model_path.to_string_lossy(), user.id)
            .await
            .unwrap();
        let images = ["a.jpg", "b.jpg", "c.jpg"].map(|n| config.dir("reports").join(n));
        images.iter().for_each(|p| touch(p));
        db.reports()
            .add(model.id, "RGB", &report_data(["a.jpg", "b.jpg", "c.jpg"]), Utc::now())
            .await
            .unwrap();
        db.reports()
            .add(model.id, "RGB", &json!({"free": "form"}), Utc::now())
            .await
            .unwrap();

        let files = storage.user_files(&user).await.unwrap();
        assert_eq!(files.len(), 5);

        assert!(db.users().delete(user.id).await.unwrap());
        storage.remove_all(files).await;
        assert!(!model_path.exists());
        assert!(!picture.exists());
        assert!(images.iter().all(|p| !p.exists()));
    }

    #[tokio::test]
    async fn test_default_picture_is_kept() {
        let db = Database::in_memory().await.unwrap();
        let storage = StorageService::new(db.clone(), StorageConfig::default());
        let user = db.users().add("vic", "vic@example.com", "hash").await.unwrap();

        assert!(storage.profile_picture(DEFAULT_PROFILE_PICTURE).is_none());
        assert!(storage.user_files(&user).await.unwrap().is_empty());
        // already gone
        storage.remove_all(vec![PathBuf::from("/nonexistent/loki/file")]).await;
    }
}
