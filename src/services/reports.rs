//! Batch reports: attack every image, compare labels before and after.

use crate::db::reports::ReportDao;
use crate::error::{AppError, AppResult};
use crate::models::report::{ConfusionMatrix, Report, ReportData, ReportImages, UpdateReportRequest};
use crate::services::orchestrator::{AttackRun, Orchestrator, RunOptions};
use crate::utils::imaging::random_name;
use chrono::Utc;
use image::DynamicImage;
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{info, warn};

/// Rows are labels before the attack, columns labels after it, both in
/// sorted order of the labels seen in either list.
pub fn confusion_matrix(before: &[String], after: &[String]) -> AppResult<ConfusionMatrix> {
    if before.len() != after.len() {
        return Err(AppError::Unprocessable(format!(
            "label lists differ in length ({} vs {})",
            before.len(),
            after.len()
        )));
    }

    let labels: Vec<String> = before
        .iter()
        .chain(after)
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let position = |label: &String| labels.binary_search(label).unwrap_or_default();
    let mut matrix = vec![vec![0usize; labels.len()]; labels.len()];
    for (b, a) in before.iter().zip(after) {
        matrix[position(b)][position(a)] += 1;
    }

    Ok(ConfusionMatrix { labels, matrix })
}

#[derive(Debug)]
pub struct ReportOutcome {
    pub classifier: String,
    pub attack: String,
    pub runs: Vec<AttackRun>,
    pub y_before: Vec<String>,
    pub y_after: Vec<String>,
    pub confusion_matrix: ConfusionMatrix,
}

impl ReportOutcome {
    /// Write every run's images to `dir` and build the stored payload.
    pub fn save(&self, dir: &Path, ext: &str) -> AppResult<ReportData> {
        std::fs::create_dir_all(dir)?;
        let mut images = Vec::with_capacity(self.runs.len());
        for run in &self.runs {
            let write = |bytes: &[u8]| -> AppResult<String> {
                let name = format!("{}.{ext}", random_name());
                std::fs::write(dir.join(&name), bytes)?;
                Ok(name)
            };
            images.push(ReportImages {
                original: write(&run.original_image)?,
                result: write(&run.result_image)?,
                difference: write(&run.difference_image)?,
            });
        }

        Ok(ReportData {
            classifier: self.classifier.clone(),
            attack: self.attack.clone(),
            y_before: self.y_before.clone(),
            y_after: self.y_after.clone(),
            confusion_matrix: self.confusion_matrix.clone(),
            images,
        })
    }
}

/// Run the attack on each image in turn; the first failure aborts the batch.
pub fn build_report(
    orchestrator: &Orchestrator,
    images: &[DynamicImage],
    classifier_id: &str,
    attack_id: &str,
    options: &RunOptions,
) -> AppResult<ReportOutcome> {
    let classifier = orchestrator.classifiers().get(classifier_id)?.descriptor.name.clone();
    let attack = orchestrator.attacks().get(attack_id)?.descriptor.name.clone();
    if images.is_empty() {
        return Err(AppError::Unprocessable("a report needs at least one image".to_string()));
    }

    let mut runs = Vec::with_capacity(images.len());
    let mut y_before = Vec::with_capacity(images.len());
    let mut y_after = Vec::with_capacity(images.len());

    for (i, image) in images.iter().enumerate() {
        let run = orchestrator.run_attack(image, classifier_id, attack_id, options).map_err(|e| {
            warn!(image = i, error = %e, "Report aborted");
            e
        })?;
        y_before.push(run.original_label.label.clone());
        y_after.push(run.result_label.label.clone());
        runs.push(run);
    }

    let confusion_matrix = confusion_matrix(&y_before, &y_after)?;
    info!(%classifier, %attack, images = runs.len(), "Report built");

    Ok(ReportOutcome {
        classifier,
        attack,
        runs,
        y_before,
        y_after,
        confusion_matrix,
    })
}

#[derive(Clone)]
pub struct ReportService {
    dao: ReportDao,
}

impl ReportService {
    pub fn new(dao: ReportDao) -> Self {
        Self { dao }
    }

    pub async fn create_report(&self, classifier_id: i64, pretrained_classifier: &str, data: Value) -> AppResult<Report> {
        let report = self
            .dao
            .add(classifier_id, pretrained_classifier, &data, Utc::now())
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                    AppError::Unprocessable(format!("classifier {classifier_id} does not exist"))
                }
                other => AppError::from(other),
            })?;
        info!(report = report.id, classifier = classifier_id, "Report created");
        Ok(report)
    }

    pub async fn get_report(&self, report_id: i64) -> AppResult<Report> {
        self.dao
            .get_by_id(report_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("report {report_id} does not exist")))
    }

    pub async fn update_report(&self, report_id: i64, changes: UpdateReportRequest) -> AppResult<Report> {
        if changes.classifier_id.is_none() && changes.pretrained_classifier.is_none() && changes.data.is_none() {
            return Err(AppError::BadRequest("nothing to update".to_string()));
        }

        let mut report = self.get_report(report_id).await?;
        if let Some(classifier_id) = changes.classifier_id {
            report.classifier_id = classifier_id;
        }
        if let Some(name) = changes.pretrained_classifier {
            report.pretrained_classifier = name;
        }
        if let Some(data) = changes.data {
            report.data = sqlx::types::Json(data);
        }

        self.dao.update(&report).await?;
        Ok(report)
    }

    pub async fn delete_report(&self, report_id: i64) -> AppResult<()> {
        if !self.dao.delete(report_id).await? {
            return Err(AppError::NotFound(format!("report {report_id} does not exist")));
        }
        info!(report = report_id, "Report deleted");
        Ok(())
    }

    pub fn dao(&self) -> &ReportDao {
        &self.dao
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::orchestrator::test_support::{rgb_orchestrator, solid};

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_confusion_matrix() {
        let before = strings(&["dog", "cat", "dog", "cat"]);
        let after = strings(&["dog", "bird", "cat", "cat"]);
        let cm = confusion_matrix(&before, &after).unwrap();

        assert_eq!(cm.labels, strings(&["bird", "cat", "dog"]));
        assert_eq!(cm.matrix, vec![vec![0, 0, 0], vec![1, 1, 0], vec![0, 1, 1]]);
        let total: usize = cm.matrix.iter().flatten().sum();
        assert_eq!(total, before.len());
    }

    #[test]
    fn test_confusion_matrix_length_mismatch() {
        let err = confusion_matrix(&strings(&["a"]), &strings(&["a", "b"])).unwrap_err();
        assert!(matches!(err, AppError::Unprocessable(_)));
        assert_eq!(confusion_matrix(&[], &[]).unwrap().labels.len(), 0);
    }

    #[test]
    fn test_build_report() {
        let orchestrator = rgb_orchestrator();
        let images = vec![solid([150, 100, 100]), solid([90, 90, 200])];
        let outcome = build_report(&orchestrator, &images, "0", "1", &RunOptions::default()).unwrap();

        assert_eq!(outcome.classifier, "RGB");
        assert_eq!(outcome.attack, "FastGradientSignMethod");
        assert_eq!(outcome.y_before, strings(&["red", "blue"]));
        assert_eq!(outcome.y_after.len(), 2);
        assert_ne!(outcome.y_after[0], "red");
        let total: usize = outcome.confusion_matrix.matrix.iter().flatten().sum();
        assert_eq!(total, 2);

        let dir = tempfile::tempdir().unwrap();
        let data = outcome.save(dir.path(), "jpg").unwrap();
        assert_eq!(data.images.len(), 2);
        assert!(dir.path().join(&data.images[1].difference).is_file());
    }

    #[test]
    fn test_build_report_rejects_bad_ids() {
        let orchestrator = rgb_orchestrator();
        let images = vec![solid([1, 2, 3])];
        assert!(matches!(
            build_report(&orchestrator, &images, "0", "10", &RunOptions::default()),
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            build_report(&orchestrator, &[], "0", "1", &RunOptions::default()),
            Err(AppError::Unprocessable(_))
        ));
    }
}
