use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Report {
    pub id: i64,
    pub date: DateTime<Utc>,
    pub classifier_id: i64,
    pub pretrained_classifier: String,
    pub data: Json<Value>,
}

/// Body of `POST /api/1/reports/`.
#[derive(Debug, Deserialize)]
pub struct CreateReportRequest {
    pub classifier_id: i64,
    pub pretrained_classifier: String,
    pub data: Value,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateReportRequest {
    pub classifier_id: Option<i64>,
    pub pretrained_classifier: Option<String>,
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub labels: Vec<String>,
    pub matrix: Vec<Vec<usize>>,
}

/// File names of the images rendered for one report entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportImages {
    pub original: String,
    pub result: String,
    pub difference: String,
}

/// What the report pages store in `Report::data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportData {
    pub classifier: String,
    pub attack: String,
    pub y_before: Vec<String>,
    pub y_after: Vec<String>,
    pub confusion_matrix: ConfusionMatrix,
    #[serde(default)]
    pub images: Vec<ReportImages>,
}
