//! Dataset registry and class-id to label lookup.

use crate::error::{AppError, AppResult};
use crate::services::registry::{parse_index, Descriptor};
use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::path::Path;
use tracing::info;

/// Immutable `class id -> label` table.
#[derive(Debug, Clone)]
pub struct LabelTable {
    labels: Vec<String>,
}

impl LabelTable {
    pub fn new(labels: Vec<String>) -> Self {
        Self { labels }
    }

    /// Accepts the official class index (`{"0": ["n01440764", "tench"], ...}`)
    /// or a plain array of labels.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)?;

        let labels = match value {
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(label) => Ok(label),
                    other => Err(anyhow!("expected a string label, got {other}")),
                })
                .collect::<Result<Vec<_>>>()?,
            Value::Object(map) => {
                let mut labels = Vec::with_capacity(map.len());
                for k in 0..map.len() {
                    let entry = map
                        .get(&k.to_string())
                        .ok_or_else(|| anyhow!("class index is missing id {k}"))?;
                    let label = entry
                        .get(1)
                        .and_then(Value::as_str)
                        .ok_or_else(|| anyhow!("class {k} has no label"))?;
                    labels.push(label.to_string());
                }
                labels
            }
            _ => return Err(anyhow!("unsupported label file layout")),
        };

        Ok(Self { labels })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("reading label file {}", path.display()))?;
        Self::from_json(&bytes)
    }

    pub fn all(&self) -> &[String] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Label for a numeric class id, if in range.
    pub fn label(&self, class_id: usize) -> Option<&str> {
        self.labels.get(class_id).map(String::as_str)
    }

    /// Label for a textual class id; same error rules as the registries.
    pub fn get(&self, raw_class_id: &str) -> AppResult<&str> {
        let index = parse_index(raw_class_id, self.labels.len(), "class")?;
        Ok(&self.labels[index])
    }
}

#[derive(Debug, Clone)]
pub struct Dataset {
    pub descriptor: Descriptor,
    pub labels: LabelTable,
}

#[derive(Debug, Clone, Default)]
pub struct DatasetRegistry {
    datasets: Vec<Dataset>,
}

impl DatasetRegistry {
    pub fn new(datasets: Vec<Dataset>) -> Self {
        Self { datasets }
    }

    /// The built-in registry: ImageNet only.
    pub fn load(imagenet_labels: &Path) -> Result<Self> {
        let labels = LabelTable::load(imagenet_labels)?;
        info!(labels = labels.len(), "ImageNet labels loaded");

        Ok(Self::new(vec![Dataset {
            descriptor: Descriptor::new("ImageNet", "https://arxiv.org/abs/1409.0575"),
            labels,
        }]))
    }

    pub fn all(&self) -> Vec<Descriptor> {
        self.datasets.iter().map(|d| d.descriptor.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }

    pub fn get(&self, raw_id: &str) -> AppResult<&Dataset> {
        let index = parse_index(raw_id, self.datasets.len(), "dataset")?;
        Ok(&self.datasets[index])
    }

    /// First dataset; pretrained classifiers are all ImageNet models.
    pub fn imagenet(&self) -> AppResult<&Dataset> {
        self.datasets
            .first()
            .ok_or_else(|| AppError::NotFound("no dataset registered".to_string()))
    }
}
