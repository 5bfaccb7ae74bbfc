//! Multipart form bodies of the HTML pages.

use crate::error::{AppError, AppResult};
use crate::models::classifier::{allowed_extension, IMAGE_EXTENSIONS};
use crate::utils::imaging::decode_image;
use axum::extract::Multipart;
use image::DynamicImage;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn is_image(&self) -> bool {
        allowed_extension(&self.file_name, &IMAGE_EXTENSIONS)
    }

    pub fn decode_image(&self) -> AppResult<DynamicImage> {
        decode_image(&self.bytes)
    }
}

/// Text fields and files of one multipart request, read fully into memory.
#[derive(Debug, Default)]
pub struct MultipartForm {
    fields: HashMap<String, String>,
    files: HashMap<String, Vec<Upload>>,
}

impl MultipartForm {
    pub async fn read(mut multipart: Multipart) -> AppResult<Self> {
        let mut form = Self::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| AppError::BadRequest(format!("Failed to read multipart field: {e}")))?
        {
            let name = field.name().unwrap_or_default().to_string();

            match field.file_name().map(str::to_string) {
                Some(file_name) => {
                    let bytes = field
                        .bytes()
                        .await
                        .map_err(|e| AppError::BadRequest(format!("Failed to read upload: {e}")))?;
                    // An empty file input still sends a part
                    if file_name.is_empty() && bytes.is_empty() {
                        continue;
                    }
                    debug!(field = %name, file = %file_name, size = bytes.len(), "Received upload");
                    form.files.entry(name).or_default().push(Upload {
                        file_name,
                        bytes: bytes.to_vec(),
                    });
                }
                None => {
                    let value = field
                        .text()
                        .await
                        .map_err(|e| AppError::BadRequest(format!("Failed to read form field: {e}")))?;
                    form.fields.insert(name, value);
                }
            }
        }

        Ok(form)
    }

    /// Trimmed text field; empty counts as missing.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(|v| v.trim()).filter(|v| !v.is_empty())
    }

    pub fn file(&self, name: &str) -> Option<&Upload> {
        self.files.get(name).and_then(|files| files.first())
    }

    pub fn take_files(&mut self, name: &str) -> Vec<Upload> {
        self.files.remove(name).unwrap_or_default()
    }
}

/// Collects validation messages for a re-rendered form.
#[derive(Debug, Default)]
pub struct FormErrors(Vec<String>);

impl FormErrors {
    pub fn require<'a>(&mut self, value: Option<&'a str>, message: &str) -> Option<&'a str> {
        if value.is_none() {
            self.push(message);
        }
        value
    }

    pub fn push(&mut self, message: impl Into<String>) {
        self.0.push(message.into());
    }

    pub fn extend_validation(&mut self, errors: &validator::ValidationErrors) {
        for (field, errs) in errors.field_errors() {
            for err in errs {
                match &err.message {
                    Some(message) => self.push(message.to_string()),
                    None => self.push(format!("Invalid value for {field}.")),
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}
