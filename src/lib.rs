//! Loki: run adversarial attacks against pretrained image classifiers and
//! build misclassification reports, behind a small web application.

pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod services;
pub mod utils;
