pub mod api;
pub mod auth;
pub mod classifier;
pub mod config;
pub mod report;
