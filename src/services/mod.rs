pub mod attacks;
pub mod auth;
pub mod classifiers;
pub mod datasets;
pub mod orchestrator;
pub mod registry;
pub mod reports;
pub mod storage;
pub mod users;
