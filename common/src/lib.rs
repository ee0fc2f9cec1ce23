//! Shared building blocks for the SQL exporter: configuration loading,
//! error types and data models.

pub mod config;
pub mod errors;
pub mod models;

pub use config::AppConfig;
pub use errors::{AppError, AppResult, MappingError};
