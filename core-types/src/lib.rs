//! Shared types, error classification, retry policy, and configuration for
//! the account resolution core.

pub mod config;
pub mod error;
pub mod retry;
pub mod types;

pub use config::AppConfig;
pub use error::ApiError;
pub use retry::RetryPolicy;
