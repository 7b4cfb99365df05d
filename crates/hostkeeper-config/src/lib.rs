//! # hostkeeper Config
//!
//! Configuration management for hostkeeper: the service identity, host
//! run-loop tuning, installer paths and logging.

mod error;
mod loader;
mod schema;
mod validator;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::*;
pub use validator::{ConfigValidator, ValidationError, ValidationResult, ValidationWarning};
