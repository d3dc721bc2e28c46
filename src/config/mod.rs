//! Configuration loading and validation.

pub mod schema;
pub mod validation;

pub use schema::{Cli, Config, LogLevel};
pub use validation::{validate_config, ValidationError};
