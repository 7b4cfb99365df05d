//! Configuration validation.

use crate::error::ConfigError;
use crate::schema::Config;

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    /// Collapse the first error into a [`ConfigError`].
    pub fn into_result(self) -> Result<Vec<ValidationWarning>, ConfigError> {
        match self.errors.into_iter().next() {
            Some(error) => Err(ConfigError::InvalidValue {
                field: error.path,
                message: error.message,
            }),
            None => Ok(self.warnings),
        }
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration.
    pub fn validate(config: &Config) -> Result<ValidationResult, ConfigError> {
        let mut result = ValidationResult::default();

        Self::validate_service(config, &mut result);
        Self::validate_host(config, &mut result);
        Self::validate_install(config, &mut result);
        Self::validate_logging(config, &mut result);

        Ok(result)
    }

    /// Check a name that ends up in the service key and the init script path.
    pub fn check_identifier(value: &str) -> Option<&'static str> {
        if value.trim().is_empty() {
            return Some("must not be empty");
        }
        if value.chars().any(char::is_whitespace) {
            return Some("must not contain whitespace");
        }
        if value.contains('/') {
            return Some("must not contain '/'");
        }
        if value.contains('@') {
            return Some("must not contain '@'");
        }
        None
    }

    fn validate_service(config: &Config, result: &mut ValidationResult) {
        if let Some(message) = Self::check_identifier(&config.service.name) {
            result.add_error(ValidationError::new("service.name", message));
        }

        if let Some(instance) = &config.service.instance {
            if let Some(message) = Self::check_identifier(instance) {
                result.add_error(ValidationError::new("service.instance", message));
            }
        }

        if config.service.dependencies.iter().any(|d| d.trim().is_empty()) {
            result.add_warning(ValidationWarning::new(
                "service.dependencies",
                "blank dependency entries are ignored",
            ));
        }

        if config.service.description.is_none() {
            result.add_warning(ValidationWarning::new(
                "service.description",
                "no description set, the display name will be used",
            ));
        }
    }

    fn validate_host(config: &Config, result: &mut ValidationResult) {
        if config.host.listen_timeout_secs == 0 {
            result.add_error(ValidationError::new(
                "host.listen_timeout_secs",
                "listen_timeout_secs must be greater than 0",
            ));
        }

        if config.host.control_timeout_secs == 0 {
            result.add_error(ValidationError::new(
                "host.control_timeout_secs",
                "control_timeout_secs must be greater than 0",
            ));
        }

        if let Some(dir) = &config.host.working_directory {
            if dir.is_relative() {
                result.add_warning(ValidationWarning::new(
                    "host.working_directory",
                    "relative working directory is resolved against the launch directory",
                ));
            }
        }
    }

    fn validate_install(config: &Config, result: &mut ValidationResult) {
        if config.install.init_dir.is_relative() {
            result.add_error(ValidationError::new(
                "install.init_dir",
                "init_dir must be an absolute path",
            ));
        }

        if config.install.pid_dir.is_relative() {
            result.add_error(ValidationError::new(
                "install.pid_dir",
                "pid_dir must be an absolute path",
            ));
        }

        if config.install.command_timeout_secs == 0 {
            result.add_error(ValidationError::new(
                "install.command_timeout_secs",
                "command_timeout_secs must be greater than 0",
            ));
        }
    }

    fn validate_logging(config: &Config, result: &mut ValidationResult) {
        let level = config.logging.level.to_ascii_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            result.add_warning(ValidationWarning::new(
                "logging.level",
                format!("unknown level '{}', falling back to info", config.logging.level),
            ));
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
