use std::path::Path;

use crate::error::{IngestError, Result};

/// Shortest accepted phone number (carrier short codes)
pub const MIN_PHONE_DIGITS: usize = 3;
/// Longest accepted phone number (E.164 limit)
pub const MAX_PHONE_DIGITS: usize = 15;

/// Validation utilities for input sanitization and edge case handling
#[derive(Debug, Copy, Clone)]
pub struct InputValidator;

impl InputValidator {
    /// Validate a contact alias
    pub fn validate_alias(alias: &str) -> Result<()> {
        if alias.trim().is_empty() {
            return Err(IngestError::Config("Alias cannot be empty".to_string()));
        }

        if alias.chars().count() > 100 {
            return Err(IngestError::Config(format!(
                "Alias too long (max 100 characters): {alias}"
            )));
        }

        if alias.chars().any(char::is_control) {
            return Err(IngestError::Config(format!(
                "Alias contains control characters: {alias:?}"
            )));
        }

        Ok(())
    }

    /// Validate the digit payload of a phone number after punctuation has been stripped
    pub fn validate_phone_digits(raw: &str, digits: &str) -> Result<()> {
        if digits.is_empty() {
            return Err(IngestError::Config(format!(
                "Phone number has no digits: {raw:?}"
            )));
        }

        if !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(IngestError::Config(format!(
                "Phone number contains disallowed characters: {raw:?}"
            )));
        }

        if !(MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS).contains(&digits.len()) {
            return Err(IngestError::Config(format!(
                "Phone number must be between {MIN_PHONE_DIGITS} and {MAX_PHONE_DIGITS} digits: {raw:?}"
            )));
        }

        Ok(())
    }

    /// Validate an artifact or export path given on the command line
    pub fn validate_input_path(path: &Path) -> Result<()> {
        let path_str = path.to_string_lossy();
        if path_str.is_empty() {
            return Err(IngestError::Config("Path cannot be empty".to_string()));
        }

        if path_str.len() > 4096 {
            return Err(IngestError::Config(
                "Path too long (max 4096 characters)".to_string(),
            ));
        }

        if path_str.contains('\0') {
            return Err(IngestError::Config(
                "Path contains a NUL byte".to_string(),
            ));
        }

        Ok(())
    }

    /// Validate the store location
    pub fn validate_database_path(path: &str) -> Result<()> {
        if path.trim().is_empty() {
            return Err(IngestError::Config(
                "Database path cannot be empty".to_string(),
            ));
        }

        if path.len() > 1000 {
            return Err(IngestError::Config("Database path too long".to_string()));
        }

        Ok(())
    }

    /// Strip control characters other than tab from a single line
    #[must_use]
    pub fn sanitize_line(text: &str) -> String {
        text.chars()
            .filter(|c| !c.is_control() || *c == '\t')
            .collect()
    }
}
