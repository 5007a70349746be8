//! Comprehensive unit tests for validation.rs module

use std::path::Path;
use txt_history_store::validation::{InputValidator, MAX_PHONE_DIGITS, MIN_PHONE_DIGITS};
use txt_history_store::IngestError;

#[test]
fn test_validate_alias_valid() {
    assert!(InputValidator::validate_alias("Alice").is_ok());
}

#[test]
fn test_validate_alias_empty() {
    assert!(InputValidator::validate_alias("").is_err());
}

#[test]
fn test_validate_alias_whitespace_only() {
    assert!(InputValidator::validate_alias("   ").is_err());
}

#[test]
fn test_validate_alias_too_long() {
    let long_alias = "a".repeat(101);
    assert!(InputValidator::validate_alias(&long_alias).is_err());
}

#[test]
fn test_validate_alias_exactly_100_chars() {
    let alias = "a".repeat(100);
    assert!(InputValidator::validate_alias(&alias).is_ok());
}

#[test]
fn test_validate_alias_with_newline() {
    assert!(InputValidator::validate_alias("Mom\nDad").is_err());
}

#[test]
fn test_validate_alias_unicode() {
    assert!(InputValidator::validate_alias("José García").is_ok());
    assert!(InputValidator::validate_alias("O'Brien-Smith").is_ok());
}

#[test]
fn test_validate_alias_error_is_config() {
    let err = InputValidator::validate_alias("").unwrap_err();
    assert!(matches!(err, IngestError::Config(_)));
}

#[test]
fn test_validate_phone_digits_bounds() {
    let shortest = "1".repeat(MIN_PHONE_DIGITS);
    let longest = "1".repeat(MAX_PHONE_DIGITS);
    assert!(InputValidator::validate_phone_digits(&shortest, &shortest).is_ok());
    assert!(InputValidator::validate_phone_digits(&longest, &longest).is_ok());

    let too_long = "1".repeat(MAX_PHONE_DIGITS + 1);
    assert!(InputValidator::validate_phone_digits(&too_long, &too_long).is_err());
    assert!(InputValidator::validate_phone_digits("12", "12").is_err());
}

#[test]
fn test_validate_phone_digits_rejects_letters() {
    assert!(InputValidator::validate_phone_digits("555abc", "555abc").is_err());
}

#[test]
fn test_validate_input_path() {
    assert!(InputValidator::validate_input_path(Path::new("exports/+15551234567.txt")).is_ok());
    assert!(InputValidator::validate_input_path(Path::new("")).is_err());
    assert!(InputValidator::validate_input_path(Path::new("bad\0name.txt")).is_err());
}

#[test]
fn test_validate_input_path_too_long() {
    let long_path = "a".repeat(5000);
    assert!(InputValidator::validate_input_path(Path::new(&long_path)).is_err());
}

#[test]
fn test_validate_database_path() {
    assert!(InputValidator::validate_database_path("data/messages.db").is_ok());
    assert!(InputValidator::validate_database_path("  ").is_err());
    assert!(InputValidator::validate_database_path(&"d".repeat(1001)).is_err());
}

#[test]
fn test_sanitize_line_keeps_unicode_and_tabs() {
    assert_eq!(InputValidator::sanitize_line("héllo\tworld 👋"), "héllo\tworld 👋");
}

#[test]
fn test_sanitize_line_strips_carriage_return_and_nul() {
    assert_eq!(InputValidator::sanitize_line("hi\r"), "hi");
    assert_eq!(InputValidator::sanitize_line("a\0b"), "ab");
}
