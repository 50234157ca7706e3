//! Input validation utilities
//!
//! Every validator returns the message sent back with a `400`.

use regex::Regex;
use std::sync::OnceLock;

use crate::error::ApiError;

const MIN_PASSWORD_LEN: usize = 4;
const MAX_PASSWORD_LEN: usize = 128;
const MAX_NAME_LEN: usize = 100;

/// Validate username
pub fn validate_username(username: &str) -> Result<(), String> {
    if username.is_empty() {
        return Err("Username is required".to_string());
    }

    if username.len() < 3 {
        return Err("Username must be at least 3 characters long".to_string());
    }

    if username.len() > 32 {
        return Err("Username must be at most 32 characters long".to_string());
    }

    static USERNAME_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = USERNAME_REGEX
        .get_or_init(|| Regex::new(r"^[a-zA-Z0-9_]+$").expect("Failed to compile username regex"));

    if !regex.is_match(username) {
        return Err("Username can only contain letters, numbers, and underscores".to_string());
    }

    Ok(())
}

/// Validate a required email
pub fn validate_email(email: &str) -> Result<(), String> {
    if email.is_empty() {
        return Err("Email is required".to_string());
    }

    validate_optional_email(email)
}

/// Validate an email that may be left blank
pub fn validate_optional_email(email: &str) -> Result<(), String> {
    if email.is_empty() {
        return Ok(());
    }

    if email.len() > 254 {
        return Err("Email must be at most 254 characters long".to_string());
    }

    static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = EMAIL_REGEX.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
            .expect("Failed to compile email regex")
    });

    if !regex.is_match(email) {
        return Err("Invalid email format".to_string());
    }

    Ok(())
}

/// Validate password
pub fn validate_password(password: &str) -> Result<(), String> {
    if password.is_empty() {
        return Err("Password is required".to_string());
    }

    let len = password.chars().count();
    if len < MIN_PASSWORD_LEN {
        return Err(format!(
            "Password must be at least {} characters long",
            MIN_PASSWORD_LEN
        ));
    }

    if len > MAX_PASSWORD_LEN {
        return Err(format!(
            "Password must be at most {} characters long",
            MAX_PASSWORD_LEN
        ));
    }

    Ok(())
}

pub fn validate_phone(phone: &str) -> Result<(), String> {
    if phone.is_empty() {
        return Ok(());
    }

    static PHONE_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = PHONE_REGEX
        .get_or_init(|| Regex::new(r"^\+?[0-9 -]{3,20}$").expect("Failed to compile phone regex"));

    if !regex.is_match(phone) {
        return Err("Invalid phone number".to_string());
    }

    Ok(())
}

/// Validate the display name of an organization, role, project or product
pub fn validate_name(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{} is required", field));
    }

    if value.chars().count() > MAX_NAME_LEN {
        return Err(format!(
            "{} must be at most {} characters long",
            field, MAX_NAME_LEN
        ));
    }

    Ok(())
}

/// Lift a validator result into an [`ApiError::Validation`]
pub fn check(result: Result<(), String>) -> Result<(), ApiError> {
    result.map_err(ApiError::Validation)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_username_rules() {
        assert!(validate_username("alice").is_ok());
        assert!(validate_username("admin_acme_2").is_ok());
        assert!(validate_username("").is_err());
        assert!(validate_username("al").is_err());
        assert!(validate_username(&"a".repeat(33)).is_err());
        assert!(validate_username("alice smith").is_err());
        assert!(validate_username("alice;drop").is_err());
    }

    #[test]
    fn test_email_rules() {
        assert!(validate_email("alice@example.com").is_ok());
        assert!(validate_email("").is_err());
        assert!(validate_email("alice@").is_err());
        assert!(validate_optional_email("").is_ok());
        assert!(validate_optional_email("nope").is_err());
    }

    #[test]
    fn test_password_rules() {
        assert!(validate_password("pw123").is_ok());
        assert!(validate_password("abc").is_err());
        assert!(validate_password("").is_err());
        assert!(validate_password(&"x".repeat(129)).is_err());
        assert!(validate_password(&"x".repeat(128)).is_ok());
    }

    #[test]
    fn test_phone_rules() {
        assert!(validate_phone("").is_ok());
        assert!(validate_phone("+86 138-0000-0000").is_ok());
        assert!(validate_phone("call me").is_err());
    }

    #[test]
    fn test_name_rules() {
        assert!(validate_name("Name", "Acme").is_ok());
        assert_eq!(
            validate_name("Name", "   ").unwrap_err(),
            "Name is required"
        );
        assert!(validate_name("Name", &"n".repeat(101)).is_err());
    }
}
