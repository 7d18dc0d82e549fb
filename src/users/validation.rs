use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{AppError, AppResult, FieldError};

pub const MIN_PASSWORD_LEN: usize = 8;

pub fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn check_password(password: &str, confirm: &str, errors: &mut Vec<FieldError>) {
    if password.chars().count() < MIN_PASSWORD_LEN {
        errors.push(FieldError::new(
            "password",
            "A password must have at least 8 characters",
        ));
    }
    if password != confirm {
        errors.push(FieldError::new("passwordConfirm", "Passwords are not the same!"));
    }
}

/// Collects every complaint about a signup form before failing.
pub fn validate_signup(name: &str, email: &str, password: &str, confirm: &str) -> AppResult<()> {
    let mut errors = Vec::new();
    if name.trim().is_empty() {
        errors.push(FieldError::new("name", "Please tell us your name!"));
    }
    if !is_valid_email(email) {
        errors.push(FieldError::new("email", "Please provide a valid email"));
    }
    check_password(password, confirm, &mut errors);
    into_result(errors)
}

pub fn validate_new_password(password: &str, confirm: &str) -> AppResult<()> {
    let mut errors = Vec::new();
    check_password(password, confirm, &mut errors);
    into_result(errors)
}

fn into_result(errors: Vec<FieldError>) -> AppResult<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(AppError::Validation(errors))
    }
}
