//! Submission constraints for profiles, threads and comments.
//!
//! Checks never short-circuit: every failing field is reported so a form can
//! mark all of them at once.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub const NAME_MIN: usize = 3;
pub const NAME_MAX: usize = 30;
pub const USERNAME_MIN: usize = 3;
pub const USERNAME_MAX: usize = 30;
pub const BIO_MIN: usize = 3;
pub const BIO_MAX: usize = 1000;
pub const THREAD_TEXT_MIN: usize = 3;
pub const THREAD_TEXT_MAX: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ValidationErrors {
    pub errors: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(FieldError { field: field.to_string(), message: message.into() });
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }

    /// `Ok(())` when nothing was recorded.
    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.errors.iter().map(|e| format!("{}: {}", e.field, e.message)).collect();
        write!(f, "{}", parts.join("; "))
    }
}

fn check_len(errs: &mut ValidationErrors, field: &str, value: &str, min: usize, max: usize) {
    let n = value.trim().chars().count();
    if n < min {
        errs.push(field, format!("Minimum {min} characters"));
    } else if value.chars().count() > max {
        errs.push(field, format!("Maximum {max} characters"));
    }
}

fn check_url(errs: &mut ValidationErrors, field: &str, value: &str) {
    if value.trim().is_empty() {
        errs.push(field, "Required");
        return;
    }
    match url::Url::parse(value) {
        Ok(u) if matches!(u.scheme(), "http" | "https") && u.has_host() => {}
        _ => errs.push(field, "Must be an http(s) URL"),
    }
}

/// Route paths must be absolute (`/`, `/profile/edit`, `/thread/12`).
fn check_path(errs: &mut ValidationErrors, value: &str) {
    if !value.starts_with('/') {
        errs.push("path", "Must start with '/'");
    }
}

pub fn validate_profile(username: &str, name: &str, bio: &str, image: &str, path: &str) -> Result<(), ValidationErrors> {
    let mut errs = ValidationErrors::new();
    check_url(&mut errs, "image", image);
    check_len(&mut errs, "name", name, NAME_MIN, NAME_MAX);
    check_len(&mut errs, "username", username, USERNAME_MIN, USERNAME_MAX);
    if username.chars().any(char::is_whitespace) {
        errs.push("username", "Must not contain spaces");
    }
    check_len(&mut errs, "bio", bio, BIO_MIN, BIO_MAX);
    check_path(&mut errs, path);
    errs.into_result()
}

/// Shared by new threads and comments.
pub fn validate_thread_text(text: &str, path: &str) -> Result<(), ValidationErrors> {
    let mut errs = ValidationErrors::new();
    check_len(&mut errs, "text", text, THREAD_TEXT_MIN, THREAD_TEXT_MAX);
    check_path(&mut errs, path);
    errs.into_result()
}

pub fn validate_community(username: &str, name: &str, image: &str) -> Result<(), ValidationErrors> {
    let mut errs = ValidationErrors::new();
    check_len(&mut errs, "username", username, USERNAME_MIN, USERNAME_MAX);
    check_len(&mut errs, "name", name, NAME_MIN, NAME_MAX);
    check_url(&mut errs, "image", image);
    errs.into_result()
}
