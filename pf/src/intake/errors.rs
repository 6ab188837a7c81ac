//! Structured validation errors

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Machine-readable reason a field was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldErrorCode {
    Required,
    TooShort,
    TooLong,
    InvalidFormat,
    Unsupported,
}

impl FieldErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldErrorCode::Required => "required",
            FieldErrorCode::TooShort => "too_short",
            FieldErrorCode::TooLong => "too_long",
            FieldErrorCode::InvalidFormat => "invalid_format",
            FieldErrorCode::Unsupported => "unsupported",
        }
    }
}

impl fmt::Display for FieldErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One rejected field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
    pub code: FieldErrorCode,
}

impl FieldError {
    pub fn new(field: impl Into<String>, code: FieldErrorCode, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            code,
        }
    }
}

/// Every violation found in an intake request
#[derive(Debug, Clone, PartialEq, Eq, Default, Error, Serialize, Deserialize)]
#[error("request failed validation: {}", summarize(.details))]
pub struct ValidationErrors {
    pub details: Vec<FieldError>,
}

fn summarize(details: &[FieldError]) -> String {
    details
        .iter()
        .map(|d| format!("{} ({})", d.field, d.code))
        .collect::<Vec<_>>()
        .join(", ")
}

impl ValidationErrors {
    pub fn push(&mut self, field: &str, code: FieldErrorCode, message: impl Into<String>) {
        self.details.push(FieldError::new(field, code, message));
    }

    pub fn is_empty(&self) -> bool {
        self.details.is_empty()
    }

    /// Whether any error was reported for `field`
    pub fn has(&self, field: &str) -> bool {
        self.details.iter().any(|d| d.field == field)
    }

    pub fn code_for(&self, field: &str) -> Option<FieldErrorCode> {
        self.details.iter().find(|d| d.field == field).map(|d| d.code)
    }
}
