//! Domain-level validation errors.

/// Errors raised by domain value parsing and validation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DomainError {
    #[error("unknown cardinal direction: {0}")]
    UnknownCardinal(String),
    #[error("invalid value for {field}: {reason}")]
    InvalidField { field: String, reason: String },
}

impl DomainError {
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
