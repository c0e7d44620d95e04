// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Domain Error Taxonomy
//!
//! Every fallible operation in the engine returns `Result<T, AntboxError>`.
//! Each variant carries a stable string code that survives all layer
//! crossings unchanged; only the outermost transport layer maps codes to
//! protocol statuses (404/403/401/400/409/500).
//!
//! `ValidationErrors` is an aggregator, not a hierarchy: a single failed
//! write reports every failing property constraint at once.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for all engine operations
#[derive(Debug, Error)]
pub enum AntboxError {
    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("duplicated node: {0}")]
    DuplicatedNode(String),

    #[error("binary content missing for node: {0}")]
    NodeFileNotFound(String),

    #[error("operation not applicable to this node kind: {0}")]
    NodeType(String),

    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unknown error: {0}")]
    Unknown(String),
}

impl AntboxError {
    /// Stable error code. Protocol layers key their status mapping off this
    /// string; it never changes between releases.
    pub fn code(&self) -> &'static str {
        match self {
            AntboxError::NodeNotFound(_) => "NodeNotFound",
            AntboxError::DuplicatedNode(_) => "DuplicatedNode",
            AntboxError::NodeFileNotFound(_) => "NodeFileNotFound",
            AntboxError::NodeType(_) => "NodeTypeError",
            AntboxError::Validation(_) => "ValidationError",
            AntboxError::Forbidden(_) => "ForbiddenError",
            AntboxError::Unauthorized(_) => "UnauthorizedError",
            AntboxError::BadRequest(_) => "BadRequestError",
            AntboxError::Unknown(_) => "UnknownError",
        }
    }
}

/// Property-level validation error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyErrorCode {
    PropertyRequired,
    PropertyType,
    PropertyNotInList,
    PropertyDoesNotMatchRegex,
    ReadonlyProperty,
    NodeTitleRequired,
    InvalidMimetype,
    InvalidParent,
    InvalidUuid,
    InvalidEmail,
    InvalidPropertyName,
    InvalidDefaultValue,
    ImmutableField,
}

impl PropertyErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyErrorCode::PropertyRequired => "PropertyRequired",
            PropertyErrorCode::PropertyType => "PropertyType",
            PropertyErrorCode::PropertyNotInList => "PropertyNotInList",
            PropertyErrorCode::PropertyDoesNotMatchRegex => "PropertyDoesNotMatchRegex",
            PropertyErrorCode::ReadonlyProperty => "ReadonlyProperty",
            PropertyErrorCode::NodeTitleRequired => "NodeTitleRequired",
            PropertyErrorCode::InvalidMimetype => "InvalidMimetype",
            PropertyErrorCode::InvalidParent => "InvalidParent",
            PropertyErrorCode::InvalidUuid => "InvalidUuid",
            PropertyErrorCode::InvalidEmail => "InvalidEmail",
            PropertyErrorCode::InvalidPropertyName => "InvalidPropertyName",
            PropertyErrorCode::InvalidDefaultValue => "InvalidDefaultValue",
            PropertyErrorCode::ImmutableField => "ImmutableField",
        }
    }
}

impl std::fmt::Display for PropertyErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single failed constraint on one property or envelope field
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyError {
    pub code: PropertyErrorCode,
    /// Property key (`<aspectUuid>:<name>`) or envelope field name
    pub property: String,
    pub message: String,
}

impl PropertyError {
    pub fn new(
        code: PropertyErrorCode,
        property: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code,
            property: property.into(),
            message: message.into(),
        }
    }
}

/// Aggregate of every property-level failure found during one validation pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationErrors {
    pub errors: Vec<PropertyError>,
}

impl std::error::Error for ValidationErrors {}

impl ValidationErrors {
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    pub fn single(
        code: PropertyErrorCode,
        property: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            errors: vec![PropertyError::new(code, property, message)],
        }
    }

    pub fn push(&mut self, error: PropertyError) {
        self.errors.push(error);
    }

    pub fn merge(&mut self, other: ValidationErrors) {
        self.errors.extend(other.errors);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// True when any aggregated error carries the given code
    pub fn has(&self, code: PropertyErrorCode) -> bool {
        self.errors.iter().any(|e| e.code == code)
    }

    /// Consume the accumulator: `Ok(())` when nothing failed
    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "validation failed: ")?;
        for (i, e) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{} [{}]: {}", e.property, e.code, e.message)?;
        }
        Ok(())
    }
}

impl From<sqlx::Error> for AntboxError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AntboxError::NodeNotFound("row not found".to_string()),
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                AntboxError::DuplicatedNode(db.message().to_string())
            }
            _ => AntboxError::Unknown(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for AntboxError {
    fn from(err: serde_json::Error) -> Self {
        AntboxError::BadRequest(err.to_string())
    }
}

impl From<std::io::Error> for AntboxError {
    fn from(err: std::io::Error) -> Self {
        AntboxError::Unknown(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_codes() {
        assert_eq!(AntboxError::NodeNotFound("x".into()).code(), "NodeNotFound");
        assert_eq!(
            AntboxError::DuplicatedNode("x".into()).code(),
            "DuplicatedNode"
        );
        assert_eq!(AntboxError::Forbidden("x".into()).code(), "ForbiddenError");
        assert_eq!(
            AntboxError::Validation(ValidationErrors::new()).code(),
            "ValidationError"
        );
    }

    #[test]
    fn test_validation_aggregation() {
        let mut errors = ValidationErrors::new();
        errors.push(PropertyError::new(
            PropertyErrorCode::PropertyRequired,
            "a:code",
            "value missing",
        ));
        errors.push(PropertyError::new(
            PropertyErrorCode::PropertyDoesNotMatchRegex,
            "a:code",
            "does not match ^[A-Z]+$",
        ));

        assert!(errors.has(PropertyErrorCode::PropertyRequired));
        assert!(errors.has(PropertyErrorCode::PropertyDoesNotMatchRegex));
        assert!(!errors.has(PropertyErrorCode::ReadonlyProperty));
        assert!(errors.clone().into_result().is_err());
    }

    #[test]
    fn test_empty_aggregate_is_ok() {
        assert!(ValidationErrors::new().into_result().is_ok());
    }
}
