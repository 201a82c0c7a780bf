// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the provisioner.
//!
//! Every error surfaced to API callers carries an [`ErrorKind`] so the outer
//! layer can map it onto a response class without inspecting messages.

use std::fmt;

use crate::persistence::PersistenceError;
use crate::release::ReleaseError;

/// Classification of a provisioning error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Precondition violated by the caller. Nothing was persisted.
    BadRequest,
    /// Persistence or backend failure.
    Internal,
    /// Referenced entity (release, cluster, operation) does not exist.
    NotFound,
    /// Caller is not allowed to act on the runtime.
    Forbidden,
}

impl ErrorKind {
    /// Stable code for the kind, suitable for API responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "BAD_REQUEST",
            ErrorKind::Internal => "INTERNAL",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Forbidden => "FORBIDDEN",
        }
    }
}

/// Error returned by the service facade, converter and validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningError {
    kind: ErrorKind,
    message: String,
}

impl ProvisioningError {
    /// Create an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Precondition violation.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    /// Internal failure.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Missing entity.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Authorization failure.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    /// Prefix the message, keeping the kind.
    pub fn context(self, prefix: impl fmt::Display) -> Self {
        Self {
            kind: self.kind,
            message: format!("{}: {}", prefix, self.message),
        }
    }

    /// Kind of the error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Human readable message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Stable error code for API responses.
    pub fn error_code(&self) -> &'static str {
        self.kind.as_str()
    }
}

impl fmt::Display for ProvisioningError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ProvisioningError {}

impl From<PersistenceError> for ProvisioningError {
    fn from(err: PersistenceError) -> Self {
        let kind = match err {
            PersistenceError::NotFound { .. } => ErrorKind::NotFound,
            PersistenceError::Conflict(_) => ErrorKind::BadRequest,
            _ => ErrorKind::Internal,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<ReleaseError> for ProvisioningError {
    fn from(err: ReleaseError) -> Self {
        let kind = match err {
            ReleaseError::NotFound(_) => ErrorKind::NotFound,
            _ => ErrorKind::Internal,
        };
        Self::new(kind, err.to_string())
    }
}

/// Result type using [`ProvisioningError`].
pub type Result<T> = std::result::Result<T, ProvisioningError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_keeps_kind() {
        let err = ProvisioningError::bad_request("previous one is in progress")
            .context("Failed to start deprovisioning");

        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert_eq!(
            err.to_string(),
            "Failed to start deprovisioning: previous one is in progress"
        );
        assert_eq!(err.error_code(), "BAD_REQUEST");
    }

    #[test]
    fn test_persistence_error_mapping() {
        let not_found: ProvisioningError = PersistenceError::NotFound {
            entity: "cluster",
            id: "abc".to_string(),
        }
        .into();
        assert_eq!(not_found.kind(), ErrorKind::NotFound);

        let conflict: ProvisioningError =
            PersistenceError::Conflict("operation in progress".to_string()).into();
        assert_eq!(conflict.kind(), ErrorKind::BadRequest);

        let db: ProvisioningError = PersistenceError::Database {
            operation: "insert_cluster".to_string(),
            details: "disk full".to_string(),
        }
        .into();
        assert_eq!(db.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_release_error_mapping() {
        let err: ProvisioningError = ReleaseError::NotFound("1.99".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.message().contains("1.99"));
    }
}
