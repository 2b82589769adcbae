//! Error handling for Cocoon Router
//!
//! This module provides error types and result aliases for routing,
//! ingestion and background maintenance operations.

use std::io;
use thiserror::Error;

/// Errors that can occur in Cocoon Router operations
#[derive(Error, Debug)]
pub enum Error {
    /// Input failed validation (malformed connection info, unknown sort field, ...)
    #[error("Validation error: {0}")]
    Validation(String),

    /// A shard descriptor names a storage technology we cannot bind to
    #[error("Unsupported storage technology: {0}")]
    UnsupportedTechnology(String),

    /// A tenant, shard or record could not be found
    #[error("Not found: {0}")]
    NotFound(String),

    /// No active, non-seed shard is available for placement
    #[error("No shard available for tenant placement")]
    NoShardAvailable,

    /// The same tenant id exists on more than one shard
    #[error("Tenant {tenant} found on multiple shards: {shards:?}")]
    DuplicateTenant {
        tenant: String,
        shards: Vec<String>,
    },

    /// A per-shard storage operation failed; retried at the next cycle
    #[error("Transient storage error on shard {shard}: {message}")]
    TransientStorage {
        shard: String,
        message: String,
    },

    /// A queue message could not be decoded or processed
    #[error("Poison message: {0}")]
    PoisonMessage(String),

    /// Errors related to transaction handling
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Errors raised by the message queue
    #[error("Queue error: {0}")]
    Queue(String),

    /// Errors related to configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors related to serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Errors related to I/O operations
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Generic error type for other cases
    #[error("{0}")]
    Other(String),
}

/// Result type for Cocoon Router operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a new validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a new unsupported technology error
    pub fn unsupported_technology(tag: impl Into<String>) -> Self {
        Self::UnsupportedTechnology(tag.into())
    }

    /// Create a new not found error
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create a new transient storage error
    pub fn transient(shard: impl ToString, message: impl Into<String>) -> Self {
        Self::TransientStorage {
            shard: shard.to_string(),
            message: message.into(),
        }
    }

    /// Create a new poison message error
    pub fn poison(message: impl Into<String>) -> Self {
        Self::PoisonMessage(message.into())
    }

    /// Create a new transaction error
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction(message.into())
    }

    /// Create a new queue error
    pub fn queue(message: impl Into<String>) -> Self {
        Self::Queue(message.into())
    }

    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a new generic error
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Check if this is a validation error
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::UnsupportedTechnology(_))
    }

    /// Check if this error is expected to clear on a later scheduled run
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::TransientStorage { .. } | Self::Transaction(_) | Self::Io(_)
        )
    }

    /// Check if this is a poison message error
    pub fn is_poison(&self) -> bool {
        matches!(self, Self::PoisonMessage(_) | Self::Serialization(_))
    }

    /// Get a user-friendly suggestion for resolving the error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::UnsupportedTechnology(_) => {
                Some("Use one of the supported technologies: mssql, mysql, mongodb".to_string())
            }
            Self::NoShardAvailable => {
                Some("Register at least one active, non-seed shard".to_string())
            }
            Self::DuplicateTenant { .. } => {
                Some("Remove the stray tenant copy so only its owning shard holds it".to_string())
            }
            Self::TransientStorage { .. } => {
                Some("The operation will be retried at the next scheduled run".to_string())
            }
            Self::Config(_) => Some("Check the router configuration values".to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::de::Error as _;

    #[test]
    fn test_error_creation() {
        let err = Error::validation("bad connection string");
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.is_validation());

        let err = Error::not_found("tenant 42");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Not found: tenant 42");

        let err = Error::transient("shard-a", "timeout");
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "Transient storage error on shard shard-a: timeout");
    }

    #[test]
    fn test_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "File not found");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::Io(_)));
        assert!(err.is_transient());

        let json_err = serde_json::Error::custom("Invalid JSON");
        let err = Error::from(json_err);
        assert!(err.is_poison());
    }

    #[test]
    fn test_error_suggestion() {
        assert!(Error::NoShardAvailable.suggestion().unwrap().contains("non-seed"));
        assert!(Error::unsupported_technology("oracle")
            .suggestion()
            .unwrap()
            .contains("mongodb"));
        assert!(Error::other("boom").suggestion().is_none());
    }
}
