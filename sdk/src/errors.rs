//! Error types and handling
//!
//! This module provides the error taxonomy shared by the engine and the HTTP
//! front end. Every variant carries a stable machine-readable code, a
//! user-facing hint, and a recoverability flag through `EngineErrorExt`.
//!
//! # Security
//!
//! Error messages surfaced to callers must not contain secrets or absolute
//! filesystem paths of the host. Path variants are only rendered in logs.

use thiserror::Error;

/// Trait for engine error extensions
///
/// Provides the stable code used on the wire, a hint that is safe to show to
/// end users, and whether retrying the same request can succeed.
pub trait EngineErrorExt {
    /// Stable, machine-readable error code (e.g. `NOT_FOUND`)
    fn code(&self) -> &'static str;

    /// Returns a user-friendly hint for the error
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable by re-issuing the request
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// # Error Categories
///
/// - **Request**: validation, missing resources, ownership mismatches
/// - **Generation**: routing failures and model/stream failures
/// - **Deploy**: build and publish failures
/// - **Infrastructure**: configuration, database, filesystem, keychain
///
/// # Examples
///
/// ```
/// use sdk::errors::{EngineError, EngineErrorExt};
///
/// let error = EngineError::Forbidden("app 7 belongs to another user".into());
/// assert_eq!(error.code(), "FORBIDDEN");
/// assert!(!error.is_recoverable());
///
/// let build = EngineError::BuildFailed("npm run build exited with 1".into());
/// assert!(build.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Request errors
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    // Generation errors
    #[error("Routing error: {0}")]
    Routing(String),

    #[error("Generation error: {0}")]
    Generation(String),

    // Deploy errors
    #[error("Build failed: {0}")]
    BuildFailed(String),

    #[error("Publish error: {0}")]
    Publish(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unsupported strategy: {0}")]
    UnsupportedStrategy(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(String),

    // File system security errors
    #[error("Path denied: {0:?}")]
    PathDenied(std::path::PathBuf),

    #[error("Path outside workspace: {0:?}")]
    PathOutsideWorkspace(std::path::PathBuf),

    #[error("Path canonicalization failed for {0:?}: {1}")]
    PathCanonicalization(std::path::PathBuf, String),

    // Tool errors
    #[error("Tool error: {0}")]
    ToolError(String),

    // Keyring errors
    #[error("Keyring error: {0}")]
    KeyringError(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Wrap a persistence failure.
    pub fn database(err: impl std::fmt::Display) -> Self {
        Self::Database(err.to_string())
    }

    /// Wrap a model or stream failure.
    pub fn generation(err: impl std::fmt::Display) -> Self {
        Self::Generation(err.to_string())
    }

    /// Message safe to return to a caller.
    ///
    /// Infrastructure variants may carry host paths or driver output, so
    /// they are reduced to their hint.
    pub fn public_message(&self) -> String {
        match self {
            Self::Config(_)
            | Self::Database(_)
            | Self::PathDenied(_)
            | Self::PathOutsideWorkspace(_)
            | Self::PathCanonicalization(_, _)
            | Self::KeyringError(_)
            | Self::Io(_) => self.user_hint().to_string(),
            _ => self.to_string(),
        }
    }
}

impl EngineErrorExt for EngineError {
    fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Routing(_) => "ROUTING_ERROR",
            Self::Generation(_) => "GENERATION_ERROR",
            Self::BuildFailed(_) => "BUILD_FAILED",
            Self::Publish(_) => "PUBLISH_ERROR",
            Self::Config(_) | Self::UnsupportedStrategy(_) => "CONFIG_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::PathDenied(_)
            | Self::PathOutsideWorkspace(_)
            | Self::PathCanonicalization(_, _) => "PATH_ERROR",
            Self::ToolError(_) => "TOOL_ERROR",
            Self::KeyringError(_) => "KEYRING_ERROR",
            Self::Io(_) => "IO_ERROR",
        }
    }

    fn user_hint(&self) -> &str {
        match self {
            Self::Validation(_) => "Check the request parameters and try again",
            Self::NotFound(_) => "The application or its generated code does not exist",
            Self::Forbidden(_) => "You can only operate on your own applications",
            Self::Routing(_) => "Could not decide how to build this app. Rephrase the prompt",
            Self::Generation(_) => "Code generation failed. Send the message again",
            Self::BuildFailed(_) => "The project failed to build. Check the generated code",
            Self::Publish(_) => "Publishing failed. Deploy again to retry",
            Self::Config(_) => "Check your config.toml file for errors",
            Self::UnsupportedStrategy(_) => "The application uses an unknown generation mode",
            Self::Database(_) => "Database operation failed. Try again later",
            Self::PathDenied(_) => "Access to this path is not allowed",
            Self::PathOutsideWorkspace(_) => "Operation must stay within the app directory",
            Self::PathCanonicalization(_, _) => "Invalid path specified",
            Self::ToolError(_) => "Tool operation failed",
            Self::KeyringError(_) => "Failed to access secure storage. Check system keychain",
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            // Re-issuing the same request cannot change the outcome
            Self::Validation(_)
            | Self::Forbidden(_)
            | Self::Config(_)
            | Self::UnsupportedStrategy(_)
            | Self::PathDenied(_)
            | Self::PathOutsideWorkspace(_) => false,

            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(EngineError::Validation("x".into()).code(), "VALIDATION_ERROR");
        assert_eq!(EngineError::NotFound("x".into()).code(), "NOT_FOUND");
        assert_eq!(EngineError::Forbidden("x".into()).code(), "FORBIDDEN");
        assert_eq!(EngineError::Routing("x".into()).code(), "ROUTING_ERROR");
        assert_eq!(EngineError::Generation("x".into()).code(), "GENERATION_ERROR");
        assert_eq!(EngineError::BuildFailed("x".into()).code(), "BUILD_FAILED");
        assert_eq!(EngineError::Publish("x".into()).code(), "PUBLISH_ERROR");
    }

    #[test]
    fn test_error_display() {
        let err = EngineError::NotFound("app 42".to_string());
        assert_eq!(err.to_string(), "Not found: app 42");

        let err = EngineError::BuildFailed("exit status 1".to_string());
        assert_eq!(err.to_string(), "Build failed: exit status 1");
    }

    #[test]
    fn test_recoverability() {
        assert!(!EngineError::Forbidden("x".into()).is_recoverable());
        assert!(!EngineError::PathDenied(PathBuf::from(".env")).is_recoverable());
        assert!(EngineError::Generation("timeout".into()).is_recoverable());
        assert!(EngineError::Publish("disk full".into()).is_recoverable());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: EngineError = io.into();
        assert_eq!(err.code(), "IO_ERROR");
    }

    #[test]
    fn test_public_message_hides_host_paths() {
        let err = EngineError::PathDenied(PathBuf::from("/srv/appforge/code/.env"));
        assert_eq!(err.public_message(), "Access to this path is not allowed");

        let io = std::io::Error::other("Failed to create /var/lib/appforge/deploy");
        assert!(!EngineError::from(io).public_message().contains("/var/lib"));

        let err = EngineError::NotFound("application 7".into());
        assert_eq!(err.public_message(), "Not found: application 7");
    }

    #[test]
    fn test_helper_constructors() {
        assert!(matches!(
            EngineError::database("locked"),
            EngineError::Database(msg) if msg == "locked"
        ));
        assert!(matches!(
            EngineError::generation("stream closed"),
            EngineError::Generation(msg) if msg == "stream closed"
        ));
    }
}
