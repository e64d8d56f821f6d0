//! Error type system for the extension bridge
//!
//! This module provides the error taxonomy shared by every loader component:
//! - Package-level errors (validation, lib version, conversion, instantiation)
//! - Per-call source errors (missing capability, foreign invocation failure)
//! - Operational errors (repository, network, cancellation, configuration)
//! - Error context helpers for converting foreign error types

use std::fmt;

/// Main error type for the extension bridge
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    // Package-level errors
    #[error("Package not found: {0}")]
    PackageNotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unsupported lib version: {version} (supported: {min}-{max})")]
    UnsupportedLibVersion { version: f64, min: f64, max: f64 },

    #[error("Conversion error: {0}")]
    Conversion(String),

    #[error("Instantiation error: {0}")]
    Instantiation(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Manifest error: {0}")]
    Manifest(String),

    // Per-call source errors
    #[error("Capability unavailable: {capability}")]
    CapabilityUnavailable { capability: String },

    #[error("Failed to invoke {method}: {cause}")]
    SourceInvocation { method: String, cause: String },

    // Lifecycle errors
    #[error("Extension not loaded: {0}")]
    ExtensionNotLoaded(String),

    #[error("Extension was unloaded: {0}")]
    ExtensionUnloaded(String),

    // Repository and network errors
    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    // System errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl BridgeError {
    /// Get the error type name used in logs and CLI reports
    pub fn error_type(&self) -> &'static str {
        match self {
            BridgeError::PackageNotFound(_) => "PackageNotFound",
            BridgeError::Validation(_) => "ValidationError",
            BridgeError::UnsupportedLibVersion { .. } => "UnsupportedVersionError",
            BridgeError::Conversion(_) => "ConversionError",
            BridgeError::Instantiation(_) => "InstantiationError",
            BridgeError::Archive(_) => "ArchiveError",
            BridgeError::Manifest(_) => "ManifestError",
            BridgeError::CapabilityUnavailable { .. } => "CapabilityUnavailable",
            BridgeError::SourceInvocation { .. } => "SourceInvocationError",
            BridgeError::ExtensionNotLoaded(_) => "ExtensionNotLoaded",
            BridgeError::ExtensionUnloaded(_) => "ExtensionUnloaded",
            BridgeError::Repository(_) => "RepositoryError",
            BridgeError::Network(_) => "NetworkError",
            BridgeError::Cancelled(_) => "Cancelled",
            BridgeError::Config(_) => "ConfigError",
            BridgeError::Io(_) => "IoError",
            BridgeError::Serialization(_) => "SerializationError",
        }
    }

    /// Check if retrying the same operation may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BridgeError::Network(_)
                | BridgeError::Repository(_)
                | BridgeError::SourceInvocation { .. }
        )
    }

    /// Check if the error is confined to one package or one call
    ///
    /// Recoverable errors never affect other loaded extensions.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, BridgeError::Config(_) | BridgeError::Io(_))
    }

    /// Shorthand for a missing capability
    pub fn capability_unavailable(capability: impl Into<String>) -> Self {
        BridgeError::CapabilityUnavailable {
            capability: capability.into(),
        }
    }

    /// Shorthand for a failed foreign invocation
    pub fn invocation(method: impl Into<String>, cause: impl fmt::Display) -> Self {
        BridgeError::SourceInvocation {
            method: method.into(),
            cause: cause.to_string(),
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Serialization(err.to_string())
    }
}

impl From<zip::result::ZipError> for BridgeError {
    fn from(err: zip::result::ZipError) -> Self {
        BridgeError::Archive(err.to_string())
    }
}

/// Result type alias for operations that can fail with BridgeError
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Context extension trait for adding context to errors
pub trait ErrorContext<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context to an error using a closure
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::fmt::Display,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let context_str = context.into();
            BridgeError::Validation(format!("{}: {}", context_str, e))
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let context_str = f();
            BridgeError::Validation(format!("{}: {}", context_str, e))
        })
    }
}
