//! Error handling for Swarmlink Core.
//!
//! This module provides:
//! - A single error type with machine-readable codes
//! - Error chaining with context and structured details
//! - Severity and retry classification
//! - Logging with tracing integration
//! - Metrics integration for error tracking
//!
//! # Usage
//!
//! ```rust,ignore
//! use swarmlink_core::error::{ErrorCode, ErrorContext, Result};
//!
//! fn read_key(path: &std::path::Path) -> Result<Vec<u8>> {
//!     std::fs::read(path).with_error_code(ErrorCode::IoError)
//! }
//! ```

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for Swarmlink operations.
pub type Result<T> = std::result::Result<T, SwarmError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
///
/// These codes are stable and safe to match on across binding boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Identity Errors (1000-1099)
    InvalidHexEncoding,
    InvalidLength,
    IoError,
    InvalidKeyMaterial,
    AlreadyConsumed,

    // Messaging Errors (1100-1199)
    PayloadTooLarge,
    SubscriptionClosed,

    // Task Errors (1200-1299)
    InvalidTransition,
    NotAssignee,
    TaskNotFound,

    // Network Errors (2000-2099)
    NetworkTimeout,
    BootstrapFailed,
    PeerUnreachable,
    NeighborLimitReached,

    // Serialization Errors (2200-2299)
    SerializationError,

    // Configuration Errors (5000-5099)
    ConfigurationError,

    // Internal Errors (9000-9099)
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::InvalidHexEncoding => 1000,
            Self::InvalidLength => 1001,
            Self::IoError => 1002,
            Self::InvalidKeyMaterial => 1003,
            Self::AlreadyConsumed => 1004,

            Self::PayloadTooLarge => 1100,
            Self::SubscriptionClosed => 1101,

            Self::InvalidTransition => 1200,
            Self::NotAssignee => 1201,
            Self::TaskNotFound => 1202,

            Self::NetworkTimeout => 2000,
            Self::BootstrapFailed => 2001,
            Self::PeerUnreachable => 2002,
            Self::NeighborLimitReached => 2003,

            Self::SerializationError => 2200,

            Self::ConfigurationError => 5000,

            Self::InternalError => 9000,
        }
    }

    /// Check if this error is retryable.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NetworkTimeout
                | Self::BootstrapFailed
                | Self::PeerUnreachable
                | Self::NeighborLimitReached
        )
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "identity",
            1100..=1199 => "messaging",
            1200..=1299 => "task",
            2000..=2099 => "network",
            2200..=2299 => "serialization",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Caller errors (bad input, illegal transitions)
    Low,
    /// Operational issues (timeouts, unreachable peers)
    Medium,
    /// System errors (I/O, corrupt key material)
    High,
    /// Bugs
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::InvalidHexEncoding
            | ErrorCode::InvalidLength
            | ErrorCode::AlreadyConsumed
            | ErrorCode::PayloadTooLarge
            | ErrorCode::SubscriptionClosed
            | ErrorCode::InvalidTransition
            | ErrorCode::NotAssignee
            | ErrorCode::TaskNotFound => Self::Low,

            ErrorCode::NetworkTimeout
            | ErrorCode::BootstrapFailed
            | ErrorCode::PeerUnreachable
            | ErrorCode::NeighborLimitReached => Self::Medium,

            ErrorCode::IoError
            | ErrorCode::InvalidKeyMaterial
            | ErrorCode::SerializationError
            | ErrorCode::ConfigurationError => Self::High,

            ErrorCode::InternalError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Additional structured details about an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Additional context key-value pairs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Related entity ID (task, peer, topic)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    /// Related entity type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,

    /// Suggested action for resolution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(
        mut self,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggested_action = Some(suggestion.into());
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for Swarmlink Core.
#[derive(Error, Debug)]
pub struct SwarmError {
    /// Machine-readable error code
    code: ErrorCode,

    /// Caller-facing message
    message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for SwarmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl SwarmError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and message.
    pub fn new(code: ErrorCode, message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            message: message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both a caller-facing and an internal message.
    pub fn with_internal(
        code: ErrorCode,
        message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::InternalError, "An internal error occurred", message)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add error details.
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    /// Add context to details.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();

        match self.severity() {
            ErrorSeverity::Critical => {
                error!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    internal_message = ?self.internal_message,
                    details = ?self.details,
                    source = ?self.source,
                    "CRITICAL ERROR"
                );
            }
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    internal_message = ?self.internal_message,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    "Medium severity error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    "Low severity error"
                );
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Metrics
    // ─────────────────────────────────────────────────────────────────────────

    fn record_metrics(&self) {
        counter!(
            crate::telemetry::names::ERRORS_TOTAL,
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
            "severity" => format!("{:?}", self.severity()),
            "retryable" => self.is_retryable().to_string(),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Context Extension Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Add context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context with error code.
    fn with_error_code(self, code: ErrorCode) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| SwarmError::internal(message.into()).with_source(e))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.map_err(|e| SwarmError::new(code, e.to_string()).with_source(e))
    }
}

impl<T> ErrorContext<T> for Option<T> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| SwarmError::internal(message.into()))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.ok_or_else(|| SwarmError::new(code, "Value not present"))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<std::io::Error> for SwarmError {
    fn from(error: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let user_msg = match error.kind() {
            ErrorKind::NotFound => "File or directory not found",
            ErrorKind::PermissionDenied => "Permission denied",
            ErrorKind::AlreadyExists => "File already exists",
            _ => "An I/O error occurred",
        };

        Self::with_internal(ErrorCode::IoError, user_msg, error.to_string()).with_source(error)
    }
}

impl From<serde_json::Error> for SwarmError {
    fn from(error: serde_json::Error) -> Self {
        Self::with_internal(
            ErrorCode::SerializationError,
            "Failed to process JSON data",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<hex::FromHexError> for SwarmError {
    fn from(error: hex::FromHexError) -> Self {
        Self::with_internal(
            ErrorCode::InvalidHexEncoding,
            "Invalid hex encoding",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<tokio::time::error::Elapsed> for SwarmError {
    fn from(error: tokio::time::error::Elapsed) -> Self {
        Self::with_internal(
            ErrorCode::NetworkTimeout,
            "Operation timed out",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<config::ConfigError> for SwarmError {
    fn from(error: config::ConfigError) -> Self {
        let user_msg = match &error {
            config::ConfigError::NotFound(_) => "Required configuration not found",
            config::ConfigError::FileParse { .. } => "Configuration file is invalid",
            _ => "Configuration error occurred",
        };

        Self::with_internal(ErrorCode::ConfigurationError, user_msg, error.to_string())
    }
}

impl From<anyhow::Error> for SwarmError {
    fn from(error: anyhow::Error) -> Self {
        match error.downcast::<SwarmError>() {
            Ok(swarm_error) => swarm_error,
            Err(error) => Self::internal(error.to_string()),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Convenience Constructors for Domain Errors
// ═══════════════════════════════════════════════════════════════════════════════

impl SwarmError {
    // ─────────────────────────────────────────────────────────────────────────
    // Identity Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create an invalid hex encoding error.
    pub fn invalid_hex(input: &str) -> Self {
        Self::new(ErrorCode::InvalidHexEncoding, "Identifier is not valid hex")
            .with_context("input_len", input.len())
    }

    /// Create an invalid length error.
    pub fn invalid_length(expected: usize, actual: usize) -> Self {
        Self::new(
            ErrorCode::InvalidLength,
            format!("Identifier must be {} bytes, got {}", expected, actual),
        )
        .with_context("expected", expected)
        .with_context("actual", actual)
    }

    /// Create an invalid key material error.
    pub fn invalid_key_material(reason: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InvalidKeyMaterial,
            format!("Key file is corrupt: {}", reason.into()),
        )
        .with_details(
            ErrorDetails::new().with_suggestion("Remove the key file to generate a fresh identity"),
        )
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Messaging Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a payload too large error.
    pub fn payload_too_large(size: usize, limit: usize) -> Self {
        Self::new(
            ErrorCode::PayloadTooLarge,
            format!("Payload of {} bytes exceeds limit of {} bytes", size, limit),
        )
        .with_context("size", size)
        .with_context("limit", limit)
    }

    /// Create a subscription closed error.
    pub fn subscription_closed(topic: &str) -> Self {
        Self::new(ErrorCode::SubscriptionClosed, "Subscription is closed")
            .with_details(ErrorDetails::new().with_entity("topic", topic))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Task Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a task not found error.
    pub fn task_not_found(task_id: impl fmt::Display) -> Self {
        let id = task_id.to_string();
        Self::new(ErrorCode::TaskNotFound, format!("Task not found: {}", id))
            .with_details(ErrorDetails::new().with_entity("task", id))
    }

    /// Create an invalid state transition error.
    pub fn invalid_transition(from: impl fmt::Debug, to: impl fmt::Debug) -> Self {
        Self::new(
            ErrorCode::InvalidTransition,
            format!("Invalid task transition: {:?} -> {:?}", from, to),
        )
        .with_context("from_state", format!("{:?}", from))
        .with_context("to_state", format!("{:?}", to))
    }

    /// Create a not assignee error.
    pub fn not_assignee(task_id: impl fmt::Display) -> Self {
        let id = task_id.to_string();
        Self::new(
            ErrorCode::NotAssignee,
            "Only the assignee can complete this task",
        )
        .with_details(ErrorDetails::new().with_entity("task", id))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Network Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a bootstrap failed error.
    pub fn bootstrap_failed(attempted: usize, rounds: u32) -> Self {
        Self::new(
            ErrorCode::BootstrapFailed,
            format!(
                "Could not reach any of {} bootstrap peers after {} rounds",
                attempted, rounds
            ),
        )
        .with_context("attempted", attempted)
        .with_context("rounds", rounds)
    }

    /// Create a peer unreachable error.
    pub fn peer_unreachable(peer: impl fmt::Display) -> Self {
        let peer = peer.to_string();
        Self::new(ErrorCode::PeerUnreachable, format!("Peer unreachable: {}", peer))
            .with_details(ErrorDetails::new().with_entity("peer", peer))
    }

    /// Create a neighbor limit error.
    pub fn neighbor_limit(limit: usize) -> Self {
        Self::new(
            ErrorCode::NeighborLimitReached,
            format!("Neighbor limit of {} reached", limit),
        )
        .with_context("limit", limit)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigurationError, message.into())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_is_retryable() {
        assert!(ErrorCode::NetworkTimeout.is_retryable());
        assert!(ErrorCode::PeerUnreachable.is_retryable());
        assert!(!ErrorCode::InvalidTransition.is_retryable());
        assert!(!ErrorCode::InvalidHexEncoding.is_retryable());
    }

    #[test]
    fn test_error_code_category() {
        assert_eq!(ErrorCode::InvalidLength.category(), "identity");
        assert_eq!(ErrorCode::PayloadTooLarge.category(), "messaging");
        assert_eq!(ErrorCode::NotAssignee.category(), "task");
        assert_eq!(ErrorCode::BootstrapFailed.category(), "network");
        assert_eq!(ErrorCode::InternalError.category(), "internal");
    }

    #[test]
    fn test_error_creation() {
        let error = SwarmError::task_not_found("abcd");
        assert_eq!(error.code(), ErrorCode::TaskNotFound);
        assert_eq!(error.severity(), ErrorSeverity::Low);
        assert_eq!(error.details().entity_type.as_deref(), Some("task"));
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_error_context() {
        let error = SwarmError::payload_too_large(2048, 1024);
        assert_eq!(error.details().context["size"], 2048);
        assert_eq!(error.details().context["limit"], 1024);
    }

    #[test]
    fn test_error_display() {
        let error = SwarmError::with_internal(ErrorCode::IoError, "disk", "ENOSPC");
        assert_eq!(error.to_string(), "[IoError] disk (internal: ENOSPC)");
    }

    #[test]
    fn test_from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let error: SwarmError = io.into();
        assert_eq!(error.code(), ErrorCode::IoError);
        assert!(std::error::Error::source(&error).is_some());
    }

    #[test]
    fn test_from_anyhow_preserves_code() {
        let inner = SwarmError::new(ErrorCode::NotAssignee, "nope");
        let error: SwarmError = anyhow::Error::new(inner).into();
        assert_eq!(error.code(), ErrorCode::NotAssignee);
    }

    #[test]
    fn test_option_context() {
        let missing: Option<u8> = None;
        let error = missing.with_error_code(ErrorCode::TaskNotFound).unwrap_err();
        assert_eq!(error.code(), ErrorCode::TaskNotFound);
    }

    #[test]
    fn test_error_code_serialization() {
        let json = serde_json::to_string(&ErrorCode::PayloadTooLarge).unwrap();
        assert_eq!(json, "\"PAYLOAD_TOO_LARGE\"");
    }
}
