// ABOUTME: Error taxonomy, raw store failures, and the pure error classifier.
// ABOUTME: Maps any backend failure to a ClassifiedError with a code, retryability flag, and user message.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The error taxonomy every surfaced failure is normalized into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Network,
    Timeout,
    Validation,
    Authentication,
    Authorization,
    SessionExpired,
    NotFound,
    AlreadyExists,
    Conflict,
    Server,
    Database,
    QuotaExceeded,
    InvalidState,
    OperationNotAllowed,
    Unknown,
}

impl ErrorCode {
    /// Returns the taxonomy code string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Network => "NETWORK",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::Validation => "VALIDATION",
            ErrorCode::Authentication => "AUTHENTICATION",
            ErrorCode::Authorization => "AUTHORIZATION",
            ErrorCode::SessionExpired => "SESSION_EXPIRED",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::AlreadyExists => "ALREADY_EXISTS",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::Server => "SERVER",
            ErrorCode::Database => "DATABASE",
            ErrorCode::QuotaExceeded => "QUOTA_EXCEEDED",
            ErrorCode::InvalidState => "INVALID_STATE",
            ErrorCode::OperationNotAllowed => "OPERATION_NOT_ALLOWED",
            ErrorCode::Unknown => "UNKNOWN",
        }
    }

    /// Whether failures of this class are retried by default.
    /// Only transient classes qualify; everything else surfaces immediately.
    pub fn default_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::Network | ErrorCode::Timeout | ErrorCode::Server | ErrorCode::Database
        )
    }

    /// The display message shown to a user for this class. Always distinct
    /// from the technical message attached to the failure.
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorCode::Network => "A network problem interrupted the operation. Check your connection and try again.",
            ErrorCode::Timeout => "The operation took too long to complete. Please try again.",
            ErrorCode::Validation => "Some of the provided data is invalid. Review the highlighted fields.",
            ErrorCode::Authentication => "You need to sign in to perform this action.",
            ErrorCode::Authorization => "You do not have permission to perform this action.",
            ErrorCode::SessionExpired => "Your session has expired. Please sign in again.",
            ErrorCode::NotFound => "The requested item could not be found. It may have been removed.",
            ErrorCode::AlreadyExists => "An item with the same identifier already exists.",
            ErrorCode::Conflict => "The change conflicts with related data. Please retry.",
            ErrorCode::Server => "The server encountered a problem. Please try again shortly.",
            ErrorCode::Database => "The data store is temporarily unavailable. Please try again shortly.",
            ErrorCode::QuotaExceeded => "A usage limit has been reached. Try again later or contact an administrator.",
            ErrorCode::InvalidState => "The item is not in a state that allows this action.",
            ErrorCode::OperationNotAllowed => "This operation is not allowed here.",
            ErrorCode::Unknown => "Something went wrong. Please try again.",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Structured error codes a backing store may attach to a failure.
/// These map deterministically in `classify`, ahead of any message sniffing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreCode {
    RecordNotFound,
    UniqueViolation,
    ForeignKeyViolation,
    NotNullViolation,
    CheckViolation,
    InsufficientPrivilege,
    ExpiredCredential,
    Busy,
    Corrupted,
}

impl StoreCode {
    /// Returns the store code string.
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreCode::RecordNotFound => "record_not_found",
            StoreCode::UniqueViolation => "unique_violation",
            StoreCode::ForeignKeyViolation => "foreign_key_violation",
            StoreCode::NotNullViolation => "not_null_violation",
            StoreCode::CheckViolation => "check_violation",
            StoreCode::InsufficientPrivilege => "insufficient_privilege",
            StoreCode::ExpiredCredential => "expired_credential",
            StoreCode::Busy => "busy",
            StoreCode::Corrupted => "corrupted",
        }
    }
}

impl fmt::Display for StoreCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A raw failure surfaced by a backing store or its transport: either a
/// structured code with a message, or a bare message string.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("{message}")]
    Structured { code: StoreCode, message: String },

    #[error("{0}")]
    Other(String),
}

impl StoreError {
    /// A failure carrying a structured store code.
    pub fn structured(code: StoreCode, message: impl Into<String>) -> Self {
        StoreError::Structured {
            code,
            message: message.into(),
        }
    }

    /// A failure known only by its message text.
    pub fn other(message: impl Into<String>) -> Self {
        StoreError::Other(message.into())
    }

    /// The structured code, if the store provided one.
    pub fn code(&self) -> Option<StoreCode> {
        match self {
            StoreError::Structured { code, .. } => Some(*code),
            StoreError::Other(_) => None,
        }
    }

    /// The technical message text.
    pub fn message(&self) -> &str {
        match self {
            StoreError::Structured { message, .. } => message,
            StoreError::Other(message) => message,
        }
    }
}

/// A raw failure normalized into a taxonomy code, retryability flag, and
/// user-facing message.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct ClassifiedError {
    pub code: ErrorCode,
    pub message: String,
    pub user_message: String,
    pub retryable: bool,
    pub details: BTreeMap<String, String>,
}

impl ClassifiedError {
    /// Build an error for a code with the code's default retryability and
    /// user message.
    pub fn from_code(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            user_message: code.user_message().to_string(),
            retryable: code.default_retryable(),
            details: BTreeMap::new(),
        }
    }

    /// A NOT_FOUND error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::from_code(ErrorCode::NotFound, message)
    }

    /// A VALIDATION error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::from_code(ErrorCode::Validation, message)
    }

    /// A DATABASE error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::from_code(ErrorCode::Database, message)
    }

    /// A SERVER error.
    pub fn server(message: impl Into<String>) -> Self {
        Self::from_code(ErrorCode::Server, message)
    }

    /// Attach a context detail.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Override the retryability flag.
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }
}

/// Classify a raw store failure. Pure: no side effects, no logging.
///
/// Mapping priority:
/// 1. A structured store code maps deterministically.
/// 2. Network/timeout signatures in the message text.
/// 3. HTTP-style status hints in the message text.
/// 4. UNKNOWN, retryable — transient unknown failures get one more chance.
///
/// The message-sniffing fallbacks (2 and 3) are inherently fragile across
/// store implementations and locales; they exist only for stores that
/// surface nothing structured, and nothing outside this function should
/// ever inspect raw message text.
pub fn classify(error: &StoreError) -> ClassifiedError {
    let message = error.message().to_string();

    if let Some(code) = error.code() {
        let classified = match code {
            StoreCode::RecordNotFound => ClassifiedError::from_code(ErrorCode::NotFound, message),
            StoreCode::UniqueViolation => {
                ClassifiedError::from_code(ErrorCode::AlreadyExists, message)
            }
            // Foreign key failures often resolve once the related write
            // lands, so they stay retryable despite the CONFLICT class.
            StoreCode::ForeignKeyViolation => {
                ClassifiedError::from_code(ErrorCode::Conflict, message).with_retryable(true)
            }
            StoreCode::NotNullViolation | StoreCode::CheckViolation => {
                ClassifiedError::from_code(ErrorCode::Validation, message)
            }
            StoreCode::InsufficientPrivilege => {
                ClassifiedError::from_code(ErrorCode::Authorization, message)
            }
            StoreCode::ExpiredCredential => {
                ClassifiedError::from_code(ErrorCode::SessionExpired, message)
            }
            StoreCode::Busy => ClassifiedError::from_code(ErrorCode::Database, message),
            StoreCode::Corrupted => {
                ClassifiedError::from_code(ErrorCode::Database, message).with_retryable(false)
            }
        };
        return classified.with_detail("store_code", code.as_str());
    }

    let lowered = message.to_lowercase();

    if lowered.contains("timed out") || lowered.contains("timeout") {
        return ClassifiedError::from_code(ErrorCode::Timeout, message);
    }
    if lowered.contains("network")
        || lowered.contains("connection refused")
        || lowered.contains("connection reset")
        || lowered.contains("unreachable")
        || lowered.contains("broken pipe")
    {
        return ClassifiedError::from_code(ErrorCode::Network, message);
    }

    if lowered.contains("401") || lowered.contains("unauthorized") {
        return ClassifiedError::from_code(ErrorCode::Authentication, message);
    }
    if lowered.contains("403") || lowered.contains("forbidden") {
        return ClassifiedError::from_code(ErrorCode::Authorization, message);
    }
    if lowered.contains("404") || lowered.contains("not found") {
        return ClassifiedError::from_code(ErrorCode::NotFound, message);
    }
    if lowered.contains("409") || lowered.contains("conflict") {
        return ClassifiedError::from_code(ErrorCode::Conflict, message);
    }
    if lowered.contains("500") || lowered.contains("internal server") {
        return ClassifiedError::from_code(ErrorCode::Server, message);
    }

    // Optimistic default: an unrecognized failure gets one more chance.
    ClassifiedError::from_code(ErrorCode::Unknown, message).with_retryable(true)
}
