//! Error types surfaced across the scripting boundary

use std::fmt;

/// Result type for binding operations and callbacks
pub type BindingResult<T> = Result<T, BindingError>;

/// Failure reported by the foreign runtime for a native call.
///
/// Carries the native diagnostic unchanged so it can be re-surfaced to the
/// calling script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeFailure {
    /// Native error domain (e.g. an exception class name)
    pub domain: String,
    /// Native diagnostic message
    pub message: String,
}

impl NativeFailure {
    /// Create a failure with a domain and message
    pub fn new(domain: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for NativeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.domain, self.message)
    }
}

/// Errors raised while building bindings or servicing a call.
///
/// Every variant is catchable by the calling script; none of them tears
/// down the execution context.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BindingError {
    /// The catalog blob is malformed for the affected record
    #[error("Metadata format error: {0}")]
    MetadataFormat(String),

    /// Symbol or selector resolution failed for a receiver/record pair
    #[error("Member not found: {member} on {receiver}")]
    MemberNotFound {
        /// Member (selector or symbol) name
        member: String,
        /// Receiver description (class name or declaring record)
        receiver: String,
    },

    /// An argument does not satisfy the encoded parameter type
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        /// Expected native type
        expected: String,
        /// Actual script value type
        got: String,
    },

    /// The foreign call itself failed
    #[error("Native invocation failed: {0}")]
    NativeInvocation(NativeFailure),

    /// The scripting host rejected an operation
    #[error("Host error: {0}")]
    Host(String),
}

impl BindingError {
    /// Shorthand for a type mismatch
    pub fn type_mismatch(expected: impl Into<String>, got: impl Into<String>) -> Self {
        BindingError::TypeMismatch {
            expected: expected.into(),
            got: got.into(),
        }
    }

    /// Shorthand for a missing member
    pub fn member_not_found(member: impl Into<String>, receiver: impl Into<String>) -> Self {
        BindingError::MemberNotFound {
            member: member.into(),
            receiver: receiver.into(),
        }
    }
}

impl From<NativeFailure> for BindingError {
    fn from(failure: NativeFailure) -> Self {
        BindingError::NativeInvocation(failure)
    }
}
