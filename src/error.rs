//! Typed, non-panicking error surface for the decoder.
//!
//! These map 1:1 onto the "Kinds (not types)" in the error handling design:
//! every one of them degrades to an empty result at the `decode()` boundary
//! rather than unwinding through the caller.

use std::fmt;

/// A decode-time failure. Never surfaces as a panic in release builds;
/// callers that want to distinguish "nothing found" from "something went
/// wrong" can inspect this via [`crate::session::DecoderSession::last_error`].
#[derive(Debug, Clone, PartialEq)]
pub enum DecoderError {
    /// Malformed stroke (non-finite coordinates) or otherwise unusable input.
    InvalidInput(String),
    /// Token pool is full and pruning could not free enough slots.
    PoolExhausted(String),
    /// A programming invariant was violated (e.g. a released handle was
    /// dereferenced, or features were read before `update_properties`).
    InvariantViolation(String),
    /// `decode()` was called with zero lexicons.
    NoLexicon,
}

impl fmt::Display for DecoderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecoderError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            DecoderError::PoolExhausted(msg) => write!(f, "token pool exhausted: {msg}"),
            DecoderError::InvariantViolation(msg) => write!(f, "invariant violation: {msg}"),
            DecoderError::NoLexicon => write!(f, "decode called with zero lexicons"),
        }
    }
}

impl std::error::Error for DecoderError {}

/// Convenience alias for internal helpers that may fail but whose failures
/// are always recoverable by the caller degrading to an empty result.
pub type Fallible<T> = Result<T, DecoderError>;
