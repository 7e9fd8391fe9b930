//! Error types for interception and dispatch.

use crate::dispatch::Visibility;
use decoy_value::ConversionError;
use thiserror::Error;

/// Usage errors raised by the interception engine.
///
/// None of these are retryable: they describe a mistake in how the engine
/// was driven, and the operation that raised them has committed nothing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecoyError {
    /// The target policy forbids intercepting this member.
    #[error("cannot intercept restricted member '{member}' of {type_name}")]
    RestrictedTarget { type_name: String, member: String },

    /// The type was never defined in this context.
    #[error("unknown type: {0}")]
    UnknownType(String),

    /// Neither the type nor any of its ancestors defines the member.
    #[error("cannot intercept unknown member '{member}' of {type_name}")]
    UnknownMember { type_name: String, member: String },

    /// A cached original is already visible for this member.
    #[error("member '{member}' of {type_name} is already intercepted")]
    AlreadyIntercepted { type_name: String, member: String },

    /// The original implementation was cached twice.
    #[error("original of {0} is already cached")]
    AlreadyCached(String),

    /// Uninstall was requested but nothing is cached.
    #[error("original of {0} is not cached")]
    NotCached(String),

    /// The registry already tracks this target.
    #[error("registry already contains {0}")]
    Duplicate(String),

    /// The registry was handed something that is not an interception unit.
    #[error("registry only stores interception units, got {0}")]
    NotAUnit(String),

    /// An argument snapshot was indexed with an unsupported key.
    #[error("cannot access arguments by {0}; expected an integer, string or symbol")]
    UnsupportedKeyType(String),

    /// A substitution was requested without anything to substitute.
    #[error("substitution for {0} has no replacement value, implementation or sequence")]
    MissingReplacement(String),
}

/// Failure of a call dispatched through a [`Context`](crate::Context).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CallError {
    #[error("undefined member '{member}' for {type_name}")]
    NoMember { type_name: String, member: String },

    #[error("{visibility} member '{member}' called for {type_name}")]
    NotVisible {
        type_name: String,
        member: String,
        visibility: Visibility,
    },

    /// Raised by a member body or a substitute implementation.
    #[error("{0}")]
    Raised(String),

    #[error("conversion failed: {0}")]
    Conversion(#[from] ConversionError),

    #[error(transparent)]
    Engine(#[from] DecoyError),
}

impl CallError {
    /// Convenience for member bodies that want to fail with a message.
    pub fn raised(message: impl Into<String>) -> Self {
        CallError::Raised(message.into())
    }
}

pub type Result<T, E = DecoyError> = std::result::Result<T, E>;

/// Result of dispatching a call.
pub type CallResult = std::result::Result<decoy_value::Value, CallError>;
