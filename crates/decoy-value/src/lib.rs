//! Dynamic values for the decoy dispatch layer.
//!
//! Every argument, receiver and result that flows through an intercepted
//! member is a [`Value`]. The crate is `no_std` + `alloc` so that value
//! construction helpers can be shared with embedded test harnesses; the
//! `std` feature (on by default) adds `std::error::Error` for
//! [`ConversionError`], and the `serde` feature derives serialization.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

mod value;

pub use value::{FromValue, Value};

use alloc::boxed::Box;
use alloc::string::String;
use core::fmt;

/// Error converting a [`Value`] into a concrete Rust type.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversionError {
    /// The value had a different shape than requested.
    TypeMismatch { expected: String, got: String },
    /// A list element failed to convert.
    IndexError(usize, Box<ConversionError>),
    /// A record did not carry the requested field.
    MissingField(String),
    /// Expected a list value.
    ExpectedList(String),
}

impl fmt::Display for ConversionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TypeMismatch { expected, got } => {
                write!(f, "type mismatch: expected {}, got {}", expected, got)
            }
            Self::IndexError(i, inner) => write!(f, "at index {}: {}", i, inner),
            Self::MissingField(name) => write!(f, "missing field '{}'", name),
            Self::ExpectedList(got) => write!(f, "expected list, got {}", got),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ConversionError {}
