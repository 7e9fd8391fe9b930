//! Decoy: a test-double engine
//!
//! Decoy temporarily replaces members of types with recording wrappers, so a
//! test can observe how a member is called and control what it returns, then
//! puts every original back.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                  Context                     │
//! │                                              │
//! │  dispatch  - type tables, calls by name      │
//! │  intercept - one unit per (type, member)     │
//! │  ledger    - recorded arguments and results  │
//! │  registry  - live units, bulk restore        │
//! │  policy    - members that may not be touched │
//! │                                              │
//! ├──────────────────────────────────────────────┤
//! │        Values (decoy-value crate)            │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```ignore
//! use decoy::{Args, TypeDef, Value};
//!
//! let ctx = decoy::current();
//! ctx.define(TypeDef::new("Weather").method("forecast", |_, _, _| Ok("rain".into())))?;
//!
//! let _cleanup = decoy::cleanup::guard();
//! let unit = decoy::mock("Weather", "forecast", "sun")?;
//!
//! let city = Value::record("Weather", [("city", "Oslo")]);
//! assert_eq!(ctx.call(&city, "forecast", Args::new().with(3))?, Value::from("sun"));
//! assert_eq!(unit.ledger().last_call().and_then(|a| a.first()), Some(&Value::Int(3)));
//! ```
//!
//! The free functions below operate on the calling thread's default
//! [`Context`]. Create contexts explicitly with [`Context::new`] for full
//! isolation.

pub mod cleanup;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod intercept;
pub mod ledger;
pub mod policy;
pub mod registry;

pub use context::Context;
pub use dispatch::{Args, Block, MemberDef, MemberKind, TypeDef, TypeTable, Visibility};
pub use error::{CallError, CallResult, DecoyError, Result};
pub use intercept::{
    InterceptionUnit, Replacement, State, Substitution, SubstitutionKind, TargetId,
};
pub use ledger::{Arguments, CallLedger, Execution};
pub use policy::{Policy, PolicyError, POLICY_ENV_VAR};
pub use registry::{Filter, Registry, RegistryKey};

// Re-export value types so callers need only one dependency
pub use decoy_value::{ConversionError, FromValue, Value};

// ============================================================================
// Facade over the thread's default context
// ============================================================================

/// The calling thread's default context.
pub fn current() -> Context {
    Context::current()
}

/// Make every call to `member` of `type_name` return `value`.
pub fn mock(type_name: &str, member: &str, value: impl Into<Value>) -> Result<InterceptionUnit> {
    current().mock(type_name, member, value)
}

/// Record calls to `member` of `type_name` without changing its behavior.
pub fn spy_on(type_name: &str, member: &str) -> Result<InterceptionUnit> {
    current().spy_on(type_name, member)
}

pub fn is_mocked(type_name: &str, member: &str) -> bool {
    current().is_mocked(type_name, member)
}

pub fn is_restricted(type_name: &str, member: &str) -> bool {
    current().is_restricted(type_name, member)
}

pub fn clear(type_name: &str) -> Vec<CallLedger> {
    current().clear(type_name)
}

pub fn clear_all() -> Vec<CallLedger> {
    current().clear_all()
}

pub fn reset(type_name: &str) -> Result<Vec<CallLedger>> {
    current().reset(type_name)
}

pub fn reset_all() -> Result<Vec<CallLedger>> {
    current().reset_all()
}

/// See [`Context::restore`].
pub fn restore(type_name: &str, watch: bool) -> Result<Vec<InterceptionUnit>> {
    current().restore(type_name, watch)
}

pub fn restore_all(watch: bool) -> Result<Vec<InterceptionUnit>> {
    current().restore_all(watch)
}
