//! Per-test teardown.
//!
//! Call [`after_each`] at the end of a test, or hold a [`CleanupGuard`] for
//! its duration, to restore every interception on the current thread.
//!
//! ```ignore
//! #[test]
//! fn charges_the_card() {
//!     let _cleanup = decoy::cleanup::guard();
//!     decoy::mock("Gateway", "charge", true)?;
//!     // ...
//! } // originals are back here, even if the test panicked
//! ```

use crate::context::Context;
use crate::error::Result;
use crate::registry::Filter;
use std::marker::PhantomData;
use std::rc::Rc;

/// Restore every unit of every live context on this thread, without
/// re-arming. Returns how many units were removed.
///
/// A context that fails to restore does not stop the others; the first
/// failure is returned once every context has been visited.
pub fn after_each() -> Result<usize> {
    let mut removed = 0;
    let mut first_err = None;
    for ctx in Context::live() {
        match ctx.remove_matching(&Filter::all()) {
            Ok(units) => removed += units.len(),
            Err(err) => {
                tracing::warn!(error = %err, "failed to restore a context");
                first_err.get_or_insert(err);
            }
        }
    }
    if removed > 0 {
        tracing::debug!(removed, "restored interceptions after test");
    }
    match first_err {
        Some(err) => Err(err),
        None => Ok(removed),
    }
}

/// Runs [`after_each`] when dropped.
#[must_use = "the guard restores interceptions when it is dropped"]
#[derive(Debug, Default)]
pub struct CleanupGuard {
    // Tied to the thread whose contexts it restores.
    _not_send: PhantomData<Rc<()>>,
}

/// Start a guarded test scope.
pub fn guard() -> CleanupGuard {
    CleanupGuard::default()
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if let Err(err) = after_each() {
            tracing::warn!(error = %err, "failed to restore interceptions during cleanup");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{Args, TypeDef};
    use crate::policy::Policy;
    use decoy_value::Value;

    fn ctx() -> Context {
        let ctx = Context::new(Policy::empty());
        ctx.define(TypeDef::new("Mailer").method("send", |_, _, _| Ok(Value::Bool(true))))
            .unwrap();
        ctx
    }

    #[test]
    fn after_each_restores_every_context() {
        let a = ctx();
        let b = ctx();
        a.mock("Mailer", "send", false).unwrap();
        b.spy_on("Mailer", "send").unwrap();

        assert!(after_each().unwrap() >= 2);
        assert!(a.registry_is_empty());
        assert!(b.registry_is_empty());
        let mail = Value::record("Mailer", [("to", "a@b")]);
        assert_eq!(a.call(&mail, "send", Args::new()), Ok(Value::Bool(true)));
    }

    #[test]
    fn redefined_type_does_not_stop_other_contexts() {
        let a = ctx();
        let b = ctx();
        a.mock("Mailer", "send", false).unwrap();
        b.mock("Mailer", "send", false).unwrap();
        a.define(TypeDef::new("Mailer").method("send", |_, _, _| Ok(Value::Int(7))))
            .unwrap();

        assert!(after_each().unwrap() >= 2);
        assert!(a.registry_is_empty());
        assert!(b.registry_is_empty());
        let mail = Value::record("Mailer", [("to", "a@b")]);
        assert_eq!(a.call(&mail, "send", Args::new()), Ok(Value::Int(7)));
        assert_eq!(b.call(&mail, "send", Args::new()), Ok(Value::Bool(true)));
    }

    #[test]
    fn guard_restores_on_drop() {
        let ctx = ctx();
        {
            let _cleanup = guard();
            ctx.mock("Mailer", "send", false).unwrap();
            assert!(ctx.is_mocked("Mailer", "send"));
        }
        assert!(!ctx.is_mocked("Mailer", "send"));
    }

    #[test]
    fn nothing_to_restore() {
        let _ctx = ctx();
        assert_eq!(after_each().unwrap(), 0);
    }
}
