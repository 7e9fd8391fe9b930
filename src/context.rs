//! Context
//!
//! A [`Context`] bundles the three pieces of state the engine works against:
//! the [`TypeTable`] calls dispatch through, the [`Registry`] of live
//! interception units, and the [`Policy`] that denies restricted targets.
//!
//! Contexts are cheap to clone and are scoped to one thread. Each thread also
//! has a lazily created default context, returned by [`Context::current`],
//! which the crate-level facade functions operate on.
//!
//! # Example
//!
//! ```ignore
//! let ctx = Context::with_builtin_policy();
//! ctx.define(TypeDef::new("Clock").method("now", |_, _, _| Ok(Value::Int(0))))?;
//!
//! let unit = ctx.mock("Clock", "now", 42)?;
//! assert_eq!(ctx.call(&Value::record("Clock", [("tz", "utc")]), "now", Args::new())?, Value::Int(42));
//! assert_eq!(unit.ledger().count(), 1);
//!
//! ctx.restore_all(false)?;
//! ```

use crate::dispatch::{Args, MemberDef, MemberKind, TypeDef, TypeTable, Visibility};
use crate::error::{CallError, CallResult, Result};
use crate::intercept::{key_for, InterceptionUnit, TargetId};
use crate::ledger::CallLedger;
use crate::policy::Policy;
use crate::registry::{Filter, Registry};
use decoy_value::Value;
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::{Rc, Weak};

thread_local! {
    static LIVE: RefCell<Vec<Weak<ContextInner>>> = const { RefCell::new(Vec::new()) };
    static CURRENT: Context = Context::new(default_policy());
}

fn default_policy() -> Policy {
    Policy::from_env().unwrap_or_else(|err| {
        tracing::warn!(error = %err, "ignoring unreadable policy file, using builtin policy");
        Policy::builtin()
    })
}

/// Handle to one isolated set of types, units and policy.
#[derive(Clone)]
pub struct Context {
    inner: Rc<ContextInner>,
}

struct ContextInner {
    types: RefCell<TypeTable>,
    registry: RefCell<Registry>,
    policy: Policy,
}

impl Context {
    pub fn new(policy: Policy) -> Self {
        let inner = Rc::new(ContextInner {
            types: RefCell::new(TypeTable::new()),
            registry: RefCell::new(Registry::new()),
            policy,
        });
        let weak = Rc::downgrade(&inner);
        // Ignored during thread teardown, when nothing can clean up anyway.
        let _ = LIVE.try_with(|live| {
            let mut live = live.borrow_mut();
            live.retain(|w| w.strong_count() > 0);
            live.push(weak);
        });
        Self { inner }
    }

    pub fn with_builtin_policy() -> Self {
        Self::new(Policy::builtin())
    }

    /// The calling thread's default context.
    ///
    /// Created on first use with the builtin policy, merged with the file
    /// named by `DECOY_POLICY` when that variable is set.
    pub fn current() -> Self {
        CURRENT.with(Context::clone)
    }

    /// Every context still alive on this thread.
    pub(crate) fn live() -> Vec<Context> {
        LIVE.try_with(|live| {
            live.borrow()
                .iter()
                .filter_map(Weak::upgrade)
                .map(|inner| Context { inner })
                .collect()
        })
        .unwrap_or_default()
    }

    pub fn policy(&self) -> &Policy {
        &self.inner.policy
    }

    /// Whether the policy forbids intercepting `member` of `type_name`.
    pub fn is_restricted(&self, type_name: &str, member: &str) -> bool {
        self.inner.policy.is_restricted(type_name, member)
    }

    // ========================================================================
    // Types and dispatch
    // ========================================================================

    /// Add or replace a type.
    pub fn define(&self, def: TypeDef) -> Result<()> {
        self.types_mut().define(def)
    }

    pub fn has_type(&self, type_name: &str) -> bool {
        self.types().contains(type_name)
    }

    /// Call a public instance member on `receiver`, resolved by its type name.
    pub fn call(&self, receiver: &Value, member: &str, args: Args) -> CallResult {
        self.dispatch(receiver.type_name(), receiver, MemberKind::Instance, member, args, true)
    }

    /// Call a public static member of `type_name`.
    pub fn call_static(&self, type_name: &str, member: &str, args: Args) -> CallResult {
        let receiver = Value::sym(type_name);
        self.dispatch(type_name, &receiver, MemberKind::Static, member, args, true)
    }

    /// Like [`call`](Self::call), ignoring visibility. Member bodies use this
    /// to reach their own private helpers.
    pub fn send(&self, receiver: &Value, member: &str, args: Args) -> CallResult {
        self.dispatch(receiver.type_name(), receiver, MemberKind::Instance, member, args, false)
    }

    pub fn send_static(&self, type_name: &str, member: &str, args: Args) -> CallResult {
        let receiver = Value::sym(type_name);
        self.dispatch(type_name, &receiver, MemberKind::Static, member, args, false)
    }

    fn dispatch(
        &self,
        type_name: &str,
        receiver: &Value,
        kind: MemberKind,
        member: &str,
        args: Args,
        external: bool,
    ) -> CallResult {
        // Release the table before running user code; bodies may re-enter.
        let def: MemberDef = self
            .types()
            .resolve(type_name, kind, member)
            .map(|resolved| resolved.def.clone())
            .ok_or_else(|| CallError::NoMember {
                type_name: type_name.to_string(),
                member: member.to_string(),
            })?;

        if external && def.visibility() != Visibility::Public {
            return Err(CallError::NotVisible {
                type_name: type_name.to_string(),
                member: member.to_string(),
                visibility: def.visibility(),
            });
        }
        def.invoke(self, receiver, args)
    }

    /// Visibility of the definition a call to `member` would reach.
    pub fn visibility_of(&self, type_name: &str, kind: MemberKind, member: &str) -> Option<Visibility> {
        self.types()
            .resolve(type_name, kind, member)
            .map(|resolved| resolved.def.visibility())
    }

    /// Whether `type_name` defines `member` itself rather than inheriting it.
    pub fn owns_member(&self, type_name: &str, kind: MemberKind, member: &str) -> bool {
        self.types().own(type_name, kind, member).is_some()
    }

    // ========================================================================
    // Interception facade
    // ========================================================================

    /// Create an interception unit, watching it right away if asked.
    pub fn intercept(&self, target: TargetId, watch: bool) -> Result<InterceptionUnit> {
        InterceptionUnit::create(self, target, watch)
    }

    /// Record calls to `member` without changing its behavior.
    pub fn spy_on(&self, type_name: &str, member: &str) -> Result<InterceptionUnit> {
        self.intercept(TargetId::new(type_name, member), true)
    }

    /// Make every call to `member` return `value`.
    pub fn mock(&self, type_name: &str, member: &str, value: impl Into<Value>) -> Result<InterceptionUnit> {
        let unit = self.spy_on(type_name, member)?;
        unit.return_value(self, value)?;
        Ok(unit)
    }

    /// Whether the registry tracks a unit for `member` of `type_name`.
    pub fn is_mocked(&self, type_name: &str, member: &str) -> bool {
        self.registry().contains_target(type_name, member)
    }

    pub fn unit(&self, type_name: &str, member: &str) -> Option<InterceptionUnit> {
        self.registry().get(&key_for(type_name, member))
    }

    pub fn units(&self, filter: &Filter) -> Vec<InterceptionUnit> {
        self.registry().find(filter)
    }

    /// Clear the ledgers of every unit on `type_name`. Returns the old ledgers.
    pub fn clear(&self, type_name: &str) -> Vec<CallLedger> {
        self.clear_matching(&Filter::type_name(type_name))
    }

    pub fn clear_all(&self) -> Vec<CallLedger> {
        self.clear_matching(&Filter::all())
    }

    fn clear_matching(&self, filter: &Filter) -> Vec<CallLedger> {
        self.units(filter).iter().map(InterceptionUnit::clear).collect()
    }

    /// Clear every unit on `type_name` and make it return `Nil`.
    pub fn reset(&self, type_name: &str) -> Result<Vec<CallLedger>> {
        self.reset_matching(&Filter::type_name(type_name))
    }

    pub fn reset_all(&self) -> Result<Vec<CallLedger>> {
        self.reset_matching(&Filter::all())
    }

    fn reset_matching(&self, filter: &Filter) -> Result<Vec<CallLedger>> {
        self.units(filter).iter().map(|unit| unit.reset(self)).collect()
    }

    /// Put back the originals of every unit on `type_name`.
    ///
    /// With `watch`, the units are re-armed in place and stay registered;
    /// otherwise they are removed from the registry.
    pub fn restore(&self, type_name: &str, watch: bool) -> Result<Vec<InterceptionUnit>> {
        self.restore_matching(&Filter::type_name(type_name), watch)
    }

    pub fn restore_all(&self, watch: bool) -> Result<Vec<InterceptionUnit>> {
        self.restore_matching(&Filter::all(), watch)
    }

    fn restore_matching(&self, filter: &Filter, watch: bool) -> Result<Vec<InterceptionUnit>> {
        if !watch {
            return self.remove_matching(filter);
        }
        let units = self.units(filter);
        for unit in &units {
            unit.restore(self, true)?;
        }
        Ok(units)
    }

    /// Restore without re-arming and unregister every unit matching `filter`.
    pub fn remove_matching(&self, filter: &Filter) -> Result<Vec<InterceptionUnit>> {
        let mut types = self.types_mut();
        self.registry_mut().remove_matching(&mut types, filter)
    }

    /// Restore and unregister `unit`. Returns whether it was registered.
    pub fn remove(&self, unit: &InterceptionUnit) -> Result<bool> {
        let mut types = self.types_mut();
        self.registry_mut().remove(&mut types, unit)
    }

    pub fn registry_is_empty(&self) -> bool {
        self.registry().is_empty()
    }

    pub fn registry_len(&self) -> usize {
        self.registry().len()
    }

    // ========================================================================
    // Crate-internal access
    // ========================================================================

    pub(crate) fn types(&self) -> Ref<'_, TypeTable> {
        self.inner.types.borrow()
    }

    pub(crate) fn types_mut(&self) -> RefMut<'_, TypeTable> {
        self.inner.types.borrow_mut()
    }

    pub(crate) fn registry(&self) -> Ref<'_, Registry> {
        self.inner.registry.borrow()
    }

    pub(crate) fn registry_mut(&self) -> RefMut<'_, Registry> {
        self.inner.registry.borrow_mut()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::with_builtin_policy()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.inner.registry.try_borrow();
        f.debug_struct("Context")
            .field("policy", &self.inner.policy)
            .field(
                "units",
                &registry.as_ref().map(|r| r.keys()).unwrap_or_default(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecoyError;

    fn ctx() -> Context {
        let ctx = Context::new(Policy::empty());
        ctx.define(
            TypeDef::new("Account")
                .method("balance", |ctx, recv, _| ctx.send(recv, "raw_balance", Args::new()))
                .private_method("raw_balance", |_, recv, _| Ok(recv.field("cents").cloned().unwrap_or_default()))
                .protected_method("audit", |_, _, _| Ok(Value::Bool(true)))
                .static_method("open", |_, recv, _| Ok(recv.clone())),
        )
        .unwrap();
        ctx
    }

    fn account(cents: i64) -> Value {
        Value::record("Account", [("cents", cents)])
    }

    #[test]
    fn public_call_reaches_private_helper_through_send() {
        let ctx = ctx();
        assert_eq!(ctx.call(&account(250), "balance", Args::new()), Ok(Value::Int(250)));
    }

    #[test]
    fn external_call_rejects_non_public_members() {
        let ctx = ctx();
        let private = ctx.call(&account(1), "raw_balance", Args::new()).unwrap_err();
        assert!(matches!(
            private,
            CallError::NotVisible { visibility: Visibility::Private, .. }
        ));
        let protected = ctx.call(&account(1), "audit", Args::new()).unwrap_err();
        assert!(matches!(
            protected,
            CallError::NotVisible { visibility: Visibility::Protected, .. }
        ));
        assert_eq!(ctx.send(&account(1), "audit", Args::new()), Ok(Value::Bool(true)));
    }

    #[test]
    fn missing_member_is_reported() {
        let ctx = ctx();
        let err = ctx.call(&account(1), "close", Args::new()).unwrap_err();
        assert_eq!(
            err,
            CallError::NoMember {
                type_name: "Account".into(),
                member: "close".into()
            }
        );
    }

    #[test]
    fn static_receiver_is_the_type_symbol() {
        let ctx = ctx();
        assert_eq!(
            ctx.call_static("Account", "open", Args::new()),
            Ok(Value::sym("Account"))
        );
    }

    #[test]
    fn mock_and_restore_through_the_facade() {
        let ctx = ctx();
        let unit = ctx.mock("Account", "balance", 9).unwrap();
        assert!(ctx.is_mocked("Account", "balance"));
        assert_eq!(ctx.call(&account(1), "balance", Args::new()), Ok(Value::Int(9)));
        assert!(ctx.unit("Account", "balance").unwrap().same_unit(&unit));

        let restored = ctx.restore("Account", false).unwrap();
        assert_eq!(restored.len(), 1);
        assert!(!ctx.is_mocked("Account", "balance"));
        assert_eq!(ctx.call(&account(1), "balance", Args::new()), Ok(Value::Int(1)));
    }

    #[test]
    fn restore_with_watch_keeps_units_registered() {
        let ctx = ctx();
        let unit = ctx.mock("Account", "balance", 9).unwrap();
        ctx.restore_all(true).unwrap();
        assert!(ctx.is_mocked("Account", "balance"));
        assert_eq!(ctx.call(&account(3), "balance", Args::new()), Ok(Value::Int(3)));
        assert_eq!(unit.ledger().results(), vec![Value::Int(3)]);
    }

    #[test]
    fn reset_returns_nil() {
        let ctx = ctx();
        ctx.mock("Account", "balance", 9).unwrap();
        ctx.call(&account(1), "balance", Args::new()).unwrap();
        let old = ctx.reset("Account").unwrap();
        assert_eq!(old[0].count(), 1);
        assert_eq!(ctx.call(&account(1), "balance", Args::new()), Ok(Value::Nil));
    }

    #[test]
    fn spying_twice_is_rejected() {
        let ctx = ctx();
        ctx.spy_on("Account", "balance").unwrap();
        let err = ctx.spy_on("Account", "balance").unwrap_err();
        assert!(matches!(err, DecoyError::AlreadyIntercepted { .. }));
        assert_eq!(ctx.registry_len(), 1);
    }

    #[test]
    fn contexts_are_isolated() {
        let a = ctx();
        let b = ctx();
        a.mock("Account", "balance", 9).unwrap();
        assert_eq!(b.call(&account(1), "balance", Args::new()), Ok(Value::Int(1)));
        assert!(b.registry_is_empty());
    }

    #[test]
    fn define_makes_the_type_known() {
        let ctx = Context::new(Policy::empty());
        assert!(!ctx.has_type("Ledger"));
        ctx.define(TypeDef::new("Ledger")).unwrap();
        assert!(ctx.has_type("Ledger"));
        assert!(matches!(
            ctx.spy_on("Journal", "post"),
            Err(DecoyError::UnknownType(_))
        ));
    }

    #[test]
    fn live_tracks_open_contexts() {
        let ctx = ctx();
        assert!(Context::live().iter().any(|c| Rc::ptr_eq(&c.inner, &ctx.inner)));
        let weak = Rc::downgrade(&ctx.inner);
        drop(ctx);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn builtin_policy_denies_engine_types() {
        let ctx = Context::with_builtin_policy();
        ctx.define(TypeDef::new("Kernel").method("exit", |_, _, _| Ok(Value::Nil)))
            .unwrap();
        assert!(ctx.is_restricted("Kernel", "exit"));
        let err = ctx.spy_on("Kernel", "exit").unwrap_err();
        assert!(matches!(err, DecoyError::RestrictedTarget { .. }));
        assert!(ctx.registry_is_empty());
    }
}
