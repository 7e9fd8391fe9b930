//! Interception Units
//!
//! An [`InterceptionUnit`] owns the interception of exactly one member of one
//! type. It swaps the member's table entry between three bindings:
//!
//! ```text
//!   Unarmed ──watch──▶ Watching ◀──────▶ Substituted
//!      ▲                  │                   │
//!      └──────restore─────┴───────────────────┘
//! ```
//!
//! # Installing
//!
//! Entering `Watching` or `Substituted` caches the original definition under
//! an alias on the target type, registers the unit with the context's
//! registry, and installs a recording wrapper with the original visibility.
//! Every completed call through the wrapper appends one entry to the unit's
//! [`CallLedger`].
//!
//! # Restoring
//!
//! Restoring puts the cached definition back under its own name (or, for an
//! inherited member, just drops the wrapper so resolution falls back to the
//! ancestor) and removes the alias.

mod behavior;

pub use behavior::{Replacement, State, Substitution, SubstitutionKind};

use behavior::{wrapper, Behavior, Recorder};

use crate::context::Context;
use crate::dispatch::{Args, MemberDef, MemberKind, TypeTable, Visibility};
use crate::error::{CallResult, DecoyError, Result};
use crate::ledger::CallLedger;
use decoy_value::Value;
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

/// Prefix of the alias a cached original is stored under.
const CACHE_MEMBER_PREFIX: &str = "__decoy_cached_";

// ============================================================================
// TargetId
// ============================================================================

/// The (type, member) pair an interception unit is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetId {
    type_name: String,
    member: String,
}

impl TargetId {
    pub fn new(type_name: impl Into<String>, member: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            member: member.into(),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn member(&self) -> &str {
        &self.member
    }

    /// Registry key: `"<type>#<member>"`.
    pub fn key(&self) -> String {
        key_for(&self.type_name, &self.member)
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.type_name, self.member)
    }
}

pub(crate) fn key_for(type_name: &str, member: &str) -> String {
    format!("{type_name}#{member}")
}

// ============================================================================
// InterceptionUnit
// ============================================================================

/// Intercepts one member and records every completed call to it.
///
/// Cloning is cheap; clones share state, which is how the registry and the
/// caller observe the same unit.
#[derive(Clone)]
pub struct InterceptionUnit {
    inner: Rc<UnitInner>,
}

struct UnitInner {
    target: TargetId,
    key: String,
    kind: MemberKind,
    visibility: Visibility,
    inherited: bool,
    cache_name: String,
    cached: Cell<bool>,
    recorder: Rc<Recorder>,
}

impl InterceptionUnit {
    /// Create a unit for `target`, optionally watching it right away.
    ///
    /// Static members take precedence over instance members of the same
    /// name. Fails when the policy restricts the target, when the type or
    /// member is unknown, or when a cached original for the member is
    /// already visible from the type.
    pub fn create(ctx: &Context, target: TargetId, watch: bool) -> Result<Self> {
        if ctx.policy().is_restricted(target.type_name(), target.member()) {
            return Err(DecoyError::RestrictedTarget {
                type_name: target.type_name.clone(),
                member: target.member.clone(),
            });
        }

        let cache_name = format!("{CACHE_MEMBER_PREFIX}{}", target.member());
        let (kind, visibility, inherited) = {
            let types = ctx.types();
            if !types.contains(target.type_name()) {
                return Err(DecoyError::UnknownType(target.type_name.clone()));
            }
            let (kind, resolved) = [MemberKind::Static, MemberKind::Instance]
                .into_iter()
                .find_map(|kind| {
                    types
                        .resolve(target.type_name(), kind, target.member())
                        .map(|r| (kind, r))
                })
                .ok_or_else(|| DecoyError::UnknownMember {
                    type_name: target.type_name.clone(),
                    member: target.member.clone(),
                })?;
            if types.resolve(target.type_name(), kind, &cache_name).is_some() {
                return Err(DecoyError::AlreadyIntercepted {
                    type_name: target.type_name.clone(),
                    member: target.member.clone(),
                });
            }
            (
                kind,
                resolved.def.visibility(),
                resolved.owner != target.type_name(),
            )
        };

        let key = target.key();
        let unit = Self {
            inner: Rc::new(UnitInner {
                recorder: Rc::new(Recorder::new(key.clone())),
                target,
                key,
                kind,
                visibility,
                inherited,
                cache_name,
                cached: Cell::new(false),
            }),
        };
        tracing::debug!(
            unit = %unit.key(),
            ?kind,
            %visibility,
            inherited,
            "created interception unit"
        );

        if watch {
            unit.watch(ctx)?;
        }
        Ok(unit)
    }

    pub fn target(&self) -> &TargetId {
        &self.inner.target
    }

    /// Registry key, `"<type>#<member>"`.
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub fn kind(&self) -> MemberKind {
        self.inner.kind
    }

    /// Visibility of the original definition, reapplied to every wrapper.
    pub fn visibility(&self) -> Visibility {
        self.inner.visibility
    }

    /// Whether the original definition belongs to an ancestor type.
    pub fn is_inherited(&self) -> bool {
        self.inner.inherited
    }

    /// Whether the original is currently cached aside (a wrapper is live).
    pub fn is_cached(&self) -> bool {
        self.inner.cached.get()
    }

    pub fn state(&self) -> State {
        if self.is_cached() {
            self.inner.recorder.state()
        } else {
            State::Unarmed
        }
    }

    /// Detached copy of the calls recorded so far.
    pub fn ledger(&self) -> CallLedger {
        self.inner.recorder.ledger()
    }

    /// Whether `other` is a handle to this same unit.
    pub fn same_unit(&self, other: &InterceptionUnit) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // ------------------------------------------------------------------------
    // Arming
    // ------------------------------------------------------------------------

    /// Record calls while forwarding them to the original.
    pub fn watch(&self, ctx: &Context) -> Result<&Self> {
        self.arm(ctx, Behavior::Watch)
    }

    /// Return `value` from every call.
    pub fn return_value(&self, ctx: &Context, value: impl Into<Value>) -> Result<&Self> {
        self.substitute(ctx, Substitution::new().returning(value))
    }

    /// Return `value` from the next call only.
    pub fn return_value_once(&self, ctx: &Context, value: impl Into<Value>) -> Result<&Self> {
        self.substitute(ctx, Substitution::new().returning(value).once())
    }

    /// Return `value` from the next `n` calls.
    pub fn return_value_times(
        &self,
        ctx: &Context,
        n: usize,
        value: impl Into<Value>,
    ) -> Result<&Self> {
        self.substitute(ctx, Substitution::new().returning(value).times(n))
    }

    /// Return `values` one per call, in order, then go back to watching.
    pub fn return_values_in_order<I, V>(&self, ctx: &Context, values: I) -> Result<&Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        let behavior = Behavior::sequence(values, self.key())?;
        self.arm(ctx, behavior)
    }

    /// Run `implementation` instead of the original on every call.
    pub fn implementation<F>(&self, ctx: &Context, implementation: F) -> Result<&Self>
    where
        F: Fn(&Context, &Value, Args) -> CallResult + 'static,
    {
        self.substitute(ctx, Substitution::new().running(implementation))
    }

    /// Run `implementation` for the next call only.
    pub fn implementation_once<F>(&self, ctx: &Context, implementation: F) -> Result<&Self>
    where
        F: Fn(&Context, &Value, Args) -> CallResult + 'static,
    {
        self.substitute(ctx, Substitution::new().running(implementation).once())
    }

    /// Run `implementation` for the next `n` calls.
    pub fn implementation_times<F>(&self, ctx: &Context, n: usize, implementation: F) -> Result<&Self>
    where
        F: Fn(&Context, &Value, Args) -> CallResult + 'static,
    {
        self.substitute(ctx, Substitution::new().running(implementation).times(n))
    }

    pub fn substitute(&self, ctx: &Context, substitution: Substitution) -> Result<&Self> {
        let behavior = substitution.into_behavior(self.key())?;
        self.arm(ctx, behavior)
    }

    // ------------------------------------------------------------------------
    // Clearing, resetting, restoring
    // ------------------------------------------------------------------------

    /// Start a fresh ledger, keeping the current binding. Returns the old one.
    pub fn clear(&self) -> CallLedger {
        self.inner.recorder.clear()
    }

    /// Clear, then return `Nil` from every call.
    pub fn reset(&self, ctx: &Context) -> Result<CallLedger> {
        let executions = self.clear();
        self.return_value(ctx, Value::Nil)?;
        Ok(executions)
    }

    /// Clear and put the original definition back.
    ///
    /// With `watch`, re-arm straight into watching and stay registered;
    /// otherwise the unit also leaves the registry.
    pub fn restore(&self, ctx: &Context, watch: bool) -> Result<CallLedger> {
        let executions = self.restore_in(&mut ctx.types_mut())?;
        if watch {
            self.watch(ctx)?;
        } else {
            ctx.registry_mut().discard(self);
        }
        Ok(executions)
    }

    /// Clear and uninstall without touching the registry.
    pub(crate) fn restore_in(&self, types: &mut TypeTable) -> Result<CallLedger> {
        let executions = self.clear();
        if self.is_cached() {
            self.uninstall(types)?;
        }
        self.inner.recorder.set(Behavior::Watch);
        Ok(executions)
    }

    // ------------------------------------------------------------------------
    // Table surgery
    // ------------------------------------------------------------------------

    fn arm(&self, ctx: &Context, behavior: Behavior) -> Result<&Self> {
        let mut types = ctx.types_mut();

        let newly_cached = !self.is_cached();
        if newly_cached {
            self.cache(&mut types)?;
        }

        if let Err(err) = ctx.registry_mut().admit(self) {
            if newly_cached {
                self.uninstall(&mut types)?;
            }
            return Err(err);
        }

        let original = types
            .own(self.type_name(), self.kind(), &self.inner.cache_name)
            .map(|def| def.body().clone())
            .ok_or_else(|| DecoyError::NotCached(self.key().to_string()))?;

        if !self.is_inherited() {
            types.remove_own(self.type_name(), self.kind(), self.member());
        }
        self.inner.recorder.set(behavior);
        let installed = MemberDef::from_body(
            self.visibility(),
            wrapper(self.inner.recorder.clone(), original),
        );
        types.insert_own(self.type_name(), self.kind(), self.member(), installed)?;

        tracing::debug!(unit = %self.key(), state = ?self.inner.recorder.state(), "armed");
        Ok(self)
    }

    fn cache(&self, types: &mut TypeTable) -> Result<()> {
        let alias_present = types
            .own(self.type_name(), self.kind(), &self.inner.cache_name)
            .is_some();
        if self.is_cached() || alias_present {
            return Err(DecoyError::AlreadyCached(self.key().to_string()));
        }
        let original = types
            .resolve(self.type_name(), self.kind(), self.member())
            .map(|r| r.def.clone())
            .ok_or_else(|| DecoyError::UnknownMember {
                type_name: self.type_name().to_string(),
                member: self.member().to_string(),
            })?;
        types.insert_own(self.type_name(), self.kind(), &self.inner.cache_name, original)?;
        self.inner.cached.set(true);
        Ok(())
    }

    fn uninstall(&self, types: &mut TypeTable) -> Result<()> {
        if !self.is_cached() {
            return Err(DecoyError::NotCached(self.key().to_string()));
        }
        let (ty, kind) = (self.type_name(), self.kind());

        match types.remove_own(ty, kind, &self.inner.cache_name) {
            Some(original) => {
                types.remove_own(ty, kind, self.member());
                if !self.is_inherited() {
                    types.insert_own(ty, kind, self.member(), original)?;
                }
            }
            // The type was redefined underneath us; its new table wins.
            None => tracing::warn!(unit = %self.key(), "cached original vanished"),
        }
        self.inner.cached.set(false);

        tracing::debug!(unit = %self.key(), "restored original");
        Ok(())
    }

    fn type_name(&self) -> &str {
        self.inner.target.type_name()
    }

    fn member(&self) -> &str {
        self.inner.target.member()
    }
}

impl fmt::Display for InterceptionUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl fmt::Debug for InterceptionUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptionUnit")
            .field("target", &self.inner.target)
            .field("kind", &self.inner.kind)
            .field("visibility", &self.inner.visibility)
            .field("inherited", &self.inner.inherited)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::TypeDef;
    use crate::error::CallError;
    use crate::policy::Policy;

    fn ctx() -> Context {
        let ctx = Context::new(Policy::empty().restrict("Vault", "open"));
        ctx.define(
            TypeDef::new("Base")
                .method("greet", |_, _, _| Ok("base".into()))
                .private_method("secret", |_, _, _| Ok("hidden".into())),
        )
        .unwrap();
        ctx.define(
            TypeDef::new("Child")
                .extends("Base")
                .method("own", |_, _, args| Ok(args.nth(0).cloned().unwrap_or_default()))
                .static_method("build", |_, _, _| Ok(Value::record("Child", [("id", 1)]))),
        )
        .unwrap();
        ctx.define(TypeDef::new("Vault").method("open", |_, _, _| Ok(Value::Nil)))
            .unwrap();
        ctx
    }

    #[test]
    fn create_without_watch_stays_unarmed() {
        let ctx = ctx();
        let unit = InterceptionUnit::create(&ctx, TargetId::new("Child", "own"), false).unwrap();
        assert_eq!(unit.state(), State::Unarmed);
        assert!(!unit.is_cached());
        assert!(!ctx.is_mocked("Child", "own"));
    }

    #[test]
    fn create_records_visibility_and_inheritance() {
        let ctx = ctx();
        let inherited =
            InterceptionUnit::create(&ctx, TargetId::new("Child", "secret"), false).unwrap();
        assert_eq!(inherited.visibility(), Visibility::Private);
        assert!(inherited.is_inherited());

        let own = InterceptionUnit::create(&ctx, TargetId::new("Child", "own"), false).unwrap();
        assert_eq!(own.visibility(), Visibility::Public);
        assert!(!own.is_inherited());
    }

    #[test]
    fn static_members_are_detected() {
        let ctx = ctx();
        let unit = InterceptionUnit::create(&ctx, TargetId::new("Child", "build"), false).unwrap();
        assert_eq!(unit.kind(), MemberKind::Static);
    }

    #[test]
    fn private_static_keeps_its_visibility_when_mocked() {
        let ctx = ctx();
        ctx.define(
            TypeDef::new("Factory").private_static_method("seed", |_, _, _| Ok(Value::Int(1))),
        )
        .unwrap();
        let unit = InterceptionUnit::create(&ctx, TargetId::new("Factory", "seed"), false).unwrap();
        assert_eq!(unit.kind(), MemberKind::Static);
        unit.return_value(&ctx, 42).unwrap();

        assert_eq!(
            ctx.visibility_of("Factory", MemberKind::Static, "seed"),
            Some(Visibility::Private)
        );
        assert!(matches!(
            ctx.call_static("Factory", "seed", Args::new()),
            Err(CallError::NotVisible { .. })
        ));
        assert_eq!(ctx.send_static("Factory", "seed", Args::new()), Ok(Value::Int(42)));
        assert_eq!(unit.ledger().count(), 1);
    }

    #[test]
    fn create_errors() {
        let ctx = ctx();
        let restricted = InterceptionUnit::create(&ctx, TargetId::new("Vault", "open"), true);
        assert!(matches!(restricted, Err(DecoyError::RestrictedTarget { .. })));

        let unknown_type = InterceptionUnit::create(&ctx, TargetId::new("Nope", "x"), true);
        assert_eq!(unknown_type.err(), Some(DecoyError::UnknownType("Nope".into())));

        let unknown_member = InterceptionUnit::create(&ctx, TargetId::new("Child", "nope"), true);
        assert!(matches!(unknown_member, Err(DecoyError::UnknownMember { .. })));
        assert!(ctx.registry_is_empty());
    }

    #[test]
    fn second_unit_for_live_target_is_rejected() {
        let ctx = ctx();
        let _first = InterceptionUnit::create(&ctx, TargetId::new("Child", "own"), true).unwrap();
        let second = InterceptionUnit::create(&ctx, TargetId::new("Child", "own"), true);
        assert!(matches!(second, Err(DecoyError::AlreadyIntercepted { .. })));
    }

    #[test]
    fn parent_cache_is_visible_from_child() {
        let ctx = ctx();
        let _parent = InterceptionUnit::create(&ctx, TargetId::new("Base", "greet"), true).unwrap();
        let child = InterceptionUnit::create(&ctx, TargetId::new("Child", "greet"), true);
        assert!(matches!(child, Err(DecoyError::AlreadyIntercepted { .. })));
    }

    #[test]
    fn late_second_unit_cannot_steal_the_cache() {
        let ctx = ctx();
        let first = InterceptionUnit::create(&ctx, TargetId::new("Child", "own"), false).unwrap();
        let second = InterceptionUnit::create(&ctx, TargetId::new("Child", "own"), false).unwrap();
        first.watch(&ctx).unwrap();

        let err = second.return_value(&ctx, 1).err().unwrap();
        assert_eq!(err, DecoyError::AlreadyCached("Child#own".into()));
        assert!(!second.is_cached());
        assert!(first.is_cached());
        assert_eq!(
            ctx.call(&Value::record("Child", [("id", 1)]), "own", Args::new().with(5)),
            Ok(Value::Int(5))
        );
        assert_eq!(first.ledger().count(), 1);
    }

    #[test]
    fn failed_registration_rolls_back_the_cache() {
        let ctx = ctx();
        let first = InterceptionUnit::create(&ctx, TargetId::new("Child", "own"), true).unwrap();

        // Redefining the type drops the wrapper and the alias, but `first`
        // still holds the registry entry.
        ctx.define(
            TypeDef::new("Child")
                .extends("Base")
                .private_method("own", |_, _, _| Ok("redefined".into())),
        )
        .unwrap();
        let before = ctx
            .types()
            .own("Child", MemberKind::Instance, "own")
            .cloned()
            .unwrap();

        let second = InterceptionUnit::create(&ctx, TargetId::new("Child", "own"), false).unwrap();
        let err = second.watch(&ctx).err().unwrap();
        assert_eq!(err, DecoyError::Duplicate("Child#own".into()));

        assert!(!second.is_cached());
        assert!(first.is_cached());
        let types = ctx.types();
        assert!(types.own("Child", MemberKind::Instance, "__decoy_cached_own").is_none());
        let after = types.own("Child", MemberKind::Instance, "own").unwrap();
        assert!(after.same_body(&before));
        assert_eq!(after.visibility(), Visibility::Private);
        drop(types);
        assert_eq!(
            ctx.send(&Value::record("Child", [("id", 1)]), "own", Args::new()),
            Ok(Value::from("redefined"))
        );
    }

    #[test]
    fn uninstall_without_cache_fails() {
        let ctx = ctx();
        let unit = InterceptionUnit::create(&ctx, TargetId::new("Child", "own"), false).unwrap();
        let err = unit.uninstall(&mut ctx.types_mut()).unwrap_err();
        assert_eq!(err, DecoyError::NotCached("Child#own".into()));
    }

    #[test]
    fn cache_twice_fails() {
        let ctx = ctx();
        let unit = InterceptionUnit::create(&ctx, TargetId::new("Child", "own"), true).unwrap();
        let err = unit.cache(&mut ctx.types_mut()).unwrap_err();
        assert_eq!(err, DecoyError::AlreadyCached("Child#own".into()));
    }

    #[test]
    fn restore_on_unarmed_unit_is_harmless() {
        let ctx = ctx();
        let unit = InterceptionUnit::create(&ctx, TargetId::new("Child", "own"), false).unwrap();
        assert!(unit.restore(&ctx, false).unwrap().is_empty());
        assert!(unit.restore(&ctx, false).unwrap().is_empty());
        assert_eq!(unit.state(), State::Unarmed);
    }

    #[test]
    fn restore_reinstates_the_original_definition() {
        let ctx = ctx();
        let before = ctx
            .types()
            .own("Child", MemberKind::Instance, "own")
            .cloned()
            .unwrap();
        let unit = InterceptionUnit::create(&ctx, TargetId::new("Child", "own"), true).unwrap();
        unit.return_value(&ctx, 3).unwrap();
        unit.restore(&ctx, false).unwrap();

        let types = ctx.types();
        let after = types.own("Child", MemberKind::Instance, "own").unwrap();
        assert!(after.same_body(&before));
        assert_eq!(after.visibility(), before.visibility());
        assert!(types.own("Child", MemberKind::Instance, "__decoy_cached_own").is_none());
    }

    #[test]
    fn target_key_format() {
        let target = TargetId::new("String", "upcase");
        assert_eq!(target.key(), "String#upcase");
        assert_eq!(target.to_string(), "String#upcase");
    }
}
