//! Dispatch Layer
//!
//! Types that want to be interceptable are authored against a [`TypeTable`]
//! instead of calling Rust functions directly. Each [`TypeDef`] carries an
//! optional parent and two member tables, one for instance members and one
//! for static (type-level) members. Calls resolve through the table at call
//! time, walking the ancestor chain, so swapping a table entry is observed
//! by every call site.
//!
//! # Example
//!
//! ```ignore
//! let person = TypeDef::new("Person")
//!     .method("greet", |_ctx, recv, _args| {
//!         let name: String = recv.get_field("name")?;
//!         Ok(format!("hello {name}").into())
//!     });
//! ctx.define(person)?;
//! ctx.call(&Value::record("Person", [("name", "Ann")]), "greet", Args::new())?;
//! ```

mod args;
mod member;

pub use args::{Args, Block};
pub use member::{Body, MemberDef, MemberKind, Visibility};

use crate::context::Context;
use crate::error::{CallResult, DecoyError, Result};
use decoy_value::Value;
use std::collections::{HashMap, HashSet};

// ============================================================================
// TypeDef - one named type and its member tables
// ============================================================================

/// A named type with instance and static member tables.
#[derive(Debug, Clone)]
pub struct TypeDef {
    name: String,
    parent: Option<String>,
    instance_members: HashMap<String, MemberDef>,
    static_members: HashMap<String, MemberDef>,
}

impl TypeDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            instance_members: HashMap::new(),
            static_members: HashMap::new(),
        }
    }

    /// Inherit members from `parent`, which must already be defined.
    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Define a member of any kind and visibility.
    pub fn member<F>(
        mut self,
        kind: MemberKind,
        name: impl Into<String>,
        visibility: Visibility,
        body: F,
    ) -> Self
    where
        F: Fn(&Context, &Value, Args) -> CallResult + 'static,
    {
        self.members_mut(kind)
            .insert(name.into(), MemberDef::new(visibility, body));
        self
    }

    /// Public instance member.
    pub fn method<F>(self, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&Context, &Value, Args) -> CallResult + 'static,
    {
        self.member(MemberKind::Instance, name, Visibility::Public, body)
    }

    pub fn protected_method<F>(self, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&Context, &Value, Args) -> CallResult + 'static,
    {
        self.member(MemberKind::Instance, name, Visibility::Protected, body)
    }

    pub fn private_method<F>(self, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&Context, &Value, Args) -> CallResult + 'static,
    {
        self.member(MemberKind::Instance, name, Visibility::Private, body)
    }

    /// Public static member. The receiver passed to `body` is the type name
    /// as a symbol.
    pub fn static_method<F>(self, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&Context, &Value, Args) -> CallResult + 'static,
    {
        self.member(MemberKind::Static, name, Visibility::Public, body)
    }

    pub fn private_static_method<F>(self, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&Context, &Value, Args) -> CallResult + 'static,
    {
        self.member(MemberKind::Static, name, Visibility::Private, body)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// Names of members this type defines itself, sorted.
    pub fn own_member_names(&self, kind: MemberKind) -> Vec<&str> {
        let mut names: Vec<&str> = self.members(kind).keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn members(&self, kind: MemberKind) -> &HashMap<String, MemberDef> {
        match kind {
            MemberKind::Instance => &self.instance_members,
            MemberKind::Static => &self.static_members,
        }
    }

    fn members_mut(&mut self, kind: MemberKind) -> &mut HashMap<String, MemberDef> {
        match kind {
            MemberKind::Instance => &mut self.instance_members,
            MemberKind::Static => &mut self.static_members,
        }
    }
}

/// A member found by resolution, along with the type that owns it.
#[derive(Debug, Clone)]
pub struct Resolved<'a> {
    pub owner: &'a str,
    pub def: &'a MemberDef,
}

// ============================================================================
// TypeTable - all types known to one context
// ============================================================================

/// The set of types a context dispatches against.
#[derive(Debug, Default)]
pub struct TypeTable {
    types: HashMap<String, TypeDef>,
}

impl TypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a type definition.
    pub fn define(&mut self, def: TypeDef) -> Result<()> {
        if let Some(parent) = def.parent() {
            if parent == def.name() || !self.types.contains_key(parent) {
                return Err(DecoyError::UnknownType(parent.to_string()));
            }
        }
        tracing::debug!(type_name = def.name(), parent = ?def.parent(), "defining type");
        self.types.insert(def.name.clone(), def);
        Ok(())
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    pub fn get(&self, type_name: &str) -> Option<&TypeDef> {
        self.types.get(type_name)
    }

    /// The type followed by its ancestors, nearest first.
    ///
    /// Stops at the first unknown or repeated name, so a redefinition that
    /// closes a cycle cannot loop.
    pub fn ancestors(&self, type_name: &str) -> Vec<&TypeDef> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut next = Some(type_name);
        while let Some(name) = next {
            if !seen.insert(name) {
                break;
            }
            let Some(def) = self.types.get(name) else {
                break;
            };
            chain.push(def);
            next = def.parent();
        }
        chain
    }

    /// Find the definition a call would reach, searching ancestors.
    pub fn resolve(&self, type_name: &str, kind: MemberKind, member: &str) -> Option<Resolved<'_>> {
        self.ancestors(type_name).into_iter().find_map(|def| {
            def.members(kind).get(member).map(|m| Resolved {
                owner: def.name(),
                def: m,
            })
        })
    }

    /// The definition the type owns itself, ignoring ancestors.
    pub fn own(&self, type_name: &str, kind: MemberKind, member: &str) -> Option<&MemberDef> {
        self.types.get(type_name)?.members(kind).get(member)
    }

    pub(crate) fn insert_own(
        &mut self,
        type_name: &str,
        kind: MemberKind,
        member: &str,
        def: MemberDef,
    ) -> Result<()> {
        let ty = self
            .types
            .get_mut(type_name)
            .ok_or_else(|| DecoyError::UnknownType(type_name.to_string()))?;
        ty.members_mut(kind).insert(member.to_string(), def);
        Ok(())
    }

    pub(crate) fn remove_own(
        &mut self,
        type_name: &str,
        kind: MemberKind,
        member: &str,
    ) -> Option<MemberDef> {
        self.types.get_mut(type_name)?.members_mut(kind).remove(member)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant(v: i64) -> impl Fn(&Context, &Value, Args) -> CallResult {
        move |_, _, _| Ok(Value::Int(v))
    }

    fn table() -> TypeTable {
        let mut table = TypeTable::new();
        table
            .define(TypeDef::new("Base").method("m", constant(1)).static_method("s", constant(2)))
            .unwrap();
        table
            .define(TypeDef::new("Child").extends("Base").private_method("p", constant(3)))
            .unwrap();
        table
    }

    #[test]
    fn resolve_walks_ancestors() {
        let table = table();
        let found = table.resolve("Child", MemberKind::Instance, "m").unwrap();
        assert_eq!(found.owner, "Base");
        assert!(table.own("Child", MemberKind::Instance, "m").is_none());
    }

    #[test]
    fn static_and_instance_tables_are_separate() {
        let table = table();
        assert!(table.resolve("Child", MemberKind::Instance, "s").is_none());
        assert_eq!(table.resolve("Child", MemberKind::Static, "s").unwrap().owner, "Base");
    }

    #[test]
    fn define_rejects_unknown_parent() {
        let mut table = TypeTable::new();
        let err = table.define(TypeDef::new("Orphan").extends("Missing")).unwrap_err();
        assert_eq!(err, DecoyError::UnknownType("Missing".into()));
    }

    #[test]
    fn ancestors_stop_on_cycles() {
        let mut table = table();
        // Redefine Base to point at Child, closing a loop.
        table.define(TypeDef::new("Base").extends("Child")).unwrap();
        let names: Vec<&str> = table.ancestors("Child").iter().map(|d| d.name()).collect();
        assert_eq!(names, vec!["Child", "Base"]);
    }

    #[test]
    fn own_member_names_are_sorted() {
        let def = TypeDef::new("T").method("b", constant(0)).method("a", constant(0));
        assert_eq!(def.own_member_names(MemberKind::Instance), vec!["a", "b"]);
    }
}
