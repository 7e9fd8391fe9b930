//! Registry of live interception units.
//!
//! Keyed by `"<type>#<member>"`, so a context never tracks two units for the
//! same target. Removing a unit always restores its target first.

use crate::dispatch::TypeTable;
use crate::error::{DecoyError, Result};
use crate::intercept::{key_for, InterceptionUnit, TargetId};
use std::any::Any;
use std::borrow::Cow;
use std::collections::HashMap;

/// Anything that names a registry entry.
pub trait RegistryKey {
    fn registry_key(&self) -> Cow<'_, str>;
}

impl RegistryKey for InterceptionUnit {
    fn registry_key(&self) -> Cow<'_, str> {
        Cow::Borrowed(self.key())
    }
}

impl RegistryKey for TargetId {
    fn registry_key(&self) -> Cow<'_, str> {
        Cow::Owned(self.key())
    }
}

impl RegistryKey for str {
    fn registry_key(&self) -> Cow<'_, str> {
        Cow::Borrowed(self)
    }
}

impl RegistryKey for String {
    fn registry_key(&self) -> Cow<'_, str> {
        Cow::Borrowed(self)
    }
}

/// Optional type and member filters for registry lookups.
///
/// Each given component must match exactly; an empty filter matches
/// everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    type_name: Option<String>,
    member: Option<String>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn type_name(type_name: impl Into<String>) -> Self {
        Self {
            type_name: Some(type_name.into()),
            member: None,
        }
    }

    pub fn member(member: impl Into<String>) -> Self {
        Self {
            type_name: None,
            member: Some(member.into()),
        }
    }

    pub fn target(type_name: impl Into<String>, member: impl Into<String>) -> Self {
        Self {
            type_name: Some(type_name.into()),
            member: Some(member.into()),
        }
    }

    pub fn matches(&self, target: &TargetId) -> bool {
        self.type_name.as_deref().map_or(true, |t| t == target.type_name())
            && self.member.as_deref().map_or(true, |m| m == target.member())
    }
}

/// The live interception units of one context.
#[derive(Debug, Default)]
pub struct Registry {
    units: HashMap<String, InterceptionUnit>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `unit`. Fails if its target is already tracked.
    pub fn create(&mut self, unit: InterceptionUnit) -> Result<()> {
        if self.units.contains_key(unit.key()) {
            return Err(DecoyError::Duplicate(unit.key().to_string()));
        }
        self.units.insert(unit.key().to_string(), unit);
        Ok(())
    }

    /// Track a type-erased value, which must be an [`InterceptionUnit`].
    pub fn create_any(&mut self, value: &dyn Any) -> Result<()> {
        match value.downcast_ref::<InterceptionUnit>() {
            Some(unit) => self.create(unit.clone()),
            None => Err(DecoyError::NotAUnit(format!("{:?}", value.type_id()))),
        }
    }

    /// Track `unit` unless this very unit is already tracked.
    pub(crate) fn admit(&mut self, unit: &InterceptionUnit) -> Result<()> {
        match self.units.get(unit.key()) {
            Some(existing) if existing.same_unit(unit) => Ok(()),
            Some(_) => Err(DecoyError::Duplicate(unit.key().to_string())),
            None => self.create(unit.clone()),
        }
    }

    /// Drop the entry for `unit` without restoring it, if it is this unit.
    pub(crate) fn discard(&mut self, unit: &InterceptionUnit) {
        if self
            .units
            .get(unit.key())
            .is_some_and(|existing| existing.same_unit(unit))
        {
            self.units.remove(unit.key());
        }
    }

    /// Units matching `filter`, ordered by key.
    pub fn find(&self, filter: &Filter) -> Vec<InterceptionUnit> {
        let mut found: Vec<InterceptionUnit> = self
            .units
            .values()
            .filter(|unit| filter.matches(unit.target()))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.key().cmp(b.key()));
        found
    }

    pub fn get<K: RegistryKey + ?Sized>(&self, key: &K) -> Option<InterceptionUnit> {
        self.units.get(key.registry_key().as_ref()).cloned()
    }

    /// Restore (without re-arming) and drop every unit matching `filter`.
    /// Returns the removed units.
    pub fn remove_matching(
        &mut self,
        types: &mut TypeTable,
        filter: &Filter,
    ) -> Result<Vec<InterceptionUnit>> {
        let matching = self.find(filter);
        for unit in &matching {
            unit.restore_in(types)?;
            self.units.remove(unit.key());
        }
        if !matching.is_empty() {
            tracing::debug!(count = matching.len(), ?filter, "removed interception units");
        }
        Ok(matching)
    }

    /// Restore and drop the entry for `key`. Returns whether one existed.
    pub fn remove<K: RegistryKey + ?Sized>(
        &mut self,
        types: &mut TypeTable,
        key: &K,
    ) -> Result<bool> {
        let key = key.registry_key();
        let Some(unit) = self.units.get(key.as_ref()).cloned() else {
            return Ok(false);
        };
        unit.restore_in(types)?;
        self.units.remove(key.as_ref());
        Ok(true)
    }

    pub fn contains<K: RegistryKey + ?Sized>(&self, key: &K) -> bool {
        self.units.contains_key(key.registry_key().as_ref())
    }

    /// Whether `type_name#member` is tracked.
    pub fn contains_target(&self, type_name: &str, member: &str) -> bool {
        self.units.contains_key(&key_for(type_name, member))
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Tracked keys, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.units.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}
