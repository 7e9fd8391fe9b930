//! Target Policy
//!
//! A static deny-list of members that may never be intercepted. The policy is
//! keyed by *base* type name (the first `::`-separated segment), and each
//! entry is a list of member rules:
//!
//! - `*` restricts every member of the type
//! - `^name` lifts a wildcard restriction for `name`
//! - `name` restricts exactly that member
//!
//! Policies are JSON documents:
//!
//! ```json
//! { "restricted": { "Kernel": ["*"], "Ledger": ["*", "^count"], "Clock": ["now"] } }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable naming an extra policy file for the default context.
pub const POLICY_ENV_VAR: &str = "DECOY_POLICY";

const WILDCARD: &str = "*";
const OVERRIDE_PREFIX: char = '^';

/// Restrictions that ship with the engine: its own namespace and the
/// process-level `Kernel` type.
const BUILTIN_RESTRICTIONS: &[(&str, &[&str])] = &[("Decoy", &["*"]), ("Kernel", &["*"])];

/// Errors loading a policy document.
#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("failed to read policy {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid policy document: {0}")]
    Parse(#[from] serde_json::Error),
}

/// The deny-list consulted when an interception unit is created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default)]
    restricted: BTreeMap<String, Vec<String>>,
}

impl Policy {
    /// A policy that restricts nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The engine's own restrictions.
    pub fn builtin() -> Self {
        let restricted = BUILTIN_RESTRICTIONS
            .iter()
            .map(|(ty, rules)| (ty.to_string(), rules.iter().map(|r| r.to_string()).collect()))
            .collect();
        Self { restricted }
    }

    pub fn from_json_str(json: &str) -> Result<Self, PolicyError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| PolicyError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// The builtin policy, merged with the file named by `DECOY_POLICY` if set.
    pub fn from_env() -> Result<Self, PolicyError> {
        let mut policy = Self::builtin();
        if let Some(path) = std::env::var_os(POLICY_ENV_VAR) {
            tracing::debug!(path = ?path, "loading policy from environment");
            policy.merge(Self::from_path(path)?);
        }
        Ok(policy)
    }

    /// Add a single rule for `type_name`.
    pub fn restrict(mut self, type_name: impl Into<String>, rule: impl Into<String>) -> Self {
        let rules = self.restricted.entry(type_name.into()).or_default();
        let rule = rule.into();
        if !rules.contains(&rule) {
            rules.push(rule);
        }
        self
    }

    /// Union the rules of `other` into this policy.
    pub fn merge(&mut self, other: Policy) {
        for (ty, rules) in other.restricted {
            let existing = self.restricted.entry(ty).or_default();
            for rule in rules {
                if !existing.contains(&rule) {
                    existing.push(rule);
                }
            }
        }
    }

    /// Whether `member` of `type_name` may not be intercepted.
    pub fn is_restricted(&self, type_name: &str, member: &str) -> bool {
        let base = base_type(type_name);
        let Some(rules) = self.restricted.get(base) else {
            return false;
        };
        let has = |rule: &str| rules.iter().any(|r| r == rule);
        let override_rule = format!("{OVERRIDE_PREFIX}{member}");
        (has(WILDCARD) && !has(&override_rule)) || has(member)
    }

    /// Rules per base type, sorted by type name.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &[String])> + '_ {
        self.restricted.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.restricted.is_empty()
    }
}

fn base_type(type_name: &str) -> &str {
    type_name.split("::").next().unwrap_or(type_name)
}
