//! Immutable snapshot of one call's arguments.

use crate::dispatch::Args;
use crate::error::{DecoyError, Result};
use decoy_value::Value;
use serde::Serialize;

/// The arguments of one recorded call, frozen at capture time.
///
/// Positional values are addressed by integer, named values by string or
/// symbol. Iteration, [`first`](Self::first) and [`last`](Self::last)
/// traverse positional values and then named values in declaration order.
/// The trailing block of a call is not captured.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Arguments {
    positional: Vec<Value>,
    named: Vec<(String, Value)>,
}

impl Arguments {
    pub fn new(positional: Vec<Value>, named: Vec<(String, Value)>) -> Self {
        Self { positional, named }
    }

    /// Copy the values of a live call.
    pub fn capture(args: &Args) -> Self {
        Self {
            positional: args.positional().to_vec(),
            named: args.named().to_vec(),
        }
    }

    /// Look up an argument by a dynamic key.
    ///
    /// An `Int` key indexes the positional arguments (negative counts from
    /// the end); a `String` or `Symbol` key looks up a named argument.
    /// Missing entries are `Ok(None)`. Any other key is an error.
    pub fn get(&self, key: &Value) -> Result<Option<&Value>> {
        match key {
            Value::Int(index) => Ok(self.positional_signed(*index)),
            Value::String(name) | Value::Symbol(name) => Ok(self.named(name)),
            other => Err(DecoyError::UnsupportedKeyType(other.type_name().to_string())),
        }
    }

    pub fn positional(&self, index: usize) -> Option<&Value> {
        self.positional.get(index)
    }

    pub fn named(&self, key: &str) -> Option<&Value> {
        self.named.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    fn positional_signed(&self, index: i64) -> Option<&Value> {
        if index >= 0 {
            return self.positional.get(usize::try_from(index).ok()?);
        }
        let back = usize::try_from(index.unsigned_abs()).ok()?;
        self.positional.len().checked_sub(back).and_then(|i| self.positional.get(i))
    }

    /// Keys of the named arguments. Positional arguments have none.
    pub fn keys(&self) -> Vec<&str> {
        self.named.iter().map(|(k, _)| k.as_str()).collect()
    }

    /// All values: positional first, then named.
    pub fn values(&self) -> Vec<&Value> {
        self.iter().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> + '_ {
        self.positional.iter().chain(self.named.iter().map(|(_, v)| v))
    }

    pub fn first(&self) -> Option<&Value> {
        self.iter().next()
    }

    pub fn last(&self) -> Option<&Value> {
        self.iter().last()
    }

    pub fn len(&self) -> usize {
        self.positional.len() + self.named.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.named.is_empty()
    }
}

impl<'a> IntoIterator for &'a Arguments {
    type Item = &'a Value;
    type IntoIter = Box<dyn Iterator<Item = &'a Value> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}
