//! Call arguments threaded through every dispatched member.

use crate::error::{CallError, CallResult};
use decoy_value::Value;
use std::fmt;
use std::rc::Rc;

/// Trailing callback passed along with a call.
pub type Block = Rc<dyn Fn(&[Value]) -> CallResult>;

/// The full argument list of one call: positional values, named values in
/// declaration order, and an optional trailing block.
///
/// Wrappers forward all three parts unchanged to whichever behavior is
/// active, so a member observes the same `Args` whether it is intercepted
/// or not.
#[derive(Clone, Default)]
pub struct Args {
    positional: Vec<Value>,
    named: Vec<(String, Value)>,
    block: Option<Block>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    pub fn with(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Append a named argument. A repeated key replaces the earlier value
    /// but keeps its position.
    pub fn with_named(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.named.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.named.push((key, value)),
        }
        self
    }

    /// Attach a trailing block.
    pub fn with_block<F>(mut self, block: F) -> Self
    where
        F: Fn(&[Value]) -> CallResult + 'static,
    {
        self.block = Some(Rc::new(block));
        self
    }

    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    pub fn named(&self) -> &[(String, Value)] {
        &self.named
    }

    pub fn block(&self) -> Option<&Block> {
        self.block.as_ref()
    }

    /// Positional argument at `index`.
    pub fn nth(&self, index: usize) -> Option<&Value> {
        self.positional.get(index)
    }

    /// Named argument by key.
    pub fn named_value(&self, key: &str) -> Option<&Value> {
        self.named.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Invoke the trailing block, failing like a missing `yield` target when
    /// none was given.
    pub fn yield_block(&self, values: &[Value]) -> CallResult {
        match &self.block {
            Some(block) => block(values),
            None => Err(CallError::raised("no block given")),
        }
    }

    pub fn len(&self) -> usize {
        self.positional.len() + self.named.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.named.is_empty()
    }
}

impl fmt::Debug for Args {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Args")
            .field("positional", &self.positional)
            .field("named", &self.named)
            .field("block", &self.block.is_some())
            .finish()
    }
}
