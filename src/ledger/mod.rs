//! Call Ledger
//!
//! An append-only record of the calls an interception unit has seen. Each
//! [`Execution`] pairs the [`Arguments`] of one completed call with the
//! value it returned. Callers receive detached copies, so a ledger taken
//! before a clear keeps describing the calls it saw.

mod arguments;

pub use arguments::Arguments;

use decoy_value::Value;
use serde::Serialize;

/// One completed call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Execution {
    args: Arguments,
    result: Value,
}

impl Execution {
    pub fn args(&self) -> &Arguments {
        &self.args
    }

    pub fn result(&self) -> &Value {
        &self.result
    }
}

/// Ordered record of calls and results for one intercepted member.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CallLedger {
    executions: Vec<Execution>,
}

impl CallLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one call.
    pub fn store(&mut self, args: Arguments, result: Value) {
        self.executions.push(Execution { args, result });
    }

    pub fn count(&self) -> usize {
        self.executions.len()
    }

    pub fn len(&self) -> usize {
        self.count()
    }

    pub fn is_empty(&self) -> bool {
        self.executions.is_empty()
    }

    /// Arguments of every call, in call order.
    pub fn calls(&self) -> Vec<Arguments> {
        self.executions.iter().map(|e| e.args.clone()).collect()
    }

    /// Result of every call, aligned index-for-index with [`calls`](Self::calls).
    pub fn results(&self) -> Vec<Value> {
        self.executions.iter().map(|e| e.result.clone()).collect()
    }

    pub fn executions(&self) -> impl Iterator<Item = &Execution> + '_ {
        self.executions.iter()
    }

    pub fn last_call(&self) -> Option<&Arguments> {
        self.executions.last().map(|e| &e.args)
    }

    pub fn last_result(&self) -> Option<&Value> {
        self.executions.last().map(|e| &e.result)
    }

    /// Pretty JSON dump, for diagnostics in failing tests.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
