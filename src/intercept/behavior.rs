//! What an installed wrapper does on each call.

use crate::context::Context;
use crate::dispatch::{Args, Body};
use crate::error::{CallResult, DecoyError, Result};
use crate::ledger::{Arguments, CallLedger};
use decoy_value::Value;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

/// Replacement produced by a substituted member.
#[derive(Clone)]
pub enum Replacement {
    /// Return a stored value.
    Value(Value),
    /// Run a stored implementation with the call's receiver and arguments.
    Implementation(Body),
}

impl fmt::Debug for Replacement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Replacement::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Replacement::Implementation(_) => f.write_str("Implementation(..)"),
        }
    }
}

/// A substitution request: a replacement plus an optional call limit.
///
/// ```ignore
/// unit.substitute(&ctx, Substitution::new().returning("stub").times(2))?;
/// ```
#[derive(Clone, Debug, Default)]
pub struct Substitution {
    replacement: Option<Replacement>,
    limit: Option<usize>,
}

impl Substitution {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `value` from every substituted call.
    pub fn returning(mut self, value: impl Into<Value>) -> Self {
        self.replacement = Some(Replacement::Value(value.into()));
        self
    }

    /// Run `implementation` for every substituted call.
    pub fn running<F>(mut self, implementation: F) -> Self
    where
        F: Fn(&Context, &Value, Args) -> CallResult + 'static,
    {
        self.replacement = Some(Replacement::Implementation(Rc::new(implementation)));
        self
    }

    /// Substitute only the next `n` completed calls, then go back to watching.
    pub fn times(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn once(self) -> Self {
        self.times(1)
    }

    pub(crate) fn into_behavior(self, target: &str) -> Result<Behavior> {
        let replacement = self
            .replacement
            .ok_or_else(|| DecoyError::MissingReplacement(target.to_string()))?;
        if self.limit == Some(0) {
            return Err(DecoyError::MissingReplacement(target.to_string()));
        }
        Ok(Behavior::Substitute {
            replacement,
            remaining: self.limit,
        })
    }
}

/// Observable lifecycle state of an interception unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// No wrapper installed; the member behaves as originally defined.
    Unarmed,
    /// Recording passthrough to the original.
    Watching,
    /// Recording, with a replacement active.
    Substituted(SubstitutionKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubstitutionKind {
    Value,
    Implementation,
    /// Value or implementation for this many more completed calls.
    Bounded { remaining: usize },
    /// This many queued values left.
    Sequence { remaining: usize },
}

pub(crate) enum Behavior {
    Watch,
    Substitute {
        replacement: Replacement,
        remaining: Option<usize>,
    },
    Sequence(VecDeque<Value>),
}

impl Behavior {
    pub(crate) fn sequence(values: Vec<Value>, target: &str) -> Result<Self> {
        if values.is_empty() {
            return Err(DecoyError::MissingReplacement(target.to_string()));
        }
        Ok(Behavior::Sequence(values.into()))
    }

    fn state(&self) -> State {
        match self {
            Behavior::Watch => State::Watching,
            Behavior::Substitute {
                remaining: Some(n), ..
            } => State::Substituted(SubstitutionKind::Bounded { remaining: *n }),
            Behavior::Substitute {
                replacement: Replacement::Value(_),
                ..
            } => State::Substituted(SubstitutionKind::Value),
            Behavior::Substitute {
                replacement: Replacement::Implementation(_),
                ..
            } => State::Substituted(SubstitutionKind::Implementation),
            Behavior::Sequence(values) => State::Substituted(SubstitutionKind::Sequence {
                remaining: values.len(),
            }),
        }
    }
}

enum Step {
    Forward,
    Return(Value),
    Run(Body),
}

/// Generations of the behavior and ledger a call started under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Epoch {
    behavior: u64,
    ledger: u64,
}

/// State shared between an interception unit and the wrapper it installs.
///
/// Borrows are never held across a call into user code, so bodies and
/// implementations may re-enter the same member. A call that re-arms,
/// clears or restores its own unit leaves the new behavior and ledger
/// untouched when it completes.
pub(crate) struct Recorder {
    target: String,
    behavior: RefCell<Behavior>,
    ledger: RefCell<CallLedger>,
    behavior_epoch: Cell<u64>,
    ledger_epoch: Cell<u64>,
}

impl Recorder {
    pub(crate) fn new(target: String) -> Self {
        Self {
            target,
            behavior: RefCell::new(Behavior::Watch),
            ledger: RefCell::new(CallLedger::new()),
            behavior_epoch: Cell::new(0),
            ledger_epoch: Cell::new(0),
        }
    }

    pub(crate) fn set(&self, behavior: Behavior) {
        *self.behavior.borrow_mut() = behavior;
        self.behavior_epoch.set(self.behavior_epoch.get().wrapping_add(1));
    }

    pub(crate) fn state(&self) -> State {
        self.behavior.borrow().state()
    }

    pub(crate) fn ledger(&self) -> CallLedger {
        self.ledger.borrow().clone()
    }

    /// Swap in an empty ledger and hand back the old one.
    pub(crate) fn clear(&self) -> CallLedger {
        self.ledger_epoch.set(self.ledger_epoch.get().wrapping_add(1));
        std::mem::take(&mut *self.ledger.borrow_mut())
    }

    fn epoch(&self) -> Epoch {
        Epoch {
            behavior: self.behavior_epoch.get(),
            ledger: self.ledger_epoch.get(),
        }
    }

    fn begin(&self) -> (Step, Epoch) {
        let step = match &*self.behavior.borrow() {
            Behavior::Watch => Step::Forward,
            Behavior::Substitute { replacement, .. } => match replacement {
                Replacement::Value(v) => Step::Return(v.clone()),
                Replacement::Implementation(f) => Step::Run(f.clone()),
            },
            Behavior::Sequence(values) => match values.front() {
                Some(v) => Step::Return(v.clone()),
                None => Step::Forward,
            },
        };
        (step, self.epoch())
    }

    /// Advance bounded counters after a completed call, reverting to
    /// watching once they run out. A behavior armed after `started` is
    /// left alone.
    fn complete(&self, started: Epoch) {
        if started.behavior != self.behavior_epoch.get() {
            return;
        }
        let mut behavior = self.behavior.borrow_mut();
        let exhausted = match &mut *behavior {
            Behavior::Watch => false,
            Behavior::Substitute { remaining, .. } => match remaining {
                Some(n) => {
                    *n = n.saturating_sub(1);
                    *n == 0
                }
                None => false,
            },
            Behavior::Sequence(values) => {
                values.pop_front();
                values.is_empty()
            }
        };
        if exhausted {
            tracing::debug!(unit = %self.target, "substitution exhausted, watching");
            *behavior = Behavior::Watch;
        }
    }

    /// Store a completed call, unless the ledger it started under has since
    /// been cleared.
    fn record(&self, started: Epoch, args: Arguments, result: Value) {
        if started.ledger != self.ledger_epoch.get() {
            tracing::debug!(unit = %self.target, "ledger cleared during call, dropping record");
            return;
        }
        self.ledger.borrow_mut().store(args, result);
    }
}

/// Build the recording member body that replaces the original.
pub(crate) fn wrapper(recorder: Rc<Recorder>, original: Body) -> Body {
    Rc::new(move |ctx: &Context, receiver: &Value, args: Args| -> CallResult {
        let snapshot = Arguments::capture(&args);
        let (step, started) = recorder.begin();
        let result = match step {
            Step::Forward => original(ctx, receiver, args)?,
            Step::Return(value) => value,
            Step::Run(implementation) => implementation(ctx, receiver, args)?,
        };
        recorder.complete(started);
        recorder.record(started, snapshot, result.clone());
        Ok(result)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitution_without_replacement_is_rejected() {
        let err = Substitution::new().times(2).into_behavior("T#m").err().unwrap();
        assert_eq!(err, DecoyError::MissingReplacement("T#m".into()));
    }

    #[test]
    fn zero_call_limit_is_rejected() {
        assert!(Substitution::new().returning(1).times(0).into_behavior("T#m").is_err());
    }

    #[test]
    fn empty_sequence_is_rejected() {
        assert!(Behavior::sequence(vec![], "T#m").is_err());
    }

    #[test]
    fn later_replacement_wins() {
        let behavior = Substitution::new()
            .returning(1)
            .running(|_, _, _| Ok(Value::Nil))
            .into_behavior("T#m")
            .ok()
            .unwrap();
        assert_eq!(behavior.state(), State::Substituted(SubstitutionKind::Implementation));
    }

    #[test]
    fn bounded_counter_reverts_after_limit() {
        let recorder = Recorder::new("T#m".into());
        recorder.set(Substitution::new().returning(1).times(2).into_behavior("T#m").ok().unwrap());
        recorder.complete(recorder.epoch());
        assert_eq!(
            recorder.state(),
            State::Substituted(SubstitutionKind::Bounded { remaining: 1 })
        );
        recorder.complete(recorder.epoch());
        assert_eq!(recorder.state(), State::Watching);
    }

    #[test]
    fn completion_skips_behavior_armed_mid_call() {
        let recorder = Recorder::new("T#m".into());
        let (_, started) = recorder.begin();
        recorder.set(Substitution::new().returning(1).times(2).into_behavior("T#m").ok().unwrap());
        recorder.complete(started);
        assert_eq!(
            recorder.state(),
            State::Substituted(SubstitutionKind::Bounded { remaining: 2 })
        );
    }

    #[test]
    fn record_skips_ledger_cleared_mid_call() {
        let recorder = Recorder::new("T#m".into());
        let (_, started) = recorder.begin();
        recorder.clear();
        recorder.record(started, Arguments::default(), Value::Int(1));
        assert!(recorder.ledger().is_empty());

        let (_, fresh) = recorder.begin();
        recorder.record(fresh, Arguments::default(), Value::Int(2));
        assert_eq!(recorder.ledger().results(), vec![Value::Int(2)]);
    }

    #[test]
    fn clear_hands_back_old_ledger() {
        let recorder = Recorder::new("T#m".into());
        recorder.record(recorder.epoch(), Arguments::default(), Value::Int(1));
        let old = recorder.clear();
        assert_eq!(old.count(), 1);
        assert!(recorder.ledger().is_empty());
    }
}
