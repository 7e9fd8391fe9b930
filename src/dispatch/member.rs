//! Member definitions stored in a type's member tables.

use super::Args;
use crate::context::Context;
use crate::error::CallResult;
use decoy_value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::rc::Rc;

/// Visibility of a member, checked on external calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Protected,
    Private,
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Visibility::Public => "public",
            Visibility::Protected => "protected",
            Visibility::Private => "private",
        })
    }
}

/// Whether a member lives on instances or on the type itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberKind {
    Instance,
    Static,
}

/// The callable behind a member: `(context, receiver, args) -> result`.
pub type Body = Rc<dyn Fn(&Context, &Value, Args) -> CallResult>;

/// One entry in a member table.
#[derive(Clone)]
pub struct MemberDef {
    visibility: Visibility,
    body: Body,
}

impl MemberDef {
    pub fn new<F>(visibility: Visibility, body: F) -> Self
    where
        F: Fn(&Context, &Value, Args) -> CallResult + 'static,
    {
        Self {
            visibility,
            body: Rc::new(body),
        }
    }

    pub(crate) fn from_body(visibility: Visibility, body: Body) -> Self {
        Self { visibility, body }
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    pub(crate) fn body(&self) -> &Body {
        &self.body
    }

    pub fn invoke(&self, ctx: &Context, receiver: &Value, args: Args) -> CallResult {
        (self.body)(ctx, receiver, args)
    }

    /// True when both definitions share the same body.
    pub fn same_body(&self, other: &MemberDef) -> bool {
        Rc::ptr_eq(&self.body, &other.body)
    }
}

impl fmt::Debug for MemberDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemberDef")
            .field("visibility", &self.visibility)
            .finish_non_exhaustive()
    }
}
