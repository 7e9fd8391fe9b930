//! Runtime values

use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use crate::ConversionError;

/// A dynamically typed value passed to and returned from dispatched members.
///
/// Instances of user types are [`Value::Record`]s; the record's `type_name`
/// decides which member table a call resolves against. Static members
/// receive the owning type as a [`Value::Symbol`].
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Char(char),
    String(String),
    Symbol(String),
    List(Vec<Value>),
    /// Ordered string-keyed map; insertion order is preserved.
    Map(Vec<(String, Value)>),
    Record {
        type_name: String,
        fields: Vec<(String, Value)>,
    },
}

impl Value {
    /// Helper to create a symbol
    pub fn sym(s: impl Into<String>) -> Self {
        Value::Symbol(s.into())
    }

    /// Helper to create a record instance of `type_name`
    pub fn record<K, V>(type_name: impl Into<String>, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Value::Record {
            type_name: type_name.into(),
            fields: fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Name of the type a call on this value dispatches against.
    ///
    /// Records report their own type name; everything else maps to a fixed
    /// builtin name so that primitives can have member tables too.
    pub fn type_name(&self) -> &str {
        match self {
            Value::Nil => "Nil",
            Value::Bool(_) => "Bool",
            Value::Int(_) => "Int",
            Value::Float(_) => "Float",
            Value::Char(_) => "Char",
            Value::String(_) => "String",
            Value::Symbol(_) => "Symbol",
            Value::List(_) => "List",
            Value::Map(_) => "Map",
            Value::Record { type_name, .. } => type_name,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Look up a field on a record or a key in a map.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Record { fields, .. } | Value::Map(fields) => {
                fields.iter().find(|(k, _)| k == name).map(|(_, v)| v)
            }
            _ => None,
        }
    }

    /// Like [`Value::field`], but converts and reports a missing field as an error.
    pub fn get_field<T: FromValue>(&self, name: &str) -> Result<T, ConversionError> {
        let value = self
            .field(name)
            .ok_or_else(|| ConversionError::MissingField(String::from(name)))?;
        T::from_value(value.clone())
    }
}

// ============================================================================
// From implementations for primitives
// ============================================================================

impl From<()> for Value {
    fn from(_: ()) -> Self { Value::Nil }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self { Value::Bool(v) }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self { Value::Int(v as i64) }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self { Value::Int(v) }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self { Value::Int(i64::from(v)) }
}

/// Fails for counts beyond `i64::MAX` rather than wrapping.
impl TryFrom<usize> for Value {
    type Error = ConversionError;

    fn try_from(v: usize) -> Result<Self, Self::Error> {
        i64::try_from(v).map(Value::Int).map_err(|_| ConversionError::TypeMismatch {
            expected: String::from("Int"),
            got: format!("usize {}", v),
        })
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self { Value::Float(v) }
}

impl From<char> for Value {
    fn from(v: char) -> Self { Value::Char(v) }
}

impl From<String> for Value {
    fn from(v: String) -> Self { Value::String(v) }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self { Value::String(String::from(v)) }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(x) => x.into(),
            None => Value::Nil,
        }
    }
}

impl<T: Into<Value>> From<Box<T>> for Value {
    fn from(v: Box<T>) -> Self {
        (*v).into()
    }
}

// ============================================================================
// TryFrom implementations for primitives
// ============================================================================

fn mismatch(expected: &str, got: &Value) -> ConversionError {
    ConversionError::TypeMismatch {
        expected: String::from(expected),
        got: format!("{:?}", got),
    }
}

impl TryFrom<Value> for bool {
    type Error = ConversionError;
    fn try_from(v: Value) -> Result<Self, Self::Error> {
        match v {
            Value::Bool(x) => Ok(x),
            other => Err(mismatch("bool", &other)),
        }
    }
}

impl TryFrom<Value> for i64 {
    type Error = ConversionError;
    fn try_from(v: Value) -> Result<Self, Self::Error> {
        match v {
            Value::Int(x) => Ok(x),
            other => Err(mismatch("i64", &other)),
        }
    }
}

impl TryFrom<Value> for f64 {
    type Error = ConversionError;
    fn try_from(v: Value) -> Result<Self, Self::Error> {
        match v {
            Value::Float(x) => Ok(x),
            Value::Int(x) => Ok(x as f64),
            other => Err(mismatch("f64", &other)),
        }
    }
}

impl TryFrom<Value> for char {
    type Error = ConversionError;
    fn try_from(v: Value) -> Result<Self, Self::Error> {
        match v {
            Value::Char(x) => Ok(x),
            other => Err(mismatch("char", &other)),
        }
    }
}

impl TryFrom<Value> for String {
    type Error = ConversionError;
    fn try_from(v: Value) -> Result<Self, Self::Error> {
        match v {
            Value::String(x) | Value::Symbol(x) => Ok(x),
            other => Err(mismatch("String", &other)),
        }
    }
}

impl<T: TryFrom<Value, Error = ConversionError>> TryFrom<Value> for Vec<T> {
    type Error = ConversionError;
    fn try_from(v: Value) -> Result<Self, Self::Error> {
        match v {
            Value::List(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, item)| {
                    T::try_from(item).map_err(|e| ConversionError::IndexError(i, Box::new(e)))
                })
                .collect(),
            other => Err(ConversionError::ExpectedList(format!("{:?}", other))),
        }
    }
}

// ============================================================================
// FromValue trait - avoids coherence issues with TryFrom for Option<T>
// ============================================================================

/// Trait for converting from a Value.
///
/// Exists because a blanket `TryFrom<Value> for Option<T>` would collide with
/// core's reflexive conversions.
pub trait FromValue: Sized {
    fn from_value(v: Value) -> Result<Self, ConversionError>;
}

impl<T: TryFrom<Value, Error = ConversionError>> FromValue for T {
    fn from_value(v: Value) -> Result<Self, ConversionError> {
        T::try_from(v)
    }
}

/// `Nil` converts to `None`, anything else must convert to `T`.
impl<T: FromValue> FromValue for Option<T> {
    fn from_value(v: Value) -> Result<Self, ConversionError> {
        match v {
            Value::Nil => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn record_dispatches_on_its_own_type_name() {
        let v = Value::record("Target", [("first_name", "Michael")]);
        assert_eq!(v.type_name(), "Target");
        assert_eq!(v.field("first_name"), Some(&Value::from("Michael")));
        assert_eq!(v.field("last_name"), None);
    }

    #[test]
    fn usize_converts_only_within_int_range() {
        assert_eq!(Value::try_from(7usize), Ok(Value::Int(7)));
        assert_eq!(Value::from(u32::MAX), Value::Int(4_294_967_295));
        #[cfg(target_pointer_width = "64")]
        assert!(matches!(
            Value::try_from(usize::MAX),
            Err(ConversionError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn primitives_report_builtin_type_names() {
        assert_eq!(Value::from("x").type_name(), "String");
        assert_eq!(Value::from(3).type_name(), "Int");
        assert_eq!(Value::Nil.type_name(), "Nil");
    }

    #[test]
    fn option_maps_none_to_nil() {
        assert_eq!(Value::from(None::<i64>), Value::Nil);
        assert_eq!(Option::<i64>::from_value(Value::Nil), Ok(None));
        assert_eq!(Option::<i64>::from_value(Value::Int(4)), Ok(Some(4)));
    }

    #[test]
    fn list_conversion_reports_failing_index() {
        let v = Value::List(vec![Value::Int(1), Value::from("two")]);
        let err = Vec::<i64>::try_from(v).unwrap_err();
        assert!(matches!(err, ConversionError::IndexError(1, _)));
    }

    #[test]
    fn get_field_reports_missing_fields() {
        let v = Value::record("Target", [("gullible", true)]);
        assert_eq!(v.get_field::<bool>("gullible"), Ok(true));
        assert_eq!(
            v.get_field::<bool>("secrets"),
            Err(ConversionError::MissingField("secrets".into()))
        );
    }
}
