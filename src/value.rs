use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::variable::{Variable, VariableKind, VariableStore};
use crate::variant::{format_float, Variant};

/// The default variable store: an engine-owned dynamic value tree.
///
/// Hosts that do not bring their own [`Variable`] implementation build one
/// of these (usually with the [`value!`](crate::value!) macro) and hand it
/// to the renderer. Dictionaries use a `BTreeMap` so iteration order is
/// deterministic.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Dict(BTreeMap<String, Value>),
}

impl Value {
    /// `Nil` and `false` are falsy; everything else is truthy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Value::Nil => true,
            Value::String(s) => s.is_empty(),
            Value::Array(a) => a.is_empty(),
            Value::Dict(d) => d.is_empty(),
            _ => false,
        }
    }

    /// Compares with the engine's coercion rules; container values are
    /// unordered against everything.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Nil, Value::Nil) => Some(Ordering::Equal),
            (Value::Bool(a), Value::Bool(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::String(a), Value::String(b)) => a.partial_cmp(b),
            _ => None,
        }
    }

    /// Loose equality: scalar kinds compare with numeric widening, while
    /// containers compare structurally.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Array(_), Value::Array(_)) | (Value::Dict(_), Value::Dict(_)) => {
                self == other
            }
            _ => self.compare(other) == Some(Ordering::Equal),
        }
    }

    /// Numeric view, widening integers; `None` for everything else.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Appends the output-text form to `out`: nil and dictionaries render
    /// empty, arrays render their elements concatenated in order.
    pub fn render_to(&self, out: &mut String) {
        match self {
            Value::Nil | Value::Dict(_) => {}
            Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Value::Int(i) => out.push_str(&i.to_string()),
            Value::Float(f) => out.push_str(&format_float(*f)),
            Value::String(s) => out.push_str(s),
            Value::Array(items) => {
                for item in items {
                    item.render_to(out);
                }
            }
        }
    }

    /// The scalar form of this value, if it has one.
    pub fn to_variant(&self) -> Option<Variant> {
        match self {
            Value::Nil => Some(Variant::Nil),
            Value::Bool(b) => Some(Variant::Bool(*b)),
            Value::Int(i) => Some(Variant::Int(*i)),
            Value::Float(f) => Some(Variant::Float(*f)),
            Value::String(s) => Some(Variant::String(s.clone())),
            Value::Array(_) | Value::Dict(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = String::new();
        self.render_to(&mut s);
        write!(f, "{}", s)
    }
}

impl From<Variant> for Value {
    fn from(variant: Variant) -> Self {
        match variant {
            Variant::Nil => Value::Nil,
            Variant::Bool(b) => Value::Bool(b),
            Variant::Int(i) => Value::Int(i),
            Variant::Float(f) => Value::Float(f),
            Variant::String(s) => Value::String(s),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::Int(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::Array(value)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(value: BTreeMap<String, Value>) -> Self {
        Value::Dict(value)
    }
}

impl Variable for Value {
    fn kind(&self) -> VariableKind {
        match self {
            Value::Nil => VariableKind::Nil,
            Value::Bool(_) => VariableKind::Bool,
            Value::Int(_) => VariableKind::Int,
            Value::Float(_) => VariableKind::Float,
            Value::String(_) => VariableKind::String,
            Value::Array(_) => VariableKind::Array,
            Value::Dict(_) => VariableKind::Dictionary,
        }
    }

    fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    fn is_truthy(&self) -> bool {
        Value::is_truthy(self)
    }

    fn len(&self) -> Option<usize> {
        match self {
            Value::String(s) => Some(s.chars().count()),
            Value::Array(a) => Some(a.len()),
            Value::Dict(d) => Some(d.len()),
            _ => None,
        }
    }

    fn child_by_key(&self, key: &str) -> Option<&dyn Variable> {
        match self {
            Value::Dict(d) => d.get(key).map(|v| v as &dyn Variable),
            _ => None,
        }
    }

    fn child_by_index(&self, index: usize) -> Option<&dyn Variable> {
        match self {
            Value::Array(a) => a.get(index).map(|v| v as &dyn Variable),
            _ => None,
        }
    }

    fn to_value(&self) -> Value {
        self.clone()
    }
}

impl VariableStore for Value {
    fn as_variable(&self) -> &dyn Variable {
        self
    }

    fn set_key(&mut self, key: &str, value: Value) -> bool {
        // A nil store auto-vivifies into a dictionary on first write.
        if matches!(self, Value::Nil) {
            *self = Value::Dict(BTreeMap::new());
        }
        match self {
            Value::Dict(d) => {
                d.insert(key.to_string(), value);
                true
            }
            _ => false,
        }
    }

    fn set_index(&mut self, index: usize, value: Value) -> bool {
        if matches!(self, Value::Nil) {
            *self = Value::Array(Vec::new());
        }
        match self {
            Value::Array(a) => {
                if a.len() <= index {
                    a.resize(index + 1, Value::Nil);
                }
                a[index] = value;
                true
            }
            _ => false,
        }
    }

    fn key_mut(&mut self, key: &str) -> Option<&mut dyn VariableStore> {
        match self {
            Value::Dict(d) => d.get_mut(key).map(|v| v as &mut dyn VariableStore),
            _ => None,
        }
    }

    fn index_mut(&mut self, index: usize) -> Option<&mut dyn VariableStore> {
        match self {
            Value::Array(a) => a.get_mut(index).map(|v| v as &mut dyn VariableStore),
            _ => None,
        }
    }
}

/// Builds a [`Value`] tree with JSON-like syntax.
///
/// ```
/// use brine::value;
///
/// let store = value!({ "items": [1, 2, 3], "name": "World" });
/// ```
#[macro_export]
macro_rules! value {
    (null) => { $crate::Value::Nil };
    ([ $( $elem:tt ),* $(,)? ]) => {
        $crate::Value::Array(vec![ $( $crate::value!($elem) ),* ])
    };
    ({ $( $key:literal : $val:tt ),* $(,)? }) => {{
        let mut map = std::collections::BTreeMap::new();
        $( map.insert($key.to_string(), $crate::value!($val)); )*
        $crate::Value::Dict(map)
    }};
    ($other:expr) => { $crate::Value::from($other) };
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(value!(null), "")]
    #[case(value!(true), "true")]
    #[case(value!(3), "3")]
    #[case(value!(2.50), "2.5")]
    #[case(value!("text"), "text")]
    #[case(value!([1, 2, 3]), "123")]
    #[case(value!({ "a": 1 }), "")]
    fn test_render(#[case] value: Value, #[case] expected: &str) {
        assert_eq!(value.to_string(), expected);
    }

    #[rstest]
    #[case(value!(1), value!(1.0), true)]
    #[case(value!(1), value!(2), false)]
    #[case(value!("a"), value!("a"), true)]
    #[case(value!("1"), value!(1), false)]
    #[case(value!([1, 2]), value!([1, 2]), true)]
    #[case(value!(null), value!(null), true)]
    #[case(value!(null), value!(false), false)]
    fn test_loose_eq(#[case] a: Value, #[case] b: Value, #[case] expected: bool) {
        assert_eq!(a.loose_eq(&b), expected);
    }

    #[test]
    fn test_chain_access() {
        let store = value!({ "a": { "b": [{ "c": "x" }, { "c": "y" }] } });
        let b = store.child_by_key("a").unwrap().child_by_key("b").unwrap();
        let c = b.child_by_index(1).unwrap().child_by_key("c").unwrap();
        assert_eq!(c.as_str(), Some("y"));
        assert!(b.child_by_index(7).is_none());
    }

    #[test]
    fn test_set_key_vivifies_nil() {
        let mut store = Value::Nil;
        assert!(store.set_key("x", value!(1)));
        assert_eq!(store, value!({ "x": 1 }));
        assert!(!Value::Int(3).set_key("x", Value::Nil));
    }

    #[test]
    fn test_set_index_grows_array() {
        let mut store = value!([1]);
        assert!(store.set_index(3, value!(4)));
        assert_eq!(store, value!([1, null, null, 4]));
    }
}
