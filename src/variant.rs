use std::cmp::Ordering;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The scalar tagged value carried by AST leaves and produced by literal
/// tokens.
///
/// Container values never appear here; a variable chain that resolves to an
/// array or dictionary is materialized as a [`Value`](crate::Value) at
/// render time instead.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Variant {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl Variant {
    /// Compares two variants with the engine's coercion rules: `Nil` is
    /// equal only to itself, integers widen to floats when mixed, strings
    /// compare lexicographically, and any other mixed-kind pair is
    /// unordered.
    pub fn compare(&self, other: &Variant) -> Option<Ordering> {
        match (self, other) {
            (Variant::Nil, Variant::Nil) => Some(Ordering::Equal),
            (Variant::Bool(a), Variant::Bool(b)) => a.partial_cmp(b),
            (Variant::Int(a), Variant::Int(b)) => a.partial_cmp(b),
            (Variant::Float(a), Variant::Float(b)) => a.partial_cmp(b),
            (Variant::Int(a), Variant::Float(b)) => (*a as f64).partial_cmp(b),
            (Variant::Float(a), Variant::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Variant::String(a), Variant::String(b)) => a.partial_cmp(b),
            _ => None,
        }
    }

    /// `Nil` and `false` are falsy; everything else, including `0` and the
    /// empty string, is truthy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Variant::Nil | Variant::Bool(false))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Variant::Nil)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Variant::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Appends the output-text form of this variant to `out`. `Nil` renders
    /// as the empty string.
    pub fn render_to(&self, out: &mut String) {
        match self {
            Variant::Nil => {}
            Variant::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Variant::Int(i) => out.push_str(&i.to_string()),
            Variant::Float(f) => out.push_str(&format_float(*f)),
            Variant::String(s) => out.push_str(s),
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = String::new();
        self.render_to(&mut s);
        write!(f, "{}", s)
    }
}

impl From<bool> for Variant {
    fn from(value: bool) -> Self {
        Variant::Bool(value)
    }
}

impl From<i64> for Variant {
    fn from(value: i64) -> Self {
        Variant::Int(value)
    }
}

impl From<f64> for Variant {
    fn from(value: f64) -> Self {
        Variant::Float(value)
    }
}

impl From<&str> for Variant {
    fn from(value: &str) -> Self {
        Variant::String(value.to_string())
    }
}

impl From<String> for Variant {
    fn from(value: String) -> Self {
        Variant::String(value)
    }
}

/// Formats a float for output text, trimming insignificant trailing zeros.
pub(crate) fn format_float(value: f64) -> String {
    if (value - value.trunc()).abs() < f64::EPSILON {
        return (value as i64).to_string();
    }
    let s = format!("{:.6}", value);
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Variant::Nil, "")]
    #[case(Variant::Bool(true), "true")]
    #[case(Variant::Bool(false), "false")]
    #[case(Variant::Int(42), "42")]
    #[case(Variant::Float(42.0), "42")]
    #[case(Variant::Float(42.5), "42.5")]
    #[case(Variant::Float(-0.25), "-0.25")]
    #[case(Variant::String("abc".to_string()), "abc")]
    fn test_display(#[case] variant: Variant, #[case] expected: &str) {
        assert_eq!(variant.to_string(), expected);
    }

    #[rstest]
    #[case(Variant::Int(1), Variant::Int(2), Some(Ordering::Less))]
    #[case(Variant::Int(2), Variant::Float(2.0), Some(Ordering::Equal))]
    #[case(Variant::Float(2.5), Variant::Int(2), Some(Ordering::Greater))]
    #[case(Variant::String("a".into()), Variant::String("b".into()), Some(Ordering::Less))]
    #[case(Variant::Nil, Variant::Nil, Some(Ordering::Equal))]
    #[case(Variant::Nil, Variant::Int(0), None)]
    #[case(Variant::String("1".into()), Variant::Int(1), None)]
    fn test_compare(
        #[case] a: Variant,
        #[case] b: Variant,
        #[case] expected: Option<Ordering>,
    ) {
        assert_eq!(a.compare(&b), expected);
    }

    #[rstest]
    #[case(Variant::Nil, false)]
    #[case(Variant::Bool(false), false)]
    #[case(Variant::Bool(true), true)]
    #[case(Variant::Int(0), true)]
    #[case(Variant::String(String::new()), true)]
    fn test_truthiness(#[case] variant: Variant, #[case] expected: bool) {
        assert_eq!(variant.is_truthy(), expected);
    }
}
