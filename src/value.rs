//! The dynamic item type flowing through source chains.
//!
//! Items are dynamically shaped: a single chain may carry numbers, text,
//! raw bytes, nested collections, or other sources and completion handles
//! (the combining operators consume the latter two). Operators that need
//! text or numbers coerce on the way in rather than rejecting items.

use std::collections::BTreeMap;
use std::fmt;

use crate::handle::Handle;
use crate::source::Source;

/// A single item emitted through a source chain.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// The absent value
    #[default]
    Undef,
    /// A signed integer
    Int(i64),
    /// A floating point number
    Float(f64),
    /// A text string
    Str(String),
    /// A raw byte string
    Bytes(Vec<u8>),
    /// An ordered list of values
    List(Vec<Value>),
    /// A string-keyed mapping
    Map(BTreeMap<String, Value>),
    /// A nested source (consumed by `flat_map` and friends)
    Source(Source),
    /// A completion handle (consumed by `ordered_futures` and `switch_str`)
    Handle(Handle),
}

impl Value {
    /// Whether this is the absent value.
    pub fn is_undef(&self) -> bool {
        matches!(self, Value::Undef)
    }

    /// Short name of the value's shape, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undef => "undef",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Source(_) => "source",
            Value::Handle(_) => "handle",
        }
    }

    /// Coerce to text. `Undef` becomes the empty string, bytes decode
    /// lossily, collections render in a JSON-like shape.
    pub fn to_text(&self) -> String {
        self.to_string()
    }

    /// Coerce to raw bytes. Text becomes its UTF-8 bytes, everything else
    /// goes through the text coercion first.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Value::Bytes(b) => b.clone(),
            Value::Str(s) => s.clone().into_bytes(),
            other => other.to_text().into_bytes(),
        }
    }

    /// Numeric coercion. Strings parse as numbers when they can,
    /// everything non-numeric is zero.
    pub fn as_f64(&self) -> f64 {
        match self {
            Value::Int(i) => *i as f64,
            Value::Float(f) => *f,
            Value::Str(s) => s.trim().parse().unwrap_or(0.0),
            _ => 0.0,
        }
    }

    /// The string-equality key used by `distinct`, equality filters and
    /// `switch_str`. `Undef` has no key; callers track it separately.
    pub fn key(&self) -> Option<String> {
        match self {
            Value::Undef => None,
            other => Some(other.to_text()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undef => Ok(()),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{}", s),
            Value::Bytes(b) => write!(f, "{}", String::from_utf8_lossy(b)),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Map(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}:{}", k, v)?;
                }
                write!(f, "}}")
            }
            Value::Source(s) => write!(f, "source({})", s.label()),
            Value::Handle(h) => write!(f, "handle({})", h.label()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undef, Value::Undef) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                *a as f64 == *b
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Source(a), Value::Source(b)) => a.same_node(b),
            (Value::Handle(a), Value::Handle(b)) => a.same_handle(b),
            _ => false,
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Int(v as i64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(v: BTreeMap<String, Value>) -> Self {
        Value::Map(v)
    }
}

impl From<Source> for Value {
    fn from(v: Source) -> Self {
        Value::Source(v)
    }
}

impl From<Handle> for Value {
    fn from(v: Handle) -> Self {
        Value::Handle(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_coercion() {
        assert_eq!(Value::Undef.to_text(), "");
        assert_eq!(Value::Int(42).to_text(), "42");
        assert_eq!(Value::Float(2.5).to_text(), "2.5");
        assert_eq!(Value::Float(2.0).to_text(), "2");
        assert_eq!(Value::from("hi").to_text(), "hi");
        assert_eq!(
            Value::List(vec![1.into(), "a".into()]).to_text(),
            "[1,a]"
        );
    }

    #[test]
    fn numeric_coercion() {
        assert_eq!(Value::from("3.5").as_f64(), 3.5);
        assert_eq!(Value::from("nope").as_f64(), 0.0);
        assert_eq!(Value::Undef.as_f64(), 0.0);
    }

    #[test]
    fn keys_collide_across_shapes() {
        assert_eq!(Value::Int(2).key(), Value::from("2").key());
        assert_eq!(Value::Undef.key(), None);
        assert_ne!(Value::from("").key(), None);
    }
}
