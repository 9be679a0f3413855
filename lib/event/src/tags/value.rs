use std::fmt;

use serde::{Deserialize, Serialize};

/// Attribute value.
#[derive(Clone, Debug, Deserialize, Serialize, PartialOrd)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    I64(i64),
    F64(f64),
    String(String),
}

impl Eq for Value {}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::I64(a), Value::I64(b)) => a == b,
            // NaN equals NaN, so a tag set always equals itself
            (Value::F64(a), Value::F64(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            _ => false,
        }
    }
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => b.fmt(f),
            Value::I64(i) => i.fmt(f),
            Value::F64(v) => v.fmt(f),
            Value::String(s) => f.write_str(s),
        }
    }
}

macro_rules! impl_from_value {
    ($($t:ty => $variant:ident),+ $(,)?) => {
        $(
            impl From<$t> for Value {
                #[inline]
                fn from(v: $t) -> Self {
                    Value::$variant(v.into())
                }
            }
        )+
    };
}

impl_from_value!(
    bool => Bool,
    i64 => I64,
    i32 => I64,
    u32 => I64,
    f64 => F64,
    String => String,
    &str => String,
    &String => String,
);

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::I64(v as i64)
    }
}
