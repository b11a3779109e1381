//! Parameter values supplied to named queries.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Named parameters for one query invocation.
///
/// An empty map behaves exactly like an absent one.
pub type Params = HashMap<String, SqlqValue>;

/// Dynamic value type for template parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlqValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<SqlqValue>),
}

impl SqlqValue {
    /// Parse a command-line style value: integers, floats, booleans,
    /// `null`, comma separated lists in brackets, anything else is text.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Some(inner) = trimmed.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            if inner.trim().is_empty() {
                return SqlqValue::Array(Vec::new());
            }
            return SqlqValue::Array(inner.split(',').map(SqlqValue::parse).collect());
        }
        if let Ok(n) = trimmed.parse::<i64>() {
            SqlqValue::Int(n)
        } else if let Ok(f) = trimmed.parse::<f64>() {
            SqlqValue::Float(f)
        } else if trimmed == "true" {
            SqlqValue::Bool(true)
        } else if trimmed == "false" {
            SqlqValue::Bool(false)
        } else if trimmed == "null" {
            SqlqValue::Null
        } else {
            SqlqValue::String(raw.to_string())
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlqValue::Null)
    }
}

/// The raw string form used for literal splices and cache keys.
///
/// Arrays render their elements joined by commas, with nulls inside an
/// array rendering as empty.
impl fmt::Display for SqlqValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlqValue::Null => write!(f, "null"),
            SqlqValue::Bool(b) => write!(f, "{}", b),
            SqlqValue::Int(n) => write!(f, "{}", n),
            SqlqValue::Float(v) => write!(f, "{}", v),
            SqlqValue::String(s) => write!(f, "{}", s),
            SqlqValue::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    if !item.is_null() {
                        write!(f, "{}", item)?;
                    }
                }
                Ok(())
            }
        }
    }
}

impl From<bool> for SqlqValue {
    fn from(v: bool) -> Self {
        SqlqValue::Bool(v)
    }
}

impl From<i32> for SqlqValue {
    fn from(v: i32) -> Self {
        SqlqValue::Int(v as i64)
    }
}

impl From<i64> for SqlqValue {
    fn from(v: i64) -> Self {
        SqlqValue::Int(v)
    }
}

impl From<f64> for SqlqValue {
    fn from(v: f64) -> Self {
        SqlqValue::Float(v)
    }
}

impl From<&str> for SqlqValue {
    fn from(v: &str) -> Self {
        SqlqValue::String(v.to_string())
    }
}

impl From<String> for SqlqValue {
    fn from(v: String) -> Self {
        SqlqValue::String(v)
    }
}

impl<T: Into<SqlqValue>> From<Vec<T>> for SqlqValue {
    fn from(v: Vec<T>) -> Self {
        SqlqValue::Array(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<SqlqValue>> From<Option<T>> for SqlqValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlqValue::Null)
    }
}
