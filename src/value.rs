// src/value.rs - Controller value type
use crate::error::{GemError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Value read from or written to the programmable controller.
///
/// Controller registers surface as one of four shapes; conversions between
/// them are lenient so that a word register can feed a boolean alarm source.
///
/// # Examples
///
/// ```rust
/// use gemlink::Value;
///
/// assert_eq!(Value::Int(0).as_bool(), Some(false));
/// assert_eq!(Value::Bool(true).as_float(), Some(1.0));
/// assert_eq!(Value::Text("42".into()).as_int(), Some(42));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    /// Single bit (M/I/Q flags)
    Bool(bool),
    /// Integer register (word, dword)
    Int(i64),
    /// Real register
    Float(f64),
    /// Text result from command execution
    Text(String),
}

impl Value {
    /// Convert to boolean if possible
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(i) => Some(*i != 0),
            Value::Float(f) => Some(*f != 0.0 && !f.is_nan()),
            Value::Text(s) => match s.to_lowercase().as_str() {
                "true" | "on" | "1" => Some(true),
                "false" | "off" | "0" => Some(false),
                _ => None,
            },
        }
    }

    /// Convert to integer if possible
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Float(f) => {
                if f.is_finite() && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                    Some(*f as i64)
                } else {
                    None
                }
            }
            Value::Text(s) => s.trim().parse().ok(),
        }
    }

    /// Convert to float if possible
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Text(s) => s.trim().parse().ok(),
        }
    }

    /// Get the type name of this value
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
        }
    }

    /// Strict boolean conversion used by alarm sources.
    pub fn expect_bool(&self) -> Result<bool> {
        self.as_bool().ok_or(GemError::TypeMismatch {
            expected: "bool",
            actual: self.type_name(),
        })
    }

    /// Strict numeric conversion used by analog threshold checks.
    pub fn expect_float(&self) -> Result<f64> {
        self.as_float().ok_or(GemError::TypeMismatch {
            expected: "float",
            actual: self.type_name(),
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Int(0)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_conversions() {
        assert_eq!(Value::Bool(true).as_int(), Some(1));
        assert_eq!(Value::Bool(false).as_float(), Some(0.0));
        assert_eq!(Value::Int(7).as_bool(), Some(true));
        assert_eq!(Value::Float(f64::NAN).as_bool(), Some(false));
        assert_eq!(Value::Float(f64::INFINITY).as_int(), None);
        assert_eq!(Value::Text(" 3.5 ".into()).as_float(), Some(3.5));
        assert_eq!(Value::Text("maybe".into()).as_bool(), None);
    }

    #[test]
    fn test_strict_conversions_report_type() {
        let err = Value::Text("n/a".into()).expect_float().unwrap_err();
        assert!(matches!(err, GemError::TypeMismatch { expected: "float", actual: "text" }));
        assert!(Value::Int(1).expect_bool().unwrap());
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Float(1.5).to_string(), "1.5");
        assert_eq!(Value::from("PP-01").to_string(), "PP-01");
    }
}
