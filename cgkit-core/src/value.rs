//! Typed controller parameter values

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Error, Result};

/// Tag of a [`Value`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    /// Raw text
    String,
    /// Signed 64-bit integer
    Int64,
    /// Unsigned 64-bit integer
    UInt64,
    /// Boolean
    Bool,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Int64 => "int64",
            Self::UInt64 => "uint64",
            Self::Bool => "bool",
        };
        f.write_str(name)
    }
}

/// Value of one controller parameter
///
/// The tag is part of the value: reading it back through an accessor of
/// another kind is a [`Error::TypeMismatch`], never a coercion.
///
/// ```
/// use cgkit_core::{Value, ValueKind};
///
/// let shares = Value::UInt64(512);
/// assert_eq!(shares.kind(), ValueKind::UInt64);
/// assert_eq!(shares.to_kernel_string(), "512");
///
/// let parsed = Value::parse_kernel(ValueKind::UInt64, "cpu.shares", "512\n").unwrap();
/// assert_eq!(parsed, shares);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    /// Raw text
    String(String),
    /// Signed 64-bit integer
    Int64(i64),
    /// Unsigned 64-bit integer
    UInt64(u64),
    /// Boolean
    Bool(bool),
}

impl Value {
    /// Get the tag of this value
    #[must_use]
    pub const fn kind(&self) -> ValueKind {
        match self {
            Self::String(_) => ValueKind::String,
            Self::Int64(_) => ValueKind::Int64,
            Self::UInt64(_) => ValueKind::UInt64,
            Self::Bool(_) => ValueKind::Bool,
        }
    }

    /// Format the value the way the kernel expects it in a parameter file
    #[must_use]
    pub fn to_kernel_string(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            Self::Int64(v) => v.to_string(),
            Self::UInt64(v) => v.to_string(),
            Self::Bool(true) => "1".to_string(),
            Self::Bool(false) => "0".to_string(),
        }
    }

    /// Parse the contents of a parameter file as a value of `kind`
    ///
    /// `name` is only used for error reporting.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if the text is not a valid `kind`
    pub fn parse_kernel(kind: ValueKind, name: &str, text: &str) -> Result<Self> {
        let text = text.trim_end_matches('\n');
        let invalid = || Error::InvalidArgument {
            message: format!("{name}: {text:?} is not a valid {kind}"),
        };

        match kind {
            ValueKind::String => Ok(Self::String(text.to_string())),
            ValueKind::Int64 => text.trim().parse().map(Self::Int64).map_err(|_| invalid()),
            ValueKind::UInt64 => text.trim().parse().map(Self::UInt64).map_err(|_| invalid()),
            ValueKind::Bool => match text.trim() {
                "1" | "true" | "y" | "Y" => Ok(Self::Bool(true)),
                "0" | "false" | "n" | "N" => Ok(Self::Bool(false)),
                _ => Err(invalid()),
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_kernel_string())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::UInt64(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_format() {
        assert_eq!(Value::Int64(-1).to_kernel_string(), "-1");
        assert_eq!(Value::UInt64(u64::MAX).to_kernel_string(), "18446744073709551615");
        assert_eq!(Value::Bool(true).to_kernel_string(), "1");
        assert_eq!(Value::Bool(false).to_kernel_string(), "0");
        assert_eq!(Value::from("0-3").to_kernel_string(), "0-3");
    }

    #[test]
    fn test_parse_bool_tokens() {
        for token in ["1", "true", "y"] {
            assert_eq!(
                Value::parse_kernel(ValueKind::Bool, "notify_on_release", token).unwrap(),
                Value::Bool(true)
            );
        }
        assert_eq!(
            Value::parse_kernel(ValueKind::Bool, "notify_on_release", "0\n").unwrap(),
            Value::Bool(false)
        );
        assert!(Value::parse_kernel(ValueKind::Bool, "notify_on_release", "2").is_err());
    }

    #[test]
    fn test_parse_rejects_wrong_sign() {
        assert!(Value::parse_kernel(ValueKind::UInt64, "cpu.shares", "-1").is_err());
        assert_eq!(
            Value::parse_kernel(ValueKind::Int64, "cpu.cfs_quota_us", "-1\n").unwrap(),
            Value::Int64(-1)
        );
    }

    #[test]
    fn test_string_keeps_inner_whitespace() {
        let value = Value::parse_kernel(ValueKind::String, "devices.list", "a *:* rwm\n").unwrap();
        assert_eq!(value, Value::String("a *:* rwm".to_string()));
    }

    #[test]
    fn test_value_serde() {
        let value = Value::UInt64(1024);
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, r#"{"type":"uint64","value":1024}"#);
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }
}
