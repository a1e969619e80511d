use chrono::{Local, TimeZone};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Int,
    Float,
    #[serde(alias = "string")]
    Str,
    Bool,
    Select,
    Timestamp,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Int => "int",
            FieldType::Float => "float",
            FieldType::Str => "str",
            FieldType::Bool => "bool",
            FieldType::Select => "select",
            FieldType::Timestamp => "timestamp",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl FieldValue {
    pub fn from_json(value: &JsonValue) -> FieldValue {
        match value {
            JsonValue::Null => FieldValue::Null,
            JsonValue::Bool(b) => FieldValue::Bool(*b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    FieldValue::Int(i)
                } else {
                    FieldValue::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            JsonValue::String(s) => FieldValue::Str(s.clone()),
            // Arrays and objects never carry report data; keep a printable form.
            other => FieldValue::Str(other.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(s) => Some(s),
            _ => None,
        }
    }

    // The runtime type label used for fields added under the unmatched policy.
    pub fn runtime_type(&self) -> FieldType {
        match self {
            FieldValue::Bool(_) => FieldType::Bool,
            FieldValue::Int(_) => FieldType::Int,
            FieldValue::Float(_) => FieldType::Float,
            FieldValue::Str(_) | FieldValue::Null => FieldType::Str,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => write!(f, ""),
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::Int(i) => write!(f, "{}", i),
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Str(s) => write!(f, "{}", s),
        }
    }
}

/// Best-effort coercion of a raw value into its declared type. A value that
/// does not parse is logged and returned unchanged; the sync loop must not
/// die because a backend sent a near-miss type.
pub fn coerce(value: FieldValue, field_type: FieldType) -> FieldValue {
    if value.is_null() {
        return value;
    }
    match try_coerce(&value, field_type) {
        Some(coerced) => coerced,
        None => {
            warn!(
                declared = field_type.as_str(),
                value = %value,
                "value did not parse as its declared type, keeping original"
            );
            value
        }
    }
}

fn try_coerce(value: &FieldValue, field_type: FieldType) -> Option<FieldValue> {
    match field_type {
        FieldType::Int => match value {
            FieldValue::Int(_) => Some(value.clone()),
            FieldValue::Bool(b) => Some(FieldValue::Int(*b as i64)),
            FieldValue::Float(f) if f.is_finite() && f.fract() == 0.0 => {
                Some(FieldValue::Int(*f as i64))
            }
            FieldValue::Str(s) => s.trim().parse::<i64>().ok().map(FieldValue::Int),
            _ => None,
        },
        FieldType::Float => match value {
            FieldValue::Float(_) => Some(value.clone()),
            FieldValue::Int(i) => Some(FieldValue::Float(*i as f64)),
            FieldValue::Str(s) => s.trim().parse::<f64>().ok().map(FieldValue::Float),
            _ => None,
        },
        FieldType::Bool => match value {
            FieldValue::Bool(_) => Some(value.clone()),
            FieldValue::Int(0) => Some(FieldValue::Bool(false)),
            FieldValue::Int(1) => Some(FieldValue::Bool(true)),
            FieldValue::Str(s) if s.eq_ignore_ascii_case("true") => Some(FieldValue::Bool(true)),
            FieldValue::Str(s) if s.eq_ignore_ascii_case("false") => Some(FieldValue::Bool(false)),
            _ => None,
        },
        FieldType::Str => Some(FieldValue::Str(value.to_string())),
        FieldType::Select => Some(value.clone()),
        FieldType::Timestamp => epoch_seconds(value).map(format_timestamp),
    }
}

fn epoch_seconds(value: &FieldValue) -> Option<i64> {
    match value {
        FieldValue::Int(i) => Some(*i),
        FieldValue::Float(f) if f.is_finite() => Some(*f as i64),
        FieldValue::Str(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn format_timestamp(epoch: i64) -> FieldValue {
    match Local.timestamp_opt(epoch, 0).single() {
        Some(ts) => FieldValue::Str(ts.format("%a, %d %b %H:%M:%S").to_string()),
        None => FieldValue::Str(epoch.to_string()),
    }
}
