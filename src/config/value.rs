use std::sync::Arc;

use serde::{ser::SerializeStruct, Serialize};

use crate::Str;

use super::{IntRange, LogLevel, ValueType};

/// Concrete value a config evaluated to.
///
/// # Serialization
///
/// When serialized to JSON, serialized as a two-field object with `type` and `value`. Type is one
/// of [`ValueType`] names (e.g., `"STRING"`, `"INT"`, `"JSON"`).
///
/// Example:
/// ```json
/// {"type":"JSON","value":{"hello":"world"}}
/// ```
#[derive(Debug, Clone)]
pub enum EvaluatedValue {
    #[allow(missing_docs)]
    Int(i64),
    #[allow(missing_docs)]
    String(Str),
    #[allow(missing_docs)]
    Double(f64),
    #[allow(missing_docs)]
    Bool(bool),
    #[allow(missing_docs)]
    StringList(Vec<String>),
    #[allow(missing_docs)]
    IntRange(IntRange),
    #[allow(missing_docs)]
    Duration(chrono::Duration),
    /// Arbitrary JSON value.
    Json {
        /// Serialized form as received.
        raw: Str,
        #[allow(missing_docs)]
        parsed: Arc<serde_json::Value>,
    },
    #[allow(missing_docs)]
    LogLevel(LogLevel),
}

impl EvaluatedValue {
    /// Parse `raw` as JSON.
    pub fn from_json_str(raw: impl Into<Str>) -> Result<EvaluatedValue, serde_json::Error> {
        let raw = raw.into();
        let parsed = serde_json::from_str(&raw)?;
        Ok(EvaluatedValue::Json {
            raw,
            parsed: Arc::new(parsed),
        })
    }

    #[allow(missing_docs)]
    pub fn value_type(&self) -> ValueType {
        match self {
            EvaluatedValue::Int(_) => ValueType::Int,
            EvaluatedValue::String(_) => ValueType::String,
            EvaluatedValue::Double(_) => ValueType::Double,
            EvaluatedValue::Bool(_) => ValueType::Bool,
            EvaluatedValue::StringList(_) => ValueType::StringList,
            EvaluatedValue::IntRange(_) => ValueType::IntRange,
            EvaluatedValue::Duration(_) => ValueType::Duration,
            EvaluatedValue::Json { .. } => ValueType::Json,
            EvaluatedValue::LogLevel(_) => ValueType::LogLevel,
        }
    }

    /// Returns the value as a string if it is of type String.
    ///
    /// ```
    /// # use prefab_core::config::EvaluatedValue;
    /// let value = EvaluatedValue::String("example".into());
    /// assert_eq!(value.as_str(), Some("example"));
    /// ```
    pub fn as_str(&self) -> Option<&str> {
        match self {
            EvaluatedValue::String(s) => Some(s),
            _ => None,
        }
    }

    #[allow(missing_docs)]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            EvaluatedValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[allow(missing_docs)]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            EvaluatedValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[allow(missing_docs)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            EvaluatedValue::Double(d) => Some(*d),
            _ => None,
        }
    }

    #[allow(missing_docs)]
    pub fn as_string_list(&self) -> Option<&[String]> {
        match self {
            EvaluatedValue::StringList(list) => Some(list),
            _ => None,
        }
    }
}

impl std::fmt::Display for EvaluatedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvaluatedValue::Int(i) => write!(f, "{i}"),
            EvaluatedValue::String(s) => f.write_str(s),
            EvaluatedValue::Double(d) => write!(f, "{d}"),
            EvaluatedValue::Bool(b) => write!(f, "{b}"),
            EvaluatedValue::StringList(list) => write!(f, "[{}]", list.join(",")),
            EvaluatedValue::IntRange(IntRange { start, end }) => {
                let fmt_bound = |b: &Option<i64>| b.map(|b| b.to_string()).unwrap_or_default();
                write!(f, "[{}..{})", fmt_bound(start), fmt_bound(end))
            }
            EvaluatedValue::Duration(d) => write!(f, "{}ms", d.num_milliseconds()),
            EvaluatedValue::Json { raw, .. } => f.write_str(raw),
            EvaluatedValue::LogLevel(level) => write!(f, "{level:?}"),
        }
    }
}

impl Serialize for EvaluatedValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("EvaluatedValue", 2)?;
        state.serialize_field("type", &self.value_type())?;
        match self {
            EvaluatedValue::Int(i) => state.serialize_field("value", i)?,
            EvaluatedValue::String(s) => state.serialize_field("value", s)?,
            EvaluatedValue::Double(d) => state.serialize_field("value", d)?,
            EvaluatedValue::Bool(b) => state.serialize_field("value", b)?,
            EvaluatedValue::StringList(list) => state.serialize_field("value", list)?,
            EvaluatedValue::IntRange(range) => state.serialize_field("value", range)?,
            EvaluatedValue::Duration(d) => {
                state.serialize_field("value", &d.num_milliseconds())?
            }
            EvaluatedValue::Json { raw: _, parsed } => state.serialize_field("value", parsed)?,
            EvaluatedValue::LogLevel(level) => state.serialize_field("value", level)?,
        }
        state.end()
    }
}

impl PartialEq for EvaluatedValue {
    // Compare ignoring Json::raw.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (EvaluatedValue::Int(v1), EvaluatedValue::Int(v2)) => v1 == v2,
            (EvaluatedValue::String(v1), EvaluatedValue::String(v2)) => v1 == v2,
            (EvaluatedValue::Double(v1), EvaluatedValue::Double(v2)) => v1 == v2,
            (EvaluatedValue::Bool(v1), EvaluatedValue::Bool(v2)) => v1 == v2,
            (EvaluatedValue::StringList(v1), EvaluatedValue::StringList(v2)) => v1 == v2,
            (EvaluatedValue::IntRange(v1), EvaluatedValue::IntRange(v2)) => v1 == v2,
            (EvaluatedValue::Duration(v1), EvaluatedValue::Duration(v2)) => v1 == v2,
            (EvaluatedValue::Json { parsed: v1, .. }, EvaluatedValue::Json { parsed: v2, .. }) => {
                v1 == v2
            }
            (EvaluatedValue::LogLevel(v1), EvaluatedValue::LogLevel(v2)) => v1 == v2,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_json_value() {
        let value = EvaluatedValue::from_json_str(r#"{ "hello": "world" }"#).unwrap();
        assert_eq!(
            serde_json::to_string(&value).unwrap(),
            r#"{"type":"JSON","value":{"hello":"world"}}"#
        );
    }

    #[test]
    fn json_equality_ignores_formatting() {
        let a = EvaluatedValue::from_json_str(r#"{"a":1}"#).unwrap();
        let b = EvaluatedValue::from_json_str(r#"{ "a" : 1 }"#).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn serialize_duration_as_millis() {
        let value = EvaluatedValue::Duration(chrono::Duration::milliseconds(1500));
        assert_eq!(
            serde_json::to_string(&value).unwrap(),
            r#"{"type":"DURATION","value":1500}"#
        );
    }
}
