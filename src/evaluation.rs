use std::borrow::Cow;

use serde::Serialize;

use crate::{
    config::{ConfigRow, ConfigType, EvaluatedValue},
    config_store::ConfigSource,
    Str,
};

/// Result of evaluating a config for a context.
///
/// Besides the value, it carries the metadata telemetry needs to count and deduplicate
/// evaluations: which config version produced it and which row, conditional value, and weighted
/// variant were selected.
///
/// # Serialization
///
/// Confidential values are never serialized: `value` is omitted and `reportableValue` carries the
/// redacted form.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    #[allow(missing_docs)]
    pub config_key: Str,
    /// Id of the config version that was evaluated.
    pub config_id: i64,
    #[allow(missing_docs)]
    pub config_type: ConfigType,
    /// Functional value (decrypted if the config is encrypted).
    pub value: EvaluatedValue,
    /// Redacted form of the value for confidential configs.
    pub redacted: Option<String>,
    /// Index of the selected row in the config.
    pub row_index: usize,
    /// Index of the selected conditional value within the row.
    pub value_index: usize,
    /// Index of the selected variant if the value was weighted.
    pub weighted_value_index: Option<usize>,
    /// Which scope the selected row belongs to.
    pub row_match: RowMatch,
    /// Where the evaluated config came from.
    pub source: ConfigSource,
}

impl Evaluation {
    /// Representation of the value that is safe to log and report.
    pub fn reportable_value(&self) -> Cow<'_, str> {
        match &self.redacted {
            Some(redacted) => Cow::Borrowed(redacted),
            None => Cow::Owned(self.value.to_string()),
        }
    }

    /// Return `true` if the value must not be reported as is.
    pub fn is_confidential(&self) -> bool {
        self.redacted.is_some()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EvaluationWire<'a> {
    config_key: &'a str,
    config_id: i64,
    config_type: ConfigType,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<&'a EvaluatedValue>,
    reportable_value: Cow<'a, str>,
    row_index: usize,
    value_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    weighted_value_index: Option<usize>,
    row_match: &'a RowMatch,
    source: ConfigSource,
}

impl Serialize for Evaluation {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        EvaluationWire {
            config_key: self.config_key.as_str(),
            config_id: self.config_id,
            config_type: self.config_type,
            value: (!self.is_confidential()).then_some(&self.value),
            reportable_value: self.reportable_value(),
            row_index: self.row_index,
            value_index: self.value_index,
            weighted_value_index: self.weighted_value_index,
            row_match: &self.row_match,
            source: self.source,
        }
        .serialize(serializer)
    }
}

/// Scope of a config row: the environment-default row, or a row for an environment, optionally
/// narrowed to a namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowMatch {
    /// `None` for the environment-default row.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment_id: Option<i64>,
    #[allow(missing_docs)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<Str>,
}

impl RowMatch {
    /// Describe `row`.
    pub fn of(row: &ConfigRow) -> RowMatch {
        RowMatch {
            environment_id: if row.is_environment_default() {
                None
            } else {
                row.environment_id
            },
            namespace: row
                .namespace
                .clone()
                .filter(|namespace| !namespace.is_empty()),
        }
    }

    /// Return `true` for the environment-default row.
    pub fn is_environment_default(&self) -> bool {
        self.environment_id.is_none()
    }
}

impl std::fmt::Display for RowMatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.environment_id {
            Some(environment_id) => write!(f, "env:{environment_id}")?,
            None => f.write_str("default")?,
        }
        if let Some(namespace) = &self.namespace {
            write!(f, " namespace:{namespace}")?;
        }
        Ok(())
    }
}
