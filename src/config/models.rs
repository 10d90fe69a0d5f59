use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr, PickFirst};

use crate::Str;

/// A raw configuration definition as delivered by a source.
///
/// `id` grows monotonically with every update of any config, so it doubles as the highwater mark
/// for incremental fetches. Configs from local files use id `0`.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawConfig {
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub id: i64,
    pub key: Str,
    #[serde(default)]
    pub config_type: ConfigType,
    /// Declared type of the values. Used to coerce values that are provided from outside (e.g.,
    /// environment variables).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<ValueType>,
    #[serde(default)]
    pub rows: Vec<ConfigRow>,
}

impl RawConfig {
    /// Parse a single config from its JSON representation.
    pub fn from_json(json: &[u8]) -> Result<RawConfig, serde_json::Error> {
        serde_json::from_slice(json)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum ConfigType {
    #[default]
    Config,
    FeatureFlag,
    LogLevel,
    Segment,
}

/// A row of a config, scoped to an environment and/or a namespace.
///
/// A row without an environment (or with environment `0`) is the environment-default row.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigRow {
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    #[serde(rename = "projectEnvId", alias = "environmentId")]
    pub environment_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<Str>,
    #[serde(default)]
    pub values: Vec<ConditionalValue>,
}

impl ConfigRow {
    /// Return `true` if this row is the environment-default row.
    pub fn is_environment_default(&self) -> bool {
        matches!(self.environment_id, None | Some(0))
    }

    /// Namespace the row is scoped to. An empty namespace is the same as none.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace
            .as_ref()
            .map(|ns| ns.as_str())
            .filter(|ns| !ns.is_empty())
    }
}

/// `ConditionalValue` is a value that applies if all `criteria` match the context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionalValue {
    #[serde(default)]
    pub criteria: Vec<Criterion>,
    pub value: ConfigValue,
}

/// `Criterion` is a check that the context property `property_name` matches `value_to_match` under
/// the given `operator`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Criterion {
    #[serde(default)]
    pub property_name: String,
    pub operator: Operator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_to_match: Option<ConfigValue>,
}

/// Criterion operators.
///
/// Operators this library does not know about deserialize as [`Operator::Unknown`] and never
/// match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    /// Always matches.
    AlwaysTrue,
    /// Property (stringified) is one of the string list.
    PropIsOneOf,
    #[allow(missing_docs)]
    PropIsNotOneOf,
    /// Property ends with one of the string list.
    PropEndsWithOneOf,
    #[allow(missing_docs)]
    PropDoesNotEndWithOneOf,
    /// Property starts with one of the string list.
    PropStartsWithOneOf,
    #[allow(missing_docs)]
    PropDoesNotStartWithOneOf,
    /// Property contains one of the string list.
    PropContainsOneOf,
    #[allow(missing_docs)]
    PropDoesNotContainOneOf,
    /// Property starts with the string value (e.g., `"a.b.c"` matches `"a.b"`).
    HierarchicalMatch,
    /// Context is in the segment named by the string value.
    InSeg,
    #[allow(missing_docs)]
    NotInSeg,
    /// Property (number or date) is inside the int range.
    InIntRange,
    #[allow(missing_docs)]
    PropLessThan,
    #[allow(missing_docs)]
    PropLessThanOrEqual,
    #[allow(missing_docs)]
    PropGreaterThan,
    #[allow(missing_docs)]
    PropGreaterThanOrEqual,
    /// Property (epoch millis or RFC 3339 date) is before the value.
    PropBefore,
    /// Property (epoch millis or RFC 3339 date) is after the value.
    PropAfter,
    /// Property matches the regex.
    PropMatches,
    #[allow(missing_docs)]
    PropDoesNotMatch,
    #[allow(missing_docs)]
    PropSemverLessThan,
    #[allow(missing_docs)]
    PropSemverEqual,
    #[allow(missing_docs)]
    PropSemverGreaterThan,
    /// Operator not known to this version of the library.
    #[serde(other)]
    Unknown,
}

/// A configuration value: exactly one [`ValueKind`] plus reporting/decryption flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigValue {
    #[serde(flatten)]
    pub kind: ValueKind,
    /// Value must not be reported as is.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub confidential: bool,
    /// Key of the config holding the key to decrypt this value with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decrypt_with: Option<Str>,
}

impl ConfigValue {
    #[allow(missing_docs)]
    pub fn new(kind: ValueKind) -> ConfigValue {
        ConfigValue {
            kind,
            confidential: false,
            decrypt_with: None,
        }
    }

    #[allow(missing_docs)]
    pub fn confidential(mut self) -> ConfigValue {
        self.confidential = true;
        self
    }

    #[allow(missing_docs)]
    pub fn decrypt_with(mut self, key: impl Into<Str>) -> ConfigValue {
        self.decrypt_with = Some(key.into());
        self
    }

    /// Return the value as `&str` if it is a string.
    pub fn as_str(&self) -> Option<&str> {
        match &self.kind {
            ValueKind::String(s) => Some(s),
            _ => None,
        }
    }

    /// Return the string list if the value is one.
    pub fn as_string_list(&self) -> Option<&[String]> {
        match &self.kind {
            ValueKind::StringList(list) => Some(&list.values),
            _ => None,
        }
    }
}

impl From<ValueKind> for ConfigValue {
    fn from(kind: ValueKind) -> Self {
        ConfigValue::new(kind)
    }
}

macro_rules! config_value_from {
    ($($t:ty),*) => {
        $(impl From<$t> for ConfigValue {
            fn from(value: $t) -> Self {
                ConfigValue::new(ValueKind::from(value))
            }
        })*
    };
}

config_value_from!(i64, bool, f64, String, &str, Vec<String>, IntRange, WeightedValues, LogLevel);

/// The active case of a [`ConfigValue`].
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, derive_more::From)]
#[serde(rename_all = "camelCase")]
pub enum ValueKind {
    #[allow(missing_docs)]
    Int(#[serde_as(as = "PickFirst<(_, DisplayFromStr)>")] i64),
    #[allow(missing_docs)]
    String(String),
    #[allow(missing_docs)]
    Double(f64),
    #[allow(missing_docs)]
    Bool(bool),
    #[allow(missing_docs)]
    StringList(StringList),
    #[allow(missing_docs)]
    IntRange(IntRange),
    /// Variants to pick from by weight.
    WeightedValues(WeightedValues),
    #[allow(missing_docs)]
    Duration(Duration),
    /// JSON document, kept in its serialized form.
    Json(Json),
    /// Value provided by the running process (e.g., an environment variable).
    Provided(Provided),
    #[allow(missing_docs)]
    LogLevel(LogLevel),
}

impl From<&str> for ValueKind {
    fn from(value: &str) -> Self {
        ValueKind::String(value.to_owned())
    }
}

impl From<Vec<String>> for ValueKind {
    fn from(values: Vec<String>) -> Self {
        ValueKind::StringList(StringList { values })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct StringList {
    #[serde(default)]
    pub values: Vec<String>,
}

/// Integer range `[start, end)`. Absent bounds are unbounded.
#[serde_as]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntRange {
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub start: Option<i64>,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub end: Option<i64>,
}

impl IntRange {
    /// Return `true` if `v` is inside the range.
    pub fn contains(&self, v: f64) -> bool {
        let above_start = self.start.map_or(true, |start| v >= start as f64);
        let below_end = self.end.map_or(true, |end| v < end as f64);
        above_start && below_end
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct WeightedValues {
    pub weighted_values: Vec<WeightedValue>,
    /// Context property to hash for a stable pick. Defaults to
    /// [`WeightedValues::DEFAULT_HASH_BY_PROPERTY_NAME`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_by_property_name: Option<String>,
}

impl WeightedValues {
    /// Property hashed when `hash_by_property_name` is not set.
    pub const DEFAULT_HASH_BY_PROPERTY_NAME: &'static str = "user.key";

    #[allow(missing_docs)]
    pub fn hash_by_property_name(&self) -> &str {
        self.hash_by_property_name
            .as_deref()
            .unwrap_or(Self::DEFAULT_HASH_BY_PROPERTY_NAME)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct WeightedValue {
    pub weight: u32,
    pub value: ConfigValue,
}

/// ISO-8601 duration with its precomputed length in milliseconds.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct Duration {
    #[serde(default)]
    pub definition: String,
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub millis: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct Json {
    pub json: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct Provided {
    pub source: ProvidedSource,
    /// Name to look up in the source, e.g. the environment variable name.
    pub lookup: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum ProvidedSource {
    EnvVar,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

/// Type of an evaluated value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum ValueType {
    Int,
    String,
    Double,
    Bool,
    StringList,
    IntRange,
    Duration,
    Json,
    LogLevel,
}

/// A bulk payload of configs.
///
/// Each config is wrapped in `TryParse` so that if one config fails to parse (e.g., a new server
/// format), the rest are still usable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct Configs {
    #[serde(default)]
    pub configs: Vec<TryParse<RawConfig>>,
}

impl Configs {
    /// Parse a bulk payload. Fails only if the payload as a whole is not valid JSON of the
    /// expected shape; individual malformed configs become [`TryParse::ParseFailed`].
    pub fn from_json(json: &[u8]) -> crate::Result<Configs> {
        serde_json::from_slice(json).map_err(|err| crate::Error::ConfigurationParse(err.to_string()))
    }

    /// Number of configs that failed to parse.
    pub fn failed_count(&self) -> usize {
        self.configs
            .iter()
            .filter(|config| matches!(config, TryParse::ParseFailed(_)))
            .count()
    }
}

/// `TryParse` allows the subfield to fail parsing without failing the parsing of the whole
/// structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TryParse<T> {
    /// Successfully parsed.
    Parsed(T),
    /// Parsing failed.
    ParseFailed(serde_json::Value),
}

impl<T> From<TryParse<T>> for Option<T> {
    fn from(value: TryParse<T>) -> Self {
        match value {
            TryParse::Parsed(v) => Some(v),
            TryParse::ParseFailed(_) => None,
        }
    }
}
