//! Reduction of a matched [`ConfigValue`] to a concrete [`EvaluatedValue`].
//!
//! Weighted values are resolved to one of their variants, provided values are read from the
//! process environment, and encrypted values are decrypted. Values flagged confidential (or
//! encrypted) carry a redacted representation for reporting.
use crate::{
    config::{
        ConfigValue, EvaluatedValue, Provided, ProvidedSource, RawConfig, ValueKind, ValueType,
        WeightedValues,
    },
    context::{ContextValue, PropertyLookup},
    encryption,
    error::EvaluationError,
    weighted::WeightedValueResolver,
    Str,
};

/// Prefix of redacted values.
pub const CONFIDENTIAL_PREFIX: &str = "*****";

/// Resolves the key config named by `decrypt_with` to the key itself.
pub trait DecryptionKeyResolver {
    /// Return the resolved string value of config `key`, or `None` if it does not resolve to a
    /// string.
    fn decryption_key(&self, key: &str, context: &dyn PropertyLookup) -> Option<String>;
}

/// Resolver for configs that never need decryption.
pub struct NoDecryptionKeys;

impl DecryptionKeyResolver for NoDecryptionKeys {
    fn decryption_key(&self, _: &str, _: &dyn PropertyLookup) -> Option<String> {
        None
    }
}

/// A fully reduced value.
#[derive(Debug, Clone, PartialEq)]
pub struct Unwrapped {
    #[allow(missing_docs)]
    pub value: EvaluatedValue,
    /// Index of the selected variant if the value was weighted.
    pub weighted_value_index: Option<usize>,
    /// Replacement for `value` in logs and telemetry, if the value must not be reported.
    pub redacted: Option<String>,
}

/// Reduces the values of one config.
pub struct ValueUnwrapper<'a> {
    config: &'a RawConfig,
    keys: &'a dyn DecryptionKeyResolver,
}

impl<'a> ValueUnwrapper<'a> {
    #[allow(missing_docs)]
    pub fn new(config: &'a RawConfig, keys: &'a dyn DecryptionKeyResolver) -> ValueUnwrapper<'a> {
        ValueUnwrapper { config, keys }
    }

    /// Reduce `value` for `context`.
    ///
    /// Returns an error only for values that cannot be produced at all: weighted values without
    /// variants, invalid JSON, or encrypted values that cannot be decrypted.
    pub fn unwrap(
        &self,
        value: &ConfigValue,
        context: &dyn PropertyLookup,
    ) -> Result<Unwrapped, EvaluationError> {
        let mut current = value;
        let mut weighted_value_index = None;
        let mut confidential = false;
        let mut decrypt_with = None;

        let value = loop {
            confidential |= current.confidential;
            decrypt_with = decrypt_with.or(current.decrypt_with.as_ref());

            match &current.kind {
                ValueKind::WeightedValues(weighted) => {
                    let index = self.select_variant(weighted, context)?;
                    // Nested weighted values report the outermost pick.
                    weighted_value_index.get_or_insert(index);
                    current = &weighted.weighted_values[index].value;
                }
                kind => break self.scalar(kind)?,
            }
        };

        if !confidential && decrypt_with.is_none() {
            return Ok(Unwrapped {
                value,
                weighted_value_index,
                redacted: None,
            });
        }

        let redacted = Some(redact(&value.to_string()));
        let value = match decrypt_with {
            Some(key_config) => self.decrypt(key_config.as_str(), &value, context)?,
            None => value,
        };

        Ok(Unwrapped {
            value,
            weighted_value_index,
            redacted,
        })
    }

    fn select_variant(
        &self,
        weighted: &WeightedValues,
        context: &dyn PropertyLookup,
    ) -> Result<usize, EvaluationError> {
        let lookup_key = context
            .get(weighted.hash_by_property_name())
            .map(lookup_key);
        let weights = weighted
            .weighted_values
            .iter()
            .map(|v| v.weight)
            .collect::<Vec<_>>();

        WeightedValueResolver::new(self.config.key.as_str(), &weights)
            .resolve(lookup_key.as_deref())
            .ok_or_else(|| {
                log::warn!(target: "prefab", config_key:display = self.config.key; "weighted value has no variants");
                EvaluationError::UnexpectedConfigurationError
            })
    }

    fn scalar(&self, kind: &ValueKind) -> Result<EvaluatedValue, EvaluationError> {
        Ok(match kind {
            ValueKind::Int(i) => EvaluatedValue::Int(*i),
            ValueKind::String(s) => EvaluatedValue::String(Str::from(s.clone())),
            ValueKind::Double(d) => EvaluatedValue::Double(*d),
            ValueKind::Bool(b) => EvaluatedValue::Bool(*b),
            ValueKind::StringList(list) => EvaluatedValue::StringList(list.values.clone()),
            ValueKind::IntRange(range) => EvaluatedValue::IntRange(*range),
            ValueKind::Duration(duration) => {
                EvaluatedValue::Duration(chrono::Duration::milliseconds(duration.millis))
            }
            ValueKind::Json(json) => {
                EvaluatedValue::from_json_str(json.json.clone()).map_err(|err| {
                    log::warn!(target: "prefab", config_key:display = self.config.key, err:display = err; "config holds invalid JSON");
                    EvaluationError::UnexpectedConfigurationError
                })?
            }
            ValueKind::LogLevel(level) => EvaluatedValue::LogLevel(*level),
            ValueKind::Provided(provided) => self.provided(provided),
            ValueKind::WeightedValues(_) => {
                return Err(EvaluationError::UnexpectedConfigurationError)
            }
        })
    }

    fn provided(&self, provided: &Provided) -> EvaluatedValue {
        match provided.source {
            ProvidedSource::EnvVar => match std::env::var(&provided.lookup) {
                Ok(raw) => coerce_provided(&raw, self.config.value_type),
                Err(_) => {
                    log::warn!(target: "prefab", config_key:display = self.config.key, env_var = provided.lookup.as_str(); "environment variable is not set");
                    EvaluatedValue::String(Str::empty())
                }
            },
            ProvidedSource::Unknown => {
                log::warn!(target: "prefab", config_key:display = self.config.key; "unknown provided value source");
                EvaluatedValue::String(Str::empty())
            }
        }
    }

    fn decrypt(
        &self,
        key_config: &str,
        value: &EvaluatedValue,
        context: &dyn PropertyLookup,
    ) -> Result<EvaluatedValue, EvaluationError> {
        let Some(key) = self.keys.decryption_key(key_config, context) else {
            log::warn!(target: "prefab", config_key:display = self.config.key, key_config; "decryption key not found");
            return Err(EvaluationError::DecryptionKeyMissing);
        };
        let Some(encrypted) = value.as_str() else {
            log::warn!(target: "prefab", config_key:display = self.config.key; "encrypted value is not a string");
            return Err(EvaluationError::UnexpectedConfigurationError);
        };

        let plaintext = encryption::decrypt(&key, encrypted).map_err(|err| {
            log::warn!(target: "prefab", config_key:display = self.config.key, key_config, err:display = err; "failed to decrypt value");
            EvaluationError::DecryptionFailed
        })?;
        Ok(EvaluatedValue::String(Str::from(plaintext)))
    }
}

/// Redacted form of `raw`: the marker followed by a short fingerprint, so that changes of a
/// secret are still visible in telemetry.
pub fn redact(raw: &str) -> String {
    let digest = format!("{:x}", md5::compute(raw.as_bytes()));
    format!("{CONFIDENTIAL_PREFIX}{}", &digest[..5])
}

/// Parse a provided value as a YAML scalar or sequence, honoring the declared type.
fn coerce_provided(raw: &str, value_type: Option<ValueType>) -> EvaluatedValue {
    use serde_yaml::Value;

    let yaml = serde_yaml::from_str::<Value>(raw).ok();
    let coerced = match (value_type, &yaml) {
        (Some(ValueType::String), _) => None,
        (Some(ValueType::Int) | None, Some(Value::Number(n))) if n.is_i64() => {
            n.as_i64().map(EvaluatedValue::Int)
        }
        (Some(ValueType::Double) | None, Some(Value::Number(n))) => {
            n.as_f64().map(EvaluatedValue::Double)
        }
        (Some(ValueType::Bool) | None, Some(Value::Bool(b))) => Some(EvaluatedValue::Bool(*b)),
        (Some(ValueType::StringList) | None, Some(Value::Sequence(items))) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                Value::Bool(b) => Some(b.to_string()),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()
            .map(EvaluatedValue::StringList),
        (Some(ValueType::Json), _) => EvaluatedValue::from_json_str(raw.to_owned()).ok(),
        _ => None,
    };

    coerced.unwrap_or_else(|| {
        if value_type.is_some_and(|t| t != ValueType::String) {
            log::warn!(target: "prefab", value_type:? = value_type; "provided value does not match the declared type, using it as a string");
        }
        EvaluatedValue::String(Str::from(raw.to_owned()))
    })
}

/// Hashing input for a weighted value. Doubles keep their fractional part (`1.0`, not `1`) so
/// that clients in other languages bucket the same property value the same way.
fn lookup_key(value: &ContextValue) -> String {
    match value {
        ContextValue::Double(d) if d.is_finite() && d.fract() == 0.0 => format!("{d:.1}"),
        value => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::{
        config::{ConfigType, IntRange, LogLevel, WeightedValue},
        context::NamedContext,
        encryption, Context,
    };

    fn config(value_type: Option<ValueType>) -> RawConfig {
        RawConfig {
            id: 1,
            key: "test-config".into(),
            config_type: ConfigType::Config,
            value_type,
            rows: vec![],
        }
    }

    fn unwrap(value: impl Into<ConfigValue>) -> Result<Unwrapped, EvaluationError> {
        let config = config(None);
        ValueUnwrapper::new(&config, &NoDecryptionKeys).unwrap(&value.into(), &Context::new())
    }

    #[test]
    fn scalars_are_returned_as_is() {
        assert_eq!(unwrap(42i64).unwrap().value, EvaluatedValue::Int(42));
        assert_eq!(unwrap("s").unwrap().value, EvaluatedValue::String("s".into()));
        assert_eq!(unwrap(1.5f64).unwrap().value, EvaluatedValue::Double(1.5));
        assert_eq!(unwrap(true).unwrap().value, EvaluatedValue::Bool(true));
        assert_eq!(
            unwrap(vec!["a".to_owned(), "b".to_owned()]).unwrap().value,
            EvaluatedValue::StringList(vec!["a".to_owned(), "b".to_owned()])
        );
        let range = IntRange {
            start: Some(1),
            end: None,
        };
        assert_eq!(unwrap(range).unwrap().value, EvaluatedValue::IntRange(range));
        assert_eq!(
            unwrap(LogLevel::Warn).unwrap().value,
            EvaluatedValue::LogLevel(LogLevel::Warn)
        );

        let unwrapped = unwrap("plain").unwrap();
        assert_eq!(unwrapped.weighted_value_index, None);
        assert_eq!(unwrapped.redacted, None);
    }

    #[test]
    fn durations_and_json() {
        let duration = ValueKind::Duration(crate::config::Duration {
            definition: "PT1.5S".to_owned(),
            millis: 1500,
        });
        assert_eq!(
            unwrap(duration).unwrap().value,
            EvaluatedValue::Duration(chrono::Duration::milliseconds(1500))
        );

        let json = ValueKind::Json(crate::config::Json {
            json: r#"{"a": [1, 2]}"#.to_owned(),
        });
        assert_eq!(
            unwrap(json).unwrap().value,
            EvaluatedValue::from_json_str(r#"{"a":[1,2]}"#).unwrap()
        );

        let invalid = ValueKind::Json(crate::config::Json {
            json: "{".to_owned(),
        });
        assert_eq!(
            unwrap(invalid),
            Err(EvaluationError::UnexpectedConfigurationError)
        );
    }

    fn weighted(weights: &[(u32, &str)], hash_by: Option<&str>) -> WeightedValues {
        WeightedValues {
            weighted_values: weights
                .iter()
                .map(|(weight, value)| WeightedValue {
                    weight: *weight,
                    value: (*value).into(),
                })
                .collect(),
            hash_by_property_name: hash_by.map(str::to_owned),
        }
    }

    #[test]
    fn weighted_values_are_stable_per_key() {
        let config = config(None);
        let unwrapper = ValueUnwrapper::new(&config, &NoDecryptionKeys);
        let value = ConfigValue::from(weighted(&[(50, "a"), (50, "b")], None));

        for i in 0..50 {
            let context = Context::new()
                .with_named(NamedContext::new("user").with("key", format!("user-{i}")));
            let first = unwrapper.unwrap(&value, &context).unwrap();
            assert!(first.weighted_value_index.is_some());
            for _ in 0..5 {
                assert_eq!(unwrapper.unwrap(&value, &context).unwrap(), first);
            }
        }
    }

    #[test]
    fn weighted_values_hash_configured_property() {
        let config = config(None);
        let unwrapper = ValueUnwrapper::new(&config, &NoDecryptionKeys);
        let value = ConfigValue::from(weighted(&[(0, "a"), (1, "b")], Some("team.id")));
        let context = Context::new().with_named(NamedContext::new("team").with("id", 7i64));

        let unwrapped = unwrapper.unwrap(&value, &context).unwrap();
        assert_eq!(unwrapped.value, EvaluatedValue::String("b".into()));
        assert_eq!(unwrapped.weighted_value_index, Some(1));
    }

    #[test]
    fn weighted_lookup_key_keeps_double_fraction() {
        assert_eq!(lookup_key(&ContextValue::Double(2.0)), "2.0");
        assert_eq!(lookup_key(&ContextValue::Double(2.5)), "2.5");
        assert_eq!(lookup_key(&ContextValue::Int(2)), "2");

        let config = config(None);
        let unwrapper = ValueUnwrapper::new(&config, &NoDecryptionKeys);
        let value = ConfigValue::from(weighted(&[(1, "a"), (1, "b"), (1, "c")], Some("team.score")));
        let as_double = Context::new().with_named(NamedContext::new("team").with("score", 2.0f64));
        let as_string = Context::new().with_named(NamedContext::new("team").with("score", "2.0"));
        assert_eq!(
            unwrapper.unwrap(&value, &as_double).unwrap().weighted_value_index,
            unwrapper.unwrap(&value, &as_string).unwrap().weighted_value_index
        );
    }

    #[test]
    fn weighted_without_variants_is_an_error() {
        assert_eq!(
            unwrap(weighted(&[], None)),
            Err(EvaluationError::UnexpectedConfigurationError)
        );
    }

    fn provided(lookup: &str) -> ValueKind {
        ValueKind::Provided(Provided {
            source: ProvidedSource::EnvVar,
            lookup: lookup.to_owned(),
        })
    }

    fn unwrap_provided(lookup: &str, value_type: Option<ValueType>) -> EvaluatedValue {
        let config = config(value_type);
        ValueUnwrapper::new(&config, &NoDecryptionKeys)
            .unwrap(&provided(lookup).into(), &Context::new())
            .unwrap()
            .value
    }

    #[test]
    fn provided_from_env_var() {
        std::env::set_var("PREFAB_CORE_TEST_PROVIDED_INT", "42");
        std::env::set_var("PREFAB_CORE_TEST_PROVIDED_BOOL", "true");
        std::env::set_var("PREFAB_CORE_TEST_PROVIDED_LIST", "[a, b, 3]");
        std::env::set_var("PREFAB_CORE_TEST_PROVIDED_STRING", "hello world");

        assert_eq!(
            unwrap_provided("PREFAB_CORE_TEST_PROVIDED_INT", None),
            EvaluatedValue::Int(42)
        );
        assert_eq!(
            unwrap_provided("PREFAB_CORE_TEST_PROVIDED_INT", Some(ValueType::Double)),
            EvaluatedValue::Double(42.0)
        );
        assert_eq!(
            unwrap_provided("PREFAB_CORE_TEST_PROVIDED_INT", Some(ValueType::String)),
            EvaluatedValue::String("42".into())
        );
        assert_eq!(
            unwrap_provided("PREFAB_CORE_TEST_PROVIDED_BOOL", None),
            EvaluatedValue::Bool(true)
        );
        assert_eq!(
            unwrap_provided("PREFAB_CORE_TEST_PROVIDED_LIST", None),
            EvaluatedValue::StringList(vec!["a".into(), "b".into(), "3".into()])
        );
        assert_eq!(
            unwrap_provided("PREFAB_CORE_TEST_PROVIDED_STRING", None),
            EvaluatedValue::String("hello world".into())
        );
    }

    #[test]
    fn missing_env_var_is_empty_string() {
        assert_eq!(
            unwrap_provided("PREFAB_CORE_TEST_PROVIDED_NOT_SET", Some(ValueType::Int)),
            EvaluatedValue::String("".into())
        );
    }

    #[test]
    fn confidential_values_are_redacted_but_returned() {
        let value = ConfigValue::from("my-password").confidential();
        let config = config(None);
        let unwrapped = ValueUnwrapper::new(&config, &NoDecryptionKeys)
            .unwrap(&value, &Context::new())
            .unwrap();

        assert_eq!(unwrapped.value, EvaluatedValue::String("my-password".into()));
        let redacted = unwrapped.redacted.unwrap();
        assert!(redacted.starts_with(CONFIDENTIAL_PREFIX));
        assert_eq!(redacted.len(), CONFIDENTIAL_PREFIX.len() + 5);
        assert!(!redacted.contains("my-password"));
        assert_eq!(redacted, redact("my-password"));
        assert_ne!(redacted, redact("other-password"));
    }

    struct Keys(HashMap<&'static str, String>);

    impl DecryptionKeyResolver for Keys {
        fn decryption_key(&self, key: &str, _: &dyn PropertyLookup) -> Option<String> {
            self.0.get(key).cloned()
        }
    }

    #[test]
    fn decrypts_with_key_config() {
        let key = encryption::generate_key();
        let encrypted = encryption::encrypt(&key, "the secret").unwrap();
        let value = ConfigValue::from(encrypted.as_str()).decrypt_with("secret.key");
        let config = config(None);

        let keys = Keys([("secret.key", key)].into());
        let unwrapped = ValueUnwrapper::new(&config, &keys)
            .unwrap(&value, &Context::new())
            .unwrap();
        assert_eq!(unwrapped.value, EvaluatedValue::String("the secret".into()));
        // Reported form is derived from the ciphertext, never the plaintext.
        assert_eq!(unwrapped.redacted, Some(redact(&encrypted)));

        let no_keys = Keys(HashMap::new());
        assert_eq!(
            ValueUnwrapper::new(&config, &no_keys).unwrap(&value, &Context::new()),
            Err(EvaluationError::DecryptionKeyMissing)
        );

        let wrong_key = Keys([("secret.key", encryption::generate_key())].into());
        assert_eq!(
            ValueUnwrapper::new(&config, &wrong_key).unwrap(&value, &Context::new()),
            Err(EvaluationError::DecryptionFailed)
        );
    }
}
