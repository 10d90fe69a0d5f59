use std::borrow::Cow;

use chrono::{DateTime, Utc};
use regex::Regex;
use semver::Version;

use crate::{
    config::{ConfigValue, Criterion, Operator, ValueKind},
    context::{parse_finite, ContextValue, PropertyLookup},
};

use super::{SegmentResolver, CURRENT_TIME_PROPERTY, NAMESPACE_PROPERTY};

/// Everything a criterion may look at besides its own definition.
pub(super) struct Scope<'a> {
    pub config_key: &'a str,
    pub context: &'a dyn PropertyLookup,
    pub namespace: &'a str,
    pub segments: &'a dyn SegmentResolver,
    pub now: DateTime<Utc>,
    pub depth: usize,
}

impl<'a> Scope<'a> {
    fn property(&self, name: &str) -> Option<Cow<'a, ContextValue>> {
        match name {
            NAMESPACE_PROPERTY => Some(Cow::Owned(ContextValue::String(
                self.namespace.to_owned(),
            ))),
            CURRENT_TIME_PROPERTY => Some(Cow::Owned(ContextValue::Int(
                self.now.timestamp_millis(),
            ))),
            _ => self.context.get(name).map(Cow::Borrowed),
        }
    }
}

impl Criterion {
    pub(super) fn eval(&self, scope: &Scope) -> bool {
        let property = scope.property(&self.property_name);
        self.operator
            .eval(property.as_deref(), self.value_to_match.as_ref(), scope)
    }
}

impl Operator {
    /// Applying `Operator` to the values. Returns `false` if the operator cannot be applied or
    /// there's a misconfiguration.
    fn eval(
        &self,
        property: Option<&ContextValue>,
        value_to_match: Option<&ConfigValue>,
        scope: &Scope,
    ) -> bool {
        self.try_eval(property, value_to_match, scope)
            .unwrap_or(false)
    }

    /// Try applying `Operator` to the values, returning `None` if the operator cannot be applied.
    fn try_eval(
        &self,
        property: Option<&ContextValue>,
        value_to_match: Option<&ConfigValue>,
        scope: &Scope,
    ) -> Option<bool> {
        match self {
            Self::AlwaysTrue => Some(true),

            Self::InSeg | Self::NotInSeg => {
                let segment_key = value_to_match?.as_str()?;
                let in_segment = scope
                    .segments
                    .in_segment(segment_key, scope.context, scope.depth + 1)
                    .unwrap_or_else(|| {
                        log::warn!(target: "prefab", config_key = scope.config_key, segment_key; "segment could not be evaluated, treating as not matching");
                        false
                    });
                Some(in_segment == (*self == Self::InSeg))
            }

            Self::PropIsOneOf | Self::PropIsNotOneOf => {
                let candidates = value_to_match?.as_string_list()?;
                let is_one_of = match property {
                    Some(ContextValue::StringList(values)) => {
                        values.iter().any(|v| candidates.contains(v))
                    }
                    Some(v) => {
                        let v = v.to_string();
                        candidates.iter().any(|c| *c == v)
                    }
                    None => candidates.iter().any(|c| c.is_empty()),
                };
                Some(is_one_of == (*self == Self::PropIsOneOf))
            }

            Self::PropEndsWithOneOf
            | Self::PropDoesNotEndWithOneOf
            | Self::PropStartsWithOneOf
            | Self::PropDoesNotStartWithOneOf
            | Self::PropContainsOneOf
            | Self::PropDoesNotContainOneOf => {
                let candidates = value_to_match?.as_string_list()?;
                let matched = property.is_some_and(|v| {
                    let v = v.to_string();
                    candidates.iter().any(|c| match self {
                        Self::PropEndsWithOneOf | Self::PropDoesNotEndWithOneOf => {
                            v.ends_with(c.as_str())
                        }
                        Self::PropStartsWithOneOf | Self::PropDoesNotStartWithOneOf => {
                            v.starts_with(c.as_str())
                        }
                        _ => v.contains(c.as_str()),
                    })
                });
                let negated = matches!(
                    self,
                    Self::PropDoesNotEndWithOneOf
                        | Self::PropDoesNotStartWithOneOf
                        | Self::PropDoesNotContainOneOf
                );
                Some(matched != negated)
            }

            Self::HierarchicalMatch => {
                let prefix = value_to_match?.as_str()?;
                let v = property?.as_str()?;
                Some(v.starts_with(prefix))
            }

            Self::InIntRange => {
                let ValueKind::IntRange(range) = &value_to_match?.kind else {
                    return None;
                };
                let v = match property? {
                    ContextValue::String(s) => match parse_finite(s) {
                        Some(n) => n,
                        None => parse_instant(s)? as f64,
                    },
                    v => v.as_f64()?,
                };
                Some(range.contains(v))
            }

            Self::PropLessThan
            | Self::PropLessThanOrEqual
            | Self::PropGreaterThan
            | Self::PropGreaterThanOrEqual => {
                let m = match &value_to_match?.kind {
                    ValueKind::Int(i) => *i as f64,
                    ValueKind::Double(d) => Some(*d).filter(|d| d.is_finite())?,
                    ValueKind::String(s) => parse_finite(s)?,
                    _ => return None,
                };
                let Some(v) = property.and_then(ContextValue::as_f64) else {
                    log::debug!(target: "prefab", config_key = scope.config_key, operator:? = self; "property is not a number");
                    return None;
                };
                Some(match self {
                    Self::PropLessThan => v < m,
                    Self::PropLessThanOrEqual => v <= m,
                    Self::PropGreaterThan => v > m,
                    _ => v >= m,
                })
            }

            Self::PropBefore | Self::PropAfter => {
                let m = match &value_to_match?.kind {
                    ValueKind::Int(i) => *i,
                    ValueKind::String(s) => parse_instant(s)?,
                    _ => return None,
                };
                let Some(v) = property.and_then(instant_millis) else {
                    log::debug!(target: "prefab", config_key = scope.config_key, operator:? = self; "property is not a date");
                    return None;
                };
                Some(if *self == Self::PropBefore {
                    v < m
                } else {
                    v > m
                })
            }

            Self::PropMatches | Self::PropDoesNotMatch => {
                let pattern = value_to_match?.as_str()?;
                let v = property?.to_string();
                let regex = match Regex::new(pattern) {
                    Ok(regex) => regex,
                    Err(err) => {
                        log::warn!(target: "prefab", config_key = scope.config_key, pattern, err:display = err; "malformed regex in criterion");
                        return None;
                    }
                };
                Some(regex.is_match(&v) == (*self == Self::PropMatches))
            }

            Self::PropSemverLessThan | Self::PropSemverEqual | Self::PropSemverGreaterThan => {
                let m = value_to_match?.as_str()?;
                let m = match Version::parse(m.trim()) {
                    Ok(version) => version,
                    Err(err) => {
                        log::warn!(target: "prefab", config_key = scope.config_key, version = m, err:display = err; "malformed semantic version in criterion");
                        return None;
                    }
                };
                let Some(v) = property
                    .and_then(ContextValue::as_str)
                    .and_then(|v| Version::parse(v.trim()).ok())
                else {
                    log::debug!(target: "prefab", config_key = scope.config_key, operator:? = self; "property is not a semantic version");
                    return None;
                };
                Some(
                    v.cmp_precedence(&m)
                        == match self {
                            Self::PropSemverLessThan => std::cmp::Ordering::Less,
                            Self::PropSemverEqual => std::cmp::Ordering::Equal,
                            _ => std::cmp::Ordering::Greater,
                        },
                )
            }

            Self::Unknown => {
                log::warn!(target: "prefab", config_key = scope.config_key; "unknown criterion operator, try upgrading the client");
                None
            }
        }
    }
}

/// Epoch milliseconds of a property holding a date.
fn instant_millis(value: &ContextValue) -> Option<i64> {
    match value {
        ContextValue::Int(i) => Some(*i),
        ContextValue::Double(d) => Some(*d as i64),
        ContextValue::String(s) => parse_instant(s),
        ContextValue::Bool(_) | ContextValue::StringList(_) => None,
    }
}

/// Parse epoch milliseconds or an RFC 3339 date.
fn parse_instant(s: &str) -> Option<i64> {
    let s = s.trim();
    if let Ok(millis) = s.parse::<i64>() {
        return Some(millis);
    }
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|date| date.timestamp_millis())
}
