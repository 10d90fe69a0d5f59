use chrono::{DateTime, Utc};

use crate::{
    config::{ConditionalValue, ConfigValue, RawConfig},
    context::PropertyLookup,
};

use super::{operators::Scope, SegmentResolver};

/// The conditional value selected for a context.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Match<'a> {
    /// Index of the row in [`RawConfig::rows`].
    pub row_index: usize,
    /// Index of the conditional value within the row.
    pub value_index: usize,
    #[allow(missing_docs)]
    pub value: &'a ConfigValue,
}

/// Evaluates one config's rows against a context.
///
/// `row_order` lists the indices of the rows that apply to the running process, most specific
/// first: rows of the current environment (deeper namespaces first), then the environment-default
/// row. The first conditional value whose criteria all match wins.
pub struct CriteriaEvaluator<'a> {
    config: &'a RawConfig,
    row_order: &'a [usize],
    namespace: &'a str,
    segments: &'a dyn SegmentResolver,
    now: DateTime<Utc>,
}

impl<'a> CriteriaEvaluator<'a> {
    #[allow(missing_docs)]
    pub fn new(
        config: &'a RawConfig,
        row_order: &'a [usize],
        namespace: &'a str,
        segments: &'a dyn SegmentResolver,
        now: DateTime<Utc>,
    ) -> CriteriaEvaluator<'a> {
        CriteriaEvaluator {
            config,
            row_order,
            namespace,
            segments,
            now,
        }
    }

    /// Return the first matching conditional value, or `None` if nothing matched.
    ///
    /// `depth` is the segment nesting depth (0 for a top-level evaluation).
    pub fn evaluate(&self, context: &dyn PropertyLookup, depth: usize) -> Option<Match<'a>> {
        let scope = Scope {
            config_key: self.config.key.as_str(),
            context,
            namespace: self.namespace,
            segments: self.segments,
            now: self.now,
            depth,
        };

        let config: &'a RawConfig = self.config;
        self.row_order.iter().find_map(|&row_index| {
            let row = config.rows.get(row_index)?;
            row.values
                .iter()
                .enumerate()
                .find(|(_, conditional_value)| conditional_value.matches(&scope))
                .map(|(value_index, conditional_value)| Match {
                    row_index,
                    value_index,
                    value: &conditional_value.value,
                })
        })
    }
}

impl ConditionalValue {
    /// All criteria must match. No criteria always matches.
    fn matches(&self, scope: &Scope) -> bool {
        self.criteria.iter().all(|criterion| criterion.eval(scope))
    }
}
