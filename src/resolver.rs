//! Projection of the [`ConfigStore`] onto the running process, and point lookups.
//!
//! A [`Resolver`] keeps an immutable [`Snapshot`] holding, per config key, the rows that apply to
//! the process's environment and namespace. [`Resolver::rebuild()`] builds a new snapshot from the
//! store and swaps it in atomically; lookups load the current snapshot once and evaluate against it,
//! including any segments or decryption keys they reference.
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};

use crate::{
    config::{ConfigRow, RawConfig, ValueType},
    config_store::{ConfigSource, ConfigStore, StoredConfig},
    context::PropertyLookup,
    error::{EvaluationError, EvaluationFailure},
    eval::{CriteriaEvaluator, SegmentResolver},
    unwrap::{DecryptionKeyResolver, ValueUnwrapper},
    Context, Error, Evaluation, Result, Str,
};

pub use crate::evaluation::RowMatch;

/// Configuration for [`Resolver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverConfig {
    /// Environment the process runs in.
    ///
    /// Defaults to [`ResolverConfig::DEFAULT_ENVIRONMENT_ID`].
    pub environment_id: i64,
    /// Dot-delimited namespace of the process (e.g., `"corp.proj.api"`). Rows scoped to a prefix of
    /// it apply, deeper prefixes taking precedence.
    pub namespace: Option<String>,
    /// Maximum nesting of segment references (and decryption key lookups). Deeper references are
    /// treated as not matching.
    ///
    /// Defaults to [`ResolverConfig::DEFAULT_MAX_SEGMENT_DEPTH`].
    pub max_segment_depth: usize,
}

impl ResolverConfig {
    /// Default value for [`ResolverConfig::environment_id`]: only environment-default rows apply.
    pub const DEFAULT_ENVIRONMENT_ID: i64 = 0;
    /// Default value for [`ResolverConfig::max_segment_depth`].
    pub const DEFAULT_MAX_SEGMENT_DEPTH: usize = 20;

    /// Environment variable overriding [`ResolverConfig::environment_id`].
    pub const ENVIRONMENT_ID_ENV_VAR: &'static str = "PREFAB_ENVIRONMENT_ID";
    /// Environment variable overriding [`ResolverConfig::namespace`].
    pub const NAMESPACE_ENV_VAR: &'static str = "PREFAB_NAMESPACE";

    /// Create a new `ResolverConfig` using default configuration.
    pub fn new() -> ResolverConfig {
        ResolverConfig::default()
    }

    /// Create a `ResolverConfig` from defaults overridden by `PREFAB_ENVIRONMENT_ID` and
    /// `PREFAB_NAMESPACE`.
    pub fn from_env() -> Result<ResolverConfig> {
        ResolverConfig::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<ResolverConfig> {
        let mut config = ResolverConfig::new();
        if let Some(environment_id) = lookup(Self::ENVIRONMENT_ID_ENV_VAR) {
            config.environment_id = environment_id.trim().parse().map_err(|_| {
                Error::InvalidConfig(format!(
                    "{} must be an integer, got {environment_id:?}",
                    Self::ENVIRONMENT_ID_ENV_VAR
                ))
            })?;
        }
        if let Some(namespace) = lookup(Self::NAMESPACE_ENV_VAR).filter(|ns| !ns.is_empty()) {
            config.namespace = Some(namespace);
        }
        Ok(config)
    }

    /// Update environment with `environment_id`.
    pub fn with_environment_id(mut self, environment_id: i64) -> ResolverConfig {
        self.environment_id = environment_id;
        self
    }

    /// Update process namespace with `namespace`.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> ResolverConfig {
        self.namespace = Some(namespace.into());
        self
    }

    /// Update segment nesting limit with `max_segment_depth`.
    pub fn with_max_segment_depth(mut self, max_segment_depth: usize) -> ResolverConfig {
        self.max_segment_depth = max_segment_depth;
        self
    }
}

impl Default for ResolverConfig {
    fn default() -> ResolverConfig {
        ResolverConfig {
            environment_id: ResolverConfig::DEFAULT_ENVIRONMENT_ID,
            namespace: None,
            max_segment_depth: ResolverConfig::DEFAULT_MAX_SEGMENT_DEPTH,
        }
    }
}

/// Return the number of segments of `namespace` that match `process_namespace`, or `None` if
/// `namespace` is not a prefix of it.
///
/// Empty segments match anything.
///
/// ```
/// # use prefab_core::resolver::namespace_match;
/// assert_eq!(namespace_match("corp.proj", "corp.proj.api"), Some(2));
/// assert_eq!(namespace_match("corp.other", "corp.proj.api"), None);
/// assert_eq!(namespace_match("corp.proj.api.v2", "corp.proj.api"), None);
/// ```
pub fn namespace_match(namespace: &str, process_namespace: &str) -> Option<usize> {
    let mut process_segments = process_namespace.split('.');
    let mut matched = 0;
    for segment in namespace.split('.') {
        if segment.is_empty() {
            process_segments.next();
            continue;
        }
        if process_segments.next()? != segment {
            return None;
        }
        matched += 1;
    }
    Some(matched)
}

/// Score of `row` for the process, or `None` if the row does not apply.
///
/// 0 for the environment-default row, 1 for a row of the current environment, `2 + N` for a row of
/// the current environment whose namespace matches `N` segments of the process namespace.
fn score_row(row: &ConfigRow, environment_id: i64, namespace: Option<&str>) -> Option<usize> {
    let process_namespace = namespace.unwrap_or("");
    if row.is_environment_default() {
        return match row.namespace() {
            None => Some(0),
            Some(row_namespace) => namespace_match(row_namespace, process_namespace).map(|_| 0),
        };
    }
    if row.environment_id != Some(environment_id) {
        return None;
    }
    match row.namespace() {
        None => Some(1),
        Some(row_namespace) => namespace_match(row_namespace, process_namespace).map(|n| 2 + n),
    }
}

/// A config as it applies to the running process.
#[derive(Debug, Clone)]
pub struct ResolvedEntry {
    config: Arc<RawConfig>,
    source: ConfigSource,
    /// Applicable rows, most specific first. The first one is the winning row.
    row_order: Vec<usize>,
    row_match: RowMatch,
}

impl ResolvedEntry {
    fn resolve(stored: StoredConfig, environment_id: i64, namespace: Option<&str>) -> Option<Self> {
        let mut scored = stored
            .config
            .rows
            .iter()
            .enumerate()
            .filter_map(|(index, row)| Some((index, score_row(row, environment_id, namespace)?)))
            .collect::<Vec<_>>();
        // Highest score first; on equal score the later row wins.
        scored.sort_by(|(index_a, score_a), (index_b, score_b)| {
            score_b.cmp(score_a).then(index_b.cmp(index_a))
        });

        let &(winner, _) = scored.first()?;
        let row_match = RowMatch::of(&stored.config.rows[winner]);
        Some(ResolvedEntry {
            row_order: scored.into_iter().map(|(index, _)| index).collect(),
            row_match,
            config: stored.config,
            source: stored.source,
        })
    }

    #[allow(missing_docs)]
    pub fn config(&self) -> &Arc<RawConfig> {
        &self.config
    }

    #[allow(missing_docs)]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Index of the winning row.
    pub fn row_index(&self) -> usize {
        self.row_order[0]
    }

    /// Scope of the winning row.
    pub fn row_match(&self) -> &RowMatch {
        &self.row_match
    }

    /// Indices of all applicable rows in evaluation order.
    pub fn row_order(&self) -> &[usize] {
        &self.row_order
    }
}

/// Immutable key -> [`ResolvedEntry`] map.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    entries: HashMap<Str, ResolvedEntry>,
}

impl Snapshot {
    #[allow(missing_docs)]
    pub fn get(&self, key: &str) -> Option<&ResolvedEntry> {
        self.entries.get(key)
    }

    #[allow(missing_docs)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[allow(missing_docs)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Serves config lookups for the process's environment and namespace.
///
/// `Resolver` is `Sync`: any number of threads may call [`Resolver::get()`] while another thread
/// calls [`Resolver::rebuild()`]. A lookup observes either the old or the new snapshot, never a
/// mix of both.
pub struct Resolver {
    store: Arc<ConfigStore>,
    config: ResolverConfig,
    snapshot: ArcSwap<Snapshot>,
    // Serializes rebuilds so that an older projection never replaces a newer one.
    rebuild_lock: Mutex<()>,
}

impl Resolver {
    /// Create a resolver over `store` and build the initial snapshot.
    pub fn new(store: Arc<ConfigStore>, config: ResolverConfig) -> Resolver {
        let resolver = Resolver {
            store,
            config,
            snapshot: ArcSwap::from_pointee(Snapshot::default()),
            rebuild_lock: Mutex::new(()),
        };
        resolver.rebuild();
        resolver
    }

    #[allow(missing_docs)]
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    #[allow(missing_docs)]
    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    /// Rebuild the snapshot from the store. Returns the number of resolved configs.
    ///
    /// Configs without a row for this process are left out.
    pub fn rebuild(&self) -> usize {
        let _guard = self
            .rebuild_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let namespace = self.config.namespace.as_deref();
        let entries = self
            .store
            .snapshot()
            .into_iter()
            .filter_map(|(key, stored)| {
                let entry = ResolvedEntry::resolve(stored, self.config.environment_id, namespace)?;
                Some((key, entry))
            })
            .collect::<HashMap<_, _>>();

        let len = entries.len();
        self.snapshot.store(Arc::new(Snapshot { entries }));
        log::debug!(target: "prefab", configs = len, highwater_mark = self.store.highwater_mark(); "rebuilt resolved snapshot");
        len
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.load_full()
    }

    /// Evaluate config `key` for `context`.
    ///
    /// Returns `Ok(None)` if the config does not exist or none of its values matched. It is up to
    /// the caller to apply a default then.
    pub fn get(
        &self,
        key: &str,
        context: &dyn PropertyLookup,
    ) -> std::result::Result<Option<Evaluation>, EvaluationError> {
        self.get_at(key, context, Utc::now())
    }

    /// Same as [`Resolver::get()`] with an explicit evaluation time.
    pub fn get_at(
        &self,
        key: &str,
        context: &dyn PropertyLookup,
        now: DateTime<Utc>,
    ) -> std::result::Result<Option<Evaluation>, EvaluationError> {
        let snapshot = self.snapshot.load();
        let result = self.evaluating(&snapshot, now).evaluate(key, context);

        match result {
            Ok(evaluation) => {
                log::trace!(target: "prefab",
                        config_key = key,
                        config_id = evaluation.config_id,
                        value:display = evaluation.reportable_value();
                        "evaluated a config");
                Ok(Some(evaluation))
            }

            Err(EvaluationFailure::ConfigNotFound) => {
                log::trace!(target: "prefab",
                        config_key = key;
                        "config not found");
                Ok(None)
            }

            Err(EvaluationFailure::NoMatch) => {
                log::trace!(target: "prefab",
                        config_key = key;
                        "no conditional value matched");
                Ok(None)
            }

            Err(EvaluationFailure::Error(err)) => {
                log::warn!(target: "prefab",
                        config_key = key,
                        err:display = err;
                        "error occurred while evaluating a config");
                Err(err)
            }
        }
    }

    /// Evaluate config `key` and check that its value has the `expected` type.
    pub fn get_typed(
        &self,
        key: &str,
        context: &dyn PropertyLookup,
        expected: ValueType,
    ) -> std::result::Result<Option<Evaluation>, EvaluationError> {
        let Some(evaluation) = self.get(key, context)? else {
            return Ok(None);
        };
        let found = evaluation.value.value_type();
        if found != expected {
            log::warn!(target: "prefab", config_key = key, expected:? = expected, found:? = found; "config has unexpected type");
            return Err(EvaluationError::TypeMismatch { expected, found });
        }
        Ok(Some(evaluation))
    }

    /// Return `true` if feature flag `key` evaluates to `true`. Missing, unmatched and non-boolean
    /// flags are disabled.
    pub fn is_enabled(&self, key: &str, context: &dyn PropertyLookup) -> bool {
        matches!(
            self.get_typed(key, context, ValueType::Bool),
            Ok(Some(evaluation)) if evaluation.value.as_bool() == Some(true)
        )
    }

    /// Keys of all resolved configs, sorted.
    pub fn keys(&self) -> Vec<Str> {
        let mut keys = self
            .snapshot
            .load()
            .entries
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        keys.sort();
        keys
    }

    /// Human-readable listing of every resolved config evaluated for an empty context: one
    /// `key | value | row | source` line per config, sorted by key.
    pub fn dump(&self) -> String {
        let snapshot = self.snapshot.load();
        let evaluating = self.evaluating(&snapshot, Utc::now());
        let context = Context::new();

        let mut keys = snapshot.entries.keys().collect::<Vec<_>>();
        keys.sort();

        let mut dump = String::new();
        for key in keys {
            let entry = &snapshot.entries[key];
            let value = match evaluating.evaluate(key.as_str(), &context) {
                Ok(evaluation) => evaluation.reportable_value().into_owned(),
                Err(EvaluationFailure::NoMatch) => "<no match>".to_owned(),
                Err(err) => format!("<{err}>"),
            };
            dump.push_str(&format!(
                "{key} | {value} | {} | {}\n",
                entry.row_match, entry.source
            ));
        }
        dump
    }

    fn evaluating<'a>(&'a self, snapshot: &'a Snapshot, now: DateTime<Utc>) -> Evaluating<'a> {
        Evaluating {
            snapshot,
            namespace: self.config.namespace.as_deref().unwrap_or(""),
            max_depth: self.config.max_segment_depth,
            now,
            depth: 0,
        }
    }
}

/// One lookup against a fixed snapshot. Segment and decryption key references are resolved
/// against the same snapshot.
#[derive(Clone, Copy)]
struct Evaluating<'a> {
    snapshot: &'a Snapshot,
    namespace: &'a str,
    max_depth: usize,
    now: DateTime<Utc>,
    depth: usize,
}

impl<'a> Evaluating<'a> {
    fn evaluate(
        &self,
        key: &str,
        context: &dyn PropertyLookup,
    ) -> std::result::Result<Evaluation, EvaluationFailure> {
        let entry = self
            .snapshot
            .get(key)
            .ok_or(EvaluationFailure::ConfigNotFound)?;
        let config = &entry.config;

        let matched =
            CriteriaEvaluator::new(config, &entry.row_order, self.namespace, self, self.now)
                .evaluate(context, self.depth)
                .ok_or(EvaluationFailure::NoMatch)?;

        let unwrapped = ValueUnwrapper::new(config, self).unwrap(matched.value, context)?;

        Ok(Evaluation {
            config_key: config.key.clone(),
            config_id: config.id,
            config_type: config.config_type,
            value: unwrapped.value,
            redacted: unwrapped.redacted,
            row_index: matched.row_index,
            value_index: matched.value_index,
            weighted_value_index: unwrapped.weighted_value_index,
            row_match: RowMatch::of(&config.rows[matched.row_index]),
            source: entry.source,
        })
    }

    /// Evaluation one level deeper, unless that exceeds the depth limit.
    fn nested(&self, depth: usize, key: &str) -> Option<Evaluating<'a>> {
        if depth > self.max_depth {
            log::warn!(target: "prefab", config_key = key, depth, max_depth = self.max_depth; "config references are nested too deeply");
            return None;
        }
        Some(Evaluating { depth, ..*self })
    }
}

impl SegmentResolver for Evaluating<'_> {
    fn in_segment(
        &self,
        segment_key: &str,
        context: &dyn PropertyLookup,
        depth: usize,
    ) -> Option<bool> {
        let nested = self.nested(depth, segment_key)?;
        match nested.evaluate(segment_key, context) {
            Ok(evaluation) => {
                let in_segment = evaluation.value.as_bool();
                if in_segment.is_none() {
                    log::warn!(target: "prefab", segment_key; "segment does not evaluate to a boolean");
                }
                in_segment
            }
            Err(EvaluationFailure::NoMatch) => Some(false),
            Err(EvaluationFailure::ConfigNotFound) => None,
            Err(EvaluationFailure::Error(err)) => {
                log::warn!(target: "prefab", segment_key, err:display = err; "failed to evaluate segment");
                None
            }
        }
    }
}

impl DecryptionKeyResolver for Evaluating<'_> {
    fn decryption_key(&self, key: &str, context: &dyn PropertyLookup) -> Option<String> {
        let nested = self.nested(self.depth + 1, key)?;
        let evaluation = nested.evaluate(key, context).ok()?;
        evaluation.value.as_str().map(str::to_owned)
    }
}
