//! A thread-safe in-memory store of the latest known raw configs. [`ConfigStore`] provides
//! concurrent access for writers (one per source: local files, checkpoints, the stream) and readers
//! (the resolver rebuilding its snapshot).
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
};

use dashmap::{mapref::entry::Entry, DashMap};

use crate::{
    config::{Configs, RawConfig, TryParse},
    Str,
};

/// Where a config came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfigSource {
    /// Defaults file shipped with the application.
    LocalFile,
    /// Local override file or environment variable.
    LocalOverride,
    /// Bulk checkpoint fetch.
    Checkpoint,
    /// Live streaming update.
    Stream,
    /// Configs injected by tests or tooling.
    Test,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ConfigSource::LocalFile => "local_file",
            ConfigSource::LocalOverride => "local_override",
            ConfigSource::Checkpoint => "checkpoint",
            ConfigSource::Stream => "stream",
            ConfigSource::Test => "test",
        })
    }
}

/// A change to a single config key.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigDelta {
    /// New or updated definition.
    Upsert(RawConfig),
    /// The config was deleted.
    Tombstone {
        #[allow(missing_docs)]
        key: Str,
        #[allow(missing_docs)]
        id: i64,
    },
}

impl ConfigDelta {
    #[allow(missing_docs)]
    pub fn key(&self) -> &Str {
        match self {
            ConfigDelta::Upsert(config) => &config.key,
            ConfigDelta::Tombstone { key, .. } => key,
        }
    }

    #[allow(missing_docs)]
    pub fn id(&self) -> i64 {
        match self {
            ConfigDelta::Upsert(config) => config.id,
            ConfigDelta::Tombstone { id, .. } => *id,
        }
    }
}

impl From<RawConfig> for ConfigDelta {
    /// Sources signal deletion by sending a config without rows.
    fn from(config: RawConfig) -> Self {
        if config.rows.is_empty() {
            ConfigDelta::Tombstone {
                key: config.key,
                id: config.id,
            }
        } else {
            ConfigDelta::Upsert(config)
        }
    }
}

/// A config together with the source that delivered it.
#[derive(Debug, Clone)]
pub struct StoredConfig {
    #[allow(missing_docs)]
    pub config: Arc<RawConfig>,
    #[allow(missing_docs)]
    pub source: ConfigSource,
}

/// `ConfigStore` merges deltas from independent sources, keeping the highest-id definition per
/// key.
///
/// Writes lock only the shard holding the key, so a write never blocks reads of other keys.
#[derive(Debug, Default)]
pub struct ConfigStore {
    configs: DashMap<Str, StoredConfig>,
    highwater_mark: AtomicI64,
}

impl ConfigStore {
    /// Create a new empty config store.
    pub fn new() -> Self {
        ConfigStore::default()
    }

    /// Apply a delta. Returns `true` if the store changed.
    ///
    /// A delta is applied if the key is unknown or its id is at least as high as the stored id
    /// (ties go to the delta applied last). Older deltas are ignored.
    pub fn apply(&self, delta: impl Into<ConfigDelta>, source: ConfigSource) -> bool {
        let delta = delta.into();
        let id = delta.id();
        self.highwater_mark.fetch_max(id, Ordering::AcqRel);

        match delta {
            ConfigDelta::Upsert(config) => match self.configs.entry(config.key.clone()) {
                Entry::Occupied(mut entry) => {
                    let existing_id = entry.get().config.id;
                    if id >= existing_id {
                        log::trace!(target: "prefab", key:display = config.key, id, source:display = source; "updating config");
                        entry.insert(StoredConfig {
                            config: Arc::new(config),
                            source,
                        });
                        true
                    } else {
                        log::debug!(target: "prefab", key:display = config.key, id, existing_id; "ignoring stale config");
                        false
                    }
                }
                Entry::Vacant(entry) => {
                    log::trace!(target: "prefab", key:display = config.key, id, source:display = source; "adding config");
                    entry.insert(StoredConfig {
                        config: Arc::new(config),
                        source,
                    });
                    true
                }
            },
            ConfigDelta::Tombstone { key, id } => {
                let removed = self
                    .configs
                    .remove_if(&key, |_, stored| id >= stored.config.id)
                    .is_some();
                if removed {
                    log::trace!(target: "prefab", key:display = key, id, source:display = source; "deleted config");
                }
                removed
            }
        }
    }

    /// Apply all configs from a bulk payload. Configs that failed to parse are skipped and logged.
    ///
    /// Returns the number of configs that changed the store.
    pub fn apply_configs(&self, configs: Configs, source: ConfigSource) -> usize {
        configs
            .configs
            .into_iter()
            .filter_map(|config| match config {
                TryParse::Parsed(config) => Some(config),
                TryParse::ParseFailed(json) => {
                    let key = json.get("key").and_then(|key| key.as_str()).unwrap_or("");
                    log::error!(target: "prefab", key, source:display = source; "failed to parse config, try upgrading the client");
                    None
                }
            })
            .map(|config| self.apply(config, source))
            .filter(|applied| *applied)
            .count()
    }

    /// Highest config id seen so far. Sources use it to request only newer deltas.
    pub fn highwater_mark(&self) -> i64 {
        self.highwater_mark.load(Ordering::Acquire)
    }

    /// Get the stored definition of a config.
    pub fn get(&self, key: &str) -> Option<StoredConfig> {
        self.configs.get(key).map(|entry| entry.value().clone())
    }

    /// Copy of the current key -> config map. Configs are shared, not cloned.
    pub fn snapshot(&self) -> HashMap<Str, StoredConfig> {
        self.configs
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    #[allow(missing_docs)]
    pub fn len(&self) -> usize {
        self.configs.len()
    }

    #[allow(missing_docs)]
    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use proptest::prelude::*;

    use super::{ConfigDelta, ConfigSource, ConfigStore};
    use crate::config::{ConditionalValue, ConfigRow, ConfigValue, RawConfig};

    fn config(key: &str, id: i64, value: &str) -> RawConfig {
        RawConfig {
            id,
            key: key.to_owned().into(),
            config_type: Default::default(),
            value_type: None,
            rows: vec![ConfigRow {
                values: vec![ConditionalValue {
                    criteria: vec![],
                    value: ConfigValue::from(value),
                }],
                ..Default::default()
            }],
        }
    }

    fn stored_value(store: &ConfigStore, key: &str) -> Option<String> {
        let stored = store.get(key)?;
        Some(stored.config.rows[0].values[0].value.as_str()?.to_owned())
    }

    #[test]
    fn can_apply_from_another_thread() {
        let store = Arc::new(ConfigStore::new());

        assert!(store.is_empty());

        {
            let store = store.clone();
            let _ = std::thread::spawn(move || {
                store.apply(config("a", 1, "x"), ConfigSource::Stream);
            })
            .join();
        }

        assert_eq!(stored_value(&store, "a").as_deref(), Some("x"));
    }

    #[test]
    fn ignores_older_deltas() {
        let store = ConfigStore::new();
        assert!(store.apply(config("a", 5, "new"), ConfigSource::Stream));
        assert!(!store.apply(config("a", 3, "old"), ConfigSource::Checkpoint));

        assert_eq!(stored_value(&store, "a").as_deref(), Some("new"));
        assert_eq!(store.get("a").unwrap().source, ConfigSource::Stream);
    }

    #[test]
    fn equal_id_last_applied_wins() {
        let store = ConfigStore::new();
        store.apply(config("a", 0, "defaults"), ConfigSource::LocalFile);
        store.apply(config("a", 0, "override"), ConfigSource::LocalOverride);

        assert_eq!(stored_value(&store, "a").as_deref(), Some("override"));
    }

    #[test]
    fn local_files_are_replaced_by_remote() {
        let store = ConfigStore::new();
        store.apply(config("a", 0, "local"), ConfigSource::LocalFile);
        store.apply(config("a", 12, "remote"), ConfigSource::Checkpoint);

        assert_eq!(stored_value(&store, "a").as_deref(), Some("remote"));
    }

    #[test]
    fn tombstone_removes_key() {
        let store = ConfigStore::new();
        store.apply(config("a", 1, "x"), ConfigSource::Checkpoint);

        let mut deleted = config("a", 2, "x");
        deleted.rows.clear();
        assert!(matches!(
            ConfigDelta::from(deleted.clone()),
            ConfigDelta::Tombstone { .. }
        ));
        assert!(store.apply(deleted, ConfigSource::Stream));

        assert!(store.get("a").is_none());
        assert_eq!(store.highwater_mark(), 2);
    }

    #[test]
    fn stale_tombstone_is_ignored() {
        let store = ConfigStore::new();
        store.apply(config("a", 5, "x"), ConfigSource::Stream);

        let mut deleted = config("a", 3, "x");
        deleted.rows.clear();
        assert!(!store.apply(deleted, ConfigSource::Checkpoint));

        let stored = store.get("a").unwrap();
        assert_eq!(stored.config.id, 5);
        assert_eq!(stored.source, ConfigSource::Stream);
        assert_eq!(store.highwater_mark(), 5);
    }

    #[test]
    fn highwater_mark_tracks_max_id() {
        let store = ConfigStore::new();
        assert_eq!(store.highwater_mark(), 0);

        store.apply(config("a", 7, "x"), ConfigSource::Checkpoint);
        store.apply(config("b", 3, "y"), ConfigSource::Checkpoint);
        store.apply(config("c", 11, "z"), ConfigSource::Stream);

        assert_eq!(store.highwater_mark(), 11);
    }

    #[test]
    fn apply_configs_skips_unparseable() {
        let configs = serde_json::from_str(
            r#"{
              "configs": [
                {"id": 1, "key": "ok", "rows": [{"values": [{"value": {"string": "x"}}]}]},
                {"id": 2, "key": "bad", "rows": [{"values": [{"value": {"hologram": "x"}}]}]}
              ]
            }"#,
        )
        .unwrap();

        let store = ConfigStore::new();
        assert_eq!(store.apply_configs(configs, ConfigSource::Checkpoint), 1);
        assert!(store.get("ok").is_some());
        assert!(store.get("bad").is_none());
    }

    #[test]
    fn concurrent_writers() {
        let store = Arc::new(ConfigStore::new());

        let handles = (0..4)
            .map(|writer| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for id in 0..100 {
                        store.apply(
                            config(&format!("key-{}", id % 10), id, &format!("w{writer}")),
                            ConfigSource::Stream,
                        );
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.len(), 10);
        assert_eq!(store.highwater_mark(), 99);
        for key in 0..10 {
            assert_eq!(store.get(&format!("key-{key}")).unwrap().config.id, 90 + key);
        }
    }

    proptest! {
        #[test]
        fn apply_is_a_monotone_merge(i in 0i64..1000, j in 0i64..1000) {
            let (i, j) = (i.min(j), i.max(j));

            let both = ConfigStore::new();
            both.apply(config("k", i, "first"), ConfigSource::Stream);
            both.apply(config("k", j, "second"), ConfigSource::Stream);

            let only_j = ConfigStore::new();
            only_j.apply(config("k", j, "second"), ConfigSource::Stream);

            prop_assert_eq!(stored_value(&both, "k"), stored_value(&only_j, "k"));
            prop_assert_eq!(both.highwater_mark(), only_j.highwater_mark());

            // Re-applying the older delta changes nothing (unless it is not older at all).
            both.apply(config("k", i, "first"), ConfigSource::Stream);
            let expected = if i == j { "first" } else { "second" };
            let stored = stored_value(&both, "k");
            prop_assert_eq!(stored.as_deref(), Some(expected));
        }
    }
}
