//! `prefab_core` is the evaluation core of a Prefab remote configuration client. It turns a
//! continuously-updated set of versioned configuration definitions and a request-scoped
//! [`Context`] into a single effective value for a requested configuration key.
//!
//! # Overview
//!
//! [`ConfigStore`](config_store::ConfigStore) is a thread-safe, multi-writer map from config key to
//! the latest known [`RawConfig`](config::RawConfig). Independent sources (local files, bulk
//! checkpoints, a live stream) hand it deltas; a delta only replaces what is stored if its `id` is at
//! least as high as the stored one. The store also tracks the *highwater mark* (highest id seen),
//! which transport collaborators use to request only newer deltas.
//!
//! [`Resolver`](resolver::Resolver) projects the store into an immutable snapshot for the running
//! process's environment and namespace. Whenever the store changes, call
//! [`Resolver::rebuild()`](resolver::Resolver::rebuild); the new snapshot is swapped in atomically,
//! so readers always see either the old or the new snapshot in full.
//!
//! [`Resolver::get()`](resolver::Resolver::get) evaluates a config for a [`Context`]. Evaluation
//! walks the config rows with the [`CriteriaEvaluator`](eval::CriteriaEvaluator), which matches
//! criteria (operators such as `PROP_IS_ONE_OF`, `PROP_SEMVER_LESS_THAN`, `IN_SEG`) against the
//! context, and then reduces the matched value with the [`ValueUnwrapper`](unwrap::ValueUnwrapper):
//! weighted values are resolved with a stable hash, provided values are read from environment
//! variables, and encrypted values are decrypted.
//!
//! The result is an [`Evaluation`]: the typed value together with the metadata (config id, row
//! index, value index, weighted value index) needed by telemetry.
//!
//! # Error Handling
//!
//! Data errors (malformed regex, missing segment, unparseable operands, missing environment
//! variables) never reach the caller: they are logged and resolve to a safe default. A missing
//! config is a normal outcome and is reported as `Ok(None)`; it is up to the caller to apply a
//! default. Errors that need developer attention are returned as [`EvaluationError`].
//!
//! # Logging
//!
//! The crate uses the [`log`](https://docs.rs/log/latest/log/) facade with target `"prefab"`.

#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod config_store;
pub mod context;
pub mod encryption;
pub mod eval;
pub mod resolver;
pub mod unwrap;
pub mod weighted;

mod error;
mod evaluation;

pub use context::{Context, ContextValue};
pub use error::{Error, EvaluationError, Result};
pub use evaluation::{Evaluation, RowMatch};

/// Cheaply clonable string used for config keys and other identifiers.
pub type Str = faststr::FastStr;
