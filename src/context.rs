//! Evaluation context: typed caller properties grouped into named contexts.
//!
//! A [`Context`] maps a context name (e.g., `"user"`, `"team"`, or the unnamed `""` context) to a
//! [`NamedContext`], which in turn maps property names to [`ContextValue`]s. Properties are
//! addressed with dotted paths: `"user.email"` is property `email` of context `user`, while a bare
//! `"email"` is looked up in the unnamed context.
//!
//! Contexts are immutable once constructed. [`Context::merge`] and [`Context::with_named`] produce
//! new contexts.
use std::{collections::HashMap, sync::Arc};

use derive_more::From;
use serde::{Deserialize, Serialize};

use crate::Str;

/// A typed property value.
///
/// Conveniently implements `From` conversions for `bool`, `i64`, `f64`, `String`, `&str` and
/// `Vec<String>`.
///
/// ```
/// # use prefab_core::ContextValue;
/// let string_value: ContextValue = "example".into();
/// let int_value: ContextValue = 42i64.into();
/// let bool_value: ContextValue = true.into();
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, From)]
#[serde(untagged)]
pub enum ContextValue {
    /// A boolean value.
    Bool(bool),
    /// An integer value.
    Int(i64),
    /// A floating-point value.
    Double(f64),
    /// A string value.
    String(String),
    /// A list of strings.
    StringList(Vec<String>),
}

impl ContextValue {
    /// Return the value as `&str` if it is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ContextValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Interpret the value as a number. Strings are parsed; booleans and lists are not numbers.
    /// Only finite numbers count, so `"inf"` and `"NaN"` are not numbers either.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ContextValue::Int(i) => Some(*i as f64),
            ContextValue::Double(d) => Some(*d).filter(|d| d.is_finite()),
            ContextValue::String(s) => parse_finite(s),
            ContextValue::Bool(_) | ContextValue::StringList(_) => None,
        }
    }
}

/// Parse a finite number, ignoring surrounding whitespace.
pub(crate) fn parse_finite(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

impl std::fmt::Display for ContextValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContextValue::Bool(b) => write!(f, "{b}"),
            ContextValue::Int(i) => write!(f, "{i}"),
            ContextValue::Double(d) => write!(f, "{d}"),
            ContextValue::String(s) => f.write_str(s),
            ContextValue::StringList(list) => f.write_str(&list.join(",")),
        }
    }
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<i32> for ContextValue {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

/// Anything properties can be looked up in by dotted path.
///
/// Implemented by [`Context`] and by [`ContextChain`], which falls back through ambient contexts.
pub trait PropertyLookup {
    /// Look up a property by dotted path (`"namespace.property"`).
    fn get(&self, path: &str) -> Option<&ContextValue>;
}

/// A single named context, e.g. all properties of the `user`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NamedContext {
    name: Str,
    properties: HashMap<String, ContextValue>,
}

impl NamedContext {
    /// Create an empty named context.
    pub fn new(name: impl Into<Str>) -> NamedContext {
        NamedContext {
            name: name.into(),
            properties: HashMap::new(),
        }
    }

    /// Return a copy of this context with `property` set to `value`.
    pub fn with(mut self, property: impl Into<String>, value: impl Into<ContextValue>) -> Self {
        self.properties.insert(property.into(), value.into());
        self
    }

    #[allow(missing_docs)]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get a property of this context by its bare name.
    pub fn get(&self, property: &str) -> Option<&ContextValue> {
        self.properties.get(property)
    }

    /// Iterate over all properties.
    pub fn properties(&self) -> impl Iterator<Item = (&str, &ContextValue)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K, V> FromIterator<(K, V)> for NamedContext
where
    K: Into<String>,
    V: Into<ContextValue>,
{
    /// Build an unnamed context from properties. Use [`NamedContext::new`] + [`NamedContext::with`]
    /// for named ones.
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        NamedContext {
            name: Str::empty(),
            properties: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// A set of named contexts.
///
/// ```
/// # use prefab_core::{Context, ContextValue, context::{NamedContext, PropertyLookup}};
/// let context = Context::new()
///     .with_named(NamedContext::new("user").with("key", "u123").with("age", 33))
///     .with_named(NamedContext::new("").with("region", "eu"));
///
/// assert_eq!(context.get("user.key"), Some(&ContextValue::from("u123")));
/// assert_eq!(context.get("region"), Some(&ContextValue::from("eu")));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "ContextWire", into = "ContextWire")]
pub struct Context {
    contexts: HashMap<Str, Arc<NamedContext>>,
}

type ContextWire = HashMap<String, HashMap<String, ContextValue>>;

impl From<ContextWire> for Context {
    fn from(value: ContextWire) -> Self {
        Context {
            contexts: value
                .into_iter()
                .map(|(name, properties)| {
                    let name = Str::from(name);
                    (name.clone(), Arc::new(NamedContext { name, properties }))
                })
                .collect(),
        }
    }
}

impl From<Context> for ContextWire {
    fn from(value: Context) -> Self {
        value
            .contexts
            .into_iter()
            .map(|(name, ctx)| (name.to_string(), ctx.properties.clone()))
            .collect()
    }
}

impl Context {
    /// Create an empty context.
    pub fn new() -> Context {
        Context::default()
    }

    /// Return a new context with `named` added, replacing a context with the same name.
    pub fn with_named(mut self, named: NamedContext) -> Context {
        self.contexts.insert(named.name.clone(), Arc::new(named));
        self
    }

    /// Return a named context.
    pub fn named(&self, name: &str) -> Option<&NamedContext> {
        self.contexts.get(name).map(AsRef::as_ref)
    }

    #[allow(missing_docs)]
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Merge `other` on top of `self`, producing a new context. Named contexts present in `other`
    /// replace the ones in `self` as a whole.
    pub fn merge(&self, other: &Context) -> Context {
        let mut contexts = self.contexts.clone();
        contexts.extend(
            other
                .contexts
                .iter()
                .map(|(name, ctx)| (name.clone(), ctx.clone())),
        );
        Context { contexts }
    }

    /// Identity string for telemetry: `"name:key"` for every named context that carries a `key`
    /// property, sorted by name and joined with `|`.
    pub fn key(&self) -> String {
        let mut keys = self
            .contexts
            .values()
            .filter_map(|ctx| Some(format!("{}:{}", ctx.name, ctx.get("key")?)))
            .collect::<Vec<_>>();
        keys.sort();
        keys.join("|")
    }
}

impl PropertyLookup for Context {
    fn get(&self, path: &str) -> Option<&ContextValue> {
        let (name, property) = split_path(path);
        self.contexts.get(name)?.get(property)
    }
}

/// Split `"ns.prop"` on the first dot. A bare name belongs to the unnamed context.
fn split_path(path: &str) -> (&str, &str) {
    path.split_once('.').unwrap_or(("", path))
}

/// A request context chained to ambient contexts.
///
/// Lookups consult the request-local context first, then the global context, then the default
/// context.
#[derive(Debug, Clone, Default)]
pub struct ContextChain {
    local: Arc<Context>,
    global: Option<Arc<Context>>,
    default: Option<Arc<Context>>,
}

impl ContextChain {
    #[allow(missing_docs)]
    pub fn new(local: impl Into<Arc<Context>>) -> ContextChain {
        ContextChain {
            local: local.into(),
            global: None,
            default: None,
        }
    }

    #[allow(missing_docs)]
    pub fn with_global(mut self, global: Arc<Context>) -> ContextChain {
        self.global = Some(global);
        self
    }

    #[allow(missing_docs)]
    pub fn with_default(mut self, default: Arc<Context>) -> ContextChain {
        self.default = Some(default);
        self
    }

    #[allow(missing_docs)]
    pub fn local(&self) -> &Context {
        &self.local
    }
}

impl PropertyLookup for ContextChain {
    fn get(&self, path: &str) -> Option<&ContextValue> {
        self.local
            .get(path)
            .or_else(|| self.global.as_deref()?.get(path))
            .or_else(|| self.default.as_deref()?.get(path))
    }
}

/// Explicit, caller-owned stack of ambient contexts.
///
/// This replaces a thread-local "current context": the owner pushes a context for a unit of work
/// and every lookup goes through [`ContextStack::current`].
#[derive(Debug, Clone, Default)]
pub struct ContextStack {
    global: Option<Arc<Context>>,
    default: Option<Arc<Context>>,
    frames: Vec<Arc<Context>>,
}

impl ContextStack {
    #[allow(missing_docs)]
    pub fn new() -> ContextStack {
        ContextStack::default()
    }

    /// Set the process-wide global context.
    pub fn with_global(mut self, global: Context) -> ContextStack {
        self.global = Some(Arc::new(global));
        self
    }

    /// Set the default context, consulted last.
    pub fn with_default(mut self, default: Context) -> ContextStack {
        self.default = Some(Arc::new(default));
        self
    }

    #[allow(missing_docs)]
    pub fn push(&mut self, context: Context) {
        self.frames.push(Arc::new(context));
    }

    #[allow(missing_docs)]
    pub fn pop(&mut self) -> Option<Arc<Context>> {
        self.frames.pop()
    }

    #[allow(missing_docs)]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Run `f` with `context` pushed on top of the stack, popping it afterwards.
    pub fn with_context<R>(&mut self, context: Context, f: impl FnOnce(&mut Self) -> R) -> R {
        let depth = self.frames.len();
        self.push(context);
        let result = f(self);
        self.frames.truncate(depth);
        result
    }

    /// Return `context` merged on top of the current request-local context.
    pub fn merge_with_current(&self, context: &Context) -> Context {
        match self.frames.last() {
            Some(current) => current.merge(context),
            None => context.clone(),
        }
    }

    /// Build the lookup chain for the current frame.
    pub fn current(&self) -> ContextChain {
        ContextChain {
            local: self.frames.last().cloned().unwrap_or_default(),
            global: self.global.clone(),
            default: self.default.clone(),
        }
    }
}
