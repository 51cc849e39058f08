//! # Configuration Tree
//!
//! A dynamic, dotted-path settings store. Every node either holds a value
//! (scalar, list, hook list, opaque handle) or a map of child nodes, never both.
//!
//! Reading an unset key through [`Config::get`] auto-creates an empty nested
//! node, so chained paths like `"a.b.c"` always resolve. Read-only accessors
//! ([`Config::value`], [`Config::query`], [`Config::contains`]) never mutate.
//!
//! ```rust
//! use herald::{config::Config, value::Value};
//!
//! let mut config = Config::new();
//! config.set("a.b.c", 1).unwrap();
//! config.add("publish_to", "subscriptions").unwrap();
//!
//! assert_eq!(config.value("a.b.c"), Some(&Value::Int(1)));
//! assert!(config.query("publish_to"));
//! assert!(!config.query("undefined"));
//! ```

use std::{collections::BTreeMap, fs, path::Path};

use thiserror::Error;

use crate::value::Value;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config key is not addable: {0}")]
    NotAddable(String),

    #[error("May only add callables to hook list: {0}")]
    NotCallable(String),

    #[error("Config key does not hold nested settings: {0}")]
    NotNested(String),

    #[error("Empty config key")]
    EmptyKey,

    #[error("Invalid config value at {path}: {reason}")]
    InvalidValue { path: String, reason: String },

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Clone, Debug)]
pub enum Node {
    Value(Value),
    Config(Config),
}

#[derive(Clone, Debug, Default)]
pub struct Config {
    name: Option<String>,
    nested: BTreeMap<String, Node>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    fn named(name: String) -> Self {
        Self {
            name: Some(name),
            nested: BTreeMap::new(),
        }
    }

    /// Settings applied to every new instance.
    pub fn with_defaults() -> Self {
        let mut config = Self::new();
        for (path, value) in default_settings() {
            // default paths are static and never collide with collections
            let _ = config.set(path, value);
        }
        config
    }

    /// Dotted path of this node from the root, `None` for the root itself.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.nested.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.nested.keys().map(String::as_str)
    }

    /// Returns the node at `path`, creating empty nested nodes for unset keys.
    pub fn get(&mut self, path: &str) -> ConfigResult<&Node> {
        let (parents, leaf) = split_path(path)?;
        let parent = self.walk_mut(&parents, path)?;
        let name = parent.child_name(leaf);
        Ok(parent
            .nested
            .entry(leaf.to_string())
            .or_insert_with(|| Node::Config(Config::named(name))))
    }

    /// Returns the nested node at `path`, creating it when unset.
    pub fn nested_mut(&mut self, path: &str) -> ConfigResult<&mut Config> {
        let (parents, leaf) = split_path(path)?;
        let mut segments = parents;
        segments.push(leaf);
        self.walk_mut(&segments, path)
    }

    pub fn lookup(&self, path: &str) -> Option<&Node> {
        let (parents, leaf) = split_path(path).ok()?;
        let mut node = self;
        for segment in parents {
            node = match node.nested.get(segment)? {
                Node::Config(config) => config,
                Node::Value(_) => return None,
            };
        }
        node.nested.get(leaf)
    }

    pub fn value(&self, path: &str) -> Option<&Value> {
        match self.lookup(path)? {
            Node::Value(value) => Some(value),
            Node::Config(_) => None,
        }
    }

    pub fn nested(&self, path: &str) -> Option<&Config> {
        match self.lookup(path)? {
            Node::Config(config) => Some(config),
            Node::Value(_) => None,
        }
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.value(path).and_then(Value::as_str)
    }

    pub fn get_i64(&self, path: &str) -> Option<i64> {
        self.value(path).and_then(Value::as_i64)
    }

    pub fn get_bool(&self, path: &str) -> Option<bool> {
        self.value(path).and_then(Value::as_bool)
    }

    /// Truthiness test. Unset keys, `null`, `false` and empty nested nodes are false.
    pub fn query(&self, path: &str) -> bool {
        match self.lookup(path) {
            Some(Node::Value(value)) => value.is_truthy(),
            Some(Node::Config(config)) => !config.is_empty(),
            None => false,
        }
    }

    /// Presence test. A key explicitly set to `false` or `null` is present.
    pub fn contains(&self, path: &str) -> bool {
        match self.lookup(path) {
            Some(Node::Value(_)) => true,
            Some(Node::Config(config)) => !config.is_empty(),
            None => false,
        }
    }

    pub fn set(&mut self, path: &str, value: impl Into<Value>) -> ConfigResult<()> {
        let value = value.into();
        let (parents, leaf) = split_path(path)?;
        let parent = self.walk_mut(&parents, path)?;

        if let Some(Node::Value(existing)) = parent.nested.get(leaf) {
            if existing.is_collection() && !value.is_collection() && !value.is_null() {
                return Err(ConfigError::NotAddable(path.to_string()));
            }
        }

        parent.nested.insert(leaf.to_string(), Node::Value(value));
        Ok(())
    }

    /// Like [`Config::set`] but replaces whatever is at `path`, collections included.
    fn overwrite(&mut self, path: &str, value: Value) -> ConfigResult<()> {
        let (parents, leaf) = split_path(path)?;
        let parent = self.walk_mut(&parents, path)?;
        parent.nested.insert(leaf.to_string(), Node::Value(value));
        Ok(())
    }

    /// Appends into the collection at `path`.
    ///
    /// The first appended callable turns the key into a hook list; later
    /// appends to a hook list must also be callables.
    pub fn add(&mut self, path: &str, value: impl Into<Value>) -> ConfigResult<()> {
        let value = value.into();
        let (parents, leaf) = split_path(path)?;
        let parent = self.walk_mut(&parents, path)?;

        match parent.nested.get_mut(leaf) {
            None | Some(Node::Value(Value::Null)) => {
                parent
                    .nested
                    .insert(leaf.to_string(), Node::Value(start_collection(value)));
            }
            Some(Node::Config(config)) if config.is_empty() => {
                parent
                    .nested
                    .insert(leaf.to_string(), Node::Value(start_collection(value)));
            }
            Some(Node::Value(Value::List(items))) => items.push(value),
            Some(Node::Value(Value::Hooks(hooks))) => match value {
                Value::Hook(hook) => hooks.push(hook),
                _ => return Err(ConfigError::NotCallable(path.to_string())),
            },
            Some(_) => return Err(ConfigError::NotAddable(path.to_string())),
        }
        Ok(())
    }

    /// Merges a map: nested maps recurse into nested nodes, anything else
    /// overwrites the value at that key.
    pub fn merge(&mut self, map: &BTreeMap<String, Value>) -> ConfigResult<()> {
        for (key, value) in map {
            match value {
                Value::Map(inner) => self.nested_mut(key)?.merge(inner)?,
                other => self.overwrite(key, other.clone())?,
            }
        }
        Ok(())
    }

    pub fn merge_value(&mut self, value: &Value) -> ConfigResult<()> {
        match value {
            Value::Map(map) => self.merge(map),
            Value::Null => Ok(()),
            other => Err(ConfigError::InvalidValue {
                path: self.name.clone().unwrap_or_default(),
                reason: format!("expected a map, got {}", other.describe()),
            }),
        }
    }

    /// Merges a settings file. `.json` files are parsed as JSON, anything
    /// else as YAML.
    pub fn merge_file<P: AsRef<Path>>(&mut self, path: P) -> ConfigResult<()> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let parsed: serde_json::Value = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => {
                serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?
            }
            _ => serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?,
        };
        self.merge_value(&Value::from(parsed))
    }

    /// Deep copy of the nested node at `path` (empty when unset) with
    /// `params` merged on top. Used to hand each backend and plugin its own
    /// settings.
    pub fn scoped(&self, path: &str, params: &Value) -> ConfigResult<Config> {
        let mut scoped = match self.nested(path) {
            Some(config) => config.deep_copy(),
            None => Config::named(path.to_string()),
        };
        scoped.merge_value(params)?;
        Ok(scoped)
    }

    /// Recursively copies nested nodes. Opaque handles and hooks are shared,
    /// not cloned.
    pub fn deep_copy(&self) -> Config {
        Config {
            name: self.name.clone(),
            nested: self
                .nested
                .iter()
                .map(|(key, node)| {
                    let node = match node {
                        Node::Config(config) => Node::Config(config.deep_copy()),
                        Node::Value(value) => Node::Value(value.clone()),
                    };
                    (key.clone(), node)
                })
                .collect(),
        }
    }

    fn child_name(&self, key: &str) -> String {
        match &self.name {
            Some(name) => format!("{name}.{key}"),
            None => key.to_string(),
        }
    }

    fn walk_mut(&mut self, segments: &[&str], path: &str) -> ConfigResult<&mut Config> {
        let mut node = self;
        for segment in segments {
            let name = node.child_name(segment);
            node = match node
                .nested
                .entry(segment.to_string())
                .or_insert_with(|| Node::Config(Config::named(name)))
            {
                Node::Config(config) => config,
                Node::Value(_) => return Err(ConfigError::NotNested(path.to_string())),
            };
        }
        Ok(node)
    }
}

fn start_collection(value: Value) -> Value {
    match value {
        Value::Hook(hook) => {
            let mut hooks = crate::value::HookList::new();
            hooks.push(hook);
            Value::Hooks(hooks)
        }
        other => Value::List(vec![other]),
    }
}

fn split_path(path: &str) -> ConfigResult<(Vec<&str>, &str)> {
    let mut segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|segment| segment.is_empty()) {
        return Err(ConfigError::EmptyKey);
    }
    let leaf = segments.pop().ok_or(ConfigError::EmptyKey)?;
    Ok((segments, leaf))
}

fn default_settings() -> Vec<(&'static str, Value)> {
    vec![
        ("subscriptions.max_priority", Value::Int(default_max_priority())),
        ("subscriptions.default_priority", Value::from(default_priority())),
        ("publishers.local_queue.publisher_queue", Value::from(default_publisher_queue())),
        ("publishers.supervised_async.publisher_queue", Value::from(default_publisher_queue())),
        ("publishers.supervised_async.restart_limit", Value::Int(default_restart_limit())),
        ("publishers.supervised_async.restart_delay_ms", Value::Int(default_restart_delay_ms())),
        ("publishers.remote_queue.queue", Value::from(default_publisher_queue())),
        ("publishers.remote_queue.namespace", Value::from(default_remote_namespace())),
        ("plugins.logging.level", Value::from(default_log_level())),
        ("plugins.logging.log_errors", Value::Bool(true)),
    ]
}

pub fn default_max_priority() -> i64 {
    10
}

fn default_priority() -> &'static str {
    "medium"
}

fn default_publisher_queue() -> &'static str {
    "publisher"
}

fn default_restart_limit() -> i64 {
    5
}

fn default_restart_delay_ms() -> i64 {
    1
}

fn default_remote_namespace() -> &'static str {
    "resque"
}

fn default_log_level() -> &'static str {
    "debug"
}
