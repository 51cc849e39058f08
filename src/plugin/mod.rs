//! # Plugin Hook Chain
//!
//! Plugins wrap the three delivery points of the bus with *around* hooks:
//!
//! - `publish`: one event fanned out to every publisher
//! - `queue_publish`: a queued event being expanded into per-subscription jobs
//! - `subscription`: one subscription handling one event
//!
//! A hook receives the inner operation as a [`Next`] continuation and decides
//! whether and when to run it. Plugins nest in registration order, the first
//! registered plugin being the outermost.

mod hook;
mod logging;

use std::{str::FromStr, sync::Arc};

use thiserror::Error;

pub use hook::HookPlugin;
pub use logging::{LogLevel, LoggingPlugin};

use crate::{
    config::Config, error::Result, event::Event, subscription::Subscription, value::Value,
};

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("invalid plugin name: {0}")]
    InvalidPluginName(String),
    #[error("invalid plugin: {0}")]
    InvalidPlugin(String),
    #[error("Invalid plugins.logging.level: {0}")]
    InvalidLevel(String),
}

/// The inner operation handed to a hook. Consumed when run.
pub struct Next<'a> {
    inner: &'a dyn Fn() -> Result<()>,
}

impl<'a> Next<'a> {
    pub fn new(inner: &'a dyn Fn() -> Result<()>) -> Self {
        Self { inner }
    }

    pub fn run(self) -> Result<()> {
        (self.inner)()
    }
}

#[derive(Clone, Copy)]
pub enum Operation<'a> {
    Publish(&'a Event),
    QueuePublish(&'a Event),
    Subscription(&'a Subscription, &'a Event),
}

pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn around_publish(&self, _event: &Event, next: Next<'_>) -> Result<()> {
        next.run()
    }

    fn around_queue_publish(&self, _event: &Event, next: Next<'_>) -> Result<()> {
        next.run()
    }

    fn around_subscription(
        &self,
        _subscription: &Subscription,
        _event: &Event,
        next: Next<'_>,
    ) -> Result<()> {
        next.run()
    }
}

/// Built-in plugins addressable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumString, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum PluginKind {
    Logging,
}

#[derive(Clone, Default)]
pub struct PluginChain {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginChain {
    pub fn new(plugins: Vec<Arc<dyn Plugin>>) -> Self {
        Self { plugins }
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.plugins.iter().map(|p| p.name().to_string()).collect()
    }

    /// Runs `op` wrapped by every plugin's hook for `operation`.
    pub fn perform(&self, operation: Operation<'_>, op: &dyn Fn() -> Result<()>) -> Result<()> {
        nest(&self.plugins, operation, op)
    }
}

fn nest(
    plugins: &[Arc<dyn Plugin>],
    operation: Operation<'_>,
    op: &dyn Fn() -> Result<()>,
) -> Result<()> {
    let Some((outer, inner)) = plugins.split_first() else {
        return op();
    };

    let rest = || nest(inner, operation, op);
    let next = Next::new(&rest);
    match operation {
        Operation::Publish(event) => outer.around_publish(event, next),
        Operation::QueuePublish(event) => outer.around_queue_publish(event, next),
        Operation::Subscription(subscription, event) => {
            outer.around_subscription(subscription, event, next)
        }
    }
}

/// Wraps a plugin so it can be listed under the `plugin` config key.
pub fn handle(plugin: Arc<dyn Plugin>) -> Value {
    Value::opaque(plugin)
}

/// Resolves every selector listed under `plugin`.
///
/// A selector is a built-in name, a `[name, {params}]` pair, or a handle
/// created with [`handle`]. Built-ins read their settings from
/// `plugins.<name>` with the pair's params merged on top.
pub fn load(config: &Config) -> Result<PluginChain> {
    let selectors = match config.value("plugin") {
        Some(Value::List(selectors)) => selectors.clone(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![other.clone()],
    };

    let plugins = selectors
        .iter()
        .map(|selector| load_one(config, selector))
        .collect::<Result<Vec<_>>>()?;
    Ok(PluginChain::new(plugins))
}

fn load_one(config: &Config, selector: &Value) -> Result<Arc<dyn Plugin>> {
    match selector {
        Value::String(name) | Value::Ident(name) => load_named(config, name, &Value::Null),
        Value::List(pair) => match pair.as_slice() {
            [name, params] => match name.as_str() {
                Some(name) => load_named(config, name, params),
                None => Err(PluginError::InvalidPlugin(selector.to_string()).into()),
            },
            [name] => load_one(config, name),
            _ => Err(PluginError::InvalidPlugin(selector.to_string()).into()),
        },
        Value::Opaque(opaque) => opaque
            .downcast_ref::<Arc<dyn Plugin>>()
            .cloned()
            .ok_or_else(|| PluginError::InvalidPlugin(selector.describe()).into()),
        other => Err(PluginError::InvalidPlugin(other.describe()).into()),
    }
}

fn load_named(config: &Config, name: &str, params: &Value) -> Result<Arc<dyn Plugin>> {
    let kind =
        PluginKind::from_str(name).map_err(|_| PluginError::InvalidPluginName(name.to_string()))?;
    let settings = config.scoped(&format!("plugins.{kind}"), params)?;

    match kind {
        PluginKind::Logging => Ok(Arc::new(LoggingPlugin::from_config(&settings)?)),
    }
}
