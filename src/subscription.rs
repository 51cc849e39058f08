//! # Subscriptions
//!
//! A subscription binds a handler to an event name on one instance. Delivery
//! order is by priority, lowest number first; equal priorities keep their
//! registration order.
//!
//! Each subscription carries a *locator*: a digest of the subscribing source
//! file, the event name and the optional subscription name. The line number is
//! left out so that moving code around does not change it. A worker process
//! that registers the same subscriptions gets the same locators, which is how
//! a serialized subscription is resolved against the live registry.

use std::{
    fmt,
    str::FromStr,
    sync::{Arc, Weak},
};

use thiserror::Error;
use tracing::instrument;

use crate::{
    config::{default_max_priority, Config},
    envelope::{self, fixed_parts, invalid_parts, BusObject, EnvelopeError, Packed, Part, Serializable},
    error::{BoxError, Error, Result},
    event::Event,
    instance::Instance,
    plugin::Operation,
    value::Value,
};

#[derive(Error, Debug)]
pub enum SubscriptionError {
    #[error("invalid priority: {0}")]
    InvalidPriority(String),
    #[error("duplicate locator: {0}")]
    DuplicateLocator(String),
    #[error("unexpected event: {0}")]
    UnexpectedEvent(String),
    #[error("no subscription with locator: {0}")]
    UnknownLocator(String),
    #[error("{subscription} failed: {source}")]
    HandlerFailed {
        subscription: String,
        #[source]
        source: BoxError,
    },
    #[error("owning instance no longer exists")]
    InstanceDropped,
}

pub type Handler = Arc<dyn Fn(&Event) -> std::result::Result<(), BoxError> + Send + Sync>;

/// Symbolic priorities, resolved against the configured maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumString, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum PrioritySymbol {
    Highest,
    High,
    Medium,
    Low,
    Lowest,
}

impl PrioritySymbol {
    pub fn resolve(self, max_priority: i64) -> i64 {
        let highest = 1;
        let lowest = max_priority;
        let medium = ceil_half(lowest);
        match self {
            PrioritySymbol::Highest => highest,
            PrioritySymbol::High => ceil_half(medium),
            PrioritySymbol::Medium => medium,
            PrioritySymbol::Low => ceil_half(lowest + medium),
            PrioritySymbol::Lowest => lowest,
        }
    }
}

fn ceil_half(n: i64) -> i64 {
    (n + 1) / 2
}

/// Resolves an explicit, symbolic or absent priority against the
/// `subscriptions.*` settings.
pub fn resolve_priority(
    priority: &Value,
    config: &Config,
) -> std::result::Result<i64, SubscriptionError> {
    let max_priority = config
        .get_i64("subscriptions.max_priority")
        .unwrap_or_else(default_max_priority);

    match priority {
        Value::Int(p) if (1..=max_priority).contains(p) => Ok(*p),
        Value::Int(p) => Err(SubscriptionError::InvalidPriority(p.to_string())),
        Value::String(symbol) | Value::Ident(symbol) => PrioritySymbol::from_str(symbol)
            .map(|symbol| symbol.resolve(max_priority))
            .map_err(|_| SubscriptionError::InvalidPriority(format!(":{symbol}"))),
        Value::Null => match config.value("subscriptions.default_priority") {
            Some(default) if !default.is_null() => resolve_priority(default, config),
            _ => Err(SubscriptionError::InvalidPriority("null".to_string())),
        },
        other => Err(SubscriptionError::InvalidPriority(other.describe())),
    }
}

/// Locator derived from the subscribing file, the event name and the
/// subscription name.
pub fn locator_for(file: &str, event_name: &str, name: Option<&str>) -> String {
    let source = format!("{file}:{event_name}:{}", name.unwrap_or_default());
    blake3::hash(source.as_bytes()).to_hex().to_string()
}

#[derive(Clone, Debug, Default)]
pub struct SubscribeOptions {
    pub name: Option<String>,
    pub priority: Value,
}

impl SubscribeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn priority(mut self, priority: impl Into<Value>) -> Self {
        self.priority = priority.into();
        self
    }
}

pub struct Subscription {
    event_name: String,
    name: Option<String>,
    priority: i64,
    locator: String,
    path: String,
    handler: Handler,
    instance: Weak<Instance>,
}

impl Subscription {
    pub(crate) fn new(
        instance: &Arc<Instance>,
        event_name: &str,
        options: SubscribeOptions,
        caller: &std::panic::Location<'_>,
        handler: Handler,
    ) -> std::result::Result<Self, SubscriptionError> {
        let priority = instance.with_config(|config| resolve_priority(&options.priority, config))?;
        let locator = locator_for(caller.file(), event_name, options.name.as_deref());

        Ok(Self {
            event_name: event_name.to_string(),
            name: options.name,
            priority,
            locator,
            path: format!("{}:{}", caller.file(), caller.line()),
            handler,
            instance: Arc::downgrade(instance),
        })
    }

    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn priority(&self) -> i64 {
        self.priority
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    pub fn instance(&self) -> std::result::Result<Arc<Instance>, SubscriptionError> {
        self.instance
            .upgrade()
            .ok_or(SubscriptionError::InstanceDropped)
    }

    /// Runs the handler for `event` inside the `subscription` plugin hook.
    #[instrument(level = "debug", skip_all, fields(subscription = %self))]
    pub fn handle(&self, event: &Event) -> Result<()> {
        if event.name() != self.event_name {
            return Err(SubscriptionError::UnexpectedEvent("wrong name".to_string()).into());
        }
        let instance = self.instance()?;
        if !Arc::ptr_eq(&instance, event.instance()) {
            return Err(SubscriptionError::UnexpectedEvent("wrong instance".to_string()).into());
        }

        instance
            .plugins()
            .perform(Operation::Subscription(self, event), &|| -> Result<()> {
                (self.handler)(event).map_err(|source| {
                    Error::from(SubscriptionError::HandlerFailed {
                        subscription: self.to_string(),
                        source,
                    })
                })
            })
    }

    pub fn deserialize(encoded: &str) -> Result<Arc<Self>> {
        Ok(envelope::deserialize(encoded)?.into_subscription()?)
    }

    pub(crate) fn from_parts(parts: Vec<Part<BusObject>>) -> Result<BusObject> {
        let [instance, locator] = fixed_parts::<_, 2>(Self::TYPE_TAG, parts)?;

        let instance = instance.into_object(Self::TYPE_TAG)?.into_instance()?;
        let locator = match locator.into_value(Self::TYPE_TAG)? {
            Packed::Str(locator) | Packed::Ident(locator) => locator,
            _ => return Err(invalid_parts(Self::TYPE_TAG, "locator must be a string").into()),
        };

        instance
            .find_subscription(&locator)
            .map(BusObject::Subscription)
            .ok_or_else(|| SubscriptionError::UnknownLocator(locator).into())
    }

    /// Settings handed to a subscription queue formatter.
    pub(crate) fn describe(&self) -> Value {
        Value::map([
            ("event_name", Value::from(self.event_name.as_str())),
            ("name", Value::from(self.name.clone())),
            ("priority", Value::Int(self.priority)),
            ("locator", Value::from(self.locator.as_str())),
        ])
    }
}

impl Serializable for Subscription {
    const TYPE_TAG: &'static str = "Subscription";

    fn fields(&self) -> std::result::Result<Vec<Packed>, EnvelopeError> {
        let instance = match self.instance.upgrade() {
            Some(instance) => instance.package()?,
            None => Packed::Null,
        };
        Ok(vec![instance, Packed::Str(self.locator.clone())])
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = self.name.as_deref().unwrap_or(&self.path);
        write!(f, "Subscription(on {}: {})", self.event_name, label)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("event_name", &self.event_name)
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("locator", &self.locator)
            .finish()
    }
}
