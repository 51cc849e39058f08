use std::{collections::BTreeMap, fmt, sync::Arc};

use thiserror::Error;
use tracing::instrument;

use crate::{
    envelope::{self, fixed_parts, invalid_parts, BusObject, EnvelopeError, Packed, Part, Serializable},
    error::Result,
    instance::{Instance, InstanceError},
    plugin::Operation,
    subscription::Subscription,
    value::Value,
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EventError {
    #[error("missing event name")]
    InvalidName,
    #[error("event parameters must be a map, got {0}")]
    InvalidParams(String),
    #[error("unsafe value for key {key}: {value}")]
    UnsafeValue { key: String, value: String },
}

/// A named payload published against one [`Instance`].
///
/// Params are sanitized at construction and never change afterwards. Cloning
/// an event shares the same frozen params.
#[derive(Clone)]
pub struct Event {
    name: String,
    params: Arc<BTreeMap<String, Value>>,
    instance: Arc<Instance>,
}

impl Event {
    /// `params` must be a map (or null for no params). Every nested value must
    /// be plain data, otherwise the offending key is reported.
    pub fn new(
        instance: &Arc<Instance>,
        name: impl Into<String>,
        params: impl Into<Value>,
    ) -> std::result::Result<Self, EventError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(EventError::InvalidName);
        }

        let params = match params.into() {
            Value::Map(map) => sanitize_params(map)?,
            Value::Null => BTreeMap::new(),
            other => return Err(EventError::InvalidParams(other.describe())),
        };

        Ok(Self {
            name,
            params: Arc::new(params),
            instance: Arc::clone(instance),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &BTreeMap<String, Value> {
        &self.params
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    /// Current subscriptions to this event's name, in priority order.
    pub fn subscriptions(&self) -> Vec<Arc<Subscription>> {
        self.instance.subscriptions_to(&self.name)
    }

    /// Fans the event out to every publisher of the owning instance, inside
    /// the `publish` plugin hook. The first failing publisher stops the round.
    #[instrument(level = "debug", skip(self), fields(event = %self.name))]
    pub fn publish(&self) -> Result<()> {
        let publishers = self.instance.publishers();
        if publishers.is_empty() {
            return Err(InstanceError::NoPublishersDefined.into());
        }

        self.instance
            .plugins()
            .perform(Operation::Publish(self), &|| -> Result<()> {
                for publisher in publishers.iter() {
                    publisher.publish(self)?;
                }
                Ok(())
            })
    }

    pub fn deserialize(encoded: &str) -> Result<Self> {
        Ok(envelope::deserialize(encoded)?.into_event()?)
    }

    pub(crate) fn from_parts(parts: Vec<Part<BusObject>>) -> Result<BusObject> {
        let [name, instance, params] = fixed_parts::<_, 3>(Self::TYPE_TAG, parts)?;

        let name = match name.into_value(Self::TYPE_TAG)? {
            Packed::Ident(name) | Packed::Str(name) => name,
            _ => return Err(invalid_parts(Self::TYPE_TAG, "name must be an identifier").into()),
        };
        let instance = instance.into_object(Self::TYPE_TAG)?.into_instance()?;
        let params = match params.into_value(Self::TYPE_TAG)? {
            map @ Packed::Map(_) => Value::from(map),
            _ => return Err(invalid_parts(Self::TYPE_TAG, "params must be a map").into()),
        };

        Ok(BusObject::Event(Event::new(&instance, name, params)?))
    }
}

impl Serializable for Event {
    const TYPE_TAG: &'static str = "Event";

    fn fields(&self) -> std::result::Result<Vec<Packed>, EnvelopeError> {
        let params = self
            .params
            .iter()
            .map(|(key, value)| Packed::try_from(value).map(|v| (key.clone(), v)))
            .collect::<std::result::Result<_, _>>()?;
        Ok(vec![
            Packed::ident(&self.name),
            self.instance.package()?,
            Packed::Map(params),
        ])
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && Arc::ptr_eq(&self.instance, &other.instance)
            && self.params == other.params
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.params.is_empty() {
            write!(f, "Event({})", self.name)
        } else {
            write!(f, "Event({}, {})", self.name, Value::Map((*self.params).clone()))
        }
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("name", &self.name)
            .field("instance", &self.instance.name())
            .field("params", &self.params)
            .finish()
    }
}

fn sanitize_params(
    params: BTreeMap<String, Value>,
) -> std::result::Result<BTreeMap<String, Value>, EventError> {
    params
        .into_iter()
        .map(|(key, value)| {
            let value = sanitize_value(&key, value)?;
            Ok((key, value))
        })
        .collect()
}

// Nested list items report the key of the map holding the list.
fn sanitize_value(key: &str, value: Value) -> std::result::Result<Value, EventError> {
    match value {
        Value::Null
        | Value::Bool(_)
        | Value::Int(_)
        | Value::Float(_)
        | Value::String(_)
        | Value::Ident(_) => Ok(value),
        Value::List(items) => items
            .into_iter()
            .map(|item| sanitize_value(key, item))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(Value::List),
        Value::Map(map) => sanitize_params(map).map(Value::Map),
        other => Err(EventError::UnsafeValue {
            key: key.to_string(),
            value: other.describe(),
        }),
    }
}
