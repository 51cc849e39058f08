use std::sync::{Arc, Weak};

use tracing::instrument;

use super::{ensure_instance, EventCallback, Publisher, PublisherError, PublisherKind};
use crate::{config::Config, error::Result, event::Event, instance::Instance, value::Value};

/// Calls one callback synchronously for every event.
pub struct InlineCallbackPublisher {
    instance: Weak<Instance>,
    callback: EventCallback,
}

impl InlineCallbackPublisher {
    pub fn new(instance: &Arc<Instance>, callback: EventCallback) -> Self {
        Self {
            instance: Arc::downgrade(instance),
            callback,
        }
    }

    /// Reads the callback from the `handler` setting.
    pub fn from_config(
        instance: &Arc<Instance>,
        config: &Config,
    ) -> std::result::Result<Self, PublisherError> {
        let callback = match config.value("handler") {
            None | Some(Value::Null) => return Err(PublisherError::MissingHandler),
            Some(Value::Opaque(handle)) => handle
                .downcast_ref::<EventCallback>()
                .cloned()
                .ok_or(PublisherError::InvalidArity)?,
            Some(_) => return Err(PublisherError::InvalidArity),
        };
        Ok(Self::new(instance, callback))
    }
}

impl Publisher for InlineCallbackPublisher {
    fn kind(&self) -> PublisherKind {
        PublisherKind::InlineCallback
    }

    #[instrument(level = "debug", skip_all, fields(event = %event.name()))]
    fn publish(&self, event: &Event) -> Result<()> {
        ensure_instance(&self.instance, event)?;
        (self.callback)(event).map_err(|e| PublisherError::CallbackFailed(e).into())
    }
}
