use std::sync::{Arc, Weak};

use tracing::instrument;

use super::{ensure_instance, Publisher, PublisherKind};
use crate::{error::Result, event::Event, instance::Instance};

/// Handles every matching subscription on the calling thread, in priority
/// order. The first failing subscription stops delivery of the event.
pub struct SubscriptionsPublisher {
    instance: Weak<Instance>,
}

impl SubscriptionsPublisher {
    pub fn new(instance: &Arc<Instance>) -> Self {
        Self {
            instance: Arc::downgrade(instance),
        }
    }
}

impl Publisher for SubscriptionsPublisher {
    fn kind(&self) -> PublisherKind {
        PublisherKind::Subscriptions
    }

    #[instrument(level = "debug", skip_all, fields(event = %event.name()))]
    fn publish(&self, event: &Event) -> Result<()> {
        ensure_instance(&self.instance, event)?;
        for subscription in event.subscriptions() {
            subscription.handle(event)?;
        }
        Ok(())
    }
}
