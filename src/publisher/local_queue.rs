use std::sync::{Arc, Weak};

use tracing::{debug, instrument};

use super::{ensure_instance, Publisher, PublisherError, PublisherKind, QueueDestination};
use crate::{
    config::Config, envelope::Serializable, error::Result, event::Event, instance::Instance,
    queue::Job,
};

/// Enqueues a `PublisherJob` for each event on the configured job queue.
///
/// Settings (`publishers.local_queue.*`):
/// - `job_queue`: the [`JobQueue`](crate::queue::JobQueue) handle, required
/// - `publisher_queue`: queue of the `PublisherJob`, `publisher` by default
/// - `subscription_queue_formatter`: hook choosing each `SubscriptionJob` queue
pub struct LocalQueuePublisher {
    instance: Weak<Instance>,
    destination: QueueDestination,
}

impl LocalQueuePublisher {
    pub fn new(
        instance: &Arc<Instance>,
        config: &Config,
    ) -> std::result::Result<Self, PublisherError> {
        Ok(Self {
            instance: Arc::downgrade(instance),
            destination: QueueDestination::from_config(PublisherKind::LocalQueue, config)?,
        })
    }
}

impl Publisher for LocalQueuePublisher {
    fn kind(&self) -> PublisherKind {
        PublisherKind::LocalQueue
    }

    #[instrument(level = "debug", skip_all, fields(event = %event.name()))]
    fn publish(&self, event: &Event) -> Result<()> {
        ensure_instance(&self.instance, event)?;

        if event.subscriptions().is_empty() {
            debug!("no subscriptions to {}, skipping enqueue", event.name());
            return Ok(());
        }

        let job = Job::publisher(event.serialize()?, None);
        self.destination
            .job_queue()
            .enqueue(self.destination.publisher_queue(), job)
            .map_err(PublisherError::from)?;
        Ok(())
    }

    fn destination(&self) -> Option<&QueueDestination> {
        Some(&self.destination)
    }
}
