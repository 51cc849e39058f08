use std::{str::FromStr, sync::Arc};

use tracing::{debug, instrument};

use super::{Job, JobClass, QueueError};
use crate::{
    envelope::Serializable,
    error::Result,
    event::Event,
    plugin::Operation,
    publisher::{PublisherError, PublisherKind},
    subscription::Subscription,
};

/// Worker entry point: rebuilds the job's objects and runs it.
#[instrument(level = "debug", skip(job), fields(class = %job.class))]
pub fn perform(job: &Job) -> Result<()> {
    match job.class {
        JobClass::PublisherJob => perform_publisher_job(&job.args),
        JobClass::SubscriptionJob => perform_subscription_job(&job.args),
    }
}

fn perform_publisher_job(args: &[String]) -> Result<()> {
    let (event, selector) = match args {
        [event] => (event, None),
        [event, selector] => (event, Some(selector)),
        _ => return Err(invalid_arguments(JobClass::PublisherJob, args.len()).into()),
    };
    let kind = match selector {
        Some(selector) => PublisherKind::from_str(selector)
            .map_err(|_| PublisherError::InvalidPublisherName(selector.clone()))?,
        None => PublisherKind::LocalQueue,
    };

    let event = Event::deserialize(event)?;
    let instance = Arc::clone(event.instance());
    let destination = instance
        .find_publisher(kind)
        .and_then(|publisher| publisher.destination().cloned())
        .ok_or_else(|| PublisherError::MissingQueuePublisher(kind.to_string()))?;

    instance
        .plugins()
        .perform(Operation::QueuePublish(&event), &|| -> Result<()> {
            let serialized_event = event.serialize()?;
            for subscription in event.subscriptions() {
                let queue = destination.subscription_queue(&subscription)?;
                debug!("enqueue {} on {}", subscription, queue);
                destination.job_queue().enqueue(
                    &queue,
                    Job::subscription(subscription.serialize()?, serialized_event.clone()),
                )?;
            }
            Ok(())
        })
}

fn perform_subscription_job(args: &[String]) -> Result<()> {
    let [subscription, event] = args else {
        return Err(invalid_arguments(JobClass::SubscriptionJob, args.len()).into());
    };

    let subscription = Subscription::deserialize(subscription)?;
    let event = Event::deserialize(event)?;
    subscription.handle(&event)
}

fn invalid_arguments(class: JobClass, found: usize) -> QueueError {
    QueueError::InvalidArguments {
        class: class.to_string(),
        reason: format!("unexpected argument count {found}"),
    }
}
