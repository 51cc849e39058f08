//! # Publishers
//!
//! A publisher is a delivery backend invoked for every event an instance
//! publishes. Backends are resolved from the `publish_to` list when the
//! instance configuration is first committed:
//!
//! | selector           | backend                                  |
//! |--------------------|------------------------------------------|
//! | `inline_callback`  | one callback, called synchronously       |
//! | `subscriptions`    | every subscription, synchronously        |
//! | `local_queue`      | a [`JobQueue`] two-stage delivery        |
//! | `remote_queue`     | a [`RemoteStore`](crate::queue::RemoteStore) list push |
//! | `supervised_async` | a supervised background worker           |
//!
//! A selector may be paired with params (`[selector, {params}]`) which are
//! merged over the backend's `publishers.<selector>` settings. A callback
//! created with [`callback`] is also a valid selector.

mod inline_callback;
mod local_queue;
mod remote_queue;
mod subscriptions;
mod supervised_async;

use std::{
    str::FromStr,
    sync::{Arc, Weak},
};

use thiserror::Error;

pub use inline_callback::InlineCallbackPublisher;
pub use local_queue::LocalQueuePublisher;
pub use remote_queue::RemoteQueuePublisher;
pub use subscriptions::SubscriptionsPublisher;
pub use supervised_async::SupervisedAsyncPublisher;

use crate::{
    config::Config,
    error::{BoxError, Result},
    event::Event,
    instance::Instance,
    queue::{JobQueue, QueueError},
    subscription::Subscription,
    value::{Hook, Value},
};

const DEFAULT_PUBLISHER_QUEUE: &str = "publisher";

#[derive(Error, Debug)]
pub enum PublisherError {
    #[error("Event for different instance")]
    WrongInstance,
    #[error("invalid publisher: {0}")]
    InvalidPublisher(String),
    #[error("invalid publisher name: {0}")]
    InvalidPublisherName(String),
    #[error("missing handler")]
    MissingHandler,
    #[error("handler must take exactly one event")]
    InvalidArity,
    #[error("cannot have multiple {0} publishers in an instance")]
    DuplicateBackend(String),
    #[error("missing job queue for {0}")]
    MissingJobQueue(String),
    #[error("missing remote store configuration")]
    MissingRemoteStore,
    #[error("remote store unavailable: {0}")]
    RemoteStoreUnavailable(String),
    #[error("Invalid subscription_queue_formatter: {0}")]
    InvalidQueueFormatter(String),
    #[error("No {0} publisher found")]
    MissingQueuePublisher(String),
    #[error("callback failed: {0}")]
    CallbackFailed(#[source] BoxError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumString, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum PublisherKind {
    InlineCallback,
    Subscriptions,
    LocalQueue,
    RemoteQueue,
    SupervisedAsync,
}

impl PublisherKind {
    /// Queue-style backends model a single destination per instance.
    pub fn is_singleton(self) -> bool {
        matches!(
            self,
            PublisherKind::LocalQueue | PublisherKind::RemoteQueue | PublisherKind::SupervisedAsync
        )
    }
}

pub trait Publisher: Send + Sync {
    fn kind(&self) -> PublisherKind;

    fn publish(&self, event: &Event) -> Result<()>;

    /// Where queued events are expanded into subscription jobs, for backends
    /// that enqueue `PublisherJob`s.
    fn destination(&self) -> Option<&QueueDestination> {
        None
    }
}

pub type EventCallback =
    Arc<dyn Fn(&Event) -> std::result::Result<(), BoxError> + Send + Sync>;

/// Wraps a closure as a `publish_to` selector or an `inline_callback` handler.
pub fn callback<F>(f: F) -> Value
where
    F: Fn(&Event) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
{
    let callback: EventCallback = Arc::new(f);
    Value::opaque(callback)
}

pub(crate) fn ensure_instance(
    bound: &Weak<Instance>,
    event: &Event,
) -> std::result::Result<(), PublisherError> {
    if std::ptr::eq(bound.as_ptr(), Arc::as_ptr(event.instance())) {
        Ok(())
    } else {
        Err(PublisherError::WrongInstance)
    }
}

/// Chooses the queue of each `SubscriptionJob`.
#[derive(Clone, Debug)]
pub enum QueueFormatter {
    /// `subscriptions_p{priority}`
    Priority,
    Hook(Hook),
}

impl QueueFormatter {
    /// Reads `subscription_queue_formatter`. A hook list uses its last hook.
    pub fn from_config(config: &Config) -> std::result::Result<Self, PublisherError> {
        match config.value("subscription_queue_formatter") {
            None | Some(Value::Null) => Ok(QueueFormatter::Priority),
            Some(Value::Hook(hook)) => Ok(QueueFormatter::Hook(hook.clone())),
            Some(Value::Hooks(hooks)) => hooks
                .last()
                .cloned()
                .map(QueueFormatter::Hook)
                .ok_or_else(|| PublisherError::InvalidQueueFormatter("empty hook list".into())),
            Some(other) => Err(PublisherError::InvalidQueueFormatter(other.describe())),
        }
    }

    /// The hook receives `{event_name, name, priority, locator}` and must
    /// return a string.
    pub fn queue_for(
        &self,
        subscription: &Subscription,
    ) -> std::result::Result<String, PublisherError> {
        match self {
            QueueFormatter::Priority => Ok(format!("subscriptions_p{}", subscription.priority())),
            QueueFormatter::Hook(hook) => match hook.call(&subscription.describe()) {
                Value::String(queue) | Value::Ident(queue) => Ok(queue),
                other => Err(PublisherError::InvalidQueueFormatter(other.describe())),
            },
        }
    }
}

/// Job queue and queue names shared by the queue-style backends.
#[derive(Clone)]
pub struct QueueDestination {
    job_queue: Arc<dyn JobQueue>,
    publisher_queue: String,
    formatter: QueueFormatter,
}

impl QueueDestination {
    pub fn from_config(
        kind: PublisherKind,
        config: &Config,
    ) -> std::result::Result<Self, PublisherError> {
        let job_queue = config
            .value("job_queue")
            .and_then(Value::as_opaque)
            .and_then(|handle| handle.downcast_ref::<Arc<dyn JobQueue>>())
            .cloned()
            .ok_or_else(|| PublisherError::MissingJobQueue(kind.to_string()))?;

        Ok(Self {
            job_queue,
            publisher_queue: config
                .get_str("publisher_queue")
                .unwrap_or(DEFAULT_PUBLISHER_QUEUE)
                .to_string(),
            formatter: QueueFormatter::from_config(config)?,
        })
    }

    pub fn job_queue(&self) -> &Arc<dyn JobQueue> {
        &self.job_queue
    }

    pub fn publisher_queue(&self) -> &str {
        &self.publisher_queue
    }

    pub fn subscription_queue(
        &self,
        subscription: &Subscription,
    ) -> std::result::Result<String, PublisherError> {
        self.formatter.queue_for(subscription)
    }
}

enum Target {
    Kind(PublisherKind),
    Callback(EventCallback),
}

/// Resolves the `publish_to` list of `config` into backends bound to
/// `instance`, in listed order.
pub(crate) fn load(instance: &Arc<Instance>, config: &Config) -> Result<Vec<Arc<dyn Publisher>>> {
    let selectors = match config.value("publish_to") {
        Some(Value::List(selectors)) => selectors.clone(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![other.clone()],
    };

    let mut publishers: Vec<Arc<dyn Publisher>> = Vec::with_capacity(selectors.len());
    for selector in &selectors {
        let (target, params) = resolve(selector)?;
        let publisher: Arc<dyn Publisher> = match target {
            Target::Callback(callback) => {
                Arc::new(InlineCallbackPublisher::new(instance, callback))
            }
            Target::Kind(kind) => {
                if kind.is_singleton() && publishers.iter().any(|p| p.kind() == kind) {
                    return Err(PublisherError::DuplicateBackend(kind.to_string()).into());
                }
                let settings = config.scoped(&format!("publishers.{kind}"), &params)?;
                build(kind, instance, &settings)?
            }
        };
        publishers.push(publisher);
    }
    Ok(publishers)
}

fn resolve(selector: &Value) -> std::result::Result<(Target, Value), PublisherError> {
    match selector {
        Value::String(name) | Value::Ident(name) => {
            let kind = PublisherKind::from_str(name)
                .map_err(|_| PublisherError::InvalidPublisherName(name.clone()))?;
            Ok((Target::Kind(kind), Value::Null))
        }
        Value::List(pair) => match pair.as_slice() {
            [inner] => resolve(inner),
            [inner, params] => {
                let (target, _) = resolve(inner)?;
                Ok((target, params.clone()))
            }
            _ => Err(PublisherError::InvalidPublisher(selector.to_string())),
        },
        Value::Opaque(handle) => handle
            .downcast_ref::<EventCallback>()
            .cloned()
            .map(|callback| (Target::Callback(callback), Value::Null))
            .ok_or_else(|| PublisherError::InvalidPublisher(selector.describe())),
        Value::Hook(_) => Err(PublisherError::InvalidArity),
        other => Err(PublisherError::InvalidPublisher(other.describe())),
    }
}

fn build(
    kind: PublisherKind,
    instance: &Arc<Instance>,
    settings: &Config,
) -> Result<Arc<dyn Publisher>> {
    Ok(match kind {
        PublisherKind::InlineCallback => {
            Arc::new(InlineCallbackPublisher::from_config(instance, settings)?)
        }
        PublisherKind::Subscriptions => Arc::new(SubscriptionsPublisher::new(instance)),
        PublisherKind::LocalQueue => Arc::new(LocalQueuePublisher::new(instance, settings)?),
        PublisherKind::RemoteQueue => Arc::new(RemoteQueuePublisher::new(instance, settings)?),
        PublisherKind::SupervisedAsync => {
            Arc::new(SupervisedAsyncPublisher::new(instance, settings)?)
        }
    })
}
