use std::sync::{Arc, Weak};

use tracing::instrument;

use super::{ensure_instance, Publisher, PublisherError, PublisherKind, DEFAULT_PUBLISHER_QUEUE};
use crate::{
    config::Config,
    envelope::Serializable,
    error::Result,
    event::Event,
    instance::Instance,
    queue::{Job, RemoteStore, StoreCommand},
    value::Value,
};

const DEFAULT_NAMESPACE: &str = "resque";

/// Pushes a `PublisherJob` straight onto a remote list store.
///
/// One atomic batch per event: `RPUSH queue:{queue} {"class":..,"args":[..]}`
/// and `SADD queues {queue}`.
///
/// Settings (`publishers.remote_queue.*`):
/// - `store`: a [`RemoteStore`] handle, used as is
/// - `url`: a redis URL, used when no `store` is given; keys are prefixed
///   with `namespace` (`resque` by default)
/// - `queue`: target queue name, `publisher` by default
pub struct RemoteQueuePublisher {
    instance: Weak<Instance>,
    store: Arc<dyn RemoteStore>,
    queue: String,
}

impl RemoteQueuePublisher {
    pub fn new(
        instance: &Arc<Instance>,
        config: &Config,
    ) -> std::result::Result<Self, PublisherError> {
        Ok(Self {
            instance: Arc::downgrade(instance),
            store: store_from_config(config)?,
            queue: config
                .get_str("queue")
                .unwrap_or(DEFAULT_PUBLISHER_QUEUE)
                .to_string(),
        })
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }
}

fn store_from_config(config: &Config) -> std::result::Result<Arc<dyn RemoteStore>, PublisherError> {
    if let Some(handle) = config.value("store").and_then(Value::as_opaque) {
        return handle
            .downcast_ref::<Arc<dyn RemoteStore>>()
            .cloned()
            .ok_or_else(|| PublisherError::RemoteStoreUnavailable(handle.type_name().to_string()));
    }

    match config.get_str("url") {
        Some(url) => {
            let namespace = config.get_str("namespace").unwrap_or(DEFAULT_NAMESPACE);
            connect(url, namespace)
        }
        None => Err(PublisherError::MissingRemoteStore),
    }
}

#[cfg(feature = "redis")]
fn connect(url: &str, namespace: &str) -> std::result::Result<Arc<dyn RemoteStore>, PublisherError> {
    use crate::queue::{NamespacedStore, RedisStore};

    let redis: Arc<dyn RemoteStore> = Arc::new(
        RedisStore::open(url).map_err(|e| PublisherError::RemoteStoreUnavailable(e.to_string()))?,
    );
    Ok(Arc::new(NamespacedStore::new(namespace, redis)))
}

#[cfg(not(feature = "redis"))]
fn connect(url: &str, _namespace: &str) -> std::result::Result<Arc<dyn RemoteStore>, PublisherError> {
    Err(PublisherError::RemoteStoreUnavailable(format!(
        "{url}: built without the redis feature"
    )))
}

impl Publisher for RemoteQueuePublisher {
    fn kind(&self) -> PublisherKind {
        PublisherKind::RemoteQueue
    }

    #[instrument(level = "debug", skip_all, fields(event = %event.name(), queue = %self.queue))]
    fn publish(&self, event: &Event) -> Result<()> {
        ensure_instance(&self.instance, event)?;

        let payload = Job::publisher(event.serialize()?, None)
            .to_json()
            .map_err(PublisherError::from)?;
        self.store
            .atomic(vec![
                StoreCommand::RPush {
                    key: format!("queue:{}", self.queue),
                    value: payload,
                },
                StoreCommand::SAdd {
                    key: "queues".to_string(),
                    member: self.queue.clone(),
                },
            ])
            .map_err(PublisherError::from)?;
        Ok(())
    }
}
