use thiserror::Error;

use crate::config::ConfigError;
use crate::envelope::EnvelopeError;
use crate::event::EventError;
use crate::instance::InstanceError;
use crate::plugin::PluginError;
use crate::publisher::PublisherError;
use crate::queue::QueueError;
use crate::subscription::SubscriptionError;

/// Failure raised by user supplied handlers and callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Instance error: {0}")]
    Instance(#[from] InstanceError),
    #[error("Event error: {0}")]
    Event(#[from] EventError),
    #[error("Subscription error: {0}")]
    Subscription(#[from] SubscriptionError),
    #[error("Publisher error: {0}")]
    Publisher(#[from] PublisherError),
    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),
    #[error("Serialization error: {0}")]
    Envelope(#[from] EnvelopeError),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Error::Internal(message.into())
    }
}
