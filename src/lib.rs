//! # Herald: an embeddable event bus
//!
//! Producers publish named events with structured params; consumers register
//! priority ordered subscriptions; delivery goes through pluggable backends,
//! from synchronous in-process dispatch to queued and supervised delivery.
//!
//! ## Building blocks
//!
//! - Settings tree ([`config`]) parameterizing everything below
//! - Versioned envelope codec ([`envelope`]) rebuilding objects across processes
//! - Events ([`event`]) and subscriptions ([`subscription`])
//! - Delivery backends ([`publisher`]) and their queue collaborators ([`queue`])
//! - Around hooks wrapping every delivery point ([`plugin`])
//! - Named instances tying it together ([`instance`])
//!
//! ## Flow
//!
//! ```text
//! Instance::publish → publish hooks → Publisher::publish
//!     → Subscription::handle                       (synchronous)
//!     → serialize → job queue → perform → handle   (deferred)
//! ```
//!
//! ## Example
//!
//! ```
//! use herald::{SubscribeOptions, Value};
//!
//! let bus = herald::instance("docs").unwrap();
//! bus.configure(|config| Ok(config.add("publish_to", "subscriptions")?))
//!     .unwrap();
//! bus.subscribe_to("greeted", SubscribeOptions::new().priority("high"), |event| {
//!     println!("hello {:?}", event.get("who"));
//!     Ok(())
//! })
//! .unwrap();
//!
//! bus.publish("greeted", Value::map([("who", Value::from("world"))]))
//!     .unwrap();
//! ```

use std::sync::Arc;

pub mod config;
pub mod envelope;
pub mod error;
pub mod event;
pub mod instance;
pub mod plugin;
pub mod publisher;
pub mod queue;
pub mod subscription;
pub mod value;

// Re-exports
pub use config::{Config, ConfigError};
pub use envelope::Serializable;
pub use error::*;
pub use event::{Event, EventError};
pub use instance::{Instance, InstanceError, InstanceRegistry};
pub use plugin::{Plugin, PluginChain};
pub use publisher::{Publisher, PublisherKind};
pub use subscription::{SubscribeOptions, Subscription};
pub use value::Value;

pub const PRIMARY_INSTANCE: &str = "primary";

/// Looks up the instance named `name`, creating it on first reference.
pub fn instance(name: &str) -> Result<Arc<Instance>> {
    Ok(InstanceRegistry::global().get_or_create(name)?)
}

/// The default instance.
pub fn primary() -> Result<Arc<Instance>> {
    instance(PRIMARY_INSTANCE)
}
