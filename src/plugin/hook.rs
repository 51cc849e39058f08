use super::{Next, Plugin};
use crate::{error::Result, event::Event, subscription::Subscription};

type EventHook = Box<dyn Fn(&Event, Next<'_>) -> Result<()> + Send + Sync>;
type SubscriptionHook = Box<dyn Fn(&Subscription, &Event, Next<'_>) -> Result<()> + Send + Sync>;

/// A plugin assembled from closures. Operation points without a closure pass
/// straight through.
///
/// ```rust
/// use herald::plugin::HookPlugin;
///
/// let plugin = HookPlugin::new("audit").around_publish(|event, next| {
///     tracing::info!("about to publish {}", event);
///     next.run()
/// });
/// ```
pub struct HookPlugin {
    name: String,
    publish: Option<EventHook>,
    queue_publish: Option<EventHook>,
    subscription: Option<SubscriptionHook>,
}

impl HookPlugin {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            publish: None,
            queue_publish: None,
            subscription: None,
        }
    }

    pub fn around_publish<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Event, Next<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.publish = Some(Box::new(hook));
        self
    }

    pub fn around_queue_publish<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Event, Next<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.queue_publish = Some(Box::new(hook));
        self
    }

    pub fn around_subscription<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Subscription, &Event, Next<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.subscription = Some(Box::new(hook));
        self
    }
}

impl Plugin for HookPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn around_publish(&self, event: &Event, next: Next<'_>) -> Result<()> {
        match &self.publish {
            Some(hook) => hook(event, next),
            None => next.run(),
        }
    }

    fn around_queue_publish(&self, event: &Event, next: Next<'_>) -> Result<()> {
        match &self.queue_publish {
            Some(hook) => hook(event, next),
            None => next.run(),
        }
    }

    fn around_subscription(
        &self,
        subscription: &Subscription,
        event: &Event,
        next: Next<'_>,
    ) -> Result<()> {
        match &self.subscription {
            Some(hook) => hook(subscription, event, next),
            None => next.run(),
        }
    }
}
