//! # Instances
//!
//! An [`Instance`] is one named, independently configured bus. It owns its
//! config tree, its subscriptions and the publishers resolved from
//! `publish_to`. Instances live in a process-wide [`InstanceRegistry`] so
//! that a name always resolves to the same object, which is what lets an
//! event serialized in one process come back bound to the live instance in
//! another.

use std::{
    collections::HashMap,
    panic::Location,
    sync::{Arc, Mutex, OnceLock, PoisonError, RwLock},
};

use dashmap::{mapref::entry::Entry, DashMap};
use lazy_static::lazy_static;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::{
    config::Config,
    envelope::{fixed_parts, invalid_parts, BusObject, EnvelopeError, Packed, Part, Serializable},
    error::{BoxError, Result},
    event::Event,
    plugin::{self, PluginChain},
    publisher::{self, Publisher, PublisherKind},
    subscription::{SubscribeOptions, Subscription, SubscriptionError},
    value::Value,
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InstanceError {
    #[error("an instance named {0} already exists")]
    DuplicateName(String),
    #[error("No publishers defined")]
    NoPublishersDefined,
    #[error("instance name must not be empty")]
    Unnamed,
}

lazy_static! {
    static ref REGISTRY: InstanceRegistry = InstanceRegistry::default();
}

/// Name to instance map shared by the whole process.
///
/// Creation holds the registry lock across the check and the insert, so two
/// threads racing on the same name get one instance between them.
#[derive(Default)]
pub struct InstanceRegistry {
    instances: Mutex<HashMap<String, Arc<Instance>>>,
}

impl InstanceRegistry {
    pub fn global() -> &'static InstanceRegistry {
        &REGISTRY
    }

    pub fn get(&self, name: &str) -> Option<Arc<Instance>> {
        self.lock().get(name).cloned()
    }

    /// First reference wins.
    pub fn get_or_create(&self, name: &str) -> std::result::Result<Arc<Instance>, InstanceError> {
        let name = validate_name(name)?;
        let mut instances = self.lock();
        let instance = instances
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!("registering instance {}", name);
                Arc::new(Instance::new(name))
            });
        Ok(Arc::clone(instance))
    }

    pub fn create(&self, name: &str) -> std::result::Result<Arc<Instance>, InstanceError> {
        let name = validate_name(name)?;
        let mut instances = self.lock();
        if instances.contains_key(name) {
            return Err(InstanceError::DuplicateName(name.to_string()));
        }
        let instance = Arc::new(Instance::new(name));
        instances.insert(name.to_string(), Arc::clone(&instance));
        debug!("registering instance {}", name);
        Ok(instance)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<Instance>>> {
        self.instances.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn validate_name(name: &str) -> std::result::Result<&str, InstanceError> {
    let name = name.trim();
    if name.is_empty() {
        Err(InstanceError::Unnamed)
    } else {
        Ok(name)
    }
}

pub struct Instance {
    name: String,
    config: RwLock<Config>,
    publishers: OnceLock<Vec<Arc<dyn Publisher>>>,
    plugins: RwLock<PluginChain>,
    subscriptions: RwLock<HashMap<String, Vec<Arc<Subscription>>>>,
    locators: DashMap<String, Arc<Subscription>>,
}

impl Instance {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            config: RwLock::new(Config::with_defaults()),
            publishers: OnceLock::new(),
            plugins: RwLock::new(PluginChain::default()),
            subscriptions: RwLock::new(HashMap::new()),
            locators: DashMap::new(),
        }
    }

    /// Registers a new instance, failing if the name is taken.
    pub fn create(name: impl AsRef<str>) -> std::result::Result<Arc<Self>, InstanceError> {
        InstanceRegistry::global().create(name.as_ref())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mutates a copy of the config tree and commits it. The copy replaces
    /// the live tree only when both `f` and the commit succeed.
    ///
    /// Publishers are resolved from `publish_to` on the first commit that
    /// declares it and stay fixed afterwards. Plugins are resolved again on
    /// every commit. `f` must not call back into this instance's config.
    #[instrument(level = "debug", skip(self, f), fields(instance = %self.name))]
    pub fn configure<F>(self: &Arc<Self>, f: F) -> Result<()>
    where
        F: FnOnce(&mut Config) -> Result<()>,
    {
        let mut config = self.config.write().unwrap_or_else(PoisonError::into_inner);
        let mut draft = config.deep_copy();
        f(&mut draft)?;
        self.commit(&draft)?;
        *config = draft;
        Ok(())
    }

    /// Appends a plugin selector and commits.
    pub fn plugin(self: &Arc<Self>, selector: impl Into<Value>) -> Result<()> {
        let selector = selector.into();
        self.configure(|config| Ok(config.add("plugin", selector)?))
    }

    fn commit(self: &Arc<Self>, config: &Config) -> Result<()> {
        let plugins = plugin::load(config)?;

        if self.publishers.get().is_none() && config.query("publish_to") {
            let publishers = publisher::load(self, config)?;
            let kinds: Vec<_> = publishers.iter().map(|p| p.kind().to_string()).collect();
            if self.publishers.set(publishers).is_err() {
                warn!("publishers of {} were committed concurrently", self.name);
            } else {
                info!("instance {} publishes to {:?}", self.name, kinds);
            }
        }

        *self.plugins.write().unwrap_or_else(PoisonError::into_inner) = plugins;
        Ok(())
    }

    pub fn with_config<R>(&self, f: impl FnOnce(&Config) -> R) -> R {
        f(&self.config.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn config_snapshot(&self) -> Config {
        self.with_config(Config::deep_copy)
    }

    pub fn publishers(&self) -> &[Arc<dyn Publisher>] {
        self.publishers.get().map(Vec::as_slice).unwrap_or_default()
    }

    pub fn find_publisher(&self, kind: PublisherKind) -> Option<Arc<dyn Publisher>> {
        self.publishers().iter().find(|p| p.kind() == kind).cloned()
    }

    pub fn has_publisher(&self, kind: PublisherKind) -> bool {
        self.publishers().iter().any(|p| p.kind() == kind)
    }

    pub fn plugins(&self) -> PluginChain {
        self.plugins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Builds an event and publishes it.
    pub fn publish(self: &Arc<Self>, name: &str, params: impl Into<Value>) -> Result<()> {
        Event::new(self, name, params)?.publish()
    }

    /// Registers `handler` for `event_name`.
    ///
    /// The locator is derived from the calling file, so a second unnamed
    /// subscription to the same event from the same file is rejected; give
    /// it a name to tell them apart.
    #[track_caller]
    pub fn subscribe_to<F>(
        self: &Arc<Self>,
        event_name: &str,
        options: SubscribeOptions,
        handler: F,
    ) -> Result<Arc<Subscription>>
    where
        F: Fn(&Event) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        let caller = Location::caller();
        let subscription = Subscription::new(self, event_name, options, caller, Arc::new(handler))?;
        self.register(Arc::new(subscription))
    }

    fn register(&self, subscription: Arc<Subscription>) -> Result<Arc<Subscription>> {
        match self.locators.entry(subscription.locator().to_string()) {
            Entry::Occupied(entry) => {
                return Err(SubscriptionError::DuplicateLocator(entry.key().clone()).into())
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&subscription));
            }
        }

        let mut by_event = self
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let subscriptions = by_event
            .entry(subscription.event_name().to_string())
            .or_default();
        subscriptions.push(Arc::clone(&subscription));
        // stable: equal priorities keep registration order
        subscriptions.sort_by_key(|s| s.priority());

        debug!("{} registered on {}", subscription, self.name);
        Ok(subscription)
    }

    /// Priority ordered copy of the subscriptions to `event_name`.
    pub fn subscriptions_to(&self, event_name: &str) -> Vec<Arc<Subscription>> {
        self.subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event_name)
            .cloned()
            .unwrap_or_default()
    }

    pub fn find_subscription(&self, locator: &str) -> Option<Arc<Subscription>> {
        self.locators.get(locator).map(|entry| Arc::clone(entry.value()))
    }

    pub(crate) fn from_parts(parts: Vec<Part<BusObject>>) -> Result<BusObject> {
        let [name] = fixed_parts::<_, 1>(Self::TYPE_TAG, parts)?;
        let name = match name.into_value(Self::TYPE_TAG)? {
            Packed::Str(name) | Packed::Ident(name) => name,
            _ => return Err(invalid_parts(Self::TYPE_TAG, "name must be a string").into()),
        };
        Ok(BusObject::Instance(crate::instance(&name)?))
    }
}

impl Serializable for Instance {
    const TYPE_TAG: &'static str = "Instance";

    fn fields(&self) -> std::result::Result<Vec<Packed>, EnvelopeError> {
        Ok(vec![Packed::Str(self.name.clone())])
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("name", &self.name)
            .field("publishers", &self.publishers().len())
            .field("plugins", &self.plugins().names())
            .finish()
    }
}
