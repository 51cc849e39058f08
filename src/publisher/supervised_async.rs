//! Queue delivery through a supervised background worker.
//!
//! Each publisher owns one uniquely named worker task fed by an unbounded
//! FIFO channel, so events from one caller reach the job queue in publish
//! order. A supervisor task restarts the worker when it panics, up to
//! `restart_limit` times with a fixed `restart_delay_ms` pause.
//!
//! Publishing never blocks on the worker and never fails because of it. If
//! the registered worker is down, the lookup is retried a few times with a
//! short sleep; after that the event is dropped.
//!
//! A crash loses more than the event in flight: the worker's channel goes
//! with it, so every event still waiting in it is dropped too. The restarted
//! worker starts from a fresh channel.

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use dashmap::DashMap;
use lazy_static::lazy_static;
use tokio::{
    runtime::{Handle, RuntimeFlavor},
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
};
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

use super::{ensure_instance, Publisher, PublisherError, PublisherKind, QueueDestination};
use crate::{
    config::Config,
    envelope::Serializable,
    error::{Error, Result},
    event::Event,
    instance::Instance,
    queue::Job,
};

const LOOKUP_ATTEMPTS: usize = 3;
const LOOKUP_DELAY: Duration = Duration::from_millis(1);

lazy_static! {
    static ref WORKERS: DashMap<String, UnboundedSender<Event>> = DashMap::new();
}

/// Bounded immediate restarts with a fixed pause.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RestartPolicy {
    pub limit: u32,
    pub delay: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            limit: 5,
            delay: Duration::from_millis(1),
        }
    }
}

impl RestartPolicy {
    fn from_config(config: &Config) -> Self {
        let default = Self::default();
        Self {
            limit: config
                .get_i64("restart_limit")
                .and_then(|limit| u32::try_from(limit).ok())
                .unwrap_or(default.limit),
            delay: config
                .get_i64("restart_delay_ms")
                .and_then(|ms| u64::try_from(ms).ok())
                .map(Duration::from_millis)
                .unwrap_or(default.delay),
        }
    }
}

/// Settings (`publishers.supervised_async.*`): the same `job_queue`,
/// `publisher_queue` and `subscription_queue_formatter` as the local queue,
/// plus `restart_limit` and `restart_delay_ms`.
pub struct SupervisedAsyncPublisher {
    instance: Weak<Instance>,
    destination: QueueDestination,
    restart: RestartPolicy,
    worker_id: String,
    runtime: Option<Handle>,
}

impl SupervisedAsyncPublisher {
    /// Captures the current tokio runtime, if any, to host the worker.
    pub fn new(
        instance: &Arc<Instance>,
        config: &Config,
    ) -> std::result::Result<Self, PublisherError> {
        Ok(Self {
            instance: Arc::downgrade(instance),
            destination: QueueDestination::from_config(PublisherKind::SupervisedAsync, config)?,
            restart: RestartPolicy::from_config(config),
            worker_id: format!("herald_supervised_worker_{}", Uuid::new_v4()),
            runtime: Handle::try_current().ok(),
        })
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn restart_policy(&self) -> RestartPolicy {
        self.restart
    }

    fn worker(&self) -> Option<UnboundedSender<Event>> {
        let mut sender = match WORKERS.get(&self.worker_id) {
            Some(sender) => sender.value().clone(),
            None => self.start()?,
        };

        for _ in 0..LOOKUP_ATTEMPTS {
            if !sender.is_closed() {
                return Some(sender);
            }
            pause();
            sender = WORKERS.get(&self.worker_id)?.value().clone();
        }

        (!sender.is_closed()).then_some(sender)
    }

    fn start(&self) -> Option<UnboundedSender<Event>> {
        let Some(runtime) = self.runtime.clone().or_else(|| Handle::try_current().ok()) else {
            warn!("no tokio runtime to host worker {}", self.worker_id);
            return None;
        };

        let sender = WORKERS
            .entry(self.worker_id.clone())
            .or_insert_with(|| {
                let (sender, inbox) = mpsc::unbounded_channel();
                runtime.spawn(supervise(
                    self.worker_id.clone(),
                    inbox,
                    self.destination.clone(),
                    self.restart,
                ));
                debug!("started worker {}", self.worker_id);
                sender
            })
            .value()
            .clone();
        Some(sender)
    }
}

impl Publisher for SupervisedAsyncPublisher {
    fn kind(&self) -> PublisherKind {
        PublisherKind::SupervisedAsync
    }

    #[instrument(level = "debug", skip_all, fields(event = %event.name(), worker = %self.worker_id))]
    fn publish(&self, event: &Event) -> Result<()> {
        ensure_instance(&self.instance, event)?;

        if event.subscriptions().is_empty() {
            debug!("no subscriptions to {}, skipping enqueue", event.name());
            return Ok(());
        }

        match self.worker() {
            Some(worker) => {
                if worker.send(event.clone()).is_err() {
                    warn!("worker {} went away, dropping {}", self.worker_id, event);
                }
            }
            None => warn!("worker {} unavailable, dropping {}", self.worker_id, event),
        }
        Ok(())
    }

    fn destination(&self) -> Option<&QueueDestination> {
        Some(&self.destination)
    }
}

/// Sleeps between worker lookups. Inside a multi-threaded runtime the
/// executor thread is handed off first.
fn pause() {
    match Handle::try_current().map(|handle| handle.runtime_flavor()) {
        Ok(RuntimeFlavor::MultiThread) => {
            tokio::task::block_in_place(|| std::thread::sleep(LOOKUP_DELAY))
        }
        _ => std::thread::sleep(LOOKUP_DELAY),
    }
}

async fn supervise(
    worker_id: String,
    inbox: UnboundedReceiver<Event>,
    destination: QueueDestination,
    policy: RestartPolicy,
) {
    let mut inbox = Some(inbox);
    let mut restarts = 0;

    loop {
        let current = match inbox.take() {
            Some(inbox) => inbox,
            None => {
                let (sender, inbox) = mpsc::unbounded_channel();
                WORKERS.insert(worker_id.clone(), sender);
                inbox
            }
        };

        match tokio::spawn(run_worker(current, destination.clone())).await {
            Ok(()) => {
                debug!("worker {} stopped", worker_id);
                break;
            }
            Err(e) if e.is_panic() && restarts < policy.limit => {
                restarts += 1;
                warn!(
                    "worker {} crashed, restart {}/{}",
                    worker_id, restarts, policy.limit
                );
                tokio::time::sleep(policy.delay).await;
            }
            Err(e) => {
                error!("worker {} gave up: {}", worker_id, e);
                break;
            }
        }
    }

    WORKERS.remove_if(&worker_id, |_, sender| sender.is_closed());
}

async fn run_worker(mut inbox: UnboundedReceiver<Event>, destination: QueueDestination) {
    while let Some(event) = inbox.recv().await {
        if let Err(e) = enqueue(&destination, &event) {
            error!("failed to enqueue {}: {}", event, e);
        }
    }
}

fn enqueue(destination: &QueueDestination, event: &Event) -> Result<()> {
    let job = Job::publisher(event.serialize()?, Some(PublisherKind::SupervisedAsync));
    destination
        .job_queue()
        .enqueue(destination.publisher_queue(), job)
        .map_err(Error::from)
}
