//! # Queue collaborators
//!
//! Deferred backends never run subscriptions themselves. They hand serialized
//! jobs to an external [`JobQueue`] (or push them onto a [`RemoteStore`]) and
//! a worker later calls [`perform`] with each job.
//!
//! Two job classes exist:
//! - `PublisherJob(event, [selector])` expands an event into one
//!   `SubscriptionJob` per subscription, each sent to the queue chosen by the
//!   backend's formatter (`subscriptions_p{priority}` by default).
//! - `SubscriptionJob(subscription, event)` rebuilds both and handles the event.

mod jobs;
#[cfg(feature = "redis")]
mod redis_store;
mod remote;

use std::{collections::VecDeque, sync::Arc, sync::Mutex, sync::PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use jobs::perform;
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;
pub use remote::{
    handle as store_handle, MemoryStore, MockRemoteStore, NamespacedStore, RemoteStore,
    StoreCommand,
};

use crate::{error::Result, publisher::PublisherKind, value::Value};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueueError {
    #[error("queue backend failure: {0}")]
    Backend(String),
    #[error("failed to encode job: {0}")]
    Encode(String),
    #[error("invalid arguments for {class}: {reason}")]
    InvalidArguments { class: String, reason: String },
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::EnumString, strum::Display,
)]
pub enum JobClass {
    PublisherJob,
    SubscriptionJob,
}

/// A unit of deferred work. Serializes to `{"class": .., "args": [..]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub class: JobClass,
    pub args: Vec<String>,
}

impl Job {
    /// Expansion job for a serialized event. `selector` names the backend
    /// whose destination is used, `local_queue` when absent.
    pub fn publisher(event: String, selector: Option<PublisherKind>) -> Self {
        let mut args = vec![event];
        if let Some(kind) = selector {
            args.push(kind.to_string());
        }
        Self {
            class: JobClass::PublisherJob,
            args,
        }
    }

    pub fn subscription(subscription: String, event: String) -> Self {
        Self {
            class: JobClass::SubscriptionJob,
            args: vec![subscription, event],
        }
    }

    pub fn to_json(&self) -> std::result::Result<String, QueueError> {
        serde_json::to_string(self).map_err(|e| QueueError::Encode(e.to_string()))
    }

    pub fn from_json(json: &str) -> std::result::Result<Self, QueueError> {
        serde_json::from_str(json).map_err(|e| QueueError::Encode(e.to_string()))
    }
}

/// External job queue. Implementations enqueue; they never perform.
#[mockall::automock]
pub trait JobQueue: Send + Sync {
    fn enqueue(&self, queue: &str, job: Job) -> std::result::Result<(), QueueError>;
}

/// Wraps a job queue so it can be stored under `publishers.<kind>.job_queue`.
pub fn handle<Q: JobQueue + 'static>(queue: Arc<Q>) -> Value {
    let queue: Arc<dyn JobQueue> = queue;
    Value::opaque(queue)
}

/// In-process FIFO job queue.
///
/// Jobs are kept in arrival order across all named queues, so
/// [`MemoryJobQueue::work_off`] replays them the way a single worker would.
#[derive(Debug, Default)]
pub struct MemoryJobQueue {
    jobs: Mutex<VecDeque<(String, Job)>>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes the oldest job waiting on `queue`.
    pub fn pop(&self, queue: &str) -> Option<Job> {
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        let index = jobs.iter().position(|(name, _)| name == queue)?;
        jobs.remove(index).map(|(_, job)| job)
    }

    pub fn pop_front(&self) -> Option<(String, Job)> {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    pub fn len(&self, queue: &str) -> usize {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(name, _)| name == queue)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Names of queues with pending jobs, in first-arrival order.
    pub fn queues(&self) -> Vec<String> {
        let jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = Vec::new();
        for (name, _) in jobs.iter() {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }

    /// Performs pending jobs, including the ones they enqueue, until the
    /// queue is drained. Returns how many jobs ran.
    pub fn work_off(&self) -> Result<usize> {
        let mut performed = 0;
        while let Some((_, job)) = self.pop_front() {
            perform(&job)?;
            performed += 1;
        }
        Ok(performed)
    }
}

impl JobQueue for MemoryJobQueue {
    fn enqueue(&self, queue: &str, job: Job) -> std::result::Result<(), QueueError> {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back((queue.to_string(), job));
        Ok(())
    }
}
