use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, Mutex, PoisonError},
};

use super::QueueError;
use crate::value::Value;

/// A single write against a list/set structured store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCommand {
    /// Append `value` to the tail of the list at `key`.
    RPush { key: String, value: String },
    /// Add `member` to the set at `key`.
    SAdd { key: String, member: String },
}

impl StoreCommand {
    pub fn key(&self) -> &str {
        match self {
            StoreCommand::RPush { key, .. } | StoreCommand::SAdd { key, .. } => key,
        }
    }

    fn with_key(self, key: String) -> Self {
        match self {
            StoreCommand::RPush { value, .. } => StoreCommand::RPush { key, value },
            StoreCommand::SAdd { member, .. } => StoreCommand::SAdd { key, member },
        }
    }
}

/// Remote list-structured store. A batch must be applied atomically.
#[mockall::automock]
pub trait RemoteStore: Send + Sync {
    fn atomic(&self, commands: Vec<StoreCommand>) -> Result<(), QueueError>;
}

/// Wraps a store so it can be stored under `publishers.remote_queue.store`.
pub fn handle<S: RemoteStore + 'static>(store: Arc<S>) -> Value {
    let store: Arc<dyn RemoteStore> = store;
    Value::opaque(store)
}

#[derive(Debug, Default)]
struct Data {
    lists: HashMap<String, Vec<String>>,
    sets: HashMap<String, BTreeSet<String>>,
}

/// In-process store; a batch is applied under one lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<Data>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list(&self, key: &str) -> Vec<String> {
        let data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        data.lists.get(key).cloned().unwrap_or_default()
    }

    pub fn members(&self, key: &str) -> Vec<String> {
        let data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        data.sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Removes and returns the head of the list at `key`.
    pub fn lpop(&self, key: &str) -> Option<String> {
        let mut data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        let list = data.lists.get_mut(key)?;
        if list.is_empty() {
            None
        } else {
            Some(list.remove(0))
        }
    }
}

impl RemoteStore for MemoryStore {
    fn atomic(&self, commands: Vec<StoreCommand>) -> Result<(), QueueError> {
        let mut data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        for command in commands {
            match command {
                StoreCommand::RPush { key, value } => {
                    data.lists.entry(key).or_default().push(value)
                }
                StoreCommand::SAdd { key, member } => {
                    data.sets.entry(key).or_default().insert(member);
                }
            }
        }
        Ok(())
    }
}

/// Prefixes every key with `{namespace}:`.
pub struct NamespacedStore {
    namespace: String,
    inner: Arc<dyn RemoteStore>,
}

impl NamespacedStore {
    pub fn new(namespace: impl Into<String>, inner: Arc<dyn RemoteStore>) -> Self {
        Self {
            namespace: namespace.into(),
            inner,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

impl RemoteStore for NamespacedStore {
    fn atomic(&self, commands: Vec<StoreCommand>) -> Result<(), QueueError> {
        let commands = commands
            .into_iter()
            .map(|command| {
                let key = format!("{}:{}", self.namespace, command.key());
                command.with_key(key)
            })
            .collect();
        self.inner.atomic(commands)
    }
}
