mod config_test;
mod envelope_test;
mod publish_test;
mod subscription_test;
mod supervised_test;

use std::sync::{Arc, Mutex};

use herald::{Event, Instance};
use uuid::Uuid;

pub fn fresh_instance(prefix: &str) -> Arc<Instance> {
    Instance::create(format!("{prefix}-{}", Uuid::new_v4())).unwrap()
}

/// Shared log of handled events, as `"{label}:{event}"` lines.
#[derive(Clone, Default)]
pub struct Recorder(Arc<Mutex<Vec<String>>>);

impl Recorder {
    pub fn record(&self, label: &str, event: &Event) {
        self.0
            .lock()
            .unwrap()
            .push(format!("{label}:{}", event.name()));
    }

    pub fn push(&self, line: impl Into<String>) {
        self.0.lock().unwrap().push(line.into());
    }

    pub fn lines(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}
