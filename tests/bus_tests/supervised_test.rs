use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use herald::{
    queue::{self, Job, JobQueue, MemoryJobQueue, QueueError},
    Event, Instance, PublisherKind, SubscribeOptions, Value,
};
use pretty_assertions::assert_eq;

use super::{fresh_instance, Recorder};

async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

fn supervised_instance(job_queue: &Arc<MemoryJobQueue>, recorder: &Recorder) -> Arc<Instance> {
    let instance = fresh_instance("supervised");
    let sink = recorder.clone();
    instance
        .subscribe_to("tick", SubscribeOptions::new(), move |event| {
            sink.push(format!("tick {}", event.get("seq").map(Value::to_string).unwrap_or_default()));
            Ok(())
        })
        .unwrap();

    let handle = queue::handle(Arc::clone(job_queue));
    instance
        .configure(|config| {
            config.set("publishers.supervised_async.job_queue", handle)?;
            config.add("publish_to", "supervised_async")?;
            Ok(())
        })
        .unwrap();
    instance
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_supervised_delivery_preserves_order() {
    let job_queue = Arc::new(MemoryJobQueue::new());
    let recorder = Recorder::default();
    let instance = supervised_instance(&job_queue, &recorder);
    assert!(instance.has_publisher(PublisherKind::SupervisedAsync));

    for seq in 0..5 {
        instance
            .publish("tick", Value::map([("seq", Value::Int(seq))]))
            .unwrap();
    }
    assert!(eventually(|| job_queue.len("publisher") == 5).await);

    let published: Vec<i64> = std::iter::from_fn(|| job_queue.pop("publisher"))
        .map(|job| {
            assert_eq!(job.args[1], "supervised_async");
            let event = Event::deserialize(&job.args[0]).unwrap();
            event.get("seq").and_then(Value::as_i64).unwrap_or(-1)
        })
        .collect();
    assert_eq!(published, vec![0, 1, 2, 3, 4]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_supervised_jobs_expand_like_local_queue() {
    let job_queue = Arc::new(MemoryJobQueue::new());
    let recorder = Recorder::default();
    let instance = supervised_instance(&job_queue, &recorder);

    instance
        .publish("tick", Value::map([("seq", Value::Int(1))]))
        .unwrap();
    assert!(eventually(|| !job_queue.is_empty()).await);

    assert_eq!(job_queue.work_off().unwrap(), 2);
    assert_eq!(recorder.lines(), vec!["tick 1"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_events_without_subscriptions_are_dropped_quietly() {
    let job_queue = Arc::new(MemoryJobQueue::new());
    let instance = supervised_instance(&job_queue, &Recorder::default());

    instance.publish("tock", Value::Null).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(job_queue.is_empty());
}

/// Panics on every enqueue.
#[derive(Default)]
struct BrokenQueue {
    crashes: AtomicUsize,
}

impl JobQueue for BrokenQueue {
    fn enqueue(&self, _queue: &str, _job: Job) -> Result<(), QueueError> {
        self.crashes.fetch_add(1, Ordering::SeqCst);
        panic!("queue is down");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_exhausted_restarts_drop_events_silently() {
    let job_queue = Arc::new(BrokenQueue::default());
    let instance = fresh_instance("supervised");
    instance
        .subscribe_to("tick", SubscribeOptions::new(), |_| Ok(()))
        .unwrap();

    let handle = queue::handle(Arc::clone(&job_queue));
    instance
        .configure(|config| {
            config.set("publishers.supervised_async.job_queue", handle)?;
            config.set("publishers.supervised_async.restart_limit", 0)?;
            config.add("publish_to", "supervised_async")?;
            Ok(())
        })
        .unwrap();

    for seq in 0..20 {
        let published = instance.publish("tick", Value::map([("seq", Value::Int(seq))]));
        assert!(published.is_ok(), "publish {seq} failed: {published:?}");
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert!(eventually(|| job_queue.crashes.load(Ordering::SeqCst) > 0).await);
}
