use std::sync::Arc;

use herald::{
    config::Config,
    event::EventError,
    publisher::{
        callback, InlineCallbackPublisher, LocalQueuePublisher, PublisherError,
        RemoteQueuePublisher, SubscriptionsPublisher, SupervisedAsyncPublisher,
    },
    queue::{self, MemoryJobQueue, MemoryStore},
    BoxError, Error, Event, InstanceError, Publisher, PublisherKind, SubscribeOptions, Value,
};
use pretty_assertions::assert_eq;

use super::{fresh_instance, Recorder};

#[test]
fn test_publish_without_publishers() {
    let instance = fresh_instance("publish");
    assert!(matches!(
        instance.publish("lonely", Value::Null),
        Err(Error::Instance(InstanceError::NoPublishersDefined))
    ));
}

fn noop(_: &Event) -> Result<(), BoxError> {
    Ok(())
}

#[test]
fn test_every_backend_rejects_foreign_events() {
    let instance = fresh_instance("publish");
    let other = fresh_instance("publish");

    let mut queue_settings = Config::new();
    queue_settings
        .set("job_queue", queue::handle(Arc::new(MemoryJobQueue::new())))
        .unwrap();
    let mut store_settings = Config::new();
    store_settings
        .set("store", queue::store_handle(Arc::new(MemoryStore::new())))
        .unwrap();

    let publishers: Vec<Box<dyn Publisher>> = vec![
        Box::new(InlineCallbackPublisher::new(&instance, Arc::new(noop))),
        Box::new(SubscriptionsPublisher::new(&instance)),
        Box::new(LocalQueuePublisher::new(&instance, &queue_settings).unwrap()),
        Box::new(RemoteQueuePublisher::new(&instance, &store_settings).unwrap()),
        Box::new(SupervisedAsyncPublisher::new(&instance, &queue_settings).unwrap()),
    ];

    let foreign = Event::new(&other, "foreign", Value::Null).unwrap();
    for publisher in &publishers {
        let result = publisher.publish(&foreign);
        assert!(
            matches!(result, Err(Error::Publisher(PublisherError::WrongInstance))),
            "{} accepted a foreign event",
            publisher.kind()
        );
    }
}

#[test]
fn test_fan_out_in_registration_order() {
    let instance = fresh_instance("publish");
    let recorder = Recorder::default();

    let sink = recorder.clone();
    instance
        .subscribe_to("ordered", SubscribeOptions::new().priority("low"), move |event| {
            sink.record("subscription", event);
            Ok(())
        })
        .unwrap();

    let first = recorder.clone();
    let last = recorder.clone();
    instance
        .configure(|config| {
            config.add(
                "publish_to",
                callback(move |event| {
                    first.record("first", event);
                    Ok(())
                }),
            )?;
            config.add("publish_to", "subscriptions")?;
            config.add(
                "publish_to",
                callback(move |event| {
                    last.record("last", event);
                    Ok(())
                }),
            )?;
            Ok(())
        })
        .unwrap();

    instance.publish("ordered", Value::Null).unwrap();
    assert_eq!(
        recorder.lines(),
        vec!["first:ordered", "subscription:ordered", "last:ordered"]
    );
}

#[test]
fn test_first_failure_aborts_round() {
    let instance = fresh_instance("publish");
    let recorder = Recorder::default();

    let after = recorder.clone();
    instance
        .configure(|config| {
            config.add("publish_to", callback(|_| Err("first backend down".into())))?;
            config.add(
                "publish_to",
                callback(move |event| {
                    after.record("second", event);
                    Ok(())
                }),
            )?;
            Ok(())
        })
        .unwrap();

    assert!(matches!(
        instance.publish("aborted", Value::Null),
        Err(Error::Publisher(PublisherError::CallbackFailed(_)))
    ));
    assert!(recorder.lines().is_empty());
}

#[test]
fn test_subscription_failure_stops_delivery() {
    let instance = fresh_instance("publish");
    let recorder = Recorder::default();

    instance
        .subscribe_to("cascade", SubscribeOptions::new().name("failing").priority(1), |_| {
            Err("nope".into())
        })
        .unwrap();
    let sink = recorder.clone();
    instance
        .subscribe_to("cascade", SubscribeOptions::new().name("later").priority(2), move |event| {
            sink.record("later", event);
            Ok(())
        })
        .unwrap();
    instance
        .configure(|config| Ok(config.add("publish_to", "subscriptions")?))
        .unwrap();

    assert!(instance.publish("cascade", Value::Null).is_err());
    assert!(recorder.lines().is_empty());
}

#[test]
fn test_unsafe_params_rejected_before_delivery() {
    let instance = fresh_instance("publish");
    instance
        .configure(|config| Ok(config.add("publish_to", "subscriptions")?))
        .unwrap();

    let params = Value::map([(
        "order",
        Value::map([(
            "lines",
            Value::List(vec![Value::map([("callback", Value::hook(|v| v.clone()))])]),
        )]),
    )]);
    assert!(matches!(
        instance.publish("ordered", params),
        Err(Error::Event(EventError::UnsafeValue { key, .. })) if key == "callback"
    ));
}

#[test]
fn test_backend_configuration_errors() {
    let unknown = fresh_instance("publish");
    assert!(matches!(
        unknown.configure(|config| Ok(config.add("publish_to", "pigeon")?)),
        Err(Error::Publisher(PublisherError::InvalidPublisherName(name))) if name == "pigeon"
    ));
    assert!(unknown.publishers().is_empty());

    let doubled = fresh_instance("publish");
    let store = queue::store_handle(Arc::new(MemoryStore::new()));
    let result = doubled.configure(|config| {
        config.set("publishers.remote_queue.store", store)?;
        config.add("publish_to", "remote_queue")?;
        config.add("publish_to", "remote_queue")?;
        Ok(())
    });
    assert!(matches!(
        result,
        Err(Error::Publisher(PublisherError::DuplicateBackend(kind))) if kind == "remote_queue"
    ));

    let unconfigured = fresh_instance("publish");
    assert!(matches!(
        unconfigured.configure(|config| Ok(config.add("publish_to", "remote_queue")?)),
        Err(Error::Publisher(PublisherError::MissingRemoteStore))
    ));

    let missing_handler = fresh_instance("publish");
    assert!(matches!(
        missing_handler.configure(|config| Ok(config.add("publish_to", "inline_callback")?)),
        Err(Error::Publisher(PublisherError::MissingHandler))
    ));
}

#[test]
fn test_inline_callback_with_params() {
    let instance = fresh_instance("publish");
    let recorder = Recorder::default();
    let sink = recorder.clone();

    instance
        .configure(|config| {
            config.add(
                "publish_to",
                Value::List(vec![
                    Value::from("inline_callback"),
                    Value::map([(
                        "handler",
                        callback(move |event| {
                            sink.record("inline", event);
                            Ok(())
                        }),
                    )]),
                ]),
            )?;
            Ok(())
        })
        .unwrap();

    assert!(instance.has_publisher(PublisherKind::InlineCallback));
    instance.publish("configured", Value::Null).unwrap();
    assert_eq!(recorder.lines(), vec!["inline:configured"]);
}
