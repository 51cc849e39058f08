use herald::{
    subscription::SubscriptionError, Error, Event, InstanceError, SubscribeOptions, Value,
};
use pretty_assertions::assert_eq;

use super::{fresh_instance, Recorder};

#[test]
fn test_replay_in_priority_order() {
    let instance = fresh_instance("priority");
    for (i, priority) in [7, 1, 3, 2, 2, 9, 8].into_iter().enumerate() {
        instance
            .subscribe_to(
                "ordered",
                SubscribeOptions::new()
                    .name(format!("sub{i}"))
                    .priority(priority),
                |_| Ok(()),
            )
            .unwrap();
    }

    let replay: Vec<_> = instance
        .subscriptions_to("ordered")
        .iter()
        .map(|s| (s.priority(), s.name().unwrap_or_default().to_string()))
        .collect();
    assert_eq!(
        replay,
        vec![
            (1, "sub1".to_string()),
            (2, "sub3".to_string()),
            (2, "sub4".to_string()),
            (3, "sub2".to_string()),
            (7, "sub0".to_string()),
            (8, "sub6".to_string()),
            (9, "sub5".to_string()),
        ]
    );
}

#[test]
fn test_symbolic_priorities() {
    let instance = fresh_instance("priority");
    let resolved: Vec<_> = ["highest", "high", "medium", "low", "lowest"]
        .into_iter()
        .map(|symbol| {
            instance
                .subscribe_to(
                    "symbolic",
                    SubscribeOptions::new().name(symbol).priority(Value::ident(symbol)),
                    |_| Ok(()),
                )
                .unwrap()
                .priority()
        })
        .collect();
    assert_eq!(resolved, vec![1, 3, 5, 8, 10]);

    let default = instance
        .subscribe_to("symbolic", SubscribeOptions::new(), |_| Ok(()))
        .unwrap();
    assert_eq!(default.priority(), 5);
}

#[test]
fn test_invalid_priorities() {
    let instance = fresh_instance("priority");
    for (i, priority) in [Value::Int(0), Value::Int(11), Value::ident("urgent"), Value::Float(2.5)]
        .into_iter()
        .enumerate()
    {
        let result = instance.subscribe_to(
            "invalid",
            SubscribeOptions::new().name(format!("bad{i}")).priority(priority),
            |_| Ok(()),
        );
        assert!(matches!(
            result,
            Err(Error::Subscription(SubscriptionError::InvalidPriority(_)))
        ));
    }
    assert!(instance.subscriptions_to("invalid").is_empty());
}

#[test]
fn test_duplicate_locator_and_duplicate_name() {
    let instance = fresh_instance("duplicates");
    let register = || instance.subscribe_to("twice", SubscribeOptions::new().name("same"), |_| Ok(()));
    register().unwrap();
    assert!(matches!(
        register(),
        Err(Error::Subscription(SubscriptionError::DuplicateLocator(_)))
    ));

    assert_eq!(
        herald::Instance::create(instance.name()).err(),
        Some(InstanceError::DuplicateName(instance.name().to_string()))
    );
}

#[test]
fn test_locator_ignores_line_but_not_name() {
    let first = fresh_instance("locator");
    let second = fresh_instance("locator");

    let a = first
        .subscribe_to("moved", SubscribeOptions::new().name("audit"), |_| Ok(()))
        .unwrap();

    let b = second
        .subscribe_to("moved", SubscribeOptions::new().name("audit"), |_| Ok(()))
        .unwrap();
    let c = second
        .subscribe_to("moved", SubscribeOptions::new().name("notify"), |_| Ok(()))
        .unwrap();

    assert_eq!(a.locator(), b.locator());
    assert_ne!(b.locator(), c.locator());
}

#[test]
fn test_handle_checks_event() {
    let instance = fresh_instance("handle");
    let other = fresh_instance("handle");
    let recorder = Recorder::default();

    let sink = recorder.clone();
    let subscription = instance
        .subscribe_to("checked", SubscribeOptions::new(), move |event| {
            sink.record("handled", event);
            Ok(())
        })
        .unwrap();

    subscription
        .handle(&Event::new(&instance, "checked", Value::Null).unwrap())
        .unwrap();
    assert!(matches!(
        subscription.handle(&Event::new(&instance, "unchecked", Value::Null).unwrap()),
        Err(Error::Subscription(SubscriptionError::UnexpectedEvent(reason))) if reason == "wrong name"
    ));
    assert!(matches!(
        subscription.handle(&Event::new(&other, "checked", Value::Null).unwrap()),
        Err(Error::Subscription(SubscriptionError::UnexpectedEvent(reason))) if reason == "wrong instance"
    ));
    assert_eq!(recorder.lines(), vec!["handled:checked"]);
}

#[test]
fn test_handler_failure_is_wrapped() {
    let instance = fresh_instance("handle");
    let subscription = instance
        .subscribe_to("failing", SubscribeOptions::new().name("boom"), |_| {
            Err("handler exploded".into())
        })
        .unwrap();

    let err = subscription
        .handle(&Event::new(&instance, "failing", Value::Null).unwrap())
        .unwrap_err();
    assert!(matches!(
        &err,
        Error::Subscription(SubscriptionError::HandlerFailed { subscription, .. })
            if subscription == "Subscription(on failing: boom)"
    ));
    assert!(err.to_string().contains("handler exploded"));
}
