use std::{collections::BTreeMap, sync::Arc};

use herald::{
    envelope::{self, EnvelopeError, Packed},
    Error, Event, Serializable, SubscribeOptions, Subscription, Value,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

use super::fresh_instance;

fn plain_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        (-1.0e9..1.0e9f64).prop_map(Value::Float),
        "[a-zA-Z0-9 ]{0,12}".prop_map(Value::String),
        "[a-z]{1,8}".prop_map(Value::Ident),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::List),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4).prop_map(Value::Map),
        ]
    })
}

fn params() -> impl Strategy<Value = BTreeMap<String, Value>> {
    prop::collection::btree_map("[a-z]{1,6}", plain_value(), 0..5)
}

proptest! {
    #[test]
    fn test_event_round_trip(name in "[a-z][a-z0-9_]{0,12}", params in params()) {
        let instance = herald::instance("envelope-round-trip").unwrap();
        let event = Event::new(&instance, name.clone(), Value::Map(params.clone())).unwrap();

        let decoded = Event::deserialize(&event.serialize().unwrap()).unwrap();
        prop_assert_eq!(decoded.name(), name.as_str());
        prop_assert_eq!(decoded.params(), &params);
        prop_assert!(Arc::ptr_eq(decoded.instance(), &instance));
    }
}

#[test]
fn test_event_name_travels_as_identifier() {
    let instance = fresh_instance("envelope");
    let event = Event::new(&instance, "signed_up", Value::Null).unwrap();

    let package = envelope::decode(&event.serialize().unwrap()).unwrap();
    let (type_tag, args) = envelope::unpackage(package).unwrap();
    assert_eq!(type_tag, "Event");
    assert_eq!(args[0], Packed::ident("signed_up"));
    assert!(envelope::is_package(&args[1]));
}

#[test]
fn test_instance_identity_is_preserved() {
    let instance = fresh_instance("envelope");
    let decoded = envelope::deserialize(&instance.serialize().unwrap())
        .unwrap()
        .into_instance()
        .unwrap();
    assert!(Arc::ptr_eq(&decoded, &instance));
}

#[test]
fn test_subscription_resolves_to_live_registration() {
    let instance = fresh_instance("envelope");
    let subscription = instance
        .subscribe_to("resolved", SubscribeOptions::new().name("audit"), |_| Ok(()))
        .unwrap();

    let decoded = Subscription::deserialize(&subscription.serialize().unwrap()).unwrap();
    assert!(Arc::ptr_eq(&decoded, &subscription));
}

fn decode_error(encoded: &str) -> EnvelopeError {
    match Event::deserialize(encoded) {
        Err(Error::Envelope(e)) => e,
        other => panic!("expected an envelope error, got {other:?}"),
    }
}

fn encoded(parts: Vec<Packed>) -> String {
    envelope::encode(&Packed::List(parts)).unwrap()
}

#[test]
fn test_validation_order() {
    assert_eq!(decode_error("%% not base64 %%"), EnvelopeError::MalformedEncoding);
    assert!(matches!(
        decode_error("AAAA"),
        EnvelopeError::MalformedStructure(_)
    ));
    assert_eq!(
        decode_error(&envelope::encode(&Packed::Int(1)).unwrap()),
        EnvelopeError::NotAPackage
    );
    assert_eq!(
        decode_error(&encoded(vec![
            Packed::ident("JSON"),
            Packed::Int(2),
            Packed::Str("Event".into()),
        ])),
        EnvelopeError::InvalidMagic
    );
    assert_eq!(
        decode_error(&encoded(vec![
            Packed::ident("SRLZ"),
            Packed::Int(2),
            Packed::Str("Event".into()),
        ])),
        EnvelopeError::UnsupportedVersion
    );
    assert_eq!(
        decode_error(&encoded(vec![
            Packed::ident("SRLZ"),
            Packed::Int(1),
            Packed::Str("Event".into()),
        ])),
        EnvelopeError::InvalidTypeTag
    );
    assert_eq!(
        decode_error(&encoded(vec![
            Packed::ident("SRLZ"),
            Packed::Int(1),
            Packed::ident("Widget"),
        ])),
        EnvelopeError::UnknownType("Widget".into())
    );
}

#[test]
fn test_type_mismatch() {
    let instance = fresh_instance("envelope");
    assert!(matches!(
        decode_error(&instance.serialize().unwrap()),
        EnvelopeError::TypeMismatch { expected, found } if expected == "Event" && found == "Instance"
    ));
}

#[test]
fn test_unknown_locator() {
    let instance = fresh_instance("envelope");
    let forged = encoded(vec![
        Packed::ident("SRLZ"),
        Packed::Int(1),
        Packed::ident("Subscription"),
        instance.package().unwrap(),
        Packed::Str("0000".into()),
    ]);
    assert!(matches!(
        Subscription::deserialize(&forged),
        Err(Error::Subscription(
            herald::subscription::SubscriptionError::UnknownLocator(locator)
        )) if locator == "0000"
    ));
}
