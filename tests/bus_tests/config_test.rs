use std::{io::Write, sync::Arc};

use herald::{
    config::{Config, ConfigError, Node},
    value::Value,
    SubscribeOptions,
};
use pretty_assertions::assert_eq;

use super::fresh_instance;

#[test]
fn test_chained_paths() {
    let mut config = Config::new();
    config.set("a.b.c", 1).unwrap();
    assert_eq!(config.value("a.b.c"), Some(&Value::Int(1)));

    // reading an unset path creates empty nodes without failing
    assert!(matches!(config.get("x.y").unwrap(), Node::Config(node) if node.is_empty()));
    assert_eq!(config.nested("x.y").and_then(Config::name), Some("x.y"));
    assert!(!config.query("x.y"));
}

#[test]
fn test_false_and_unset_differ_only_by_presence() {
    let mut config = Config::new();
    config.set("flag", false).unwrap();

    assert!(!config.query("flag"));
    assert!(!config.query("undefined"));
    assert!(config.contains("flag"));
    assert!(!config.contains("undefined"));
}

#[test]
fn test_collections() {
    let mut config = Config::new();
    config.add("publish_to", "subscriptions").unwrap();
    config.add("publish_to", "local_queue").unwrap();
    assert!(matches!(
        config.set("publish_to", "inline_callback"),
        Err(ConfigError::NotAddable(path)) if path == "publish_to"
    ));

    config.add("hooks", Value::hook(|v| v.clone())).unwrap();
    assert!(matches!(
        config.add("hooks", 1),
        Err(ConfigError::NotCallable(_))
    ));
    match config.value("hooks") {
        Some(Value::Hooks(hooks)) => {
            assert_eq!(hooks.call(&Value::Int(2)), vec![Value::Int(2)]);
        }
        other => panic!("expected a hook list, got {other:?}"),
    }
}

#[test]
fn test_deep_copy_shares_opaque_values() {
    let handle = Value::opaque(Arc::new(String::from("shared")));
    let mut config = Config::new();
    config.set("db.handle", handle.clone()).unwrap();
    config.set("db.pool", 4).unwrap();

    let mut copy = config.deep_copy();
    copy.set("db.pool", 8).unwrap();

    match (config.value("db.handle"), copy.value("db.handle")) {
        (Some(Value::Opaque(a)), Some(Value::Opaque(b))) => assert!(a.ptr_eq(b)),
        other => panic!("expected opaque handles, got {other:?}"),
    }
    assert_eq!(config.get_i64("db.pool"), Some(4));
    assert_eq!(copy.get_i64("db.pool"), Some(8));
}

#[test]
fn test_merge_overwrites_and_recurses() {
    let mut config = Config::with_defaults();
    config
        .merge_value(&Value::map([
            ("subscriptions", Value::map([("max_priority", Value::Int(20))])),
            ("flag", Value::Bool(true)),
        ]))
        .unwrap();

    assert_eq!(config.get_i64("subscriptions.max_priority"), Some(20));
    assert_eq!(
        config.get_str("subscriptions.default_priority"),
        Some("medium")
    );
    assert!(config.query("flag"));
}

#[test]
fn test_instance_settings_from_file() {
    let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
    writeln!(
        file,
        "subscriptions:\n  max_priority: 5\npublish_to:\n  - subscriptions"
    )
    .unwrap();

    let instance = fresh_instance("config-file");
    instance
        .configure(|config| Ok(config.merge_file(file.path())?))
        .unwrap();

    let subscription = instance
        .subscribe_to("loaded", SubscribeOptions::new(), |_| Ok(()))
        .unwrap();
    assert_eq!(subscription.priority(), 3);
    assert_eq!(instance.publishers().len(), 1);
    instance.publish("loaded", Value::Null).unwrap();
}

#[test]
fn test_unreadable_file() {
    let mut config = Config::new();
    assert!(matches!(
        config.merge_file("/nonexistent/herald.yml"),
        Err(ConfigError::Io(_))
    ));
}
