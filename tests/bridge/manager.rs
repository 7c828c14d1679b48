//! Named bridge registry

use lua_bridge::{BridgeConfig, BridgeRegistry, ExecutionContext, LuaValue};

fn quiet(name: &str) -> BridgeConfig {
    BridgeConfig::new(name).with_log_errors(false)
}

#[test]
fn test_get_or_create_reuses_by_name() {
    let mut registry = BridgeRegistry::new();
    let context = ExecutionContext::new("level");

    let first = registry.get_or_create(&quiet("gameplay"), &context);
    let second = registry.get_or_create(&quiet("gameplay").with_global("Ignored", 1), &context);
    assert!(first.as_ref().zip(second.as_ref()).is_some_and(|(a, b)| a.ptr_eq(b)));
    assert_eq!(registry.len(), 1);

    let global = second.map(|b| b.run_string("return Ignored"));
    assert_eq!(global, Some(LuaValue::Nil));
}

#[test]
fn test_cleanup_keeps_persistent_bridges() {
    let mut registry = BridgeRegistry::new();
    let context = ExecutionContext::new("level");
    let transient = registry.get_or_create(&quiet("transient"), &context);
    let _ = registry.get_or_create(&quiet("menu").persistent(true), &context);

    assert_eq!(registry.cleanup(), 1);
    assert_eq!(registry.len(), 1);
    assert!(registry.get("menu").is_some_and(|b| b.is_live()));
    assert!(registry.get("transient").is_none());
    assert!(transient.is_some_and(|b| !b.is_live()));
    assert_eq!(registry.cleanup(), 0);
}

#[test]
fn test_unregister_closes_bridge() {
    let mut registry = BridgeRegistry::new();
    let bridge = registry.get_or_create(&quiet("tools"), &ExecutionContext::new("editor"));

    assert!(registry.unregister("tools"));
    assert!(!registry.unregister("tools"));
    assert!(registry.is_empty());
    assert!(bridge.is_some_and(|b| !b.is_live()));
}

#[test]
fn test_reset_recovers_disabled_bridge() {
    let mut registry = BridgeRegistry::new();
    let context = ExecutionContext::new("level");
    let config = quiet("flaky").with_startup("if not ready then error('not ready') end");

    assert!(registry.get_or_create(&config, &context).is_none());
    assert!(registry.get("flaky").is_some_and(|b| b.is_disabled()));
    assert!(registry.get_or_create(&config, &context).is_none());

    assert!(registry.reset("flaky"));
    assert!(!registry.reset("missing"));
    if let Some(bridge) = registry.get("flaky") {
        bridge.bind_global("ready", true);
    }
    assert!(registry.get_or_create(&config, &context).is_some());
}

#[test]
fn test_iter_in_creation_order() {
    let mut registry = BridgeRegistry::new();
    let context = ExecutionContext::new("level");
    for name in ["b", "a", "c"] {
        let _ = registry.get_or_create(&quiet(name), &context);
    }
    let names: Vec<&str> = registry.iter().map(|(name, _)| name).collect();
    assert_eq!(names, vec!["b", "a", "c"]);
}
