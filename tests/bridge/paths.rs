//! Dotted-path lookup and assignment

use super::{capture_errors, create_test_bridge, eval};
use lua_bridge::{BridgeError, ErrorKind, LuaValue};

#[test]
fn test_get_global_walks_nested_tables() {
    let bridge = create_test_bridge();
    bridge.run_string("config = { window = { width = 640 } }");
    assert_eq!(bridge.get_global("config.window.width"), LuaValue::Integer(640));
    assert_eq!(bridge.top(), 0);
}

#[test]
fn test_missing_leaf_is_nil_without_error() {
    let bridge = create_test_bridge();
    let errors = capture_errors(&bridge);
    bridge.run_string("config = { window = {} }");

    let lookup = bridge.get_field_path("config.window.height", true);
    assert!(lookup.is_ok());
    assert_eq!(lookup.pushed, 4);
    assert_eq!(bridge.to_value(-1).ok(), Some(LuaValue::Nil));
    bridge.pop(lookup.pushed);

    assert!(errors.borrow().is_empty());
}

#[test]
fn test_missing_intermediate_reports_unknown_key() {
    let bridge = create_test_bridge();
    let errors = capture_errors(&bridge);
    bridge.run_string("config = {}");

    let lookup = bridge.get_field_path("config.window.width", true);
    assert_eq!(lookup.error, Some(BridgeError::unknown_key("window")));
    assert_eq!(lookup.pushed, 3);
    bridge.pop(lookup.pushed);

    assert_eq!(errors.borrow().as_slice(), ["unknown Lua key: \"window\""]);
    assert_eq!(bridge.get_global("config.window.width"), LuaValue::Nil);
}

#[test]
fn test_empty_path_is_invalid() {
    let bridge = create_test_bridge();
    let errors = capture_errors(&bridge);

    let lookup = bridge.get_field_path("..", true);
    assert_eq!(lookup.error.as_ref().map(BridgeError::kind), Some(ErrorKind::InvalidPath));
    assert_eq!(lookup.pushed, 1);
    bridge.pop(lookup.pushed);
    assert_eq!(errors.borrow().len(), 1);
}

#[test]
fn test_empty_segments_are_ignored() {
    let bridge = create_test_bridge();
    bridge.run_string("a = { b = 5 }");
    assert_eq!(bridge.get_global("a..b."), LuaValue::Integer(5));
}

#[test]
fn test_indexing_a_number_is_invalid_path() {
    let bridge = create_test_bridge();
    let errors = capture_errors(&bridge);
    bridge.run_string("a = { b = 5 }");

    assert_eq!(bridge.get_global("a.b.c"), LuaValue::Nil);
    assert_eq!(errors.borrow().as_slice(), ["invalid Lua key: \"a.b.c\""]);
    assert_eq!(bridge.top(), 0);
}

#[test]
fn test_set_global_creates_leaf() {
    let bridge = create_test_bridge();
    bridge.run_string("player = { stats = {} }");
    assert!(bridge.set_global("player.stats.level", 4));
    assert_eq!(eval(&bridge, "return player.stats.level"), LuaValue::Integer(4));
    assert_eq!(bridge.top(), 0);
}

#[test]
fn test_set_global_needs_existing_containers() {
    let bridge = create_test_bridge();
    let errors = capture_errors(&bridge);
    bridge.run_string("player = {}");

    assert!(!bridge.set_global("player.stats.level", 4));
    assert_eq!(errors.borrow().as_slice(), ["unknown Lua key: \"stats\""]);
    assert_eq!(eval(&bridge, "return player.stats"), LuaValue::Nil);
    assert_eq!(bridge.top(), 0);
}

#[test]
fn test_set_through_non_container_is_reported() {
    let bridge = create_test_bridge();
    let errors = capture_errors(&bridge);
    bridge.run_string("a = { b = 'text' }");

    let result = bridge.set_field_path("a.b.c", &LuaValue::from(1), true);
    assert_eq!(result, Err(BridgeError::invalid_path("a.b.c")));
    assert_eq!(errors.borrow().len(), 1);
    assert_eq!(eval(&bridge, "return a.b"), LuaValue::from("text"));
}

#[test]
fn test_set_respects_newindex_metamethod() {
    let bridge = create_test_bridge();
    bridge.run_string(
        "log = {} guarded = setmetatable({}, { __newindex = function(t, k, v) rawset(t, k, v * 10) end })",
    );
    assert!(bridge.set_global("guarded.value", 3));
    assert_eq!(bridge.get_global("guarded.value"), LuaValue::Integer(30));
}

#[test]
fn test_get_respects_index_metamethod() {
    let bridge = create_test_bridge();
    bridge.run_string("defaults = setmetatable({}, { __index = function(_, k) return k .. '!' end })");
    assert_eq!(bridge.get_global("defaults.hello"), LuaValue::from("hello!"));
}

#[test]
fn test_walk_from_stack_top() {
    let bridge = create_test_bridge();
    let table = eval(&bridge, "return { inner = { value = 'deep' } }");
    assert!(bridge.push(&table).is_ok());

    let lookup = bridge.get_field_path("inner.value", false);
    assert!(lookup.is_ok());
    assert_eq!(lookup.pushed, 2);
    assert_eq!(bridge.to_value(-1).ok(), Some(LuaValue::from("deep")));
    bridge.pop(lookup.pushed + 1);
    assert_eq!(bridge.top(), 0);
}
