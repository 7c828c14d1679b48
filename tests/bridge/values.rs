//! Value conversion tests

use super::{create_test_bridge, eval};
use lua_bridge::{LuaValue, ScriptKind};

#[test]
fn test_scalars_round_trip_through_script() {
    let bridge = create_test_bridge();
    assert_eq!(eval(&bridge, "return nil"), LuaValue::Nil);
    assert_eq!(eval(&bridge, "return true"), LuaValue::Bool(true));
    assert_eq!(eval(&bridge, "return 1 + 2 * 3"), LuaValue::Integer(7));
    assert_eq!(eval(&bridge, "return 7 / 2"), LuaValue::Float(3.5));
    assert_eq!(eval(&bridge, "return 'a' .. 1"), LuaValue::from("a1"));
}

#[test]
fn test_integer_and_float_stay_distinct() {
    let bridge = create_test_bridge();
    assert_eq!(eval(&bridge, "return 2.0"), LuaValue::Float(2.0));
    assert_eq!(eval(&bridge, "return 2.0").to_string(), "2.0");
    assert_eq!(eval(&bridge, "return 2"), LuaValue::Integer(2));
}

#[test]
fn test_pushed_values_reach_script() {
    let bridge = create_test_bridge();
    assert!(bridge.set_global("x", 41));
    assert!(bridge.set_global("name", "bridge"));
    assert_eq!(eval(&bridge, "return x + 1"), LuaValue::Integer(42));
    assert_eq!(eval(&bridge, "return #name"), LuaValue::Integer(6));
}

#[test]
fn test_tables_become_script_refs() {
    let bridge = create_test_bridge();
    let table = eval(&bridge, "return { 1, 2, 3 }");
    assert!(table.is_table());
    assert_eq!(table.type_name(), "table");
    assert_eq!(bridge.value_length(&table), 3);
}

#[test]
fn test_functions_and_threads_are_pinned() {
    let bridge = create_test_bridge();
    let function = eval(&bridge, "return function() end");
    assert_eq!(function.as_script().map(|r| r.kind()), Some(ScriptKind::Function));
    assert!(function.is_callable());

    let thread = eval(&bridge, "return coroutine.create(function() end)");
    assert_eq!(thread.as_script().map(|r| r.kind()), Some(ScriptKind::Thread));
}

#[test]
fn test_script_ref_identity() {
    let bridge = create_test_bridge();
    bridge.run_string("shared = {}");
    let a = bridge.get_global("shared");
    let b = bridge.get_global("shared");
    let other = eval(&bridge, "return {}");
    assert_eq!(a, b);
    assert_ne!(a, other);
}

#[test]
fn test_string_length_in_bytes() {
    let bridge = create_test_bridge();
    assert_eq!(bridge.value_length(&LuaValue::from("héllo")), 6);
    assert_eq!(bridge.value_length(&LuaValue::Integer(5)), 0);
}

#[test]
fn test_value_from_json() {
    let bridge = create_test_bridge();
    let value = bridge
        .value_from_json(&serde_json::json!({ "name": "hero", "stats": [3, 5, 8] }))
        .unwrap_or_default();
    assert!(value.is_table());
    assert_eq!(bridge.table_get_field(&value, "name"), LuaValue::from("hero"));

    let stats = bridge.table_get_field(&value, "stats");
    assert_eq!(bridge.value_length(&stats), 3);
    assert_eq!(bridge.table_get_index(&stats, 1), LuaValue::Integer(3));
}

#[test]
fn test_value_to_json() {
    let bridge = create_test_bridge();
    let list = eval(&bridge, "return { 'a', 'b' }");
    assert_eq!(bridge.value_to_json(&list), Some(serde_json::json!(["a", "b"])));

    let record = eval(&bridge, "return { level = 3, tags = { 'x' } }");
    assert_eq!(
        bridge.value_to_json(&record),
        Some(serde_json::json!({ "level": 3, "tags": ["x"] }))
    );
}

#[test]
fn test_foreign_script_ref_pushes_nil() {
    let first = create_test_bridge();
    let second = create_test_bridge();
    let table = eval(&first, "return {}");
    assert!(second.set_global("borrowed", table));
    assert_eq!(eval(&second, "return borrowed == nil"), LuaValue::Bool(true));
}
