//! Host object proxies, reflected functions and configured globals

use std::cell::Cell;
use std::rc::Rc;

use super::{capture_errors, capture_output, create_bridge_with, create_test_bridge, eval};
use lua_bridge::{
    BridgeConfig, BridgeError, FunctionRef, HostComponent, HostObject, LuaValue, ParamKind, ReflectedFunction,
};

fn hero() -> Rc<HostComponent> {
    HostComponent::new("Actor", "hero")
        .with_member("Score", 10)
        .with_member("Name", "Ayla")
        .with_function(
            ReflectedFunction::new("Add", |_, params| {
                params.set_return(params.integer(0) + params.integer(1));
                Ok(())
            })
            .param("a", ParamKind::Integer)
            .param("b", ParamKind::Integer)
            .returns(ParamKind::Integer),
        )
        .with_log_errors(false)
        .into_rc()
}

#[test]
fn test_member_read_through_proxy() {
    let bridge = create_test_bridge();
    let actor = hero();
    bridge.bind_global("hero", LuaValue::object(&actor));

    assert_eq!(eval(&bridge, "return hero.Score"), LuaValue::Integer(10));
    assert_eq!(eval(&bridge, "return hero.Name"), LuaValue::from("Ayla"));
    assert_eq!(eval(&bridge, "return tostring(hero)"), LuaValue::from("Actor hero"));
}

#[test]
fn test_exposed_member_wins_over_backing_table() {
    let bridge = create_test_bridge();
    let actor = HostComponent::new("Actor", "hero").into_rc();
    bridge.bind_global("hero", LuaValue::object(&actor));

    bridge.run_string("hero.Score = 1");
    assert_eq!(eval(&bridge, "return hero.Score"), LuaValue::Integer(1));
    assert!(actor.member_names().is_empty());

    actor.bind("Score", 10);
    assert_eq!(eval(&bridge, "return hero.Score"), LuaValue::Integer(10));
    assert_eq!(eval(&bridge, "return rawget(hero, 'Score')"), LuaValue::Nil);
}

#[test]
fn test_member_write_updates_host() {
    let bridge = create_test_bridge();
    let actor = hero();
    bridge.bind_global("hero", LuaValue::object(&actor));

    bridge.run_string("hero.Score = hero.Score + 5");
    assert_eq!(actor.get("Score"), LuaValue::Integer(15));

    bridge.run_string("hero.Extra = 'kept on the proxy'");
    assert_eq!(actor.member("Extra"), None);
    assert_eq!(eval(&bridge, "return hero.Extra"), LuaValue::from("kept on the proxy"));
}

#[test]
fn test_reflected_function_call() {
    let bridge = create_test_bridge();
    let actor = hero();
    bridge.bind_global("hero", LuaValue::object(&actor));
    assert_eq!(eval(&bridge, "return hero.Add(2, 3)"), LuaValue::Integer(5));
}

#[test]
fn test_arguments_are_coerced_and_zero_filled() {
    let bridge = create_test_bridge();
    let actor = hero();
    bridge.bind_global("hero", LuaValue::object(&actor));
    assert_eq!(eval(&bridge, "return hero.Add('4')"), LuaValue::Integer(4));
    assert_eq!(eval(&bridge, "return hero.Add(1, 2, 99)"), LuaValue::Integer(3));
}

#[test]
fn test_function_without_return_slot_returns_nil() {
    let bridge = create_test_bridge();
    let fired = Rc::new(Cell::new(0));
    let counter = fired.clone();
    let actor = HostComponent::new("Button", "ok")
        .with_function(ReflectedFunction::new("Press", move |_, _| {
            counter.set(counter.get() + 1);
            Ok(())
        }))
        .into_rc();
    bridge.bind_global("button", LuaValue::object(&actor));

    assert_eq!(eval(&bridge, "return button.Press()"), LuaValue::Nil);
    assert_eq!(fired.get(), 1);
}

#[test]
fn test_method_syntax_passes_receiver_first() {
    let bridge = create_test_bridge();
    let actor = HostComponent::new("Actor", "hero")
        .with_function(
            ReflectedFunction::new("Describe", |_, params| {
                params.set_return(params.value(0).is_nil());
                Ok(())
            })
            .param("receiver", ParamKind::Object)
            .returns(ParamKind::Bool),
        )
        .into_rc();
    bridge.bind_global("hero", LuaValue::object(&actor));

    assert_eq!(eval(&bridge, "return hero:Describe()"), LuaValue::Bool(false));
    assert_eq!(eval(&bridge, "return hero.Describe()"), LuaValue::Bool(true));
}

#[test]
fn test_host_call_sees_its_target() {
    let bridge = create_test_bridge();
    let actor = HostComponent::new("Actor", "hero")
        .with_function(
            ReflectedFunction::new("Who", |call, params| {
                let identity = call.target().map(|t| t.identity()).unwrap_or_default();
                params.set_return(identity);
                Ok(())
            })
            .returns(ParamKind::String),
        )
        .into_rc();
    bridge.bind_global("hero", LuaValue::object(&actor));
    assert_eq!(eval(&bridge, "return hero.Who()"), LuaValue::from("Actor hero"));
}

#[test]
fn test_proxy_identity_is_stable() {
    let bridge = create_test_bridge();
    let actor = hero();
    bridge.bind_global("a", LuaValue::object(&actor));
    bridge.bind_global("b", LuaValue::object(&actor));
    assert_eq!(eval(&bridge, "return a == b"), LuaValue::Bool(true));
    assert_eq!(bridge.proxy_count(), 1);
}

#[test]
fn test_proxy_maps_back_to_host_object() {
    let bridge = create_test_bridge();
    let actor = hero();
    bridge.bind_global("hero", LuaValue::object(&actor));
    bridge.run_string("copy = hero");
    assert_eq!(bridge.get_global("copy"), LuaValue::object(&actor));
}

#[test]
fn test_function_proxy_maps_back_to_function_ref() {
    let bridge = create_test_bridge();
    let actor = hero();
    bridge.bind_global("hero", LuaValue::object(&actor));
    let add = eval(&bridge, "return hero.Add");
    assert_eq!(add, LuaValue::Function(FunctionRef::new(&actor, "Add")));
    assert_eq!(
        bridge.call_value(&add, &[LuaValue::from(20), LuaValue::from(22)]),
        LuaValue::Integer(42)
    );
}

#[test]
fn test_script_metatables_cannot_pose_as_proxies() {
    let bridge = create_test_bridge();
    let actor = hero();
    bridge.bind_global("hero", LuaValue::object(&actor));
    bridge.run_string("seen = hero");

    let forged = eval(&bridge, "return setmetatable({}, { __hostid = 1 })");
    assert!(forged.is_table());
    assert_ne!(forged, LuaValue::object(&actor));

    let function = eval(&bridge, "return setmetatable({}, { __hostfn = 'Add' })");
    assert!(function.is_table());
    assert!(!matches!(function, LuaValue::Function(_)));
}

#[test]
fn test_tagged_script_table_keeps_its_contents() {
    let bridge = create_test_bridge();
    let table = eval(&bridge, "return setmetatable({ x = 1 }, { __hostid = 999 })");
    assert!(table.is_table());
    assert_eq!(bridge.table_get_field(&table, "x"), LuaValue::Integer(1));
}

#[test]
fn test_destroyed_object_reads_as_nil() {
    let bridge = create_test_bridge();
    let actor = hero();
    bridge.bind_global("hero", LuaValue::object(&actor));
    bridge.run_string("saved = hero");
    drop(actor);

    assert_eq!(eval(&bridge, "return hero"), LuaValue::Nil);
    assert_eq!(eval(&bridge, "return saved.Score"), LuaValue::Nil);
    assert_eq!(bridge.get_global("saved"), LuaValue::Nil);
}

#[test]
fn test_calling_function_of_destroyed_object_fails() {
    let bridge = create_test_bridge();
    let errors = capture_errors(&bridge);
    let actor = hero();
    bridge.bind_global("hero", LuaValue::object(&actor));
    bridge.run_string("add = hero.Add");
    drop(actor);

    assert_eq!(eval(&bridge, "return add(1, 2)"), LuaValue::Nil);
    assert_eq!(errors.borrow().len(), 1);
    assert!(errors.borrow().iter().any(|e| e.contains("invalid state for host function Add")));
}

#[test]
fn test_host_error_surfaces_to_script() {
    let bridge = create_test_bridge();
    let actor = HostComponent::new("Actor", "hero")
        .with_function(ReflectedFunction::new("Fail", |_, _| Err(BridgeError::host("refused"))))
        .into_rc();
    bridge.bind_global("hero", LuaValue::object(&actor));
    let caught = eval(
        &bridge,
        "local ok, err = pcall(hero.Fail) return not ok and tostring(err):find('refused') ~= nil",
    );
    assert_eq!(caught, LuaValue::Bool(true));
}

#[test]
fn test_configured_global_function() {
    let bridge = create_test_bridge();
    bridge.expose_function(
        ReflectedFunction::new("Double", |_, params| {
            params.set_return(params.float(0) * 2.0);
            Ok(())
        })
        .param("x", ParamKind::Float)
        .returns(ParamKind::Float),
    );
    assert_eq!(eval(&bridge, "return Double(1.25)"), LuaValue::Float(2.5));
    assert_eq!(eval(&bridge, "return rawget(_G, 'Double')"), LuaValue::Nil);
}

#[test]
fn test_configured_global_write_updates_binding() {
    let bridge = create_bridge_with(BridgeConfig::new("globals").with_global("Lives", 3));
    assert_eq!(eval(&bridge, "return Lives"), LuaValue::Integer(3));

    bridge.run_string("Lives = Lives - 1");
    assert_eq!(bridge.global_binding("Lives"), Some(LuaValue::Integer(2)));
    assert_eq!(eval(&bridge, "return rawget(_G, 'Lives')"), LuaValue::Nil);

    bridge.run_string("Other = 1");
    assert_eq!(eval(&bridge, "return rawget(_G, 'Other')"), LuaValue::Integer(1));
    assert_eq!(bridge.global_binding("Other"), None);
}

#[test]
fn test_print_is_routed_to_sink() {
    let bridge = create_test_bridge();
    let output = capture_output(&bridge);
    let actor = hero();
    bridge.bind_global("hero", LuaValue::object(&actor));

    bridge.run_string("print('score', hero.Score, nil, 1.5)");
    bridge.run_string("print(hero)");
    assert_eq!(output.lines(), vec!["score\t10\tnil\t1.5", "Actor hero"]);
}

#[test]
fn test_warnings_are_routed_to_sink() {
    let bridge = create_test_bridge();
    let output = capture_output(&bridge);
    bridge.run_string("warn('@on') warn('low ', 'fuel')");
    assert_eq!(output.warnings(), vec!["low fuel"]);
}
