//! Script delegates fired from the host

use std::rc::Rc;

use super::{create_test_bridge, eval};
use lua_bridge::{LuaBridge, LuaValue, MulticastDelegate, ParamKind, ReflectedFunction, ScriptDelegate};

fn listener(bridge: &LuaBridge, code: &str) -> ScriptDelegate {
    ScriptDelegate::new(bridge, eval(bridge, code))
}

#[test]
fn test_delegate_invokes_callable() {
    let bridge = create_test_bridge();
    let callable = eval(&bridge, "return function(a, b) return a .. b, 'done' end");
    let delegate = ScriptDelegate::new(&bridge, callable);

    assert!(delegate.is_bound());
    assert_eq!(
        delegate.invoke(&[LuaValue::from("on"), LuaValue::from("Hit")]),
        vec![LuaValue::from("onHit"), LuaValue::from("done")]
    );
}

#[test]
fn test_delegate_coerces_to_signature() {
    let bridge = create_test_bridge();
    let callable = eval(&bridge, "return function(n, flag) return math.type(n), flag end");
    let delegate = ScriptDelegate::new(&bridge, callable)
        .param("amount", ParamKind::Integer)
        .param("critical", ParamKind::Bool);

    assert_eq!(
        delegate.invoke(&[LuaValue::from("12")]),
        vec![LuaValue::from("integer"), LuaValue::Bool(false)]
    );
}

#[test]
fn test_nil_delegate_is_unbound() {
    let bridge = create_test_bridge();
    let delegate = ScriptDelegate::new(&bridge, LuaValue::Nil);
    assert!(!delegate.is_bound());
    assert!(delegate.invoke(&[]).is_empty());
    assert_eq!(bridge.last_error(), None);
}

#[test]
fn test_delegate_outlives_bridge() {
    let bridge = create_test_bridge();
    let delegate = ScriptDelegate::new(&bridge, eval(&bridge, "return function() return 1 end"));
    drop(bridge);

    assert!(!delegate.is_bound());
    assert!(delegate.invoke(&[]).is_empty());
}

#[test]
fn test_multicast_broadcast() {
    let bridge = create_test_bridge();
    bridge.run_string("fired = {}");
    let listeners = MulticastDelegate::new();
    for tag in ["a", "b"] {
        let code = format!("return function(x) fired[#fired + 1] = '{tag}' .. x end");
        listeners.add(ScriptDelegate::new(&bridge, eval(&bridge, &code)));
    }
    listeners.add(ScriptDelegate::new(&bridge, LuaValue::Nil));

    assert_eq!(listeners.broadcast(&[LuaValue::from(1)]), 2);
    assert_eq!(listeners.len(), 3);
    assert_eq!(eval(&bridge, "return table.concat(fired, ',')"), LuaValue::from("a1,b1"));
}

#[test]
fn test_multicast_drops_dead_bridges() {
    let kept = create_test_bridge();
    let listeners = MulticastDelegate::new();
    listeners.add(ScriptDelegate::new(&kept, eval(&kept, "return function() end")));
    {
        let gone = create_test_bridge();
        listeners.add(ScriptDelegate::new(&gone, eval(&gone, "return function() end")));
    }

    assert_eq!(listeners.broadcast(&[]), 1);
    assert_eq!(listeners.len(), 1);

    listeners.clear();
    assert!(listeners.is_empty());
}

#[test]
fn test_clear_during_broadcast_sticks() {
    let bridge = create_test_bridge();
    bridge.run_string("fired = {}");
    let listeners = Rc::new(MulticastDelegate::new());
    let inner = listeners.clone();
    let resubscribe = bridge.clone();
    bridge.expose_function(ReflectedFunction::new("Unsubscribe", move |_, _| {
        inner.clear();
        inner.add(listener(&resubscribe, "return function() fired[#fired + 1] = 'late' end"));
        Ok(())
    }));
    listeners.add(listener(&bridge, "return function() fired[#fired + 1] = 'a'; Unsubscribe() end"));
    listeners.add(listener(&bridge, "return function() fired[#fired + 1] = 'b' end"));

    assert_eq!(listeners.broadcast(&[]), 1);
    assert_eq!(listeners.len(), 1);
    assert_eq!(eval(&bridge, "return table.concat(fired, ',')"), LuaValue::from("a"));

    assert_eq!(listeners.broadcast(&[]), 1);
    assert_eq!(eval(&bridge, "return table.concat(fired, ',')"), LuaValue::from("a,late"));
}

#[test]
fn test_add_during_broadcast_is_kept() {
    let bridge = create_test_bridge();
    bridge.run_string("count = 0");
    let listeners = Rc::new(MulticastDelegate::new());
    let inner = listeners.clone();
    let subscriber = bridge.clone();
    bridge.expose_function(ReflectedFunction::new("Subscribe", move |_, _| {
        inner.add(listener(&subscriber, "return function() count = count + 10 end"));
        Ok(())
    }));
    listeners.add(listener(&bridge, "return function() count = count + 1; Subscribe() end"));

    assert_eq!(listeners.broadcast(&[]), 1);
    assert_eq!(listeners.len(), 2);
    assert_eq!(bridge.get_global("count"), LuaValue::Integer(1));
}
