//! Nested host/script calls and deferred error reporting

use std::cell::RefCell;
use std::rc::Rc;

use super::{capture_errors, create_test_bridge, eval};
use lua_bridge::{HostComponent, LuaValue, ParamKind, ReflectedFunction};

#[test]
fn test_nested_error_is_deferred_until_idle() {
    let bridge = create_test_bridge();
    let errors = capture_errors(&bridge);
    let seen_inside = Rc::new(RefCell::new(None));
    let probe = seen_inside.clone();
    let observer = errors.clone();

    bridge.expose_function(ReflectedFunction::new("Nested", move |call, _| {
        call.bridge().run_string("error('inner failure')");
        *probe.borrow_mut() = Some((observer.borrow().len(), call.bridge().pending_errors()));
        Ok(())
    }));

    bridge.run_string("Nested()");

    assert_eq!(*seen_inside.borrow(), Some((0, 1)));
    assert_eq!(errors.borrow().len(), 1);
    assert!(errors.borrow().iter().all(|e| e.contains("inner failure")));
    assert_eq!(bridge.pending_errors(), 0);
    assert_eq!(bridge.depth(), 0);
}

#[test]
fn test_deferred_errors_keep_order() {
    let bridge = create_test_bridge();
    let errors = capture_errors(&bridge);
    bridge.expose_function(ReflectedFunction::new("Twice", |call, _| {
        call.bridge().run_string("error('first')");
        call.bridge().run_string("error('second')");
        Ok(())
    }));

    bridge.run_string("Twice()");

    let errors = errors.borrow();
    assert_eq!(errors.len(), 2);
    assert!(errors.first().is_some_and(|e| e.contains("first")));
    assert!(errors.get(1).is_some_and(|e| e.contains("second")));
}

#[test]
fn test_depth_tracks_nesting() {
    let bridge = create_test_bridge();
    let depths = Rc::new(RefCell::new(Vec::new()));
    let record = depths.clone();
    bridge.expose_function(
        ReflectedFunction::new("Depth", move |call, params| {
            let depth = call.bridge().depth();
            record.borrow_mut().push(depth);
            if params.integer(0) > 0 {
                call.bridge()
                    .call_global("Depth", &[LuaValue::from(params.integer(0) - 1)]);
            }
            Ok(())
        })
        .param("remaining", ParamKind::Integer),
    );

    bridge.run_string("Depth(2)");
    assert_eq!(*depths.borrow(), vec![1, 2, 3]);
    assert_eq!(bridge.depth(), 0);
}

#[test]
fn test_component_receives_deferred_errors() {
    let bridge = create_test_bridge();
    let errors = capture_errors(&bridge);
    let actor = HostComponent::new("Actor", "hero")
        .with_log_errors(false)
        .with_function(ReflectedFunction::new("Think", |call, _| {
            call.bridge().run_string("error('bad thought')");
            Ok(())
        }))
        .into_rc();
    bridge.bind_global("hero", LuaValue::object(&actor));

    bridge.run_string("hero.Think()");

    assert_eq!(actor.received_errors().len(), 1);
    assert!(errors.borrow().is_empty());
}

#[test]
fn test_script_continues_after_nested_failure() {
    let bridge = create_test_bridge();
    let _errors = capture_errors(&bridge);
    bridge.expose_function(
        ReflectedFunction::new("Probe", |call, params| {
            let value = call.bridge().run_string("error('ignored')");
            params.set_return(value.is_nil());
            Ok(())
        })
        .returns(ParamKind::Bool),
    );
    assert_eq!(eval(&bridge, "return Probe() and 'went on'"), LuaValue::from("went on"));
}

#[test]
fn test_method_errors_go_to_the_object() {
    let bridge = create_test_bridge();
    let errors = capture_errors(&bridge);
    let actor = HostComponent::new("Actor", "hero").with_log_errors(false).into_rc();
    bridge.bind_global("hero", LuaValue::object(&actor));
    bridge.run_string("function hero:Explode() error('kaboom') end");

    assert_eq!(bridge.call_method(&actor, "Explode", &[]), LuaValue::Nil);
    assert_eq!(actor.received_errors().len(), 1);
    assert!(actor.received_errors().iter().all(|e| e.contains("kaboom")));
    assert!(errors.borrow().is_empty());
}
