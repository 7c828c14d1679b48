//! Script-backed event delegates
//!
//! A [`ScriptDelegate`] lets host events fire a script callable. The
//! delegate holds the bridge weakly: once the bridge is gone, invoking it
//! does nothing.

use std::cell::{Cell, RefCell};
use std::rc::Weak;

use tracing::debug;

use crate::bridge::{BridgeInner, LuaBridge};
use crate::host::{ParamKind, ParamSpec};
use crate::value::LuaValue;

pub struct ScriptDelegate {
    bridge: Weak<BridgeInner>,
    callable: LuaValue,
    params: Vec<ParamSpec>,
}

impl ScriptDelegate {
    pub fn new(bridge: &LuaBridge, callable: LuaValue) -> Self {
        ScriptDelegate {
            bridge: bridge.downgrade(),
            callable,
            params: Vec::new(),
        }
    }

    /// Declare the event signature. Arguments are coerced to the declared
    /// kinds; without a signature they are passed through as-is.
    pub fn param(mut self, name: impl Into<String>, kind: ParamKind) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            kind,
        });
        self
    }

    pub fn callable(&self) -> &LuaValue {
        &self.callable
    }

    /// Whether invoking would reach a live interpreter
    pub fn is_bound(&self) -> bool {
        !self.callable.is_nil() && LuaBridge::from_weak(&self.bridge).is_some_and(|bridge| bridge.is_live())
    }

    pub fn invoke(&self, args: &[LuaValue]) -> Vec<LuaValue> {
        let Some(bridge) = LuaBridge::from_weak(&self.bridge) else {
            debug!("delegate invoked after its bridge was dropped");
            return Vec::new();
        };
        if self.params.is_empty() {
            return bridge.call_value_if_not_nil_multi(&self.callable, args);
        }
        let args: Vec<LuaValue> = self
            .params
            .iter()
            .enumerate()
            .map(|(i, spec)| spec.kind.coerce(args.get(i).cloned().unwrap_or_default()))
            .collect();
        bridge.call_value_if_not_nil_multi(&self.callable, &args)
    }
}

/// Ordered set of delegates fired together
#[derive(Default)]
pub struct MulticastDelegate {
    delegates: RefCell<Vec<ScriptDelegate>>,
    /// Bumped by every `clear`, so a running broadcast can tell.
    clears: Cell<u64>,
}

impl MulticastDelegate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, delegate: ScriptDelegate) {
        self.delegates.borrow_mut().push(delegate);
    }

    pub fn clear(&self) {
        self.clears.set(self.clears.get().wrapping_add(1));
        let removed = std::mem::take(&mut *self.delegates.borrow_mut());
        drop(removed);
    }

    pub fn len(&self) -> usize {
        self.delegates.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.delegates.borrow().is_empty()
    }

    /// Invoke every bound delegate in registration order, dropping the ones
    /// whose bridge is gone. Returns how many were invoked.
    ///
    /// Delegates added while broadcasting fire from the next broadcast on.
    /// A `clear` made by a callback removes every delegate, including the
    /// ones this broadcast has not reached yet.
    pub fn broadcast(&self, args: &[LuaValue]) -> usize {
        let clears = self.clears.get();
        let current = std::mem::take(&mut *self.delegates.borrow_mut());
        let mut fired = 0;
        let mut kept = Vec::with_capacity(current.len());
        for delegate in current {
            if self.clears.get() != clears {
                break;
            }
            if delegate.bridge.strong_count() == 0 {
                continue;
            }
            if delegate.is_bound() {
                delegate.invoke(args);
                fired += 1;
            }
            kept.push(delegate);
        }
        if self.clears.get() != clears {
            return fired;
        }
        let mut delegates = self.delegates.borrow_mut();
        let added = std::mem::replace(&mut *delegates, kept);
        delegates.extend(added);
        fired
    }
}
