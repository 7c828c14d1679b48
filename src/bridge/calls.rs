//! Host-side conveniences built on the stack primitives
//!
//! Every helper here restores the stack to its previous height and reports
//! failures through the bridge instead of returning them.

use std::rc::Rc;

use mlua::Value;

use super::LuaBridge;
use crate::error::{BridgeError, Result};
use crate::host::HostObject;
use crate::value::{HostRef, LuaValue};

fn first(values: Vec<LuaValue>) -> LuaValue {
    values.into_iter().next().unwrap_or_default()
}

impl LuaBridge {
    /// Convert every value from stack slot `start` (zero-based) upwards.
    fn values_from(&self, start: usize) -> Vec<LuaValue> {
        let raw: Vec<Value> = self
            .inner
            .stack
            .borrow()
            .get(start..)
            .map(<[Value]>::to_vec)
            .unwrap_or_default();
        let Some(lua) = self.inner.lua() else {
            return Vec::new();
        };
        raw.into_iter()
            .map(|value| {
                self.from_lua(&lua, value).unwrap_or_else(|err| {
                    self.report_error(&BridgeError::from(err));
                    LuaValue::Nil
                })
            })
            .collect()
    }

    /// Call the value on top of the stack, then truncate to `base`.
    fn invoke_top(
        &self,
        base: usize,
        receiver: Option<&LuaValue>,
        args: &[LuaValue],
        target: Option<&Rc<dyn HostObject>>,
    ) -> Vec<LuaValue> {
        let callee = self.top().saturating_sub(1);
        let mut n_args = 0;
        for arg in receiver.into_iter().chain(args) {
            if let Err(err) = self.push(arg) {
                self.report_for(target, &err);
                self.truncate(base);
                return Vec::new();
            }
            n_args += 1;
        }
        let results = match self.protected_call(n_args, None) {
            Ok(_) => self.values_from(callee),
            Err(err) => {
                self.report_for(target, &err);
                Vec::new()
            }
        };
        self.truncate(base);
        results
    }

    fn read_path(&self, path: &str, from_global: bool) -> LuaValue {
        let base = self.top();
        let lookup = self.get_field_path(path, from_global);
        let value = if lookup.is_ok() {
            self.to_value(-1).unwrap_or_else(|err| {
                self.report_error(&err);
                LuaValue::Nil
            })
        } else {
            LuaValue::Nil
        };
        self.truncate(base);
        value
    }

    /// Resolve a script reference to the table it pins.
    fn script_table(&self, table: &LuaValue) -> Result<mlua::Table> {
        let LuaValue::Script(script) = table else {
            return Err(BridgeError::conversion("table", table.type_name()));
        };
        if !script.belongs_to(&self.inner) {
            return Err(BridgeError::Closed);
        }
        match script.resolve() {
            Some(Value::Table(t)) => Ok(t),
            Some(other) => Err(BridgeError::conversion("table", other.type_name())),
            None => Err(BridgeError::Closed),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Globals
    // ═══════════════════════════════════════════════════════════════════════════

    /// Value at a dotted global path, or nil on failure
    pub fn get_global(&self, path: &str) -> LuaValue {
        self.read_path(path, true)
    }

    /// Assign a dotted global path; false on failure
    pub fn set_global(&self, path: &str, value: impl Into<LuaValue>) -> bool {
        self.set_field_path(path, &value.into(), true).is_ok()
    }

    /// Call the function at a dotted global path, returning its first result.
    pub fn call_global(&self, path: &str, args: &[LuaValue]) -> LuaValue {
        first(self.call_global_multi(path, args))
    }

    pub fn call_global_multi(&self, path: &str, args: &[LuaValue]) -> Vec<LuaValue> {
        let base = self.top();
        if !self.get_field_path(path, true).is_ok() {
            self.truncate(base);
            return Vec::new();
        }
        self.invoke_top(base, None, args, None)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Calling values
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn call_value(&self, callable: &LuaValue, args: &[LuaValue]) -> LuaValue {
        first(self.call_value_multi(callable, args))
    }

    pub fn call_value_multi(&self, callable: &LuaValue, args: &[LuaValue]) -> Vec<LuaValue> {
        let base = self.top();
        if let Err(err) = self.push(callable) {
            self.report_error(&err);
            return Vec::new();
        }
        self.invoke_top(base, None, args, None)
    }

    /// Like [`call_value`](LuaBridge::call_value); nil is silently skipped.
    pub fn call_value_if_not_nil(&self, callable: &LuaValue, args: &[LuaValue]) -> LuaValue {
        first(self.call_value_if_not_nil_multi(callable, args))
    }

    pub fn call_value_if_not_nil_multi(&self, callable: &LuaValue, args: &[LuaValue]) -> Vec<LuaValue> {
        if callable.is_nil() {
            return Vec::new();
        }
        self.call_value_multi(callable, args)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Tables
    // ═══════════════════════════════════════════════════════════════════════════

    /// A fresh empty table, or nil when no interpreter is live
    pub fn create_table(&self) -> LuaValue {
        let base = self.top();
        let table = match self.new_table() {
            Ok(()) => self.to_value(-1),
            Err(err) => Err(err),
        };
        self.truncate(base);
        table.unwrap_or_else(|err| {
            self.report_error(&err);
            LuaValue::Nil
        })
    }

    /// Call `table[key](args...)`.
    pub fn table_call_key(&self, table: &LuaValue, key: &str, args: &[LuaValue]) -> Vec<LuaValue> {
        let base = self.top();
        let pushed = self.push(table).and_then(|()| self.get_field(-1, key));
        if let Err(err) = pushed {
            self.report_error(&err);
            self.truncate(base);
            return Vec::new();
        }
        self.invoke_top(base, None, args, None)
    }

    /// Call `table[index](args...)`.
    pub fn table_call_index(&self, table: &LuaValue, index: i64, args: &[LuaValue]) -> Vec<LuaValue> {
        let base = self.top();
        let pushed = self.push(table).and_then(|()| self.get_index(-1, index));
        if let Err(err) = pushed {
            self.report_error(&err);
            self.truncate(base);
            return Vec::new();
        }
        self.invoke_top(base, None, args, None)
    }

    pub fn table_get_field(&self, table: &LuaValue, key: &str) -> LuaValue {
        let base = self.top();
        let value = self
            .push(table)
            .and_then(|()| self.get_field(-1, key))
            .and_then(|()| self.to_value(-1));
        self.truncate(base);
        value.unwrap_or_else(|err| {
            self.report_error(&err);
            LuaValue::Nil
        })
    }

    pub fn table_set_field(&self, table: &LuaValue, key: &str, value: impl Into<LuaValue>) -> bool {
        let value = value.into();
        let base = self.top();
        let outcome = self
            .push(table)
            .and_then(|()| self.push(&value))
            .and_then(|()| self.set_field(-2, key));
        self.truncate(base);
        self.settle(outcome)
    }

    pub fn table_get_index(&self, table: &LuaValue, index: i64) -> LuaValue {
        let base = self.top();
        let value = self
            .push(table)
            .and_then(|()| self.get_index(-1, index))
            .and_then(|()| self.to_value(-1));
        self.truncate(base);
        value.unwrap_or_else(|err| {
            self.report_error(&err);
            LuaValue::Nil
        })
    }

    pub fn table_set_index(&self, table: &LuaValue, index: i64, value: impl Into<LuaValue>) -> bool {
        let value = value.into();
        let outcome = self.live_lua().and_then(|lua| {
            let container = Value::Table(self.script_table(table)?);
            let value = self.to_lua(&lua, &value)?;
            self.assign_value(&container, Value::Integer(index), value)
        });
        self.settle(outcome)
    }

    /// Keys of a table in traversal order (raw, no metamethods)
    pub fn table_keys(&self, table: &LuaValue) -> Vec<LuaValue> {
        self.table_pairs(table).into_iter().map(|(key, _)| key).collect()
    }

    /// Values of a table in traversal order (raw, no metamethods)
    pub fn table_values(&self, table: &LuaValue) -> Vec<LuaValue> {
        self.table_pairs(table).into_iter().map(|(_, value)| value).collect()
    }

    pub fn table_pairs(&self, table: &LuaValue) -> Vec<(LuaValue, LuaValue)> {
        let collected = self.live_lua().and_then(|lua| {
            let table = self.script_table(table)?;
            let mut pairs = Vec::new();
            for pair in table.pairs::<Value, Value>() {
                let (key, value) = pair?;
                pairs.push((self.from_lua(&lua, key)?, self.from_lua(&lua, value)?));
            }
            Ok(pairs)
        });
        collected.unwrap_or_else(|err| {
            self.report_error(&err);
            Vec::new()
        })
    }

    /// Length of a string (bytes) or table (`#t`, honoring `__len`); 0 otherwise
    pub fn value_length(&self, value: &LuaValue) -> i64 {
        match value {
            LuaValue::String(s) => i64::try_from(s.len()).unwrap_or(i64::MAX),
            LuaValue::Script(_) if value.is_table() => {
                let length = self
                    .script_table(value)
                    .and_then(|table| Ok(table.len()?));
                length.unwrap_or_else(|err| {
                    self.report_error(&err);
                    0
                })
            }
            _ => 0,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Host objects
    // ═══════════════════════════════════════════════════════════════════════════

    /// Value at a dotted path starting at the object's proxy
    pub fn object_get_field(&self, object: impl Into<HostRef>, path: &str) -> LuaValue {
        let object = LuaValue::Object(object.into());
        let base = self.top();
        if let Err(err) = self.push(&object) {
            self.report_error(&err);
            return LuaValue::Nil;
        }
        let value = self.read_path(path, false);
        self.truncate(base);
        value
    }

    pub fn object_set_field(&self, object: impl Into<HostRef>, path: &str, value: impl Into<LuaValue>) -> bool {
        let object = LuaValue::Object(object.into());
        let base = self.top();
        if let Err(err) = self.push(&object) {
            self.report_error(&err);
            return false;
        }
        let outcome = self.set_field_path(path, &value.into(), false);
        self.truncate(base);
        outcome.is_ok()
    }

    /// Call `object.name(object, args...)`, returning the first result.
    ///
    /// Errors raised by the call are offered to the object first.
    pub fn call_method(&self, object: impl Into<HostRef>, name: &str, args: &[LuaValue]) -> LuaValue {
        first(self.call_method_multi(object, name, args))
    }

    pub fn call_method_multi(&self, object: impl Into<HostRef>, name: &str, args: &[LuaValue]) -> Vec<LuaValue> {
        let host = object.into();
        let target = host.upgrade();
        let receiver = LuaValue::Object(host);
        let base = self.top();
        if let Err(err) = self.push(&receiver) {
            self.report_for(target.as_ref(), &err);
            return Vec::new();
        }
        if !self.get_field_path(name, false).is_ok() {
            self.truncate(base);
            return Vec::new();
        }
        self.invoke_top(base, Some(&receiver), args, target.as_ref())
    }

    fn settle(&self, outcome: Result<()>) -> bool {
        match outcome {
            Ok(()) => true,
            Err(err) => {
                self.report_error(&err);
                false
            }
        }
    }
}
