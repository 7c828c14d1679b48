//! Host-visible value stack
//!
//! Stack indices follow interpreter conventions: positive indices count from
//! the bottom starting at 1, negative indices count from the top (-1 is the
//! topmost value).

use mlua::{MultiValue, Value};

use super::LuaBridge;
use crate::error::{BridgeError, Result};
use crate::value::LuaValue;

/// Outcome of [`LuaBridge::get_field_path`].
///
/// `pushed` values are left on the stack in every case, so the caller can
/// pop them even when the lookup failed.
#[derive(Debug, Clone, PartialEq)]
pub struct PathLookup {
    pub pushed: usize,
    pub error: Option<BridgeError>,
}

impl PathLookup {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

fn split_path(path: &str) -> Vec<&str> {
    path.split('.').filter(|part| !part.is_empty()).collect()
}

impl LuaBridge {
    pub fn top(&self) -> usize {
        self.inner.stack.borrow().len()
    }

    /// Zero-based slot for a stack index
    fn slot(&self, index: i32) -> Result<usize> {
        let top = self.top();
        let invalid = BridgeError::InvalidIndex { index, top };
        let position = if index > 0 {
            usize::try_from(index - 1).map_err(|_| invalid.clone())?
        } else if index < 0 {
            let depth = usize::try_from(index.unsigned_abs()).map_err(|_| invalid.clone())?;
            top.checked_sub(depth).ok_or_else(|| invalid.clone())?
        } else {
            return Err(invalid);
        };
        if position < top { Ok(position) } else { Err(invalid) }
    }

    pub(crate) fn value_at(&self, index: i32) -> Result<Value> {
        let slot = self.slot(index)?;
        self.inner
            .stack
            .borrow()
            .get(slot)
            .cloned()
            .ok_or(BridgeError::InvalidIndex {
                index,
                top: self.top(),
            })
    }

    pub(crate) fn push_raw(&self, value: Value) {
        self.inner.stack.borrow_mut().push(value);
    }

    /// Pop down to `len` values. Dropped values are released after the
    /// stack borrow ends.
    pub(crate) fn truncate(&self, len: usize) {
        let removed: Vec<Value> = {
            let mut stack = self.inner.stack.borrow_mut();
            let len = len.min(stack.len());
            stack.drain(len..).collect()
        };
        drop(removed);
    }

    fn pop_raw(&self) -> Result<Value> {
        let mut stack = self.inner.stack.borrow_mut();
        let top = stack.len();
        stack.pop().ok_or(BridgeError::InvalidIndex { index: -1, top })
    }

    pub fn push(&self, value: &LuaValue) -> Result<()> {
        let lua = self.live_lua()?;
        let value = self.to_lua(&lua, value)?;
        self.push_raw(value);
        Ok(())
    }

    pub fn push_nil(&self) {
        self.push_raw(Value::Nil);
    }

    pub fn push_global_table(&self) -> Result<()> {
        let lua = self.live_lua()?;
        self.push_raw(Value::Table(lua.globals()));
        Ok(())
    }

    /// Push a copy of the value at `index`.
    pub fn push_index(&self, index: i32) -> Result<()> {
        let value = self.value_at(index)?;
        self.push_raw(value);
        Ok(())
    }

    pub fn new_table(&self) -> Result<()> {
        let lua = self.live_lua()?;
        let table = lua.create_table()?;
        self.push_raw(Value::Table(table));
        Ok(())
    }

    pub fn pop(&self, n: usize) {
        let top = self.top();
        self.truncate(top.saturating_sub(n));
    }

    pub fn to_value(&self, index: i32) -> Result<LuaValue> {
        let lua = self.live_lua()?;
        let value = self.value_at(index)?;
        Ok(self.from_lua(&lua, value)?)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Field access
    // ═══════════════════════════════════════════════════════════════════════════

    /// `container[key]`, honoring metamethods.
    pub(crate) fn index_value(&self, container: &Value, key: Value) -> Result<Value> {
        match container {
            Value::Table(table) => Ok(table.get::<Value>(key)?),
            Value::UserData(_) | Value::String(_) => {
                let helpers = self.helpers()?;
                Ok(helpers.index.call::<Value>((container.clone(), key))?)
            }
            other => Err(BridgeError::conversion("table", other.type_name())),
        }
    }

    /// `container[key] = value`, honoring metamethods.
    pub(crate) fn assign_value(&self, container: &Value, key: Value, value: Value) -> Result<()> {
        match container {
            Value::Table(table) => Ok(table.set(key, value)?),
            Value::UserData(_) => {
                let helpers = self.helpers()?;
                Ok(helpers.newindex.call::<()>((container.clone(), key, value))?)
            }
            other => Err(BridgeError::conversion("table", other.type_name())),
        }
    }

    /// Push `t[name]` where `t` is the value at `index`.
    pub fn get_field(&self, index: i32, name: &str) -> Result<()> {
        let lua = self.live_lua()?;
        let container = self.value_at(index)?;
        let key = Value::String(lua.create_string(name)?);
        let value = self.index_value(&container, key)?;
        self.push_raw(value);
        Ok(())
    }

    /// `t[name] = v` where `t` is the value at `index` and `v` the top value,
    /// which is popped.
    pub fn set_field(&self, index: i32, name: &str) -> Result<()> {
        let lua = self.live_lua()?;
        let container = self.value_at(index)?;
        let key = Value::String(lua.create_string(name)?);
        let value = self.pop_raw()?;
        self.assign_value(&container, key, value)
    }

    /// Push `t[n]`, honoring metamethods.
    pub fn get_index(&self, index: i32, n: i64) -> Result<()> {
        let container = self.value_at(index)?;
        let value = self.index_value(&container, Value::Integer(n))?;
        self.push_raw(value);
        Ok(())
    }

    /// Push `t[n]` without metamethods.
    pub fn raw_get_index(&self, index: i32, n: i64) -> Result<()> {
        let value = match self.value_at(index)? {
            Value::Table(table) => table.raw_get::<Value>(n)?,
            other => return Err(BridgeError::conversion("table", other.type_name())),
        };
        self.push_raw(value);
        Ok(())
    }

    /// `t[n] = v` without metamethods; `v` is popped.
    pub fn raw_set_index(&self, index: i32, n: i64) -> Result<()> {
        let container = self.value_at(index)?;
        let Value::Table(table) = container else {
            return Err(BridgeError::conversion("table", container.type_name()));
        };
        let value = self.pop_raw()?;
        table.raw_set(n, value)?;
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Dotted paths
    // ═══════════════════════════════════════════════════════════════════════════

    /// Walk `path` ("a.b.c"), pushing one value per segment.
    ///
    /// The walk starts at the global table when `from_global` is set (the
    /// table itself is pushed and counted), otherwise at the top value.
    /// Empty segments are ignored. A nil intermediate segment stops the walk
    /// with [`BridgeError::UnknownKey`]; a segment applied to a value that
    /// cannot be indexed pushes nil and stops with
    /// [`BridgeError::InvalidPath`]. A nil final value is not an error.
    /// Errors are also reported through the bridge.
    pub fn get_field_path(&self, path: &str, from_global: bool) -> PathLookup {
        let parts = split_path(path);
        if parts.is_empty() {
            self.push_nil();
            let err = BridgeError::invalid_path(path);
            self.report_error(&err);
            return PathLookup {
                pushed: 1,
                error: Some(err),
            };
        }

        let mut pushed = 0;
        if from_global {
            if let Err(err) = self.push_global_table() {
                self.report_error(&err);
                return PathLookup {
                    pushed,
                    error: Some(err),
                };
            }
            pushed += 1;
        }
        let (walked, error) = self.walk_path(path, &parts, true);
        if let Some(err) = &error {
            self.report_error(err);
        }
        PathLookup {
            pushed: pushed + walked,
            error,
        }
    }

    fn walk_path(&self, path: &str, parts: &[&str], leaf_may_be_nil: bool) -> (usize, Option<BridgeError>) {
        let mut pushed = 0;
        for (i, part) in parts.iter().enumerate() {
            match self.get_field(-1, part) {
                Ok(()) => pushed += 1,
                Err(err) => {
                    self.push_nil();
                    let err = match err {
                        BridgeError::Conversion { .. } | BridgeError::InvalidIndex { .. } => {
                            BridgeError::invalid_path(path)
                        }
                        other => other,
                    };
                    return (pushed + 1, Some(err));
                }
            }
            let is_leaf = i + 1 == parts.len();
            if !(is_leaf && leaf_may_be_nil) && matches!(self.value_at(-1), Ok(Value::Nil)) {
                return (pushed, Some(BridgeError::unknown_key(*part)));
            }
        }
        (pushed, None)
    }

    /// Assign `value` at `path`, leaving the stack as it was.
    ///
    /// Every segment but the last must resolve to a non-nil value. When the
    /// final container is neither a table nor userdata nothing is written
    /// and [`BridgeError::InvalidPath`] is returned. Errors are also
    /// reported through the bridge.
    pub fn set_field_path(&self, path: &str, value: &LuaValue, from_global: bool) -> Result<()> {
        let parts = split_path(path);
        let base = self.top();
        let result = match parts.split_last() {
            Some((leaf, containers)) => self.assign_path(path, leaf, containers, value, from_global),
            None => Err(BridgeError::invalid_path(path)),
        };
        self.truncate(base);
        if let Err(err) = &result {
            self.report_error(err);
        }
        result
    }

    fn assign_path(
        &self,
        path: &str,
        leaf: &str,
        containers: &[&str],
        value: &LuaValue,
        from_global: bool,
    ) -> Result<()> {
        if from_global {
            self.push_global_table()?;
        }
        let (_, error) = self.walk_path(path, containers, false);
        if let Some(err) = error {
            return Err(err);
        }
        let container = self.value_at(-1)?;
        if !matches!(container, Value::Table(_) | Value::UserData(_)) {
            return Err(BridgeError::invalid_path(path));
        }
        self.push(value)?;
        self.set_field(-2, leaf)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Calls
    // ═══════════════════════════════════════════════════════════════════════════

    /// Call the value below the top `n_args` values with those arguments.
    ///
    /// Callee and arguments are popped and the results pushed: all of them
    /// for `None`, otherwise padded with nil or truncated to `n`. Values
    /// that are not functions are called through their `__call` metamethod.
    /// On failure nothing is pushed and the message is stored as the last
    /// error, but not reported.
    pub fn protected_call(&self, n_args: usize, n_results: Option<usize>) -> Result<usize> {
        self.live_lua()?;
        let (callee, args) = {
            let mut stack = self.inner.stack.borrow_mut();
            let top = stack.len();
            let Some(start) = n_args.checked_add(1).and_then(|needed| top.checked_sub(needed)) else {
                return Err(BridgeError::InvalidIndex {
                    index: i32::try_from(n_args).map_or(i32::MIN, |n| -n.saturating_add(1)),
                    top,
                });
            };
            let mut drained: Vec<Value> = stack.drain(start..).collect();
            let args = drained.split_off(1);
            (drained.pop().unwrap_or(Value::Nil), args)
        };

        let outcome = match &callee {
            Value::Function(function) => function.call::<MultiValue>(args.into_iter().collect::<MultiValue>()),
            _ => {
                let helpers = self.helpers()?;
                helpers
                    .call
                    .call::<MultiValue>(std::iter::once(callee.clone()).chain(args).collect::<MultiValue>())
            }
        };
        drop(callee);

        match outcome {
            Ok(results) => {
                let mut results: Vec<Value> = results.into_iter().collect();
                if let Some(n) = n_results {
                    results.resize(n, Value::Nil);
                }
                let count = results.len();
                self.inner.stack.borrow_mut().extend(results);
                Ok(count)
            }
            Err(err) => {
                let err = BridgeError::from(err);
                self.set_last_error(&err.to_string());
                Err(err)
            }
        }
    }

    /// [`protected_call`](LuaBridge::protected_call), reporting a failure
    /// through the bridge's error channel.
    pub fn protected_call_reporting(&self, n_args: usize, n_results: Option<usize>) -> Result<usize> {
        let result = self.protected_call(n_args, n_results);
        if let Err(err) = &result {
            self.report_error(err);
        }
        result
    }
}
