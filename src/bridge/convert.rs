//! Marshalling between [`LuaValue`] and interpreter values

use std::rc::Rc;

use mlua::{Lua, Value};

use super::LuaBridge;
use crate::dispatch;
use crate::error::BridgeError;
use crate::value::{LuaValue, ScriptKind, ScriptRef};

impl LuaBridge {
    /// Host value to interpreter value.
    ///
    /// Host objects become (cached) proxies and function references become
    /// callable proxies. A destroyed host object, or a script reference that
    /// is detached or belongs to another bridge, becomes nil.
    pub(crate) fn to_lua(&self, lua: &Lua, value: &LuaValue) -> mlua::Result<Value> {
        Ok(match value {
            LuaValue::Nil => Value::Nil,
            LuaValue::Bool(b) => Value::Boolean(*b),
            LuaValue::Integer(n) => Value::Integer(*n),
            LuaValue::Float(n) => Value::Number(*n),
            LuaValue::String(s) => Value::String(lua.create_string(s)?),
            LuaValue::Object(host) => match host.upgrade() {
                Some(object) => Value::Table(dispatch::object_proxy(self, lua, &object)?),
                None => Value::Nil,
            },
            LuaValue::Function(function) => Value::Table(dispatch::function_proxy(self, lua, function)?),
            LuaValue::Script(script) if script.belongs_to(&self.inner) => {
                script.resolve().unwrap_or(Value::Nil)
            }
            LuaValue::Script(_) => Value::Nil,
        })
    }

    /// Interpreter value to host value.
    ///
    /// Proxies map back to the host object or function they stand for; any
    /// other table, function, coroutine or userdata is pinned in the
    /// reference registry.
    pub(crate) fn from_lua(&self, lua: &Lua, value: Value) -> mlua::Result<LuaValue> {
        Ok(match value {
            Value::Nil => LuaValue::Nil,
            Value::Boolean(b) => LuaValue::Bool(b),
            Value::Integer(n) => LuaValue::Integer(n),
            Value::Number(n) => LuaValue::Float(n),
            Value::String(s) => LuaValue::String(s.to_string_lossy().to_string()),
            Value::Table(table) => match dispatch::proxy_target(self, &table)? {
                Some(host) => host,
                None => self.pin(lua, ScriptKind::Table, Value::Table(table))?,
            },
            Value::Function(f) => self.pin(lua, ScriptKind::Function, Value::Function(f))?,
            Value::Thread(t) => self.pin(lua, ScriptKind::Thread, Value::Thread(t))?,
            Value::UserData(u) => self.pin(lua, ScriptKind::UserData, Value::UserData(u))?,
            _ => LuaValue::Nil,
        })
    }

    fn pin(&self, lua: &Lua, kind: ScriptKind, value: Value) -> mlua::Result<LuaValue> {
        let handle = self
            .inner
            .registry
            .borrow_mut()
            .insert(lua, value)
            .map_err(BridgeError::into_lua)?;
        Ok(LuaValue::Script(ScriptRef::new(kind, handle, Rc::downgrade(&self.inner))))
    }

    /// Build a host value from JSON. Arrays become sequences starting at
    /// index 1, objects become string-keyed tables.
    pub fn value_from_json(&self, json: &serde_json::Value) -> crate::Result<LuaValue> {
        if let Some(scalar) = LuaValue::from_json(json) {
            return Ok(scalar);
        }
        let lua = self.live_lua()?;
        let value = json_to_lua(&lua, json)?;
        Ok(self.from_lua(&lua, value)?)
    }

    /// JSON image of a value; tables are rendered recursively.
    ///
    /// A table whose keys are exactly `1..=n` becomes an array, any other
    /// table an object with stringified keys. Functions and host references
    /// have no image.
    pub fn value_to_json(&self, value: &LuaValue) -> Option<serde_json::Value> {
        match value {
            LuaValue::Script(script) if script.kind() == ScriptKind::Table => {
                let Value::Table(table) = script.resolve()? else {
                    return None;
                };
                table_to_json(&table, 0)
            }
            other => other.to_json(),
        }
    }
}

fn json_to_lua(lua: &Lua, json: &serde_json::Value) -> mlua::Result<Value> {
    Ok(match json {
        serde_json::Value::Null => Value::Nil,
        serde_json::Value::Bool(b) => Value::Boolean(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => Value::Number(n.as_f64().unwrap_or(0.0)),
        },
        serde_json::Value::String(s) => Value::String(lua.create_string(s)?),
        serde_json::Value::Array(items) => {
            let table = lua.create_table()?;
            for (i, item) in items.iter().enumerate() {
                table.raw_set(i + 1, json_to_lua(lua, item)?)?;
            }
            Value::Table(table)
        }
        serde_json::Value::Object(fields) => {
            let table = lua.create_table()?;
            for (key, item) in fields {
                table.raw_set(key.as_str(), json_to_lua(lua, item)?)?;
            }
            Value::Table(table)
        }
    })
}

/// Tables nested deeper than this (or cyclic) render as null.
const MAX_JSON_DEPTH: usize = 32;

fn table_to_json(table: &mlua::Table, depth: usize) -> Option<serde_json::Value> {
    if depth > MAX_JSON_DEPTH {
        return Some(serde_json::Value::Null);
    }
    let mut entries = Vec::new();
    for pair in table.pairs::<Value, Value>() {
        let (key, value) = pair.ok()?;
        entries.push((key, scalar_to_json(&value, depth)?));
    }
    let length = entries.len();
    let is_sequence = entries.iter().all(|(key, _)| {
        matches!(key, Value::Integer(i) if *i >= 1 && usize::try_from(*i).is_ok_and(|i| i <= length))
    });
    if is_sequence && length > 0 {
        entries.sort_by_key(|(key, _)| match key {
            Value::Integer(i) => *i,
            _ => 0,
        });
        return Some(serde_json::Value::Array(
            entries.into_iter().map(|(_, value)| value).collect(),
        ));
    }
    let mut object = serde_json::Map::new();
    for (key, value) in entries {
        let key = match &key {
            Value::String(s) => s.to_string_lossy().to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Number(n) => crate::value::format_float(*n),
            Value::Boolean(b) => b.to_string(),
            _ => continue,
        };
        object.insert(key, value);
    }
    Some(serde_json::Value::Object(object))
}

fn scalar_to_json(value: &Value, depth: usize) -> Option<serde_json::Value> {
    Some(match value {
        Value::Nil => serde_json::Value::Null,
        Value::Boolean(b) => serde_json::Value::Bool(*b),
        Value::Integer(i) => serde_json::Value::from(*i),
        Value::Number(n) => serde_json::Number::from_f64(*n).map_or(serde_json::Value::Null, serde_json::Value::Number),
        Value::String(s) => serde_json::Value::String(s.to_string_lossy().to_string()),
        Value::Table(t) => table_to_json(t, depth + 1)?,
        _ => serde_json::Value::Null,
    })
}
