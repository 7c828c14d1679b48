//! Proxy dispatch
//!
//! Host objects and host functions are represented in the interpreter by
//! empty tables whose metatables route every access back to the host:
//!
//! - object proxies resolve reads through [`HostObject::member`] and writes
//!   through [`HostObject::set_member`], falling back to a per-proxy
//!   backing table for names the object does not expose;
//! - function proxies are callable; the call shim marshals arguments into a
//!   zeroed [`ParamBlock`], tracks reentrancy depth and flushes deferred
//!   errors once the outermost host call returns;
//! - the global table gets a metatable serving the configured globals.
//!
//! What a proxy stands for is recorded in a weak-keyed table private to the
//! bridge, so values can be mapped back when they cross into the host again
//! and scripts cannot forge or relabel a proxy. Callbacks only hold weak
//! references to the bridge and to host objects.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use mlua::{Lua, MultiValue, Table, Value};
use tracing::trace;

use crate::bridge::{BridgeInner, LuaBridge};
use crate::error::BridgeError;
use crate::host::{HostCall, HostObject, ParamBlock};
use crate::output::OutputLevel;
use crate::prelude::FxHashMap;
use crate::source::{ScriptSource, chunk_name, resolve_path};
use crate::value::{FunctionRef, HostRef, LuaValue};

/// Metatable field holding the object proxy a function proxy is bound to
const HOST_SELF: &str = "__hostself";
/// Metatable field holding an object proxy's backing table
const BACKING: &str = "__backing";

// ═══════════════════════════════════════════════════════════════════════════════
// Proxy cache
// ═══════════════════════════════════════════════════════════════════════════════

struct ObjectProxy {
    id: i64,
    host: HostRef,
    table: Table,
}

/// One proxy per live host object, so identity is stable across crossings.
#[derive(Default)]
pub(crate) struct ProxyCache {
    next_id: i64,
    by_addr: FxHashMap<usize, ObjectProxy>,
    by_id: FxHashMap<i64, HostRef>,
}

impl ProxyCache {
    pub(crate) fn clear(&mut self) {
        self.by_addr.clear();
        self.by_id.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.by_addr.len()
    }

    fn lookup(&self, host: &HostRef) -> Option<Table> {
        self.by_addr
            .get(&host.addr())
            .filter(|proxy| proxy.host.is_alive() && proxy.host.ptr_eq(host))
            .map(|proxy| proxy.table.clone())
    }

    fn host_for(&self, id: i64) -> Option<HostRef> {
        self.by_id.get(&id).filter(|host| host.is_alive()).cloned()
    }

    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    /// Forget proxies whose host object is gone. Returns the dropped tables
    /// so they are released outside the cache borrow.
    fn prune(&mut self) -> Vec<Table> {
        let dead: Vec<usize> = self
            .by_addr
            .iter()
            .filter(|(_, proxy)| !proxy.host.is_alive())
            .map(|(addr, _)| *addr)
            .collect();
        let mut released = Vec::with_capacity(dead.len());
        for addr in dead {
            if let Some(proxy) = self.by_addr.remove(&addr) {
                self.by_id.remove(&proxy.id);
                released.push(proxy.table);
            }
        }
        released
    }

    fn insert(&mut self, id: i64, host: HostRef, table: Table) -> Option<Table> {
        self.by_id.insert(id, host.clone());
        self.by_addr
            .insert(host.addr(), ObjectProxy { id, host, table })
            .map(|previous| previous.table)
    }
}

fn bridge_from(weak: &Weak<BridgeInner>) -> mlua::Result<LuaBridge> {
    LuaBridge::from_weak(weak).ok_or_else(|| BridgeError::Closed.into_lua())
}

/// The private proxy tag table of the live interpreter.
fn tags(bridge: &LuaBridge) -> mlua::Result<Table> {
    Ok(bridge.helpers().map_err(BridgeError::into_lua)?.tags.clone())
}

fn backing(proxy: &Table) -> mlua::Result<Table> {
    match proxy.metatable() {
        Some(mt) => mt.raw_get(BACKING),
        None => Err(BridgeError::host("host proxy lost its metatable").into_lua()),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Object proxies
// ═══════════════════════════════════════════════════════════════════════════════

/// The proxy standing for `object`, created on first use.
pub(crate) fn object_proxy(bridge: &LuaBridge, lua: &Lua, object: &Rc<dyn HostObject>) -> mlua::Result<Table> {
    let host = HostRef::from_dyn(object);
    let cached = bridge.inner.proxies.borrow().lookup(&host);
    if let Some(table) = cached {
        return Ok(table);
    }

    let released = bridge.inner.proxies.borrow_mut().prune();
    drop(released);
    let id = bridge.inner.proxies.borrow_mut().allocate_id();

    let proxy = lua.create_table()?;
    let mt = lua.create_table()?;
    mt.raw_set(BACKING, lua.create_table()?)?;
    mt.raw_set("__metatable", false)?;

    let weak = bridge.downgrade();
    let target = host.clone();
    mt.raw_set(
        "__index",
        lua.create_function(move |lua, (proxy, key): (Table, Value)| {
            object_index(&bridge_from(&weak)?, lua, &target, &proxy, key)
        })?,
    )?;

    let weak = bridge.downgrade();
    let target = host.clone();
    mt.raw_set(
        "__newindex",
        lua.create_function(move |lua, (proxy, key, value): (Table, Value, Value)| {
            object_newindex(&bridge_from(&weak)?, lua, &target, &proxy, key, value)
        })?,
    )?;

    let target = host.clone();
    mt.raw_set(
        "__tostring",
        lua.create_function(move |_, _: Value| {
            Ok(target
                .upgrade()
                .map_or_else(|| "nil".to_string(), |object| object.identity()))
        })?,
    )?;

    let _ = proxy.set_metatable(Some(mt));
    tags(bridge)?.raw_set(proxy.clone(), id)?;
    let replaced = bridge.inner.proxies.borrow_mut().insert(id, host, proxy.clone());
    drop(replaced);
    trace!(id, class = %object.class_name(), "created object proxy");
    Ok(proxy)
}

fn object_index(bridge: &LuaBridge, lua: &Lua, host: &HostRef, proxy: &Table, key: Value) -> mlua::Result<Value> {
    if let (Value::String(name), Some(object)) = (&key, host.upgrade()) {
        let name = name.to_string_lossy().to_string();
        match object.member(&name) {
            Some(LuaValue::Function(function)) => {
                let bound = function.bind_default(host);
                return Ok(Value::Table(function_proxy(bridge, lua, &bound)?));
            }
            Some(member) => return bridge.to_lua(lua, &member),
            None => {}
        }
    }
    backing(proxy)?.raw_get(key)
}

fn object_newindex(
    bridge: &LuaBridge,
    lua: &Lua,
    host: &HostRef,
    proxy: &Table,
    key: Value,
    value: Value,
) -> mlua::Result<()> {
    if let (Value::String(name), Some(object)) = (&key, host.upgrade()) {
        let name = name.to_string_lossy().to_string();
        if object.member(&name).is_some() {
            let converted = bridge.from_lua(lua, value.clone())?;
            if object.set_member(&name, converted) {
                return Ok(());
            }
        }
    }
    backing(proxy)?.raw_set(key, value)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Function proxies
// ═══════════════════════════════════════════════════════════════════════════════

/// A callable proxy for `function`. Fresh on every crossing.
pub(crate) fn function_proxy(bridge: &LuaBridge, lua: &Lua, function: &FunctionRef) -> mlua::Result<Table> {
    let proxy = lua.create_table()?;
    let mt = lua.create_table()?;
    if let Some(object) = function.target.as_ref().and_then(HostRef::upgrade) {
        mt.raw_set(HOST_SELF, object_proxy(bridge, lua, &object)?)?;
    }
    mt.raw_set("__metatable", false)?;

    let weak = bridge.downgrade();
    let callee = function.clone();
    mt.raw_set(
        "__call",
        lua.create_function(move |lua, args: MultiValue| call_shim(&bridge_from(&weak)?, lua, &callee, args))?,
    )?;
    let label = format!("function: {}", function.name);
    mt.raw_set("__tostring", lua.create_function(move |_, _: Value| Ok(label.clone()))?)?;

    let _ = proxy.set_metatable(Some(mt));
    tags(bridge)?.raw_set(proxy.clone(), function.name.as_str())?;
    Ok(proxy)
}

/// Map a proxy table back to what it stands for. `None` for plain tables.
///
/// Only tables the bridge created are recognised; metatable contents are
/// never trusted. A proxy whose object is gone maps to nil.
pub(crate) fn proxy_target(bridge: &LuaBridge, table: &Table) -> mlua::Result<Option<LuaValue>> {
    match tags(bridge)?.raw_get::<Value>(table.clone())? {
        Value::Integer(id) => {
            let host = bridge.inner.proxies.borrow().host_for(id);
            Ok(Some(host.map_or(LuaValue::Nil, LuaValue::Object)))
        }
        Value::String(name) => {
            let owner = match table.metatable() {
                Some(mt) => mt.raw_get::<Value>(HOST_SELF)?,
                None => Value::Nil,
            };
            let target = match owner {
                Value::Table(owner) => match proxy_target(bridge, &owner)? {
                    Some(LuaValue::Object(host)) => Some(host),
                    _ => None,
                },
                _ => None,
            };
            Ok(Some(LuaValue::Function(FunctionRef {
                target,
                name: name.to_string_lossy().to_string(),
            })))
        }
        _ => Ok(None),
    }
}

/// Invoke a reflected host function on behalf of a script.
///
/// The first argument is the called proxy and is skipped; with method-call
/// syntax the receiver is therefore the first parameter. Arguments are
/// coerced into the declared parameter slots; missing ones stay zeroed and
/// extra ones are ignored.
fn call_shim(bridge: &LuaBridge, lua: &Lua, callee: &FunctionRef, args: MultiValue) -> mlua::Result<Value> {
    let target = match &callee.target {
        Some(host) => Some(host.upgrade().ok_or_else(|| {
            BridgeError::host(format!("invalid state for host function {}", callee.name)).into_lua()
        })?),
        None => None,
    };
    let function = match &target {
        Some(object) => object.find_function(&callee.name),
        None => bridge.find_function(&callee.name),
    }
    .ok_or_else(|| BridgeError::host(format!("unknown host function {}", callee.name)).into_lua())?;

    let mut params = ParamBlock::zeroed(&function);
    for (index, (spec, arg)) in function.params().iter().zip(args.into_iter().skip(1)).enumerate() {
        params.set(index, spec.kind.coerce(bridge.from_lua(lua, arg)?));
    }

    let outcome = {
        let _depth = bridge.inner.depth.enter();
        trace!(function = %callee.name, depth = bridge.depth(), "host call");
        function.invoke(&HostCall::new(bridge, target.clone()), &mut params)
    };
    bridge.flush_deferred(target.as_ref());
    outcome.map_err(BridgeError::into_lua)?;

    match params.take_return() {
        Some(value) => bridge.to_lua(lua, &value),
        None => Ok(Value::Nil),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Global namespace
// ═══════════════════════════════════════════════════════════════════════════════

/// Serve configured globals through the global table's metatable.
///
/// Reads of names that were never assigned from script consult the
/// bindings; assignments to a bound name update the binding.
pub(crate) fn install_global_metatable(bridge: &LuaBridge, lua: &Lua) -> mlua::Result<()> {
    let mt = lua.create_table()?;

    let weak = bridge.downgrade();
    mt.raw_set(
        "__index",
        lua.create_function(move |lua, (_globals, key): (Table, Value)| {
            let Some(bridge) = LuaBridge::from_weak(&weak) else {
                return Ok(Value::Nil);
            };
            global_index(&bridge, lua, &key)
        })?,
    )?;

    let weak = bridge.downgrade();
    mt.raw_set(
        "__newindex",
        lua.create_function(move |lua, (globals, key, value): (Table, Value, Value)| {
            match LuaBridge::from_weak(&weak) {
                Some(bridge) => global_newindex(&bridge, lua, &globals, key, value),
                None => globals.raw_set(key, value),
            }
        })?,
    )?;

    let _ = lua.globals().set_metatable(Some(mt));
    Ok(())
}

fn global_index(bridge: &LuaBridge, lua: &Lua, key: &Value) -> mlua::Result<Value> {
    let Value::String(name) = key else {
        return Ok(Value::Nil);
    };
    let binding = bridge.global_binding(&name.to_string_lossy());
    match binding {
        Some(LuaValue::Function(function)) => Ok(Value::Table(function_proxy(bridge, lua, &function)?)),
        Some(value) => bridge.to_lua(lua, &value),
        None => Ok(Value::Nil),
    }
}

fn global_newindex(bridge: &LuaBridge, lua: &Lua, globals: &Table, key: Value, value: Value) -> mlua::Result<()> {
    if let Value::String(name) = &key {
        let name = name.to_string_lossy().to_string();
        if bridge.global_binding(&name).is_some() {
            let converted = bridge.from_lua(lua, value)?;
            let previous = bridge.inner.config.borrow_mut().globals.insert(name, converted);
            drop(previous);
            return Ok(());
        }
    }
    globals.raw_set(key, value)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Output and modules
// ═══════════════════════════════════════════════════════════════════════════════

/// Route `print` and `warn` to the bridge's output sink.
///
/// `print` joins its arguments with tabs after `tostring`. Warnings are
/// assembled from their pieces; `@` control messages are ignored.
pub(crate) fn install_output(bridge: &LuaBridge, lua: &Lua) -> mlua::Result<()> {
    let weak = bridge.downgrade();
    let print = lua.create_function(move |lua, args: MultiValue| {
        let tostring: mlua::Function = lua.globals().raw_get("tostring")?;
        let mut parts = Vec::with_capacity(args.len());
        for arg in args {
            parts.push(tostring.call::<String>(arg)?);
        }
        if let Some(inner) = weak.upgrade() {
            let sink = inner.output.borrow().clone();
            sink.write(OutputLevel::Print, &parts.join("\t"));
        }
        Ok(())
    })?;
    lua.globals().raw_set("print", print)?;

    let weak = bridge.downgrade();
    let pending = RefCell::new(String::new());
    lua.set_warning_function(move |_, message, incomplete| {
        let mut line = pending.borrow_mut();
        if line.is_empty() && message.starts_with('@') {
            return Ok(());
        }
        line.push_str(message);
        if !incomplete {
            let complete = std::mem::take(&mut *line);
            if let Some(inner) = weak.upgrade() {
                let sink = inner.output.borrow().clone();
                sink.write(OutputLevel::Warning, &complete);
            }
        }
        Ok(())
    });
    Ok(())
}

/// Register a `package.preload` loader for `name`.
///
/// The source is looked up when the module is first required, so bindings
/// made after installation are honored.
pub(crate) fn install_preload(bridge: &LuaBridge, lua: &Lua, name: &str) -> mlua::Result<()> {
    let package: Table = lua.globals().raw_get("package")?;
    let preload: Table = package.raw_get("preload")?;
    let weak = bridge.downgrade();
    let module = name.to_string();
    let loader = lua.create_function(move |lua, _: MultiValue| {
        let bridge = bridge_from(&weak)?;
        load_module(&bridge, lua, &module).map_err(BridgeError::into_lua)
    })?;
    preload.raw_set(name, loader)
}

fn load_module(bridge: &LuaBridge, lua: &Lua, name: &str) -> crate::Result<Value> {
    let (source, root) = {
        let config = bridge.inner.config.borrow();
        let source = config
            .preload
            .get(name)
            .cloned()
            .ok_or_else(|| BridgeError::missing_module(name))?;
        (source, config.content_root.clone())
    };
    let chunk = match source {
        ScriptSource::Inline(code) => code.into_bytes(),
        ScriptSource::Bytecode(bytes) => bytes,
        ScriptSource::File(path) => std::fs::read(resolve_path(root.as_deref(), &path))
            .map_err(|_| BridgeError::missing_module(name))?,
    };
    let loader = lua.load(chunk).set_name(chunk_name(name)).into_function()?;
    Ok(loader.call::<Value>(name)?)
}
