//! Bridge runtime
//!
//! [`LuaBridge`] owns one interpreter (created lazily by
//! [`acquire`](LuaBridge::acquire)) together with everything that ties host
//! values to it: the reference registry, the host-visible value stack, the
//! proxy cache and the reentrancy state.
//!
//! All mutable state sits in separate `RefCell`s and no borrow is ever held
//! while interpreter code runs, so scripts may call back into the host, and
//! the host back into scripts, to any depth on the same thread.

mod calls;
mod convert;
mod lifecycle;
mod stack;

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use mlua::{Function, Lua, Table};
use tracing::{debug, error};

use crate::config::BridgeConfig;
use crate::dispatch::ProxyCache;
use crate::error::{BridgeError, Result};
use crate::host::{HostObject, ReflectedFunction};
use crate::output::{OutputSink, TracingSink};
use crate::prelude::FxHashMap;
use crate::reentrancy::CallDepth;
use crate::registry::{RefHandle, ReferenceRegistry};
use crate::value::{CheapClone, FunctionRef, LuaValue};

pub use stack::PathLookup;

/// Identifies the host execution context a bridge was acquired from
/// (a level, a session, a test case).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ExecutionContext {
    name: String,
}

impl ExecutionContext {
    pub fn new(name: impl Into<String>) -> Self {
        ExecutionContext { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Small interpreter-side functions used for generic indexing and calling
/// of values that are not plain tables or functions.
pub(crate) struct Helpers {
    pub(crate) index: Function,
    pub(crate) newindex: Function,
    pub(crate) call: Function,
    /// Weak-keyed map from proxy table to what it stands for. Never handed
    /// to scripts.
    pub(crate) tags: Table,
}

const HELPERS_SOURCE: &str = r#"
return function(o, k) return o[k] end,
       function(o, k, v) o[k] = v end,
       function(f, ...) return f(...) end,
       setmetatable({}, { __mode = "k", __metatable = false })
"#;

impl Helpers {
    fn new(lua: &Lua) -> mlua::Result<Self> {
        let (index, newindex, call, tags) = lua
            .load(HELPERS_SOURCE)
            .set_name("=bridge")
            .eval::<(Function, Function, Function, Table)>()?;
        Ok(Helpers {
            index,
            newindex,
            call,
            tags,
        })
    }
}

type ErrorHook = Rc<dyn Fn(&str)>;

pub(crate) struct BridgeInner {
    pub(crate) config: RefCell<BridgeConfig>,
    lua: RefCell<Option<Lua>>,
    helpers: RefCell<Option<Rc<Helpers>>>,
    pub(crate) registry: RefCell<ReferenceRegistry>,
    pub(crate) stack: RefCell<Vec<mlua::Value>>,
    functions: RefCell<FxHashMap<String, Rc<ReflectedFunction>>>,
    pub(crate) proxies: RefCell<ProxyCache>,
    pub(crate) depth: CallDepth,
    last_error: RefCell<Option<String>>,
    error_hook: RefCell<Option<ErrorHook>>,
    pub(crate) output: RefCell<Rc<dyn OutputSink>>,
    context: RefCell<Option<ExecutionContext>>,
    disabled: Cell<bool>,
}

impl BridgeInner {
    fn new(config: BridgeConfig) -> Self {
        BridgeInner {
            config: RefCell::new(config),
            lua: RefCell::new(None),
            helpers: RefCell::new(None),
            registry: RefCell::new(ReferenceRegistry::new()),
            stack: RefCell::new(Vec::new()),
            functions: RefCell::new(FxHashMap::default()),
            proxies: RefCell::new(ProxyCache::default()),
            depth: CallDepth::new(),
            last_error: RefCell::new(None),
            error_hook: RefCell::new(None),
            output: RefCell::new(Rc::new(TracingSink)),
            context: RefCell::new(None),
            disabled: Cell::new(false),
        }
    }

    pub(crate) fn lua(&self) -> Option<Lua> {
        self.lua.try_borrow().ok()?.as_ref().cloned()
    }

    pub(crate) fn contains_handle(&self, handle: RefHandle) -> bool {
        self.registry
            .try_borrow()
            .is_ok_and(|registry| registry.contains(handle))
    }

    pub(crate) fn resolve_handle(&self, handle: RefHandle) -> Option<mlua::Value> {
        let lua = self.lua()?;
        let registry = self.registry.try_borrow().ok()?;
        registry.get(&lua, handle).ok()
    }

    pub(crate) fn alias_handle(&self, handle: RefHandle) -> Option<RefHandle> {
        let lua = self.lua()?;
        let mut registry = self.registry.try_borrow_mut().ok()?;
        registry.alias(&lua, handle).ok()
    }

    pub(crate) fn release_handle(&self, handle: RefHandle) {
        let Some(lua) = self.lua() else {
            return;
        };
        if let Ok(mut registry) = self.registry.try_borrow_mut() {
            registry.release(&lua, handle);
        }
    }

    /// Drop every interpreter-side value, then the interpreter itself.
    ///
    /// Values must go first: they cannot outlive the state they point into.
    fn teardown(&self) {
        let lua = self.lua.try_borrow_mut().ok().and_then(|mut slot| slot.take());
        if let Ok(mut stack) = self.stack.try_borrow_mut() {
            stack.clear();
        }
        if let Ok(mut proxies) = self.proxies.try_borrow_mut() {
            proxies.clear();
        }
        if let Ok(mut helpers) = self.helpers.try_borrow_mut() {
            helpers.take();
        }
        if let Ok(mut registry) = self.registry.try_borrow_mut() {
            registry.clear(lua.as_ref());
        }
        self.depth.reset();
        drop(lua);
    }
}

impl Drop for BridgeInner {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Handle to one bridge runtime. Clones share the same runtime.
#[derive(Clone)]
pub struct LuaBridge {
    pub(crate) inner: Rc<BridgeInner>,
}

impl CheapClone for LuaBridge {}

impl LuaBridge {
    /// Create a bridge. No interpreter exists until the first `acquire`.
    pub fn new(config: BridgeConfig) -> Self {
        LuaBridge {
            inner: Rc::new(BridgeInner::new(config)),
        }
    }

    pub(crate) fn from_inner(inner: Rc<BridgeInner>) -> Self {
        LuaBridge { inner }
    }

    pub(crate) fn from_weak(weak: &Weak<BridgeInner>) -> Option<Self> {
        weak.upgrade().map(LuaBridge::from_inner)
    }

    pub(crate) fn downgrade(&self) -> Weak<BridgeInner> {
        Rc::downgrade(&self.inner)
    }

    pub fn ptr_eq(&self, other: &LuaBridge) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn name(&self) -> String {
        self.inner.config.borrow().name.clone()
    }

    /// Snapshot of the current configuration, including runtime bindings
    pub fn config(&self) -> BridgeConfig {
        self.inner.config.borrow().clone()
    }

    pub fn is_persistent(&self) -> bool {
        self.inner.config.borrow().persistent
    }

    /// Whether an interpreter currently exists
    pub fn is_live(&self) -> bool {
        self.inner.lua.borrow().is_some()
    }

    /// Whether startup failed; sticky until [`reset`](LuaBridge::reset)
    pub fn is_disabled(&self) -> bool {
        self.inner.disabled.get()
    }

    pub fn context(&self) -> Option<ExecutionContext> {
        self.inner.context.borrow().clone()
    }

    /// The underlying interpreter, for host code that needs raw access
    pub fn lua(&self) -> Option<Lua> {
        self.inner.lua()
    }

    pub(crate) fn live_lua(&self) -> Result<Lua> {
        if self.inner.disabled.get() {
            return Err(BridgeError::Disabled);
        }
        self.inner.lua().ok_or(BridgeError::Closed)
    }

    pub(crate) fn helpers(&self) -> Result<Rc<Helpers>> {
        self.inner
            .helpers
            .borrow()
            .as_ref()
            .map(CheapClone::cheap_clone)
            .ok_or(BridgeError::Closed)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Host bindings
    // ═══════════════════════════════════════════════════════════════════════════

    /// Register a function resolved by unbound function references.
    pub fn register_function(&self, function: ReflectedFunction) {
        self.inner
            .functions
            .borrow_mut()
            .insert(function.name().to_string(), Rc::new(function));
    }

    /// Register `function` and bind it as a global under its own name.
    pub fn expose_function(&self, function: ReflectedFunction) {
        let name = function.name().to_string();
        self.register_function(function);
        self.bind_global(name.clone(), LuaValue::Function(FunctionRef::unbound(name)));
    }

    pub fn find_function(&self, name: &str) -> Option<Rc<ReflectedFunction>> {
        self.inner.functions.borrow().get(name).cloned()
    }

    /// Bind a configured global. Re-binding a name replaces the old value.
    ///
    /// On a live interpreter the raw global of the same name is cleared so
    /// the binding is not shadowed.
    pub fn bind_global(&self, name: impl Into<String>, value: impl Into<LuaValue>) {
        let name = name.into();
        let previous = self
            .inner
            .config
            .borrow_mut()
            .globals
            .insert(name.clone(), value.into());
        drop(previous);
        if let Some(lua) = self.inner.lua() {
            if let Err(err) = lua.globals().raw_set(name.as_str(), mlua::Value::Nil) {
                self.report_error(&BridgeError::from(err));
            }
        }
    }

    pub fn unbind_global(&self, name: &str) -> Option<LuaValue> {
        self.inner.config.borrow_mut().globals.shift_remove(name)
    }

    /// Current value of a configured global binding
    pub fn global_binding(&self, name: &str) -> Option<LuaValue> {
        self.inner.config.borrow().globals.get(name).cloned()
    }

    pub fn set_output_sink(&self, sink: Rc<dyn OutputSink>) {
        *self.inner.output.borrow_mut() = sink;
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Error reporting
    // ═══════════════════════════════════════════════════════════════════════════

    /// Host notification channel for errors reported at idle depth
    pub fn set_error_hook(&self, hook: impl Fn(&str) + 'static) {
        *self.inner.error_hook.borrow_mut() = Some(Rc::new(hook));
    }

    pub fn clear_error_hook(&self) {
        self.inner.error_hook.borrow_mut().take();
    }

    /// Most recent captured error message
    pub fn last_error(&self) -> Option<String> {
        self.inner.last_error.borrow().clone()
    }

    pub fn clear_last_error(&self) {
        self.inner.last_error.borrow_mut().take();
    }

    pub(crate) fn set_last_error(&self, message: &str) {
        *self.inner.last_error.borrow_mut() = Some(message.to_string());
    }

    /// Current reentrancy depth
    pub fn depth(&self) -> usize {
        self.inner.depth.depth()
    }

    /// Number of errors waiting for the depth to return to zero
    pub fn pending_errors(&self) -> usize {
        self.inner.depth.pending()
    }

    /// Live object proxies currently cached
    pub fn proxy_count(&self) -> usize {
        self.inner.proxies.borrow().len()
    }

    /// Script references currently pinned in the registry
    pub fn pinned_count(&self) -> usize {
        self.inner.registry.borrow().len()
    }

    /// Report `err` through the bridge's error channel, or queue it while a
    /// host call is in progress.
    pub fn report_error(&self, err: &BridgeError) {
        self.report_for(None, err);
    }

    /// Like [`report_error`](LuaBridge::report_error), offering the error to
    /// `target` first once it is safe to report.
    pub(crate) fn report_for(&self, target: Option<&Rc<dyn HostObject>>, err: &BridgeError) {
        let message = err.to_string();
        if self.inner.depth.is_nested() {
            debug!(
                bridge = %self.name(),
                depth = self.inner.depth.depth(),
                "deferring error: {message}"
            );
            self.inner.depth.defer(message);
            return;
        }
        self.deliver(target, &message);
    }

    /// Report every deferred error, oldest first. No-op while nested.
    pub(crate) fn flush_deferred(&self, target: Option<&Rc<dyn HostObject>>) {
        for message in self.inner.depth.drain() {
            self.deliver(target, &message);
        }
    }

    fn deliver(&self, target: Option<&Rc<dyn HostObject>>, message: &str) {
        self.set_last_error(message);
        if target.is_some_and(|object| object.on_script_error(message)) {
            return;
        }
        if self.inner.config.borrow().log_errors {
            error!(bridge = %self.name(), "{message}");
        }
        let hook = self.inner.error_hook.borrow().clone();
        if let Some(hook) = hook {
            hook(message);
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Garbage collector
    // ═══════════════════════════════════════════════════════════════════════════

    /// Bytes currently allocated by the interpreter (0 when closed)
    pub fn used_memory(&self) -> usize {
        self.inner.lua().map_or(0, |lua| lua.used_memory())
    }

    pub fn collect_garbage(&self) -> Result<()> {
        self.live_lua()?.gc_collect()?;
        Ok(())
    }

    pub fn stop_gc(&self) {
        if let Some(lua) = self.inner.lua() {
            lua.gc_stop();
        }
    }

    pub fn restart_gc(&self) {
        if let Some(lua) = self.inner.lua() {
            lua.gc_restart();
        }
    }

    pub fn is_gc_running(&self) -> bool {
        self.inner.lua().is_some_and(|lua| lua.gc_is_running())
    }
}

impl fmt::Debug for LuaBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LuaBridge")
            .field("name", &self.name())
            .field("live", &self.is_live())
            .field("disabled", &self.is_disabled())
            .field("depth", &self.depth())
            .finish()
    }
}
