//! Host object model
//!
//! Everything a script can see of the host goes through [`HostObject`]: a
//! sparse member map (plain values or function descriptors), a function
//! table for calls, and an error sink. [`HostComponent`] is a ready-made
//! implementation backed by ordered maps.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tracing::error;

use crate::bridge::LuaBridge;
use crate::error::Result;
use crate::prelude::{FxHashMap, IndexMap, index_map_new};
use crate::value::{FunctionRef, LuaValue};

/// Capability interface for host objects exposed to scripts.
///
/// Implementations use interior mutability; objects are shared through `Rc`
/// and scripts only ever hold weak references to them.
pub trait HostObject: 'static {
    /// Class name, used in diagnostics
    fn class_name(&self) -> &str;

    /// Descriptive identity string, used when the object is stringified
    fn identity(&self) -> String {
        self.class_name().to_string()
    }

    /// Look up an exposed member. A [`LuaValue::Function`] result is a
    /// function descriptor; unbound descriptors resolve against this object.
    fn member(&self, name: &str) -> Option<LuaValue>;

    /// Update an exposed member. Returns false when `name` is not exposed,
    /// in which case the write falls through to the proxy's own storage.
    fn set_member(&self, name: &str, value: LuaValue) -> bool;

    /// Resolve a reflected function by name
    fn find_function(&self, name: &str) -> Option<Rc<ReflectedFunction>>;

    /// Receive a script error raised on this object's behalf.
    ///
    /// Returns true when handled; otherwise the bridge reports it through
    /// its own channel.
    fn on_script_error(&self, _message: &str) -> bool {
        false
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Reflected functions
// ═══════════════════════════════════════════════════════════════════════════════

/// Declared type of a reflected function parameter or return slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Any value, passed through untouched
    Value,
    Bool,
    Integer,
    Float,
    String,
    Object,
}

impl ParamKind {
    /// Zero value of the slot before any argument is written
    pub fn zero(self) -> LuaValue {
        match self {
            ParamKind::Value | ParamKind::Object => LuaValue::Nil,
            ParamKind::Bool => LuaValue::Bool(false),
            ParamKind::Integer => LuaValue::Integer(0),
            ParamKind::Float => LuaValue::Float(0.0),
            ParamKind::String => LuaValue::String(String::new()),
        }
    }

    pub fn coerce(self, value: LuaValue) -> LuaValue {
        match self {
            ParamKind::Value => value,
            _ if value.is_nil() => self.zero(),
            ParamKind::Bool => LuaValue::Bool(value.to_bool()),
            ParamKind::Integer => LuaValue::Integer(value.to_integer()),
            ParamKind::Float => LuaValue::Float(value.to_float()),
            ParamKind::String => match value {
                LuaValue::String(s) => LuaValue::String(s),
                other => LuaValue::String(other.to_string()),
            },
            ParamKind::Object => match value {
                LuaValue::Object(_) => value,
                _ => LuaValue::Nil,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
}

type FunctionBody = dyn Fn(&HostCall<'_>, &mut ParamBlock) -> Result<()>;

/// A host function callable from scripts.
///
/// Parameters are declared up front; the call shim fills a [`ParamBlock`]
/// in declaration order and hands it to the body.
pub struct ReflectedFunction {
    name: String,
    params: Vec<ParamSpec>,
    returns: Option<ParamKind>,
    body: Rc<FunctionBody>,
}

impl ReflectedFunction {
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&HostCall<'_>, &mut ParamBlock) -> Result<()> + 'static,
    {
        ReflectedFunction {
            name: name.into(),
            params: Vec::new(),
            returns: None,
            body: Rc::new(body),
        }
    }

    pub fn param(mut self, name: impl Into<String>, kind: ParamKind) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            kind,
        });
        self
    }

    pub fn returns(mut self, kind: ParamKind) -> Self {
        self.returns = Some(kind);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    pub fn return_kind(&self) -> Option<ParamKind> {
        self.returns
    }

    pub fn invoke(&self, call: &HostCall<'_>, params: &mut ParamBlock) -> Result<()> {
        (self.body)(call, params)
    }
}

impl fmt::Debug for ReflectedFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReflectedFunction")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("returns", &self.returns)
            .finish()
    }
}

/// Parameter block for one reflected call.
///
/// Starts zero-initialized from the function's layout; arguments that the
/// script did not pass keep their zero value.
#[derive(Debug)]
pub struct ParamBlock {
    names: Vec<String>,
    values: Vec<LuaValue>,
    return_kind: Option<ParamKind>,
    return_value: Option<LuaValue>,
}

impl ParamBlock {
    pub fn zeroed(function: &ReflectedFunction) -> Self {
        ParamBlock {
            names: function.params.iter().map(|p| p.name.clone()).collect(),
            values: function.params.iter().map(|p| p.kind.zero()).collect(),
            return_kind: function.returns,
            return_value: function.returns.map(ParamKind::zero),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&LuaValue> {
        self.values.get(index)
    }

    pub fn named(&self, name: &str) -> Option<&LuaValue> {
        let index = self.names.iter().position(|n| n == name)?;
        self.values.get(index)
    }

    pub fn value(&self, index: usize) -> LuaValue {
        self.get(index).cloned().unwrap_or_default()
    }

    pub fn integer(&self, index: usize) -> i64 {
        self.get(index).map_or(0, LuaValue::to_integer)
    }

    pub fn float(&self, index: usize) -> f64 {
        self.get(index).map_or(0.0, LuaValue::to_float)
    }

    pub fn boolean(&self, index: usize) -> bool {
        self.get(index).is_some_and(LuaValue::to_bool)
    }

    pub fn string(&self, index: usize) -> String {
        self.get(index).map(ToString::to_string).unwrap_or_default()
    }

    pub(crate) fn set(&mut self, index: usize, value: LuaValue) {
        if let Some(slot) = self.values.get_mut(index) {
            *slot = value;
        }
    }

    /// Write the return slot. Ignored for functions without one.
    pub fn set_return(&mut self, value: impl Into<LuaValue>) {
        if let (Some(kind), Some(slot)) = (self.return_kind, self.return_value.as_mut()) {
            *slot = kind.coerce(value.into());
        }
    }

    pub fn take_return(&mut self) -> Option<LuaValue> {
        self.return_value.take()
    }
}

/// Context handed to a reflected function body.
pub struct HostCall<'a> {
    bridge: &'a LuaBridge,
    target: Option<Rc<dyn HostObject>>,
}

impl<'a> HostCall<'a> {
    pub(crate) fn new(bridge: &'a LuaBridge, target: Option<Rc<dyn HostObject>>) -> Self {
        HostCall { bridge, target }
    }

    /// The bridge that dispatched the call, for re-entering the interpreter
    pub fn bridge(&self) -> &LuaBridge {
        self.bridge
    }

    /// The object the function was resolved against, if any
    pub fn target(&self) -> Option<&Rc<dyn HostObject>> {
        self.target.as_ref()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HostComponent
// ═══════════════════════════════════════════════════════════════════════════════

type ErrorListener = Rc<dyn Fn(&str)>;

/// General-purpose host object: ordered member map plus function table.
///
/// Member names are case-sensitive and re-binding a name replaces the
/// previous binding.
pub struct HostComponent {
    class_name: String,
    name: String,
    members: RefCell<IndexMap<String, LuaValue>>,
    functions: RefCell<FxHashMap<String, Rc<ReflectedFunction>>>,
    log_errors: bool,
    errors: RefCell<Vec<String>>,
    listener: RefCell<Option<ErrorListener>>,
}

impl HostComponent {
    pub fn new(class_name: impl Into<String>, name: impl Into<String>) -> Self {
        HostComponent {
            class_name: class_name.into(),
            name: name.into(),
            members: RefCell::new(index_map_new()),
            functions: RefCell::new(FxHashMap::default()),
            log_errors: true,
            errors: RefCell::new(Vec::new()),
            listener: RefCell::new(None),
        }
    }

    pub fn with_member(self, name: impl Into<String>, value: impl Into<LuaValue>) -> Self {
        self.bind(name, value);
        self
    }

    /// Register `function` and expose it as a member under its own name.
    pub fn with_function(self, function: ReflectedFunction) -> Self {
        let name = function.name().to_string();
        self.register_function(function);
        self.bind(name.clone(), LuaValue::Function(FunctionRef::unbound(name)));
        self
    }

    /// Register `function` without exposing it as a member.
    pub fn with_hidden_function(self, function: ReflectedFunction) -> Self {
        self.register_function(function);
        self
    }

    pub fn with_log_errors(mut self, log_errors: bool) -> Self {
        self.log_errors = log_errors;
        self
    }

    pub fn into_rc(self) -> Rc<Self> {
        Rc::new(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bind(&self, name: impl Into<String>, value: impl Into<LuaValue>) {
        self.members.borrow_mut().insert(name.into(), value.into());
    }

    pub fn unbind(&self, name: &str) -> Option<LuaValue> {
        self.members.borrow_mut().shift_remove(name)
    }

    pub fn get(&self, name: &str) -> LuaValue {
        self.members.borrow().get(name).cloned().unwrap_or_default()
    }

    pub fn member_names(&self) -> Vec<String> {
        self.members.borrow().keys().cloned().collect()
    }

    pub fn register_function(&self, function: ReflectedFunction) {
        self.functions
            .borrow_mut()
            .insert(function.name().to_string(), Rc::new(function));
    }

    /// Listener invoked for every script error reported on this component
    pub fn on_error(&self, listener: impl Fn(&str) + 'static) {
        *self.listener.borrow_mut() = Some(Rc::new(listener));
    }

    /// Script errors received so far, oldest first
    pub fn received_errors(&self) -> Vec<String> {
        self.errors.borrow().clone()
    }
}

impl HostObject for HostComponent {
    fn class_name(&self) -> &str {
        &self.class_name
    }

    fn identity(&self) -> String {
        format!("{} {}", self.class_name, self.name)
    }

    fn member(&self, name: &str) -> Option<LuaValue> {
        self.members.borrow().get(name).cloned()
    }

    fn set_member(&self, name: &str, value: LuaValue) -> bool {
        let previous = {
            let mut members = self.members.borrow_mut();
            match members.get_mut(name) {
                Some(slot) => std::mem::replace(slot, value),
                None => return false,
            }
        };
        drop(previous);
        true
    }

    fn find_function(&self, name: &str) -> Option<Rc<ReflectedFunction>> {
        self.functions.borrow().get(name).cloned()
    }

    fn on_script_error(&self, message: &str) -> bool {
        if self.log_errors {
            error!(component = %self.identity(), "{message}");
        }
        self.errors.borrow_mut().push(message.to_string());
        let listener = self.listener.borrow().clone();
        if let Some(listener) = listener {
            listener(message);
        }
        true
    }
}

impl fmt::Debug for HostComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identity())
    }
}
