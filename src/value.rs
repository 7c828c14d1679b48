//! Tagged value representation
//!
//! [`LuaValue`] is the host-side image of a value crossing the bridge. Scalars
//! are copied; host objects are held weakly; interpreter-side tables,
//! closures, coroutines and userdata are pinned through the owning bridge's
//! reference registry.

use std::fmt;
use std::rc::{Rc, Weak};

use crate::bridge::{BridgeInner, LuaBridge};
use crate::host::HostObject;
use crate::registry::RefHandle;

/// Trait for types that have cheap (O(1), reference-counted) clones.
///
/// Makes it explicit at the call site that a clone only bumps a counter.
/// [`LuaValue`] deliberately does not implement it: cloning a script
/// reference allocates a registry slot.
pub trait CheapClone: Clone {
    fn cheap_clone(&self) -> Self {
        self.clone()
    }
}

impl<T: ?Sized> CheapClone for Rc<T> {}

// ═══════════════════════════════════════════════════════════════════════════════
// Host references
// ═══════════════════════════════════════════════════════════════════════════════

/// Non-owning reference to a host object.
///
/// The host decides how long its objects live; a script holding a proxy to
/// a destroyed object sees nil instead of keeping it alive.
#[derive(Clone)]
pub struct HostRef(Weak<dyn HostObject>);

impl HostRef {
    pub fn new<T: HostObject>(object: &Rc<T>) -> Self {
        let weak: Weak<T> = Rc::downgrade(object);
        HostRef(weak)
    }

    pub fn from_dyn(object: &Rc<dyn HostObject>) -> Self {
        HostRef(Rc::downgrade(object))
    }

    pub fn upgrade(&self) -> Option<Rc<dyn HostObject>> {
        self.0.upgrade()
    }

    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }

    pub fn ptr_eq(&self, other: &HostRef) -> bool {
        self.addr() == other.addr()
    }

    /// Address of the referenced allocation, stable while any reference exists.
    pub fn addr(&self) -> usize {
        self.0.as_ptr() as *const () as usize
    }
}

impl CheapClone for HostRef {}

impl<T: HostObject> From<&Rc<T>> for HostRef {
    fn from(object: &Rc<T>) -> Self {
        HostRef::new(object)
    }
}

impl From<&HostRef> for HostRef {
    fn from(object: &HostRef) -> Self {
        object.clone()
    }
}

impl fmt::Debug for HostRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(object) => write!(f, "{}", object.identity()),
            None => write!(f, "<released>"),
        }
    }
}

/// A reflected function: a member name, optionally bound to a host object.
///
/// Unbound references resolve against the bridge's own function table when
/// they are called.
#[derive(Clone, Debug)]
pub struct FunctionRef {
    pub target: Option<HostRef>,
    pub name: String,
}

impl FunctionRef {
    pub fn new(target: impl Into<HostRef>, name: impl Into<String>) -> Self {
        FunctionRef {
            target: Some(target.into()),
            name: name.into(),
        }
    }

    pub fn unbound(name: impl Into<String>) -> Self {
        FunctionRef {
            target: None,
            name: name.into(),
        }
    }

    /// Fill in the target when the reference was declared without one.
    pub fn bind_default(&self, owner: &HostRef) -> FunctionRef {
        FunctionRef {
            target: Some(self.target.clone().unwrap_or_else(|| owner.clone())),
            name: self.name.clone(),
        }
    }
}

impl PartialEq for FunctionRef {
    fn eq(&self, other: &Self) -> bool {
        let same_target = match (&self.target, &other.target) {
            (Some(a), Some(b)) => a.ptr_eq(b),
            (None, None) => true,
            _ => false,
        };
        same_target && self.name == other.name
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Script references
// ═══════════════════════════════════════════════════════════════════════════════

/// Kind of interpreter-side value a [`ScriptRef`] pins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptKind {
    Table,
    Function,
    Thread,
    UserData,
}

impl ScriptKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptKind::Table => "table",
            ScriptKind::Function => "function",
            ScriptKind::Thread => "thread",
            ScriptKind::UserData => "userdata",
        }
    }
}

/// Owning handle to an interpreter-side value.
///
/// Each instance owns its own registry slot: cloning allocates a new slot
/// aliasing the same value, dropping releases only this instance's slot.
/// After the owning bridge closes, the reference is detached and resolves
/// to nothing.
pub struct ScriptRef {
    kind: ScriptKind,
    handle: RefHandle,
    owner: Weak<BridgeInner>,
}

impl ScriptRef {
    pub(crate) fn new(kind: ScriptKind, handle: RefHandle, owner: Weak<BridgeInner>) -> Self {
        ScriptRef {
            kind,
            handle,
            owner,
        }
    }

    pub fn kind(&self) -> ScriptKind {
        self.kind
    }

    pub fn handle(&self) -> RefHandle {
        self.handle
    }

    /// The bridge this reference belongs to, if it is still alive
    pub fn bridge(&self) -> Option<LuaBridge> {
        self.owner.upgrade().map(LuaBridge::from_inner)
    }

    /// Whether the reference still resolves to a live value
    pub fn is_attached(&self) -> bool {
        self.owner
            .upgrade()
            .is_some_and(|inner| inner.contains_handle(self.handle))
    }

    pub(crate) fn belongs_to(&self, inner: &Rc<BridgeInner>) -> bool {
        std::ptr::eq(self.owner.as_ptr(), Rc::as_ptr(inner))
    }

    pub(crate) fn resolve(&self) -> Option<mlua::Value> {
        self.owner.upgrade()?.resolve_handle(self.handle)
    }
}

impl Clone for ScriptRef {
    fn clone(&self) -> Self {
        let aliased = self
            .owner
            .upgrade()
            .and_then(|inner| inner.alias_handle(self.handle));
        match aliased {
            Some(handle) => ScriptRef::new(self.kind, handle, self.owner.clone()),
            None => ScriptRef::new(self.kind, self.handle, Weak::new()),
        }
    }
}

impl Drop for ScriptRef {
    fn drop(&mut self) {
        if let Some(inner) = self.owner.upgrade() {
            inner.release_handle(self.handle);
        }
    }
}

impl PartialEq for ScriptRef {
    fn eq(&self, other: &Self) -> bool {
        if self.kind != other.kind || !Weak::ptr_eq(&self.owner, &other.owner) {
            return false;
        }
        if self.handle == other.handle {
            return true;
        }
        match (self.resolve(), other.resolve()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for ScriptRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.handle.index)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LuaValue
// ═══════════════════════════════════════════════════════════════════════════════

/// A value crossing the bridge
#[derive(Clone, Default)]
pub enum LuaValue {
    #[default]
    Nil,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Object(HostRef),
    Function(FunctionRef),
    Script(ScriptRef),
}

impl LuaValue {
    pub fn object<T: HostObject>(object: &Rc<T>) -> Self {
        LuaValue::Object(HostRef::new(object))
    }

    pub fn function(target: impl Into<HostRef>, name: impl Into<String>) -> Self {
        LuaValue::Function(FunctionRef::new(target, name))
    }

    /// Function resolved against the bridge's own function table
    pub fn unbound_function(name: impl Into<String>) -> Self {
        LuaValue::Function(FunctionRef::unbound(name))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            LuaValue::Nil => "nil",
            LuaValue::Bool(_) => "boolean",
            LuaValue::Integer(_) => "integer",
            LuaValue::Float(_) => "number",
            LuaValue::String(_) => "string",
            LuaValue::Object(_) => "object",
            LuaValue::Function(_) => "function",
            LuaValue::Script(r) => r.kind.as_str(),
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, LuaValue::Nil)
    }

    pub fn is_table(&self) -> bool {
        matches!(self, LuaValue::Script(r) if r.kind == ScriptKind::Table)
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, LuaValue::Function(_))
            || matches!(self, LuaValue::Script(r) if r.kind == ScriptKind::Function)
    }

    pub fn is_number(&self) -> bool {
        matches!(self, LuaValue::Integer(_) | LuaValue::Float(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            LuaValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            LuaValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            LuaValue::Float(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            LuaValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<Rc<dyn HostObject>> {
        match self {
            LuaValue::Object(h) => h.upgrade(),
            _ => None,
        }
    }

    pub fn as_script(&self) -> Option<&ScriptRef> {
        match self {
            LuaValue::Script(r) => Some(r),
            _ => None,
        }
    }

    /// Integer coercion: booleans as 0/1, floats truncated, strings parsed,
    /// anything else 0.
    pub fn to_integer(&self) -> i64 {
        match self {
            LuaValue::Bool(b) => i64::from(*b),
            LuaValue::Integer(n) => *n,
            LuaValue::Float(n) => *n as i64,
            LuaValue::String(s) => parse_integer(s),
            _ => 0,
        }
    }

    pub fn to_float(&self) -> f64 {
        match self {
            LuaValue::Bool(true) => 1.0,
            LuaValue::Bool(false) => 0.0,
            LuaValue::Integer(n) => *n as f64,
            LuaValue::Float(n) => *n,
            LuaValue::String(s) => parse_float(s),
            _ => 0.0,
        }
    }

    /// Truthiness: nil, false and numeric zero are false.
    pub fn to_bool(&self) -> bool {
        match self {
            LuaValue::Nil => false,
            LuaValue::Bool(b) => *b,
            LuaValue::Integer(n) => *n != 0,
            LuaValue::Float(n) => *n != 0.0,
            _ => true,
        }
    }

    /// Convert a JSON scalar. Arrays and objects need a live interpreter,
    /// see [`LuaBridge::value_from_json`].
    pub fn from_json(value: &serde_json::Value) -> Option<LuaValue> {
        match value {
            serde_json::Value::Null => Some(LuaValue::Nil),
            serde_json::Value::Bool(b) => Some(LuaValue::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(LuaValue::Integer)
                .or_else(|| n.as_f64().map(LuaValue::Float)),
            serde_json::Value::String(s) => Some(LuaValue::String(s.clone())),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => None,
        }
    }

    /// JSON image of a scalar; host and script references have none.
    pub fn to_json(&self) -> Option<serde_json::Value> {
        match self {
            LuaValue::Nil => Some(serde_json::Value::Null),
            LuaValue::Bool(b) => Some(serde_json::Value::Bool(*b)),
            LuaValue::Integer(n) => Some(serde_json::Value::from(*n)),
            LuaValue::Float(n) => serde_json::Number::from_f64(*n).map(serde_json::Value::Number),
            LuaValue::String(s) => Some(serde_json::Value::String(s.clone())),
            _ => None,
        }
    }
}

/// Leading-integer parse: `"42abc"` is 42, `"3.9"` is 3, garbage is 0.
fn parse_integer(s: &str) -> i64 {
    let s = s.trim();
    if let Ok(n) = s.parse::<i64>() {
        return n;
    }
    parse_float(s) as i64
}

/// Leading decimal number of `s` (`"12abc"` is 12), or 0.0 when there is none.
fn parse_float(s: &str) -> f64 {
    let s = s.trim();
    if let Ok(f) = s.parse::<f64>() {
        return f;
    }
    s.get(..numeric_prefix_len(s.as_bytes()))
        .and_then(|prefix| prefix.parse().ok())
        .unwrap_or(0.0)
}

/// Length of the longest `[+-]digits[.digits][(e|E)[+-]digits]` prefix.
fn numeric_prefix_len(bytes: &[u8]) -> usize {
    let digits_from = |start: usize| {
        bytes
            .get(start..)
            .map_or(0, |rest| rest.iter().take_while(|b| b.is_ascii_digit()).count())
    };
    let mut end = usize::from(matches!(bytes.first(), Some(b'+' | b'-')));
    let integral = digits_from(end);
    end += integral;
    let mut mantissa = integral;
    if bytes.get(end) == Some(&b'.') {
        let fraction = digits_from(end + 1);
        if integral > 0 || fraction > 0 {
            end += 1 + fraction;
            mantissa += fraction;
        }
    }
    if mantissa == 0 {
        return 0;
    }
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let sign = usize::from(matches!(bytes.get(end + 1), Some(b'+' | b'-')));
        let exponent = digits_from(end + 1 + sign);
        if exponent > 0 {
            end += 1 + sign + exponent;
        }
    }
    end
}

/// Canonical float rendering: always distinguishable from an integer.
pub(crate) fn format_float(n: f64) -> String {
    if n.is_nan() {
        return "nan".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let magnitude = n.abs();
    if magnitude != 0.0 && !(1e-5..1e16).contains(&magnitude) {
        return format!("{:e}", n);
    }
    if n.fract() == 0.0 {
        format!("{:.1}", n)
    } else {
        format!("{}", n)
    }
}

impl fmt::Display for LuaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LuaValue::Nil => write!(f, "nil"),
            LuaValue::Bool(b) => write!(f, "{}", b),
            LuaValue::Integer(n) => write!(f, "{}", n),
            LuaValue::Float(n) => write!(f, "{}", format_float(*n)),
            LuaValue::String(s) => write!(f, "{}", s),
            LuaValue::Object(h) => match h.upgrade() {
                Some(object) => write!(f, "{}", object.identity()),
                None => write!(f, "nil"),
            },
            LuaValue::Function(func) => write!(f, "{}", func.name),
            LuaValue::Script(r) => write!(f, "{}: {}", r.kind.as_str(), r.handle.index),
        }
    }
}

impl fmt::Debug for LuaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LuaValue::String(s) => write!(f, "{:?}", s),
            LuaValue::Object(h) => write!(f, "Object({:?})", h),
            LuaValue::Function(func) => write!(f, "Function({})", func.name),
            LuaValue::Script(r) => write!(f, "{:?}", r),
            other => write!(f, "{}", other),
        }
    }
}

impl PartialEq for LuaValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (LuaValue::Nil, LuaValue::Nil) => true,
            (LuaValue::Bool(a), LuaValue::Bool(b)) => a == b,
            (LuaValue::Integer(a), LuaValue::Integer(b)) => a == b,
            (LuaValue::Float(a), LuaValue::Float(b)) => a == b,
            (LuaValue::String(a), LuaValue::String(b)) => a == b,
            (LuaValue::Object(a), LuaValue::Object(b)) => a.ptr_eq(b),
            (LuaValue::Function(a), LuaValue::Function(b)) => a == b,
            (LuaValue::Script(a), LuaValue::Script(b)) => a == b,
            _ => false,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Conversions from Rust primitives
// ═══════════════════════════════════════════════════════════════════════════════

impl From<bool> for LuaValue {
    fn from(b: bool) -> Self {
        LuaValue::Bool(b)
    }
}

impl From<i32> for LuaValue {
    fn from(n: i32) -> Self {
        LuaValue::Integer(i64::from(n))
    }
}

impl From<i64> for LuaValue {
    fn from(n: i64) -> Self {
        LuaValue::Integer(n)
    }
}

impl From<f32> for LuaValue {
    fn from(n: f32) -> Self {
        LuaValue::Float(f64::from(n))
    }
}

impl From<f64> for LuaValue {
    fn from(n: f64) -> Self {
        LuaValue::Float(n)
    }
}

impl From<&str> for LuaValue {
    fn from(s: &str) -> Self {
        LuaValue::String(s.to_string())
    }
}

impl From<String> for LuaValue {
    fn from(s: String) -> Self {
        LuaValue::String(s)
    }
}

impl<T: HostObject> From<&Rc<T>> for LuaValue {
    fn from(object: &Rc<T>) -> Self {
        LuaValue::object(object)
    }
}

impl From<FunctionRef> for LuaValue {
    fn from(func: FunctionRef) -> Self {
        LuaValue::Function(func)
    }
}

impl<T: Into<LuaValue>> From<Option<T>> for LuaValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(LuaValue::Nil, Into::into)
    }
}
