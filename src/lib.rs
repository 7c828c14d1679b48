//! Lua runtime bridge for reflected host object models
//!
//! Embeds a Lua interpreter behind a tagged value type and exposes host
//! objects, with their members and reflected functions, to scripts through
//! metatable-driven proxies.
//!
//! # Example
//!
//! ```
//! use lua_bridge::{BridgeConfig, ExecutionContext, LuaBridge, LuaValue};
//!
//! let bridge = LuaBridge::new(BridgeConfig::new("example"));
//! let bridge = bridge.acquire(&ExecutionContext::new("doc")).unwrap();
//! assert_eq!(bridge.run_string("return 1 + 2 * 3"), LuaValue::Integer(7));
//! ```
//!
//! # Lifetimes
//!
//! Host objects are shared through `Rc` and held weakly by the bridge; a
//! destroyed object reads as nil from script. Interpreter-side values seen
//! by the host are pinned in a per-bridge reference registry and become
//! detached when the bridge closes.
//!
//! # Reentrancy
//!
//! A script may call a host function that calls back into the interpreter.
//! Errors raised while such a call is in progress are queued and reported
//! once the outermost host call returns.

pub mod bridge;
pub mod config;
pub mod delegate;
mod dispatch;
pub mod error;
pub mod host;
pub mod manager;
pub mod output;
pub mod prelude;
pub mod reentrancy;
pub mod registry;
pub mod source;
pub mod value;

pub use bridge::{ExecutionContext, LuaBridge, PathLookup};
pub use config::{BridgeConfig, LibSelection};
pub use delegate::{MulticastDelegate, ScriptDelegate};
pub use error::{BridgeError, ErrorKind, Result};
pub use host::{HostCall, HostComponent, HostObject, ParamBlock, ParamKind, ParamSpec, ReflectedFunction};
pub use manager::BridgeRegistry;
pub use output::{BufferSink, NoOpSink, OutputLevel, OutputSink, TracingSink};
pub use reentrancy::CallDepth;
pub use registry::RefHandle;
pub use source::{FILE_SENTINEL, ScriptSource, compile_to_bytecode};
pub use value::{CheapClone, FunctionRef, HostRef, LuaValue, ScriptKind, ScriptRef};

/// The interpreter binding this crate is built on
pub use mlua;
