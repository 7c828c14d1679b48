//! Bridge configuration
//!
//! One [`BridgeConfig`] describes one logical runtime: which standard
//! libraries to open, where modules are searched, which globals and preload
//! modules are declared up front, and what to run at startup. Configurations
//! load from JSON; host objects and functions are bound programmatically.

use std::path::{Path, PathBuf};

use mlua::StdLib;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};

use crate::error::{BridgeError, Result};
use crate::prelude::{IndexMap, index_map_new};
use crate::source::ScriptSource;
use crate::value::LuaValue;

/// Individual standard libraries, consulted when `open_stdlib` is off.
///
/// The base library is always present and `package` is always opened since
/// module preloading depends on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LibSelection {
    pub coroutine: bool,
    pub table: bool,
    pub io: bool,
    pub os: bool,
    pub string: bool,
    pub math: bool,
    pub utf8: bool,
    pub debug: bool,
}

impl Default for LibSelection {
    fn default() -> Self {
        LibSelection {
            coroutine: true,
            table: true,
            io: true,
            os: true,
            string: true,
            math: true,
            utf8: true,
            debug: false,
        }
    }
}

impl LibSelection {
    /// Nothing beyond the base and package libraries
    pub fn minimal() -> Self {
        LibSelection {
            coroutine: false,
            table: false,
            io: false,
            os: false,
            string: false,
            math: false,
            utf8: false,
            debug: false,
        }
    }

    fn std_lib(&self) -> StdLib {
        let flags = [
            (self.coroutine, StdLib::COROUTINE),
            (self.table, StdLib::TABLE),
            (self.io, StdLib::IO),
            (self.os, StdLib::OS),
            (self.string, StdLib::STRING),
            (self.math, StdLib::MATH),
            (self.utf8, StdLib::UTF8),
            (self.debug, StdLib::DEBUG),
        ];
        flags
            .into_iter()
            .filter(|(enabled, _)| *enabled)
            .fold(StdLib::PACKAGE, |libs, (_, lib)| libs | lib)
    }
}

/// Configuration of one bridge runtime
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Registry key and log label
    pub name: String,
    /// Open every safe standard library (plus `debug` when selected)
    pub open_stdlib: bool,
    pub libs: LibSelection,
    /// Survive execution-context resets in a [`BridgeRegistry`](crate::BridgeRegistry)
    pub persistent: bool,
    pub log_errors: bool,
    /// Run right after the interpreter is set up; a missing file is ignored
    pub startup: Option<ScriptSource>,
    /// Base directory for relative file sources and module roots
    pub content_root: Option<PathBuf>,
    /// Directories appended to `package.path` as `<root>/?.lua`
    pub module_roots: Vec<PathBuf>,
    /// Replaces `package.path` before module roots are appended
    pub package_path: Option<String>,
    pub package_cpath: Option<String>,
    /// Globals dispatched through the global-namespace metatable
    #[serde(deserialize_with = "deserialize_globals")]
    pub globals: IndexMap<String, LuaValue>,
    /// Modules served from `package.preload`
    pub preload: IndexMap<String, ScriptSource>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            name: "default".to_string(),
            open_stdlib: true,
            libs: LibSelection::default(),
            persistent: false,
            log_errors: true,
            startup: None,
            content_root: None,
            module_roots: Vec::new(),
            package_path: None,
            package_cpath: None,
            globals: index_map_new(),
            preload: index_map_new(),
        }
    }
}

impl BridgeConfig {
    pub fn new(name: impl Into<String>) -> Self {
        BridgeConfig {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| BridgeError::config(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::config(format!("{}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    pub fn with_startup(mut self, source: impl Into<ScriptSource>) -> Self {
        self.startup = Some(source.into());
        self
    }

    pub fn with_global(mut self, name: impl Into<String>, value: impl Into<LuaValue>) -> Self {
        self.globals.insert(name.into(), value.into());
        self
    }

    pub fn with_preload(mut self, name: impl Into<String>, source: impl Into<ScriptSource>) -> Self {
        self.preload.insert(name.into(), source.into());
        self
    }

    pub fn with_libs(mut self, libs: LibSelection) -> Self {
        self.open_stdlib = false;
        self.libs = libs;
        self
    }

    pub fn without_stdlib(self) -> Self {
        self.with_libs(LibSelection::minimal())
    }

    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    pub fn with_log_errors(mut self, log_errors: bool) -> Self {
        self.log_errors = log_errors;
        self
    }

    pub fn with_content_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.content_root = Some(root.into());
        self
    }

    pub fn with_module_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.module_roots.push(root.into());
        self
    }

    pub fn with_package_path(mut self, path: impl Into<String>) -> Self {
        self.package_path = Some(path.into());
        self
    }

    pub fn with_package_cpath(mut self, cpath: impl Into<String>) -> Self {
        self.package_cpath = Some(cpath.into());
        self
    }

    pub(crate) fn std_libs(&self) -> StdLib {
        if self.open_stdlib {
            let libs = StdLib::ALL_SAFE;
            if self.libs.debug {
                libs | StdLib::DEBUG
            } else {
                libs
            }
        } else {
            self.libs.std_lib()
        }
    }
}

fn deserialize_globals<'de, D>(deserializer: D) -> std::result::Result<IndexMap<String, LuaValue>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: IndexMap<String, serde_json::Value> = IndexMap::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(name, json)| match LuaValue::from_json(&json) {
            Some(value) => Ok((name, value)),
            None => Err(D::Error::custom(format!(
                "global `{name}` must be null, a boolean, a number or a string"
            ))),
        })
        .collect()
}
