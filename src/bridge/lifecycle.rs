//! Interpreter lifecycle and chunk execution

use std::path::{Path, PathBuf};
use std::rc::Rc;

use mlua::{Lua, LuaOptions, StdLib, Table};
use tracing::{debug, info, warn};

use super::{ExecutionContext, Helpers, LuaBridge};
use crate::dispatch;
use crate::error::{BridgeError, Result};
use crate::source::{ScriptSource, chunk_name, resolve_path};
use crate::value::LuaValue;

/// The parts of the configuration read while the interpreter is built.
struct Setup {
    libs: StdLib,
    content_root: Option<PathBuf>,
    module_roots: Vec<PathBuf>,
    package_path: Option<String>,
    package_cpath: Option<String>,
    preload: Vec<String>,
    globals: Vec<String>,
    startup: Option<ScriptSource>,
}

fn create_interpreter(libs: StdLib) -> Lua {
    // SAFETY: unsafe mode only lifts the restrictions on binary chunks and
    // the `debug` library, both of which are opted into by configuration.
    unsafe { Lua::unsafe_new_with(libs, LuaOptions::new()) }
}

impl LuaBridge {
    // ═══════════════════════════════════════════════════════════════════════════
    // Lifecycle
    // ═══════════════════════════════════════════════════════════════════════════

    /// Return the usable runtime for `context`, creating the interpreter on
    /// first use.
    ///
    /// Returns `None` while the bridge is disabled. On a startup failure the
    /// half-built interpreter is torn down and the bridge disabled until
    /// [`reset`](LuaBridge::reset); only then is the error reported.
    pub fn acquire(&self, context: &ExecutionContext) -> Option<LuaBridge> {
        if self.inner.disabled.get() {
            return None;
        }
        *self.inner.context.borrow_mut() = Some(context.clone());
        if self.is_live() {
            return Some(self.clone());
        }

        debug!(bridge = %self.name(), context = %context.name(), "creating interpreter");
        match self.initialize() {
            Ok(()) => {
                info!(bridge = %self.name(), "interpreter ready");
                Some(self.clone())
            }
            Err(err) => {
                self.inner.teardown();
                self.inner.disabled.set(true);
                warn!(bridge = %self.name(), "runtime disabled after failed startup");
                self.report_error(&err);
                None
            }
        }
    }

    /// Tear down the interpreter. Every script reference becomes detached.
    ///
    /// The bridge stays usable: the next `acquire` builds a fresh interpreter.
    pub fn close(&self) {
        if self.is_live() {
            debug!(bridge = %self.name(), "closing interpreter");
        }
        self.inner.teardown();
    }

    /// Close the interpreter and clear the disabled flag.
    pub fn reset(&self) {
        self.close();
        self.inner.disabled.set(false);
        self.clear_last_error();
    }

    fn setup(&self) -> Setup {
        let config = self.inner.config.borrow();
        Setup {
            libs: config.std_libs(),
            content_root: config.content_root.clone(),
            module_roots: config.module_roots.clone(),
            package_path: config.package_path.clone(),
            package_cpath: config.package_cpath.clone(),
            preload: config.preload.keys().cloned().collect(),
            globals: config.globals.keys().cloned().collect(),
            startup: config.startup.clone(),
        }
    }

    fn initialize(&self) -> Result<()> {
        let setup = self.setup();
        let lua = create_interpreter(setup.libs);
        *self.inner.lua.borrow_mut() = Some(lua.clone());
        *self.inner.helpers.borrow_mut() = Some(Rc::new(Helpers::new(&lua)?));

        dispatch::install_output(self, &lua)?;
        apply_package_paths(&lua, &setup)?;
        for name in &setup.preload {
            dispatch::install_preload(self, &lua, name)?;
        }
        let globals = lua.globals();
        for name in &setup.globals {
            globals.raw_set(name.as_str(), mlua::Value::Nil)?;
        }
        dispatch::install_global_metatable(self, &lua)?;

        if let Some(startup) = &setup.startup {
            match startup {
                ScriptSource::File(path) => self.run_file(path, true, Some(0))?,
                other => self.run_script(other, Some(0))?,
            };
        }
        Ok(())
    }

    /// Install a module loader; takes effect immediately on a live interpreter.
    pub fn add_preload(&self, name: impl Into<String>, source: impl Into<ScriptSource>) -> Result<()> {
        let name = name.into();
        self.inner
            .config
            .borrow_mut()
            .preload
            .insert(name.clone(), source.into());
        match self.inner.lua() {
            Some(lua) => Ok(dispatch::install_preload(self, &lua, &name)?),
            None => Ok(()),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Execution
    // ═══════════════════════════════════════════════════════════════════════════

    /// Compile and run `code`, pushing its results.
    ///
    /// `n_results` of `None` keeps every result; otherwise the results are
    /// padded with nil or truncated. Returns the number of values pushed.
    pub fn run_source(&self, code: &str, label: &str, n_results: Option<usize>) -> Result<usize> {
        self.run_chunk(code.as_bytes(), label, n_results)
    }

    pub fn run_script(&self, source: &ScriptSource, n_results: Option<usize>) -> Result<usize> {
        match source {
            ScriptSource::Inline(code) => self.run_source(code, &source.default_label(), n_results),
            ScriptSource::File(path) => self.run_file(path, false, n_results),
            ScriptSource::Bytecode(bytes) => {
                self.run_chunk(bytes, &source.default_label(), n_results)
            }
        }
    }

    /// Run a source or precompiled file, resolved against the content root.
    ///
    /// A missing file is `Ok(0)` when `ignore_missing` is set.
    pub fn run_file(
        &self,
        path: impl AsRef<Path>,
        ignore_missing: bool,
        n_results: Option<usize>,
    ) -> Result<usize> {
        let full = {
            let config = self.inner.config.borrow();
            resolve_path(config.content_root.as_deref(), path.as_ref())
        };
        match std::fs::read(&full) {
            Ok(bytes) => self.run_chunk(&bytes, &full.display().to_string(), n_results),
            Err(e) if ignore_missing && e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %full.display(), "skipping missing script");
                Ok(0)
            }
            Err(e) => {
                let err = BridgeError::load(format!("Unable to open file {}: {e}", full.display()));
                self.set_last_error(&err.to_string());
                Err(err)
            }
        }
    }

    fn run_chunk(&self, chunk: &[u8], label: &str, n_results: Option<usize>) -> Result<usize> {
        let lua = self.live_lua()?;
        let compiled = lua
            .load(chunk)
            .set_name(chunk_name(label))
            .into_function()
            .map_err(|e| match BridgeError::from(e) {
                BridgeError::Runtime { message } => BridgeError::Load { message },
                other => other,
            });
        match compiled {
            Ok(function) => {
                self.push_raw(mlua::Value::Function(function));
                self.protected_call(0, n_results)
            }
            Err(err) => {
                self.set_last_error(&err.to_string());
                Err(err)
            }
        }
    }

    /// Run `code` and return its first result; failures are reported and
    /// yield nil.
    pub fn run_string(&self, code: &str) -> LuaValue {
        self.run_reporting(|bridge| bridge.run_source(code, "string", Some(1)))
    }

    pub fn run_script_value(&self, source: &ScriptSource) -> LuaValue {
        self.run_reporting(|bridge| bridge.run_script(source, Some(1)))
    }

    pub fn run_file_value(&self, path: impl AsRef<Path>, ignore_missing: bool) -> LuaValue {
        self.run_reporting(|bridge| bridge.run_file(path.as_ref(), ignore_missing, Some(1)))
    }

    fn run_reporting(&self, run: impl FnOnce(&LuaBridge) -> Result<usize>) -> LuaValue {
        let base = self.top();
        let value = match run(self) {
            Ok(0) => LuaValue::Nil,
            Ok(_) => self.to_value(-1).unwrap_or_else(|err| {
                self.report_error(&err);
                LuaValue::Nil
            }),
            Err(err) => {
                self.report_error(&err);
                LuaValue::Nil
            }
        };
        self.truncate(base);
        value
    }
}

fn apply_package_paths(lua: &Lua, setup: &Setup) -> mlua::Result<()> {
    let package: Table = lua.globals().raw_get("package")?;
    if let Some(path) = &setup.package_path {
        package.raw_set("path", path.as_str())?;
    }
    if !setup.module_roots.is_empty() {
        let mut path: String = package.raw_get("path")?;
        for root in &setup.module_roots {
            let root = resolve_path(setup.content_root.as_deref(), root);
            path.push(';');
            path.push_str(&root.join("?.lua").display().to_string());
        }
        package.raw_set("path", path)?;
    }
    if let Some(cpath) = &setup.package_cpath {
        package.raw_set("cpath", cpath.as_str())?;
    }
    Ok(())
}
