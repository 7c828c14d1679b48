//! Script sources
//!
//! A source is inline text, a file path, or a precompiled chunk. Textual
//! requests use a leading `@` to mean "load from this path".

use std::path::{Path, PathBuf};

use mlua::Lua;
use serde::Deserialize;

use crate::error::Result;

/// Prefix that marks a textual source request as a file path
pub const FILE_SENTINEL: char = '@';

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "String")]
pub enum ScriptSource {
    Inline(String),
    File(PathBuf),
    /// Chunk produced by [`compile_to_bytecode`]
    Bytecode(Vec<u8>),
}

impl ScriptSource {
    /// Interpret a textual request: `@path/to/file.lua` or inline code.
    pub fn parse(text: &str) -> Self {
        match text.strip_prefix(FILE_SENTINEL) {
            Some(path) => ScriptSource::File(PathBuf::from(path)),
            None => ScriptSource::Inline(text.to_string()),
        }
    }

    pub fn inline(code: impl Into<String>) -> Self {
        ScriptSource::Inline(code.into())
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        ScriptSource::File(path.into())
    }

    /// Label used for diagnostics when the caller did not supply one
    pub fn default_label(&self) -> String {
        match self {
            ScriptSource::Inline(_) => "string".to_string(),
            ScriptSource::File(path) => path.display().to_string(),
            ScriptSource::Bytecode(_) => "bytecode".to_string(),
        }
    }
}

impl From<String> for ScriptSource {
    fn from(text: String) -> Self {
        ScriptSource::parse(&text)
    }
}

impl From<&str> for ScriptSource {
    fn from(text: &str) -> Self {
        ScriptSource::parse(text)
    }
}

/// Chunk name the interpreter shows in tracebacks for `label`
pub(crate) fn chunk_name(label: &str) -> String {
    format!("{FILE_SENTINEL}{label}")
}

/// Resolve `path` against `root` unless it is already absolute.
pub(crate) fn resolve_path(root: Option<&Path>, path: &Path) -> PathBuf {
    match root {
        Some(root) if path.is_relative() => root.join(path),
        _ => path.to_path_buf(),
    }
}

/// Compile `code` to the interpreter's binary chunk format.
///
/// Uses a throwaway interpreter; the result can be loaded by any bridge via
/// [`ScriptSource::Bytecode`].
pub fn compile_to_bytecode(code: &str, label: &str) -> Result<Vec<u8>> {
    let lua = Lua::new();
    let function = lua.load(code).set_name(chunk_name(label)).into_function()?;
    Ok(function.dump(false))
}
