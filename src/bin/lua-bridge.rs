//! CLI tool for running Lua scripts through the bridge
//!
//! Usage: lua-bridge [options] <script.lua>
//!
//! Options:
//!   --config <file.json>   Bridge configuration (default: built-in defaults)
//!   --no-stdlib            Open only the base and package libraries
//!   --compile <out>        Write the script's bytecode to <out> instead of running it
//!
//! Log verbosity follows `RUST_LOG` (default: info).

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use lua_bridge::{BridgeConfig, ExecutionContext, LuaBridge, compile_to_bytecode};
use tracing_subscriber::EnvFilter;

/// CLI configuration
struct Options {
    script: PathBuf,
    config: Option<PathBuf>,
    no_stdlib: bool,
    compile_to: Option<PathBuf>,
}

fn parse_args() -> Result<Options, String> {
    let args: Vec<String> = env::args().collect();
    let program_name = args.first().map_or("lua-bridge", |s| s.as_str());

    let mut config = None;
    let mut no_stdlib = false;
    let mut compile_to = None;
    let mut script = None;

    let mut i = 1;
    while i < args.len() {
        let Some(arg) = args.get(i) else {
            break;
        };
        if arg == "--config" {
            i += 1;
            config = Some(PathBuf::from(
                args.get(i).ok_or_else(|| "--config requires a file".to_string())?,
            ));
        } else if arg == "--compile" {
            i += 1;
            compile_to = Some(PathBuf::from(
                args.get(i).ok_or_else(|| "--compile requires an output file".to_string())?,
            ));
        } else if arg == "--no-stdlib" {
            no_stdlib = true;
        } else if arg.starts_with('-') {
            return Err(format!("Unknown option: {}", arg));
        } else {
            script = Some(PathBuf::from(arg));
        }
        i += 1;
    }

    let script = script.ok_or_else(|| {
        format!(
            "Usage: {} [--config <file.json>] [--no-stdlib] [--compile <out>] <script.lua>",
            program_name
        )
    })?;

    Ok(Options {
        script,
        config,
        no_stdlib,
        compile_to,
    })
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let options = parse_args()?;

    if let Some(out) = &options.compile_to {
        let code = std::fs::read_to_string(&options.script)
            .map_err(|e| format!("Cannot read {}: {}", options.script.display(), e))?;
        let bytes = compile_to_bytecode(&code, &options.script.display().to_string())?;
        std::fs::write(out, bytes)?;
        return Ok(());
    }

    let mut config = match &options.config {
        Some(path) => BridgeConfig::from_file(path)?,
        None => BridgeConfig::new("cli"),
    };
    if options.no_stdlib {
        config = config.without_stdlib();
    }

    let bridge = LuaBridge::new(config);
    let bridge = bridge
        .acquire(&ExecutionContext::new("cli"))
        .ok_or_else(|| bridge.last_error().unwrap_or_else(|| "startup failed".to_string()))?;

    let base = bridge.top();
    let count = bridge.run_file(&options.script, false, None)?;
    for index in 0..count {
        let slot = i32::try_from(base + index + 1)?;
        let value = bridge.to_value(slot)?;
        match bridge.value_to_json(&value) {
            Some(json) if value.is_table() => println!("{}", json),
            _ => println!("{}", value),
        }
    }
    bridge.pop(count);
    Ok(())
}
