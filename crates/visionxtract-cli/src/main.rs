//! `vxt`: inspect module discovery and call modules from the command line.
//!
//! ```text
//! vxt modules
//! vxt resolve face_extraction [--in-process | --remote]
//! vxt call llm_judge execute --payload '{"content": "..."}'
//! vxt call ocr health --get --param verbose=true
//! ```

use std::process;

use serde_json::{Value, json};
use visionxtract_core::config::PlatformConfig;
use visionxtract_core::logging::init_tracing;
use visionxtract_core::models::CoreError;
use visionxtract_core::providers::Providers;
use visionxtract_core::registry::ModuleRegistry;
use visionxtract_core::transport::{ModuleCall, ModuleClient, RequestedMode};

const USAGE: &str = "usage: vxt modules | vxt resolve <module> [--in-process|--remote] | \
vxt call <module> <operation> [--get] [--in-process|--remote] [--payload JSON] [--param key=value]...";

#[derive(Debug)]
enum Command {
    Modules,
    Resolve {
        module: String,
        mode: RequestedMode,
    },
    Call {
        module: String,
        mode: RequestedMode,
        call: ModuleCall,
    },
}

fn main() {
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match parse_args(&args) {
        Ok(command) => command,
        Err(message) => {
            eprintln!("vxt: {message}");
            eprintln!("{USAGE}");
            process::exit(2);
        }
    };

    let config = PlatformConfig::from_env();
    let enabled = config.enabled_modules.clone();
    let settings = config.transport.clone();
    let registry = ModuleRegistry::from_config(config, Providers::unconfigured());
    registry.discover(&enabled);

    let result = match command {
        Command::Modules => Ok(list_modules(&registry)),
        Command::Resolve { module, mode } => {
            ModuleClient::connect(&registry, &module, mode, &settings).map(|client| {
                let resolution = json!({
                    "module": client.module(),
                    "mode": format!("{:?}", client.mode()),
                    "handler": client.handler_name(),
                    "base_url": client.base_url(),
                });
                client.close();
                resolution
            })
        }
        Command::Call { module, mode, call } => run_call(&registry, &module, mode, &settings, call),
    };

    match result {
        Ok(output) => match serde_json::to_string_pretty(&output) {
            Ok(text) => println!("{text}"),
            Err(error) => {
                eprintln!("vxt: failed to render output: {error}");
                process::exit(1);
            }
        },
        Err(error) => {
            tracing::error!(kind = ?error.kind, message = %error.message, "command failed");
            eprintln!("vxt: {error}");
            if let Some(fault) = &error.transport {
                eprintln!("vxt: status {:?}: {}", fault.status, fault.body);
            }
            process::exit(1);
        }
    }
}

fn list_modules(registry: &ModuleRegistry) -> Value {
    let modules = registry.modules();
    Value::Array(
        modules
            .values()
            .map(|descriptor| {
                json!({
                    "name": descriptor.name,
                    "address": descriptor.address,
                    "tags": descriptor.tags,
                    "description": descriptor.description,
                    "version": descriptor.version,
                    "exports": descriptor.entrypoint.exports(),
                })
            })
            .collect(),
    )
}

fn run_call(
    registry: &ModuleRegistry,
    module: &str,
    mode: RequestedMode,
    settings: &visionxtract_core::config::TransportSettings,
    call: ModuleCall,
) -> Result<Value, CoreError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|error| CoreError::internal(format!("failed to start runtime: {error}")))?;

    let client = ModuleClient::connect(registry, module, mode, settings)?;
    let result = runtime.block_on(client.call(&call));
    client.close();
    result.map(Value::Object)
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    let (name, rest) = args
        .split_first()
        .ok_or_else(|| "missing command".to_string())?;

    match name.as_str() {
        "modules" => Ok(Command::Modules),
        "resolve" => {
            let (module, flags) = rest
                .split_first()
                .ok_or_else(|| "resolve needs a module name".to_string())?;
            let mut mode = RequestedMode::Auto;
            for flag in flags {
                mode = parse_mode(flag).ok_or_else(|| format!("unknown flag '{flag}'"))?;
            }
            Ok(Command::Resolve {
                module: module.clone(),
                mode,
            })
        }
        "call" => {
            let [module, operation, flags @ ..] = rest else {
                return Err("call needs a module and an operation".to_string());
            };
            parse_call(module, operation, flags)
        }
        other => Err(format!("unknown command '{other}'")),
    }
}

fn parse_call(module: &str, operation: &str, flags: &[String]) -> Result<Command, String> {
    let mut get = false;
    let mut mode = RequestedMode::Auto;
    let mut payload = None;
    let mut params = Vec::new();

    let mut flags = flags.iter();
    while let Some(flag) = flags.next() {
        match flag.as_str() {
            "--get" => get = true,
            "--payload" => {
                let raw = flags
                    .next()
                    .ok_or_else(|| "--payload needs a JSON value".to_string())?;
                let value: Value = serde_json::from_str(raw)
                    .map_err(|error| format!("--payload is not valid JSON: {error}"))?;
                payload = Some(value);
            }
            "--param" => {
                let raw = flags
                    .next()
                    .ok_or_else(|| "--param needs key=value".to_string())?;
                let (key, value) = raw
                    .split_once('=')
                    .ok_or_else(|| format!("--param '{raw}' is not key=value"))?;
                params.push((key.to_string(), value.to_string()));
            }
            other => {
                mode = parse_mode(other).ok_or_else(|| format!("unknown flag '{other}'"))?;
            }
        }
    }

    let mut call = if get {
        ModuleCall::get(operation)
    } else {
        ModuleCall::post(operation)
    };
    if let Some(payload) = payload {
        call = call.payload(payload);
    }
    for (key, value) in params {
        call = call.param(key, value);
    }

    Ok(Command::Call {
        module: module.to_string(),
        mode,
        call,
    })
}

fn parse_mode(flag: &str) -> Option<RequestedMode> {
    match flag {
        "--in-process" => Some(RequestedMode::InProcess),
        "--remote" => Some(RequestedMode::Remote),
        "--auto" => Some(RequestedMode::Auto),
        _ => None,
    }
}
