//! Handlers that act on the local desktop.

use crate::config::Settings;
use crate::dispatcher::{Handlers, Invocation};
use crate::error::HandlerError;
use crate::input_sim;
use serde_json::Value;
use std::path::{Component, Path, PathBuf};
use std::process::Command;

/// Registers every handler the default command set routes to.
pub fn default_handlers(settings: &Settings) -> Handlers {
    let use_clipboard = settings.input.use_clipboard;
    let workspace = dirs::download_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."));
    let create_base = workspace.clone();
    let delete_base = workspace;

    let mut handlers = Handlers::new();
    handlers
        .register_fn("open_app", |inv: &Invocation| {
            let program = inv.require("app")?;
            spawn(program, &[])?;
            Ok(format!("Opening {}", inv.slot("app").unwrap_or(program)))
        })
        .register_fn("open_folder", |inv: &Invocation| {
            let path = inv.require("folder")?;
            open_with_system(path)?;
            Ok(format!("Opening {}", inv.slot("folder").unwrap_or(path)))
        })
        .register_fn("open_url", |inv: &Invocation| {
            let url = site_url(inv.require("site")?);
            open_with_system(&url)?;
            Ok(format!("Opening {url}"))
        })
        .register_fn("web_search", |inv: &Invocation| {
            let query = inv.require("query")?;
            open_with_system(&search_url(query)?)?;
            Ok(format!("Searching for {query}"))
        })
        .register_fn("create_folder", move |inv: &Invocation| {
            let name = inv.require("name")?;
            create_folder(&create_base, name)?;
            Ok(format!("Created folder {name}"))
        })
        .register_fn("delete_folder", move |inv: &Invocation| {
            let name = inv.require("name")?;
            delete_folder(&delete_base, name)?;
            Ok(format!("Deleted folder {name}"))
        })
        .register_fn("run_program", |inv: &Invocation| {
            let program = inv
                .param_str("program")
                .ok_or_else(|| HandlerError::new("run_program needs a program parameter"))?;
            let args = program_args(inv)?;
            spawn(program, &args)?;
            Ok(format!("Done: {}", inv.command_id.replace('_', " ")))
        })
        .register_fn("shortcut", |inv: &Invocation| {
            let keys = inv
                .param_str("keys")
                .ok_or_else(|| HandlerError::new("shortcut needs a keys parameter"))?;
            input_sim::send_shortcut(keys)?;
            Ok(format!("Pressed {keys}"))
        })
        .register_fn("type_text", move |inv: &Invocation| {
            let text = inv.require("text")?;
            input_sim::type_text(text, use_clipboard)?;
            Ok(format!("Typed {text}"))
        });
    handlers
}

fn spawn(program: &str, args: &[String]) -> Result<(), HandlerError> {
    log::debug!("spawn {program} {args:?}");
    Command::new(program)
        .args(args)
        .spawn()
        .map(|_| ())
        .map_err(|e| HandlerError::new(format!("could not start {program}: {e}")))
}

/// Hands a path or URL to the platform's default opener.
fn open_with_system(target: &str) -> Result<(), HandlerError> {
    let (program, mut args): (&str, Vec<String>) = if cfg!(target_os = "windows") {
        ("cmd", vec!["/C".into(), "start".into(), String::new()])
    } else if cfg!(target_os = "macos") {
        ("open", Vec::new())
    } else {
        ("xdg-open", Vec::new())
    };
    args.push(target.to_string());
    spawn(program, &args)
}

const DOMAIN_SUFFIXES: &[&str] = &["com", "org", "net", "io", "rs", "dev", "edu", "gov", "co"];

/// Spoken site names: "github" → github.com, "docs dot rs" → docs.rs, and
/// "github com" (a normalized "github.com") → github.com
fn site_url(spoken: &str) -> String {
    if spoken.contains("://") {
        return spoken.to_string();
    }
    let spoken = spoken.replace(" dot ", ".");
    let words: Vec<&str> = spoken.split_whitespace().collect();
    let dotted = words.len() > 1
        && words.last().is_some_and(|last| {
            DOMAIN_SUFFIXES.contains(last)
                || (last.len() == 2 && last.chars().all(|c| c.is_ascii_alphabetic()))
        });
    let host = if dotted { words.join(".") } else { words.concat() };
    if host.contains('.') {
        format!("https://{host}")
    } else {
        format!("https://{host}.com")
    }
}

fn search_url(query: &str) -> Result<String, HandlerError> {
    reqwest::Url::parse_with_params("https://www.google.com/search", &[("q", query)])
        .map(String::from)
        .map_err(|e| HandlerError::new(format!("search url: {e}")))
}

/// Static `args`, with `{slot}` replaced by the slot's value.
fn program_args(inv: &Invocation) -> Result<Vec<String>, HandlerError> {
    let Some(args) = inv.params.get("args") else {
        return Ok(Vec::new());
    };
    let Value::Array(args) = args else {
        return Err(HandlerError::new("args parameter must be a list"));
    };
    args.iter()
        .map(|arg| {
            let mut arg = arg
                .as_str()
                .ok_or_else(|| HandlerError::new("args must be strings"))?
                .to_string();
            for slot in &inv.slots {
                let placeholder = format!("{{{}}}", slot.name);
                if arg.contains(&placeholder) {
                    arg = arg.replace(&placeholder, inv.value(&slot.name).unwrap_or_default());
                }
            }
            Ok(arg)
        })
        .collect()
}

/// A folder directly under `base`; nested or relative names are refused.
fn folder_path(base: &Path, name: &str) -> Result<PathBuf, HandlerError> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) => Ok(base.join(part)),
        _ => Err(HandlerError::new(format!("invalid folder name: {name}"))),
    }
}

fn create_folder(base: &Path, name: &str) -> Result<PathBuf, HandlerError> {
    let path = folder_path(base, name)?;
    if path.exists() {
        return Err(HandlerError::new(format!("folder {name} already exists")));
    }
    std::fs::create_dir_all(&path)
        .map_err(|e| HandlerError::new(format!("create {}: {e}", path.display())))?;
    log::info!("created {}", path.display());
    Ok(path)
}

fn delete_folder(base: &Path, name: &str) -> Result<PathBuf, HandlerError> {
    let path = folder_path(base, name)?;
    if !path.is_dir() {
        return Err(HandlerError::new(format!("folder {name} not found")));
    }
    std::fs::remove_dir_all(&path)
        .map_err(|e| HandlerError::new(format!("delete {}: {e}", path.display())))?;
    log::info!("deleted {}", path.display());
    Ok(path)
}
