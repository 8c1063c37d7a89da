//! Process-wide schema registry.
//!
//! Mirrors the teacher's class-level `CapnpManager.modules: dict` /
//! `load_schema`/`unload_schema` pair, but confined behind a `lazy_static`
//! `Mutex` instead of a bare mutable class attribute, with explicit
//! init/teardown rather than relying on process exit.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::schema::{self, CompiledSchema};

lazy_static::lazy_static! {
    static ref MODULES: Mutex<HashMap<String, Arc<CompiledSchema>>> = Mutex::new(HashMap::new());
}

/// Compiles the schema text at `path` and binds it under `name`, replacing
/// any prior binding. Performs a one-shot auto-repair if the schema text is
/// missing its leading `@0x...;` id, writing the repaired text back and
/// retrying exactly once.
pub fn load(path: &Path, name: &str) -> Result<Arc<CompiledSchema>> {
    load_inner(path, name, false)
}

fn load_inner(path: &Path, name: &str, already_repaired: bool) -> Result<Arc<CompiledSchema>> {
    let text = fs::read_to_string(path)?;
    match schema::compile(&text) {
        Ok(compiled) => {
            let compiled = Arc::new(compiled);
            MODULES.lock().unwrap().insert(name.to_string(), compiled.clone());
            debug!("loaded schema module '{name}' from {path:?}");
            Ok(compiled)
        }
        Err(Error::InvalidSchema(msg)) if !already_repaired && msg.contains("suggested @0x") => {
            let token = extract_suggested_token(&msg).ok_or_else(|| {
                Error::InvalidSchema(format!("could not parse repair suggestion: {msg}"))
            })?;
            warn!("schema '{name}' missing id, self-repairing with {token}");
            let repaired = format!("{token}\n{text}");
            fs::write(path, repaired)?;
            load_inner(path, name, true)
        }
        Err(e) => Err(e),
    }
}

fn extract_suggested_token(msg: &str) -> Option<String> {
    let start = msg.find("@0x")?;
    let rest = &msg[start..];
    let end = rest.find(';')?;
    Some(rest[..=end].to_string())
}

/// Removes the named bindings (all, if `names` is `None`).
pub fn unload(names: Option<&[String]>) {
    let mut modules = MODULES.lock().unwrap();
    match names {
        None => modules.clear(),
        Some(names) => {
            for name in names {
                modules.remove(name);
            }
        }
    }
}

/// Looks up a previously-loaded module by name.
pub fn get(name: &str) -> Option<Arc<CompiledSchema>> {
    MODULES.lock().unwrap().get(name).cloned()
}
