//! Optional script extensions.
//!
//! Providers declare the extensions their script needs in the descriptor;
//! the engine registers the matching modules into the sandbox. Building a
//! module must not run concurrently from multiple threads, so it happens
//! once per process behind a mutex; the resulting shared module is handed
//! read-only to every engine that asks.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rhai::{Module, Shared};
use tracing::debug;

use super::error::ScriptError;

static REGISTRY: OnceLock<Mutex<HashMap<String, Shared<Module>>>> = OnceLock::new();

/// Get the shared module for an extension, building it on first use.
///
/// Returns [`ScriptError::UnknownExtension`] for names the engine does not
/// know.
pub fn shared_module(name: &str) -> Result<Shared<Module>, ScriptError> {
    let registry = REGISTRY.get_or_init(|| Mutex::new(HashMap::new()));
    let mut guard = registry.lock().expect("extension registry lock poisoned");

    if let Some(module) = guard.get(name) {
        return Ok(module.clone());
    }

    let module: Shared<Module> = match name {
        "url" => build_url_module().into(),
        "base64" => build_base64_module().into(),
        _ => {
            return Err(ScriptError::UnknownExtension {
                name: name.to_string(),
            });
        }
    };

    debug!(extension = name, "built script extension module");
    guard.insert(name.to_string(), module.clone());
    Ok(module)
}

/// Percent-encoding helpers, e.g. for building query strings.
fn build_url_module() -> Module {
    let mut module = Module::new();
    module.set_native_fn("encode", |s: &str| {
        Ok(urlencoding::encode(s).into_owned())
    });
    module.set_native_fn("decode", |s: &str| {
        urlencoding::decode(s)
            .map(|d| d.into_owned())
            .map_err(|e| format!("url::decode: {e}").into())
    });
    module
}

/// Base64 helpers, e.g. for providers whose session keys are encoded.
fn build_base64_module() -> Module {
    let mut module = Module::new();
    module.set_native_fn("encode", |s: &str| Ok(BASE64.encode(s.as_bytes())));
    module.set_native_fn("decode", |s: &str| {
        let bytes = BASE64
            .decode(s)
            .map_err(|e| format!("base64::decode: {e}"))?;
        String::from_utf8(bytes).map_err(|e| format!("base64::decode: {e}").into())
    });
    module
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_extensions_build_once() {
        let first = shared_module("url").unwrap();
        let second = shared_module("url").unwrap();
        assert!(Shared::ptr_eq(&first, &second));
    }

    #[test]
    fn unknown_extension_is_an_error() {
        let err = shared_module("teleport").unwrap_err();
        assert!(matches!(err, ScriptError::UnknownExtension { name } if name == "teleport"));
    }

    #[test]
    fn url_module_encodes() {
        let mut engine = rhai::Engine::new();
        engine.register_static_module("url", shared_module("url").unwrap());
        let encoded: String = engine
            .eval(r#"url::encode("Main St & 1st")"#)
            .unwrap();
        assert_eq!(encoded, "Main%20St%20%26%201st");
    }

    #[test]
    fn base64_module_round_trips() {
        let mut engine = rhai::Engine::new();
        engine.register_static_module("base64", shared_module("base64").unwrap());
        let out: String = engine
            .eval(r#"base64::decode(base64::encode("session=42"))"#)
            .unwrap();
        assert_eq!(out, "session=42");
    }
}
