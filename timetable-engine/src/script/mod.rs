//! Provider-script execution.
//!
//! Loads a provider's script (plus its includes) into a fresh interpreter
//! per job, injects the fixed host bindings, and dispatches the entry
//! function matching the request kind. Script failures of every kind are
//! caught here and mapped to [`ScriptError`]; they never escape as panics.

mod bindings;
mod compile_cache;
mod error;
mod extensions;
mod sandbox;

pub use bindings::{Helper, NetworkHandle, ResultHandle, StorageHandle};
pub use compile_cache::{CompiledScriptCache, file_modified};
pub use error::ScriptError;
pub use extensions::shared_module;
pub use sandbox::{JobContext, JobRun, ScriptSandbox};
