//! The per-job script sandbox.
//!
//! Each job gets a fresh interpreter instance wired to its own binding
//! handles; nothing of the interpreter outlives the job or is shared with
//! concurrent jobs. The script source is read fresh from disk on every run
//! (through the modified-time-keyed compile cache), so provider scripts can
//! be edited without restarting the engine.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rhai::{AST, Dynamic, Engine, EvalAltResult, Scope};
use tracing::{debug, warn};

use crate::collector::{Publisher, ResultCollector};
use crate::config::{EmptyResultPolicy, EngineConfig};
use crate::domain::{GlobalTimetableInfo, ProviderData, ProviderFeature, Request};
use crate::network::{Downloader, NetworkBridge};
use crate::storage::StorageRegistry;

use super::bindings::{
    Helper, NetworkHandle, ResultHandle, StorageHandle, register_bindings, request_params,
};
use super::compile_cache::CompiledScriptCache;
use super::error::ScriptError;
use super::extensions;

/// Per-job inputs the scheduler provides.
pub struct JobContext {
    /// Cooperative cancellation flag, owned by the job handle.
    pub cancelled: Arc<AtomicBool>,

    /// Runtime the bridge spawns downloads onto.
    pub runtime: tokio::runtime::Handle,

    /// Where published batches go.
    pub publisher: Publisher,
}

/// What one sandbox run produced.
pub struct JobRun {
    /// Total records published, or the error that stopped the script.
    pub result: Result<usize, ScriptError>,

    /// Records published before the run ended, success or not.
    pub published: usize,

    /// Last URL the script attempted to download, for diagnostics.
    pub last_url: Option<String>,
}

/// Executes provider scripts in isolated interpreter instances.
///
/// The sandbox itself is stateless apart from shared read-only pieces (the
/// compile cache, the downloader, the storage registry); it is cheap to
/// share behind an `Arc` and safe to call from many worker threads at once.
pub struct ScriptSandbox {
    compile_cache: CompiledScriptCache,
    storage: StorageRegistry,
    downloader: Arc<dyn Downloader>,
    config: EngineConfig,
}

impl ScriptSandbox {
    /// Create a sandbox running downloads through the given downloader.
    pub fn new(config: EngineConfig, downloader: Arc<dyn Downloader>) -> Self {
        Self {
            compile_cache: CompiledScriptCache::new(),
            storage: StorageRegistry::new(),
            downloader,
            config,
        }
    }

    /// Run one request against a provider's script.
    ///
    /// Must be called from a blocking-capable thread: script downloads park
    /// the calling thread while the I/O completes on `ctx.runtime`.
    pub fn run(&self, provider: &ProviderData, request: &Request, ctx: JobContext) -> JobRun {
        let collector = ResultCollector::new(
            request.kind(),
            self.config.publish_threshold,
            self.config.publish_interval,
            ctx.publisher,
        );
        collector.set_info(GlobalTimetableInfo {
            date_limited: false,
            requested_time: Some(request.common().date_time),
        });
        let bridge = NetworkBridge::new(
            Arc::clone(&self.downloader),
            ctx.runtime,
            Arc::clone(&ctx.cancelled),
            self.config.download_timeout,
        );

        let result = self.execute(provider, request, &collector, &bridge, &ctx.cancelled);
        let published = collector.published_count();
        JobRun {
            result,
            published,
            last_url: bridge.last_url(),
        }
    }

    fn execute(
        &self,
        provider: &ProviderData,
        request: &Request,
        collector: &ResultCollector,
        bridge: &NetworkBridge,
        cancelled: &Arc<AtomicBool>,
    ) -> Result<usize, ScriptError> {
        let ast = self.load_program(provider)?;
        let engine = self.build_engine(provider, Arc::clone(cancelled))?;

        let kind = request.kind();
        let timetable = matches!(
            kind,
            crate::domain::RequestKind::Departures | crate::domain::RequestKind::Arrivals
        );

        let mut scope = Scope::new();
        scope.push("helper", Helper);
        scope.push("network", NetworkHandle::new(bridge.clone(), collector.clone()));
        scope.push(
            "storage",
            StorageHandle::new(self.storage.storage_for(&provider.id)),
        );
        scope.push(
            "result",
            ResultHandle::new(
                collector.clone(),
                request.common().date_time,
                provider.default_vehicle_type,
                timetable,
            ),
        );

        let entry = request.entry_function();
        debug!(provider = %provider.id, %entry, kind = %kind, "running script");

        let params = request_params(request);
        let call = engine.call_fn::<Dynamic>(&mut scope, &ast, entry, (params,));

        if let Err(err) = call {
            let error = classify_eval_error(err, entry, &provider.script_path);
            // A cancelled job publishes nothing beyond what already went out.
            if !error.is_cancelled() {
                warn!(provider = %provider.id, %error, "script run failed");
            }
            return Err(error);
        }

        if cancelled.load(Ordering::Relaxed) {
            return Err(ScriptError::Cancelled);
        }

        collector.flush();
        let published = collector.published_count();

        if published == 0
            && kind.expects_data()
            && self.config.empty_result_policy == EmptyResultPolicy::Error
        {
            return Err(ScriptError::NoData);
        }

        Ok(published)
    }

    /// Compile the provider's includes and main script into one program.
    ///
    /// Includes come first so the main script can call their functions; on
    /// a name clash the main script's definition wins.
    pub fn load_program(&self, provider: &ProviderData) -> Result<AST, ScriptError> {
        let mut combined: Option<AST> = None;
        for include in provider.resolved_includes() {
            let ast = self.compile_cache.load(&include)?;
            combined = Some(match combined {
                Some(mut acc) => {
                    acc.combine((*ast).clone());
                    acc
                }
                None => (*ast).clone(),
            });
        }

        let main = self.compile_cache.load(&provider.script_path)?;
        Ok(match combined {
            Some(mut acc) => {
                acc.combine((*main).clone());
                acc
            }
            None => (*main).clone(),
        })
    }

    /// Probe which features a provider's script offers.
    ///
    /// Implicit features come from which entry functions the program
    /// defines; a script may additionally declare features explicitly via
    /// an optional `features()` function returning an array of names.
    pub fn probe_features(
        &self,
        provider: &ProviderData,
    ) -> Result<BTreeSet<ProviderFeature>, ScriptError> {
        let ast = self.load_program(provider)?;

        let mut features = BTreeSet::new();
        let mut has_declaration = false;
        for function in ast.iter_functions() {
            if function.name == "features" {
                has_declaration = true;
            }
            for implied in ProviderFeature::implied_by_entry(function.name) {
                features.insert(*implied);
            }
        }

        if has_declaration {
            let engine = self.build_engine(provider, Arc::new(AtomicBool::new(false)))?;
            let mut scope = Scope::new();
            scope.push("helper", Helper);

            let declared = engine
                .call_fn::<Dynamic>(&mut scope, &ast, "features", ())
                .map_err(|e| classify_eval_error(e, "features", &provider.script_path))?;

            if let Some(array) = declared.try_cast::<rhai::Array>() {
                for item in array {
                    let name = item.to_string();
                    match name.parse::<ProviderFeature>() {
                        Ok(feature) => {
                            features.insert(feature);
                        }
                        Err(_) => warn!(provider = %provider.id, feature = %name,
                            "script declared unknown feature, ignoring"),
                    }
                }
            }
        }

        Ok(features)
    }

    fn build_engine(
        &self,
        provider: &ProviderData,
        cancelled: Arc<AtomicBool>,
    ) -> Result<Engine, ScriptError> {
        let mut engine = Engine::new();
        register_bindings(&mut engine);

        for extension in &provider.script_extensions {
            engine.register_static_module(extension, extensions::shared_module(extension)?);
        }

        engine.on_progress(move |_ops| {
            if cancelled.load(Ordering::Relaxed) {
                Some(Dynamic::UNIT)
            } else {
                None
            }
        });

        Ok(engine)
    }
}

/// Map an interpreter error to the engine's taxonomy.
fn classify_eval_error(err: Box<EvalAltResult>, entry: &str, path: &Path) -> ScriptError {
    // A missing entry function surfaces unwrapped from the call itself.
    if let EvalAltResult::ErrorFunctionNotFound(signature, _) = err.as_ref() {
        if signature.split(' ').next() == Some(entry) {
            return ScriptError::FunctionMissing {
                name: entry.to_string(),
            };
        }
    }

    // Errors raised inside called functions arrive wrapped; the innermost
    // error carries the position that points at the offending statement.
    let inner = innermost_error(&err);
    if matches!(inner, EvalAltResult::ErrorTerminated(..)) {
        return ScriptError::Cancelled;
    }
    ScriptError::Runtime {
        path: path.to_path_buf(),
        line: inner.position().line(),
        message: inner.to_string(),
    }
}

fn innermost_error(err: &EvalAltResult) -> &EvalAltResult {
    match err {
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => innermost_error(inner),
        other => other,
    }
}
