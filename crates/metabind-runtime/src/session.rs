//! Catalog sessions
//!
//! A [`Session`] loads one catalog and owns the primary execution context.
//! Worker contexts share the session's heap but get their own host, their
//! own binding cache and a global surface without ui-only symbols.
//!
//! # Example
//!
//! ```rust,ignore
//! use metabind_runtime::{RuntimeConfig, Session};
//!
//! Session::init_logging();
//! let config = RuntimeConfig::from_file(Path::new("metabind.toml"))?;
//! let session = Session::open(&config, runtime)?;
//! let value = session.main().global_value("kAnswer")?;
//! ```

use std::sync::Arc;

use metabind_engine::{BindingContext, MetaHeap, RegistrationReport};
use metabind_sdk::{BindingError, BindingResult, ForeignRuntime, ObjectRef, ScriptContext, ScriptValue};

use crate::config::{ConfigError, RuntimeConfig};
use crate::error::RuntimeError;
use crate::host::HostContext;

/// One execution context: a host, its bindings and its registered globals.
pub struct ExecutionContext {
    host: HostContext,
    bindings: BindingContext,
    report: RegistrationReport,
}

impl ExecutionContext {
    fn create(heap: &Arc<MetaHeap>, runtime: &Arc<dyn ForeignRuntime>, config: &RuntimeConfig, worker: bool) -> Result<Self, RuntimeError> {
        let options = config.binding_options(worker)?;
        let bindings = BindingContext::with_options(Arc::clone(heap), Arc::clone(runtime), options);
        let host = HostContext::new();
        let report = bindings.register_globals(&host, host.global(), worker)?;
        log::info!(
            "{} context ready: {} globals",
            if worker { "worker" } else { "main" },
            report.registered.len()
        );
        Ok(Self {
            host,
            bindings,
            report,
        })
    }

    /// The scripting host
    pub fn host(&self) -> &HostContext {
        &self.host
    }

    /// Binding state
    pub fn bindings(&self) -> &BindingContext {
        &self.bindings
    }

    /// The global object
    pub fn global(&self) -> ObjectRef {
        self.host.global()
    }

    /// Whether ui-only symbols are hidden
    pub fn is_worker(&self) -> bool {
        self.bindings.options().worker
    }

    /// What the initial registration installed
    pub fn report(&self) -> &RegistrationReport {
        &self.report
    }

    /// Read a global, realizing its binding on first access
    pub fn global_value(&self, name: &str) -> BindingResult<ScriptValue> {
        self.host.get(self.global(), name)
    }

    /// Call a global function or constructor by name
    pub fn call_global(&self, name: &str, args: &[ScriptValue]) -> BindingResult<ScriptValue> {
        match self.global_value(name)? {
            ScriptValue::Object(function) => self.host.call(function, ScriptValue::Undefined, args),
            other => Err(BindingError::type_mismatch(format!("function '{}'", name), other.type_name())),
        }
    }
}

/// A loaded catalog and its primary execution context.
pub struct Session {
    config: RuntimeConfig,
    heap: Arc<MetaHeap>,
    runtime: Arc<dyn ForeignRuntime>,
    main: ExecutionContext,
}

impl Session {
    /// Initialize `env_logger` (default level `info`). Safe to call more
    /// than once.
    pub fn init_logging() {
        let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).try_init();
    }

    /// Read the catalog named by `config` and create the main context.
    pub fn open(config: &RuntimeConfig, runtime: Arc<dyn ForeignRuntime>) -> Result<Self, RuntimeError> {
        let blob = std::fs::read(&config.catalog_path)?;
        log::info!(
            "loaded catalog {} ({} bytes)",
            config.catalog_path.display(),
            blob.len()
        );
        Self::from_blob(config, blob, runtime)
    }

    /// Create a session over an in-memory catalog blob.
    pub fn from_blob(config: &RuntimeConfig, blob: Vec<u8>, runtime: Arc<dyn ForeignRuntime>) -> Result<Self, RuntimeError> {
        config.validate()?;
        let heap = Arc::new(Self::load_heap(config, blob)?);
        Self::with_heap(config, heap, runtime)
    }

    /// Open a session over the process-wide catalog, loading and
    /// installing it from `config` on first use.
    ///
    /// Later calls share the installed heap whatever their catalog path.
    pub fn open_shared(config: &RuntimeConfig, runtime: Arc<dyn ForeignRuntime>) -> Result<Self, RuntimeError> {
        config.validate()?;
        let heap = match MetaHeap::instance() {
            Some(heap) => Arc::clone(heap),
            None => {
                let heap = Arc::new(Self::load_heap(config, std::fs::read(&config.catalog_path)?)?);
                match MetaHeap::install(Arc::clone(&heap)) {
                    Ok(installed) => Arc::clone(installed),
                    // Lost a race with another installer
                    Err(_) => MetaHeap::instance().map(Arc::clone).unwrap_or(heap),
                }
            }
        };
        Self::with_heap(config, heap, runtime)
    }

    fn load_heap(config: &RuntimeConfig, blob: Vec<u8>) -> Result<MetaHeap, RuntimeError> {
        Ok(MetaHeap::load(blob)?
            .with_hasher(config.hash.hasher())
            .with_target(config.target()?))
    }

    fn with_heap(config: &RuntimeConfig, heap: Arc<MetaHeap>, runtime: Arc<dyn ForeignRuntime>) -> Result<Self, RuntimeError> {
        let main = ExecutionContext::create(&heap, &runtime, config, false)?;
        Ok(Self {
            config: config.clone(),
            heap,
            runtime,
            main,
        })
    }

    /// Configuration the session was opened with
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The shared catalog
    pub fn heap(&self) -> &Arc<MetaHeap> {
        &self.heap
    }

    /// The primary execution context
    pub fn main(&self) -> &ExecutionContext {
        &self.main
    }

    /// Create a worker context over the same catalog.
    pub fn spawn_worker(&self) -> Result<ExecutionContext, RuntimeError> {
        if !self.config.worker.enabled {
            return Err(ConfigError::ValidationError("worker contexts are disabled".to_string()).into());
        }
        ExecutionContext::create(&self.heap, &self.runtime, &self.config, true)
    }
}
