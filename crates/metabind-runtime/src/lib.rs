//! Metabind Runtime
//!
//! Wires the engine to a reference scripting host:
//! - [`HostContext`]: an in-memory `ScriptContext`
//! - [`RuntimeConfig`]: TOML configuration
//! - [`Session`]: catalog loading, main and worker execution contexts

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod host;
pub mod session;

pub use config::{ConfigError, HashKind, RuntimeConfig, WorkerConfig};
pub use error::RuntimeError;
pub use host::HostContext;
pub use session::{ExecutionContext, Session};
