//! Metabind SDK - boundary types between the binding engine and its host
//!
//! This crate provides the minimal types and traits shared by the catalog
//! binding engine, the scripting host that embeds it, and the foreign
//! runtime that performs native calls:
//!
//! - [`ScriptValue`], [`ObjectRef`], [`NativePtr`]: values crossing the boundary
//! - [`ScriptContext`]: the scripting host's object model
//! - [`ForeignRuntime`] / [`ForeignMemory`]: symbol resolution, invocation, memory
//! - [`BindingError`]: the call-time error taxonomy

#![warn(missing_docs)]

pub mod context;
pub mod error;
pub mod foreign;
pub mod handler;
pub mod value;

pub use context::ScriptContext;
pub use error::{BindingError, BindingResult, NativeFailure};
pub use foreign::{CallTarget, ForeignCall, ForeignMemory, ForeignRuntime, NativeSymbol, SymbolRequest};
pub use handler::{callback, Callback, Finalizer, LazyInit};
pub use value::{NativePtr, ObjectRef, ScriptValue};
