//! Abstract scripting host operations
//!
//! Defines the interface that the embedding engine implements. The binding
//! layer builds constructors, prototypes and accessors exclusively through
//! this trait and never depends on engine internals.

use crate::error::BindingResult;
use crate::handler::{Callback, Finalizer, LazyInit};
use crate::value::{NativePtr, ObjectRef, ScriptValue};

/// Abstract execution context (isolate) of the scripting host.
///
/// All object references are scoped to the context that created them.
pub trait ScriptContext {
    // ========================================================================
    // Object Creation
    // ========================================================================

    /// Create a plain object with the given prototype
    fn create_object(&self, prototype: Option<ObjectRef>) -> ObjectRef;

    /// Create a callable function object.
    ///
    /// `length` is the declared arity reported to scripts. Every function
    /// object gets a fresh `prototype` object of its own.
    fn create_function(&self, name: &str, length: usize, callback: Callback) -> ObjectRef;

    /// Wrap native memory in a host object.
    ///
    /// The finalizer, if any, runs once when the wrapper is collected.
    fn wrap_native(
        &self,
        pointer: NativePtr,
        prototype: Option<ObjectRef>,
        finalizer: Option<Finalizer>,
    ) -> ObjectRef;

    // ========================================================================
    // Object Inspection
    // ========================================================================

    /// Get the prototype of an object
    fn prototype_of(&self, object: ObjectRef) -> Option<ObjectRef>;

    /// Set the prototype of an object
    fn set_prototype(&self, object: ObjectRef, prototype: Option<ObjectRef>) -> BindingResult<()>;

    /// Property lookup along the prototype chain (runs accessors and lazy
    /// initializers). Missing properties read as `undefined`.
    fn get(&self, object: ObjectRef, key: &str) -> BindingResult<ScriptValue>;

    /// Check for an own property
    fn has_own(&self, object: ObjectRef, key: &str) -> bool;

    /// Own property keys in definition order
    fn own_keys(&self, object: ObjectRef) -> Vec<String>;

    /// Native memory behind a wrapper, if the object is one
    fn native_pointer(&self, object: ObjectRef) -> Option<NativePtr>;

    // ========================================================================
    // Property Definition
    // ========================================================================

    /// Define a data property
    fn define_value(&self, object: ObjectRef, key: &str, value: ScriptValue) -> BindingResult<()>;

    /// Define an accessor property
    fn define_accessor(
        &self,
        object: ObjectRef,
        key: &str,
        getter: Option<Callback>,
        setter: Option<Callback>,
    ) -> BindingResult<()>;

    /// Define a property whose value is produced on first access
    fn define_lazy(&self, object: ObjectRef, key: &str, init: LazyInit) -> BindingResult<()>;
}
