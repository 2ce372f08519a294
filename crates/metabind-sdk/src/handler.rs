//! Callback types installed on host objects
//!
//! Execution contexts are single-threaded, so callbacks are reference
//! counted with `Rc` and carry no `Send`/`Sync` bounds.

use std::rc::Rc;

use crate::context::ScriptContext;
use crate::error::BindingResult;
use crate::value::{NativePtr, ScriptValue};

/// Function/method/accessor callback: `(receiver, arguments) -> value`.
pub type Callback = Rc<dyn Fn(&dyn ScriptContext, ScriptValue, &[ScriptValue]) -> BindingResult<ScriptValue>>;

/// Initializer of a lazily evaluated property. Runs at most once; the host
/// caches the produced value.
pub type LazyInit = Box<dyn FnOnce(&dyn ScriptContext) -> BindingResult<ScriptValue>>;

/// Runs when the host collects a wrapper around native memory.
pub type Finalizer = Box<dyn FnOnce(NativePtr)>;

/// Build a [`Callback`] from a closure
pub fn callback<F>(f: F) -> Callback
where
    F: Fn(&dyn ScriptContext, ScriptValue, &[ScriptValue]) -> BindingResult<ScriptValue> + 'static,
{
    Rc::new(f)
}
