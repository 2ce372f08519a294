//! Foreign runtime collaborator
//!
//! The binding layer decides *what* to call and marshals the bytes; the
//! foreign runtime resolves symbols against the native platform and
//! performs the call. How symbols are physically resolved (dynamic
//! linking, selector tables) is entirely up to the implementation.

use crate::error::NativeFailure;
use crate::value::NativePtr;

/// Opaque handle for a resolved native symbol (function address, method
/// implementation, constant address).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeSymbol(pub u64);

/// What the binding layer asks the foreign runtime to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolRequest<'a> {
    /// Free function by native name
    Function {
        /// Native symbol name
        name: &'a str,
    },
    /// Global constant by native name
    Constant {
        /// Native symbol name
        name: &'a str,
    },
    /// Instance method, dispatched on the receiver's dynamic class
    InstanceMethod {
        /// The receiving instance
        receiver: NativePtr,
        /// Native name of the declaring class or protocol
        declared_in: &'a str,
        /// Native selector
        selector: &'a str,
    },
    /// Class (static) method
    ClassMethod {
        /// Native class name
        class: &'a str,
        /// Native selector
        selector: &'a str,
    },
}

/// Receiver passed along with a foreign call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTarget<'a> {
    /// Free function, no receiver
    Free,
    /// Instance receiver
    Instance(NativePtr),
    /// Class receiver by native name
    Class(&'a str),
}

/// A fully marshaled foreign call.
#[derive(Debug, Clone, Copy)]
pub struct ForeignCall<'a> {
    /// Resolved symbol
    pub symbol: NativeSymbol,
    /// Receiver
    pub target: CallTarget<'a>,
    /// Encoded signature: the raw count-prefixed type-encoding list
    /// (return type first, then parameters)
    pub signature: &'a [u8],
    /// Arguments laid out back to back with natural alignment
    pub arguments: &'a [u8],
}

/// Access to foreign (native) memory.
pub trait ForeignMemory: Send + Sync {
    /// Allocate zeroed memory
    fn allocate(&self, size: usize, align: usize) -> NativePtr;

    /// Release memory or an owned native object
    fn release(&self, pointer: NativePtr);

    /// Copy bytes out of native memory
    fn read(&self, pointer: NativePtr, out: &mut [u8]) -> Result<(), NativeFailure>;

    /// Copy bytes into native memory
    fn write(&self, pointer: NativePtr, bytes: &[u8]) -> Result<(), NativeFailure>;

    /// Read a NUL-terminated string
    fn read_c_string(&self, pointer: NativePtr) -> Result<String, NativeFailure>;
}

/// Foreign invocation collaborator.
pub trait ForeignRuntime: ForeignMemory {
    /// Resolve a symbol; `None` when the native side has no such member
    fn resolve(&self, request: &SymbolRequest<'_>) -> Option<NativeSymbol>;

    /// Perform a call and return the raw return-value bytes
    fn invoke(&self, call: &ForeignCall<'_>) -> Result<Vec<u8>, NativeFailure>;

    /// Native class name of an object instance
    fn class_name_of(&self, object: NativePtr) -> Option<String>;

    /// Native superclass name of a class; `None` for root classes or
    /// when the runtime cannot tell
    fn superclass_of(&self, _class: &str) -> Option<String> {
        None
    }

    /// Copy `out.len()` bytes of a resolved constant
    fn load_constant(&self, symbol: NativeSymbol, out: &mut [u8]) -> Result<(), NativeFailure>;
}
