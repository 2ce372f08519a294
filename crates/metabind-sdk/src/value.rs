//! Values crossing the scripting boundary
//!
//! The host engine owns the object model; the binding layer only ever sees
//! primitives, strings and opaque object references handed out by the host.
//!
//! ```text
//! Undefined / Null       no payload
//! Bool                   bool
//! Int                    i64 (all native integer kinds up to 64 bits)
//! Number                 f64 (float, double, integers outside i64)
//! String                 shared UTF-8
//! Object                 host-owned reference, resolved via ScriptContext
//! ```

use std::fmt;
use std::sync::Arc;

/// Opaque reference to an object owned by the scripting host.
///
/// Only meaningful for the execution context that created it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ObjectRef(u64);

impl ObjectRef {
    /// Create from a raw host identifier
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw host identifier
    #[inline]
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef(#{})", self.0)
    }
}

/// Address in foreign (native) memory.
///
/// Never dereferenced by the binding layer; every read and write goes
/// through the foreign runtime collaborator.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct NativePtr(u64);

impl NativePtr {
    /// The null address
    pub const NULL: NativePtr = NativePtr(0);

    /// Create from a raw address
    #[inline]
    pub const fn from_addr(addr: u64) -> Self {
        Self(addr)
    }

    /// Get the raw address
    #[inline]
    pub const fn addr(self) -> u64 {
        self.0
    }

    /// Check for the null address
    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Pointer displaced by `bytes`
    #[inline]
    pub const fn offset(self, bytes: usize) -> Self {
        Self(self.0 + bytes as u64)
    }
}

impl fmt::Debug for NativePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativePtr({:#x})", self.0)
    }
}

/// A value as seen by scripts.
#[derive(Clone, PartialEq, Default)]
pub enum ScriptValue {
    /// `undefined`
    #[default]
    Undefined,
    /// `null`
    Null,
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Floating point number
    Number(f64),
    /// String
    String(Arc<str>),
    /// Host object (plain object, function, or wrapped native)
    Object(ObjectRef),
}

impl ScriptValue {
    // ========================================================================
    // Constructors
    // ========================================================================

    /// Create a null value
    #[inline]
    pub const fn null() -> Self {
        ScriptValue::Null
    }

    /// Create a boolean value
    #[inline]
    pub const fn bool(b: bool) -> Self {
        ScriptValue::Bool(b)
    }

    /// Create an integer value
    #[inline]
    pub const fn int(i: i64) -> Self {
        ScriptValue::Int(i)
    }

    /// Create a number value
    #[inline]
    pub const fn number(f: f64) -> Self {
        ScriptValue::Number(f)
    }

    /// Create a string value
    pub fn string(s: impl AsRef<str>) -> Self {
        ScriptValue::String(Arc::from(s.as_ref()))
    }

    /// Create an object value
    #[inline]
    pub const fn object(obj: ObjectRef) -> Self {
        ScriptValue::Object(obj)
    }

    // ========================================================================
    // Type checks
    // ========================================================================

    /// `null` or `undefined`
    #[inline]
    pub const fn is_nullish(&self) -> bool {
        matches!(self, ScriptValue::Null | ScriptValue::Undefined)
    }

    /// Check for an object reference
    #[inline]
    pub const fn is_object(&self) -> bool {
        matches!(self, ScriptValue::Object(_))
    }

    // ========================================================================
    // Extractors
    // ========================================================================

    /// Extract boolean value
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            ScriptValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Extract an integer, accepting numbers with no fractional part
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ScriptValue::Int(i) => Some(*i),
            ScriptValue::Number(f)
                if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64 =>
            {
                Some(*f as i64)
            }
            _ => None,
        }
    }

    /// Extract a number, accepting integers
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ScriptValue::Number(f) => Some(*f),
            ScriptValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Extract string contents
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScriptValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Extract object reference
    pub const fn as_object(&self) -> Option<ObjectRef> {
        match self {
            ScriptValue::Object(o) => Some(*o),
            _ => None,
        }
    }

    /// Get type name for diagnostics
    pub const fn type_name(&self) -> &'static str {
        match self {
            ScriptValue::Undefined => "undefined",
            ScriptValue::Null => "null",
            ScriptValue::Bool(_) => "boolean",
            ScriptValue::Int(_) => "int",
            ScriptValue::Number(_) => "number",
            ScriptValue::String(_) => "string",
            ScriptValue::Object(_) => "object",
        }
    }
}

impl fmt::Debug for ScriptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptValue::Undefined => write!(f, "ScriptValue::Undefined"),
            ScriptValue::Null => write!(f, "ScriptValue::Null"),
            ScriptValue::Bool(b) => write!(f, "ScriptValue::Bool({})", b),
            ScriptValue::Int(i) => write!(f, "ScriptValue::Int({})", i),
            ScriptValue::Number(n) => write!(f, "ScriptValue::Number({})", n),
            ScriptValue::String(s) => write!(f, "ScriptValue::String({:?})", s),
            ScriptValue::Object(o) => write!(f, "ScriptValue::Object({:?})", o),
        }
    }
}

impl From<bool> for ScriptValue {
    fn from(b: bool) -> Self {
        ScriptValue::Bool(b)
    }
}

impl From<i64> for ScriptValue {
    fn from(i: i64) -> Self {
        ScriptValue::Int(i)
    }
}

impl From<i32> for ScriptValue {
    fn from(i: i32) -> Self {
        ScriptValue::Int(i as i64)
    }
}

impl From<f64> for ScriptValue {
    fn from(f: f64) -> Self {
        ScriptValue::Number(f)
    }
}

impl From<&str> for ScriptValue {
    fn from(s: &str) -> Self {
        ScriptValue::string(s)
    }
}

impl From<ObjectRef> for ScriptValue {
    fn from(o: ObjectRef) -> Self {
        ScriptValue::Object(o)
    }
}
