//! Argument and result marshaling
//!
//! Conversion between script values and native bytes is data driven: one
//! [`Marshaller`] per [`TypeKind`], each a pair of plain functions. Sizes
//! and alignment come from [`layout`].

pub mod layout;

use std::cell::RefCell;

use metabind_sdk::{BindingError, BindingResult, NativePtr, ScriptContext, ScriptValue};

use crate::binding::BindingContext;
use crate::metadata::{TypeEncoding, TypeKind};

pub use layout::{align_up, layout_of, struct_layout, FieldLayout, Layout, StructLayout, MAX_VALUE_SIZE};

/// Encode a script value into exactly `layout_of(encoding).size` bytes.
pub type EncodeFn = fn(&MarshalEnv<'_>, &TypeEncoding<'_>, &ScriptValue, &mut [u8]) -> BindingResult<()>;

/// Decode native bytes into a script value.
pub type DecodeFn = fn(&MarshalEnv<'_>, &TypeEncoding<'_>, &[u8]) -> BindingResult<ScriptValue>;

/// Conversion pair for one type kind.
pub struct Marshaller {
    /// Script value to native bytes
    pub encode: EncodeFn,
    /// Native bytes to script value
    pub decode: DecodeFn,
}

/// State shared by the conversions of one call.
///
/// Temporary native allocations (c-strings built from script strings) are
/// released when the environment is dropped, after the call returns.
pub struct MarshalEnv<'a> {
    pub(crate) cx: &'a dyn ScriptContext,
    pub(crate) bindings: &'a BindingContext,
    /// Record offset of the class `instancetype` results belong to
    pub(crate) declared_class: Option<u32>,
    /// Object results are owned by the caller
    pub(crate) owns_returned: bool,
    temporaries: RefCell<Vec<NativePtr>>,
}

impl<'a> MarshalEnv<'a> {
    /// Environment for one call
    pub fn new(cx: &'a dyn ScriptContext, bindings: &'a BindingContext) -> Self {
        Self {
            cx,
            bindings,
            declared_class: None,
            owns_returned: false,
            temporaries: RefCell::new(Vec::new()),
        }
    }

    /// Class `instancetype` resolves to
    pub fn with_declared_class(mut self, record: Option<u32>) -> Self {
        self.declared_class = record;
        self
    }

    /// Mark object results as caller-owned
    pub fn with_owns_returned(mut self, owns: bool) -> Self {
        self.owns_returned = owns;
        self
    }

    fn temporary(&self, pointer: NativePtr) {
        self.temporaries.borrow_mut().push(pointer);
    }

    /// Encode one value into a fresh buffer
    pub fn encode(&self, encoding: &TypeEncoding<'_>, value: &ScriptValue) -> BindingResult<Vec<u8>> {
        let layout = layout_of(self.bindings.heap(), encoding)?;
        let mut out = vec![0u8; layout.size];
        (marshaller(encoding.kind()).encode)(self, encoding, value, &mut out)?;
        Ok(out)
    }

    /// Decode one value
    pub fn decode(&self, encoding: &TypeEncoding<'_>, bytes: &[u8]) -> BindingResult<ScriptValue> {
        (marshaller(encoding.kind()).decode)(self, encoding, bytes)
    }
}

impl Drop for MarshalEnv<'_> {
    fn drop(&mut self) {
        let runtime = self.bindings.runtime();
        for pointer in self.temporaries.get_mut().drain(..) {
            runtime.release(pointer);
        }
    }
}

/// Call arguments laid out back to back with natural alignment.
#[derive(Debug, Default)]
pub struct ArgumentBuffer {
    bytes: Vec<u8>,
}

impl ArgumentBuffer {
    /// Empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one argument
    pub fn push(&mut self, env: &MarshalEnv<'_>, encoding: &TypeEncoding<'_>, value: &ScriptValue) -> BindingResult<()> {
        let layout = layout_of(env.bindings.heap(), encoding)?;
        let start = align_up(self.bytes.len(), layout.align);
        self.bytes.resize(start + layout.size, 0);
        (marshaller(encoding.kind()).encode)(env, encoding, value, &mut self.bytes[start..])
    }

    /// Laid-out bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

// ============================================================================
// Dispatch table
// ============================================================================

/// Conversion pair for `kind`
pub fn marshaller(kind: TypeKind) -> &'static Marshaller {
    &MARSHALLERS[kind.tag() as usize]
}

static MARSHALLERS: [Marshaller; 26] = [
    Marshaller { encode: encode_void, decode: decode_void },             // Void
    Marshaller { encode: encode_bool, decode: decode_bool },             // Bool
    Marshaller { encode: encode_int::<i8>, decode: decode_int::<i8> },   // Char
    Marshaller { encode: encode_int::<u8>, decode: decode_int::<u8> },   // UChar
    Marshaller { encode: encode_int::<i16>, decode: decode_int::<i16> }, // Short
    Marshaller { encode: encode_int::<u16>, decode: decode_int::<u16> }, // UShort
    Marshaller { encode: encode_int::<i32>, decode: decode_int::<i32> }, // Int
    Marshaller { encode: encode_int::<u32>, decode: decode_int::<u32> }, // UInt
    Marshaller { encode: encode_int::<i64>, decode: decode_int::<i64> }, // Long
    Marshaller { encode: encode_int::<u64>, decode: decode_int::<u64> }, // ULong
    Marshaller { encode: encode_int::<i64>, decode: decode_int::<i64> }, // LongLong
    Marshaller { encode: encode_int::<u64>, decode: decode_int::<u64> }, // ULongLong
    Marshaller { encode: encode_float::<f32>, decode: decode_float::<f32> }, // Float
    Marshaller { encode: encode_float::<f64>, decode: decode_float::<f64> }, // Double
    Marshaller { encode: encode_c_string, decode: decode_c_string },     // CString
    Marshaller { encode: encode_c_string, decode: decode_c_string },     // Selector
    Marshaller { encode: encode_object, decode: decode_class },          // Class
    Marshaller { encode: encode_object, decode: decode_object },         // InstanceType
    Marshaller { encode: encode_object, decode: decode_object },         // Id
    Marshaller { encode: encode_object, decode: decode_object },         // InterfaceRef
    Marshaller { encode: encode_struct, decode: decode_struct },         // StructRef
    Marshaller { encode: encode_pointer, decode: decode_pointer },       // Pointer
    Marshaller { encode: encode_pointer, decode: decode_pointer },       // FunctionPointer
    Marshaller { encode: encode_pointer, decode: decode_pointer },       // Block
    Marshaller { encode: encode_array, decode: decode_array },           // ConstantArray
    Marshaller { encode: encode_pointer, decode: decode_pointer },       // IncompleteArray
];

// ============================================================================
// Scalars
// ============================================================================

/// Fixed-width little-endian numbers.
trait LeBytes: Copy {
    fn read_le(bytes: &[u8]) -> Option<Self>;
    fn write_le(self, out: &mut [u8]);
}

macro_rules! le_bytes {
    ($($t:ty),*) => {
        $(
            impl LeBytes for $t {
                fn read_le(bytes: &[u8]) -> Option<Self> {
                    let raw = bytes.get(..std::mem::size_of::<$t>())?;
                    raw.try_into().ok().map(<$t>::from_le_bytes)
                }

                fn write_le(self, out: &mut [u8]) {
                    out[..std::mem::size_of::<$t>()].copy_from_slice(&self.to_le_bytes());
                }
            }
        )*
    };
}

le_bytes!(i8, u8, i16, u16, i32, u32, i64, u64, f32, f64);

fn short_buffer(encoding: &TypeEncoding<'_>, len: usize) -> BindingError {
    BindingError::MetadataFormat(format!(
        "{} bytes are too few for a {:?} value",
        len,
        encoding.kind()
    ))
}

fn encode_void(_: &MarshalEnv<'_>, _: &TypeEncoding<'_>, _: &ScriptValue, _: &mut [u8]) -> BindingResult<()> {
    Ok(())
}

fn decode_void(_: &MarshalEnv<'_>, _: &TypeEncoding<'_>, _: &[u8]) -> BindingResult<ScriptValue> {
    Ok(ScriptValue::Undefined)
}

fn encode_bool(_: &MarshalEnv<'_>, _: &TypeEncoding<'_>, value: &ScriptValue, out: &mut [u8]) -> BindingResult<()> {
    let b = value
        .as_bool()
        .ok_or_else(|| BindingError::type_mismatch("boolean", value.type_name()))?;
    out[0] = b as u8;
    Ok(())
}

fn decode_bool(_: &MarshalEnv<'_>, encoding: &TypeEncoding<'_>, bytes: &[u8]) -> BindingResult<ScriptValue> {
    let b = bytes.first().ok_or_else(|| short_buffer(encoding, bytes.len()))?;
    Ok(ScriptValue::Bool(*b != 0))
}

/// Integral value of a script number, if it has one
fn integral(value: &ScriptValue) -> Option<i128> {
    match value {
        ScriptValue::Int(i) => Some(*i as i128),
        ScriptValue::Number(n) if n.is_finite() && n.fract() == 0.0 && n.abs() < 1.9e19 => Some(*n as i128),
        _ => None,
    }
}

fn encode_int<T>(_: &MarshalEnv<'_>, encoding: &TypeEncoding<'_>, value: &ScriptValue, out: &mut [u8]) -> BindingResult<()>
where
    T: LeBytes + TryFrom<i128>,
{
    let n = integral(value)
        .and_then(|n| T::try_from(n).ok())
        .ok_or_else(|| BindingError::type_mismatch(format!("{:?} in range", encoding.kind()), value.type_name()))?;
    n.write_le(out);
    Ok(())
}

fn decode_int<T>(_: &MarshalEnv<'_>, encoding: &TypeEncoding<'_>, bytes: &[u8]) -> BindingResult<ScriptValue>
where
    T: LeBytes + Into<i128>,
{
    let n: i128 = T::read_le(bytes)
        .ok_or_else(|| short_buffer(encoding, bytes.len()))?
        .into();
    Ok(match i64::try_from(n) {
        Ok(i) => ScriptValue::Int(i),
        Err(_) => ScriptValue::Number(n as f64),
    })
}

/// Float width conversions
trait Float: LeBytes {
    fn from_f64(v: f64) -> Self;
    fn to_f64(self) -> f64;
}

impl Float for f32 {
    fn from_f64(v: f64) -> Self {
        v as f32
    }

    fn to_f64(self) -> f64 {
        self as f64
    }
}

impl Float for f64 {
    fn from_f64(v: f64) -> Self {
        v
    }

    fn to_f64(self) -> f64 {
        self
    }
}

fn encode_float<T: Float>(_: &MarshalEnv<'_>, _: &TypeEncoding<'_>, value: &ScriptValue, out: &mut [u8]) -> BindingResult<()> {
    let v = value
        .as_f64()
        .ok_or_else(|| BindingError::type_mismatch("number", value.type_name()))?;
    T::from_f64(v).write_le(out);
    Ok(())
}

fn decode_float<T: Float>(_: &MarshalEnv<'_>, encoding: &TypeEncoding<'_>, bytes: &[u8]) -> BindingResult<ScriptValue> {
    let v = T::read_le(bytes).ok_or_else(|| short_buffer(encoding, bytes.len()))?;
    Ok(ScriptValue::Number(v.to_f64()))
}

// ============================================================================
// Pointers
// ============================================================================

/// Pointer at the start of `bytes`, if there are enough of them
pub(crate) fn native_pointer(bytes: &[u8]) -> Option<NativePtr> {
    u64::read_le(bytes).map(NativePtr::from_addr)
}

fn read_pointer(encoding: &TypeEncoding<'_>, bytes: &[u8]) -> BindingResult<NativePtr> {
    native_pointer(bytes).ok_or_else(|| short_buffer(encoding, bytes.len()))
}

/// Null, or the native memory behind a wrapper
fn pointer_value(env: &MarshalEnv<'_>, expected: &str, value: &ScriptValue) -> BindingResult<NativePtr> {
    match value {
        ScriptValue::Undefined | ScriptValue::Null => Ok(NativePtr::NULL),
        ScriptValue::Object(obj) => env
            .cx
            .native_pointer(*obj)
            .ok_or_else(|| BindingError::type_mismatch(expected, "plain object")),
        other => Err(BindingError::type_mismatch(expected, other.type_name())),
    }
}

fn encode_pointer(env: &MarshalEnv<'_>, _: &TypeEncoding<'_>, value: &ScriptValue, out: &mut [u8]) -> BindingResult<()> {
    pointer_value(env, "pointer", value)?.addr().write_le(out);
    Ok(())
}

fn decode_pointer(env: &MarshalEnv<'_>, encoding: &TypeEncoding<'_>, bytes: &[u8]) -> BindingResult<ScriptValue> {
    let pointer = read_pointer(encoding, bytes)?;
    if pointer.is_null() {
        return Ok(ScriptValue::Null);
    }
    Ok(ScriptValue::Object(env.cx.wrap_native(pointer, None, None)))
}

fn encode_c_string(env: &MarshalEnv<'_>, _: &TypeEncoding<'_>, value: &ScriptValue, out: &mut [u8]) -> BindingResult<()> {
    let pointer = match value {
        ScriptValue::String(s) => {
            let runtime = env.bindings.runtime();
            let mut bytes = Vec::with_capacity(s.len() + 1);
            bytes.extend_from_slice(s.as_bytes());
            bytes.push(0);
            let pointer = runtime.allocate(bytes.len(), 1);
            env.temporary(pointer);
            runtime.write(pointer, &bytes)?;
            pointer
        }
        other => pointer_value(env, "string", other)?,
    };
    pointer.addr().write_le(out);
    Ok(())
}

fn decode_c_string(env: &MarshalEnv<'_>, encoding: &TypeEncoding<'_>, bytes: &[u8]) -> BindingResult<ScriptValue> {
    let pointer = read_pointer(encoding, bytes)?;
    if pointer.is_null() {
        return Ok(ScriptValue::Null);
    }
    let s = env.bindings.runtime().read_c_string(pointer)?;
    Ok(ScriptValue::string(s))
}

fn encode_object(env: &MarshalEnv<'_>, _: &TypeEncoding<'_>, value: &ScriptValue, out: &mut [u8]) -> BindingResult<()> {
    pointer_value(env, "native object", value)?.addr().write_le(out);
    Ok(())
}

fn decode_object(env: &MarshalEnv<'_>, encoding: &TypeEncoding<'_>, bytes: &[u8]) -> BindingResult<ScriptValue> {
    let pointer = read_pointer(encoding, bytes)?;
    if pointer.is_null() {
        return Ok(ScriptValue::Null);
    }
    let declared = match encoding.kind() {
        TypeKind::InterfaceRef => match encoding.name()? {
            Some(name) => env.bindings.heap().interface_table().find(name, false)?.map(|r| r.offset()),
            None => None,
        },
        TypeKind::InstanceType => env.declared_class,
        _ => None,
    };
    env.bindings
        .wrap_object(env.cx, pointer, declared, env.owns_returned)
        .map(ScriptValue::Object)
}

fn decode_class(env: &MarshalEnv<'_>, encoding: &TypeEncoding<'_>, bytes: &[u8]) -> BindingResult<ScriptValue> {
    let pointer = read_pointer(encoding, bytes)?;
    if pointer.is_null() {
        return Ok(ScriptValue::Null);
    }
    env.bindings.class_object(env.cx, pointer)
}

// ============================================================================
// Aggregates
// ============================================================================

fn encode_struct(env: &MarshalEnv<'_>, encoding: &TypeEncoding<'_>, value: &ScriptValue, out: &mut [u8]) -> BindingResult<()> {
    let record = layout::struct_named(env.bindings.heap(), encoding)?;
    let binding = env.bindings.get_or_create_struct_binding(env.cx, record)?;
    let bytes = binding.bytes_of(env, value)?;
    out[..bytes.len()].copy_from_slice(&bytes);
    Ok(())
}

fn decode_struct(env: &MarshalEnv<'_>, encoding: &TypeEncoding<'_>, bytes: &[u8]) -> BindingResult<ScriptValue> {
    let record = layout::struct_named(env.bindings.heap(), encoding)?;
    let binding = env.bindings.get_or_create_struct_binding(env.cx, record)?;
    binding.instantiate(env, bytes).map(ScriptValue::Object)
}

fn array_parts<'h>(env: &MarshalEnv<'_>, encoding: &TypeEncoding<'h>) -> BindingResult<(TypeEncoding<'h>, usize, Layout)> {
    let inner = encoding
        .inner()?
        .ok_or_else(|| BindingError::MetadataFormat(format!("array at {} has no element type", encoding.offset())))?;
    let len = encoding.array_len()?.unwrap_or(0) as usize;
    let layout = layout_of(env.bindings.heap(), &inner)?;
    Ok((inner, len, layout))
}

/// Byte range of element `index`
fn element_span(encoding: &TypeEncoding<'_>, index: usize, size: usize) -> BindingResult<std::ops::Range<usize>> {
    index
        .checked_mul(size)
        .and_then(|start| Some(start..start.checked_add(size)?))
        .ok_or_else(|| {
            BindingError::MetadataFormat(format!("array at {} overflows its layout", encoding.offset()))
        })
}

fn encode_array(env: &MarshalEnv<'_>, encoding: &TypeEncoding<'_>, value: &ScriptValue, out: &mut [u8]) -> BindingResult<()> {
    let (inner, len, layout) = array_parts(env, encoding)?;
    let object = match value {
        ScriptValue::Undefined | ScriptValue::Null => return Ok(()),
        ScriptValue::Object(obj) => *obj,
        other => return Err(BindingError::type_mismatch("array", other.type_name())),
    };
    let encode = marshaller(inner.kind()).encode;
    for i in 0..len {
        let element = env.cx.get(object, &i.to_string())?;
        if element.is_nullish() {
            continue;
        }
        let span = element_span(encoding, i, layout.size)?;
        let len = out.len();
        let slot = out.get_mut(span).ok_or_else(|| short_buffer(encoding, len))?;
        encode(env, &inner, &element, slot)?;
    }
    Ok(())
}

fn decode_array(env: &MarshalEnv<'_>, encoding: &TypeEncoding<'_>, bytes: &[u8]) -> BindingResult<ScriptValue> {
    let (inner, len, layout) = array_parts(env, encoding)?;
    let total = element_span(encoding, len, layout.size)?.start;
    if bytes.len() < total {
        return Err(short_buffer(encoding, bytes.len()));
    }
    let decode = marshaller(inner.kind()).decode;
    let array = env.cx.create_object(None);
    for i in 0..len {
        let span = element_span(encoding, i, layout.size)?;
        let element = decode(env, &inner, &bytes[span])?;
        env.cx.define_value(array, &i.to_string(), element)?;
    }
    env.cx.define_value(array, "length", ScriptValue::Int(len as i64))?;
    Ok(ScriptValue::Object(array))
}
