//! Catalog records
//!
//! Every record starts with the same 12-byte header:
//!
//! ```text
//! names: i32       string, or compacted [js, native?, mangled?] table
//! module: i32      owning top-level module record
//! flags: u16       kind in bits 0..3, feature bits above
//! introduced: u16  major << 8 | minor, 0 = always available
//! ```
//!
//! followed by a kind-specific tail of offset pointers. [`Record`] is the
//! untyped view; [`Record::meta`] yields the typed [`Meta`] variant.

use std::fmt;
use std::str::FromStr;

use super::encoding::{EncodingList, TypeEncoding};
use super::error::FormatError;
use super::heap::{array_or_empty, HeapArray, HeapSize, HeapView, MetaHeap, OffsetPtr, StrPtr};

/// Flag bits of the record header
pub mod flags {
    /// Kind discriminant
    pub const KIND_MASK: u16 = 0x000F;
    /// A native name distinct from the js name is stored
    pub const HAS_NAME: u16 = 1 << 4;
    /// A mangled name is stored
    pub const HAS_MANGLED_NAME: u16 = 1 << 5;
    /// Never available on the target platform
    pub const UNAVAILABLE: u16 = 1 << 6;
    /// Excluded from worker contexts
    pub const UI_ONLY: u16 = 1 << 7;
    /// Optional protocol member
    pub const MEMBER_OPTIONAL: u16 = 1 << 8;
    /// Method is an initializer
    pub const METHOD_INITIALIZER: u16 = 1 << 9;
    /// Function or method is variadic
    pub const VARIADIC: u16 = 1 << 10;
    /// Caller owns the returned object
    pub const OWNS_RETURNED: u16 = 1 << 11;
}

const HEADER_SIZE: u32 = 12;

// ============================================================================
// Platform version
// ============================================================================

/// Platform version used for availability checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlatformVersion {
    /// Major version
    pub major: u8,
    /// Minor version
    pub minor: u8,
}

impl PlatformVersion {
    /// Newest possible version; every introduced record is available
    pub const MAX: Self = Self::new(u8::MAX, u8::MAX);

    /// Create a version
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Packed `major << 8 | minor` form
    pub const fn pack(self) -> u16 {
        (self.major as u16) << 8 | self.minor as u16
    }

    /// Unpack from the header form
    pub const fn unpack(packed: u16) -> Self {
        Self::new((packed >> 8) as u8, packed as u8)
    }
}

impl Default for PlatformVersion {
    fn default() -> Self {
        Self::MAX
    }
}

impl fmt::Display for PlatformVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for PlatformVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().splitn(2, '.');
        let major = parts
            .next()
            .and_then(|p| p.parse::<u8>().ok())
            .ok_or_else(|| format!("invalid platform version '{}'", s))?;
        let minor = match parts.next() {
            Some(p) => p
                .parse::<u8>()
                .map_err(|_| format!("invalid platform version '{}'", s))?,
            None => 0,
        };
        Ok(Self::new(major, minor))
    }
}

// ============================================================================
// Record kind
// ============================================================================

/// Record discriminant (flag bits 0..3)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum RecordKind {
    /// Top-level module
    Module = 1,
    /// Class
    Interface = 2,
    /// Protocol
    Protocol = 3,
    /// C struct
    Struct = 4,
    /// Free function
    Function = 5,
    /// Property
    Property = 6,
    /// Method
    Method = 7,
    /// Global constant
    Constant = 8,
}

impl RecordKind {
    /// Decode the kind bits of a flags word
    pub fn from_flags(flags: u16) -> Option<Self> {
        Some(match flags & flags::KIND_MASK {
            1 => RecordKind::Module,
            2 => RecordKind::Interface,
            3 => RecordKind::Protocol,
            4 => RecordKind::Struct,
            5 => RecordKind::Function,
            6 => RecordKind::Property,
            7 => RecordKind::Method,
            8 => RecordKind::Constant,
            _ => return None,
        })
    }

    /// Human-readable kind name
    pub fn name(self) -> &'static str {
        match self {
            RecordKind::Module => "module",
            RecordKind::Interface => "interface",
            RecordKind::Protocol => "protocol",
            RecordKind::Struct => "struct",
            RecordKind::Function => "function",
            RecordKind::Property => "property",
            RecordKind::Method => "method",
            RecordKind::Constant => "constant",
        }
    }
}

// ============================================================================
// Record
// ============================================================================

/// Logical name slots. Absent slots are compacted out of the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NameSlot {
    Js = 0,
    Native = 1,
    Mangled = 2,
}

/// Untyped view of a catalog record.
#[derive(Clone, Copy)]
pub struct Record<'h> {
    heap: &'h MetaHeap,
    offset: u32,
}

impl HeapSize for Record<'_> {
    const SIZE: usize = HEADER_SIZE as usize;
}

impl<'h> HeapView<'h> for Record<'h> {
    fn view(heap: &'h MetaHeap, offset: u32) -> Result<Self, FormatError> {
        heap.bytes(offset, HEADER_SIZE as usize)?;
        Ok(Self { heap, offset })
    }
}

impl<'h> Record<'h> {
    /// Heap offset; the record's identity
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// The heap this record lives in
    pub fn heap(&self) -> &'h MetaHeap {
        self.heap
    }

    /// Raw flags word
    pub fn flags(&self) -> Result<u16, FormatError> {
        self.heap.read_u16(self.offset + 8)
    }

    /// Test one flag bit; unreadable flags count as clear
    pub fn has_flag(&self, bit: u16) -> bool {
        self.flags().map_or(false, |f| f & bit != 0)
    }

    /// Record discriminant
    pub fn kind(&self) -> Result<RecordKind, FormatError> {
        let flags = self.flags()?;
        RecordKind::from_flags(flags).ok_or(FormatError::UnknownRecordKind {
            kind: flags & flags::KIND_MASK,
            offset: self.offset,
        })
    }

    /// Version the declaration was introduced in (`None` = always)
    pub fn introduced(&self) -> Result<Option<PlatformVersion>, FormatError> {
        let packed = self.heap.read_u16(self.offset + 10)?;
        Ok((packed != 0).then(|| PlatformVersion::unpack(packed)))
    }

    /// Whether the record exists on the heap's target platform
    pub fn is_available(&self) -> bool {
        self.is_available_on(self.heap.target())
    }

    /// Whether the record exists on `target`
    pub fn is_available_on(&self, target: PlatformVersion) -> bool {
        if self.has_flag(flags::UNAVAILABLE) {
            return false;
        }
        match self.introduced() {
            Ok(None) => true,
            Ok(Some(version)) => version <= target,
            Err(_) => false,
        }
    }

    /// Whether the record is excluded from worker contexts
    pub fn is_ui_only(&self) -> bool {
        self.has_flag(flags::UI_ONLY)
    }

    /// Scripting-facing name
    pub fn js_name(&self) -> Result<Option<&'h str>, FormatError> {
        self.name_at(NameSlot::Js)
    }

    /// Native name; the js name when no distinct one is stored
    pub fn name(&self) -> Result<Option<&'h str>, FormatError> {
        self.name_at(NameSlot::Native)
    }

    /// Mangled name, if one is stored
    pub fn mangled_name(&self) -> Result<Option<&'h str>, FormatError> {
        if !self.has_flag(flags::HAS_MANGLED_NAME) {
            return Ok(None);
        }
        self.name_at(NameSlot::Mangled)
    }

    /// Name for diagnostics; never fails
    pub fn display_name(&self) -> String {
        match self.js_name() {
            Ok(Some(name)) => name.to_string(),
            _ => format!("<record@{}>", self.offset),
        }
    }

    fn name_at(&self, slot: NameSlot) -> Result<Option<&'h str>, FormatError> {
        let flags = self.flags()?;
        let has_name = flags & flags::HAS_NAME != 0;
        let has_mangled = flags & flags::HAS_MANGLED_NAME != 0;
        let names: StrPtr<'h> = self.heap.read_ptr(self.offset)?;
        if !has_name && !has_mangled {
            return names.resolve(self.heap);
        }

        let mut index = slot as u32;
        if !has_mangled && index >= NameSlot::Mangled as u32 {
            index -= 1;
        }
        if !has_name && index >= NameSlot::Native as u32 {
            index -= 1;
        }
        if names.is_null() {
            return Ok(None);
        }
        let entry: OffsetPtr<StrPtr<'h>> = names.cast();
        match entry.add(index).resolve(self.heap)? {
            Some(ptr) => ptr.resolve(self.heap),
            None => Ok(None),
        }
    }

    /// Owning top-level module
    pub fn top_level_module(&self) -> Result<Option<ModuleMeta<'h>>, FormatError> {
        let ptr: OffsetPtr<Record<'h>> = self.heap.read_ptr(self.offset + 4)?;
        ptr.resolve(self.heap)?.map(ModuleMeta::try_from).transpose()
    }

    /// Pointer stored in tail slot `index`
    fn tail<T>(&self, index: u32) -> Result<OffsetPtr<T>, FormatError> {
        self.heap.read_ptr(self.offset + HEADER_SIZE + index * 4)
    }

    fn require_kind(&self, expected: &[RecordKind], label: &'static str) -> Result<(), FormatError> {
        let kind = self.kind()?;
        if expected.contains(&kind) {
            Ok(())
        } else {
            Err(FormatError::UnexpectedRecord {
                expected: label,
                found: kind.name(),
                offset: self.offset,
            })
        }
    }

    /// Typed variant view
    pub fn meta(&self) -> Result<Meta<'h>, FormatError> {
        Ok(match self.kind()? {
            RecordKind::Module => Meta::Module(ModuleMeta(*self)),
            RecordKind::Interface => Meta::Interface(BaseClassMeta(*self)),
            RecordKind::Protocol => Meta::Protocol(BaseClassMeta(*self)),
            RecordKind::Struct => Meta::Struct(StructMeta(*self)),
            RecordKind::Function => Meta::Function(FunctionMeta(*self)),
            RecordKind::Property => Meta::Property(PropertyMeta(*self)),
            RecordKind::Method => Meta::Method(MethodMeta(*self)),
            RecordKind::Constant => Meta::Constant(ConstantMeta(*self)),
        })
    }
}

impl PartialEq for Record<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.heap, other.heap) && self.offset == other.offset
    }
}

impl Eq for Record<'_> {}

impl fmt::Debug for Record<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("offset", &self.offset)
            .field("kind", &self.kind().ok())
            .field("js_name", &self.js_name().ok().flatten())
            .finish()
    }
}

// ============================================================================
// Typed views
// ============================================================================

/// Typed record variant. Match exhaustively.
#[derive(Debug, Clone, Copy)]
pub enum Meta<'h> {
    /// Top-level module
    Module(ModuleMeta<'h>),
    /// Class
    Interface(BaseClassMeta<'h>),
    /// Protocol
    Protocol(BaseClassMeta<'h>),
    /// C struct
    Struct(StructMeta<'h>),
    /// Free function
    Function(FunctionMeta<'h>),
    /// Property
    Property(PropertyMeta<'h>),
    /// Method
    Method(MethodMeta<'h>),
    /// Global constant
    Constant(ConstantMeta<'h>),
}

macro_rules! typed_view {
    ($(#[$doc:meta])* $name:ident, [$($kind:ident),+], $label:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name<'h>(Record<'h>);

        impl<'h> $name<'h> {
            /// Untyped header view
            pub fn record(&self) -> Record<'h> {
                self.0
            }
        }

        impl<'h> TryFrom<Record<'h>> for $name<'h> {
            type Error = FormatError;

            fn try_from(record: Record<'h>) -> Result<Self, FormatError> {
                record.require_kind(&[$(RecordKind::$kind),+], $label)?;
                Ok(Self(record))
            }
        }

        impl HeapSize for $name<'_> {
            const SIZE: usize = HEADER_SIZE as usize;
        }

        impl<'h> HeapView<'h> for $name<'h> {
            fn view(heap: &'h MetaHeap, offset: u32) -> Result<Self, FormatError> {
                Self::try_from(Record::view(heap, offset)?)
            }
        }

        impl<'h> std::ops::Deref for $name<'h> {
            type Target = Record<'h>;

            fn deref(&self) -> &Record<'h> {
                &self.0
            }
        }
    };
}

typed_view!(
    /// Module record: `libraries`
    ModuleMeta, [Module], "module"
);
typed_view!(
    /// Interface or protocol record
    BaseClassMeta, [Interface, Protocol], "interface or protocol"
);
typed_view!(
    /// Struct record: `field_names`, `field_encodings`
    StructMeta, [Struct], "struct"
);
typed_view!(
    /// Function record: `encodings`
    FunctionMeta, [Function], "function"
);
typed_view!(
    /// Method record: `encodings`
    MethodMeta, [Method], "method"
);
typed_view!(
    /// Property record: `getter`, `setter`
    PropertyMeta, [Property], "property"
);
typed_view!(
    /// Constant record: `encoding`
    ConstantMeta, [Constant], "constant"
);

type PtrArray<'h, T> = OffsetPtr<HeapArray<'h, OffsetPtr<T>>>;

impl<'h> ModuleMeta<'h> {
    /// Libraries to link for this module
    pub fn libraries(&self) -> Result<Vec<&'h str>, FormatError> {
        self.string_list(0)
    }
}

impl<'h> Record<'h> {
    fn string_list(&self, slot: u32) -> Result<Vec<&'h str>, FormatError> {
        strings_at(self.heap, self.offset + HEADER_SIZE + slot * 4)
    }

    fn record_list<T: HeapView<'h> + 'h>(&self, slot: u32) -> Result<Vec<T>, FormatError> {
        let ptr: PtrArray<'h, T> = self.tail(slot)?;
        match ptr.resolve(self.heap)? {
            Some(array) => array.targets().collect(),
            None => Ok(Vec::new()),
        }
    }

    fn encodings_at(&self, slot: u32) -> Result<EncodingList<'h>, FormatError> {
        let ptr: OffsetPtr<EncodingList<'h>> = self.tail(slot)?;
        match ptr.resolve(self.heap)? {
            Some(list) => Ok(list),
            None => Ok(EncodingList::empty(self.heap)),
        }
    }
}

impl<'h> BaseClassMeta<'h> {
    /// Whether this is a protocol rather than a class
    pub fn is_protocol(&self) -> bool {
        matches!(self.0.kind(), Ok(RecordKind::Protocol))
    }

    /// Own instance methods, in declaration order
    pub fn instance_methods(&self) -> Result<Vec<MethodMeta<'h>>, FormatError> {
        self.0.record_list(0)
    }

    /// Own static methods
    pub fn static_methods(&self) -> Result<Vec<MethodMeta<'h>>, FormatError> {
        self.0.record_list(1)
    }

    /// Own instance properties
    pub fn instance_properties(&self) -> Result<Vec<PropertyMeta<'h>>, FormatError> {
        self.0.record_list(2)
    }

    /// Own static properties
    pub fn static_properties(&self) -> Result<Vec<PropertyMeta<'h>>, FormatError> {
        self.0.record_list(3)
    }

    /// Native names of adopted protocols
    pub fn protocols(&self) -> Result<Vec<&'h str>, FormatError> {
        self.0.string_list(4)
    }

    /// Native superclass name; always `None` for protocols
    pub fn base_name(&self) -> Result<Option<&'h str>, FormatError> {
        if self.is_protocol() {
            return Ok(None);
        }
        let ptr: StrPtr<'h> = self.0.tail(5)?;
        ptr.resolve(self.0.heap)
    }

    /// Superclass record, looked up in the interface table
    pub fn base(&self) -> Result<Option<BaseClassMeta<'h>>, FormatError> {
        let name = match self.base_name()? {
            Some(name) => name,
            None => return Ok(None),
        };
        self.0
            .heap
            .interface_table()
            .find(name, false)?
            .map(BaseClassMeta::try_from)
            .transpose()
    }
}

impl<'h> StructMeta<'h> {
    /// Field names, in layout order
    pub fn field_names(&self) -> Result<Vec<&'h str>, FormatError> {
        self.0.string_list(0)
    }

    /// Field encodings, one node per field
    pub fn field_encodings(&self) -> Result<EncodingList<'h>, FormatError> {
        self.0.encodings_at(1)
    }

    /// `(name, encoding)` pairs
    pub fn fields(&self) -> Result<Vec<(&'h str, TypeEncoding<'h>)>, FormatError> {
        let names = self.field_names()?;
        let encodings = self.field_encodings()?.iter().collect::<Result<Vec<_>, _>>()?;
        if names.len() != encodings.len() {
            return Err(FormatError::InconsistentTable {
                section: "struct",
                reason: format!(
                    "{} field names but {} encodings in '{}'",
                    names.len(),
                    encodings.len(),
                    self.0.display_name()
                ),
            });
        }
        Ok(names.into_iter().zip(encodings).collect())
    }
}

/// Shared accessors of records that carry a call signature.
pub trait Signature<'h> {
    /// Return type followed by parameter types
    fn encodings(&self) -> Result<EncodingList<'h>, FormatError>;

    /// Number of parameters
    fn parameter_count(&self) -> Result<usize, FormatError> {
        Ok(self.encodings()?.len().saturating_sub(1))
    }

    /// Return type
    fn return_type(&self) -> Result<Option<TypeEncoding<'h>>, FormatError> {
        self.encodings()?.iter().next().transpose()
    }

    /// Parameter types
    fn parameters(&self) -> Result<Vec<TypeEncoding<'h>>, FormatError> {
        self.encodings()?.iter().skip(1).collect()
    }
}

impl<'h> Signature<'h> for FunctionMeta<'h> {
    fn encodings(&self) -> Result<EncodingList<'h>, FormatError> {
        self.0.encodings_at(0)
    }
}

impl<'h> Signature<'h> for MethodMeta<'h> {
    fn encodings(&self) -> Result<EncodingList<'h>, FormatError> {
        self.0.encodings_at(0)
    }
}

impl<'h> FunctionMeta<'h> {
    /// Caller owns the returned object
    pub fn owns_returned(&self) -> bool {
        self.0.has_flag(flags::OWNS_RETURNED)
    }

    /// Variadic function
    pub fn is_variadic(&self) -> bool {
        self.0.has_flag(flags::VARIADIC)
    }
}

impl<'h> MethodMeta<'h> {
    /// Native selector
    pub fn selector(&self) -> Result<&'h str, FormatError> {
        self.0.name()?.ok_or(FormatError::InconsistentTable {
            section: "method",
            reason: format!("method at {} has no selector", self.0.offset),
        })
    }

    /// Initializer method
    pub fn is_initializer(&self) -> bool {
        self.0.has_flag(flags::METHOD_INITIALIZER)
    }

    /// Variadic method
    pub fn is_variadic(&self) -> bool {
        self.0.has_flag(flags::VARIADIC)
    }

    /// Caller owns the returned object
    pub fn owns_returned(&self) -> bool {
        self.0.has_flag(flags::OWNS_RETURNED)
    }

    /// Optional protocol member
    pub fn is_optional(&self) -> bool {
        self.0.has_flag(flags::MEMBER_OPTIONAL)
    }
}

impl<'h> PropertyMeta<'h> {
    /// Getter method
    pub fn getter(&self) -> Result<Option<MethodMeta<'h>>, FormatError> {
        let ptr: OffsetPtr<MethodMeta<'h>> = self.0.tail(0)?;
        ptr.resolve(self.0.heap)
    }

    /// Setter method; `None` for read-only properties
    pub fn setter(&self) -> Result<Option<MethodMeta<'h>>, FormatError> {
        let ptr: OffsetPtr<MethodMeta<'h>> = self.0.tail(1)?;
        ptr.resolve(self.0.heap)
    }

    /// Optional protocol member
    pub fn is_optional(&self) -> bool {
        self.0.has_flag(flags::MEMBER_OPTIONAL)
    }
}

impl<'h> ConstantMeta<'h> {
    /// Value type
    pub fn encoding(&self) -> Result<TypeEncoding<'h>, FormatError> {
        self.0.encodings_at(0)?.iter().next().transpose()?.ok_or(
            FormatError::InconsistentTable {
                section: "constant",
                reason: format!("constant '{}' has no encoding", self.0.display_name()),
            },
        )
    }
}

/// Resolve an `Array<String>` pointer, null meaning empty.
pub(crate) fn strings_at<'h>(heap: &'h MetaHeap, offset: u32) -> Result<Vec<&'h str>, FormatError> {
    let ptr: PtrArray<'h, &'h str> = heap.read_ptr(offset)?;
    let ptrs = array_or_empty(heap, ptr)?;
    let mut out = Vec::with_capacity(ptrs.len());
    for p in ptrs {
        if let Some(s) = p.resolve(heap)? {
            out.push(s);
        }
    }
    Ok(out)
}
