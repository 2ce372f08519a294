//! Metadata heap and offset pointers
//!
//! The catalog is one immutable byte blob:
//!
//! ```text
//! [GlobalTable: by-js-name]
//! [GlobalTable: by-native-name, protocols]
//! [GlobalTable: by-native-name, interfaces]
//! [ModuleTable]
//! [Heap region: records, strings, encoding lists]
//! ```
//!
//! Each section reports its own size, so section starts are found by
//! walking forward. Offset pointers are relative to the heap region and
//! every dereference is bounds checked.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use once_cell::sync::OnceCell;

use super::error::FormatError;
use super::record::{PlatformVersion, Record};
use super::table::{Crc32Hasher, GlobalTable, ModuleTable, NameHasher, TableKind};

static INSTANCE: OnceCell<Arc<MetaHeap>> = OnceCell::new();

/// Location of each section inside the blob (byte indices).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sections {
    /// JS-name table start
    pub js_table: usize,
    /// Protocol native-name table start
    pub protocol_table: usize,
    /// Interface native-name table start
    pub interface_table: usize,
    /// Module table start
    pub module_table: usize,
    /// Heap region start
    pub heap: usize,
}

/// The loaded, immutable catalog.
pub struct MetaHeap {
    blob: Arc<[u8]>,
    sections: Sections,
    hasher: Arc<dyn NameHasher>,
    target: PlatformVersion,
}

impl MetaHeap {
    /// Load a catalog blob with the default hash strategy and no
    /// availability floor.
    pub fn load(blob: impl Into<Arc<[u8]>>) -> Result<Self, FormatError> {
        let blob = blob.into();
        let sections = Self::discover_sections(&blob)?;
        log::debug!(
            "metadata blob: {} bytes, heap region at {}",
            blob.len(),
            sections.heap
        );
        Ok(Self {
            blob,
            sections,
            hasher: Arc::new(Crc32Hasher),
            target: PlatformVersion::MAX,
        })
    }

    /// Use a different name-hash strategy (must match the generator's)
    pub fn with_hasher(mut self, hasher: Arc<dyn NameHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    /// Set the platform version records are checked against
    pub fn with_target(mut self, target: PlatformVersion) -> Self {
        self.target = target;
        self
    }

    /// Install a heap as the process-wide instance. Succeeds once.
    pub fn install(heap: Arc<MetaHeap>) -> Result<&'static Arc<MetaHeap>, FormatError> {
        let mut installed = false;
        let instance = INSTANCE.get_or_init(|| {
            installed = true;
            heap
        });
        if installed {
            log::info!("metadata heap installed ({} bytes)", instance.blob.len());
            Ok(instance)
        } else {
            Err(FormatError::HeapAlreadyLoaded)
        }
    }

    /// The process-wide instance, if one was installed
    pub fn instance() -> Option<&'static Arc<MetaHeap>> {
        INSTANCE.get()
    }

    fn discover_sections(blob: &[u8]) -> Result<Sections, FormatError> {
        let js_table = 0;
        let protocol_table = js_table + Self::table_size(blob, js_table, "js-name")?;
        let interface_table = protocol_table + Self::table_size(blob, protocol_table, "protocol")?;
        let module_table = interface_table + Self::table_size(blob, interface_table, "interface")?;
        let heap = module_table + Self::table_size(blob, module_table, "module")?;
        Ok(Sections {
            js_table,
            protocol_table,
            interface_table,
            module_table,
            heap,
        })
    }

    /// Serialized size of an `Array<OffsetPtr<_>>` section starting at `at`
    fn table_size(blob: &[u8], at: usize, section: &'static str) -> Result<usize, FormatError> {
        let count = blob
            .get(at..at + 4)
            .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .ok_or_else(|| FormatError::InconsistentTable {
                section,
                reason: format!("header at {} runs past the blob end ({})", at, blob.len()),
            })?;
        if count < 0 {
            return Err(FormatError::InconsistentTable {
                section,
                reason: format!("negative entry count {}", count),
            });
        }
        let size = 4 + count as usize * 4;
        if at + size > blob.len() {
            return Err(FormatError::InconsistentTable {
                section,
                reason: format!("{} entries do not fit in {} bytes", count, blob.len() - at),
            });
        }
        Ok(size)
    }

    // ========================================================================
    // Sections
    // ========================================================================

    /// Section layout
    pub fn sections(&self) -> Sections {
        self.sections
    }

    /// Table keyed by JS name
    pub fn js_table(&self) -> GlobalTable<'_> {
        GlobalTable::new(self, self.sections.js_table, TableKind::ByJsName)
    }

    /// Protocols keyed by native name
    pub fn protocol_table(&self) -> GlobalTable<'_> {
        GlobalTable::new(self, self.sections.protocol_table, TableKind::ByNativeName)
    }

    /// Interfaces keyed by native name
    pub fn interface_table(&self) -> GlobalTable<'_> {
        GlobalTable::new(self, self.sections.interface_table, TableKind::ByNativeName)
    }

    /// Top-level modules
    pub fn modules(&self) -> ModuleTable<'_> {
        ModuleTable::new(self, self.sections.module_table)
    }

    /// Name-hash strategy
    pub fn hasher(&self) -> &dyn NameHasher {
        self.hasher.as_ref()
    }

    /// Platform version used for availability checks
    pub fn target(&self) -> PlatformVersion {
        self.target
    }

    /// Size of the heap region
    pub fn heap_len(&self) -> usize {
        self.blob.len() - self.sections.heap
    }

    /// View the record at a heap offset
    pub fn record(&self, offset: u32) -> Result<Record<'_>, FormatError> {
        Record::view(self, offset)
    }

    // ========================================================================
    // Raw access
    // ========================================================================

    /// Bytes of the table region (blob-relative)
    pub(crate) fn table_bytes(&self, at: usize, len: usize) -> Result<&[u8], FormatError> {
        self.blob
            .get(at..at.saturating_add(len))
            .filter(|b| b.len() == len && at + len <= self.sections.heap)
            .ok_or(FormatError::OutOfBounds {
                offset: at as i64,
                len,
                heap_len: self.sections.heap,
            })
    }

    /// Read an i32 in the table region
    pub(crate) fn table_i32(&self, at: usize) -> Result<i32, FormatError> {
        let b = self.table_bytes(at, 4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Bytes of the heap region (heap-relative)
    pub fn bytes(&self, offset: u32, len: usize) -> Result<&[u8], FormatError> {
        let heap = &self.blob[self.sections.heap..];
        let start = offset as usize;
        if start == 0 || start.checked_add(len).map_or(true, |end| end > heap.len()) {
            return Err(FormatError::OutOfBounds {
                offset: offset as i64,
                len,
                heap_len: heap.len(),
            });
        }
        Ok(&heap[start..start + len])
    }

    /// Read a u8 from the heap region
    pub fn read_u8(&self, offset: u32) -> Result<u8, FormatError> {
        Ok(self.bytes(offset, 1)?[0])
    }

    /// Read a u16 from the heap region
    pub fn read_u16(&self, offset: u32) -> Result<u16, FormatError> {
        let b = self.bytes(offset, 2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    /// Read a u32 from the heap region
    pub fn read_u32(&self, offset: u32) -> Result<u32, FormatError> {
        let b = self.bytes(offset, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read an i32 from the heap region
    pub fn read_i32(&self, offset: u32) -> Result<i32, FormatError> {
        let b = self.bytes(offset, 4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read an offset pointer stored at `offset`
    pub fn read_ptr<T>(&self, offset: u32) -> Result<OffsetPtr<T>, FormatError> {
        OffsetPtr::from_raw(self.read_i32(offset)?, self.heap_len())
    }

    /// Read a NUL-terminated string starting at `offset`
    pub fn c_str(&self, offset: u32) -> Result<&str, FormatError> {
        let heap = &self.blob[self.sections.heap..];
        let start = offset as usize;
        if start == 0 || start >= heap.len() {
            return Err(FormatError::OutOfBounds {
                offset: offset as i64,
                len: 1,
                heap_len: heap.len(),
            });
        }
        let len = heap[start..]
            .iter()
            .position(|&b| b == 0)
            .ok_or(FormatError::UnterminatedString { offset })?;
        std::str::from_utf8(&heap[start..start + len]).map_err(|_| FormatError::InvalidUtf8 { offset })
    }
}

impl fmt::Debug for MetaHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetaHeap")
            .field("len", &self.blob.len())
            .field("sections", &self.sections)
            .field("hasher", &self.hasher)
            .field("target", &self.target)
            .finish()
    }
}

// ============================================================================
// Offset Pointers
// ============================================================================

/// Fixed serialized stride of a heap type, used by typed pointer arithmetic.
pub trait HeapSize {
    /// Stride in bytes
    const SIZE: usize;
}

/// A typed view that can be materialized at a heap offset.
pub trait HeapView<'h>: HeapSize + Sized {
    /// Materialize the view at `offset`
    fn view(heap: &'h MetaHeap, offset: u32) -> Result<Self, FormatError>;
}

/// 32-bit heap-relative pointer. Offset 0 is null.
pub struct OffsetPtr<T> {
    offset: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for OffsetPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for OffsetPtr<T> {}

impl<T> PartialEq for OffsetPtr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.offset == other.offset
    }
}

impl<T> Eq for OffsetPtr<T> {}

impl<T> fmt::Debug for OffsetPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OffsetPtr({})", self.offset)
    }
}

impl<T> OffsetPtr<T> {
    /// The null pointer
    pub const NULL: Self = Self::new(0);

    /// Create from a heap offset
    pub const fn new(offset: u32) -> Self {
        Self {
            offset,
            _marker: PhantomData,
        }
    }

    /// Validate a raw serialized offset against the heap length.
    pub fn from_raw(raw: i32, heap_len: usize) -> Result<Self, FormatError> {
        if raw < 0 || (raw != 0 && raw as usize >= heap_len) {
            return Err(FormatError::OutOfBounds {
                offset: raw as i64,
                len: 0,
                heap_len,
            });
        }
        Ok(Self::new(raw as u32))
    }

    /// Raw heap offset
    pub const fn offset(self) -> u32 {
        self.offset
    }

    /// Check for null
    pub const fn is_null(self) -> bool {
        self.offset == 0
    }

    /// Displace by raw bytes. Never dereferences.
    pub const fn add_bytes(self, bytes: u32) -> Self {
        Self::new(self.offset.wrapping_add(bytes))
    }

    /// Reinterpret as a pointer to another type
    pub const fn cast<U>(self) -> OffsetPtr<U> {
        OffsetPtr::new(self.offset)
    }

    /// Dereference. Null yields `None`; out-of-range offsets fail.
    pub fn resolve<'h>(self, heap: &'h MetaHeap) -> Result<Option<T>, FormatError>
    where
        T: HeapView<'h>,
    {
        if self.is_null() {
            Ok(None)
        } else {
            T::view(heap, self.offset).map(Some)
        }
    }
}

impl<T: HeapSize> OffsetPtr<T> {
    /// Displace by `count` elements of `T`. Never dereferences.
    pub const fn add(self, count: u32) -> Self {
        Self::new(self.offset.wrapping_add(count.wrapping_mul(T::SIZE as u32)))
    }
}

impl<T> HeapSize for OffsetPtr<T> {
    const SIZE: usize = 4;
}

impl<'h, T> HeapView<'h> for OffsetPtr<T> {
    fn view(heap: &'h MetaHeap, offset: u32) -> Result<Self, FormatError> {
        heap.read_ptr(offset)
    }
}

impl HeapSize for &str {
    const SIZE: usize = 1;
}

impl<'h> HeapView<'h> for &'h str {
    fn view(heap: &'h MetaHeap, offset: u32) -> Result<Self, FormatError> {
        heap.c_str(offset)
    }
}

/// Pointer to a NUL-terminated string
pub type StrPtr<'h> = OffsetPtr<&'h str>;

// ============================================================================
// Arrays
// ============================================================================

/// View over `Array<T>`: an i32 count followed by `count` elements.
pub struct HeapArray<'h, T> {
    heap: &'h MetaHeap,
    offset: u32,
    len: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<'h, T> Clone for HeapArray<'h, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'h, T> Copy for HeapArray<'h, T> {}

impl<'h, T> HeapSize for HeapArray<'h, T> {
    const SIZE: usize = 4;
}

impl<'h, T: HeapView<'h>> HeapView<'h> for HeapArray<'h, T> {
    fn view(heap: &'h MetaHeap, offset: u32) -> Result<Self, FormatError> {
        let count = heap.read_i32(offset)?;
        if count < 0 {
            return Err(FormatError::OutOfBounds {
                offset: offset as i64,
                len: 0,
                heap_len: heap.heap_len(),
            });
        }
        // Whole array must lie inside the heap.
        heap.bytes(offset, 4 + count as usize * T::SIZE)?;
        Ok(Self {
            heap,
            offset,
            len: count as u32,
            _marker: PhantomData,
        })
    }
}

impl<'h, T: HeapView<'h> + 'h> HeapArray<'h, T> {
    /// Element count
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Check for an empty array
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Element at `index`
    pub fn get(&self, index: usize) -> Result<T, FormatError> {
        if index >= self.len() {
            return Err(FormatError::OutOfBounds {
                offset: self.offset as i64,
                len: index,
                heap_len: self.heap.heap_len(),
            });
        }
        T::view(self.heap, self.offset + 4 + (index * T::SIZE) as u32)
    }

    /// Iterate over elements
    pub fn iter(&self) -> impl Iterator<Item = Result<T, FormatError>> + 'h {
        let array = *self;
        (0..array.len()).map(move |i| array.get(i))
    }
}

impl<'h, T> HeapArray<'h, OffsetPtr<T>>
where
    T: HeapView<'h> + 'h,
{
    /// Iterate over the non-null targets of a pointer array
    pub fn targets(&self) -> impl Iterator<Item = Result<T, FormatError>> + 'h {
        let heap = self.heap;
        self.iter().filter_map(move |ptr| match ptr {
            Ok(ptr) => ptr.resolve(heap).transpose(),
            Err(err) => Some(Err(err)),
        })
    }
}

/// Resolve an optional array pointer, treating null as empty.
pub(crate) fn array_or_empty<'h, T: HeapView<'h> + 'h>(
    heap: &'h MetaHeap,
    ptr: OffsetPtr<HeapArray<'h, T>>,
) -> Result<Vec<T>, FormatError> {
    match ptr.resolve(heap)? {
        Some(array) => array.iter().collect(),
        None => Ok(Vec::new()),
    }
}
