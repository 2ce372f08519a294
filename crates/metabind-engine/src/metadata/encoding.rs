//! Type encodings
//!
//! A node is a one-byte tag followed by a tag-specific payload. Nodes are
//! concatenated into count-prefixed lists; a function or method signature
//! is one such list, return type first.

use std::fmt;

use super::error::FormatError;
use super::heap::{HeapSize, HeapView, MetaHeap, StrPtr};
use super::record::strings_at;

/// Deepest nesting accepted before a node is rejected.
pub const MAX_NESTING: usize = 64;

/// Type encoding tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeKind {
    /// No value
    Void = 0,
    /// Boolean
    Bool = 1,
    /// Signed 8-bit
    Char = 2,
    /// Unsigned 8-bit
    UChar = 3,
    /// Signed 16-bit
    Short = 4,
    /// Unsigned 16-bit
    UShort = 5,
    /// Signed 32-bit
    Int = 6,
    /// Unsigned 32-bit
    UInt = 7,
    /// Signed 64-bit
    Long = 8,
    /// Unsigned 64-bit
    ULong = 9,
    /// Signed 64-bit
    LongLong = 10,
    /// Unsigned 64-bit
    ULongLong = 11,
    /// 32-bit float
    Float = 12,
    /// 64-bit float
    Double = 13,
    /// NUL-terminated string
    CString = 14,
    /// Method selector
    Selector = 15,
    /// Class object
    Class = 16,
    /// Instance of the receiver's class
    InstanceType = 17,
    /// Object, optionally protocol-qualified
    Id = 18,
    /// Instance of a named class
    InterfaceRef = 19,
    /// Struct by value
    StructRef = 20,
    /// Pointer to an inner type
    Pointer = 21,
    /// C function pointer
    FunctionPointer = 22,
    /// Block
    Block = 23,
    /// Fixed-length array
    ConstantArray = 24,
    /// Array of unknown length
    IncompleteArray = 25,
}

impl TypeKind {
    /// Decode a tag byte
    pub fn from_tag(tag: u8) -> Option<Self> {
        use TypeKind::*;
        Some(match tag {
            0 => Void,
            1 => Bool,
            2 => Char,
            3 => UChar,
            4 => Short,
            5 => UShort,
            6 => Int,
            7 => UInt,
            8 => Long,
            9 => ULong,
            10 => LongLong,
            11 => ULongLong,
            12 => Float,
            13 => Double,
            14 => CString,
            15 => Selector,
            16 => Class,
            17 => InstanceType,
            18 => Id,
            19 => InterfaceRef,
            20 => StructRef,
            21 => Pointer,
            22 => FunctionPointer,
            23 => Block,
            24 => ConstantArray,
            25 => IncompleteArray,
            _ => return None,
        })
    }

    /// Tag byte
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Kinds whose values are native objects
    pub fn is_object(self) -> bool {
        matches!(
            self,
            TypeKind::Class | TypeKind::InstanceType | TypeKind::Id | TypeKind::InterfaceRef
        )
    }
}

// ============================================================================
// Nodes
// ============================================================================

/// View of one encoded node.
#[derive(Clone, Copy)]
pub struct TypeEncoding<'h> {
    heap: &'h MetaHeap,
    offset: u32,
    kind: TypeKind,
}

impl<'h> TypeEncoding<'h> {
    /// View the node at `offset`
    pub fn view(heap: &'h MetaHeap, offset: u32) -> Result<Self, FormatError> {
        let tag = heap.read_u8(offset)?;
        let kind = TypeKind::from_tag(tag).ok_or(FormatError::UnknownTypeTag { tag, offset })?;
        Ok(Self { heap, offset, kind })
    }

    /// Heap offset of the tag byte
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Node kind
    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    /// Offset immediately past this node, nested content included
    pub fn next(&self) -> Result<u32, FormatError> {
        self.end(0)
    }

    fn end(&self, depth: usize) -> Result<u32, FormatError> {
        if depth > MAX_NESTING {
            return Err(FormatError::NestingTooDeep { offset: self.offset });
        }
        let payload = self.offset + 1;
        match self.kind {
            TypeKind::Id | TypeKind::InterfaceRef | TypeKind::StructRef => {
                // Pointer payload must be readable
                self.heap.read_i32(payload)?;
                Ok(payload + 4)
            }
            TypeKind::Pointer | TypeKind::IncompleteArray => {
                TypeEncoding::view(self.heap, payload)?.end(depth + 1)
            }
            TypeKind::ConstantArray => {
                self.heap.read_u32(payload)?;
                TypeEncoding::view(self.heap, payload + 4)?.end(depth + 1)
            }
            TypeKind::FunctionPointer | TypeKind::Block => {
                let count = self.heap.read_u8(payload)? as u32;
                let mut cursor = payload + 1;
                for _ in 0..count {
                    cursor = TypeEncoding::view(self.heap, cursor)?.end(depth + 1)?;
                }
                Ok(cursor)
            }
            _ => Ok(payload),
        }
    }

    /// Inner node of a pointer or array
    pub fn inner(&self) -> Result<Option<TypeEncoding<'h>>, FormatError> {
        let at = match self.kind {
            TypeKind::Pointer | TypeKind::IncompleteArray => self.offset + 1,
            TypeKind::ConstantArray => self.offset + 5,
            _ => return Ok(None),
        };
        TypeEncoding::view(self.heap, at).map(Some)
    }

    /// Length of a constant array
    pub fn array_len(&self) -> Result<Option<u32>, FormatError> {
        match self.kind {
            TypeKind::ConstantArray => self.heap.read_u32(self.offset + 1).map(Some),
            _ => Ok(None),
        }
    }

    /// Protocol names qualifying an `id`
    pub fn protocols(&self) -> Result<Vec<&'h str>, FormatError> {
        match self.kind {
            TypeKind::Id => strings_at(self.heap, self.offset + 1),
            _ => Ok(Vec::new()),
        }
    }

    /// Referenced class or struct name
    pub fn name(&self) -> Result<Option<&'h str>, FormatError> {
        match self.kind {
            TypeKind::InterfaceRef | TypeKind::StructRef => {
                let ptr: StrPtr<'h> = self.heap.read_ptr(self.offset + 1)?;
                ptr.resolve(self.heap)
            }
            _ => Ok(None),
        }
    }

    /// Nested signature of a function pointer or block
    pub fn signature(&self) -> Result<Option<EncodingList<'h>>, FormatError> {
        match self.kind {
            TypeKind::FunctionPointer | TypeKind::Block => {
                let count = self.heap.read_u8(self.offset + 1)? as u32;
                Ok(Some(EncodingList {
                    heap: self.heap,
                    start: self.offset + 1,
                    first: self.offset + 2,
                    count,
                }))
            }
            _ => Ok(None),
        }
    }
}

impl PartialEq for TypeEncoding<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.heap, other.heap) && self.offset == other.offset
    }
}

impl fmt::Debug for TypeEncoding<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}@{}", self.kind, self.offset)
    }
}

// ============================================================================
// Lists
// ============================================================================

/// A count-prefixed run of concatenated nodes.
#[derive(Clone, Copy)]
pub struct EncodingList<'h> {
    heap: &'h MetaHeap,
    start: u32,
    first: u32,
    count: u32,
}

impl HeapSize for EncodingList<'_> {
    const SIZE: usize = 4;
}

impl<'h> HeapView<'h> for EncodingList<'h> {
    fn view(heap: &'h MetaHeap, offset: u32) -> Result<Self, FormatError> {
        let count = heap.read_i32(offset)?;
        let count = u32::try_from(count).map_err(|_| FormatError::OutOfBounds {
            offset: offset as i64,
            len: 0,
            heap_len: heap.heap_len(),
        })?;
        Ok(Self {
            heap,
            start: offset,
            first: offset + 4,
            count,
        })
    }
}

impl<'h> EncodingList<'h> {
    /// A list with no nodes (null list pointer)
    pub(crate) fn empty(heap: &'h MetaHeap) -> Self {
        Self {
            heap,
            start: 0,
            first: 0,
            count: 0,
        }
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.count as usize
    }

    /// Check for an empty list
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Walk the nodes in order
    pub fn iter(&self) -> EncodingIter<'h> {
        EncodingIter {
            heap: self.heap,
            cursor: self.first,
            remaining: self.count,
        }
    }

    /// Offset past the last node
    pub fn end_offset(&self) -> Result<u32, FormatError> {
        let mut cursor = self.first;
        for node in self.iter() {
            cursor = node?.next()?;
        }
        Ok(cursor)
    }

    /// Raw bytes of the list, count prefix included
    pub fn bytes(&self) -> Result<&'h [u8], FormatError> {
        if self.start == 0 {
            return Ok(&[]);
        }
        let end = self.end_offset()?;
        self.heap.bytes(self.start, (end - self.start) as usize)
    }

    /// Node at `index`
    pub fn get(&self, index: usize) -> Result<Option<TypeEncoding<'h>>, FormatError> {
        self.iter().nth(index).transpose()
    }
}

impl fmt::Debug for EncodingList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter().filter_map(Result::ok)).finish()
    }
}

/// Iterator over the nodes of an [`EncodingList`].
///
/// Stops after the first malformed node.
pub struct EncodingIter<'h> {
    heap: &'h MetaHeap,
    cursor: u32,
    remaining: u32,
}

impl<'h> Iterator for EncodingIter<'h> {
    type Item = Result<TypeEncoding<'h>, FormatError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let node = TypeEncoding::view(self.heap, self.cursor).and_then(|node| {
            self.cursor = node.next()?;
            Ok(node)
        });
        if node.is_err() {
            self.remaining = 0;
        }
        Some(node)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining as usize))
    }
}
