//! Catalog format errors

use metabind_sdk::BindingError;
use thiserror::Error;

/// Errors raised while reading a catalog blob.
///
/// Any of these means the blob (or one record in it) is defective. They
/// abort the binding being built and are reported for that record only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    /// An offset or length points outside the loaded blob
    #[error("Offset {offset} (+{len} bytes) is outside the heap of {heap_len} bytes")]
    OutOfBounds {
        /// Offending offset
        offset: i64,
        /// Bytes that were to be read
        len: usize,
        /// Size of the addressed region
        heap_len: usize,
    },

    /// Unrecognized type-encoding tag
    #[error("Unknown type encoding tag {tag} at offset {offset}")]
    UnknownTypeTag {
        /// Tag byte
        tag: u8,
        /// Heap offset of the node
        offset: u32,
    },

    /// Unrecognized record discriminant
    #[error("Unknown record kind {kind} at offset {offset}")]
    UnknownRecordKind {
        /// Discriminant bits
        kind: u16,
        /// Heap offset of the record
        offset: u32,
    },

    /// A string runs off the end of the heap
    #[error("Unterminated string at offset {offset}")]
    UnterminatedString {
        /// Heap offset of the string
        offset: u32,
    },

    /// A string is not valid UTF-8
    #[error("Invalid UTF-8 string at offset {offset}")]
    InvalidUtf8 {
        /// Heap offset of the string
        offset: u32,
    },

    /// A table's declared size does not fit the blob
    #[error("Inconsistent {section} table: {reason}")]
    InconsistentTable {
        /// Table name
        section: &'static str,
        /// What is wrong
        reason: String,
    },

    /// A record of one kind was found where another was required
    #[error("Expected {expected} record at offset {offset}, found {found}")]
    UnexpectedRecord {
        /// Required kind
        expected: &'static str,
        /// Actual kind
        found: &'static str,
        /// Heap offset of the record
        offset: u32,
    },

    /// A struct-ref encoding names a struct missing from the catalog
    #[error("Unknown struct '{0}'")]
    UnknownStruct(String),

    /// Type encodings nest deeper than the reader accepts
    #[error("Type encoding nested too deeply at offset {offset}")]
    NestingTooDeep {
        /// Heap offset of the node
        offset: u32,
    },

    /// A native value is larger than the marshaler accepts
    #[error("Type at offset {offset} is larger than {limit} bytes")]
    ValueTooLarge {
        /// Heap offset of the encoding or struct record
        offset: u32,
        /// Accepted maximum
        limit: usize,
    },

    /// A class is (transitively) its own superclass
    #[error("Cyclic inheritance involving '{0}'")]
    CyclicInheritance(String),

    /// The process-wide heap was already installed
    #[error("Metadata heap already loaded")]
    HeapAlreadyLoaded,
}

impl From<FormatError> for BindingError {
    fn from(err: FormatError) -> Self {
        BindingError::MetadataFormat(err.to_string())
    }
}
