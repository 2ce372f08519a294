//! Catalog format
//!
//! Read-only views over the binary catalog: the heap and its offset
//! pointers, the hash-bucketed global tables, records and their typed
//! variants, and type encodings. [`CatalogWriter`] produces blobs in the
//! same format.

pub mod encoding;
pub mod error;
pub mod heap;
pub mod record;
pub mod table;
pub mod writer;

pub use encoding::{EncodingList, TypeEncoding, TypeKind, MAX_NESTING};
pub use error::FormatError;
pub use heap::{HeapArray, HeapSize, HeapView, MetaHeap, OffsetPtr, Sections, StrPtr};
pub use record::{
    flags, BaseClassMeta, ConstantMeta, FunctionMeta, Meta, MethodMeta, ModuleMeta, PlatformVersion, PropertyMeta,
    Record, RecordKind, Signature, StructMeta,
};
pub use table::{Crc32Hasher, Fnv1aHasher, GlobalTable, ModuleTable, NameHasher, TableIter, TableKind};
pub use writer::{
    CatalogWriter, ClassDecl, ConstantDecl, FunctionDecl, Header, MethodDecl, Names, PropertyDecl, StructDecl,
    TypeDecl,
};
