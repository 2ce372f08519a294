//! Metabind Engine
//!
//! This crate exposes a native platform's API surface to a scripting host
//! from a precompiled binary catalog:
//! - **Metadata**: heap, offset pointers, global tables, records and type
//!   encodings (`metadata` module)
//! - **Marshal**: native layout and per-type conversion (`marshal` module)
//! - **Binding**: lazy constructors, prototypes, trampolines and global
//!   registration (`binding` module)
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use metabind_engine::{BindingContext, MetaHeap};
//!
//! let heap = Arc::new(MetaHeap::load(blob)?);
//! let bindings = BindingContext::new(heap, runtime);
//! bindings.register_globals(&cx, global, false)?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// ============================================================================
// Core Modules
// ============================================================================

/// Binding module: lazy binding construction per execution context
pub mod binding;

/// Marshal module: layout and script value conversion
pub mod marshal;

/// Metadata module: the binary catalog format
pub mod metadata;

// ============================================================================
// Re-exports
// ============================================================================

pub use binding::{
    BindingContext, BindingOptions, CacheState, ConstructorHandle, RegistrationReport, StructBinding,
};

pub use marshal::{layout_of, Layout, MarshalEnv, StructLayout};

pub use metadata::{
    // Heap
    MetaHeap, OffsetPtr, Sections,
    // Tables
    Crc32Hasher, Fnv1aHasher, GlobalTable, ModuleTable, NameHasher,
    // Records
    BaseClassMeta, Meta, PlatformVersion, Record, RecordKind,
    // Encodings
    TypeEncoding, TypeKind,
    // Writer
    CatalogWriter,
    // Errors
    FormatError,
};
