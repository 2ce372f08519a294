//! Catalog writer
//!
//! Produces blobs in the catalog format from declarative `*Decl` values.
//! Records are appended to the heap region as they are declared; the
//! global tables are bucketed and emitted by [`CatalogWriter::finish`].
//!
//! ```text
//! let mut w = CatalogWriter::new();
//! w.constant(ConstantDecl::new(Header::new(Names::js("kAnswer")), TypeDecl::Int));
//! let heap = MetaHeap::load(w.finish())?;
//! ```

use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::encoding::TypeKind;
use super::record::{flags, PlatformVersion, RecordKind};
use super::table::{Crc32Hasher, NameHasher};

// ============================================================================
// Declarations
// ============================================================================

/// Name set of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Names {
    js: String,
    native: Option<String>,
    mangled: Option<String>,
}

impl Names {
    /// Record known by one name only
    pub fn js(name: impl Into<String>) -> Self {
        Self {
            js: name.into(),
            native: None,
            mangled: None,
        }
    }

    /// Add a native name distinct from the js name
    pub fn with_native(mut self, name: impl Into<String>) -> Self {
        self.native = Some(name.into());
        self
    }

    /// Add a mangled name
    pub fn with_mangled(mut self, name: impl Into<String>) -> Self {
        self.mangled = Some(name.into());
        self
    }

    fn native_or_js(&self) -> &str {
        self.native.as_deref().unwrap_or(&self.js)
    }
}

/// Common header fields.
#[derive(Debug, Clone)]
pub struct Header {
    names: Names,
    module: u32,
    flags: u16,
    introduced: Option<PlatformVersion>,
}

impl Header {
    /// Header with no module and no extra flags
    pub fn new(names: Names) -> Self {
        Self {
            names,
            module: 0,
            flags: 0,
            introduced: None,
        }
    }

    /// Owning module (offset returned by [`CatalogWriter::module`])
    pub fn module(mut self, module: u32) -> Self {
        self.module = module;
        self
    }

    /// Version the declaration first appeared in
    pub fn introduced(mut self, version: PlatformVersion) -> Self {
        self.introduced = Some(version);
        self
    }

    /// Mark unavailable on every platform
    pub fn unavailable(self) -> Self {
        self.flag(flags::UNAVAILABLE)
    }

    /// Exclude from worker contexts
    pub fn ui_only(self) -> Self {
        self.flag(flags::UI_ONLY)
    }

    /// Set a raw flag bit
    pub fn flag(mut self, bit: u16) -> Self {
        self.flags |= bit;
        self
    }
}

/// Type encoding node.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeDecl {
    /// `void`
    Void,
    /// `bool`
    Bool,
    /// `char`
    Char,
    /// `unsigned char`
    UChar,
    /// `short`
    Short,
    /// `unsigned short`
    UShort,
    /// `int`
    Int,
    /// `unsigned int`
    UInt,
    /// `long`
    Long,
    /// `unsigned long`
    ULong,
    /// `long long`
    LongLong,
    /// `unsigned long long`
    ULongLong,
    /// `float`
    Float,
    /// `double`
    Double,
    /// `char *`
    CString,
    /// `SEL`
    Selector,
    /// `Class`
    Class,
    /// `instancetype`
    InstanceType,
    /// `id<Protocols...>`
    Id(Vec<String>),
    /// `Name *`
    Interface(String),
    /// `struct Name`
    Struct(String),
    /// `T *`
    Pointer(Box<TypeDecl>),
    /// Function pointer: return type then parameters
    FunctionPointer(Vec<TypeDecl>),
    /// Block: return type then parameters
    Block(Vec<TypeDecl>),
    /// `T[n]`
    ConstantArray(u32, Box<TypeDecl>),
    /// `T[]`
    IncompleteArray(Box<TypeDecl>),
}

impl TypeDecl {
    fn kind(&self) -> TypeKind {
        match self {
            TypeDecl::Void => TypeKind::Void,
            TypeDecl::Bool => TypeKind::Bool,
            TypeDecl::Char => TypeKind::Char,
            TypeDecl::UChar => TypeKind::UChar,
            TypeDecl::Short => TypeKind::Short,
            TypeDecl::UShort => TypeKind::UShort,
            TypeDecl::Int => TypeKind::Int,
            TypeDecl::UInt => TypeKind::UInt,
            TypeDecl::Long => TypeKind::Long,
            TypeDecl::ULong => TypeKind::ULong,
            TypeDecl::LongLong => TypeKind::LongLong,
            TypeDecl::ULongLong => TypeKind::ULongLong,
            TypeDecl::Float => TypeKind::Float,
            TypeDecl::Double => TypeKind::Double,
            TypeDecl::CString => TypeKind::CString,
            TypeDecl::Selector => TypeKind::Selector,
            TypeDecl::Class => TypeKind::Class,
            TypeDecl::InstanceType => TypeKind::InstanceType,
            TypeDecl::Id(_) => TypeKind::Id,
            TypeDecl::Interface(_) => TypeKind::InterfaceRef,
            TypeDecl::Struct(_) => TypeKind::StructRef,
            TypeDecl::Pointer(_) => TypeKind::Pointer,
            TypeDecl::FunctionPointer(_) => TypeKind::FunctionPointer,
            TypeDecl::Block(_) => TypeKind::Block,
            TypeDecl::ConstantArray(..) => TypeKind::ConstantArray,
            TypeDecl::IncompleteArray(_) => TypeKind::IncompleteArray,
        }
    }
}

/// Method declaration.
#[derive(Debug, Clone)]
pub struct MethodDecl {
    header: Header,
    encodings: Vec<TypeDecl>,
}

impl MethodDecl {
    /// Method with signature `encodings` (return type first)
    pub fn new(names: Names, encodings: Vec<TypeDecl>) -> Self {
        Self {
            header: Header::new(names),
            encodings,
        }
    }

    /// Flag as initializer
    pub fn initializer(self) -> Self {
        self.flag(flags::METHOD_INITIALIZER)
    }

    /// Flag as optional protocol member
    pub fn optional(self) -> Self {
        self.flag(flags::MEMBER_OPTIONAL)
    }

    /// Flag the result as owned by the caller
    pub fn owns_returned(self) -> Self {
        self.flag(flags::OWNS_RETURNED)
    }

    /// Flag as variadic
    pub fn variadic(self) -> Self {
        self.flag(flags::VARIADIC)
    }

    /// Exclude from worker contexts
    pub fn ui_only(self) -> Self {
        self.flag(flags::UI_ONLY)
    }

    /// Version the method first appeared in
    pub fn introduced(mut self, version: PlatformVersion) -> Self {
        self.header = self.header.introduced(version);
        self
    }

    fn flag(mut self, bit: u16) -> Self {
        self.header = self.header.flag(bit);
        self
    }
}

/// Property declaration.
#[derive(Debug, Clone)]
pub struct PropertyDecl {
    header: Header,
    getter: Option<MethodDecl>,
    setter: Option<MethodDecl>,
}

impl PropertyDecl {
    /// Read-only property
    pub fn readonly(names: Names, getter: MethodDecl) -> Self {
        Self {
            header: Header::new(names),
            getter: Some(getter),
            setter: None,
        }
    }

    /// Read-write property
    pub fn readwrite(names: Names, getter: MethodDecl, setter: MethodDecl) -> Self {
        Self {
            header: Header::new(names),
            getter: Some(getter),
            setter: Some(setter),
        }
    }

    /// Flag as optional protocol member
    pub fn optional(mut self) -> Self {
        self.header = self.header.flag(flags::MEMBER_OPTIONAL);
        self
    }
}

/// Interface or protocol declaration.
#[derive(Debug, Clone)]
pub struct ClassDecl {
    header: Header,
    instance_methods: Vec<MethodDecl>,
    static_methods: Vec<MethodDecl>,
    instance_properties: Vec<PropertyDecl>,
    static_properties: Vec<PropertyDecl>,
    protocols: Vec<String>,
    base: Option<String>,
}

impl ClassDecl {
    /// Declaration with no members
    pub fn new(header: Header) -> Self {
        Self {
            header,
            instance_methods: Vec::new(),
            static_methods: Vec::new(),
            instance_properties: Vec::new(),
            static_properties: Vec::new(),
            protocols: Vec::new(),
            base: None,
        }
    }

    /// Add an instance method
    pub fn instance_method(mut self, method: MethodDecl) -> Self {
        self.instance_methods.push(method);
        self
    }

    /// Add a static method
    pub fn static_method(mut self, method: MethodDecl) -> Self {
        self.static_methods.push(method);
        self
    }

    /// Add an instance property
    pub fn instance_property(mut self, property: PropertyDecl) -> Self {
        self.instance_properties.push(property);
        self
    }

    /// Add a static property
    pub fn static_property(mut self, property: PropertyDecl) -> Self {
        self.static_properties.push(property);
        self
    }

    /// Adopt a protocol by native name
    pub fn adopts(mut self, protocol: impl Into<String>) -> Self {
        self.protocols.push(protocol.into());
        self
    }

    /// Set the native superclass name (ignored for protocols)
    pub fn base(mut self, name: impl Into<String>) -> Self {
        self.base = Some(name.into());
        self
    }
}

/// Struct declaration.
#[derive(Debug, Clone)]
pub struct StructDecl {
    header: Header,
    fields: Vec<(String, TypeDecl)>,
}

impl StructDecl {
    /// Struct with `(name, type)` fields in layout order
    pub fn new(header: Header, fields: Vec<(&str, TypeDecl)>) -> Self {
        Self {
            header,
            fields: fields.into_iter().map(|(n, t)| (n.to_string(), t)).collect(),
        }
    }
}

/// Free function declaration.
#[derive(Debug, Clone)]
pub struct FunctionDecl {
    header: Header,
    encodings: Vec<TypeDecl>,
}

impl FunctionDecl {
    /// Function with signature `encodings` (return type first)
    pub fn new(header: Header, encodings: Vec<TypeDecl>) -> Self {
        Self { header, encodings }
    }

    /// Flag the result as owned by the caller
    pub fn owns_returned(mut self) -> Self {
        self.header = self.header.flag(flags::OWNS_RETURNED);
        self
    }

    /// Flag as variadic
    pub fn variadic(mut self) -> Self {
        self.header = self.header.flag(flags::VARIADIC);
        self
    }
}

/// Global constant declaration.
#[derive(Debug, Clone)]
pub struct ConstantDecl {
    header: Header,
    encoding: TypeDecl,
}

impl ConstantDecl {
    /// Constant of type `encoding`
    pub fn new(header: Header, encoding: TypeDecl) -> Self {
        Self { header, encoding }
    }
}

// ============================================================================
// Writer
// ============================================================================

/// Builds a catalog blob.
pub struct CatalogWriter {
    heap: Vec<u8>,
    strings: FxHashMap<String, u32>,
    by_js_name: Vec<(String, u32)>,
    protocols: Vec<(String, u32)>,
    interfaces: Vec<(String, u32)>,
    modules: Vec<u32>,
    hasher: Arc<dyn NameHasher>,
    bucket_count: Option<usize>,
}

impl Default for CatalogWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl CatalogWriter {
    /// Writer using the default hash strategy
    pub fn new() -> Self {
        Self::with_hasher(Arc::new(Crc32Hasher))
    }

    /// Writer using a specific hash strategy
    pub fn with_hasher(hasher: Arc<dyn NameHasher>) -> Self {
        Self {
            // Offset 0 is null; no record may live there
            heap: vec![0; 4],
            strings: FxHashMap::default(),
            by_js_name: Vec::new(),
            protocols: Vec::new(),
            interfaces: Vec::new(),
            modules: Vec::new(),
            hasher,
            bucket_count: None,
        }
    }

    /// Fix the bucket count of every global table (default: one per entry)
    pub fn with_bucket_count(mut self, count: usize) -> Self {
        self.bucket_count = Some(count);
        self
    }

    fn append(&mut self, bytes: &[u8]) -> u32 {
        let at = self.heap.len() as u32;
        self.heap.extend_from_slice(bytes);
        at
    }

    /// Append raw bytes to the heap region
    pub fn raw_bytes(&mut self, bytes: &[u8]) -> u32 {
        self.append(bytes)
    }

    /// Append a bare record header with no tail
    pub fn raw_record(&mut self, names: u32, flags: u16, introduced: u16) -> u32 {
        let mut bytes = Vec::with_capacity(12);
        bytes.extend_from_slice(&names.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&flags.to_le_bytes());
        bytes.extend_from_slice(&introduced.to_le_bytes());
        self.append(&bytes)
    }

    /// Index an already written record under a js name
    pub fn index_js(&mut self, name: &str, at: u32) {
        self.by_js_name.push((name.to_string(), at));
    }

    /// Intern a NUL-terminated string
    pub fn string(&mut self, s: &str) -> u32 {
        if let Some(&at) = self.strings.get(s) {
            return at;
        }
        let at = self.append(s.as_bytes());
        self.heap.push(0);
        self.strings.insert(s.to_string(), at);
        at
    }

    /// `Array<OffsetPtr<_>>`; null when empty
    fn ptr_array(&mut self, ptrs: &[u32]) -> u32 {
        if ptrs.is_empty() {
            return 0;
        }
        let mut bytes = Vec::with_capacity(4 + ptrs.len() * 4);
        bytes.extend_from_slice(&(ptrs.len() as i32).to_le_bytes());
        for ptr in ptrs {
            bytes.extend_from_slice(&ptr.to_le_bytes());
        }
        self.append(&bytes)
    }

    fn string_array<S: AsRef<str>>(&mut self, items: &[S]) -> u32 {
        let ptrs: Vec<u32> = items.iter().map(|s| self.string(s.as_ref())).collect();
        self.ptr_array(&ptrs)
    }

    fn encode(&mut self, node: &TypeDecl, out: &mut Vec<u8>) {
        out.push(node.kind().tag());
        match node {
            TypeDecl::Id(protocols) => {
                let at = self.string_array(protocols);
                out.extend_from_slice(&at.to_le_bytes());
            }
            TypeDecl::Interface(name) | TypeDecl::Struct(name) => {
                let at = self.string(name);
                out.extend_from_slice(&at.to_le_bytes());
            }
            TypeDecl::Pointer(inner) | TypeDecl::IncompleteArray(inner) => self.encode(inner, out),
            TypeDecl::FunctionPointer(nodes) | TypeDecl::Block(nodes) => {
                out.push(nodes.len() as u8);
                for node in nodes {
                    self.encode(node, out);
                }
            }
            TypeDecl::ConstantArray(len, inner) => {
                out.extend_from_slice(&len.to_le_bytes());
                self.encode(inner, out);
            }
            _ => {}
        }
    }

    /// Append a count-prefixed encoding list
    pub fn encoding_list(&mut self, nodes: &[TypeDecl]) -> u32 {
        let mut bytes = (nodes.len() as i32).to_le_bytes().to_vec();
        for node in nodes {
            self.encode(node, &mut bytes);
        }
        self.append(&bytes)
    }

    fn record(&mut self, kind: RecordKind, header: &Header, tail: &[u32]) -> u32 {
        let mut flags = header.flags | kind as u16;
        let names = &header.names;
        let names_at = if names.native.is_none() && names.mangled.is_none() {
            self.string(&names.js)
        } else {
            let mut slots = vec![self.string(&names.js)];
            if let Some(native) = &names.native {
                flags |= flags::HAS_NAME;
                slots.push(self.string(native));
            }
            if let Some(mangled) = &names.mangled {
                flags |= flags::HAS_MANGLED_NAME;
                slots.push(self.string(mangled));
            }
            let bytes: Vec<u8> = slots.iter().flat_map(|s| s.to_le_bytes()).collect();
            self.append(&bytes)
        };
        let introduced = header.introduced.map_or(0, PlatformVersion::pack);

        let mut bytes = Vec::with_capacity(12 + tail.len() * 4);
        bytes.extend_from_slice(&names_at.to_le_bytes());
        bytes.extend_from_slice(&header.module.to_le_bytes());
        bytes.extend_from_slice(&flags.to_le_bytes());
        bytes.extend_from_slice(&introduced.to_le_bytes());
        for ptr in tail {
            bytes.extend_from_slice(&ptr.to_le_bytes());
        }
        self.append(&bytes)
    }

    /// Add a module record to the module table
    pub fn module(&mut self, header: Header, libraries: &[&str]) -> u32 {
        let libraries = self.string_array(libraries);
        let at = self.record(RecordKind::Module, &header, &[libraries]);
        self.modules.push(at);
        at
    }

    /// Append a method record (not indexed)
    pub fn method(&mut self, method: &MethodDecl) -> u32 {
        let encodings = self.encoding_list(&method.encodings);
        self.record(RecordKind::Method, &method.header, &[encodings])
    }

    /// Append a property record and its accessors (not indexed)
    pub fn property(&mut self, property: &PropertyDecl) -> u32 {
        let getter = property.getter.as_ref().map_or(0, |m| self.method(m));
        let setter = property.setter.as_ref().map_or(0, |m| self.method(m));
        self.record(RecordKind::Property, &property.header, &[getter, setter])
    }

    fn class_tail(&mut self, decl: &ClassDecl) -> Vec<u32> {
        let methods: Vec<u32> = decl.instance_methods.iter().map(|m| self.method(m)).collect();
        let statics: Vec<u32> = decl.static_methods.iter().map(|m| self.method(m)).collect();
        let props: Vec<u32> = decl.instance_properties.iter().map(|p| self.property(p)).collect();
        let static_props: Vec<u32> = decl.static_properties.iter().map(|p| self.property(p)).collect();
        vec![
            self.ptr_array(&methods),
            self.ptr_array(&statics),
            self.ptr_array(&props),
            self.ptr_array(&static_props),
            self.string_array(&decl.protocols),
        ]
    }

    /// Add a class, indexed by js and native name
    pub fn interface(&mut self, decl: ClassDecl) -> u32 {
        let mut tail = self.class_tail(&decl);
        tail.push(decl.base.as_deref().map_or(0, |b| self.string(b)));
        let at = self.record(RecordKind::Interface, &decl.header, &tail);
        self.by_js_name.push((decl.header.names.js.clone(), at));
        self.interfaces.push((decl.header.names.native_or_js().to_string(), at));
        at
    }

    /// Add a protocol, indexed by js and native name
    pub fn protocol(&mut self, decl: ClassDecl) -> u32 {
        let tail = self.class_tail(&decl);
        let at = self.record(RecordKind::Protocol, &decl.header, &tail);
        self.by_js_name.push((decl.header.names.js.clone(), at));
        self.protocols.push((decl.header.names.native_or_js().to_string(), at));
        at
    }

    /// Add a struct, indexed by js name
    pub fn structure(&mut self, decl: StructDecl) -> u32 {
        let names: Vec<&str> = decl.fields.iter().map(|(n, _)| n.as_str()).collect();
        let names = self.string_array(&names);
        let types: Vec<TypeDecl> = decl.fields.iter().map(|(_, t)| t.clone()).collect();
        let encodings = self.encoding_list(&types);
        let at = self.record(RecordKind::Struct, &decl.header, &[names, encodings]);
        self.by_js_name.push((decl.header.names.js.clone(), at));
        at
    }

    /// Add a free function, indexed by js name
    pub fn function(&mut self, decl: FunctionDecl) -> u32 {
        let encodings = self.encoding_list(&decl.encodings);
        let at = self.record(RecordKind::Function, &decl.header, &[encodings]);
        self.by_js_name.push((decl.header.names.js.clone(), at));
        at
    }

    /// Add a global constant, indexed by js name
    pub fn constant(&mut self, decl: ConstantDecl) -> u32 {
        let encoding = self.encoding_list(std::slice::from_ref(&decl.encoding));
        let at = self.record(RecordKind::Constant, &decl.header, &[encoding]);
        self.by_js_name.push((decl.header.names.js.clone(), at));
        at
    }

    fn global_table(&mut self, entries: &[(String, u32)]) -> Vec<u8> {
        let count = self.bucket_count.unwrap_or_else(|| entries.len().max(1));
        let mut buckets: Vec<Vec<u32>> = vec![Vec::new(); count];
        if count > 0 {
            for (name, at) in entries {
                let index = self.hasher.hash(name.as_bytes()) as usize % count;
                buckets[index].push(*at);
            }
        }
        let mut bytes = (count as i32).to_le_bytes().to_vec();
        for bucket in &buckets {
            let at = self.ptr_array(bucket);
            bytes.extend_from_slice(&at.to_le_bytes());
        }
        bytes
    }

    /// Emit the blob
    pub fn finish(mut self) -> Vec<u8> {
        let by_js_name = std::mem::take(&mut self.by_js_name);
        let protocols = std::mem::take(&mut self.protocols);
        let interfaces = std::mem::take(&mut self.interfaces);
        let js_table = self.global_table(&by_js_name);
        let protocol_table = self.global_table(&protocols);
        let interface_table = self.global_table(&interfaces);

        let mut blob = Vec::with_capacity(js_table.len() + self.heap.len() + 64);
        blob.extend_from_slice(&js_table);
        blob.extend_from_slice(&protocol_table);
        blob.extend_from_slice(&interface_table);
        blob.extend_from_slice(&(self.modules.len() as i32).to_le_bytes());
        for module in &self.modules {
            blob.extend_from_slice(&module.to_le_bytes());
        }
        blob.extend_from_slice(&self.heap);
        log::debug!(
            "catalog written: {} records, {} protocols, {} interfaces, {} bytes",
            by_js_name.len(),
            protocols.len(),
            interfaces.len(),
            blob.len()
        );
        blob
    }
}
