//! Per-context binding cache
//!
//! Records are keyed by heap offset. A class moves `Unseen -> Building ->
//! Cached` and never leaves `Cached`; a failed build rolls back to `Unseen`.

use std::rc::Rc;

use metabind_sdk::ObjectRef;
use rustc_hash::FxHashMap;

use super::structs::StructBinding;

/// Constructor and prototype of a realized binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConstructorHandle {
    /// Constructor function object (carries static members)
    pub constructor: ObjectRef,
    /// Prototype object (carries instance members)
    pub prototype: ObjectRef,
}

/// A fully realized class or protocol binding.
#[derive(Debug, Clone)]
pub struct CachedClass {
    /// Constructor and prototype
    pub handle: ConstructorHandle,
    /// Record offset of the superclass, if any
    pub superclass: Option<u32>,
    /// Instance member names defined on the prototype
    pub instance_members: Vec<String>,
    /// Static member names defined on the constructor
    pub static_members: Vec<String>,
}

/// Realization state of one class record.
#[derive(Debug, Clone)]
pub enum CacheState {
    /// Realization in progress on this context
    Building(ConstructorHandle),
    /// Realized
    Cached(CachedClass),
}

impl CacheState {
    /// Handle, whether building or cached
    pub fn handle(&self) -> ConstructorHandle {
        match self {
            CacheState::Building(handle) => *handle,
            CacheState::Cached(class) => class.handle,
        }
    }
}

/// Binding cache for one execution context
#[derive(Debug, Default)]
pub struct BindingCache {
    /// Class and protocol bindings by record offset
    classes: FxHashMap<u32, CacheState>,
    /// Struct bindings by record offset
    structs: FxHashMap<u32, Rc<StructBinding>>,
    /// Constructor object to record offset
    constructors: FxHashMap<ObjectRef, u32>,
    /// Shared `toString` function
    to_string: Option<ObjectRef>,
}

impl BindingCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// State of a class record
    pub fn class(&self, record: u32) -> Option<&CacheState> {
        self.classes.get(&record)
    }

    /// Mark a class record as being built
    pub fn begin(&mut self, record: u32, handle: ConstructorHandle) {
        self.classes.insert(record, CacheState::Building(handle));
        self.constructors.insert(handle.constructor, record);
    }

    /// Store a finished class
    pub fn finish(&mut self, record: u32, class: CachedClass) {
        self.classes.insert(record, CacheState::Cached(class));
    }

    /// Roll a failed build back to unseen
    pub fn abandon(&mut self, record: u32) {
        if let Some(state) = self.classes.remove(&record) {
            self.constructors.remove(&state.handle().constructor);
        }
    }

    /// Record offset behind a constructor object
    pub fn record_of(&self, constructor: ObjectRef) -> Option<u32> {
        self.constructors.get(&constructor).copied()
    }

    /// Cached struct binding
    pub fn structure(&self, record: u32) -> Option<Rc<StructBinding>> {
        self.structs.get(&record).cloned()
    }

    /// Store a struct binding
    pub fn insert_structure(&mut self, record: u32, binding: Rc<StructBinding>) {
        self.constructors.insert(binding.handle().constructor, record);
        self.structs.insert(record, binding);
    }

    /// Shared `toString` function, once created
    pub fn to_string_function(&self) -> Option<ObjectRef> {
        self.to_string
    }

    /// Remember the shared `toString` function
    pub fn set_to_string_function(&mut self, function: ObjectRef) {
        self.to_string = Some(function);
    }

    /// Number of realized class and struct bindings
    pub fn len(&self) -> usize {
        self.classes
            .values()
            .filter(|state| matches!(state, CacheState::Cached(_)))
            .count()
            + self.structs.len()
    }

    /// Check for an empty cache
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
