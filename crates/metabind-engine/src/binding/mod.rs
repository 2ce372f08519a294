//! Lazy binding construction
//!
//! A [`BindingContext`] belongs to one execution context. It turns catalog
//! records into constructors, prototypes, accessors and callable functions
//! on first use and caches them by record offset, so repeated requests for
//! the same record return the same objects.
//!
//! - `builder`: class and protocol constructors, member resolution
//! - `dispatch`: method, function, property and constructor trampolines
//! - `structs`: struct constructors and field accessors
//! - `globals`: lazy registration on the global object

mod builder;
pub mod cache;
mod dispatch;
mod globals;
pub mod structs;

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use metabind_sdk::{Finalizer, ForeignRuntime};

use crate::metadata::{MetaHeap, PlatformVersion, Record};

pub use cache::{BindingCache, CacheState, CachedClass, ConstructorHandle};
pub use dispatch::ALLOC_SIGNATURE;
pub use globals::RegistrationReport;
pub use structs::StructBinding;

/// Binding behavior of one execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingOptions {
    /// Platform version records are checked against
    pub target_version: PlatformVersion,
    /// Hide records unavailable on `target_version`
    pub only_available: bool,
    /// Worker context: ui-only members are omitted
    pub worker: bool,
}

impl Default for BindingOptions {
    fn default() -> Self {
        Self {
            target_version: PlatformVersion::MAX,
            only_available: true,
            worker: false,
        }
    }
}

struct Inner {
    heap: Arc<MetaHeap>,
    runtime: Arc<dyn ForeignRuntime>,
    options: BindingOptions,
    cache: RefCell<BindingCache>,
}

/// Binding state of one execution context.
///
/// Cheap to clone; clones share the cache. Not `Send`: a context and its
/// bindings stay on the thread that created them. The heap is shared.
#[derive(Clone)]
pub struct BindingContext {
    inner: Rc<Inner>,
}

impl BindingContext {
    /// Context checking availability against the heap's target
    pub fn new(heap: Arc<MetaHeap>, runtime: Arc<dyn ForeignRuntime>) -> Self {
        let options = BindingOptions {
            target_version: heap.target(),
            ..BindingOptions::default()
        };
        Self::with_options(heap, runtime, options)
    }

    /// Context with explicit options
    pub fn with_options(heap: Arc<MetaHeap>, runtime: Arc<dyn ForeignRuntime>, options: BindingOptions) -> Self {
        log::debug!(
            "binding context created (target {}, worker: {})",
            options.target_version,
            options.worker
        );
        Self {
            inner: Rc::new(Inner {
                heap,
                runtime,
                options,
                cache: RefCell::new(BindingCache::new()),
            }),
        }
    }

    /// The catalog
    pub fn heap(&self) -> &MetaHeap {
        &self.inner.heap
    }

    /// Shared handle to the catalog
    pub fn shared_heap(&self) -> &Arc<MetaHeap> {
        &self.inner.heap
    }

    /// Foreign invocation collaborator
    pub fn runtime(&self) -> &dyn ForeignRuntime {
        self.inner.runtime.as_ref()
    }

    /// Options
    pub fn options(&self) -> &BindingOptions {
        &self.inner.options
    }

    /// Number of realized bindings
    pub fn cached_count(&self) -> usize {
        self.inner.cache.borrow().len()
    }

    pub(crate) fn cache(&self) -> &RefCell<BindingCache> {
        &self.inner.cache
    }

    /// Whether a record is visible under the availability options
    pub(crate) fn is_exposed(&self, record: &Record<'_>) -> bool {
        let options = self.options();
        !options.only_available || record.is_available_on(options.target_version)
    }

    /// Whether a member record is bound in this context
    pub(crate) fn includes_member(&self, record: &Record<'_>) -> bool {
        self.is_exposed(record) && !(self.options().worker && record.is_ui_only())
    }

    /// Finalizer releasing an owned native object
    pub(crate) fn release_finalizer(&self) -> Finalizer {
        let runtime = Arc::clone(&self.inner.runtime);
        Box::new(move |pointer| {
            log::trace!("releasing {:?}", pointer);
            runtime.release(pointer)
        })
    }
}

impl fmt::Debug for BindingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingContext")
            .field("options", &self.inner.options)
            .field("cached", &self.cached_count())
            .finish()
    }
}
