//! In-memory scripting host
//!
//! `HostContext` is a small object model implementing [`ScriptContext`]:
//! objects with ordered own properties and a prototype link, callable
//! function objects, native wrappers with finalizers, and lazily evaluated
//! properties. It stands in for an embedding engine when driving bindings
//! from Rust.
//!
//! No borrow of the object store is held while a callback, accessor or
//! lazy initializer runs, so callbacks may re-enter the context freely.

use std::cell::RefCell;

use metabind_sdk::{
    BindingError, BindingResult, Callback, Finalizer, LazyInit, NativePtr, ObjectRef, ScriptContext, ScriptValue,
};
use rustc_hash::FxHashMap;

/// Longest prototype chain walked before a lookup gives up
const MAX_PROTOTYPE_DEPTH: usize = 256;

enum Property {
    Value(ScriptValue),
    Accessor {
        getter: Option<Callback>,
        setter: Option<Callback>,
    },
    Lazy(LazyInit),
    /// Lazy initializer currently running
    Evaluating,
}

#[derive(Default)]
struct HostObject {
    prototype: Option<ObjectRef>,
    keys: Vec<String>,
    properties: FxHashMap<String, Property>,
    callable: Option<Callback>,
    native: Option<NativePtr>,
    finalizer: Option<Finalizer>,
    collected: bool,
}

impl HostObject {
    fn define(&mut self, key: &str, property: Property) {
        if self.properties.insert(key.to_string(), property).is_none() {
            self.keys.push(key.to_string());
        }
    }
}

/// What a lookup found, cloned out of the store
enum Found {
    Missing,
    Value(ScriptValue),
    Getter(Option<Callback>),
    Lazy(ObjectRef),
}

/// One execution context of the reference host.
///
/// Objects live in an arena indexed by [`ObjectRef`]. Slots are never
/// reused: [`HostContext::collect`] runs the finalizer and marks the slot
/// collected, so the arena only grows for the lifetime of the context.
pub struct HostContext {
    objects: RefCell<Vec<HostObject>>,
    global: ObjectRef,
}

impl HostContext {
    /// Create a context with an empty global object
    pub fn new() -> Self {
        let global = HostObject::default();
        Self {
            objects: RefCell::new(vec![global]),
            global: ObjectRef::from_raw(0),
        }
    }

    /// The global object
    pub fn global(&self) -> ObjectRef {
        self.global
    }

    /// Number of objects ever created
    pub fn object_count(&self) -> usize {
        self.objects.borrow().len()
    }

    fn alloc(&self, object: HostObject) -> ObjectRef {
        let mut objects = self.objects.borrow_mut();
        objects.push(object);
        ObjectRef::from_raw((objects.len() - 1) as u64)
    }

    fn with_object<R>(&self, object: ObjectRef, f: impl FnOnce(&HostObject) -> R) -> BindingResult<R> {
        let objects = self.objects.borrow();
        match objects.get(object.as_raw() as usize) {
            Some(obj) if !obj.collected => Ok(f(obj)),
            _ => Err(BindingError::Host(format!("stale object reference {:?}", object))),
        }
    }

    fn with_object_mut<R>(&self, object: ObjectRef, f: impl FnOnce(&mut HostObject) -> R) -> BindingResult<R> {
        let mut objects = self.objects.borrow_mut();
        match objects.get_mut(object.as_raw() as usize) {
            Some(obj) if !obj.collected => Ok(f(obj)),
            _ => Err(BindingError::Host(format!("stale object reference {:?}", object))),
        }
    }

    fn lookup(&self, object: ObjectRef, key: &str) -> BindingResult<Found> {
        let objects = self.objects.borrow();
        let mut current = Some(object);
        for _ in 0..MAX_PROTOTYPE_DEPTH {
            let at = match current {
                Some(at) => at,
                None => break,
            };
            let obj = match objects.get(at.as_raw() as usize) {
                Some(obj) if !obj.collected => obj,
                _ => return Err(BindingError::Host(format!("stale object reference {:?}", at))),
            };
            match obj.properties.get(key) {
                Some(Property::Value(v)) => return Ok(Found::Value(v.clone())),
                Some(Property::Accessor { getter, .. }) => return Ok(Found::Getter(getter.clone())),
                Some(Property::Lazy(_)) => return Ok(Found::Lazy(at)),
                Some(Property::Evaluating) => {
                    return Err(BindingError::Host(format!("'{}' read while being initialized", key)))
                }
                None => current = obj.prototype,
            }
        }
        Ok(Found::Missing)
    }

    fn run_lazy(&self, holder: ObjectRef, key: &str) -> BindingResult<ScriptValue> {
        let init = self.with_object_mut(holder, |obj| match obj.properties.get_mut(key) {
            Some(slot @ Property::Lazy(_)) => match std::mem::replace(slot, Property::Evaluating) {
                Property::Lazy(init) => Some(init),
                _ => None,
            },
            _ => None,
        })?;
        let init = match init {
            Some(init) => init,
            None => return self.get(holder, key),
        };
        match init(self) {
            Ok(value) => {
                log::trace!("lazy property '{}' evaluated", key);
                self.with_object_mut(holder, |obj| obj.define(key, Property::Value(value.clone())))?;
                Ok(value)
            }
            Err(err) => {
                log::debug!("lazy property '{}' failed: {}", key, err);
                self.with_object_mut(holder, |obj| {
                    obj.properties.remove(key);
                    obj.keys.retain(|k| k != key);
                })?;
                Err(err)
            }
        }
    }

    /// Call a function object
    pub fn call(&self, function: ObjectRef, this: ScriptValue, args: &[ScriptValue]) -> BindingResult<ScriptValue> {
        let callable = self.with_object(function, |obj| obj.callable.clone())?;
        match callable {
            Some(callback) => callback(self, this, args),
            None => Err(BindingError::type_mismatch("function", "object")),
        }
    }

    /// Call a constructor
    pub fn construct(&self, constructor: ObjectRef, args: &[ScriptValue]) -> BindingResult<ScriptValue> {
        self.call(constructor, ScriptValue::Undefined, args)
    }

    /// Look up `name` on `object` and call it with `object` as receiver
    pub fn call_method(&self, object: ObjectRef, name: &str, args: &[ScriptValue]) -> BindingResult<ScriptValue> {
        match self.get(object, name)? {
            ScriptValue::Object(function) => self.call(function, ScriptValue::Object(object), args),
            other => Err(BindingError::type_mismatch(format!("function '{}'", name), other.type_name())),
        }
    }

    /// Assign a property: runs an inherited setter, otherwise defines an
    /// own data property.
    pub fn set(&self, object: ObjectRef, key: &str, value: ScriptValue) -> BindingResult<()> {
        let setter = {
            let objects = self.objects.borrow();
            let mut current = Some(object);
            let mut found = None;
            for _ in 0..MAX_PROTOTYPE_DEPTH {
                let at = match current {
                    Some(at) => at,
                    None => break,
                };
                let obj = match objects.get(at.as_raw() as usize) {
                    Some(obj) => obj,
                    None => break,
                };
                match obj.properties.get(key) {
                    Some(Property::Accessor { setter, .. }) => {
                        found = Some(setter.clone());
                        break;
                    }
                    Some(_) => break,
                    None => current = obj.prototype,
                }
            }
            found
        };
        match setter {
            Some(Some(setter)) => setter(self, ScriptValue::Object(object), &[value]).map(|_| ()),
            Some(None) => Err(BindingError::Host(format!("'{}' is read-only", key))),
            None => self.define_value(object, key, value),
        }
    }

    /// Collect a wrapper, running its finalizer
    pub fn collect(&self, object: ObjectRef) -> BindingResult<()> {
        let (pointer, finalizer) = self.with_object_mut(object, |obj| {
            obj.collected = true;
            (obj.native, obj.finalizer.take())
        })?;
        if let (Some(pointer), Some(finalizer)) = (pointer, finalizer) {
            finalizer(pointer);
        }
        Ok(())
    }
}

impl Default for HostContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for HostContext {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        for obj in self.objects.get_mut().iter_mut() {
            if let (Some(pointer), Some(finalizer)) = (obj.native, obj.finalizer.take()) {
                pending.push((pointer, finalizer));
            }
        }
        if !pending.is_empty() {
            log::debug!("running {} finalizers on context teardown", pending.len());
        }
        for (pointer, finalizer) in pending {
            finalizer(pointer);
        }
    }
}

impl ScriptContext for HostContext {
    fn create_object(&self, prototype: Option<ObjectRef>) -> ObjectRef {
        self.alloc(HostObject {
            prototype,
            ..HostObject::default()
        })
    }

    fn create_function(&self, name: &str, length: usize, callback: Callback) -> ObjectRef {
        let prototype = self.create_object(None);
        let mut function = HostObject {
            callable: Some(callback),
            ..HostObject::default()
        };
        function.define("name", Property::Value(ScriptValue::string(name)));
        function.define("length", Property::Value(ScriptValue::Int(length as i64)));
        function.define("prototype", Property::Value(ScriptValue::Object(prototype)));
        self.alloc(function)
    }

    fn wrap_native(&self, pointer: NativePtr, prototype: Option<ObjectRef>, finalizer: Option<Finalizer>) -> ObjectRef {
        self.alloc(HostObject {
            prototype,
            native: Some(pointer),
            finalizer,
            ..HostObject::default()
        })
    }

    fn prototype_of(&self, object: ObjectRef) -> Option<ObjectRef> {
        self.with_object(object, |obj| obj.prototype).ok().flatten()
    }

    fn set_prototype(&self, object: ObjectRef, prototype: Option<ObjectRef>) -> BindingResult<()> {
        let mut current = prototype;
        while let Some(at) = current {
            if at == object {
                return Err(BindingError::Host("cyclic prototype chain".to_string()));
            }
            current = self.prototype_of(at);
        }
        self.with_object_mut(object, |obj| obj.prototype = prototype)
    }

    fn get(&self, object: ObjectRef, key: &str) -> BindingResult<ScriptValue> {
        match self.lookup(object, key)? {
            Found::Missing => Ok(ScriptValue::Undefined),
            Found::Value(value) => Ok(value),
            Found::Getter(Some(getter)) => getter(self, ScriptValue::Object(object), &[]),
            Found::Getter(None) => Ok(ScriptValue::Undefined),
            Found::Lazy(holder) => self.run_lazy(holder, key),
        }
    }

    fn has_own(&self, object: ObjectRef, key: &str) -> bool {
        self.with_object(object, |obj| obj.properties.contains_key(key))
            .unwrap_or(false)
    }

    fn own_keys(&self, object: ObjectRef) -> Vec<String> {
        self.with_object(object, |obj| obj.keys.clone()).unwrap_or_default()
    }

    fn native_pointer(&self, object: ObjectRef) -> Option<NativePtr> {
        self.with_object(object, |obj| obj.native).ok().flatten()
    }

    fn define_value(&self, object: ObjectRef, key: &str, value: ScriptValue) -> BindingResult<()> {
        self.with_object_mut(object, |obj| obj.define(key, Property::Value(value)))
    }

    fn define_accessor(
        &self,
        object: ObjectRef,
        key: &str,
        getter: Option<Callback>,
        setter: Option<Callback>,
    ) -> BindingResult<()> {
        self.with_object_mut(object, |obj| obj.define(key, Property::Accessor { getter, setter }))
    }

    fn define_lazy(&self, object: ObjectRef, key: &str, init: LazyInit) -> BindingResult<()> {
        self.with_object_mut(object, |obj| obj.define(key, Property::Lazy(init)))
    }
}
