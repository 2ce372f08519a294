//! Class and protocol constructors
//!
//! Members are attached in a fixed order: own methods, own properties,
//! then adopted protocols (recursively). The first definition of a name
//! wins; later ones are skipped. Inherited members are reached through the
//! prototype chain, which is linked to the superclass binding.
//!
//! Root interfaces also get a shared `toString` on the prototype and a
//! static `alloc` on the constructor, unless the catalog declares them.

use metabind_sdk::{BindingResult, ObjectRef, ScriptContext, ScriptValue};
use rustc_hash::FxHashSet;

use super::cache::{CacheState, CachedClass, ConstructorHandle};
use super::dispatch;
use super::BindingContext;
use crate::metadata::{BaseClassMeta, FormatError, MethodMeta, PropertyMeta, Record, Signature};

/// Where members are attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    /// On the prototype
    Instance,
    /// On the constructor
    Static,
}

/// Names already defined on one object, in definition order.
#[derive(Default)]
struct MemberSet {
    names: FxHashSet<String>,
    order: Vec<String>,
}

impl MemberSet {
    fn claim(&mut self, name: &str) -> bool {
        if self.names.contains(name) {
            return false;
        }
        self.names.insert(name.to_string());
        self.order.push(name.to_string());
        true
    }
}

impl BindingContext {
    /// Constructor for a class or protocol record, built on first request.
    ///
    /// Repeated calls on the same context return the same handle. A request
    /// for a record that is still being built returns its in-progress
    /// handle.
    pub fn get_or_create_constructor(
        &self,
        cx: &dyn ScriptContext,
        record: Record<'_>,
    ) -> BindingResult<ConstructorHandle> {
        let class = BaseClassMeta::try_from(record)?;
        let offset = record.offset();
        if let Some(state) = self.cache().borrow().class(offset) {
            log::trace!("binding cache hit for '{}'", record.display_name());
            return Ok(state.handle());
        }

        let name = record.js_name()?.unwrap_or_default();
        let constructor = cx.create_function(name, 0, dispatch::constructor_callback(self.clone(), offset));
        let prototype = match cx.get(constructor, "prototype")? {
            ScriptValue::Object(prototype) => prototype,
            _ => {
                let prototype = cx.create_object(None);
                cx.define_value(constructor, "prototype", ScriptValue::Object(prototype))?;
                prototype
            }
        };
        cx.define_value(prototype, "constructor", ScriptValue::Object(constructor))?;
        let handle = ConstructorHandle {
            constructor,
            prototype,
        };

        self.cache().borrow_mut().begin(offset, handle);
        match self.build_class(cx, class, handle) {
            Ok(cached) => {
                log::debug!(
                    "realized '{}': {} instance, {} static members",
                    name,
                    cached.instance_members.len(),
                    cached.static_members.len()
                );
                self.cache().borrow_mut().finish(offset, cached);
                Ok(handle)
            }
            Err(err) => {
                log::warn!("failed to realize '{}': {}", name, err);
                self.cache().borrow_mut().abandon(offset);
                Err(err)
            }
        }
    }

    fn build_class(
        &self,
        cx: &dyn ScriptContext,
        class: BaseClassMeta<'_>,
        handle: ConstructorHandle,
    ) -> BindingResult<CachedClass> {
        let superclass = match class.base()? {
            Some(base) => {
                let base_offset = base.offset();
                if let Some(CacheState::Building(_)) = self.cache().borrow().class(base_offset) {
                    return Err(FormatError::CyclicInheritance(class.display_name()).into());
                }
                let parent = self.get_or_create_constructor(cx, base.record())?;
                cx.set_prototype(handle.prototype, Some(parent.prototype))?;
                cx.set_prototype(handle.constructor, Some(parent.constructor))?;
                Some(base_offset)
            }
            None => {
                if let Some(name) = class.base_name()? {
                    log::warn!(
                        "superclass '{}' of '{}' is not in the catalog",
                        name,
                        class.display_name()
                    );
                }
                None
            }
        };

        let mut instance = MemberSet::default();
        let mut visited = FxHashSet::default();
        self.attach_members(cx, handle.prototype, class, Side::Instance, &mut instance, &mut visited)?;

        let mut statics = MemberSet::default();
        visited.clear();
        self.attach_members(cx, handle.constructor, class, Side::Static, &mut statics, &mut visited)?;

        if !class.is_protocol() && superclass.is_none() {
            if !instance.names.contains("toString") {
                let to_string = self.to_string_function(cx);
                cx.define_value(handle.prototype, "toString", ScriptValue::Object(to_string))?;
            }
            if !statics.names.contains("alloc") {
                let alloc = cx.create_function("alloc", 0, dispatch::alloc_callback(self.clone(), class.offset()));
                cx.define_value(handle.constructor, "alloc", ScriptValue::Object(alloc))?;
            }
        }

        Ok(CachedClass {
            handle,
            superclass,
            instance_members: instance.order,
            static_members: statics.order,
        })
    }

    fn to_string_function(&self, cx: &dyn ScriptContext) -> ObjectRef {
        if let Some(function) = self.cache().borrow().to_string_function() {
            return function;
        }
        let function = cx.create_function("toString", 0, dispatch::to_string_callback(self.clone()));
        self.cache().borrow_mut().set_to_string_function(function);
        function
    }

    fn attach_members(
        &self,
        cx: &dyn ScriptContext,
        target: ObjectRef,
        class: BaseClassMeta<'_>,
        side: Side,
        members: &mut MemberSet,
        visited: &mut FxHashSet<u32>,
    ) -> BindingResult<()> {
        if !visited.insert(class.offset()) {
            return Ok(());
        }
        let declaring = class.offset();

        let methods = match side {
            Side::Instance => class.instance_methods()?,
            Side::Static => class.static_methods()?,
        };
        for method in methods {
            if !self.includes_member(&method) || (side == Side::Instance && method.is_initializer()) {
                continue;
            }
            let name = match method.js_name()? {
                Some(name) => name,
                None => continue,
            };
            if !members.claim(name) {
                log::trace!("'{}' already bound on '{}'", name, class.display_name());
                continue;
            }
            self.define_method(cx, target, declaring, method, side == Side::Static, name)?;
        }

        let properties = match side {
            Side::Instance => class.instance_properties()?,
            Side::Static => class.static_properties()?,
        };
        for property in properties {
            if !self.includes_member(&property) {
                continue;
            }
            let name = match property.js_name()? {
                Some(name) => name,
                None => continue,
            };
            if !members.claim(name) {
                log::trace!("'{}' already bound on '{}'", name, class.display_name());
                continue;
            }
            self.define_property(cx, target, declaring, property, side == Side::Static, name)?;
        }

        for protocol_name in class.protocols()? {
            let protocol = match self.heap().protocol_table().find(protocol_name, false)? {
                Some(record) => BaseClassMeta::try_from(record)?,
                None => {
                    log::debug!(
                        "protocol '{}' adopted by '{}' is not in the catalog",
                        protocol_name,
                        class.display_name()
                    );
                    continue;
                }
            };
            if !self.is_exposed(&protocol) {
                continue;
            }
            self.attach_members(cx, target, protocol, side, members, visited)?;
        }
        Ok(())
    }

    fn define_method(
        &self,
        cx: &dyn ScriptContext,
        target: ObjectRef,
        declaring: u32,
        method: MethodMeta<'_>,
        is_static: bool,
        name: &str,
    ) -> BindingResult<()> {
        let length = method.parameter_count()?;
        let callback = dispatch::method_callback(self.clone(), declaring, method.offset(), is_static);
        let function = cx.create_function(name, length, callback);
        cx.define_value(target, name, ScriptValue::Object(function))
    }

    fn define_property(
        &self,
        cx: &dyn ScriptContext,
        target: ObjectRef,
        declaring: u32,
        property: PropertyMeta<'_>,
        is_static: bool,
        name: &str,
    ) -> BindingResult<()> {
        let getter = property
            .getter()?
            .map(|m| dispatch::method_callback(self.clone(), declaring, m.offset(), is_static));
        let setter = property
            .setter()?
            .map(|m| dispatch::method_callback(self.clone(), declaring, m.offset(), is_static));
        cx.define_accessor(target, name, getter, setter)
    }

    /// Effective instance member names of a class: own members first, then
    /// inherited ones that are not shadowed. Each name appears once.
    pub fn resolved_members(&self, cx: &dyn ScriptContext, record: Record<'_>) -> BindingResult<Vec<String>> {
        self.get_or_create_constructor(cx, record)?;
        let cache = self.cache().borrow();
        let mut seen = FxHashSet::default();
        let mut visited = FxHashSet::default();
        let mut out = Vec::new();
        let mut current = Some(record.offset());
        while let Some(offset) = current {
            if !visited.insert(offset) {
                break;
            }
            let class = match cache.class(offset) {
                Some(CacheState::Cached(class)) => class,
                _ => break,
            };
            for name in &class.instance_members {
                if seen.insert(name.as_str()) {
                    out.push(name.clone());
                }
            }
            current = class.superclass;
        }
        Ok(out)
    }

    /// Record offset of a class, protocol or struct constructor object
    pub fn record_of_constructor(&self, constructor: ObjectRef) -> Option<u32> {
        self.cache().borrow().record_of(constructor)
    }
}
