//! Struct constructors
//!
//! A struct binding lays a struct out in foreign memory and exposes one
//! accessor per field on its prototype. Field bytes are converted with the
//! same marshallers used for call arguments, at offsets computed from the
//! field encodings.

use std::rc::Rc;

use metabind_sdk::{callback, BindingError, BindingResult, NativePtr, ObjectRef, ScriptContext, ScriptValue};

use super::cache::ConstructorHandle;
use super::BindingContext;
use crate::marshal::{struct_layout, MarshalEnv, StructLayout};
use crate::metadata::{HeapView, StructMeta, TypeEncoding};

/// Realized binding of one struct record.
#[derive(Debug)]
pub struct StructBinding {
    record: u32,
    name: String,
    handle: ConstructorHandle,
    layout: StructLayout,
    /// Heap offset of each field's encoding
    encodings: Vec<u32>,
}

impl StructBinding {
    /// Constructor and prototype
    pub fn handle(&self) -> ConstructorHandle {
        self.handle
    }

    /// Record offset
    pub fn record(&self) -> u32 {
        self.record
    }

    /// Struct name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Computed layout
    pub fn layout(&self) -> &StructLayout {
        &self.layout
    }

    fn field_encoding<'h>(&self, bindings: &'h BindingContext, index: usize) -> BindingResult<TypeEncoding<'h>> {
        Ok(TypeEncoding::view(bindings.heap(), self.encodings[index])?)
    }

    /// Whether `object` wraps an instance of this struct
    fn is_instance(&self, cx: &dyn ScriptContext, object: ObjectRef) -> Option<NativePtr> {
        if cx.prototype_of(object) != Some(self.handle.prototype) {
            return None;
        }
        cx.native_pointer(object)
    }

    fn instance_pointer(&self, cx: &dyn ScriptContext, value: &ScriptValue) -> BindingResult<NativePtr> {
        value
            .as_object()
            .and_then(|obj| self.is_instance(cx, obj))
            .ok_or_else(|| BindingError::type_mismatch(self.name.as_str(), value.type_name()))
    }

    fn read(&self, bindings: &BindingContext, pointer: NativePtr) -> BindingResult<Vec<u8>> {
        let mut bytes = vec![0u8; self.layout.size];
        bindings.runtime().read(pointer, &mut bytes)?;
        Ok(bytes)
    }

    fn encode_field(&self, env: &MarshalEnv<'_>, index: usize, value: &ScriptValue, out: &mut [u8]) -> BindingResult<()> {
        let field = &self.layout.fields[index];
        let encoding = self.field_encoding(env.bindings, index)?;
        let bytes = env.encode(&encoding, value)?;
        out[field.offset..field.offset + bytes.len()].copy_from_slice(&bytes);
        Ok(())
    }

    /// Native bytes of a struct value: a wrapper of this struct (copied) or
    /// a keyed initializer object.
    pub(crate) fn bytes_of(&self, env: &MarshalEnv<'_>, value: &ScriptValue) -> BindingResult<Vec<u8>> {
        let object = match value {
            ScriptValue::Object(obj) => *obj,
            other => return Err(BindingError::type_mismatch(self.name.as_str(), other.type_name())),
        };
        if let Some(pointer) = self.is_instance(env.cx, object) {
            return self.read(env.bindings, pointer);
        }
        if env.cx.native_pointer(object).is_some() {
            return Err(BindingError::type_mismatch(self.name.as_str(), "other native object"));
        }
        let mut out = vec![0u8; self.layout.size];
        for (index, field) in self.layout.fields.iter().enumerate() {
            let value = env.cx.get(object, &field.name)?;
            if matches!(value, ScriptValue::Undefined) {
                continue;
            }
            self.encode_field(env, index, &value, &mut out)?;
        }
        Ok(out)
    }

    /// Native bytes from constructor arguments: none (zeroed), one wrapper
    /// or keyed initializer, or positional field values.
    fn bytes_from_args(&self, env: &MarshalEnv<'_>, args: &[ScriptValue]) -> BindingResult<Vec<u8>> {
        if let [ScriptValue::Object(obj)] = args {
            if env.cx.native_pointer(*obj).is_none() || self.is_instance(env.cx, *obj).is_some() {
                return self.bytes_of(env, &args[0]);
            }
        }
        if args.len() > self.layout.fields.len() {
            return Err(BindingError::type_mismatch(
                format!("at most {} field values for {}", self.layout.fields.len(), self.name),
                format!("{} arguments", args.len()),
            ));
        }
        let mut out = vec![0u8; self.layout.size];
        for (index, value) in args.iter().enumerate() {
            if matches!(value, ScriptValue::Undefined) {
                continue;
            }
            self.encode_field(env, index, value, &mut out)?;
        }
        Ok(out)
    }

    /// Copy `bytes` into fresh foreign memory and wrap it.
    pub(crate) fn instantiate(&self, env: &MarshalEnv<'_>, bytes: &[u8]) -> BindingResult<ObjectRef> {
        let runtime = env.bindings.runtime();
        let pointer = runtime.allocate(self.layout.size.max(1), self.layout.align);
        if let Err(failure) = runtime.write(pointer, &bytes[..self.layout.size.min(bytes.len())]) {
            runtime.release(pointer);
            return Err(failure.into());
        }
        Ok(env
            .cx
            .wrap_native(pointer, Some(self.handle.prototype), Some(env.bindings.release_finalizer())))
    }

    fn get_field(&self, env: &MarshalEnv<'_>, this: &ScriptValue, index: usize) -> BindingResult<ScriptValue> {
        let pointer = self.instance_pointer(env.cx, this)?;
        let field = &self.layout.fields[index];
        let mut bytes = vec![0u8; field.layout.size];
        env.bindings.runtime().read(pointer.offset(field.offset), &mut bytes)?;
        let encoding = self.field_encoding(env.bindings, index)?;
        env.decode(&encoding, &bytes)
    }

    fn set_field(&self, env: &MarshalEnv<'_>, this: &ScriptValue, index: usize, value: &ScriptValue) -> BindingResult<()> {
        let pointer = self.instance_pointer(env.cx, this)?;
        let field = &self.layout.fields[index];
        let encoding = self.field_encoding(env.bindings, index)?;
        let bytes = env.encode(&encoding, value)?;
        env.bindings.runtime().write(pointer.offset(field.offset), &bytes)?;
        Ok(())
    }

    fn equals(&self, cx: &dyn ScriptContext, bindings: &BindingContext, a: &ScriptValue, b: &ScriptValue) -> BindingResult<bool> {
        let a = self.read(bindings, self.instance_pointer(cx, a)?)?;
        let b = self.read(bindings, self.instance_pointer(cx, b)?)?;
        Ok(a == b)
    }
}

impl BindingContext {
    /// Struct constructor for a struct record, built on first request.
    pub fn get_or_create_struct_constructor(
        &self,
        cx: &dyn ScriptContext,
        record: StructMeta<'_>,
    ) -> BindingResult<ConstructorHandle> {
        self.get_or_create_struct_binding(cx, record).map(|b| b.handle())
    }

    /// Struct binding for a struct record, built on first request.
    pub fn get_or_create_struct_binding(
        &self,
        cx: &dyn ScriptContext,
        record: StructMeta<'_>,
    ) -> BindingResult<Rc<StructBinding>> {
        let offset = record.offset();
        if let Some(binding) = self.cache().borrow().structure(offset) {
            return Ok(binding);
        }

        let name = record.js_name()?.unwrap_or_default().to_string();
        let layout = struct_layout(self.heap(), &record)?;
        let encodings = record
            .field_encodings()?
            .iter()
            .map(|e| e.map(|e| e.offset()))
            .collect::<Result<Vec<_>, _>>()?;

        let bindings = self.clone();
        let constructor = cx.create_function(
            &name,
            layout.fields.len(),
            callback(move |cx, _this, args| {
                let binding = bindings.struct_binding_at(cx, offset)?;
                let env = MarshalEnv::new(cx, &bindings);
                let bytes = binding.bytes_from_args(&env, args)?;
                binding.instantiate(&env, &bytes).map(ScriptValue::Object)
            }),
        );
        let prototype = match cx.get(constructor, "prototype")? {
            ScriptValue::Object(prototype) => prototype,
            _ => {
                let prototype = cx.create_object(None);
                cx.define_value(constructor, "prototype", ScriptValue::Object(prototype))?;
                prototype
            }
        };
        cx.define_value(prototype, "constructor", ScriptValue::Object(constructor))?;

        for (index, field) in layout.fields.iter().enumerate() {
            let getter_ctx = self.clone();
            let setter_ctx = self.clone();
            cx.define_accessor(
                prototype,
                &field.name,
                Some(callback(move |cx, this, _args| {
                    let binding = getter_ctx.struct_binding_at(cx, offset)?;
                    binding.get_field(&MarshalEnv::new(cx, &getter_ctx), &this, index)
                })),
                Some(callback(move |cx, this, args| {
                    let binding = setter_ctx.struct_binding_at(cx, offset)?;
                    let value = args.first().cloned().unwrap_or_default();
                    binding.set_field(&MarshalEnv::new(cx, &setter_ctx), &this, index, &value)?;
                    Ok(ScriptValue::Undefined)
                })),
            )?;
        }

        let equals_ctx = self.clone();
        let equals = cx.create_function(
            "equals",
            2,
            callback(move |cx, _this, args| {
                let binding = equals_ctx.struct_binding_at(cx, offset)?;
                let undefined = ScriptValue::Undefined;
                let a = args.first().unwrap_or(&undefined);
                let b = args.get(1).unwrap_or(&undefined);
                binding.equals(cx, &equals_ctx, a, b).map(ScriptValue::Bool)
            }),
        );
        cx.define_value(constructor, "equals", ScriptValue::Object(equals))?;

        let binding = Rc::new(StructBinding {
            record: offset,
            name,
            handle: ConstructorHandle {
                constructor,
                prototype,
            },
            layout,
            encodings,
        });
        log::debug!(
            "realized struct '{}' ({} bytes, {} fields)",
            binding.name,
            binding.layout.size,
            binding.layout.fields.len()
        );
        self.cache().borrow_mut().insert_structure(offset, Rc::clone(&binding));
        Ok(binding)
    }

    fn struct_binding_at(&self, cx: &dyn ScriptContext, offset: u32) -> BindingResult<Rc<StructBinding>> {
        let record = StructMeta::view(self.heap(), offset)?;
        self.get_or_create_struct_binding(cx, record)
    }
}
