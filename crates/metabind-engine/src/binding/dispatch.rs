//! Dispatch trampolines
//!
//! Each callback resolves its native symbol, marshals the arguments,
//! invokes through the foreign runtime, and converts the result. Argument
//! errors are raised before any native call is made.

use metabind_sdk::{
    callback, BindingError, BindingResult, CallTarget, Callback, ForeignCall, NativeFailure, NativePtr, NativeSymbol,
    ObjectRef, ScriptContext, ScriptValue, SymbolRequest,
};

use super::BindingContext;
use crate::marshal::{self, ArgumentBuffer, MarshalEnv};
use crate::metadata::{BaseClassMeta, EncodingList, FunctionMeta, HeapView, MethodMeta, Signature};

/// Signature of `alloc`: one `instancetype` return, no parameters.
pub const ALLOC_SIGNATURE: [u8; 5] = [1, 0, 0, 0, 17];

/// Longest superclass chain walked when resolving a dynamic class
const MAX_CLASS_DEPTH: usize = 64;

/// Method or accessor callback
pub(crate) fn method_callback(bindings: BindingContext, declaring: u32, method: u32, is_static: bool) -> Callback {
    callback(move |cx, this, args| bindings.call_method(cx, &this, declaring, method, is_static, args))
}

/// Free-function callback
pub(crate) fn function_callback(bindings: BindingContext, function: u32) -> Callback {
    callback(move |cx, _this, args| bindings.call_function(cx, function, args))
}

/// Class constructor callback
pub(crate) fn constructor_callback(bindings: BindingContext, class: u32) -> Callback {
    callback(move |cx, _this, args| bindings.construct(cx, class, args).map(ScriptValue::Object))
}

/// Static `alloc`; allocates an instance of the constructor it is called on
pub(crate) fn alloc_callback(bindings: BindingContext, class: u32) -> Callback {
    callback(move |cx, this, _args| {
        let class = this
            .as_object()
            .and_then(|ctor| bindings.record_of_constructor(ctor))
            .unwrap_or(class);
        bindings.alloc(cx, class).map(ScriptValue::Object)
    })
}

/// `toString` shared by every class prototype
pub(crate) fn to_string_callback(bindings: BindingContext) -> Callback {
    callback(move |cx, this, _args| bindings.describe(cx, &this).map(ScriptValue::string))
}

fn returned_pointer(bytes: &[u8], member: &str) -> BindingResult<NativePtr> {
    marshal::native_pointer(bytes).ok_or_else(|| {
        BindingError::MetadataFormat(format!("{} returned {} bytes where a pointer was expected", member, bytes.len()))
    })
}

impl BindingContext {
    /// Check the arity and marshal every argument.
    fn marshal_arguments(
        &self,
        env: &MarshalEnv<'_>,
        encodings: &EncodingList<'_>,
        args: &[ScriptValue],
        member: &str,
    ) -> BindingResult<ArgumentBuffer> {
        let parameters = encodings.len().saturating_sub(1);
        if args.len() != parameters {
            return Err(BindingError::type_mismatch(
                format!("{} argument(s) for '{}'", parameters, member),
                format!("{} argument(s)", args.len()),
            ));
        }
        let mut buffer = ArgumentBuffer::new();
        for (encoding, value) in encodings.iter().skip(1).zip(args) {
            buffer.push(env, &encoding?, value)?;
        }
        Ok(buffer)
    }

    /// Invoke a marshaled call and return the raw result.
    fn invoke_raw(
        &self,
        symbol: NativeSymbol,
        target: CallTarget<'_>,
        signature: &[u8],
        arguments: &[u8],
    ) -> BindingResult<Vec<u8>> {
        let call = ForeignCall {
            symbol,
            target,
            signature,
            arguments,
        };
        self.runtime().invoke(&call).map_err(|failure| {
            log::debug!("native call failed: {}", failure);
            BindingError::NativeInvocation(failure)
        })
    }

    /// Invoke a marshaled call and decode the result.
    fn invoke_decoded(
        &self,
        env: &MarshalEnv<'_>,
        symbol: NativeSymbol,
        target: CallTarget<'_>,
        encodings: &EncodingList<'_>,
        arguments: &ArgumentBuffer,
    ) -> BindingResult<ScriptValue> {
        let bytes = self.invoke_raw(symbol, target, encodings.bytes()?, arguments.as_bytes())?;
        match encodings.get(0)? {
            Some(ret) => env.decode(&ret, &bytes),
            None => Ok(ScriptValue::Undefined),
        }
    }

    fn call_method(
        &self,
        cx: &dyn ScriptContext,
        this: &ScriptValue,
        declaring: u32,
        method: u32,
        is_static: bool,
        args: &[ScriptValue],
    ) -> BindingResult<ScriptValue> {
        let heap = self.heap();
        let method = MethodMeta::view(heap, method)?;
        let declaring = BaseClassMeta::view(heap, declaring)?;
        let selector = method.selector()?;
        let declared_in = declaring.name()?.unwrap_or_default();

        let class_record;
        let class_name;
        let request;
        let target;
        if is_static {
            // Static members dispatch on the constructor they were called on
            class_record = this
                .as_object()
                .and_then(|ctor| self.record_of_constructor(ctor))
                .unwrap_or(declaring.offset());
            class_name = heap.record(class_record)?.name()?.unwrap_or(declared_in);
            request = SymbolRequest::ClassMethod {
                class: class_name,
                selector,
            };
            target = CallTarget::Class(class_name);
        } else {
            let receiver = this
                .as_object()
                .and_then(|obj| cx.native_pointer(obj))
                .ok_or_else(|| {
                    BindingError::type_mismatch(format!("{} instance", declaring.display_name()), this.type_name())
                })?;
            class_record = declaring.offset();
            class_name = declared_in;
            request = SymbolRequest::InstanceMethod {
                receiver,
                declared_in,
                selector,
            };
            target = CallTarget::Instance(receiver);
        }

        let symbol = self
            .runtime()
            .resolve(&request)
            .ok_or_else(|| BindingError::member_not_found(selector, class_name))?;
        let env = MarshalEnv::new(cx, self)
            .with_declared_class(Some(class_record))
            .with_owns_returned(method.owns_returned());
        let encodings = method.encodings()?;
        let arguments = self.marshal_arguments(&env, &encodings, args, selector)?;
        log::trace!("calling {}.{}", class_name, selector);
        self.invoke_decoded(&env, symbol, target, &encodings, &arguments)
    }

    fn call_function(&self, cx: &dyn ScriptContext, function: u32, args: &[ScriptValue]) -> BindingResult<ScriptValue> {
        let function = FunctionMeta::view(self.heap(), function)?;
        let name = function.name()?.unwrap_or_default();
        let symbol = self
            .runtime()
            .resolve(&SymbolRequest::Function { name })
            .ok_or_else(|| BindingError::member_not_found(name, "global"))?;
        let env = MarshalEnv::new(cx, self).with_owns_returned(function.owns_returned());
        let encodings = function.encodings()?;
        let arguments = self.marshal_arguments(&env, &encodings, args, name)?;
        log::trace!("calling {}()", name);
        self.invoke_decoded(&env, symbol, CallTarget::Free, &encodings, &arguments)
    }

    /// Initializer of `class` or its nearest ancestor taking `argc`
    /// arguments. With no arguments, `init` wins over other candidates.
    fn select_initializer<'h>(
        &self,
        class: BaseClassMeta<'h>,
        argc: usize,
    ) -> BindingResult<Option<(BaseClassMeta<'h>, MethodMeta<'h>)>> {
        let mut current = Some(class);
        let mut depth = 0;
        while let Some(level) = current {
            let mut candidates = Vec::new();
            for method in level.instance_methods()? {
                if method.is_initializer() && self.includes_member(&method) && method.parameter_count()? == argc {
                    candidates.push(method);
                }
            }
            let preferred = if argc == 0 {
                candidates
                    .iter()
                    .find(|m| matches!(m.selector(), Ok("init")))
                    .or_else(|| candidates.first())
            } else {
                candidates.first()
            };
            if let Some(method) = preferred {
                return Ok(Some((level, *method)));
            }
            depth += 1;
            if depth > MAX_CLASS_DEPTH {
                break;
            }
            current = level.base()?;
        }
        Ok(None)
    }

    /// Allocate and initialize a native instance of `class`.
    pub(crate) fn construct(&self, cx: &dyn ScriptContext, class: u32, args: &[ScriptValue]) -> BindingResult<ObjectRef> {
        let heap = self.heap();
        let class = BaseClassMeta::view(heap, class)?;
        let js_name = class.display_name();
        if class.is_protocol() {
            return Err(BindingError::type_mismatch("class", format!("protocol {}", js_name)));
        }
        let handle = self.get_or_create_constructor(cx, class.record())?;

        let (declaring, init) = self.select_initializer(class, args.len())?.ok_or_else(|| {
            BindingError::member_not_found(format!("initializer taking {} argument(s)", args.len()), js_name.as_str())
        })?;
        let selector = init.selector()?;
        let env = MarshalEnv::new(cx, self).with_declared_class(Some(class.offset()));
        let encodings = init.encodings()?;
        let arguments = self.marshal_arguments(&env, &encodings, args, selector)?;

        let raw = self.allocate(class)?;

        let instance = self.initialize(raw, declaring, selector, &encodings, &arguments);
        let instance = match instance {
            Ok(instance) => instance,
            Err(err) => {
                self.runtime().release(raw);
                return Err(err);
            }
        };
        log::trace!("constructed {} at {:?}", js_name, instance);
        Ok(cx.wrap_native(instance, Some(handle.prototype), Some(self.release_finalizer())))
    }

    /// Uninitialized native instance of `class`, owned by the script.
    pub(crate) fn alloc(&self, cx: &dyn ScriptContext, class: u32) -> BindingResult<ObjectRef> {
        let class = BaseClassMeta::view(self.heap(), class)?;
        if class.is_protocol() {
            return Err(BindingError::type_mismatch("class", format!("protocol {}", class.display_name())));
        }
        let handle = self.get_or_create_constructor(cx, class.record())?;
        let raw = self.allocate(class)?;
        log::trace!("allocated {} at {:?}", class.display_name(), raw);
        Ok(cx.wrap_native(raw, Some(handle.prototype), Some(self.release_finalizer())))
    }

    fn allocate(&self, class: BaseClassMeta<'_>) -> BindingResult<NativePtr> {
        let class_name = class.name()?.unwrap_or_default();
        let alloc = self
            .runtime()
            .resolve(&SymbolRequest::ClassMethod {
                class: class_name,
                selector: "alloc",
            })
            .ok_or_else(|| BindingError::member_not_found("alloc", class.display_name()))?;
        let raw = returned_pointer(
            &self.invoke_raw(alloc, CallTarget::Class(class_name), &ALLOC_SIGNATURE, &[])?,
            "alloc",
        )?;
        if raw.is_null() {
            return Err(NativeFailure::new(class_name, "alloc returned nil").into());
        }
        Ok(raw)
    }

    /// `<Class: 0xaddr>` for native objects, `[object Class]` otherwise
    pub(crate) fn describe(&self, cx: &dyn ScriptContext, this: &ScriptValue) -> BindingResult<String> {
        let object = match this.as_object() {
            Some(object) => object,
            None => return Ok(format!("[object {}]", this.type_name())),
        };
        let declared = match cx.get(object, "constructor")? {
            ScriptValue::Object(ctor) => match self.record_of_constructor(ctor) {
                Some(offset) => Some(self.heap().record(offset)?.display_name()),
                None => None,
            },
            _ => None,
        };
        Ok(match cx.native_pointer(object) {
            Some(pointer) => {
                let name = self
                    .runtime()
                    .class_name_of(pointer)
                    .or(declared)
                    .unwrap_or_else(|| "native".to_string());
                format!("<{}: {:#x}>", name, pointer.addr())
            }
            None => format!("[object {}]", declared.as_deref().unwrap_or("Object")),
        })
    }

    fn initialize(
        &self,
        raw: NativePtr,
        declaring: BaseClassMeta<'_>,
        selector: &str,
        encodings: &EncodingList<'_>,
        arguments: &ArgumentBuffer,
    ) -> BindingResult<NativePtr> {
        let declared_in = declaring.name()?.unwrap_or_default();
        let symbol = self
            .runtime()
            .resolve(&SymbolRequest::InstanceMethod {
                receiver: raw,
                declared_in,
                selector,
            })
            .ok_or_else(|| BindingError::member_not_found(selector, declared_in))?;
        let bytes = self.invoke_raw(symbol, CallTarget::Instance(raw), encodings.bytes()?, arguments.as_bytes())?;
        let instance = returned_pointer(&bytes, selector)?;
        if instance.is_null() {
            return Err(NativeFailure::new(declared_in, format!("{} returned nil", selector)).into());
        }
        Ok(instance)
    }

    /// Constructor for the dynamic class of a native object: the class
    /// itself if it is in the catalog, else its nearest catalogued ancestor.
    fn dynamic_class(&self, cx: &dyn ScriptContext, pointer: NativePtr) -> BindingResult<Option<super::ConstructorHandle>> {
        let runtime = self.runtime();
        let mut name = match runtime.class_name_of(pointer) {
            Some(name) => name,
            None => return Ok(None),
        };
        for _ in 0..MAX_CLASS_DEPTH {
            if let Some(record) = self.heap().interface_table().find(&name, false)? {
                return self.get_or_create_constructor(cx, record).map(Some);
            }
            name = match runtime.superclass_of(&name) {
                Some(parent) => parent,
                None => break,
            };
        }
        Ok(None)
    }

    /// Wrap a native object with the prototype of its dynamic class,
    /// falling back to the declared class.
    pub(crate) fn wrap_object(
        &self,
        cx: &dyn ScriptContext,
        pointer: NativePtr,
        declared: Option<u32>,
        owned: bool,
    ) -> BindingResult<ObjectRef> {
        let prototype = match self.dynamic_class(cx, pointer)? {
            Some(handle) => Some(handle.prototype),
            None => match declared {
                Some(offset) => Some(self.get_or_create_constructor(cx, self.heap().record(offset)?)?.prototype),
                None => None,
            },
        };
        let finalizer = if owned { Some(self.release_finalizer()) } else { None };
        Ok(cx.wrap_native(pointer, prototype, finalizer))
    }

    /// Script value for a native class object: its constructor when the
    /// class is catalogued, else an opaque wrapper.
    pub(crate) fn class_object(&self, cx: &dyn ScriptContext, pointer: NativePtr) -> BindingResult<ScriptValue> {
        match self.dynamic_class(cx, pointer)? {
            Some(handle) => Ok(ScriptValue::Object(handle.constructor)),
            None => Ok(ScriptValue::Object(cx.wrap_native(pointer, None, None))),
        }
    }
}
