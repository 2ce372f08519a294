//! Class binding integration tests
//!
//! Drives the binding builder and dispatch trampolines through the
//! in-memory host against a fake foreign runtime.

mod common;

use std::sync::Arc;

use common::{ret_i32, ret_ptr, ret_void, FakeRuntime};
use metabind_engine::metadata::{ClassDecl, FunctionDecl, Header, MethodDecl, Names, PropertyDecl, TypeDecl};
use metabind_engine::{BindingContext, BindingOptions, CatalogWriter, MetaHeap, PlatformVersion};
use metabind_runtime::HostContext;
use metabind_sdk::{BindingError, ForeignMemory, ForeignRuntime, NativeFailure, ObjectRef, ScriptContext, ScriptValue};

fn method(js: &str, selector: &str, encodings: Vec<TypeDecl>) -> MethodDecl {
    MethodDecl::new(Names::js(js).with_native(selector), encodings)
}

fn init() -> MethodDecl {
    MethodDecl::new(Names::js("init"), vec![TypeDecl::InstanceType]).initializer()
}

/// Base <- Counter, with a protocol chain Describable -> Named
fn catalog() -> Vec<u8> {
    let mut w = CatalogWriter::new();
    w.protocol(
        ClassDecl::new(Header::new(Names::js("Named")))
            .instance_method(MethodDecl::new(Names::js("name"), vec![TypeDecl::CString]))
            .adopts("Describable"),
    );
    w.protocol(
        ClassDecl::new(Header::new(Names::js("Describable")))
            .instance_method(MethodDecl::new(Names::js("describe"), vec![TypeDecl::Int]))
            .instance_method(MethodDecl::new(Names::js("summary"), vec![TypeDecl::Int]))
            .instance_method(MethodDecl::new(Names::js("maybe"), vec![TypeDecl::Int]).optional())
            .adopts("Named"),
    );
    w.interface(
        ClassDecl::new(Header::new(Names::js("Base")))
            .instance_method(init())
            .instance_method(MethodDecl::new(Names::js("describe"), vec![TypeDecl::Int]))
            .instance_method(MethodDecl::new(Names::js("baseOnly"), vec![TypeDecl::Int]))
            .static_method(MethodDecl::new(Names::js("create"), vec![TypeDecl::InstanceType])),
    );
    w.interface(
        ClassDecl::new(Header::new(Names::js("Counter")))
            .base("Base")
            .adopts("Describable")
            .instance_method(init())
            .instance_method(
                method("initWithValue", "initWithValue:", vec![TypeDecl::InstanceType, TypeDecl::Int]).initializer(),
            )
            .instance_method(MethodDecl::new(Names::js("describe"), vec![TypeDecl::Int]))
            .instance_method(method("add", "add:to:", vec![TypeDecl::Int, TypeDecl::Int, TypeDecl::Int]))
            .instance_method(MethodDecl::new(Names::js("explode"), vec![TypeDecl::Void]))
            .instance_method(
                MethodDecl::new(Names::js("future"), vec![TypeDecl::Void]).introduced(PlatformVersion::new(16, 0)),
            )
            .instance_method(MethodDecl::new(Names::js("redraw"), vec![TypeDecl::Void]).ui_only())
            .instance_property(PropertyDecl::readwrite(
                Names::js("count"),
                MethodDecl::new(Names::js("count"), vec![TypeDecl::Int]),
                method("setCount", "setCount:", vec![TypeDecl::Void, TypeDecl::Int]),
            )),
    );
    w.interface(ClassDecl::new(Header::new(Names::js("Loop"))).base("Knot"));
    w.interface(ClassDecl::new(Header::new(Names::js("Knot"))).base("Loop"));
    w.function(FunctionDecl::new(
        Header::new(Names::js("makeBase")),
        vec![TypeDecl::Interface("Base".to_string())],
    ));
    w.function(
        FunctionDecl::new(
            Header::new(Names::js("copyBase")),
            vec![TypeDecl::Interface("Base".to_string())],
        )
        .owns_returned(),
    );
    w.finish()
}

struct Fixture {
    runtime: Arc<FakeRuntime>,
    heap: Arc<MetaHeap>,
    bindings: BindingContext,
    cx: HostContext,
}

impl Fixture {
    fn new() -> Self {
        Self::with_options(BindingOptions {
            target_version: PlatformVersion::new(13, 0),
            ..BindingOptions::default()
        })
    }

    fn with_options(options: BindingOptions) -> Self {
        let runtime = FakeRuntime::new();
        runtime.class("Base", None);
        runtime.class("Counter", Some("Base"));
        runtime.instance_method("Base", "init", |_, inv| ret_ptr(inv.receiver.unwrap()));
        runtime.instance_method("Base", "describe", |_, _| ret_i32(1));
        runtime.instance_method("Base", "baseOnly", |_, _| ret_i32(7));
        runtime.instance_method("Counter", "describe", |_, _| ret_i32(2));
        runtime.instance_method("Counter", "initWithValue:", |rt, inv| {
            let receiver = inv.receiver.unwrap();
            let value = inv.reader().i32();
            rt.write(receiver, &value.to_le_bytes())?;
            ret_ptr(receiver)
        });
        runtime.instance_method("Counter", "count", |rt, inv| {
            let mut bytes = [0u8; 4];
            rt.read(inv.receiver.unwrap(), &mut bytes)?;
            ret_i32(i32::from_le_bytes(bytes))
        });
        runtime.instance_method("Counter", "setCount:", |rt, inv| {
            let value = inv.reader().i32();
            rt.write(inv.receiver.unwrap(), &value.to_le_bytes())?;
            ret_void()
        });
        runtime.instance_method("Counter", "add:to:", |_, inv| {
            let mut args = inv.reader();
            ret_i32(args.i32() + args.i32())
        });
        runtime.instance_method("Counter", "explode", |_, _| {
            Err(NativeFailure::new("NSInvalidArgumentException", "boom"))
        });
        runtime.instance_method("Counter", "summary", |_, _| ret_i32(3));
        runtime.class_method("Base", "create", |rt, inv| ret_ptr(rt.instance(inv.class.as_deref().unwrap())));

        let heap = Arc::new(MetaHeap::load(catalog()).unwrap());
        let foreign: Arc<dyn ForeignRuntime> = runtime.clone();
        let bindings = BindingContext::with_options(Arc::clone(&heap), foreign, options);
        Self {
            runtime,
            heap,
            bindings,
            cx: HostContext::new(),
        }
    }

    fn constructor(&self, name: &str) -> ObjectRef {
        let record = self.heap.js_table().find(name, false).unwrap().unwrap();
        self.bindings.get_or_create_constructor(&self.cx, record).unwrap().constructor
    }

    fn prototype(&self, name: &str) -> ObjectRef {
        let record = self.heap.js_table().find(name, false).unwrap().unwrap();
        self.bindings.get_or_create_constructor(&self.cx, record).unwrap().prototype
    }

    fn new_counter(&self, args: &[ScriptValue]) -> ObjectRef {
        let ctor = self.constructor("Counter");
        self.cx.construct(ctor, args).unwrap().as_object().unwrap()
    }
}

#[test]
fn test_constructor_is_cached_per_context() {
    let f = Fixture::new();
    let record = f.heap.js_table().find("Counter", true).unwrap().unwrap();
    let first = f.bindings.get_or_create_constructor(&f.cx, record).unwrap();
    let second = f.bindings.get_or_create_constructor(&f.cx, record).unwrap();
    assert_eq!(first, second);
    // Counter and its superclass
    assert_eq!(f.bindings.cached_count(), 2);
    assert_eq!(f.bindings.record_of_constructor(first.constructor), Some(record.offset()));
}

#[test]
fn test_contexts_do_not_share_bindings() {
    let f = Fixture::new();
    let other = BindingContext::new(Arc::clone(&f.heap), f.runtime.clone());
    let record = f.heap.js_table().find("Base", true).unwrap().unwrap();
    let a = f.bindings.get_or_create_constructor(&f.cx, record).unwrap();
    let b = other.get_or_create_constructor(&f.cx, record).unwrap();
    assert_ne!(a.constructor, b.constructor);
}

#[test]
fn test_prototype_links_to_superclass() {
    let f = Fixture::new();
    let counter = f.prototype("Counter");
    let base = f.prototype("Base");
    assert_eq!(f.cx.prototype_of(counter), Some(base));
    assert_eq!(
        f.cx.get(counter, "constructor").unwrap(),
        ScriptValue::Object(f.constructor("Counter"))
    );
}

#[test]
fn test_own_member_shadows_protocol_and_superclass() {
    let f = Fixture::new();
    let proto = f.prototype("Counter");
    let keys = f.cx.own_keys(proto);
    assert_eq!(keys.iter().filter(|k| k.as_str() == "describe").count(), 1);

    let obj = f.new_counter(&[]);
    assert_eq!(f.cx.call_method(obj, "describe", &[]).unwrap(), ScriptValue::Int(2));
    assert_eq!(f.cx.call_method(obj, "baseOnly", &[]).unwrap(), ScriptValue::Int(7));
}

#[test]
fn test_protocol_members_are_attached_once() {
    let f = Fixture::new();
    let proto = f.prototype("Counter");
    let keys = f.cx.own_keys(proto);
    // Own methods, own property, then Describable and the Named it adopts
    assert!(keys.contains(&"summary".to_string()));
    assert!(keys.contains(&"name".to_string()));
    assert!(keys.contains(&"maybe".to_string()));
    let describe_at = keys.iter().position(|k| k == "describe").unwrap();
    let count_at = keys.iter().position(|k| k == "count").unwrap();
    let summary_at = keys.iter().position(|k| k == "summary").unwrap();
    let name_at = keys.iter().position(|k| k == "name").unwrap();
    assert!(describe_at < count_at && count_at < summary_at && summary_at < name_at);
}

#[test]
fn test_resolved_members_lists_each_name_once() {
    let f = Fixture::new();
    let record = f.heap.js_table().find("Counter", true).unwrap().unwrap();
    let members = f.bindings.resolved_members(&f.cx, record).unwrap();
    let mut deduped = members.clone();
    deduped.sort();
    deduped.dedup();
    assert_eq!(deduped.len(), members.len());
    assert_eq!(members[0], "describe");
    assert!(members.contains(&"baseOnly".to_string()));
    assert!(!members.contains(&"init".to_string()));
}

#[test]
fn test_initializers_stay_off_the_prototype() {
    let f = Fixture::new();
    let keys = f.cx.own_keys(f.prototype("Counter"));
    assert!(!keys.contains(&"init".to_string()));
    assert!(!keys.contains(&"initWithValue".to_string()));
}

#[test]
fn test_unavailable_and_ui_only_members() {
    let f = Fixture::new();
    let keys = f.cx.own_keys(f.prototype("Counter"));
    assert!(!keys.contains(&"future".to_string()));
    assert!(keys.contains(&"redraw".to_string()));

    let worker = Fixture::with_options(BindingOptions {
        target_version: PlatformVersion::new(16, 0),
        worker: true,
        ..BindingOptions::default()
    });
    let keys = worker.cx.own_keys(worker.prototype("Counter"));
    assert!(keys.contains(&"future".to_string()));
    assert!(!keys.contains(&"redraw".to_string()));
}

#[test]
fn test_constructor_runs_alloc_and_init() {
    let f = Fixture::new();
    let obj = f.new_counter(&[ScriptValue::Int(41)]);
    assert_eq!(f.cx.prototype_of(obj), Some(f.prototype("Counter")));
    let pointer = f.cx.native_pointer(obj).unwrap();
    assert_eq!(f.runtime.class_of(pointer).as_deref(), Some("Counter"));
    assert_eq!(f.cx.get(obj, "count").unwrap(), ScriptValue::Int(41));
    assert_eq!(f.runtime.calls(), vec!["alloc", "Counter.initWithValue:", "Counter.count"]);
}

#[test]
fn test_zero_argument_constructor_prefers_init() {
    let f = Fixture::new();
    f.new_counter(&[]);
    assert_eq!(f.runtime.calls(), vec!["alloc", "Base.init"]);
}

#[test]
fn test_constructor_without_matching_initializer() {
    let f = Fixture::new();
    let ctor = f.constructor("Counter");
    let err = f.cx.construct(ctor, &[ScriptValue::Int(1), ScriptValue::Int(2)]).unwrap_err();
    assert!(matches!(err, BindingError::MemberNotFound { .. }));
    assert!(f.runtime.calls().is_empty());
}

#[test]
fn test_protocols_cannot_be_constructed() {
    let f = Fixture::new();
    let ctor = f.constructor("Describable");
    let err = f.cx.construct(ctor, &[]).unwrap_err();
    assert!(matches!(err, BindingError::TypeMismatch { .. }));
}

#[test]
fn test_property_accessors() {
    let f = Fixture::new();
    let obj = f.new_counter(&[ScriptValue::Int(1)]);
    f.cx.set(obj, "count", ScriptValue::Int(9)).unwrap();
    assert_eq!(f.cx.get(obj, "count").unwrap(), ScriptValue::Int(9));
}

#[test]
fn test_arguments_are_marshaled_in_order() {
    let f = Fixture::new();
    let obj = f.new_counter(&[]);
    let sum = f
        .cx
        .call_method(obj, "add", &[ScriptValue::Int(2), ScriptValue::Number(5.0)])
        .unwrap();
    assert_eq!(sum, ScriptValue::Int(7));
}

#[test]
fn test_type_mismatch_is_raised_before_any_native_call() {
    let f = Fixture::new();
    let obj = f.new_counter(&[]);
    let before = f.runtime.calls().len();

    let err = f
        .cx
        .call_method(obj, "add", &[ScriptValue::string("two"), ScriptValue::Int(5)])
        .unwrap_err();
    assert!(matches!(err, BindingError::TypeMismatch { .. }));

    let err = f.cx.call_method(obj, "add", &[ScriptValue::Int(2)]).unwrap_err();
    assert!(matches!(err, BindingError::TypeMismatch { .. }));

    let err = f
        .cx
        .call_method(obj, "add", &[ScriptValue::Number(2.5), ScriptValue::Int(5)])
        .unwrap_err();
    assert!(matches!(err, BindingError::TypeMismatch { .. }));

    assert_eq!(f.runtime.calls().len(), before);
}

#[test]
fn test_method_on_foreign_receiver_is_rejected() {
    let f = Fixture::new();
    let add = f.cx.get(f.prototype("Counter"), "add").unwrap().as_object().unwrap();
    let plain = f.cx.create_object(None);
    let err = f
        .cx
        .call(add, ScriptValue::Object(plain), &[ScriptValue::Int(1), ScriptValue::Int(2)])
        .unwrap_err();
    assert!(matches!(err, BindingError::TypeMismatch { .. }));
}

#[test]
fn test_unimplemented_optional_member() {
    let f = Fixture::new();
    let obj = f.new_counter(&[]);
    let err = f.cx.call_method(obj, "maybe", &[]).unwrap_err();
    match err {
        BindingError::MemberNotFound { member, .. } => assert_eq!(member, "maybe"),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_native_failure_is_preserved() {
    let f = Fixture::new();
    let obj = f.new_counter(&[]);
    match f.cx.call_method(obj, "explode", &[]).unwrap_err() {
        BindingError::NativeInvocation(failure) => {
            assert_eq!(failure.domain, "NSInvalidArgumentException");
            assert_eq!(failure.message, "boom");
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_static_method_dispatches_on_called_class() {
    let f = Fixture::new();
    let counter = f.constructor("Counter");
    let created = f.cx.call_method(counter, "create", &[]).unwrap().as_object().unwrap();
    let pointer = f.cx.native_pointer(created).unwrap();
    assert_eq!(f.runtime.class_of(pointer).as_deref(), Some("Counter"));
    assert_eq!(f.cx.prototype_of(created), Some(f.prototype("Counter")));
}

#[test]
fn test_results_use_the_dynamic_class() {
    let f = Fixture::new();
    f.runtime.class("HiddenCounter", Some("Counter"));
    f.runtime.function("makeBase", |rt, _| ret_ptr(rt.instance("HiddenCounter")));
    let make = f.bindings.function_object(&f.cx, f.heap.js_table().find("makeBase", true).unwrap().unwrap().offset());
    let make = make.unwrap().as_object().unwrap();
    let obj = f.cx.call(make, ScriptValue::Undefined, &[]).unwrap().as_object().unwrap();
    assert_eq!(f.cx.prototype_of(obj), Some(f.prototype("Counter")));
}

#[test]
fn test_owned_results_are_released_when_collected() {
    let f = Fixture::new();
    f.runtime.function("makeBase", |rt, _| ret_ptr(rt.instance("Base")));
    f.runtime.function("copyBase", |rt, _| ret_ptr(rt.instance("Base")));
    let call = |name: &str| {
        let offset = f.heap.js_table().find(name, true).unwrap().unwrap().offset();
        let function = f.bindings.function_object(&f.cx, offset).unwrap().as_object().unwrap();
        f.cx.call(function, ScriptValue::Undefined, &[]).unwrap().as_object().unwrap()
    };

    let borrowed = call("makeBase");
    f.cx.collect(borrowed).unwrap();
    assert!(f.runtime.released().is_empty());

    let owned = call("copyBase");
    let pointer = f.cx.native_pointer(owned).unwrap();
    f.cx.collect(owned).unwrap();
    assert_eq!(f.runtime.released(), vec![pointer.addr()]);
}

#[test]
fn test_failed_init_releases_the_allocation() {
    let f = Fixture::new();
    f.runtime.instance_method("Counter", "initWithValue:", |_, _| {
        Err(NativeFailure::new("NSInvalidArgumentException", "bad value"))
    });
    let ctor = f.constructor("Counter");
    let err = f.cx.construct(ctor, &[ScriptValue::Int(-1)]).unwrap_err();
    assert!(matches!(err, BindingError::NativeInvocation(_)));
    assert_eq!(f.runtime.released().len(), 1);
}

#[test]
fn test_cyclic_inheritance_is_rejected_and_rolled_back() {
    let f = Fixture::new();
    let record = f.heap.js_table().find("Loop", true).unwrap().unwrap();
    let err = f.bindings.get_or_create_constructor(&f.cx, record).unwrap_err();
    match err {
        BindingError::MetadataFormat(message) => assert!(message.contains("Cyclic")),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(f.bindings.cached_count(), 0);
    // The failure is repeatable rather than leaving a half-built entry
    assert!(f.bindings.get_or_create_constructor(&f.cx, record).is_err());
}

#[test]
fn test_functions_report_their_arity() {
    let f = Fixture::new();
    let add = f.cx.get(f.prototype("Counter"), "add").unwrap().as_object().unwrap();
    assert_eq!(f.cx.get(add, "length").unwrap(), ScriptValue::Int(2));
}

#[test]
fn test_alloc_is_a_static_member() {
    let f = Fixture::new();
    let counter = f.constructor("Counter");
    assert!(f.cx.has_own(f.constructor("Base"), "alloc"));
    assert!(!f.cx.has_own(counter, "alloc"));
    assert_eq!(f.cx.get(f.constructor("Describable"), "alloc").unwrap(), ScriptValue::Undefined);

    let obj = f.cx.call_method(counter, "alloc", &[]).unwrap().as_object().unwrap();
    assert_eq!(f.cx.prototype_of(obj), Some(f.prototype("Counter")));
    let pointer = f.cx.native_pointer(obj).unwrap();
    assert_eq!(f.runtime.class_of(pointer).as_deref(), Some("Counter"));
    // Allocated but not initialized
    assert_eq!(f.runtime.calls(), vec!["alloc"]);
    assert_eq!(f.cx.get(obj, "count").unwrap(), ScriptValue::Int(0));

    f.cx.collect(obj).unwrap();
    assert_eq!(f.runtime.released(), vec![pointer.addr()]);
}

#[test]
fn test_to_string_is_shared_by_instances() {
    let f = Fixture::new();
    let base = f.prototype("Base");
    assert!(f.cx.has_own(base, "toString"));
    assert!(!f.cx.has_own(f.prototype("Counter"), "toString"));

    let obj = f.new_counter(&[]);
    let pointer = f.cx.native_pointer(obj).unwrap();
    assert_eq!(
        f.cx.call_method(obj, "toString", &[]).unwrap(),
        ScriptValue::string(format!("<Counter: {:#x}>", pointer.addr()))
    );
    assert_eq!(
        f.cx.call_method(f.prototype("Counter"), "toString", &[]).unwrap(),
        ScriptValue::string("[object Counter]")
    );
}

#[test]
fn test_short_alloc_result_is_a_format_error() {
    let f = Fixture::new();
    f.runtime.class_method("Counter", "alloc", |_, _| Ok(vec![0x10, 0x20]));
    let err = f.cx.construct(f.constructor("Counter"), &[]).unwrap_err();
    assert!(matches!(err, BindingError::MetadataFormat(_)));
}

#[test]
fn test_short_init_result_releases_the_allocation() {
    let f = Fixture::new();
    f.runtime.instance_method("Base", "init", |_, _| Ok(vec![0; 4]));
    let err = f.cx.construct(f.constructor("Counter"), &[]).unwrap_err();
    assert!(matches!(err, BindingError::MetadataFormat(_)));
    assert_eq!(f.runtime.released().len(), 1);
}
