//! Struct binding integration tests

mod common;

use std::sync::Arc;

use common::{ret_f64, FakeRuntime};
use metabind_engine::metadata::{FunctionDecl, Header, Names, StructDecl, TypeDecl};
use metabind_engine::{BindingContext, CatalogWriter, MetaHeap};
use metabind_runtime::HostContext;
use metabind_sdk::{BindingError, ForeignRuntime, ObjectRef, ScriptContext, ScriptValue};

fn catalog() -> Vec<u8> {
    let mut w = CatalogWriter::new();
    w.structure(StructDecl::new(
        Header::new(Names::js("Pair")),
        vec![("a", TypeDecl::Int), ("b", TypeDecl::Double)],
    ));
    w.function(FunctionDecl::new(
        Header::new(Names::js("sumPair")),
        vec![TypeDecl::Double, TypeDecl::Struct("Pair".to_string())],
    ));
    w.function(FunctionDecl::new(
        Header::new(Names::js("makePair")),
        vec![TypeDecl::Struct("Pair".to_string()), TypeDecl::Int],
    ));
    w.finish()
}

fn setup() -> (Arc<FakeRuntime>, BindingContext, HostContext) {
    let runtime = FakeRuntime::new();
    runtime.function("sumPair", |_, inv| {
        let bytes = inv.reader().bytes(16, 8);
        let a = i32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let b = f64::from_le_bytes(bytes[8..16].try_into().unwrap());
        ret_f64(a as f64 + b)
    });
    runtime.function("makePair", |_, inv| {
        let n = inv.reader().i32();
        let mut out = vec![0u8; 16];
        out[0..4].copy_from_slice(&n.to_le_bytes());
        out[8..16].copy_from_slice(&(n as f64 / 2.0).to_le_bytes());
        Ok(out)
    });
    let heap = Arc::new(MetaHeap::load(catalog()).unwrap());
    let foreign: Arc<dyn ForeignRuntime> = runtime.clone();
    let bindings = BindingContext::new(heap, foreign);
    let cx = HostContext::new();
    bindings.register_globals(&cx, cx.global(), false).unwrap();
    (runtime, bindings, cx)
}

fn global(cx: &HostContext, name: &str) -> ObjectRef {
    cx.get(cx.global(), name).unwrap().as_object().unwrap()
}

#[test]
fn test_positional_construction() {
    let (_runtime, _bindings, cx) = setup();
    let pair = global(&cx, "Pair");
    let value = cx
        .construct(pair, &[ScriptValue::Int(3), ScriptValue::Number(7.5)])
        .unwrap()
        .as_object()
        .unwrap();
    assert_eq!(cx.get(value, "a").unwrap(), ScriptValue::Int(3));
    assert_eq!(cx.get(value, "b").unwrap(), ScriptValue::Number(7.5));
}

#[test]
fn test_keyed_initializer_round_trip() {
    let (_runtime, _bindings, cx) = setup();
    let pair = global(&cx, "Pair");
    let init = cx.create_object(None);
    cx.define_value(init, "a", ScriptValue::Int(3)).unwrap();
    cx.define_value(init, "b", ScriptValue::Number(7.5)).unwrap();
    let value = cx
        .construct(pair, &[ScriptValue::Object(init)])
        .unwrap()
        .as_object()
        .unwrap();
    assert_eq!(cx.get(value, "a").unwrap(), ScriptValue::Int(3));
    assert_eq!(cx.get(value, "b").unwrap(), ScriptValue::Number(7.5));
}

#[test]
fn test_keyed_initializer_leaves_missing_fields_zeroed() {
    let (_runtime, _bindings, cx) = setup();
    let pair = global(&cx, "Pair");
    let init = cx.create_object(None);
    cx.define_value(init, "b", ScriptValue::Number(1.25)).unwrap();
    let value = cx
        .construct(pair, &[ScriptValue::Object(init)])
        .unwrap()
        .as_object()
        .unwrap();
    assert_eq!(cx.get(value, "a").unwrap(), ScriptValue::Int(0));
    assert_eq!(cx.get(value, "b").unwrap(), ScriptValue::Number(1.25));
}

#[test]
fn test_field_setter_writes_native_memory() {
    let (_runtime, _bindings, cx) = setup();
    let pair = global(&cx, "Pair");
    let value = cx.construct(pair, &[]).unwrap().as_object().unwrap();
    cx.set(value, "a", ScriptValue::Int(-4)).unwrap();
    assert_eq!(cx.get(value, "a").unwrap(), ScriptValue::Int(-4));
}

#[test]
fn test_equals_compares_bytes() {
    let (_runtime, _bindings, cx) = setup();
    let pair = global(&cx, "Pair");
    let make = |a: i64, b: f64| {
        cx.construct(pair, &[ScriptValue::Int(a), ScriptValue::Number(b)])
            .unwrap()
    };
    let x = make(1, 2.0);
    let y = make(1, 2.0);
    let z = make(1, 3.0);
    assert_eq!(cx.call_method(pair, "equals", &[x.clone(), y]).unwrap(), ScriptValue::Bool(true));
    assert_eq!(cx.call_method(pair, "equals", &[x, z]).unwrap(), ScriptValue::Bool(false));
}

#[test]
fn test_too_many_field_values() {
    let (_runtime, _bindings, cx) = setup();
    let pair = global(&cx, "Pair");
    let err = cx
        .construct(pair, &[ScriptValue::Int(1), ScriptValue::Int(2), ScriptValue::Int(3)])
        .unwrap_err();
    assert!(matches!(err, BindingError::TypeMismatch { .. }));
}

#[test]
fn test_constructor_reports_field_count() {
    let (_runtime, bindings, cx) = setup();
    let pair = global(&cx, "Pair");
    assert_eq!(cx.get(pair, "length").unwrap(), ScriptValue::Int(2));
    assert_eq!(bindings.cached_count(), 1);
    assert!(bindings.record_of_constructor(pair).is_some());
}

#[test]
fn test_struct_argument_is_passed_by_value() {
    let (runtime, _bindings, cx) = setup();
    let pair = global(&cx, "Pair");
    let value = cx
        .construct(pair, &[ScriptValue::Int(2), ScriptValue::Number(0.5)])
        .unwrap();
    let sum = global(&cx, "sumPair");
    assert_eq!(
        cx.call(sum, ScriptValue::Undefined, &[value]).unwrap(),
        ScriptValue::Number(2.5)
    );

    let init = cx.create_object(None);
    cx.define_value(init, "a", ScriptValue::Int(10)).unwrap();
    assert_eq!(
        cx.call(sum, ScriptValue::Undefined, &[ScriptValue::Object(init)]).unwrap(),
        ScriptValue::Number(10.0)
    );
    assert_eq!(runtime.calls(), vec!["sumPair", "sumPair"]);
}

#[test]
fn test_struct_argument_type_mismatch() {
    let (runtime, _bindings, cx) = setup();
    let sum = global(&cx, "sumPair");
    let err = cx.call(sum, ScriptValue::Undefined, &[ScriptValue::Int(1)]).unwrap_err();
    assert!(matches!(err, BindingError::TypeMismatch { .. }));
    assert!(runtime.calls().is_empty());
}

#[test]
fn test_struct_result_is_wrapped() {
    let (_runtime, _bindings, cx) = setup();
    let make = global(&cx, "makePair");
    let value = cx
        .call(make, ScriptValue::Undefined, &[ScriptValue::Int(9)])
        .unwrap()
        .as_object()
        .unwrap();
    let pair = global(&cx, "Pair");
    let proto = cx.get(pair, "prototype").unwrap().as_object();
    assert_eq!(cx.prototype_of(value), proto);
    assert_eq!(cx.get(value, "a").unwrap(), ScriptValue::Int(9));
    assert_eq!(cx.get(value, "b").unwrap(), ScriptValue::Number(4.5));
}

#[test]
fn test_oversized_struct_fails_without_touching_memory() {
    let mut w = CatalogWriter::new();
    w.structure(StructDecl::new(
        Header::new(Names::js("Huge")),
        vec![(
            "a",
            TypeDecl::ConstantArray(
                4,
                Box::new(TypeDecl::ConstantArray(
                    1 << 31,
                    Box::new(TypeDecl::ConstantArray(1 << 31, Box::new(TypeDecl::Char))),
                )),
            ),
        )],
    ));
    w.structure(StructDecl::new(
        Header::new(Names::js("Wide")),
        vec![("b", TypeDecl::ConstantArray(u32::MAX, Box::new(TypeDecl::Double)))],
    ));
    w.structure(StructDecl::new(Header::new(Names::js("Small")), vec![("c", TypeDecl::Int)]));
    let runtime = FakeRuntime::new();
    let heap = Arc::new(MetaHeap::load(w.finish()).unwrap());
    let foreign: Arc<dyn ForeignRuntime> = runtime.clone();
    let bindings = BindingContext::new(heap, foreign);
    let cx = HostContext::new();
    bindings.register_globals(&cx, cx.global(), false).unwrap();

    for name in ["Huge", "Wide"] {
        let err = cx.get(cx.global(), name).unwrap_err();
        match err {
            BindingError::MetadataFormat(message) => assert!(message.contains("larger than")),
            other => panic!("unexpected {:?}", other),
        }
    }
    let small = global(&cx, "Small");
    let value = cx.construct(small, &[ScriptValue::Int(5)]).unwrap().as_object().unwrap();
    assert_eq!(cx.get(value, "c").unwrap(), ScriptValue::Int(5));
    assert!(runtime.calls().is_empty());
}
