//! Catalog reader integration tests
//!
//! Blobs are produced by `CatalogWriter` and read back through the public
//! heap, table and record views.

use std::sync::Arc;

use metabind_engine::metadata::{
    ClassDecl, ConstantDecl, FunctionDecl, Header, Meta, MethodDecl, Names, PropertyDecl, Signature, StructDecl,
    TypeDecl,
};
use metabind_engine::{CatalogWriter, Fnv1aHasher, FormatError, MetaHeap, PlatformVersion, RecordKind, TypeKind};

fn sample_catalog() -> CatalogWriter {
    let mut w = CatalogWriter::new();
    let foundation = w.module(Header::new(Names::js("Foundation")), &["Foundation"]);
    w.protocol(
        ClassDecl::new(Header::new(Names::js("NSCopying")))
            .instance_method(MethodDecl::new(Names::js("copy"), vec![TypeDecl::Id(vec![])])),
    );
    w.interface(
        ClassDecl::new(Header::new(Names::js("NSObject")).module(foundation))
            .instance_method(MethodDecl::new(Names::js("init"), vec![TypeDecl::InstanceType]).initializer())
            .instance_property(PropertyDecl::readonly(
                Names::js("hash"),
                MethodDecl::new(Names::js("hash"), vec![TypeDecl::ULong]),
            )),
    );
    w.interface(
        ClassDecl::new(Header::new(Names::js("NSString")).module(foundation))
            .base("NSObject")
            .adopts("NSCopying")
            .instance_method(MethodDecl::new(
                Names::js("characterAtIndex").with_native("characterAtIndex:"),
                vec![TypeDecl::UShort, TypeDecl::ULong],
            )),
    );
    w.structure(StructDecl::new(
        Header::new(Names::js("CGPoint")),
        vec![("x", TypeDecl::Double), ("y", TypeDecl::Double)],
    ));
    w.function(FunctionDecl::new(
        Header::new(Names::js("NSLog").with_mangled("_NSLog")),
        vec![TypeDecl::Void, TypeDecl::Interface("NSString".to_string())],
    ).variadic());
    w.constant(ConstantDecl::new(Header::new(Names::js("NSNotFound")), TypeDecl::Long));
    w.constant(ConstantDecl::new(
        Header::new(Names::js("kFutureThing")).introduced(PlatformVersion::new(15, 0)),
        TypeDecl::Int,
    ));
    w.constant(ConstantDecl::new(Header::new(Names::js("kRetired")).unavailable(), TypeDecl::Int));
    w
}

#[test]
fn test_every_record_round_trips_through_find() {
    let heap = MetaHeap::load(sample_catalog().finish()).unwrap();
    let mut seen = 0;
    for record in heap.js_table().iter_all() {
        let record = record.unwrap();
        let name = record.js_name().unwrap().unwrap();
        let found = heap.js_table().find(name, false).unwrap().unwrap();
        assert_eq!(found.offset(), record.offset(), "round trip of '{}'", name);
        seen += 1;
    }
    assert_eq!(seen, 8);

    for table in [heap.protocol_table(), heap.interface_table()] {
        for record in table.iter_all() {
            let record = record.unwrap();
            let name = record.name().unwrap().unwrap();
            assert_eq!(table.find(name, false).unwrap().unwrap().offset(), record.offset());
        }
    }
}

#[test]
fn test_lookup_is_idempotent() {
    let heap = MetaHeap::load(sample_catalog().finish()).unwrap();
    let first = heap.js_table().find("NSString", true).unwrap().unwrap();
    for _ in 0..3 {
        let again = heap.js_table().find("NSString", true).unwrap().unwrap();
        assert_eq!(again.offset(), first.offset());
        assert_eq!(again.js_name().unwrap(), Some("NSString"));
    }
}

#[test]
fn test_availability_against_target() {
    let blob = sample_catalog().finish();
    let old = MetaHeap::load(blob.clone()).unwrap().with_target(PlatformVersion::new(13, 0));
    assert!(old.js_table().find("kFutureThing", true).unwrap().is_none());
    assert!(old.js_table().find("kFutureThing", false).unwrap().is_some());
    assert!(old.js_table().find("kRetired", true).unwrap().is_none());

    let new = MetaHeap::load(blob).unwrap().with_target(PlatformVersion::new(15, 0));
    assert!(new.js_table().find("kFutureThing", true).unwrap().is_some());
    assert!(new.js_table().find("kRetired", true).unwrap().is_none());

    let available: Vec<String> = old
        .js_table()
        .iter()
        .map(|r| r.unwrap().js_name().unwrap().unwrap().to_string())
        .collect();
    assert!(!available.contains(&"kFutureThing".to_string()));
    assert!(!available.contains(&"kRetired".to_string()));
    assert_eq!(available.len(), 6);
}

#[test]
fn test_typed_views() {
    let heap = MetaHeap::load(sample_catalog().finish()).unwrap();

    let string = heap.js_table().find("NSString", true).unwrap().unwrap();
    let class = match string.meta().unwrap() {
        Meta::Interface(class) => class,
        _ => panic!("NSString should be an interface"),
    };
    assert_eq!(class.base_name().unwrap(), Some("NSObject"));
    assert_eq!(class.base().unwrap().unwrap().js_name().unwrap(), Some("NSObject"));
    assert_eq!(class.protocols().unwrap(), vec!["NSCopying"]);
    let methods = class.instance_methods().unwrap();
    assert_eq!(methods[0].js_name().unwrap(), Some("characterAtIndex"));
    assert_eq!(methods[0].selector().unwrap(), "characterAtIndex:");
    assert_eq!(methods[0].parameter_count().unwrap(), 1);
    assert_eq!(
        string.top_level_module().unwrap().unwrap().libraries().unwrap(),
        vec!["Foundation"]
    );

    let log = heap.js_table().find("NSLog", true).unwrap().unwrap();
    match log.meta().unwrap() {
        Meta::Function(f) => {
            assert!(f.is_variadic());
            assert_eq!(f.name().unwrap(), Some("NSLog"));
            assert_eq!(f.mangled_name().unwrap(), Some("_NSLog"));
            assert_eq!(f.return_type().unwrap().unwrap().kind(), TypeKind::Void);
        }
        _ => panic!("NSLog should be a function"),
    }

    let point = heap.js_table().find("CGPoint", true).unwrap().unwrap();
    assert_eq!(point.kind().unwrap(), RecordKind::Struct);
    match point.meta().unwrap() {
        Meta::Struct(s) => assert_eq!(s.field_names().unwrap(), vec!["x", "y"]),
        _ => panic!("CGPoint should be a struct"),
    }
}

#[test]
fn test_modules_are_listed() {
    let heap = MetaHeap::load(sample_catalog().finish()).unwrap();
    let modules = heap.modules();
    assert_eq!(modules.len().unwrap(), 1);
    assert_eq!(modules.find("Foundation").unwrap().unwrap().js_name().unwrap(), Some("Foundation"));
}

#[test]
fn test_zero_bucket_table_finds_nothing() {
    let mut w = CatalogWriter::new().with_bucket_count(0);
    w.constant(ConstantDecl::new(Header::new(Names::js("kLost")), TypeDecl::Int));
    let heap = MetaHeap::load(w.finish()).unwrap();
    assert_eq!(heap.js_table().bucket_count().unwrap(), 0);
    assert!(heap.js_table().find("kLost", false).unwrap().is_none());
    assert_eq!(heap.js_table().iter_all().count(), 0);
}

#[test]
fn test_custom_hasher_and_bucket_count() {
    let mut w = CatalogWriter::with_hasher(Arc::new(Fnv1aHasher)).with_bucket_count(3);
    for i in 0..20 {
        w.constant(ConstantDecl::new(Header::new(Names::js(format!("k{}", i))), TypeDecl::Int));
    }
    let heap = MetaHeap::load(w.finish()).unwrap().with_hasher(Arc::new(Fnv1aHasher));
    assert_eq!(heap.js_table().bucket_count().unwrap(), 3);
    for i in 0..20 {
        let name = format!("k{}", i);
        assert!(heap.js_table().find(&name, true).unwrap().is_some(), "missing {}", name);
    }
}

#[test]
fn test_truncated_blob_is_a_format_error() {
    let blob = sample_catalog().finish();
    let err = MetaHeap::load(blob[..6].to_vec()).unwrap_err();
    assert!(matches!(err, FormatError::OutOfBounds { .. } | FormatError::InconsistentTable { .. }));
}
