//! Process-wide heap installation
//!
//! The installed heap lives for the whole process, so this binary holds a
//! single test that walks through the init-once sequence.

use std::sync::Arc;

use metabind_engine::metadata::{ConstantDecl, Header, Names, TypeDecl};
use metabind_engine::{CatalogWriter, FormatError, MetaHeap};

fn heap_with(name: &str) -> Arc<MetaHeap> {
    let mut w = CatalogWriter::new();
    w.constant(ConstantDecl::new(Header::new(Names::js(name)), TypeDecl::Int));
    Arc::new(MetaHeap::load(w.finish()).unwrap())
}

#[test]
fn test_install_succeeds_once() {
    assert!(MetaHeap::instance().is_none());

    let first = heap_with("kFirst");
    let installed = MetaHeap::install(Arc::clone(&first)).unwrap();
    assert!(Arc::ptr_eq(installed, &first));

    let second = heap_with("kSecond");
    assert_eq!(MetaHeap::install(second).unwrap_err(), FormatError::HeapAlreadyLoaded);

    let instance = MetaHeap::instance().unwrap();
    assert!(Arc::ptr_eq(instance, &first));
    assert!(instance.js_table().find("kFirst", true).unwrap().is_some());
    assert!(instance.js_table().find("kSecond", true).unwrap().is_none());
}
