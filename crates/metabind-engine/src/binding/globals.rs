//! Global registration
//!
//! Catalog symbols are installed on the global object as lazy properties.
//! Nothing is realized until a script first reads the name.

use metabind_sdk::{BindingError, BindingResult, ObjectRef, ScriptContext, ScriptValue, SymbolRequest};

use super::dispatch;
use super::BindingContext;
use crate::marshal::{layout_of, MarshalEnv};
use crate::metadata::{ConstantMeta, FunctionMeta, HeapView, Record, RecordKind, Signature, StructMeta};

/// Outcome of one registration pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RegistrationReport {
    /// Names installed on the global object
    pub registered: Vec<String>,
    /// Ui-only names left out of a worker context
    pub skipped_worker: Vec<String>,
    /// Records that could not be read, with the reason
    pub failed: Vec<(String, String)>,
}

/// Which record kinds a pass installs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Constants,
    All,
}

impl Scope {
    fn includes(self, kind: RecordKind) -> bool {
        match self {
            Scope::Constants => kind == RecordKind::Constant,
            Scope::All => matches!(
                kind,
                RecordKind::Constant
                    | RecordKind::Function
                    | RecordKind::Interface
                    | RecordKind::Protocol
                    | RecordKind::Struct
            ),
        }
    }
}

impl BindingContext {
    /// Install every exposed constant on `global` as a lazy property.
    ///
    /// In a worker context (`worker == true`) ui-only constants are left
    /// out. Names the global already owns are not overwritten.
    pub fn register_global_constants(
        &self,
        cx: &dyn ScriptContext,
        global: ObjectRef,
        worker: bool,
    ) -> BindingResult<RegistrationReport> {
        self.register(cx, global, worker, Scope::Constants)
    }

    /// Install constants, functions, classes, protocols and structs on
    /// `global` as lazy properties.
    pub fn register_globals(
        &self,
        cx: &dyn ScriptContext,
        global: ObjectRef,
        worker: bool,
    ) -> BindingResult<RegistrationReport> {
        self.register(cx, global, worker, Scope::All)
    }

    fn register(
        &self,
        cx: &dyn ScriptContext,
        global: ObjectRef,
        worker: bool,
        scope: Scope,
    ) -> BindingResult<RegistrationReport> {
        let mut report = RegistrationReport::default();
        for entry in self.heap().js_table().iter_all() {
            let record = match entry {
                Ok(record) => record,
                Err(err) => {
                    log::warn!("skipping unreadable global entry: {}", err);
                    report.failed.push((String::new(), err.to_string()));
                    continue;
                }
            };
            let kind = match record.kind() {
                Ok(kind) => kind,
                Err(err) => {
                    report.failed.push((record.display_name(), err.to_string()));
                    continue;
                }
            };
            if !scope.includes(kind) || !self.is_exposed(&record) {
                continue;
            }
            let name = match record.js_name() {
                Ok(Some(name)) => name,
                Ok(None) => continue,
                Err(err) => {
                    log::warn!("skipping global at offset {}: {}", record.offset(), err);
                    report.failed.push((record.display_name(), err.to_string()));
                    continue;
                }
            };
            if worker && record.is_ui_only() {
                log::trace!("'{}' is ui-only, not exposed to worker", name);
                report.skipped_worker.push(name.to_string());
                continue;
            }
            if cx.has_own(global, name) {
                log::trace!("global '{}' already defined", name);
                continue;
            }
            if let Err(err) = self.define_global(cx, global, name, record.offset(), kind) {
                log::warn!("could not define global '{}': {}", name, err);
                report.failed.push((name.to_string(), err.to_string()));
                continue;
            }
            report.registered.push(name.to_string());
        }
        log::debug!(
            "registered {} globals ({} worker-excluded, {} failed)",
            report.registered.len(),
            report.skipped_worker.len(),
            report.failed.len()
        );
        Ok(report)
    }

    fn define_global(
        &self,
        cx: &dyn ScriptContext,
        global: ObjectRef,
        name: &str,
        offset: u32,
        kind: RecordKind,
    ) -> BindingResult<()> {
        let bindings = self.clone();
        let init: metabind_sdk::LazyInit = match kind {
            RecordKind::Constant => Box::new(move |cx: &dyn ScriptContext| bindings.load_constant(cx, offset)),
            RecordKind::Function => Box::new(move |cx: &dyn ScriptContext| bindings.function_object(cx, offset)),
            RecordKind::Struct => Box::new(move |cx: &dyn ScriptContext| {
                let record = StructMeta::view(bindings.heap(), offset)?;
                let handle = bindings.get_or_create_struct_constructor(cx, record)?;
                Ok(ScriptValue::Object(handle.constructor))
            }),
            _ => Box::new(move |cx: &dyn ScriptContext| {
                let record = bindings.heap().record(offset)?;
                let handle = bindings.get_or_create_constructor(cx, record)?;
                Ok(ScriptValue::Object(handle.constructor))
            }),
        };
        cx.define_lazy(global, name, init)
    }

    /// Read a global constant from the native side and convert it.
    pub fn load_constant(&self, cx: &dyn ScriptContext, offset: u32) -> BindingResult<ScriptValue> {
        let constant = ConstantMeta::view(self.heap(), offset)?;
        let name = constant.name()?.unwrap_or_default();
        let encoding = constant.encoding()?;
        let symbol = self
            .runtime()
            .resolve(&SymbolRequest::Constant { name })
            .ok_or_else(|| BindingError::member_not_found(name, "global"))?;
        let layout = layout_of(self.heap(), &encoding)?;
        let mut bytes = vec![0u8; layout.size];
        self.runtime().load_constant(symbol, &mut bytes)?;
        log::trace!("loaded constant '{}' ({} bytes)", name, bytes.len());
        MarshalEnv::new(cx, self).decode(&encoding, &bytes)
    }

    /// Callable function object for a function record
    pub fn function_object(&self, cx: &dyn ScriptContext, offset: u32) -> BindingResult<ScriptValue> {
        let function = FunctionMeta::view(self.heap(), offset)?;
        let name = function.js_name()?.unwrap_or_default();
        let length = function.parameter_count()?;
        let object = cx.create_function(name, length, dispatch::function_callback(self.clone(), offset));
        Ok(ScriptValue::Object(object))
    }

    /// Look a global record up by scripting name.
    pub fn find_global(&self, name: &str) -> BindingResult<Option<Record<'_>>> {
        let options = self.options();
        let record = self.heap().js_table().find(name, false)?;
        Ok(record.filter(|r| !options.only_available || r.is_available_on(options.target_version)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_constants_only() {
        assert!(Scope::Constants.includes(RecordKind::Constant));
        assert!(!Scope::Constants.includes(RecordKind::Function));
        assert!(!Scope::Constants.includes(RecordKind::Interface));
    }

    #[test]
    fn test_scope_all_skips_members() {
        assert!(Scope::All.includes(RecordKind::Struct));
        assert!(Scope::All.includes(RecordKind::Protocol));
        assert!(!Scope::All.includes(RecordKind::Method));
        assert!(!Scope::All.includes(RecordKind::Property));
        assert!(!Scope::All.includes(RecordKind::Module));
    }
}
