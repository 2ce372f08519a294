//! Shared test fixtures: an in-process fake of the foreign runtime.
//!
//! Native memory is a map of allocations; classes, methods, functions and
//! constants are registered by name with Rust closures as implementations.

#![allow(dead_code)]

use std::sync::Arc;

use metabind_sdk::{CallTarget, ForeignCall, ForeignMemory, ForeignRuntime, NativeFailure, NativePtr, NativeSymbol, SymbolRequest};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

/// Native implementation: `(runtime, call) -> return bytes`
pub type NativeImpl = Arc<dyn Fn(&FakeRuntime, &Invocation) -> Result<Vec<u8>, NativeFailure> + Send + Sync>;

/// One call as the fake sees it.
pub struct Invocation {
    /// Receiver instance, if any
    pub receiver: Option<NativePtr>,
    /// Receiver class, for class methods
    pub class: Option<String>,
    /// Raw argument bytes
    pub args: Vec<u8>,
    /// Raw signature bytes
    pub signature: Vec<u8>,
}

impl Invocation {
    /// Sequential argument reader
    pub fn reader(&self) -> ArgReader<'_> {
        ArgReader {
            bytes: &self.args,
            cursor: 0,
        }
    }
}

/// Reads arguments laid out with natural alignment.
pub struct ArgReader<'a> {
    bytes: &'a [u8],
    cursor: usize,
}

impl ArgReader<'_> {
    fn take(&mut self, size: usize, align: usize) -> &[u8] {
        let start = (self.cursor + align - 1) / align * align;
        self.cursor = start + size;
        &self.bytes[start..start + size]
    }

    pub fn i32(&mut self) -> i32 {
        i32::from_le_bytes(self.take(4, 4).try_into().unwrap())
    }

    pub fn i64(&mut self) -> i64 {
        i64::from_le_bytes(self.take(8, 8).try_into().unwrap())
    }

    pub fn f64(&mut self) -> f64 {
        f64::from_le_bytes(self.take(8, 8).try_into().unwrap())
    }

    pub fn ptr(&mut self) -> NativePtr {
        NativePtr::from_addr(u64::from_le_bytes(self.take(8, 8).try_into().unwrap()))
    }

    pub fn bytes(&mut self, size: usize, align: usize) -> Vec<u8> {
        self.take(size, align).to_vec()
    }
}

pub fn ret_i32(v: i32) -> Result<Vec<u8>, NativeFailure> {
    Ok(v.to_le_bytes().to_vec())
}

pub fn ret_f64(v: f64) -> Result<Vec<u8>, NativeFailure> {
    Ok(v.to_le_bytes().to_vec())
}

pub fn ret_ptr(p: NativePtr) -> Result<Vec<u8>, NativeFailure> {
    Ok(p.addr().to_le_bytes().to_vec())
}

pub fn ret_void() -> Result<Vec<u8>, NativeFailure> {
    Ok(Vec::new())
}

#[derive(Clone)]
enum Entry {
    Native(NativeImpl),
    Alloc,
}

#[derive(Default)]
struct State {
    allocations: FxHashMap<u64, Vec<u8>>,
    next_addr: u64,
    instances: FxHashMap<u64, String>,
    superclasses: FxHashMap<String, Option<String>>,
    symbols: Vec<Entry>,
    functions: FxHashMap<String, u64>,
    instance_methods: FxHashMap<(String, String), u64>,
    class_methods: FxHashMap<(String, String), u64>,
    constants: FxHashMap<String, Vec<u8>>,
    constant_symbols: FxHashMap<u64, String>,
    calls: Vec<String>,
    released: Vec<u64>,
}

impl State {
    fn symbol(&mut self, entry: Entry) -> u64 {
        self.symbols.push(entry);
        self.symbols.len() as u64
    }

    fn chain(&self, class: &str) -> Vec<String> {
        let mut out = vec![class.to_string()];
        let mut current = class.to_string();
        while let Some(Some(parent)) = self.superclasses.get(&current) {
            if out.contains(parent) {
                break;
            }
            out.push(parent.clone());
            current = parent.clone();
        }
        out
    }

    fn allocation_of(&self, addr: u64) -> Option<(u64, usize)> {
        self.allocations
            .iter()
            .find(|(base, bytes)| addr >= **base && addr < **base + bytes.len().max(1) as u64)
            .map(|(base, _)| (*base, (addr - *base) as usize))
    }
}

/// Fake foreign runtime.
#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<State>,
}

impl FakeRuntime {
    pub fn new() -> Arc<Self> {
        let runtime = Self::default();
        runtime.state.lock().next_addr = 0x1000;
        Arc::new(runtime)
    }

    /// Declare a native class
    pub fn class(&self, name: &str, superclass: Option<&str>) {
        self.state
            .lock()
            .superclasses
            .insert(name.to_string(), superclass.map(str::to_string));
    }

    /// Create a native instance of `class`
    pub fn instance(&self, class: &str) -> NativePtr {
        let pointer = self.allocate(16, 8);
        self.state.lock().instances.insert(pointer.addr(), class.to_string());
        pointer
    }

    pub fn function<F>(&self, name: &str, f: F)
    where
        F: Fn(&FakeRuntime, &Invocation) -> Result<Vec<u8>, NativeFailure> + Send + Sync + 'static,
    {
        let mut state = self.state.lock();
        let id = state.symbol(Entry::Native(Arc::new(f)));
        state.functions.insert(name.to_string(), id);
    }

    pub fn instance_method<F>(&self, class: &str, selector: &str, f: F)
    where
        F: Fn(&FakeRuntime, &Invocation) -> Result<Vec<u8>, NativeFailure> + Send + Sync + 'static,
    {
        let mut state = self.state.lock();
        let id = state.symbol(Entry::Native(Arc::new(f)));
        state
            .instance_methods
            .insert((class.to_string(), selector.to_string()), id);
    }

    pub fn class_method<F>(&self, class: &str, selector: &str, f: F)
    where
        F: Fn(&FakeRuntime, &Invocation) -> Result<Vec<u8>, NativeFailure> + Send + Sync + 'static,
    {
        let mut state = self.state.lock();
        let id = state.symbol(Entry::Native(Arc::new(f)));
        state
            .class_methods
            .insert((class.to_string(), selector.to_string()), id);
    }

    pub fn constant(&self, name: &str, bytes: &[u8]) {
        self.state.lock().constants.insert(name.to_string(), bytes.to_vec());
    }

    /// Names of invoked symbols, in call order
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Released addresses, in release order
    pub fn released(&self) -> Vec<u64> {
        self.state.lock().released.clone()
    }

    pub fn class_of(&self, pointer: NativePtr) -> Option<String> {
        self.state.lock().instances.get(&pointer.addr()).cloned()
    }

    fn symbol_name(state: &State, id: u64) -> String {
        let find = |map: &FxHashMap<(String, String), u64>| {
            map.iter()
                .find(|(_, v)| **v == id)
                .map(|((c, s), _)| format!("{}.{}", c, s))
        };
        state
            .functions
            .iter()
            .find(|(_, v)| **v == id)
            .map(|(n, _)| n.clone())
            .or_else(|| find(&state.instance_methods))
            .or_else(|| find(&state.class_methods))
            .unwrap_or_else(|| "alloc".to_string())
    }
}

impl ForeignMemory for FakeRuntime {
    fn allocate(&self, size: usize, align: usize) -> NativePtr {
        let mut state = self.state.lock();
        let align = align.max(16) as u64;
        let addr = (state.next_addr + align - 1) / align * align;
        state.next_addr = addr + size.max(1) as u64;
        state.allocations.insert(addr, vec![0; size]);
        NativePtr::from_addr(addr)
    }

    fn release(&self, pointer: NativePtr) {
        let mut state = self.state.lock();
        state.allocations.remove(&pointer.addr());
        state.released.push(pointer.addr());
    }

    fn read(&self, pointer: NativePtr, out: &mut [u8]) -> Result<(), NativeFailure> {
        let state = self.state.lock();
        let (base, offset) = state
            .allocation_of(pointer.addr())
            .ok_or_else(|| NativeFailure::new("memory", format!("bad read at {:?}", pointer)))?;
        let bytes = &state.allocations[&base];
        if offset + out.len() > bytes.len() {
            return Err(NativeFailure::new("memory", "read past allocation"));
        }
        out.copy_from_slice(&bytes[offset..offset + out.len()]);
        Ok(())
    }

    fn write(&self, pointer: NativePtr, data: &[u8]) -> Result<(), NativeFailure> {
        let mut state = self.state.lock();
        let (base, offset) = state
            .allocation_of(pointer.addr())
            .ok_or_else(|| NativeFailure::new("memory", format!("bad write at {:?}", pointer)))?;
        let bytes = state.allocations.get_mut(&base).unwrap();
        if offset + data.len() > bytes.len() {
            return Err(NativeFailure::new("memory", "write past allocation"));
        }
        bytes[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read_c_string(&self, pointer: NativePtr) -> Result<String, NativeFailure> {
        let state = self.state.lock();
        let (base, offset) = state
            .allocation_of(pointer.addr())
            .ok_or_else(|| NativeFailure::new("memory", "bad string"))?;
        let bytes = &state.allocations[&base][offset..];
        let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }
}

impl ForeignRuntime for FakeRuntime {
    fn resolve(&self, request: &SymbolRequest<'_>) -> Option<NativeSymbol> {
        let mut state = self.state.lock();
        match *request {
            SymbolRequest::Function { name } => state.functions.get(name).copied().map(NativeSymbol),
            SymbolRequest::Constant { name } => {
                if !state.constants.contains_key(name) {
                    return None;
                }
                let id = 1_000_000 + state.constant_symbols.len() as u64;
                state.constant_symbols.insert(id, name.to_string());
                Some(NativeSymbol(id))
            }
            SymbolRequest::InstanceMethod {
                receiver,
                declared_in,
                selector,
            } => {
                let class = state
                    .instances
                    .get(&receiver.addr())
                    .cloned()
                    .unwrap_or_else(|| declared_in.to_string());
                let mut classes = state.chain(&class);
                classes.push(declared_in.to_string());
                classes
                    .iter()
                    .find_map(|c| state.instance_methods.get(&(c.clone(), selector.to_string())))
                    .copied()
                    .map(NativeSymbol)
            }
            SymbolRequest::ClassMethod { class, selector } => {
                let found = state
                    .chain(class)
                    .iter()
                    .find_map(|c| state.class_methods.get(&(c.clone(), selector.to_string())))
                    .copied();
                match found {
                    Some(id) => Some(NativeSymbol(id)),
                    None if selector == "alloc" && state.superclasses.contains_key(class) => {
                        Some(NativeSymbol(state.symbol(Entry::Alloc)))
                    }
                    None => None,
                }
            }
        }
    }

    fn invoke(&self, call: &ForeignCall<'_>) -> Result<Vec<u8>, NativeFailure> {
        let (entry, name) = {
            let mut state = self.state.lock();
            let index = call.symbol.0 as usize;
            let entry = state
                .symbols
                .get(index.wrapping_sub(1))
                .cloned()
                .ok_or_else(|| NativeFailure::new("fake", "unknown symbol"))?;
            let name = Self::symbol_name(&state, call.symbol.0);
            state.calls.push(name.clone());
            (entry, name)
        };
        let invocation = Invocation {
            receiver: match call.target {
                CallTarget::Instance(p) => Some(p),
                _ => None,
            },
            class: match call.target {
                CallTarget::Class(c) => Some(c.to_string()),
                _ => None,
            },
            args: call.arguments.to_vec(),
            signature: call.signature.to_vec(),
        };
        match entry {
            Entry::Native(f) => f(self, &invocation),
            Entry::Alloc => {
                let class = invocation
                    .class
                    .ok_or_else(|| NativeFailure::new("fake", format!("{} without class", name)))?;
                ret_ptr(self.instance(&class))
            }
        }
    }

    fn class_name_of(&self, object: NativePtr) -> Option<String> {
        self.class_of(object)
    }

    fn superclass_of(&self, class: &str) -> Option<String> {
        self.state.lock().superclasses.get(class).cloned().flatten()
    }

    fn load_constant(&self, symbol: NativeSymbol, out: &mut [u8]) -> Result<(), NativeFailure> {
        let state = self.state.lock();
        let name = state
            .constant_symbols
            .get(&symbol.0)
            .ok_or_else(|| NativeFailure::new("fake", "unknown constant"))?;
        let bytes = &state.constants[name];
        let n = out.len().min(bytes.len());
        out[..n].copy_from_slice(&bytes[..n]);
        Ok(())
    }
}
