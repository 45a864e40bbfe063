// File: src/object.rs
//
// The object heap: every heap-allocated value (strings, functions,
// closures, upvalues, classes, instances, bound methods, natives) lives
// here in a single arena, traced and swept by a precise mark-sweep
// collector. `ObjRef` plays the role of clox's `Obj*`: a cheap, `Copy`
// handle whose equality is heap-slot identity.

use crate::chunk::Chunk;
use crate::table::Table;
use crate::value::Value;
use std::fmt;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjRef(pub usize);

pub struct LoxString {
    pub chars: String,
    pub hash: u32,
}

pub struct FunctionObj {
    pub arity: u8,
    pub upvalue_count: u8,
    pub chunk: Chunk,
    pub name: Option<ObjRef>, // LoxString; None for the top-level script
}

pub struct ClosureObj {
    pub function: ObjRef,
    pub upvalues: Vec<ObjRef>, // each points at an Upvalue object
}

pub enum UpvalueObj {
    Open(usize),  // index into the VM's value stack
    Closed(Value),
}

pub type NativeFn = fn(&[Value], std::time::Instant) -> Value;

pub struct NativeObj {
    pub name: String,
    pub function: NativeFn,
}

pub struct ClassObj {
    pub name: ObjRef, // LoxString
    pub methods: Table<ObjRef>, // name -> Closure
}

pub struct InstanceObj {
    pub class: ObjRef,
    pub fields: Table<Value>,
}

pub struct BoundMethodObj {
    pub receiver: Value,
    pub method: ObjRef, // Closure
}

pub enum ObjData {
    Str(LoxString),
    Function(FunctionObj),
    Closure(ClosureObj),
    Upvalue(UpvalueObj),
    Native(NativeObj),
    Class(ClassObj),
    Instance(InstanceObj),
    BoundMethod(BoundMethodObj),
}

impl ObjData {
    fn approx_size(&self) -> usize {
        match self {
            ObjData::Str(s) => std::mem::size_of::<LoxString>() + s.chars.len(),
            ObjData::Function(f) => {
                std::mem::size_of::<FunctionObj>() + f.chunk.code.len() + f.chunk.constants.len() * 16
            }
            ObjData::Closure(c) => {
                std::mem::size_of::<ClosureObj>() + c.upvalues.len() * std::mem::size_of::<ObjRef>()
            }
            ObjData::Upvalue(_) => std::mem::size_of::<UpvalueObj>(),
            ObjData::Native(_) => std::mem::size_of::<NativeObj>(),
            ObjData::Class(_) => std::mem::size_of::<ClassObj>(),
            ObjData::Instance(_) => std::mem::size_of::<InstanceObj>(),
            ObjData::BoundMethod(_) => std::mem::size_of::<BoundMethodObj>(),
        }
    }
}

struct HeapSlot {
    data: ObjData,
    marked: bool,
}

/// FNV-1a, 32-bit.
pub fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 2166136261;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

pub struct Heap {
    slots: Vec<Option<HeapSlot>>,
    free_slots: Vec<usize>,
    pub strings: Table<()>,
    pub bytes_allocated: usize,
    pub next_gc: usize,
    gray_stack: Vec<ObjRef>,
    /// Extra short-lived roots (e.g. a constant mid-insertion, a not-yet
    /// attached closure) that must survive any allocation-triggered GC
    /// while they're being built. Pushed and popped around the operation
    /// that needs the protection, mirroring the "push before you allocate
    /// again, pop when it's safely attached" discipline spec.md calls for.
    pub temp_roots: Vec<ObjRef>,
    pub stress_gc: bool,
}

const DEFAULT_NEXT_GC: usize = 1024 * 1024;

impl Heap {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_slots: Vec::new(),
            strings: Table::new(),
            bytes_allocated: 0,
            next_gc: DEFAULT_NEXT_GC,
            gray_stack: Vec::new(),
            temp_roots: Vec::new(),
            stress_gc: std::env::var("LOXC_GC_STRESS").is_ok(),
        }
    }

    fn alloc(&mut self, data: ObjData) -> ObjRef {
        self.bytes_allocated += data.approx_size();
        if let Some(index) = self.free_slots.pop() {
            self.slots[index] = Some(HeapSlot { data, marked: false });
            ObjRef(index)
        } else {
            self.slots.push(Some(HeapSlot { data, marked: false }));
            ObjRef(self.slots.len() - 1)
        }
    }

    pub fn get(&self, r: ObjRef) -> &ObjData {
        &self.slots[r.0].as_ref().expect("dangling ObjRef").data
    }

    pub fn get_mut(&mut self, r: ObjRef) -> &mut ObjData {
        &mut self.slots[r.0].as_mut().expect("dangling ObjRef").data
    }

    pub fn should_collect(&self) -> bool {
        self.stress_gc || self.bytes_allocated > self.next_gc
    }

    // --- String interning -------------------------------------------------

    pub fn string_hash(&self, r: ObjRef) -> u32 {
        match self.get(r) {
            ObjData::Str(s) => s.hash,
            _ => panic!("string_hash called on non-string object"),
        }
    }

    pub fn as_str(&self, r: ObjRef) -> &str {
        match self.get(r) {
            ObjData::Str(s) => &s.chars,
            _ => panic!("as_str called on non-string object"),
        }
    }

    /// Intern `text`, allocating a new String object only if no equal
    /// content is already interned. This is the one path every string
    /// construction (literals, identifiers, concatenation results) must
    /// go through so that equal content always shares identity.
    pub fn intern_string(&mut self, text: &str) -> ObjRef {
        let hash = fnv1a(text.as_bytes());
        if let Some(existing) = self.strings.find_string(self, text, hash) {
            return existing;
        }
        let r = self.alloc(ObjData::Str(LoxString { chars: text.to_string(), hash }));
        self.strings.set(r, hash, ());
        r
    }

    pub fn alloc_function(&mut self, f: FunctionObj) -> ObjRef {
        self.alloc(ObjData::Function(f))
    }

    pub fn alloc_closure(&mut self, c: ClosureObj) -> ObjRef {
        self.alloc(ObjData::Closure(c))
    }

    pub fn alloc_upvalue(&mut self, u: UpvalueObj) -> ObjRef {
        self.alloc(ObjData::Upvalue(u))
    }

    pub fn alloc_native(&mut self, n: NativeObj) -> ObjRef {
        self.alloc(ObjData::Native(n))
    }

    pub fn alloc_class(&mut self, c: ClassObj) -> ObjRef {
        self.alloc(ObjData::Class(c))
    }

    pub fn alloc_instance(&mut self, i: InstanceObj) -> ObjRef {
        self.alloc(ObjData::Instance(i))
    }

    pub fn alloc_bound_method(&mut self, b: BoundMethodObj) -> ObjRef {
        self.alloc(ObjData::BoundMethod(b))
    }

    // --- GC -----------------------------------------------------------

    pub fn mark_object(&mut self, r: ObjRef) {
        let slot = self.slots[r.0].as_mut().expect("dangling ObjRef");
        if slot.marked {
            return;
        }
        slot.marked = true;
        self.gray_stack.push(r);
    }

    pub fn mark_value(&mut self, v: Value) {
        if let Value::Obj(r) = v {
            self.mark_object(r);
        }
    }

    pub fn is_marked(&self, r: ObjRef) -> bool {
        self.slots[r.0].as_ref().map(|s| s.marked).unwrap_or(false)
    }

    /// Pops the gray worklist and blackens every object it references.
    /// Driven by the VM after all roots are marked.
    pub fn trace_references(&mut self) {
        while let Some(r) = self.gray_stack.pop() {
            self.blacken(r);
        }
    }

    fn blacken(&mut self, r: ObjRef) {
        // Clone out the small set of references each variant holds so we
        // don't hold a borrow of `self` while recursively marking.
        enum Refs {
            None,
            One(ObjRef),
            Two(ObjRef, ObjRef),
            Value(Value),
            Closure(ObjRef, Vec<ObjRef>),
            Class(ObjRef, Vec<ObjRef>),
            Instance(ObjRef, Vec<(ObjRef, Value)>),
            Function(Option<ObjRef>, Vec<Value>),
            Bound(Value, ObjRef),
        }

        let refs = match self.get(r) {
            ObjData::Str(_) | ObjData::Native(_) => Refs::None,
            ObjData::Upvalue(UpvalueObj::Closed(v)) => Refs::Value(*v),
            ObjData::Upvalue(UpvalueObj::Open(_)) => Refs::None,
            ObjData::BoundMethod(b) => Refs::Bound(b.receiver, b.method),
            ObjData::Closure(c) => Refs::Closure(c.function, c.upvalues.clone()),
            ObjData::Class(c) => {
                let methods: Vec<ObjRef> = c.methods.iter().map(|(_, v)| *v).collect();
                Refs::Class(c.name, methods)
            }
            ObjData::Instance(i) => {
                let fields: Vec<(ObjRef, Value)> = i.fields.iter().map(|(k, v)| (k, *v)).collect();
                Refs::Instance(i.class, fields)
            }
            ObjData::Function(f) => Refs::Function(f.name, f.chunk.constants.clone()),
        };

        match refs {
            Refs::None => {}
            Refs::One(a) => self.mark_object(a),
            Refs::Two(a, b) => {
                self.mark_object(a);
                self.mark_object(b);
            }
            Refs::Value(v) => self.mark_value(v),
            Refs::Bound(recv, method) => {
                self.mark_value(recv);
                self.mark_object(method);
            }
            Refs::Closure(func, ups) => {
                self.mark_object(func);
                for u in ups {
                    self.mark_object(u);
                }
            }
            Refs::Class(name, methods) => {
                self.mark_object(name);
                // Also mark the class's own method-table keys (names).
                let keys: Vec<ObjRef> = match self.get(r) {
                    ObjData::Class(c) => c.methods.iter().map(|(k, _)| k).collect(),
                    _ => unreachable!(),
                };
                for k in keys {
                    self.mark_object(k);
                }
                for m in methods {
                    self.mark_object(m);
                }
            }
            Refs::Instance(class, fields) => {
                self.mark_object(class);
                for (k, v) in fields {
                    self.mark_object(k);
                    self.mark_value(v);
                }
            }
            Refs::Function(name, constants) => {
                if let Some(n) = name {
                    self.mark_object(n);
                }
                for c in constants {
                    self.mark_value(c);
                }
            }
        }
    }

    /// Drops intern-table entries whose key string is unmarked, breaking
    /// the weak reference before sweep frees the dead string.
    pub fn clean_intern_table(&mut self) {
        let dead: Vec<ObjRef> =
            self.strings.iter().map(|(k, _)| k).filter(|k| !self.is_marked(*k)).collect();
        let mut strings = std::mem::take(&mut self.strings);
        for k in &dead {
            strings.delete(self, *k);
        }
        self.strings = strings;
    }

    /// Frees every unmarked object and clears the mark bit on survivors.
    pub fn sweep(&mut self) {
        for index in 0..self.slots.len() {
            let free_this = match &self.slots[index] {
                Some(slot) if !slot.marked => true,
                Some(_) => false,
                None => false,
            };
            if free_this {
                let slot = self.slots[index].take().unwrap();
                self.bytes_allocated -= slot.data.approx_size();
                self.free_slots.push(index);
            } else if let Some(slot) = &mut self.slots[index] {
                slot.marked = false;
            }
        }
    }

    pub fn print_object(&self, r: ObjRef) -> String {
        match self.get(r) {
            ObjData::Str(s) => s.chars.clone(),
            ObjData::Function(f) => match f.name {
                Some(n) => format!("<fn {}>", self.as_str(n)),
                None => "<script>".to_string(),
            },
            ObjData::Closure(c) => self.print_object(c.function),
            ObjData::Upvalue(_) => "upvalue".to_string(),
            ObjData::Native(_) => "<native fn>".to_string(),
            ObjData::Class(c) => self.as_str(c.name).to_string(),
            ObjData::Instance(i) => {
                let class_name = match self.get(i.class) {
                    ObjData::Class(c) => self.as_str(c.name),
                    _ => "?",
                };
                format!("{} instance", class_name)
            }
            ObjData::BoundMethod(b) => self.print_object(b.method),
        }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjRef({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_gives_reference_equality() {
        let mut heap = Heap::new();
        let a = heap.intern_string("hello");
        let b = heap.intern_string("hello");
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_content_interns_separately() {
        let mut heap = Heap::new();
        let a = heap.intern_string("a");
        let b = heap.intern_string("b");
        assert_ne!(a, b);
    }

    #[test]
    fn sweep_frees_unmarked_and_keeps_marked() {
        let mut heap = Heap::new();
        let a = heap.intern_string("keep");
        let b = heap.intern_string("drop");
        heap.mark_object(a);
        heap.trace_references();
        heap.clean_intern_table();
        heap.sweep();
        assert!(heap.strings.find_string(&heap, "keep", heap.string_hash(a)).is_some());
        assert_eq!(heap.free_slots.len(), 1);
        let _ = b;
    }
}
