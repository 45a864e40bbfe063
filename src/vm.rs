// File: src/vm.rs
//
// Stack-based bytecode VM: decode-and-switch dispatch over a flat value
// stack and a bounded call-frame stack. Owns the heap the compiler
// allocates into, so a single `Vm` is the whole runtime for one program.

use std::io::Write;
use std::time::Instant;

use crate::chunk::OpCode;
use crate::compiler;
use crate::errors::{InterpretResult, RuntimeError, TraceFrame};
use crate::object::{
    BoundMethodObj, ClassObj, ClosureObj, Heap, InstanceObj, NativeFn, NativeObj, ObjData, ObjRef,
    UpvalueObj,
};
use crate::table::Table;
use crate::value::Value;

const FRAMES_MAX: usize = 64;

struct CallFrame {
    closure: ObjRef,
    ip: usize,
    slot_base: usize,
}

pub struct Vm {
    heap: Heap,
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: Table<Value>,
    /// Open upvalues sorted by descending stack slot, no duplicates — the
    /// set of live closures-over-locals that still track a stack address.
    open_upvalues: Vec<ObjRef>,
    init_string: ObjRef,
    output: Box<dyn Write>,
    start: Instant,
}

impl Vm {
    pub fn new() -> Self {
        Self::with_output(Box::new(std::io::stdout()))
    }

    /// Builds a VM that writes `print` output to an arbitrary sink instead
    /// of stdout — what the integration tests use to assert on program
    /// output.
    pub fn with_output(output: Box<dyn Write>) -> Self {
        let mut heap = Heap::new();
        let init_string = heap.intern_string("init");
        let mut vm = Self {
            heap,
            stack: Vec::with_capacity(FRAMES_MAX * 256),
            frames: Vec::with_capacity(FRAMES_MAX),
            globals: Table::new(),
            open_upvalues: Vec::new(),
            init_string,
            output,
            start: Instant::now(),
        };
        vm.define_native("clock", native_clock);
        vm
    }

    fn define_native(&mut self, name: &str, f: NativeFn) {
        let name_ref = self.heap.intern_string(name);
        let native_ref = self.heap.alloc_native(NativeObj { name: name.to_string(), function: f });
        let hash = self.heap.string_hash(name_ref);
        self.globals.set(name_ref, hash, Value::Obj(native_ref));
    }

    pub fn interpret(&mut self, source: &str) -> InterpretResult {
        let function_ref = match compiler::compile(source, &mut self.heap) {
            Ok(f) => f,
            Err(errors) => {
                for e in &errors {
                    e.print();
                }
                return InterpretResult::CompileError(errors);
            }
        };

        self.stack.clear();
        self.frames.clear();
        self.open_upvalues.clear();

        let closure_ref = self.heap.alloc_closure(ClosureObj { function: function_ref, upvalues: Vec::new() });
        self.push(Value::Obj(closure_ref));
        self.frames.push(CallFrame { closure: closure_ref, ip: 0, slot_base: 0 });

        match self.run() {
            Ok(()) => InterpretResult::Ok,
            Err(err) => {
                err.print();
                InterpretResult::RuntimeError(err)
            }
        }
    }

    // --- stack helpers ----------------------------------------------------

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("stack underflow")
    }

    fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    // --- bytecode reading ---------------------------------------------------

    fn current_closure(&self) -> ObjRef {
        self.frames.last().unwrap().closure
    }

    fn current_function(&self) -> ObjRef {
        match self.heap.get(self.current_closure()) {
            ObjData::Closure(c) => c.function,
            _ => unreachable!(),
        }
    }

    fn read_byte(&mut self) -> u8 {
        let ip = self.frames.last().unwrap().ip;
        let function_ref = self.current_function();
        let byte = match self.heap.get(function_ref) {
            ObjData::Function(f) => f.chunk.code[ip],
            _ => unreachable!(),
        };
        self.frames.last_mut().unwrap().ip += 1;
        byte
    }

    fn read_u16(&mut self) -> u16 {
        let hi = self.read_byte() as u16;
        let lo = self.read_byte() as u16;
        (hi << 8) | lo
    }

    fn read_constant(&mut self) -> Value {
        let idx = self.read_byte();
        let function_ref = self.current_function();
        match self.heap.get(function_ref) {
            ObjData::Function(f) => f.chunk.constants[idx as usize],
            _ => unreachable!(),
        }
    }

    fn read_string(&mut self) -> ObjRef {
        self.read_constant().as_obj().expect("constant is not a string")
    }

    // --- errors -------------------------------------------------------------

    fn runtime_error(&self, message: &str) -> RuntimeError {
        let mut trace = Vec::new();
        for frame in self.frames.iter().rev() {
            let function_ref = match self.heap.get(frame.closure) {
                ObjData::Closure(c) => c.function,
                _ => unreachable!(),
            };
            match self.heap.get(function_ref) {
                ObjData::Function(f) => {
                    let line_idx = frame.ip.saturating_sub(1).min(f.chunk.lines.len().saturating_sub(1));
                    let line = f.chunk.lines.get(line_idx).copied().unwrap_or(0);
                    let name = match f.name {
                        Some(n) => self.heap.as_str(n).to_string(),
                        None => "script".to_string(),
                    };
                    trace.push(TraceFrame { line, function_name: name });
                }
                _ => unreachable!(),
            }
        }
        RuntimeError { message: message.to_string(), trace }
    }

    /// The pinned "Undefined variable 'x'." message, with a "Did you mean
    /// 'y'?" suggestion appended when a close global name exists.
    fn undefined_variable_message(&self, name: ObjRef) -> String {
        let target = self.heap.as_str(name);
        let mut message = format!("Undefined variable '{}'.", target);
        let candidates: Vec<String> =
            self.globals.iter().map(|(k, _)| self.heap.as_str(k).to_string()).collect();
        if let Some(closest) = crate::errors::find_closest_match(target, &candidates) {
            message.push_str(&format!(" Did you mean '{}'?", closest));
        }
        message
    }

    // --- upvalues -------------------------------------------------------------

    fn capture_upvalue(&mut self, abs_slot: usize) -> ObjRef {
        let mut insert_at = self.open_upvalues.len();
        for (i, &uv_ref) in self.open_upvalues.iter().enumerate() {
            let slot = match self.heap.get(uv_ref) {
                ObjData::Upvalue(UpvalueObj::Open(s)) => *s,
                _ => unreachable!(),
            };
            if slot == abs_slot {
                return uv_ref;
            }
            if slot < abs_slot {
                insert_at = i;
                break;
            }
        }
        let created = self.heap.alloc_upvalue(UpvalueObj::Open(abs_slot));
        self.open_upvalues.insert(insert_at, created);
        created
    }

    fn close_upvalues(&mut self, from_slot: usize) {
        while let Some(&top_ref) = self.open_upvalues.first() {
            let slot = match self.heap.get(top_ref) {
                ObjData::Upvalue(UpvalueObj::Open(s)) => *s,
                _ => unreachable!(),
            };
            if slot < from_slot {
                break;
            }
            let value = self.stack[slot];
            if let ObjData::Upvalue(u) = self.heap.get_mut(top_ref) {
                *u = UpvalueObj::Closed(value);
            }
            self.open_upvalues.remove(0);
        }
    }

    // --- calls ----------------------------------------------------------------

    fn call_value(&mut self, callee: Value, argc: u8) -> Result<(), RuntimeError> {
        let r = match callee {
            Value::Obj(r) => r,
            _ => return Err(self.runtime_error("Can only call functions and classes.")),
        };
        enum Kind {
            Closure,
            Native,
            Class,
            Bound,
        }
        let kind = match self.heap.get(r) {
            ObjData::Closure(_) => Kind::Closure,
            ObjData::Native(_) => Kind::Native,
            ObjData::Class(_) => Kind::Class,
            ObjData::BoundMethod(_) => Kind::Bound,
            _ => return Err(self.runtime_error("Can only call functions and classes.")),
        };
        match kind {
            Kind::Closure => self.call(r, argc),
            Kind::Native => self.call_native(r, argc),
            Kind::Class => self.instantiate(r, argc),
            Kind::Bound => self.call_bound_method(r, argc),
        }
    }

    fn call(&mut self, closure_ref: ObjRef, argc: u8) -> Result<(), RuntimeError> {
        let function_ref = match self.heap.get(closure_ref) {
            ObjData::Closure(c) => c.function,
            _ => unreachable!(),
        };
        let arity = match self.heap.get(function_ref) {
            ObjData::Function(f) => f.arity,
            _ => unreachable!(),
        };
        if argc != arity {
            let message = format!("Expected {} arguments but got {}.", arity, argc);
            return Err(self.runtime_error(&message));
        }
        if self.frames.len() >= FRAMES_MAX {
            return Err(self.runtime_error("Stack overflow."));
        }
        let slot_base = self.stack.len() - argc as usize - 1;
        self.frames.push(CallFrame { closure: closure_ref, ip: 0, slot_base });
        Ok(())
    }

    fn call_native(&mut self, native_ref: ObjRef, argc: u8) -> Result<(), RuntimeError> {
        let f = match self.heap.get(native_ref) {
            ObjData::Native(n) => n.function,
            _ => unreachable!(),
        };
        let start = self.stack.len() - argc as usize;
        let args: Vec<Value> = self.stack[start..].to_vec();
        let result = f(&args, self.start);
        self.stack.truncate(start - 1);
        self.push(result);
        Ok(())
    }

    fn instantiate(&mut self, class_ref: ObjRef, argc: u8) -> Result<(), RuntimeError> {
        let instance_ref = self.heap.alloc_instance(InstanceObj { class: class_ref, fields: Table::new() });
        let base = self.stack.len() - argc as usize - 1;
        self.stack[base] = Value::Obj(instance_ref);

        let init_name = self.init_string;
        let init_method = match self.heap.get(class_ref) {
            ObjData::Class(c) => c.methods.get(&self.heap, init_name).copied(),
            _ => unreachable!(),
        };
        match init_method {
            Some(m) => self.call(m, argc),
            None => {
                if argc != 0 {
                    let message = format!("Expected 0 arguments but got {}.", argc);
                    return Err(self.runtime_error(&message));
                }
                Ok(())
            }
        }
    }

    fn call_bound_method(&mut self, bound_ref: ObjRef, argc: u8) -> Result<(), RuntimeError> {
        let (receiver, method_ref) = match self.heap.get(bound_ref) {
            ObjData::BoundMethod(b) => (b.receiver, b.method),
            _ => unreachable!(),
        };
        let base = self.stack.len() - argc as usize - 1;
        self.stack[base] = receiver;
        self.call(method_ref, argc)
    }

    fn bind_method(&mut self, class_ref: ObjRef, name: ObjRef) -> Result<(), RuntimeError> {
        let method_ref = match self.heap.get(class_ref) {
            ObjData::Class(c) => c.methods.get(&self.heap, name).copied(),
            _ => unreachable!(),
        };
        let method_ref = match method_ref {
            Some(m) => m,
            None => {
                let message = format!("Undefined property '{}'.", self.heap.as_str(name));
                return Err(self.runtime_error(&message));
            }
        };
        let receiver = self.peek(0);
        let bound_ref = self.heap.alloc_bound_method(BoundMethodObj { receiver, method: method_ref });
        self.pop();
        self.push(Value::Obj(bound_ref));
        Ok(())
    }

    fn invoke(&mut self, name: ObjRef, argc: u8) -> Result<(), RuntimeError> {
        let receiver = self.peek(argc as usize);
        let instance_ref = match receiver {
            Value::Obj(r) if matches!(self.heap.get(r), ObjData::Instance(_)) => r,
            _ => return Err(self.runtime_error("Only instances have methods.")),
        };
        let field = match self.heap.get(instance_ref) {
            ObjData::Instance(i) => i.fields.get(&self.heap, name).copied(),
            _ => unreachable!(),
        };
        if let Some(value) = field {
            let base = self.stack.len() - argc as usize - 1;
            self.stack[base] = value;
            return self.call_value(value, argc);
        }
        let class_ref = match self.heap.get(instance_ref) {
            ObjData::Instance(i) => i.class,
            _ => unreachable!(),
        };
        self.invoke_from_class(class_ref, name, argc)
    }

    fn invoke_from_class(&mut self, class_ref: ObjRef, name: ObjRef, argc: u8) -> Result<(), RuntimeError> {
        let method_ref = match self.heap.get(class_ref) {
            ObjData::Class(c) => c.methods.get(&self.heap, name).copied(),
            _ => unreachable!(),
        };
        match method_ref {
            Some(m) => self.call(m, argc),
            None => {
                let message = format!("Undefined property '{}'.", self.heap.as_str(name));
                Err(self.runtime_error(&message))
            }
        }
    }

    fn define_method(&mut self, name_ref: ObjRef) {
        let method = self.pop();
        let method_ref = method.as_obj().expect("method is not a closure");
        let hash = self.heap.string_hash(name_ref);
        let class_ref = self.peek(0).as_obj().expect("class is not an object");
        if let ObjData::Class(c) = self.heap.get_mut(class_ref) {
            c.methods.set(name_ref, hash, method_ref);
        }
    }

    // --- binary op helpers -------------------------------------------------

    fn binary_number_op(&mut self, f: impl Fn(f64, f64) -> f64) -> Result<(), RuntimeError> {
        let b = self.peek(0).as_number();
        let a = self.peek(1).as_number();
        match (a, b) {
            (Some(a), Some(b)) => {
                self.pop();
                self.pop();
                self.push(Value::Number(f(a, b)));
                Ok(())
            }
            _ => Err(self.runtime_error("Operands must be numbers.")),
        }
    }

    fn binary_number_cmp(&mut self, f: impl Fn(f64, f64) -> bool) -> Result<(), RuntimeError> {
        let b = self.peek(0).as_number();
        let a = self.peek(1).as_number();
        match (a, b) {
            (Some(a), Some(b)) => {
                self.pop();
                self.pop();
                self.push(Value::Bool(f(a, b)));
                Ok(())
            }
            _ => Err(self.runtime_error("Operands must be numbers.")),
        }
    }

    // --- dispatch loop -------------------------------------------------------

    fn run(&mut self) -> Result<(), RuntimeError> {
        loop {
            if self.heap.should_collect() {
                self.collect_garbage();
            }

            let op = OpCode::from_byte(self.read_byte());
            match op {
                OpCode::Constant => {
                    let v = self.read_constant();
                    self.push(v);
                }
                OpCode::Nil => self.push(Value::Nil),
                OpCode::True => self.push(Value::Bool(true)),
                OpCode::False => self.push(Value::Bool(false)),
                OpCode::Pop => {
                    self.pop();
                }
                OpCode::GetLocal => {
                    let slot = self.read_byte();
                    let base = self.frames.last().unwrap().slot_base;
                    self.push(self.stack[base + slot as usize]);
                }
                OpCode::SetLocal => {
                    let slot = self.read_byte();
                    let base = self.frames.last().unwrap().slot_base;
                    self.stack[base + slot as usize] = self.peek(0);
                }
                OpCode::GetGlobal => {
                    let name = self.read_string();
                    match self.globals.get(&self.heap, name).copied() {
                        Some(v) => self.push(v),
                        None => {
                            let message = self.undefined_variable_message(name);
                            return Err(self.runtime_error(&message));
                        }
                    }
                }
                OpCode::DefineGlobal => {
                    let name = self.read_string();
                    let hash = self.heap.string_hash(name);
                    let value = self.peek(0);
                    self.globals.set(name, hash, value);
                    self.pop();
                }
                OpCode::SetGlobal => {
                    let name = self.read_string();
                    let hash = self.heap.string_hash(name);
                    let value = self.peek(0);
                    if self.globals.set(name, hash, value) {
                        self.globals.delete(&self.heap, name);
                        let message = self.undefined_variable_message(name);
                        return Err(self.runtime_error(&message));
                    }
                }
                OpCode::GetUpvalue => {
                    let idx = self.read_byte();
                    let closure_ref = self.current_closure();
                    let uv_ref = match self.heap.get(closure_ref) {
                        ObjData::Closure(c) => c.upvalues[idx as usize],
                        _ => unreachable!(),
                    };
                    let value = match self.heap.get(uv_ref) {
                        ObjData::Upvalue(UpvalueObj::Open(slot)) => self.stack[*slot],
                        ObjData::Upvalue(UpvalueObj::Closed(v)) => *v,
                        _ => unreachable!(),
                    };
                    self.push(value);
                }
                OpCode::SetUpvalue => {
                    let idx = self.read_byte();
                    let closure_ref = self.current_closure();
                    let uv_ref = match self.heap.get(closure_ref) {
                        ObjData::Closure(c) => c.upvalues[idx as usize],
                        _ => unreachable!(),
                    };
                    let value = self.peek(0);
                    let open_slot = match self.heap.get(uv_ref) {
                        ObjData::Upvalue(UpvalueObj::Open(slot)) => Some(*slot),
                        _ => None,
                    };
                    match open_slot {
                        Some(slot) => self.stack[slot] = value,
                        None => {
                            if let ObjData::Upvalue(u) = self.heap.get_mut(uv_ref) {
                                *u = UpvalueObj::Closed(value);
                            }
                        }
                    }
                }
                OpCode::GetProperty => {
                    let name = self.read_string();
                    let receiver = self.peek(0);
                    let instance_ref = match receiver {
                        Value::Obj(r) if matches!(self.heap.get(r), ObjData::Instance(_)) => r,
                        _ => return Err(self.runtime_error("Only instances have properties.")),
                    };
                    let field = match self.heap.get(instance_ref) {
                        ObjData::Instance(i) => i.fields.get(&self.heap, name).copied(),
                        _ => unreachable!(),
                    };
                    if let Some(v) = field {
                        self.pop();
                        self.push(v);
                    } else {
                        let class_ref = match self.heap.get(instance_ref) {
                            ObjData::Instance(i) => i.class,
                            _ => unreachable!(),
                        };
                        self.bind_method(class_ref, name)?;
                    }
                }
                OpCode::SetProperty => {
                    let name = self.read_string();
                    let receiver = self.peek(1);
                    let instance_ref = match receiver {
                        Value::Obj(r) if matches!(self.heap.get(r), ObjData::Instance(_)) => r,
                        _ => return Err(self.runtime_error("Only instances have fields.")),
                    };
                    let value = self.peek(0);
                    let hash = self.heap.string_hash(name);
                    if let ObjData::Instance(i) = self.heap.get_mut(instance_ref) {
                        i.fields.set(name, hash, value);
                    }
                    let value = self.pop();
                    self.pop();
                    self.push(value);
                }
                OpCode::GetSuper => {
                    let name = self.read_string();
                    let superclass = self.pop();
                    let class_ref = superclass.as_obj().expect("superclass is not an object");
                    self.bind_method(class_ref, name)?;
                }
                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(a == b));
                }
                OpCode::Greater => self.binary_number_cmp(|a, b| a > b)?,
                OpCode::Less => self.binary_number_cmp(|a, b| a < b)?,
                OpCode::Add => {
                    let b = self.peek(0);
                    let a = self.peek(1);
                    if a.is_string(&self.heap) && b.is_string(&self.heap) {
                        self.pop();
                        self.pop();
                        let a_str = self.heap.as_str(a.as_obj().unwrap()).to_string();
                        let b_str = self.heap.as_str(b.as_obj().unwrap()).to_string();
                        let r = self.heap.intern_string(&format!("{a_str}{b_str}"));
                        self.push(Value::Obj(r));
                    } else if let (Some(an), Some(bn)) = (a.as_number(), b.as_number()) {
                        self.pop();
                        self.pop();
                        self.push(Value::Number(an + bn));
                    } else {
                        return Err(self.runtime_error("Operands must be two numbers or two strings."));
                    }
                }
                OpCode::Subtract => self.binary_number_op(|a, b| a - b)?,
                OpCode::Multiply => self.binary_number_op(|a, b| a * b)?,
                OpCode::Divide => self.binary_number_op(|a, b| a / b)?,
                OpCode::Not => {
                    let v = self.pop();
                    self.push(Value::Bool(v.is_falsey()));
                }
                OpCode::Negate => match self.peek(0).as_number() {
                    Some(n) => {
                        self.pop();
                        self.push(Value::Number(-n));
                    }
                    None => return Err(self.runtime_error("Operand must be a number.")),
                },
                OpCode::Print => {
                    let v = self.pop();
                    let _ = writeln!(self.output, "{}", v.print_string(&self.heap));
                }
                OpCode::Jump => {
                    let offset = self.read_u16();
                    self.frames.last_mut().unwrap().ip += offset as usize;
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_u16();
                    if self.peek(0).is_falsey() {
                        self.frames.last_mut().unwrap().ip += offset as usize;
                    }
                }
                OpCode::Loop => {
                    let offset = self.read_u16();
                    self.frames.last_mut().unwrap().ip -= offset as usize;
                }
                OpCode::Call => {
                    let argc = self.read_byte();
                    let callee = self.peek(argc as usize);
                    self.call_value(callee, argc)?;
                }
                OpCode::Invoke => {
                    let name = self.read_string();
                    let argc = self.read_byte();
                    self.invoke(name, argc)?;
                }
                OpCode::SuperInvoke => {
                    let name = self.read_string();
                    let argc = self.read_byte();
                    let superclass = self.pop();
                    let class_ref = superclass.as_obj().expect("superclass is not an object");
                    self.invoke_from_class(class_ref, name, argc)?;
                }
                OpCode::Closure => {
                    let func_val = self.read_constant();
                    let function_ref = func_val.as_obj().expect("constant is not a function");
                    let upvalue_count = match self.heap.get(function_ref) {
                        ObjData::Function(f) => f.upvalue_count,
                        _ => unreachable!(),
                    };
                    let mut upvalues = Vec::with_capacity(upvalue_count as usize);
                    for _ in 0..upvalue_count {
                        let is_local = self.read_byte();
                        let index = self.read_byte();
                        if is_local != 0 {
                            let abs_slot = self.frames.last().unwrap().slot_base + index as usize;
                            upvalues.push(self.capture_upvalue(abs_slot));
                        } else {
                            let enclosing = self.current_closure();
                            let uv = match self.heap.get(enclosing) {
                                ObjData::Closure(c) => c.upvalues[index as usize],
                                _ => unreachable!(),
                            };
                            upvalues.push(uv);
                        }
                    }
                    let closure_ref = self.heap.alloc_closure(ClosureObj { function: function_ref, upvalues });
                    self.push(Value::Obj(closure_ref));
                }
                OpCode::CloseUpvalue => {
                    let top = self.stack.len() - 1;
                    self.close_upvalues(top);
                    self.pop();
                }
                OpCode::Return => {
                    let result = self.pop();
                    let slot_base = self.frames.last().unwrap().slot_base;
                    self.close_upvalues(slot_base);
                    self.frames.pop();
                    if self.frames.is_empty() {
                        self.pop();
                        return Ok(());
                    }
                    self.stack.truncate(slot_base);
                    self.push(result);
                }
                OpCode::Class => {
                    let name = self.read_string();
                    let class_ref = self.heap.alloc_class(ClassObj { name, methods: Table::new() });
                    self.push(Value::Obj(class_ref));
                }
                OpCode::Inherit => {
                    let superclass_val = self.peek(1);
                    let subclass_val = self.peek(0);
                    let super_ref = match superclass_val {
                        Value::Obj(r) if matches!(self.heap.get(r), ObjData::Class(_)) => r,
                        _ => return Err(self.runtime_error("Superclass must be a class.")),
                    };
                    let sub_ref = subclass_val.as_obj().expect("subclass is not an object");
                    let entries: Vec<(ObjRef, u32, ObjRef)> = match self.heap.get(super_ref) {
                        ObjData::Class(c) => {
                            c.methods.iter().map(|(k, v)| (k, self.heap.string_hash(k), *v)).collect()
                        }
                        _ => unreachable!(),
                    };
                    if let ObjData::Class(sub) = self.heap.get_mut(sub_ref) {
                        for (k, h, v) in entries {
                            sub.methods.set(k, h, v);
                        }
                    }
                    self.pop();
                }
                OpCode::Method => {
                    let name = self.read_string();
                    self.define_method(name);
                }
            }
        }
    }

    fn collect_garbage(&mut self) {
        for &v in &self.stack {
            self.heap.mark_value(v);
        }
        for frame in &self.frames {
            self.heap.mark_object(frame.closure);
        }
        for &uv in &self.open_upvalues {
            self.heap.mark_object(uv);
        }
        let global_entries: Vec<(ObjRef, Value)> = self.globals.iter().map(|(k, v)| (k, *v)).collect();
        for (k, v) in global_entries {
            self.heap.mark_object(k);
            self.heap.mark_value(v);
        }
        self.heap.mark_object(self.init_string);

        self.heap.trace_references();
        self.heap.clean_intern_table();
        self.heap.sweep();
        self.heap.next_gc = self.heap.bytes_allocated * 2;
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

fn native_clock(_args: &[Value], start: Instant) -> Value {
    Value::Number(start.elapsed().as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Clone)]
    struct SharedBuf(Rc<RefCell<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn run_source(source: &str) -> (InterpretResult, String) {
        let buf = Rc::new(RefCell::new(Vec::new()));
        let mut vm = Vm::with_output(Box::new(SharedBuf(buf.clone())));
        let result = vm.interpret(source);
        let output = String::from_utf8(buf.borrow().clone()).unwrap();
        (result, output)
    }

    #[test]
    fn arithmetic_precedence() {
        let (result, output) = run_source("print 1 + 2 * 3;");
        assert!(matches!(result, InterpretResult::Ok));
        assert_eq!(output, "7\n");
    }

    #[test]
    fn string_concatenation() {
        let (_, output) = run_source(r#"print "foo" + "bar";"#);
        assert_eq!(output, "foobar\n");
    }

    #[test]
    fn closures_capture_locals_by_reference() {
        let (_, output) = run_source(
            r#"
            fun counter() {
                var i = 0;
                fun inc() {
                    i = i + 1;
                    return i;
                }
                return inc;
            }
            var c = counter();
            print c();
            print c();
            print c();
            "#,
        );
        assert_eq!(output, "1\n2\n3\n");
    }

    #[test]
    fn class_and_inheritance_with_super() {
        let (result, output) = run_source(
            r#"
            class Animal {
                init(name) {
                    this.name = name;
                }
                speak() {
                    return "...";
                }
            }
            class Dog < Animal {
                init(name) {
                    super.init(name);
                }
                speak() {
                    return this.name + " says woof";
                }
            }
            var d = Dog("Rex");
            print d.speak();
            "#,
        );
        assert!(matches!(result, InterpretResult::Ok));
        assert_eq!(output, "Rex says woof\n");
    }

    #[test]
    fn undefined_variable_is_runtime_error() {
        let (result, _) = run_source("print nope;");
        assert!(matches!(result, InterpretResult::RuntimeError(_)));
        if let InterpretResult::RuntimeError(e) = result {
            assert!(e.message.contains("Undefined variable"));
        }
    }

    #[test]
    fn clock_returns_nonnegative_number() {
        let (result, output) = run_source("print clock() >= 0;");
        assert!(matches!(result, InterpretResult::Ok));
        assert_eq!(output, "true\n");
    }

    #[test]
    fn clock_measures_elapsed_time_not_unix_epoch() {
        // A fresh VM's clock() is seconds since its own construction, not
        // seconds since 1970 — it must stay far below any epoch-scale value.
        let (result, output) = run_source("print clock() < 1000.0;");
        assert!(matches!(result, InterpretResult::Ok));
        assert_eq!(output, "true\n");
    }
}
