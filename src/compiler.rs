// File: src/compiler.rs
//
// Single-pass Pratt parser that emits bytecode directly — there is no
// intermediate AST. Locals, upvalues and classes are resolved as tokens
// are consumed; the only "tree" that ever exists is the stack of
// `FunctionFrame`s mirroring the lexical nesting of `fun` bodies.

use crate::chunk::{Chunk, OpCode};
use crate::errors::CompileError;
use crate::lexer::{Scanner, Token, TokenKind};
use crate::object::{FunctionObj, Heap, ObjRef};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
enum Precedence {
    None,
    Assignment, // =
    Or,
    And,
    Equality,   // == !=
    Comparison, // < > <= >=
    Term,       // + -
    Factor,     // * /
    Unary,      // ! -
    Call,       // . ()
    Primary,
}

impl Precedence {
    fn next(self) -> Precedence {
        use Precedence::*;
        match self {
            None => Assignment,
            Assignment => Or,
            Or => And,
            And => Equality,
            Equality => Comparison,
            Comparison => Term,
            Term => Factor,
            Factor => Unary,
            Unary => Call,
            Call | Primary => Primary,
        }
    }
}

fn precedence_of(kind: TokenKind) -> Precedence {
    use TokenKind::*;
    match kind {
        Minus | Plus => Precedence::Term,
        Slash | Star => Precedence::Factor,
        BangEqual | EqualEqual => Precedence::Equality,
        Greater | GreaterEqual | Less | LessEqual => Precedence::Comparison,
        And => Precedence::And,
        Or => Precedence::Or,
        LeftParen | Dot => Precedence::Call,
        _ => Precedence::None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum FunctionType {
    Script,
    Function,
    Method,
    Initializer,
}

struct Local {
    name: String,
    /// -1 means declared but not yet initialized (its own initializer is
    /// still being compiled).
    depth: i32,
    is_captured: bool,
}

#[derive(Clone, Copy)]
struct UpvalueDesc {
    index: u8,
    is_local: bool,
}

struct FunctionFrame {
    kind: FunctionType,
    name: Option<String>,
    chunk: Chunk,
    arity: u8,
    locals: Vec<Local>,
    upvalues: Vec<UpvalueDesc>,
    scope_depth: i32,
}

impl FunctionFrame {
    fn new(kind: FunctionType, name: Option<String>) -> Self {
        // Slot 0 is reserved: "this" for methods/initializers (so ordinary
        // local resolution finds it), an empty placeholder for the callee
        // in free functions and the top-level script.
        let reserved_name =
            if matches!(kind, FunctionType::Method | FunctionType::Initializer) {
                "this".to_string()
            } else {
                String::new()
            };
        Self {
            kind,
            name,
            chunk: Chunk::new(),
            arity: 0,
            locals: vec![Local { name: reserved_name, depth: 0, is_captured: false }],
            upvalues: Vec::new(),
            scope_depth: 0,
        }
    }
}

struct ClassFrame {
    has_superclass: bool,
}

pub struct Compiler<'src, 'h> {
    scanner: Scanner<'src>,
    current: Token<'src>,
    previous: Token<'src>,
    had_error: bool,
    panic_mode: bool,
    errors: Vec<CompileError>,
    frames: Vec<FunctionFrame>,
    classes: Vec<ClassFrame>,
    heap: &'h mut Heap,
}

/// Compiles `source` into a top-level `Function` object (name = `None`,
/// printed as `<script>`). Returns every diagnostic collected if any
/// compile error occurred; the compiler never aborts mid-pass, so multiple
/// errors can surface from a single call.
pub fn compile(source: &str, heap: &mut Heap) -> Result<ObjRef, Vec<CompileError>> {
    let scanner = Scanner::new(source);
    let placeholder = Token { kind: TokenKind::Eof, lexeme: "", line: 1 };
    let mut compiler = Compiler {
        scanner,
        current: placeholder,
        previous: placeholder,
        had_error: false,
        panic_mode: false,
        errors: Vec::new(),
        frames: vec![FunctionFrame::new(FunctionType::Script, None)],
        classes: Vec::new(),
        heap,
    };

    compiler.advance();
    while !compiler.match_token(TokenKind::Eof) {
        compiler.declaration();
    }

    let (function_ref, _upvalues) = compiler.end_function();
    if compiler.had_error {
        Err(compiler.errors)
    } else {
        Ok(function_ref)
    }
}

impl<'src, 'h> Compiler<'src, 'h> {
    // --- token stream -------------------------------------------------

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.next_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            let message = self.current.lexeme.to_string();
            self.error_at_current(&message);
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn match_token(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.check(kind) {
            self.advance();
        } else {
            self.error_at_current(message);
        }
    }

    fn error_at_current(&mut self, message: &str) {
        let token = self.current;
        self.error_at(token, message);
    }

    fn error_at_previous(&mut self, message: &str) {
        let token = self.previous;
        self.error_at(token, message);
    }

    fn error_at(&mut self, token: Token<'src>, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;
        let at = if token.kind == TokenKind::Eof { String::new() } else { token.lexeme.to_string() };
        self.errors.push(CompileError { line: token.line, at: Some(at), message: message.to_string() });
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => self.advance(),
            }
        }
    }

    // --- bytecode emission ---------------------------------------------

    fn current_chunk(&mut self) -> &mut Chunk {
        &mut self.frames.last_mut().unwrap().chunk
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.current_chunk().write_byte(byte, line);
    }

    fn emit_op(&mut self, op: OpCode) {
        self.emit_byte(op as u8);
    }

    fn emit_u16(&mut self, value: u16) {
        let line = self.previous.line;
        self.current_chunk().write_u16(value, line);
    }

    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.current_chunk().code.len() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        let jump = self.current_chunk().code.len() - offset - 2;
        if jump > u16::MAX as usize {
            self.error_at_previous("Too much code to jump over.");
        }
        self.current_chunk().patch_u16(offset, jump as u16);
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(OpCode::Loop);
        let offset = self.current_chunk().code.len() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.error_at_previous("Loop body too large.");
        }
        self.emit_u16(offset as u16);
    }

    fn emit_return(&mut self) {
        let kind = self.frames.last().unwrap().kind;
        if kind == FunctionType::Initializer {
            self.emit_op(OpCode::GetLocal);
            self.emit_byte(0);
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.emit_op(OpCode::Return);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        let result = self.frames.last_mut().unwrap().chunk.add_constant(self.heap, value);
        match result {
            Ok(idx) => idx,
            Err(message) => {
                self.error_at_previous(message);
                0
            }
        }
    }

    fn emit_constant(&mut self, value: Value) {
        let idx = self.make_constant(value);
        self.emit_op(OpCode::Constant);
        self.emit_byte(idx);
    }

    fn identifier_constant(&mut self, name: &str) -> u8 {
        let r = self.heap.intern_string(name);
        self.make_constant(Value::Obj(r))
    }

    // --- scopes, locals, upvalues ---------------------------------------

    fn begin_scope(&mut self) {
        self.frames.last_mut().unwrap().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        let line = self.previous.line;
        let frame = self.frames.last_mut().unwrap();
        frame.scope_depth -= 1;
        let depth = frame.scope_depth;
        loop {
            let should_pop = matches!(frame.locals.last(), Some(local) if local.depth > depth);
            if !should_pop {
                break;
            }
            let local = frame.locals.pop().unwrap();
            if local.is_captured {
                frame.chunk.write_op(OpCode::CloseUpvalue, line);
            } else {
                frame.chunk.write_op(OpCode::Pop, line);
            }
        }
    }

    fn declare_variable(&mut self, name: &str) {
        let scope_depth = self.frames.last().unwrap().scope_depth;
        if scope_depth == 0 {
            return;
        }
        let duplicate = {
            let frame = self.frames.last().unwrap();
            let mut dup = false;
            for local in frame.locals.iter().rev() {
                if local.depth != -1 && local.depth < scope_depth {
                    break;
                }
                if local.name == name {
                    dup = true;
                    break;
                }
            }
            dup
        };
        if duplicate {
            self.error_at_previous("Already a variable with this name in this scope.");
            return;
        }
        self.add_local(name);
    }

    fn add_local(&mut self, name: &str) {
        let too_many = self.frames.last().unwrap().locals.len() >= 256;
        if too_many {
            self.error_at_previous("Too many local variables in function.");
            return;
        }
        self.frames.last_mut().unwrap().locals.push(Local {
            name: name.to_string(),
            depth: -1,
            is_captured: false,
        });
    }

    fn mark_initialized(&mut self) {
        let frame = self.frames.last_mut().unwrap();
        if frame.scope_depth == 0 {
            return;
        }
        let depth = frame.scope_depth;
        if let Some(local) = frame.locals.last_mut() {
            local.depth = depth;
        }
    }

    fn parse_variable(&mut self, message: &str) -> u8 {
        self.consume(TokenKind::Identifier, message);
        let name = self.previous.lexeme.to_string();
        self.declare_variable(&name);
        if self.frames.last().unwrap().scope_depth > 0 {
            return 0;
        }
        self.identifier_constant(&name)
    }

    fn define_variable(&mut self, global: u8) {
        if self.frames.last().unwrap().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_op(OpCode::DefineGlobal);
        self.emit_byte(global);
    }

    fn resolve_local(&mut self, frame_idx: usize, name: &str) -> Option<u8> {
        let found = {
            let frame = &self.frames[frame_idx];
            let mut result = None;
            for (i, local) in frame.locals.iter().enumerate().rev() {
                if local.name == name {
                    result = Some((i, local.depth != -1));
                    break;
                }
            }
            result
        };
        match found {
            Some((i, initialized)) => {
                if !initialized {
                    self.error_at_previous("Can't read local variable in its own initializer.");
                }
                Some(i as u8)
            }
            None => None,
        }
    }

    fn resolve_upvalue(&mut self, frame_idx: usize, name: &str) -> Option<u8> {
        if frame_idx == 0 {
            return None;
        }
        if let Some(local_idx) = self.resolve_local(frame_idx - 1, name) {
            self.frames[frame_idx - 1].locals[local_idx as usize].is_captured = true;
            return Some(self.add_upvalue(frame_idx, local_idx, true));
        }
        if let Some(upvalue_idx) = self.resolve_upvalue(frame_idx - 1, name) {
            return Some(self.add_upvalue(frame_idx, upvalue_idx, false));
        }
        None
    }

    fn add_upvalue(&mut self, frame_idx: usize, index: u8, is_local: bool) -> u8 {
        let existing = self.frames[frame_idx]
            .upvalues
            .iter()
            .position(|uv| uv.index == index && uv.is_local == is_local);
        if let Some(i) = existing {
            return i as u8;
        }
        if self.frames[frame_idx].upvalues.len() >= 256 {
            self.error_at_previous("Too many closure variables in function.");
            return 0;
        }
        self.frames[frame_idx].upvalues.push(UpvalueDesc { index, is_local });
        (self.frames[frame_idx].upvalues.len() - 1) as u8
    }

    fn named_variable(&mut self, name: &str, can_assign: bool) {
        let frame_idx = self.frames.len() - 1;
        let (get_op, set_op, arg) = if let Some(slot) = self.resolve_local(frame_idx, name) {
            (OpCode::GetLocal, OpCode::SetLocal, slot)
        } else if let Some(slot) = self.resolve_upvalue(frame_idx, name) {
            (OpCode::GetUpvalue, OpCode::SetUpvalue, slot)
        } else {
            let slot = self.identifier_constant(name);
            (OpCode::GetGlobal, OpCode::SetGlobal, slot)
        };

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_op(set_op);
            self.emit_byte(arg);
        } else {
            self.emit_op(get_op);
            self.emit_byte(arg);
        }
    }

    // --- declarations and statements ------------------------------------

    fn declaration(&mut self) {
        if self.match_token(TokenKind::Class) {
            self.class_declaration();
        } else if self.match_token(TokenKind::Fun) {
            self.fun_declaration();
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }
        if self.panic_mode {
            self.synchronize();
        }
    }

    fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect class name.");
        let class_name = self.previous.lexeme.to_string();
        let name_constant = self.identifier_constant(&class_name);
        self.declare_variable(&class_name);

        self.emit_op(OpCode::Class);
        self.emit_byte(name_constant);
        self.define_variable(name_constant);

        self.classes.push(ClassFrame { has_superclass: false });

        if self.match_token(TokenKind::Less) {
            self.consume(TokenKind::Identifier, "Expect superclass name.");
            let super_name = self.previous.lexeme.to_string();
            if super_name == class_name {
                self.error_at_previous("A class can't inherit from itself.");
            }
            self.named_variable(&super_name, false);

            self.begin_scope();
            self.add_local("super");
            self.define_variable(0);

            self.named_variable(&class_name, false);
            self.emit_op(OpCode::Inherit);
            self.classes.last_mut().unwrap().has_superclass = true;
        }

        self.named_variable(&class_name, false);
        self.consume(TokenKind::LeftBrace, "Expect '{' before class body.");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.method();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after class body.");
        self.emit_op(OpCode::Pop);

        if self.classes.last().unwrap().has_superclass {
            self.end_scope();
        }
        self.classes.pop();
    }

    fn method(&mut self) {
        self.consume(TokenKind::Identifier, "Expect method name.");
        let name = self.previous.lexeme.to_string();
        let constant = self.identifier_constant(&name);
        let kind = if name == "init" { FunctionType::Initializer } else { FunctionType::Method };
        self.function(kind);
        self.emit_op(OpCode::Method);
        self.emit_byte(constant);
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        self.mark_initialized();
        self.function(FunctionType::Function);
        self.define_variable(global);
    }

    fn function(&mut self, kind: FunctionType) {
        let name = self.previous.lexeme.to_string();
        self.frames.push(FunctionFrame::new(kind, Some(name)));
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                let arity = self.frames.last().unwrap().arity;
                if arity == 255 {
                    self.error_at_current("Can't have more than 255 parameters.");
                } else {
                    self.frames.last_mut().unwrap().arity += 1;
                }
                let constant = self.parse_variable("Expect parameter name.");
                self.define_variable(constant);
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();

        let (func_ref, upvalues) = self.end_function();
        let const_idx = self.make_constant(Value::Obj(func_ref));
        self.emit_op(OpCode::Closure);
        self.emit_byte(const_idx);
        for uv in upvalues {
            self.emit_byte(if uv.is_local { 1 } else { 0 });
            self.emit_byte(uv.index);
        }
    }

    fn end_function(&mut self) -> (ObjRef, Vec<UpvalueDesc>) {
        self.emit_return();
        let frame = self.frames.pop().unwrap();
        let name_ref = frame.name.as_deref().map(|n| self.heap.intern_string(n));
        let func = FunctionObj {
            arity: frame.arity,
            upvalue_count: frame.upvalues.len() as u8,
            chunk: frame.chunk,
            name: name_ref,
        };
        let func_ref = self.heap.alloc_function(func);
        (func_ref, frame.upvalues)
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");
        if self.match_token(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.consume(TokenKind::Semicolon, "Expect ';' after variable declaration.");
        self.define_variable(global);
    }

    fn statement(&mut self) {
        if self.match_token(TokenKind::Print) {
            self.print_statement();
        } else if self.match_token(TokenKind::For) {
            self.for_statement();
        } else if self.match_token(TokenKind::If) {
            self.if_statement();
        } else if self.match_token(TokenKind::Return) {
            self.return_statement();
        } else if self.match_token(TokenKind::While) {
            self.while_statement();
        } else if self.match_token(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit_op(OpCode::Print);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit_op(OpCode::Pop);
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();

        let else_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);

        if self.match_token(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.current_chunk().code.len();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");

        if self.match_token(TokenKind::Semicolon) {
            // no initializer
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.current_chunk().code.len();
        let mut exit_jump: Option<usize> = None;
        if !self.match_token(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }

        if !self.check(TokenKind::RightParen) {
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.current_chunk().code.len();
            self.expression();
            self.emit_op(OpCode::Pop);
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit_op(OpCode::Pop);
        }
        self.end_scope();
    }

    fn return_statement(&mut self) {
        if self.frames.last().unwrap().kind == FunctionType::Script {
            self.error_at_previous("Can't return from top-level code.");
        }
        if self.match_token(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            if self.frames.last().unwrap().kind == FunctionType::Initializer {
                self.error_at_previous("Can't return a value from an initializer.");
            }
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit_op(OpCode::Return);
        }
    }

    // --- expressions ------------------------------------------------------

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let can_assign = precedence <= Precedence::Assignment;
        let prefix_kind = self.previous.kind;
        self.prefix(prefix_kind, can_assign);

        while precedence <= precedence_of(self.current.kind) {
            self.advance();
            let infix_kind = self.previous.kind;
            self.infix(infix_kind, can_assign);
        }

        if can_assign && self.match_token(TokenKind::Equal) {
            self.error_at_previous("Invalid assignment target.");
        }
    }

    fn prefix(&mut self, kind: TokenKind, can_assign: bool) {
        match kind {
            TokenKind::LeftParen => self.grouping(),
            TokenKind::Minus | TokenKind::Bang => self.unary(kind),
            TokenKind::Number => self.number(),
            TokenKind::String => self.string(),
            TokenKind::False | TokenKind::True | TokenKind::Nil => self.literal(kind),
            TokenKind::Identifier => self.variable(can_assign),
            TokenKind::This => self.this_expr(),
            TokenKind::Super => self.super_expr(),
            _ => self.error_at_previous("Expect expression."),
        }
    }

    fn infix(&mut self, kind: TokenKind, can_assign: bool) {
        match kind {
            TokenKind::Minus
            | TokenKind::Plus
            | TokenKind::Slash
            | TokenKind::Star
            | TokenKind::BangEqual
            | TokenKind::EqualEqual
            | TokenKind::Greater
            | TokenKind::GreaterEqual
            | TokenKind::Less
            | TokenKind::LessEqual => self.binary(kind),
            TokenKind::And => self.and_expr(),
            TokenKind::Or => self.or_expr(),
            TokenKind::LeftParen => self.call(),
            TokenKind::Dot => self.dot(can_assign),
            _ => self.error_at_previous("Expect expression."),
        }
    }

    fn grouping(&mut self) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn unary(&mut self, kind: TokenKind) {
        self.parse_precedence(Precedence::Unary);
        match kind {
            TokenKind::Minus => self.emit_op(OpCode::Negate),
            TokenKind::Bang => self.emit_op(OpCode::Not),
            _ => unreachable!(),
        }
    }

    fn binary(&mut self, kind: TokenKind) {
        let next = precedence_of(kind).next();
        self.parse_precedence(next);
        match kind {
            TokenKind::BangEqual => {
                self.emit_op(OpCode::Equal);
                self.emit_op(OpCode::Not);
            }
            TokenKind::EqualEqual => self.emit_op(OpCode::Equal),
            TokenKind::Greater => self.emit_op(OpCode::Greater),
            TokenKind::GreaterEqual => {
                self.emit_op(OpCode::Less);
                self.emit_op(OpCode::Not);
            }
            TokenKind::Less => self.emit_op(OpCode::Less),
            TokenKind::LessEqual => {
                self.emit_op(OpCode::Greater);
                self.emit_op(OpCode::Not);
            }
            TokenKind::Plus => self.emit_op(OpCode::Add),
            TokenKind::Minus => self.emit_op(OpCode::Subtract),
            TokenKind::Star => self.emit_op(OpCode::Multiply),
            TokenKind::Slash => self.emit_op(OpCode::Divide),
            _ => unreachable!(),
        }
    }

    fn number(&mut self) {
        let value: f64 = self.previous.lexeme.parse().unwrap_or(0.0);
        self.emit_constant(Value::Number(value));
    }

    fn string(&mut self) {
        let lexeme = self.previous.lexeme;
        let inner = &lexeme[1..lexeme.len() - 1];
        let r = self.heap.intern_string(inner);
        self.emit_constant(Value::Obj(r));
    }

    fn literal(&mut self, kind: TokenKind) {
        match kind {
            TokenKind::False => self.emit_op(OpCode::False),
            TokenKind::Nil => self.emit_op(OpCode::Nil),
            TokenKind::True => self.emit_op(OpCode::True),
            _ => unreachable!(),
        }
    }

    fn variable(&mut self, can_assign: bool) {
        let name = self.previous.lexeme.to_string();
        self.named_variable(&name, can_assign);
    }

    fn this_expr(&mut self) {
        if self.classes.is_empty() {
            self.error_at_previous("Can't use 'this' outside of a class.");
        }
        self.named_variable("this", false);
    }

    fn super_expr(&mut self) {
        if self.classes.is_empty() {
            self.error_at_previous("Can't use 'super' outside of a class.");
        } else if !self.classes.last().unwrap().has_superclass {
            self.error_at_previous("Can't use 'super' in a class with no superclass.");
        }

        self.consume(TokenKind::Dot, "Expect '.' after 'super'.");
        self.consume(TokenKind::Identifier, "Expect superclass method name.");
        let method_name = self.previous.lexeme.to_string();
        let name_const = self.identifier_constant(&method_name);

        self.named_variable("this", false);
        if self.match_token(TokenKind::LeftParen) {
            let argc = self.argument_list();
            self.named_variable("super", false);
            self.emit_op(OpCode::SuperInvoke);
            self.emit_byte(name_const);
            self.emit_byte(argc);
        } else {
            self.named_variable("super", false);
            self.emit_op(OpCode::GetSuper);
            self.emit_byte(name_const);
        }
    }

    fn and_expr(&mut self) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or_expr(&mut self) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(else_jump);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn call(&mut self) {
        let argc = self.argument_list();
        self.emit_op(OpCode::Call);
        self.emit_byte(argc);
    }

    fn argument_list(&mut self) -> u8 {
        let mut argc: u16 = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if argc == 255 {
                    self.error_at_previous("Can't have more than 255 arguments.");
                }
                argc += 1;
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        argc.min(255) as u8
    }

    fn dot(&mut self, can_assign: bool) {
        self.consume(TokenKind::Identifier, "Expect property name after '.'.");
        let name = self.previous.lexeme.to_string();
        let name_const = self.identifier_constant(&name);

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_op(OpCode::SetProperty);
            self.emit_byte(name_const);
        } else if self.match_token(TokenKind::LeftParen) {
            let argc = self.argument_list();
            self.emit_op(OpCode::Invoke);
            self.emit_byte(name_const);
            self.emit_byte(argc);
        } else {
            self.emit_op(OpCode::GetProperty);
            self.emit_byte(name_const);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_ok(source: &str) -> (ObjRef, Heap) {
        let mut heap = Heap::new();
        match compile(source, &mut heap) {
            Ok(r) => (r, heap),
            Err(errs) => panic!("unexpected compile errors: {:?}", errs.iter().map(|e| e.to_string()).collect::<Vec<_>>()),
        }
    }

    fn compile_err(source: &str) -> Vec<CompileError> {
        let mut heap = Heap::new();
        match compile(source, &mut heap) {
            Ok(_) => panic!("expected compile error for: {source}"),
            Err(errs) => errs,
        }
    }

    #[test]
    fn compiles_simple_expression_statement() {
        compile_ok("print 1 + 2 * 3;");
    }

    #[test]
    fn return_outside_function_is_error() {
        let errs = compile_err("return 1;");
        assert!(errs.iter().any(|e| e.message.contains("Can't return from top-level code.")));
    }

    #[test]
    fn this_outside_class_is_error() {
        let errs = compile_err("print this;");
        assert!(errs.iter().any(|e| e.message.contains("Can't use 'this'")));
    }

    #[test]
    fn local_self_reference_in_initializer_is_error() {
        let errs = compile_err("{ var a = a; }");
        assert!(errs.iter().any(|e| e.message.contains("its own initializer")));
    }

    #[test]
    fn global_self_reference_in_initializer_is_allowed() {
        compile_ok("var a = a;");
    }

    #[test]
    fn duplicate_local_in_same_scope_is_error() {
        let errs = compile_err("{ var a = 1; var a = 2; }");
        assert!(errs.iter().any(|e| e.message.contains("Already a variable")));
    }

    #[test]
    fn disassembly_is_deterministic_across_compiles() {
        let (r1, h1) = compile_ok("fun mk(x) { fun get() { return x; } return get; }");
        let (r2, h2) = compile_ok("fun mk(x) { fun get() { return x; } return get; }");
        let text1 = match h1.get(r1) {
            crate::object::ObjData::Function(f) => f.chunk.disassemble(&h1, "script"),
            _ => unreachable!(),
        };
        let text2 = match h2.get(r2) {
            crate::object::ObjData::Function(f) => f.chunk.disassemble(&h2, "script"),
            _ => unreachable!(),
        };
        assert_eq!(text1, text2);
    }

    #[test]
    fn superclass_cannot_be_itself() {
        let errs = compile_err("class A < A {}");
        assert!(errs.iter().any(|e| e.message.contains("inherit from itself")));
    }
}
