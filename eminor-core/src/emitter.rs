//! Lowers the syntax tree to the byte-opcode image.
//!
//! Single pass. Every branch and call operand — forward or backward — is
//! written as a 0xFFFFFFFF sentinel plus a relocation entry and resolved
//! once by the linker; structured control flow targets synthesized local
//! labels (`.L0`, `.L1`, ...). User labels are keyed `:name` and functions
//! by bare name, so the three namespaces cannot collide in the label table.

use std::collections::HashMap;

use crate::ast::*;
use crate::error::CoreError;
use crate::opcode::*;
use crate::span::Span;

pub const RELOC_SENTINEL: u32 = 0xFFFF_FFFF;

/// Deterministic 8-bit capsule id. A 1-2 character all-hex name (`A0`, `ff`)
/// encodes as that byte; anything else takes the low 8 bits of the seedless
/// 64-bit FNV-1a hash of the name. Tools decoding images rely on this exact
/// mapping.
pub fn capsule_id(name: &str) -> u8 {
    let bytes = name.as_bytes();
    if (1..=2).contains(&bytes.len()) && bytes.iter().all(|b| b.is_ascii_hexdigit()) {
        return bytes.iter().fold(0u8, |acc, &b| {
            (acc << 4)
                | match b {
                    b'0'..=b'9' => b - b'0',
                    b'a'..=b'f' => b - b'a' + 10,
                    _ => b - b'A' + 10,
                }
        });
    }
    const FNV_OFFSET: u64 = 14_695_981_039_346_656_037;
    const FNV_PRIME: u64 = 1_099_511_628_211;
    let mut hash = FNV_OFFSET;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    (hash & 0xFF) as u8
}

/// A deduplicated constant-pool entry. String payloads live in the rodata
/// segment; the entry records their byte offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolEntry {
    Int(i64),
    Hex(i64),
    Duration(i64),
    Str { offset: u32 },
    Bool(bool),
}

impl PoolEntry {
    /// The wrapped 32-bit value the peephole pass folds on, or `None` for
    /// strings.
    pub fn numeric(&self) -> Option<u32> {
        match self {
            PoolEntry::Int(v) | PoolEntry::Hex(v) | PoolEntry::Duration(v) => Some(*v as u32),
            PoolEntry::Bool(b) => Some(*b as u32),
            PoolEntry::Str { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum PoolKey {
    Int(i64),
    Hex(i64),
    Duration(i64),
    Str(String),
    Bool(bool),
}

/// Emitter-owned constant pool. Indices are assigned in intern order, which
/// makes them reproducible across runs on identical input.
#[derive(Debug, Default)]
pub struct ConstPool {
    entries: Vec<PoolEntry>,
    index: HashMap<PoolKey, u16>,
    rodata: Vec<u8>,
}

impl ConstPool {
    pub fn intern(&mut self, lit: &Literal, span: Span) -> Result<u16, CoreError> {
        let key = match lit {
            Literal::Int(v) => PoolKey::Int(*v),
            Literal::Hex(v) => PoolKey::Hex(*v),
            Literal::Duration(v) => PoolKey::Duration(*v),
            Literal::Str(s) => PoolKey::Str(s.clone()),
            Literal::Bool(b) => PoolKey::Bool(*b),
        };
        if let Some(&idx) = self.index.get(&key) {
            return Ok(idx);
        }
        let entry = match lit {
            Literal::Int(v) => PoolEntry::Int(*v),
            Literal::Hex(v) => PoolEntry::Hex(*v),
            Literal::Duration(v) => PoolEntry::Duration(*v),
            Literal::Bool(b) => PoolEntry::Bool(*b),
            Literal::Str(s) => {
                let offset = self.rodata.len() as u32;
                self.rodata.extend_from_slice(s.as_bytes());
                self.rodata.push(0);
                PoolEntry::Str { offset }
            }
        };
        let idx = self.entries.len();
        if idx > u16::MAX as usize {
            return Err(CoreError::Emit {
                line: span.line,
                column: span.column,
                message: "constant pool exhausted".to_string(),
            });
        }
        self.entries.push(entry);
        self.index.insert(key, idx as u16);
        Ok(idx as u16)
    }

    pub fn entries(&self) -> &[PoolEntry] {
        &self.entries
    }

    pub fn rodata(&self) -> &[u8] {
        &self.rodata
    }

    pub fn into_rodata(self) -> Vec<u8> {
        self.rodata
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reloc {
    /// Byte offset of the 4-byte sentinel in the image.
    pub pos: u32,
    pub sym: String,
}

/// Everything the emitter hands to the optimizer and linker.
#[derive(Debug)]
pub struct EmitUnit {
    pub text: Vec<u8>,
    pub pool: ConstPool,
    /// `:name` user labels and `.Ln` synthesized labels, by absolute offset.
    pub labels: HashMap<String, u32>,
    /// Functions in declaration order; duplicates are caught at link time.
    pub functions: Vec<(String, u32)>,
    pub relocs: Vec<Reloc>,
}

pub fn emit(program: &Program) -> Result<EmitUnit, CoreError> {
    let mut emitter = Emitter::default();
    emitter.emit_block(&program.entry.block)?;
    emitter.emit8(OP_EXIT);
    for item in &program.items {
        match item {
            Item::Decl(Decl::Function(decl)) => {
                emitter.emit_function(&decl.name, &decl.body)?;
            }
            Item::Decl(Decl::Worker(decl)) => {
                emitter.emit_function(&decl.name, &decl.body)?;
            }
            Item::Decl(_) => {}
            Item::Stmt(stmt) => emitter.emit_stmt(stmt)?,
        }
    }
    emitter.emit8(OP_END);
    Ok(EmitUnit {
        text: emitter.text,
        pool: emitter.pool,
        labels: emitter.labels,
        functions: emitter.functions,
        relocs: emitter.relocs,
    })
}

#[derive(Default)]
struct Emitter {
    text: Vec<u8>,
    pool: ConstPool,
    labels: HashMap<String, u32>,
    functions: Vec<(String, u32)>,
    relocs: Vec<Reloc>,
    loops: Vec<LoopCtx>,
    synth: u32,
}

struct LoopCtx {
    start: String,
    end: String,
}

impl Emitter {
    fn here(&self) -> u32 {
        self.text.len() as u32
    }

    fn emit8(&mut self, byte: u8) {
        self.text.push(byte);
    }

    fn emit32(&mut self, value: u32) {
        self.text.extend_from_slice(&value.to_le_bytes());
    }

    fn reloc_here(&mut self, sym: String) {
        self.relocs.push(Reloc {
            pos: self.here(),
            sym,
        });
        self.emit32(RELOC_SENTINEL);
    }

    fn fresh_label(&mut self) -> String {
        let label = format!(".L{}", self.synth);
        self.synth += 1;
        label
    }

    fn define_label(&mut self, name: String) {
        self.labels.insert(name, self.here());
    }

    fn mark_user_label(&mut self, name: &str, span: Span) -> Result<(), CoreError> {
        let key = format!(":{name}");
        if self.labels.contains_key(&key) {
            return Err(self.err(span, format!("duplicate label :{name}")));
        }
        self.labels.insert(key, self.here());
        Ok(())
    }

    fn err(&self, span: Span, message: impl Into<String>) -> CoreError {
        CoreError::Emit {
            line: span.line,
            column: span.column,
            message: message.into(),
        }
    }

    fn emit_function(&mut self, name: &Ident, body: &Block) -> Result<(), CoreError> {
        self.functions.push((name.name.clone(), self.here()));
        self.emit_block(body)?;
        // Safety terminator; dead if the body already exited.
        self.emit8(OP_EXIT);
        Ok(())
    }

    fn emit_block(&mut self, block: &Block) -> Result<(), CoreError> {
        for item in &block.items {
            match item {
                Item::Decl(Decl::Function(decl)) => {
                    return Err(self.err(
                        decl.span,
                        format!("nested function ${} is not supported", decl.name.name),
                    ));
                }
                Item::Decl(Decl::Worker(decl)) => {
                    return Err(self.err(
                        decl.span,
                        format!("nested worker ${} is not supported", decl.name.name),
                    ));
                }
                Item::Decl(_) => {}
                Item::Stmt(stmt) => self.emit_stmt(stmt)?,
            }
        }
        Ok(())
    }

    fn cap_op(&mut self, op: u8, target: &Ident) {
        self.emit8(op);
        self.emit32(capsule_id(&target.name) as u32);
    }

    fn emit_stmt(&mut self, stmt: &Stmt) -> Result<(), CoreError> {
        let span = stmt.span;
        match &stmt.kind {
            StmtKind::Init { target } => self.cap_op(OP_INIT, target),
            StmtKind::Lease { target } => self.cap_op(OP_LEASE, target),
            StmtKind::Sublease { target } => self.cap_op(OP_SUBLEASE, target),
            StmtKind::Release { target } => self.cap_op(OP_RELEASE, target),
            StmtKind::CheckExp { target } => self.cap_op(OP_CHECKEXP, target),
            StmtKind::Render { target } => self.cap_op(OP_RENDER, target),
            StmtKind::Input { target } => self.cap_op(OP_INPUT, target),
            StmtKind::Output { target } => self.cap_op(OP_OUTPUT, target),
            StmtKind::Load { target, value } => {
                self.emit_expr(value)?;
                self.cap_op(OP_LOAD, target);
            }
            StmtKind::Call { func, .. } => {
                // The capsule argument is a calling-convention annotation;
                // only the transfer is encoded.
                self.emit8(OP_CALL);
                self.reloc_here(func.name.clone());
            }
            StmtKind::Exit => self.emit8(OP_EXIT),
            StmtKind::Send { chan, pkt } => {
                self.emit8(OP_SEND);
                self.emit32(capsule_id(&chan.name) as u32);
                self.emit32(capsule_id(&pkt.name) as u32);
            }
            StmtKind::Recv { chan, pkt } => {
                self.emit8(OP_RECV);
                self.emit32(capsule_id(&chan.name) as u32);
                self.emit32(capsule_id(&pkt.name) as u32);
            }
            StmtKind::Spawn { func, args } => {
                for arg in args {
                    self.emit_expr(arg)?;
                }
                self.emit8(OP_SPAWN);
                self.reloc_here(func.name.clone());
            }
            StmtKind::Join { thread } => self.cap_op(OP_JOIN, thread),
            StmtKind::Stamp { target, value } => {
                let kidx = self.pool.intern(value, span)?;
                self.emit8(OP_STAMP);
                self.emit32(capsule_id(&target.name) as u32);
                self.emit32(kidx as u32);
            }
            StmtKind::Expire {
                target,
                duration_ns,
            } => {
                let kidx = self.pool.intern(&Literal::Duration(*duration_ns), span)?;
                self.emit8(OP_EXPIRE);
                self.emit32(capsule_id(&target.name) as u32);
                self.emit32(kidx as u32);
            }
            StmtKind::Sleep { duration_ns } => {
                let kidx = self.pool.intern(&Literal::Duration(*duration_ns), span)?;
                self.emit8(OP_SLEEP);
                self.emit32(kidx as u32);
            }
            StmtKind::Yield => self.emit8(OP_YIELD),
            StmtKind::Error {
                target,
                code,
                message,
            } => {
                let code_kidx = self.pool.intern(code, span)?;
                let msg_kidx = self.pool.intern(&Literal::Str(message.clone()), span)?;
                self.emit8(OP_ERROR);
                self.emit32(capsule_id(&target.name) as u32);
                self.emit32(code_kidx as u32);
                self.emit32(msg_kidx as u32);
            }
            StmtKind::If {
                cond,
                then_block,
                else_block,
            } => {
                self.emit_expr(cond)?;
                match else_block {
                    Some(els) => {
                        let else_label = self.fresh_label();
                        let end_label = self.fresh_label();
                        self.emit8(OP_JZ);
                        self.reloc_here(else_label.clone());
                        self.emit_block(then_block)?;
                        self.emit8(OP_JMP);
                        self.reloc_here(end_label.clone());
                        self.define_label(else_label);
                        self.emit_block(els)?;
                        self.define_label(end_label);
                    }
                    None => {
                        let end_label = self.fresh_label();
                        self.emit8(OP_JZ);
                        self.reloc_here(end_label.clone());
                        self.emit_block(then_block)?;
                        self.define_label(end_label);
                    }
                }
            }
            StmtKind::Loop { cond, body } => {
                let start_label = self.fresh_label();
                let end_label = self.fresh_label();
                self.define_label(start_label.clone());
                self.emit_expr(cond)?;
                self.emit8(OP_JZ);
                self.reloc_here(end_label.clone());
                self.loops.push(LoopCtx {
                    start: start_label.clone(),
                    end: end_label.clone(),
                });
                let body_result = self.emit_block(body);
                self.loops.pop();
                body_result?;
                self.emit8(OP_JMP);
                self.reloc_here(start_label);
                self.define_label(end_label);
            }
            StmtKind::Break => {
                let Some(ctx) = self.loops.last() else {
                    return Err(self.err(span, "`#break` outside of a loop"));
                };
                let target = ctx.end.clone();
                self.emit8(OP_JMP);
                self.reloc_here(target);
            }
            StmtKind::Continue => {
                let Some(ctx) = self.loops.last() else {
                    return Err(self.err(span, "`#continue` outside of a loop"));
                };
                let target = ctx.start.clone();
                self.emit8(OP_JMP);
                self.reloc_here(target);
            }
            StmtKind::Label { name } => self.mark_user_label(name, span)?,
            StmtKind::Goto { label } => {
                self.emit8(OP_JMP);
                self.reloc_here(format!(":{label}"));
            }
            StmtKind::Return { value } => {
                if let Some(expr) = value {
                    self.emit_expr(expr)?;
                }
                self.emit8(OP_EXIT);
            }
            StmtKind::Print { values } => {
                for expr in values {
                    self.emit_expr(expr)?;
                    self.emit8(OP_OUTPUT);
                    self.emit32(0);
                }
            }
        }
        Ok(())
    }

    /// Post-order lowering onto the virtual evaluation stack: operands
    /// first, then the operator byte. `&&` and `||` short-circuit past the
    /// right operand and the BIN opcode.
    fn emit_expr(&mut self, expr: &Expr) -> Result<(), CoreError> {
        let span = expr.span;
        match &expr.kind {
            ExprKind::Literal(lit) => {
                let kidx = self.pool.intern(lit, span)?;
                self.emit8(OP_PUSHK);
                self.emit32(kidx as u32);
            }
            ExprKind::Ident { name, is_dollar } => {
                if *is_dollar {
                    self.emit8(OP_PUSHCAP);
                    self.emit32(capsule_id(name) as u32);
                } else {
                    let kidx = self.pool.intern(&Literal::Str(name.clone()), span)?;
                    self.emit8(OP_PUSHK);
                    self.emit32(kidx as u32);
                }
            }
            ExprKind::Unary { op, rhs } => {
                self.emit_expr(rhs)?;
                self.emit8(OP_UN);
                self.emit8(match op {
                    UnOp::Not => U_NOT,
                    UnOp::Neg => U_NEG,
                    UnOp::BitNot => U_BITNOT,
                });
            }
            ExprKind::Binary { op: BinOp::And, lhs, rhs } => {
                let skip = self.fresh_label();
                self.emit_expr(lhs)?;
                self.emit8(OP_JZ);
                self.reloc_here(skip.clone());
                self.emit_expr(rhs)?;
                self.emit8(OP_BIN);
                self.emit8(B_AND);
                self.define_label(skip);
            }
            ExprKind::Binary { op: BinOp::Or, lhs, rhs } => {
                let skip = self.fresh_label();
                self.emit_expr(lhs)?;
                self.emit8(OP_JNZ);
                self.reloc_here(skip.clone());
                self.emit_expr(rhs)?;
                self.emit8(OP_BIN);
                self.emit8(B_OR);
                self.define_label(skip);
            }
            ExprKind::Binary { op, lhs, rhs } => {
                self.emit_expr(lhs)?;
                self.emit_expr(rhs)?;
                self.emit8(OP_BIN);
                self.emit8(match op {
                    BinOp::Eq => B_EQ,
                    BinOp::Ne => B_NE,
                    BinOp::Lt => B_LT,
                    BinOp::Gt => B_GT,
                    BinOp::Le => B_LE,
                    BinOp::Ge => B_GE,
                    BinOp::Add => B_ADD,
                    BinOp::Sub => B_SUB,
                    BinOp::Mul => B_MUL,
                    BinOp::Div => B_DIV,
                    BinOp::Mod => B_MOD,
                    BinOp::And | BinOp::Or => unreachable!("handled above"),
                });
            }
            ExprKind::Call { name, args } => {
                for arg in args {
                    self.emit_expr(arg)?;
                }
                self.emit8(OP_CALL);
                self.reloc_here(name.clone());
            }
        }
        Ok(())
    }
}
