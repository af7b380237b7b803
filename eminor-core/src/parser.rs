//! Recursive-descent parser with precedence climbing for expressions.
//!
//! Shortcode (`#load $A0, 1`) and long-form (`assign value 1 to capsule
//! $A0`) statements produce the same AST variant; nothing downstream can
//! tell which syntax the source used. The parser does not recover: the
//! first error aborts the pipeline.

use crate::ast::*;
use crate::error::CoreError;
use crate::lexer::{lex, Token, TokenKind};
use crate::span::Span;

/// Lex and parse a source text.
pub fn parse(source: &str) -> Result<Program, CoreError> {
    let tokens = lex(source)?;
    parse_tokens(&tokens)
}

/// Parse an already-lexed token stream (must be `End`-terminated).
pub fn parse_tokens(tokens: &[Token]) -> Result<Program, CoreError> {
    let mut parser = Parser { tokens, i: 0 };
    parser.parse_program()
}

struct Parser<'a> {
    tokens: &'a [Token],
    i: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &Token {
        &self.tokens[self.i.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn span(&self) -> Span {
        self.peek().span
    }

    fn bump(&mut self) {
        if self.i + 1 < self.tokens.len() {
            self.i += 1;
        }
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek_kind() == kind {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Span, CoreError> {
        if self.peek_kind() == &kind {
            let span = self.span();
            self.bump();
            Ok(span)
        } else {
            Err(self.expected(what))
        }
    }

    fn expected(&self, what: &str) -> CoreError {
        let tok = self.peek();
        CoreError::Parse {
            line: tok.span.line,
            column: tok.span.column,
            message: format!("expected {what}, got {}", tok.kind.describe()),
        }
    }

    fn err_at(&self, span: Span, message: impl Into<String>) -> CoreError {
        CoreError::Parse {
            line: span.line,
            column: span.column,
            message: message.into(),
        }
    }

    fn dollar_ident(&mut self, what: &str) -> Result<Ident, CoreError> {
        match self.peek_kind().clone() {
            TokenKind::DollarIdent(name) => {
                let span = self.span();
                self.bump();
                Ok(Ident { name, span })
            }
            _ => Err(self.expected(what)),
        }
    }

    fn string_lit(&mut self, what: &str) -> Result<(String, Span), CoreError> {
        match self.peek_kind().clone() {
            TokenKind::Str(value) => {
                let span = self.span();
                self.bump();
                Ok((value, span))
            }
            _ => Err(self.expected(what)),
        }
    }

    // ----- program structure -------------------------------------------

    fn parse_program(&mut self) -> Result<Program, CoreError> {
        let entry = self.parse_entry_block()?;
        let span = entry.span;
        let mut items = Vec::new();
        while self.peek_kind() != &TokenKind::End {
            items.push(self.parse_item()?);
        }
        Ok(Program { entry, items, span })
    }

    fn parse_entry_block(&mut self) -> Result<EntryBlock, CoreError> {
        let span = self.span();
        let kind = match self.peek_kind() {
            TokenKind::AtMain => EntryKind::Main,
            TokenKind::AtEntryPoint => EntryKind::EntryPoint,
            _ => return Err(self.expected("`@main` or `@entry_point`")),
        };
        self.bump();
        let block = self.parse_block()?;
        Ok(EntryBlock { kind, block, span })
    }

    fn is_decl_start(&self) -> bool {
        matches!(
            self.peek_kind(),
            TokenKind::KwFunction
                | TokenKind::KwWorker
                | TokenKind::KwLet
                | TokenKind::AtModule
                | TokenKind::AtExport
                | TokenKind::AtImport
        )
    }

    fn parse_item(&mut self) -> Result<Item, CoreError> {
        if self.is_decl_start() {
            Ok(Item::Decl(self.parse_decl()?))
        } else {
            Ok(Item::Stmt(self.parse_statement()?))
        }
    }

    fn parse_block(&mut self) -> Result<Block, CoreError> {
        let span = self.expect(TokenKind::LBrace, "`{`")?;
        let mut items = Vec::new();
        loop {
            match self.peek_kind() {
                TokenKind::RBrace => {
                    self.bump();
                    break;
                }
                TokenKind::End => {
                    return Err(self.err_at(span, "unterminated block"));
                }
                _ => items.push(self.parse_item()?),
            }
        }
        Ok(Block { items, span })
    }

    // ----- declarations ------------------------------------------------

    fn parse_decl(&mut self) -> Result<Decl, CoreError> {
        match self.peek_kind() {
            TokenKind::KwFunction => self.parse_function_decl(),
            TokenKind::KwWorker => self.parse_worker_decl(),
            TokenKind::KwLet => self.parse_let_decl(),
            TokenKind::AtModule => {
                let span = self.span();
                self.bump();
                let (path, _) = self.string_lit("module path string")?;
                Ok(Decl::Module(ModuleDecl { path, span }))
            }
            TokenKind::AtImport => {
                let span = self.span();
                self.bump();
                let (path, _) = self.string_lit("import path string")?;
                let alias = if matches!(self.peek_kind(), TokenKind::Ident(name) if name == "as") {
                    self.bump();
                    Some(self.dollar_ident("import alias like `$name`")?)
                } else {
                    None
                };
                Ok(Decl::Import(ImportDecl { path, alias, span }))
            }
            TokenKind::AtExport => {
                let span = self.span();
                self.bump();
                self.eat(&TokenKind::KwFunction);
                let symbol = self.dollar_ident("exported symbol like `$name`")?;
                Ok(Decl::Export(ExportDecl { symbol, span }))
            }
            _ => Err(self.expected("declaration")),
        }
    }

    fn parse_params(&mut self) -> Result<Vec<Param>, CoreError> {
        self.expect(TokenKind::LParen, "`(`")?;
        let mut params = Vec::new();
        if self.eat(&TokenKind::RParen) {
            return Ok(params);
        }
        loop {
            params.push(self.parse_param()?);
            if self.eat(&TokenKind::Comma) {
                continue;
            }
            self.expect(TokenKind::RParen, "`)`")?;
            break;
        }
        Ok(params)
    }

    fn parse_param(&mut self) -> Result<Param, CoreError> {
        let span = self.span();
        let name = match self.peek_kind().clone() {
            TokenKind::DollarIdent(name) | TokenKind::Ident(name) => {
                self.bump();
                Ident { name, span }
            }
            _ => return Err(self.expected("parameter name")),
        };
        self.expect(TokenKind::Colon, "`:`")?;
        let type_ref = self.parse_type()?;
        Ok(Param { name, type_ref, span })
    }

    fn parse_function_decl(&mut self) -> Result<Decl, CoreError> {
        let span = self.span();
        self.bump();
        let name = self.dollar_ident("function name like `$name`")?;
        let params = self.parse_params()?;
        let return_type = if self.eat(&TokenKind::Colon) {
            Some(self.parse_type()?)
        } else {
            None
        };
        let body = self.parse_block()?;
        Ok(Decl::Function(FunctionDecl {
            name,
            params,
            return_type,
            body,
            span,
        }))
    }

    fn parse_worker_decl(&mut self) -> Result<Decl, CoreError> {
        let span = self.span();
        self.bump();
        let name = self.dollar_ident("worker name like `$name`")?;
        let params = self.parse_params()?;
        let body = self.parse_block()?;
        Ok(Decl::Worker(WorkerDecl {
            name,
            params,
            body,
            span,
        }))
    }

    fn parse_let_decl(&mut self) -> Result<Decl, CoreError> {
        let span = self.span();
        self.bump();
        let name = self.dollar_ident("capsule name like `$name`")?;
        self.expect(TokenKind::Colon, "`:`")?;
        let type_ref = self.parse_type()?;
        let init = if self.eat(&TokenKind::Assign) {
            Some(self.parse_expr()?)
        } else {
            None
        };
        self.expect(TokenKind::Semi, "`;`")?;
        Ok(Decl::Let(LetDecl {
            name,
            type_ref,
            init,
            span,
        }))
    }

    fn parse_type(&mut self) -> Result<TypeRef, CoreError> {
        let span = self.span();
        let prim = match self.peek_kind() {
            TokenKind::KwByte => {
                self.bump();
                self.expect(TokenKind::LBracket, "`[`")?;
                let size = match self.peek_kind().clone() {
                    TokenKind::Int(n) if (0..=u32::MAX as i64).contains(&n) => {
                        self.bump();
                        n as u32
                    }
                    _ => return Err(self.expected("array size")),
                };
                self.expect(TokenKind::RBracket, "`]`")?;
                return Ok(TypeRef {
                    kind: TypeKind::ByteArray(size),
                    span,
                });
            }
            TokenKind::KwCapsule | TokenKind::KwPacket => {
                let packet = self.peek_kind() == &TokenKind::KwPacket;
                self.bump();
                self.expect(TokenKind::Lt, "`<`")?;
                let inner = Box::new(self.parse_type()?);
                self.expect(TokenKind::Gt, "`>`")?;
                let kind = if packet {
                    TypeKind::Packet(inner)
                } else {
                    TypeKind::Capsule(inner)
                };
                return Ok(TypeRef { kind, span });
            }
            TokenKind::KwU8 => PrimType::U8,
            TokenKind::KwU16 => PrimType::U16,
            TokenKind::KwU32 => PrimType::U32,
            TokenKind::KwU64 => PrimType::U64,
            TokenKind::KwI8 => PrimType::I8,
            TokenKind::KwI16 => PrimType::I16,
            TokenKind::KwI32 => PrimType::I32,
            TokenKind::KwI64 => PrimType::I64,
            TokenKind::KwF32 => PrimType::F32,
            TokenKind::KwF64 => PrimType::F64,
            TokenKind::KwBool => PrimType::Bool,
            TokenKind::KwStamp => PrimType::Stamp,
            TokenKind::KwDuration => PrimType::Duration,
            _ => return Err(self.expected("type")),
        };
        self.bump();
        Ok(TypeRef {
            kind: TypeKind::Prim(prim),
            span,
        })
    }

    // ----- statements --------------------------------------------------

    fn parse_statement(&mut self) -> Result<Stmt, CoreError> {
        let span = self.span();
        let kind = match self.peek_kind().clone() {
            TokenKind::Label(name) => {
                self.bump();
                StmtKind::Label { name }
            }

            // Shortcode forms
            TokenKind::HashInit => self.capsule_stmt(|target| StmtKind::Init { target })?,
            TokenKind::HashLease => self.capsule_stmt(|target| StmtKind::Lease { target })?,
            TokenKind::HashSublease => self.capsule_stmt(|target| StmtKind::Sublease { target })?,
            TokenKind::HashRelease => self.capsule_stmt(|target| StmtKind::Release { target })?,
            TokenKind::HashCheckExp => self.capsule_stmt(|target| StmtKind::CheckExp { target })?,
            TokenKind::HashRender => self.capsule_stmt(|target| StmtKind::Render { target })?,
            TokenKind::HashInput => self.capsule_stmt(|target| StmtKind::Input { target })?,
            TokenKind::HashOutput => self.capsule_stmt(|target| StmtKind::Output { target })?,
            TokenKind::HashLoad => {
                self.bump();
                let target = self.dollar_ident("capsule like `$name`")?;
                self.expect(TokenKind::Comma, "`,`")?;
                let value = self.parse_expr()?;
                StmtKind::Load { target, value }
            }
            TokenKind::HashCall => {
                self.bump();
                let func = self.dollar_ident("function name like `$name`")?;
                let arg = if self.eat(&TokenKind::Comma) {
                    Some(self.dollar_ident("capsule argument like `$name`")?)
                } else {
                    None
                };
                StmtKind::Call { func, arg }
            }
            TokenKind::HashExit => {
                self.bump();
                StmtKind::Exit
            }
            TokenKind::HashSend => {
                let (chan, pkt) = self.chan_pair()?;
                StmtKind::Send { chan, pkt }
            }
            TokenKind::HashRecv => {
                let (chan, pkt) = self.chan_pair()?;
                StmtKind::Recv { chan, pkt }
            }
            TokenKind::HashSpawn => {
                self.bump();
                let func = self.dollar_ident("worker name like `$name`")?;
                let mut args = Vec::new();
                while self.eat(&TokenKind::Comma) {
                    args.push(self.parse_expr()?);
                }
                StmtKind::Spawn { func, args }
            }
            TokenKind::HashJoin => {
                self.bump();
                let thread = self.dollar_ident("thread capsule like `$name`")?;
                StmtKind::Join { thread }
            }
            TokenKind::HashStamp => {
                self.bump();
                let target = self.dollar_ident("capsule like `$name`")?;
                self.expect(TokenKind::Comma, "`,`")?;
                let value = self.literal("stamp literal")?;
                StmtKind::Stamp { target, value }
            }
            TokenKind::HashExpire => {
                self.bump();
                let target = self.dollar_ident("capsule like `$name`")?;
                self.expect(TokenKind::Comma, "`,`")?;
                let duration_ns = self.duration_literal()?;
                StmtKind::Expire {
                    target,
                    duration_ns,
                }
            }
            TokenKind::HashSleep => {
                self.bump();
                let duration_ns = self.duration_literal()?;
                StmtKind::Sleep { duration_ns }
            }
            TokenKind::HashYield => {
                self.bump();
                StmtKind::Yield
            }
            TokenKind::HashError => {
                self.bump();
                let target = self.dollar_ident("capsule like `$name`")?;
                self.expect(TokenKind::Comma, "`,`")?;
                let code = self.literal("error code literal")?;
                self.expect(TokenKind::Comma, "`,`")?;
                let (message, _) = self.string_lit("error message string")?;
                StmtKind::Error {
                    target,
                    code,
                    message,
                }
            }
            TokenKind::HashIf => {
                self.bump();
                let (cond, then_block, else_block) = self.if_tail(true)?;
                StmtKind::If {
                    cond,
                    then_block,
                    else_block,
                }
            }
            TokenKind::HashLoop => {
                self.bump();
                let (cond, body) = self.loop_tail()?;
                StmtKind::Loop { cond, body }
            }
            TokenKind::HashBreak => {
                self.bump();
                StmtKind::Break
            }
            TokenKind::HashContinue => {
                self.bump();
                StmtKind::Continue
            }

            // Long forms
            TokenKind::KwInitialize => {
                self.bump();
                self.expect(TokenKind::KwCapsule, "`capsule`")?;
                let target = self.dollar_ident("capsule like `$name`")?;
                StmtKind::Init { target }
            }
            TokenKind::KwAssign => {
                self.bump();
                self.expect(TokenKind::KwValue, "`value`")?;
                let value = self.parse_expr()?;
                self.expect(TokenKind::KwTo, "`to`")?;
                self.expect(TokenKind::KwCapsule, "`capsule`")?;
                let target = self.dollar_ident("capsule like `$name`")?;
                StmtKind::Load { target, value }
            }
            TokenKind::KwInvoke => {
                self.bump();
                self.expect(TokenKind::KwFunction, "`function`")?;
                let func = self.dollar_ident("function name like `$name`")?;
                let arg = if self.eat(&TokenKind::KwWith) {
                    self.expect(TokenKind::KwCapsule, "`capsule`")?;
                    Some(self.dollar_ident("capsule argument like `$name`")?)
                } else {
                    None
                };
                StmtKind::Call { func, arg }
            }
            TokenKind::KwTerminate => {
                self.bump();
                self.expect(TokenKind::KwExecution, "`execution`")?;
                StmtKind::Exit
            }
            TokenKind::KwIf => {
                self.bump();
                let (cond, then_block, else_block) = self.if_tail(false)?;
                StmtKind::If {
                    cond,
                    then_block,
                    else_block,
                }
            }
            TokenKind::KwLoop => {
                self.bump();
                let (cond, body) = self.loop_tail()?;
                StmtKind::Loop { cond, body }
            }
            TokenKind::KwGoto => {
                self.bump();
                let label = match self.peek_kind().clone() {
                    TokenKind::Label(name) => {
                        self.bump();
                        name
                    }
                    TokenKind::Colon => {
                        self.bump();
                        match self.peek_kind().clone() {
                            TokenKind::Ident(name) => {
                                self.bump();
                                name
                            }
                            _ => return Err(self.expected("label name")),
                        }
                    }
                    _ => return Err(self.expected("`:label`")),
                };
                StmtKind::Goto { label }
            }
            TokenKind::KwReturn => {
                self.bump();
                let value = if self.peek_kind() == &TokenKind::Semi {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.expect(TokenKind::Semi, "`;`")?;
                StmtKind::Return { value }
            }
            TokenKind::KwPrint => {
                self.bump();
                let mut values = vec![self.parse_expr()?];
                while self.eat(&TokenKind::Comma) {
                    values.push(self.parse_expr()?);
                }
                self.expect(TokenKind::Semi, "`;`")?;
                StmtKind::Print { values }
            }

            _ => return Err(self.expected("statement")),
        };
        Ok(Stmt { kind, span })
    }

    fn capsule_stmt(
        &mut self,
        build: impl FnOnce(Ident) -> StmtKind,
    ) -> Result<StmtKind, CoreError> {
        self.bump();
        let target = self.dollar_ident("capsule like `$name`")?;
        Ok(build(target))
    }

    fn chan_pair(&mut self) -> Result<(Ident, Ident), CoreError> {
        self.bump();
        let chan = self.dollar_ident("channel capsule like `$name`")?;
        self.expect(TokenKind::Comma, "`,`")?;
        let pkt = self.dollar_ident("packet capsule like `$name`")?;
        Ok((chan, pkt))
    }

    fn if_tail(
        &mut self,
        shortcode: bool,
    ) -> Result<(Expr, Block, Option<Block>), CoreError> {
        self.expect(TokenKind::LParen, "`(`")?;
        let cond = self.parse_expr()?;
        self.expect(TokenKind::RParen, "`)`")?;
        let then_block = self.parse_block()?;
        let else_kind = if shortcode {
            TokenKind::HashElse
        } else {
            TokenKind::KwElse
        };
        let else_block = if self.eat(&else_kind) {
            Some(self.parse_block()?)
        } else {
            None
        };
        if shortcode {
            self.expect(TokenKind::HashEndif, "`#endif`")?;
        }
        Ok((cond, then_block, else_block))
    }

    fn loop_tail(&mut self) -> Result<(Expr, Block), CoreError> {
        self.expect(TokenKind::LParen, "`(`")?;
        let cond = self.parse_expr()?;
        self.expect(TokenKind::RParen, "`)`")?;
        let body = self.parse_block()?;
        Ok((cond, body))
    }

    fn literal(&mut self, what: &str) -> Result<Literal, CoreError> {
        let lit = match self.peek_kind().clone() {
            TokenKind::Int(v) => Literal::Int(v),
            TokenKind::Hex(v) => Literal::Hex(v),
            TokenKind::Duration(v) => Literal::Duration(v),
            TokenKind::Str(v) => Literal::Str(v),
            TokenKind::Bool(v) => Literal::Bool(v),
            _ => return Err(self.expected(what)),
        };
        self.bump();
        Ok(lit)
    }

    /// Duration literal with an optional leading `-` (a negative duration is
    /// accepted here and flagged by the validator).
    fn duration_literal(&mut self) -> Result<i64, CoreError> {
        let negative = self.eat(&TokenKind::Minus);
        match self.peek_kind().clone() {
            TokenKind::Duration(ns) => {
                self.bump();
                Ok(if negative { -ns } else { ns })
            }
            _ => Err(self.expected("duration literal like `5ms`")),
        }
    }

    // ----- expressions -------------------------------------------------

    fn parse_expr(&mut self) -> Result<Expr, CoreError> {
        let lhs = self.parse_unary()?;
        self.parse_binary(1, lhs)
    }

    fn parse_binary(&mut self, min_prec: u8, mut lhs: Expr) -> Result<Expr, CoreError> {
        while let Some((op, prec)) = binop(self.peek_kind()) {
            if prec < min_prec {
                break;
            }
            self.bump();
            let mut rhs = self.parse_unary()?;
            while let Some((_, next_prec)) = binop(self.peek_kind()) {
                if next_prec <= prec {
                    break;
                }
                rhs = self.parse_binary(prec + 1, rhs)?;
            }
            let span = lhs.span;
            lhs = Expr {
                kind: ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, CoreError> {
        let span = self.span();
        let op = match self.peek_kind() {
            TokenKind::Bang => Some(UnOp::Not),
            TokenKind::Minus => Some(UnOp::Neg),
            TokenKind::Tilde => Some(UnOp::BitNot),
            _ => None,
        };
        if let Some(op) = op {
            self.bump();
            let rhs = Box::new(self.parse_unary()?);
            return Ok(Expr {
                kind: ExprKind::Unary { op, rhs },
                span,
            });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, CoreError> {
        let span = self.span();
        let kind = match self.peek_kind().clone() {
            TokenKind::Int(v) => {
                self.bump();
                ExprKind::Literal(Literal::Int(v))
            }
            TokenKind::Hex(v) => {
                self.bump();
                ExprKind::Literal(Literal::Hex(v))
            }
            TokenKind::Duration(v) => {
                self.bump();
                ExprKind::Literal(Literal::Duration(v))
            }
            TokenKind::Str(v) => {
                self.bump();
                ExprKind::Literal(Literal::Str(v))
            }
            TokenKind::Bool(v) => {
                self.bump();
                ExprKind::Literal(Literal::Bool(v))
            }
            TokenKind::DollarIdent(name) => {
                self.bump();
                ExprKind::Ident {
                    name,
                    is_dollar: true,
                }
            }
            TokenKind::Ident(name) => {
                self.bump();
                if self.eat(&TokenKind::LParen) {
                    let mut args = Vec::new();
                    if !self.eat(&TokenKind::RParen) {
                        loop {
                            args.push(self.parse_expr()?);
                            if self.eat(&TokenKind::Comma) {
                                continue;
                            }
                            self.expect(TokenKind::RParen, "`)`")?;
                            break;
                        }
                    }
                    ExprKind::Call { name, args }
                } else {
                    ExprKind::Ident {
                        name,
                        is_dollar: false,
                    }
                }
            }
            TokenKind::LParen => {
                self.bump();
                let inner = self.parse_expr()?;
                self.expect(TokenKind::RParen, "`)`")?;
                return Ok(inner);
            }
            _ => return Err(self.expected("expression")),
        };
        Ok(Expr { kind, span })
    }
}

/// Precedence bands, lowest to highest: `||`, `&&`, equality, relational,
/// additive, multiplicative.
fn binop(kind: &TokenKind) -> Option<(BinOp, u8)> {
    let pair = match kind {
        TokenKind::OrOr => (BinOp::Or, 1),
        TokenKind::AndAnd => (BinOp::And, 2),
        TokenKind::EqEq => (BinOp::Eq, 3),
        TokenKind::BangEq => (BinOp::Ne, 3),
        TokenKind::Lt => (BinOp::Lt, 4),
        TokenKind::Gt => (BinOp::Gt, 4),
        TokenKind::Le => (BinOp::Le, 4),
        TokenKind::Ge => (BinOp::Ge, 4),
        TokenKind::Plus => (BinOp::Add, 5),
        TokenKind::Minus => (BinOp::Sub, 5),
        TokenKind::Star => (BinOp::Mul, 6),
        TokenKind::Slash => (BinOp::Div, 6),
        TokenKind::Percent => (BinOp::Mod, 6),
        _ => return None,
    };
    Some(pair)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_stmts(src: &str) -> Vec<StmtKind> {
        let program = parse(src).expect("parse should succeed");
        program
            .entry
            .block
            .items
            .into_iter()
            .map(|item| match item {
                Item::Stmt(stmt) => stmt.kind,
                Item::Decl(decl) => panic!("unexpected decl {decl:?}"),
            })
            .collect()
    }

    #[test]
    fn parses_minimal_program() {
        let stmts = entry_stmts("@main { #init $A0 #exit }");
        assert!(matches!(&stmts[0], StmtKind::Init { target } if target.name == "A0"));
        assert!(matches!(stmts[1], StmtKind::Exit));
    }

    #[test]
    fn long_form_collapses_to_shortcode_variants() {
        let stmts = entry_stmts(
            "@entry_point { initialize capsule $A0 \
             assign value 0xFF to capsule $A0 \
             invoke function $render with capsule $A0 \
             terminate execution }",
        );
        assert!(matches!(&stmts[0], StmtKind::Init { target } if target.name == "A0"));
        assert!(
            matches!(&stmts[1], StmtKind::Load { target, value } if target.name == "A0"
                && matches!(value.kind, ExprKind::Literal(Literal::Hex(255))))
        );
        assert!(
            matches!(&stmts[2], StmtKind::Call { func, arg } if func.name == "render"
                && arg.as_ref().is_some_and(|a| a.name == "A0"))
        );
        assert!(matches!(stmts[3], StmtKind::Exit));
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let stmts = entry_stmts("@main { #load $A0, 1 + 2 * 3 }");
        let StmtKind::Load { value, .. } = &stmts[0] else {
            panic!("expected load");
        };
        let ExprKind::Binary { op, rhs, .. } = &value.kind else {
            panic!("expected binary expr");
        };
        assert_eq!(*op, BinOp::Add);
        assert!(matches!(
            rhs.kind,
            ExprKind::Binary { op: BinOp::Mul, .. }
        ));
    }

    #[test]
    fn unary_binds_tighter_than_binary() {
        let stmts = entry_stmts("@main { #load $A0, !1 && 2 }");
        let StmtKind::Load { value, .. } = &stmts[0] else {
            panic!("expected load");
        };
        let ExprKind::Binary { op, lhs, .. } = &value.kind else {
            panic!("expected binary expr");
        };
        assert_eq!(*op, BinOp::And);
        assert!(matches!(
            lhs.kind,
            ExprKind::Unary { op: UnOp::Not, .. }
        ));
    }

    #[test]
    fn parentheses_reset_precedence() {
        let stmts = entry_stmts("@main { #load $A0, (1 + 2) * 3 }");
        let StmtKind::Load { value, .. } = &stmts[0] else {
            panic!("expected load");
        };
        assert!(matches!(
            value.kind,
            ExprKind::Binary { op: BinOp::Mul, .. }
        ));
    }

    #[test]
    fn shortcode_if_requires_endif() {
        let err = parse("@main { #if (true) { #exit } }").unwrap_err();
        assert!(err.to_string().contains("#endif"));
        assert!(parse("@main { #if (true) { #exit } #endif }").is_ok());
    }

    #[test]
    fn long_form_if_takes_no_endif() {
        let stmts = entry_stmts("@main { if (true) { #exit } else { #yield } }");
        assert!(matches!(
            &stmts[0],
            StmtKind::If {
                else_block: Some(_),
                ..
            }
        ));
    }

    #[test]
    fn parses_function_declaration() {
        let program = parse(
            "@main { #exit } function $render($cap: capsule<u8>) : u32 { #output $cap }",
        )
        .expect("parse");
        let Item::Decl(Decl::Function(func)) = &program.items[0] else {
            panic!("expected function decl");
        };
        assert_eq!(func.name.name, "render");
        assert_eq!(func.params.len(), 1);
        assert!(matches!(
            func.params[0].type_ref.kind,
            TypeKind::Capsule(_)
        ));
        assert!(func.return_type.is_some());
    }

    #[test]
    fn parses_worker_and_spawn() {
        let program =
            parse("@main { #spawn $pump, 1, $B0 } worker $pump($src: packet<u64>) { #yield }")
                .expect("parse");
        assert!(matches!(
            program.items[0],
            Item::Decl(Decl::Worker(_))
        ));
        let stmts = entry_stmts("@main { #spawn $pump, 1, $B0 }");
        let StmtKind::Spawn { func, args } = &stmts[0] else {
            panic!("expected spawn");
        };
        assert_eq!(func.name, "pump");
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn parses_let_with_initializer() {
        let program = parse("@main { #exit } let $K0 : byte[16] = 0xAB ;").expect("parse");
        let Item::Decl(Decl::Let(decl)) = &program.items[0] else {
            panic!("expected let decl");
        };
        assert_eq!(decl.name.name, "K0");
        assert!(matches!(decl.type_ref.kind, TypeKind::ByteArray(16)));
        assert!(decl.init.is_some());
    }

    #[test]
    fn parses_module_import_export() {
        let program = parse(
            "@main { #exit } @module \"net/core\" @import \"net/render\" as $r @export function $main_loop",
        )
        .expect("parse");
        assert!(matches!(&program.items[0], Item::Decl(Decl::Module(m)) if m.path == "net/core"));
        assert!(
            matches!(&program.items[1], Item::Decl(Decl::Import(i)) if i.alias.as_ref().is_some_and(|a| a.name == "r"))
        );
        assert!(
            matches!(&program.items[2], Item::Decl(Decl::Export(e)) if e.symbol.name == "main_loop")
        );
    }

    #[test]
    fn parses_goto_and_labels() {
        let stmts = entry_stmts("@main { :top #yield goto :top }");
        assert!(matches!(&stmts[0], StmtKind::Label { name } if name == "top"));
        assert!(matches!(&stmts[2], StmtKind::Goto { label } if label == "top"));
    }

    #[test]
    fn parses_negative_sleep_duration() {
        let stmts = entry_stmts("@main { #sleep -5s }");
        assert!(matches!(
            stmts[0],
            StmtKind::Sleep {
                duration_ns: -5_000_000_000
            }
        ));
    }

    #[test]
    fn parses_return_and_print() {
        let program = parse("@main { #exit } function $f() { return 1 + 2 ; print 1, 2 ; }")
            .expect("parse");
        let Item::Decl(Decl::Function(func)) = &program.items[0] else {
            panic!("expected function");
        };
        let kinds: Vec<_> = func
            .body
            .items
            .iter()
            .map(|item| match item {
                Item::Stmt(stmt) => &stmt.kind,
                Item::Decl(_) => panic!("unexpected decl"),
            })
            .collect();
        assert!(matches!(kinds[0], StmtKind::Return { value: Some(_) }));
        assert!(matches!(kinds[1], StmtKind::Print { values } if values.len() == 2));
    }

    #[test]
    fn reports_expected_and_got() {
        let err = parse("@main { #init 5 }").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("expected capsule like `$name`"), "{msg}");
        assert!(msg.contains("integer literal"), "{msg}");
    }

    #[test]
    fn requires_entry_block_first() {
        let err = parse("function $f() { #exit }").unwrap_err();
        assert!(err.to_string().contains("@main"));
    }

    #[test]
    fn reports_unterminated_block() {
        let err = parse("@main { #exit").unwrap_err();
        assert!(err.to_string().contains("unterminated block"));
    }
}
