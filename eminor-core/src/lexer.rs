use crate::error::CoreError;
use crate::span::Span;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals and identifiers
    Int(i64),
    Hex(i64),
    /// Nanoseconds.
    Duration(i64),
    Str(String),
    Bool(bool),
    Ident(String),
    /// `$name`; the payload is the name without the sigil.
    DollarIdent(String),
    /// `:name`; the payload is the name without the colon.
    Label(String),

    // Shortcode directives
    HashInit,
    HashLoad,
    HashCall,
    HashExit,
    HashLease,
    HashSublease,
    HashRelease,
    HashCheckExp,
    HashRender,
    HashInput,
    HashOutput,
    HashSend,
    HashRecv,
    HashSpawn,
    HashJoin,
    HashStamp,
    HashExpire,
    HashSleep,
    HashYield,
    HashError,
    HashIf,
    HashElse,
    HashEndif,
    HashLoop,
    HashBreak,
    HashContinue,

    // At-directives
    AtMain,
    AtEntryPoint,
    AtModule,
    AtExport,
    AtImport,

    // Long-form keywords
    KwInitialize,
    KwCapsule,
    KwPacket,
    KwAssign,
    KwValue,
    KwTo,
    KwInvoke,
    KwFunction,
    KwWith,
    KwTerminate,
    KwExecution,
    KwIf,
    KwElse,
    KwLoop,
    KwGoto,
    KwWorker,
    KwLet,
    KwReturn,
    KwPrint,
    KwByte,

    // Type keywords
    KwU8,
    KwU16,
    KwU32,
    KwU64,
    KwI8,
    KwI16,
    KwI32,
    KwI64,
    KwF32,
    KwF64,
    KwBool,
    KwStamp,
    KwDuration,

    // Operators and punctuation
    EqEq,
    BangEq,
    Le,
    Ge,
    AndAnd,
    OrOr,
    Assign,
    Lt,
    Gt,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    Tilde,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semi,
    Colon,
    Dot,

    End,
}

impl TokenKind {
    /// Short description used in "expected X, got Y" diagnostics.
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Int(_) => "integer literal".to_string(),
            TokenKind::Hex(_) => "hex literal".to_string(),
            TokenKind::Duration(_) => "duration literal".to_string(),
            TokenKind::Str(_) => "string literal".to_string(),
            TokenKind::Bool(_) => "bool literal".to_string(),
            TokenKind::Ident(name) => format!("identifier `{name}`"),
            TokenKind::DollarIdent(name) => format!("`${name}`"),
            TokenKind::Label(name) => format!("label `:{name}`"),
            TokenKind::End => "end of input".to_string(),
            other => format!("`{}`", other.fixed_lexeme()),
        }
    }

    fn fixed_lexeme(&self) -> &'static str {
        match self {
            TokenKind::HashInit => "#init",
            TokenKind::HashLoad => "#load",
            TokenKind::HashCall => "#call",
            TokenKind::HashExit => "#exit",
            TokenKind::HashLease => "#lease",
            TokenKind::HashSublease => "#sublease",
            TokenKind::HashRelease => "#release",
            TokenKind::HashCheckExp => "#check_exp",
            TokenKind::HashRender => "#render",
            TokenKind::HashInput => "#input",
            TokenKind::HashOutput => "#output",
            TokenKind::HashSend => "#send",
            TokenKind::HashRecv => "#recv",
            TokenKind::HashSpawn => "#spawn",
            TokenKind::HashJoin => "#join",
            TokenKind::HashStamp => "#stamp",
            TokenKind::HashExpire => "#expire",
            TokenKind::HashSleep => "#sleep",
            TokenKind::HashYield => "#yield",
            TokenKind::HashError => "#error",
            TokenKind::HashIf => "#if",
            TokenKind::HashElse => "#else",
            TokenKind::HashEndif => "#endif",
            TokenKind::HashLoop => "#loop",
            TokenKind::HashBreak => "#break",
            TokenKind::HashContinue => "#continue",
            TokenKind::AtMain => "@main",
            TokenKind::AtEntryPoint => "@entry_point",
            TokenKind::AtModule => "@module",
            TokenKind::AtExport => "@export",
            TokenKind::AtImport => "@import",
            TokenKind::KwInitialize => "initialize",
            TokenKind::KwCapsule => "capsule",
            TokenKind::KwPacket => "packet",
            TokenKind::KwAssign => "assign",
            TokenKind::KwValue => "value",
            TokenKind::KwTo => "to",
            TokenKind::KwInvoke => "invoke",
            TokenKind::KwFunction => "function",
            TokenKind::KwWith => "with",
            TokenKind::KwTerminate => "terminate",
            TokenKind::KwExecution => "execution",
            TokenKind::KwIf => "if",
            TokenKind::KwElse => "else",
            TokenKind::KwLoop => "loop",
            TokenKind::KwGoto => "goto",
            TokenKind::KwWorker => "worker",
            TokenKind::KwLet => "let",
            TokenKind::KwReturn => "return",
            TokenKind::KwPrint => "print",
            TokenKind::KwByte => "byte",
            TokenKind::KwU8 => "u8",
            TokenKind::KwU16 => "u16",
            TokenKind::KwU32 => "u32",
            TokenKind::KwU64 => "u64",
            TokenKind::KwI8 => "i8",
            TokenKind::KwI16 => "i16",
            TokenKind::KwI32 => "i32",
            TokenKind::KwI64 => "i64",
            TokenKind::KwF32 => "f32",
            TokenKind::KwF64 => "f64",
            TokenKind::KwBool => "bool",
            TokenKind::KwStamp => "stamp",
            TokenKind::KwDuration => "duration",
            TokenKind::EqEq => "==",
            TokenKind::BangEq => "!=",
            TokenKind::Le => "<=",
            TokenKind::Ge => ">=",
            TokenKind::AndAnd => "&&",
            TokenKind::OrOr => "||",
            TokenKind::Assign => "=",
            TokenKind::Lt => "<",
            TokenKind::Gt => ">",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::Bang => "!",
            TokenKind::Tilde => "~",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::Comma => ",",
            TokenKind::Semi => ";",
            TokenKind::Colon => ":",
            TokenKind::Dot => ".",
            _ => "?",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub span: Span,
}

/// Tokenize a full source text. The stream is terminated by a single
/// `TokenKind::End` token so the parser never has to handle running off the
/// end of a slice.
pub fn lex(input: &str) -> Result<Vec<Token>, CoreError> {
    let mut scanner = Scanner::new(input);
    let mut tokens = Vec::new();
    loop {
        let token = scanner.next_token()?;
        let done = token.kind == TokenKind::End;
        tokens.push(token);
        if done {
            break;
        }
    }
    Ok(tokens)
}

struct Scanner<'a> {
    src: &'a str,
    bytes: &'a [u8],
    i: usize,
    line: u32,
    col: u32,
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str) -> Self {
        Scanner {
            src,
            bytes: src.as_bytes(),
            i: 0,
            line: 1,
            col: 1,
        }
    }

    fn span(&self) -> Span {
        Span::new(self.line, self.col)
    }

    fn err(&self, span: Span, message: impl Into<String>) -> CoreError {
        CoreError::Lex {
            line: span.line,
            column: span.column,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.i).copied()
    }

    fn peek_at(&self, k: usize) -> Option<u8> {
        self.bytes.get(self.i + k).copied()
    }

    fn bump(&mut self) -> u8 {
        let b = self.bytes[self.i];
        self.i += 1;
        if b == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        b
    }

    fn skip_ws_and_comments(&mut self) -> Result<(), CoreError> {
        loop {
            match self.peek() {
                Some(b' ' | b'\t' | b'\r' | b'\n') => {
                    self.bump();
                }
                Some(b'/') if self.peek_at(1) == Some(b'/') => {
                    while let Some(b) = self.peek() {
                        self.bump();
                        if b == b'\n' {
                            break;
                        }
                    }
                }
                Some(b'/') if self.peek_at(1) == Some(b'*') => {
                    let open = self.span();
                    self.bump();
                    self.bump();
                    loop {
                        match self.peek() {
                            Some(b'*') if self.peek_at(1) == Some(b'/') => {
                                self.bump();
                                self.bump();
                                break;
                            }
                            Some(_) => {
                                self.bump();
                            }
                            None => return Err(self.err(open, "unterminated block comment")),
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, CoreError> {
        self.skip_ws_and_comments()?;
        let span = self.span();
        let Some(b) = self.peek() else {
            return Ok(Token {
                kind: TokenKind::End,
                lexeme: String::new(),
                span,
            });
        };
        match b {
            b'#' => self.hash_directive(span),
            b'@' => self.at_directive(span),
            b'$' => self.dollar_ident(span),
            b'"' => self.string_literal(span),
            b':' => {
                self.bump();
                if self.peek().is_some_and(is_ident_start) {
                    let name = self.ident_body();
                    Ok(self.token(TokenKind::Label(name.clone()), format!(":{name}"), span))
                } else {
                    Ok(self.token(TokenKind::Colon, ":".to_string(), span))
                }
            }
            b'0'..=b'9' => self.number_or_duration(span),
            _ if is_ident_start(b) => Ok(self.ident_or_keyword(span)),
            _ => {
                if let Some(kind) = self.operator() {
                    let lexeme = kind.fixed_lexeme().to_string();
                    Ok(self.token(kind, lexeme, span))
                } else if b.is_ascii() {
                    Err(self.err(span, format!("unexpected character '{}'", b as char)))
                } else {
                    Err(self.err(span, format!("unexpected byte {b:#04x}")))
                }
            }
        }
    }

    fn token(&self, kind: TokenKind, lexeme: String, span: Span) -> Token {
        Token { kind, lexeme, span }
    }

    fn ident_body(&mut self) -> String {
        let start = self.i;
        while self.peek().is_some_and(is_ident_continue) {
            self.bump();
        }
        self.src[start..self.i].to_string()
    }

    fn ident_or_keyword(&mut self, span: Span) -> Token {
        let ident = self.ident_body();
        let kind = match ident.as_str() {
            "true" => TokenKind::Bool(true),
            "false" => TokenKind::Bool(false),
            other => keyword_kind(other).unwrap_or(TokenKind::Ident(ident.clone())),
        };
        self.token(kind, ident, span)
    }

    fn dollar_ident(&mut self, span: Span) -> Result<Token, CoreError> {
        self.bump();
        if !self.peek().is_some_and(is_ident_start) {
            return Err(self.err(span, "invalid identifier after `$`"));
        }
        let name = self.ident_body();
        Ok(self.token(TokenKind::DollarIdent(name.clone()), format!("${name}"), span))
    }

    fn hash_directive(&mut self, span: Span) -> Result<Token, CoreError> {
        self.bump();
        let name = self.ident_body();
        let kind = match name.as_str() {
            "init" => TokenKind::HashInit,
            "load" => TokenKind::HashLoad,
            "call" => TokenKind::HashCall,
            "exit" => TokenKind::HashExit,
            "lease" => TokenKind::HashLease,
            "sublease" => TokenKind::HashSublease,
            "release" => TokenKind::HashRelease,
            "check_exp" => TokenKind::HashCheckExp,
            "render" => TokenKind::HashRender,
            "input" => TokenKind::HashInput,
            "output" => TokenKind::HashOutput,
            "send" => TokenKind::HashSend,
            "recv" => TokenKind::HashRecv,
            "spawn" => TokenKind::HashSpawn,
            "join" => TokenKind::HashJoin,
            "stamp" => TokenKind::HashStamp,
            "expire" => TokenKind::HashExpire,
            "sleep" => TokenKind::HashSleep,
            "yield" => TokenKind::HashYield,
            "error" => TokenKind::HashError,
            "if" => TokenKind::HashIf,
            "else" => TokenKind::HashElse,
            "endif" => TokenKind::HashEndif,
            "loop" => TokenKind::HashLoop,
            "break" => TokenKind::HashBreak,
            "continue" => TokenKind::HashContinue,
            _ => return Err(self.err(span, format!("unknown directive '#{name}'"))),
        };
        Ok(self.token(kind, format!("#{name}"), span))
    }

    fn at_directive(&mut self, span: Span) -> Result<Token, CoreError> {
        self.bump();
        let name = self.ident_body();
        let kind = match name.as_str() {
            "main" => TokenKind::AtMain,
            "entry_point" => TokenKind::AtEntryPoint,
            "module" => TokenKind::AtModule,
            "export" => TokenKind::AtExport,
            "import" => TokenKind::AtImport,
            _ => return Err(self.err(span, format!("unknown directive '@{name}'"))),
        };
        Ok(self.token(kind, format!("@{name}"), span))
    }

    fn number_or_duration(&mut self, span: Span) -> Result<Token, CoreError> {
        // Hex literals take no unit suffix.
        if self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'x' | b'X')) {
            let start = self.i;
            self.bump();
            self.bump();
            let digits = self.i;
            while self.peek().is_some_and(|b| b.is_ascii_hexdigit()) {
                self.bump();
            }
            if self.i == digits {
                return Err(self.err(span, "invalid hex literal"));
            }
            let lexeme = self.src[start..self.i].to_string();
            let value = u64::from_str_radix(&lexeme[2..], 16)
                .map_err(|_| self.err(span, format!("hex literal {lexeme} out of range")))?;
            return Ok(self.token(TokenKind::Hex(value as i64), lexeme, span));
        }

        let start = self.i;
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.bump();
        }
        let digits = self.src[start..self.i].to_string();
        let value: i64 = digits
            .parse()
            .map_err(|_| self.err(span, format!("integer literal {digits} out of range")))?;

        if self.peek().is_some_and(is_ident_start) {
            let suffix = self.ident_body();
            let scale: i64 = match suffix.as_str() {
                "ns" => 1,
                "ms" => 1_000_000,
                "s" => 1_000_000_000,
                "m" => 60 * 1_000_000_000,
                "h" => 3_600 * 1_000_000_000,
                _ => {
                    return Err(self.err(span, format!("unknown duration suffix '{suffix}'")));
                }
            };
            let ns = value
                .checked_mul(scale)
                .ok_or_else(|| self.err(span, format!("duration {digits}{suffix} overflows")))?;
            return Ok(self.token(TokenKind::Duration(ns), format!("{digits}{suffix}"), span));
        }

        Ok(self.token(TokenKind::Int(value), digits, span))
    }

    fn string_literal(&mut self, span: Span) -> Result<Token, CoreError> {
        self.bump();
        let mut out = String::new();
        loop {
            let Some(b) = self.peek() else {
                return Err(self.err(span, "unterminated string literal"));
            };
            match b {
                b'"' => {
                    self.bump();
                    let lexeme = format!("\"{out}\"");
                    return Ok(self.token(TokenKind::Str(out), lexeme, span));
                }
                b'\\' => {
                    let esc_span = self.span();
                    self.bump();
                    let Some(esc) = self.peek() else {
                        return Err(self.err(esc_span, "unterminated escape sequence"));
                    };
                    self.bump();
                    match esc {
                        b'n' => out.push('\n'),
                        b't' => out.push('\t'),
                        b'"' => out.push('"'),
                        b'\\' => out.push('\\'),
                        b'x' => {
                            let hi = self.peek();
                            let lo = self.peek_at(1);
                            let (Some(hi), Some(lo)) = (hi, lo) else {
                                return Err(self.err(esc_span, "bad \\x escape"));
                            };
                            if !hi.is_ascii_hexdigit() || !lo.is_ascii_hexdigit() {
                                return Err(self.err(esc_span, "bad \\x escape"));
                            }
                            self.bump();
                            self.bump();
                            let byte = (hex_val(hi) << 4) | hex_val(lo);
                            out.push(char::from_u32(byte as u32).unwrap_or('\u{FFFD}'));
                        }
                        other if other.is_ascii() => {
                            return Err(self.err(
                                esc_span,
                                format!("unknown escape '\\{}'", other as char),
                            ));
                        }
                        _ => return Err(self.err(esc_span, "unknown escape")),
                    }
                }
                _ => {
                    // Decode a full character so multibyte content survives.
                    let Some(ch) = self.src[self.i..].chars().next() else {
                        return Err(self.err(span, "unterminated string literal"));
                    };
                    for _ in 0..ch.len_utf8() {
                        self.bump();
                    }
                    out.push(ch);
                }
            }
        }
    }

    fn operator(&mut self) -> Option<TokenKind> {
        let b = self.peek()?;
        let two = match (b, self.peek_at(1)) {
            (b'=', Some(b'=')) => Some(TokenKind::EqEq),
            (b'!', Some(b'=')) => Some(TokenKind::BangEq),
            (b'<', Some(b'=')) => Some(TokenKind::Le),
            (b'>', Some(b'=')) => Some(TokenKind::Ge),
            (b'&', Some(b'&')) => Some(TokenKind::AndAnd),
            (b'|', Some(b'|')) => Some(TokenKind::OrOr),
            _ => None,
        };
        if let Some(kind) = two {
            self.bump();
            self.bump();
            return Some(kind);
        }
        let one = match b {
            b'=' => TokenKind::Assign,
            b'<' => TokenKind::Lt,
            b'>' => TokenKind::Gt,
            b'+' => TokenKind::Plus,
            b'-' => TokenKind::Minus,
            b'*' => TokenKind::Star,
            b'/' => TokenKind::Slash,
            b'%' => TokenKind::Percent,
            b'!' => TokenKind::Bang,
            b'~' => TokenKind::Tilde,
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,
            b'{' => TokenKind::LBrace,
            b'}' => TokenKind::RBrace,
            b'[' => TokenKind::LBracket,
            b']' => TokenKind::RBracket,
            b',' => TokenKind::Comma,
            b';' => TokenKind::Semi,
            b'.' => TokenKind::Dot,
            _ => return None,
        };
        self.bump();
        Some(one)
    }
}

fn keyword_kind(ident: &str) -> Option<TokenKind> {
    let kind = match ident {
        "initialize" => TokenKind::KwInitialize,
        "capsule" => TokenKind::KwCapsule,
        "packet" => TokenKind::KwPacket,
        "assign" => TokenKind::KwAssign,
        "value" => TokenKind::KwValue,
        "to" => TokenKind::KwTo,
        "invoke" => TokenKind::KwInvoke,
        "function" => TokenKind::KwFunction,
        "with" => TokenKind::KwWith,
        "terminate" => TokenKind::KwTerminate,
        "execution" => TokenKind::KwExecution,
        "if" => TokenKind::KwIf,
        "else" => TokenKind::KwElse,
        "loop" => TokenKind::KwLoop,
        "goto" => TokenKind::KwGoto,
        "worker" => TokenKind::KwWorker,
        "let" => TokenKind::KwLet,
        "return" => TokenKind::KwReturn,
        "print" => TokenKind::KwPrint,
        "byte" => TokenKind::KwByte,
        "u8" => TokenKind::KwU8,
        "u16" => TokenKind::KwU16,
        "u32" => TokenKind::KwU32,
        "u64" => TokenKind::KwU64,
        "i8" => TokenKind::KwI8,
        "i16" => TokenKind::KwI16,
        "i32" => TokenKind::KwI32,
        "i64" => TokenKind::KwI64,
        "f32" => TokenKind::KwF32,
        "f64" => TokenKind::KwF64,
        "bool" => TokenKind::KwBool,
        "stamp" => TokenKind::KwStamp,
        "duration" => TokenKind::KwDuration,
        _ => return None,
    };
    Some(kind)
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn hex_val(b: u8) -> u8 {
    match b {
        b'0'..=b'9' => b - b'0',
        b'a'..=b'f' => b - b'a' + 10,
        _ => b - b'A' + 10,
    }
}
