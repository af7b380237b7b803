use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("lex error at {line}:{column}: {message}")]
    Lex {
        line: u32,
        column: u32,
        message: String,
    },
    #[error("parse error at {line}:{column}: {message}")]
    Parse {
        line: u32,
        column: u32,
        message: String,
    },
    #[error("star-code validation failed with {errors} error(s)")]
    StarCode { errors: usize },
    #[error("emit error at {line}:{column}: {message}")]
    Emit {
        line: u32,
        column: u32,
        message: String,
    },
    #[error("unresolved symbol `{symbol}` at fixup offset {offset}")]
    UnresolvedSymbol { symbol: String, offset: u32 },
    #[error("duplicate function `${name}`")]
    DuplicateFunction { name: String },
}
