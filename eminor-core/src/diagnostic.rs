//! Star-Code diagnostics.
//!
//! The field set and names are an external contract: `a.star.json` is
//! `{"issues": [{"severity", "code", "line", "column", "message"}, ...]}`.

use serde::Serialize;

use crate::span::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: &'static str,
    pub line: u32,
    pub column: u32,
    pub message: String,
}

impl Diagnostic {
    pub fn warning(code: &'static str, span: Span, message: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Warning,
            code,
            line: span.line,
            column: span.column,
            message: message.into(),
        }
    }

    pub fn error(code: &'static str, span: Span, message: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Error,
            code,
            line: span.line,
            column: span.column,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// Render in the CLI's stderr format: `<severity>: <message> @<line>:<column>`.
    pub fn render(&self) -> String {
        let severity = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        format!(
            "{severity}: {} @{}:{}",
            self.message, self.line, self.column
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_contract_field_names() {
        let diag = Diagnostic::warning("SC001", Span::new(3, 7), "Capsule $A0 used before init/let");
        let json = serde_json::to_value(&diag).expect("serialize");
        assert_eq!(json["severity"], "warning");
        assert_eq!(json["code"], "SC001");
        assert_eq!(json["line"], 3);
        assert_eq!(json["column"], 7);
    }

    #[test]
    fn renders_stderr_line() {
        let diag = Diagnostic::error("SC040", Span::new(2, 11), "goto :missing targets undefined label");
        assert_eq!(
            diag.render(),
            "error: goto :missing targets undefined label @2:11"
        );
    }
}
