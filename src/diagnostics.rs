//! Line-oriented diagnostics shared by the parser and both backends.
//!
//! Rendering follows `<file>:<line>:<col>: <kind>: <message>` with optional
//! suggestion lines. Backends accumulate diagnostics on a [`DiagnosticSink`]
//! instead of aborting; the driver consults the count after emission and
//! fails the compilation when it is nonzero.

use std::fmt::Display;

use colored::Colorize;
use sha2::{Digest, Sha256};

use crate::lexer::Span;
use crate::parser::ParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    Parse,
    Resolution,
    Lowering,
    Abi,
}

impl Display for DiagnosticKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiagnosticKind::Parse => f.write_str("parse error"),
            DiagnosticKind::Resolution => f.write_str("resolution error"),
            DiagnosticKind::Lowering => f.write_str("lowering error"),
            DiagnosticKind::Abi => f.write_str("abi error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub span: Span,
    pub message: String,
    pub suggestion: Option<String>,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, span: Span, message: impl ToString) -> Self {
        Diagnostic {
            kind,
            span,
            message: message.to_string(),
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl ToString) -> Self {
        self.suggestion = Some(suggestion.to_string());
        self
    }

    /// Plain rendering, one line plus optional suggestion lines.
    pub fn render(&self) -> String {
        let mut out = format!(
            "{}:{}:{}: {}: {}",
            self.span.filename,
            self.span.start.0,
            self.span.start.1,
            self.kind,
            self.message
        );
        if let Some(suggestion) = &self.suggestion {
            out.push_str(&format!("\n    suggestion: {suggestion}"));
        }
        out
    }

    /// Terminal rendering with the kind colored.
    pub fn render_colored(&self) -> String {
        let mut out = format!(
            "{}:{}:{}: {}: {}",
            self.span.filename,
            self.span.start.0,
            self.span.start.1,
            self.kind.to_string().red().bold(),
            self.message
        );
        if let Some(suggestion) = &self.suggestion {
            out.push_str(&format!("\n    {}: {suggestion}", "suggestion".cyan()));
        }
        out
    }
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}

impl From<ParseError> for Diagnostic {
    fn from(error: ParseError) -> Self {
        Diagnostic::new(
            DiagnosticKind::Parse,
            error.position.clone().unwrap_or_default(),
            format!("{}: {}", error.kind, error.message),
        )
    }
}

/// Per-compilation collector. Emission keeps going after an error so one
/// pass reports as much as possible.
#[derive(Debug, Default)]
pub struct DiagnosticSink {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        log::debug!("diagnostic: {}", diagnostic.render());
        self.diagnostics.push(diagnostic);
    }

    pub fn count(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }

    pub fn render_all(&self) -> String {
        self.diagnostics
            .iter()
            .map(|d| d.render())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Stable 32-bit identifier for a declared error name: the first four bytes
/// of SHA-256, big-endian, never zero (zero is the success tag).
pub fn error_id(name: &str) -> u32 {
    let digest = Sha256::digest(name.as_bytes());
    let id = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    if id == 0 {
        1
    } else {
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_id_is_stable_and_nonzero() {
        let a = error_id("DivZero");
        let b = error_id("DivZero");
        assert_eq!(a, b);
        assert_ne!(a, 0);
        assert_ne!(error_id("DivZero"), error_id("OutOfMemory"));
    }

    #[test]
    fn test_render_shape() {
        let span = Span::new((3, 7), (3, 10), "main.uya");
        let diag = Diagnostic::new(DiagnosticKind::Resolution, span, "unknown struct 'Pointt'")
            .with_suggestion("did you mean 'Point'?");
        let rendered = diag.render();
        assert!(rendered.starts_with("main.uya:3:7: resolution error: unknown struct"));
        assert!(rendered.contains("suggestion: did you mean 'Point'?"));
    }
}
