//! Diagnostic reporting
//!
//! A single channel for lexical, preprocessor, syntactic, and semantic
//! errors/warnings. Every stage of the pipeline reports through a
//! [`DiagnosticSink`] rather than panicking or unwinding; the top-level
//! driver decides when a fatal diagnostic should stop the compile.

use crate::source::SourceLocation;
use std::fmt;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// Coarse classification of a diagnostic, matching the taxonomy in the
/// error-handling design: lexical, preprocessor, syntactic, semantic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    Lexical,
    Preprocessor,
    Syntactic,
    Semantic,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiagnosticKind::Lexical => "lexical",
            DiagnosticKind::Preprocessor => "preprocessor",
            DiagnosticKind::Syntactic => "syntactic",
            DiagnosticKind::Semantic => "semantic",
        };
        write!(f, "{s}")
    }
}

/// A single diagnostic message bound to a source location.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub location: SourceLocation,
    pub message: String,
}

impl Diagnostic {
    pub fn error(kind: DiagnosticKind, location: SourceLocation, message: impl Into<String>) -> Self {
        Diagnostic { severity: Severity::Error, kind, location, message: message.into() }
    }

    pub fn warning(kind: DiagnosticKind, location: SourceLocation, message: impl Into<String>) -> Self {
        Diagnostic { severity: Severity::Warning, kind, location, message: message.into() }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// `<file>:<line>:<column>: <severity>: <message>`
impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}: {}: {}",
            self.location.file.display_name(),
            self.location.line,
            self.location.column,
            self.severity,
            self.message
        )
    }
}

/// Collects diagnostics for a whole translation unit. A translation unit
/// keeps going after an error (limited resynchronization) so more than one
/// mistake can surface per run; `had_fatal` records whether the compile
/// as a whole must be treated as failed.
#[derive(Debug, Default)]
pub struct DiagnosticSink {
    diagnostics: Vec<Diagnostic>,
    had_fatal: bool,
}

impl DiagnosticSink {
    pub fn new() -> Self {
        DiagnosticSink::default()
    }

    pub fn push(&mut self, diag: Diagnostic) {
        if diag.is_error() {
            self.had_fatal = true;
        }
        self.diagnostics.push(diag);
    }

    pub fn error(&mut self, kind: DiagnosticKind, location: SourceLocation, message: impl Into<String>) {
        self.push(Diagnostic::error(kind, location, message));
    }

    pub fn warning(&mut self, kind: DiagnosticKind, location: SourceLocation, message: impl Into<String>) {
        self.push(Diagnostic::warning(kind, location, message));
    }

    pub fn had_fatal(&self) -> bool {
        self.had_fatal
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.is_error()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{SourceFile, SourceLocation};
    use std::rc::Rc;

    fn loc() -> SourceLocation {
        let file = Rc::new(SourceFile::from_str("t.c", ""));
        SourceLocation { file, line: 3, column: 7, offset: 0 }
    }

    #[test]
    fn formats_gcc_style() {
        let d = Diagnostic::error(DiagnosticKind::Syntactic, loc(), "expected ';'");
        assert_eq!(d.to_string(), "t.c:3:7: error: expected ';'");
    }

    #[test]
    fn sink_tracks_fatal() {
        let mut sink = DiagnosticSink::new();
        assert!(!sink.had_fatal());
        sink.warning(DiagnosticKind::Semantic, loc(), "unused variable");
        assert!(!sink.had_fatal());
        sink.error(DiagnosticKind::Semantic, loc(), "undeclared identifier");
        assert!(sink.had_fatal());
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.error_count(), 1);
    }
}
