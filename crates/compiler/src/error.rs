//! Compiler diagnostics
//!
//! Every phase is fail-fast: the first error aborts the phase and propagates
//! to the caller as a [`Diagnostic`] carrying the phase tag, the source
//! position when one is known, and a human-readable message. Nothing is
//! printed from library code; the CLI decides how to render.

/// Which phase produced a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Lexer,
    Parser,
    Symbols,
    Codegen,
    Assembler,
    Linker,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Lexer => "lexer",
            Phase::Parser => "parser",
            Phase::Symbols => "symbols",
            Phase::Codegen => "codegen",
            Phase::Assembler => "assembler",
            Phase::Linker => "linker",
        }
    }
}

/// A single compile error.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub phase: Phase,
    /// 1-based source line, when known.
    pub line: Option<u32>,
    /// 1-based source column, when known.
    pub column: Option<u32>,
    pub message: String,
}

impl Diagnostic {
    pub fn lexer(line: u32, column: u32, message: impl Into<String>) -> Self {
        Diagnostic {
            phase: Phase::Lexer,
            line: Some(line),
            column: Some(column),
            message: message.into(),
        }
    }

    pub fn parser(line: u32, column: u32, message: impl Into<String>) -> Self {
        Diagnostic {
            phase: Phase::Parser,
            line: Some(line),
            column: Some(column),
            message: message.into(),
        }
    }

    pub fn symbols(line: u32, message: impl Into<String>) -> Self {
        Diagnostic {
            phase: Phase::Symbols,
            line: Some(line),
            column: None,
            message: message.into(),
        }
    }

    pub fn codegen(line: u32, message: impl Into<String>) -> Self {
        Diagnostic {
            phase: Phase::Codegen,
            line: Some(line),
            column: None,
            message: message.into(),
        }
    }

    pub fn assembler(message: impl Into<String>) -> Self {
        Diagnostic {
            phase: Phase::Assembler,
            line: None,
            column: None,
            message: message.into(),
        }
    }

    pub fn linker(message: impl Into<String>) -> Self {
        Diagnostic {
            phase: Phase::Linker,
            line: None,
            column: None,
            message: message.into(),
        }
    }

    /// Attach a phase-free context prefix, keeping position intact.
    pub fn with_context(mut self, context: &str) -> Self {
        self.message = format!("{}: {}", context, self.message);
        self
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.line, self.column) {
            (Some(line), Some(col)) => {
                write!(f, "{} error at {}:{}: {}", self.phase.as_str(), line, col, self.message)
            }
            (Some(line), None) => {
                write!(f, "{} error at line {}: {}", self.phase.as_str(), line, self.message)
            }
            _ => write!(f, "{} error: {}", self.phase.as_str(), self.message),
        }
    }
}

impl std::error::Error for Diagnostic {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_position() {
        let d = Diagnostic::parser(3, 7, "unexpected token ';'");
        assert_eq!(d.to_string(), "parser error at 3:7: unexpected token ';'");
    }

    #[test]
    fn test_display_without_position() {
        let d = Diagnostic::linker("task 'main' names no programs");
        assert_eq!(d.to_string(), "linker error: task 'main' names no programs");
    }

    #[test]
    fn test_with_context() {
        let d = Diagnostic::assembler("unknown label 'loop_3'").with_context("FastLogic");
        assert_eq!(
            d.to_string(),
            "assembler error: FastLogic: unknown label 'loop_3'"
        );
    }
}
