use std::path::PathBuf;

use thiserror::Error;

use crate::lexer::TokenKind;

/// Grammar violation. Parsing stops at the first one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("line {line}: expected {expected}, found {kind} '{found}'")]
    Unexpected {
        expected: String,
        found: String,
        kind: TokenKind,
        line: usize,
    },
    #[error("line {line}: number literal '{text}' does not fit in a 32-bit integer")]
    NumberOutOfRange { text: String, line: usize },
}

impl ParseError {
    pub fn line(&self) -> usize {
        match self {
            ParseError::Unexpected { line, .. } | ParseError::NumberOutOfRange { line, .. } => {
                *line
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SemanticError {
    #[error("line {line}: '{name}' is already declared in this scope")]
    DuplicateDeclaration { name: String, line: usize },
    #[error("line {line}: '{name}' is not a declared variable or constant")]
    UndeclaredVariable { name: String, line: usize },
    #[error("line {line}: '{name}' is not a declared procedure")]
    UndeclaredProcedure { name: String, line: usize },
    #[error("line {line}: cannot assign to constant '{name}'")]
    ConstAssignment { name: String, line: usize },
    #[error("line {line}: constant initializer '{name}' is not a constant")]
    NonConstantInitializer { name: String, line: usize },
}

/// Malformed IR reaching a backend. IR produced by `irgen` never triggers these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodeGenError {
    #[error("line {line}: {marker} has no matching opening marker")]
    UnmatchedMarker { marker: String, line: usize },
    #[error("line {line}: {marker} is never closed")]
    UnclosedMarker { marker: String, line: usize },
    #[error("line {line}: {marker} appears after the else branch")]
    MisplacedBranch { marker: String, line: usize },
    #[error("line {line}: {instruction} needs a value but the expression stack is empty")]
    StackUnderflow { instruction: String, line: usize },
    #[error("line {line}: '{name}' does not resolve to any declaration")]
    UnknownName { name: String, line: usize },
}

/// Failure that terminates a debug session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DebugError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Semantic(#[from] SemanticError),
    /// Malformed IR; the session cannot continue.
    #[error("structural error: {0}")]
    Structural(#[from] CodeGenError),
    #[error("line {line}: division by zero")]
    DivisionByZero { line: usize },
    #[error("execution exceeded the step limit of {limit}")]
    StepLimitExceeded { limit: usize },
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to read source: {0}")]
    SourceIo(#[from] std::io::Error),
    #[error("source directory was not found at {0}")]
    MissingSourceRoot(PathBuf),
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("semantic error: {0}")]
    Semantic(#[from] SemanticError),
    #[error("code generation error: {0}")]
    CodeGen(#[from] CodeGenError),
}
