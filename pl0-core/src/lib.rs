//! Core of the PL/0 toolchain.
//!
//! The pipeline is:
//!
//!   source .pl0
//!     -> lexer     (tokens + warnings)
//!     -> parser    (AST)
//!     -> semantic  (symbol table)
//!     -> irgen     (flat, line-tagged IR)
//!     -> codegen_wat | codegen_script (target text)
//!
//! The debugger consumes the IR and symbol table directly. Higher-level tools
//! should depend on this crate rather than reimplementing the pipeline.

// ---------------------------------------------------------------------
// Error handling, diagnostics and logging
// ---------------------------------------------------------------------

pub mod diagnostic;
pub mod error;
pub mod log;

// ---------------------------------------------------------------------
// Front-end: lexing, parsing and analysis
// ---------------------------------------------------------------------

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod semantic;

// ---------------------------------------------------------------------
// Intermediate representation and back-ends
// ---------------------------------------------------------------------

pub mod codegen;
pub mod codegen_script;
pub mod codegen_wat;
pub mod host;
pub mod ir;
pub mod irgen;

// ---------------------------------------------------------------------
// Orchestration: staged compilation, debugging, source loading
// ---------------------------------------------------------------------

pub mod compiler;
pub mod debugger;
pub mod sources;

// ---------------------------------------------------------------------
// Public API re-exports
// ---------------------------------------------------------------------

pub use codegen::{Backend, TargetKind};
pub use compiler::{CompileOptions, CompileReport, Stage, StageSet, compile, emit};
pub use debugger::{DebugConfig, DebugEvent, DebugSession, run_to_line};
pub use error::CoreError;
