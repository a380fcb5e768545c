//! Pieces shared by the code generators and the debug engine.
//!
//! Each consumer of the flat IR rebuilds the control nesting with its own
//! `MarkerStack` and resolves names with its own `NameScopes`; nothing here
//! is shared across calls.

use core::fmt;
use core::str::FromStr;
use std::collections::HashSet;

use serde::Serialize;

use crate::codegen_script::ScriptBackend;
use crate::codegen_wat::WatBackend;
use crate::error::CodeGenError;
use crate::ir::Instruction;

/// A code generator: IR in, target text out.
pub trait Backend {
    fn name(&self) -> &'static str;
    fn generate(&self, code: &[Instruction]) -> Result<String, CodeGenError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TargetKind {
    /// WebAssembly text module.
    #[default]
    StackModule,
    /// Script rendering with `// <line>` annotations.
    Script,
}

impl TargetKind {
    pub fn backend(self) -> Box<dyn Backend> {
        match self {
            TargetKind::StackModule => Box::new(WatBackend),
            TargetKind::Script => Box::new(ScriptBackend),
        }
    }
}

impl FromStr for TargetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stackModule" | "stack-module" | "wat" => Ok(TargetKind::StackModule),
            "script" | "js" => Ok(TargetKind::Script),
            other => Err(format!("unknown target kind: {other}")),
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetKind::StackModule => f.write_str("stackModule"),
            TargetKind::Script => f.write_str("script"),
        }
    }
}

struct OpenMarker<F> {
    frame: F,
    marker: &'static str,
    line: usize,
}

/// Stack of open control markers.
pub struct MarkerStack<F> {
    open: Vec<OpenMarker<F>>,
}

impl<F> Default for MarkerStack<F> {
    fn default() -> Self {
        MarkerStack { open: Vec::new() }
    }
}

impl<F> MarkerStack<F> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: F, marker: &'static str, line: usize) {
        self.open.push(OpenMarker {
            frame,
            marker,
            line,
        });
    }

    /// Innermost open frame, if `accept` recognizes it as the one `instr` continues.
    pub fn top_mut(
        &mut self,
        instr: &Instruction,
        accept: impl Fn(&F) -> bool,
    ) -> Result<&mut F, CodeGenError> {
        match self.open.last_mut() {
            Some(open) if accept(&open.frame) => Ok(&mut open.frame),
            _ => Err(unmatched(instr)),
        }
    }

    /// Closes the innermost frame, which must be accepted by `accept`.
    pub fn pop(
        &mut self,
        instr: &Instruction,
        accept: impl Fn(&F) -> bool,
    ) -> Result<F, CodeGenError> {
        match self.open.last() {
            Some(open) if accept(&open.frame) => {}
            _ => return Err(unmatched(instr)),
        }
        self.open
            .pop()
            .map(|open| open.frame)
            .ok_or_else(|| unmatched(instr))
    }

    /// Fails when a marker is still open at the end of the stream.
    pub fn finish(self) -> Result<(), CodeGenError> {
        match self.open.last() {
            Some(open) => Err(CodeGenError::UnclosedMarker {
                marker: open.marker.to_string(),
                line: open.line,
            }),
            None => Ok(()),
        }
    }
}

fn unmatched(instr: &Instruction) -> CodeGenError {
    CodeGenError::UnmatchedMarker {
        marker: instr.op.to_string(),
        line: instr.line,
    }
}

pub fn underflow(instr: &Instruction) -> CodeGenError {
    CodeGenError::StackUnderflow {
        instruction: instr.op.to_string(),
        line: instr.line,
    }
}

#[derive(Debug, Default)]
struct Scope {
    /// Procedure path of this scope; empty for the global scope.
    path: Vec<String>,
    bindings: HashSet<String>,
    procedures: HashSet<String>,
}

/// Lexical scopes rebuilt from `DECLARE`/`CONST` and the procedure markers.
#[derive(Debug)]
pub struct NameScopes {
    scopes: Vec<Scope>,
}

impl Default for NameScopes {
    fn default() -> Self {
        NameScopes {
            scopes: vec![Scope::default()],
        }
    }
}

impl NameScopes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.bindings.insert(name.to_string());
        }
    }

    /// Registers a procedure in the current scope and enters its body.
    pub fn enter_procedure(&mut self, name: &str) {
        let mut path = self.current_path().to_vec();
        if let Some(scope) = self.scopes.last_mut() {
            scope.procedures.insert(name.to_string());
        }
        path.push(name.to_string());
        self.scopes.push(Scope {
            path,
            ..Scope::default()
        });
    }

    pub fn leave_procedure(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    pub fn current_path(&self) -> &[String] {
        self.scopes.last().map_or(&[], |s| s.path.as_slice())
    }

    pub fn in_procedure(&self) -> bool {
        self.scopes.len() > 1
    }

    /// Path of the procedure owning the innermost visible binding `name`.
    pub fn resolve(&self, name: &str) -> Option<&[String]> {
        self.scopes
            .iter()
            .rev()
            .find(|s| s.bindings.contains(name))
            .map(|s| s.path.as_slice())
    }

    /// Full path of the innermost visible procedure `name`.
    pub fn resolve_procedure(&self, name: &str) -> Option<Vec<String>> {
        self.scopes
            .iter()
            .rev()
            .find(|s| s.procedures.contains(name))
            .map(|s| {
                let mut path = s.path.clone();
                path.push(name.to_string());
                path
            })
    }

    pub fn resolve_or_err(
        &self,
        name: &str,
        instr: &Instruction,
    ) -> Result<String, CodeGenError> {
        self.resolve(name)
            .map(|path| qualify(path, name))
            .ok_or_else(|| unknown(name, instr))
    }

    pub fn resolve_procedure_or_err(
        &self,
        name: &str,
        instr: &Instruction,
    ) -> Result<String, CodeGenError> {
        self.resolve_procedure(name)
            .map(|path| path.join("."))
            .ok_or_else(|| unknown(name, instr))
    }
}

fn unknown(name: &str, instr: &Instruction) -> CodeGenError {
    CodeGenError::UnknownName {
        name: name.to_string(),
        line: instr.line,
    }
}

/// `p.q.x` for a binding `x` declared in procedure `q` nested in `p`.
pub fn qualify(path: &[String], name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", path.join("."), name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Op;

    fn instr(op: Op) -> Instruction {
        Instruction::new(op, 7)
    }

    #[test]
    fn marker_stack_matches_and_reports_leftovers() {
        let mut stack = MarkerStack::new();
        stack.push("while", "WHILE", 2);
        stack.push("if", "IF", 3);
        let err = stack.pop(&instr(Op::EndWhile), |f| *f == "while").unwrap_err();
        assert_eq!(
            err,
            CodeGenError::UnmatchedMarker {
                marker: "ENDWHILE".into(),
                line: 7
            }
        );
        assert_eq!(stack.pop(&instr(Op::EndIf), |f| *f == "if"), Ok("if"));
        assert_eq!(
            stack.finish(),
            Err(CodeGenError::UnclosedMarker {
                marker: "WHILE".into(),
                line: 2
            })
        );
    }

    #[test]
    fn closing_an_empty_stack_is_unmatched() {
        let mut stack: MarkerStack<()> = MarkerStack::new();
        assert!(matches!(
            stack.pop(&instr(Op::EndIf), |_| true),
            Err(CodeGenError::UnmatchedMarker { .. })
        ));
    }

    #[test]
    fn scopes_resolve_innermost_binding() {
        let mut scopes = NameScopes::new();
        scopes.declare("x");
        scopes.enter_procedure("p");
        scopes.declare("x");
        scopes.enter_procedure("q");
        let at = instr(Op::Load("x".into()));
        assert_eq!(scopes.resolve_or_err("x", &at), Ok("p.x".into()));
        assert_eq!(scopes.resolve_procedure_or_err("q", &at), Ok("p.q".into()));
        assert_eq!(scopes.resolve_procedure_or_err("p", &at), Ok("p".into()));
        scopes.leave_procedure();
        scopes.leave_procedure();
        assert_eq!(scopes.resolve_or_err("x", &at), Ok("x".into()));
        assert!(scopes.resolve_procedure("q").is_none());
        assert!(matches!(
            scopes.resolve_or_err("y", &at),
            Err(CodeGenError::UnknownName { .. })
        ));
    }

    #[test]
    fn parses_target_kinds() {
        assert_eq!("wat".parse(), Ok(TargetKind::StackModule));
        assert_eq!("stackModule".parse(), Ok(TargetKind::StackModule));
        assert_eq!("script".parse(), Ok(TargetKind::Script));
        assert!("llvm".parse::<TargetKind>().is_err());
    }

    #[test]
    fn backend_names_match_target_kinds() {
        for kind in [TargetKind::StackModule, TargetKind::Script] {
            assert_eq!(kind.backend().name(), kind.to_string());
        }
    }
}
