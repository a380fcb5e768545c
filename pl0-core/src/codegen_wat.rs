//! Stack-module backend: IR to a WebAssembly text module.
//!
//! Expressions are folded into s-expressions on a symbolic stack, so the
//! guard of an `ELSEIF` (which precedes the marker) is simply popped when the
//! marker arrives. Every binding becomes a module global; a procedure's own
//! variables are saved into wasm locals on entry and restored on return, which
//! gives each activation a fresh set of locals while nested procedures still
//! reach the innermost activation of their enclosing one.
//!
//! Module shape:
//!
//! ```text
//! (module
//!   (import "env" "read" (func $__read (result i32)))
//!   (import "env" "write" (func $__write (param i32)))
//!   (global $x (export "x") (mut i32) (i32.const 0))
//!   (func $p ...)
//!   (func $__main (export "main") ...))
//! ```

use crate::ast::BinaryOp;
use crate::codegen::{Backend, MarkerStack, NameScopes, qualify, underflow};
use crate::error::CodeGenError;
use crate::host::{HOST_FUNCTIONS, HostKind, host_function};
use crate::ir::{Instruction, Op};

pub const ENTRY_EXPORT: &str = "main";

pub struct WatBackend;

impl Backend for WatBackend {
    fn name(&self) -> &'static str {
        "stackModule"
    }

    fn generate(&self, code: &[Instruction]) -> Result<String, CodeGenError> {
        let mut emitter = Emitter::default();
        for instr in code {
            emitter.instruction(instr)?;
        }
        emitter.finish()
    }
}

enum Frame {
    Procedure,
    If { depth: usize, has_else: bool },
    While { label: usize },
    For { label: usize, var: String },
}

struct Function {
    id: String,
    export: Option<&'static str>,
    /// Qualified globals holding this procedure's own variables.
    saved: Vec<String>,
    body: Vec<String>,
    indent: usize,
    stack: Vec<String>,
}

impl Function {
    fn new(id: String, export: Option<&'static str>) -> Self {
        Function {
            id,
            export,
            saved: Vec::new(),
            body: Vec::new(),
            indent: 0,
            stack: Vec::new(),
        }
    }

    fn line(&mut self, text: impl AsRef<str>) {
        self.body
            .push(format!("{}{}", "  ".repeat(self.indent), text.as_ref()));
    }

    fn open(&mut self, text: impl AsRef<str>) {
        self.line(text);
        self.indent += 1;
    }

    fn close(&mut self) {
        self.indent = self.indent.saturating_sub(1);
        self.line(")");
    }

    fn render(&self) -> String {
        let mut out = format!("  (func ${}", self.id);
        if let Some(name) = self.export {
            out.push_str(&format!(" (export \"{name}\")"));
        }
        out.push('\n');
        for index in 0..self.saved.len() {
            out.push_str(&format!("    (local $__saved{index} i32)\n"));
        }
        for (index, global) in self.saved.iter().enumerate() {
            out.push_str(&format!(
                "    (local.set $__saved{index} (global.get ${global}))\n"
            ));
            out.push_str(&format!("    (global.set ${global} (i32.const 0))\n"));
        }
        for line in &self.body {
            out.push_str(&format!("    {line}\n"));
        }
        for (index, global) in self.saved.iter().enumerate().rev() {
            out.push_str(&format!(
                "    (global.set ${global} (local.get $__saved{index}))\n"
            ));
        }
        out.push_str("  )\n");
        out
    }
}

struct Emitter {
    globals: Vec<String>,
    functions: Vec<String>,
    entry: Function,
    procedures: Vec<Function>,
    markers: MarkerStack<Frame>,
    scopes: NameScopes,
    labels: usize,
}

impl Default for Emitter {
    fn default() -> Self {
        Emitter {
            globals: Vec::new(),
            functions: Vec::new(),
            entry: Function::new("__main".to_string(), Some(ENTRY_EXPORT)),
            procedures: Vec::new(),
            markers: MarkerStack::new(),
            scopes: NameScopes::new(),
            labels: 0,
        }
    }
}

impl Emitter {
    fn current(&mut self) -> &mut Function {
        match self.procedures.last_mut() {
            Some(function) => function,
            None => &mut self.entry,
        }
    }

    fn push(&mut self, value: String) {
        self.current().stack.push(value);
    }

    fn pop(&mut self, instr: &Instruction) -> Result<String, CodeGenError> {
        self.current().stack.pop().ok_or_else(|| underflow(instr))
    }

    fn next_label(&mut self) -> usize {
        self.labels += 1;
        self.labels
    }

    fn declare(&mut self, name: &str, constant: Option<i32>) {
        self.scopes.declare(name);
        let global = qualify(self.scopes.current_path(), name);
        let export = if self.scopes.in_procedure() || name == ENTRY_EXPORT {
            String::new()
        } else {
            format!(" (export \"{name}\")")
        };
        let line = match constant {
            Some(value) => format!("(global ${global}{export} i32 (i32.const {value}))"),
            None => format!("(global ${global}{export} (mut i32) (i32.const 0))"),
        };
        self.globals.push(line);
        if constant.is_none() && self.scopes.in_procedure() {
            self.current().saved.push(global);
        }
    }

    fn instruction(&mut self, instr: &Instruction) -> Result<(), CodeGenError> {
        match &instr.op {
            Op::Declare(name) => self.declare(name, None),
            Op::Const(name, value) => self.declare(name, Some(*value)),
            Op::Load(name) => {
                let global = self.scopes.resolve_or_err(name, instr)?;
                self.push(format!("(global.get ${global})"));
            }
            Op::Push(value) => self.push(format!("(i32.const {value})")),
            Op::Oper(op) => {
                let right = self.pop(instr)?;
                let left = self.pop(instr)?;
                self.push(format!("({} {left} {right})", wat_instruction(*op)));
            }
            Op::Store(name) => {
                let global = self.scopes.resolve_or_err(name, instr)?;
                let value = self.pop(instr)?;
                self.current().line(format!("(global.set ${global} {value})"));
            }
            Op::Call(name) => {
                let id = self.scopes.resolve_procedure_or_err(name, instr)?;
                self.current().line(format!("(call ${id})"));
            }
            Op::Read(name) => {
                let global = self.scopes.resolve_or_err(name, instr)?;
                let read = host_function(HostKind::Read).wat_id();
                self.current()
                    .line(format!("(global.set ${global} (call {read}))"));
            }
            Op::Write => {
                let value = self.pop(instr)?;
                let write = host_function(HostKind::Write).wat_id();
                self.current().line(format!("(call {write} {value})"));
            }
            Op::ProcedureStart(name) => {
                self.scopes.enter_procedure(name);
                let id = self.scopes.current_path().join(".");
                self.procedures.push(Function::new(id, None));
                self.markers
                    .push(Frame::Procedure, "PROCEDURE_START", instr.line);
            }
            Op::ProcedureEnd(_) => {
                self.markers
                    .pop(instr, |f| matches!(f, Frame::Procedure))?;
                if let Some(function) = self.procedures.pop() {
                    self.functions.push(function.render());
                }
                self.scopes.leave_procedure();
            }
            Op::If => {
                let condition = self.pop(instr)?;
                let function = self.current();
                function.open(format!("(if {condition}"));
                function.open("(then");
                self.markers.push(
                    Frame::If {
                        depth: 1,
                        has_else: false,
                    },
                    "IF",
                    instr.line,
                );
            }
            Op::ElseIf => {
                self.continue_if(instr, false)?;
                let condition = self.pop(instr)?;
                let function = self.current();
                function.close();
                function.open("(else");
                function.open(format!("(if {condition}"));
                function.open("(then");
            }
            Op::Else => {
                self.continue_if(instr, true)?;
                let function = self.current();
                function.close();
                function.open("(else");
            }
            Op::EndIf => {
                let depth = match self
                    .markers
                    .pop(instr, |f| matches!(f, Frame::If { .. }))?
                {
                    Frame::If { depth, .. } => depth,
                    _ => 1,
                };
                let function = self.current();
                // Each level is one arm plus its `if`.
                for _ in 0..depth * 2 {
                    function.close();
                }
            }
            Op::While => {
                let label = self.next_label();
                let function = self.current();
                function.open(format!("(block $brk{label}"));
                function.open(format!("(loop $loop{label}"));
                self.markers
                    .push(Frame::While { label }, "WHILE", instr.line);
            }
            Op::Do => {
                let label = match self
                    .markers
                    .top_mut(instr, |f| matches!(f, Frame::While { .. }))?
                {
                    Frame::While { label } => *label,
                    _ => 0,
                };
                let condition = self.pop(instr)?;
                self.current()
                    .line(format!("(br_if $brk{label} (i32.eqz {condition}))"));
            }
            Op::EndWhile => {
                if let Frame::While { label } = self
                    .markers
                    .pop(instr, |f| matches!(f, Frame::While { .. }))?
                {
                    let function = self.current();
                    function.line(format!("(br $loop{label})"));
                    function.close();
                    function.close();
                }
            }
            Op::ForInit(name) => {
                let var = self.scopes.resolve_or_err(name, instr)?;
                let init = self.pop(instr)?;
                let label = self.next_label();
                let function = self.current();
                function.line(format!("(global.set ${var} {init})"));
                function.open(format!("(block $brk{label}"));
                function.open(format!("(loop $loop{label}"));
                self.markers
                    .push(Frame::For { label, var }, "FOR_INIT", instr.line);
            }
            Op::ForTo(_) => {
                let (label, var) = match self
                    .markers
                    .top_mut(instr, |f| matches!(f, Frame::For { .. }))?
                {
                    Frame::For { label, var } => (*label, var.clone()),
                    _ => (0, String::new()),
                };
                let bound = self.pop(instr)?;
                self.current().line(format!(
                    "(br_if $brk{label} (i32.ge_s (global.get ${var}) {bound}))"
                ));
            }
            Op::EndFor(_) => {
                if let Frame::For { label, var } = self
                    .markers
                    .pop(instr, |f| matches!(f, Frame::For { .. }))?
                {
                    let function = self.current();
                    function.line(format!(
                        "(global.set ${var} (i32.add (global.get ${var}) (i32.const 1)))"
                    ));
                    function.line(format!("(br $loop{label})"));
                    function.close();
                    function.close();
                }
            }
        }
        Ok(())
    }

    /// Validates an `ELSEIF`/`ELSE` against the innermost open `IF`.
    fn continue_if(&mut self, instr: &Instruction, is_else: bool) -> Result<(), CodeGenError> {
        let frame = self
            .markers
            .top_mut(instr, |f| matches!(f, Frame::If { .. }))?;
        if let Frame::If { depth, has_else } = frame {
            if *has_else {
                return Err(CodeGenError::MisplacedBranch {
                    marker: instr.op.to_string(),
                    line: instr.line,
                });
            }
            if is_else {
                *has_else = true;
            } else {
                *depth += 1;
            }
        }
        Ok(())
    }

    fn finish(self) -> Result<String, CodeGenError> {
        self.markers.finish()?;
        if !self.entry.stack.is_empty() && crate::log::is_verbose() {
            eprintln!(
                "codegen: {} unused value(s) left on the expression stack",
                self.entry.stack.len()
            );
        }

        let mut out = String::from("(module\n");
        for function in HOST_FUNCTIONS {
            out.push_str(&format!("  {}\n", function.wat_import()));
        }
        for global in &self.globals {
            out.push_str(&format!("  {global}\n"));
        }
        for function in &self.functions {
            out.push_str(function);
        }
        out.push_str(&self.entry.render());
        out.push_str(")\n");
        Ok(out)
    }
}

fn wat_instruction(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "i32.add",
        BinaryOp::Sub => "i32.sub",
        BinaryOp::Mul => "i32.mul",
        BinaryOp::Div => "i32.div_s",
        BinaryOp::Lt => "i32.lt_s",
        BinaryOp::Le => "i32.le_s",
        BinaryOp::Eq => "i32.eq",
        BinaryOp::Ne => "i32.ne",
        BinaryOp::Gt => "i32.gt_s",
        BinaryOp::Ge => "i32.ge_s",
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::irgen::generate;
    use crate::parser::parse_source;

    #[derive(Default)]
    struct HostState {
        inputs: Vec<i32>,
        outputs: Vec<i32>,
    }

    pub(crate) struct Execution {
        pub outputs: Vec<i32>,
        pub globals: Vec<(String, i32)>,
    }

    impl Execution {
        pub fn global(&self, name: &str) -> Option<i32> {
            self.globals
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| *v)
        }
    }

    pub(crate) fn wat_for(source: &str) -> String {
        let program = parse_source(source).expect("parse");
        WatBackend.generate(&generate(&program)).expect("codegen")
    }

    /// Runs the module for `source` under wasmi; `read` yields `inputs` in order, then 0.
    pub(crate) fn execute(source: &str, inputs: &[i32], globals: &[&str]) -> Execution {
        let wat = wat_for(source);
        let engine = wasmi::Engine::default();
        let module = wasmi::Module::new(&engine, wat.as_bytes()).expect("module");
        let mut linker = wasmi::Linker::new(&engine);
        linker
            .func_wrap(
                "env",
                "read",
                |mut caller: wasmi::Caller<'_, HostState>| -> i32 {
                    let state = caller.data_mut();
                    if state.inputs.is_empty() {
                        0
                    } else {
                        state.inputs.remove(0)
                    }
                },
            )
            .expect("link read");
        linker
            .func_wrap(
                "env",
                "write",
                |mut caller: wasmi::Caller<'_, HostState>, value: i32| {
                    caller.data_mut().outputs.push(value);
                },
            )
            .expect("link write");
        let mut store = wasmi::Store::new(
            &engine,
            HostState {
                inputs: inputs.to_vec(),
                outputs: Vec::new(),
            },
        );
        let instance = linker
            .instantiate_and_start(&mut store, &module)
            .expect("instantiate");
        let main = instance
            .get_typed_func::<(), ()>(&store, ENTRY_EXPORT)
            .expect("typed func");
        main.call(&mut store, ()).expect("execute main");

        let globals = globals
            .iter()
            .map(|name| {
                let global = instance.get_global(&store, name).expect("exported global");
                let value = match global.get(&store) {
                    wasmi::Val::I32(value) => value,
                    other => panic!("unexpected global value {other:?}"),
                };
                (name.to_string(), value)
            })
            .collect();
        Execution {
            outputs: store.data().outputs.clone(),
            globals,
        }
    }

    #[test]
    fn emits_imports_globals_and_entry() {
        let wat = wat_for("const c = 5; var x; x := c;");
        assert!(wat.starts_with("(module\n"));
        assert!(wat.contains("(import \"env\" \"read\" (func $__read (result i32)))"));
        assert!(wat.contains("(global $c (export \"c\") i32 (i32.const 5))"));
        assert!(wat.contains("(global $x (export \"x\") (mut i32) (i32.const 0))"));
        assert!(wat.contains("(func $__main (export \"main\")"));
        assert!(wat.contains("(global.set $x (global.get $c))"));
    }

    #[test]
    fn runs_arithmetic_with_precedence() {
        let run = execute("var x; x := 2 + 3 * 4 - 6 / 2;", &[], &["x"]);
        assert_eq!(run.global("x"), Some(11));
    }

    #[test]
    fn runs_if_chain() {
        let source = "var x, y;\nread x;\nif x = 0 then y := 10;\nelse if x = 1 then y := 20;\nelse if x = 2 then y := 30;\nelse y := 40;\nendif;";
        for (input, expected) in [(0, 10), (1, 20), (2, 30), (7, 40)] {
            let run = execute(source, &[input], &["y"]);
            assert_eq!(run.global("y"), Some(expected), "input {input}");
        }
    }

    #[test]
    fn runs_loops_and_writes() {
        let run = execute(
            "var i, s; while i < 4 do s := s + i; i := i + 1; endwhile; for i := 1 to 4 do write i; endfor",
            &[],
            &["i", "s"],
        );
        assert_eq!(run.global("s"), Some(6));
        assert_eq!(run.outputs, vec![1, 2, 3]);
        assert_eq!(run.global("i"), Some(4));
    }

    #[test]
    fn for_bound_is_reevaluated_each_iteration() {
        let run = execute(
            "var i, n = 3, count; for i := 0 to n do n := n - 1; count := count + 1; endfor",
            &[],
            &["count"],
        );
        assert_eq!(run.global("count"), Some(2));
    }

    #[test]
    fn procedure_locals_are_fresh_per_activation() {
        let source = "var n;\nprocedure down;\nvar mine;\nbegin\n  mine := n;\n  if n > 0 then n := n - 1; call down; endif;\n  write mine;\nend;\nn := 3;\ncall down;";
        let run = execute(source, &[], &[]);
        assert_eq!(run.outputs, vec![0, 1, 2, 3]);
    }

    #[test]
    fn nested_procedure_reaches_enclosing_local() {
        let source = "var r;\nprocedure outer;\nvar t;\nbegin\n  procedure inner; r := t * 2;\n  t := 21;\n  call inner;\nend;\ncall outer;";
        let run = execute(source, &[], &["r"]);
        assert_eq!(run.global("r"), Some(42));
    }

    #[test]
    fn shadowed_local_does_not_touch_global() {
        let run = execute("var t = 5; procedure p; var t; t := 9; call p;", &[], &["t"]);
        assert_eq!(run.global("t"), Some(5));
    }

    #[test]
    fn read_uses_host_values() {
        let run = execute("var a, b; read (a, b); write a + b;", &[4, 38], &[]);
        assert_eq!(run.outputs, vec![42]);
    }

    #[test]
    fn rejects_unmatched_and_unclosed_markers() {
        let err = WatBackend
            .generate(&[Instruction::new(Op::EndIf, 4)])
            .unwrap_err();
        assert!(matches!(err, CodeGenError::UnmatchedMarker { line: 4, .. }));

        let code = vec![
            Instruction::new(Op::While, 1),
            Instruction::new(Op::Push(1), 1),
            Instruction::new(Op::Do, 1),
        ];
        let err = WatBackend.generate(&code).unwrap_err();
        assert_eq!(
            err,
            CodeGenError::UnclosedMarker {
                marker: "WHILE".into(),
                line: 1
            }
        );
    }

    #[test]
    fn rejects_branch_after_else_and_stack_underflow() {
        let code = vec![
            Instruction::new(Op::Push(1), 1),
            Instruction::new(Op::If, 1),
            Instruction::new(Op::Else, 1),
            Instruction::new(Op::Push(0), 2),
            Instruction::new(Op::ElseIf, 2),
        ];
        assert!(matches!(
            WatBackend.generate(&code),
            Err(CodeGenError::MisplacedBranch { line: 2, .. })
        ));
        assert!(matches!(
            WatBackend.generate(&[Instruction::new(Op::Write, 3)]),
            Err(CodeGenError::StackUnderflow { line: 3, .. })
        ));
    }
}
