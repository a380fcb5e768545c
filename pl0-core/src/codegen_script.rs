//! Script backend: IR to JavaScript text.
//!
//! Every emitted statement ends with a `// <line>` comment naming the source
//! line it came from; `LineMap` reads those back so a host can translate
//! positions in the script to positions in the source. Procedures become
//! nested `function` declarations, which gives the same scoping as the source
//! language: a fresh set of locals per call, closures for enclosing locals.
//! `read()` and `write(value)` are host hooks.

use std::collections::BTreeMap;

use crate::ast::BinaryOp;
use crate::codegen::{Backend, MarkerStack, NameScopes, underflow};
use crate::error::CodeGenError;
use crate::host::{HostKind, host_function};
use crate::ir::{Instruction, Op};

pub const ENTRY_FUNCTION: &str = "main";

const HEADER: &str = "// PL/0 program. The host provides read() and write(value).";

const RESERVED: &[&str] = &[
    "await", "break", "case", "catch", "class", "const", "continue", "debugger", "default",
    "delete", "do", "else", "enum", "export", "extends", "false", "finally", "for", "function",
    "if", "import", "in", "instanceof", "let", "new", "null", "return", "static", "super",
    "switch", "this", "throw", "true", "try", "typeof", "var", "void", "while", "with", "yield",
    "arguments", "eval", "undefined", "NaN", "Infinity", "Math",
];

pub struct ScriptBackend;

impl Backend for ScriptBackend {
    fn name(&self) -> &'static str {
        "script"
    }

    fn generate(&self, code: &[Instruction]) -> Result<String, CodeGenError> {
        let mut emitter = Emitter::default();
        for instr in code {
            emitter.instruction(instr)?;
        }
        emitter.finish()
    }
}

/// Script identifier for a source identifier.
pub fn script_name(name: &str) -> String {
    let host = [
        host_function(HostKind::Read).name,
        host_function(HostKind::Write).name,
        ENTRY_FUNCTION,
    ];
    if RESERVED.contains(&name) || host.contains(&name) {
        format!("{name}_")
    } else {
        name.to_string()
    }
}

enum Value {
    Int(String),
    Bool(String),
}

impl Value {
    fn int(self) -> String {
        match self {
            Value::Int(text) => text,
            Value::Bool(text) => format!("({text} ? 1 : 0)"),
        }
    }

    fn condition(self) -> String {
        match self {
            Value::Int(text) | Value::Bool(text) => text,
        }
    }
}

enum Frame {
    Procedure,
    If { has_else: bool },
    While { line: usize },
    For { var: String, init: String },
}

struct Function {
    header: String,
    /// Nested procedure declarations, hoisted to the top of the body.
    nested: Vec<String>,
    body: Vec<String>,
    indent: usize,
    stack: Vec<Value>,
}

impl Function {
    fn new(header: String) -> Self {
        Function {
            header,
            nested: Vec::new(),
            body: Vec::new(),
            indent: 1,
            stack: Vec::new(),
        }
    }

    fn statement(&mut self, text: &str, line: usize) {
        self.body
            .push(format!("{}{text} // {line}", "  ".repeat(self.indent)));
    }

    fn open(&mut self, text: &str, line: usize) {
        self.statement(text, line);
        self.indent += 1;
    }

    fn close(&mut self) {
        self.indent = self.indent.saturating_sub(1);
        self.body.push(format!("{}}}", "  ".repeat(self.indent)));
    }

    fn render(&self) -> Vec<String> {
        let mut lines = vec![self.header.clone()];
        for function in &self.nested {
            lines.extend(function.lines().map(|l| format!("  {l}")));
        }
        lines.extend(self.body.iter().cloned());
        lines.push("}".to_string());
        lines
    }
}

struct Emitter {
    globals: Vec<String>,
    functions: Vec<String>,
    entry: Function,
    procedures: Vec<Function>,
    markers: MarkerStack<Frame>,
    scopes: NameScopes,
}

impl Default for Emitter {
    fn default() -> Self {
        Emitter {
            globals: Vec::new(),
            functions: Vec::new(),
            entry: Function::new(format!("function {ENTRY_FUNCTION}() {{")),
            procedures: Vec::new(),
            markers: MarkerStack::new(),
            scopes: NameScopes::new(),
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

    fn pop(&mut self, instr: &Instruction) -> Result<Value, CodeGenError> {
        self.current().stack.pop().ok_or_else(|| underflow(instr))
    }

    /// Checks that `name` resolves and returns its script identifier.
    fn binding(&self, name: &str, instr: &Instruction) -> Result<String, CodeGenError> {
        self.scopes.resolve_or_err(name, instr)?;
        Ok(script_name(name))
    }

    fn declaration(&mut self, text: String, line: usize) {
        if self.scopes.in_procedure() {
            self.current().statement(&text, line);
        } else {
            self.globals.push(format!("{text} // {line}"));
        }
    }

    fn instruction(&mut self, instr: &Instruction) -> Result<(), CodeGenError> {
        let line = instr.line;
        match &instr.op {
            Op::Declare(name) => {
                self.scopes.declare(name);
                self.declaration(format!("let {} = 0;", script_name(name)), line);
            }
            Op::Const(name, value) => {
                self.scopes.declare(name);
                self.declaration(format!("const {} = {value};", script_name(name)), line);
            }
            Op::Load(name) => {
                let name = self.binding(name, instr)?;
                self.current().stack.push(Value::Int(name));
            }
            Op::Push(value) => {
                let text = if *value < 0 {
                    format!("({value})")
                } else {
                    value.to_string()
                };
                self.current().stack.push(Value::Int(text));
            }
            Op::Oper(op) => {
                let right = self.pop(instr)?.int();
                let left = self.pop(instr)?.int();
                let value = combine(*op, &left, &right);
                self.current().stack.push(value);
            }
            Op::Store(name) => {
                let name = self.binding(name, instr)?;
                let value = self.pop(instr)?.int();
                self.current().statement(&format!("{name} = {value};"), line);
            }
            Op::Call(name) => {
                self.scopes.resolve_procedure_or_err(name, instr)?;
                self.current()
                    .statement(&format!("{}();", script_name(name)), line);
            }
            Op::Read(name) => {
                let name = self.binding(name, instr)?;
                let read = host_function(HostKind::Read).name;
                self.current().statement(&format!("{name} = {read}();"), line);
            }
            Op::Write => {
                let value = self.pop(instr)?.int();
                let write = host_function(HostKind::Write).name;
                self.current().statement(&format!("{write}({value});"), line);
            }
            Op::ProcedureStart(name) => {
                self.scopes.enter_procedure(name);
                let header = format!("function {}() {{ // {line}", script_name(name));
                self.procedures.push(Function::new(header));
                self.markers.push(Frame::Procedure, "PROCEDURE_START", line);
            }
            Op::ProcedureEnd(_) => {
                self.markers
                    .pop(instr, |f| matches!(f, Frame::Procedure))?;
                self.scopes.leave_procedure();
                if let Some(function) = self.procedures.pop() {
                    let text = function.render().join("\n");
                    match self.procedures.last_mut() {
                        Some(parent) => parent.nested.push(text),
                        None => self.functions.push(text),
                    }
                }
            }
            Op::If => {
                let condition = self.pop(instr)?.condition();
                self.current().open(&format!("if ({condition}) {{"), line);
                self.markers
                    .push(Frame::If { has_else: false }, "IF", line);
            }
            Op::ElseIf | Op::Else => {
                let frame = self
                    .markers
                    .top_mut(instr, |f| matches!(f, Frame::If { .. }))?;
                if let Frame::If { has_else } = frame {
                    if *has_else {
                        return Err(CodeGenError::MisplacedBranch {
                            marker: instr.op.to_string(),
                            line,
                        });
                    }
                    *has_else = instr.op == Op::Else;
                }
                if instr.op == Op::Else {
                    let function = self.current();
                    function.indent = function.indent.saturating_sub(1);
                    let indent = "  ".repeat(function.indent);
                    function.body.push(format!("{indent}}} else {{"));
                    function.indent += 1;
                } else {
                    let condition = self.pop(instr)?.condition();
                    let function = self.current();
                    function.indent = function.indent.saturating_sub(1);
                    function.open(&format!("}} else if ({condition}) {{"), line);
                }
            }
            Op::EndIf => {
                self.markers
                    .pop(instr, |f| matches!(f, Frame::If { .. }))?;
                self.current().close();
            }
            Op::While => self.markers.push(Frame::While { line }, "WHILE", line),
            Op::Do => {
                let head = match self
                    .markers
                    .top_mut(instr, |f| matches!(f, Frame::While { .. }))?
                {
                    Frame::While { line } => *line,
                    _ => line,
                };
                let condition = self.pop(instr)?.condition();
                self.current()
                    .open(&format!("while ({condition}) {{"), head);
            }
            Op::EndWhile => {
                self.markers
                    .pop(instr, |f| matches!(f, Frame::While { .. }))?;
                self.current().close();
            }
            Op::ForInit(name) => {
                let var = self.binding(name, instr)?;
                let init = self.pop(instr)?.int();
                self.markers
                    .push(Frame::For { var, init }, "FOR_INIT", line);
            }
            Op::ForTo(_) => {
                let bound = self.pop(instr)?.int();
                let (var, init) = match self
                    .markers
                    .top_mut(instr, |f| matches!(f, Frame::For { .. }))?
                {
                    Frame::For { var, init } => (var.clone(), init.clone()),
                    _ => (String::new(), String::new()),
                };
                self.current().open(
                    &format!("for ({var} = {init}; {var} < {bound}; {var} = ({var} + 1) | 0) {{"),
                    line,
                );
            }
            Op::EndFor(_) => {
                self.markers
                    .pop(instr, |f| matches!(f, Frame::For { .. }))?;
                self.current().close();
            }
        }
        Ok(())
    }

    fn finish(self) -> Result<String, CodeGenError> {
        self.markers.finish()?;
        let mut lines = vec![HEADER.to_string()];
        lines.extend(self.globals);
        lines.extend(self.functions);
        lines.extend(self.entry.render());
        let mut out = lines.join("\n");
        out.push('\n');
        Ok(out)
    }
}

fn combine(op: BinaryOp, left: &str, right: &str) -> Value {
    match op {
        BinaryOp::Add => Value::Int(format!("(({left} + {right}) | 0)")),
        BinaryOp::Sub => Value::Int(format!("(({left} - {right}) | 0)")),
        BinaryOp::Mul => Value::Int(format!("Math.imul({left}, {right})")),
        BinaryOp::Div => Value::Int(format!("(({left} / {right}) | 0)")),
        BinaryOp::Eq => Value::Bool(format!("{left} === {right}")),
        BinaryOp::Ne => Value::Bool(format!("{left} !== {right}")),
        op => Value::Bool(format!("{left} {} {right}", op.symbol())),
    }
}

/// Source line to script line mapping recovered from `// <line>` annotations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineMap {
    /// Source line to the first (1-based) script line annotated with it.
    entries: BTreeMap<usize, usize>,
}

impl LineMap {
    pub fn from_script(script: &str) -> Self {
        let mut entries = BTreeMap::new();
        for (index, text) in script.lines().enumerate() {
            let Some((_, annotation)) = text.rsplit_once("// ") else {
                continue;
            };
            if let Ok(source_line) = annotation.trim().parse::<usize>() {
                entries.entry(source_line).or_insert(index + 1);
            }
        }
        LineMap { entries }
    }

    /// Script line annotated with exactly `source_line`.
    pub fn script_line(&self, source_line: usize) -> Option<usize> {
        self.entries.get(&source_line).copied()
    }

    /// Like `script_line`, falling back to the closest preceding mapped source line.
    pub fn resolve(&self, source_line: usize) -> Option<usize> {
        self.entries
            .range(..=source_line)
            .next_back()
            .map(|(_, script)| *script)
    }

    /// Source line of the closest annotated script line at or before `script_line`.
    pub fn source_line(&self, script_line: usize) -> Option<usize> {
        self.entries
            .iter()
            .filter(|(_, script)| **script <= script_line)
            .max_by_key(|(_, script)| **script)
            .map(|(source, _)| *source)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
