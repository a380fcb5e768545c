//! Debug engine: line-accurate replay of a program's IR.
//!
//! The marker IR is first lowered to a small jump-based instruction set (each
//! marker resolved to a concrete target), which a stack machine then executes
//! with real branch and loop semantics. Sessions never resume in place: every
//! command replays from the start and stops at the first probe position that
//! satisfies it, so two sessions over the same input observe identical states.
//!
//! Positions follow the before-line convention: a pause at line N shows the
//! state just before the first instruction of line N runs.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::ast::BinaryOp;
use crate::codegen::{MarkerStack, NameScopes, underflow};
use crate::error::{CodeGenError, DebugError};
use crate::ir::{Instruction, Op};
use crate::irgen::generate;
use crate::parser::parse_source;
use crate::semantic::{Symbol, SymbolKind, SymbolTable, analyze};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugConfig {
    /// Value every `read` statement receives.
    pub read_value: i32,
    /// Executed instructions after which replay gives up.
    pub max_steps: usize,
}

impl Default for DebugConfig {
    fn default() -> Self {
        DebugConfig {
            read_value: 1,
            max_steps: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Binding {
    pub name: String,
    /// `None` while declared but never assigned.
    pub value: Option<i32>,
    #[serde(rename = "type")]
    pub kind: SymbolKind,
    /// `global` or `procedure:<name>`, nested procedures joined with `.`.
    pub scope: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub variables: Vec<Binding>,
    /// Line about to execute; `None` once the program has finished.
    pub source_line: Option<usize>,
    /// Values written so far.
    pub output: Vec<i32>,
}

impl Snapshot {
    pub fn value(&self, name: &str) -> Option<i32> {
        self.variables
            .iter()
            .find(|b| b.name == name)
            .and_then(|b| b.value)
    }

    pub fn binding(&self, name: &str, scope: &str) -> Option<&Binding> {
        self.variables
            .iter()
            .find(|b| b.name == name && b.scope == scope)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum DebugEvent {
    Paused(Snapshot),
    Finished(Snapshot),
}

impl DebugEvent {
    pub fn snapshot(&self) -> &Snapshot {
        match self {
            DebugEvent::Paused(snapshot) | DebugEvent::Finished(snapshot) => snapshot,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    Running,
    Paused,
    Finished,
}

/// Bindings declared by a program with their declared initial values.
pub fn declared_bindings(symbols: &SymbolTable) -> Vec<Binding> {
    let mut out = Vec::new();
    let mut declared = |_: &[String], symbol: &Symbol| symbol.value;
    collect_bindings(symbols, &mut Vec::new(), &mut out, &mut declared);
    out
}

/// Replays `source` until the first instruction on or after `line`.
pub fn run_to_line(
    source: &str,
    line: usize,
    config: DebugConfig,
) -> Result<Snapshot, DebugError> {
    let (program, symbols) = prepare(source)?;
    let mut machine = Machine::new(&program, config);
    let stopped = machine.run_until(|probe| probe.line >= line)?;
    Ok(machine.snapshot(&symbols, stopped.map(|probe| probe.line)))
}

/// Replays `source` to completion.
pub fn run_to_end(source: &str, config: DebugConfig) -> Result<Snapshot, DebugError> {
    run_to_line(source, usize::MAX, config)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Pause {
    steps: usize,
    depth: usize,
}

/// An interactive session over one program.
pub struct DebugSession {
    program: Lowered,
    symbols: SymbolTable,
    breakpoints: BTreeSet<usize>,
    config: DebugConfig,
    status: SessionStatus,
    paused_at: Option<Pause>,
    current: Snapshot,
}

impl DebugSession {
    /// Compiles `source` and arms the breakpoints. Nothing runs until the
    /// first `continue` or `step_over`.
    pub fn start(
        source: &str,
        breakpoints: &[usize],
        config: DebugConfig,
    ) -> Result<Self, DebugError> {
        let (program, symbols) = prepare(source)?;
        let lines = program.executable_lines();
        // A breakpoint on a line without instructions moves to the next one that has some.
        let breakpoints = breakpoints
            .iter()
            .filter_map(|requested| lines.range(*requested..).next().copied())
            .collect();
        let current = Snapshot {
            variables: declared_bindings(&symbols)
                .into_iter()
                .map(|b| Binding {
                    value: if b.kind == SymbolKind::Constant { b.value } else { None },
                    ..b
                })
                .collect(),
            source_line: None,
            output: Vec::new(),
        };
        Ok(DebugSession {
            program,
            symbols,
            breakpoints,
            config,
            status: SessionStatus::Running,
            paused_at: None,
            current,
        })
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Breakpoint lines after snapping to executable lines.
    pub fn breakpoints(&self) -> impl Iterator<Item = usize> + '_ {
        self.breakpoints.iter().copied()
    }

    /// Bindings at the current pause.
    pub fn variables(&self) -> &[Binding] {
        &self.current.variables
    }

    pub fn current_line(&self) -> Option<usize> {
        self.current.source_line
    }

    /// Runs to the next breakpoint strictly after the current pause.
    pub fn r#continue(&mut self) -> Result<DebugEvent, DebugError> {
        if self.status == SessionStatus::Finished {
            return Ok(DebugEvent::Finished(self.current.clone()));
        }
        let after = self.paused_at.map(|p| p.steps);
        let breakpoints = self.breakpoints.clone();
        self.replay(move |probe| {
            probe.boundary
                && breakpoints.contains(&probe.line)
                && after.is_none_or(|steps| probe.steps > steps)
        })
    }

    /// Runs to the next line entered at the current call depth or shallower.
    pub fn step_over(&mut self) -> Result<DebugEvent, DebugError> {
        if self.status == SessionStatus::Finished {
            return Ok(DebugEvent::Finished(self.current.clone()));
        }
        let paused = self.paused_at;
        self.replay(|probe| match paused {
            Some(pause) => {
                probe.boundary && probe.steps > pause.steps && probe.depth <= pause.depth
            }
            None => true,
        })
    }

    fn replay(&mut self, stop: impl FnMut(&Probe) -> bool) -> Result<DebugEvent, DebugError> {
        let mut machine = Machine::new(&self.program, self.config);
        let stopped = match machine.run_until(stop) {
            Ok(stopped) => stopped,
            Err(err) => {
                self.status = SessionStatus::Finished;
                return Err(err);
            }
        };
        self.current = machine.snapshot(&self.symbols, stopped.map(|probe| probe.line));
        match stopped {
            Some(probe) => {
                if crate::log::is_verbose() {
                    eprintln!(
                        "debugger: paused at line {} after {} steps",
                        probe.line, probe.steps
                    );
                }
                self.status = SessionStatus::Paused;
                self.paused_at = Some(Pause {
                    steps: probe.steps,
                    depth: probe.depth,
                });
                Ok(DebugEvent::Paused(self.current.clone()))
            }
            None => {
                if crate::log::is_verbose() {
                    eprintln!("debugger: program finished after {} steps", machine.steps);
                }
                self.status = SessionStatus::Finished;
                self.paused_at = None;
                Ok(DebugEvent::Finished(self.current.clone()))
            }
        }
    }
}

fn prepare(source: &str) -> Result<(Lowered, SymbolTable), DebugError> {
    let program = parse_source(source)?;
    let symbols = analyze(&program)?;
    let lowered = lower(&generate(&program))?;
    Ok((lowered, symbols))
}

fn collect_bindings(
    table: &SymbolTable,
    path: &mut Vec<String>,
    out: &mut Vec<Binding>,
    value_of: &mut dyn FnMut(&[String], &Symbol) -> Option<i32>,
) {
    let scope = if path.is_empty() {
        "global".to_string()
    } else {
        format!("procedure:{}", path.join("."))
    };
    for symbol in table.iter() {
        match symbol.kind {
            SymbolKind::Procedure => {
                if let Some(body) = &symbol.body {
                    path.push(symbol.name.clone());
                    collect_bindings(body, path, out, value_of);
                    path.pop();
                }
            }
            kind => out.push(Binding {
                name: symbol.name.clone(),
                value: value_of(path, symbol),
                kind,
                scope: scope.clone(),
            }),
        }
    }
}

/// Binding reference resolved at lowering time: `owner` is the declaring
/// procedure, `None` for globals.
#[derive(Debug, Clone, PartialEq, Eq)]
struct VarRef {
    owner: Option<usize>,
    name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Declare(VarRef),
    Const(VarRef, i32),
    Load(VarRef),
    Store(VarRef),
    Push(i32),
    Oper(BinaryOp),
    Read(VarRef),
    Write,
    Call(usize),
    Return,
    Jump(usize),
    JumpIfFalse(usize),
    /// Pops the bound; leaves the loop unless `var < bound`.
    ForTest { var: VarRef, exit: usize },
    /// Increments `var` and jumps back to the bound evaluation.
    ForStep { var: VarRef, head: usize },
}

impl Step {
    fn name(&self) -> &'static str {
        match self {
            Step::Declare(_) => "DECLARE",
            Step::Const(..) => "CONST",
            Step::Load(_) => "LOAD",
            Step::Store(_) => "STORE",
            Step::Push(_) => "PUSH",
            Step::Oper(_) => "OPER",
            Step::Read(_) => "READ",
            Step::Write => "WRITE",
            Step::Call(_) => "CALL",
            Step::Return => "RETURN",
            Step::Jump(_) => "JUMP",
            Step::JumpIfFalse(_) => "JUMP_IF_FALSE",
            Step::ForTest { .. } => "FOR_TO",
            Step::ForStep { .. } => "ENDFOR",
        }
    }

    fn set_target(&mut self, target: usize) {
        match self {
            Step::Jump(t) | Step::JumpIfFalse(t) => *t = target,
            Step::ForTest { exit, .. } => *exit = target,
            _ => {}
        }
    }
}

#[derive(Debug, Clone)]
struct Exec {
    step: Step,
    /// Source line; `None` for control transfers synthesized during lowering.
    line: Option<usize>,
}

#[derive(Debug, Clone)]
struct Procedure {
    /// Qualified name, `outer.inner` for nested procedures.
    name: String,
    entry: usize,
}

#[derive(Debug, Clone, Default)]
struct Lowered {
    code: Vec<Exec>,
    procedures: Vec<Procedure>,
}

impl Lowered {
    fn executable_lines(&self) -> BTreeSet<usize> {
        self.code.iter().filter_map(|e| e.line).collect()
    }

    fn procedure_id(&self, qualified: &str) -> Option<usize> {
        self.procedures.iter().position(|p| p.name == qualified)
    }
}

enum Frame {
    Procedure { skip: usize },
    If { pending: Option<usize>, exits: Vec<usize>, has_else: bool },
    While { head: usize, exit: Option<usize> },
    For { head: usize, var: VarRef, exit: Option<usize> },
}

struct Lowering {
    out: Lowered,
    markers: MarkerStack<Frame>,
    scopes: NameScopes,
    ids: HashMap<String, usize>,
}

fn lower(code: &[Instruction]) -> Result<Lowered, CodeGenError> {
    let mut lowering = Lowering {
        out: Lowered::default(),
        markers: MarkerStack::new(),
        scopes: NameScopes::new(),
        ids: HashMap::new(),
    };
    for instr in code {
        lowering.instruction(instr)?;
    }
    lowering.markers.finish()?;
    Ok(lowering.out)
}

impl Lowering {
    fn emit(&mut self, step: Step, line: Option<usize>) -> usize {
        self.out.code.push(Exec { step, line });
        self.out.code.len() - 1
    }

    fn patch(&mut self, at: usize) {
        let target = self.out.code.len();
        if let Some(exec) = self.out.code.get_mut(at) {
            exec.step.set_target(target);
        }
    }

    fn var(&self, name: &str, instr: &Instruction) -> Result<VarRef, CodeGenError> {
        let path = self.scopes.resolve(name).ok_or_else(|| CodeGenError::UnknownName {
            name: name.to_string(),
            line: instr.line,
        })?;
        let owner = if path.is_empty() {
            None
        } else {
            self.ids.get(&path.join(".")).copied()
        };
        Ok(VarRef {
            owner,
            name: name.to_string(),
        })
    }

    /// Index where the guard expression ending at the current position starts.
    fn guard_start(&self, instr: &Instruction) -> Result<usize, CodeGenError> {
        let mut need = 1usize;
        let mut index = self.out.code.len();
        while need > 0 {
            if index == 0 {
                return Err(underflow(instr));
            }
            index -= 1;
            match self.out.code[index].step {
                Step::Push(_) | Step::Load(_) => need -= 1,
                Step::Oper(_) => need += 1,
                _ => return Err(underflow(instr)),
            }
        }
        Ok(index)
    }

    fn instruction(&mut self, instr: &Instruction) -> Result<(), CodeGenError> {
        let line = Some(instr.line);
        match &instr.op {
            Op::Declare(name) => {
                self.scopes.declare(name);
                let var = self.var(name, instr)?;
                self.emit(Step::Declare(var), line);
            }
            Op::Const(name, value) => {
                self.scopes.declare(name);
                let var = self.var(name, instr)?;
                self.emit(Step::Const(var, *value), line);
            }
            Op::Load(name) => {
                let var = self.var(name, instr)?;
                self.emit(Step::Load(var), line);
            }
            Op::Store(name) => {
                let var = self.var(name, instr)?;
                self.emit(Step::Store(var), line);
            }
            Op::Push(value) => {
                self.emit(Step::Push(*value), line);
            }
            Op::Oper(op) => {
                self.emit(Step::Oper(*op), line);
            }
            Op::Read(name) => {
                let var = self.var(name, instr)?;
                self.emit(Step::Read(var), line);
            }
            Op::Write => {
                self.emit(Step::Write, line);
            }
            Op::Call(name) => {
                let qualified = self.scopes.resolve_procedure_or_err(name, instr)?;
                let id = self.ids.get(&qualified).copied().ok_or_else(|| CodeGenError::UnknownName {
                    name: name.clone(),
                    line: instr.line,
                })?;
                self.emit(Step::Call(id), line);
            }
            Op::ProcedureStart(name) => {
                let skip = self.emit(Step::Jump(0), None);
                self.scopes.enter_procedure(name);
                let qualified = self.scopes.current_path().join(".");
                self.ids.insert(qualified.clone(), self.out.procedures.len());
                self.out.procedures.push(Procedure {
                    name: qualified,
                    entry: self.out.code.len(),
                });
                self.markers.push(Frame::Procedure { skip }, "PROCEDURE_START", instr.line);
            }
            Op::ProcedureEnd(_) => {
                let Frame::Procedure { skip } =
                    self.markers.pop(instr, |f| matches!(f, Frame::Procedure { .. }))?
                else {
                    return Ok(());
                };
                self.emit(Step::Return, None);
                self.patch(skip);
                self.scopes.leave_procedure();
            }
            Op::If => {
                let pending = self.emit(Step::JumpIfFalse(0), line);
                self.markers.push(
                    Frame::If {
                        pending: Some(pending),
                        exits: Vec::new(),
                        has_else: false,
                    },
                    "IF",
                    instr.line,
                );
            }
            Op::ElseIf => {
                // The guard was emitted after the previous branch; move it
                // behind that branch's exit jump.
                let start = self.guard_start(instr)?;
                let previous = self.take_branch(instr)?;
                let guard = self.out.code.split_off(start);
                let exit = self.emit(Step::Jump(0), None);
                if let Some(at) = previous {
                    self.patch(at);
                }
                self.out.code.extend(guard);
                let pending = self.emit(Step::JumpIfFalse(0), line);
                if let Frame::If {
                    pending: slot,
                    exits,
                    ..
                } = self.markers.top_mut(instr, |f| matches!(f, Frame::If { .. }))?
                {
                    *slot = Some(pending);
                    exits.push(exit);
                }
            }
            Op::Else => {
                let previous = self.take_branch(instr)?;
                let exit = self.emit(Step::Jump(0), None);
                if let Some(at) = previous {
                    self.patch(at);
                }
                if let Frame::If { exits, has_else, .. } =
                    self.markers.top_mut(instr, |f| matches!(f, Frame::If { .. }))?
                {
                    exits.push(exit);
                    *has_else = true;
                }
            }
            Op::EndIf => {
                if let Frame::If { pending, exits, .. } =
                    self.markers.pop(instr, |f| matches!(f, Frame::If { .. }))?
                {
                    for at in pending.into_iter().chain(exits) {
                        self.patch(at);
                    }
                }
            }
            Op::While => {
                let head = self.out.code.len();
                self.markers
                    .push(Frame::While { head, exit: None }, "WHILE", instr.line);
            }
            Op::Do => {
                let test = self.emit(Step::JumpIfFalse(0), line);
                if let Frame::While { exit, .. } =
                    self.markers.top_mut(instr, |f| matches!(f, Frame::While { .. }))?
                {
                    *exit = Some(test);
                }
            }
            Op::EndWhile => {
                if let Frame::While { head, exit } =
                    self.markers.pop(instr, |f| matches!(f, Frame::While { .. }))?
                {
                    self.emit(Step::Jump(head), None);
                    if let Some(at) = exit {
                        self.patch(at);
                    }
                }
            }
            Op::ForInit(name) => {
                let var = self.var(name, instr)?;
                self.emit(Step::Store(var.clone()), line);
                let head = self.out.code.len();
                self.markers
                    .push(Frame::For { head, var, exit: None }, "FOR_INIT", instr.line);
            }
            Op::ForTo(_) => {
                let var = match self.markers.top_mut(instr, |f| matches!(f, Frame::For { .. }))? {
                    Frame::For { var, .. } => var.clone(),
                    _ => return Err(underflow(instr)),
                };
                let test = self.emit(Step::ForTest { var, exit: 0 }, line);
                if let Frame::For { exit, .. } =
                    self.markers.top_mut(instr, |f| matches!(f, Frame::For { .. }))?
                {
                    *exit = Some(test);
                }
            }
            Op::EndFor(_) => {
                if let Frame::For { head, var, exit } =
                    self.markers.pop(instr, |f| matches!(f, Frame::For { .. }))?
                {
                    self.emit(Step::ForStep { var, head }, None);
                    if let Some(at) = exit {
                        self.patch(at);
                    }
                }
            }
        }
        Ok(())
    }

    /// Closes the current branch of the innermost `IF`, returning its pending
    /// false-jump.
    fn take_branch(&mut self, instr: &Instruction) -> Result<Option<usize>, CodeGenError> {
        match self.markers.top_mut(instr, |f| matches!(f, Frame::If { .. }))? {
            Frame::If { has_else: true, .. } => Err(CodeGenError::MisplacedBranch {
                marker: instr.op.to_string(),
                line: instr.line,
            }),
            Frame::If { pending, .. } => Ok(pending.take()),
            _ => Ok(None),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Probe {
    /// Instructions executed before this one.
    steps: usize,
    line: usize,
    /// First instruction of a run of instructions on `line`.
    boundary: bool,
    /// Active procedure activations.
    depth: usize,
}

struct Activation {
    procedure: usize,
    locals: HashMap<String, Option<i32>>,
    return_to: usize,
}

struct Machine<'p> {
    program: &'p Lowered,
    config: DebugConfig,
    pc: usize,
    stack: Vec<i32>,
    globals: HashMap<String, Option<i32>>,
    frames: Vec<Activation>,
    output: Vec<i32>,
    steps: usize,
    last_line: Option<usize>,
}

impl<'p> Machine<'p> {
    fn new(program: &'p Lowered, config: DebugConfig) -> Self {
        Machine {
            program,
            config,
            pc: 0,
            stack: Vec::new(),
            globals: HashMap::new(),
            frames: Vec::new(),
            output: Vec::new(),
            steps: 0,
            last_line: None,
        }
    }

    /// Executes until `stop` accepts a probe (returned, not executed) or the
    /// program ends (`None`).
    fn run_until(
        &mut self,
        mut stop: impl FnMut(&Probe) -> bool,
    ) -> Result<Option<Probe>, DebugError> {
        let program = self.program;
        while let Some(exec) = program.code.get(self.pc) {
            if let Some(line) = exec.line {
                let probe = Probe {
                    steps: self.steps,
                    line,
                    boundary: self.last_line != Some(line),
                    depth: self.frames.len(),
                };
                if stop(&probe) {
                    return Ok(Some(probe));
                }
                self.last_line = Some(line);
            }
            if self.steps >= self.config.max_steps {
                return Err(DebugError::StepLimitExceeded {
                    limit: self.config.max_steps,
                });
            }
            self.steps += 1;
            self.execute(exec)?;
        }
        Ok(None)
    }

    fn execute(&mut self, exec: &Exec) -> Result<(), DebugError> {
        let mut next = self.pc + 1;
        match &exec.step {
            Step::Declare(var) => *self.slot(var, exec)? = None,
            Step::Const(var, value) => *self.slot(var, exec)? = Some(*value),
            Step::Load(var) => {
                let value = self.slot(var, exec)?.unwrap_or(0);
                self.stack.push(value);
            }
            Step::Store(var) => {
                let value = self.pop(exec)?;
                *self.slot(var, exec)? = Some(value);
            }
            Step::Push(value) => self.stack.push(*value),
            Step::Oper(op) => {
                let right = self.pop(exec)?;
                let left = self.pop(exec)?;
                let value = op.apply(left, right).ok_or(DebugError::DivisionByZero {
                    line: exec.line.unwrap_or(0),
                })?;
                self.stack.push(value);
            }
            Step::Read(var) => {
                let value = self.config.read_value;
                *self.slot(var, exec)? = Some(value);
            }
            Step::Write => {
                let value = self.pop(exec)?;
                self.output.push(value);
            }
            Step::Call(id) => {
                let entry = self
                    .program
                    .procedures
                    .get(*id)
                    .map(|p| p.entry)
                    .ok_or_else(|| structural(exec))?;
                self.frames.push(Activation {
                    procedure: *id,
                    locals: HashMap::new(),
                    return_to: next,
                });
                next = entry;
            }
            Step::Return => {
                let frame = self.frames.pop().ok_or_else(|| structural(exec))?;
                next = frame.return_to;
            }
            Step::Jump(target) => next = *target,
            Step::JumpIfFalse(target) => {
                if self.pop(exec)? == 0 {
                    next = *target;
                }
            }
            Step::ForTest { var, exit } => {
                let bound = self.pop(exec)?;
                let value = self.slot(var, exec)?.unwrap_or(0);
                if value >= bound {
                    next = *exit;
                }
            }
            Step::ForStep { var, head } => {
                let slot = self.slot(var, exec)?;
                *slot = Some(slot.unwrap_or(0).wrapping_add(1));
                next = *head;
            }
        }
        self.pc = next;
        Ok(())
    }

    fn pop(&mut self, exec: &Exec) -> Result<i32, DebugError> {
        self.stack.pop().ok_or_else(|| structural(exec))
    }

    /// Storage for `var`: a global, or a local of the most recent activation of its owner.
    fn slot(&mut self, var: &VarRef, exec: &Exec) -> Result<&mut Option<i32>, DebugError> {
        let scope = match var.owner {
            None => &mut self.globals,
            Some(owner) => {
                &mut self
                    .frames
                    .iter_mut()
                    .rev()
                    .find(|f| f.procedure == owner)
                    .ok_or_else(|| {
                        DebugError::Structural(CodeGenError::UnknownName {
                            name: var.name.clone(),
                            line: exec.line.unwrap_or(0),
                        })
                    })?
                    .locals
            }
        };
        Ok(scope.entry(var.name.clone()).or_insert(None))
    }

    fn snapshot(&self, symbols: &SymbolTable, line: Option<usize>) -> Snapshot {
        let mut variables = Vec::new();
        let mut current = |path: &[String], symbol: &Symbol| {
            if symbol.kind == SymbolKind::Constant {
                return symbol.value;
            }
            if path.is_empty() {
                return self.globals.get(&symbol.name).copied().flatten();
            }
            let id = self.program.procedure_id(&path.join("."))?;
            self.frames
                .iter()
                .rev()
                .find(|f| f.procedure == id)
                .and_then(|f| f.locals.get(&symbol.name).copied().flatten())
        };
        collect_bindings(symbols, &mut Vec::new(), &mut variables, &mut current);
        Snapshot {
            variables,
            source_line: line,
            output: self.output.clone(),
        }
    }
}

fn structural(exec: &Exec) -> DebugError {
    DebugError::Structural(CodeGenError::StackUnderflow {
        instruction: exec.step.name().to_string(),
        line: exec.line.unwrap_or(0),
    })
}
