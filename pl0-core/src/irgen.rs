//! AST to IR lowering (post-order).

use std::collections::HashMap;

use crate::ast::{Block, DeclarationKind, Expr, Initializer, Program, Statement};
use crate::ir::{Instruction, Op};

pub fn generate(program: &Program) -> Vec<Instruction> {
    let mut generator = Generator {
        code: Vec::new(),
        constants: vec![HashMap::new()],
    };
    for block in &program.blocks {
        generator.block(block);
    }
    generator.code
}

struct Generator {
    code: Vec<Instruction>,
    /// Constant values per procedure nesting level, for folding `const b = a`.
    constants: Vec<HashMap<String, i32>>,
}

impl Generator {
    fn emit(&mut self, op: Op, line: usize) {
        self.code.push(Instruction::new(op, line));
    }

    fn block(&mut self, block: &Block) {
        for decl in &block.declarations {
            match decl.kind {
                DeclarationKind::Var => {
                    self.emit(Op::Declare(decl.name.clone()), decl.line);
                    if let Some(init) = &decl.init {
                        let value = self.initial_value(init);
                        self.emit(Op::Push(value), decl.line);
                        self.emit(Op::Store(decl.name.clone()), decl.line);
                    }
                }
                DeclarationKind::Const => {
                    let value = decl.init.as_ref().map_or(0, |init| self.initial_value(init));
                    if let Some(scope) = self.constants.last_mut() {
                        scope.insert(decl.name.clone(), value);
                    }
                    self.emit(Op::Const(decl.name.clone(), value), decl.line);
                }
            }
        }
        if let Some(statement) = &block.statement {
            self.statement(statement);
        }
    }

    fn initial_value(&self, init: &Initializer) -> i32 {
        match init {
            Initializer::Number(value) => *value,
            // Analysis guarantees the name is a constant declared earlier.
            Initializer::Constant(name) => self
                .constants
                .iter()
                .rev()
                .find_map(|scope| scope.get(name).copied())
                .unwrap_or(0),
        }
    }

    fn statements(&mut self, statements: &[Statement]) {
        for statement in statements {
            self.statement(statement);
        }
    }

    fn statement(&mut self, statement: &Statement) {
        match statement {
            Statement::Assignment { name, value, line } => {
                self.expr(value);
                self.emit(Op::Store(name.clone()), *line);
            }
            Statement::If {
                condition,
                then_branch,
                else_ifs,
                else_branch,
                line,
            } => {
                self.expr(condition);
                self.emit(Op::If, *line);
                self.statements(then_branch);
                for clause in else_ifs {
                    self.expr(&clause.condition);
                    self.emit(Op::ElseIf, clause.line);
                    self.statements(&clause.body);
                }
                if let Some(branch) = else_branch {
                    self.emit(Op::Else, *line);
                    self.statements(branch);
                }
                self.emit(Op::EndIf, *line);
            }
            Statement::While {
                condition,
                body,
                line,
            } => {
                self.emit(Op::While, *line);
                self.expr(condition);
                self.emit(Op::Do, *line);
                self.statements(body);
                self.emit(Op::EndWhile, *line);
            }
            Statement::For {
                variable,
                from,
                to,
                body,
                line,
            } => {
                self.expr(from);
                self.emit(Op::ForInit(variable.clone()), *line);
                self.expr(to);
                self.emit(Op::ForTo(variable.clone()), *line);
                self.statements(body);
                self.emit(Op::EndFor(variable.clone()), *line);
            }
            Statement::Read { names, line } => {
                for name in names {
                    self.emit(Op::Read(name.clone()), *line);
                }
            }
            Statement::Write { values, line } => {
                for value in values {
                    self.expr(value);
                    self.emit(Op::Write, *line);
                }
            }
            Statement::Call { name, line } => self.emit(Op::Call(name.clone()), *line),
            Statement::BeginEnd { statements, .. } => self.statements(statements),
            Statement::Procedure(decl) => {
                self.emit(Op::ProcedureStart(decl.name.clone()), decl.line);
                self.constants.push(HashMap::new());
                self.block(&decl.body);
                self.constants.pop();
                self.emit(Op::ProcedureEnd(decl.name.clone()), decl.line);
            }
        }
    }

    fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Binary {
                op,
                left,
                right,
                line,
            } => {
                self.expr(left);
                self.expr(right);
                self.emit(Op::Oper(*op), *line);
            }
            Expr::Literal { value, line } => self.emit(Op::Push(*value), *line),
            Expr::Identifier { name, line } => self.emit(Op::Load(name.clone()), *line),
        }
    }
}
