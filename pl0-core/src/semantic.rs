//! Semantic analysis: scope checking and symbol-table construction.
//!
//! A single depth-first pass over the AST. The tree is not modified; the
//! result is a fresh `SymbolTable` whose procedure entries carry the table of
//! their own body, so locals never leak into the enclosing scope.

use std::mem;

use serde::Serialize;

use crate::ast::{Block, DeclarationKind, Expr, Initializer, Program, Statement};
use crate::error::SemanticError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Variable,
    Constant,
    Procedure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    /// Constant value, or the initializer of a variable declared with one.
    pub value: Option<i32>,
    pub line: usize,
    /// Symbols declared inside a procedure's body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<SymbolTable>,
}

/// Symbols of one scope, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SymbolTable {
    pub symbols: Vec<Symbol>,
}

impl SymbolTable {
    pub fn get(&self, name: &str) -> Option<&Symbol> {
        self.symbols.iter().find(|s| s.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

pub fn analyze(program: &Program) -> Result<SymbolTable, SemanticError> {
    let mut analyzer = Analyzer {
        current: SymbolTable::default(),
        enclosing: Vec::new(),
    };
    for block in &program.blocks {
        analyzer.block(block)?;
    }
    Ok(analyzer.current)
}

struct Analyzer {
    current: SymbolTable,
    enclosing: Vec<SymbolTable>,
}

impl Analyzer {
    fn block(&mut self, block: &Block) -> Result<(), SemanticError> {
        for decl in &block.declarations {
            let (kind, value) = match decl.kind {
                DeclarationKind::Var => {
                    let value = match &decl.init {
                        Some(Initializer::Number(n)) => Some(*n),
                        Some(Initializer::Constant(name)) => {
                            Some(self.constant_value(name, decl.line)?)
                        }
                        None => None,
                    };
                    (SymbolKind::Variable, value)
                }
                DeclarationKind::Const => {
                    let value = match &decl.init {
                        Some(Initializer::Number(n)) => *n,
                        Some(Initializer::Constant(name)) => self.constant_value(name, decl.line)?,
                        None => 0,
                    };
                    (SymbolKind::Constant, Some(value))
                }
            };
            self.declare(&decl.name, kind, value, decl.line)?;
        }
        if let Some(statement) = &block.statement {
            self.statement(statement)?;
        }
        Ok(())
    }

    fn statements(&mut self, statements: &[Statement]) -> Result<(), SemanticError> {
        statements.iter().try_for_each(|s| self.statement(s))
    }

    fn statement(&mut self, statement: &Statement) -> Result<(), SemanticError> {
        match statement {
            Statement::Assignment { name, value, line } => {
                self.assignable(name, *line)?;
                self.expr(value)
            }
            Statement::If {
                condition,
                then_branch,
                else_ifs,
                else_branch,
                ..
            } => {
                self.expr(condition)?;
                self.statements(then_branch)?;
                for clause in else_ifs {
                    self.expr(&clause.condition)?;
                    self.statements(&clause.body)?;
                }
                if let Some(branch) = else_branch {
                    self.statements(branch)?;
                }
                Ok(())
            }
            Statement::While {
                condition, body, ..
            } => {
                self.expr(condition)?;
                self.statements(body)
            }
            Statement::For {
                variable,
                from,
                to,
                body,
                line,
            } => {
                self.assignable(variable, *line)?;
                self.expr(from)?;
                self.expr(to)?;
                self.statements(body)
            }
            Statement::Read { names, line } => {
                names.iter().try_for_each(|name| self.assignable(name, *line))
            }
            Statement::Write { values, .. } => values.iter().try_for_each(|v| self.expr(v)),
            Statement::Call { name, line } => match self.lookup(name) {
                Some(symbol) if symbol.kind == SymbolKind::Procedure => Ok(()),
                _ => Err(SemanticError::UndeclaredProcedure {
                    name: name.clone(),
                    line: *line,
                }),
            },
            Statement::BeginEnd { statements, .. } => self.statements(statements),
            Statement::Procedure(decl) => {
                let index = self.declare(&decl.name, SymbolKind::Procedure, None, decl.line)?;
                self.enclosing.push(mem::take(&mut self.current));
                let result = self.block(&decl.body);
                let outer = self.enclosing.pop().unwrap_or_default();
                let body = mem::replace(&mut self.current, outer);
                result?;
                self.current.symbols[index].body = Some(body);
                Ok(())
            }
        }
    }

    fn expr(&mut self, expr: &Expr) -> Result<(), SemanticError> {
        match expr {
            Expr::Binary { left, right, .. } => {
                self.expr(left)?;
                self.expr(right)
            }
            Expr::Literal { .. } => Ok(()),
            Expr::Identifier { name, line } => match self.lookup(name) {
                Some(symbol) if symbol.kind != SymbolKind::Procedure => Ok(()),
                _ => Err(SemanticError::UndeclaredVariable {
                    name: name.clone(),
                    line: *line,
                }),
            },
        }
    }

    fn assignable(&self, name: &str, line: usize) -> Result<(), SemanticError> {
        match self.lookup(name).map(|s| s.kind) {
            Some(SymbolKind::Variable) => Ok(()),
            Some(SymbolKind::Constant) => Err(SemanticError::ConstAssignment {
                name: name.to_string(),
                line,
            }),
            Some(SymbolKind::Procedure) | None => Err(SemanticError::UndeclaredVariable {
                name: name.to_string(),
                line,
            }),
        }
    }

    fn constant_value(&self, name: &str, line: usize) -> Result<i32, SemanticError> {
        match self.lookup(name) {
            Some(Symbol {
                kind: SymbolKind::Constant,
                value: Some(value),
                ..
            }) => Ok(*value),
            Some(_) => Err(SemanticError::NonConstantInitializer {
                name: name.to_string(),
                line,
            }),
            None => Err(SemanticError::UndeclaredVariable {
                name: name.to_string(),
                line,
            }),
        }
    }

    /// Adds a symbol to the innermost scope and returns its index there.
    fn declare(
        &mut self,
        name: &str,
        kind: SymbolKind,
        value: Option<i32>,
        line: usize,
    ) -> Result<usize, SemanticError> {
        let scope = &mut self.current;
        if scope.get(name).is_some() {
            return Err(SemanticError::DuplicateDeclaration {
                name: name.to_string(),
                line,
            });
        }
        scope.symbols.push(Symbol {
            name: name.to_string(),
            kind,
            value,
            line,
            body: None,
        });
        Ok(scope.symbols.len() - 1)
    }

    fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.current
            .get(name)
            .or_else(|| self.enclosing.iter().rev().find_map(|scope| scope.get(name)))
    }
}
