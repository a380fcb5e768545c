//! Syntax tree produced by the parser.
//!
//! Every node owns its children and records the source line of the token
//! that introduced it.

use core::fmt;

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Program {
    pub blocks: Vec<Block>,
    pub line: usize,
}

/// Declarations followed by at most one statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Block {
    pub declarations: Vec<Declaration>,
    pub statement: Option<Statement>,
    pub line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeclarationKind {
    Var,
    Const,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Declaration {
    pub kind: DeclarationKind,
    pub name: String,
    pub init: Option<Initializer>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value")]
pub enum Initializer {
    Number(i32),
    /// A previously declared constant.
    Constant(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcedureDeclaration {
    pub name: String,
    pub body: Box<Block>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ElseIf {
    pub condition: Expr,
    pub body: Vec<Statement>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum Statement {
    Assignment {
        name: String,
        value: Expr,
        line: usize,
    },
    If {
        condition: Expr,
        then_branch: Vec<Statement>,
        else_ifs: Vec<ElseIf>,
        else_branch: Option<Vec<Statement>>,
        line: usize,
    },
    While {
        condition: Expr,
        body: Vec<Statement>,
        line: usize,
    },
    For {
        variable: String,
        from: Expr,
        to: Expr,
        body: Vec<Statement>,
        line: usize,
    },
    Read {
        names: Vec<String>,
        line: usize,
    },
    Write {
        values: Vec<Expr>,
        line: usize,
    },
    Call {
        name: String,
        line: usize,
    },
    BeginEnd {
        statements: Vec<Statement>,
        line: usize,
    },
    Procedure(ProcedureDeclaration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Lt,
    Le,
    Eq,
    Ne,
    Gt,
    Ge,
}

impl BinaryOp {
    pub fn from_symbol(symbol: &str) -> Option<BinaryOp> {
        let op = match symbol {
            "+" => BinaryOp::Add,
            "-" => BinaryOp::Sub,
            "*" => BinaryOp::Mul,
            "/" => BinaryOp::Div,
            "<" => BinaryOp::Lt,
            "<=" => BinaryOp::Le,
            "=" => BinaryOp::Eq,
            "<>" => BinaryOp::Ne,
            ">" => BinaryOp::Gt,
            ">=" => BinaryOp::Ge,
            _ => return None,
        };
        Some(op)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
        }
    }

    /// Signed 32-bit semantics shared by every consumer. `None` on division by
    /// zero. `i32::MIN / -1` wraps to `i32::MIN`.
    pub fn apply(self, left: i32, right: i32) -> Option<i32> {
        let value = match self {
            BinaryOp::Add => left.wrapping_add(right),
            BinaryOp::Sub => left.wrapping_sub(right),
            BinaryOp::Mul => left.wrapping_mul(right),
            BinaryOp::Div => {
                if right == 0 {
                    return None;
                }
                left.wrapping_div(right)
            }
            BinaryOp::Lt => (left < right) as i32,
            BinaryOp::Le => (left <= right) as i32,
            BinaryOp::Eq => (left == right) as i32,
            BinaryOp::Ne => (left != right) as i32,
            BinaryOp::Gt => (left > right) as i32,
            BinaryOp::Ge => (left >= right) as i32,
        };
        Some(value)
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum Expr {
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
        line: usize,
    },
    Literal {
        value: i32,
        line: usize,
    },
    Identifier {
        name: String,
        line: usize,
    },
}
