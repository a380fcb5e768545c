//! Flat, line-tagged intermediate representation.
//!
//! Expressions are postfix stack code. Control flow is expressed with marker
//! instructions only; consumers rebuild the nesting with a marker stack.
//!
//! Guard placement:
//!
//! ```text
//! <cond> IF ... [<cond> ELSEIF ...]* [ELSE ...] ENDIF
//! WHILE <cond> DO ... ENDWHILE
//! <from> FOR_INIT i <to> FOR_TO i ... ENDFOR i
//! ```

use core::fmt;

use serde::ser::{Serialize, SerializeStruct, Serializer};

use crate::ast::BinaryOp;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Declare(String),
    Const(String, i32),
    Load(String),
    Store(String),
    Push(i32),
    Oper(BinaryOp),
    Call(String),
    Read(String),
    Write,
    ProcedureStart(String),
    ProcedureEnd(String),
    If,
    ElseIf,
    Else,
    EndIf,
    While,
    Do,
    EndWhile,
    ForInit(String),
    ForTo(String),
    EndFor(String),
}

impl Op {
    pub fn opcode(&self) -> &'static str {
        match self {
            Op::Declare(_) => "DECLARE",
            Op::Const(..) => "CONST",
            Op::Load(_) => "LOAD",
            Op::Store(_) => "STORE",
            Op::Push(_) => "PUSH",
            Op::Oper(_) => "OPER",
            Op::Call(_) => "CALL",
            Op::Read(_) => "READ",
            Op::Write => "WRITE",
            Op::ProcedureStart(_) => "PROCEDURE_START",
            Op::ProcedureEnd(_) => "PROCEDURE_END",
            Op::If => "IF",
            Op::ElseIf => "ELSEIF",
            Op::Else => "ELSE",
            Op::EndIf => "ENDIF",
            Op::While => "WHILE",
            Op::Do => "DO",
            Op::EndWhile => "ENDWHILE",
            Op::ForInit(_) => "FOR_INIT",
            Op::ForTo(_) => "FOR_TO",
            Op::EndFor(_) => "ENDFOR",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.opcode())?;
        match self {
            Op::Declare(name)
            | Op::Load(name)
            | Op::Store(name)
            | Op::Call(name)
            | Op::Read(name)
            | Op::ProcedureStart(name)
            | Op::ProcedureEnd(name)
            | Op::ForInit(name)
            | Op::ForTo(name)
            | Op::EndFor(name) => write!(f, " {name}"),
            Op::Const(name, value) => write!(f, " {name} {value}"),
            Op::Push(value) => write!(f, " {value}"),
            Op::Oper(op) => write!(f, " {op}"),
            Op::Write
            | Op::If
            | Op::ElseIf
            | Op::Else
            | Op::EndIf
            | Op::While
            | Op::Do
            | Op::EndWhile => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub op: Op,
    pub line: usize,
}

impl Instruction {
    pub fn new(op: Op, line: usize) -> Self {
        Instruction { op, line }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>4}  {}", self.line, self.op)
    }
}

impl Serialize for Instruction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Instruction", 2)?;
        state.serialize_field("code", &self.op.to_string())?;
        state.serialize_field("line", &self.line)?;
        state.end()
    }
}

/// Renders a listing, one instruction per line.
pub fn listing(code: &[Instruction]) -> String {
    code.iter().map(|i| format!("{i}\n")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_opcode_and_operands() {
        assert_eq!(Op::Const("c".into(), 5).to_string(), "CONST c 5");
        assert_eq!(Op::Oper(BinaryOp::Ne).to_string(), "OPER <>");
        assert_eq!(Op::ForTo("i".into()).to_string(), "FOR_TO i");
        assert_eq!(Op::EndIf.to_string(), "ENDIF");
    }

    #[test]
    fn serializes_as_code_and_line() {
        let instr = Instruction::new(Op::Store("x".into()), 3);
        let json = serde_json::to_string(&instr).expect("serialize");
        assert_eq!(json, r#"{"code":"STORE x","line":3}"#);
    }

    #[test]
    fn listing_pads_line_numbers() {
        let code = vec![
            Instruction::new(Op::Push(1), 1),
            Instruction::new(Op::Store("x".into()), 1),
        ];
        assert_eq!(listing(&code), "   1  PUSH 1\n   1  STORE x\n");
    }
}
