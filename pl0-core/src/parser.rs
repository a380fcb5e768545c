//! Recursive-descent parser.
//!
//! One token of lookahead, plus a one-token peek used only when a statement
//! starts with a bare identifier: `x := ...` is an assignment, `p;` is a call
//! when `p` has been registered as a procedure in an enclosing scope.

use std::collections::HashSet;

use crate::ast::{
    BinaryOp, Block, Declaration, DeclarationKind, ElseIf, Expr, Initializer,
    ProcedureDeclaration, Program, Statement,
};
use crate::error::ParseError;
use crate::lexer::{Token, TokenKind, tokenize};

const STATEMENT_KEYWORDS: &[&str] = &[
    "if",
    "while",
    "for",
    "read",
    "write",
    "call",
    "begin",
    "procedure",
];

const RELATIONAL: &[&str] = &["<", "<=", "=", "<>", ">", ">="];

pub fn parse(tokens: &[Token]) -> Result<Program, ParseError> {
    let eof_line = tokens.last().map_or(1, |t| t.line);
    let mut parser = Parser {
        tokens,
        position: 0,
        eof: Token::new(TokenKind::Eof, "", eof_line),
        procedures: vec![HashSet::new()],
    };
    parser.program()
}

/// Lex and parse in one step.
pub fn parse_source(source: &str) -> Result<Program, ParseError> {
    parse(&tokenize(source))
}

struct Parser<'t> {
    tokens: &'t [Token],
    position: usize,
    eof: Token,
    /// Procedure names visible at each nesting level.
    procedures: Vec<HashSet<String>>,
}

impl<'t> Parser<'t> {
    fn program(&mut self) -> Result<Program, ParseError> {
        let line = self.current().line;
        let mut blocks = Vec::new();
        while !matches!(self.current().kind, TokenKind::Eof | TokenKind::End) {
            blocks.push(self.block()?);
        }
        if blocks.is_empty() {
            return Err(self.error("declaration or statement"));
        }
        if self.current().kind == TokenKind::End {
            self.advance();
        }
        self.expect(TokenKind::Eof, None, "end of input")?;
        Ok(Program { blocks, line })
    }

    fn block(&mut self) -> Result<Block, ParseError> {
        let line = self.current().line;
        let declarations = self.declarations()?;
        let statement = if self.starts_statement() {
            Some(self.statement()?)
        } else {
            None
        };
        if declarations.is_empty() && statement.is_none() {
            return Err(self.error("declaration or statement"));
        }
        Ok(Block {
            declarations,
            statement,
            line,
        })
    }

    fn declarations(&mut self) -> Result<Vec<Declaration>, ParseError> {
        let mut declarations = Vec::new();
        loop {
            let kind = if self.current().is_keyword("const") {
                DeclarationKind::Const
            } else if self.current().is_keyword("var") {
                DeclarationKind::Var
            } else {
                return Ok(declarations);
            };
            self.advance();
            loop {
                let name = self.expect_identifier()?;
                let init = match kind {
                    DeclarationKind::Const => {
                        self.expect(TokenKind::Operator, Some("="), "'='")?;
                        Some(self.initializer()?)
                    }
                    DeclarationKind::Var => {
                        if self.current().is(TokenKind::Operator, "=") {
                            self.advance();
                            Some(self.initializer()?)
                        } else {
                            None
                        }
                    }
                };
                declarations.push(Declaration {
                    kind,
                    name: name.text,
                    init,
                    line: name.line,
                });
                if self.current().kind == TokenKind::Comma {
                    self.advance();
                } else {
                    break;
                }
            }
            self.expect(TokenKind::Semicolon, None, "';'")?;
        }
    }

    /// A number or the name of an earlier constant.
    fn initializer(&mut self) -> Result<Initializer, ParseError> {
        if self.current().kind == TokenKind::Identifier {
            let token = self.advance();
            return Ok(Initializer::Constant(token.text));
        }
        Ok(Initializer::Number(self.number()?))
    }

    fn starts_statement(&self) -> bool {
        let token = self.current();
        match token.kind {
            TokenKind::Identifier => true,
            TokenKind::Keyword => STATEMENT_KEYWORDS.contains(&token.text.as_str()),
            _ => false,
        }
    }

    fn statement_list(&mut self) -> Result<Vec<Statement>, ParseError> {
        let mut statements = Vec::new();
        while self.starts_statement() {
            statements.push(self.statement()?);
        }
        Ok(statements)
    }

    fn statement(&mut self) -> Result<Statement, ParseError> {
        let token = self.current().clone();
        if token.kind == TokenKind::Identifier {
            return self.assignment_or_call();
        }
        match token.text.as_str() {
            "if" => self.if_statement(),
            "while" => self.while_statement(),
            "for" => self.for_statement(),
            "read" => self.read_statement(),
            "write" => self.write_statement(),
            "call" => {
                self.advance();
                let name = self.expect_identifier()?;
                self.expect(TokenKind::Semicolon, None, "';'")?;
                Ok(Statement::Call {
                    name: name.text,
                    line: token.line,
                })
            }
            "begin" => {
                self.advance();
                let statements = self.statement_list()?;
                self.expect(TokenKind::Keyword, Some("end"), "keyword 'end'")?;
                self.skip_semicolon();
                Ok(Statement::BeginEnd {
                    statements,
                    line: token.line,
                })
            }
            "procedure" => self.procedure_declaration(),
            _ => Err(self.error("statement")),
        }
    }

    fn assignment_or_call(&mut self) -> Result<Statement, ParseError> {
        let name = self.current().clone();
        if self.peek().kind == TokenKind::Equals {
            self.advance();
            self.advance();
            let value = self.expr()?;
            self.expect(TokenKind::Semicolon, None, "';'")?;
            return Ok(Statement::Assignment {
                name: name.text,
                value,
                line: name.line,
            });
        }
        if self.is_procedure(&name.text) {
            self.advance();
            self.expect(TokenKind::Semicolon, None, "';'")?;
            return Ok(Statement::Call {
                name: name.text,
                line: name.line,
            });
        }
        self.advance();
        Err(self.error("':='"))
    }

    fn if_statement(&mut self) -> Result<Statement, ParseError> {
        let line = self.advance().line;
        let condition = self.expr()?;
        self.expect(TokenKind::Keyword, Some("then"), "keyword 'then'")?;
        let then_branch = self.statement_list()?;
        let mut else_ifs = Vec::new();
        let mut else_branch = None;
        while self.current().is_keyword("else") {
            let else_line = self.advance().line;
            if self.current().is_keyword("if") {
                self.advance();
                let condition = self.expr()?;
                self.expect(TokenKind::Keyword, Some("then"), "keyword 'then'")?;
                let body = self.statement_list()?;
                else_ifs.push(ElseIf {
                    condition,
                    body,
                    line: else_line,
                });
            } else {
                else_branch = Some(self.statement_list()?);
                break;
            }
        }
        self.expect(TokenKind::Keyword, Some("endif"), "keyword 'endif'")?;
        self.skip_semicolon();
        Ok(Statement::If {
            condition,
            then_branch,
            else_ifs,
            else_branch,
            line,
        })
    }

    fn while_statement(&mut self) -> Result<Statement, ParseError> {
        let line = self.advance().line;
        let condition = self.expr()?;
        self.expect(TokenKind::Keyword, Some("do"), "keyword 'do'")?;
        let body = self.statement_list()?;
        self.expect(TokenKind::Keyword, Some("endwhile"), "keyword 'endwhile'")?;
        self.skip_semicolon();
        Ok(Statement::While {
            condition,
            body,
            line,
        })
    }

    fn for_statement(&mut self) -> Result<Statement, ParseError> {
        let line = self.advance().line;
        let variable = self.expect_identifier()?.text;
        self.expect(TokenKind::Equals, None, "':='")?;
        let from = self.expr()?;
        self.expect(TokenKind::Keyword, Some("to"), "keyword 'to'")?;
        let to = self.expr()?;
        self.expect(TokenKind::Keyword, Some("do"), "keyword 'do'")?;
        let body = self.statement_list()?;
        self.expect(TokenKind::Keyword, Some("endfor"), "keyword 'endfor'")?;
        self.skip_semicolon();
        Ok(Statement::For {
            variable,
            from,
            to,
            body,
            line,
        })
    }

    fn read_statement(&mut self) -> Result<Statement, ParseError> {
        let line = self.advance().line;
        let mut names = Vec::new();
        if self.current().is(TokenKind::Parenthesis, "(") {
            self.advance();
            names.push(self.expect_identifier()?.text);
            while self.current().kind == TokenKind::Comma {
                self.advance();
                names.push(self.expect_identifier()?.text);
            }
            self.expect(TokenKind::Parenthesis, Some(")"), "')'")?;
        } else {
            names.push(self.expect_identifier()?.text);
        }
        self.expect(TokenKind::Semicolon, None, "';'")?;
        Ok(Statement::Read { names, line })
    }

    fn write_statement(&mut self) -> Result<Statement, ParseError> {
        let line = self.advance().line;
        // `write (a, b);` is an argument list, `write (a) * 2;` is one expression.
        if self.current().is(TokenKind::Parenthesis, "(") {
            let saved = self.position;
            if let Ok(values) = self.parenthesized_exprs() {
                if self.current().kind == TokenKind::Semicolon {
                    self.advance();
                    return Ok(Statement::Write { values, line });
                }
            }
            self.position = saved;
        }
        let mut values = vec![self.expr()?];
        while self.current().kind == TokenKind::Comma {
            self.advance();
            values.push(self.expr()?);
        }
        self.expect(TokenKind::Semicolon, None, "';'")?;
        Ok(Statement::Write { values, line })
    }

    fn parenthesized_exprs(&mut self) -> Result<Vec<Expr>, ParseError> {
        self.expect(TokenKind::Parenthesis, Some("("), "'('")?;
        let mut values = vec![self.expr()?];
        while self.current().kind == TokenKind::Comma {
            self.advance();
            values.push(self.expr()?);
        }
        self.expect(TokenKind::Parenthesis, Some(")"), "')'")?;
        Ok(values)
    }

    fn procedure_declaration(&mut self) -> Result<Statement, ParseError> {
        let line = self.advance().line;
        let name = self.expect_identifier()?.text;
        // Registered before the body so the body may call itself.
        if let Some(scope) = self.procedures.last_mut() {
            scope.insert(name.clone());
        }
        self.expect(TokenKind::Semicolon, None, "';'")?;
        self.procedures.push(HashSet::new());
        let body = self.block();
        self.procedures.pop();
        let body = body?;
        self.skip_semicolon();
        Ok(Statement::Procedure(ProcedureDeclaration {
            name,
            body: Box::new(body),
            line,
        }))
    }

    fn expr(&mut self) -> Result<Expr, ParseError> {
        let left = self.arith()?;
        let token = self.current();
        if token.kind == TokenKind::Operator && RELATIONAL.contains(&token.text.as_str()) {
            let token = self.advance();
            let right = self.arith()?;
            return binary(&token, left, right);
        }
        Ok(left)
    }

    fn arith(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.term()?;
        while self.current().is(TokenKind::Operator, "+")
            || self.current().is(TokenKind::Operator, "-")
        {
            let token = self.advance();
            let right = self.term()?;
            left = binary(&token, left, right)?;
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.factor()?;
        while self.current().is(TokenKind::Operator, "*")
            || self.current().is(TokenKind::Operator, "/")
        {
            let token = self.advance();
            let right = self.factor()?;
            left = binary(&token, left, right)?;
        }
        Ok(left)
    }

    fn factor(&mut self) -> Result<Expr, ParseError> {
        let token = self.current().clone();
        match token.kind {
            TokenKind::Number => {
                let value = self.number()?;
                Ok(Expr::Literal {
                    value,
                    line: token.line,
                })
            }
            TokenKind::Identifier => {
                self.advance();
                Ok(Expr::Identifier {
                    name: token.text,
                    line: token.line,
                })
            }
            TokenKind::Parenthesis if token.text == "(" => {
                self.advance();
                let inner = self.expr()?;
                self.expect(TokenKind::Parenthesis, Some(")"), "')'")?;
                Ok(inner)
            }
            _ => Err(self.error("number, identifier or '('")),
        }
    }

    fn number(&mut self) -> Result<i32, ParseError> {
        let token = self.expect(TokenKind::Number, None, "number")?;
        token
            .text
            .parse::<i32>()
            .map_err(|_| ParseError::NumberOutOfRange {
                text: token.text.clone(),
                line: token.line,
            })
    }

    fn is_procedure(&self, name: &str) -> bool {
        self.procedures.iter().any(|scope| scope.contains(name))
    }

    fn current(&self) -> &Token {
        self.tokens.get(self.position).unwrap_or(&self.eof)
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.position + 1).unwrap_or(&self.eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if self.position < self.tokens.len() {
            self.position += 1;
        }
        token
    }

    fn skip_semicolon(&mut self) {
        if self.current().kind == TokenKind::Semicolon {
            self.advance();
        }
    }

    fn expect_identifier(&mut self) -> Result<Token, ParseError> {
        self.expect(TokenKind::Identifier, None, "identifier")
    }

    fn expect(
        &mut self,
        kind: TokenKind,
        text: Option<&str>,
        expected: &str,
    ) -> Result<Token, ParseError> {
        let token = self.current();
        let matches = token.kind == kind && text.is_none_or(|t| token.text == t);
        if matches {
            Ok(self.advance())
        } else {
            Err(self.error(expected))
        }
    }

    fn error(&self, expected: &str) -> ParseError {
        let token = self.current();
        ParseError::Unexpected {
            expected: expected.to_string(),
            found: token.text.clone(),
            kind: token.kind,
            line: token.line,
        }
    }
}

fn binary(token: &Token, left: Expr, right: Expr) -> Result<Expr, ParseError> {
    let op = BinaryOp::from_symbol(&token.text).ok_or_else(|| ParseError::Unexpected {
        expected: "binary operator".to_string(),
        found: token.text.clone(),
        kind: token.kind,
        line: token.line,
    })?;
    Ok(Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
        line: token.line,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_statement(source: &str) -> Statement {
        let program = parse_source(source).expect("parse");
        program
            .blocks
            .into_iter()
            .find_map(|b| b.statement)
            .expect("statement")
    }

    #[test]
    fn parses_declarations_and_assignment() {
        let program = parse_source("const a = 1, b = a; var x, y = 7; x := a;").expect("parse");
        assert_eq!(program.blocks.len(), 1);
        let block = &program.blocks[0];
        assert_eq!(block.declarations.len(), 4);
        assert_eq!(block.declarations[1].init, Some(Initializer::Constant("a".into())));
        assert_eq!(block.declarations[3].init, Some(Initializer::Number(7)));
        assert!(matches!(block.statement, Some(Statement::Assignment { .. })));
    }

    #[test]
    fn accepts_constant_name_as_variable_initializer() {
        let program = parse_source("const a = 4; var v = a, w = 2;").expect("parse");
        let block = &program.blocks[0];
        assert_eq!(block.declarations[1].init, Some(Initializer::Constant("a".into())));
        assert_eq!(block.declarations[2].init, Some(Initializer::Number(2)));
    }

    #[test]
    fn rejects_unknown_binary_operator_token() {
        let token = Token::new(TokenKind::Operator, ":=", 4);
        let one = Expr::Literal { value: 1, line: 4 };
        let err = binary(&token, one.clone(), one).unwrap_err();
        assert!(matches!(
            err,
            ParseError::Unexpected { ref found, line: 4, .. } if found == ":="
        ));
    }

    #[test]
    fn honours_operator_precedence() {
        let stmt = first_statement("x := 1 + 2 * 3;");
        let Statement::Assignment { value, .. } = stmt else {
            panic!("unexpected statement");
        };
        let Expr::Binary { op, right, .. } = value else {
            panic!("unexpected expression");
        };
        assert_eq!(op, BinaryOp::Add);
        assert!(matches!(*right, Expr::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn parses_relational_expression_with_parentheses() {
        let stmt = first_statement("x := (1 + 2) <> 3;");
        let Statement::Assignment { value, .. } = stmt else {
            panic!("unexpected statement");
        };
        assert!(matches!(value, Expr::Binary { op: BinaryOp::Ne, .. }));
    }

    #[test]
    fn splits_program_into_blocks() {
        let program = parse_source("var x; x := 0; x := x + 1; x := x + 1;").expect("parse");
        assert_eq!(program.blocks.len(), 3);
        assert_eq!(program.blocks[0].declarations.len(), 1);
        assert!(program.blocks[2].declarations.is_empty());
    }

    #[test]
    fn classifies_bare_identifier_as_call_for_known_procedure() {
        let program = parse_source("var x;\nprocedure p; x := 1;\np;").expect("parse");
        let last = program.blocks.last().unwrap();
        assert_eq!(
            last.statement,
            Some(Statement::Call {
                name: "p".into(),
                line: 3
            })
        );
    }

    #[test]
    fn allows_direct_recursion() {
        let stmt = first_statement("procedure p; begin p; end;");
        let Statement::Procedure(decl) = stmt else {
            panic!("unexpected statement");
        };
        let Some(Statement::BeginEnd { statements, .. }) = &decl.body.statement else {
            panic!("unexpected body");
        };
        assert!(matches!(statements[0], Statement::Call { .. }));
    }

    #[test]
    fn nested_procedure_is_not_visible_outside() {
        let err = parse_source("procedure p; begin procedure q; x := 1; q; end;\nq;").unwrap_err();
        assert_eq!(
            err,
            ParseError::Unexpected {
                expected: "':='".into(),
                found: ";".into(),
                kind: TokenKind::Semicolon,
                line: 2,
            }
        );
    }

    #[test]
    fn rejects_unknown_bare_identifier() {
        let err = parse_source("var x;\n\nfoo;").unwrap_err();
        assert_eq!(err.line(), 3);
    }

    #[test]
    fn parses_if_with_else_if_chain_and_else() {
        let stmt = first_statement(
            "if x < 1 then x := 1; else if x < 2 then x := 2; else if x < 3 then else x := 4; endif;",
        );
        let Statement::If {
            then_branch,
            else_ifs,
            else_branch,
            ..
        } = stmt
        else {
            panic!("unexpected statement");
        };
        assert_eq!(then_branch.len(), 1);
        assert_eq!(else_ifs.len(), 2);
        assert!(else_ifs[1].body.is_empty());
        assert_eq!(else_branch.map(|b| b.len()), Some(1));
    }

    #[test]
    fn parses_loops() {
        let stmt = first_statement("while x < 10 do x := x + 1; endwhile");
        assert!(matches!(stmt, Statement::While { ref body, .. } if body.len() == 1));
        let stmt = first_statement("for i := 0 to 3 do write i; endfor;");
        let Statement::For { variable, body, .. } = stmt else {
            panic!("unexpected statement");
        };
        assert_eq!(variable, "i");
        assert!(matches!(body[0], Statement::Write { .. }));
    }

    #[test]
    fn parses_read_and_write_forms() {
        assert_eq!(
            first_statement("read (a, b);"),
            Statement::Read {
                names: vec!["a".into(), "b".into()],
                line: 1
            }
        );
        let Statement::Write { values, .. } = first_statement("write (a, b + 1);") else {
            panic!("unexpected statement");
        };
        assert_eq!(values.len(), 2);
        let Statement::Write { values, .. } = first_statement("write (a) * 2;") else {
            panic!("unexpected statement");
        };
        assert!(matches!(values[0], Expr::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn accepts_trailing_period_only_at_end() {
        assert!(parse_source("x := 1;.").is_ok());
        let err = parse_source("x := 1;. x := 2;").unwrap_err();
        assert!(matches!(err, ParseError::Unexpected { ref expected, .. } if expected == "end of input"));
    }

    #[test]
    fn reports_offending_token_and_line() {
        let err = parse_source("var x;\nif x then\nx := ;\nendif;").unwrap_err();
        assert_eq!(
            err,
            ParseError::Unexpected {
                expected: "number, identifier or '('".into(),
                found: ";".into(),
                kind: TokenKind::Semicolon,
                line: 3,
            }
        );
    }

    #[test]
    fn rejects_oversized_literal() {
        let err = parse_source("x := 99999999999;").unwrap_err();
        assert!(matches!(err, ParseError::NumberOutOfRange { line: 1, .. }));
    }

    #[test]
    fn rejects_empty_program() {
        assert!(parse_source("").is_err());
    }
}
