//! Recursive descent parser for iota.
//!
//! Grammar:
//!
//! ```text
//! compilation_unit ::= { method_declaration } EOF
//! method_declaration ::= ( "void" | type ) IDENT formals block
//! formals ::= "(" [ formal { "," formal } ] ")"
//! formal ::= type IDENT
//! block ::= "{" { statement } "}"
//! statement ::= block
//!             | type IDENT [ "=" expression ] ";"
//!             | "if" "(" expression ")" statement [ "else" statement ]
//!             | "return" [ expression ] ";"
//!             | "while" "(" expression ")" statement
//!             | statement_expression ";"
//! expression ::= assignment
//! assignment ::= cond_or [ "=" assignment ]
//! cond_or ::= cond_and { "||" cond_and }
//! cond_and ::= equality { "&&" equality }
//! equality ::= relational { ( "==" | "!=" ) relational }
//! relational ::= additive [ ( ">" | ">=" | "<" | "<=" ) additive ]
//! additive ::= multiplicative { ( "+" | "-" ) multiplicative }
//! multiplicative ::= unary { ( "*" | "/" | "%" ) unary }
//! unary ::= ( "!" | "-" ) unary | "(" expression ")" | IDENT [ arguments ] | literal
//! ```

use super::ast::*;
use super::lexer::{SpannedToken, Token};
use std::fmt;

#[derive(Debug, Clone)]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ParseError {}

pub struct Parser {
    tokens: Vec<SpannedToken>,
    pos: usize,
}

type PResult<T> = Result<T, ParseError>;

impl Parser {
    pub fn new(tokens: Vec<SpannedToken>) -> Self {
        Self { tokens, pos: 0 }
    }

    pub fn parse_program(mut self) -> PResult<Program> {
        let mut methods = Vec::new();
        while !self.at_eof() {
            methods.push(self.method_declaration()?);
        }
        Ok(Program { methods })
    }

    // ── Declarations ────────────────────────────────────────────────────

    fn method_declaration(&mut self) -> PResult<MethodDecl> {
        let line = self.line();
        let return_type = if self.have(&Token::Void) {
            Type::Void
        } else {
            self.parse_type()?
        };
        let name = self.identifier()?;
        let params = self.formal_parameters()?;
        self.must_be(&Token::LBrace)?;
        let body = self.block_body()?;
        Ok(MethodDecl {
            line,
            name,
            return_type,
            params,
            body,
            max_locals: 0,
        })
    }

    fn formal_parameters(&mut self) -> PResult<Vec<Param>> {
        let mut params = Vec::new();
        self.must_be(&Token::LParen)?;
        if self.have(&Token::RParen) {
            return Ok(params);
        }
        loop {
            let ty = self.parse_type()?;
            let name = self.identifier()?;
            params.push(Param { name, ty });
            if !self.have(&Token::Comma) {
                break;
            }
        }
        self.must_be(&Token::RParen)?;
        Ok(params)
    }

    fn parse_type(&mut self) -> PResult<Type> {
        if self.have(&Token::Int) {
            Ok(Type::Int)
        } else if self.have(&Token::Boolean) {
            Ok(Type::Boolean)
        } else {
            Err(self.error(format!("type sought where {} found", self.describe_current())))
        }
    }

    // ── Statements ──────────────────────────────────────────────────────

    /// Statements between an already-consumed `{` and its matching `}`.
    fn block_body(&mut self) -> PResult<Vec<Stmt>> {
        let mut stmts = Vec::new();
        while !self.have(&Token::RBrace) {
            if self.at_eof() {
                return Err(self.error("'}' sought before end of file".to_string()));
            }
            stmts.push(self.statement()?);
        }
        Ok(stmts)
    }

    fn statement(&mut self) -> PResult<Stmt> {
        let line = self.line();
        if self.have(&Token::LBrace) {
            Ok(Stmt::Block(self.block_body()?))
        } else if self.see(&Token::Int) || self.see(&Token::Boolean) {
            let ty = self.parse_type()?;
            let name = self.identifier()?;
            let init = if self.have(&Token::Assign) {
                Some(self.expression()?)
            } else {
                None
            };
            self.must_be(&Token::Semicolon)?;
            Ok(Stmt::VarDecl {
                line,
                name,
                ty,
                init,
                slot: None,
            })
        } else if self.have(&Token::If) {
            let condition = self.par_expression()?;
            let then_part = Box::new(self.statement()?);
            let else_part = if self.have(&Token::Else) {
                Some(Box::new(self.statement()?))
            } else {
                None
            };
            Ok(Stmt::If {
                condition,
                then_part,
                else_part,
            })
        } else if self.have(&Token::Return) {
            if self.have(&Token::Semicolon) {
                Ok(Stmt::Return { line, value: None })
            } else {
                let value = self.expression()?;
                self.must_be(&Token::Semicolon)?;
                Ok(Stmt::Return {
                    line,
                    value: Some(value),
                })
            }
        } else if self.have(&Token::While) {
            let condition = self.par_expression()?;
            let body = Box::new(self.statement()?);
            Ok(Stmt::While { condition, body })
        } else {
            let stmt = self.statement_expression()?;
            self.must_be(&Token::Semicolon)?;
            Ok(stmt)
        }
    }

    fn statement_expression(&mut self) -> PResult<Stmt> {
        let mut expr = self.expression()?;
        match &mut expr {
            Expr::Assign { is_statement, .. } | Expr::Call { is_statement, .. } => {
                *is_statement = true;
            }
            other => {
                return Err(ParseError {
                    line: other.line(),
                    message: "invalid statement expression; it does not have a side-effect"
                        .to_string(),
                })
            }
        }
        Ok(Stmt::Expr(expr))
    }

    fn par_expression(&mut self) -> PResult<Expr> {
        self.must_be(&Token::LParen)?;
        let expr = self.expression()?;
        self.must_be(&Token::RParen)?;
        Ok(expr)
    }

    // ── Expressions ─────────────────────────────────────────────────────

    fn expression(&mut self) -> PResult<Expr> {
        self.assignment_expression()
    }

    fn assignment_expression(&mut self) -> PResult<Expr> {
        let line = self.line();
        let lhs = self.conditional_or_expression()?;
        if self.have(&Token::Assign) {
            let value = self.assignment_expression()?;
            match lhs {
                Expr::Var { name, .. } => Ok(Expr::Assign {
                    line,
                    name,
                    value: Box::new(value),
                    slot: None,
                    is_statement: false,
                }),
                _ => Err(ParseError {
                    line,
                    message: "illegal lhs for assignment".to_string(),
                }),
            }
        } else {
            Ok(lhs)
        }
    }

    fn conditional_or_expression(&mut self) -> PResult<Expr> {
        let mut lhs = self.conditional_and_expression()?;
        loop {
            let line = self.line();
            if self.have(&Token::LOr) {
                let rhs = self.conditional_and_expression()?;
                lhs = binary(line, BinOp::Or, lhs, rhs);
            } else {
                return Ok(lhs);
            }
        }
    }

    fn conditional_and_expression(&mut self) -> PResult<Expr> {
        let mut lhs = self.equality_expression()?;
        loop {
            let line = self.line();
            if self.have(&Token::LAnd) {
                let rhs = self.equality_expression()?;
                lhs = binary(line, BinOp::And, lhs, rhs);
            } else {
                return Ok(lhs);
            }
        }
    }

    fn equality_expression(&mut self) -> PResult<Expr> {
        let mut lhs = self.relational_expression()?;
        loop {
            let line = self.line();
            if self.have(&Token::Eq) {
                let rhs = self.relational_expression()?;
                lhs = binary(line, BinOp::Eq, lhs, rhs);
            } else if self.have(&Token::Neq) {
                let rhs = self.relational_expression()?;
                lhs = binary(line, BinOp::Ne, lhs, rhs);
            } else {
                return Ok(lhs);
            }
        }
    }

    fn relational_expression(&mut self) -> PResult<Expr> {
        let line = self.line();
        let lhs = self.additive_expression()?;
        let op = if self.have(&Token::Ge) {
            BinOp::Ge
        } else if self.have(&Token::Gt) {
            BinOp::Gt
        } else if self.have(&Token::Le) {
            BinOp::Le
        } else if self.have(&Token::Lt) {
            BinOp::Lt
        } else {
            return Ok(lhs);
        };
        let rhs = self.additive_expression()?;
        Ok(binary(line, op, lhs, rhs))
    }

    fn additive_expression(&mut self) -> PResult<Expr> {
        let mut lhs = self.multiplicative_expression()?;
        loop {
            let line = self.line();
            if self.have(&Token::Plus) {
                let rhs = self.multiplicative_expression()?;
                lhs = binary(line, BinOp::Add, lhs, rhs);
            } else if self.have(&Token::Minus) {
                let rhs = self.multiplicative_expression()?;
                lhs = binary(line, BinOp::Sub, lhs, rhs);
            } else {
                return Ok(lhs);
            }
        }
    }

    fn multiplicative_expression(&mut self) -> PResult<Expr> {
        let mut lhs = self.unary_expression()?;
        loop {
            let line = self.line();
            if self.have(&Token::Star) {
                let rhs = self.unary_expression()?;
                lhs = binary(line, BinOp::Mul, lhs, rhs);
            } else if self.have(&Token::Slash) {
                let rhs = self.unary_expression()?;
                lhs = binary(line, BinOp::Div, lhs, rhs);
            } else if self.have(&Token::Percent) {
                let rhs = self.unary_expression()?;
                lhs = binary(line, BinOp::Rem, lhs, rhs);
            } else {
                return Ok(lhs);
            }
        }
    }

    fn unary_expression(&mut self) -> PResult<Expr> {
        let line = self.line();
        if self.have(&Token::LNot) {
            Ok(Expr::Unary {
                line,
                op: UnOp::Not,
                operand: Box::new(self.unary_expression()?),
            })
        } else if self.have(&Token::Minus) {
            Ok(Expr::Unary {
                line,
                op: UnOp::Neg,
                operand: Box::new(self.unary_expression()?),
            })
        } else if self.see(&Token::LParen) {
            self.par_expression()
        } else if let Some(name) = self.have_identifier() {
            if self.see(&Token::LParen) {
                let args = self.arguments()?;
                Ok(Expr::Call {
                    line,
                    name,
                    args,
                    descriptor: None,
                    return_type: None,
                    is_statement: false,
                })
            } else {
                Ok(Expr::Var {
                    line,
                    name,
                    slot: None,
                    ty: None,
                })
            }
        } else {
            self.literal()
        }
    }

    fn arguments(&mut self) -> PResult<Vec<Expr>> {
        let mut args = Vec::new();
        self.must_be(&Token::LParen)?;
        if self.have(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            if !self.have(&Token::Comma) {
                break;
            }
        }
        self.must_be(&Token::RParen)?;
        Ok(args)
    }

    fn literal(&mut self) -> PResult<Expr> {
        let line = self.line();
        if self.have(&Token::True) {
            Ok(Expr::BoolLit { line, value: true })
        } else if self.have(&Token::False) {
            Ok(Expr::BoolLit { line, value: false })
        } else if let Some(Token::Number(n)) = self.peek().cloned() {
            self.pos += 1;
            Ok(Expr::IntLit { line, value: n })
        } else {
            Err(self.error(format!(
                "literal sought where {} found",
                self.describe_current()
            )))
        }
    }

    // ── Parsing support ─────────────────────────────────────────────────

    fn at_eof(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|t| t.line)
            .or_else(|| self.tokens.last().map(|t| t.line))
            .unwrap_or(1)
    }

    fn see(&self, sought: &Token) -> bool {
        self.peek() == Some(sought)
    }

    fn have(&mut self, sought: &Token) -> bool {
        if self.see(sought) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn have_identifier(&mut self) -> Option<String> {
        if let Some(Token::Ident(name)) = self.peek() {
            let name = name.clone();
            self.pos += 1;
            Some(name)
        } else {
            None
        }
    }

    fn identifier(&mut self) -> PResult<String> {
        self.have_identifier().ok_or_else(|| {
            self.error(format!(
                "identifier sought where {} found",
                self.describe_current()
            ))
        })
    }

    fn must_be(&mut self, sought: &Token) -> PResult<()> {
        if self.have(sought) {
            Ok(())
        } else {
            Err(self.error(format!(
                "{} sought where {} found",
                sought,
                self.describe_current()
            )))
        }
    }

    fn describe_current(&self) -> String {
        match self.peek() {
            Some(t) => t.to_string(),
            None => "end of file".to_string(),
        }
    }

    fn error(&self, message: String) -> ParseError {
        ParseError {
            line: self.line(),
            message,
        }
    }
}

fn binary(line: usize, op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        line,
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}
