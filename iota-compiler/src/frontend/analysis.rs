//! Semantic analysis: name resolution, local-slot assignment, and type
//! checking.
//!
//! Two passes. The first collects method signatures (plus the predeclared
//! `read`/`write` builtins) so calls can be resolved regardless of
//! declaration order. The second walks method bodies, assigns a slot to
//! every parameter and declaration, and checks types, annotating the AST in
//! place for the bytecode emitter.

use super::ast::*;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone)]
pub struct SemanticError {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for SemanticError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

/// All semantic errors found in one analysis run.
#[derive(Debug, Clone)]
pub struct SemanticErrors(pub Vec<SemanticError>);

impl fmt::Display for SemanticErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{e}")?;
        }
        Ok(())
    }
}

impl std::error::Error for SemanticErrors {}

/// A callable signature visible to the program.
#[derive(Debug, Clone)]
struct Signature {
    param_types: Vec<Type>,
    return_type: Type,
}

struct Analyzer {
    /// Method table keyed by name; overloads distinguished by parameter types.
    methods: HashMap<String, Vec<Signature>>,
    errors: Vec<SemanticError>,
}

/// A lexical scope mapping names to (slot, type).
type Scope = HashMap<String, (u8, Type)>;

struct MethodContext {
    scopes: Vec<Scope>,
    next_slot: usize,
    max_locals: usize,
    return_type: Type,
}

impl MethodContext {
    fn declare(&mut self, name: &str, ty: Type) -> Result<u8, String> {
        if self.scopes.last().unwrap().contains_key(name) {
            return Err(format!("redeclaring variable: {name}"));
        }
        if self.next_slot > u8::MAX as usize {
            return Err("too many local variables".to_string());
        }
        let slot = self.next_slot as u8;
        self.next_slot += 1;
        self.max_locals = self.max_locals.max(self.next_slot);
        self.scopes
            .last_mut()
            .unwrap()
            .insert(name.to_string(), (slot, ty));
        Ok(slot)
    }

    fn lookup(&self, name: &str) -> Option<(u8, Type)> {
        self.scopes.iter().rev().find_map(|s| s.get(name)).copied()
    }
}

/// Analyzes the program in place. On success the AST carries slot, type, and
/// descriptor annotations; on failure every discovered error is returned.
pub fn analyze(program: &mut Program) -> Result<(), SemanticErrors> {
    let mut analyzer = Analyzer {
        methods: HashMap::new(),
        errors: Vec::new(),
    };
    analyzer.declare_builtins();
    analyzer.collect_signatures(program);
    for method in &mut program.methods {
        analyzer.check_method(method);
    }
    if analyzer.errors.is_empty() {
        Ok(())
    } else {
        Err(SemanticErrors(analyzer.errors))
    }
}

impl Analyzer {
    fn declare_builtins(&mut self) {
        self.methods.insert(
            "read".to_string(),
            vec![Signature {
                param_types: vec![],
                return_type: Type::Int,
            }],
        );
        self.methods.insert(
            "write".to_string(),
            vec![
                Signature {
                    param_types: vec![Type::Int],
                    return_type: Type::Void,
                },
                Signature {
                    param_types: vec![Type::Boolean],
                    return_type: Type::Void,
                },
            ],
        );
    }

    fn collect_signatures(&mut self, program: &Program) {
        for method in &program.methods {
            let param_types: Vec<Type> = method.params.iter().map(|p| p.ty).collect();
            let overloads = self.methods.entry(method.name.clone()).or_default();
            if overloads.iter().any(|s| s.param_types == param_types) {
                self.errors.push(SemanticError {
                    line: method.line,
                    message: format!("redefining method: {}{}", method.name, method.descriptor()),
                });
                continue;
            }
            overloads.push(Signature {
                param_types,
                return_type: method.return_type,
            });
        }
    }

    fn check_method(&mut self, method: &mut MethodDecl) {
        let mut ctx = MethodContext {
            scopes: vec![Scope::new()],
            next_slot: 0,
            max_locals: 0,
            return_type: method.return_type,
        };
        for param in &method.params {
            if let Err(message) = ctx.declare(&param.name, param.ty) {
                self.errors.push(SemanticError {
                    line: method.line,
                    message,
                });
            }
        }
        for stmt in &mut method.body {
            self.check_stmt(stmt, &mut ctx);
        }
        method.max_locals = ctx.max_locals;
    }

    fn check_stmt(&mut self, stmt: &mut Stmt, ctx: &mut MethodContext) {
        match stmt {
            Stmt::Block(stmts) => {
                ctx.scopes.push(Scope::new());
                for s in stmts {
                    self.check_stmt(s, ctx);
                }
                ctx.scopes.pop();
            }
            Stmt::VarDecl {
                line,
                name,
                ty,
                init,
                slot,
            } => {
                if let Some(init) = init {
                    let init_ty = self.check_expr(init, ctx);
                    self.must_match(*line, init_ty, *ty);
                }
                match ctx.declare(name, *ty) {
                    Ok(s) => *slot = Some(s),
                    Err(message) => self.errors.push(SemanticError {
                        line: *line,
                        message,
                    }),
                }
            }
            Stmt::If {
                condition,
                then_part,
                else_part,
            } => {
                let cond_ty = self.check_expr(condition, ctx);
                self.must_match(condition.line(), cond_ty, Type::Boolean);
                self.check_stmt(then_part, ctx);
                if let Some(else_part) = else_part {
                    self.check_stmt(else_part, ctx);
                }
            }
            Stmt::While { condition, body } => {
                let cond_ty = self.check_expr(condition, ctx);
                self.must_match(condition.line(), cond_ty, Type::Boolean);
                self.check_stmt(body, ctx);
            }
            Stmt::Return { line, value } => match (value, ctx.return_type) {
                (None, Type::Void) => {}
                (None, expected) => self.errors.push(SemanticError {
                    line: *line,
                    message: format!("missing return value of type {expected}"),
                }),
                (Some(value), expected) => {
                    let ty = self.check_expr(value, ctx);
                    if expected == Type::Void {
                        self.errors.push(SemanticError {
                            line: *line,
                            message: "cannot return a value from a void method".to_string(),
                        });
                    } else {
                        self.must_match(*line, ty, expected);
                    }
                }
            },
            Stmt::Expr(expr) => {
                self.check_expr(expr, ctx);
            }
        }
    }

    /// Type-checks an expression, returning its type. Reports errors and
    /// falls back to `Int` so checking can continue.
    fn check_expr(&mut self, expr: &mut Expr, ctx: &mut MethodContext) -> Type {
        match expr {
            Expr::IntLit { .. } => Type::Int,
            Expr::BoolLit { .. } => Type::Boolean,
            Expr::Var {
                line,
                name,
                slot,
                ty,
            } => match ctx.lookup(name) {
                Some((s, t)) => {
                    *slot = Some(s);
                    *ty = Some(t);
                    t
                }
                None => {
                    self.errors.push(SemanticError {
                        line: *line,
                        message: format!("cannot find variable: {name}"),
                    });
                    Type::Int
                }
            },
            Expr::Assign {
                line,
                name,
                value,
                slot,
                ..
            } => {
                let value_ty = self.check_expr(value, ctx);
                match ctx.lookup(name) {
                    Some((s, t)) => {
                        *slot = Some(s);
                        self.must_match(*line, value_ty, t);
                        t
                    }
                    None => {
                        self.errors.push(SemanticError {
                            line: *line,
                            message: format!("cannot find variable: {name}"),
                        });
                        value_ty
                    }
                }
            }
            Expr::Call {
                line,
                name,
                args,
                descriptor,
                return_type,
                ..
            } => {
                let arg_types: Vec<Type> =
                    args.iter_mut().map(|a| self.check_expr(a, ctx)).collect();
                let signature = self
                    .methods
                    .get(name.as_str())
                    .and_then(|overloads| {
                        overloads.iter().find(|s| s.param_types == arg_types)
                    })
                    .cloned();
                match signature {
                    Some(sig) => {
                        let mut desc = String::from("(");
                        for t in &sig.param_types {
                            desc.push(t.descriptor());
                        }
                        desc.push(')');
                        desc.push(sig.return_type.descriptor());
                        *descriptor = Some(desc);
                        *return_type = Some(sig.return_type);
                        sig.return_type
                    }
                    None => {
                        let shape: Vec<String> =
                            arg_types.iter().map(|t| t.to_string()).collect();
                        self.errors.push(SemanticError {
                            line: *line,
                            message: format!(
                                "cannot find method: {}({})",
                                name,
                                shape.join(", ")
                            ),
                        });
                        Type::Int
                    }
                }
            }
            Expr::Binary { line, op, lhs, rhs } => {
                let lhs_ty = self.check_expr(lhs, ctx);
                let rhs_ty = self.check_expr(rhs, ctx);
                if op.is_logical() {
                    self.must_match(*line, lhs_ty, Type::Boolean);
                    self.must_match(*line, rhs_ty, Type::Boolean);
                    Type::Boolean
                } else if matches!(op, BinOp::Eq | BinOp::Ne) {
                    // Operand types must agree; either int or boolean works.
                    self.must_match(*line, rhs_ty, lhs_ty);
                    Type::Boolean
                } else if op.is_comparison() {
                    self.must_match(*line, lhs_ty, Type::Int);
                    self.must_match(*line, rhs_ty, Type::Int);
                    Type::Boolean
                } else {
                    self.must_match(*line, lhs_ty, Type::Int);
                    self.must_match(*line, rhs_ty, Type::Int);
                    Type::Int
                }
            }
            Expr::Unary { line, op, operand } => {
                let ty = self.check_expr(operand, ctx);
                match op {
                    UnOp::Neg => {
                        self.must_match(*line, ty, Type::Int);
                        Type::Int
                    }
                    UnOp::Not => {
                        self.must_match(*line, ty, Type::Boolean);
                        Type::Boolean
                    }
                }
            }
        }
    }

    fn must_match(&mut self, line: usize, found: Type, expected: Type) {
        if found != expected {
            self.errors.push(SemanticError {
                line,
                message: format!("type {expected} sought where {found} found"),
            });
        }
    }
}
