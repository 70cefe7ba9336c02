//! Bytecode emitter: lowers the analyzed AST to the class-file model.
//!
//! Boolean-valued expressions follow the branch-on-condition protocol: in
//! branch position they compile to a conditional jump against a label, and
//! in value position they materialize `1`/`0` around that same protocol.
//! Labels are backpatched to signed 16-bit offsets relative to the branch
//! instruction when the method is finalized.

use super::ast::*;
use crate::classfile::{opcodes::*, ClassFile, ConstantPool, MethodInfo};
use std::fmt;

#[derive(Debug, Clone)]
pub struct EmitterError {
    pub method: String,
    pub message: String,
}

impl fmt::Display for EmitterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "method {}: {}", self.method, self.message)
    }
}

impl std::error::Error for EmitterError {}

/// Lowers a fully analyzed program to bytecode.
pub fn emit_program(program: &Program) -> Result<ClassFile, EmitterError> {
    let mut constant_pool = ConstantPool::new();
    let mut methods = Vec::new();
    for method in &program.methods {
        let emitter = MethodEmitter::new(method, &mut constant_pool);
        methods.push(emitter.emit()?);
    }
    Ok(ClassFile {
        constant_pool,
        methods,
    })
}

type Label = usize;

struct MethodEmitter<'a> {
    method: &'a MethodDecl,
    pool: &'a mut ConstantPool,
    code: Vec<u8>,
    labels: Vec<Option<usize>>,
    fixups: Vec<(usize, Label)>,
    instruction_after_label: bool,
}

type EResult<T> = Result<T, EmitterError>;

impl<'a> MethodEmitter<'a> {
    fn new(method: &'a MethodDecl, pool: &'a mut ConstantPool) -> Self {
        Self {
            method,
            pool,
            code: Vec::new(),
            labels: Vec::new(),
            fixups: Vec::new(),
            instruction_after_label: true,
        }
    }

    fn emit(mut self) -> EResult<MethodInfo> {
        for stmt in &self.method.body {
            self.emit_stmt(stmt)?;
        }
        if self.method.return_type == Type::Void {
            self.push_op(RETURN);
        }
        // A label placed at the very end of the code would point one past the
        // last instruction; pad with a NOP so every branch target is real.
        if !self.instruction_after_label {
            self.push_op(NOP);
        }
        self.patch_labels()?;
        Ok(MethodInfo {
            name: self.method.name.clone(),
            descriptor: self.method.descriptor(),
            max_locals: self.method.max_locals,
            code: self.code,
        })
    }

    // ── Statements ──────────────────────────────────────────────────────

    fn emit_stmt(&mut self, stmt: &Stmt) -> EResult<()> {
        match stmt {
            Stmt::Block(stmts) => {
                for s in stmts {
                    self.emit_stmt(s)?;
                }
            }
            Stmt::VarDecl { name, init, slot, .. } => {
                if let Some(init) = init {
                    self.emit_expr(init)?;
                    let slot = self.slot(*slot, name)?;
                    self.push_op_arg(ISTORE, slot);
                }
            }
            Stmt::If {
                condition,
                then_part,
                else_part,
            } => {
                let else_label = self.create_label();
                let end_label = self.create_label();
                self.emit_branch(condition, else_label, false)?;
                self.emit_stmt(then_part)?;
                if else_part.is_some() {
                    self.branch(GOTO, end_label);
                }
                self.place_label(else_label);
                if let Some(else_part) = else_part {
                    self.emit_stmt(else_part)?;
                    self.place_label(end_label);
                }
            }
            Stmt::While { condition, body } => {
                let test_label = self.create_label();
                let end_label = self.create_label();
                self.place_label(test_label);
                self.emit_branch(condition, end_label, false)?;
                self.emit_stmt(body)?;
                self.branch(GOTO, test_label);
                self.place_label(end_label);
            }
            Stmt::Return { value, .. } => match value {
                None => self.push_op(RETURN),
                Some(value) => {
                    self.emit_expr(value)?;
                    self.push_op(IRETURN);
                }
            },
            Stmt::Expr(expr) => {
                self.emit_expr(expr)?;
            }
        }
        Ok(())
    }

    // ── Expressions in value position ───────────────────────────────────

    fn emit_expr(&mut self, expr: &Expr) -> EResult<()> {
        match expr {
            Expr::IntLit { value, .. } => self.emit_ldc(*value),
            Expr::BoolLit { value, .. } => {
                self.push_op(if *value { ICONST_1 } else { ICONST_0 });
                Ok(())
            }
            Expr::Var { name, slot, .. } => {
                let slot = self.slot(*slot, name)?;
                self.push_op_arg(ILOAD, slot);
                Ok(())
            }
            Expr::Assign {
                name,
                value,
                slot,
                is_statement,
                ..
            } => {
                self.emit_expr(value)?;
                if !is_statement {
                    self.push_op(DUP);
                }
                let slot = self.slot(*slot, name)?;
                self.push_op_arg(ISTORE, slot);
                Ok(())
            }
            Expr::Call {
                name,
                args,
                descriptor,
                return_type,
                is_statement,
                ..
            } => {
                for arg in args {
                    self.emit_expr(arg)?;
                }
                let desc = descriptor
                    .clone()
                    .ok_or_else(|| self.internal("unresolved call"))?;
                let index = self.pool.intern_method_ref(name, &desc);
                let [hi, lo] = index.to_be_bytes();
                self.push_op(INVOKESTATIC);
                self.code.push(hi);
                self.code.push(lo);
                if *is_statement && *return_type != Some(Type::Void) {
                    // Discard an unused call result.
                    self.push_op(POP);
                }
                Ok(())
            }
            Expr::Binary { op, lhs, rhs, .. } if !op.is_comparison() && !op.is_logical() => {
                self.emit_expr(lhs)?;
                self.emit_expr(rhs)?;
                self.push_op(match op {
                    BinOp::Add => IADD,
                    BinOp::Sub => ISUB,
                    BinOp::Mul => IMUL,
                    BinOp::Div => IDIV,
                    BinOp::Rem => IREM,
                    _ => unreachable!(),
                });
                Ok(())
            }
            Expr::Unary {
                op: UnOp::Neg,
                operand,
                ..
            } => {
                self.emit_expr(operand)?;
                self.push_op(INEG);
                Ok(())
            }
            // Boolean-valued operators materialize 1/0 via their branch form.
            boolean => self.emit_materialized(boolean),
        }
    }

    fn emit_materialized(&mut self, expr: &Expr) -> EResult<()> {
        let false_label = self.create_label();
        let true_label = self.create_label();
        self.emit_branch(expr, false_label, false)?;
        self.push_op(ICONST_1);
        self.branch(GOTO, true_label);
        self.place_label(false_label);
        self.push_op(ICONST_0);
        self.place_label(true_label);
        Ok(())
    }

    fn emit_ldc(&mut self, value: i32) -> EResult<()> {
        let index = self
            .pool
            .intern_int(value)
            .ok_or_else(|| self.internal("constant pool overflow"))?;
        self.push_op(LDC);
        self.code.push(index);
        Ok(())
    }

    // ── Expressions in branch position ──────────────────────────────────

    /// Emits code that jumps to `target` when `expr` evaluates to `on_true`.
    fn emit_branch(&mut self, expr: &Expr, target: Label, on_true: bool) -> EResult<()> {
        match expr {
            Expr::Binary { op, lhs, rhs, .. } if op.is_comparison() => {
                self.emit_expr(lhs)?;
                self.emit_expr(rhs)?;
                let opcode = match (op, on_true) {
                    (BinOp::Eq, true) => IF_ICMPEQ,
                    (BinOp::Eq, false) => IF_ICMPNE,
                    (BinOp::Ne, true) => IF_ICMPNE,
                    (BinOp::Ne, false) => IF_ICMPEQ,
                    (BinOp::Lt, true) => IF_ICMPLT,
                    (BinOp::Lt, false) => IF_ICMPGE,
                    (BinOp::Le, true) => IF_ICMPLE,
                    (BinOp::Le, false) => IF_ICMPGT,
                    (BinOp::Gt, true) => IF_ICMPGT,
                    (BinOp::Gt, false) => IF_ICMPLE,
                    (BinOp::Ge, true) => IF_ICMPGE,
                    (BinOp::Ge, false) => IF_ICMPLT,
                    _ => unreachable!(),
                };
                self.branch(opcode, target);
                Ok(())
            }
            Expr::Binary {
                op: BinOp::And,
                lhs,
                rhs,
                ..
            } => {
                if on_true {
                    let fall_through = self.create_label();
                    self.emit_branch(lhs, fall_through, false)?;
                    self.emit_branch(rhs, target, true)?;
                    self.place_label(fall_through);
                } else {
                    self.emit_branch(lhs, target, false)?;
                    self.emit_branch(rhs, target, false)?;
                }
                Ok(())
            }
            Expr::Binary {
                op: BinOp::Or,
                lhs,
                rhs,
                ..
            } => {
                if on_true {
                    self.emit_branch(lhs, target, true)?;
                    self.emit_branch(rhs, target, true)?;
                } else {
                    let fall_through = self.create_label();
                    self.emit_branch(lhs, fall_through, true)?;
                    self.emit_branch(rhs, target, false)?;
                    self.place_label(fall_through);
                }
                Ok(())
            }
            Expr::Unary {
                op: UnOp::Not,
                operand,
                ..
            } => self.emit_branch(operand, target, !on_true),
            Expr::BoolLit { value, .. } => {
                if *value == on_true {
                    self.branch(GOTO, target);
                }
                Ok(())
            }
            // Variables, calls, and assignments of boolean type: evaluate,
            // then branch on the 1/0 result.
            other => {
                self.emit_expr(other)?;
                self.branch(if on_true { IFNE } else { IFEQ }, target);
                Ok(())
            }
        }
    }

    // ── Code buffer and label management ────────────────────────────────

    fn push_op(&mut self, opcode: u8) {
        self.code.push(opcode);
        self.instruction_after_label = true;
    }

    fn push_op_arg(&mut self, opcode: u8, arg: u8) {
        self.push_op(opcode);
        self.code.push(arg);
    }

    fn branch(&mut self, opcode: u8, label: Label) {
        let branch_pc = self.code.len();
        self.push_op(opcode);
        self.code.push(0);
        self.code.push(0);
        self.fixups.push((branch_pc, label));
    }

    fn create_label(&mut self) -> Label {
        self.labels.push(None);
        self.labels.len() - 1
    }

    fn place_label(&mut self, label: Label) {
        self.labels[label] = Some(self.code.len());
        self.instruction_after_label = false;
    }

    fn patch_labels(&mut self) -> EResult<()> {
        for &(branch_pc, label) in &self.fixups {
            let target = self.labels[label].ok_or_else(|| EmitterError {
                method: self.method.name.clone(),
                message: "unresolved jump label".to_string(),
            })?;
            let offset = target as isize - branch_pc as isize;
            if offset < i16::MIN as isize || offset > i16::MAX as isize {
                return Err(EmitterError {
                    method: self.method.name.clone(),
                    message: "branch offset out of range".to_string(),
                });
            }
            let [hi, lo] = (offset as i16).to_be_bytes();
            self.code[branch_pc + 1] = hi;
            self.code[branch_pc + 2] = lo;
        }
        Ok(())
    }

    fn slot(&self, slot: Option<u8>, name: &str) -> EResult<u8> {
        slot.ok_or_else(|| self.internal(&format!("unresolved variable {name}")))
    }

    fn internal(&self, message: &str) -> EmitterError {
        EmitterError {
            method: self.method.name.clone(),
            message: message.to_string(),
        }
    }
}
