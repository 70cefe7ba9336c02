//! Tuple decoder: a flat walk over a method's bytecode that yields one
//! positional tuple per instruction, keyed by bytecode PC. Branch offsets
//! are resolved to absolute target PCs here; nothing downstream looks at
//! raw bytes again.

use super::BackendError;
use crate::classfile::{opcodes::*, ConstantPool};
use std::fmt;

#[derive(Debug, Clone)]
pub enum TupleKind {
    /// Single-byte instruction with no operands.
    NoArg,
    /// `LDC` with its pool value already resolved.
    IConst { value: i32 },
    /// `ILOAD`/`ISTORE` with a local-variable index.
    LoadStore { index: u8 },
    /// Branch with an absolute target PC.
    Branch { target: usize },
    /// `INVOKESTATIC` with the callee resolved from the pool.
    Call { name: String, desc: String },
}

#[derive(Debug, Clone)]
pub struct Tuple {
    pub pc: usize,
    pub opcode: u8,
    pub is_leader: bool,
    pub kind: TupleKind,
}

impl Tuple {
    fn new(pc: usize, opcode: u8, kind: TupleKind) -> Self {
        Self {
            pc,
            opcode,
            is_leader: false,
            kind,
        }
    }

    pub fn is_branch(&self) -> bool {
        matches!(self.kind, TupleKind::Branch { .. })
    }

    /// Absolute branch target, if this tuple is a branch.
    pub fn branch_target(&self) -> Option<usize> {
        match self.kind {
            TupleKind::Branch { target } => Some(target),
            _ => None,
        }
    }
}

// The display form mirrors the dump format: "pc: mnemonic operands".
impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TupleKind::NoArg => write!(f, "{}: {}", self.pc, mnemonic(self.opcode)),
            TupleKind::IConst { value } => {
                write!(f, "{}: {} {}", self.pc, mnemonic(self.opcode), value)
            }
            TupleKind::LoadStore { index } => {
                write!(f, "{}: {} {}", self.pc, mnemonic(self.opcode), index)
            }
            TupleKind::Branch { target } => {
                write!(f, "{}: {} {}", self.pc, mnemonic(self.opcode), target)
            }
            TupleKind::Call { name, desc } => {
                write!(f, "{}: {} {}{}", self.pc, mnemonic(self.opcode), name, desc)
            }
        }
    }
}

/// Decodes a method's bytecode into tuples. Malformed bytecode is an
/// internal error; the front end never produces it.
pub fn decode(code: &[u8], pool: &ConstantPool, method: &str) -> Result<Vec<Tuple>, BackendError> {
    let mut tuples = Vec::new();
    let mut i = 0;
    while i < code.len() {
        let pc = i;
        let opcode = code[i];
        match opcode {
            NOP | DUP | IADD | ICONST_0 | ICONST_1 | IDIV | IMUL | INEG | IREM | IRETURN
            | ISUB | POP | RETURN => {
                tuples.push(Tuple::new(pc, opcode, TupleKind::NoArg));
            }
            LDC => {
                let index = *code.get(i + 1).ok_or_else(|| truncated(method, pc))?;
                i += 1;
                let value = pool.int(index).ok_or_else(|| BackendError::Internal {
                    method: method.to_string(),
                    message: format!("bad constant pool index {index} at pc {pc}"),
                })?;
                tuples.push(Tuple::new(pc, opcode, TupleKind::IConst { value }));
            }
            ILOAD | ISTORE => {
                let index = *code.get(i + 1).ok_or_else(|| truncated(method, pc))?;
                i += 1;
                tuples.push(Tuple::new(pc, opcode, TupleKind::LoadStore { index }));
            }
            GOTO | IFEQ | IFNE | IF_ICMPEQ | IF_ICMPGE | IF_ICMPGT | IF_ICMPLE | IF_ICMPLT
            | IF_ICMPNE => {
                let hi = *code.get(i + 1).ok_or_else(|| truncated(method, pc))?;
                let lo = *code.get(i + 2).ok_or_else(|| truncated(method, pc))?;
                i += 2;
                let offset = i16::from_be_bytes([hi, lo]) as isize;
                let target = (pc as isize + offset) as usize;
                tuples.push(Tuple::new(pc, opcode, TupleKind::Branch { target }));
            }
            INVOKESTATIC => {
                let hi = *code.get(i + 1).ok_or_else(|| truncated(method, pc))?;
                let lo = *code.get(i + 2).ok_or_else(|| truncated(method, pc))?;
                i += 2;
                let index = u16::from_be_bytes([hi, lo]);
                let mref = pool.method_ref(index).ok_or_else(|| BackendError::Internal {
                    method: method.to_string(),
                    message: format!("bad method ref index {index} at pc {pc}"),
                })?;
                // Booleans are implicitly integers (1 for true, 0 for false).
                let desc = mref.desc.replace('Z', "I");
                tuples.push(Tuple::new(
                    pc,
                    opcode,
                    TupleKind::Call {
                        name: mref.name.clone(),
                        desc,
                    },
                ));
            }
            other => {
                return Err(BackendError::Internal {
                    method: method.to_string(),
                    message: format!("unexpected opcode {other} at pc {pc}"),
                })
            }
        }
        i += 1;
    }
    Ok(tuples)
}

fn truncated(method: &str, pc: usize) -> BackendError {
    BackendError::Internal {
        method: method.to_string(),
        message: format!("truncated instruction at pc {pc}"),
    }
}
