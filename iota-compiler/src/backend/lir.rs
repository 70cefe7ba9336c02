//! Low-level intermediate representation: register-transfer instructions
//! over an unbounded virtual register file, nearly isomorphic to Marvin.
//! Register operands are register numbers; 0..15 are the physical slots and
//! 16 upward are virtuals.

use super::cfg::BlockId;
use super::hir::{AluOp, CondOp};
use super::regs::reg_name;
use smallvec::SmallVec;
use std::fmt;

pub type LirId = i32;

/// Register read list; no LIR instruction reads more than two registers.
pub type Reads = SmallVec<[u32; 2]>;

#[derive(Debug, Clone)]
pub enum LirKind {
    /// `set` — load a constant.
    IConst(i32),
    Arithmetic(AluOp),
    Copy,
    /// `inc` — add a constant to a register in place.
    Inc(i32),
    Jump {
        cond: Option<CondOp>,
        on_true: Option<BlockId>,
        on_false: Option<BlockId>,
        return_from_method: bool,
    },
    /// `load` — read memory at base + offset.
    Load { offset: i32 },
    /// `store` — write memory at base + offset.
    Store { offset: i32 },
    /// `push` — store through SP, post-incrementing it.
    Push,
    Call { name: String, desc: String },
    /// Placeholder that owns a φ-function's result register; never inserted
    /// into a block's instruction list.
    Phi,
    Read,
    Write,
}

#[derive(Debug, Clone)]
pub struct LirInstruction {
    pub id: LirId,
    pub kind: LirKind,
    pub reads: Reads,
    pub write: Option<u32>,
}

impl LirInstruction {
    pub fn mnemonic(&self) -> &'static str {
        match &self.kind {
            LirKind::IConst(_) => "set",
            LirKind::Arithmetic(op) => op.mnemonic(),
            LirKind::Copy => "copy",
            LirKind::Inc(_) => "inc",
            LirKind::Jump {
                cond: Some(op), ..
            } => op.lir_mnemonic(),
            LirKind::Jump {
                return_from_method: true,
                ..
            } => "return",
            LirKind::Jump { .. } => "jump",
            LirKind::Load { .. } => "load",
            LirKind::Store { .. } => "store",
            LirKind::Push => "push",
            LirKind::Call { .. } => "call",
            LirKind::Phi => "phi",
            LirKind::Read => "read",
            LirKind::Write => "write",
        }
    }
}

impl fmt::Display for LirInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = self.id;
        let m = self.mnemonic();
        let reg = |i: usize| reg_name(self.reads[i]);
        match &self.kind {
            LirKind::IConst(n) => {
                write!(f, "{id}: {m} {} {n}", reg_name(self.write.unwrap_or(0)))
            }
            LirKind::Arithmetic(_) => write!(
                f,
                "{id}: {m} {} {} {}",
                reg_name(self.write.unwrap_or(0)),
                reg(0),
                reg(1)
            ),
            LirKind::Copy => {
                write!(f, "{id}: {m} {} {}", reg_name(self.write.unwrap_or(0)), reg(0))
            }
            LirKind::Inc(n) => {
                write!(f, "{id}: {m} {} {n}", reg_name(self.write.unwrap_or(0)))
            }
            LirKind::Jump {
                cond,
                on_true,
                on_false,
                return_from_method,
            } => {
                if *return_from_method {
                    write!(f, "{id}: {m}")
                } else if cond.is_none() {
                    write!(f, "{id}: {m} B{}", on_true.unwrap_or(0))
                } else {
                    write!(
                        f,
                        "{id}: {m} {} {} B{} B{}",
                        reg(0),
                        reg(1),
                        on_true.unwrap_or(0),
                        on_false.unwrap_or(0)
                    )
                }
            }
            LirKind::Load { offset } => write!(
                f,
                "{id}: {m} {} {} {offset}",
                reg_name(self.write.unwrap_or(0)),
                reg(0)
            ),
            LirKind::Store { offset } => {
                write!(f, "{id}: {m} {} {} {offset}", reg(0), reg(1))
            }
            LirKind::Push => write!(f, "{id}: {m} {} {}", reg(0), reg(1)),
            LirKind::Call { name, desc } => {
                if let Some(w) = self.write {
                    write!(f, "{id}: {} {m} {name}{desc}", reg_name(w))
                } else {
                    write!(f, "{id}: {m} {name}{desc}")
                }
            }
            LirKind::Phi => write!(f, "{id}: {m}"),
            LirKind::Read => {
                write!(f, "{id}: {m} {}", reg_name(self.write.unwrap_or(0)))
            }
            LirKind::Write => write!(f, "{id}: {m} {}", reg(0)),
        }
    }
}
