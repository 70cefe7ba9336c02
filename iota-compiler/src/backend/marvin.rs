//! Marvin machine instructions and their textual form.
//!
//! Every instruction carries the global program counter assigned during
//! linking. The output format is one line per instruction: PC, mnemonic, up
//! to three operands, and a trailing `#` comment describing the semantics.

use super::cfg::BlockId;
use super::hir::{AluOp, CondOp};
use super::regs::reg_name;
use std::io::{self, Write};

#[derive(Debug, Clone)]
pub enum MarvinKind {
    /// `add/sub/mul/div/mod rX, rY, rZ`
    Arithmetic { op: AluOp, rx: u32, ry: u32, rz: u32 },
    /// `calln rX, N` — call the method at address `N`, linking through `rX`.
    Call {
        name: String,
        desc: String,
        rx: u32,
        target: Option<usize>,
    },
    /// `copy rX, rY`
    Copy { rx: u32, ry: u32 },
    /// `setn/set0/set1 rX[, N]`
    Const { rx: u32, n: i32 },
    /// `addn rX, N`
    Inc { rx: u32, n: i32 },
    /// `jumpr rX` — register-indirect jump (method return).
    JumpReg { rx: u32 },
    /// `jumpn N` — absolute jump; the target block (or the method exit when
    /// `return_from_method`) is patched to a PC during linking.
    JumpAbs {
        on_true: Option<BlockId>,
        return_from_method: bool,
        target: Option<usize>,
    },
    /// `jeqn/jgen/jgtn/jlen/jltn/jnen rX, rY, N`
    JumpCond {
        op: CondOp,
        rx: u32,
        ry: u32,
        on_true: BlockId,
        target: Option<usize>,
    },
    /// `loadn rX, rY, N`
    Load { rx: u32, ry: u32, n: i32 },
    /// `popr rX, rY`
    Pop { rx: u32, ry: u32 },
    /// `pushr rX, rY`
    Push { rx: u32, ry: u32 },
    /// `storen rX, rY, N`
    Store { rx: u32, ry: u32, n: i32 },
    /// `read rX`
    Read { rx: u32 },
    /// `write rX`
    Write { rx: u32 },
    /// `halt`
    Halt,
}

#[derive(Debug, Clone)]
pub struct MarvinInstruction {
    pub pc: usize,
    pub kind: MarvinKind,
}

impl MarvinInstruction {
    pub fn new(kind: MarvinKind) -> Self {
        Self { pc: 0, kind }
    }

    pub fn mnemonic(&self) -> &'static str {
        match &self.kind {
            MarvinKind::Arithmetic { op, .. } => op.mnemonic(),
            MarvinKind::Call { .. } => "calln",
            MarvinKind::Copy { .. } => "copy",
            MarvinKind::Const { n, .. } => match n {
                0 => "set0",
                1 => "set1",
                _ => "setn",
            },
            MarvinKind::Inc { .. } => "addn",
            MarvinKind::JumpReg { .. } => "jumpr",
            MarvinKind::JumpAbs { .. } => "jumpn",
            MarvinKind::JumpCond { op, .. } => op.marvin_mnemonic(),
            MarvinKind::Load { .. } => "loadn",
            MarvinKind::Pop { .. } => "popr",
            MarvinKind::Push { .. } => "pushr",
            MarvinKind::Store { .. } => "storen",
            MarvinKind::Read { .. } => "read",
            MarvinKind::Write { .. } => "write",
            MarvinKind::Halt => "halt",
        }
    }

    /// Writes the instruction as one output line.
    pub fn write<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let m = self.mnemonic();
        match &self.kind {
            MarvinKind::Arithmetic { op, rx, ry, rz } => {
                let (rx, ry, rz) = (reg_name(*rx), reg_name(*ry), reg_name(*rz));
                let comment = format!("{rx} = {ry} {} {rz}", op.symbol());
                write_line(out, self.pc, m, &rx, &ry, &rz, &comment)
            }
            MarvinKind::Call { rx, target, .. } => {
                let n = target_str(*target);
                let comment = format!("call method @{n}");
                write_line(out, self.pc, m, &reg_name(*rx), &n, "", &comment)
            }
            MarvinKind::Copy { rx, ry } => {
                let (rx, ry) = (reg_name(*rx), reg_name(*ry));
                let comment = format!("{rx} = {ry}");
                write_line(out, self.pc, m, &rx, &ry, "", &comment)
            }
            MarvinKind::Const { rx, n } => {
                let rx = reg_name(*rx);
                let comment = format!("{rx} = {n}");
                if *n == 0 || *n == 1 {
                    write_line(out, self.pc, m, &rx, "", "", &comment)
                } else {
                    write_line(out, self.pc, m, &rx, &n.to_string(), "", &comment)
                }
            }
            MarvinKind::Inc { rx, n } => {
                let rx = reg_name(*rx);
                let comment = format!("{rx} += {n}");
                write_line(out, self.pc, m, &rx, &n.to_string(), "", &comment)
            }
            MarvinKind::JumpReg { rx } => {
                let rx = reg_name(*rx);
                let comment = format!("jump to {rx}");
                write_line(out, self.pc, m, &rx, "", "", &comment)
            }
            MarvinKind::JumpAbs { target, .. } => {
                let n = target_str(*target);
                let comment = format!("jump to {n}");
                write_line(out, self.pc, m, &n, "", "", &comment)
            }
            MarvinKind::JumpCond {
                op, rx, ry, target, ..
            } => {
                let (rx, ry) = (reg_name(*rx), reg_name(*ry));
                let n = target_str(*target);
                let comment = format!("if {rx} {} {ry} jump to {n}", op.symbol());
                write_line(out, self.pc, m, &rx, &ry, &n, &comment)
            }
            MarvinKind::Load { rx, ry, n } => {
                let (rx, ry) = (reg_name(*rx), reg_name(*ry));
                let comment = format!("{rx} = mem[{ry} + {n}]");
                write_line(out, self.pc, m, &rx, &ry, &n.to_string(), &comment)
            }
            MarvinKind::Pop { rx, ry } => {
                let (rx, ry) = (reg_name(*rx), reg_name(*ry));
                let comment = format!("{rx} = mem[--{ry}]");
                write_line(out, self.pc, m, &rx, &ry, "", &comment)
            }
            MarvinKind::Push { rx, ry } => {
                let (rx, ry) = (reg_name(*rx), reg_name(*ry));
                let comment = format!("mem[{ry}++] = {rx}");
                write_line(out, self.pc, m, &rx, &ry, "", &comment)
            }
            MarvinKind::Store { rx, ry, n } => {
                let (rx, ry) = (reg_name(*rx), reg_name(*ry));
                let comment = format!("mem[{ry} + {n}] = {rx}");
                write_line(out, self.pc, m, &rx, &ry, &n.to_string(), &comment)
            }
            MarvinKind::Read { rx } => {
                let rx = reg_name(*rx);
                let comment = format!("{rx} = read()");
                write_line(out, self.pc, m, &rx, "", "", &comment)
            }
            MarvinKind::Write { rx } => {
                let rx = reg_name(*rx);
                let comment = format!("write({rx})");
                write_line(out, self.pc, m, &rx, "", "", &comment)
            }
            MarvinKind::Halt => write_line(out, self.pc, m, "", "", "", "halt the machine"),
        }
    }
}

fn target_str(target: Option<usize>) -> String {
    match target {
        Some(pc) => pc.to_string(),
        None => "-1".to_string(),
    }
}

/// One fixed-width output line: PC, mnemonic, three operand columns, comment.
pub fn write_line<W: Write>(
    out: &mut W,
    pc: usize,
    mnemonic: &str,
    a: &str,
    b: &str,
    c: &str,
    comment: &str,
) -> io::Result<()> {
    writeln!(out, "{pc:<6}{mnemonic:<8}{a:<8}{b:<8}{c:<8}# {comment}")
}
