//! Register allocation: mapping virtual registers onto the twelve Marvin
//! temporaries, with SP-relative spill slots when they run out.
//!
//! Two implementations share one contract: after `run`, every virtual
//! register used by the method's LIR has a physical register, and spilled
//! registers carry a slot offset. Spill stores and reloads are then
//! materialized into the stride-5 id gaps by `insert_spill_code`.

mod graph;
mod naive;

pub use graph::GraphAllocator;
pub use naive::NaiveAllocator;

use super::cfg::{BlockId, Cfg};
use super::lir::{LirInstruction, LirKind};
use super::regs::{FIRST_VIRTUAL, MAX_TEMPS, SP};
use smallvec::smallvec;

/// Which register allocator to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocatorKind {
    Naive,
    Graph,
}

/// Abstract allocation interface; the backend driver interacts with
/// allocators exclusively through this trait.
pub trait RegisterAllocator {
    fn run(&mut self, cfg: &mut Cfg);
}

/// Computes liveness, runs the chosen allocator, and materializes spills.
pub fn allocate(kind: AllocatorKind, cfg: &mut Cfg) {
    cfg.compute_liveness_intervals();
    let mut allocator: Box<dyn RegisterAllocator> = match kind {
        AllocatorKind::Naive => Box::new(NaiveAllocator),
        AllocatorKind::Graph => Box::new(GraphAllocator),
    };
    allocator.run(cfg);
    insert_spill_code(cfg);
}

/// Marvin arithmetic needs distinct operand slots: when one instruction
/// reads two different virtual registers that ended up in the same
/// temporary, rotate the second one onto the next temporary.
pub(crate) fn rotate_aliased_reads(cfg: &mut Cfg, bid: BlockId, index: usize) {
    let reads = &cfg.blocks[bid].lir[index].reads;
    if reads.len() != 2 {
        return;
    }
    let (a, b) = (reads[0], reads[1]);
    if a < FIRST_VIRTUAL || b < FIRST_VIRTUAL || a == b {
        return;
    }
    let preg_of = |cfg: &Cfg, r: u32| cfg.registers[r as usize].as_virtual().and_then(|v| v.preg);
    if let (Some(pa), Some(pb)) = (preg_of(cfg, a), preg_of(cfg, b)) {
        if pa == pb {
            let rotated = (pb + 1) % MAX_TEMPS;
            if let Some(v) = cfg.registers[b as usize].as_virtual_mut() {
                v.preg = Some(rotated);
            }
            if !cfg.p_registers.contains(&rotated) {
                cfg.p_registers.push(rotated);
            }
        }
    }
}

/// Inserts a store after every instruction that writes a spilled register
/// and a reload before every instruction that reads one. The stride-5 id
/// space guarantees the inserted ids stay ordered within the gaps.
fn insert_spill_code(cfg: &mut Cfg) {
    for bid in cfg.block_ids() {
        let old = std::mem::take(&mut cfg.blocks[bid].lir);
        let mut out: Vec<LirInstruction> = Vec::with_capacity(old.len());
        for ins in old {
            let num_reads = ins.reads.len();
            for (i, &read) in ins.reads.iter().enumerate() {
                if read < FIRST_VIRTUAL {
                    continue;
                }
                if let Some(v) = cfg.registers[read as usize].as_virtual() {
                    if v.spill {
                        let preg = v.preg.expect("spilled register without physical home");
                        out.push(LirInstruction {
                            id: ins.id - (num_reads - i) as i32,
                            kind: LirKind::Load { offset: v.offset },
                            reads: smallvec![SP],
                            write: Some(preg),
                        });
                    }
                }
            }
            let store = ins.write.filter(|&w| w >= FIRST_VIRTUAL).and_then(|w| {
                cfg.registers[w as usize].as_virtual().and_then(|v| {
                    v.spill.then(|| LirInstruction {
                        id: ins.id + 1,
                        kind: LirKind::Store { offset: v.offset },
                        reads: smallvec![
                            v.preg.expect("spilled register without physical home"),
                            SP
                        ],
                        write: None,
                    })
                })
            });
            out.push(ins);
            if let Some(store) = store {
                out.push(store);
            }
        }
        cfg.blocks[bid].lir = out;
    }
}
