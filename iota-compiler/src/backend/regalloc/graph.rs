//! Graph-coloring allocator. Interference is intersection of liveness
//! intervals; coloring is Chaitin-style simplify/select over the twelve
//! temporaries. Uncolorable nodes receive a spill slot and keep a physical
//! home for the reloads materialized afterwards.

use super::{rotate_aliased_reads, RegisterAllocator};
use crate::backend::cfg::Cfg;
use crate::backend::regs::{FIRST_VIRTUAL, MAX_TEMPS};
use log::debug;
use std::collections::{BTreeSet, HashMap, HashSet};

pub struct GraphAllocator;

impl RegisterAllocator for GraphAllocator {
    fn run(&mut self, cfg: &mut Cfg) {
        let vregs: Vec<u32> = (FIRST_VIRTUAL..cfg.registers.len() as u32).collect();

        // Interference graph: an edge wherever two intervals intersect.
        let mut adjacency: HashMap<u32, HashSet<u32>> =
            vregs.iter().map(|&v| (v, HashSet::new())).collect();
        for (i, &a) in vregs.iter().enumerate() {
            for &b in &vregs[i + 1..] {
                if cfg.intervals[a as usize].intersects(&cfg.intervals[b as usize]) {
                    adjacency.get_mut(&a).unwrap().insert(b);
                    adjacency.get_mut(&b).unwrap().insert(a);
                }
            }
        }

        // Simplify: repeatedly remove low-degree nodes; when none exists,
        // remove the highest-degree node as a spill candidate.
        let mut degrees: HashMap<u32, usize> =
            adjacency.iter().map(|(&v, n)| (v, n.len())).collect();
        let mut remaining: BTreeSet<u32> = vregs.iter().copied().collect();
        let mut stack: Vec<u32> = Vec::with_capacity(vregs.len());
        while !remaining.is_empty() {
            let pick = remaining
                .iter()
                .copied()
                .find(|v| degrees[v] < MAX_TEMPS as usize)
                .or_else(|| remaining.iter().copied().max_by_key(|v| degrees[v]))
                .unwrap();
            remaining.remove(&pick);
            for &n in &adjacency[&pick] {
                if remaining.contains(&n) {
                    *degrees.get_mut(&n).unwrap() -= 1;
                }
            }
            stack.push(pick);
        }

        // Select: pop and color; a node whose neighbors exhaust every
        // temporary is spilled but still gets a scratch register for its
        // reloads.
        let mut spill_offset: i32 = 0;
        while let Some(v) = stack.pop() {
            let mut used = HashSet::new();
            let mut used_unspilled = HashSet::new();
            for &n in &adjacency[&v] {
                if let Some(nv) = cfg.registers[n as usize].as_virtual() {
                    if let Some(p) = nv.preg {
                        used.insert(p);
                        if !nv.spill {
                            used_unspilled.insert(p);
                        }
                    }
                }
            }
            let preg = match (0..MAX_TEMPS).find(|c| !used.contains(c)) {
                Some(color) => color,
                None => {
                    let fallback = (0..MAX_TEMPS)
                        .find(|c| !used_unspilled.contains(c))
                        .unwrap_or(v % MAX_TEMPS);
                    let vreg = cfg.registers[v as usize].as_virtual_mut().unwrap();
                    vreg.spill = true;
                    vreg.offset = spill_offset;
                    spill_offset += 1;
                    debug!("spilling v{v} to slot {}", spill_offset - 1);
                    fallback
                }
            };
            if let Some(vreg) = cfg.registers[v as usize].as_virtual_mut() {
                vreg.preg = Some(preg);
            }
            if !cfg.p_registers.contains(&preg) {
                cfg.p_registers.push(preg);
            }
        }

        for bid in cfg.block_ids() {
            for i in 0..cfg.blocks[bid].lir.len() {
                rotate_aliased_reads(cfg, bid, i);
            }
        }
    }
}
