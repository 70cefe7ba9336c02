//! The naive circular allocator: assigns temporaries to virtual registers
//! in first-come order and, once all twelve are taken, evicts the oldest
//! allocation round-robin, spilling both the evicted register and the new
//! one to stack slots.

use super::{rotate_aliased_reads, RegisterAllocator};
use crate::backend::cfg::Cfg;
use crate::backend::regs::{reg_name, FIRST_VIRTUAL, MAX_TEMPS};
use log::debug;
use std::collections::VecDeque;

pub struct NaiveAllocator;

impl RegisterAllocator for NaiveAllocator {
    fn run(&mut self, cfg: &mut Cfg) {
        let mut next_temp: u32 = 0;
        let mut spill_offset: i32 = 0;
        // Already-allocated virtual registers, oldest first.
        let mut allocated: VecDeque<u32> = VecDeque::new();

        for bid in cfg.block_ids() {
            for i in 0..cfg.blocks[bid].lir.len() {
                let write = cfg.blocks[bid].lir[i]
                    .write
                    .filter(|&w| w >= FIRST_VIRTUAL);
                if let Some(w) = write {
                    let unassigned = cfg.registers[w as usize]
                        .as_virtual()
                        .is_some_and(|v| v.preg.is_none());
                    if unassigned {
                        let preg = if next_temp < MAX_TEMPS {
                            let p = next_temp;
                            next_temp += 1;
                            p
                        } else {
                            // Evict the oldest allocation and share its
                            // temporary; both values live in spill slots now.
                            let victim = allocated
                                .pop_front()
                                .expect("no allocations to evict");
                            let victim_reg = cfg.registers[victim as usize]
                                .as_virtual_mut()
                                .expect("victim is not virtual");
                            if !victim_reg.spill {
                                victim_reg.spill = true;
                                victim_reg.offset = spill_offset;
                                spill_offset += 1;
                            }
                            let p = victim_reg.preg.expect("victim was never assigned");
                            let vreg = cfg.registers[w as usize]
                                .as_virtual_mut()
                                .expect("write is not virtual");
                            vreg.spill = true;
                            vreg.offset = spill_offset;
                            spill_offset += 1;
                            debug!("evicting v{victim}; v{w} shares {}", reg_name(p));
                            p
                        };
                        if let Some(v) = cfg.registers[w as usize].as_virtual_mut() {
                            v.preg = Some(preg);
                        }
                        if !cfg.p_registers.contains(&preg) {
                            cfg.p_registers.push(preg);
                        }
                        allocated.push_back(w);
                    }
                }

                rotate_aliased_reads(cfg, bid, i);
            }
        }
    }
}
