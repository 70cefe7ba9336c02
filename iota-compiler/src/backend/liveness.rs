//! Liveness analysis over LIR: per-block use/def sets, global in/out sets
//! by backward iteration to a fixed point, and per-register live intervals
//! keyed by the stride-5 LIR ids.

use super::cfg::{Cfg, RegSet};
use std::collections::HashMap;
use std::fmt;

/// How an instruction touches a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UseKind {
    Read,
    Write,
}

/// A `[start, stop]` range of LIR ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: i32,
    pub stop: i32,
}

impl Range {
    pub fn intersects(&self, other: &Range) -> bool {
        !(self.stop < other.start || other.stop < self.start)
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.start, self.stop)
    }
}

/// The live interval of one register: an ordered list of ranges plus the
/// instruction ids that read or write it.
#[derive(Debug, Clone)]
pub struct Interval {
    pub reg: u32,
    pub ranges: Vec<Range>,
    pub use_positions: HashMap<i32, UseKind>,
}

impl Interval {
    pub fn new(reg: u32) -> Self {
        Self {
            reg,
            ranges: Vec::new(),
            use_positions: HashMap::new(),
        }
    }

    /// Shortens the first range to start at `new_start` (used when the
    /// defining instruction is found during the backward scan).
    pub fn first_range_from(&mut self, new_start: i32) {
        if let Some(first) = self.ranges.first_mut() {
            first.start = new_start;
        }
    }

    /// Adds a range at the front. A range adjacent to the current first
    /// range under stride-5 numbering, or intersecting it, extends that
    /// range downward instead of creating a new one.
    pub fn add_range(&mut self, range: Range) {
        match self.ranges.first_mut() {
            Some(first) if range.stop + 5 == first.start || range.intersects(first) => {
                first.start = range.start;
            }
            Some(_) => self.ranges.insert(0, range),
            None => self.ranges.push(range),
        }
    }

    pub fn add_use_position(&mut self, lir_id: i32, kind: UseKind) {
        self.use_positions.insert(lir_id, kind);
    }

    pub fn intersects(&self, other: &Interval) -> bool {
        self.ranges
            .iter()
            .any(|a| other.ranges.iter().any(|b| a.intersects(b)))
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = |pos: i32| match self.use_positions.get(&pos) {
            Some(UseKind::Read) => "R",
            Some(UseKind::Write) => "W",
            None => "-",
        };
        for (i, range) in self.ranges.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(
                f,
                "[{} {range} {}]",
                mark(range.start),
                mark(range.stop)
            )?;
        }
        Ok(())
    }
}

impl Cfg {
    /// Local sets: a register read before any write in the block is
    /// live-use; every written register is live-def.
    fn compute_local_liveness_sets(&mut self) {
        for bid in self.block_ids() {
            let block = &mut self.blocks[bid];
            block.live_use = RegSet::new();
            block.live_def = RegSet::new();
            for ins in &block.lir {
                for &read in &ins.reads {
                    if !block.live_def.contains(&read) {
                        block.live_use.insert(read);
                    }
                }
                if let Some(write) = ins.write {
                    block.live_def.insert(write);
                }
            }
        }
    }

    /// Global sets by backward iteration until nothing changes.
    fn compute_global_liveness_sets(&mut self) {
        let ids = self.block_ids();
        for &bid in &ids {
            self.blocks[bid].live_in = RegSet::new();
            self.blocks[bid].live_out = RegSet::new();
        }
        let mut changed = true;
        while changed {
            changed = false;
            for &bid in ids.iter().rev() {
                let mut new_out = RegSet::new();
                for &succ in &self.blocks[bid].successors {
                    new_out.extend(self.blocks[succ].live_in.iter().copied());
                }
                if self.blocks[bid].live_out != new_out {
                    self.blocks[bid].live_out = new_out;
                    changed = true;
                }
                let block = &mut self.blocks[bid];
                let mut new_in: RegSet = block
                    .live_out
                    .difference(&block.live_def)
                    .copied()
                    .collect();
                new_in.extend(block.live_use.iter().copied());
                block.live_in = new_in;
            }
        }
    }

    /// Builds the per-register intervals from the liveness sets, walking
    /// blocks and instructions backward.
    pub fn compute_liveness_intervals(&mut self) {
        self.compute_local_liveness_sets();
        self.compute_global_liveness_sets();
        self.intervals = (0..self.registers.len() as u32).map(Interval::new).collect();
        for bid in self.block_ids().into_iter().rev() {
            let block = &self.blocks[bid];
            if block.lir.is_empty() {
                continue;
            }
            let b_start = block.lir[0].id;
            let b_end = block.lir[block.lir.len() - 1].id;
            for &reg in &block.live_out {
                self.intervals[reg as usize].add_range(Range {
                    start: b_start,
                    stop: b_end,
                });
            }
            for ins in block.lir.iter().rev() {
                if let Some(write) = ins.write {
                    let interval = &mut self.intervals[write as usize];
                    interval.first_range_from(ins.id);
                    interval.add_use_position(ins.id, UseKind::Write);
                }
                for &read in &ins.reads {
                    let interval = &mut self.intervals[read as usize];
                    interval.add_range(Range {
                        start: b_start,
                        stop: ins.id,
                    });
                    interval.add_use_position(ins.id, UseKind::Read);
                }
            }
        }
    }
}
