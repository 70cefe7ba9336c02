//! Per-method control-flow graph and the passes that carry a method from
//! tuples to linked Marvin code.
//!
//! The pipeline attaches new artifacts to the graph stage by stage: tuples
//! are partitioned into basic blocks, converted to SSA HIR, lowered to LIR
//! over virtual registers, and finally selected into Marvin instructions.
//! Identifier counters (`hir`, `lir`, virtual registers) are per-method and
//! reset when the graph is built.

use super::hir::{AluOp, CondOp, HirId, HirInstruction, HirKind, ValueType};
use super::lir::{LirId, LirInstruction, LirKind};
use super::marvin::{MarvinInstruction, MarvinKind};
use super::regs::{reg_name, Register, VirtualRegister, FIRST_VIRTUAL, RA, RV, SP};
use super::tuple::{self, Tuple, TupleKind};
use super::BackendError;
use crate::classfile::{self, opcodes::*, ConstantPool, MethodInfo};
use log::debug;
use smallvec::smallvec;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Write as _;
use std::io::{self, Write as _};

pub type BlockId = usize;

/// Register set used by the liveness analysis, indexed by register number.
pub type RegSet = HashSet<u32>;

/// A maximal straight-line tuple sequence with a single entry and exit.
#[derive(Debug)]
pub struct BasicBlock {
    pub id: BlockId,
    /// Cleared when reachability pruning removes the block.
    pub alive: bool,
    pub tuples: Vec<Tuple>,
    pub predecessors: Vec<BlockId>,
    pub successors: Vec<BlockId>,
    pub is_loop_head: bool,
    pub is_loop_tail: bool,
    pub is_visited: bool,
    pub is_active: bool,
    /// State vector: which HIR value holds each local on exit from the block.
    pub locals: Vec<Option<HirId>>,
    pub hir: Vec<HirId>,
    pub lir: Vec<LirInstruction>,
    pub marvin: Vec<MarvinInstruction>,
    pub live_use: RegSet,
    pub live_def: RegSet,
    pub live_in: RegSet,
    pub live_out: RegSet,
}

impl BasicBlock {
    fn new(id: BlockId) -> Self {
        Self {
            id,
            alive: true,
            tuples: Vec::new(),
            predecessors: Vec::new(),
            successors: Vec::new(),
            is_loop_head: false,
            is_loop_tail: false,
            is_visited: false,
            is_active: false,
            locals: Vec::new(),
            hir: Vec::new(),
            lir: Vec::new(),
            marvin: Vec::new(),
            live_use: RegSet::new(),
            live_def: RegSet::new(),
            live_in: RegSet::new(),
            live_out: RegSet::new(),
        }
    }

    pub fn label(&self) -> String {
        format!("B{}", self.id)
    }
}

/// The record kept for a lowered HIR value: the id of the last LIR
/// instruction it produced and the register holding its result.
#[derive(Debug, Clone, Copy)]
pub struct LirLink {
    pub id: LirId,
    pub write: Option<u32>,
}

#[derive(Debug)]
pub struct Cfg {
    pub name: String,
    pub desc: String,
    pub blocks: Vec<BasicBlock>,
    pub num_locals: usize,
    /// Maps a leader tuple's PC to its basic block.
    pc_to_block: HashMap<usize, BlockId>,
    next_hir_id: HirId,
    next_lir_id: LirId,
    next_reg: u32,
    /// HIR instructions by id.
    pub hir_map: HashMap<HirId, HirInstruction>,
    /// φ-cleanup indirection: looking up a removed φ resolves here first.
    redirects: HashMap<HirId, HirId>,
    /// Back-links from HIR ids to the LIR they lowered to.
    lir_links: HashMap<HirId, LirLink>,
    /// The register file: indices 0..15 are the physical slots, 16 and up
    /// are virtual registers.
    pub registers: Vec<Register>,
    /// Physical registers the method uses, in assignment order; the
    /// prologue saves exactly these.
    pub p_registers: Vec<u32>,
    /// Per-register liveness intervals, filled before allocation.
    pub intervals: Vec<super::liveness::Interval>,
}

impl Cfg {
    /// Builds the control-flow graph for one method: decodes tuples,
    /// identifies leaders, partitions blocks, and wires the edges.
    pub fn build(pool: &ConstantPool, method: &MethodInfo) -> Result<Self, BackendError> {
        // Booleans are implicitly integers.
        let desc = method.descriptor.replace('Z', "I");
        let mut cfg = Cfg {
            name: method.name.clone(),
            desc,
            blocks: Vec::new(),
            num_locals: method.max_locals,
            pc_to_block: HashMap::new(),
            next_hir_id: 0,
            next_lir_id: 0,
            next_reg: FIRST_VIRTUAL,
            hir_map: HashMap::new(),
            redirects: HashMap::new(),
            lir_links: HashMap::new(),
            registers: Vec::new(),
            p_registers: Vec::new(),
            intervals: Vec::new(),
        };

        let mut tuples = tuple::decode(&method.code, pool, &method.name)?;
        if tuples.is_empty() {
            return Err(cfg.internal("method has no bytecode"));
        }
        cfg.find_leaders(&mut tuples)?;
        cfg.build_blocks(tuples);
        cfg.build_edges()?;
        debug!(
            "{}{}: {} basic blocks",
            cfg.name,
            cfg.desc,
            cfg.blocks.len()
        );
        Ok(cfg)
    }

    fn find_leaders(&self, tuples: &mut [Tuple]) -> Result<(), BackendError> {
        let pc_to_index: HashMap<usize, usize> =
            tuples.iter().enumerate().map(|(i, t)| (t.pc, i)).collect();
        let mut leaders: Vec<usize> = vec![0];
        for (i, t) in tuples.iter().enumerate() {
            if let Some(target) = t.branch_target() {
                let target_index = *pc_to_index
                    .get(&target)
                    .ok_or_else(|| self.internal(format!("branch to pc {target} has no tuple")))?;
                leaders.push(target_index);
                if i < tuples.len() - 1 {
                    leaders.push(i + 1);
                }
            }
        }
        for index in leaders {
            tuples[index].is_leader = true;
        }
        Ok(())
    }

    /// Partitions tuples into blocks. Block 0 is a synthetic empty entry.
    fn build_blocks(&mut self, tuples: Vec<Tuple>) {
        let mut block = BasicBlock::new(0);
        for tuple in tuples {
            if tuple.is_leader {
                let next_id = block.id + 1;
                self.blocks.push(block);
                block = BasicBlock::new(next_id);
            }
            block.tuples.push(tuple);
        }
        self.blocks.push(block);
        for b in &self.blocks {
            if let Some(first) = b.tuples.first() {
                self.pc_to_block.insert(first.pc, b.id);
            }
        }
    }

    fn build_edges(&mut self) -> Result<(), BackendError> {
        self.blocks[0].successors.push(1);
        self.blocks[1].predecessors.push(0);
        for i in 0..self.blocks.len() {
            let Some(last) = self.blocks[i].tuples.last().cloned() else {
                continue;
            };
            match last.kind {
                TupleKind::Branch { target } => {
                    if last.opcode != GOTO && i < self.blocks.len() - 1 {
                        // Fall-through edge first; φ operands index this order.
                        self.add_edge(i, i + 1);
                    }
                    let target_block = self.block_at(target)?;
                    self.add_edge(i, target_block);
                }
                // Returns terminate the block; anything after is dead.
                TupleKind::NoArg if last.opcode == RETURN || last.opcode == IRETURN => {}
                _ => {
                    if i < self.blocks.len() - 1 {
                        self.add_edge(i, i + 1);
                    }
                }
            }
        }
        Ok(())
    }

    fn add_edge(&mut self, from: BlockId, to: BlockId) {
        self.blocks[from].successors.push(to);
        self.blocks[to].predecessors.push(from);
    }

    fn block_at(&self, pc: usize) -> Result<BlockId, BackendError> {
        self.pc_to_block
            .get(&pc)
            .copied()
            .ok_or_else(|| self.internal(format!("no basic block starts at pc {pc}")))
    }

    fn internal(&self, message: impl Into<String>) -> BackendError {
        BackendError::Internal {
            method: format!("{}{}", self.name, self.desc),
            message: message.into(),
        }
    }

    /// Ids of the blocks still in the graph, in layout order.
    pub fn block_ids(&self) -> Vec<BlockId> {
        self.blocks
            .iter()
            .filter(|b| b.alive)
            .map(|b| b.id)
            .collect()
    }

    // ── Loop detection and reachability ─────────────────────────────────

    /// Depth-first search marking loop heads (targets of back edges) and
    /// loop tails (sources of back edges).
    pub fn detect_loops(&mut self, block: BlockId, pred: Option<BlockId>) {
        if !self.blocks[block].is_visited {
            self.blocks[block].is_visited = true;
            self.blocks[block].is_active = true;
            let successors = self.blocks[block].successors.clone();
            for succ in successors {
                self.detect_loops(succ, Some(block));
            }
            self.blocks[block].is_active = false;
        } else if self.blocks[block].is_active {
            self.blocks[block].is_loop_head = true;
            if let Some(pred) = pred {
                self.blocks[pred].is_loop_tail = true;
            }
        }
    }

    /// Drops blocks the loop-detection DFS never reached and strips them
    /// from the remaining predecessor lists.
    pub fn remove_unreachable_blocks(&mut self) {
        let dead: HashSet<BlockId> = self
            .blocks
            .iter()
            .filter(|b| b.alive && !b.is_visited)
            .map(|b| b.id)
            .collect();
        if dead.is_empty() {
            return;
        }
        debug!("{}{}: pruning {} unreachable blocks", self.name, self.desc, dead.len());
        for block in &mut self.blocks {
            if dead.contains(&block.id) {
                block.alive = false;
            } else {
                block.predecessors.retain(|p| !dead.contains(p));
            }
        }
    }

    // ── HIR construction ────────────────────────────────────────────────

    fn emit_hir(&mut self, block: BlockId, ty: ValueType, kind: HirKind) -> HirId {
        let id = self.next_hir_id;
        self.next_hir_id += 1;
        self.hir_map.insert(
            id,
            HirInstruction {
                id,
                block,
                ty,
                kind,
            },
        );
        self.blocks[block].hir.push(id);
        id
    }

    /// Resolves a value id through the φ-cleanup indirection table.
    pub fn resolve(&self, mut id: HirId) -> HirId {
        while let Some(&next) = self.redirects.get(&id) {
            id = next;
        }
        id
    }

    pub fn hir(&self, id: HirId) -> &HirInstruction {
        &self.hir_map[&self.resolve(id)]
    }

    /// Converts tuples to HIR in a breadth-first walk from the entry,
    /// tracking a per-block locals vector and an operand stack that models
    /// the JVM evaluation stack.
    pub fn tuples_to_hir(&mut self) -> Result<(), BackendError> {
        let arg_types = classfile::argument_types(&self.desc);

        // Entry block: materialize each declared parameter.
        let mut locals = vec![None; self.num_locals];
        for (i, slot) in locals.iter_mut().enumerate().take(arg_types.len()) {
            let id = self.emit_hir(0, ValueType::Int, HirKind::LoadParam(i));
            *slot = Some(id);
        }
        self.blocks[0].locals = locals;

        for block in &mut self.blocks {
            block.is_visited = false;
        }

        let mut stack: Vec<HirId> = Vec::new();
        let mut queue: VecDeque<BlockId> = VecDeque::new();
        self.blocks[0].is_visited = true;
        queue.push_back(0);
        while let Some(bid) = queue.pop_front() {
            for succ in self.blocks[bid].successors.clone() {
                if !self.blocks[succ].is_visited {
                    self.blocks[succ].is_visited = true;
                    queue.push_back(succ);
                }
            }

            let preds = self.blocks[bid].predecessors.clone();
            if preds.len() == 1 {
                self.blocks[bid].locals = self.blocks[preds[0]].locals.clone();
            } else if preds.len() > 1 {
                self.merge_locals(bid, &preds);
            }

            // The operand stack is shared across the whole BFS, so a value
            // may only cross a block boundary on its way to a merge. A block
            // joining several predecessors merges the entries its arms left
            // (one per predecessor, in predecessor order) into a φ before its
            // own tuples run, so later consumers pop a path-dependent value.
            // Entries below that slice were pushed before the divergence and
            // stay put. Any other non-empty boundary is a bug in the bytecode
            // shapes and must fail here, not in a later consumer.
            if !stack.is_empty() {
                if preds.len() > 1 {
                    assert!(
                        stack.len() >= preds.len(),
                        "{}{}: {} stacked values entering B{bid} with {} predecessors",
                        self.name,
                        self.desc,
                        stack.len(),
                        preds.len()
                    );
                    let at = stack.len() - preds.len();
                    let args: Vec<Option<HirId>> =
                        stack.split_off(at).into_iter().map(Some).collect();
                    let phi =
                        self.emit_hir(bid, ValueType::Int, HirKind::Phi { args, local: None });
                    stack.push(phi);
                } else {
                    // A lone predecessor may pass values through only while
                    // it is one arm of a diverging branch still feeding the
                    // merge block ahead.
                    let feeding_merge = preds
                        .first()
                        .is_some_and(|&p| self.blocks[p].successors.len() > 1);
                    assert!(
                        feeding_merge,
                        "{}{}: operand stack not empty entering B{bid}",
                        self.name,
                        self.desc
                    );
                }
            }

            for tuple in self.blocks[bid].tuples.clone() {
                self.translate_tuple(bid, &tuple, &mut stack)?;
            }
        }
        assert!(
            stack.is_empty(),
            "{}{}: operand stack not drained after HIR construction",
            self.name,
            self.desc
        );
        Ok(())
    }

    /// Synthesizes one φ-function per local slot from the predecessors'
    /// state vectors. Arguments of not-yet-processed predecessors stay
    /// unresolved until φ-cleanup.
    fn merge_locals(&mut self, bid: BlockId, preds: &[BlockId]) {
        let mut locals = vec![None; self.num_locals];
        for (i, slot) in locals.iter_mut().enumerate() {
            let args: Vec<Option<HirId>> = preds
                .iter()
                .map(|&p| self.blocks[p].locals.get(i).copied().flatten())
                .collect();
            let id = self.emit_hir(
                bid,
                ValueType::Int,
                HirKind::Phi {
                    args,
                    local: Some(i),
                },
            );
            *slot = Some(id);
        }
        self.blocks[bid].locals = locals;
    }

    fn translate_tuple(
        &mut self,
        bid: BlockId,
        tuple: &Tuple,
        stack: &mut Vec<HirId>,
    ) -> Result<(), BackendError> {
        match (&tuple.kind, tuple.opcode) {
            (TupleKind::NoArg, NOP) => {}
            (TupleKind::NoArg, ICONST_0) | (TupleKind::NoArg, ICONST_1) => {
                let value = (tuple.opcode == ICONST_1) as i32;
                let id = self.emit_hir(bid, ValueType::Int, HirKind::IConst(value));
                stack.push(id);
            }
            (TupleKind::IConst { value }, _) => {
                let id = self.emit_hir(bid, ValueType::Int, HirKind::IConst(*value));
                stack.push(id);
            }
            (TupleKind::LoadStore { index }, ILOAD) => {
                let value = self.blocks[bid].locals[*index as usize].ok_or_else(|| {
                    self.internal(format!("load of undefined local {index} at pc {}", tuple.pc))
                })?;
                stack.push(value);
            }
            (TupleKind::LoadStore { index }, _) => {
                let value = self.pop(stack, tuple.pc)?;
                self.blocks[bid].locals[*index as usize] = Some(value);
            }
            (TupleKind::NoArg, DUP) => {
                let top = *stack
                    .last()
                    .ok_or_else(|| self.internal(format!("stack underflow at pc {}", tuple.pc)))?;
                stack.push(top);
            }
            (TupleKind::NoArg, POP) => {
                self.pop(stack, tuple.pc)?;
            }
            (TupleKind::NoArg, INEG) => {
                // Rewrite -x as -1 * x.
                let rhs = self.pop(stack, tuple.pc)?;
                let minus_one = self.emit_hir(bid, ValueType::Int, HirKind::IConst(-1));
                let id = self.emit_hir(
                    bid,
                    ValueType::Int,
                    HirKind::Arithmetic {
                        op: AluOp::Mul,
                        lhs: minus_one,
                        rhs,
                    },
                );
                stack.push(id);
            }
            (TupleKind::NoArg, op) if AluOp::from_opcode(op).is_some() => {
                let rhs = self.pop(stack, tuple.pc)?;
                let lhs = self.pop(stack, tuple.pc)?;
                let id = self.emit_hir(
                    bid,
                    ValueType::Int,
                    HirKind::Arithmetic {
                        op: AluOp::from_opcode(op).unwrap(),
                        lhs,
                        rhs,
                    },
                );
                stack.push(id);
            }
            (TupleKind::Branch { target }, GOTO) => {
                let on_true = self.block_at(*target)?;
                self.emit_hir(
                    bid,
                    ValueType::None,
                    HirKind::Jump {
                        cond: None,
                        on_true,
                        on_false: None,
                    },
                );
            }
            (TupleKind::Branch { target }, IFEQ) | (TupleKind::Branch { target }, IFNE) => {
                // Rewritten as a compare against zero.
                let lhs = self.pop(stack, tuple.pc)?;
                let zero = self.emit_hir(bid, ValueType::Int, HirKind::IConst(0));
                let op = if tuple.opcode == IFEQ {
                    CondOp::Eq
                } else {
                    CondOp::Ne
                };
                let on_true = self.block_at(*target)?;
                let on_false = self.block_at(tuple.pc + 3)?;
                self.emit_hir(
                    bid,
                    ValueType::None,
                    HirKind::Jump {
                        cond: Some((op, lhs, zero)),
                        on_true,
                        on_false: Some(on_false),
                    },
                );
            }
            (TupleKind::Branch { target }, op) => {
                let cond = CondOp::from_opcode(op)
                    .ok_or_else(|| self.internal(format!("unexpected branch opcode {op}")))?;
                let rhs = self.pop(stack, tuple.pc)?;
                let lhs = self.pop(stack, tuple.pc)?;
                let on_true = self.block_at(*target)?;
                let on_false = self.block_at(tuple.pc + 3)?;
                self.emit_hir(
                    bid,
                    ValueType::None,
                    HirKind::Jump {
                        cond: Some((cond, lhs, rhs)),
                        on_true,
                        on_false: Some(on_false),
                    },
                );
            }
            (TupleKind::Call { name, desc }, _) => {
                let num_args = classfile::argument_count(desc);
                let mut args = Vec::with_capacity(num_args);
                for _ in 0..num_args {
                    let arg = self.pop(stack, tuple.pc)?;
                    args.insert(0, arg);
                }
                let return_type = classfile::return_type(desc);
                let is_io = (name == "read" && desc == "()I")
                    || (name == "write" && desc == "(I)V");
                let ty = if return_type == "V" {
                    ValueType::Void
                } else {
                    ValueType::Int
                };
                let id = self.emit_hir(
                    bid,
                    ty,
                    HirKind::Call {
                        name: name.clone(),
                        desc: desc.clone(),
                        args,
                        is_io,
                    },
                );
                if return_type != "V" {
                    stack.push(id);
                }
            }
            (TupleKind::NoArg, RETURN) => {
                self.emit_hir(bid, ValueType::None, HirKind::Return(None));
            }
            (TupleKind::NoArg, IRETURN) => {
                let value = if stack.len() > 1 {
                    // The return value may be any of several stacked values;
                    // a φ over them captures the possibilities.
                    let mut args: Vec<Option<HirId>> = Vec::with_capacity(stack.len());
                    while let Some(v) = stack.pop() {
                        args.insert(0, Some(v));
                    }
                    self.emit_hir(bid, ValueType::Int, HirKind::Phi { args, local: None })
                } else {
                    self.pop(stack, tuple.pc)?
                };
                self.emit_hir(bid, ValueType::Int, HirKind::Return(Some(value)));
            }
            _ => {
                return Err(self.internal(format!(
                    "unexpected opcode {} at pc {}",
                    tuple.opcode, tuple.pc
                )))
            }
        }
        Ok(())
    }

    fn pop(&self, stack: &mut Vec<HirId>, pc: usize) -> Result<HirId, BackendError> {
        stack
            .pop()
            .ok_or_else(|| self.internal(format!("stack underflow at pc {pc}")))
    }

    // ── φ cleanup ───────────────────────────────────────────────────────

    /// Resolves deferred φ arguments from the predecessors' final state
    /// vectors, then removes redundant φs of the form `x = φ(y, x, ..., x)`
    /// by redirecting their id to the surviving value.
    pub fn cleanup_phi_functions(&mut self) {
        let mut ids: Vec<HirId> = self.hir_map.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            if self.redirects.contains_key(&id) {
                continue;
            }
            let ins = &self.hir_map[&id];
            let (block, index) = match &ins.kind {
                HirKind::Phi {
                    local: Some(index), ..
                } => (ins.block, *index),
                // A φ with no bound local needs no cleanup.
                _ => continue,
            };

            // Re-read every argument from the corresponding predecessor's
            // state vector; this fills slots left unresolved by back edges.
            let preds = self.blocks[block].predecessors.clone();
            let args: Vec<Option<HirId>> = preds
                .iter()
                .map(|&p| self.blocks[p].locals.get(index).copied().flatten())
                .collect();
            if let Some(HirInstruction {
                kind: HirKind::Phi { args: slots, .. },
                ..
            }) = self.hir_map.get_mut(&id)
            {
                *slots = args.clone();
            }

            let redundant = if self.blocks[block].is_loop_head {
                // Redundant when the back edge feeds the φ with itself.
                args.get(1).copied().flatten() == Some(id) && args.first().copied().flatten().is_some()
            } else {
                match args.first().copied().flatten() {
                    Some(first) => args
                        .iter()
                        .skip(1)
                        .all(|a| a.map_or(true, |other| other == first)),
                    None => false,
                }
            };

            if redundant {
                let canonical = args[0].unwrap();
                if canonical != id {
                    self.blocks[block].hir.retain(|&h| h != id);
                    self.redirects.insert(id, canonical);
                }
            }
        }
    }

    // ── HIR → LIR lowering ──────────────────────────────────────────────

    fn new_vreg(&mut self) -> u32 {
        let number = self.next_reg;
        self.next_reg += 1;
        self.registers
            .push(Register::Virtual(VirtualRegister::new(number)));
        number
    }

    fn push_lir(
        &mut self,
        block: BlockId,
        kind: LirKind,
        reads: super::lir::Reads,
        write: Option<u32>,
    ) -> LirId {
        let id = self.next_lir_id;
        self.next_lir_id += 1;
        self.blocks[block].lir.push(LirInstruction {
            id,
            kind,
            reads,
            write,
        });
        id
    }

    /// Lowers every block's HIR in order. Each value is lowered once; later
    /// requests return the cached back-link.
    pub fn hir_to_lir(&mut self) -> Result<(), BackendError> {
        self.next_lir_id = 0;
        self.next_reg = FIRST_VIRTUAL;
        self.registers = (0..FIRST_VIRTUAL).map(Register::Physical).collect();
        for bid in self.block_ids() {
            for id in self.blocks[bid].hir.clone() {
                self.lower_hir(id)?;
            }
        }
        Ok(())
    }

    fn lower_hir(&mut self, id: HirId) -> Result<LirLink, BackendError> {
        let canonical = self.resolve(id);
        if let Some(&link) = self.lir_links.get(&canonical) {
            return Ok(link);
        }
        let ins = self
            .hir_map
            .get(&canonical)
            .cloned()
            .ok_or_else(|| self.internal(format!("undefined value {canonical}")))?;
        let block = ins.block;
        let link = match ins.kind {
            HirKind::IConst(n) => {
                let write = self.new_vreg();
                let id = self.push_lir(block, LirKind::IConst(n), smallvec![], Some(write));
                LirLink {
                    id,
                    write: Some(write),
                }
            }
            HirKind::LoadParam(index) => {
                let write = self.new_vreg();
                let offset = -(index as i32 + 3);
                let id = self.push_lir(
                    block,
                    LirKind::Load { offset },
                    smallvec![super::regs::FP],
                    Some(write),
                );
                LirLink {
                    id,
                    write: Some(write),
                }
            }
            HirKind::Arithmetic { op, lhs, rhs } => {
                let lhs = self.lowered_operand(lhs)?;
                let rhs = self.lowered_operand(rhs)?;
                let write = self.new_vreg();
                let id = self.push_lir(
                    block,
                    LirKind::Arithmetic(op),
                    smallvec![lhs, rhs],
                    Some(write),
                );
                LirLink {
                    id,
                    write: Some(write),
                }
            }
            HirKind::Jump {
                cond,
                on_true,
                on_false,
            } => match cond {
                None => {
                    let id = self.push_lir(
                        block,
                        LirKind::Jump {
                            cond: None,
                            on_true: Some(on_true),
                            on_false: None,
                            return_from_method: false,
                        },
                        smallvec![],
                        None,
                    );
                    LirLink { id, write: None }
                }
                Some((op, lhs, rhs)) => {
                    let lhs = self.lowered_operand(lhs)?;
                    let rhs = self.lowered_operand(rhs)?;
                    let id = self.push_lir(
                        block,
                        LirKind::Jump {
                            cond: Some(op),
                            on_true: Some(on_true),
                            on_false,
                            return_from_method: false,
                        },
                        smallvec![lhs, rhs],
                        None,
                    );
                    LirLink { id, write: None }
                }
            },
            HirKind::Call {
                name,
                desc,
                args,
                is_io,
            } => {
                if is_io && name == "read" {
                    let write = self.new_vreg();
                    let id = self.push_lir(block, LirKind::Read, smallvec![], Some(write));
                    LirLink {
                        id,
                        write: Some(write),
                    }
                } else if is_io && name == "write" {
                    let arg = self.lowered_operand(args[0])?;
                    let id = self.push_lir(block, LirKind::Write, smallvec![arg], None);
                    LirLink { id, write: None }
                } else {
                    // Arguments are passed on the stack, pushed in reverse.
                    for &arg in args.iter().rev() {
                        let arg = self.lowered_operand(arg)?;
                        self.push_lir(block, LirKind::Push, smallvec![arg, SP], None);
                    }
                    let returns_value = ins.ty != ValueType::Void;
                    let call_write = returns_value.then_some(RV);
                    self.push_lir(
                        block,
                        LirKind::Call {
                            name: name.clone(),
                            desc: desc.clone(),
                        },
                        smallvec![],
                        call_write,
                    );
                    // Drop the argument slots the caller pushed.
                    let id = self.push_lir(
                        block,
                        LirKind::Inc(-(args.len() as i32)),
                        smallvec![],
                        Some(SP),
                    );
                    if returns_value {
                        let result = self.new_vreg();
                        let id =
                            self.push_lir(block, LirKind::Copy, smallvec![RV], Some(result));
                        LirLink {
                            id,
                            write: Some(result),
                        }
                    } else {
                        LirLink {
                            id,
                            write: Some(SP),
                        }
                    }
                }
            }
            HirKind::Phi { .. } => {
                // Placeholder owning the φ's result register; not added to
                // any block's instruction list.
                let write = self.new_vreg();
                let id = self.next_lir_id;
                self.next_lir_id += 1;
                LirLink {
                    id,
                    write: Some(write),
                }
            }
            HirKind::Return(value) => {
                if let Some(value) = value {
                    let result = self.lowered_operand(value)?;
                    self.push_lir(block, LirKind::Copy, smallvec![result], Some(RV));
                }
                let id = self.push_lir(
                    block,
                    LirKind::Jump {
                        cond: None,
                        on_true: None,
                        on_false: None,
                        return_from_method: true,
                    },
                    smallvec![],
                    None,
                );
                LirLink { id, write: None }
            }
        };
        self.lir_links.insert(canonical, link);
        Ok(link)
    }

    /// Lowers an operand and returns the register holding its result.
    fn lowered_operand(&mut self, id: HirId) -> Result<u32, BackendError> {
        let link = self.lower_hir(id)?;
        link.write
            .ok_or_else(|| self.internal(format!("value {id} produces no register")))
    }

    // ── φ resolution ────────────────────────────────────────────────────

    /// Replaces φs by copies at the tail of each predecessor, before the
    /// predecessor's terminating jump when it has one.
    pub fn resolve_phi_functions(&mut self) -> Result<(), BackendError> {
        for bid in self.block_ids() {
            for id in self.blocks[bid].hir.clone() {
                let ins = &self.hir_map[&self.resolve(id)];
                let args = match &ins.kind {
                    HirKind::Phi { args, .. } => args.clone(),
                    _ => continue,
                };
                let phi_write = self
                    .lir_links
                    .get(&self.resolve(id))
                    .and_then(|l| l.write)
                    .ok_or_else(|| self.internal(format!("φ {id} was never lowered")))?;
                for (i, arg) in args.iter().enumerate() {
                    let Some(arg) = *arg else { continue };
                    let arg_write = self
                        .lir_links
                        .get(&self.resolve(arg))
                        .and_then(|l| l.write)
                        .ok_or_else(|| {
                            self.internal(format!("φ argument {arg} has no result register"))
                        })?;
                    let &pred = self.blocks[bid].predecessors.get(i).ok_or_else(|| {
                        self.internal(format!("φ {id} has more arguments than predecessors"))
                    })?;
                    let copy = LirInstruction {
                        id: self.next_lir_id,
                        kind: LirKind::Copy,
                        reads: smallvec![arg_write],
                        write: Some(phi_write),
                    };
                    self.next_lir_id += 1;
                    let ends_with_jump = self.blocks[pred]
                        .hir
                        .last()
                        .map(|&h| matches!(self.hir(h).kind, HirKind::Jump { .. }))
                        .unwrap_or(false);
                    let lir = &mut self.blocks[pred].lir;
                    if ends_with_jump && !lir.is_empty() {
                        let at = lir.len() - 1;
                        lir.insert(at, copy);
                    } else {
                        lir.push(copy);
                    }
                }
            }
        }
        Ok(())
    }

    /// Renumbers LIR ids to 0, 5, 10, ... in program order, leaving gaps for
    /// the spill stores and reloads inserted during register allocation.
    pub fn renumber_lir(&mut self) {
        let mut next = 0;
        for bid in self.block_ids() {
            for ins in &mut self.blocks[bid].lir {
                ins.id = next;
                next += 5;
            }
        }
    }

    // ── LIR → Marvin selection ──────────────────────────────────────────

    /// The physical register backing a (possibly virtual) register number.
    pub fn physical(&self, reg: u32) -> Result<u32, BackendError> {
        if reg < FIRST_VIRTUAL {
            return Ok(reg);
        }
        self.registers[reg as usize]
            .as_virtual()
            .and_then(|v| v.preg)
            .ok_or_else(|| {
                BackendError::Internal {
                    method: format!("{}{}", self.name, self.desc),
                    message: format!("virtual register v{reg} was never allocated"),
                }
            })
    }

    pub fn lir_to_marvin(&mut self) -> Result<(), BackendError> {
        for bid in self.block_ids() {
            let mut out = Vec::with_capacity(self.blocks[bid].lir.len());
            for ins in &self.blocks[bid].lir {
                let kind = match &ins.kind {
                    LirKind::IConst(n) => Some(MarvinKind::Const {
                        rx: self.physical(ins.write.unwrap_or(0))?,
                        n: *n,
                    }),
                    LirKind::Arithmetic(op) => Some(MarvinKind::Arithmetic {
                        op: *op,
                        rx: self.physical(ins.write.unwrap_or(0))?,
                        ry: self.physical(ins.reads[0])?,
                        rz: self.physical(ins.reads[1])?,
                    }),
                    LirKind::Copy => Some(MarvinKind::Copy {
                        rx: self.physical(ins.write.unwrap_or(0))?,
                        ry: self.physical(ins.reads[0])?,
                    }),
                    LirKind::Inc(n) => Some(MarvinKind::Inc {
                        rx: self.physical(ins.write.unwrap_or(0))?,
                        n: *n,
                    }),
                    LirKind::Jump {
                        cond,
                        on_true,
                        on_false: _,
                        return_from_method,
                    } => match cond {
                        Some(op) => Some(MarvinKind::JumpCond {
                            op: *op,
                            rx: self.physical(ins.reads[0])?,
                            ry: self.physical(ins.reads[1])?,
                            on_true: on_true
                                .ok_or_else(|| self.internal("conditional jump without target"))?,
                            target: None,
                        }),
                        None => Some(MarvinKind::JumpAbs {
                            on_true: *on_true,
                            return_from_method: *return_from_method,
                            target: None,
                        }),
                    },
                    LirKind::Load { offset } => Some(MarvinKind::Load {
                        rx: self.physical(ins.write.unwrap_or(0))?,
                        ry: self.physical(ins.reads[0])?,
                        n: *offset,
                    }),
                    LirKind::Store { offset } => Some(MarvinKind::Store {
                        rx: self.physical(ins.reads[0])?,
                        ry: self.physical(ins.reads[1])?,
                        n: *offset,
                    }),
                    LirKind::Push => Some(MarvinKind::Push {
                        rx: self.physical(ins.reads[0])?,
                        ry: self.physical(ins.reads[1])?,
                    }),
                    LirKind::Call { name, desc } => Some(MarvinKind::Call {
                        name: name.clone(),
                        desc: desc.clone(),
                        rx: RA,
                        target: None,
                    }),
                    LirKind::Read => Some(MarvinKind::Read {
                        rx: self.physical(ins.write.unwrap_or(0))?,
                    }),
                    LirKind::Write => Some(MarvinKind::Write {
                        rx: self.physical(ins.reads[0])?,
                    }),
                    LirKind::Phi => None,
                };
                if let Some(kind) = kind {
                    out.push(MarvinInstruction::new(kind));
                }
            }
            self.blocks[bid].marvin = out;
        }
        Ok(())
    }

    // ── Frame synthesis and linking ─────────────────────────────────────

    /// Builds the prologue into the entry block and a new terminal exit
    /// block holding the epilogue.
    pub fn prepare_method_entry_and_exit(&mut self) {
        let mut prologue = vec![
            MarvinInstruction::new(MarvinKind::Push { rx: RA, ry: SP }),
            MarvinInstruction::new(MarvinKind::Push { rx: super::regs::FP, ry: SP }),
            MarvinInstruction::new(MarvinKind::Copy {
                rx: super::regs::FP,
                ry: SP,
            }),
        ];
        for &preg in &self.p_registers {
            prologue.push(MarvinInstruction::new(MarvinKind::Push { rx: preg, ry: SP }));
        }
        let entry = &mut self.blocks[0].marvin;
        prologue.append(entry);
        *entry = prologue;

        let mut exit = BasicBlock::new(self.blocks.len());
        for &preg in self.p_registers.iter().rev() {
            exit.marvin
                .push(MarvinInstruction::new(MarvinKind::Pop { rx: preg, ry: SP }));
        }
        exit.marvin.push(MarvinInstruction::new(MarvinKind::Pop {
            rx: super::regs::FP,
            ry: SP,
        }));
        exit.marvin
            .push(MarvinInstruction::new(MarvinKind::Pop { rx: RA, ry: SP }));
        exit.marvin
            .push(MarvinInstruction::new(MarvinKind::JumpReg { rx: RA }));
        self.blocks.push(exit);
    }

    fn first_marvin_pc(&self, block: BlockId) -> Result<usize, BackendError> {
        self.blocks[block]
            .marvin
            .first()
            .map(|m| m.pc)
            .ok_or_else(|| self.internal(format!("jump targets empty block B{block}")))
    }

    /// Assigns program counters from the process-wide counter, records this
    /// method's entry address, and patches every jump immediate.
    pub fn resolve_jumps(
        &mut self,
        pc: &mut usize,
        method_addresses: &mut HashMap<String, usize>,
    ) -> Result<(), BackendError> {
        let ids = self.block_ids();
        for &bid in &ids {
            for ins in &mut self.blocks[bid].marvin {
                ins.pc = *pc;
                *pc += 1;
            }
        }

        let entry_pc = self.first_marvin_pc(0)?;
        method_addresses.insert(format!("{}{}", self.name, self.desc), entry_pc);
        debug!("{}{} linked at pc {entry_pc}", self.name, self.desc);

        let exit_block = *ids.last().ok_or_else(|| self.internal("no blocks"))?;
        let exit_pc = self.first_marvin_pc(exit_block)?;
        for &bid in &ids {
            let mut patches: Vec<(usize, usize)> = Vec::new();
            for (i, ins) in self.blocks[bid].marvin.iter().enumerate() {
                match &ins.kind {
                    MarvinKind::JumpAbs {
                        on_true,
                        return_from_method,
                        ..
                    } => {
                        let target = if *return_from_method {
                            exit_pc
                        } else {
                            let block = on_true
                                .ok_or_else(|| self.internal("jump without target block"))?;
                            self.first_marvin_pc(block)?
                        };
                        patches.push((i, target));
                    }
                    MarvinKind::JumpCond { on_true, .. } => {
                        patches.push((i, self.first_marvin_pc(*on_true)?));
                    }
                    _ => {}
                }
            }
            for (i, target) in patches {
                match &mut self.blocks[bid].marvin[i].kind {
                    MarvinKind::JumpAbs { target: t, .. }
                    | MarvinKind::JumpCond { target: t, .. } => *t = Some(target),
                    _ => unreachable!(),
                }
            }
        }
        Ok(())
    }

    /// Patches every `calln` with the callee's linked address.
    pub fn resolve_calls(
        &mut self,
        method_addresses: &HashMap<String, usize>,
    ) -> Result<(), BackendError> {
        for bid in self.block_ids() {
            for ins in &mut self.blocks[bid].marvin {
                if let MarvinKind::Call {
                    name, desc, target, ..
                } = &mut ins.kind
                {
                    let key = format!("{name}{desc}");
                    let address = method_addresses
                        .get(&key)
                        .ok_or(BackendError::UnknownMethodAddress(key))?;
                    *target = Some(*address);
                }
            }
        }
        Ok(())
    }

    /// Writes this method's text segment: a header, then each block's
    /// instructions under a `# Bk` banner.
    pub fn write<W: io::Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "# {}{}\n", self.name, self.desc)?;
        let ids = self.block_ids();
        for (i, &bid) in ids.iter().enumerate() {
            let block = &self.blocks[bid];
            let role = if i == 0 {
                " (entry)"
            } else if i == ids.len() - 1 {
                " (exit)"
            } else {
                ""
            };
            writeln!(out, "# {}{}", block.label(), role)?;
            for ins in &block.marvin {
                ins.write(out)?;
            }
            writeln!(out)?;
        }
        writeln!(out)
    }

    // ── Dumps ───────────────────────────────────────────────────────────

    fn block_header(&self, block: &BasicBlock, with_locals: bool) -> String {
        let preds: Vec<String> = block
            .predecessors
            .iter()
            .map(|&p| self.blocks[p].label())
            .collect();
        let succs: Vec<String> = block
            .successors
            .iter()
            .map(|&s| self.blocks[s].label())
            .collect();
        let mut s = format!(
            "{} (pred: [{}], succ: [{}]",
            block.label(),
            preds.join(", "),
            succs.join(", ")
        );
        if block.is_loop_head {
            s.push_str(", LH");
        }
        if block.is_loop_tail {
            s.push_str(", LT");
        }
        if with_locals {
            let locals: Vec<String> = block
                .locals
                .iter()
                .map(|l| match l {
                    Some(id) => self.hir(*id).typed_id(),
                    None => "?".to_string(),
                })
                .collect();
            let _ = write!(s, ", locals: [{}]", locals.join(", "));
        }
        s.push_str("):");
        s
    }

    /// Rendering of one HIR instruction, with operands shown by typed id.
    fn hir_string(&self, id: HirId) -> String {
        let ins = &self.hir_map[&id];
        let operand = |op: HirId| self.hir(op).typed_id();
        match &ins.kind {
            HirKind::IConst(n) => format!("{}: ldc {n}", ins.typed_id()),
            HirKind::LoadParam(i) => format!("{}: ldparam {i}", ins.typed_id()),
            HirKind::Arithmetic { op, lhs, rhs } => format!(
                "{}: {} {} {}",
                ins.typed_id(),
                operand(*lhs),
                op.symbol(),
                operand(*rhs)
            ),
            HirKind::Jump {
                cond: None,
                on_true,
                ..
            } => format!("{}: goto {}", ins.typed_id(), self.blocks[*on_true].label()),
            HirKind::Jump {
                cond: Some((op, lhs, rhs)),
                on_true,
                on_false,
            } => format!(
                "{}: if {} {} {} then {} else {}",
                ins.typed_id(),
                operand(*lhs),
                op.symbol(),
                operand(*rhs),
                self.blocks[*on_true].label(),
                on_false.map_or("?".to_string(), |b| self.blocks[b].label()),
            ),
            HirKind::Call { name, args, .. } => {
                let args: Vec<String> = args.iter().map(|&a| operand(a)).collect();
                format!("{}: invoke {}({})", ins.typed_id(), name, args.join(", "))
            }
            HirKind::Phi { args, .. } => {
                let args: Vec<String> = args
                    .iter()
                    .map(|a| a.map_or("?".to_string(), operand))
                    .collect();
                format!("{}: phi({})", ins.typed_id(), args.join(", "))
            }
            HirKind::Return(None) => format!("{}: return", ins.typed_id()),
            HirKind::Return(Some(v)) => {
                format!("{}: ireturn {}", ins.typed_id(), operand(*v))
            }
        }
    }

    pub fn dump_tuples(&self) -> String {
        let mut s = String::from("[[ TUPLES ]]\n\n");
        for &bid in &self.block_ids() {
            let block = &self.blocks[bid];
            s.push_str(&self.block_header(block, false));
            s.push('\n');
            for tuple in &block.tuples {
                let _ = writeln!(s, "{tuple}");
            }
            s.push('\n');
        }
        s
    }

    pub fn dump_hir(&self) -> String {
        let mut s = String::from("[[ HIR ]]\n\n");
        for &bid in &self.block_ids() {
            let block = &self.blocks[bid];
            s.push_str(&self.block_header(block, true));
            s.push('\n');
            for &id in &block.hir {
                let _ = writeln!(s, "{}", self.hir_string(self.resolve(id)));
            }
            s.push('\n');
        }
        s
    }

    pub fn dump_lir(&self) -> String {
        let mut s = String::from("[[ LIR ]]\n\n");
        for &bid in &self.block_ids() {
            let block = &self.blocks[bid];
            s.push_str(&self.block_header(block, false));
            s.push('\n');
            for ins in &block.lir {
                let _ = writeln!(s, "{ins}");
            }
            s.push('\n');
        }
        s
    }

    pub fn dump_liveness_sets(&self) -> String {
        let mut s = String::from("[[ Liveness Sets ]]\n\n");
        let fmt_set = |set: &RegSet| {
            let mut regs: Vec<u32> = set.iter().copied().collect();
            regs.sort_unstable();
            let names: Vec<String> = regs.into_iter().map(reg_name).collect();
            names.join(", ")
        };
        for &bid in &self.block_ids() {
            let block = &self.blocks[bid];
            let _ = writeln!(s, "{}:", block.label());
            let _ = writeln!(s, "liveUse: {{{}}}", fmt_set(&block.live_use));
            let _ = writeln!(s, "liveDef: {{{}}}", fmt_set(&block.live_def));
            let _ = writeln!(s, "liveIn: {{{}}}", fmt_set(&block.live_in));
            let _ = writeln!(s, "liveOut: {{{}}}\n", fmt_set(&block.live_out));
        }
        s
    }

    pub fn dump_liveness_intervals(&self) -> String {
        let mut s = String::from("[[ Liveness Intervals ]]\n\n");
        for interval in &self.intervals {
            if interval.ranges.is_empty() {
                continue;
            }
            let reg = interval.reg;
            match self.registers[reg as usize].as_virtual() {
                Some(v) => {
                    let preg = v.preg.map_or("?".to_string(), reg_name);
                    if v.spill {
                        let _ = writeln!(s, "v{reg}: {interval} -> {preg}:{}", v.offset);
                    } else {
                        let _ = writeln!(s, "v{reg}: {interval} -> {preg}");
                    }
                }
                None => {
                    let _ = writeln!(s, "r{reg}: {interval}");
                }
            }
        }
        s
    }
}
