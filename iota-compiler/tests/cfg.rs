//! Structural properties of the per-method pipeline artifacts, checked
//! through the library API.

use iota_compiler::backend::hir::HirKind;
use iota_compiler::backend::lir::LirKind;
use iota_compiler::backend::regalloc::{self, AllocatorKind};
use iota_compiler::backend::regs::FIRST_VIRTUAL;
use iota_compiler::backend::Cfg;
use iota_compiler::compile_to_class;

const SUM: &str = r#"
    int sum(int n) {
        int i = 0;
        int s = 0;
        while (i < n) {
            s = s + i;
            i = i + 1;
        }
        return s;
    }
    void main() { write(sum(read())); }
"#;

/// Runs the per-method pipeline up to (optionally) register allocation.
fn build_cfgs(source: &str, allocate: Option<AllocatorKind>) -> Vec<Cfg> {
    let class = compile_to_class(source).expect("front end should accept source");
    let mut cfgs = Vec::new();
    for method in &class.methods {
        let mut cfg = Cfg::build(&class.constant_pool, method).expect("cfg should build");
        cfg.detect_loops(0, None);
        cfg.remove_unreachable_blocks();
        cfg.tuples_to_hir().expect("hir construction should succeed");
        cfg.cleanup_phi_functions();
        cfg.hir_to_lir().expect("lowering should succeed");
        cfg.resolve_phi_functions().expect("φ resolution should succeed");
        cfg.renumber_lir();
        if let Some(kind) = allocate {
            regalloc::allocate(kind, &mut cfg);
        }
        cfgs.push(cfg);
    }
    cfgs
}

fn cfg_for<'a>(cfgs: &'a [Cfg], name: &str) -> &'a Cfg {
    cfgs.iter()
        .find(|c| c.name == name)
        .unwrap_or_else(|| panic!("no cfg for {name}"))
}

fn surviving_phis(cfg: &Cfg) -> Vec<&HirKind> {
    cfg.block_ids()
        .into_iter()
        .flat_map(|b| cfg.blocks[b].hir.iter())
        .map(|&id| &cfg.hir_map[&cfg.resolve(id)].kind)
        .filter(|k| matches!(k, HirKind::Phi { .. }))
        .collect()
}

#[test]
fn edges_are_symmetric() {
    for cfg in build_cfgs(SUM, None) {
        for bid in cfg.block_ids() {
            for &succ in &cfg.blocks[bid].successors {
                assert!(
                    cfg.blocks[succ].predecessors.contains(&bid),
                    "B{bid} -> B{succ} missing the reverse predecessor edge"
                );
            }
            for &pred in &cfg.blocks[bid].predecessors {
                assert!(
                    cfg.blocks[pred].successors.contains(&bid),
                    "B{pred} <- B{bid} missing the forward successor edge"
                );
            }
        }
    }
}

#[test]
fn all_remaining_blocks_are_reachable() {
    let source = r#"
        void main() {
            if (read() == 0) {
                return;
            } else {
                return;
            }
            write(1);
        }
    "#;
    for cfg in build_cfgs(source, None) {
        for bid in cfg.block_ids() {
            assert!(
                cfg.blocks[bid].is_visited,
                "B{bid} survived pruning but was never reached"
            );
        }
    }
}

#[test]
fn leaders_start_blocks() {
    for cfg in build_cfgs(SUM, None) {
        for bid in cfg.block_ids() {
            let tuples = &cfg.blocks[bid].tuples;
            if let Some(first) = tuples.first() {
                assert!(first.is_leader, "B{bid} does not start at a leader");
            }
            for tuple in tuples.iter().skip(1) {
                assert!(
                    !tuple.is_leader,
                    "leader at pc {} is not at a block start",
                    tuple.pc
                );
            }
        }
    }
}

#[test]
fn loop_marks_on_while() {
    let cfgs = build_cfgs(SUM, None);
    let sum = cfg_for(&cfgs, "sum");
    let heads: Vec<_> = sum
        .block_ids()
        .into_iter()
        .filter(|&b| sum.blocks[b].is_loop_head)
        .collect();
    let tails: Vec<_> = sum
        .block_ids()
        .into_iter()
        .filter(|&b| sum.blocks[b].is_loop_tail)
        .collect();
    assert_eq!(heads.len(), 1, "one while loop, one loop head");
    assert_eq!(tails.len(), 1, "one while loop, one loop tail");
    let head = heads[0];
    assert_eq!(
        sum.blocks[head].predecessors.len(),
        2,
        "loop head joins entry and back edge"
    );
    assert!(
        sum.blocks[tails[0]].successors.contains(&head),
        "loop tail must branch back to the head"
    );
}

#[test]
fn loop_phis_survive_cleanup() {
    let cfgs = build_cfgs(SUM, None);
    let sum = cfg_for(&cfgs, "sum");
    // φs for i and s survive; the φ for the unmodified parameter n is
    // cleaned up as redundant.
    assert_eq!(surviving_phis(sum).len(), 2);
}

#[test]
fn phi_arguments_match_predecessors() {
    let cfgs = build_cfgs(SUM, None);
    for cfg in &cfgs {
        for bid in cfg.block_ids() {
            for &id in &cfg.blocks[bid].hir {
                let ins = &cfg.hir_map[&cfg.resolve(id)];
                if let HirKind::Phi {
                    args,
                    local: Some(_),
                } = &ins.kind
                {
                    assert_eq!(
                        args.len(),
                        cfg.blocks[ins.block].predecessors.len(),
                        "φ arity must match its block's predecessor count"
                    );
                }
            }
        }
    }
}

#[test]
fn phi_resolution_inserts_copies_in_predecessors() {
    let cfgs = build_cfgs(SUM, None);
    let sum = cfg_for(&cfgs, "sum");
    let head = sum
        .block_ids()
        .into_iter()
        .find(|&b| sum.blocks[b].is_loop_head)
        .expect("sum has a loop head");
    for &pred in &sum.blocks[head].predecessors {
        let copies = sum.blocks[pred]
            .lir
            .iter()
            .filter(|l| matches!(l.kind, LirKind::Copy))
            .count();
        assert!(
            copies >= 2,
            "predecessor B{pred} should copy both carried values, found {copies}"
        );
        // Copies sit before a terminating jump, never after.
        if let Some(last) = sum.blocks[pred].lir.last() {
            if matches!(last.kind, LirKind::Jump { .. }) {
                let jumps = sum.blocks[pred]
                    .lir
                    .iter()
                    .filter(|l| matches!(l.kind, LirKind::Jump { .. }))
                    .count();
                assert_eq!(jumps, 1, "exactly one terminator in B{pred}");
            }
        }
    }
}

#[test]
fn single_return_does_not_merge_stack() {
    let source = r#"
        int f(int x) {
            if (x == 0) {
                return 1;
            } else {
                return 2;
            }
        }
        void main() { write(f(read())); }
    "#;
    let cfgs = build_cfgs(source, None);
    let f = cfg_for(&cfgs, "f");
    let stack_phis = surviving_phis(f)
        .into_iter()
        .filter(|k| matches!(k, HirKind::Phi { local: None, .. }))
        .count();
    assert_eq!(stack_phis, 0, "each arm returns its own single value");
}

#[test]
fn materialized_boolean_merges_stack_at_return() {
    let source = r#"
        boolean same(int a, int b) { return a == b; }
        void main() { write(same(read(), read())); }
    "#;
    let cfgs = build_cfgs(source, None);
    let same = cfg_for(&cfgs, "same");
    let stack_phis = surviving_phis(same)
        .into_iter()
        .filter(|k| matches!(k, HirKind::Phi { local: None, .. }))
        .count();
    assert_eq!(
        stack_phis, 1,
        "returning a materialized boolean merges two stacked values"
    );
}

#[test]
fn materialized_boolean_assignment_merges_stack() {
    let source = r#"
        void main() {
            boolean b = read() == 0;
            if (b) {
                write(1);
            }
        }
    "#;
    let cfgs = build_cfgs(source, None);
    let main = cfg_for(&cfgs, "main");
    // The 1/0 arms of the materialized comparison merge into a φ whose
    // value the store then consumes; each arm feeds it through a copy.
    let stack_phis: Vec<_> = main
        .block_ids()
        .into_iter()
        .flat_map(|b| main.blocks[b].hir.iter().map(move |&id| (b, id)))
        .filter(|&(_, id)| {
            matches!(
                main.hir_map[&main.resolve(id)].kind,
                HirKind::Phi { local: None, .. }
            )
        })
        .collect();
    assert_eq!(stack_phis.len(), 1, "expected one stack-merge φ");
    let (merge_block, _) = stack_phis[0];
    assert_eq!(main.blocks[merge_block].predecessors.len(), 2);
    for &pred in &main.blocks[merge_block].predecessors {
        assert!(
            main.blocks[pred]
                .lir
                .iter()
                .any(|l| matches!(l.kind, LirKind::Copy)),
            "predecessor B{pred} must copy its arm's value into the φ register"
        );
    }
}

#[test]
fn lir_ids_are_stride_five() {
    let cfgs = build_cfgs(SUM, None);
    for cfg in &cfgs {
        let mut expected = 0;
        for bid in cfg.block_ids() {
            for ins in &cfg.blocks[bid].lir {
                assert_eq!(ins.id, expected, "LIR ids must advance by five");
                expected += 5;
            }
        }
    }
}

#[test]
fn allocation_assigns_every_virtual_register() {
    for kind in [AllocatorKind::Naive, AllocatorKind::Graph] {
        for cfg in build_cfgs(SUM, Some(kind)) {
            for bid in cfg.block_ids() {
                for ins in &cfg.blocks[bid].lir {
                    for &reg in ins.reads.iter().chain(ins.write.iter()) {
                        if reg >= FIRST_VIRTUAL {
                            assert!(
                                cfg.registers[reg as usize]
                                    .as_virtual()
                                    .and_then(|v| v.preg)
                                    .is_some(),
                                "v{reg} has no physical register ({kind:?})"
                            );
                        }
                    }
                }
            }
        }
    }
}

#[test]
fn spills_are_bracketed_by_loads_and_stores() {
    let source = r#"
        void main() {
            int a = read(); int b = read(); int c = read(); int d = read();
            int e = read(); int f = read(); int g = read(); int h = read();
            int i = read(); int j = read(); int k = read(); int l = read();
            int m = read();
            write(a + b + c + d + e + f + g + h + i + j + k + l + m);
        }
    "#;
    for kind in [AllocatorKind::Naive, AllocatorKind::Graph] {
        let cfgs = build_cfgs(source, Some(kind));
        let main = cfg_for(&cfgs, "main");
        let mut saw_spill = false;
        for bid in main.block_ids() {
            let lir = &main.blocks[bid].lir;
            for (i, ins) in lir.iter().enumerate() {
                for &read in &ins.reads {
                    let Some(v) = main
                        .registers
                        .get(read as usize)
                        .and_then(|r| r.as_virtual())
                    else {
                        continue;
                    };
                    if !v.spill {
                        continue;
                    }
                    saw_spill = true;
                    // A reload must sit in the stride gap just before.
                    let reload = lir[..i].iter().rev().take(2).any(|prev| {
                        matches!(prev.kind, LirKind::Load { offset } if offset == v.offset)
                            && prev.id > ins.id - 5
                            && prev.id < ins.id
                    });
                    assert!(
                        reload,
                        "spilled v{read} read at {} without a reload ({kind:?})",
                        ins.id
                    );
                }
                if let Some(write) = ins.write {
                    if let Some(v) = main
                        .registers
                        .get(write as usize)
                        .and_then(|r| r.as_virtual())
                    {
                        if v.spill {
                            let store = lir.get(i + 1).map_or(false, |next| {
                                matches!(next.kind, LirKind::Store { offset } if offset == v.offset)
                                    && next.id == ins.id + 1
                            });
                            assert!(
                                store,
                                "spilled v{write} written at {} without a store ({kind:?})",
                                ins.id
                            );
                        }
                    }
                }
            }
        }
        assert!(saw_spill, "register pressure should force a spill ({kind:?})");
    }
}
