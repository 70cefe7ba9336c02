use iota_compiler::compile_to_marvin;

// ── Helpers for structural assertions on .marv text ──────────────────────

struct Line {
    pc: usize,
    mnemonic: String,
    ops: Vec<String>,
}

/// Parses instruction lines, dropping comments and headers.
fn parse_lines(asm: &str) -> Vec<Line> {
    asm.lines()
        .filter_map(|line| {
            let code = line.split('#').next().unwrap_or("");
            let mut fields = code.split_whitespace();
            let pc = fields.next()?.parse().ok()?;
            let mnemonic = fields.next()?.to_string();
            Some(Line {
                pc,
                mnemonic,
                ops: fields.map(str::to_string).collect(),
            })
        })
        .collect()
}

/// True when a line starts a method section (`# name(desc)` but not `# Bk`).
fn is_method_header(line: &str) -> bool {
    let Some(rest) = line.strip_prefix("# ") else {
        return false;
    };
    rest.contains('(')
        && !rest.starts_with('B')
        && (rest.ends_with('V') || rest.ends_with('I') || rest.ends_with(')'))
}

/// The text of one method's section.
fn method_section<'a>(asm: &'a str, name_and_desc: &str) -> &'a str {
    let header = format!("# {name_and_desc}");
    let start = asm
        .find(&header)
        .unwrap_or_else(|| panic!("no section for {name_and_desc}"));
    let rest = &asm[start + header.len()..];
    let end = rest
        .lines()
        .scan(0usize, |offset, line| {
            let at = *offset;
            *offset += line.len() + 1;
            Some((at, line))
        })
        .find(|(_, line)| is_method_header(line))
        .map(|(at, _)| at)
        .unwrap_or(rest.len());
    &rest[..end]
}

/// Asserts `mnemonics` appears as a subsequence of the section's code.
fn assert_in_order(section: &str, mnemonics: &[&str]) {
    let lines = parse_lines(section);
    let mut want = mnemonics.iter();
    let mut next = want.next();
    for line in &lines {
        if let Some(&m) = next {
            if line.mnemonic == m {
                next = want.next();
            }
        }
    }
    assert!(
        next.is_none(),
        "missing mnemonic {:?} in order {:?}; got {:?}",
        next,
        mnemonics,
        lines.iter().map(|l| l.mnemonic.clone()).collect::<Vec<_>>()
    );
}

// ── End-to-end scenarios ─────────────────────────────────────────────────

#[test]
fn straight_line_write() {
    let asm = compile_to_marvin("void main() { write(1 + 2); }").expect("should compile");
    let lines = parse_lines(&asm);
    assert_eq!(lines[0].pc, 0);
    assert_eq!(lines[0].mnemonic, "calln");
    assert_eq!(lines[1].pc, 1);
    assert_eq!(lines[1].mnemonic, "halt");

    let main = method_section(&asm, "main()V");
    assert_in_order(
        main,
        &[
            "pushr", "pushr", "copy", // prologue: RA, FP, FP=SP
            "set1", "setn", "add", "write", // body
            "popr", "popr", "jumpr", // epilogue
        ],
    );

    // The add must name three distinct registers.
    let add = parse_lines(main)
        .into_iter()
        .find(|l| l.mnemonic == "add")
        .expect("no add emitted");
    assert_ne!(add.ops[0], add.ops[1]);
    assert_ne!(add.ops[1], add.ops[2]);
}

#[test]
fn conditional_returns() {
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
    let asm = compile_to_marvin(source).expect("should compile");
    let f = method_section(&asm, "f(I)I");
    // Each arm copies its return value into RV (r13) separately.
    let rv_copies = parse_lines(f)
        .into_iter()
        .filter(|l| l.mnemonic == "copy" && l.ops[0] == "r13")
        .count();
    assert_eq!(rv_copies, 2, "each return should set RV exactly once");
    // The compare lowers to a conditional jump on != (branch on false).
    assert!(f.contains("jnen"), "compare with zero should emit jnen");
}

#[test]
fn loop_with_carried_values() {
    let source = r#"
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
    let asm = compile_to_marvin(source).expect("should compile");
    let sum = method_section(&asm, "sum(I)I");
    // i < n branches on false: if_icmpge -> jgen.
    assert!(sum.contains("jgen"), "loop test should emit jgen");
    // φ resolution inserts copies in both predecessors of the loop head.
    let copies = parse_lines(sum)
        .into_iter()
        .filter(|l| l.mnemonic == "copy" && l.ops[0] != "r13" && l.ops[0] != "r14")
        .count();
    assert!(
        copies >= 4,
        "expected at least four φ-resolution copies, found {copies}"
    );
}

#[test]
fn call_with_return_value() {
    let source = r#"
        int g(int a) { return a + a; }
        void main() { write(g(3)); }
    "#;
    let asm = compile_to_marvin(source).expect("should compile");

    // The callee reads its parameter at FP - 3.
    let g = method_section(&asm, "g(I)I");
    let param_load = parse_lines(g)
        .into_iter()
        .find(|l| l.mnemonic == "loadn" && l.ops[1] == "r14")
        .expect("no parameter load from FP");
    assert_eq!(param_load.ops[2], "-3");

    // The caller pushes the argument, calls, drops one slot, and copies RV.
    let main = method_section(&asm, "main()V");
    assert_in_order(main, &["setn", "pushr", "calln", "addn", "copy", "write"]);
    let drop = parse_lines(main)
        .into_iter()
        .find(|l| l.mnemonic == "addn" && l.ops[0] == "r15")
        .expect("caller must pop the argument slots");
    assert_eq!(drop.ops[1], "-1");
    let rv_copy = parse_lines(main)
        .into_iter()
        .find(|l| l.mnemonic == "copy" && l.ops[1] == "r13")
        .expect("caller must copy RV into a register");
    assert_ne!(rv_copy.ops[0], "r13");
}

#[test]
fn dead_code_is_removed() {
    // Both arms return, so the join block after the if is unreachable.
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
    let asm = compile_to_marvin(source).expect("should compile");
    assert!(
        !asm.contains("write"),
        "code after return must not reach the output"
    );
}

#[test]
fn spills_under_register_pressure() {
    // Thirteen values live at once exceed the twelve temporaries.
    let source = r#"
        void main() {
            int a = read(); int b = read(); int c = read(); int d = read();
            int e = read(); int f = read(); int g = read(); int h = read();
            int i = read(); int j = read(); int k = read(); int l = read();
            int m = read();
            write(a + b + c + d + e + f + g + h + i + j + k + l + m);
        }
    "#;
    let asm = compile_to_marvin(source).expect("should compile");
    let main = method_section(&asm, "main()V");
    assert!(main.contains("storen"), "expected at least one spill store");
    assert!(main.contains("loadn"), "expected at least one spill reload");
    let pushes = parse_lines(main)
        .into_iter()
        .filter(|l| l.mnemonic == "pushr")
        .count();
    assert!(
        pushes > 3,
        "prologue should save the temporaries in use, found {pushes} pushes"
    );
}

// ── Linking ──────────────────────────────────────────────────────────────

#[test]
fn trampoline_targets_main() {
    let asm = compile_to_marvin("void main() { }").expect("should compile");
    let lines = parse_lines(&asm);
    let target: usize = lines[0].ops[1].parse().expect("calln needs an address");
    // main's first instruction is the line right after its header.
    let main = method_section(&asm, "main()V");
    let first = parse_lines(main).into_iter().next().expect("empty main");
    assert_eq!(first.pc, target);
    assert_eq!(lines[0].ops[0], "r12");
}

#[test]
fn calls_are_linked_to_method_starts() {
    let source = r#"
        int id(int x) { return x; }
        void main() { write(id(id(7))); }
    "#;
    let asm = compile_to_marvin(source).expect("should compile");
    let id_section = method_section(&asm, "id(I)I");
    let id_start = parse_lines(id_section)
        .into_iter()
        .next()
        .expect("empty method")
        .pc;
    for call in parse_lines(&asm)
        .into_iter()
        .filter(|l| l.mnemonic == "calln" && l.pc >= 2)
    {
        let target: usize = call.ops[1].parse().expect("unresolved calln");
        assert_eq!(target, id_start);
    }
}

#[test]
fn frame_is_balanced() {
    let asm =
        compile_to_marvin("int f(int x) { return x * x; } void main() { write(f(5)); }")
            .expect("should compile");
    let f = method_section(&asm, "f(I)I");
    let lines = parse_lines(f);
    let pushes = lines.iter().filter(|l| l.mnemonic == "pushr").count();
    let pops = lines.iter().filter(|l| l.mnemonic == "popr").count();
    assert_eq!(pushes, pops, "prologue and epilogue must mirror");
    assert_eq!(
        lines.last().map(|l| l.mnemonic.as_str()),
        Some("jumpr"),
        "method must end with jumpr RA"
    );
}

#[test]
fn program_counters_are_consecutive() {
    let asm = compile_to_marvin(
        "int f(int x) { return x + 1; } void main() { write(f(read())); }",
    )
    .expect("should compile");
    let lines = parse_lines(&asm);
    for pair in lines.windows(2) {
        assert_eq!(pair[1].pc, pair[0].pc + 1, "pcs must be consecutive");
    }
}

#[test]
fn builtins_are_not_compiled() {
    let asm = compile_to_marvin("void main() { write(read()); }").expect("should compile");
    assert!(!asm.contains("# read()I"), "read must not be compiled");
    assert!(!asm.contains("# write(I)V"), "write must not be compiled");
    let main = method_section(&asm, "main()V");
    assert_in_order(main, &["read", "write"]);
}

// ── Sample program compilation ───────────────────────────────────────────

#[test]
fn compile_factorial_sample() {
    let source = std::fs::read_to_string("../samples/factorial.iota")
        .expect("failed to read samples/factorial.iota");
    let asm = compile_to_marvin(&source).expect("factorial.iota should compile");
    assert!(asm.contains("# factorial(I)I"));
    assert!(asm.contains("mul"));
}

#[test]
fn compile_gcd_sample() {
    let source = std::fs::read_to_string("../samples/gcd.iota")
        .expect("failed to read samples/gcd.iota");
    let asm = compile_to_marvin(&source).expect("gcd.iota should compile");
    // Recursion needs a call inside gcd's own section.
    let gcd = method_section(&asm, "gcd(II)I");
    assert!(gcd.contains("calln"), "recursive call expected");
    assert!(gcd.contains("mod"));
}

#[test]
fn compile_primes_sample() {
    let source = std::fs::read_to_string("../samples/primes.iota")
        .expect("failed to read samples/primes.iota");
    let asm = compile_to_marvin(&source).expect("primes.iota should compile");
    assert!(asm.contains("# isPrime(I)I"));
}

#[test]
fn compile_quadratic_sample() {
    let source = std::fs::read_to_string("../samples/quadratic.iota")
        .expect("failed to read samples/quadratic.iota");
    let asm = compile_to_marvin(&source).expect("quadratic.iota should compile");
    let evaluate = method_section(&asm, "evaluate(IIII)I");
    // Four parameters at FP-3 .. FP-6.
    for offset in ["-3", "-4", "-5", "-6"] {
        assert!(
            parse_lines(evaluate)
                .iter()
                .any(|l| l.mnemonic == "loadn" && l.ops[1] == "r14" && l.ops[2] == offset),
            "missing parameter load at FP {offset}"
        );
    }
}
