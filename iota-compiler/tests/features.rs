//! Language-feature coverage: each program must compile to non-empty
//! assembly ending in a halt-reachable, fully linked text segment.

use iota_compiler::backend::AllocatorKind;
use iota_compiler::{compile_to_marvin, compile_to_marvin_with_allocator};

fn compiles(source: &str) -> String {
    let asm = compile_to_marvin(source).expect("program should compile");
    assert!(!asm.is_empty());
    asm
}

#[test]
fn empty_main() {
    compiles("void main() { }");
}

#[test]
fn boolean_short_circuit_and() {
    compiles(
        r#"
        void main() {
            int a = read();
            int b = read();
            if (a > 0 && b > 0) {
                write(a + b);
            }
        }
    "#,
    );
}

#[test]
fn boolean_short_circuit_or() {
    compiles(
        r#"
        void main() {
            int a = read();
            if (a < 0 || a > 100) {
                write(0);
            } else {
                write(a);
            }
        }
    "#,
    );
}

#[test]
fn logical_not_flips_branches() {
    let asm = compiles(
        r#"
        void main() {
            boolean b = read() == 0;
            if (!b) {
                write(1);
            }
        }
    "#,
    );
    // !b branches on the variable's value directly; no extra negation code.
    assert!(!asm.contains("mul"), "negation must not use arithmetic");
}

#[test]
fn unary_minus_multiplies_by_minus_one() {
    let asm = compiles("void main() { write(-read()); }");
    assert!(asm.contains("mul"), "-x lowers to -1 * x");
}

#[test]
fn nested_ifs_with_dangling_else() {
    compiles(
        r#"
        void main() {
            int a = read();
            if (a > 0)
                if (a > 10)
                    write(2);
                else
                    write(1);
        }
    "#,
    );
}

#[test]
fn nested_loops() {
    compiles(
        r#"
        void main() {
            int i = 0;
            while (i < 10) {
                int j = 0;
                while (j < i) {
                    write(i * j);
                    j = j + 1;
                }
                i = i + 1;
            }
        }
    "#,
    );
}

#[test]
fn boolean_valued_method_and_overloaded_write() {
    compiles(
        r#"
        boolean positive(int x) { return x > 0; }
        void main() {
            write(positive(read()));
            write(true);
        }
    "#,
    );
}

#[test]
fn assignment_as_value() {
    compiles(
        r#"
        void main() {
            int x = 0;
            int y = 0;
            x = y = read();
            write(x + y);
        }
    "#,
    );
}

#[test]
fn call_result_discarded() {
    compiles(
        r#"
        int next() { return read() + 1; }
        void main() {
            next();
            write(0);
        }
    "#,
    );
}

#[test]
fn recursion() {
    compiles(
        r#"
        int fib(int n) {
            if (n < 2) {
                return n;
            }
            return fib(n - 1) + fib(n - 2);
        }
        void main() { write(fib(10)); }
    "#,
    );
}

#[test]
fn remainder_and_division() {
    let asm = compiles("void main() { write(read() % 7 + read() / 3); }");
    assert!(asm.contains("mod"));
    assert!(asm.contains("div"));
}

#[test]
fn deeply_nested_expression() {
    compiles("void main() { write(((1 + 2) * (3 - 4)) / ((5 % 3) + 1)); }");
}

#[test]
fn comparison_operators() {
    compiles(
        r#"
        void main() {
            int a = read();
            int b = read();
            if (a < b) { write(1); }
            if (a <= b) { write(2); }
            if (a > b) { write(3); }
            if (a >= b) { write(4); }
            if (a == b) { write(5); }
            if (a != b) { write(6); }
        }
    "#,
    );
}

#[test]
fn graph_allocator_accepts_all_features() {
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
    let asm = compile_to_marvin_with_allocator(AllocatorKind::Graph, source)
        .expect("graph allocator should compile the program");
    assert!(asm.contains("# sum(I)I"));
}

#[test]
fn both_allocators_agree_on_method_layout() {
    let source = r#"
        int twice(int x) { return x + x; }
        void main() { write(twice(21)); }
    "#;
    let naive = compile_to_marvin_with_allocator(AllocatorKind::Naive, source).unwrap();
    let graph = compile_to_marvin_with_allocator(AllocatorKind::Graph, source).unwrap();
    for asm in [&naive, &graph] {
        assert!(asm.contains("# twice(I)I"));
        assert!(asm.contains("# main()V"));
    }
}
