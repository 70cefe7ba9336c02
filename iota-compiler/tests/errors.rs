use iota_compiler::{compile_to_marvin, CompileError};

fn expect_error(source: &str) -> CompileError {
    match compile_to_marvin(source) {
        Ok(_) => panic!("expected a compile error for:\n{source}"),
        Err(e) => e,
    }
}

// ── Lexical ──────────────────────────────────────────────────────────────

#[test]
fn rejects_unexpected_character() {
    let e = expect_error("void main() { write(@); }");
    assert!(matches!(e, CompileError::Lexical(_)), "got {e}");
}

#[test]
fn reports_error_position() {
    let e = expect_error("void main() {\n    int x = 1 ?;\n}");
    let message = e.to_string();
    assert!(message.contains("line 2"), "no line number in: {message}");
}

// ── Syntax ───────────────────────────────────────────────────────────────

#[test]
fn rejects_missing_semicolon() {
    let e = expect_error("void main() { int x = 1 }");
    assert!(matches!(e, CompileError::Parse(_)), "got {e}");
}

#[test]
fn rejects_statement_without_side_effect() {
    let e = expect_error("void main() { 1 + 2; }");
    assert!(matches!(e, CompileError::Parse(_)), "got {e}");
}

#[test]
fn rejects_assignment_to_non_variable() {
    let e = expect_error("void main() { 1 = 2; }");
    assert!(matches!(e, CompileError::Parse(_)), "got {e}");
}

#[test]
fn rejects_unclosed_block() {
    let e = expect_error("void main() { if (true) { write(1); }");
    assert!(matches!(e, CompileError::Parse(_)), "got {e}");
}

// ── Semantics ────────────────────────────────────────────────────────────

#[test]
fn rejects_type_mismatch_in_initializer() {
    let e = expect_error("void main() { int x = true; }");
    assert!(matches!(e, CompileError::Semantic(_)), "got {e}");
}

#[test]
fn rejects_undefined_variable() {
    let e = expect_error("void main() { write(x); }");
    assert!(matches!(e, CompileError::Semantic(_)), "got {e}");
}

#[test]
fn rejects_unknown_method() {
    let e = expect_error("void main() { write(f(1)); }");
    assert!(matches!(e, CompileError::Semantic(_)), "got {e}");
}

#[test]
fn rejects_call_with_wrong_argument_type() {
    let e = expect_error(
        "int f(int x) { return x; } void main() { write(f(true)); }",
    );
    assert!(matches!(e, CompileError::Semantic(_)), "got {e}");
}

#[test]
fn rejects_integer_condition() {
    let e = expect_error("void main() { if (1) { write(1); } }");
    assert!(matches!(e, CompileError::Semantic(_)), "got {e}");
}

#[test]
fn rejects_value_return_from_void_method() {
    let e = expect_error("void main() { return 1; }");
    assert!(matches!(e, CompileError::Semantic(_)), "got {e}");
}

#[test]
fn rejects_missing_return_value() {
    let e = expect_error("int f() { return; } void main() { write(f()); }");
    assert!(matches!(e, CompileError::Semantic(_)), "got {e}");
}

#[test]
fn rejects_redeclared_variable() {
    let e = expect_error("void main() { int x = 1; int x = 2; }");
    assert!(matches!(e, CompileError::Semantic(_)), "got {e}");
}

#[test]
fn rejects_duplicate_method() {
    let e = expect_error(
        "int f(int x) { return x; } int f(int y) { return y; } void main() { }",
    );
    assert!(matches!(e, CompileError::Semantic(_)), "got {e}");
}

#[test]
fn rejects_arithmetic_on_booleans() {
    let e = expect_error("void main() { write(true + 1); }");
    assert!(matches!(e, CompileError::Semantic(_)), "got {e}");
}

#[test]
fn collects_multiple_semantic_errors() {
    let e = expect_error("void main() { write(a); write(b); }");
    let message = e.to_string();
    assert!(message.contains('a') && message.contains('b'), "{message}");
}

// ── Linking ──────────────────────────────────────────────────────────────

#[test]
fn rejects_program_without_main() {
    let e = expect_error("int f() { return 1; }");
    assert!(matches!(e, CompileError::Backend(_)), "got {e}");
}
