//! Optimizer pass tests: each transformation from the pass list, plus the
//! idempotence law (a second run changes nothing).

use cowc_lex::Lexer;
use cowc_opt::optimize;
use cowc_par::Parser;
use cowc_sem::hir::{self, BinOp, CondKind, ExprKind, Program, StmtKind};
use cowc_sem::analyze;
use cowc_util::{FileId, Handler, Interner};

fn compile(src: &str) -> Program {
    let mut interner = Interner::new();
    let mut handler = Handler::new();
    let tokens = Lexer::new(src, FileId(0), &mut interner, &mut handler).tokenize();
    let ast = Parser::new(tokens, &interner, &mut handler).parse();
    assert!(!handler.has_errors(), "{:?}", handler.diagnostics());
    analyze(&ast, &mut interner, &mut handler).expect("analysis succeeds")
}

fn optimized(src: &str) -> Program {
    let mut program = compile(src);
    optimize(&mut program);
    program
}

fn main_body(program: &Program) -> &[hir::Stmt] {
    &program.sub(hir::MAIN).body
}

#[test]
fn test_constant_folding_with_wraparound() {
    let program = optimized(
        "var a: uint8;\n\
         a := 200;\n\
         a := a + 100 - 44;\n",
    );
    // With a known to be 200, 200 + 100 wraps to 44 at uint8 width and
    // the - 44 leaves 0.
    let body = main_body(&program);
    assert_eq!(body.len(), 2, "{:?}", body);
    match &body[1].kind {
        StmtKind::Assign { value, .. } => assert_eq!(value.as_int(), Some(0)),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_constant_propagation_through_locals() {
    let program = optimized(
        "sub f(): (r: uint16) is\n\
         var a: uint16 := 6;\n\
         var b: uint16 := 7;\n\
         r := a * b;\n\
         end sub;\n\
         var x: uint16;\n\
         (x) := f();",
    );
    let f = &program.subs[1];
    // a and b propagate into r := 42; their own stores die.
    assert!(f.body.iter().any(|s| matches!(
        &s.kind,
        StmtKind::Assign { value, .. } if value.as_int() == Some(42)
    )));
    assert_eq!(f.body.len(), 1, "{:?}", f.body);
}

#[test]
fn test_loop_condition_variable_is_not_propagated() {
    // i is assigned in the body, so the condition must re-read it;
    // the loop must survive.
    let program = optimized(
        "var sum: uint16 := 0;\n\
         var i: uint16 := 0;\n\
         while i < 10 loop\n\
         sum := sum + i;\n\
         i := i + 1;\n\
         end loop;",
    );
    assert!(main_body(&program)
        .iter()
        .any(|s| matches!(s.kind, StmtKind::While { .. })));
}

#[test]
fn test_copy_propagation() {
    let program = optimized(
        "sub f(a: uint16): (r: uint16) is\n\
         var b: uint16;\n\
         b := a;\n\
         r := b + b;\n\
         end sub;\n\
         var x: uint16; (x) := f(3);",
    );
    let f = &program.subs[1];
    // b := a is copy-propagated into the use and then dead.
    let uses_a_directly = f.body.iter().any(|s| match &s.kind {
        StmtKind::Assign { value, .. } => match &value.kind {
            ExprKind::Binary { lhs, rhs, .. } => {
                matches!(lhs.kind, ExprKind::Var(v) if v == f.params[0])
                    && matches!(rhs.kind, ExprKind::Var(v) if v == f.params[0])
            }
            _ => false,
        },
        _ => false,
    });
    assert!(uses_a_directly, "{:?}", f.body);
    assert_eq!(f.body.len(), 1);
}

#[test]
fn test_algebraic_identities() {
    let program = optimized(
        "var a: uint16 := 5;\n\
         var b: uint16;\n\
         b := a + 0;\n\
         b := a * 1;\n\
         b := a - a;\n\
         b := a ^ a;",
    );
    for stmt in main_body(&program) {
        if let StmtKind::Assign { value, .. } = &stmt.kind {
            assert!(
                matches!(value.kind, ExprKind::Var(_) | ExprKind::Int(_)),
                "not simplified: {:?}",
                value
            );
        }
    }
}

#[test]
fn test_strength_reduction() {
    let program = optimized(
        "sub f(a: uint16): (r: uint16) is\n\
         r := a * 8;\n\
         end sub;\n\
         sub g(a: uint16): (r: uint16) is\n\
         r := a / 4;\n\
         end sub;\n\
         sub h(a: uint16): (r: uint16) is\n\
         r := a % 16;\n\
         end sub;\n\
         sub double(a: uint16): (r: uint16) is\n\
         r := a * 2;\n\
         end sub;\n\
         var x: uint16;\n\
         (x) := f(1); (x) := g(1); (x) := h(1); (x) := double(1);",
    );
    let op_of = |sub: &hir::Sub| match &sub.body[0].kind {
        StmtKind::Assign { value, .. } => match &value.kind {
            ExprKind::Binary { op, .. } => Some(*op),
            _ => None,
        },
        _ => None,
    };
    assert_eq!(op_of(&program.subs[1]), Some(BinOp::Shl));
    assert_eq!(op_of(&program.subs[2]), Some(BinOp::Shr));
    assert_eq!(op_of(&program.subs[3]), Some(BinOp::And));
    // a * 2 becomes a + a: the operand is cheap.
    assert_eq!(op_of(&program.subs[4]), Some(BinOp::Add));
}

#[test]
fn test_reassociation_groups_constants() {
    let program = optimized(
        "sub f(a: uint16): (r: uint16) is\n\
         r := (a + 1) + 2;\n\
         end sub;\n\
         var x: uint16; (x) := f(1);",
    );
    let f = &program.subs[1];
    match &f.body[0].kind {
        StmtKind::Assign { value, .. } => match &value.kind {
            ExprKind::Binary { op: BinOp::Add, lhs, rhs } => {
                assert!(matches!(lhs.kind, ExprKind::Var(_)));
                assert_eq!(rhs.as_int(), Some(3));
            }
            other => panic!("unexpected {:?}", other),
        },
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_dead_code_elimination_constant_branches() {
    let program = optimized(
        "var a: uint16 := 1;\n\
         if 1 == 1 then a := 2; else a := 3; end if;\n\
         while 1 == 2 loop a := 4; end loop;",
    );
    let body = main_body(&program);
    // Only `a := 1` (a global store) and the folded `a := 2` remain.
    assert!(body.iter().all(|s| matches!(s.kind, StmtKind::Assign { .. })));
    assert!(!body.iter().any(|s| matches!(s.kind, StmtKind::While { .. })));
    assert!(!body.iter().any(|s| matches!(s.kind, StmtKind::If { .. })));
}

#[test]
fn test_statements_after_return_are_removed() {
    let program = optimized(
        "sub f(): (r: uint16) is\n\
         r := 1;\n\
         return;\n\
         r := 2;\n\
         end sub;\n\
         var x: uint16; (x) := f();",
    );
    let f = &program.subs[1];
    assert_eq!(f.body.len(), 2, "{:?}", f.body);
    assert!(matches!(f.body[1].kind, StmtKind::Return));
}

#[test]
fn test_dead_store_and_dead_variable_elimination() {
    let program = optimized(
        "sub f(): (r: uint8) is\n\
         var unused: uint8;\n\
         unused := 3;\n\
         r := 1;\n\
         r := 1;\n\
         end sub;\n\
         var x: uint8; (x) := f();",
    );
    let f = &program.subs[1];
    // The store to `unused` dies, and the second identical store to r is
    // a dead store.
    assert_eq!(f.body.len(), 1, "{:?}", f.body);
}

#[test]
fn test_globals_survive_dead_store_analysis() {
    // Globals may be read by externally linked code; stores stay.
    let program = optimized("var g: uint8; g := 1;");
    assert_eq!(main_body(&program).len(), 1);
}

#[test]
fn test_cse_introduces_a_temporary() {
    let program = optimized(
        "sub f(a: uint16, b: uint16): (r: uint16) is\n\
         var x: uint16;\n\
         var y: uint16;\n\
         x := a * b + 1;\n\
         y := a * b + 2;\n\
         r := x + y;\n\
         end sub;\n\
         var q: uint16; (q) := f(2, 3);",
    );
    let f = &program.subs[1];
    // a * b computes once; a fresh local holds it.
    let mul_count: usize = f
        .body
        .iter()
        .map(|s| match &s.kind {
            StmtKind::Assign { value, .. } => count_muls(value),
            _ => 0,
        })
        .sum();
    assert_eq!(mul_count, 1, "{:?}", f.body);
    assert!(!f.locals.is_empty());
}

fn count_muls(e: &hir::Expr) -> usize {
    match &e.kind {
        ExprKind::Binary { op, lhs, rhs } => {
            let own = usize::from(*op == BinOp::Mul);
            own + count_muls(lhs) + count_muls(rhs)
        }
        ExprKind::Neg(inner) | ExprKind::Cast(inner) => count_muls(inner),
        _ => 0,
    }
}

#[test]
fn test_licm_hoists_invariant_expression() {
    let program = optimized(
        "sub f(a: uint16, b: uint16): (r: uint16) is\n\
         var i: uint16 := 0;\n\
         r := 0;\n\
         while i != 10 loop\n\
         r := r + (a * b);\n\
         i := i + 1;\n\
         end loop;\n\
         end sub;\n\
         var q: uint16; (q) := f(2, 3);",
    );
    let f = &program.subs[1];
    // The multiply moved to a pre-header; the loop body only adds.
    let in_loop_muls: usize = f
        .body
        .iter()
        .map(|s| match &s.kind {
            StmtKind::While { body, .. } => body
                .iter()
                .map(|s| match &s.kind {
                    StmtKind::Assign { value, .. } => count_muls(value),
                    _ => 0,
                })
                .sum(),
            _ => 0,
        })
        .sum();
    assert_eq!(in_loop_muls, 0, "{:?}", f.body);
}

#[test]
fn test_loop_reversal_fires_for_counting_loop() {
    let program = optimized(
        "sub fill(p: [uint8]) is\n\
         var q: [uint8];\n\
         q := p;\n\
         var i: uint8 := 0;\n\
         while i < 10 loop\n\
         [q] := 0;\n\
         q := q + 1;\n\
         i := i + 1;\n\
         end loop;\n\
         end sub;\n\
         record Buf is data: uint8; end record;\n\
         var buf: Buf;\n\
         fill(&buf.data);",
    );
    let fill = &program.subs[1];
    let reversed = fill.body.iter().any(|s| match &s.kind {
        StmtKind::While { cond, body } => {
            matches!(
                &cond.kind,
                CondKind::Cmp { op: hir::CmpOp::Ne, rhs, .. }
                    if rhs.as_int() == Some(0)
            ) && matches!(
                &body[0].kind,
                StmtKind::Assign { value, .. }
                    if matches!(&value.kind, ExprKind::Binary { op: BinOp::Sub, .. })
            )
        }
        _ => false,
    });
    assert!(reversed, "{:#?}", fill.body);
}

#[test]
fn test_loop_reversal_skips_loops_that_read_the_counter() {
    let program = optimized(
        "var sum: uint16 := 0;\n\
         var i: uint8 := 0;\n\
         while i < 10 loop\n\
         sum := sum + (i as uint16);\n\
         i := i + 1;\n\
         end loop;",
    );
    let still_counts_up = main_body(&program).iter().any(|s| match &s.kind {
        StmtKind::While { cond, .. } => {
            matches!(&cond.kind, CondKind::Cmp { op: hir::CmpOp::Lt, .. })
        }
        _ => false,
    });
    assert!(still_counts_up);
}

#[test]
fn test_optimizer_is_idempotent() {
    let sources = [
        "var a: uint16 := 1; a := a + 0; a := a * 4;",
        "sub f(a: uint16): (r: uint16) is\n\
         var i: uint8 := 0;\n\
         r := 0;\n\
         while i < 10 loop\n\
         r := r + a;\n\
         i := i + 1;\n\
         end loop;\n\
         end sub;\n\
         var x: uint16; (x) := f(7);",
        "var a: uint8 := 1;\n\
         if a == 1 then a := 2; else a := 3; end if;",
    ];
    for src in sources {
        let mut program = compile(src);
        optimize(&mut program);
        let again = optimize(&mut program);
        assert_eq!(again, 0, "not idempotent for: {src}");
    }
}

#[test]
fn test_asm_blocks_all_motion() {
    let program = optimized(
        "var a: uint16 := 5;\n\
         @asm \"XRA A\";\n\
         var b: uint16;\n\
         b := a + 1;",
    );
    // After @asm the value of `a` is unknown; the add must survive.
    let body = main_body(&program);
    assert!(body.iter().any(|s| matches!(
        &s.kind,
        StmtKind::Assign { value, .. } if matches!(value.kind, ExprKind::Binary { .. })
    )));
}
