//! Analyzer integration tests: name resolution, typing rules, record
//! layout, forward declarations and the recursion check.

use cowc_lex::Lexer;
use cowc_par::Parser;
use cowc_sem::hir::{self, Program};
use cowc_sem::{analyze, types};
use cowc_util::{FileId, Handler, Interner};

fn run(src: &str) -> (Option<Program>, Handler, Interner) {
    let mut interner = Interner::new();
    let mut handler = Handler::new();
    let tokens = Lexer::new(src, FileId(0), &mut interner, &mut handler).tokenize();
    assert!(!handler.has_errors(), "lex: {:?}", handler.diagnostics());
    let ast = Parser::new(tokens, &interner, &mut handler).parse();
    assert!(!handler.has_errors(), "parse: {:?}", handler.diagnostics());
    let program = analyze(&ast, &mut interner, &mut handler);
    (program, handler, interner)
}

fn run_ok(src: &str) -> (Program, Interner) {
    let (program, handler, interner) = run(src);
    assert!(
        !handler.has_errors(),
        "unexpected errors: {:?}",
        handler.diagnostics()
    );
    (program.expect("analysis succeeds"), interner)
}

fn run_err(src: &str) -> Handler {
    let (program, handler, _) = run(src);
    assert!(handler.has_errors(), "expected an error for: {src}");
    assert!(program.is_none());
    handler
}

fn first_error(handler: &Handler) -> &str {
    &handler.diagnostics()[0].message
}

// ---- typing rules ----

#[test]
fn test_mixed_width_arithmetic_is_rejected() {
    let h = run_err("var a: uint8 := 1; var b: uint16 := 2; var c: uint16; c := b + a;");
    assert!(first_error(&h).contains("identical"), "{:?}", first_error(&h));
}

#[test]
fn test_literals_adapt_to_context() {
    let (program, _) = run_ok("var a: uint8 := 200; var b: uint16; b := 1000 + b;");
    assert_eq!(program.subs.len(), 1); // just main
}

#[test]
fn test_literal_out_of_range_is_rejected() {
    run_err("var a: uint8 := 300;");
}

#[test]
fn test_var_inference_rejects_bare_literal() {
    let h = run_err("var x := 5;");
    assert!(first_error(&h).contains("ambiguous"));
}

#[test]
fn test_var_inference_from_typed_expression() {
    let (program, _) = run_ok("var a: uint16 := 7; var b := a + 1;");
    let globals: Vec<_> = program
        .syms
        .iter()
        .filter(|(_, s)| matches!(s.kind, cowc_sem::SymKind::Var { .. }))
        .collect();
    assert_eq!(globals.len(), 2);
}

#[test]
fn test_shift_count_must_be_uint8() {
    run_ok("var a: uint16 := 1; var n: uint8 := 2; a := a << n;");
    run_err("var a: uint16 := 1; var n: uint16 := 2; a := a << n;");
}

#[test]
fn test_cast_is_the_only_conversion() {
    run_ok("var a: uint8 := 1; var b: uint16; b := a as uint16;");
    run_err("var a: uint8 := 1; var b: uint16; b := a;");
}

#[test]
fn test_address_of_scalar_is_rejected() {
    let h = run_err("var x: uint8 := 0; var p: [uint8]; p := &x;");
    assert!(first_error(&h).contains("record field"));
}

#[test]
fn test_address_of_record_field() {
    run_ok(
        "record Pair is lo: uint8; hi: uint8; end record;\n\
         var pair: Pair;\n\
         var p: [uint8];\n\
         p := &pair.hi;",
    );
}

#[test]
fn test_pointer_plus_is_bytewise_and_next_scales() {
    let (program, _) = run_ok(
        "record Pt is x: int16; y: int16; end record;\n\
         var buf: Pt[4];\n\
         var p: [Pt];\n\
         p := @next p;\n\
         p := p + 1;",
    );
    // @next lowered to `p + 4` (size of Pt); `p + 1` stays byte-wise.
    let main = program.sub(hir::MAIN);
    let offsets: Vec<i64> = main
        .body
        .iter()
        .filter_map(|s| match &s.kind {
            hir::StmtKind::Assign { value, .. } => match &value.kind {
                hir::ExprKind::Binary { rhs, .. } => rhs.as_int(),
                _ => None,
            },
            _ => None,
        })
        .collect();
    assert_eq!(offsets, vec![4, 1]);
}

#[test]
fn test_nil_needs_pointer_context() {
    run_ok("var p: [uint8]; p := nil;");
    run_err("var a: uint8; a := nil;");
}

// ---- records ----

#[test]
fn test_record_inheritance_layout() {
    let (program, interner) = run_ok(
        "record Point is x: int16; y: int16; end record;\n\
         record Point3D: Point is z: int16; end record;\n\
         var q: Point3D;",
    );
    let mut found = false;
    for (_, sym) in program.syms.iter() {
        if let cowc_sem::SymKind::Var { ty, .. } = &sym.kind {
            if program.types.display(*ty, &interner) == "Point3D" {
                let z = interner.lookup("z").unwrap();
                let field = program.types.find_field(*ty, z).unwrap();
                assert_eq!(field.offset, 4);
                assert_eq!(program.types.size_of(*ty), 6);
                found = true;
            }
        }
    }
    assert!(found);
}

#[test]
fn test_at_fields_overlap_and_resume_after_high_water() {
    let (program, interner) = run_ok(
        "record Reg is value: uint16; lo: uint8 @at(0); hi: uint8 @at(1); next: uint8; end record;\n\
         var r: Reg;",
    );
    for (_, sym) in program.syms.iter() {
        if let cowc_sem::SymKind::Var { ty, .. } = &sym.kind {
            let next = interner.lookup("next").unwrap();
            let f = program.types.find_field(*ty, next).unwrap();
            // value occupies 0..2, lo/hi overlap it; next resumes at 2.
            assert_eq!(f.offset, 2);
            assert_eq!(program.types.size_of(*ty), 3);
        }
    }
}

#[test]
fn test_record_bytesof_equation() {
    // @bytesof R == max over fields of offset + bytesof(field type)
    let (program, interner) = run_ok(
        "record R is a: uint8; b: uint32 @at(4); c: uint8 @at(2); end record;\n\
         var r: R;",
    );
    for (_, sym) in program.syms.iter() {
        if let cowc_sem::SymKind::Var { ty, .. } = &sym.kind {
            let stripped = program.types.strip(*ty);
            if let types::TypeKind::Record(rec) = program.types.kind(stripped) {
                let computed = rec
                    .fields
                    .iter()
                    .map(|f| f.offset + program.types.size_of(f.ty))
                    .max()
                    .unwrap();
                assert_eq!(program.types.size_of(*ty), computed);
                assert_eq!(computed, 8);
                let _ = &interner;
            }
        }
    }
}

// ---- arrays ----

#[test]
fn test_index_type_follows_extent() {
    // 300 elements force a uint16 index; a uint8 one is a type error.
    run_ok(
        "var big: uint8[300]; var i: uint16 := 0; big[i] := 1;",
    );
    run_err(
        "var big: uint8[300]; var i: uint8 := 0; big[i] := 1;",
    );
    run_ok("var small: uint8[10]; var i: uint8 := 0; small[i] := 1;");
}

#[test]
fn test_constant_index_bounds_checked() {
    run_err("var a: uint8[4]; a[4] := 0;");
}

#[test]
fn test_array_extent_inferred_from_initializer() {
    let (program, _) = run_ok("var table: uint16[] := {1, 2, 3};");
    let mut sizes = vec![];
    for (_, sym) in program.syms.iter() {
        if let cowc_sem::SymKind::Var { ty, .. } = &sym.kind {
            sizes.push(program.types.size_of(*ty));
        }
    }
    assert_eq!(sizes, vec![6]);
}

// ---- subroutines, forward decls, recursion ----

#[test]
fn test_forward_declared_callee() {
    run_ok(
        "@decl sub later(n: uint8);\n\
         sub first is later(1); end sub;\n\
         @impl sub later is n := n; end sub;\n\
         first();",
    );
}

#[test]
fn test_unimplemented_decl_is_fatal() {
    let h = run_err("@decl sub ghost(n: uint8);");
    assert!(first_error(&h).contains("never implemented"));
}

#[test]
fn test_extern_decl_needs_no_impl() {
    run_ok("@decl sub print(s: [uint8]) @extern(\"f_print\");\nprint(\"hi\");");
}

#[test]
fn test_impl_without_decl_is_fatal() {
    let h = run_err("@impl sub phantom is return; end sub;");
    assert!(first_error(&h).contains("no matching @decl"));
}

#[test]
fn test_impl_signature_mismatch_is_fatal() {
    run_err(
        "@decl sub f(n: uint8);\n\
         @impl sub f(n: uint16) is return; end sub;",
    );
}

#[test]
fn test_mutual_recursion_is_rejected() {
    let h = run_err(
        "@decl sub b();\n\
         sub a is b(); end sub;\n\
         @impl sub b is a(); end sub;",
    );
    assert!(first_error(&h).contains("recursion"));
}

#[test]
fn test_direct_recursion_is_rejected() {
    run_err("sub f is f(); end sub;");
}

#[test]
fn test_nested_sub_captures_enclosing_local() {
    let (program, interner) = run_ok(
        "sub outer is\n\
         var total: uint16 := 0;\n\
         sub bump is total := total + 1; end sub;\n\
         bump();\n\
         end sub;\n\
         outer();",
    );
    assert_eq!(program.captured.len(), 1);
    let sym = *program.captured.iter().next().unwrap();
    assert_eq!(interner.resolve(program.syms.get(sym).name), "total");
}

#[test]
fn test_multi_return_destructuring() {
    let (program, _) = run_ok(
        "sub divmod(a: uint16, b: uint16): (q: uint16, r: uint16) is\n\
         q := a / b; r := a % b;\n\
         end sub;\n\
         var x: uint16; var y: uint16;\n\
         (x, y) := divmod(17, 5);",
    );
    let main = program.sub(hir::MAIN);
    assert!(main.body.iter().any(|s| matches!(
        &s.kind,
        hir::StmtKind::Call { rets, .. } if rets.len() == 2
    )));
}

#[test]
fn test_interfaces_share_slots() {
    let (program, _) = run_ok(
        "interface Handler(code: uint8): (ok: uint8);\n\
         sub on_any implements Handler is ok := 1; end sub;\n\
         var h: Handler;\n\
         h := on_any;\n\
         var r: uint8;\n\
         (r) := h(3);",
    );
    // The implementing sub's param syms are the interface's slots.
    let on_any = &program.subs[1];
    assert!(on_any.address_taken);
    assert_eq!(on_any.params.len(), 1);
    assert!(program.syms.var_owner(on_any.params[0]).is_none());
}

// ---- misc semantic errors ----

#[test]
fn test_undeclared_identifier() {
    let h = run_err("x := 1;");
    assert!(first_error(&h).contains("undeclared"));
}

#[test]
fn test_duplicate_declaration() {
    let h = run_err("var x: uint8; var x: uint8;");
    assert!(first_error(&h).contains("duplicate"));
}

#[test]
fn test_break_outside_loop() {
    run_err("break;");
}

#[test]
fn test_constant_must_fold() {
    let h = run_err("var x: uint8 := 1; const k := x + 1;");
    assert!(first_error(&h).contains("constant"));
}

#[test]
fn test_case_rejects_duplicate_values() {
    run_err(
        "var x: uint8 := 0;\n\
         case x is when 1: x := 1; when 1, 2: x := 2; end case;",
    );
}

#[test]
fn test_every_expression_has_a_type() {
    let (program, _) = run_ok(
        "record Pt is x: int16; y: int16; end record;\n\
         var pts: Pt[3];\n\
         var i: uint8 := 0;\n\
         var sum: int16 := 0;\n\
         while i < 3 loop\n\
         sum := sum + pts[i].x;\n\
         i := i + 1;\n\
         end loop;",
    );
    // Walk everything; size_of panics on a malformed handle, so surviving
    // the walk is the assertion.
    fn walk_expr(p: &Program, e: &hir::Expr) {
        assert!(p.types.size_of(e.ty) > 0);
        match &e.kind {
            hir::ExprKind::Binary { lhs, rhs, .. } => {
                walk_expr(p, lhs);
                walk_expr(p, rhs);
            }
            hir::ExprKind::Field { base, .. } => walk_expr(p, base),
            hir::ExprKind::Index { base, index } => {
                walk_expr(p, base);
                walk_expr(p, index);
            }
            hir::ExprKind::Deref(e)
            | hir::ExprKind::AddrOf(e)
            | hir::ExprKind::Neg(e)
            | hir::ExprKind::Cast(e) => walk_expr(p, e),
            _ => {}
        }
    }
    fn walk_block(p: &Program, block: &[hir::Stmt]) {
        for stmt in block {
            match &stmt.kind {
                hir::StmtKind::Assign { target, value } => {
                    walk_expr(p, target);
                    walk_expr(p, value);
                }
                hir::StmtKind::While { cond, body } => {
                    if let hir::CondKind::Cmp { lhs, rhs, .. } = &cond.kind {
                        walk_expr(p, lhs);
                        walk_expr(p, rhs);
                    }
                    walk_block(p, body);
                }
                _ => {}
            }
        }
    }
    walk_block(&program, &program.sub(hir::MAIN).body);
}
