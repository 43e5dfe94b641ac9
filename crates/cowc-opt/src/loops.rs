//! Loop-invariant code motion and loop reversal.
//!
//! LICM hoists pure arithmetic whose inputs the loop body never assigns
//! into a pre-header temporary; hoisted expressions are pure, so running
//! them even when the loop body never executes is harmless.
//!
//! Loop reversal rewrites the canonical count-up byte loop
//!
//! ```text
//! i := 0; while i < N loop body; i := i + 1; end loop;
//! ```
//!
//! into a count-down whose exit test is `i != 0`, the shape the code
//! generator turns into a decrement that sets the zero flag. It only
//! fires when the body ignores `i` entirely and nothing reads `i` after
//! the loop.

use cowc_sem::hir::{BinOp, Block, CmpOp, Cond, CondKind, Expr, ExprKind, Stmt, StmtKind};
use cowc_sem::SymId;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::PassCtx;

pub(crate) fn run(ctx: &mut PassCtx, block: &mut Block) -> usize {
    let mut changes = licm_block(ctx, block);
    loop {
        let mut counts = FxHashMap::default();
        count_reads(block, &mut counts);
        if !reverse_one(ctx, block, &counts) {
            break;
        }
        changes += 1;
    }
    changes
}

// ---- loop-invariant code motion ----

fn licm_block(ctx: &mut PassCtx, block: &mut Block) -> usize {
    let mut changes = 0;
    let mut out: Vec<Stmt> = Vec::with_capacity(block.len());

    for mut stmt in block.drain(..) {
        match &mut stmt.kind {
            StmtKind::While { cond, body } => {
                changes += hoist(ctx, Some(cond), body, &mut out);
                changes += licm_block(ctx, body);
            }
            StmtKind::Loop { body } => {
                changes += hoist(ctx, None, body, &mut out);
                changes += licm_block(ctx, body);
            }
            StmtKind::If { arms, else_body } => {
                for (_, body) in arms.iter_mut() {
                    changes += licm_block(ctx, body);
                }
                if let Some(body) = else_body {
                    changes += licm_block(ctx, body);
                }
            }
            StmtKind::Case { arms, else_body, .. } => {
                for (_, body) in arms.iter_mut() {
                    changes += licm_block(ctx, body);
                }
                if let Some(body) = else_body {
                    changes += licm_block(ctx, body);
                }
            }
            _ => {}
        }
        out.push(stmt);
    }
    *block = out;
    changes
}

/// Hoist every invariant candidate of one loop, emitting pre-header
/// assignments into `out` just before the loop statement itself.
fn hoist(
    ctx: &mut PassCtx,
    mut cond: Option<&mut Cond>,
    body: &mut Block,
    out: &mut Vec<Stmt>,
) -> usize {
    if crate::block_has_asm(body) {
        return 0;
    }

    let mut assigned = FxHashSet::default();
    crate::block_assigned(body, &mut assigned);
    let body_calls = crate::block_has_call(body);

    let mut changes = 0;
    loop {
        let candidate = find_invariant(ctx, cond.as_deref(), body, &assigned, body_calls);
        let Some(candidate) = candidate else { break };

        let pos = candidate.pos;
        let temp = ctx.fresh_temp(candidate.ty, pos);
        let temp_read = Expr::new(ExprKind::Var(temp), candidate.ty, pos);

        for stmt in body.iter_mut() {
            replace_in_stmt_deep(stmt, &candidate, &temp_read);
        }
        if let Some(cond) = cond.as_deref_mut() {
            crate::visit_cond_exprs_mut(cond, &mut |e| {
                crate::replace_expr(e, &candidate, &temp_read);
            });
        }
        out.push(Stmt {
            kind: StmtKind::Assign {
                target: temp_read,
                value: candidate,
            },
            pos,
        });
        changes += 1;
    }
    changes
}

fn replace_in_stmt_deep(stmt: &mut Stmt, needle: &Expr, replacement: &Expr) {
    crate::visit_exprs_mut(stmt, &mut |e| {
        crate::replace_expr(e, needle, replacement);
    });
    match &mut stmt.kind {
        StmtKind::If { arms, else_body } => {
            for (_, body) in arms.iter_mut() {
                for s in body.iter_mut() {
                    replace_in_stmt_deep(s, needle, replacement);
                }
            }
            if let Some(body) = else_body {
                for s in body.iter_mut() {
                    replace_in_stmt_deep(s, needle, replacement);
                }
            }
        }
        StmtKind::While { body, .. } | StmtKind::Loop { body } => {
            for s in body.iter_mut() {
                replace_in_stmt_deep(s, needle, replacement);
            }
        }
        StmtKind::Case { arms, else_body, .. } => {
            for (_, body) in arms.iter_mut() {
                for s in body.iter_mut() {
                    replace_in_stmt_deep(s, needle, replacement);
                }
            }
            if let Some(body) = else_body {
                for s in body.iter_mut() {
                    replace_in_stmt_deep(s, needle, replacement);
                }
            }
        }
        _ => {}
    }
}

/// First invariant arithmetic subtree found in the loop, or `None`.
fn find_invariant(
    ctx: &PassCtx,
    cond: Option<&Cond>,
    body: &Block,
    assigned: &FxHashSet<SymId>,
    body_calls: bool,
) -> Option<Expr> {
    let mut found: Option<Expr> = None;
    let mut consider = |e: &Expr| {
        if found.is_some() {
            return;
        }
        let mut candidates = Vec::new();
        collect_arith(e, &mut candidates);
        for c in candidates {
            let mut inputs = FxHashSet::default();
            crate::expr_reads(&c, &mut inputs);
            let invariant = inputs.iter().all(|sym| {
                !assigned.contains(sym) && (!body_calls || ctx.is_private_local(*sym))
            });
            if invariant {
                found = Some(c);
                return;
            }
        }
    };

    if let Some(cond) = cond {
        visit_cond_exprs(cond, &mut consider);
    }
    for stmt in body {
        visit_stmt_exprs_deep(stmt, &mut consider);
    }
    found
}

/// Arithmetic subtrees at least one operator deep with variable/literal
/// leaves, skipping trees that are entirely constant.
fn collect_arith(e: &Expr, out: &mut Vec<Expr>) {
    match &e.kind {
        ExprKind::Binary { lhs, rhs, .. } => {
            if arith_leaves(lhs) && arith_leaves(rhs) && !all_const(e) {
                out.push(e.clone());
            }
            collect_arith(lhs, out);
            collect_arith(rhs, out);
        }
        ExprKind::Neg(inner) | ExprKind::Cast(inner) => {
            if arith_leaves(inner) && !all_const(e) {
                out.push(e.clone());
            }
            collect_arith(inner, out);
        }
        ExprKind::Call { args, .. } => {
            for arg in args {
                collect_arith(arg, out);
            }
        }
        ExprKind::CallIndirect { target, args } => {
            collect_arith(target, out);
            for arg in args {
                collect_arith(arg, out);
            }
        }
        ExprKind::Index { base, index } => {
            collect_arith(base, out);
            collect_arith(index, out);
        }
        ExprKind::Field { base, .. } => collect_arith(base, out),
        ExprKind::Deref(inner) | ExprKind::AddrOf(inner) => collect_arith(inner, out),
        _ => {}
    }
}

fn arith_leaves(e: &Expr) -> bool {
    match &e.kind {
        ExprKind::Var(_) | ExprKind::Int(_) => true,
        ExprKind::Binary { lhs, rhs, .. } => arith_leaves(lhs) && arith_leaves(rhs),
        ExprKind::Neg(inner) | ExprKind::Cast(inner) => arith_leaves(inner),
        _ => false,
    }
}

fn all_const(e: &Expr) -> bool {
    let mut reads = FxHashSet::default();
    crate::expr_reads(e, &mut reads);
    reads.is_empty()
}

fn visit_cond_exprs(cond: &Cond, f: &mut dyn FnMut(&Expr)) {
    match &cond.kind {
        CondKind::Cmp { lhs, rhs, .. } => {
            f(lhs);
            f(rhs);
        }
        CondKind::And(a, b) | CondKind::Or(a, b) => {
            visit_cond_exprs(a, f);
            visit_cond_exprs(b, f);
        }
        CondKind::Not(inner) => visit_cond_exprs(inner, f),
        CondKind::Const(_) => {}
    }
}

fn visit_stmt_exprs_deep(stmt: &Stmt, f: &mut dyn FnMut(&Expr)) {
    match &stmt.kind {
        StmtKind::Assign { target, value } => {
            visit_lvalue_exprs(target, f);
            f(value);
        }
        StmtKind::Call { target, args, rets } => {
            if let cowc_sem::hir::CallTarget::Indirect(e) = target {
                f(e);
            }
            for arg in args {
                f(arg);
            }
            for ret in rets {
                visit_lvalue_exprs(ret, f);
            }
        }
        StmtKind::If { arms, else_body } => {
            for (cond, body) in arms {
                visit_cond_exprs(cond, f);
                for s in body {
                    visit_stmt_exprs_deep(s, f);
                }
            }
            if let Some(body) = else_body {
                for s in body {
                    visit_stmt_exprs_deep(s, f);
                }
            }
        }
        StmtKind::While { cond, body } => {
            visit_cond_exprs(cond, f);
            for s in body {
                visit_stmt_exprs_deep(s, f);
            }
        }
        StmtKind::Loop { body } => {
            for s in body {
                visit_stmt_exprs_deep(s, f);
            }
        }
        StmtKind::Case {
            scrutinee,
            arms,
            else_body,
        } => {
            f(scrutinee);
            for (_, body) in arms {
                for s in body {
                    visit_stmt_exprs_deep(s, f);
                }
            }
            if let Some(body) = else_body {
                for s in body {
                    visit_stmt_exprs_deep(s, f);
                }
            }
        }
        _ => {}
    }
}

fn visit_lvalue_exprs(target: &Expr, f: &mut dyn FnMut(&Expr)) {
    match &target.kind {
        ExprKind::Var(_) => {}
        ExprKind::Field { base, .. } => visit_lvalue_exprs(base, f),
        ExprKind::Index { base, index } => {
            visit_lvalue_exprs(base, f);
            f(index);
        }
        ExprKind::Deref(e) => f(e),
        _ => f(target),
    }
}

// ---- loop reversal ----

/// Find and rewrite one count-up loop; returns whether anything changed.
fn reverse_one(ctx: &PassCtx, block: &mut Block, counts: &FxHashMap<SymId, usize>) -> bool {
    for ix in 0..block.len() {
        if ix + 1 < block.len() && try_reverse_pair(ctx, block, ix, counts) {
            return true;
        }
        // Recurse into nested blocks.
        let found = match &mut block[ix].kind {
            StmtKind::If { arms, else_body } => arms
                .iter_mut()
                .any(|(_, body)| reverse_one(ctx, body, counts))
                || else_body
                    .as_mut()
                    .map(|body| reverse_one(ctx, body, counts))
                    .unwrap_or(false),
            StmtKind::While { body, .. } | StmtKind::Loop { body } => {
                reverse_one(ctx, body, counts)
            }
            StmtKind::Case { arms, else_body, .. } => arms
                .iter_mut()
                .any(|(_, body)| reverse_one(ctx, body, counts))
                || else_body
                    .as_mut()
                    .map(|body| reverse_one(ctx, body, counts))
                    .unwrap_or(false),
            _ => false,
        };
        if found {
            return true;
        }
    }
    false
}

fn try_reverse_pair(
    ctx: &PassCtx,
    block: &mut Block,
    ix: usize,
    counts: &FxHashMap<SymId, usize>,
) -> bool {
    // Shape: i := 0; while i < N loop ...; i := i + 1; end loop;
    let (counter, counter_ty) = match &block[ix].kind {
        StmtKind::Assign { target, value } => match (&target.kind, value.as_int()) {
            (ExprKind::Var(sym), Some(0)) => (*sym, target.ty),
            _ => return false,
        },
        _ => return false,
    };
    // A byte counter that nothing else can observe.
    match ctx.types.int_info(ctx.syms.var_type(counter).unwrap_or(cowc_sem::types::T_U16)) {
        Some((_, 1)) => {}
        _ => return false,
    }
    if !ctx.is_private_local(counter) || ctx.pinned.contains(&counter) {
        return false;
    }

    let (limit, body_ok) = match &block[ix + 1].kind {
        StmtKind::While { cond, body } => {
            let limit = match &cond.kind {
                CondKind::Cmp {
                    op: CmpOp::Lt,
                    lhs,
                    rhs,
                } => match (&lhs.kind, rhs.as_int()) {
                    (ExprKind::Var(sym), Some(n)) if *sym == counter && n > 0 => n,
                    _ => return false,
                },
                _ => return false,
            };
            (limit, reversible_body(counter, body))
        }
        _ => return false,
    };
    if !body_ok {
        return false;
    }

    // The only reads of the counter must be the loop condition and its
    // own increment; anything else observes iteration order.
    if counts.get(&counter).copied().unwrap_or(0) != 2 {
        return false;
    }

    let pos = block[ix + 1].pos;
    let StmtKind::While { cond, body } = &mut block[ix + 1].kind else {
        return false;
    };

    // i := N
    let init_value = Expr::int(limit, counter_ty, pos);
    // while i != 0
    cond.kind = CondKind::Cmp {
        op: CmpOp::Ne,
        lhs: Expr::new(ExprKind::Var(counter), counter_ty, pos),
        rhs: Expr::int(0, counter_ty, pos),
    };
    // decrement first, then the original body minus its increment
    body.pop();
    let decrement = Stmt {
        kind: StmtKind::Assign {
            target: Expr::new(ExprKind::Var(counter), counter_ty, pos),
            value: Expr::new(
                ExprKind::Binary {
                    op: BinOp::Sub,
                    lhs: Box::new(Expr::new(ExprKind::Var(counter), counter_ty, pos)),
                    rhs: Box::new(Expr::int(1, counter_ty, pos)),
                },
                counter_ty,
                pos,
            ),
        },
        pos,
    };
    body.insert(0, decrement);

    if let StmtKind::Assign { value, .. } = &mut block[ix].kind {
        *value = init_value;
    }
    true
}

/// The body qualifies when its last statement is `i := i + 1`, nothing
/// else touches `i`, and no `continue` could skip the increment.
fn reversible_body(counter: SymId, body: &Block) -> bool {
    let Some(last) = body.last() else { return false };
    let increments = match &last.kind {
        StmtKind::Assign { target, value } => match (&target.kind, &value.kind) {
            (ExprKind::Var(t), ExprKind::Binary { op: BinOp::Add, lhs, rhs }) => {
                *t == counter
                    && matches!(lhs.kind, ExprKind::Var(s) if s == counter)
                    && rhs.as_int() == Some(1)
            }
            _ => false,
        },
        _ => false,
    };
    if !increments {
        return false;
    }

    let rest = &body[..body.len() - 1];
    let mut touched = FxHashSet::default();
    crate::block_reads(rest, &mut touched);
    let mut assigned = FxHashSet::default();
    crate::block_assigned(rest, &mut assigned);
    if touched.contains(&counter) || assigned.contains(&counter) {
        return false;
    }
    !has_toplevel_continue(rest)
}

/// `continue` at this loop's level would skip the relocated decrement in
/// the original shape; reject it. Nested loops keep their own continues.
fn has_toplevel_continue(block: &[Stmt]) -> bool {
    block.iter().any(|stmt| match &stmt.kind {
        StmtKind::Continue => true,
        StmtKind::If { arms, else_body } => {
            arms.iter().any(|(_, body)| has_toplevel_continue(body))
                || else_body
                    .as_ref()
                    .map(|body| has_toplevel_continue(body))
                    .unwrap_or(false)
        }
        StmtKind::Case { arms, else_body, .. } => {
            arms.iter().any(|(_, body)| has_toplevel_continue(body))
                || else_body
                    .as_ref()
                    .map(|body| has_toplevel_continue(body))
                    .unwrap_or(false)
        }
        _ => false,
    })
}

// ---- read counting ----

fn count_reads(block: &Block, counts: &mut FxHashMap<SymId, usize>) {
    for stmt in block {
        count_stmt_reads(stmt, counts);
    }
}

fn count_stmt_reads(stmt: &Stmt, counts: &mut FxHashMap<SymId, usize>) {
    match &stmt.kind {
        StmtKind::Assign { target, value } => {
            let mut bump = |e: &Expr| count_expr_reads(e, counts);
            visit_lvalue_exprs(target, &mut bump);
            bump(value);
        }
        StmtKind::Call { target, args, rets } => {
            let mut bump = |e: &Expr| count_expr_reads(e, counts);
            if let cowc_sem::hir::CallTarget::Indirect(e) = target {
                bump(e);
            }
            for arg in args {
                bump(arg);
            }
            for ret in rets {
                visit_lvalue_exprs(ret, &mut bump);
            }
        }
        StmtKind::If { arms, else_body } => {
            for (cond, body) in arms {
                visit_cond_exprs(cond, &mut |e: &Expr| count_expr_reads(e, counts));
                count_reads(body, counts);
            }
            if let Some(body) = else_body {
                count_reads(body, counts);
            }
        }
        StmtKind::While { cond, body } => {
            visit_cond_exprs(cond, &mut |e: &Expr| count_expr_reads(e, counts));
            count_reads(body, counts);
        }
        StmtKind::Loop { body } => count_reads(body, counts),
        StmtKind::Case {
            scrutinee,
            arms,
            else_body,
        } => {
            count_expr_reads(scrutinee, counts);
            for (_, body) in arms {
                count_reads(body, counts);
            }
            if let Some(body) = else_body {
                count_reads(body, counts);
            }
        }
        StmtKind::Asm { parts } => {
            for part in parts {
                if let cowc_sem::hir::AsmChunk::Var(sym) = part {
                    *counts.entry(*sym).or_insert(0) += 1;
                }
            }
        }
        StmtKind::Break | StmtKind::Continue | StmtKind::Return => {}
    }
}

fn count_expr_reads(e: &Expr, counts: &mut FxHashMap<SymId, usize>) {
    match &e.kind {
        ExprKind::Var(sym) => {
            *counts.entry(*sym).or_insert(0) += 1;
        }
        ExprKind::Int(_) | ExprKind::Str(_) | ExprKind::SubAddr(_) => {}
        ExprKind::Field { base, .. } => count_expr_reads(base, counts),
        ExprKind::Index { base, index } => {
            count_expr_reads(base, counts);
            count_expr_reads(index, counts);
        }
        ExprKind::Deref(inner)
        | ExprKind::AddrOf(inner)
        | ExprKind::Neg(inner)
        | ExprKind::Cast(inner) => count_expr_reads(inner, counts),
        ExprKind::Binary { lhs, rhs, .. } => {
            count_expr_reads(lhs, counts);
            count_expr_reads(rhs, counts);
        }
        ExprKind::Call { args, .. } => {
            for arg in args {
                count_expr_reads(arg, counts);
            }
        }
        ExprKind::CallIndirect { target, args } => {
            count_expr_reads(target, counts);
            for arg in args {
                count_expr_reads(arg, counts);
            }
        }
    }
}
