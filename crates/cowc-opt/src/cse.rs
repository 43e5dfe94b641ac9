//! Common subexpression elimination, local to a basic block.
//!
//! Within a straight-line run of statements, a pure arithmetic expression
//! that occurs more than once is computed into a fresh temporary at its
//! first occurrence and re-read afterwards. Candidates contain only
//! variables and literals under operators; calls, dereferences and
//! indexing never participate (they read memory that may change).
//! Assignments to any variable a candidate reads end its run, as do
//! calls, `@asm` and control flow.

use cowc_sem::hir::{Block, Expr, ExprKind, Stmt, StmtKind};
use cowc_sem::SymId;
use rustc_hash::FxHashSet;

use crate::PassCtx;

pub(crate) fn run(ctx: &mut PassCtx, block: &mut Block) -> usize {
    let mut changes = eliminate_in_block(ctx, block);
    for stmt in block.iter_mut() {
        match &mut stmt.kind {
            StmtKind::If { arms, else_body } => {
                for (_, body) in arms.iter_mut() {
                    changes += run(ctx, body);
                }
                if let Some(body) = else_body {
                    changes += run(ctx, body);
                }
            }
            StmtKind::While { body, .. } | StmtKind::Loop { body } => {
                changes += run(ctx, body);
            }
            StmtKind::Case { arms, else_body, .. } => {
                for (_, body) in arms.iter_mut() {
                    changes += run(ctx, body);
                }
                if let Some(body) = else_body {
                    changes += run(ctx, body);
                }
            }
            _ => {}
        }
    }
    changes
}

/// One elimination per call; the fixpoint driver reruns until dry.
fn eliminate_in_block(ctx: &mut PassCtx, block: &mut Block) -> usize {
    for start in 0..block.len() {
        let candidates = match &block[start].kind {
            StmtKind::Assign { value, .. } => {
                let mut found = Vec::new();
                collect_candidates(value, &mut found);
                found
            }
            _ => continue,
        };

        for candidate in candidates {
            let Some(end) = find_reuse(block, start, &candidate) else {
                continue;
            };

            // Compute once into a temporary, then re-read it.
            let pos = block[start].pos;
            let temp = ctx.fresh_temp(candidate.ty, pos);
            let temp_read = Expr::new(ExprKind::Var(temp), candidate.ty, pos);
            let mut replaced = 0;
            for stmt in &mut block[start..=end] {
                crate::visit_exprs_mut(stmt, &mut |e| {
                    replaced += crate::replace_expr(e, &candidate, &temp_read);
                });
            }
            block.insert(
                start,
                Stmt {
                    kind: StmtKind::Assign {
                        target: temp_read.clone(),
                        value: candidate,
                    },
                    pos,
                },
            );
            return replaced;
        }
    }
    0
}

/// Pure arithmetic subtrees over variables and literals, at least one
/// operator deep.
fn collect_candidates(e: &Expr, out: &mut Vec<Expr>) {
    match &e.kind {
        ExprKind::Binary { lhs, rhs, .. } => {
            if is_candidate(e) {
                out.push(e.clone());
            }
            collect_candidates(lhs, out);
            collect_candidates(rhs, out);
        }
        ExprKind::Neg(inner) | ExprKind::Cast(inner) => {
            if is_candidate(e) {
                out.push(e.clone());
            }
            collect_candidates(inner, out);
        }
        ExprKind::Call { args, .. } => {
            for arg in args {
                collect_candidates(arg, out);
            }
        }
        ExprKind::CallIndirect { target, args } => {
            collect_candidates(target, out);
            for arg in args {
                collect_candidates(arg, out);
            }
        }
        ExprKind::Index { base, index } => {
            collect_candidates(base, out);
            collect_candidates(index, out);
        }
        ExprKind::Field { base, .. } => collect_candidates(base, out),
        ExprKind::Deref(inner) | ExprKind::AddrOf(inner) => collect_candidates(inner, out),
        _ => {}
    }
}

/// Only operator trees whose leaves are variables or literals qualify.
fn is_candidate(e: &Expr) -> bool {
    match &e.kind {
        ExprKind::Binary { lhs, rhs, .. } => leaves_ok(lhs) && leaves_ok(rhs),
        ExprKind::Neg(inner) | ExprKind::Cast(inner) => leaves_ok(inner),
        _ => false,
    }
}

fn leaves_ok(e: &Expr) -> bool {
    match &e.kind {
        ExprKind::Var(_) | ExprKind::Int(_) => true,
        ExprKind::Binary { lhs, rhs, .. } => leaves_ok(lhs) && leaves_ok(rhs),
        ExprKind::Neg(inner) | ExprKind::Cast(inner) => leaves_ok(inner),
        _ => false,
    }
}

/// Find the last statement in the straight-line run from `start` that
/// reuses `candidate`; `None` if there is no reuse.
fn find_reuse(block: &Block, start: usize, candidate: &Expr) -> Option<usize> {
    // A call anywhere in the defining statement makes evaluation order
    // too murky to share; skip.
    if crate::stmt_has_call(&block[start]) {
        return None;
    }
    let mut inputs = FxHashSet::default();
    crate::expr_reads(candidate, &mut inputs);

    // A second occurrence inside the starting statement itself counts:
    // both evaluate before the store happens.
    let mut last = if occurrence_count(&block[start], candidate) >= 2 {
        Some(start)
    } else {
        None
    };
    if ends_run(&block[start], &inputs) {
        return last;
    }

    for (ix, stmt) in block.iter().enumerate().skip(start + 1) {
        if !matches!(stmt.kind, StmtKind::Assign { .. } | StmtKind::Call { .. }) {
            break;
        }
        if occurrence_count(stmt, candidate) > 0 {
            last = Some(ix);
        }
        if ends_run(stmt, &inputs) {
            break;
        }
    }
    last
}

fn occurrence_count(stmt: &Stmt, candidate: &Expr) -> usize {
    let mut count = 0;
    let mut probe = |e: &Expr| {
        count += count_in_expr(e, candidate);
    };
    match &stmt.kind {
        StmtKind::Assign { target, value } => {
            visit_lvalue(target, &mut probe);
            probe(value);
        }
        StmtKind::Call { target, args, rets } => {
            if let cowc_sem::hir::CallTarget::Indirect(e) = target {
                probe(e);
            }
            for arg in args {
                probe(arg);
            }
            for ret in rets {
                visit_lvalue(ret, &mut probe);
            }
        }
        _ => {}
    }
    count
}

fn count_in_expr(e: &Expr, needle: &Expr) -> usize {
    if e == needle {
        return 1;
    }
    match &e.kind {
        ExprKind::Binary { lhs, rhs, .. } => {
            count_in_expr(lhs, needle) + count_in_expr(rhs, needle)
        }
        ExprKind::Neg(inner)
        | ExprKind::Cast(inner)
        | ExprKind::Deref(inner)
        | ExprKind::AddrOf(inner) => count_in_expr(inner, needle),
        ExprKind::Field { base, .. } => count_in_expr(base, needle),
        ExprKind::Index { base, index } => {
            count_in_expr(base, needle) + count_in_expr(index, needle)
        }
        ExprKind::Call { args, .. } => args.iter().map(|a| count_in_expr(a, needle)).sum(),
        ExprKind::CallIndirect { target, args } => {
            count_in_expr(target, needle)
                + args.iter().map(|a| count_in_expr(a, needle)).sum::<usize>()
        }
        _ => 0,
    }
}

fn visit_lvalue(target: &Expr, f: &mut dyn FnMut(&Expr)) {
    match &target.kind {
        ExprKind::Var(_) => {}
        ExprKind::Field { base, .. } => visit_lvalue(base, f),
        ExprKind::Index { base, index } => {
            visit_lvalue(base, f);
            f(index);
        }
        ExprKind::Deref(e) => f(e),
        _ => f(target),
    }
}

/// Calls and stores to a candidate input end the reuse window. The
/// statement itself was already checked for occurrences, so the window is
/// inclusive of it.
fn ends_run(stmt: &Stmt, inputs: &FxHashSet<SymId>) -> bool {
    if crate::stmt_has_call(stmt) {
        return true;
    }
    match &stmt.kind {
        StmtKind::Assign { target, .. } => match target.kind {
            ExprKind::Var(sym) => inputs.contains(&sym),
            _ => false,
        },
        StmtKind::Call { .. } => true,
        _ => true,
    }
}
