//! Dead code and dead variable elimination.
//!
//! - `if` arms with constant-false conditions disappear; a constant-true
//!   arm swallows everything after it.
//! - `while` loops with a constant-false condition disappear.
//! - Statements following `break`, `continue` or `return` in the same
//!   block are unreachable and disappear.
//! - Assignments to a local whose future reads do not exist disappear.
//!   Globals are never touched: externally linked code may read them.

use cowc_sem::hir::{Block, CondKind, Expr, ExprKind, Stmt, StmtKind};
use cowc_sem::SymId;
use rustc_hash::FxHashSet;

use crate::PassCtx;

pub(crate) fn run(ctx: &mut PassCtx, block: &mut Block) -> usize {
    let mut changes = simplify_block(block);
    changes += dead_vars(ctx, block);
    changes
}

fn simplify_block(block: &mut Block) -> usize {
    let mut changes = 0;
    let mut out: Vec<Stmt> = Vec::with_capacity(block.len());

    for mut stmt in block.drain(..) {
        // Nested blocks first, so constant arms inside them resolve.
        match &mut stmt.kind {
            StmtKind::If { arms, else_body } => {
                for (_, body) in arms.iter_mut() {
                    changes += simplify_block(body);
                }
                if let Some(body) = else_body {
                    changes += simplify_block(body);
                }
            }
            StmtKind::While { body, .. } | StmtKind::Loop { body } => {
                changes += simplify_block(body);
            }
            StmtKind::Case { arms, else_body, .. } => {
                for (_, body) in arms.iter_mut() {
                    changes += simplify_block(body);
                }
                if let Some(body) = else_body {
                    changes += simplify_block(body);
                }
            }
            _ => {}
        }

        match stmt.kind {
            StmtKind::If { arms, else_body } => {
                let pos = stmt.pos;
                let mut kept = Vec::with_capacity(arms.len());
                let mut taken: Option<Block> = None;
                for (cond, body) in arms {
                    match cond.kind {
                        CondKind::Const(false) => changes += 1,
                        CondKind::Const(true) => {
                            changes += 1;
                            taken = Some(body);
                            break;
                        }
                        _ => kept.push((cond, body)),
                    }
                }
                match (kept.is_empty(), taken) {
                    // The first live arm is unconditionally taken.
                    (true, Some(body)) => out.extend(body),
                    (false, Some(body)) => out.push(Stmt {
                        kind: StmtKind::If {
                            arms: kept,
                            else_body: Some(body),
                        },
                        pos,
                    }),
                    // Every arm was constant-false.
                    (true, None) => {
                        if let Some(body) = else_body {
                            out.extend(body);
                        }
                    }
                    (false, None) => out.push(Stmt {
                        kind: StmtKind::If {
                            arms: kept,
                            else_body,
                        },
                        pos,
                    }),
                }
            }
            StmtKind::While { ref cond, .. } if cond.kind == CondKind::Const(false) => {
                changes += 1;
            }
            _ => out.push(stmt),
        }
    }

    // Unreachable statements after a terminator.
    if let Some(ix) = out.iter().position(is_terminator) {
        if ix + 1 < out.len() {
            changes += out.len() - ix - 1;
            out.truncate(ix + 1);
        }
    }

    *block = out;
    changes
}

fn is_terminator(stmt: &Stmt) -> bool {
    matches!(
        stmt.kind,
        StmtKind::Break | StmtKind::Continue | StmtKind::Return
    )
}

/// Remove assignments to private locals that are never read afterwards.
/// Return slots are observable by callers and stay.
fn dead_vars(ctx: &PassCtx, block: &mut Block) -> usize {
    let mut reads = FxHashSet::default();
    crate::block_reads(block, &mut reads);
    remove_dead_stores(ctx, block, &reads)
}

fn remove_dead_stores(ctx: &PassCtx, block: &mut Block, reads: &FxHashSet<SymId>) -> usize {
    let mut changes = 0;
    block.retain(|stmt| match &stmt.kind {
        StmtKind::Assign { target, value } => {
            if is_dead_target(ctx, target, reads) && value.kind.is_pure() {
                changes += 1;
                false
            } else {
                true
            }
        }
        _ => true,
    });
    for stmt in block.iter_mut() {
        match &mut stmt.kind {
            StmtKind::If { arms, else_body } => {
                for (_, body) in arms.iter_mut() {
                    changes += remove_dead_stores(ctx, body, reads);
                }
                if let Some(body) = else_body {
                    changes += remove_dead_stores(ctx, body, reads);
                }
            }
            StmtKind::While { body, .. } | StmtKind::Loop { body } => {
                changes += remove_dead_stores(ctx, body, reads);
            }
            StmtKind::Case { arms, else_body, .. } => {
                for (_, body) in arms.iter_mut() {
                    changes += remove_dead_stores(ctx, body, reads);
                }
                if let Some(body) = else_body {
                    changes += remove_dead_stores(ctx, body, reads);
                }
            }
            _ => {}
        }
    }
    changes
}

fn is_dead_target(ctx: &PassCtx, target: &Expr, reads: &FxHashSet<SymId>) -> bool {
    match target.kind {
        ExprKind::Var(sym) => {
            ctx.is_private_local(sym) && !ctx.pinned.contains(&sym) && !reads.contains(&sym)
        }
        _ => false,
    }
}
