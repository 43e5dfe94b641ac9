//! Constant and copy propagation with dead-store elimination.
//!
//! A forward walk tracks, per scalar variable, either a known constant or
//! a variable it currently copies. Scalars cannot have their address
//! taken, so the only invalidation points are direct reassignment, calls
//! (for globals and captured locals), inline assembly (for everything),
//! and control-flow joins. Loop bodies invalidate every variable they
//! assign before the loop condition is analyzed, so a loop whose exit
//! depends on a body-updated variable is never folded away.

use cowc_sem::hir::{Block, CallTarget, Cond, Expr, ExprKind, Stmt, StmtKind};
use cowc_sem::SymId;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::PassCtx;

#[derive(Clone, Copy, Debug, PartialEq)]
enum Val {
    Const(i64),
    Copy(SymId),
}

type Env = FxHashMap<SymId, Val>;

pub(crate) fn run(ctx: &mut PassCtx, block: &mut Block) -> usize {
    let mut changes = 0;
    let mut env = Env::default();
    process_block(ctx, block, &mut env, &mut changes);
    changes
}

/// Returns true if the block ends in a terminator at its own level.
fn process_block(ctx: &PassCtx, block: &mut Block, env: &mut Env, changes: &mut usize) -> bool {
    let drained: Vec<Stmt> = block.drain(..).collect();
    let mut keep = Vec::with_capacity(drained.len());
    let mut terminated = false;
    let mut iter = drained.into_iter();
    loop {
        let Some(mut stmt) = iter.next() else { break };
        let remove = process_stmt(ctx, &mut stmt, env, changes);
        let is_term = matches!(
            stmt.kind,
            StmtKind::Break | StmtKind::Continue | StmtKind::Return
        );
        if remove {
            *changes += 1;
        } else {
            keep.push(stmt);
        }
        if is_term {
            // Statements past a terminator are dce's business; stop
            // analyzing so their stores don't pollute the environment.
            terminated = true;
            keep.extend(iter);
            break;
        }
    }
    *block = keep;
    terminated
}

/// Process one statement; returns true when it is a dead store to remove.
fn process_stmt(ctx: &PassCtx, stmt: &mut Stmt, env: &mut Env, changes: &mut usize) -> bool {
    match &mut stmt.kind {
        StmtKind::Assign { target, value } => {
            // Substitute reads first: the target's index/deref positions
            // and the whole value.
            crate::visit_lvalue_exprs_mut(target, &mut |e| subst(ctx, e, env, changes));
            subst(ctx, value, env, changes);

            if value.kind.has_call() {
                kill_nonprivate(ctx, env);
            }

            if let ExprKind::Var(x) = target.kind {
                let prior = env.get(&x).copied();
                // Dead store: the variable already holds this value.
                match &value.kind {
                    ExprKind::Int(v) if prior == Some(Val::Const(*v)) => return true,
                    ExprKind::Var(y) if prior == Some(Val::Copy(*y)) => return true,
                    _ => {}
                }
                invalidate(env, x);
                if ctx.types.is_scalar(ctx.syms.var_type(x).unwrap_or(cowc_sem::types::T_U8)) {
                    match &value.kind {
                        ExprKind::Int(v) => {
                            env.insert(x, Val::Const(*v));
                        }
                        ExprKind::Var(y)
                            if ctx.is_private_local(x) && ctx.is_private_local(*y) =>
                        {
                            env.insert(x, Val::Copy(*y));
                        }
                        _ => {}
                    }
                }
            }
            false
        }
        StmtKind::Call { target, args, rets } => {
            if let CallTarget::Indirect(e) = target {
                subst(ctx, e, env, changes);
            }
            for arg in args {
                subst(ctx, arg, env, changes);
            }
            kill_nonprivate(ctx, env);
            for ret in rets {
                crate::visit_lvalue_exprs_mut(ret, &mut |e| subst(ctx, e, env, changes));
                if let ExprKind::Var(x) = ret.kind {
                    invalidate(env, x);
                }
            }
            false
        }
        StmtKind::If { arms, else_body } => {
            for (cond, _) in arms.iter_mut() {
                subst_cond(ctx, cond, env, changes);
                if crate::cond_has_call(cond) {
                    kill_nonprivate(ctx, env);
                }
            }
            let entry = env.clone();
            let mut exits: Vec<Env> = Vec::new();
            for (_, body) in arms.iter_mut() {
                let mut arm_env = entry.clone();
                if !process_block(ctx, body, &mut arm_env, changes) {
                    exits.push(arm_env);
                }
            }
            match else_body {
                Some(body) => {
                    let mut else_env = entry.clone();
                    if !process_block(ctx, body, &mut else_env, changes) {
                        exits.push(else_env);
                    }
                }
                None => exits.push(entry.clone()),
            }
            *env = join(exits, entry);
            false
        }
        StmtKind::While { cond, body } => {
            // Everything the body assigns is unknown when the condition
            // runs again.
            kill_loop_effects(ctx, body, env);
            subst_cond(ctx, cond, env, changes);
            if crate::cond_has_call(cond) {
                kill_nonprivate(ctx, env);
            }
            let mut body_env = env.clone();
            process_block(ctx, body, &mut body_env, changes);
            false
        }
        StmtKind::Loop { body } => {
            kill_loop_effects(ctx, body, env);
            let mut body_env = env.clone();
            process_block(ctx, body, &mut body_env, changes);
            false
        }
        StmtKind::Case {
            scrutinee,
            arms,
            else_body,
        } => {
            subst(ctx, scrutinee, env, changes);
            if scrutinee.kind.has_call() {
                kill_nonprivate(ctx, env);
            }
            let entry = env.clone();
            let mut exits: Vec<Env> = Vec::new();
            for (_, body) in arms.iter_mut() {
                let mut arm_env = entry.clone();
                if !process_block(ctx, body, &mut arm_env, changes) {
                    exits.push(arm_env);
                }
            }
            match else_body {
                Some(body) => {
                    let mut else_env = entry.clone();
                    if !process_block(ctx, body, &mut else_env, changes) {
                        exits.push(else_env);
                    }
                }
                None => exits.push(entry.clone()),
            }
            *env = join(exits, entry);
            false
        }
        StmtKind::Asm { .. } => {
            // Inline assembly can read or write anything.
            env.clear();
            false
        }
        StmtKind::Break | StmtKind::Continue | StmtKind::Return => false,
    }
}

/// Replace variable reads with their known constant or copy source.
fn subst(ctx: &PassCtx, e: &mut Expr, env: &Env, changes: &mut usize) {
    match &mut e.kind {
        ExprKind::Var(x) => {
            match env.get(x) {
                Some(Val::Const(v)) => {
                    // Only scalar reads are rewritten; the type rides along.
                    e.kind = ExprKind::Int(*v);
                    *changes += 1;
                }
                Some(Val::Copy(y)) => {
                    e.kind = ExprKind::Var(*y);
                    *changes += 1;
                }
                None => {}
            }
        }
        ExprKind::Int(_) | ExprKind::Str(_) | ExprKind::SubAddr(_) => {}
        ExprKind::Field { base, .. } => subst(ctx, base, env, changes),
        ExprKind::Index { base, index } => {
            // The base is an array lvalue, not a value read.
            subst_lvalue_positions(ctx, base, env, changes);
            subst(ctx, index, env, changes);
        }
        ExprKind::Deref(inner) | ExprKind::Neg(inner) | ExprKind::Cast(inner) => {
            subst(ctx, inner, env, changes)
        }
        ExprKind::AddrOf(inner) => subst_lvalue_positions(ctx, inner, env, changes),
        ExprKind::Binary { lhs, rhs, .. } => {
            subst(ctx, lhs, env, changes);
            subst(ctx, rhs, env, changes);
        }
        ExprKind::Call { args, .. } => {
            for arg in args {
                subst(ctx, arg, env, changes);
            }
        }
        ExprKind::CallIndirect { target, args } => {
            subst(ctx, target, env, changes);
            for arg in args {
                subst(ctx, arg, env, changes);
            }
        }
    }
}

/// Inside an lvalue only index/deref positions are value reads.
fn subst_lvalue_positions(ctx: &PassCtx, e: &mut Expr, env: &Env, changes: &mut usize) {
    match &mut e.kind {
        ExprKind::Var(_) => {}
        ExprKind::Field { base, .. } => subst_lvalue_positions(ctx, base, env, changes),
        ExprKind::Index { base, index } => {
            subst_lvalue_positions(ctx, base, env, changes);
            subst(ctx, index, env, changes);
        }
        ExprKind::Deref(inner) => subst(ctx, inner, env, changes),
        _ => subst(ctx, e, env, changes),
    }
}

fn subst_cond(ctx: &PassCtx, cond: &mut Cond, env: &Env, changes: &mut usize) {
    crate::visit_cond_exprs_mut(cond, &mut |e| subst(ctx, e, env, changes));
}

/// Remove a variable and any copies sourced from it.
fn invalidate(env: &mut Env, x: SymId) {
    env.remove(&x);
    env.retain(|_, v| *v != Val::Copy(x));
}

/// A call may write globals and captured locals.
fn kill_nonprivate(ctx: &PassCtx, env: &mut Env) {
    env.retain(|sym, val| {
        ctx.is_private_local(*sym)
            && match val {
                Val::Copy(src) => ctx.is_private_local(*src),
                Val::Const(_) => true,
            }
    });
}

/// Invalidate everything a loop body can change before analyzing the
/// loop's condition or body.
fn kill_loop_effects(ctx: &PassCtx, body: &Block, env: &mut Env) {
    let mut assigned = FxHashSet::default();
    crate::block_assigned(body, &mut assigned);
    for sym in &assigned {
        invalidate(env, *sym);
    }
    if crate::block_has_call(body) {
        kill_nonprivate(ctx, env);
    }
    if crate::block_has_asm(body) {
        env.clear();
    }
}

/// Keep only bindings every surviving path agrees on.
fn join(exits: Vec<Env>, entry: Env) -> Env {
    let mut iter = exits.into_iter();
    let mut joined = match iter.next() {
        Some(first) => first,
        None => return entry,
    };
    for other in iter {
        joined.retain(|sym, val| other.get(sym) == Some(val));
    }
    joined
}
