//! cowc-opt - The fixpoint AST optimizer.
//!
//! A fixed set of passes runs in a loop until one complete sweep reports
//! zero changes. Passes preserve types and positions on every replacement
//! node, and treat calls, stores through pointers and inline assembly as
//! barriers. Scalar locals can never have their address taken, so value
//! propagation through them is exact.
//!
//! Pass order inside one sweep matters only for convergence speed; the
//! fixpoint makes the result order-independent.

mod cse;
mod dce;
mod fold;
mod loops;
mod propagate;

use cowc_sem::hir::{Block, CallTarget, Cond, CondKind, Expr, ExprKind, Program, Stmt, StmtKind};
use cowc_sem::symtab::{SymKind, SymbolTable};
use cowc_sem::{SubId, SymId, TypeTable};
use rustc_hash::FxHashSet;

/// Guard against a pass that never converges; generously above anything a
/// real program needs.
const MAX_SWEEPS: usize = 64;

/// Run every pass to fixpoint. Returns the total number of changes, which
/// is zero when the input was already optimal (idempotence).
pub fn optimize(program: &mut Program) -> usize {
    let mut total = 0;
    for sweep in 0..MAX_SWEEPS {
        let mut changes = 0;
        changes += run_pass(program, "fold", fold::run);
        changes += run_pass(program, "propagate", propagate::run);
        changes += run_pass(program, "dce", dce::run);
        changes += run_pass(program, "cse", cse::run);
        changes += run_pass(program, "loops", loops::run);
        log::debug!("optimizer sweep {}: {} changes", sweep, changes);
        if changes == 0 {
            break;
        }
        total += changes;
    }
    total
}

fn run_pass(
    program: &mut Program,
    name: &str,
    pass: fn(&mut PassCtx, &mut Block) -> usize,
) -> usize {
    let Program {
        types,
        syms,
        subs,
        captured,
        tmp_name,
        ..
    } = program;

    let mut changes = 0;
    for (ix, sub) in subs.iter_mut().enumerate() {
        let mut body = std::mem::take(&mut sub.body);
        let pinned: FxHashSet<SymId> = sub.rets.iter().copied().collect();
        let mut ctx = PassCtx {
            types: &*types,
            syms: &mut *syms,
            captured: &*captured,
            tmp_name: *tmp_name,
            sub: SubId(ix as u32),
            new_locals: Vec::new(),
            pinned,
        };
        changes += pass(&mut ctx, &mut body);
        sub.locals.extend(ctx.new_locals);
        sub.body = body;
    }
    if changes > 0 {
        log::debug!("pass {}: {} changes", name, changes);
    }
    changes
}

/// Shared state for one pass over one subroutine body.
pub(crate) struct PassCtx<'a> {
    pub types: &'a TypeTable,
    pub syms: &'a mut SymbolTable,
    pub captured: &'a FxHashSet<SymId>,
    pub tmp_name: cowc_util::Name,
    pub sub: SubId,
    pub new_locals: Vec<SymId>,
    /// Return slots of the current subroutine; stores into these are
    /// observable by callers and never dead.
    pub pinned: FxHashSet<SymId>,
}

impl<'a> PassCtx<'a> {
    /// Mint a fresh local for a common subexpression or hoisted value.
    pub fn fresh_temp(&mut self, ty: cowc_sem::TypeId, pos: cowc_util::Pos) -> SymId {
        let sym = self.syms.add(
            self.tmp_name,
            SymKind::Var {
                ty,
                owner: Some(self.sub),
                init: None,
            },
            pos,
        );
        self.new_locals.push(sym);
        sym
    }

    /// A local scalar of the current subroutine that no nested subroutine
    /// captures: invisible to calls and pointer stores.
    pub fn is_private_local(&self, sym: SymId) -> bool {
        self.syms.var_owner(sym) == Some(self.sub) && !self.captured.contains(&sym)
    }
}

// ---- shared tree walkers ----

/// Record every variable read by an expression.
pub(crate) fn expr_reads(e: &Expr, out: &mut FxHashSet<SymId>) {
    match &e.kind {
        ExprKind::Var(sym) => {
            out.insert(*sym);
        }
        ExprKind::Int(_) | ExprKind::Str(_) | ExprKind::SubAddr(_) => {}
        ExprKind::Field { base, .. } => expr_reads(base, out),
        ExprKind::Index { base, index } => {
            expr_reads(base, out);
            expr_reads(index, out);
        }
        ExprKind::Deref(e) | ExprKind::AddrOf(e) | ExprKind::Neg(e) | ExprKind::Cast(e) => {
            expr_reads(e, out)
        }
        ExprKind::Binary { lhs, rhs, .. } => {
            expr_reads(lhs, out);
            expr_reads(rhs, out);
        }
        ExprKind::Call { args, .. } => {
            for arg in args {
                expr_reads(arg, out);
            }
        }
        ExprKind::CallIndirect { target, args } => {
            expr_reads(target, out);
            for arg in args {
                expr_reads(arg, out);
            }
        }
    }
}

pub(crate) fn cond_reads(cond: &Cond, out: &mut FxHashSet<SymId>) {
    match &cond.kind {
        CondKind::Cmp { lhs, rhs, .. } => {
            expr_reads(lhs, out);
            expr_reads(rhs, out);
        }
        CondKind::And(a, b) | CondKind::Or(a, b) => {
            cond_reads(a, out);
            cond_reads(b, out);
        }
        CondKind::Not(inner) => cond_reads(inner, out),
        CondKind::Const(_) => {}
    }
}

/// Variables read anywhere in a statement, including inside assignment
/// targets (an index or deref in a target is a read).
pub(crate) fn stmt_reads(stmt: &Stmt, out: &mut FxHashSet<SymId>) {
    match &stmt.kind {
        StmtKind::Assign { target, value } => {
            lvalue_reads(target, out);
            expr_reads(value, out);
        }
        StmtKind::Call { target, args, rets } => {
            if let CallTarget::Indirect(e) = target {
                expr_reads(e, out);
            }
            for arg in args {
                expr_reads(arg, out);
            }
            for ret in rets {
                lvalue_reads(ret, out);
            }
        }
        StmtKind::If { arms, else_body } => {
            for (cond, body) in arms {
                cond_reads(cond, out);
                block_reads(body, out);
            }
            if let Some(body) = else_body {
                block_reads(body, out);
            }
        }
        StmtKind::While { cond, body } => {
            cond_reads(cond, out);
            block_reads(body, out);
        }
        StmtKind::Loop { body } => block_reads(body, out),
        StmtKind::Case {
            scrutinee,
            arms,
            else_body,
        } => {
            expr_reads(scrutinee, out);
            for (_, body) in arms {
                block_reads(body, out);
            }
            if let Some(body) = else_body {
                block_reads(body, out);
            }
        }
        StmtKind::Asm { parts } => {
            for part in parts {
                if let cowc_sem::hir::AsmChunk::Var(sym) = part {
                    out.insert(*sym);
                }
            }
        }
        StmtKind::Break | StmtKind::Continue | StmtKind::Return => {}
    }
}

/// Reads performed while computing an lvalue's address. A plain `Var`
/// target is a pure store, not a read.
pub(crate) fn lvalue_reads(target: &Expr, out: &mut FxHashSet<SymId>) {
    match &target.kind {
        ExprKind::Var(_) => {}
        ExprKind::Field { base, .. } => lvalue_reads(base, out),
        ExprKind::Index { base, index } => {
            lvalue_reads(base, out);
            expr_reads(index, out);
        }
        ExprKind::Deref(e) => expr_reads(e, out),
        _ => expr_reads(target, out),
    }
}

pub(crate) fn block_reads(block: &[Stmt], out: &mut FxHashSet<SymId>) {
    for stmt in block {
        stmt_reads(stmt, out);
    }
}

/// Variables directly assigned (as a whole) anywhere in a block,
/// including loop and branch bodies and call return targets.
pub(crate) fn block_assigned(block: &[Stmt], out: &mut FxHashSet<SymId>) {
    for stmt in block {
        match &stmt.kind {
            StmtKind::Assign { target, .. } => {
                if let ExprKind::Var(sym) = target.kind {
                    out.insert(sym);
                }
            }
            StmtKind::Call { rets, .. } => {
                for ret in rets {
                    if let ExprKind::Var(sym) = ret.kind {
                        out.insert(sym);
                    }
                }
            }
            StmtKind::If { arms, else_body } => {
                for (_, body) in arms {
                    block_assigned(body, out);
                }
                if let Some(body) = else_body {
                    block_assigned(body, out);
                }
            }
            StmtKind::While { body, .. } | StmtKind::Loop { body } => block_assigned(body, out),
            StmtKind::Case { arms, else_body, .. } => {
                for (_, body) in arms {
                    block_assigned(body, out);
                }
                if let Some(body) = else_body {
                    block_assigned(body, out);
                }
            }
            StmtKind::Asm { parts } => {
                // Inline assembly may write any named variable.
                for part in parts {
                    if let cowc_sem::hir::AsmChunk::Var(sym) = part {
                        out.insert(*sym);
                    }
                }
            }
            StmtKind::Break | StmtKind::Continue | StmtKind::Return => {}
        }
    }
}

pub(crate) fn block_has_call(block: &[Stmt]) -> bool {
    block.iter().any(stmt_has_call)
}

pub(crate) fn stmt_has_call(stmt: &Stmt) -> bool {
    match &stmt.kind {
        StmtKind::Call { .. } => true,
        StmtKind::Assign { target, value } => target.kind.has_call() || value.kind.has_call(),
        StmtKind::If { arms, else_body } => {
            arms.iter()
                .any(|(c, b)| cond_has_call(c) || block_has_call(b))
                || else_body.as_ref().map(|b| block_has_call(b)).unwrap_or(false)
        }
        StmtKind::While { cond, body } => cond_has_call(cond) || block_has_call(body),
        StmtKind::Loop { body } => block_has_call(body),
        StmtKind::Case {
            scrutinee,
            arms,
            else_body,
        } => {
            scrutinee.kind.has_call()
                || arms.iter().any(|(_, b)| block_has_call(b))
                || else_body.as_ref().map(|b| block_has_call(b)).unwrap_or(false)
        }
        StmtKind::Asm { .. } => false,
        StmtKind::Break | StmtKind::Continue | StmtKind::Return => false,
    }
}

pub(crate) fn cond_has_call(cond: &Cond) -> bool {
    match &cond.kind {
        CondKind::Cmp { lhs, rhs, .. } => lhs.kind.has_call() || rhs.kind.has_call(),
        CondKind::And(a, b) | CondKind::Or(a, b) => cond_has_call(a) || cond_has_call(b),
        CondKind::Not(inner) => cond_has_call(inner),
        CondKind::Const(_) => false,
    }
}

pub(crate) fn block_has_asm(block: &[Stmt]) -> bool {
    block.iter().any(|stmt| match &stmt.kind {
        StmtKind::Asm { .. } => true,
        StmtKind::If { arms, else_body } => {
            arms.iter().any(|(_, b)| block_has_asm(b))
                || else_body.as_ref().map(|b| block_has_asm(b)).unwrap_or(false)
        }
        StmtKind::While { body, .. } | StmtKind::Loop { body } => block_has_asm(body),
        StmtKind::Case { arms, else_body, .. } => {
            arms.iter().any(|(_, b)| block_has_asm(b))
                || else_body.as_ref().map(|b| block_has_asm(b)).unwrap_or(false)
        }
        _ => false,
    })
}

/// Apply `f` to every expression in a statement, in evaluation order where
/// it matters. Conditions are visited through their comparison operands.
pub(crate) fn visit_exprs_mut(stmt: &mut Stmt, f: &mut dyn FnMut(&mut Expr)) {
    match &mut stmt.kind {
        StmtKind::Assign { target, value } => {
            visit_lvalue_exprs_mut(target, f);
            f(value);
        }
        StmtKind::Call { target, args, rets } => {
            if let CallTarget::Indirect(e) = target {
                f(e);
            }
            for arg in args {
                f(arg);
            }
            for ret in rets {
                visit_lvalue_exprs_mut(ret, f);
            }
        }
        StmtKind::If { arms, .. } => {
            for (cond, _) in arms {
                visit_cond_exprs_mut(cond, f);
            }
        }
        StmtKind::While { cond, .. } => visit_cond_exprs_mut(cond, f),
        StmtKind::Case { scrutinee, .. } => f(scrutinee),
        StmtKind::Loop { .. }
        | StmtKind::Break
        | StmtKind::Continue
        | StmtKind::Return
        | StmtKind::Asm { .. } => {}
    }
}

/// Visit the read positions inside an lvalue: index expressions, deref
/// operands and field bases, but never the stored-to variable itself.
pub(crate) fn visit_lvalue_exprs_mut(target: &mut Expr, f: &mut dyn FnMut(&mut Expr)) {
    match &mut target.kind {
        ExprKind::Var(_) => {}
        ExprKind::Field { base, .. } => visit_lvalue_exprs_mut(base, f),
        ExprKind::Index { base, index } => {
            visit_lvalue_exprs_mut(base, f);
            f(index);
        }
        ExprKind::Deref(e) => f(e),
        _ => f(target),
    }
}

pub(crate) fn visit_cond_exprs_mut(cond: &mut Cond, f: &mut dyn FnMut(&mut Expr)) {
    match &mut cond.kind {
        CondKind::Cmp { lhs, rhs, .. } => {
            f(lhs);
            f(rhs);
        }
        CondKind::And(a, b) | CondKind::Or(a, b) => {
            visit_cond_exprs_mut(a, f);
            visit_cond_exprs_mut(b, f);
        }
        CondKind::Not(inner) => visit_cond_exprs_mut(inner, f),
        CondKind::Const(_) => {}
    }
}

/// Replace every occurrence of `needle` inside `e` with a variable read.
/// Returns the number of replacements.
pub(crate) fn replace_expr(e: &mut Expr, needle: &Expr, replacement: &Expr) -> usize {
    if e == needle {
        let pos = e.pos;
        *e = Expr {
            kind: replacement.kind.clone(),
            ty: e.ty,
            pos,
        };
        return 1;
    }
    let mut count = 0;
    match &mut e.kind {
        ExprKind::Int(_) | ExprKind::Str(_) | ExprKind::Var(_) | ExprKind::SubAddr(_) => {}
        ExprKind::Field { base, .. } => count += replace_expr(base, needle, replacement),
        ExprKind::Index { base, index } => {
            count += replace_expr(base, needle, replacement);
            count += replace_expr(index, needle, replacement);
        }
        ExprKind::Deref(inner)
        | ExprKind::AddrOf(inner)
        | ExprKind::Neg(inner)
        | ExprKind::Cast(inner) => count += replace_expr(inner, needle, replacement),
        ExprKind::Binary { lhs, rhs, .. } => {
            count += replace_expr(lhs, needle, replacement);
            count += replace_expr(rhs, needle, replacement);
        }
        ExprKind::Call { args, .. } => {
            for arg in args {
                count += replace_expr(arg, needle, replacement);
            }
        }
        ExprKind::CallIndirect { target, args } => {
            count += replace_expr(target, needle, replacement);
            for arg in args {
                count += replace_expr(arg, needle, replacement);
            }
        }
    }
    count
}
