//! Constant folding, algebraic simplification, strength reduction,
//! reassociation, and boolean/comparison simplification.
//!
//! All of these are local rewrites on expression and condition trees, so
//! they share one post-order walk. Arithmetic wraps 2's-complement at the
//! operand's declared width, matching what the generated code does.

use cowc_sem::hir::{BinOp, Block, CmpOp, Cond, CondKind, Expr, ExprKind, StmtKind};
use cowc_sem::types::{wrap_value, T_U8};

use crate::PassCtx;

pub(crate) fn run(ctx: &mut PassCtx, block: &mut Block) -> usize {
    let mut changes = 0;
    fold_block(ctx, block, &mut changes);
    changes
}

fn fold_block(ctx: &mut PassCtx, block: &mut Block, changes: &mut usize) {
    for stmt in block.iter_mut() {
        crate::visit_exprs_mut(stmt, &mut |e| fold_expr(ctx, e, changes));
        match &mut stmt.kind {
            StmtKind::If { arms, else_body } => {
                for (cond, body) in arms.iter_mut() {
                    fold_cond(ctx, cond, changes);
                    fold_block(ctx, body, changes);
                }
                if let Some(body) = else_body {
                    fold_block(ctx, body, changes);
                }
            }
            StmtKind::While { cond, body } => {
                fold_cond(ctx, cond, changes);
                fold_block(ctx, body, changes);
            }
            StmtKind::Loop { body } => fold_block(ctx, body, changes),
            StmtKind::Case { arms, else_body, .. } => {
                for (_, body) in arms.iter_mut() {
                    fold_block(ctx, body, changes);
                }
                if let Some(body) = else_body {
                    fold_block(ctx, body, changes);
                }
            }
            _ => {}
        }
    }
}

/// Width and signedness for wrapping; pointers and interfaces behave as
/// unsigned words.
fn repr(ctx: &PassCtx, e: &Expr) -> (bool, u32) {
    ctx.types.int_info(e.ty).unwrap_or((false, 2))
}

fn fold_expr(ctx: &PassCtx, e: &mut Expr, changes: &mut usize) {
    // Children first.
    match &mut e.kind {
        ExprKind::Binary { lhs, rhs, .. } => {
            fold_expr(ctx, lhs, changes);
            fold_expr(ctx, rhs, changes);
        }
        ExprKind::Neg(inner) | ExprKind::Cast(inner) => fold_expr(ctx, inner, changes),
        ExprKind::Field { base, .. } => fold_expr(ctx, base, changes),
        ExprKind::Index { base, index } => {
            fold_expr(ctx, base, changes);
            fold_expr(ctx, index, changes);
        }
        ExprKind::Deref(inner) => fold_expr(ctx, inner, changes),
        ExprKind::Call { args, .. } => {
            for arg in args {
                fold_expr(ctx, arg, changes);
            }
        }
        ExprKind::CallIndirect { target, args } => {
            fold_expr(ctx, target, changes);
            for arg in args {
                fold_expr(ctx, arg, changes);
            }
        }
        _ => {}
    }

    if let Some(new_kind) = rewrite(ctx, e) {
        e.kind = new_kind;
        *changes += 1;
        // A rewrite can expose another (e.g. reassociation then folding).
        fold_expr(ctx, e, changes);
    }
}

/// One local rewrite step, or `None` when the node is already minimal.
fn rewrite(ctx: &PassCtx, e: &Expr) -> Option<ExprKind> {
    let (signed, width) = repr(ctx, e);
    match &e.kind {
        ExprKind::Neg(inner) => {
            let v = inner.as_int()?;
            Some(ExprKind::Int(wrap_value(v.wrapping_neg(), signed, width)))
        }
        ExprKind::Cast(inner) => {
            let v = inner.as_int()?;
            Some(ExprKind::Int(wrap_value(v, signed, width)))
        }
        ExprKind::Binary { op, lhs, rhs } => rewrite_binary(ctx, e, *op, lhs, rhs),
        _ => None,
    }
}

fn rewrite_binary(
    ctx: &PassCtx,
    e: &Expr,
    op: BinOp,
    lhs: &Expr,
    rhs: &Expr,
) -> Option<ExprKind> {
    let (signed, width) = repr(ctx, e);

    // Pure-operator nodes with all-constant operands fold outright.
    if let (Some(l), Some(r)) = (lhs.as_int(), rhs.as_int()) {
        if let Some(v) = eval(op, l, r, signed, width) {
            return Some(ExprKind::Int(v));
        }
    }

    // Constants group to the right for commutative operators.
    if lhs.as_int().is_some() && rhs.as_int().is_none() && commutative(op) {
        return Some(ExprKind::Binary {
            op,
            lhs: Box::new(rhs.clone()),
            rhs: Box::new(lhs.clone()),
        });
    }

    // Reassociation: (a op c1) op c2 => a op (c1 op c2).
    if let (Some(c2), ExprKind::Binary { op: inner_op, lhs: a, rhs: inner_rhs }) =
        (rhs.as_int(), &lhs.kind)
    {
        if *inner_op == op && commutative(op) {
            if let Some(c1) = inner_rhs.as_int() {
                let folded = eval(op, c1, c2, signed, width)?;
                return Some(ExprKind::Binary {
                    op,
                    lhs: a.clone(),
                    rhs: Box::new(Expr::int(folded, rhs.ty, rhs.pos)),
                });
            }
        }
    }

    let rc = rhs.as_int();
    let pure_l = lhs.kind.is_pure();

    match (op, rc) {
        // Identities.
        (BinOp::Add | BinOp::Sub | BinOp::Or | BinOp::Xor, Some(0)) => Some(lhs.kind.clone()),
        (BinOp::Shl | BinOp::Shr, Some(0)) => Some(lhs.kind.clone()),
        (BinOp::Mul | BinOp::Div, Some(1)) => Some(lhs.kind.clone()),
        // Annihilators; the left side must be pure to vanish.
        (BinOp::Mul | BinOp::And, Some(0)) if pure_l => Some(ExprKind::Int(0)),
        // x * 2 prefers x + x when x is cheap to re-evaluate.
        (BinOp::Mul, Some(2)) if is_cheap(lhs) => Some(ExprKind::Binary {
            op: BinOp::Add,
            lhs: Box::new(lhs.clone()),
            rhs: Box::new(lhs.clone()),
        }),
        // Strength reduction to shifts and masks.
        (BinOp::Mul, Some(c)) if c > 2 && (c as u64).is_power_of_two() => {
            Some(shift_by(BinOp::Shl, lhs, (c as u64).trailing_zeros(), e))
        }
        (BinOp::Div, Some(c)) if !signed && c > 1 && (c as u64).is_power_of_two() => {
            Some(shift_by(BinOp::Shr, lhs, (c as u64).trailing_zeros(), e))
        }
        (BinOp::Rem, Some(c)) if !signed && c > 0 && (c as u64).is_power_of_two() => {
            Some(ExprKind::Binary {
                op: BinOp::And,
                lhs: Box::new(lhs.clone()),
                rhs: Box::new(Expr::int(c - 1, rhs.ty, rhs.pos)),
            })
        }
        _ => {
            // x - x and x ^ x vanish when x is pure.
            if matches!(op, BinOp::Sub | BinOp::Xor) && pure_l && lhs == rhs {
                return Some(ExprKind::Int(0));
            }
            None
        }
    }
}

fn shift_by(op: BinOp, lhs: &Expr, amount: u32, e: &Expr) -> ExprKind {
    ExprKind::Binary {
        op,
        lhs: Box::new(lhs.clone()),
        rhs: Box::new(Expr::int(amount as i64, T_U8, e.pos)),
    }
}

fn commutative(op: BinOp) -> bool {
    matches!(
        op,
        BinOp::Add | BinOp::Mul | BinOp::And | BinOp::Or | BinOp::Xor
    )
}

/// A value cheap enough to compute twice instead of once-plus-spill.
fn is_cheap(e: &Expr) -> bool {
    matches!(e.kind, ExprKind::Var(_) | ExprKind::Int(_))
}

fn eval(op: BinOp, l: i64, r: i64, signed: bool, width: u32) -> Option<i64> {
    let raw = match op {
        BinOp::Add => l.wrapping_add(r),
        BinOp::Sub => l.wrapping_sub(r),
        BinOp::Mul => l.wrapping_mul(r),
        BinOp::Div | BinOp::Rem if r == 0 => return None,
        BinOp::Div => {
            if signed {
                wrap_value(l, true, width).wrapping_div(wrap_value(r, true, width))
            } else {
                (unsigned(l, width) / unsigned(r, width)) as i64
            }
        }
        BinOp::Rem => {
            if signed {
                wrap_value(l, true, width).wrapping_rem(wrap_value(r, true, width))
            } else {
                (unsigned(l, width) % unsigned(r, width)) as i64
            }
        }
        BinOp::And => l & r,
        BinOp::Or => l | r,
        BinOp::Xor => l ^ r,
        BinOp::Shl => l.wrapping_shl(r as u32 & 63),
        BinOp::Shr => {
            if signed {
                wrap_value(l, true, width) >> (r as u32 & 63)
            } else {
                (unsigned(l, width) >> (r as u32 & 63)) as i64
            }
        }
    };
    Some(wrap_value(raw, signed, width))
}

fn unsigned(v: i64, width: u32) -> u64 {
    wrap_value(v, false, width) as u64
}

// ---- conditions ----

pub(crate) fn fold_cond(ctx: &PassCtx, cond: &mut Cond, changes: &mut usize) {
    // Children first.
    match &mut cond.kind {
        CondKind::Cmp { lhs, rhs, .. } => {
            fold_expr(ctx, lhs, changes);
            fold_expr(ctx, rhs, changes);
        }
        CondKind::And(a, b) | CondKind::Or(a, b) => {
            fold_cond(ctx, a, changes);
            fold_cond(ctx, b, changes);
        }
        CondKind::Not(inner) => fold_cond(ctx, inner, changes),
        CondKind::Const(_) => {}
    }

    if let Some(new_kind) = rewrite_cond(ctx, cond) {
        cond.kind = new_kind;
        *changes += 1;
        fold_cond(ctx, cond, changes);
    }
}

fn rewrite_cond(ctx: &PassCtx, cond: &Cond) -> Option<CondKind> {
    match &cond.kind {
        CondKind::Not(inner) => match &inner.kind {
            // not not x => x
            CondKind::Not(x) => Some(x.kind.clone()),
            // not (a == b) => a != b, and duals.
            CondKind::Cmp { op, lhs, rhs } => Some(CondKind::Cmp {
                op: op.negated(),
                lhs: lhs.clone(),
                rhs: rhs.clone(),
            }),
            CondKind::Const(b) => Some(CondKind::Const(!b)),
            _ => None,
        },
        CondKind::And(a, b) => match (&a.kind, &b.kind) {
            (CondKind::Const(true), _) => Some(b.kind.clone()),
            (CondKind::Const(false), _) => Some(CondKind::Const(false)),
            (_, CondKind::Const(true)) => Some(a.kind.clone()),
            (_, CondKind::Const(false)) if cond_is_pure(a) => Some(CondKind::Const(false)),
            _ => None,
        },
        CondKind::Or(a, b) => match (&a.kind, &b.kind) {
            (CondKind::Const(false), _) => Some(b.kind.clone()),
            (CondKind::Const(true), _) => Some(CondKind::Const(true)),
            (_, CondKind::Const(false)) => Some(a.kind.clone()),
            (_, CondKind::Const(true)) if cond_is_pure(a) => Some(CondKind::Const(true)),
            _ => None,
        },
        CondKind::Cmp { op, lhs, rhs } => {
            // Constant-constant comparisons decide now.
            if let (Some(l), Some(r)) = (lhs.as_int(), rhs.as_int()) {
                let (signed, width) = repr(ctx, lhs);
                return Some(CondKind::Const(compare(*op, l, r, signed, width)));
            }
            // x == x and friends, for pure x.
            if lhs == rhs && lhs.kind.is_pure() {
                return Some(CondKind::Const(matches!(
                    op,
                    CmpOp::Eq | CmpOp::Le | CmpOp::Ge
                )));
            }
            // A constant left operand moves right, canonicalizing the
            // shape the code generator handles best.
            if lhs.as_int().is_some() && rhs.as_int().is_none() {
                return Some(CondKind::Cmp {
                    op: op.swapped(),
                    lhs: rhs.clone(),
                    rhs: lhs.clone(),
                });
            }
            None
        }
        _ => None,
    }
}

fn compare(op: CmpOp, l: i64, r: i64, signed: bool, width: u32) -> bool {
    if signed {
        let l = wrap_value(l, true, width);
        let r = wrap_value(r, true, width);
        match op {
            CmpOp::Eq => l == r,
            CmpOp::Ne => l != r,
            CmpOp::Lt => l < r,
            CmpOp::Le => l <= r,
            CmpOp::Gt => l > r,
            CmpOp::Ge => l >= r,
        }
    } else {
        let l = unsigned(l, width);
        let r = unsigned(r, width);
        match op {
            CmpOp::Eq => l == r,
            CmpOp::Ne => l != r,
            CmpOp::Lt => l < r,
            CmpOp::Le => l <= r,
            CmpOp::Gt => l > r,
            CmpOp::Ge => l >= r,
        }
    }
}

pub(crate) fn cond_is_pure(cond: &Cond) -> bool {
    match &cond.kind {
        CondKind::Cmp { lhs, rhs, .. } => lhs.kind.is_pure() && rhs.kind.is_pure(),
        CondKind::And(a, b) | CondKind::Or(a, b) => cond_is_pure(a) && cond_is_pure(b),
        CondKind::Not(inner) => cond_is_pure(inner),
        CondKind::Const(_) => true,
    }
}
