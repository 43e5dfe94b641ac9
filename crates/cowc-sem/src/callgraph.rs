//! Call-graph construction and the no-recursion check.
//!
//! Every subroutine has static parameter, return and local storage, which
//! is only sound because no subroutine can ever have two live activations.
//! A cycle anywhere in the direct-call graph is therefore a fatal error.
//! Calls through interfaces are not statically resolvable and are outside
//! this check, as are `@extern` imports.

use cowc_util::{DiagnosticBuilder, Handler, Interner};

use crate::hir::{Block, CallTarget, Cond, CondKind, Expr, ExprKind, Program, Stmt, StmtKind, SubId};

/// Direct callees per subroutine, with one entry per call site. The code
/// generator reuses this for overlay layout and inlining counts.
pub fn direct_calls(program: &Program) -> Vec<Vec<SubId>> {
    program
        .subs
        .iter()
        .map(|sub| {
            let mut out = Vec::new();
            collect_block(&sub.body, &mut out);
            out
        })
        .collect()
}

fn collect_block(block: &Block, out: &mut Vec<SubId>) {
    for stmt in block {
        collect_stmt(stmt, out);
    }
}

fn collect_stmt(stmt: &Stmt, out: &mut Vec<SubId>) {
    match &stmt.kind {
        StmtKind::Assign { target, value } => {
            collect_expr(target, out);
            collect_expr(value, out);
        }
        StmtKind::Call { target, args, rets } => {
            if let CallTarget::Sub(sub) = target {
                out.push(*sub);
            }
            if let CallTarget::Indirect(e) = target {
                collect_expr(e, out);
            }
            for e in args.iter().chain(rets.iter()) {
                collect_expr(e, out);
            }
        }
        StmtKind::If { arms, else_body } => {
            for (cond, body) in arms {
                collect_cond(cond, out);
                collect_block(body, out);
            }
            if let Some(body) = else_body {
                collect_block(body, out);
            }
        }
        StmtKind::While { cond, body } => {
            collect_cond(cond, out);
            collect_block(body, out);
        }
        StmtKind::Loop { body } => collect_block(body, out),
        StmtKind::Case {
            scrutinee,
            arms,
            else_body,
        } => {
            collect_expr(scrutinee, out);
            for (_, body) in arms {
                collect_block(body, out);
            }
            if let Some(body) = else_body {
                collect_block(body, out);
            }
        }
        StmtKind::Break | StmtKind::Continue | StmtKind::Return | StmtKind::Asm { .. } => {}
    }
}

fn collect_cond(cond: &Cond, out: &mut Vec<SubId>) {
    match &cond.kind {
        CondKind::Cmp { lhs, rhs, .. } => {
            collect_expr(lhs, out);
            collect_expr(rhs, out);
        }
        CondKind::And(a, b) | CondKind::Or(a, b) => {
            collect_cond(a, out);
            collect_cond(b, out);
        }
        CondKind::Not(inner) => collect_cond(inner, out),
        CondKind::Const(_) => {}
    }
}

fn collect_expr(expr: &Expr, out: &mut Vec<SubId>) {
    match &expr.kind {
        ExprKind::Call { sub, args } => {
            out.push(*sub);
            for arg in args {
                collect_expr(arg, out);
            }
        }
        ExprKind::CallIndirect { target, args } => {
            collect_expr(target, out);
            for arg in args {
                collect_expr(arg, out);
            }
        }
        ExprKind::Int(_) | ExprKind::Str(_) | ExprKind::Var(_) | ExprKind::SubAddr(_) => {}
        ExprKind::Field { base, .. } => collect_expr(base, out),
        ExprKind::Index { base, index } => {
            collect_expr(base, out);
            collect_expr(index, out);
        }
        ExprKind::Deref(e) | ExprKind::AddrOf(e) | ExprKind::Neg(e) | ExprKind::Cast(e) => {
            collect_expr(e, out)
        }
        ExprKind::Binary { lhs, rhs, .. } => {
            collect_expr(lhs, out);
            collect_expr(rhs, out);
        }
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Color {
    White,
    Grey,
    Black,
}

/// Verify the direct-call graph has no cycles. A subroutine reaching
/// itself, directly or transitively, is recursion and is fatal.
pub fn check_acyclic(
    program: &Program,
    interner: &Interner,
    handler: &mut Handler,
) -> Option<()> {
    let edges = direct_calls(program);
    let mut color = vec![Color::White; program.subs.len()];

    for start in 0..program.subs.len() {
        if color[start] != Color::White {
            continue;
        }
        // Iterative DFS; the stack holds (node, next-edge-index).
        let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
        color[start] = Color::Grey;
        while let Some(&(node, next)) = stack.last() {
            if next < edges[node].len() {
                if let Some(top) = stack.last_mut() {
                    top.1 += 1;
                }
                let callee = edges[node][next].index();
                match color[callee] {
                    Color::White => {
                        color[callee] = Color::Grey;
                        stack.push((callee, 0));
                    }
                    Color::Grey => {
                        let chain: Vec<&str> = stack
                            .iter()
                            .skip_while(|(n, _)| *n != callee)
                            .map(|(n, _)| interner.resolve(program.subs[*n].name))
                            .collect();
                        let msg = format!(
                            "recursion is not allowed: {} -> {}",
                            chain.join(" -> "),
                            interner.resolve(program.subs[callee].name)
                        );
                        DiagnosticBuilder::error(msg)
                            .pos(program.subs[callee].pos)
                            .emit(handler);
                        return None;
                    }
                    Color::Black => {}
                }
            } else {
                color[node] = Color::Black;
                stack.pop();
            }
        }
    }
    Some(())
}
