//! Inlining decision.
//!
//! Candidates are leaf-shaped subroutines: no parameters, no return
//! values, no locals, no loops, no inline assembly, never used as an
//! interface value. A candidate called exactly once is always inlined;
//! otherwise it is inlined only when the total emitted bytes shrink:
//! `N * body < body + 3 * N + 1`, the right side being the standalone
//! body plus a 3-byte CALL per site and its RET.

use cowc_sem::hir::{Program, StmtKind, SubId, MAIN};

use crate::emit::CodeGen;
use crate::layout::Layout;
use crate::GenError;

/// Per-subroutine inline flag, indexed by `SubId`.
pub(crate) fn decide(prog: &Program, layout: &Layout) -> Result<Vec<bool>, GenError> {
    let mut call_count = vec![0usize; prog.subs.len()];
    for callees in &layout.calls {
        for callee in callees {
            call_count[callee.index()] += 1;
        }
    }

    let no_inline = vec![false; prog.subs.len()];
    let mut inline = vec![false; prog.subs.len()];
    for (ix, sub) in prog.subs.iter().enumerate() {
        let id = SubId(ix as u32);
        if id == MAIN
            || sub.is_external()
            || sub.address_taken
            || sub.interface.is_some()
            || !sub.params.is_empty()
            || !sub.rets.is_empty()
            || !sub.locals.is_empty()
            || has_loop_or_asm(&sub.body)
        {
            continue;
        }
        let n = call_count[ix];
        if n == 0 {
            continue;
        }
        if n == 1 {
            inline[ix] = true;
            continue;
        }
        let size = body_size(prog, layout, &no_inline, id)? as usize;
        if n * size < size + 3 * n + 1 {
            inline[ix] = true;
        }
    }
    Ok(inline)
}

/// Emitted byte size of a subroutine body, measured by a scratch
/// emission with inlining disabled.
fn body_size(
    prog: &Program,
    layout: &Layout,
    no_inline: &[bool],
    sub: SubId,
) -> Result<u32, GenError> {
    let mut scratch = CodeGen::new(prog, layout, no_inline);
    scratch.gen_sub(sub)?;
    // Drop the trailing RET: the formula accounts for it separately.
    Ok(scratch
        .code
        .iter()
        .map(|insn| insn.size())
        .sum::<u32>()
        .saturating_sub(1))
}

fn has_loop_or_asm(body: &[cowc_sem::hir::Stmt]) -> bool {
    body.iter().any(|stmt| match &stmt.kind {
        StmtKind::While { .. } | StmtKind::Loop { .. } | StmtKind::Asm { .. } => true,
        StmtKind::If { arms, else_body } => {
            arms.iter().any(|(_, b)| has_loop_or_asm(b))
                || else_body.as_ref().map(|b| has_loop_or_asm(b)).unwrap_or(false)
        }
        StmtKind::Case { arms, else_body, .. } => {
            arms.iter().any(|(_, b)| has_loop_or_asm(b))
                || else_body.as_ref().map(|b| has_loop_or_asm(b)).unwrap_or(false)
        }
        _ => false,
    })
}
