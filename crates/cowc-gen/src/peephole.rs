//! Peephole rewriting and redundant-load elimination.
//!
//! A sliding window rewrites local instruction shapes until a whole scan
//! changes nothing (the pass is a fixpoint: re-running it on its own
//! output is the identity). Rules carry flag sensitivity: a rewrite that
//! would alter flag state only fires when no upcoming instruction reads
//! flags before they are overwritten. The register tracker then erases
//! reloads of values still resident in A or HL; stores to the tracked
//! variable, calls and labels invalidate.

use crate::insn::{Imm, Insn, R8, Rp};

/// Rewrite until stable. Returns the number of rewrites applied.
pub fn run(code: &mut Vec<Insn>) -> usize {
    let mut total = 0;
    loop {
        let mut changed = rewrite_pass(code);
        changed += track_registers(code);
        if changed == 0 {
            break;
        }
        total += changed;
    }
    total
}

fn rewrite_pass(code: &mut Vec<Insn>) -> usize {
    let mut changes = 0;
    let mut ix = 0;
    while ix < code.len() {
        if let Some(fired) = try_rules(code, ix) {
            changes += fired;
            // Re-examine from just before the rewrite; a new adjacency
            // may have formed.
            ix = ix.saturating_sub(2);
            continue;
        }
        ix += 1;
    }
    changes
}

/// Try every rule anchored at `ix`; `Some(n)` when one fired.
fn try_rules(code: &mut Vec<Insn>, ix: usize) -> Option<usize> {
    // MOV r,r does nothing.
    if let Insn::Mov(d, s) = &code[ix] {
        if d == s {
            code.remove(ix);
            return Some(1);
        }
    }

    // XCHG / XCHG and INX H / DCX H (either order) cancel.
    if ix + 1 < code.len() {
        let cancels = matches!(
            (&code[ix], &code[ix + 1]),
            (Insn::Xchg, Insn::Xchg)
                | (Insn::Inx(Rp::H), Insn::Dcx(Rp::H))
                | (Insn::Dcx(Rp::H), Insn::Inx(Rp::H))
        );
        if cancels {
            code.drain(ix..ix + 2);
            return Some(1);
        }
    }

    // PUSH rp / POP rp of the same pair with nothing between.
    if ix + 1 < code.len() {
        if let (Insn::Push(a), Insn::Pop(b)) = (&code[ix], &code[ix + 1]) {
            if a == b {
                code.drain(ix..ix + 2);
                return Some(1);
            }
        }
    }

    // CALL x / RET becomes a tail jump.
    if ix + 1 < code.len() {
        if let (Insn::Call(target), Insn::Ret) = (&code[ix], &code[ix + 1]) {
            let target = target.clone();
            code[ix] = Insn::Jmp(target);
            code.remove(ix + 1);
            return Some(1);
        }
    }

    // A jump to the very next label falls through.
    if ix + 1 < code.len() {
        if let (Insn::Jmp(Imm::Label(target)), Insn::Label(label)) = (&code[ix], &code[ix + 1]) {
            if target == label {
                code.remove(ix);
                return Some(1);
            }
        }
    }

    // LXI D,1..3 / DAD D becomes INX H chains (DAD writes carry, INX
    // does not, so the flags must be dead).
    if ix + 1 < code.len() {
        if let (Insn::Lxi(Rp::D, Imm::Abs(n @ 1..=3)), Insn::Dad(Rp::D)) =
            (&code[ix], &code[ix + 1])
        {
            if flags_dead_after(code, ix + 1) {
                let n = *n as usize;
                code.splice(ix..ix + 2, std::iter::repeat(Insn::Inx(Rp::H)).take(n));
                return Some(1);
            }
        }
    }

    // The array-index idiom: PUSH H / LXI H,addr / POP D / DAD D
    // computes addr + HL; load addr straight into DE instead.
    if ix + 3 < code.len() {
        if let (Insn::Push(Rp::H), Insn::Lxi(Rp::H, addr), Insn::Pop(Rp::D), Insn::Dad(Rp::D)) =
            (&code[ix], &code[ix + 1], &code[ix + 2], &code[ix + 3])
        {
            let addr = addr.clone();
            code.splice(
                ix..ix + 4,
                [Insn::Lxi(Rp::D, addr), Insn::Dad(Rp::D)],
            );
            return Some(1);
        }
    }

    // Byte-variable increment/decrement through memory:
    // LDA v / ADI 1 / STA v  =>  LXI H,v / INR M (and SUI 1 => DCR M).
    // ADI/SUI set carry, INR/DCR do not; A also stops holding the new
    // value, so both flags and A must be dead.
    if ix + 2 < code.len() {
        if let (Insn::Lda(v1), add_or_sub, Insn::Sta(v2)) =
            (&code[ix], &code[ix + 1], &code[ix + 2])
        {
            let op = match add_or_sub {
                Insn::Adi(1) => Some(Insn::Inr(R8::M)),
                Insn::Sui(1) => Some(Insn::Dcr(R8::M)),
                _ => None,
            };
            if let Some(op) = op {
                if v1 == v2 && flags_dead_after(code, ix + 2) && a_dead_after(code, ix + 2) {
                    let addr = v1.clone();
                    code.splice(ix..ix + 3, [Insn::Lxi(Rp::H, addr), op]);
                    return Some(1);
                }
            }
        }
    }

    // MVI A,0 has a one-byte form, XRA A, when nothing reads the flags
    // it clobbers.
    if let Insn::Mvi(R8::A, 0) = &code[ix] {
        if flags_dead_after(code, ix) {
            code[ix] = Insn::Xra(R8::A);
            return Some(1);
        }
    }

    None
}

/// Step along the execution path from `ix`, following unconditional
/// jumps to local labels, until `judge` decides. Labels are only
/// markers; indirect transfers and `@asm` text stop the scan
/// conservatively.
fn scan_execution_path(
    code: &[Insn],
    ix: usize,
    judge: &mut dyn FnMut(&Insn) -> Option<bool>,
) -> bool {
    let mut ix = ix + 1;
    let mut steps = 0;
    while ix < code.len() {
        steps += 1;
        if steps > code.len() {
            // A jump cycle; give up.
            return false;
        }
        let insn = &code[ix];
        if let Some(verdict) = judge(insn) {
            return verdict;
        }
        match insn {
            Insn::Jmp(Imm::Label(target)) => {
                match code
                    .iter()
                    .position(|i| matches!(i, Insn::Label(l) if l == target))
                {
                    Some(t) => ix = t + 1,
                    None => return false,
                }
            }
            Insn::Jmp(_) | Insn::Pchl | Insn::Raw(_) | Insn::End => return false,
            _ => ix += 1,
        }
    }
    false
}

/// True when the execution path from `ix` overwrites the flags before
/// reading them. The calling convention passes nothing in flags, so a
/// RET makes them dead.
fn flags_dead_after(code: &[Insn], ix: usize) -> bool {
    scan_execution_path(code, ix, &mut |insn| {
        if insn.reads_flags() {
            return Some(false);
        }
        if insn.writes_flags() || matches!(insn, Insn::Ret) {
            return Some(true);
        }
        None
    })
}

/// True when the execution path from `ix` overwrites A before reading
/// it. Return values travel in static slots, never in A, so a RET makes
/// it dead.
fn a_dead_after(code: &[Insn], ix: usize) -> bool {
    scan_execution_path(code, ix, &mut |insn| match insn {
        // Writers that don't read A first.
        Insn::Mvi(R8::A, _) | Insn::Lda(_) | Insn::Ldax(_) | Insn::Pop(Rp::Psw) => Some(true),
        Insn::Mov(R8::A, src) if *src != R8::A => Some(true),
        Insn::Xra(R8::A) => Some(true),
        Insn::Ret => Some(true),

        // Readers.
        Insn::Mov(_, R8::A)
        | Insn::Add(_)
        | Insn::Adc(_)
        | Insn::Sub(_)
        | Insn::Sbb(_)
        | Insn::Ana(_)
        | Insn::Ora(_)
        | Insn::Xra(_)
        | Insn::Cmp(_)
        | Insn::Adi(_)
        | Insn::Aci(_)
        | Insn::Sui(_)
        | Insn::Sbi(_)
        | Insn::Ani(_)
        | Insn::Ori(_)
        | Insn::Xri(_)
        | Insn::Cpi(_)
        | Insn::Sta(_)
        | Insn::Stax(_)
        | Insn::Push(Rp::Psw)
        | Insn::Cma
        | Insn::Ral
        | Insn::Rar
        | Insn::Rlc
        | Insn::Rrc
        | Insn::Inr(R8::A)
        | Insn::Dcr(R8::A) => Some(false),

        // Past a conditional jump or a call, either successor could
        // read A. Stop conservatively.
        Insn::Jz(_)
        | Insn::Jnz(_)
        | Insn::Jc(_)
        | Insn::Jnc(_)
        | Insn::Jm(_)
        | Insn::Jp(_)
        | Insn::Call(_) => Some(false),

        _ => None,
    })
}

// ---- register tracking ----

/// One fact about a register's contents.
#[derive(Clone, Debug, PartialEq)]
enum Cached {
    /// Equal to the value stored at a label.
    Mem(Imm),
    /// Equal to an immediate (for HL, possibly an address constant).
    Imm(Imm),
    ImmByte(u8),
}

/// Facts about one register. A register can satisfy several at once:
/// after `MVI A,7 / STA v`, A is both the constant 7 and the value of v.
#[derive(Default)]
struct Facts {
    facts: Vec<Cached>,
}

impl Facts {
    fn clear(&mut self) {
        self.facts.clear();
    }

    fn holds(&self, fact: &Cached) -> bool {
        self.facts.contains(fact)
    }

    /// The register was just loaded: this fact replaces all others.
    fn reset_to(&mut self, fact: Cached) {
        self.facts.clear();
        self.facts.push(fact);
    }

    /// A store made another fact true alongside the existing ones.
    fn also(&mut self, fact: Cached) {
        if !self.facts.contains(&fact) {
            self.facts.push(fact);
        }
    }

    fn forget_mem(&mut self, addr: &Imm) {
        self.facts.retain(|f| !matches!(f, Cached::Mem(a) if a == addr));
    }

    fn forget_all_mem(&mut self) {
        self.facts.retain(|f| !matches!(f, Cached::Mem(_)));
    }
}

/// Remove reloads of values already resident in A or HL. None of the
/// removable loads touch flags, so removal is always flag-safe.
fn track_registers(code: &mut Vec<Insn>) -> usize {
    let mut changes = 0;
    let mut a = Facts::default();
    let mut hl = Facts::default();

    let mut ix = 0;
    while ix < code.len() {
        let mut remove = false;
        match &code[ix] {
            Insn::Lda(addr) => {
                let fact = Cached::Mem(addr.clone());
                if a.holds(&fact) {
                    remove = true;
                } else {
                    a.reset_to(fact);
                }
            }
            Insn::Mvi(R8::A, v) => {
                let fact = Cached::ImmByte(*v);
                if a.holds(&fact) {
                    remove = true;
                } else {
                    a.reset_to(fact);
                }
            }
            Insn::Lhld(addr) => {
                let fact = Cached::Mem(addr.clone());
                if hl.holds(&fact) {
                    remove = true;
                } else {
                    hl.reset_to(fact);
                }
            }
            Insn::Lxi(Rp::H, imm) => {
                let fact = Cached::Imm(imm.clone());
                if hl.holds(&fact) {
                    remove = true;
                } else {
                    hl.reset_to(fact);
                }
            }

            // Stores add a memory fact to the stored register and
            // invalidate the other register's view of that address.
            Insn::Sta(addr) => {
                hl.forget_mem(addr);
                a.also(Cached::Mem(addr.clone()));
            }
            Insn::Shld(addr) => {
                a.forget_mem(addr);
                hl.also(Cached::Mem(addr.clone()));
            }

            // Stores through pointers may hit any tracked location.
            Insn::Mov(R8::M, _) | Insn::Stax(_) | Insn::Inr(R8::M) | Insn::Dcr(R8::M) => {
                a.forget_all_mem();
                hl.forget_all_mem();
            }

            // Anything that changes A.
            Insn::Mov(R8::A, _)
            | Insn::Ldax(_)
            | Insn::Add(_)
            | Insn::Adc(_)
            | Insn::Sub(_)
            | Insn::Sbb(_)
            | Insn::Ana(_)
            | Insn::Ora(_)
            | Insn::Xra(_)
            | Insn::Adi(_)
            | Insn::Aci(_)
            | Insn::Sui(_)
            | Insn::Sbi(_)
            | Insn::Ani(_)
            | Insn::Ori(_)
            | Insn::Xri(_)
            | Insn::Cma
            | Insn::Ral
            | Insn::Rar
            | Insn::Rlc
            | Insn::Rrc
            | Insn::Inr(R8::A)
            | Insn::Dcr(R8::A)
            | Insn::Pop(Rp::Psw) => a.clear(),

            // Anything that changes H or L.
            Insn::Mov(R8::H, _)
            | Insn::Mov(R8::L, _)
            | Insn::Mvi(R8::H, _)
            | Insn::Mvi(R8::L, _)
            | Insn::Inx(Rp::H)
            | Insn::Dcx(Rp::H)
            | Insn::Dad(_)
            | Insn::Pop(Rp::H)
            | Insn::Xchg
            | Insn::Xthl => hl.clear(),

            // Join points and transfers: assume nothing.
            Insn::Label(_)
            | Insn::Jmp(_)
            | Insn::Jz(_)
            | Insn::Jnz(_)
            | Insn::Jc(_)
            | Insn::Jnc(_)
            | Insn::Jm(_)
            | Insn::Jp(_)
            | Insn::Call(_)
            | Insn::Ret
            | Insn::Pchl
            | Insn::Raw(_) => {
                a.clear();
                hl.clear();
            }

            _ => {}
        }

        if remove {
            code.remove(ix);
            changes += 1;
        } else {
            ix += 1;
        }
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(s: &str) -> Imm {
        Imm::Label(s.to_string())
    }

    #[test]
    fn test_push_pop_same_pair_is_removed() {
        let mut code = vec![
            Insn::Lhld(label("v_x")),
            Insn::Push(Rp::H),
            Insn::Pop(Rp::H),
            Insn::Shld(label("v_y")),
        ];
        run(&mut code);
        assert_eq!(
            code,
            vec![Insn::Lhld(label("v_x")), Insn::Shld(label("v_y"))]
        );
    }

    #[test]
    fn test_mov_r_r_removed() {
        let mut code = vec![Insn::Mov(R8::A, R8::A), Insn::Ret];
        run(&mut code);
        assert_eq!(code, vec![Insn::Ret]);
    }

    #[test]
    fn test_call_ret_becomes_jmp() {
        let mut code = vec![Insn::Call(label("helper")), Insn::Ret];
        run(&mut code);
        assert_eq!(code, vec![Insn::Jmp(label("helper"))]);
    }

    #[test]
    fn test_small_dad_becomes_inx() {
        let mut code = vec![
            Insn::Lxi(Rp::D, Imm::Abs(2)),
            Insn::Dad(Rp::D),
            Insn::Ret,
        ];
        run(&mut code);
        assert_eq!(code, vec![Insn::Inx(Rp::H), Insn::Inx(Rp::H), Insn::Ret]);
    }

    #[test]
    fn test_small_dad_kept_when_flags_are_read() {
        // The DAD's carry feeds the JC; the rewrite must not fire.
        let mut code = vec![
            Insn::Lxi(Rp::D, Imm::Abs(1)),
            Insn::Dad(Rp::D),
            Insn::Jc(label("l_1")),
        ];
        run(&mut code);
        assert_eq!(code[1], Insn::Dad(Rp::D));
    }

    #[test]
    fn test_index_idiom_rewritten() {
        let mut code = vec![
            Insn::Push(Rp::H),
            Insn::Lxi(Rp::H, label("v_arr")),
            Insn::Pop(Rp::D),
            Insn::Dad(Rp::D),
            Insn::Ret,
        ];
        run(&mut code);
        assert_eq!(
            code,
            vec![
                Insn::Lxi(Rp::D, label("v_arr")),
                Insn::Dad(Rp::D),
                Insn::Ret
            ]
        );
    }

    #[test]
    fn test_byte_increment_becomes_inr_m() {
        let mut code = vec![
            Insn::Lda(label("v_i")),
            Insn::Adi(1),
            Insn::Sta(label("v_i")),
            Insn::Lhld(label("v_x")),
            Insn::Ret,
        ];
        run(&mut code);
        assert!(code.contains(&Insn::Inr(R8::M)), "{:?}", code);
    }

    #[test]
    fn test_byte_decrement_kept_when_a_is_reused() {
        // A holds the decremented value and feeds the next store.
        let mut code = vec![
            Insn::Lda(label("v_i")),
            Insn::Sui(1),
            Insn::Sta(label("v_i")),
            Insn::Sta(label("v_j")),
            Insn::Ret,
        ];
        run(&mut code);
        assert!(!code.contains(&Insn::Dcr(R8::M)), "{:?}", code);
    }

    #[test]
    fn test_mvi_a_zero_becomes_xra() {
        let mut code = vec![Insn::Mvi(R8::A, 0), Insn::Sta(label("v_x")), Insn::Ret];
        run(&mut code);
        assert_eq!(code[0], Insn::Xra(R8::A));
    }

    #[test]
    fn test_mvi_a_zero_kept_before_conditional_jump() {
        let mut code = vec![
            Insn::Cpi(3),
            Insn::Mvi(R8::A, 0),
            Insn::Jz(label("l_1")),
        ];
        run(&mut code);
        assert_eq!(code[1], Insn::Mvi(R8::A, 0));
    }

    #[test]
    fn test_redundant_reload_eliminated() {
        let mut code = vec![
            Insn::Lda(label("v_x")),
            Insn::Sta(label("v_y")),
            Insn::Lda(label("v_x")),
            Insn::Sta(label("v_z")),
        ];
        run(&mut code);
        assert_eq!(
            code,
            vec![
                Insn::Lda(label("v_x")),
                Insn::Sta(label("v_y")),
                Insn::Sta(label("v_z")),
            ]
        );
    }

    #[test]
    fn test_reload_after_call_is_kept() {
        let mut code = vec![
            Insn::Lhld(label("v_x")),
            Insn::Call(label("f")),
            Insn::Lhld(label("v_x")),
        ];
        run(&mut code);
        assert_eq!(code.len(), 3);
    }

    #[test]
    fn test_reload_after_label_is_kept() {
        let mut code = vec![
            Insn::Lda(label("v_x")),
            Insn::Label("l_9".into()),
            Insn::Lda(label("v_x")),
        ];
        run(&mut code);
        assert_eq!(code.len(), 3);
    }

    #[test]
    fn test_store_keeps_register_synchronized() {
        // After STA v, A still holds [v]; the LDA v is redundant.
        let mut code = vec![
            Insn::Mvi(R8::A, 7),
            Insn::Sta(label("v_x")),
            Insn::Lda(label("v_x")),
            Insn::Sta(label("v_y")),
        ];
        run(&mut code);
        assert_eq!(code.len(), 3, "{:?}", code);
    }

    #[test]
    fn test_fixpoint_is_stable() {
        let mut code = vec![
            Insn::Push(Rp::H),
            Insn::Lxi(Rp::H, label("v_a")),
            Insn::Pop(Rp::D),
            Insn::Dad(Rp::D),
            Insn::Lxi(Rp::D, Imm::Abs(1)),
            Insn::Dad(Rp::D),
            Insn::Ret,
        ];
        run(&mut code);
        let snapshot = code.clone();
        let second = run(&mut code);
        assert_eq!(second, 0);
        assert_eq!(code, snapshot);
    }
}
