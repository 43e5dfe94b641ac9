//! 8080 instruction model.
//!
//! The emitter builds a structured instruction stream; the peephole pass
//! pattern-matches on it; only at the very end is it rendered to the
//! assembler's text syntax. Byte sizes drive the inlining heuristic, and
//! the flag metadata keeps peephole rewrites from changing the flags a
//! later conditional jump reads.

use std::fmt;

/// 8-bit register operands, `M` being memory at HL.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum R8 {
    A,
    B,
    C,
    D,
    E,
    H,
    L,
    M,
}

impl fmt::Display for R8 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            R8::A => "A",
            R8::B => "B",
            R8::C => "C",
            R8::D => "D",
            R8::E => "E",
            R8::H => "H",
            R8::L => "L",
            R8::M => "M",
        };
        write!(f, "{}", s)
    }
}

/// Register pairs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rp {
    B,
    D,
    H,
    Sp,
    Psw,
}

impl fmt::Display for Rp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Rp::B => "B",
            Rp::D => "D",
            Rp::H => "H",
            Rp::Sp => "SP",
            Rp::Psw => "PSW",
        };
        write!(f, "{}", s)
    }
}

/// A 16-bit immediate: a number, a label, or label plus offset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Imm {
    Abs(u16),
    Label(String),
    LabelOff(String, i32),
}

impl fmt::Display for Imm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Imm::Abs(v) => write!(f, "{}", v),
            Imm::Label(l) => write!(f, "{}", l),
            Imm::LabelOff(l, off) => {
                if *off >= 0 {
                    write!(f, "{}+{}", l, off)
                } else {
                    write!(f, "{}{}", l, off)
                }
            }
        }
    }
}

/// One line of the output: an 8080 instruction, a label, or a directive.
#[derive(Clone, Debug, PartialEq)]
pub enum Insn {
    Label(String),

    // Data movement
    Mvi(R8, u8),
    Lxi(Rp, Imm),
    Mov(R8, R8),
    Lda(Imm),
    Sta(Imm),
    Lhld(Imm),
    Shld(Imm),
    Stax(Rp),
    Ldax(Rp),
    Xchg,
    Xthl,
    Sphl,

    // Arithmetic and logic
    Add(R8),
    Adc(R8),
    Sub(R8),
    Sbb(R8),
    Ana(R8),
    Ora(R8),
    Xra(R8),
    Cmp(R8),
    Adi(u8),
    Aci(u8),
    Sui(u8),
    Sbi(u8),
    Ani(u8),
    Ori(u8),
    Xri(u8),
    Cpi(u8),
    Inr(R8),
    Dcr(R8),
    Inx(Rp),
    Dcx(Rp),
    Dad(Rp),
    Cma,
    Ral,
    Rar,
    Rlc,
    Rrc,
    Stc,
    Cmc,

    // Stack and flow
    Push(Rp),
    Pop(Rp),
    Jmp(Imm),
    Jz(Imm),
    Jnz(Imm),
    Jc(Imm),
    Jnc(Imm),
    Jm(Imm),
    Jp(Imm),
    Call(Imm),
    Pchl,
    Ret,

    // Directives
    Db(Vec<u8>),
    Dw(Vec<Imm>),
    Ds(u32),
    Equ(String, Imm),
    End,

    /// Verbatim `@asm` text; opaque to every analysis.
    Raw(String),
    Comment(String),
}

impl Insn {
    /// Encoded size in bytes, for the inlining cost model. Directives,
    /// labels and comments take no code space; `Raw` text is guessed at
    /// one short instruction per line.
    pub fn size(&self) -> u32 {
        match self {
            Insn::Label(_) | Insn::Equ(..) | Insn::End | Insn::Comment(_) => 0,
            Insn::Db(bytes) => bytes.len() as u32,
            Insn::Dw(words) => words.len() as u32 * 2,
            Insn::Ds(n) => *n,
            Insn::Raw(text) => text.lines().count() as u32 * 2,

            Insn::Mov(..)
            | Insn::Stax(_)
            | Insn::Ldax(_)
            | Insn::Xchg
            | Insn::Xthl
            | Insn::Sphl
            | Insn::Add(_)
            | Insn::Adc(_)
            | Insn::Sub(_)
            | Insn::Sbb(_)
            | Insn::Ana(_)
            | Insn::Ora(_)
            | Insn::Xra(_)
            | Insn::Cmp(_)
            | Insn::Inr(_)
            | Insn::Dcr(_)
            | Insn::Inx(_)
            | Insn::Dcx(_)
            | Insn::Dad(_)
            | Insn::Cma
            | Insn::Ral
            | Insn::Rar
            | Insn::Rlc
            | Insn::Rrc
            | Insn::Stc
            | Insn::Cmc
            | Insn::Push(_)
            | Insn::Pop(_)
            | Insn::Pchl
            | Insn::Ret => 1,

            Insn::Mvi(..)
            | Insn::Adi(_)
            | Insn::Aci(_)
            | Insn::Sui(_)
            | Insn::Sbi(_)
            | Insn::Ani(_)
            | Insn::Ori(_)
            | Insn::Xri(_)
            | Insn::Cpi(_) => 2,

            Insn::Lxi(..)
            | Insn::Lda(_)
            | Insn::Sta(_)
            | Insn::Lhld(_)
            | Insn::Shld(_)
            | Insn::Jmp(_)
            | Insn::Jz(_)
            | Insn::Jnz(_)
            | Insn::Jc(_)
            | Insn::Jnc(_)
            | Insn::Jm(_)
            | Insn::Jp(_)
            | Insn::Call(_) => 3,
        }
    }

    /// Does this instruction read any condition flag? `PUSH PSW`
    /// materializes the flag byte, so it counts.
    pub fn reads_flags(&self) -> bool {
        matches!(
            self,
            Insn::Jz(_)
                | Insn::Jnz(_)
                | Insn::Jc(_)
                | Insn::Jnc(_)
                | Insn::Jm(_)
                | Insn::Jp(_)
                | Insn::Adc(_)
                | Insn::Aci(_)
                | Insn::Sbb(_)
                | Insn::Sbi(_)
                | Insn::Ral
                | Insn::Rar
                | Insn::Cmc
                | Insn::Push(Rp::Psw)
                | Insn::Raw(_)
        )
    }

    /// Does this instruction overwrite the whole flag set (so earlier
    /// flag state becomes unobservable past it)? Calls count: helper
    /// routines return with deliberate flag state.
    pub fn writes_flags(&self) -> bool {
        matches!(
            self,
            Insn::Add(_)
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
                | Insn::Call(_)
                | Insn::Pop(Rp::Psw)
        )
    }
}

impl fmt::Display for Insn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Insn::Label(l) => write!(f, "{}:", l),
            Insn::Mvi(r, v) => write!(f, "\tMVI {},{}", r, v),
            Insn::Lxi(rp, imm) => write!(f, "\tLXI {},{}", rp, imm),
            Insn::Mov(d, s) => write!(f, "\tMOV {},{}", d, s),
            Insn::Lda(imm) => write!(f, "\tLDA {}", imm),
            Insn::Sta(imm) => write!(f, "\tSTA {}", imm),
            Insn::Lhld(imm) => write!(f, "\tLHLD {}", imm),
            Insn::Shld(imm) => write!(f, "\tSHLD {}", imm),
            Insn::Stax(rp) => write!(f, "\tSTAX {}", rp),
            Insn::Ldax(rp) => write!(f, "\tLDAX {}", rp),
            Insn::Xchg => write!(f, "\tXCHG"),
            Insn::Xthl => write!(f, "\tXTHL"),
            Insn::Sphl => write!(f, "\tSPHL"),
            Insn::Add(r) => write!(f, "\tADD {}", r),
            Insn::Adc(r) => write!(f, "\tADC {}", r),
            Insn::Sub(r) => write!(f, "\tSUB {}", r),
            Insn::Sbb(r) => write!(f, "\tSBB {}", r),
            Insn::Ana(r) => write!(f, "\tANA {}", r),
            Insn::Ora(r) => write!(f, "\tORA {}", r),
            Insn::Xra(r) => write!(f, "\tXRA {}", r),
            Insn::Cmp(r) => write!(f, "\tCMP {}", r),
            Insn::Adi(v) => write!(f, "\tADI {}", v),
            Insn::Aci(v) => write!(f, "\tACI {}", v),
            Insn::Sui(v) => write!(f, "\tSUI {}", v),
            Insn::Sbi(v) => write!(f, "\tSBI {}", v),
            Insn::Ani(v) => write!(f, "\tANI {}", v),
            Insn::Ori(v) => write!(f, "\tORI {}", v),
            Insn::Xri(v) => write!(f, "\tXRI {}", v),
            Insn::Cpi(v) => write!(f, "\tCPI {}", v),
            Insn::Inr(r) => write!(f, "\tINR {}", r),
            Insn::Dcr(r) => write!(f, "\tDCR {}", r),
            Insn::Inx(rp) => write!(f, "\tINX {}", rp),
            Insn::Dcx(rp) => write!(f, "\tDCX {}", rp),
            Insn::Dad(rp) => write!(f, "\tDAD {}", rp),
            Insn::Cma => write!(f, "\tCMA"),
            Insn::Ral => write!(f, "\tRAL"),
            Insn::Rar => write!(f, "\tRAR"),
            Insn::Rlc => write!(f, "\tRLC"),
            Insn::Rrc => write!(f, "\tRRC"),
            Insn::Stc => write!(f, "\tSTC"),
            Insn::Cmc => write!(f, "\tCMC"),
            Insn::Push(rp) => write!(f, "\tPUSH {}", rp),
            Insn::Pop(rp) => write!(f, "\tPOP {}", rp),
            Insn::Jmp(t) => write!(f, "\tJMP {}", t),
            Insn::Jz(t) => write!(f, "\tJZ {}", t),
            Insn::Jnz(t) => write!(f, "\tJNZ {}", t),
            Insn::Jc(t) => write!(f, "\tJC {}", t),
            Insn::Jnc(t) => write!(f, "\tJNC {}", t),
            Insn::Jm(t) => write!(f, "\tJM {}", t),
            Insn::Jp(t) => write!(f, "\tJP {}", t),
            Insn::Call(t) => write!(f, "\tCALL {}", t),
            Insn::Pchl => write!(f, "\tPCHL"),
            Insn::Ret => write!(f, "\tRET"),
            Insn::Db(bytes) => {
                write!(f, "\tDB ")?;
                for (ix, b) in bytes.iter().enumerate() {
                    if ix > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", b)?;
                }
                Ok(())
            }
            Insn::Dw(words) => {
                write!(f, "\tDW ")?;
                for (ix, w) in words.iter().enumerate() {
                    if ix > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", w)?;
                }
                Ok(())
            }
            Insn::Ds(n) => write!(f, "\tDS {}", n),
            Insn::Equ(name, imm) => write!(f, "{} EQU {}", name, imm),
            Insn::End => write!(f, "\tEND"),
            Insn::Raw(text) => {
                for (ix, line) in text.lines().enumerate() {
                    if ix > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "\t{}", line.trim())?;
                }
                Ok(())
            }
            Insn::Comment(text) => write!(f, "; {}", text),
        }
    }
}

/// Render an instruction stream to assembler text.
pub fn render(insns: &[Insn]) -> String {
    let mut out = String::new();
    for insn in insns {
        out.push_str(&insn.to_string());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rendering_matches_assembler_syntax() {
        assert_eq!(Insn::Lxi(Rp::H, Imm::Label("v_x".into())).to_string(), "\tLXI H,v_x");
        assert_eq!(Insn::Mov(R8::A, R8::M).to_string(), "\tMOV A,M");
        assert_eq!(Insn::Call(Imm::Label("f_mul16".into())).to_string(), "\tCALL f_mul16");
        assert_eq!(
            Insn::Equ("v_i".into(), Imm::LabelOff("workspace".into(), 4)).to_string(),
            "v_i EQU workspace+4"
        );
        assert_eq!(Insn::Db(vec![72, 105, 0]).to_string(), "\tDB 72,105,0");
    }

    #[test]
    fn test_sizes() {
        assert_eq!(Insn::Mov(R8::A, R8::B).size(), 1);
        assert_eq!(Insn::Mvi(R8::A, 0).size(), 2);
        assert_eq!(Insn::Lxi(Rp::H, Imm::Abs(0)).size(), 3);
        assert_eq!(Insn::Call(Imm::Label("x".into())).size(), 3);
        assert_eq!(Insn::Ret.size(), 1);
    }

    #[test]
    fn test_flag_metadata() {
        assert!(Insn::Jz(Imm::Label("x".into())).reads_flags());
        assert!(Insn::Sbb(R8::H).reads_flags());
        assert!(Insn::Cpi(1).writes_flags());
        assert!(!Insn::Mvi(R8::A, 0).writes_flags());
        assert!(!Insn::Lda(Imm::Label("v".into())).writes_flags());
        assert!(Insn::Xra(R8::A).writes_flags());
    }
}
