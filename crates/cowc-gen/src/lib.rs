//! cowc-gen - 8080 code generation.
//!
//! Consumes the optimized typed tree and produces assembly text for the
//! downstream macro assembler: a prologue with the entry jump, subroutine
//! bodies, a data section of initialized globals and pooled strings, a
//! BSS-like section of reservations (with the overlay workspace and its
//! `EQU` map), and a terminating `END`.

mod emit;
mod inline;
pub mod insn;
pub mod layout;
pub mod peephole;

use cowc_sem::hir::{Program, SubId, MAIN};
use cowc_sem::symtab::{GlobalInit, SymKind};
use cowc_util::Interner;
use thiserror::Error;

use emit::CodeGen;
use insn::{Imm, Insn};
use layout::Layout;

/// Code generation failures. Every variant is an internal invariant
/// violation: user errors never reach this stage.
#[derive(Debug, Error)]
pub enum GenError {
    #[error("internal code generator error: {0}")]
    Internal(String),
}

/// Generate the complete assembly text for a program.
pub fn generate(program: &Program, interner: &Interner) -> Result<String, GenError> {
    let layout = Layout::build(program, interner);
    let inline = inline::decide(program, &layout)?;
    let mut cg = CodeGen::new(program, &layout, &inline);

    // The prologue stays outside the peephole's reach: the entry jump is
    // part of the output contract even when top-level code would follow
    // it directly.
    let prologue = vec![
        Insn::Comment("generated by cowc".into()),
        Insn::Jmp(Imm::Label(layout.sub_label(MAIN).to_string())),
    ];

    for ix in 0..program.subs.len() {
        let id = SubId(ix as u32);
        let sub = program.sub(id);
        // Imports have no body here; fully inlined subroutines need no
        // standalone copy.
        if id == MAIN || sub.is_external() || inline[ix] {
            continue;
        }
        cg.gen_sub(id)?;
    }
    cg.gen_sub(MAIN)?;

    let rewrites = peephole::run(&mut cg.code);
    log::debug!("peephole: {} rewrites", rewrites);

    let mut out = prologue;
    out.extend(cg.code);
    emit_data(program, &layout, &mut out);
    emit_bss(program, &layout, cg.used_longacc, &mut out);
    out.push(Insn::End);
    Ok(insn::render(&out))
}

/// Initialized globals and the string pool.
fn emit_data(program: &Program, layout: &Layout, out: &mut Vec<Insn>) {
    out.push(Insn::Comment("data".into()));
    for (ix, bytes) in program.strings.iter().enumerate() {
        out.push(Insn::Label(format!("str_{}", ix)));
        let mut data = bytes.clone();
        data.push(0);
        out.push(Insn::Db(data));
    }

    for &sym in &layout.globals {
        let info = program.syms.get(sym);
        let (ty, init) = match &info.kind {
            SymKind::Var { ty, init: Some(init), .. } => (*ty, init),
            _ => continue,
        };
        out.push(Insn::Label(layout.var_label(sym).to_string()));
        match init {
            GlobalInit::Scalar(v) => match program.types.size_of(ty) {
                1 => out.push(Insn::Db(vec![*v as u8])),
                2 => out.push(Insn::Dw(vec![Imm::Abs(*v as u16)])),
                _ => out.push(Insn::Dw(vec![
                    Imm::Abs(*v as u16),
                    Imm::Abs((*v >> 16) as u16),
                ])),
            },
            GlobalInit::List(values) => {
                let elem = program
                    .types
                    .array_elem(ty)
                    .map(|(elem, _)| program.types.size_of(elem))
                    .unwrap_or(1);
                match elem {
                    1 => out.push(Insn::Db(values.iter().map(|v| *v as u8).collect())),
                    2 => out.push(Insn::Dw(
                        values.iter().map(|v| Imm::Abs(*v as u16)).collect(),
                    )),
                    _ => out.push(Insn::Dw(
                        values
                            .iter()
                            .flat_map(|v| {
                                [Imm::Abs(*v as u16), Imm::Abs((*v >> 16) as u16)]
                            })
                            .collect(),
                    )),
                }
            }
            GlobalInit::Bytes(bytes) => out.push(Insn::Db(bytes.clone())),
            GlobalInit::StrPtr(id) => {
                out.push(Insn::Dw(vec![Imm::Label(format!("str_{}", id.index()))]))
            }
        }
    }
}

/// Reservations: the overlay workspace with its EQU map, uninitialized
/// globals, and the 32-bit scratch accumulator.
fn emit_bss(program: &Program, layout: &Layout, used_longacc: bool, out: &mut Vec<Insn>) {
    out.push(Insn::Comment("bss".into()));
    if layout.workspace_size > 0 {
        out.push(Insn::Label("workspace".into()));
        out.push(Insn::Ds(layout.workspace_size));
        let mut entries: Vec<_> = layout.frame_offsets.iter().collect();
        entries.sort_by_key(|(sym, &offset)| (offset, sym.0));
        for (sym, &offset) in entries {
            out.push(Insn::Equ(
                layout.var_label(*sym).to_string(),
                Imm::LabelOff("workspace".into(), offset as i32),
            ));
        }
    }
    for &sym in &layout.globals {
        let info = program.syms.get(sym);
        let ty = match &info.kind {
            SymKind::Var { ty, init: None, .. } => *ty,
            _ => continue,
        };
        out.push(Insn::Label(layout.var_label(sym).to_string()));
        out.push(Insn::Ds(program.types.size_of(ty)));
    }
    if used_longacc {
        out.push(Insn::Label("longacc".into()));
        out.push(Insn::Ds(4));
    }
}
