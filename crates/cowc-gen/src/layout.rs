//! Static variable layout.
//!
//! Nothing lives on a stack: every parameter, return slot and local has a
//! fixed address. Because the call graph is acyclic, two subroutines that
//! can never be active at the same time may overlay the same bytes; a
//! subroutine's frame starts past the frames of everything that can be
//! live beneath it (its callers and its lexically enclosing subroutines).
//! The whole overlay region is one `workspace` reservation, with each
//! variable an `EQU workspace+offset`.
//!
//! Labels: variables are prefixed `v_` so no name can collide with a
//! register mnemonic; subroutines whose lowercased name is itself a
//! mnemonic get an `s_` prefix. The assembler is case-insensitive, so
//! everything is emitted in one canonical lower case and deduplicated.

use cowc_sem::hir::{Program, SubId};
use cowc_sem::symtab::SymKind;
use cowc_sem::{callgraph, SymId};
use cowc_util::Interner;
use rustc_hash::{FxHashMap, FxHashSet};

/// Names an 8080 register or register pair; a bare label equal to one of
/// these would confuse the assembler.
const MNEMONIC_NAMES: &[&str] = &["a", "b", "c", "d", "e", "h", "l", "m", "sp", "psw"];

#[derive(Debug)]
pub struct Layout {
    /// Mangled label per variable symbol.
    pub var_labels: FxHashMap<SymId, String>,
    /// Call label per subroutine (linkage name when `@extern`).
    pub sub_labels: Vec<String>,
    /// Workspace byte offset of every frame variable.
    pub frame_offsets: FxHashMap<SymId, u32>,
    /// Total bytes of the overlay workspace.
    pub workspace_size: u32,
    /// Globals in declaration order (including interface slots).
    pub globals: Vec<SymId>,
    /// Direct call sites per subroutine, one entry per site.
    pub calls: Vec<Vec<SubId>>,
}

impl Layout {
    pub fn build(program: &Program, interner: &Interner) -> Layout {
        let calls = callgraph::direct_calls(program);
        let mut taken: FxHashSet<String> = FxHashSet::default();

        // Subroutine labels first; variable labels embed them.
        let mut sub_labels = Vec::with_capacity(program.subs.len());
        for sub in &program.subs {
            let label = match &sub.extern_name {
                // Linkage names are fixed by contract; never suffix them.
                Some(name) => {
                    let label = name.to_lowercase();
                    taken.insert(label.clone());
                    label
                }
                None => {
                    let base = interner.resolve(sub.name).to_lowercase();
                    let base = if MNEMONIC_NAMES.contains(&base.as_str()) {
                        format!("s_{}", base)
                    } else {
                        base
                    };
                    unique(&mut taken, base)
                }
            };
            sub_labels.push(label);
        }

        // Parameter and return slots of an external import live in the
        // runtime image; their labels are fixed by the linkage name and
        // nothing is reserved for them here.
        let mut extern_slots: FxHashMap<SymId, String> = FxHashMap::default();
        for (ix, sub) in program.subs.iter().enumerate() {
            if !sub.is_external() {
                continue;
            }
            for (n, sym) in sub.params.iter().enumerate() {
                extern_slots.insert(*sym, format!("{}_p{}", sub_labels[ix], n));
            }
            for (n, sym) in sub.rets.iter().enumerate() {
                extern_slots.insert(*sym, format!("{}_r{}", sub_labels[ix], n));
            }
        }

        // Frame membership and per-frame sizes.
        let mut frame_vars: Vec<Vec<SymId>> = vec![Vec::new(); program.subs.len()];
        let mut globals = Vec::new();
        for (sym, info) in program.syms.iter() {
            if extern_slots.contains_key(&sym) {
                continue;
            }
            if let SymKind::Var { owner, .. } = &info.kind {
                match owner {
                    Some(sub) => frame_vars[sub.index()].push(sym),
                    None => globals.push(sym),
                }
            }
        }

        let frame_size: Vec<u32> = frame_vars
            .iter()
            .map(|vars| {
                vars.iter()
                    .map(|sym| {
                        let ty = program.syms.var_type(*sym).expect("frame vars are vars");
                        program.types.size_of(ty)
                    })
                    .sum()
            })
            .collect();

        // Frame base: past every caller's and every lexical ancestor's
        // frame. The graph is acyclic, so relaxing N times reaches the
        // longest-path fixpoint.
        let n = program.subs.len();
        let mut preds: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (caller, callees) in calls.iter().enumerate() {
            for callee in callees {
                preds[callee.index()].push(caller);
            }
        }
        for (ix, sub) in program.subs.iter().enumerate() {
            if let Some(parent) = sub.parent {
                preds[ix].push(parent.index());
            }
        }
        let mut base = vec![0u32; n];
        for _ in 0..n {
            for ix in 0..n {
                for &p in &preds[ix] {
                    base[ix] = base[ix].max(base[p] + frame_size[p]);
                }
            }
        }

        let mut frame_offsets = FxHashMap::default();
        let mut workspace_size = 0u32;
        for (ix, vars) in frame_vars.iter().enumerate() {
            let mut offset = base[ix];
            for sym in vars {
                let ty = program.syms.var_type(*sym).expect("frame vars are vars");
                frame_offsets.insert(*sym, offset);
                offset += program.types.size_of(ty);
            }
            workspace_size = workspace_size.max(offset);
        }

        // Variable labels: locals carry their subroutine's label, and
        // extern slots their fixed linkage names.
        let mut var_labels = FxHashMap::default();
        for (sym, info) in program.syms.iter() {
            if let Some(label) = extern_slots.get(&sym) {
                taken.insert(label.clone());
                var_labels.insert(sym, label.clone());
                continue;
            }
            if let SymKind::Var { owner, .. } = &info.kind {
                let name = interner.resolve(info.name).to_lowercase();
                let label = match owner {
                    Some(sub) => format!("v_{}_{}", sub_labels[sub.index()], name),
                    None => format!("v_{}", name),
                };
                var_labels.insert(sym, unique(&mut taken, label));
            }
        }

        Layout {
            var_labels,
            sub_labels,
            frame_offsets,
            workspace_size,
            globals,
            calls,
        }
    }

    pub fn var_label(&self, sym: SymId) -> &str {
        &self.var_labels[&sym]
    }

    pub fn sub_label(&self, sub: SubId) -> &str {
        &self.sub_labels[sub.index()]
    }
}

/// Case-canonical label, suffixed until unused.
fn unique(taken: &mut FxHashSet<String>, base: String) -> String {
    if taken.insert(base.clone()) {
        return base;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{}_{}", base, n);
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}
