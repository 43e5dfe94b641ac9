//! Symbol table and lexical scopes.

use cowc_util::{Name, Pos};
use indexmap::IndexMap;

use crate::hir::SubId;
use crate::types::TypeId;

/// Handle to a symbol in the [`SymbolTable`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymId(pub u32);

impl SymId {
    #[inline]
    pub const fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Static initializer for a global variable, emitted to the data section.
#[derive(Clone, Debug, PartialEq)]
pub enum GlobalInit {
    /// A single scalar value.
    Scalar(i64),
    /// Element values of a constant array.
    List(Vec<i64>),
    /// Byte-array contents from a string literal, NUL included.
    Bytes(Vec<u8>),
    /// A pointer initialized with the address of a pooled string.
    StrPtr(crate::hir::StrId),
}

/// What a name is bound to.
#[derive(Clone, Debug)]
pub enum SymKind {
    /// A variable. `owner` is the subroutine whose frame holds it, or
    /// `None` for globals and interface slots.
    Var {
        ty: TypeId,
        owner: Option<SubId>,
        init: Option<GlobalInit>,
    },
    /// A compile-time constant. Constants are typeless and adapt to
    /// context like integer literals.
    Const { value: i64 },
    /// A type name: builtin, typedef, record or interface.
    Type(TypeId),
    /// A subroutine.
    Sub(SubId),
}

#[derive(Clone, Debug)]
pub struct SymbolInfo {
    pub name: Name,
    pub kind: SymKind,
    pub pos: Pos,
}

/// Owning table of all symbols in one compilation.
#[derive(Debug, Default)]
pub struct SymbolTable {
    syms: Vec<SymbolInfo>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: Name, kind: SymKind, pos: Pos) -> SymId {
        let id = SymId(self.syms.len() as u32);
        self.syms.push(SymbolInfo { name, kind, pos });
        id
    }

    pub fn get(&self, id: SymId) -> &SymbolInfo {
        &self.syms[id.index()]
    }

    pub fn get_mut(&mut self, id: SymId) -> &mut SymbolInfo {
        &mut self.syms[id.index()]
    }

    pub fn len(&self) -> usize {
        self.syms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.syms.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SymId, &SymbolInfo)> {
        self.syms
            .iter()
            .enumerate()
            .map(|(i, s)| (SymId(i as u32), s))
    }

    /// Variable type, if this symbol is a variable.
    pub fn var_type(&self, id: SymId) -> Option<TypeId> {
        match &self.get(id).kind {
            SymKind::Var { ty, .. } => Some(*ty),
            _ => None,
        }
    }

    /// Owning subroutine of a variable; `None` for globals.
    pub fn var_owner(&self, id: SymId) -> Option<SubId> {
        match &self.get(id).kind {
            SymKind::Var { owner, .. } => *owner,
            _ => None,
        }
    }
}

/// The lexically nested scope chain. Bindings in inner scopes shadow
/// outer ones; lookup walks outward.
#[derive(Debug, Default)]
pub struct Scopes {
    stack: Vec<IndexMap<Name, SymId>>,
}

impl Scopes {
    pub fn new() -> Self {
        Self { stack: vec![IndexMap::new()] }
    }

    pub fn push(&mut self) {
        self.stack.push(IndexMap::new());
    }

    pub fn pop(&mut self) {
        self.stack.pop();
    }

    /// Bind a name in the innermost scope. Returns the previous binding in
    /// this same scope if the name was already taken (a duplicate).
    pub fn bind(&mut self, name: Name, sym: SymId) -> Option<SymId> {
        self.stack
            .last_mut()
            .expect("scope stack never empty")
            .insert(name, sym)
    }

    pub fn lookup(&self, name: Name) -> Option<SymId> {
        self.stack.iter().rev().find_map(|s| s.get(&name).copied())
    }

    /// Lookup restricted to the innermost scope; used for duplicate checks.
    pub fn lookup_local(&self, name: Name) -> Option<SymId> {
        self.stack.last().and_then(|s| s.get(&name).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::T_U8;
    use cowc_util::Interner;

    #[test]
    fn test_scope_shadowing() {
        let mut interner = Interner::new();
        let x = interner.intern("x");
        let mut table = SymbolTable::new();
        let outer = table.add(x, SymKind::Const { value: 1 }, Pos::DUMMY);
        let inner = table.add(
            x,
            SymKind::Var { ty: T_U8, owner: None, init: None },
            Pos::DUMMY,
        );

        let mut scopes = Scopes::new();
        scopes.bind(x, outer);
        scopes.push();
        scopes.bind(x, inner);
        assert_eq!(scopes.lookup(x), Some(inner));
        scopes.pop();
        assert_eq!(scopes.lookup(x), Some(outer));
    }

    #[test]
    fn test_duplicate_binding_detected() {
        let mut interner = Interner::new();
        let x = interner.intern("x");
        let mut scopes = Scopes::new();
        assert!(scopes.bind(x, SymId(0)).is_none());
        assert!(scopes.bind(x, SymId(1)).is_some());
    }
}
