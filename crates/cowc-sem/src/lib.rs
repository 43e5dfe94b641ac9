//! cowc-sem - Semantic analysis and type checking.
//!
//! ============================================================================
//! SEMANTIC ANALYSIS OVERVIEW
//! ============================================================================
//!
//! This phase checks what the program *means*, not just how it reads,
//! and lowers the parsed AST into the typed tree in [`hir`]. It answers:
//! - What does this name refer to?
//! - What is the type of every expression?
//! - Does this record layout add up?
//! - Can this program's subroutines ever recurse?
//!
//! PHASES, IN ONE WALK:
//! --------------------
//!
//! 1. NAME RESOLUTION
//!    - Declarations bind symbols in a lexically nested scope chain;
//!      lookup walks outward, inner bindings shadow outer ones
//!    - Everything is declare-before-use; `@decl` bridges the one case
//!      where a body must be referenced before it exists
//!    - A read of a local belonging to an enclosing subroutine marks it
//!      captured, which pins its storage and fences the optimizer
//!
//! 2. TYPE CHECKING (bottom-up, with literal adaptation)
//!    - Integer literals and constants are typeless until context
//!      supplies a width; everything else must match exactly, because
//!      the language has no implicit conversions - `as` is the only one
//!    - Arithmetic operands must have identical types; shift counts are
//!      `uint8`; `&` applies to record fields only
//!    - `@next`/`@prev` scale by the pointee size, `p + n` is byte-wise
//!    - Array indexes use the array's narrowest natural index type
//!      (`uint8` up to 256 elements, `uint16` past that)
//!    - Conditions are their own sum, so a comparison can never leak
//!      into value position
//!
//! 3. CONSTANT EVALUATION
//!    - `const`, `@at` offsets, array extents and case arm values fold
//!      during the walk; a constant that does not fold is fatal
//!    - Folding wraps 2's-complement at the declared width, matching
//!      what the generated 8080 code does at run time
//!
//! 4. LAYOUT
//!    - Record fields pack sequentially; `@at` fields may overlap, and
//!      an implicit field after one resumes past the highest occupied
//!      byte; a derived record starts where its base ends
//!
//! 5. WHOLE-PROGRAM CHECKS
//!    - `@impl` must complete a matching `@decl`; a `@decl` never
//!      implemented is fatal unless it carries `@extern` linkage
//!    - The direct-call graph must be acyclic: every subroutine's
//!      parameters, returns and locals live at fixed addresses, which
//!      is only sound with at most one live activation each
//!
//! REPRESENTATION:
//! ---------------
//!
//! ```text
//! AST (cowc-par)                 typed tree (hir)
//!   names        -- resolve -->    SymId into SymbolTable
//!   type refs    -- resolve -->    TypeId into TypeTable
//!   field names  -- layout  -->    byte offsets
//!   @-operators  -- fold    -->    literals / pointer arithmetic
//!   expressions  -- check   -->    every node carries its TypeId
//! ```
//!
//! Symbols and types are integer handles into tables owned here and
//! mutated by no later stage; the tree keeps no back-pointers.
//!
//! The first error aborts the analysis; the handler keeps the diagnostic.

pub mod callgraph;
mod expr;
pub mod hir;
pub mod symtab;
pub mod types;

pub use hir::{Program, Sub, SubId, MAIN};
pub use symtab::{GlobalInit, SymId, SymKind, SymbolTable};
pub use types::{TypeId, TypeTable};

use cowc_par::ast::{self, Init, SubKind as AstSubKind, TypeRef};
use cowc_util::{DiagnosticBuilder, Handler, Interner, Name, Pos};
use indexmap::IndexMap;
use rustc_hash::FxHashSet;

use symtab::Scopes;
use types::{InterfaceType, RecordType, TypeKind, T_I16, T_I32, T_I8, T_U16, T_U32, T_U8};

/// Analyze a parsed program. Returns `None` if any diagnostic was
/// reported; the handler holds the details.
pub fn analyze(
    program: &ast::Program,
    interner: &mut Interner,
    handler: &mut Handler,
) -> Option<Program> {
    let mut analyzer = Analyzer::new(interner, handler);
    analyzer.install_builtins();

    let main_body = analyzer.lower_block(&program.body)?;
    analyzer.subs[MAIN.index()].body = main_body;

    analyzer.check_forward_decls()?;

    let program = Program {
        types: analyzer.types,
        syms: analyzer.syms,
        subs: analyzer.subs,
        strings: analyzer.strings,
        captured: analyzer.captured,
        tmp_name: analyzer.tmp_name,
    };
    callgraph::check_acyclic(&program, analyzer.interner, analyzer.handler)?;
    Some(program)
}

pub(crate) struct Analyzer<'a> {
    pub(crate) interner: &'a mut Interner,
    pub(crate) handler: &'a mut Handler,
    pub(crate) types: TypeTable,
    pub(crate) syms: SymbolTable,
    pub(crate) subs: Vec<hir::Sub>,
    pub(crate) strings: Vec<Vec<u8>>,
    pub(crate) scopes: Scopes,
    pub(crate) captured: FxHashSet<SymId>,
    /// Stack of subroutines being lowered; the last is current.
    sub_stack: Vec<SubId>,
    /// Nesting depth of loops in the current subroutine.
    pub(crate) loop_depth: u32,
    tmp_name: Name,
}

impl<'a> Analyzer<'a> {
    fn new(interner: &'a mut Interner, handler: &'a mut Handler) -> Self {
        let main_name = interner.intern("main");
        let tmp_name = interner.intern("tmp");
        let main = hir::Sub {
            name: main_name,
            params: Vec::new(),
            rets: Vec::new(),
            locals: Vec::new(),
            body: Vec::new(),
            parent: None,
            extern_name: None,
            interface: None,
            declared_only: false,
            address_taken: false,
            pos: Pos::DUMMY,
        };
        Self {
            interner,
            handler,
            types: TypeTable::new(),
            syms: SymbolTable::new(),
            subs: vec![main],
            strings: Vec::new(),
            scopes: Scopes::new(),
            captured: FxHashSet::default(),
            sub_stack: vec![MAIN],
            loop_depth: 0,
            tmp_name,
        }
    }

    fn install_builtins(&mut self) {
        let builtins = [
            ("int8", T_I8),
            ("uint8", T_U8),
            ("int16", T_I16),
            ("uint16", T_U16),
            ("int32", T_I32),
            ("uint32", T_U32),
            // Pointer-sized integer on the 8080.
            ("intptr", T_U16),
        ];
        for (name, ty) in builtins {
            let name = self.interner.intern(name);
            let sym = self.syms.add(name, SymKind::Type(ty), Pos::DUMMY);
            self.scopes.bind(name, sym);
        }
    }

    pub(crate) fn current_sub(&self) -> SubId {
        *self.sub_stack.last().expect("sub stack never empty")
    }

    pub(crate) fn error(&mut self, message: impl Into<String>, pos: Pos) {
        DiagnosticBuilder::error(message).pos(pos).emit(self.handler);
    }

    pub(crate) fn name_str(&self, name: Name) -> &str {
        self.interner.resolve(name)
    }

    /// Bind a new symbol in the current scope, rejecting duplicates.
    pub(crate) fn bind_new(&mut self, name: Name, kind: SymKind, pos: Pos) -> Option<SymId> {
        if self.scopes.lookup_local(name).is_some() {
            let msg = format!("duplicate declaration of '{}'", self.name_str(name));
            self.error(msg, pos);
            return None;
        }
        let sym = self.syms.add(name, kind, pos);
        self.scopes.bind(name, sym);
        Some(sym)
    }

    /// Resolve a name, reporting undeclared identifiers.
    pub(crate) fn resolve(&mut self, name: Name, pos: Pos) -> Option<SymId> {
        match self.scopes.lookup(name) {
            Some(sym) => Some(sym),
            None => {
                let msg = format!("undeclared identifier '{}'", self.name_str(name));
                self.error(msg, pos);
                None
            }
        }
    }

    // ---- type references ----

    pub(crate) fn resolve_type_ref(&mut self, tr: &TypeRef, pos: Pos) -> Option<TypeId> {
        match tr {
            TypeRef::Named(name) => {
                let sym = self.resolve(*name, pos)?;
                match &self.syms.get(sym).kind {
                    SymKind::Type(ty) => Some(*ty),
                    _ => {
                        let msg = format!("'{}' is not a type", self.name_str(*name));
                        self.error(msg, pos);
                        None
                    }
                }
            }
            TypeRef::Pointer(inner) => {
                let pointee = self.resolve_type_ref(inner, pos)?;
                Some(self.types.pointer_to(pointee))
            }
            TypeRef::Array { elem, len } => {
                let elem = self.resolve_type_ref(elem, pos)?;
                let len = match len {
                    Some(expr) => {
                        let v = self.consteval(expr)?;
                        if v <= 0 {
                            self.error("array extent must be positive", expr.pos);
                            return None;
                        }
                        v as u32
                    }
                    None => {
                        self.error(
                            "array extent required here (only initialized \
                             variables may omit it)",
                            pos,
                        );
                        return None;
                    }
                };
                Some(self.types.array_of(elem, len))
            }
            TypeRef::IndexOf(name) => {
                let sym = self.resolve(*name, pos)?;
                let ty = match self.syms.var_type(sym) {
                    Some(ty) => ty,
                    None => {
                        let msg =
                            format!("'{}' is not an array variable", self.name_str(*name));
                        self.error(msg, pos);
                        return None;
                    }
                };
                match self.types.array_elem(ty) {
                    Some((_, len)) => Some(TypeTable::index_type(len)),
                    None => {
                        let msg =
                            format!("'{}' is not an array variable", self.name_str(*name));
                        self.error(msg, pos);
                        None
                    }
                }
            }
        }
    }

    // ---- statements ----

    pub(crate) fn lower_block(&mut self, stmts: &[ast::Stmt]) -> Option<hir::Block> {
        let mut out = Vec::new();
        for stmt in stmts {
            self.lower_stmt(stmt, &mut out)?;
        }
        Some(out)
    }

    fn lower_stmt(&mut self, stmt: &ast::Stmt, out: &mut Vec<hir::Stmt>) -> Option<()> {
        let pos = stmt.pos;
        match &stmt.kind {
            ast::StmtKind::Var(decl) => self.lower_var_decl(decl, pos, out),
            ast::StmtKind::Const { name, value } => {
                let value = self.consteval(value)?;
                self.bind_new(*name, SymKind::Const { value }, pos)?;
                Some(())
            }
            ast::StmtKind::Typedef { name, ty } => {
                let target = self.resolve_type_ref(ty, pos)?;
                let alias = self.types.alias(*name, target);
                self.bind_new(*name, SymKind::Type(alias), pos)?;
                Some(())
            }
            ast::StmtKind::Record(decl) => self.lower_record_decl(decl, pos),
            ast::StmtKind::Interface(decl) => self.lower_interface_decl(decl, pos),
            ast::StmtKind::Sub(decl) => self.lower_sub_decl(decl, pos),
            ast::StmtKind::Assign { target, value } => {
                let stmt = self.lower_assign(target, value, pos)?;
                out.push(stmt);
                Some(())
            }
            ast::StmtKind::MultiAssign { targets, call } => {
                let stmt = self.lower_multi_assign(targets, call, pos)?;
                out.push(stmt);
                Some(())
            }
            ast::StmtKind::If { arms, else_body } => {
                let mut hir_arms = Vec::with_capacity(arms.len());
                for (cond, body) in arms {
                    let cond = self.lower_cond(cond)?;
                    let body = self.lower_block(body)?;
                    hir_arms.push((cond, body));
                }
                let else_body = match else_body {
                    Some(body) => Some(self.lower_block(body)?),
                    None => None,
                };
                out.push(hir::Stmt {
                    kind: hir::StmtKind::If {
                        arms: hir_arms,
                        else_body,
                    },
                    pos,
                });
                Some(())
            }
            ast::StmtKind::While { cond, body } => {
                let cond = self.lower_cond(cond)?;
                self.loop_depth += 1;
                let body = self.lower_block(body);
                self.loop_depth -= 1;
                out.push(hir::Stmt {
                    kind: hir::StmtKind::While { cond, body: body? },
                    pos,
                });
                Some(())
            }
            ast::StmtKind::Loop { body } => {
                self.loop_depth += 1;
                let body = self.lower_block(body);
                self.loop_depth -= 1;
                out.push(hir::Stmt {
                    kind: hir::StmtKind::Loop { body: body? },
                    pos,
                });
                Some(())
            }
            ast::StmtKind::Break => {
                if self.loop_depth == 0 {
                    self.error("'break' outside a loop", pos);
                    return None;
                }
                out.push(hir::Stmt {
                    kind: hir::StmtKind::Break,
                    pos,
                });
                Some(())
            }
            ast::StmtKind::Continue => {
                if self.loop_depth == 0 {
                    self.error("'continue' outside a loop", pos);
                    return None;
                }
                out.push(hir::Stmt {
                    kind: hir::StmtKind::Continue,
                    pos,
                });
                Some(())
            }
            ast::StmtKind::Return => {
                out.push(hir::Stmt {
                    kind: hir::StmtKind::Return,
                    pos,
                });
                Some(())
            }
            ast::StmtKind::Case {
                scrutinee,
                arms,
                else_body,
            } => {
                let stmt = self.lower_case(scrutinee, arms, else_body.as_deref(), pos)?;
                out.push(stmt);
                Some(())
            }
            ast::StmtKind::Asm { parts } => {
                let mut chunks = Vec::with_capacity(parts.len());
                for part in parts {
                    match part {
                        ast::AsmPart::Text(text) => chunks.push(hir::AsmChunk::Text(text.clone())),
                        ast::AsmPart::Var(name) => {
                            let sym = self.resolve(*name, pos)?;
                            if self.syms.var_type(sym).is_none() {
                                let msg = format!(
                                    "'{}' in @asm must be a variable",
                                    self.name_str(*name)
                                );
                                self.error(msg, pos);
                                return None;
                            }
                            chunks.push(hir::AsmChunk::Var(sym));
                        }
                    }
                }
                out.push(hir::Stmt {
                    kind: hir::StmtKind::Asm { parts: chunks },
                    pos,
                });
                Some(())
            }
            ast::StmtKind::Expr(expr) => {
                let stmt = self.lower_call_stmt(expr, pos)?;
                out.push(stmt);
                Some(())
            }
        }
    }

    // ---- declarations ----

    fn lower_var_decl(
        &mut self,
        decl: &ast::VarDecl,
        pos: Pos,
        out: &mut Vec<hir::Stmt>,
    ) -> Option<()> {
        let owner = if self.current_sub() == MAIN {
            None
        } else {
            Some(self.current_sub())
        };

        // Resolve the declared type; an omitted array extent is legal when
        // the initializer pins it down.
        let ty = match &decl.ty {
            Some(TypeRef::Array { elem, len: None }) => {
                let elem = self.resolve_type_ref(elem, pos)?;
                let len = match &decl.init {
                    Some(Init::List(values)) => values.len() as u32,
                    Some(Init::Expr(e)) if matches!(e.kind, ast::ExprKind::Str(_)) => {
                        match &e.kind {
                            ast::ExprKind::Str(bytes) => bytes.len() as u32 + 1,
                            _ => unreachable!(),
                        }
                    }
                    _ => {
                        self.error(
                            "array extent can only be inferred from an initializer",
                            pos,
                        );
                        return None;
                    }
                };
                Some(self.types.array_of(elem, len))
            }
            Some(tr) => Some(self.resolve_type_ref(tr, pos)?),
            None => None,
        };

        match (&ty, &decl.init) {
            (Some(ty), None) => {
                let ty = *ty;
                self.declare_var(decl.name, ty, owner, None, pos)?;
                Some(())
            }
            (ty, Some(init)) => {
                let declared = *ty;
                self.lower_var_init(decl.name, declared, init, owner, pos, out)
            }
            (None, None) => unreachable!("parser requires a type or an initializer"),
        }
    }

    fn lower_var_init(
        &mut self,
        name: Name,
        declared: Option<TypeId>,
        init: &Init,
        owner: Option<SubId>,
        pos: Pos,
        out: &mut Vec<hir::Stmt>,
    ) -> Option<()> {
        match init {
            Init::List(values) => {
                let ty = match declared {
                    Some(ty) => ty,
                    None => {
                        self.error("a brace initializer needs a declared array type", pos);
                        return None;
                    }
                };
                let (elem, len) = match self.types.array_elem(ty) {
                    Some(pair) => pair,
                    None => {
                        self.error("brace initializer on a non-array variable", pos);
                        return None;
                    }
                };
                if values.len() as u32 != len {
                    let msg = format!(
                        "initializer has {} elements but the array holds {}",
                        values.len(),
                        len
                    );
                    self.error(msg, pos);
                    return None;
                }
                let width = self.types.size_of(elem);
                let mut consts = Vec::with_capacity(values.len());
                for value in values {
                    let v = self.consteval(value)?;
                    self.check_fits(v, width, value.pos)?;
                    consts.push(v);
                }
                if owner.is_none() {
                    self.declare_var(name, ty, owner, Some(GlobalInit::List(consts)), pos)?;
                } else {
                    // Locals live in overlaid storage, so a data-section
                    // image cannot initialize them; store element-wise.
                    let sym = self.declare_var(name, ty, owner, None, pos)?;
                    let index_ty = TypeTable::index_type(len);
                    for (i, v) in consts.iter().enumerate() {
                        let base = hir::Expr::new(hir::ExprKind::Var(sym), ty, pos);
                        let index = hir::Expr::int(i as i64, index_ty, pos);
                        let target = hir::Expr::new(
                            hir::ExprKind::Index {
                                base: Box::new(base),
                                index: Box::new(index),
                            },
                            elem,
                            pos,
                        );
                        out.push(hir::Stmt {
                            kind: hir::StmtKind::Assign {
                                target,
                                value: hir::Expr::int(*v, elem, pos),
                            },
                            pos,
                        });
                    }
                }
                Some(())
            }
            Init::Expr(expr) => {
                // Byte arrays may be initialized from a string literal,
                // NUL included.
                if let (Some(ty), ast::ExprKind::Str(bytes)) = (declared, &expr.kind) {
                    if let Some((elem, len)) = self.types.array_elem(ty) {
                        if !self.types.equal(elem, T_U8) {
                            self.error("string initializer needs a uint8 array", pos);
                            return None;
                        }
                        let mut data = bytes.clone();
                        data.push(0);
                        if data.len() as u32 != len {
                            let msg = format!(
                                "string initializer is {} bytes (with NUL) but the \
                                 array holds {}",
                                data.len(),
                                len
                            );
                            self.error(msg, pos);
                            return None;
                        }
                        if owner.is_some() {
                            self.error(
                                "string-initialized arrays must be globals",
                                pos,
                            );
                            return None;
                        }
                        self.declare_var(name, ty, owner, Some(GlobalInit::Bytes(data)), pos)?;
                        return Some(());
                    }
                }

                let value = self.lower_expr(expr, declared)?;
                let ty = match declared {
                    Some(declared) => {
                        if !self.types.equal(declared, value.ty) {
                            let msg = format!(
                                "initializer type {} does not match declared type {}",
                                self.types.display(value.ty, self.interner),
                                self.types.display(declared, self.interner)
                            );
                            self.error(msg, pos);
                            return None;
                        }
                        declared
                    }
                    None => {
                        if self.is_untyped(expr) {
                            self.error(
                                "type of integer literal is ambiguous; \
                                 annotate the variable",
                                pos,
                            );
                            return None;
                        }
                        value.ty
                    }
                };

                // A constant scalar initializer on a global goes straight
                // to the data section; everything else is a runtime store.
                if owner.is_none() {
                    if let hir::ExprKind::Int(v) = value.kind {
                        self.declare_var(name, ty, owner, Some(GlobalInit::Scalar(v)), pos)?;
                        return Some(());
                    }
                    if let hir::ExprKind::Str(id) = value.kind {
                        self.declare_var(name, ty, owner, Some(GlobalInit::StrPtr(id)), pos)?;
                        return Some(());
                    }
                }
                let sym = self.declare_var(name, ty, owner, None, pos)?;
                out.push(hir::Stmt {
                    kind: hir::StmtKind::Assign {
                        target: hir::Expr::new(hir::ExprKind::Var(sym), ty, pos),
                        value,
                    },
                    pos,
                });
                Some(())
            }
        }
    }

    fn declare_var(
        &mut self,
        name: Name,
        ty: TypeId,
        owner: Option<SubId>,
        init: Option<GlobalInit>,
        pos: Pos,
    ) -> Option<SymId> {
        let sym = self.bind_new(name, SymKind::Var { ty, owner, init }, pos)?;
        if let Some(sub) = owner {
            self.subs[sub.index()].locals.push(sym);
        }
        Some(sym)
    }

    fn lower_record_decl(&mut self, decl: &ast::RecordDecl, pos: Pos) -> Option<()> {
        let base = match decl.base {
            Some(name) => {
                let sym = self.resolve(name, pos)?;
                let ty = match &self.syms.get(sym).kind {
                    SymKind::Type(ty) => *ty,
                    _ => {
                        let msg = format!("'{}' is not a record", self.name_str(name));
                        self.error(msg, pos);
                        return None;
                    }
                };
                if !matches!(self.types.kind(self.types.strip(ty)), TypeKind::Record(_)) {
                    let msg = format!("'{}' is not a record", self.name_str(name));
                    self.error(msg, pos);
                    return None;
                }
                Some(self.types.strip(ty))
            }
            None => None,
        };

        // Implicit fields pack sequentially; @at fields may overlap and an
        // implicit field after one resumes past the highest occupied byte.
        let mut high = base.map(|b| self.types.size_of(b)).unwrap_or(0);
        let mut fields: Vec<types::FieldInfo> = Vec::with_capacity(decl.fields.len());
        let mut seen: IndexMap<Name, ()> = IndexMap::new();
        for field in &decl.fields {
            if seen.insert(field.name, ()).is_some()
                || base
                    .map(|b| self.types.find_field(b, field.name).is_some())
                    .unwrap_or(false)
            {
                let msg = format!("duplicate field '{}'", self.name_str(field.name));
                self.error(msg, field.pos);
                return None;
            }
            let fty = self.resolve_type_ref(&field.ty, field.pos)?;
            let size = self.types.size_of(fty);
            let offset = match &field.at {
                Some(expr) => {
                    let v = self.consteval(expr)?;
                    if v < 0 {
                        self.error("@at offset must be non-negative", expr.pos);
                        return None;
                    }
                    v as u32
                }
                None => high,
            };
            high = high.max(offset + size);
            fields.push(types::FieldInfo {
                name: field.name,
                ty: fty,
                offset,
            });
        }

        let record = self.types.record(RecordType {
            name: decl.name,
            base,
            fields,
            size: high,
        });
        self.bind_new(decl.name, SymKind::Type(record), pos)?;
        Some(())
    }

    fn lower_interface_decl(&mut self, decl: &ast::InterfaceDecl, pos: Pos) -> Option<()> {
        // Slot storage is owned by the interface and shared by every
        // implementation, so direct and indirect calls use one address.
        let mut params = Vec::with_capacity(decl.params.len());
        for p in &decl.params {
            let ty = self.resolve_type_ref(&p.ty, p.pos)?;
            params.push(self.syms.add(
                p.name,
                SymKind::Var {
                    ty,
                    owner: None,
                    init: None,
                },
                p.pos,
            ));
        }
        let mut rets = Vec::with_capacity(decl.rets.len());
        for r in &decl.rets {
            let ty = self.resolve_type_ref(&r.ty, r.pos)?;
            rets.push(self.syms.add(
                r.name,
                SymKind::Var {
                    ty,
                    owner: None,
                    init: None,
                },
                r.pos,
            ));
        }
        let iface = self.types.interface(InterfaceType {
            name: decl.name,
            params,
            rets,
        });
        self.bind_new(decl.name, SymKind::Type(iface), pos)?;
        Some(())
    }

    fn lower_sub_decl(&mut self, decl: &ast::SubDecl, pos: Pos) -> Option<()> {
        match decl.kind {
            AstSubKind::Impl => self.lower_sub_impl(decl, pos),
            AstSubKind::Decl | AstSubKind::Normal => self.lower_sub_def(decl, pos),
        }
    }

    fn lower_sub_def(&mut self, decl: &ast::SubDecl, pos: Pos) -> Option<()> {
        let parent = if self.current_sub() == MAIN {
            None
        } else {
            Some(self.current_sub())
        };
        let sub_id = SubId(self.subs.len() as u32);

        // Parameter and return storage: interface slots when implementing,
        // otherwise fresh symbols in this subroutine's frame.
        let (params, rets, interface) = match decl.implements {
            Some(iface_name) => {
                let sym = self.resolve(iface_name, pos)?;
                let ty = match &self.syms.get(sym).kind {
                    SymKind::Type(ty) => self.types.strip(*ty),
                    _ => {
                        let msg =
                            format!("'{}' is not an interface", self.name_str(iface_name));
                        self.error(msg, pos);
                        return None;
                    }
                };
                match self.types.kind(ty) {
                    TypeKind::Interface(i) => (i.params.clone(), i.rets.clone(), Some(ty)),
                    _ => {
                        let msg =
                            format!("'{}' is not an interface", self.name_str(iface_name));
                        self.error(msg, pos);
                        return None;
                    }
                }
            }
            None => {
                let mut params = Vec::with_capacity(decl.params.len());
                for p in &decl.params {
                    let ty = self.resolve_type_ref(&p.ty, p.pos)?;
                    params.push(self.syms.add(
                        p.name,
                        SymKind::Var {
                            ty,
                            owner: Some(sub_id),
                            init: None,
                        },
                        p.pos,
                    ));
                }
                let mut rets = Vec::with_capacity(decl.rets.len());
                for r in &decl.rets {
                    let ty = self.resolve_type_ref(&r.ty, r.pos)?;
                    rets.push(self.syms.add(
                        r.name,
                        SymKind::Var {
                            ty,
                            owner: Some(sub_id),
                            init: None,
                        },
                        r.pos,
                    ));
                }
                (params, rets, None)
            }
        };

        self.subs.push(hir::Sub {
            name: decl.name,
            params,
            rets,
            locals: Vec::new(),
            body: Vec::new(),
            parent,
            extern_name: decl.extern_name.clone(),
            interface,
            declared_only: decl.kind == AstSubKind::Decl,
            address_taken: false,
            pos,
        });
        self.bind_new(decl.name, SymKind::Sub(sub_id), pos)?;

        if let Some(body) = &decl.body {
            let body = self.lower_sub_body(sub_id, body)?;
            self.subs[sub_id.index()].body = body;
        }
        Some(())
    }

    fn lower_sub_impl(&mut self, decl: &ast::SubDecl, pos: Pos) -> Option<()> {
        let sym = match self.scopes.lookup(decl.name) {
            Some(sym) => sym,
            None => {
                let msg = format!(
                    "@impl of '{}' has no matching @decl",
                    self.name_str(decl.name)
                );
                self.error(msg, pos);
                return None;
            }
        };
        let sub_id = match &self.syms.get(sym).kind {
            SymKind::Sub(id) => *id,
            _ => {
                let msg = format!(
                    "@impl of '{}' has no matching @decl",
                    self.name_str(decl.name)
                );
                self.error(msg, pos);
                return None;
            }
        };
        if !self.subs[sub_id.index()].declared_only {
            let msg = format!("'{}' is already implemented", self.name_str(decl.name));
            self.error(msg, pos);
            return None;
        }

        // A repeated signature must match the @decl; the @decl's names are
        // authoritative for the body either way.
        if !decl.params.is_empty() || !decl.rets.is_empty() {
            self.check_impl_signature(sub_id, decl, pos)?;
        }

        self.subs[sub_id.index()].declared_only = false;
        let body = decl.body.as_ref().expect("parser gives @impl a body");
        let body = self.lower_sub_body(sub_id, body)?;
        self.subs[sub_id.index()].body = body;
        Some(())
    }

    fn check_impl_signature(
        &mut self,
        sub_id: SubId,
        decl: &ast::SubDecl,
        pos: Pos,
    ) -> Option<()> {
        let (decl_params, decl_rets) = {
            let sub = &self.subs[sub_id.index()];
            (sub.params.clone(), sub.rets.clone())
        };
        if decl_params.len() != decl.params.len() || decl_rets.len() != decl.rets.len() {
            let msg = format!(
                "@impl signature of '{}' does not match its @decl",
                self.name_str(decl.name)
            );
            self.error(msg, pos);
            return None;
        }
        for (sym, p) in decl_params.iter().zip(&decl.params).chain(
            decl_rets.iter().zip(&decl.rets),
        ) {
            let declared = self.syms.var_type(*sym).expect("params are variables");
            let given = self.resolve_type_ref(&p.ty, p.pos)?;
            if !self.types.equal(declared, given) {
                let msg = format!(
                    "@impl signature of '{}' does not match its @decl",
                    self.name_str(decl.name)
                );
                self.error(msg, p.pos);
                return None;
            }
        }
        Some(())
    }

    fn lower_sub_body(&mut self, sub_id: SubId, body: &[ast::Stmt]) -> Option<hir::Block> {
        self.scopes.push();
        let (params, rets) = {
            let sub = &self.subs[sub_id.index()];
            (sub.params.clone(), sub.rets.clone())
        };
        for sym in params.iter().chain(rets.iter()) {
            let name = self.syms.get(*sym).name;
            self.scopes.bind(name, *sym);
        }
        self.sub_stack.push(sub_id);
        let saved_depth = std::mem::take(&mut self.loop_depth);
        let lowered = self.lower_block(body);
        self.loop_depth = saved_depth;
        self.sub_stack.pop();
        self.scopes.pop();
        lowered
    }

    fn check_forward_decls(&mut self) -> Option<()> {
        for sub in &self.subs {
            if sub.declared_only && sub.extern_name.is_none() {
                let msg = format!(
                    "forward declaration of '{}' was never implemented",
                    self.interner.resolve(sub.name)
                );
                let pos = sub.pos;
                DiagnosticBuilder::error(msg).pos(pos).emit(self.handler);
                return None;
            }
        }
        Some(())
    }
}
