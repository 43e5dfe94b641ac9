//! Expression and condition lowering.
//!
//! Types are computed bottom-up. Integer literals (and constants, which
//! behave like literals) are typeless until context supplies a type; since
//! the language has no implicit conversions, every other operand pair must
//! match exactly.

use cowc_par::ast::{self, BinOp, CmpOp};
use cowc_util::Pos;

use crate::hir::{self, CallTarget, StrId};
use crate::symtab::SymKind;
use crate::types::{wrap_value, TypeKind, TypeTable, T_U16, T_U8};
use crate::{Analyzer, SubId, SymId, TypeId, MAIN};

impl<'a> Analyzer<'a> {
    // ---- constant evaluation ----

    /// Evaluate a constant expression. Anything not resolvable at compile
    /// time is a fatal error.
    pub(crate) fn consteval(&mut self, e: &ast::Expr) -> Option<i64> {
        match &e.kind {
            ast::ExprKind::Int(v) => Some(*v),
            ast::ExprKind::Char(c) => Some(*c as i64),
            ast::ExprKind::Neg(inner) => Some(self.consteval(inner)?.wrapping_neg()),
            ast::ExprKind::Name(name) => {
                let sym = self.resolve(*name, e.pos)?;
                match &self.syms.get(sym).kind {
                    SymKind::Const { value } => Some(*value),
                    _ => {
                        let msg = format!(
                            "'{}' is not a constant",
                            self.name_str(*name)
                        );
                        self.error(msg, e.pos);
                        None
                    }
                }
            }
            ast::ExprKind::Binary { op, lhs, rhs } => {
                let l = self.consteval(lhs)?;
                let r = self.consteval(rhs)?;
                match op {
                    BinOp::Add => Some(l.wrapping_add(r)),
                    BinOp::Sub => Some(l.wrapping_sub(r)),
                    BinOp::Mul => Some(l.wrapping_mul(r)),
                    BinOp::Div | BinOp::Rem if r == 0 => {
                        self.error("division by zero in constant expression", e.pos);
                        None
                    }
                    BinOp::Div => Some(l.wrapping_div(r)),
                    BinOp::Rem => Some(l.wrapping_rem(r)),
                    BinOp::And => Some(l & r),
                    BinOp::Or => Some(l | r),
                    BinOp::Xor => Some(l ^ r),
                    BinOp::Shl => Some(l.wrapping_shl(r as u32)),
                    BinOp::Shr => Some(((l as u64) >> (r as u32 & 63)) as i64),
                }
            }
            ast::ExprKind::Cast { expr, ty } => {
                let v = self.consteval(expr)?;
                let target = self.resolve_type_ref(ty, e.pos)?;
                match self.types.int_info(target) {
                    Some((signed, width)) => Some(wrap_value(v, signed, width)),
                    None => {
                        self.error("constant casts must target an integer type", e.pos);
                        None
                    }
                }
            }
            ast::ExprKind::Sizeof(operand) => self.meta_value(MetaOp::Sizeof, operand).map(|m| m.0),
            ast::ExprKind::Bytesof(operand) => {
                self.meta_value(MetaOp::Bytesof, operand).map(|m| m.0)
            }
            ast::ExprKind::IndexOf(operand) => {
                self.meta_value(MetaOp::IndexOf, operand).map(|m| m.0)
            }
            _ => {
                self.error("expression is not constant", e.pos);
                None
            }
        }
    }

    /// A literal-like expression whose type must come from context.
    pub(crate) fn is_untyped(&self, e: &ast::Expr) -> bool {
        match &e.kind {
            ast::ExprKind::Int(_) => true,
            ast::ExprKind::Sizeof(_) | ast::ExprKind::Bytesof(_) => true,
            ast::ExprKind::Neg(inner) => self.is_untyped(inner),
            ast::ExprKind::Binary { lhs, rhs, .. } => {
                self.is_untyped(lhs) && self.is_untyped(rhs)
            }
            ast::ExprKind::Name(name) => matches!(
                self.scopes.lookup(*name).map(|s| &self.syms.get(s).kind),
                Some(SymKind::Const { .. })
            ),
            _ => false,
        }
    }

    /// Reject literals that cannot be represented at the given width.
    /// Both signednesses' ranges are accepted; the value is reduced to the
    /// target representation later.
    pub(crate) fn check_fits(&mut self, v: i64, width_bytes: u32, pos: Pos) -> Option<()> {
        let bits = width_bytes * 8;
        let min = -(1i64 << (bits - 1));
        let max = (1i64 << bits) - 1;
        if v < min || v > max {
            let msg = format!("value {} does not fit in {} bits", v, bits);
            self.error(msg, pos);
            return None;
        }
        Some(())
    }

    // ---- expression lowering ----

    /// Lower an expression, adapting typeless literals to `expected`.
    pub(crate) fn lower_expr(
        &mut self,
        e: &ast::Expr,
        expected: Option<TypeId>,
    ) -> Option<hir::Expr> {
        let pos = e.pos;
        match &e.kind {
            ast::ExprKind::Int(_)
            | ast::ExprKind::Sizeof(_)
            | ast::ExprKind::Bytesof(_)
                if self.is_untyped(e) =>
            {
                self.lower_literal(e, expected)
            }
            ast::ExprKind::Neg(_) | ast::ExprKind::Binary { .. } if self.is_untyped(e) => {
                self.lower_literal(e, expected)
            }
            ast::ExprKind::Int(_) => unreachable!("Int is always untyped"),
            ast::ExprKind::Char(c) => Some(hir::Expr::int(*c as i64, T_U8, pos)),
            ast::ExprKind::Str(bytes) => {
                let id = self.pool_string(bytes);
                let ty = self.types.pointer_to(T_U8);
                Some(hir::Expr::new(hir::ExprKind::Str(id), ty, pos))
            }
            ast::ExprKind::Nil => match expected {
                Some(ty) if self.types.is_pointer(ty) || self.types.is_interface(ty) => {
                    Some(hir::Expr::int(0, ty, pos))
                }
                _ => {
                    self.error("'nil' needs a pointer-typed context", pos);
                    None
                }
            },
            ast::ExprKind::Name(name) => self.lower_name(*name, expected, pos),
            ast::ExprKind::Field { base, field } => self.lower_field(base, *field, pos),
            ast::ExprKind::Index { base, index } => self.lower_index(base, index, pos),
            ast::ExprKind::Deref(inner) => {
                let ptr = self.lower_expr(inner, None)?;
                match self.types.pointee(ptr.ty) {
                    Some(pointee) => Some(hir::Expr::new(
                        hir::ExprKind::Deref(Box::new(ptr)),
                        pointee,
                        pos,
                    )),
                    None => {
                        let msg = format!(
                            "cannot dereference a value of type {}",
                            self.types.display(ptr.ty, self.interner)
                        );
                        self.error(msg, pos);
                        None
                    }
                }
            }
            ast::ExprKind::AddrOf(inner) => {
                if !matches!(inner.kind, ast::ExprKind::Field { .. }) {
                    self.error("'&' applies only to record fields", pos);
                    return None;
                }
                let field = self.lower_expr(inner, None)?;
                let ty = self.types.pointer_to(field.ty);
                Some(hir::Expr::new(
                    hir::ExprKind::AddrOf(Box::new(field)),
                    ty,
                    pos,
                ))
            }
            ast::ExprKind::Neg(inner) => {
                let operand = self.lower_expr(inner, expected)?;
                if !self.types.is_int(operand.ty) {
                    self.error("unary minus needs an integer operand", pos);
                    return None;
                }
                let ty = operand.ty;
                Some(hir::Expr::new(
                    hir::ExprKind::Neg(Box::new(operand)),
                    ty,
                    pos,
                ))
            }
            ast::ExprKind::Binary { op, lhs, rhs } => {
                self.lower_binary(*op, lhs, rhs, expected, pos)
            }
            ast::ExprKind::Cast { expr, ty } => self.lower_cast(expr, ty, pos),
            ast::ExprKind::Call { callee, args } => {
                let (target, args, ret_slots) = self.lower_call_common(callee, args, pos)?;
                if ret_slots.len() != 1 {
                    let msg = format!(
                        "a call used as a value must return exactly one value, \
                         this one returns {}",
                        ret_slots.len()
                    );
                    self.error(msg, pos);
                    return None;
                }
                let ty = self.syms.var_type(ret_slots[0]).expect("ret slots are vars");
                let kind = match target {
                    CallTarget::Sub(sub) => hir::ExprKind::Call { sub, args },
                    CallTarget::Indirect(target) => hir::ExprKind::CallIndirect {
                        target: Box::new(target),
                        args,
                    },
                };
                Some(hir::Expr::new(kind, ty, pos))
            }
            ast::ExprKind::Sizeof(_) | ast::ExprKind::Bytesof(_) => {
                // Reachable when the operand is typed; still a constant.
                self.lower_literal(e, expected)
            }
            ast::ExprKind::IndexOf(operand) => {
                let (value, ty) = self.meta_value(MetaOp::IndexOf, operand)?;
                Some(hir::Expr::int(value, ty.expect("@indexof has a type"), pos))
            }
            ast::ExprKind::Next(inner) => self.lower_step(inner, BinOp::Add, pos),
            ast::ExprKind::Prev(inner) => self.lower_step(inner, BinOp::Sub, pos),
        }
    }

    /// Lower and require an exact type; used for assignment values and
    /// call arguments.
    pub(crate) fn lower_expr_expecting(
        &mut self,
        e: &ast::Expr,
        expected: TypeId,
    ) -> Option<hir::Expr> {
        let value = self.lower_expr(e, Some(expected))?;
        if !self.types.equal(value.ty, expected) {
            let msg = format!(
                "type mismatch: expected {}, found {}",
                self.types.display(expected, self.interner),
                self.types.display(value.ty, self.interner)
            );
            self.error(msg, e.pos);
            return None;
        }
        Some(value)
    }

    fn lower_literal(&mut self, e: &ast::Expr, expected: Option<TypeId>) -> Option<hir::Expr> {
        let value = self.consteval(e)?;
        let ty = match expected {
            Some(ty) if self.types.is_int(ty) => ty,
            Some(ty) => {
                let msg = format!(
                    "integer literal where {} is expected",
                    self.types.display(ty, self.interner)
                );
                self.error(msg, e.pos);
                return None;
            }
            None => {
                self.error("cannot infer the width of this integer literal", e.pos);
                return None;
            }
        };
        let (_, width) = self.types.int_info(ty).expect("checked integer");
        self.check_fits(value, width, e.pos)?;
        Some(hir::Expr::int(value, ty, e.pos))
    }

    fn pool_string(&mut self, bytes: &[u8]) -> StrId {
        // One entry per distinct literal; each is emitted once.
        if let Some(ix) = self.strings.iter().position(|s| s == bytes) {
            return StrId(ix as u32);
        }
        let id = StrId(self.strings.len() as u32);
        self.strings.push(bytes.to_vec());
        id
    }

    fn lower_name(
        &mut self,
        name: cowc_util::Name,
        expected: Option<TypeId>,
        pos: Pos,
    ) -> Option<hir::Expr> {
        let sym = self.resolve(name, pos)?;
        match self.syms.get(sym).kind.clone() {
            SymKind::Var { ty, owner, .. } => {
                self.note_capture(sym, owner);
                Some(hir::Expr::new(hir::ExprKind::Var(sym), ty, pos))
            }
            SymKind::Const { value } => {
                let lit = ast::Expr {
                    kind: ast::ExprKind::Int(value),
                    pos,
                };
                self.lower_literal(&lit, expected)
            }
            SymKind::Sub(sub_id) => {
                let iface = self.subs[sub_id.index()].interface;
                match (expected, iface) {
                    (Some(want), Some(have))
                        if self.types.equal(want, have) =>
                    {
                        self.subs[sub_id.index()].address_taken = true;
                        Some(hir::Expr::new(hir::ExprKind::SubAddr(sub_id), have, pos))
                    }
                    (_, None) => {
                        let msg = format!(
                            "subroutine '{}' implements no interface and cannot \
                             be used as a value",
                            self.name_str(name)
                        );
                        self.error(msg, pos);
                        None
                    }
                    _ => {
                        let msg = format!(
                            "subroutine '{}' does not implement the expected \
                             interface",
                            self.name_str(name)
                        );
                        self.error(msg, pos);
                        None
                    }
                }
            }
            SymKind::Type(_) => {
                let msg = format!("type '{}' used as a value", self.name_str(name));
                self.error(msg, pos);
                None
            }
        }
    }

    /// A read of a local belonging to an enclosing subroutine pins it as
    /// captured: calls may touch it, and its frame must stay live.
    fn note_capture(&mut self, sym: SymId, owner: Option<SubId>) {
        if let Some(owner) = owner {
            if owner != self.current_sub() && owner != MAIN {
                self.captured.insert(sym);
            }
        }
    }

    fn lower_field(
        &mut self,
        base: &ast::Expr,
        field: cowc_util::Name,
        pos: Pos,
    ) -> Option<hir::Expr> {
        let base = self.lower_expr(base, None)?;
        if !self.is_lvalue(&base.kind) {
            self.error("field access needs an addressable record", pos);
            return None;
        }
        let info = match self.types.find_field(base.ty, field) {
            Some(info) => info,
            None => {
                let msg = format!(
                    "type {} has no field '{}'",
                    self.types.display(base.ty, self.interner),
                    self.name_str(field)
                );
                self.error(msg, pos);
                return None;
            }
        };
        Some(hir::Expr::new(
            hir::ExprKind::Field {
                base: Box::new(base),
                field,
                offset: info.offset,
            },
            info.ty,
            pos,
        ))
    }

    fn lower_index(
        &mut self,
        base: &ast::Expr,
        index: &ast::Expr,
        pos: Pos,
    ) -> Option<hir::Expr> {
        let base = self.lower_expr(base, None)?;
        let (elem, len) = match self.types.array_elem(base.ty) {
            Some(pair) => pair,
            None => {
                let msg = format!(
                    "cannot index a value of type {}",
                    self.types.display(base.ty, self.interner)
                );
                self.error(msg, pos);
                return None;
            }
        };
        if !self.is_lvalue(&base.kind) {
            self.error("indexing needs an addressable array", pos);
            return None;
        }
        let index_ty = TypeTable::index_type(len);
        let index = self.lower_expr_expecting(index, index_ty)?;
        if let Some(v) = index.as_int() {
            if v < 0 || v as u32 >= len {
                let msg = format!("index {} is out of range for {} elements", v, len);
                self.error(msg, pos);
                return None;
            }
        }
        Some(hir::Expr::new(
            hir::ExprKind::Index {
                base: Box::new(base),
                index: Box::new(index),
            },
            elem,
            pos,
        ))
    }

    fn lower_binary(
        &mut self,
        op: BinOp,
        lhs: &ast::Expr,
        rhs: &ast::Expr,
        expected: Option<TypeId>,
        pos: Pos,
    ) -> Option<hir::Expr> {
        // Shifts type their sides independently: the count is uint8.
        if matches!(op, BinOp::Shl | BinOp::Shr) {
            let lhs = self.lower_expr(lhs, expected)?;
            if !self.types.is_int(lhs.ty) {
                self.error("shift needs an integer left operand", pos);
                return None;
            }
            let rhs = self.lower_expr_expecting(rhs, T_U8)?;
            let ty = lhs.ty;
            return Some(hir::Expr::new(
                hir::ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                ty,
                pos,
            ));
        }

        // Let a typed side pin down a literal side.
        let (lhs, rhs) = if self.is_untyped(lhs) && !self.is_untyped(rhs) {
            let rhs = self.lower_expr(rhs, expected)?;
            let lhs = self.lower_expr_expecting(lhs, rhs.ty)?;
            (lhs, rhs)
        } else {
            let lhs = self.lower_expr(lhs, expected)?;
            let rhs = self.lower_rhs_for(&lhs, op, rhs)?;
            (lhs, rhs)
        };

        // Pointer arithmetic is byte-wise: ptr + n and ptr - n keep the
        // pointer type, ptr - ptr yields intptr.
        if self.types.is_pointer(lhs.ty) {
            match op {
                BinOp::Add | BinOp::Sub => {}
                _ => {
                    self.error("only '+' and '-' apply to pointers", pos);
                    return None;
                }
            }
            let ty = if self.types.is_pointer(rhs.ty) {
                if op != BinOp::Sub || !self.types.equal(lhs.ty, rhs.ty) {
                    self.error("pointer operands must match and only subtract", pos);
                    return None;
                }
                T_U16
            } else if self.types.equal(rhs.ty, T_U16) {
                lhs.ty
            } else {
                self.error("pointer offsets must be intptr-sized", pos);
                return None;
            };
            return Some(hir::Expr::new(
                hir::ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                ty,
                pos,
            ));
        }

        if !self.types.is_int(lhs.ty) || !self.types.equal(lhs.ty, rhs.ty) {
            let msg = format!(
                "operands must have identical integer types, found {} and {}",
                self.types.display(lhs.ty, self.interner),
                self.types.display(rhs.ty, self.interner)
            );
            self.error(msg, pos);
            return None;
        }
        let ty = lhs.ty;
        Some(hir::Expr::new(
            hir::ExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            ty,
            pos,
        ))
    }

    /// Lower the right operand once the left's type is known. Pointer
    /// left-hand sides take an intptr offset (or a matching pointer for
    /// subtraction).
    fn lower_rhs_for(
        &mut self,
        lhs: &hir::Expr,
        op: BinOp,
        rhs: &ast::Expr,
    ) -> Option<hir::Expr> {
        if self.types.is_pointer(lhs.ty) && matches!(op, BinOp::Add | BinOp::Sub) {
            if self.is_untyped(rhs) {
                return self.lower_expr(rhs, Some(T_U16));
            }
            return self.lower_expr(rhs, None);
        }
        self.lower_expr(rhs, Some(lhs.ty))
    }

    fn lower_cast(
        &mut self,
        operand: &ast::Expr,
        target: &ast::TypeRef,
        pos: Pos,
    ) -> Option<hir::Expr> {
        let target = self.resolve_type_ref(target, pos)?;

        // A literal cast folds immediately, wrapping at the target width.
        if self.is_untyped(operand) {
            let v = self.consteval(operand)?;
            return match self.types.int_info(target) {
                Some((signed, width)) => {
                    Some(hir::Expr::int(wrap_value(v, signed, width), target, pos))
                }
                None => {
                    self.error("cannot cast a literal to this type", pos);
                    None
                }
            };
        }

        let operand = self.lower_expr(operand, None)?;
        let from_int = self.types.is_int(operand.ty);
        let from_ptr = self.types.is_pointer(operand.ty);
        let to_int = self.types.is_int(target);
        let to_ptr = self.types.is_pointer(target);
        let ptr_sized = |t: &Analyzer, ty: TypeId| {
            t.types.int_info(ty).map(|(_, w)| w == 2).unwrap_or(false)
        };

        let legal = (from_int && to_int)
            || (from_ptr && to_ptr)
            || (from_ptr && to_int && ptr_sized(self, target))
            || (from_int && to_ptr && ptr_sized(self, operand.ty));
        if !legal {
            let msg = format!(
                "cannot cast {} to {}",
                self.types.display(operand.ty, self.interner),
                self.types.display(target, self.interner)
            );
            self.error(msg, pos);
            return None;
        }
        Some(hir::Expr::new(
            hir::ExprKind::Cast(Box::new(operand)),
            target,
            pos,
        ))
    }

    /// `@next`/`@prev`: pointer stepped by exactly one pointee.
    fn lower_step(&mut self, inner: &ast::Expr, op: BinOp, pos: Pos) -> Option<hir::Expr> {
        let ptr = self.lower_expr(inner, None)?;
        let pointee = match self.types.pointee(ptr.ty) {
            Some(p) => p,
            None => {
                self.error("@next/@prev need a pointer operand", pos);
                return None;
            }
        };
        let size = self.types.size_of(pointee);
        let ty = ptr.ty;
        Some(hir::Expr::new(
            hir::ExprKind::Binary {
                op,
                lhs: Box::new(ptr),
                rhs: Box::new(hir::Expr::int(size as i64, T_U16, pos)),
            },
            ty,
            pos,
        ))
    }

    pub(crate) fn is_lvalue(&self, kind: &hir::ExprKind) -> bool {
        matches!(
            kind,
            hir::ExprKind::Var(_)
                | hir::ExprKind::Field { .. }
                | hir::ExprKind::Index { .. }
                | hir::ExprKind::Deref(_)
        )
    }

    // ---- @sizeof / @bytesof / @indexof ----

    fn meta_value(
        &mut self,
        op: MetaOp,
        operand: &ast::Expr,
    ) -> Option<(i64, Option<TypeId>)> {
        let pos = operand.pos;
        let name = match &operand.kind {
            ast::ExprKind::Name(name) => *name,
            _ => {
                self.error(
                    "@sizeof/@bytesof/@indexof take a variable or type name",
                    pos,
                );
                return None;
            }
        };
        let sym = self.resolve(name, pos)?;
        let ty = match &self.syms.get(sym).kind {
            SymKind::Var { ty, .. } => *ty,
            SymKind::Type(ty) => *ty,
            _ => {
                let msg = format!(
                    "'{}' names neither a variable nor a type",
                    self.name_str(name)
                );
                self.error(msg, pos);
                return None;
            }
        };
        match op {
            MetaOp::Sizeof => match self.types.array_elem(ty) {
                Some((_, len)) => Some((len as i64, None)),
                None => Some((1, None)),
            },
            MetaOp::Bytesof => Some((self.types.size_of(ty) as i64, None)),
            MetaOp::IndexOf => match self.types.array_elem(ty) {
                Some((_, len)) => Some((len as i64, Some(TypeTable::index_type(len)))),
                None => {
                    let msg =
                        format!("'{}' is not an array variable", self.name_str(name));
                    self.error(msg, pos);
                    None
                }
            },
        }
    }

    // ---- conditions ----

    pub(crate) fn lower_cond(&mut self, cond: &ast::Cond) -> Option<hir::Cond> {
        let pos = cond.pos;
        let kind = match &cond.kind {
            ast::CondKind::Cmp { op, lhs, rhs } => return self.lower_cmp(*op, lhs, rhs, pos),
            ast::CondKind::And(a, b) => hir::CondKind::And(
                Box::new(self.lower_cond(a)?),
                Box::new(self.lower_cond(b)?),
            ),
            ast::CondKind::Or(a, b) => hir::CondKind::Or(
                Box::new(self.lower_cond(a)?),
                Box::new(self.lower_cond(b)?),
            ),
            ast::CondKind::Not(inner) => hir::CondKind::Not(Box::new(self.lower_cond(inner)?)),
        };
        Some(hir::Cond { kind, pos })
    }

    fn lower_cmp(
        &mut self,
        op: CmpOp,
        lhs: &ast::Expr,
        rhs: &ast::Expr,
        pos: Pos,
    ) -> Option<hir::Cond> {
        // Two literals compare as plain numbers; a single literal side
        // adopts the other's type.
        let (lhs, rhs) = match (self.is_untyped(lhs), self.is_untyped(rhs)) {
            (true, true) => {
                let l = self.lower_expr_expecting(lhs, T_U16)?;
                let r = self.lower_expr_expecting(rhs, T_U16)?;
                (l, r)
            }
            (true, false) => {
                let r = self.lower_expr(rhs, None)?;
                let l = self.lower_expr_expecting(lhs, r.ty)?;
                (l, r)
            }
            _ => {
                let l = self.lower_expr(lhs, None)?;
                let r = self.lower_expr_expecting(rhs, l.ty)?;
                (l, r)
            }
        };

        if !self.types.is_scalar(lhs.ty) {
            self.error("comparisons need scalar operands", pos);
            return None;
        }
        if self.types.is_interface(lhs.ty) && !matches!(op, CmpOp::Eq | CmpOp::Ne) {
            self.error("interface values only compare with '==' and '!='", pos);
            return None;
        }
        Some(hir::Cond {
            kind: hir::CondKind::Cmp { op, lhs, rhs },
            pos,
        })
    }

    // ---- calls and call-shaped statements ----

    /// Shared lowering for calls: resolves the target, checks and lowers
    /// arguments, and reports the callee's return slots.
    pub(crate) fn lower_call_common(
        &mut self,
        callee: &ast::Expr,
        args: &[ast::Expr],
        pos: Pos,
    ) -> Option<(CallTarget, Vec<hir::Expr>, Vec<SymId>)> {
        // A direct call to a subroutine by name.
        if let ast::ExprKind::Name(name) = callee.kind {
            if let Some(sym) = self.scopes.lookup(name) {
                if let SymKind::Sub(sub_id) = &self.syms.get(sym).kind {
                    let sub_id = *sub_id;
                    let (params, rets) = {
                        let sub = &self.subs[sub_id.index()];
                        (sub.params.clone(), sub.rets.clone())
                    };
                    let args = self.lower_args(&params, args, pos)?;
                    return Some((CallTarget::Sub(sub_id), args, rets));
                }
            }
        }

        // Otherwise the callee is an interface-typed value.
        let target = self.lower_expr(callee, None)?;
        let stripped = self.types.strip(target.ty);
        let (params, rets) = match self.types.kind(stripped) {
            TypeKind::Interface(i) => (i.params.clone(), i.rets.clone()),
            _ => {
                let msg = format!(
                    "cannot call a value of type {}",
                    self.types.display(target.ty, self.interner)
                );
                self.error(msg, pos);
                return None;
            }
        };
        let args = self.lower_args(&params, args, pos)?;
        Some((CallTarget::Indirect(target), args, rets))
    }

    fn lower_args(
        &mut self,
        params: &[SymId],
        args: &[ast::Expr],
        pos: Pos,
    ) -> Option<Vec<hir::Expr>> {
        if params.len() != args.len() {
            let msg = format!(
                "call takes {} arguments, {} given",
                params.len(),
                args.len()
            );
            self.error(msg, pos);
            return None;
        }
        let mut lowered = Vec::with_capacity(args.len());
        for (param, arg) in params.iter().zip(args) {
            let ty = self.syms.var_type(*param).expect("params are variables");
            lowered.push(self.lower_expr_expecting(arg, ty)?);
        }
        Some(lowered)
    }

    pub(crate) fn lower_assign(
        &mut self,
        target: &ast::Expr,
        value: &ast::Expr,
        pos: Pos,
    ) -> Option<hir::Stmt> {
        let target = self.lower_lvalue(target)?;
        if !self.types.is_scalar(target.ty) {
            self.error("only scalar values can be assigned", pos);
            return None;
        }
        let value = self.lower_expr_expecting(value, target.ty)?;
        Some(hir::Stmt {
            kind: hir::StmtKind::Assign { target, value },
            pos,
        })
    }

    pub(crate) fn lower_lvalue(&mut self, e: &ast::Expr) -> Option<hir::Expr> {
        let lowered = self.lower_expr(e, None)?;
        if !self.is_lvalue(&lowered.kind) {
            self.error("expression is not assignable", e.pos);
            return None;
        }
        if let hir::ExprKind::Var(sym) = lowered.kind {
            if self.syms.var_type(sym).is_none() {
                self.error("expression is not assignable", e.pos);
                return None;
            }
        }
        Some(lowered)
    }

    pub(crate) fn lower_call_stmt(&mut self, expr: &ast::Expr, pos: Pos) -> Option<hir::Stmt> {
        let (callee, args) = match &expr.kind {
            ast::ExprKind::Call { callee, args } => (callee.as_ref(), args.as_slice()),
            _ => {
                self.error("expected a call in statement position", pos);
                return None;
            }
        };
        let (target, args, _rets) = self.lower_call_common(callee, args, pos)?;
        Some(hir::Stmt {
            kind: hir::StmtKind::Call {
                target,
                args,
                rets: Vec::new(),
            },
            pos,
        })
    }

    pub(crate) fn lower_multi_assign(
        &mut self,
        targets: &[ast::Expr],
        call: &ast::Expr,
        pos: Pos,
    ) -> Option<hir::Stmt> {
        let (callee, args) = match &call.kind {
            ast::ExprKind::Call { callee, args } => (callee.as_ref(), args.as_slice()),
            _ => {
                self.error("the right side of a multi-assignment must be a call", pos);
                return None;
            }
        };
        let (target, args, ret_slots) = self.lower_call_common(callee, args, pos)?;
        if ret_slots.len() != targets.len() {
            let msg = format!(
                "call returns {} values but {} targets are given",
                ret_slots.len(),
                targets.len()
            );
            self.error(msg, pos);
            return None;
        }
        let mut rets = Vec::with_capacity(targets.len());
        for (target_ast, slot) in targets.iter().zip(&ret_slots) {
            let lowered = self.lower_lvalue(target_ast)?;
            let slot_ty = self.syms.var_type(*slot).expect("ret slots are variables");
            if !self.types.equal(lowered.ty, slot_ty) {
                let msg = format!(
                    "return value of type {} cannot be stored into {}",
                    self.types.display(slot_ty, self.interner),
                    self.types.display(lowered.ty, self.interner)
                );
                self.error(msg, target_ast.pos);
                return None;
            }
            rets.push(lowered);
        }
        Some(hir::Stmt {
            kind: hir::StmtKind::Call { target, args, rets },
            pos,
        })
    }

    pub(crate) fn lower_case(
        &mut self,
        scrutinee: &ast::Expr,
        arms: &[ast::CaseArm],
        else_body: Option<&[ast::Stmt]>,
        pos: Pos,
    ) -> Option<hir::Stmt> {
        let scrutinee = self.lower_expr(scrutinee, None)?;
        let width = match self.types.int_info(scrutinee.ty) {
            Some((_, w)) if w <= 2 => w,
            _ => {
                self.error("case needs an 8- or 16-bit integer scrutinee", pos);
                return None;
            }
        };

        let mut lowered_arms = Vec::with_capacity(arms.len());
        let mut seen = std::collections::BTreeSet::new();
        for arm in arms {
            let mut values = Vec::with_capacity(arm.values.len());
            for value in &arm.values {
                let v = self.consteval(value)?;
                self.check_fits(v, width, value.pos)?;
                if !seen.insert(v) {
                    let msg = format!("duplicate case value {}", v);
                    self.error(msg, value.pos);
                    return None;
                }
                values.push(v);
            }
            let body = self.lower_block(&arm.body)?;
            lowered_arms.push((values, body));
        }
        let else_body = match else_body {
            Some(body) => Some(self.lower_block(body)?),
            None => None,
        };
        Some(hir::Stmt {
            kind: hir::StmtKind::Case {
                scrutinee,
                arms: lowered_arms,
                else_body,
            },
            pos,
        })
    }
}

#[derive(Clone, Copy)]
enum MetaOp {
    Sizeof,
    Bytesof,
    IndexOf,
}
