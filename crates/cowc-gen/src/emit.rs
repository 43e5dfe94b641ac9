//! Instruction emission.
//!
//! Expressions evaluate into A (8-bit), HL (16-bit) or the static
//! `longacc` scratch (32-bit). Binary operators compute the left subtree,
//! push it, compute the right subtree and pop the left back; multiply,
//! divide and the whole of 32-bit arithmetic go through the fixed runtime
//! helpers. Comparisons feed conditional jumps directly and never
//! materialize a boolean.

use cowc_sem::hir::{
    AsmChunk, BinOp, Block, CallTarget, CmpOp, Cond, CondKind, Expr, ExprKind, Program, Stmt,
    StmtKind, SubId, MAIN,
};
use cowc_sem::SymId;

use crate::insn::{Imm, Insn, R8, Rp};
use crate::layout::Layout;
use crate::GenError;

/// Runtime exit label; control jumps here when the top-level code ends.
pub const EXIT_HELPER: &str = "f_exit";

pub(crate) struct CodeGen<'a> {
    prog: &'a Program,
    layout: &'a Layout,
    inline: &'a [bool],
    pub code: Vec<Insn>,
    label_n: u32,
    /// (continue target, break target) per enclosing loop.
    loop_stack: Vec<(String, String)>,
    /// End labels of in-progress inline expansions; `return` jumps here.
    inline_end: Vec<String>,
    current: SubId,
    pub used_longacc: bool,
}

impl<'a> CodeGen<'a> {
    pub fn new(prog: &'a Program, layout: &'a Layout, inline: &'a [bool]) -> Self {
        Self {
            prog,
            layout,
            inline,
            code: Vec::new(),
            label_n: 0,
            loop_stack: Vec::new(),
            inline_end: Vec::new(),
            current: MAIN,
            used_longacc: false,
        }
    }

    fn emit(&mut self, insn: Insn) {
        self.code.push(insn);
    }

    fn fresh_label(&mut self) -> String {
        self.label_n += 1;
        format!("l_{}", self.label_n)
    }

    fn width(&self, e: &Expr) -> u32 {
        self.prog.types.size_of(e.ty)
    }

    fn signed(&self, e: &Expr) -> bool {
        self.prog.types.is_signed(e.ty)
    }

    fn var_imm(&self, sym: SymId) -> Imm {
        Imm::Label(self.layout.var_label(sym).to_string())
    }

    fn var_imm_off(&self, sym: SymId, off: i32) -> Imm {
        Imm::LabelOff(self.layout.var_label(sym).to_string(), off)
    }

    fn ice<T>(&self, msg: &str) -> Result<T, GenError> {
        Err(GenError::Internal(msg.to_string()))
    }

    // ---- subroutines ----

    pub fn gen_sub(&mut self, sub_id: SubId) -> Result<(), GenError> {
        self.current = sub_id;
        let label = self.layout.sub_label(sub_id).to_string();
        self.emit(Insn::Label(label));
        let body = &self.prog.sub(sub_id).body;
        self.gen_block(body)?;
        if sub_id == MAIN {
            self.emit(Insn::Jmp(Imm::Label(EXIT_HELPER.into())));
        } else if !matches!(self.code.last(), Some(Insn::Ret | Insn::Jmp(_))) {
            self.emit(Insn::Ret);
        }
        Ok(())
    }

    fn gen_block(&mut self, block: &[Stmt]) -> Result<(), GenError> {
        for stmt in block {
            self.gen_stmt(stmt)?;
        }
        Ok(())
    }

    fn gen_stmt(&mut self, stmt: &Stmt) -> Result<(), GenError> {
        match &stmt.kind {
            StmtKind::Assign { target, value } => self.gen_assign(target, value),
            StmtKind::Call { target, args, rets } => self.gen_call(target, args, rets),
            StmtKind::If { arms, else_body } => self.gen_if(arms, else_body.as_deref()),
            StmtKind::While { cond, body } => self.gen_while(cond, body),
            StmtKind::Loop { body } => self.gen_loop(body),
            StmtKind::Break => match self.loop_stack.last() {
                Some((_, brk)) => {
                    let target = Imm::Label(brk.clone());
                    self.emit(Insn::Jmp(target));
                    Ok(())
                }
                None => self.ice("break outside a loop survived analysis"),
            },
            StmtKind::Continue => match self.loop_stack.last() {
                Some((cont, _)) => {
                    let target = Imm::Label(cont.clone());
                    self.emit(Insn::Jmp(target));
                    Ok(())
                }
                None => self.ice("continue outside a loop survived analysis"),
            },
            StmtKind::Return => {
                if let Some(end) = self.inline_end.last() {
                    let target = Imm::Label(end.clone());
                    self.emit(Insn::Jmp(target));
                } else if self.current == MAIN {
                    self.emit(Insn::Jmp(Imm::Label(EXIT_HELPER.into())));
                } else {
                    self.emit(Insn::Ret);
                }
                Ok(())
            }
            StmtKind::Case {
                scrutinee,
                arms,
                else_body,
            } => self.gen_case(scrutinee, arms, else_body.as_deref()),
            StmtKind::Asm { parts } => {
                let mut text = String::new();
                for part in parts {
                    match part {
                        AsmChunk::Text(t) => text.push_str(t),
                        AsmChunk::Var(sym) => text.push_str(self.layout.var_label(*sym)),
                    }
                }
                self.emit(Insn::Raw(text));
                Ok(())
            }
        }
    }

    // ---- control flow ----

    fn gen_if(&mut self, arms: &[(Cond, Block)], else_body: Option<&[Stmt]>) -> Result<(), GenError> {
        let end = self.fresh_label();
        for (cond, body) in arms {
            let then_label = self.fresh_label();
            let next_label = self.fresh_label();
            self.gen_cond(cond, &then_label, &next_label)?;
            self.emit(Insn::Label(then_label));
            self.gen_block(body)?;
            self.emit(Insn::Jmp(Imm::Label(end.clone())));
            self.emit(Insn::Label(next_label));
        }
        if let Some(body) = else_body {
            self.gen_block(body)?;
        }
        self.emit(Insn::Label(end));
        Ok(())
    }

    fn gen_while(&mut self, cond: &Cond, body: &Block) -> Result<(), GenError> {
        let top = self.fresh_label();
        let enter = self.fresh_label();
        let end = self.fresh_label();
        self.emit(Insn::Label(top.clone()));
        self.gen_cond(cond, &enter, &end)?;
        self.emit(Insn::Label(enter));
        self.loop_stack.push((top.clone(), end.clone()));
        let body_result = self.gen_block(body);
        self.loop_stack.pop();
        body_result?;
        self.emit(Insn::Jmp(Imm::Label(top)));
        self.emit(Insn::Label(end));
        Ok(())
    }

    fn gen_loop(&mut self, body: &Block) -> Result<(), GenError> {
        let top = self.fresh_label();
        let end = self.fresh_label();
        self.emit(Insn::Label(top.clone()));
        self.loop_stack.push((top.clone(), end.clone()));
        let body_result = self.gen_block(body);
        self.loop_stack.pop();
        body_result?;
        self.emit(Insn::Jmp(Imm::Label(top)));
        self.emit(Insn::Label(end));
        Ok(())
    }

    fn gen_case(
        &mut self,
        scrutinee: &Expr,
        arms: &[(Vec<i64>, Block)],
        else_body: Option<&[Stmt]>,
    ) -> Result<(), GenError> {
        let end = self.fresh_label();
        let arm_labels: Vec<String> = arms.iter().map(|_| self.fresh_label()).collect();
        let width = self.width(scrutinee);

        match width {
            1 => {
                self.gen_expr_byte(scrutinee)?;
                for ((values, _), label) in arms.iter().zip(&arm_labels) {
                    for v in values {
                        self.emit(Insn::Cpi(*v as u8));
                        self.emit(Insn::Jz(Imm::Label(label.clone())));
                    }
                }
            }
            2 => {
                self.gen_expr_word(scrutinee)?;
                for ((values, _), label) in arms.iter().zip(&arm_labels) {
                    for v in values {
                        let v = *v as u16;
                        // Subtract-and-test against the immediate; HL is
                        // preserved for the next arm.
                        self.emit(Insn::Mov(R8::A, R8::L));
                        self.emit(Insn::Sui(v as u8));
                        self.emit(Insn::Mov(R8::B, R8::A));
                        self.emit(Insn::Mov(R8::A, R8::H));
                        self.emit(Insn::Sbi((v >> 8) as u8));
                        self.emit(Insn::Ora(R8::B));
                        self.emit(Insn::Jz(Imm::Label(label.clone())));
                    }
                }
            }
            _ => return self.ice("case scrutinee wider than 16 bits"),
        }

        let else_label = self.fresh_label();
        self.emit(Insn::Jmp(Imm::Label(else_label.clone())));
        for ((_, body), label) in arms.iter().zip(&arm_labels) {
            self.emit(Insn::Label(label.clone()));
            self.gen_block(body)?;
            self.emit(Insn::Jmp(Imm::Label(end.clone())));
        }
        self.emit(Insn::Label(else_label));
        if let Some(body) = else_body {
            self.gen_block(body)?;
        }
        self.emit(Insn::Label(end));
        Ok(())
    }

    // ---- conditions ----

    /// Emit jumps so control reaches `tl` when the condition holds and
    /// `fl` otherwise. Short-circuiting falls out of the recursion: each
    /// operand jumps straight to the consuming target.
    fn gen_cond(&mut self, cond: &Cond, tl: &str, fl: &str) -> Result<(), GenError> {
        match &cond.kind {
            CondKind::Const(true) => {
                self.emit(Insn::Jmp(Imm::Label(tl.to_string())));
                Ok(())
            }
            CondKind::Const(false) => {
                self.emit(Insn::Jmp(Imm::Label(fl.to_string())));
                Ok(())
            }
            CondKind::Not(inner) => self.gen_cond(inner, fl, tl),
            CondKind::And(a, b) => {
                let mid = self.fresh_label();
                self.gen_cond(a, &mid, fl)?;
                self.emit(Insn::Label(mid));
                self.gen_cond(b, tl, fl)
            }
            CondKind::Or(a, b) => {
                let mid = self.fresh_label();
                self.gen_cond(a, tl, &mid)?;
                self.emit(Insn::Label(mid));
                self.gen_cond(b, tl, fl)
            }
            CondKind::Cmp { op, lhs, rhs } => self.gen_cmp(*op, lhs, rhs, tl, fl),
        }
    }

    fn gen_cmp(
        &mut self,
        op: CmpOp,
        lhs: &Expr,
        rhs: &Expr,
        tl: &str,
        fl: &str,
    ) -> Result<(), GenError> {
        let width = self.width(lhs);
        let signed = self.signed(lhs);
        match width {
            1 => self.gen_cmp_byte(op, lhs, rhs, signed, tl, fl),
            2 => self.gen_cmp_word(op, lhs, rhs, signed, tl, fl),
            4 => self.gen_cmp_long(op, lhs, rhs, signed, tl, fl),
            _ => self.ice("comparison operand of impossible width"),
        }
    }

    /// After this, carry means `lhs < rhs` and zero means equality, so
    /// one jump table serves every width.
    fn jump_on(&mut self, op: CmpOp, tl: &str, fl: &str) {
        let tl = Imm::Label(tl.to_string());
        let fl = Imm::Label(fl.to_string());
        match op {
            CmpOp::Eq => {
                self.emit(Insn::Jz(tl));
                self.emit(Insn::Jmp(fl));
            }
            CmpOp::Ne => {
                self.emit(Insn::Jnz(tl));
                self.emit(Insn::Jmp(fl));
            }
            CmpOp::Lt => {
                self.emit(Insn::Jc(tl));
                self.emit(Insn::Jmp(fl));
            }
            CmpOp::Ge => {
                self.emit(Insn::Jnc(tl));
                self.emit(Insn::Jmp(fl));
            }
            CmpOp::Le => {
                self.emit(Insn::Jc(tl.clone()));
                self.emit(Insn::Jz(tl));
                self.emit(Insn::Jmp(fl));
            }
            CmpOp::Gt => {
                self.emit(Insn::Jc(fl.clone()));
                self.emit(Insn::Jz(fl));
                self.emit(Insn::Jmp(tl));
            }
        }
    }

    fn gen_cmp_byte(
        &mut self,
        op: CmpOp,
        lhs: &Expr,
        rhs: &Expr,
        signed: bool,
        tl: &str,
        fl: &str,
    ) -> Result<(), GenError> {
        self.gen_expr_byte(lhs)?;
        if signed {
            match rhs.as_int() {
                Some(v) => self.emit(Insn::Mvi(R8::B, v as u8)),
                None => {
                    self.emit(Insn::Push(Rp::Psw));
                    self.gen_expr_byte(rhs)?;
                    self.emit(Insn::Mov(R8::B, R8::A));
                    self.emit(Insn::Pop(Rp::Psw));
                }
            }
            self.emit(Insn::Call(Imm::Label("f_scmp8".into())));
        } else {
            match rhs.as_int() {
                // Immediate byte compares use CPI directly.
                Some(v) => self.emit(Insn::Cpi(v as u8)),
                None => {
                    self.emit(Insn::Push(Rp::Psw));
                    self.gen_expr_byte(rhs)?;
                    self.emit(Insn::Mov(R8::B, R8::A));
                    self.emit(Insn::Pop(Rp::Psw));
                    self.emit(Insn::Cmp(R8::B));
                }
            }
        }
        self.jump_on(op, tl, fl);
        Ok(())
    }

    fn gen_cmp_word(
        &mut self,
        op: CmpOp,
        lhs: &Expr,
        rhs: &Expr,
        signed: bool,
        tl: &str,
        fl: &str,
    ) -> Result<(), GenError> {
        self.gen_expr_word(lhs)?;
        self.emit(Insn::Push(Rp::H));
        self.gen_expr_word(rhs)?;
        self.emit(Insn::Pop(Rp::D));
        // DE = lhs, HL = rhs.
        if signed {
            self.emit(Insn::Call(Imm::Label("f_scmp16".into())));
            self.jump_on(op, tl, fl);
            return Ok(());
        }
        match op {
            CmpOp::Eq | CmpOp::Ne => {
                self.emit(Insn::Mov(R8::A, R8::E));
                self.emit(Insn::Sub(R8::L));
                self.emit(Insn::Mov(R8::B, R8::A));
                self.emit(Insn::Mov(R8::A, R8::D));
                self.emit(Insn::Sbb(R8::H));
                self.emit(Insn::Ora(R8::B));
                self.jump_on(op, tl, fl);
            }
            CmpOp::Lt | CmpOp::Ge => {
                // lhs - rhs leaves carry set exactly when lhs < rhs.
                self.emit(Insn::Mov(R8::A, R8::E));
                self.emit(Insn::Sub(R8::L));
                self.emit(Insn::Mov(R8::A, R8::D));
                self.emit(Insn::Sbb(R8::H));
                self.jump_on(op, tl, fl);
            }
            CmpOp::Gt | CmpOp::Le => {
                // rhs - lhs: carry set exactly when rhs < lhs.
                self.emit(Insn::Mov(R8::A, R8::L));
                self.emit(Insn::Sub(R8::E));
                self.emit(Insn::Mov(R8::A, R8::H));
                self.emit(Insn::Sbb(R8::D));
                let (then, els) = if op == CmpOp::Gt { (tl, fl) } else { (fl, tl) };
                self.emit(Insn::Jc(Imm::Label(then.to_string())));
                self.emit(Insn::Jmp(Imm::Label(els.to_string())));
            }
        }
        Ok(())
    }

    fn gen_cmp_long(
        &mut self,
        op: CmpOp,
        lhs: &Expr,
        rhs: &Expr,
        signed: bool,
        tl: &str,
        fl: &str,
    ) -> Result<(), GenError> {
        self.gen_expr_long(lhs)?;
        self.push_longacc();
        self.gen_expr_long(rhs)?;
        let helper = if signed { "f_cmp32s" } else { "f_cmp32u" };
        self.emit(Insn::Call(Imm::Label(helper.into())));
        self.jump_on(op, tl, fl);
        Ok(())
    }

    // ---- assignment ----

    fn gen_assign(&mut self, target: &Expr, value: &Expr) -> Result<(), GenError> {
        match self.width(value) {
            1 => {
                self.gen_expr_byte(value)?;
                self.store_byte(target)
            }
            2 => {
                self.gen_expr_word(value)?;
                self.store_word(target)
            }
            4 => {
                self.gen_expr_long(value)?;
                self.store_long(target)
            }
            _ => self.ice("assignment of a non-scalar value"),
        }
    }

    fn store_byte(&mut self, target: &Expr) -> Result<(), GenError> {
        match &target.kind {
            ExprKind::Var(sym) => {
                let imm = self.var_imm(*sym);
                self.emit(Insn::Sta(imm));
                Ok(())
            }
            // Simple addresses load without touching A, so the value can
            // stay put.
            _ if addr_is_a_safe(target) => {
                self.gen_addr(target)?;
                self.emit(Insn::Mov(R8::M, R8::A));
                Ok(())
            }
            _ => {
                self.emit(Insn::Push(Rp::Psw));
                self.gen_addr(target)?;
                self.emit(Insn::Pop(Rp::Psw));
                self.emit(Insn::Mov(R8::M, R8::A));
                Ok(())
            }
        }
    }

    fn store_word(&mut self, target: &Expr) -> Result<(), GenError> {
        match &target.kind {
            ExprKind::Var(sym) => {
                let imm = self.var_imm(*sym);
                self.emit(Insn::Shld(imm));
                Ok(())
            }
            _ => {
                self.emit(Insn::Push(Rp::H));
                self.gen_addr(target)?;
                self.emit(Insn::Pop(Rp::D));
                self.emit(Insn::Mov(R8::M, R8::E));
                self.emit(Insn::Inx(Rp::H));
                self.emit(Insn::Mov(R8::M, R8::D));
                Ok(())
            }
        }
    }

    fn store_long(&mut self, target: &Expr) -> Result<(), GenError> {
        self.used_longacc = true;
        match &target.kind {
            ExprKind::Var(sym) => {
                self.emit(Insn::Lhld(Imm::Label("longacc".into())));
                let imm = self.var_imm(*sym);
                self.emit(Insn::Shld(imm));
                self.emit(Insn::Lhld(Imm::LabelOff("longacc".into(), 2)));
                let imm = self.var_imm_off(*sym, 2);
                self.emit(Insn::Shld(imm));
                Ok(())
            }
            _ => {
                self.gen_addr(target)?;
                self.emit(Insn::Xchg);
                self.emit(Insn::Lhld(Imm::Label("longacc".into())));
                self.emit(Insn::Mov(R8::A, R8::L));
                self.emit(Insn::Stax(Rp::D));
                self.emit(Insn::Inx(Rp::D));
                self.emit(Insn::Mov(R8::A, R8::H));
                self.emit(Insn::Stax(Rp::D));
                self.emit(Insn::Inx(Rp::D));
                self.emit(Insn::Lhld(Imm::LabelOff("longacc".into(), 2)));
                self.emit(Insn::Mov(R8::A, R8::L));
                self.emit(Insn::Stax(Rp::D));
                self.emit(Insn::Inx(Rp::D));
                self.emit(Insn::Mov(R8::A, R8::H));
                self.emit(Insn::Stax(Rp::D));
                Ok(())
            }
        }
    }

    // ---- addresses ----

    /// Leave the address of an lvalue in HL.
    fn gen_addr(&mut self, lvalue: &Expr) -> Result<(), GenError> {
        match &lvalue.kind {
            ExprKind::Var(sym) => {
                let imm = self.var_imm(*sym);
                self.emit(Insn::Lxi(Rp::H, imm));
                Ok(())
            }
            ExprKind::Field { base, offset, .. } => {
                self.gen_addr(base)?;
                if *offset > 0 {
                    self.emit(Insn::Lxi(Rp::D, Imm::Abs(*offset as u16)));
                    self.emit(Insn::Dad(Rp::D));
                }
                Ok(())
            }
            ExprKind::Index { base, index } => {
                let elem_size = self.prog.types.size_of(lvalue.ty);
                match self.width(index) {
                    1 => {
                        self.gen_expr_byte(index)?;
                        self.emit(Insn::Mov(R8::L, R8::A));
                        self.emit(Insn::Mvi(R8::H, 0));
                    }
                    _ => self.gen_expr_word(index)?,
                }
                if elem_size != 1 {
                    self.gen_mul_const(elem_size as u16);
                }
                // The peephole pass recognizes this push/load/pop/add
                // idiom for simple bases and collapses it.
                self.emit(Insn::Push(Rp::H));
                self.gen_addr(base)?;
                self.emit(Insn::Pop(Rp::D));
                self.emit(Insn::Dad(Rp::D));
                Ok(())
            }
            ExprKind::Deref(ptr) => self.gen_expr_word(ptr),
            _ => self.ice("expression has no address"),
        }
    }

    // ---- byte expressions ----

    fn gen_expr_byte(&mut self, e: &Expr) -> Result<(), GenError> {
        match &e.kind {
            ExprKind::Int(v) => {
                self.emit(Insn::Mvi(R8::A, *v as u8));
                Ok(())
            }
            ExprKind::Var(sym) => {
                let imm = self.var_imm(*sym);
                self.emit(Insn::Lda(imm));
                Ok(())
            }
            ExprKind::Field { .. } | ExprKind::Index { .. } | ExprKind::Deref(_) => {
                self.gen_addr(e)?;
                self.emit(Insn::Mov(R8::A, R8::M));
                Ok(())
            }
            ExprKind::Neg(inner) => {
                self.gen_expr_byte(inner)?;
                self.emit(Insn::Cma);
                self.emit(Insn::Inr(R8::A));
                Ok(())
            }
            ExprKind::Binary { op, lhs, rhs } => self.gen_binary_byte(*op, lhs, rhs, e),
            ExprKind::Cast(inner) => match self.width(inner) {
                1 => self.gen_expr_byte(inner),
                2 => {
                    self.gen_expr_word(inner)?;
                    self.emit(Insn::Mov(R8::A, R8::L));
                    Ok(())
                }
                _ => {
                    self.gen_expr_long(inner)?;
                    self.used_longacc = true;
                    self.emit(Insn::Lda(Imm::Label("longacc".into())));
                    Ok(())
                }
            },
            ExprKind::Call { sub, args } => {
                self.gen_call_value(CallTarget::Sub(*sub), args)?;
                let slot = self.single_ret_slot(&CallTarget::Sub(*sub))?;
                let imm = self.var_imm(slot);
                self.emit(Insn::Lda(imm));
                Ok(())
            }
            ExprKind::CallIndirect { target, args } => {
                let target = CallTarget::Indirect((**target).clone());
                self.gen_call_value(target.clone(), args)?;
                let slot = self.single_ret_slot(&target)?;
                let imm = self.var_imm(slot);
                self.emit(Insn::Lda(imm));
                Ok(())
            }
            _ => self.ice("expression cannot produce a byte value"),
        }
    }

    fn gen_binary_byte(
        &mut self,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
        whole: &Expr,
    ) -> Result<(), GenError> {
        // Constant shift counts expand inline.
        if let (BinOp::Shl, Some(k)) = (op, rhs.as_int()) {
            self.gen_expr_byte(lhs)?;
            for _ in 0..k.min(8) {
                self.emit(Insn::Add(R8::A));
            }
            return Ok(());
        }
        if let (BinOp::Shr, Some(k)) = (op, rhs.as_int()) {
            if !self.signed(whole) && k <= 3 {
                self.gen_expr_byte(lhs)?;
                for _ in 0..k {
                    self.emit(Insn::Ora(R8::A));
                    self.emit(Insn::Rar);
                }
                return Ok(());
            }
        }

        // Immediate forms for the plain ALU operators.
        if let Some(v) = rhs.as_int() {
            let v = v as u8;
            let imm_op = match op {
                BinOp::Add => Some(Insn::Adi(v)),
                BinOp::Sub => Some(Insn::Sui(v)),
                BinOp::And => Some(Insn::Ani(v)),
                BinOp::Or => Some(Insn::Ori(v)),
                BinOp::Xor => Some(Insn::Xri(v)),
                _ => None,
            };
            if let Some(insn) = imm_op {
                self.gen_expr_byte(lhs)?;
                self.emit(insn);
                return Ok(());
            }
        }

        // General shape: left to A, stash, right to B, combine.
        self.gen_expr_byte(lhs)?;
        self.emit(Insn::Push(Rp::Psw));
        self.gen_expr_byte(rhs)?;
        self.emit(Insn::Mov(R8::B, R8::A));
        self.emit(Insn::Pop(Rp::Psw));
        match op {
            BinOp::Add => self.emit(Insn::Add(R8::B)),
            BinOp::Sub => self.emit(Insn::Sub(R8::B)),
            BinOp::And => self.emit(Insn::Ana(R8::B)),
            BinOp::Or => self.emit(Insn::Ora(R8::B)),
            BinOp::Xor => self.emit(Insn::Xra(R8::B)),
            BinOp::Mul => self.emit(Insn::Call(Imm::Label("f_mul8".into()))),
            BinOp::Div => {
                let helper = if self.signed(whole) { "f_div8s" } else { "f_div8u" };
                self.emit(Insn::Call(Imm::Label(helper.into())));
            }
            BinOp::Rem => {
                let helper = if self.signed(whole) { "f_rem8s" } else { "f_rem8u" };
                self.emit(Insn::Call(Imm::Label(helper.into())));
            }
            BinOp::Shl => self.emit(Insn::Call(Imm::Label("f_shl8".into()))),
            BinOp::Shr => {
                let helper = if self.signed(whole) { "f_asr8" } else { "f_shr8" };
                self.emit(Insn::Call(Imm::Label(helper.into())));
            }
        }
        Ok(())
    }

    // ---- word expressions ----

    fn gen_expr_word(&mut self, e: &Expr) -> Result<(), GenError> {
        match &e.kind {
            ExprKind::Int(v) => {
                self.emit(Insn::Lxi(Rp::H, Imm::Abs(*v as u16)));
                Ok(())
            }
            ExprKind::Var(sym) => {
                let imm = self.var_imm(*sym);
                self.emit(Insn::Lhld(imm));
                Ok(())
            }
            ExprKind::Str(id) => {
                self.emit(Insn::Lxi(Rp::H, Imm::Label(format!("str_{}", id.index()))));
                Ok(())
            }
            ExprKind::SubAddr(sub) => {
                let label = self.layout.sub_label(*sub).to_string();
                self.emit(Insn::Lxi(Rp::H, Imm::Label(label)));
                Ok(())
            }
            ExprKind::AddrOf(inner) => self.gen_addr(inner),
            ExprKind::Field { .. } | ExprKind::Index { .. } | ExprKind::Deref(_) => {
                self.gen_addr(e)?;
                self.emit(Insn::Mov(R8::E, R8::M));
                self.emit(Insn::Inx(Rp::H));
                self.emit(Insn::Mov(R8::D, R8::M));
                self.emit(Insn::Xchg);
                Ok(())
            }
            ExprKind::Neg(inner) => {
                self.gen_expr_word(inner)?;
                self.negate_hl();
                Ok(())
            }
            ExprKind::Binary { op, lhs, rhs } => self.gen_binary_word(*op, lhs, rhs, e),
            ExprKind::Cast(inner) => match self.width(inner) {
                1 => {
                    self.gen_expr_byte(inner)?;
                    self.emit(Insn::Mov(R8::L, R8::A));
                    if self.signed(inner) {
                        self.emit(Insn::Rlc);
                        self.emit(Insn::Sbb(R8::A));
                        self.emit(Insn::Mov(R8::H, R8::A));
                    } else {
                        self.emit(Insn::Mvi(R8::H, 0));
                    }
                    Ok(())
                }
                2 => self.gen_expr_word(inner),
                _ => {
                    self.gen_expr_long(inner)?;
                    self.used_longacc = true;
                    self.emit(Insn::Lhld(Imm::Label("longacc".into())));
                    Ok(())
                }
            },
            ExprKind::Call { sub, args } => {
                self.gen_call_value(CallTarget::Sub(*sub), args)?;
                let slot = self.single_ret_slot(&CallTarget::Sub(*sub))?;
                let imm = self.var_imm(slot);
                self.emit(Insn::Lhld(imm));
                Ok(())
            }
            ExprKind::CallIndirect { target, args } => {
                let target = CallTarget::Indirect((**target).clone());
                self.gen_call_value(target.clone(), args)?;
                let slot = self.single_ret_slot(&target)?;
                let imm = self.var_imm(slot);
                self.emit(Insn::Lhld(imm));
                Ok(())
            }
        }
    }

    /// HL := -HL by complement-and-increment.
    fn negate_hl(&mut self) {
        self.emit(Insn::Mov(R8::A, R8::L));
        self.emit(Insn::Cma);
        self.emit(Insn::Mov(R8::L, R8::A));
        self.emit(Insn::Mov(R8::A, R8::H));
        self.emit(Insn::Cma);
        self.emit(Insn::Mov(R8::H, R8::A));
        self.emit(Insn::Inx(Rp::H));
    }

    fn gen_binary_word(
        &mut self,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
        whole: &Expr,
    ) -> Result<(), GenError> {
        // Immediate add/sub fold into LXI D / DAD D; the peephole turns
        // tiny offsets into INX chains.
        if let (BinOp::Add | BinOp::Sub, Some(v)) = (op, rhs.as_int()) {
            self.gen_expr_word(lhs)?;
            let v = if op == BinOp::Sub {
                (v as u16).wrapping_neg()
            } else {
                v as u16
            };
            if v != 0 {
                self.emit(Insn::Lxi(Rp::D, Imm::Abs(v)));
                self.emit(Insn::Dad(Rp::D));
            }
            return Ok(());
        }
        // Constant multiplier: shifts and adds when cheaper than the
        // runtime multiply.
        if let (BinOp::Mul, Some(v)) = (op, rhs.as_int()) {
            self.gen_expr_word(lhs)?;
            self.gen_mul_const(v as u16);
            return Ok(());
        }
        // Constant shift counts.
        if let (BinOp::Shl, Some(k)) = (op, rhs.as_int()) {
            self.gen_expr_word(lhs)?;
            for _ in 0..k.min(16) {
                self.emit(Insn::Dad(Rp::H));
            }
            return Ok(());
        }

        // Shifts take their count in A.
        if matches!(op, BinOp::Shl | BinOp::Shr) {
            self.gen_expr_word(lhs)?;
            self.emit(Insn::Push(Rp::H));
            self.gen_expr_byte(rhs)?;
            self.emit(Insn::Pop(Rp::H));
            let helper = match op {
                BinOp::Shl => "f_shl16",
                _ if self.signed(whole) => "f_asr16",
                _ => "f_shr16",
            };
            self.emit(Insn::Call(Imm::Label(helper.into())));
            return Ok(());
        }

        self.gen_expr_word(lhs)?;
        self.emit(Insn::Push(Rp::H));
        self.gen_expr_word(rhs)?;
        self.emit(Insn::Pop(Rp::D));
        // DE = left, HL = right.
        match op {
            BinOp::Add => self.emit(Insn::Dad(Rp::D)),
            BinOp::Sub => {
                // left - right, synthesized from complement-and-add.
                self.negate_hl();
                self.emit(Insn::Dad(Rp::D));
            }
            BinOp::And | BinOp::Or | BinOp::Xor => {
                let (lo, hi): (fn(R8) -> Insn, fn(R8) -> Insn) = match op {
                    BinOp::And => (Insn::Ana, Insn::Ana),
                    BinOp::Or => (Insn::Ora, Insn::Ora),
                    _ => (Insn::Xra, Insn::Xra),
                };
                self.emit(Insn::Mov(R8::A, R8::E));
                self.emit(lo(R8::L));
                self.emit(Insn::Mov(R8::L, R8::A));
                self.emit(Insn::Mov(R8::A, R8::D));
                self.emit(hi(R8::H));
                self.emit(Insn::Mov(R8::H, R8::A));
            }
            BinOp::Mul => self.emit(Insn::Call(Imm::Label("f_mul16".into()))),
            BinOp::Div => {
                let helper = if self.signed(whole) { "f_div16s" } else { "f_div16u" };
                self.emit(Insn::Call(Imm::Label(helper.into())));
            }
            BinOp::Rem => {
                let helper = if self.signed(whole) { "f_rem16s" } else { "f_rem16u" };
                self.emit(Insn::Call(Imm::Label(helper.into())));
            }
            BinOp::Shl | BinOp::Shr => unreachable!("handled above"),
        }
        Ok(())
    }

    /// HL := HL * c. Powers of two become DAD chains; other constants use
    /// a save-and-accumulate shift/add sequence when its byte count beats
    /// the runtime call, which costs 6 bytes.
    fn gen_mul_const(&mut self, c: u16) {
        match c {
            0 => {
                self.emit(Insn::Lxi(Rp::H, Imm::Abs(0)));
                return;
            }
            1 => return,
            _ => {}
        }
        if c.is_power_of_two() {
            for _ in 0..c.trailing_zeros() {
                self.emit(Insn::Dad(Rp::H));
            }
            return;
        }
        let bits = 16 - c.leading_zeros();
        let ones = c.count_ones();
        let inline_cost = 2 + (bits - 1) + (ones - 1);
        if inline_cost < 6 {
            self.emit(Insn::Mov(R8::D, R8::H));
            self.emit(Insn::Mov(R8::E, R8::L));
            for bit in (0..bits - 1).rev() {
                self.emit(Insn::Dad(Rp::H));
                if (c >> bit) & 1 == 1 {
                    self.emit(Insn::Dad(Rp::D));
                }
            }
        } else {
            self.emit(Insn::Lxi(Rp::D, Imm::Abs(c)));
            self.emit(Insn::Call(Imm::Label("f_mul16".into())));
        }
    }

    // ---- long (32-bit) expressions ----

    fn push_longacc(&mut self) {
        self.used_longacc = true;
        self.emit(Insn::Lhld(Imm::Label("longacc".into())));
        self.emit(Insn::Push(Rp::H));
        self.emit(Insn::Lhld(Imm::LabelOff("longacc".into(), 2)));
        self.emit(Insn::Push(Rp::H));
    }

    fn gen_expr_long(&mut self, e: &Expr) -> Result<(), GenError> {
        self.used_longacc = true;
        match &e.kind {
            ExprKind::Int(v) => {
                self.emit(Insn::Lxi(Rp::H, Imm::Abs(*v as u16)));
                self.emit(Insn::Shld(Imm::Label("longacc".into())));
                self.emit(Insn::Lxi(Rp::H, Imm::Abs((*v >> 16) as u16)));
                self.emit(Insn::Shld(Imm::LabelOff("longacc".into(), 2)));
                Ok(())
            }
            ExprKind::Var(sym) => {
                let lo = self.var_imm(*sym);
                let hi = self.var_imm_off(*sym, 2);
                self.emit(Insn::Lhld(lo));
                self.emit(Insn::Shld(Imm::Label("longacc".into())));
                self.emit(Insn::Lhld(hi));
                self.emit(Insn::Shld(Imm::LabelOff("longacc".into(), 2)));
                Ok(())
            }
            ExprKind::Field { .. } | ExprKind::Index { .. } | ExprKind::Deref(_) => {
                self.gen_addr(e)?;
                self.emit(Insn::Mov(R8::E, R8::M));
                self.emit(Insn::Inx(Rp::H));
                self.emit(Insn::Mov(R8::D, R8::M));
                self.emit(Insn::Inx(Rp::H));
                self.emit(Insn::Push(Rp::H));
                self.emit(Insn::Xchg);
                self.emit(Insn::Shld(Imm::Label("longacc".into())));
                self.emit(Insn::Pop(Rp::H));
                self.emit(Insn::Mov(R8::E, R8::M));
                self.emit(Insn::Inx(Rp::H));
                self.emit(Insn::Mov(R8::D, R8::M));
                self.emit(Insn::Xchg);
                self.emit(Insn::Shld(Imm::LabelOff("longacc".into(), 2)));
                Ok(())
            }
            ExprKind::Neg(inner) => {
                self.gen_expr_long(inner)?;
                self.emit(Insn::Call(Imm::Label("f_neg32".into())));
                Ok(())
            }
            ExprKind::Binary { op, lhs, rhs } => {
                if matches!(op, BinOp::Shl | BinOp::Shr) {
                    self.gen_expr_long(lhs)?;
                    self.gen_expr_byte(rhs)?;
                    let helper = match op {
                        BinOp::Shl => "f_shl32",
                        _ if self.signed(e) => "f_asr32",
                        _ => "f_shr32",
                    };
                    self.emit(Insn::Call(Imm::Label(helper.into())));
                    return Ok(());
                }
                self.gen_expr_long(lhs)?;
                self.push_longacc();
                self.gen_expr_long(rhs)?;
                let helper = match op {
                    BinOp::Add => "f_add32",
                    BinOp::Sub => "f_sub32",
                    BinOp::And => "f_and32",
                    BinOp::Or => "f_or32",
                    BinOp::Xor => "f_xor32",
                    BinOp::Mul => "f_mul32",
                    BinOp::Div => {
                        if self.signed(e) {
                            "f_div32s"
                        } else {
                            "f_div32u"
                        }
                    }
                    BinOp::Rem => {
                        if self.signed(e) {
                            "f_rem32s"
                        } else {
                            "f_rem32u"
                        }
                    }
                    BinOp::Shl | BinOp::Shr => unreachable!("handled above"),
                };
                self.emit(Insn::Call(Imm::Label(helper.into())));
                Ok(())
            }
            ExprKind::Cast(inner) => {
                match self.width(inner) {
                    1 | 2 => {
                        if self.width(inner) == 1 {
                            // Extend the byte to a word first.
                            self.gen_expr_byte(inner)?;
                            self.emit(Insn::Mov(R8::L, R8::A));
                            if self.signed(inner) {
                                self.emit(Insn::Rlc);
                                self.emit(Insn::Sbb(R8::A));
                                self.emit(Insn::Mov(R8::H, R8::A));
                            } else {
                                self.emit(Insn::Mvi(R8::H, 0));
                            }
                        } else {
                            self.gen_expr_word(inner)?;
                        }
                        self.emit(Insn::Shld(Imm::Label("longacc".into())));
                        if self.signed(inner) {
                            self.emit(Insn::Mov(R8::A, R8::H));
                            self.emit(Insn::Rlc);
                            self.emit(Insn::Sbb(R8::A));
                            self.emit(Insn::Mov(R8::H, R8::A));
                            self.emit(Insn::Mov(R8::L, R8::A));
                        } else {
                            self.emit(Insn::Lxi(Rp::H, Imm::Abs(0)));
                        }
                        self.emit(Insn::Shld(Imm::LabelOff("longacc".into(), 2)));
                        Ok(())
                    }
                    _ => self.gen_expr_long(inner),
                }
            }
            ExprKind::Call { sub, args } => {
                self.gen_call_value(CallTarget::Sub(*sub), args)?;
                let slot = self.single_ret_slot(&CallTarget::Sub(*sub))?;
                let lo = self.var_imm(slot);
                let hi = self.var_imm_off(slot, 2);
                self.emit(Insn::Lhld(lo));
                self.emit(Insn::Shld(Imm::Label("longacc".into())));
                self.emit(Insn::Lhld(hi));
                self.emit(Insn::Shld(Imm::LabelOff("longacc".into(), 2)));
                Ok(())
            }
            _ => self.ice("expression cannot produce a 32-bit value"),
        }
    }

    // ---- calls ----

    fn callee_slots(&self, target: &CallTarget) -> Result<(Vec<SymId>, Vec<SymId>), GenError> {
        match target {
            CallTarget::Sub(sub) => {
                let sub = self.prog.sub(*sub);
                Ok((sub.params.clone(), sub.rets.clone()))
            }
            CallTarget::Indirect(e) => {
                let stripped = self.prog.types.strip(e.ty);
                match self.prog.types.kind(stripped) {
                    cowc_sem::types::TypeKind::Interface(i) => {
                        Ok((i.params.clone(), i.rets.clone()))
                    }
                    _ => Err(GenError::Internal(
                        "indirect call through a non-interface value".into(),
                    )),
                }
            }
        }
    }

    fn single_ret_slot(&self, target: &CallTarget) -> Result<SymId, GenError> {
        let (_, rets) = self.callee_slots(target)?;
        match rets.as_slice() {
            [slot] => Ok(*slot),
            _ => Err(GenError::Internal(
                "value call without exactly one return slot".into(),
            )),
        }
    }

    /// Emit a call for value context (results read from slots afterwards).
    fn gen_call_value(&mut self, target: CallTarget, args: &[Expr]) -> Result<(), GenError> {
        self.gen_call(&target, args, &[])
    }

    fn gen_call(
        &mut self,
        target: &CallTarget,
        args: &[Expr],
        rets: &[Expr],
    ) -> Result<(), GenError> {
        let (params, ret_slots) = self.callee_slots(target)?;

        // Arguments first, all pushed; then popped into the callee's
        // static slots in reverse. Argument expressions may themselves
        // call, so nothing is stored before everything is computed.
        for arg in args {
            match self.width(arg) {
                1 => {
                    self.gen_expr_byte(arg)?;
                    self.emit(Insn::Push(Rp::Psw));
                }
                2 => {
                    self.gen_expr_word(arg)?;
                    self.emit(Insn::Push(Rp::H));
                }
                4 => {
                    self.gen_expr_long(arg)?;
                    self.push_longacc();
                }
                _ => return self.ice("argument of impossible width"),
            }
        }
        for (param, arg) in params.iter().zip(args).rev() {
            match self.width(arg) {
                1 => {
                    self.emit(Insn::Pop(Rp::Psw));
                    let imm = self.var_imm(*param);
                    self.emit(Insn::Sta(imm));
                }
                2 => {
                    self.emit(Insn::Pop(Rp::H));
                    let imm = self.var_imm(*param);
                    self.emit(Insn::Shld(imm));
                }
                _ => {
                    self.emit(Insn::Pop(Rp::H));
                    let hi = self.var_imm_off(*param, 2);
                    self.emit(Insn::Shld(hi));
                    self.emit(Insn::Pop(Rp::H));
                    let lo = self.var_imm(*param);
                    self.emit(Insn::Shld(lo));
                }
            }
        }

        match target {
            CallTarget::Sub(sub) => {
                if self.inline[sub.index()] {
                    self.expand_inline(*sub)?;
                } else {
                    let label = self.layout.sub_label(*sub).to_string();
                    self.emit(Insn::Call(Imm::Label(label)));
                }
            }
            CallTarget::Indirect(e) => {
                // Push a return address and jump through the stored
                // subroutine address.
                self.gen_expr_word(e)?;
                let ret_label = self.fresh_label();
                self.emit(Insn::Lxi(Rp::D, Imm::Label(ret_label.clone())));
                self.emit(Insn::Push(Rp::D));
                self.emit(Insn::Pchl);
                self.emit(Insn::Label(ret_label));
            }
        }

        // Copy return slots into their destinations.
        for (slot, dest) in ret_slots.iter().zip(rets) {
            match self.width(dest) {
                1 => {
                    let imm = self.var_imm(*slot);
                    self.emit(Insn::Lda(imm));
                    self.store_byte(dest)?;
                }
                2 => {
                    let imm = self.var_imm(*slot);
                    self.emit(Insn::Lhld(imm));
                    self.store_word(dest)?;
                }
                _ => {
                    self.used_longacc = true;
                    let lo = self.var_imm(*slot);
                    let hi = self.var_imm_off(*slot, 2);
                    self.emit(Insn::Lhld(lo));
                    self.emit(Insn::Shld(Imm::Label("longacc".into())));
                    self.emit(Insn::Lhld(hi));
                    self.emit(Insn::Shld(Imm::LabelOff("longacc".into(), 2)));
                    self.store_long(dest)?;
                }
            }
        }
        Ok(())
    }

    /// Splice a candidate's body at the call site. `return` inside the
    /// body jumps to the end label instead of a RET.
    fn expand_inline(&mut self, sub: SubId) -> Result<(), GenError> {
        let end = self.fresh_label();
        self.inline_end.push(end.clone());
        let body = &self.prog.sub(sub).body;
        let result = self.gen_block(body);
        self.inline_end.pop();
        result?;
        self.emit(Insn::Label(end));
        Ok(())
    }
}

/// Address computations that never clobber A: a variable, a chain of
/// constant field offsets, or a dereference of a plain pointer variable.
fn addr_is_a_safe(e: &Expr) -> bool {
    match &e.kind {
        ExprKind::Var(_) => true,
        ExprKind::Field { base, .. } => addr_is_a_safe(base),
        ExprKind::Deref(ptr) => matches!(ptr.kind, ExprKind::Var(_) | ExprKind::Int(_)),
        _ => false,
    }
}

