//! Expression, condition and type-reference parsing.
//!
//! Value expressions use precedence climbing. Levels, loosest to tightest:
//!
//! | Level | Operators |
//! |-------|-----------|
//! | 1 | `<<` `>>` |
//! | 2 | `&` `\|` `^` |
//! | 3 | `+` `-` |
//! | 4 | `*` `/` `%` |
//!
//! with unary and postfix forms binding tighter than all of them.
//! Comparisons and the logical connectives are not expression operators at
//! all; they live in the condition grammar below.

use cowc_lex::{Kw, TokenKind};

use crate::ast::*;
use crate::Parser;

impl<'a> Parser<'a> {
    // ---- value expressions ----

    pub(crate) fn parse_expr(&mut self) -> Option<Expr> {
        self.parse_binary(1)
    }

    fn parse_binary(&mut self, min_level: u8) -> Option<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let (op, level) = match self.peek() {
                TokenKind::Star => (BinOp::Mul, 4),
                TokenKind::Slash => (BinOp::Div, 4),
                TokenKind::Percent => (BinOp::Rem, 4),
                TokenKind::Plus => (BinOp::Add, 3),
                TokenKind::Minus => (BinOp::Sub, 3),
                TokenKind::Amp => (BinOp::And, 2),
                TokenKind::Pipe => (BinOp::Or, 2),
                TokenKind::Caret => (BinOp::Xor, 2),
                TokenKind::Shl => (BinOp::Shl, 1),
                TokenKind::Shr => (BinOp::Shr, 1),
                _ => break,
            };
            if level < min_level {
                break;
            }
            let pos = self.pos();
            self.advance();
            let rhs = self.parse_binary(level + 1)?;
            lhs = Expr {
                kind: ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                pos,
            };
        }
        Some(lhs)
    }

    fn parse_unary(&mut self) -> Option<Expr> {
        let pos = self.pos();
        let kind = match self.peek() {
            TokenKind::Minus => {
                self.advance();
                ExprKind::Neg(Box::new(self.parse_unary()?))
            }
            TokenKind::Amp => {
                self.advance();
                ExprKind::AddrOf(Box::new(self.parse_unary()?))
            }
            TokenKind::Kw(Kw::AtSizeof) => {
                self.advance();
                ExprKind::Sizeof(Box::new(self.parse_unary()?))
            }
            TokenKind::Kw(Kw::AtBytesof) => {
                self.advance();
                ExprKind::Bytesof(Box::new(self.parse_unary()?))
            }
            TokenKind::Kw(Kw::AtIndexof) => {
                self.advance();
                ExprKind::IndexOf(Box::new(self.parse_unary()?))
            }
            TokenKind::Kw(Kw::AtNext) => {
                self.advance();
                ExprKind::Next(Box::new(self.parse_unary()?))
            }
            TokenKind::Kw(Kw::AtPrev) => {
                self.advance();
                ExprKind::Prev(Box::new(self.parse_unary()?))
            }
            _ => return self.parse_postfix(),
        };
        Some(Expr { kind, pos })
    }

    pub(crate) fn parse_postfix(&mut self) -> Option<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            let pos = self.pos();
            match self.peek() {
                TokenKind::Dot => {
                    self.advance();
                    let field = self.expect_ident("field name")?;
                    expr = Expr {
                        kind: ExprKind::Field {
                            base: Box::new(expr),
                            field,
                        },
                        pos,
                    };
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.parse_expr()?;
                    self.expect(&TokenKind::RBracket, "']'")?;
                    expr = Expr {
                        kind: ExprKind::Index {
                            base: Box::new(expr),
                            index: Box::new(index),
                        },
                        pos,
                    };
                }
                TokenKind::LParen => {
                    self.advance();
                    let mut args = Vec::new();
                    if !self.at(&TokenKind::RParen) {
                        loop {
                            args.push(self.parse_expr()?);
                            if !self.eat(&TokenKind::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(&TokenKind::RParen, "')'")?;
                    expr = Expr {
                        kind: ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                        },
                        pos,
                    };
                }
                TokenKind::Kw(Kw::As) => {
                    self.advance();
                    let ty = self.parse_type_ref()?;
                    expr = Expr {
                        kind: ExprKind::Cast {
                            expr: Box::new(expr),
                            ty: Box::new(ty),
                        },
                        pos,
                    };
                }
                _ => break,
            }
        }
        Some(expr)
    }

    fn parse_primary(&mut self) -> Option<Expr> {
        let pos = self.pos();
        let kind = match self.peek().clone() {
            TokenKind::Int(v) => {
                self.advance();
                ExprKind::Int(v)
            }
            TokenKind::CharLit(c) => {
                self.advance();
                ExprKind::Char(c)
            }
            TokenKind::StrLit(bytes) => {
                self.advance();
                ExprKind::Str(bytes)
            }
            TokenKind::Kw(Kw::Nil) => {
                self.advance();
                ExprKind::Nil
            }
            TokenKind::Ident(name) => {
                self.advance();
                ExprKind::Name(name)
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(&TokenKind::RParen, "')'")?;
                inner.kind
            }
            TokenKind::LBracket => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(&TokenKind::RBracket, "']'")?;
                ExprKind::Deref(Box::new(inner))
            }
            TokenKind::Lt
            | TokenKind::Le
            | TokenKind::Gt
            | TokenKind::Ge
            | TokenKind::EqEq
            | TokenKind::Ne => {
                self.error("comparison is only allowed in a conditional context");
                return None;
            }
            other => {
                let msg = format!("expected expression, found {}", self.describe(&other));
                self.error(msg);
                return None;
            }
        };
        Some(Expr { kind, pos })
    }

    // ---- conditions ----

    /// Entry point for condition position: `if`, `while`, and the operands
    /// of `and`/`or`/`not`.
    pub(crate) fn parse_cond(&mut self) -> Option<Cond> {
        self.parse_cond_or()
    }

    fn parse_cond_or(&mut self) -> Option<Cond> {
        let mut lhs = self.parse_cond_and()?;
        while self.at_kw(Kw::Or) {
            let pos = self.pos();
            self.advance();
            let rhs = self.parse_cond_and()?;
            lhs = Cond {
                kind: CondKind::Or(Box::new(lhs), Box::new(rhs)),
                pos,
            };
        }
        Some(lhs)
    }

    fn parse_cond_and(&mut self) -> Option<Cond> {
        let mut lhs = self.parse_cond_not()?;
        while self.at_kw(Kw::And) {
            let pos = self.pos();
            self.advance();
            let rhs = self.parse_cond_not()?;
            lhs = Cond {
                kind: CondKind::And(Box::new(lhs), Box::new(rhs)),
                pos,
            };
        }
        Some(lhs)
    }

    fn parse_cond_not(&mut self) -> Option<Cond> {
        if self.at_kw(Kw::Not) {
            let pos = self.pos();
            self.advance();
            let inner = self.parse_cond_not()?;
            return Some(Cond {
                kind: CondKind::Not(Box::new(inner)),
                pos,
            });
        }
        self.parse_cond_primary()
    }

    fn parse_cond_primary(&mut self) -> Option<Cond> {
        // A leading '(' is ambiguous: parenthesized condition, or
        // parenthesized expression opening a comparison. Try the condition
        // reading first and fall back.
        if self.at(&TokenKind::LParen) {
            let cp = self.checkpoint();
            self.advance();
            if let Some(inner) = self.parse_cond() {
                if self.eat(&TokenKind::RParen) {
                    return Some(inner);
                }
            }
            self.rewind(cp);
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Option<Cond> {
        let lhs = self.parse_expr()?;
        let pos = self.pos();
        let op = match self.peek() {
            TokenKind::EqEq => CmpOp::Eq,
            TokenKind::Ne => CmpOp::Ne,
            TokenKind::Lt => CmpOp::Lt,
            TokenKind::Le => CmpOp::Le,
            TokenKind::Gt => CmpOp::Gt,
            TokenKind::Ge => CmpOp::Ge,
            other => {
                let msg = format!(
                    "expected comparison operator, found {}",
                    self.describe(other)
                );
                self.error(msg);
                return None;
            }
        };
        self.advance();
        let rhs = self.parse_expr()?;
        Some(Cond {
            kind: CondKind::Cmp { op, lhs, rhs },
            pos,
        })
    }

    // ---- type references ----

    pub(crate) fn parse_type_ref(&mut self) -> Option<TypeRef> {
        let mut ty = match self.peek().clone() {
            TokenKind::LBracket => {
                self.advance();
                let inner = self.parse_type_ref()?;
                self.expect(&TokenKind::RBracket, "']'")?;
                TypeRef::Pointer(Box::new(inner))
            }
            TokenKind::Kw(Kw::AtIndexof) => {
                self.advance();
                let name = self.expect_ident("array name")?;
                TypeRef::IndexOf(name)
            }
            TokenKind::Ident(name) => {
                self.advance();
                TypeRef::Named(name)
            }
            other => {
                let msg = format!("expected type, found {}", self.describe(&other));
                self.error(msg);
                return None;
            }
        };
        // Array suffixes: `T[n]`, `T[]`.
        while self.at(&TokenKind::LBracket) {
            // `[` here is an array suffix only if it closes a length or is
            // immediately `]`; a pointer would have been prefix.
            self.advance();
            let len = if self.at(&TokenKind::RBracket) {
                None
            } else {
                Some(Box::new(self.parse_expr()?))
            };
            self.expect(&TokenKind::RBracket, "']'")?;
            ty = TypeRef::Array {
                elem: Box::new(ty),
                len,
            };
        }
        Some(ty)
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::*;
    use crate::test_util::{parse_err, parse_ok};

    fn first_stmt(src: &str) -> StmtKind {
        let (program, _) = parse_ok(src);
        program.body.into_iter().next().expect("a statement").kind
    }

    #[test]
    fn test_precedence_mul_binds_tighter_than_add() {
        // x := a + b * c;  =>  a + (b * c)
        match first_stmt("x := a + b * c;") {
            StmtKind::Assign { value, .. } => match value.kind {
                ExprKind::Binary { op: BinOp::Add, rhs, .. } => {
                    assert!(matches!(rhs.kind, ExprKind::Binary { op: BinOp::Mul, .. }));
                }
                other => panic!("expected add at root, got {:?}", other),
            },
            other => panic!("expected assign, got {:?}", other),
        }
    }

    #[test]
    fn test_precedence_bitand_binds_tighter_than_shift() {
        // x := a & b << 2;  =>  (a & b) << 2
        match first_stmt("x := a & b << 2;") {
            StmtKind::Assign { value, .. } => {
                assert!(matches!(
                    value.kind,
                    ExprKind::Binary { op: BinOp::Shl, .. }
                ));
            }
            other => panic!("expected assign, got {:?}", other),
        }
    }

    #[test]
    fn test_unary_and_postfix() {
        match first_stmt("x := -p.count + 1;") {
            StmtKind::Assign { value, .. } => match value.kind {
                ExprKind::Binary { op: BinOp::Add, lhs, .. } => {
                    assert!(matches!(lhs.kind, ExprKind::Neg(_)));
                }
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("expected assign, got {:?}", other),
        }
    }

    #[test]
    fn test_deref_and_index() {
        assert!(matches!(
            first_stmt("x := [p];"),
            StmtKind::Assign { .. }
        ));
        match first_stmt("x := a[i + 1];") {
            StmtKind::Assign { value, .. } => {
                assert!(matches!(value.kind, ExprKind::Index { .. }));
            }
            other => panic!("expected assign, got {:?}", other),
        }
    }

    #[test]
    fn test_cast_postfix() {
        match first_stmt("x := y as uint16;") {
            StmtKind::Assign { value, .. } => {
                assert!(matches!(value.kind, ExprKind::Cast { .. }));
            }
            other => panic!("expected assign, got {:?}", other),
        }
    }

    #[test]
    fn test_comparison_outside_condition_is_rejected() {
        parse_err("x := a == b;");
    }

    #[test]
    fn test_condition_grammar() {
        match first_stmt("if a < b and not (c == d or e >= f) then x := 1; end if;") {
            StmtKind::If { arms, .. } => {
                let cond = &arms[0].0;
                assert!(matches!(cond.kind, CondKind::And(_, _)));
            }
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn test_parenthesized_expr_as_comparison_lhs() {
        match first_stmt("if (a + b) < c then x := 1; end if;") {
            StmtKind::If { arms, .. } => {
                assert!(matches!(
                    arms[0].0.kind,
                    CondKind::Cmp { op: CmpOp::Lt, .. }
                ));
            }
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn test_at_operators() {
        match first_stmt("x := @sizeof buf;") {
            StmtKind::Assign { value, .. } => {
                assert!(matches!(value.kind, ExprKind::Sizeof(_)));
            }
            other => panic!("expected assign, got {:?}", other),
        }
        match first_stmt("p := @next p;") {
            StmtKind::Assign { value, .. } => {
                assert!(matches!(value.kind, ExprKind::Next(_)));
            }
            other => panic!("expected assign, got {:?}", other),
        }
    }
}
