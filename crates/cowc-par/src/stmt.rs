//! Statement parsing.

use cowc_lex::{Kw, TokenKind};

use crate::ast::*;
use crate::Parser;

impl<'a> Parser<'a> {
    pub(crate) fn parse_statement(&mut self) -> Option<Stmt> {
        let pos = self.pos();
        let kind = match self.peek() {
            TokenKind::Kw(Kw::Var) => self.parse_var_decl()?,
            TokenKind::Kw(Kw::Const) => self.parse_const_decl()?,
            TokenKind::Kw(Kw::Typedef) => self.parse_typedef()?,
            TokenKind::Kw(Kw::Record) => self.parse_record_decl()?,
            TokenKind::Kw(Kw::Interface) => self.parse_interface_decl()?,
            TokenKind::Kw(Kw::Sub) => self.parse_sub_decl(SubKind::Normal)?,
            TokenKind::Kw(Kw::AtDecl) => {
                self.advance();
                self.expect_kw(Kw::Sub)?;
                self.parse_sub_decl(SubKind::Decl)?
            }
            TokenKind::Kw(Kw::AtImpl) => {
                self.advance();
                self.expect_kw(Kw::Sub)?;
                self.parse_sub_decl(SubKind::Impl)?
            }
            TokenKind::Kw(Kw::If) => self.parse_if()?,
            TokenKind::Kw(Kw::While) => self.parse_while()?,
            TokenKind::Kw(Kw::Loop) => {
                self.advance();
                let body = self.parse_block(&[Kw::End])?;
                self.expect_kw(Kw::End)?;
                self.expect_kw(Kw::Loop)?;
                self.expect_semi()?;
                StmtKind::Loop { body }
            }
            TokenKind::Kw(Kw::Break) => {
                self.advance();
                self.expect_semi()?;
                StmtKind::Break
            }
            TokenKind::Kw(Kw::Continue) => {
                self.advance();
                self.expect_semi()?;
                StmtKind::Continue
            }
            TokenKind::Kw(Kw::Return) => {
                self.advance();
                self.expect_semi()?;
                StmtKind::Return
            }
            TokenKind::Kw(Kw::Case) => self.parse_case()?,
            TokenKind::Kw(Kw::AtAsm) => self.parse_asm()?,
            TokenKind::LParen => self.parse_multi_assign()?,
            _ => self.parse_assign_or_call()?,
        };
        Some(Stmt { kind, pos })
    }

    /// Parse statements until one of `stops` is the current keyword.
    /// The stop keyword is not consumed.
    pub(crate) fn parse_block(&mut self, stops: &[Kw]) -> Option<Vec<Stmt>> {
        let mut body = Vec::new();
        loop {
            if self.at_eof() {
                self.error("unexpected end of input inside a block");
                return None;
            }
            if let TokenKind::Kw(kw) = self.peek() {
                if stops.contains(kw) {
                    return Some(body);
                }
            }
            body.push(self.parse_statement()?);
        }
    }

    fn parse_if(&mut self) -> Option<StmtKind> {
        self.expect_kw(Kw::If)?;
        let mut arms = Vec::new();
        let cond = self.parse_cond()?;
        self.expect_kw(Kw::Then)?;
        let body = self.parse_block(&[Kw::Elseif, Kw::Else, Kw::End])?;
        arms.push((cond, body));

        let mut else_body = None;
        loop {
            if self.eat_kw(Kw::Elseif) {
                let cond = self.parse_cond()?;
                self.expect_kw(Kw::Then)?;
                let body = self.parse_block(&[Kw::Elseif, Kw::Else, Kw::End])?;
                arms.push((cond, body));
            } else if self.eat_kw(Kw::Else) {
                else_body = Some(self.parse_block(&[Kw::End])?);
                break;
            } else {
                break;
            }
        }
        self.expect_kw(Kw::End)?;
        self.expect_kw(Kw::If)?;
        self.expect_semi()?;
        Some(StmtKind::If { arms, else_body })
    }

    fn parse_while(&mut self) -> Option<StmtKind> {
        self.expect_kw(Kw::While)?;
        let cond = self.parse_cond()?;
        self.expect_kw(Kw::Loop)?;
        let body = self.parse_block(&[Kw::End])?;
        self.expect_kw(Kw::End)?;
        self.expect_kw(Kw::Loop)?;
        self.expect_semi()?;
        Some(StmtKind::While { cond, body })
    }

    fn parse_case(&mut self) -> Option<StmtKind> {
        self.expect_kw(Kw::Case)?;
        let scrutinee = self.parse_expr()?;
        self.expect_kw(Kw::Is)?;

        let mut arms = Vec::new();
        let mut else_body = None;
        while self.eat_kw(Kw::When) {
            if self.eat_kw(Kw::Else) {
                self.expect(&TokenKind::Colon, "':'")?;
                else_body = Some(self.parse_block(&[Kw::When, Kw::End])?);
                if self.at_kw(Kw::When) {
                    self.error("'when else' must be the last arm of a case");
                    return None;
                }
                break;
            }
            // Multi-value arms: each value is an alternative way into the
            // same body.
            let mut values = vec![self.parse_expr()?];
            while self.eat(&TokenKind::Comma) {
                values.push(self.parse_expr()?);
            }
            self.expect(&TokenKind::Colon, "':'")?;
            let body = self.parse_block(&[Kw::When, Kw::End])?;
            arms.push(CaseArm { values, body });
        }

        self.expect_kw(Kw::End)?;
        self.expect_kw(Kw::Case)?;
        self.expect_semi()?;
        Some(StmtKind::Case {
            scrutinee,
            arms,
            else_body,
        })
    }

    fn parse_asm(&mut self) -> Option<StmtKind> {
        self.expect_kw(Kw::AtAsm)?;
        let mut parts = Vec::new();
        loop {
            match self.peek().clone() {
                TokenKind::StrLit(bytes) => {
                    self.advance();
                    parts.push(AsmPart::Text(String::from_utf8_lossy(&bytes).into_owned()));
                }
                TokenKind::Ident(name) => {
                    self.advance();
                    parts.push(AsmPart::Var(name));
                }
                other => {
                    let msg = format!(
                        "expected string or variable in @asm, found {}",
                        self.describe(&other)
                    );
                    self.error(msg);
                    return None;
                }
            }
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect_semi()?;
        Some(StmtKind::Asm { parts })
    }

    fn parse_multi_assign(&mut self) -> Option<StmtKind> {
        self.expect(&TokenKind::LParen, "'('")?;
        let mut targets = vec![self.parse_postfix()?];
        while self.eat(&TokenKind::Comma) {
            targets.push(self.parse_postfix()?);
        }
        self.expect(&TokenKind::RParen, "')'")?;
        self.expect(&TokenKind::Assign, "':='")?;
        let call = self.parse_expr()?;
        self.expect_semi()?;
        Some(StmtKind::MultiAssign { targets, call })
    }

    fn parse_assign_or_call(&mut self) -> Option<StmtKind> {
        let expr = self.parse_expr()?;
        if self.eat(&TokenKind::Assign) {
            let value = self.parse_expr()?;
            self.expect_semi()?;
            return Some(StmtKind::Assign {
                target: expr,
                value,
            });
        }
        if matches!(expr.kind, ExprKind::Call { .. }) {
            self.expect_semi()?;
            return Some(StmtKind::Expr(expr));
        }
        self.error("expected ':=' or a call in statement position");
        None
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
    fn test_if_elseif_else() {
        match first_stmt(
            "if a == 1 then x := 1; elseif a == 2 then x := 2; else x := 3; end if;",
        ) {
            StmtKind::If { arms, else_body } => {
                assert_eq!(arms.len(), 2);
                assert!(else_body.is_some());
            }
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn test_while_and_infinite_loop() {
        assert!(matches!(
            first_stmt("while i != 0 loop i := i - 1; end loop;"),
            StmtKind::While { .. }
        ));
        match first_stmt("loop break; end loop;") {
            StmtKind::Loop { body } => assert!(matches!(body[0].kind, StmtKind::Break)),
            other => panic!("expected loop, got {:?}", other),
        }
    }

    #[test]
    fn test_case_with_multi_value_arm() {
        match first_stmt(
            "case x is when 1: y := 1; when 2, 3: y := 2; when else: y := 0; end case;",
        ) {
            StmtKind::Case { arms, else_body, .. } => {
                assert_eq!(arms.len(), 2);
                assert_eq!(arms[1].values.len(), 2);
                assert!(else_body.is_some());
            }
            other => panic!("expected case, got {:?}", other),
        }
    }

    #[test]
    fn test_multi_assign() {
        match first_stmt("(q, r) := divmod(a, b);") {
            StmtKind::MultiAssign { targets, call } => {
                assert_eq!(targets.len(), 2);
                assert!(matches!(call.kind, ExprKind::Call { .. }));
            }
            other => panic!("expected multi-assign, got {:?}", other),
        }
    }

    #[test]
    fn test_call_statement() {
        assert!(matches!(
            first_stmt("print(message);"),
            StmtKind::Expr(_)
        ));
    }

    #[test]
    fn test_bare_expression_statement_is_rejected() {
        parse_err("a + 1;");
    }

    #[test]
    fn test_asm_statement() {
        match first_stmt("@asm \"LDA\", counter, \"\\n\";") {
            StmtKind::Asm { parts } => assert_eq!(parts.len(), 3),
            other => panic!("expected asm, got {:?}", other),
        }
    }

    #[test]
    fn test_deref_assignment() {
        assert!(matches!(
            first_stmt("[p] := 0;"),
            StmtKind::Assign { .. }
        ));
    }

    #[test]
    fn test_missing_end_is_rejected() {
        parse_err("if a == 1 then x := 1;");
    }
}
