//! Declaration parsing: variables, constants, typedefs, records,
//! interfaces and subroutines.

use cowc_lex::{Kw, TokenKind};

use crate::ast::*;
use crate::Parser;

impl<'a> Parser<'a> {
    pub(crate) fn parse_var_decl(&mut self) -> Option<StmtKind> {
        self.expect_kw(Kw::Var)?;
        let name = self.expect_ident("variable name")?;

        let mut ty = None;
        if self.eat(&TokenKind::Colon) {
            ty = Some(self.parse_type_ref()?);
        }

        let mut init = None;
        if self.eat(&TokenKind::Assign) {
            init = Some(self.parse_init()?);
        }

        if ty.is_none() && init.is_none() {
            self.error("variable needs a type or an initializer");
            return None;
        }
        self.expect_semi()?;
        Some(StmtKind::Var(VarDecl { name, ty, init }))
    }

    fn parse_init(&mut self) -> Option<Init> {
        if self.eat(&TokenKind::LBrace) {
            let mut values = Vec::new();
            if !self.at(&TokenKind::RBrace) {
                loop {
                    values.push(self.parse_expr()?);
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
            }
            self.expect(&TokenKind::RBrace, "'}'")?;
            return Some(Init::List(values));
        }
        Some(Init::Expr(self.parse_expr()?))
    }

    pub(crate) fn parse_const_decl(&mut self) -> Option<StmtKind> {
        self.expect_kw(Kw::Const)?;
        let name = self.expect_ident("constant name")?;
        self.expect(&TokenKind::Assign, "':='")?;
        let value = self.parse_expr()?;
        self.expect_semi()?;
        Some(StmtKind::Const { name, value })
    }

    pub(crate) fn parse_typedef(&mut self) -> Option<StmtKind> {
        self.expect_kw(Kw::Typedef)?;
        let name = self.expect_ident("type name")?;
        self.expect_kw(Kw::Is)?;
        let ty = self.parse_type_ref()?;
        self.expect_semi()?;
        Some(StmtKind::Typedef { name, ty })
    }

    pub(crate) fn parse_record_decl(&mut self) -> Option<StmtKind> {
        self.expect_kw(Kw::Record)?;
        let name = self.expect_ident("record name")?;
        let base = if self.eat(&TokenKind::Colon) {
            Some(self.expect_ident("base record name")?)
        } else {
            None
        };
        self.expect_kw(Kw::Is)?;

        let mut fields = Vec::new();
        while !self.at_kw(Kw::End) {
            if self.at_eof() {
                self.error("unexpected end of input inside record");
                return None;
            }
            let pos = self.pos();
            let fname = self.expect_ident("field name")?;
            self.expect(&TokenKind::Colon, "':'")?;
            let fty = self.parse_type_ref()?;
            let at = if self.eat_kw(Kw::AtAt) {
                self.expect(&TokenKind::LParen, "'('")?;
                let offset = self.parse_expr()?;
                self.expect(&TokenKind::RParen, "')'")?;
                Some(offset)
            } else {
                None
            };
            self.expect_semi()?;
            fields.push(FieldDecl {
                name: fname,
                ty: fty,
                at,
                pos,
            });
        }
        self.expect_kw(Kw::End)?;
        self.expect_kw(Kw::Record)?;
        self.expect_semi()?;
        Some(StmtKind::Record(RecordDecl { name, base, fields }))
    }

    pub(crate) fn parse_interface_decl(&mut self) -> Option<StmtKind> {
        self.expect_kw(Kw::Interface)?;
        let name = self.expect_ident("interface name")?;
        let params = self.parse_param_list()?;
        let rets = if self.eat(&TokenKind::Colon) {
            self.parse_param_list()?
        } else {
            Vec::new()
        };
        self.expect_semi()?;
        Some(StmtKind::Interface(InterfaceDecl { name, params, rets }))
    }

    /// `( name: type, ... )`; empty parens give an empty list.
    fn parse_param_list(&mut self) -> Option<Vec<ParamDecl>> {
        self.expect(&TokenKind::LParen, "'('")?;
        let mut params = Vec::new();
        if !self.at(&TokenKind::RParen) {
            loop {
                let pos = self.pos();
                let name = self.expect_ident("parameter name")?;
                self.expect(&TokenKind::Colon, "':'")?;
                let ty = self.parse_type_ref()?;
                params.push(ParamDecl { name, ty, pos });
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen, "')'")?;
        Some(params)
    }

    /// Subroutine declaration. The caller has consumed any `@decl`/`@impl`
    /// prefix and, for those forms, the `sub` keyword as well.
    pub(crate) fn parse_sub_decl(&mut self, kind: SubKind) -> Option<StmtKind> {
        if kind == SubKind::Normal {
            self.expect_kw(Kw::Sub)?;
        }
        let name = self.expect_ident("subroutine name")?;

        // An @impl may repeat the signature (it must then match the @decl),
        // or supply only the body.
        let (params, rets, implements) = if kind == SubKind::Impl {
            let params = if self.at(&TokenKind::LParen) {
                self.parse_param_list()?
            } else {
                Vec::new()
            };
            let rets = if self.eat(&TokenKind::Colon) {
                self.parse_param_list()?
            } else {
                Vec::new()
            };
            (params, rets, None)
        } else if self.eat_kw(Kw::Implements) {
            let iface = self.expect_ident("interface name")?;
            (Vec::new(), Vec::new(), Some(iface))
        } else {
            let params = if self.at(&TokenKind::LParen) {
                self.parse_param_list()?
            } else {
                Vec::new()
            };
            let rets = if self.eat(&TokenKind::Colon) {
                self.parse_param_list()?
            } else {
                Vec::new()
            };
            (params, rets, None)
        };

        let extern_name = if self.eat_kw(Kw::AtExtern) {
            self.expect(&TokenKind::LParen, "'('")?;
            let label = match self.peek().clone() {
                TokenKind::StrLit(bytes) => {
                    self.advance();
                    String::from_utf8_lossy(&bytes).into_owned()
                }
                other => {
                    let msg = format!(
                        "expected quoted linkage name, found {}",
                        self.describe(&other)
                    );
                    self.error(msg);
                    return None;
                }
            };
            self.expect(&TokenKind::RParen, "')'")?;
            Some(label)
        } else {
            None
        };

        let body = if kind == SubKind::Decl {
            self.expect_semi()?;
            None
        } else {
            self.expect_kw(Kw::Is)?;
            let body = self.parse_block(&[Kw::End])?;
            self.expect_kw(Kw::End)?;
            self.expect_kw(Kw::Sub)?;
            self.expect_semi()?;
            Some(body)
        };

        Some(StmtKind::Sub(SubDecl {
            name,
            kind,
            params,
            rets,
            implements,
            extern_name,
            body,
        }))
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
    fn test_var_decls() {
        assert!(matches!(
            first_stmt("var x: uint8;"),
            StmtKind::Var(VarDecl { ty: Some(_), init: None, .. })
        ));
        assert!(matches!(
            first_stmt("var x: uint8 := 3;"),
            StmtKind::Var(VarDecl { ty: Some(_), init: Some(Init::Expr(_)), .. })
        ));
        assert!(matches!(
            first_stmt("var x := y;"),
            StmtKind::Var(VarDecl { ty: None, init: Some(_), .. })
        ));
        parse_err("var x;");
    }

    #[test]
    fn test_array_with_list_initializer() {
        match first_stmt("var table: uint8[] := {1, 2, 3};") {
            StmtKind::Var(VarDecl { ty: Some(TypeRef::Array { len: None, .. }), init: Some(Init::List(v)), .. }) => {
                assert_eq!(v.len(), 3);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_record_with_base_and_at() {
        match first_stmt(
            "record Point3D: Point is z: int16; flags: uint8 @at(6); end record;",
        ) {
            StmtKind::Record(r) => {
                assert!(r.base.is_some());
                assert_eq!(r.fields.len(), 2);
                assert!(r.fields[1].at.is_some());
            }
            other => panic!("expected record, got {:?}", other),
        }
    }

    #[test]
    fn test_sub_with_params_and_rets() {
        match first_stmt("sub add(a: uint16, b: uint16): (r: uint16) is r := a + b; end sub;") {
            StmtKind::Sub(s) => {
                assert_eq!(s.kind, SubKind::Normal);
                assert_eq!(s.params.len(), 2);
                assert_eq!(s.rets.len(), 1);
                assert!(s.body.is_some());
            }
            other => panic!("expected sub, got {:?}", other),
        }
    }

    #[test]
    fn test_forward_decl_and_impl() {
        let (program, _) = parse_ok(
            "@decl sub helper(n: uint8);\n@impl sub helper is n := n; end sub;",
        );
        match (&program.body[0].kind, &program.body[1].kind) {
            (StmtKind::Sub(d), StmtKind::Sub(i)) => {
                assert_eq!(d.kind, SubKind::Decl);
                assert!(d.body.is_none());
                assert_eq!(i.kind, SubKind::Impl);
                assert!(i.body.is_some());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_extern_decl() {
        match first_stmt("@decl sub print(s: [uint8]) @extern(\"f_print\");") {
            StmtKind::Sub(s) => {
                assert_eq!(s.extern_name.as_deref(), Some("f_print"));
            }
            other => panic!("expected sub, got {:?}", other),
        }
    }

    #[test]
    fn test_interface_and_implements() {
        let (program, _) = parse_ok(
            "interface Handler(code: uint8): (ok: uint8);\n\
             sub on_zero implements Handler is ok := 1; end sub;",
        );
        match (&program.body[0].kind, &program.body[1].kind) {
            (StmtKind::Interface(i), StmtKind::Sub(s)) => {
                assert_eq!(i.params.len(), 1);
                assert_eq!(i.rets.len(), 1);
                assert!(s.implements.is_some());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_typedef() {
        assert!(matches!(
            first_stmt("typedef byte is uint8;"),
            StmtKind::Typedef { .. }
        ));
    }

    #[test]
    fn test_nested_sub() {
        match first_stmt(
            "sub outer is var x: uint8; sub inner is x := 1; end sub; inner(); end sub;",
        ) {
            StmtKind::Sub(outer) => {
                let body = outer.body.unwrap();
                assert!(body.iter().any(|s| matches!(s.kind, StmtKind::Sub(_))));
            }
            other => panic!("expected sub, got {:?}", other),
        }
    }
}
