//! cowc-par - Parser for the Cowgol source language.
//!
//! Builds the untyped AST from the preprocessed token stream. Expressions
//! use precedence climbing; conditions have their own grammar layered over
//! expressions, which is how the language keeps comparisons out of value
//! position. The first parse error aborts the parse.

pub mod ast;
mod expr;
mod items;
mod stmt;

pub use ast::*;

use cowc_lex::{Kw, Token, TokenKind};
use cowc_util::{DiagnosticBuilder, Handler, Interner, Pos};

/// Parser over the full token stream of one compilation.
pub struct Parser<'a> {
    tokens: Vec<Token>,
    ix: usize,
    pub(crate) handler: &'a mut Handler,
    pub(crate) interner: &'a Interner,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: Vec<Token>, interner: &'a Interner, handler: &'a mut Handler) -> Self {
        Self {
            tokens,
            ix: 0,
            handler,
            interner,
        }
    }

    /// Parse the whole program. On error the returned program is partial
    /// and the handler holds the diagnostic.
    pub fn parse(mut self) -> Program {
        let mut body = Vec::new();
        while !self.at_eof() {
            match self.parse_statement() {
                Some(stmt) => body.push(stmt),
                None => break,
            }
        }
        Program { body }
    }

    // ---- token plumbing ----

    pub(crate) fn peek(&self) -> &TokenKind {
        self.tokens
            .get(self.ix)
            .map(|t| &t.kind)
            .unwrap_or(&TokenKind::Eof)
    }

    pub(crate) fn pos(&self) -> Pos {
        self.tokens
            .get(self.ix)
            .map(|t| t.pos)
            .or_else(|| self.tokens.last().map(|t| t.pos))
            .unwrap_or(Pos::DUMMY)
    }

    pub(crate) fn advance(&mut self) -> TokenKind {
        let kind = self.peek().clone();
        if self.ix < self.tokens.len() {
            self.ix += 1;
        }
        kind
    }

    pub(crate) fn at(&self, kind: &TokenKind) -> bool {
        self.peek() == kind
    }

    pub(crate) fn at_kw(&self, kw: Kw) -> bool {
        *self.peek() == TokenKind::Kw(kw)
    }

    pub(crate) fn at_eof(&self) -> bool {
        matches!(self.peek(), TokenKind::Eof)
    }

    pub(crate) fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(crate) fn eat_kw(&mut self, kw: Kw) -> bool {
        self.eat(&TokenKind::Kw(kw))
    }

    pub(crate) fn error(&mut self, message: impl Into<String>) {
        let pos = self.pos();
        DiagnosticBuilder::error(message).pos(pos).emit(self.handler);
    }

    pub(crate) fn expect(&mut self, kind: &TokenKind, what: &str) -> Option<()> {
        if self.eat(kind) {
            Some(())
        } else {
            let found = self.describe(self.peek());
            self.error(format!("expected {}, found {}", what, found));
            None
        }
    }

    pub(crate) fn expect_kw(&mut self, kw: Kw) -> Option<()> {
        if self.eat_kw(kw) {
            Some(())
        } else {
            let found = self.describe(self.peek());
            self.error(format!("expected '{}', found {}", kw.as_str(), found));
            None
        }
    }

    pub(crate) fn expect_ident(&mut self, what: &str) -> Option<cowc_util::Name> {
        match self.peek() {
            TokenKind::Ident(name) => {
                let name = *name;
                self.advance();
                Some(name)
            }
            other => {
                let msg = format!("expected {}, found {}", what, self.describe(other));
                self.error(msg);
                None
            }
        }
    }

    pub(crate) fn expect_semi(&mut self) -> Option<()> {
        self.expect(&TokenKind::Semi, "';'")
    }

    // ---- backtracking ----

    /// Snapshot for speculative parsing: token index plus diagnostic mark.
    pub(crate) fn checkpoint(&self) -> (usize, usize) {
        (self.ix, self.handler.mark())
    }

    /// Abandon a speculative parse, dropping its diagnostics.
    pub(crate) fn rewind(&mut self, cp: (usize, usize)) {
        self.ix = cp.0;
        self.handler.truncate(cp.1);
    }
}

impl<'a> Parser<'a> {
    /// Human-readable token description for diagnostics.
    pub(crate) fn describe(&self, kind: &TokenKind) -> String {
        describe_with(kind, Some(self.interner))
    }
}

/// Human-readable token description for diagnostics.
pub(crate) fn describe_with(kind: &TokenKind, interner: Option<&Interner>) -> String {
    match kind {
        TokenKind::Kw(kw) => format!("'{}'", kw.as_str()),
        TokenKind::Ident(name) => match interner {
            Some(i) => format!("identifier '{}'", i.resolve(*name)),
            None => "identifier".to_string(),
        },
        TokenKind::Int(v) => format!("integer {}", v),
        TokenKind::CharLit(_) => "character literal".to_string(),
        TokenKind::StrLit(_) => "string literal".to_string(),
        TokenKind::Eof => "end of input".to_string(),
        TokenKind::Assign => "':='".to_string(),
        TokenKind::Plus => "'+'".to_string(),
        TokenKind::Minus => "'-'".to_string(),
        TokenKind::Star => "'*'".to_string(),
        TokenKind::Slash => "'/'".to_string(),
        TokenKind::Percent => "'%'".to_string(),
        TokenKind::Amp => "'&'".to_string(),
        TokenKind::Pipe => "'|'".to_string(),
        TokenKind::Caret => "'^'".to_string(),
        TokenKind::Shl => "'<<'".to_string(),
        TokenKind::Shr => "'>>'".to_string(),
        TokenKind::Lt => "'<'".to_string(),
        TokenKind::Le => "'<='".to_string(),
        TokenKind::Gt => "'>'".to_string(),
        TokenKind::Ge => "'>='".to_string(),
        TokenKind::EqEq => "'=='".to_string(),
        TokenKind::Ne => "'!='".to_string(),
        TokenKind::LParen => "'('".to_string(),
        TokenKind::RParen => "')'".to_string(),
        TokenKind::LBracket => "'['".to_string(),
        TokenKind::RBracket => "']'".to_string(),
        TokenKind::LBrace => "'{'".to_string(),
        TokenKind::RBrace => "'}'".to_string(),
        TokenKind::Colon => "':'".to_string(),
        TokenKind::Semi => "';'".to_string(),
        TokenKind::Comma => "','".to_string(),
        TokenKind::Dot => "'.'".to_string(),
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;
    use cowc_lex::Lexer;
    use cowc_util::FileId;

    /// Lex and parse a snippet, asserting no diagnostics.
    pub fn parse_ok(src: &str) -> (Program, Interner) {
        let mut interner = Interner::new();
        let mut handler = Handler::new();
        let tokens = Lexer::new(src, FileId(0), &mut interner, &mut handler).tokenize();
        assert!(!handler.has_errors(), "lex: {:?}", handler.diagnostics());
        let program = Parser::new(tokens, &interner, &mut handler).parse();
        assert!(!handler.has_errors(), "parse: {:?}", handler.diagnostics());
        (program, interner)
    }

    /// Lex and parse a snippet, asserting at least one diagnostic.
    pub fn parse_err(src: &str) -> Handler {
        let mut interner = Interner::new();
        let mut handler = Handler::new();
        let tokens = Lexer::new(src, FileId(0), &mut interner, &mut handler).tokenize();
        let _ = Parser::new(tokens, &interner, &mut handler).parse();
        assert!(handler.has_errors(), "expected a parse error for: {src}");
        handler
    }
}
