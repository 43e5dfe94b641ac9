//! The Cowgol lexer.
//!
//! Transforms source text into [`Token`]s. Dispatch follows the leading
//! character; multi-character operators are matched greedily so `<=` never
//! lexes as `<` `=`.

use cowc_util::{DiagnosticBuilder, FileId, Handler, Interner, Pos};

use crate::cursor::Cursor;
use crate::token::{Kw, Token, TokenKind};

/// Lexer over one source file.
pub struct Lexer<'a> {
    cursor: Cursor<'a>,
    handler: &'a mut Handler,
    interner: &'a mut Interner,
    file: FileId,
    token_line: u32,
    token_col: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(
        source: &'a str,
        file: FileId,
        interner: &'a mut Interner,
        handler: &'a mut Handler,
    ) -> Self {
        Self {
            cursor: Cursor::new(source),
            handler,
            interner,
            file,
            token_line: 1,
            token_col: 1,
        }
    }

    /// Lex the whole file. Stops early after the first lex error.
    pub fn tokenize(mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token();
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done || self.handler.has_errors() {
                break;
            }
        }
        tokens
    }

    /// Position of the token currently being lexed.
    fn pos(&self) -> Pos {
        Pos::new(self.file, self.token_line, self.token_col)
    }

    fn error(&mut self, message: impl Into<String>) {
        let pos = self.pos();
        DiagnosticBuilder::error(message).pos(pos).emit(self.handler);
    }

    /// Returns the next token from the source.
    pub fn next_token(&mut self) -> Token {
        self.skip_whitespace_and_comments();

        self.token_line = self.cursor.line();
        self.token_col = self.cursor.column();
        let pos = self.pos();

        if self.cursor.is_at_end() {
            return Token::new(TokenKind::Eof, pos);
        }

        let kind = match self.cursor.current() {
            b'(' => self.single(TokenKind::LParen),
            b')' => self.single(TokenKind::RParen),
            b'[' => self.single(TokenKind::LBracket),
            b']' => self.single(TokenKind::RBracket),
            b'{' => self.single(TokenKind::LBrace),
            b'}' => self.single(TokenKind::RBrace),
            b',' => self.single(TokenKind::Comma),
            b';' => self.single(TokenKind::Semi),
            b'.' => self.single(TokenKind::Dot),
            b'+' => self.single(TokenKind::Plus),
            b'-' => self.single(TokenKind::Minus),
            b'*' => self.single(TokenKind::Star),
            b'/' => self.single(TokenKind::Slash),
            b'%' => self.single(TokenKind::Percent),
            b'&' => self.single(TokenKind::Amp),
            b'|' => self.single(TokenKind::Pipe),
            b'^' => self.single(TokenKind::Caret),
            b':' => {
                self.cursor.advance();
                if self.cursor.eat(b'=') {
                    TokenKind::Assign
                } else {
                    TokenKind::Colon
                }
            }
            b'<' => {
                self.cursor.advance();
                if self.cursor.eat(b'=') {
                    TokenKind::Le
                } else if self.cursor.eat(b'<') {
                    TokenKind::Shl
                } else {
                    TokenKind::Lt
                }
            }
            b'>' => {
                self.cursor.advance();
                if self.cursor.eat(b'=') {
                    TokenKind::Ge
                } else if self.cursor.eat(b'>') {
                    TokenKind::Shr
                } else {
                    TokenKind::Gt
                }
            }
            b'=' => {
                self.cursor.advance();
                if self.cursor.eat(b'=') {
                    TokenKind::EqEq
                } else {
                    self.error("unexpected character '='; assignment is spelled ':='");
                    TokenKind::Eof
                }
            }
            b'!' => {
                self.cursor.advance();
                if self.cursor.eat(b'=') {
                    TokenKind::Ne
                } else {
                    self.error("unexpected character '!'");
                    TokenKind::Eof
                }
            }
            b'@' => self.lex_at_keyword(),
            b'"' => self.lex_string(),
            b'\'' => self.lex_char(),
            c if c.is_ascii_digit() => self.lex_number(),
            c if c == b'_' || c.is_ascii_alphabetic() => self.lex_identifier(),
            c => {
                self.error(format!("unexpected character '{}'", c as char));
                self.cursor.advance();
                TokenKind::Eof
            }
        };

        Token::new(kind, pos)
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.cursor.advance();
        kind
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.cursor.current() {
                b' ' | b'\t' | b'\r' | b'\n' => {
                    self.cursor.advance();
                }
                b'#' => {
                    while !self.cursor.is_at_end() && self.cursor.current() != b'\n' {
                        self.cursor.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn lex_identifier(&mut self) -> TokenKind {
        let start = self.cursor.position();
        while is_ident_continue(self.cursor.current()) {
            self.cursor.advance();
        }
        let text = self.cursor.slice(start, self.cursor.position());
        match Kw::from_ident(text) {
            Some(kw) => TokenKind::Kw(kw),
            None => TokenKind::Ident(self.interner.intern(text)),
        }
    }

    fn lex_at_keyword(&mut self) -> TokenKind {
        self.cursor.advance(); // @
        let start = self.cursor.position();
        while is_ident_continue(self.cursor.current()) {
            self.cursor.advance();
        }
        let word = self.cursor.slice(start, self.cursor.position());
        match Kw::from_at_word(word) {
            Some(kw) => TokenKind::Kw(kw),
            None => {
                self.error(format!("unknown directive '@{}'", word));
                TokenKind::Eof
            }
        }
    }

    fn lex_number(&mut self) -> TokenKind {
        let radix = if self.cursor.current() == b'0' {
            match self.cursor.peek(1) {
                b'x' | b'X' => 16,
                b'd' | b'D' => 10,
                b'o' | b'O' => 8,
                b'b' | b'B' => 2,
                _ => 0,
            }
        } else {
            0
        };

        let radix = if radix != 0 {
            self.cursor.advance(); // 0
            self.cursor.advance(); // radix letter
            radix
        } else {
            10
        };

        let mut value: i64 = 0;
        let mut digits = 0usize;
        loop {
            let c = self.cursor.current();
            if c == b'_' {
                self.cursor.advance();
                continue;
            }
            let digit = match (c as char).to_digit(radix) {
                Some(d) => d as i64,
                None => break,
            };
            value = value.wrapping_mul(radix as i64).wrapping_add(digit);
            digits += 1;
            self.cursor.advance();
        }

        if digits == 0 {
            self.error("malformed integer literal: no digits");
            return TokenKind::Eof;
        }
        if is_ident_continue(self.cursor.current()) {
            self.error("malformed integer literal: trailing letter");
            return TokenKind::Eof;
        }
        TokenKind::Int(value)
    }

    /// Decode one escape sequence after the backslash has been consumed.
    fn lex_escape(&mut self) -> Option<u8> {
        let c = self.cursor.advance();
        Some(match c {
            b'n' => b'\n',
            b't' => b'\t',
            b'r' => b'\r',
            b'0' => 0,
            b'\\' => b'\\',
            b'\'' => b'\'',
            b'"' => b'"',
            b'x' => {
                let hi = (self.cursor.advance() as char).to_digit(16);
                let lo = (self.cursor.advance() as char).to_digit(16);
                match (hi, lo) {
                    (Some(h), Some(l)) => (h * 16 + l) as u8,
                    _ => {
                        self.error("malformed \\x escape: expected two hex digits");
                        return None;
                    }
                }
            }
            _ => {
                self.error(format!("unknown escape '\\{}'", c as char));
                return None;
            }
        })
    }

    fn lex_char(&mut self) -> TokenKind {
        self.cursor.advance(); // opening quote
        let c = match self.cursor.current() {
            0 | b'\n' => {
                self.error("unterminated character literal");
                return TokenKind::Eof;
            }
            b'\\' => {
                self.cursor.advance();
                match self.lex_escape() {
                    Some(b) => b,
                    None => return TokenKind::Eof,
                }
            }
            c => {
                self.cursor.advance();
                c
            }
        };
        if !self.cursor.eat(b'\'') {
            self.error("unterminated character literal");
            return TokenKind::Eof;
        }
        TokenKind::CharLit(c)
    }

    fn lex_string(&mut self) -> TokenKind {
        self.cursor.advance(); // opening quote
        let mut bytes = Vec::new();
        loop {
            match self.cursor.current() {
                0 => {
                    self.error("unterminated string literal");
                    return TokenKind::Eof;
                }
                b'"' => {
                    self.cursor.advance();
                    break;
                }
                b'\\' => {
                    self.cursor.advance();
                    match self.lex_escape() {
                        Some(b) => bytes.push(b),
                        None => return TokenKind::Eof,
                    }
                }
                c => {
                    self.cursor.advance();
                    bytes.push(c);
                }
            }
        }
        TokenKind::StrLit(bytes)
    }
}

#[inline]
fn is_ident_continue(c: u8) -> bool {
    c == b'_' || c.is_ascii_alphanumeric()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(src: &str) -> (Vec<Token>, Handler, Interner) {
        let mut interner = Interner::new();
        let mut handler = Handler::new();
        let tokens = Lexer::new(src, FileId(0), &mut interner, &mut handler).tokenize();
        (tokens, handler, interner)
    }

    fn kinds(src: &str) -> Vec<TokenKind> {
        let (tokens, handler, _) = lex(src);
        assert!(!handler.has_errors(), "lex errors: {:?}", handler.diagnostics());
        tokens.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_keywords_and_idents() {
        let ks = kinds("var foo while @sizeof");
        assert_eq!(ks[0], TokenKind::Kw(Kw::Var));
        assert!(matches!(ks[1], TokenKind::Ident(_)));
        assert_eq!(ks[2], TokenKind::Kw(Kw::While));
        assert_eq!(ks[3], TokenKind::Kw(Kw::AtSizeof));
        assert_eq!(ks[4], TokenKind::Eof);
    }

    #[test]
    fn test_radix_literals() {
        assert_eq!(kinds("0xFF")[0], TokenKind::Int(255));
        assert_eq!(kinds("0b1010")[0], TokenKind::Int(10));
        assert_eq!(kinds("0o17")[0], TokenKind::Int(15));
        assert_eq!(kinds("0d42")[0], TokenKind::Int(42));
        assert_eq!(kinds("1_000")[0], TokenKind::Int(1000));
        assert_eq!(kinds("0")[0], TokenKind::Int(0));
    }

    #[test]
    fn test_malformed_number_is_fatal() {
        let (_, handler, _) = lex("0x;");
        assert!(handler.has_errors());
        let (_, handler, _) = lex("12ab");
        assert!(handler.has_errors());
    }

    #[test]
    fn test_greedy_operators() {
        let ks = kinds("<= >= == != := << >> < >");
        assert_eq!(
            &ks[..9],
            &[
                TokenKind::Le,
                TokenKind::Ge,
                TokenKind::EqEq,
                TokenKind::Ne,
                TokenKind::Assign,
                TokenKind::Shl,
                TokenKind::Shr,
                TokenKind::Lt,
                TokenKind::Gt,
            ]
        );
    }

    #[test]
    fn test_char_escapes() {
        assert_eq!(kinds("'\\n'")[0], TokenKind::CharLit(b'\n'));
        assert_eq!(kinds("'\\x41'")[0], TokenKind::CharLit(0x41));
        assert_eq!(kinds("'a'")[0], TokenKind::CharLit(b'a'));
        assert_eq!(kinds("'\\0'")[0], TokenKind::CharLit(0));
    }

    #[test]
    fn test_string_literal_bytes() {
        match &kinds("\"Hi\\n\"")[0] {
            TokenKind::StrLit(b) => assert_eq!(b, &vec![b'H', b'i', b'\n']),
            other => panic!("expected string, got {:?}", other),
        }
    }

    #[test]
    fn test_comments_are_skipped() {
        let ks = kinds("1 # the rest is ignored != :=\n2");
        assert_eq!(ks[0], TokenKind::Int(1));
        assert_eq!(ks[1], TokenKind::Int(2));
    }

    #[test]
    fn test_unknown_character_is_fatal() {
        let (_, handler, _) = lex("`");
        assert!(handler.has_errors());
    }

    #[test]
    fn test_unknown_at_directive_is_fatal() {
        let (_, handler, _) = lex("@bogus");
        assert!(handler.has_errors());
    }

    #[test]
    fn test_positions() {
        let (tokens, _, _) = lex("var\n  x");
        assert_eq!(tokens[0].pos.line, 1);
        assert_eq!(tokens[0].pos.col, 1);
        assert_eq!(tokens[1].pos.line, 2);
        assert_eq!(tokens[1].pos.col, 3);
    }

    #[test]
    fn test_unterminated_string_is_fatal() {
        let (_, handler, _) = lex("\"abc");
        assert!(handler.has_errors());
    }
}
