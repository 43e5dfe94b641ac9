//! Lexer round-trip property: joining the lexemes of the token stream with
//! single spaces and re-lexing yields the same stream, and lexing loses
//! nothing but comments and whitespace.

use cowc_lex::{Kw, Lexer, TokenKind};
use cowc_util::{FileId, Handler, Interner};
use proptest::prelude::*;

fn lex(src: &str) -> (Vec<TokenKind>, Interner, Handler) {
    let mut interner = Interner::new();
    let mut handler = Handler::new();
    let tokens = Lexer::new(src, FileId(0), &mut interner, &mut handler).tokenize();
    (tokens.into_iter().map(|t| t.kind).collect(), interner, handler)
}

/// Render a token back to a lexeme that re-lexes to the same token.
fn render(kind: &TokenKind, interner: &Interner) -> String {
    match kind {
        TokenKind::Kw(kw) => kw.as_str().to_string(),
        TokenKind::Ident(name) => interner.resolve(*name).to_string(),
        TokenKind::Int(v) => format!("{}", v),
        TokenKind::CharLit(b) => format!("'\\x{:02x}'", b),
        TokenKind::StrLit(bytes) => {
            let mut s = String::from("\"");
            for b in bytes {
                s.push_str(&format!("\\x{:02x}", b));
            }
            s.push('"');
            s
        }
        TokenKind::Assign => ":=".into(),
        TokenKind::Plus => "+".into(),
        TokenKind::Minus => "-".into(),
        TokenKind::Star => "*".into(),
        TokenKind::Slash => "/".into(),
        TokenKind::Percent => "%".into(),
        TokenKind::Amp => "&".into(),
        TokenKind::Pipe => "|".into(),
        TokenKind::Caret => "^".into(),
        TokenKind::Shl => "<<".into(),
        TokenKind::Shr => ">>".into(),
        TokenKind::Lt => "<".into(),
        TokenKind::Le => "<=".into(),
        TokenKind::Gt => ">".into(),
        TokenKind::Ge => ">=".into(),
        TokenKind::EqEq => "==".into(),
        TokenKind::Ne => "!=".into(),
        TokenKind::LParen => "(".into(),
        TokenKind::RParen => ")".into(),
        TokenKind::LBracket => "[".into(),
        TokenKind::RBracket => "]".into(),
        TokenKind::LBrace => "{".into(),
        TokenKind::RBrace => "}".into(),
        TokenKind::Colon => ":".into(),
        TokenKind::Semi => ";".into(),
        TokenKind::Comma => ",".into(),
        TokenKind::Dot => ".".into(),
        TokenKind::Eof => String::new(),
    }
}

fn ident_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,8}".prop_filter("not a keyword", |s| Kw::from_ident(s).is_none())
}

fn source_strategy() -> impl Strategy<Value = String> {
    let piece = prop_oneof![
        ident_strategy(),
        (0u32..100000).prop_map(|n| n.to_string()),
        Just(":=".to_string()),
        Just("<=".to_string()),
        Just("<<".to_string()),
        Just("==".to_string()),
        Just("var".to_string()),
        Just("while".to_string()),
        Just("@sizeof".to_string()),
        Just(";".to_string()),
        Just("(".to_string()),
        Just(")".to_string()),
    ];
    prop::collection::vec(piece, 0..40).prop_map(|v| v.join(" "))
}

proptest! {
    #[test]
    fn relexing_rendered_lexemes_is_identity(src in source_strategy()) {
        let (first, interner, handler) = lex(&src);
        prop_assert!(!handler.has_errors());

        let rendered: Vec<String> = first
            .iter()
            .filter(|k| **k != TokenKind::Eof)
            .map(|k| render(k, &interner))
            .collect();
        let rejoined = rendered.join(" ");

        let (second, _, handler2) = lex(&rejoined);
        prop_assert!(!handler2.has_errors());
        // Interner indices can differ between runs, so compare lexemes.
        let first_lex: Vec<String> = first.iter().map(|k| render(k, &interner)).collect();
        let second_interner = {
            let mut i = Interner::new();
            let mut h = Handler::new();
            let _ = Lexer::new(&rejoined, FileId(0), &mut i, &mut h).tokenize();
            i
        };
        let second_lex: Vec<String> = second.iter().map(|k| render(k, &second_interner)).collect();
        prop_assert_eq!(first_lex, second_lex);
    }

    #[test]
    fn comments_do_not_change_the_stream(src in source_strategy()) {
        let commented = format!("# leading comment\n{} # trailing\n", src);
        let (plain, i1, _) = lex(&src);
        let (with_comments, i2, _) = lex(&commented);
        let a: Vec<String> = plain.iter().map(|k| render(k, &i1)).collect();
        let b: Vec<String> = with_comments.iter().map(|k| render(k, &i2)).collect();
        prop_assert_eq!(a, b);
    }
}
