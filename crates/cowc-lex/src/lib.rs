//! cowc-lex - Lexical analysis for the Cowgol source language.
//!
//! This crate turns source text into a stream of [`Token`]s and resolves
//! `include` directives against a search path, producing the single linear
//! token stream the parser consumes.
//!
//! The lexer handles:
//! - radix-prefixed integer literals (`0x`, `0d`, `0o`, `0b`) with `_`
//!   digit separators
//! - character and string literals with the standard escapes
//! - `#` end-of-line comments
//! - the fixed Cowgol keyword set, including the `@`-keywords
//! - greedy multi-character operators (`<=`, `>=`, `==`, `!=`, `:=`,
//!   `<<`, `>>`)

mod cursor;
mod include;
mod lexer;
mod token;

pub use cursor::Cursor;
pub use include::{preprocess, IncludeError};
pub use lexer::Lexer;
pub use token::{Kw, Token, TokenKind};
