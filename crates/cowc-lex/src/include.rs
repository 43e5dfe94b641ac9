//! Include preprocessing.
//!
//! Resolves `include "name"` directives against an ordered search path and
//! splices the included file's tokens into the stream, as if the files had
//! been textually pasted. Inclusion is unconditional; a file named twice is
//! tokenized twice. A depth cap guards against mutually-including headers.

use std::path::{Path, PathBuf};

use cowc_util::{DiagnosticBuilder, Handler, Interner, Pos, SourceMap};
use thiserror::Error;

use crate::lexer::Lexer;
use crate::token::{Kw, Token, TokenKind};

/// Maximum include nesting before the preprocessor gives up.
const MAX_DEPTH: usize = 64;

/// Errors surfaced by include processing.
///
/// These also land in the diagnostic handler with the directive's position;
/// the error value carries the machine-readable cause for the driver.
#[derive(Debug, Error)]
pub enum IncludeError {
    #[error("cannot open {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("include \"{name}\" not found on the search path")]
    NotFound { name: String },

    #[error("include nesting deeper than {MAX_DEPTH} levels")]
    TooDeep,

    #[error("lexical errors in {path}")]
    LexFailed { path: PathBuf },
}

/// Tokenize `entry` and everything it includes into one linear stream.
///
/// The entry file's own directory is searched first, then `include_dirs`
/// in order. The returned stream ends with a single `Eof` token.
pub fn preprocess(
    entry: &Path,
    include_dirs: &[PathBuf],
    sources: &mut SourceMap,
    interner: &mut Interner,
    handler: &mut Handler,
) -> Result<Vec<Token>, IncludeError> {
    let mut search = Vec::with_capacity(include_dirs.len() + 1);
    if let Some(parent) = entry.parent() {
        search.push(parent.to_path_buf());
    }
    search.extend(include_dirs.iter().cloned());

    let mut out = process_file(entry, &search, sources, interner, handler, 0)?;
    let end = out.last().map(|t| t.pos).unwrap_or(Pos::DUMMY);
    out.push(Token::new(TokenKind::Eof, end));
    Ok(out)
}

/// Tokenize one file, recursing into its includes. The returned stream has
/// no `Eof` token.
fn process_file(
    path: &Path,
    search: &[PathBuf],
    sources: &mut SourceMap,
    interner: &mut Interner,
    handler: &mut Handler,
    depth: usize,
) -> Result<Vec<Token>, IncludeError> {
    if depth > MAX_DEPTH {
        return Err(IncludeError::TooDeep);
    }

    let content = std::fs::read_to_string(path).map_err(|source| IncludeError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let file = sources.add(path.to_path_buf(), content);
    // The cursor borrows the map's copy of the content.
    let source = sources.get(file).map(|f| f.content.clone()).unwrap_or_default();

    let tokens = Lexer::new(&source, file, interner, handler).tokenize();
    if handler.has_errors() {
        return Err(IncludeError::LexFailed {
            path: path.to_path_buf(),
        });
    }

    let mut out = Vec::with_capacity(tokens.len());
    let mut iter = tokens.into_iter().peekable();
    while let Some(token) = iter.next() {
        match token.kind {
            TokenKind::Eof => break,
            TokenKind::Kw(Kw::Include) => {
                let pos = token.pos;
                let name = match iter.next() {
                    Some(Token {
                        kind: TokenKind::StrLit(bytes),
                        ..
                    }) => String::from_utf8_lossy(&bytes).into_owned(),
                    _ => {
                        DiagnosticBuilder::error("include expects a quoted file name")
                            .pos(pos)
                            .emit(handler);
                        return Err(IncludeError::NotFound {
                            name: String::new(),
                        });
                    }
                };
                if !matches!(
                    iter.next(),
                    Some(Token {
                        kind: TokenKind::Semi,
                        ..
                    })
                ) {
                    DiagnosticBuilder::error("expected ';' after include")
                        .pos(pos)
                        .emit(handler);
                    return Err(IncludeError::NotFound { name });
                }

                let resolved = match resolve(&name, search) {
                    Some(p) => p,
                    None => {
                        DiagnosticBuilder::error(format!(
                            "include \"{}\" not found on the search path",
                            name
                        ))
                        .pos(pos)
                        .emit(handler);
                        return Err(IncludeError::NotFound { name });
                    }
                };
                let inner =
                    process_file(&resolved, search, sources, interner, handler, depth + 1)?;
                out.extend(inner);
            }
            _ => out.push(token),
        }
    }
    Ok(out)
}

/// First search-path hit wins.
fn resolve(name: &str, search: &[PathBuf]) -> Option<PathBuf> {
    for dir in search {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn run(entry: &Path, dirs: &[PathBuf]) -> (Result<Vec<Token>, IncludeError>, Handler) {
        let mut sources = SourceMap::new();
        let mut interner = Interner::new();
        let mut handler = Handler::new();
        let r = preprocess(entry, dirs, &mut sources, &mut interner, &mut handler);
        (r, handler)
    }

    #[test]
    fn test_include_splices_tokens() {
        let tmp = std::env::temp_dir().join("cowc_inc_splice");
        std::fs::create_dir_all(&tmp).unwrap();
        write(&tmp, "header.coh", "const K := 1;");
        let entry = write(&tmp, "main.cow", "include \"header.coh\";\nvar x: uint8;");

        let (r, handler) = run(&entry, &[]);
        let tokens = r.unwrap();
        assert!(!handler.has_errors());
        // const K := 1 ; var x : uint8 ; eof
        assert_eq!(tokens[0].kind, TokenKind::Kw(Kw::Const));
        assert_eq!(tokens[4].kind, TokenKind::Semi);
        assert_eq!(tokens[5].kind, TokenKind::Kw(Kw::Var));
        assert_eq!(tokens.last().unwrap().kind, TokenKind::Eof);
    }

    #[test]
    fn test_missing_include_is_fatal() {
        let tmp = std::env::temp_dir().join("cowc_inc_missing");
        std::fs::create_dir_all(&tmp).unwrap();
        let entry = write(&tmp, "main.cow", "include \"nope.coh\";");

        let (r, handler) = run(&entry, &[]);
        assert!(matches!(r, Err(IncludeError::NotFound { .. })));
        assert!(handler.has_errors());
    }

    #[test]
    fn test_search_path_order() {
        let tmp = std::env::temp_dir().join("cowc_inc_order");
        let first = tmp.join("first");
        let second = tmp.join("second");
        std::fs::create_dir_all(&first).unwrap();
        std::fs::create_dir_all(&second).unwrap();
        write(&first, "lib.coh", "const A := 1;");
        write(&second, "lib.coh", "const B := 2;");
        let entry = write(&tmp, "main.cow", "include \"lib.coh\";");

        let (r, _) = run(&entry, &[first, second]);
        let tokens = r.unwrap();
        // The copy in `first` wins: const A := 1;
        assert_eq!(tokens[0].kind, TokenKind::Kw(Kw::Const));
        assert!(matches!(tokens[1].kind, TokenKind::Ident(_)));
        assert_eq!(tokens[3].kind, TokenKind::Int(1));
    }

    #[test]
    fn test_mutual_inclusion_hits_depth_cap() {
        let tmp = std::env::temp_dir().join("cowc_inc_cycle");
        std::fs::create_dir_all(&tmp).unwrap();
        write(&tmp, "a.coh", "include \"b.coh\";");
        write(&tmp, "b.coh", "include \"a.coh\";");
        let entry = write(&tmp, "main.cow", "include \"a.coh\";");

        let (r, _) = run(&entry, &[]);
        assert!(matches!(r, Err(IncludeError::TooDeep)));
    }
}
