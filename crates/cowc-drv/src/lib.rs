//! cowc-drv - Compiler driver.
//!
//! ============================================================================
//! COMPILER DRIVER OVERVIEW
//! ============================================================================
//!
//! The driver is the entry point and orchestrator for the whole
//! compilation pipeline. It is responsible for:
//!
//! 1. CONFIGURATION
//!    - Collect the input path, include directories, output path and
//!      the optimizer/debug toggles into a [`Config`]
//!    - Derive the default output path (input with an `.asm` extension)
//!
//! 2. SESSION STATE
//!    - Own the [`SourceMap`] of every file the preprocessor opens
//!    - Own the string [`Interner`] and the diagnostic [`Handler`];
//!      both are threaded through every phase explicitly
//!
//! 3. PIPELINE ORCHESTRATION
//!    - Run the phases in order, stopping at the first failing one
//!    - Hand each phase exactly the state it needs, nothing ambient
//!
//! 4. ERROR REPORTING
//!    - Render accumulated diagnostics as `file:line:col: level: message`
//!    - Keep user errors and internal invariant failures on separate
//!      levels so a harness can tell a bad program from a bad compiler
//!
//! ============================================================================
//! COMPILATION PIPELINE
//! ============================================================================
//!
//! ```text
//! Source file (.cow)
//!        |
//!        v
//!   [Preprocessor] --> one linear token stream   (cowc-lex::include)
//!        |
//!        v
//!   [Lexer] --------> tokens with positions      (cowc-lex)
//!        |
//!        v
//!   [Parser] -------> untyped AST                (cowc-par)
//!        |
//!        v
//!   [Analyzer] -----> typed tree + tables        (cowc-sem)
//!        |
//!        v
//!   [Optimizer] ----> same tree, to fixpoint     (cowc-opt, optional)
//!        |
//!        v
//!   [Generator] ----> 8080 assembly text         (cowc-gen)
//! ```
//!
//! PHASES IN DETAIL:
//! -----------------
//!
//! Phase 1: Preprocessing + lexing
//! - Input: entry path + include directories
//! - Output: one token stream, as if every include were pasted in place
//! - Errors: unresolved includes, unknown characters, malformed literals
//!
//! Phase 2: Parsing
//! - Input: token stream
//! - Output: untyped AST
//! - Errors: unexpected tokens, missing terminators, comparisons outside
//!   a conditional context
//!
//! Phase 3: Semantic analysis
//! - Input: AST
//! - Output: typed tree with type and symbol tables
//! - Errors: undeclared names, type mismatches, recursion, constants
//!   that do not fold, forward declarations never implemented
//!
//! Phase 4: Optimization (skipped under `--no-opt`)
//! - Input/output: the typed tree, rewritten in place until a full sweep
//!   changes nothing
//!
//! Phase 5: Code generation
//! - Input: the (possibly optimized) tree
//! - Output: assembly text for the downstream macro assembler
//! - Errors: internal invariant failures only; user errors never get
//!   this far
//!
//! The first error in a phase aborts the pipeline after that phase;
//! everything accumulated so far stays readable on the session.
//!
//! Exit codes of the `cowc` binary: 0 on success, 1 on any failure.

use std::fmt::Write as _;
use std::path::PathBuf;

use cowc_gen::GenError;
use cowc_lex::IncludeError;
use cowc_par::Parser;
use cowc_sem::analyze;
use cowc_util::{Diagnostic, DiagnosticBuilder, Handler, Interner, Level, SourceMap};
use thiserror::Error;

/// One compiler invocation's settings.
#[derive(Debug, Clone)]
pub struct Config {
    /// Entry source file.
    pub input: PathBuf,
    /// Include search directories, in order. The entry file's own
    /// directory is always searched first.
    pub include_dirs: Vec<PathBuf>,
    /// Output path; defaults to the input with an `.asm` extension.
    pub output: Option<PathBuf>,
    /// Run the fixpoint optimizer.
    pub optimize: bool,
    /// Log the optimizer's per-pass change counts.
    pub debug_opt: bool,
}

impl Config {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            include_dirs: Vec::new(),
            output: None,
            optimize: true,
            debug_opt: false,
        }
    }

    /// The effective output path.
    pub fn output_path(&self) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| self.input.with_extension("asm"))
    }
}

/// Driver-level failures. Diagnostics with positions live in the
/// session's handler; this type carries the overall outcome.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error(transparent)]
    Include(#[from] IncludeError),

    #[error("compilation failed with {0} error(s)")]
    Failed(usize),

    #[error(transparent)]
    Codegen(#[from] GenError),

    #[error("cannot write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// State for one compilation.
pub struct Session {
    pub config: Config,
    pub sources: SourceMap,
    pub interner: Interner,
    pub handler: Handler,
}

impl Session {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            sources: SourceMap::new(),
            interner: Interner::new(),
            handler: Handler::new(),
        }
    }

    /// Run the pipeline and return the generated assembly text.
    pub fn compile(&mut self) -> Result<String, CompileError> {
        log::debug!("compiling {}", self.config.input.display());

        let tokens = cowc_lex::preprocess(
            &self.config.input,
            &self.config.include_dirs,
            &mut self.sources,
            &mut self.interner,
            &mut self.handler,
        )?;

        let ast = Parser::new(tokens, &self.interner, &mut self.handler).parse();
        if self.handler.has_errors() {
            return Err(CompileError::Failed(self.handler.error_count()));
        }

        let program = analyze(&ast, &mut self.interner, &mut self.handler);
        let mut program = match program {
            Some(program) => program,
            None => return Err(CompileError::Failed(self.handler.error_count())),
        };

        if self.config.optimize {
            let changes = cowc_opt::optimize(&mut program);
            log::debug!("optimizer applied {} changes", changes);
        }

        match cowc_gen::generate(&program, &self.interner) {
            Ok(asm) => Ok(asm),
            Err(err) => {
                // A contradiction inside the compiler, not a user error;
                // surface it on the internal channel.
                DiagnosticBuilder::ice(err.to_string()).emit(&mut self.handler);
                Err(err.into())
            }
        }
    }

    /// Compile and write the output file.
    pub fn compile_to_file(&mut self) -> Result<(), CompileError> {
        let asm = self.compile()?;
        let path = self.config.output_path();
        std::fs::write(&path, asm).map_err(|source| CompileError::Io { path, source })
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        self.handler.diagnostics()
    }

    /// Human-readable `file:line:col: level: message` lines.
    pub fn render_diagnostics(&self) -> String {
        let mut out = String::new();
        for diag in self.handler.diagnostics() {
            match diag.pos {
                Some(pos) => {
                    let _ = writeln!(
                        out,
                        "{}:{}:{}: {}: {}",
                        self.sources.name(pos.file).display(),
                        pos.line,
                        pos.col,
                        diag.level,
                        diag.message
                    );
                }
                None => {
                    let _ = writeln!(out, "{}: {}", diag.level, diag.message);
                }
            }
            for note in &diag.notes {
                let _ = writeln!(out, "  {}: {}", Level::Note, note);
            }
        }
        out
    }
}
