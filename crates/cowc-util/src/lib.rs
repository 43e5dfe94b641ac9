//! cowc-util - Shared infrastructure for the cowc compiler.
//!
//! This crate provides the types every pipeline stage depends on:
//!
//! - [`Pos`] and [`FileId`] for source location tracking
//! - [`SourceMap`] for registering opened source files
//! - [`Interner`] and [`Name`] for string interning
//! - [`Diagnostic`], [`DiagnosticBuilder`] and [`Handler`] for error
//!   reporting
//!
//! All state here is owned by the driver's session and threaded through the
//! pipeline explicitly; there are no process-wide tables.

pub mod diagnostic;
pub mod intern;
pub mod span;

pub use diagnostic::{Diagnostic, DiagnosticBuilder, Handler, Level};
pub use intern::{Interner, Name};
pub use span::{FileId, Pos, SourceFile, SourceMap};
