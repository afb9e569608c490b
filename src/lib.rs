//! Compiling OpenType feature semantics into binary layout tables.
//!
//! This crate is the middle layer of a feature-file compiler: it consumes
//! an already-parsed statement tree (see [`ast`]) plus a glyph inventory
//! ([`GlyphMap`]), interprets the statements in order, and emits the
//! binary GSUB and GPOS tables together with the auxiliary tables they
//! reference (GDEF, BASE, STAT, name) and builder outputs for the rest
//! (OS/2, head, hhea, vhea, vmtx).
//!
//! The text grammar and parser live elsewhere; whatever parses feature
//! file text hands its result to [`compile`].

pub mod ast;
mod common;
mod compile;
mod diagnostic;
mod otl;
mod pattern;

pub use common::{GlyphId, GlyphIdent, GlyphMap, GlyphName};
pub use compile::{
    compile, compile_with_opts, BaseBuilder, Compilation, CompileError, GdefBuilder, HeadBuilder,
    HheaBuilder, NameBuilder, Opts, Os2Builder, StatBuilder, VheaBuilder, VmtxBuilder,
};
pub use diagnostic::{Diagnostic, Level, SourceLocation};
