//! Caller-facing compile errors.

use thiserror::Error;

use crate::diagnostic::Diagnostic;

/// The compile failed; the diagnostics say why.
#[derive(Clone, Debug, Error)]
#[error("compilation failed with {} diagnostics", .errors.len())]
pub struct CompileError {
    /// Everything reported up to the failure, fatal and otherwise.
    pub errors: Vec<Diagnostic>,
}

impl CompileError {
    /// Render every diagnostic, one per line.
    pub fn display_verbose(&self) -> String {
        let mut out = String::new();
        for diagnostic in &self.errors {
            out.push_str(&diagnostic.to_string());
            out.push('\n');
        }
        out
    }
}
