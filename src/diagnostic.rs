//! Reporting notes, warnings, and errors to the user.

use std::fmt::{Display, Formatter};

use smol_str::SmolStr;

/// A position in a source file.
///
/// The driver does not read source text itself; locations are carried on
/// the statement tree by whatever produced it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: SmolStr,
    pub line: u32,
    pub column: u32,
}

/// A diagnostic level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Level {
    /// Informational, e.g. a duplicate rule that was silently removed
    Note,
    /// Something the user may want to address, but which is non-fatal
    Warning,
    /// A problem that suppresses output but lets the walk continue, so
    /// that further diagnostics can still be reported
    Error,
    /// A problem the compiler cannot continue past
    Fatal,
}

/// A message, associated with a location in a file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub message: String,
    pub level: Level,
    pub location: SourceLocation,
}

impl SourceLocation {
    pub fn new(file: impl Into<SmolStr>, line: u32, column: u32) -> Self {
        SourceLocation {
            file: file.into(),
            line,
            column,
        }
    }
}

impl Diagnostic {
    pub fn new(level: Level, location: SourceLocation, message: impl Into<String>) -> Self {
        Diagnostic {
            message: message.into(),
            level,
            location,
        }
    }

    pub fn note(location: SourceLocation, message: impl Into<String>) -> Self {
        Diagnostic::new(Level::Note, location, message)
    }

    pub fn warning(location: SourceLocation, message: impl Into<String>) -> Self {
        Diagnostic::new(Level::Warning, location, message)
    }

    pub fn error(location: SourceLocation, message: impl Into<String>) -> Self {
        Diagnostic::new(Level::Error, location, message)
    }

    pub fn fatal(location: SourceLocation, message: impl Into<String>) -> Self {
        Diagnostic::new(Level::Fatal, location, message)
    }

    pub fn text(&self) -> &str {
        &self.message
    }

    /// `true` for [`Level::Error`] and [`Level::Fatal`].
    pub fn is_error(&self) -> bool {
        self.level >= Level::Error
    }

    pub fn is_fatal(&self) -> bool {
        self.level == Level::Fatal
    }
}

impl Display for Level {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Level::Note => write!(f, "note"),
            Level::Warning => write!(f, "warning"),
            Level::Error => write!(f, "error"),
            Level::Fatal => write!(f, "fatal"),
        }
    }
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}: {}: {}",
            self.location.file, self.location.line, self.location.column, self.level, self.message
        )
    }
}
