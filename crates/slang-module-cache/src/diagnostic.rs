//! Structured compiler diagnostics and the parser for `slangc` output.

use core::fmt::{self, Display};
use std::path::PathBuf;

/// Severity of a [`Diagnostic`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[expect(clippy::exhaustive_enums, reason = "It is expected to be exhaustive")]
pub enum Severity {
    /// Additional information attached to another diagnostic.
    Note,
    /// Does not block production of a module.
    Warning,
    /// Fails the compilation.
    Error,
}

impl Display for Severity {
    #[expect(
        clippy::min_ident_chars,
        reason = "It's a core library trait implementation"
    )]
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Note => "note",
            Self::Warning => "warning",
            Self::Error => "error",
        })
    }
}

/// Position in a source file, 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[non_exhaustive]
pub struct Location {
    /// The file as reported by the compiler.
    pub file: PathBuf,
    /// 1-based line.
    pub line: u32,
    /// 1-based column, `1` when the compiler did not report one.
    pub column: u32,
}

impl Location {
    /// Creates a location.
    #[inline]
    #[must_use]
    pub fn new(file: impl Into<PathBuf>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }
}

impl Display for Location {
    #[expect(
        clippy::min_ident_chars,
        reason = "It's a core library trait implementation"
    )]
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file.display(), self.line, self.column)
    }
}

/// One message reported by the compiler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[non_exhaustive]
pub struct Diagnostic {
    /// How bad it is.
    pub severity: Severity,
    /// Where it is, if the compiler said.
    pub location: Option<Location>,
    /// Compiler specific diagnostic code.
    pub code: Option<u32>,
    /// Human readable message.
    pub message: String,
}

impl Diagnostic {
    /// Creates a diagnostic.
    #[inline]
    #[must_use]
    pub fn new(severity: Severity, location: Option<Location>, message: impl Into<String>) -> Self {
        Self {
            severity,
            location,
            code: None,
            message: message.into(),
        }
    }

    /// Whether the diagnostic fails compilation.
    #[inline]
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl Display for Diagnostic {
    #[expect(
        clippy::min_ident_chars,
        reason = "It's a core library trait implementation"
    )]
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(location) = &self.location {
            write!(f, "{location}: ")?;
        }
        write!(f, "{}", self.severity)?;
        if let Some(code) = self.code {
            write!(f, " {code}")?;
        }
        write!(f, ": {}", self.message)
    }
}

/// The diagnostics of one compilation.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
#[expect(clippy::exhaustive_structs, reason = "a plain list")]
pub struct Diagnostics(pub Vec<Diagnostic>);

impl Diagnostics {
    /// Whether at least one diagnostic is an error.
    #[inline]
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.0.iter().any(Diagnostic::is_error)
    }

    /// Iterates over error-severity diagnostics.
    #[inline]
    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter().filter(|diagnostic| diagnostic.is_error())
    }

    /// Iterates over warning-severity diagnostics.
    #[inline]
    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0
            .iter()
            .filter(|diagnostic| diagnostic.severity == Severity::Warning)
    }

    /// Whether there are no diagnostics at all.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for Diagnostics {
    #[expect(
        clippy::min_ident_chars,
        reason = "It's a core library trait implementation"
    )]
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, diagnostic) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{diagnostic}")?;
        }
        Ok(())
    }
}

/// Parses the human readable diagnostics `slangc` prints:
///
/// ```text
/// shader.slang(12): error 30015: undefined identifier 'colr'.
///     return colr;
///            ^~~~
/// ```
///
/// The column comes either from a `(line, column)` location or from the caret line
/// which follows the echoed source line. Lines that are not diagnostics are skipped.
#[inline]
#[must_use]
pub fn parse_slangc_output(output: &str) -> Diagnostics {
    let mut diagnostics: Vec<Diagnostic> = Vec::new();
    let mut awaiting_caret = false;

    for line in output.lines() {
        if let Some(diagnostic) = parse_diagnostic_line(line) {
            awaiting_caret = diagnostic
                .location
                .as_ref()
                .is_some_and(|location| location.column == 0);
            diagnostics.push(diagnostic);
            continue;
        }
        if awaiting_caret {
            if let Some(column) = caret_column(line) {
                if let Some(location) = diagnostics
                    .last_mut()
                    .and_then(|diagnostic| diagnostic.location.as_mut())
                {
                    location.column = column;
                }
                awaiting_caret = false;
            }
        }
    }

    for location in diagnostics
        .iter_mut()
        .filter_map(|diagnostic| diagnostic.location.as_mut())
    {
        if location.column == 0 {
            location.column = 1;
        }
    }
    Diagnostics(diagnostics)
}

/// Parses `file(line[, col]): severity [code]: message`. Column `0` means "unknown yet".
fn parse_diagnostic_line(line: &str) -> Option<Diagnostic> {
    let (head, rest) = line.split_once("): ")?;
    let open = head.rfind('(')?;
    let (file, position) = (head.get(..open)?, head.get(open + 1..)?);
    let mut numbers = position.split(',').map(|part| part.trim().parse::<u32>());
    let line_number = numbers.next()?.ok()?;
    let column = match numbers.next() {
        Some(column) => column.ok()?,
        None => 0,
    };

    let (kind, message) = rest.split_once(": ")?;
    let mut severity = None;
    let mut code = None;
    for word in kind.split_whitespace() {
        match word {
            "fatal" | "internal" => {}
            "error" => severity = Some(Severity::Error),
            "warning" => severity = Some(Severity::Warning),
            "note" => severity = Some(Severity::Note),
            other => code = other.parse().ok(),
        }
    }
    let location = (!file.is_empty()).then(|| Location::new(file, line_number, column));
    Some(Diagnostic {
        severity: severity?,
        location,
        code,
        message: message.trim().to_owned(),
    })
}

/// Column of `^` in a caret line such as `      ^~~~`.
fn caret_column(line: &str) -> Option<u32> {
    let trimmed = line.trim_start();
    if !trimmed.starts_with('^') || !trimmed.chars().all(|ch| matches!(ch, '^' | '~' | ' ')) {
        return None;
    }
    let indent = line.chars().count() - trimmed.chars().count();
    u32::try_from(indent + 1).ok()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test_log::test]
    fn parses_error_with_caret_column() {
        let output = "\
/shaders/shader.slang(12): error 30015: undefined identifier 'colr'.
    return colr;
           ^~~~
";
        let diagnostics = parse_slangc_output(output);
        assert!(diagnostics.has_errors());
        let error = diagnostics.errors().next().unwrap();
        assert_eq!(error.code, Some(30015));
        assert_eq!(
            error.location,
            Some(Location::new("/shaders/shader.slang", 12, 12))
        );
        assert_eq!(error.message, "undefined identifier 'colr'.");
    }

    #[test_log::test]
    fn warnings_do_not_count_as_errors() {
        let output = "\
common.slang(3, 5): warning 15205: implicit conversion from 'float' to 'int'.
shader.slang(1): note: see declaration of 'main'
";
        let diagnostics = parse_slangc_output(output);
        assert!(!diagnostics.has_errors());
        assert_eq!(diagnostics.warnings().count(), 1);
        assert_eq!(diagnostics.0.len(), 2);
        let note = diagnostics.0.get(1).unwrap();
        assert_eq!(note.severity, Severity::Note);
        assert_eq!(note.location.as_ref().unwrap().column, 1);
    }

    #[test_log::test]
    fn fatal_and_internal_errors_are_errors() {
        let diagnostics = parse_slangc_output("(0): fatal error 1: could not open file");
        let error = diagnostics.errors().next().unwrap();
        assert_eq!(error.location, None);
        assert_eq!(error.message, "could not open file");
    }

    #[test_log::test]
    fn unrelated_output_is_ignored() {
        let diagnostics = parse_slangc_output("compiling...\nwrote shader.spv (main)\n");
        assert!(diagnostics.is_empty());
    }
}
