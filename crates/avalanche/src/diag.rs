//! Compile-error representation and the diagnostic pretty printer.
//!
//! Every stage of the pipeline reports problems by appending to an
//! [`ErrorList`]; an operation "failed" exactly when the list is non-empty
//! after it returns. Nothing in the core ever aborts on the first error.

use std::fmt;
use std::sync::Arc;

/// A source location attached to tokens, parse units, symbols and errors.
///
/// `source` is the full text of the file when it is known, so that the
/// pretty printer can quote the offending line. Lines and columns are
/// 1-based; `line_offset` is the byte offset of the start of `start_line`
/// within `source`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub filename: Arc<str>,
    pub source: Option<Arc<str>>,
    pub line_offset: usize,
    pub start_line: usize,
    pub end_line: usize,
    pub start_column: usize,
    pub end_column: usize,
}

impl Location {
    /// A location naming a file but pointing at its beginning.
    #[must_use]
    pub fn start_of(filename: &str) -> Self {
        Self {
            filename: Arc::from(filename),
            source: None,
            line_offset: 0,
            start_line: 1,
            end_line: 1,
            start_column: 1,
            end_column: 1,
        }
    }

    /// The placeholder location used for records with no `src-pos` context.
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            filename: Arc::from("<unknown>"),
            source: None,
            line_offset: 0,
            start_line: 0,
            end_line: 0,
            start_column: 0,
            end_column: 0,
        }
    }
}

impl Default for Location {
    fn default() -> Self {
        Self::unknown()
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.filename, self.start_line, self.start_column)
    }
}

/// One compile error: a message and where it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub message: String,
    pub location: Location,
}

impl CompileError {
    #[must_use]
    pub fn new(message: impl Into<String>, location: Location) -> Self {
        Self {
            message: message.into(),
            location,
        }
    }
}

/// Additive list of compile errors, in production order.
#[derive(Debug, Default)]
pub struct ErrorList {
    errors: Vec<CompileError>,
}

impl ErrorList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: CompileError) {
        self.errors.push(error);
    }

    pub fn error(&mut self, message: impl Into<String>, location: Location) {
        self.push(CompileError::new(message, location));
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompileError> {
        self.errors.iter()
    }

    /// Moves all errors out, leaving this list empty.
    #[must_use]
    pub fn take(&mut self) -> Self {
        Self {
            errors: std::mem::take(&mut self.errors),
        }
    }

    /// Appends every error of `other`, preserving order.
    pub fn extend_from(&mut self, other: Self) {
        self.errors.extend(other.errors);
    }

    /// Renders the list for human consumption.
    ///
    /// `max_lines` bounds the output; one line is always reserved for the
    /// trailing summary. While less than a third of the budget has been
    /// consumed, each error is followed by the offending source line and a
    /// caret line, when the source is known, printable, and the column fits
    /// within an 80-column terminal.
    #[must_use]
    pub fn to_diagnostic_string(&self, max_lines: usize, ansi_colour: bool) -> String {
        const CARET_LIMIT: usize = 80;

        let header = if ansi_colour {
            "\x1b[1;31m[ERROR]\x1b[0m "
        } else {
            "[ERROR] "
        };

        let mut out = String::new();
        let mut num_lines = 1; // reserve the summary line
        let mut shown = 0usize;

        for error in &self.errors {
            if num_lines >= max_lines {
                break;
            }

            let loc = &error.location;
            out.push_str(header);
            out.push_str(&format!(
                "{}:{}:{}: {}\n",
                loc.filename, loc.start_line, loc.start_column, error.message
            ));
            num_lines += 1;
            shown += 1;

            // Verbose context only in the first third of the budget.
            if num_lines + 3 <= max_lines
                && num_lines * 3 < max_lines
                && loc.start_column < CARET_LIMIT
                && let Some(line) = extract_source_line(loc)
                && is_printable(&line)
            {
                out.push_str(&line);
                out.push('\n');
                let end = if loc.start_line == loc.end_line {
                    loc.end_column
                } else {
                    line.len() + 1
                };
                out.push_str(&caret_line(CARET_LIMIT, loc.start_column, end));
                out.push_str("\n\n");
                num_lines += 3;
            }
        }

        let total = self.errors.len();
        if total > 0 {
            out.push_str(&format!("{total} error(s) total, {shown} error(s) shown\n"));
        }
        out
    }
}

impl<'a> IntoIterator for &'a ErrorList {
    type Item = &'a CompileError;
    type IntoIter = std::slice::Iter<'a, CompileError>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.iter()
    }
}

fn extract_source_line(loc: &Location) -> Option<String> {
    let source = loc.source.as_ref()?;
    let rest = source.get(loc.line_offset..)?;
    let line = rest.split(['\n']).next().unwrap_or(rest);
    Some(line.trim_end_matches('\r').to_owned())
}

fn is_printable(line: &str) -> bool {
    !line
        .bytes()
        .any(|b| (b < b' ' && b != b'\t') || b == 0x7F)
}

fn caret_line(limit: usize, begin: usize, end: usize) -> String {
    let begin = begin.saturating_sub(1);
    let end = end.saturating_sub(1).min(limit - 1);
    if begin >= limit - 2 {
        return String::new();
    }

    let mut line = " ".repeat(begin);
    line.push('^');
    for _ in (begin + 1)..end {
        line.push('~');
    }
    line
}
