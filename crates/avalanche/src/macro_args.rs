//! Combinator API for parsing macro arguments.
//!
//! The provoking unit splits its statement into a left and a right half,
//! each with a begin and an end cursor. A macro declares which halves it
//! consumes by taking a cursor from one of the four corners and pulling
//! typed arguments off it; every accessor short-circuits with an error the
//! macro returns to the engine. When the macro is done, any units left in
//! either half are themselves an error.

use crate::diag::{CompileError, Location};
use crate::parse::{ParseUnit, ParseUnitKind, Statement};
use crate::value::{List, Value};

/// A failed argument extraction, ready to be reported.
#[derive(Debug, Clone)]
pub struct ArgError {
    pub message: String,
    pub location: Location,
}

impl ArgError {
    #[must_use]
    pub fn into_compile_error(self) -> CompileError {
        CompileError::new(self.message, self.location)
    }
}

/// Which half of the statement a cursor walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Half {
    Left,
    Right,
}

/// The argument state for one macro invocation.
pub struct MacroArgs<'a> {
    units: &'a [ParseUnit],
    provoker: usize,
    /// Unconsumed extent of the left half (indices into `units`).
    left: std::ops::Range<usize>,
    /// Unconsumed extent of the right half.
    right: std::ops::Range<usize>,
}

impl<'a> MacroArgs<'a> {
    #[must_use]
    pub fn new(statement: &'a Statement, provoker: usize) -> Self {
        Self {
            units: &statement.units,
            provoker,
            left: 0..provoker,
            right: provoker + 1..statement.units.len(),
        }
    }

    fn provoker_location(&self) -> Location {
        self.units[self.provoker].location.clone()
    }

    /// A cursor walking the left half from its beginning forward.
    pub fn from_left_begin(&mut self) -> Cursor<'_, 'a> {
        Cursor {
            args: self,
            half: Half::Left,
            forward: true,
        }
    }

    /// A cursor walking the left half from its end backward.
    pub fn from_left_end(&mut self) -> Cursor<'_, 'a> {
        Cursor {
            args: self,
            half: Half::Left,
            forward: false,
        }
    }

    /// A cursor walking the right half from its beginning forward.
    pub fn from_right_begin(&mut self) -> Cursor<'_, 'a> {
        Cursor {
            args: self,
            half: Half::Right,
            forward: true,
        }
    }

    /// A cursor walking the right half from its end backward.
    pub fn from_right_end(&mut self) -> Cursor<'_, 'a> {
        Cursor {
            args: self,
            half: Half::Right,
            forward: false,
        }
    }

    /// Fails when either half still holds unconsumed units.
    pub fn check_consumed(&self, macro_name: &str) -> Result<(), ArgError> {
        if !self.left.is_empty() {
            return Err(ArgError {
                message: format!("extra arguments before {macro_name}"),
                location: self.units[self.left.start].location.clone(),
            });
        }
        if !self.right.is_empty() {
            return Err(ArgError {
                message: format!("extra arguments after {macro_name}"),
                location: self.units[self.right.start].location.clone(),
            });
        }
        Ok(())
    }
}

/// A primary cursor over one half of the statement.
pub struct Cursor<'m, 'a> {
    args: &'m mut MacroArgs<'a>,
    half: Half,
    forward: bool,
}

impl<'a> Cursor<'_, 'a> {
    fn range(&self) -> &std::ops::Range<usize> {
        match self.half {
            Half::Left => &self.args.left,
            Half::Right => &self.args.right,
        }
    }

    fn range_mut(&mut self) -> &mut std::ops::Range<usize> {
        match self.half {
            Half::Left => &mut self.args.left,
            Half::Right => &mut self.args.right,
        }
    }

    /// Whether a unit is available at the cursor.
    #[must_use]
    pub fn has_arg(&self) -> bool {
        !self.range().is_empty()
    }

    fn anchor_location(&self) -> Location {
        self.args.provoker_location()
    }

    /// The unit at the cursor, which must exist.
    pub fn current(&self, what: &str) -> Result<&'a ParseUnit, ArgError> {
        let range = self.range();
        if range.is_empty() {
            return Err(ArgError {
                message: format!("missing argument: {what}"),
                location: self.anchor_location(),
            });
        }
        let ix = if self.forward { range.start } else { range.end - 1 };
        Ok(&self.args.units[ix])
    }

    /// Consumes the unit at the cursor.
    pub fn consume(&mut self) {
        let forward = self.forward;
        let range = self.range_mut();
        if range.is_empty() {
            return;
        }
        if forward {
            range.start += 1;
        } else {
            range.end -= 1;
        }
    }

    /// Takes any unit.
    pub fn unit(&mut self, what: &str) -> Result<&'a ParseUnit, ArgError> {
        let unit = self.current(what)?;
        self.consume();
        Ok(unit)
    }

    /// Takes a bareword, yielding its text.
    pub fn bareword(&mut self, what: &str) -> Result<String, ArgError> {
        let unit = self.current(what)?;
        match &unit.kind {
            ParseUnitKind::Bareword(text) => {
                let text = text.clone();
                self.consume();
                Ok(text)
            }
            _ => Err(ArgError {
                message: format!("argument must be a bareword: {what}"),
                location: unit.location.clone(),
            }),
        }
    }

    /// Takes a bareword, A-string, or verbatim, yielding its text.
    pub fn stringoid(&mut self, what: &str) -> Result<String, ArgError> {
        let unit = self.current(what)?;
        match &unit.kind {
            ParseUnitKind::Bareword(text)
            | ParseUnitKind::AString(text)
            | ParseUnitKind::Verbatim(text) => {
                let text = text.clone();
                self.consume();
                Ok(text)
            }
            _ => Err(ArgError {
                message: format!("argument must be a bareword or string: {what}"),
                location: unit.location.clone(),
            }),
        }
    }

    /// Takes a block unit.
    pub fn block(&mut self, what: &str) -> Result<&'a ParseUnit, ArgError> {
        let unit = self.current(what)?;
        match &unit.kind {
            ParseUnitKind::Block(_) => {
                self.consume();
                Ok(unit)
            }
            _ => Err(ArgError {
                message: format!("argument must be a block: {what}"),
                location: unit.location.clone(),
            }),
        }
    }

    /// Takes a statically evaluable literal.
    pub fn literal(&mut self, what: &str) -> Result<Value, ArgError> {
        let unit = self.current(what)?;
        match literal_value(unit) {
            Ok(value) => {
                self.consume();
                Ok(value)
            }
            Err(offender) => Err(ArgError {
                message: format!("argument must be a literal: {what}"),
                location: offender.location.clone(),
            }),
        }
    }

    /// Runs `body` for each remaining unit; the body consumes.
    pub fn for_rest<E>(
        &mut self,
        mut body: impl FnMut(&mut Self) -> Result<(), E>,
    ) -> Result<(), E> {
        while self.has_arg() {
            body(self)?;
        }
        Ok(())
    }
}

/// Evaluates a unit as a literal: a simple stringoid, or a semiliteral all
/// of whose elements are literals. On failure returns the offending unit.
pub fn literal_value(unit: &ParseUnit) -> Result<Value, &ParseUnit> {
    match &unit.kind {
        ParseUnitKind::Bareword(text)
        | ParseUnitKind::AString(text)
        | ParseUnitKind::Verbatim(text) => Ok(Value::str(text.clone())),
        ParseUnitKind::Semiliteral(units) => {
            let mut items = Vec::with_capacity(units.len());
            for item in units {
                items.push(literal_value(item)?);
            }
            Ok(Value::List(List::from_values(items)))
        }
        _ => Err(unit),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::ErrorList;
    use crate::parse::parse;

    fn statement(src: &str) -> Statement {
        let mut errors = ErrorList::new();
        let root = parse(&mut errors, src, "test.ava");
        assert!(errors.is_empty());
        let ParseUnitKind::Block(statements) = root.kind else {
            panic!("root is a block");
        };
        statements.into_iter().find(|s| !s.is_empty()).expect("one statement")
    }

    #[test]
    fn right_cursor_walks_forward() {
        let stmt = statement("lhs KW a b");
        let mut args = MacroArgs::new(&stmt, 1);
        let mut cursor = args.from_right_begin();
        assert_eq!(cursor.bareword("first").unwrap(), "a");
        assert_eq!(cursor.bareword("second").unwrap(), "b");
        assert!(!cursor.has_arg());
        drop(cursor);
        assert!(args.check_consumed("KW").is_err()); // lhs not consumed
    }

    #[test]
    fn left_end_cursor_walks_backward() {
        let stmt = statement("a b KW");
        let mut args = MacroArgs::new(&stmt, 2);
        let mut cursor = args.from_left_end();
        assert_eq!(cursor.bareword("nearest").unwrap(), "b");
        assert_eq!(cursor.bareword("farthest").unwrap(), "a");
        drop(cursor);
        assert!(args.check_consumed("KW").is_ok());
    }

    #[test]
    fn typed_accessors_reject_wrong_kinds() {
        let stmt = statement("KW { body }");
        let mut args = MacroArgs::new(&stmt, 0);
        let mut cursor = args.from_right_begin();
        assert!(cursor.bareword("name").is_err());
        assert!(cursor.block("body").is_ok());
    }

    #[test]
    fn missing_argument_is_an_error() {
        let stmt = statement("KW");
        let mut args = MacroArgs::new(&stmt, 0);
        let cursor = args.from_right_begin();
        assert!(cursor.current("anything").is_err());
    }

    #[test]
    fn literals_cover_semiliterals_of_literals() {
        let stmt = statement("KW [a b [c d]]");
        let mut args = MacroArgs::new(&stmt, 0);
        let mut cursor = args.from_right_begin();
        let value = cursor.literal("list").unwrap();
        assert_eq!(value.stringify(), "a b \\{c d\\}");
    }

    #[test]
    fn substitutions_are_not_literals() {
        let stmt = statement("KW (dynamic)");
        let mut args = MacroArgs::new(&stmt, 0);
        let mut cursor = args.from_right_begin();
        assert!(cursor.literal("value").is_err());
    }
}
