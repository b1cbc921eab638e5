//! The parser: token stream to parse-unit tree.
//!
//! Parsing is deliberately shallow. The output is a tree of *parse units*
//! grouped into *statements*; macro substitution gives the tree meaning
//! later. The parser's own work is delimiter matching, group tags,
//! `$`-interpolation of barewords, subscript rewriting, and the semiliteral
//! string regrouping rules.
//!
//! Errors are appended to the shared error list; parsing continues past
//! most of them. Only structural failures (unbalanced delimiters, early
//! end of input) abort the enclosing group.

use std::sync::Arc;

use crate::diag::{ErrorList, Location};
use crate::lexer::{LexError, Lexer, Token, TokenKind};

/// The payload of a parse unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseUnitKind {
    Bareword(String),
    AString(String),
    LString(String),
    RString(String),
    LrString(String),
    Verbatim(String),
    /// `{ … }`: a sequence of statements.
    Block(Vec<Statement>),
    /// `( … )`: a sequence of statements (normally exactly one).
    Substitution(Vec<Statement>),
    /// `[ … ]`: a flat sequence of units.
    Semiliteral(Vec<ParseUnit>),
}

/// One node of the parse tree, with its source location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseUnit {
    pub kind: ParseUnitKind,
    pub location: Location,
}

impl ParseUnit {
    /// The string payload, for the leaf kinds.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            ParseUnitKind::Bareword(s)
            | ParseUnitKind::AString(s)
            | ParseUnitKind::LString(s)
            | ParseUnitKind::RString(s)
            | ParseUnitKind::LrString(s)
            | ParseUnitKind::Verbatim(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_bareword(&self) -> bool {
        matches!(self.kind, ParseUnitKind::Bareword(_))
    }

    /// Whether the unit's surface form is a quoted or unquoted string.
    #[must_use]
    pub fn is_stringoid(&self) -> bool {
        self.text().is_some()
    }
}

/// A statement: a run of units between logical line breaks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Statement {
    pub units: Vec<ParseUnit>,
}

impl Statement {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// The statement's location: its first unit's.
    #[must_use]
    pub fn location(&self) -> Option<&Location> {
        self.units.first().map(|u| &u.location)
    }
}

/// Parses `source` into a root block unit.
///
/// Returns the root unconditionally; success is the error list having
/// grown by nothing.
pub fn parse(errors: &mut ErrorList, source: &str, filename: &str) -> ParseUnit {
    let mut ctx = ParseContext {
        lexer: Lexer::new(source),
        filename: Arc::from(filename),
        source: Arc::from(source),
    };

    let root_location = Location {
        filename: Arc::clone(&ctx.filename),
        source: Some(Arc::clone(&ctx.source)),
        line_offset: 0,
        start_line: 1,
        end_line: 1,
        start_column: 1,
        end_column: 1,
    };

    let (statements, _closing) = ctx.block_content(errors, true);
    ParseUnit {
        kind: ParseUnitKind::Block(statements),
        location: root_location,
    }
}

enum UnitRead {
    /// A unit was appended to the destination.
    Ok,
    /// A structural token (newline or closer) was encountered.
    NonUnit(Token),
    Eof,
    Fatal,
}

struct ParseContext {
    lexer: Lexer,
    filename: Arc<str>,
    source: Arc<str>,
}

impl ParseContext {
    fn location_of(&self, token: &Token) -> Location {
        self.location_of_off(token, 0, token.index_end - token.index_start)
    }

    fn location_of_off(&self, token: &Token, off_begin: usize, off_end: usize) -> Location {
        Location {
            filename: Arc::clone(&self.filename),
            source: Some(Arc::clone(&self.source)),
            line_offset: token.line_offset,
            start_line: token.line,
            end_line: token.line,
            start_column: token.column + off_begin,
            end_column: token.column + off_end,
        }
    }

    fn location_of_lex_error(&self, err: &LexError) -> Location {
        Location {
            filename: Arc::clone(&self.filename),
            source: Some(Arc::clone(&self.source)),
            line_offset: err.line_offset,
            start_line: err.line,
            end_line: err.line,
            start_column: err.column,
            end_column: err.column + (err.index_end - err.index_start),
        }
    }

    fn eof_location(&self) -> Location {
        let mut location = Location::start_of(&self.filename);
        location.source = Some(Arc::clone(&self.source));
        location.start_line = self.source.lines().count().max(1);
        location.end_line = location.start_line;
        location
    }

    /// Reads the next unit into `dst`, reporting lexical errors and
    /// continuing past them.
    fn read_unit(&mut self, dst: &mut Vec<ParseUnit>, errors: &mut ErrorList) -> UnitRead {
        loop {
            let token = match self.lexer.next_token() {
                None => return UnitRead::Eof,
                Some(Err(err)) => {
                    let location = self.location_of_lex_error(&err);
                    errors.error(err.message, location);
                    continue;
                }
                Some(Ok(token)) => token,
            };

            return match token.kind {
                TokenKind::Bareword => self.read_bareword(dst, errors, &token),
                TokenKind::AString
                | TokenKind::LString
                | TokenKind::RString
                | TokenKind::LrString
                | TokenKind::Verbatim => {
                    let kind = match token.kind {
                        TokenKind::AString => ParseUnitKind::AString(token.text.clone()),
                        TokenKind::LString => ParseUnitKind::LString(token.text.clone()),
                        TokenKind::RString => ParseUnitKind::RString(token.text.clone()),
                        TokenKind::LrString => ParseUnitKind::LrString(token.text.clone()),
                        _ => ParseUnitKind::Verbatim(token.text.clone()),
                    };
                    dst.push(ParseUnit {
                        kind,
                        location: self.location_of(&token),
                    });
                    UnitRead::Ok
                }
                TokenKind::BeginSubstitution => self.read_substitution(dst, errors, &token),
                TokenKind::BeginSemiliteral => self.read_semiliteral(dst, errors, &token),
                TokenKind::BeginBlock => self.read_block(dst, errors, &token),
                TokenKind::BeginNameSubscript => {
                    self.read_subscript(dst, errors, &token, "#name-subscript#", TokenKind::CloseParen)
                }
                TokenKind::BeginNumericSubscript => self.read_subscript(
                    dst,
                    errors,
                    &token,
                    "#numeric-subscript#",
                    TokenKind::CloseBracket,
                ),
                TokenKind::BeginStringSubscript => self.read_subscript(
                    dst,
                    errors,
                    &token,
                    "#string-subscript#",
                    TokenKind::CloseBrace,
                ),
                TokenKind::Newline
                | TokenKind::CloseParen
                | TokenKind::CloseBracket
                | TokenKind::CloseBrace => UnitRead::NonUnit(token),
            };
        }
    }

    /// Reads statements until the block closes. Returns the statements and
    /// the closing token when one was seen.
    fn block_content(
        &mut self,
        errors: &mut ErrorList,
        is_top_level: bool,
    ) -> (Vec<Statement>, Option<Token>) {
        let mut statements: Vec<Statement> = Vec::new();
        let mut beginning = true;

        loop {
            if beginning {
                if statements.last().is_none_or(|s| !s.is_empty()) {
                    statements.push(Statement::default());
                }
                beginning = false;
            }

            let statement = statements.last_mut().expect("statement pushed above");
            match self.read_unit(&mut statement.units, errors) {
                UnitRead::Ok => {}
                UnitRead::Fatal => return (statements, None),
                UnitRead::NonUnit(token) => {
                    if token.kind == TokenKind::Newline {
                        beginning = true;
                    } else if !is_top_level || token.kind != TokenKind::CloseBrace {
                        self.unexpected_token(errors, &token);
                        return (statements, None);
                    } else {
                        return (statements, Some(token));
                    }
                }
                UnitRead::Eof => {
                    if !is_top_level {
                        self.unexpected_eof(errors);
                    }
                    return (statements, None);
                }
            }
        }
    }

    fn unexpected_token(&self, errors: &mut ErrorList, token: &Token) {
        errors.error(
            format!("unexpected token: {}", token.text),
            self.location_of(token),
        );
    }

    fn unexpected_eof(&self, errors: &mut ErrorList) {
        errors.error("unexpected end-of-input", self.eof_location());
    }

    /// Barewords containing `$` split into partial strings and `#var#`
    /// substitutions.
    fn read_bareword(
        &mut self,
        dst: &mut Vec<ParseUnit>,
        errors: &mut ErrorList,
        token: &Token,
    ) -> UnitRead {
        let text = token.text.as_str();
        if !text.contains('$') {
            dst.push(ParseUnit {
                kind: ParseUnitKind::Bareword(text.to_owned()),
                location: self.location_of(token),
            });
            return UnitRead::Ok;
        }

        let mut parts: Vec<ParseUnit> = Vec::new();
        let len = text.len();
        let mut in_var = false;
        let mut begin = 0usize;
        let boundaries = text
            .char_indices()
            .filter(|&(_, c)| c == '$')
            .map(|(i, _)| i)
            .chain(std::iter::once(len));
        for end in boundaries {
            if in_var {
                if end == begin {
                    errors.error(
                        "empty variable name",
                        self.location_of_off(token, begin, end),
                    );
                }
                let var_loc = self.location_of_off(token, begin, end);
                let statement = Statement {
                    units: vec![
                        ParseUnit {
                            kind: ParseUnitKind::Bareword("#var#".to_owned()),
                            location: var_loc.clone(),
                        },
                        ParseUnit {
                            kind: ParseUnitKind::Bareword(text[begin..end].to_owned()),
                            location: var_loc.clone(),
                        },
                    ],
                };
                parts.push(ParseUnit {
                    kind: ParseUnitKind::Substitution(vec![statement]),
                    location: var_loc,
                });
            } else if end > begin || (begin != 0 && end != len) {
                // Literal fragment; empty fragments at either extreme of the
                // bareword are dropped.
                let kind = if begin > 0 && end < len {
                    ParseUnitKind::LrString(text[begin..end].to_owned())
                } else if begin > 0 {
                    ParseUnitKind::LString(text[begin..end].to_owned())
                } else {
                    ParseUnitKind::RString(text[begin..end].to_owned())
                };
                parts.push(ParseUnit {
                    kind,
                    location: self.location_of_off(token, begin, end),
                });
            }

            in_var = !in_var;
            begin = end + 1;
        }

        dst.push(ParseUnit {
            kind: ParseUnitKind::Substitution(vec![Statement { units: parts }]),
            location: self.location_of(token),
        });
        UnitRead::Ok
    }

    /// Reads units up to the closing token; newlines are transparent.
    fn expression_list(
        &mut self,
        dst: &mut Vec<ParseUnit>,
        errors: &mut ErrorList,
        closing: TokenKind,
    ) -> Result<Token, UnitRead> {
        loop {
            match self.read_unit(dst, errors) {
                UnitRead::Ok => {}
                UnitRead::Fatal => return Err(UnitRead::Fatal),
                UnitRead::Eof => {
                    self.unexpected_eof(errors);
                    return Err(UnitRead::Fatal);
                }
                UnitRead::NonUnit(token) => {
                    if token.kind == TokenKind::Newline {
                        continue;
                    }
                    if token.kind == closing {
                        return Ok(token);
                    }
                    self.unexpected_token(errors, &token);
                    return Err(UnitRead::Fatal);
                }
            }
        }
    }

    fn read_substitution(
        &mut self,
        dst: &mut Vec<ParseUnit>,
        errors: &mut ErrorList,
        open: &Token,
    ) -> UnitRead {
        let mut units = Vec::new();
        let result = self.expression_list(&mut units, errors, TokenKind::CloseParen);

        let statements = if units.is_empty() {
            Vec::new()
        } else {
            vec![Statement { units }]
        };
        let mut unit = ParseUnit {
            kind: ParseUnitKind::Substitution(statements),
            location: self.location_of(open),
        };

        match result {
            Ok(close) => {
                self.simplify_group_tag(&mut unit, &close);
                dst.push(unit);
                UnitRead::Ok
            }
            Err(fatal) => {
                dst.push(unit);
                fatal
            }
        }
    }

    fn read_semiliteral(
        &mut self,
        dst: &mut Vec<ParseUnit>,
        errors: &mut ErrorList,
        open: &Token,
    ) -> UnitRead {
        let mut units = Vec::new();
        let result = self.expression_list(&mut units, errors, TokenKind::CloseBracket);

        let mut unit = ParseUnit {
            kind: ParseUnitKind::Semiliteral(units),
            location: self.location_of(open),
        };

        match result {
            Ok(close) => {
                regroup_semiliteral_strings(&mut unit, errors);
                self.simplify_group_tag(&mut unit, &close);
                dst.push(unit);
                UnitRead::Ok
            }
            Err(fatal) => {
                dst.push(unit);
                fatal
            }
        }
    }

    fn read_block(
        &mut self,
        dst: &mut Vec<ParseUnit>,
        errors: &mut ErrorList,
        open: &Token,
    ) -> UnitRead {
        let (statements, close) = self.block_content(errors, false);
        let mut unit = ParseUnit {
            kind: ParseUnitKind::Block(statements),
            location: self.location_of(open),
        };
        match close {
            Some(close) => {
                self.simplify_group_tag(&mut unit, &close);
                dst.push(unit);
                UnitRead::Ok
            }
            None => {
                dst.push(unit);
                UnitRead::Fatal
            }
        }
    }

    /// Rewrites `base(sub)` into
    /// `(#name-subscript# #tag# base (sub))` (and the bracket/brace
    /// analogues).
    fn read_subscript(
        &mut self,
        dst: &mut Vec<ParseUnit>,
        errors: &mut ErrorList,
        open: &Token,
        prefix: &str,
        closing: TokenKind,
    ) -> UnitRead {
        // A subscript with no preceding unit is syntactically impossible;
        // assume an earlier syntax error got us here and stay quiet.
        if dst.is_empty() {
            let mut sink = Vec::new();
            let _ = self.expression_list(&mut sink, errors, closing);
            return UnitRead::Fatal;
        }

        let mut sub_units = Vec::new();
        let result = self.expression_list(&mut sub_units, errors, closing);

        let (tag, tag_token) = match &result {
            Ok(close) if close.text.len() > 1 => {
                (format!("#{}#", &close.text[1..]), Some(close.clone()))
            }
            Ok(close) => ("##".to_owned(), Some(close.clone())),
            Err(_) => ("##".to_owned(), None),
        };

        let base = dst.pop().expect("checked non-empty above");
        let open_loc = self.location_of(open);

        let sub_statements = if sub_units.is_empty() {
            Vec::new()
        } else {
            vec![Statement { units: sub_units }]
        };

        let tag_location = tag_token.as_ref().map_or_else(
            || open_loc.clone(),
            |close| self.location_of_off(close, 1, close.index_end - close.index_start),
        );

        let statement = Statement {
            units: vec![
                ParseUnit {
                    kind: ParseUnitKind::Bareword(prefix.to_owned()),
                    location: open_loc.clone(),
                },
                ParseUnit {
                    kind: ParseUnitKind::Bareword(tag),
                    location: tag_location,
                },
                base,
                ParseUnit {
                    kind: ParseUnitKind::Substitution(sub_statements),
                    location: open_loc.clone(),
                },
            ],
        };

        dst.push(ParseUnit {
            kind: ParseUnitKind::Substitution(vec![statement]),
            location: open_loc,
        });

        match result {
            Ok(_) => UnitRead::Ok,
            Err(fatal) => fatal,
        }
    }

    /// A tagged closer (e.g. `)tag`) wraps the freshly closed group in a
    /// substitution led by `#substitution#tag` (or the block/semiliteral
    /// analogue).
    fn simplify_group_tag(&self, unit: &mut ParseUnit, close: &Token) {
        if close.text.len() == 1 {
            return;
        }

        let base = match unit.kind {
            ParseUnitKind::Substitution(_) => "#substitution#",
            ParseUnitKind::Semiliteral(_) => "#semiliteral#",
            ParseUnitKind::Block(_) => "#block#",
            _ => unreachable!("only groups carry tags"),
        };

        let bareword = ParseUnit {
            kind: ParseUnitKind::Bareword(format!("{base}{}", &close.text[1..])),
            location: self.location_of(close),
        };
        let original = std::mem::replace(
            unit,
            ParseUnit {
                kind: ParseUnitKind::Substitution(Vec::new()),
                location: bareword.location.clone(),
            },
        );
        unit.location = original.location.clone();
        unit.kind = ParseUnitKind::Substitution(vec![Statement {
            units: vec![bareword, original],
        }]);
    }
}

/// Applies the semiliteral regrouping rules: partial strings combine with
/// their neighbours into substitutions.
fn regroup_semiliteral_strings(unit: &mut ParseUnit, errors: &mut ErrorList) {
    let ParseUnitKind::Semiliteral(units) = &mut unit.kind else {
        return;
    };

    let is_l = |u: &ParseUnit| matches!(u.kind, ParseUnitKind::LString(_) | ParseUnitKind::LrString(_));
    let is_r = |u: &ParseUnit| matches!(u.kind, ParseUnitKind::RString(_) | ParseUnitKind::LrString(_));
    let is_partial = |u: &ParseUnit| {
        matches!(
            u.kind,
            ParseUnitKind::LString(_) | ParseUnitKind::RString(_) | ParseUnitKind::LrString(_)
        )
    };

    let items = std::mem::take(units);
    let mut out: Vec<ParseUnit> = Vec::with_capacity(items.len());
    let mut items: std::collections::VecDeque<ParseUnit> = items.into();

    'scan: while let Some(first) = items.pop_front() {
        if !is_partial(&first) {
            out.push(first);
            continue;
        }

        // An L-like string attaches to the preceding unit; the group then
        // extends rightward while an R-like tail demands a follower or an
        // L-like follower attaches itself.
        let mut group: Vec<ParseUnit> = Vec::new();
        if is_l(&first) {
            let Some(prev) = out.pop() else {
                errors.error(
                    "L-String or LR-String at beginning of semiliteral",
                    first.location.clone(),
                );
                out.push(first);
                continue;
            };
            group.push(prev);
        }
        let error_loc = first.location.clone();
        group.push(first);

        loop {
            let mut advanced = false;
            let last = group.last().expect("group is non-empty");
            if is_partial(last) && is_r(last) {
                let Some(follower) = items.pop_front() else {
                    errors.error("R-String or LR-String at end of semiliteral", error_loc.clone());
                    // Leave the scanned units unwrapped, as the statement
                    // cannot be completed.
                    out.append(&mut group);
                    continue 'scan;
                };
                group.push(follower);
                advanced = true;
            }
            if items.front().is_some_and(|next| is_partial(next) && is_l(next)) {
                group.push(items.pop_front().expect("peeked above"));
                advanced = true;
            }
            if !advanced {
                break;
            }
        }

        let location = group[0].location.clone();
        out.push(ParseUnit {
            kind: ParseUnitKind::Substitution(vec![Statement { units: group }]),
            location,
        });
    }

    *units = out;
}
