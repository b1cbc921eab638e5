//! The dynamic value model.
//!
//! Every Avalanche value has a canonical string form, and most operations in
//! the compiler core move between that form and a structured view: a list, a
//! map, an integer, a function prototype. Values are immutable; operations
//! produce new values, and the heavyweight variants share their backing
//! storage.
//!
//! The list syntax implemented here (barewords, `"…"` quoted atoms with the
//! surface-language escape set, `\{…\}` verbatim atoms, `[…]` sublists) is
//! the same syntax the textual P-Code format of [`crate::pcode`] is built
//! from.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{BuildHasher, Hash, Hasher};
use std::ops::Deref;
use std::sync::{Arc, OnceLock};

use indexmap::IndexMap;

use crate::pcode::{Prototype, StructDef};
use crate::treelist::TreeList;

/// Process-wide hash key, initialised once and then read-only.
fn hash_state() -> &'static ahash::RandomState {
    static STATE: OnceLock<ahash::RandomState> = OnceLock::new();
    STATE.get_or_init(ahash::RandomState::new)
}

/// An immutable string with cheap clones.
///
/// The bootstrap core leaves short-string optimisation and rope
/// concatenation to the host string library; an atomically shared buffer
/// gives the same observable behaviour. Absence (as distinct from
/// emptiness) is expressed with `Option<Str>` at the few places that need
/// it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Str(Arc<str>);

impl Str {
    #[must_use]
    pub fn new(s: impl Into<Arc<str>>) -> Self {
        Self(s.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for Str {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Str {
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl From<String> for Str {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl fmt::Display for Str {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A semantic ordered sequence of values.
///
/// Backed by the persistent tree of [`crate::treelist`]; appending or
/// replacing produces a new list without disturbing existing references.
#[derive(Debug, Clone, Default)]
pub struct List {
    items: TreeList<Value>,
}

impl List {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_values(values: impl IntoIterator<Item = Value>) -> Self {
        let mut items = TreeList::new();
        for value in values {
            items = items.append(value);
        }
        Self { items }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<Value> {
        self.items.get(index)
    }

    #[must_use]
    pub fn append(&self, value: Value) -> Self {
        Self {
            items: self.items.append(value),
        }
    }

    #[must_use]
    pub fn replace(&self, index: usize, value: Value) -> Self {
        Self {
            items: self.items.replace(index, value),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Value> + '_ {
        self.items.iter()
    }
}

impl FromIterator<Value> for List {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self::from_values(iter)
    }
}

/// A semantic ordered mapping; insertion order is preserved.
#[derive(Debug, Clone, Default)]
pub struct Map {
    entries: Arc<IndexMap<Value, Value, ahash::RandomState>>,
}

impl Map {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_pairs(pairs: impl IntoIterator<Item = (Value, Value)>) -> Self {
        Self {
            entries: Arc::new(pairs.into_iter().collect()),
        }
    }

    #[must_use]
    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.entries.get(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn insert(&self, key: Value, value: Value) -> Self {
        let mut entries = (*self.entries).clone();
        entries.insert(key, value);
        Self {
            entries: Arc::new(entries),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.iter()
    }
}

/// A function value: an address paired with its binding prototype.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionValue {
    pub address: u64,
    pub prototype: Prototype,
}

/// An opaque pointer value: a protocol tag plus an address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PtrValue {
    pub prot: Str,
    pub address: u64,
}

/// A tagged dynamic value.
#[derive(Debug, Clone)]
pub enum Value {
    Str(Str),
    Int(i64),
    List(List),
    Map(Map),
    Function(Arc<FunctionValue>),
    Struct(Arc<StructDef>),
    Ptr(PtrValue),
}

impl Value {
    #[must_use]
    pub fn str(s: impl Into<Str>) -> Self {
        Self::Str(s.into())
    }

    #[must_use]
    pub fn int(i: i64) -> Self {
        Self::Int(i)
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::Str(Str::default())
    }

    /// The canonical string form. All variants stringify.
    #[must_use]
    pub fn stringify(&self) -> String {
        match self {
            Self::Str(s) => s.as_str().to_owned(),
            Self::Int(i) => i.to_string(),
            Self::List(list) => {
                let parts: Vec<String> = list.iter().map(|v| escape_list_element(&v.stringify())).collect();
                parts.join(" ")
            }
            Self::Map(map) => {
                let mut parts = Vec::with_capacity(map.len() * 2);
                for (k, v) in map.iter() {
                    parts.push(escape_list_element(&k.stringify()));
                    parts.push(escape_list_element(&v.stringify()));
                }
                parts.join(" ")
            }
            Self::Function(fun) => {
                format!("{} {}", fun.address, fun.prototype)
            }
            Self::Struct(def) => def.to_string(),
            Self::Ptr(ptr) => format!("{} {:#x}", ptr.prot, ptr.address),
        }
    }

    /// Hashes the canonical form under the process-wide hash key.
    #[must_use]
    pub fn hash_code(&self) -> u64 {
        hash_state().hash_one(self.stringify().as_bytes())
    }

    /// Interprets this value as an integer.
    ///
    /// Accepts optional surrounding whitespace and sign, decimal or
    /// `0x`/`0o`/`0b` digits, and the boolean keywords. An empty string
    /// takes the supplied default.
    pub fn to_integer(&self, default: i64) -> Result<i64, String> {
        if let Self::Int(i) = self {
            return Ok(*i);
        }
        parse_integer(&self.stringify(), default)
    }

    /// Interprets this value as a list, parsing the canonical form when the
    /// value is not already structured.
    pub fn to_list(&self) -> Result<List, String> {
        match self {
            Self::List(list) => Ok(list.clone()),
            other => parse_list(&other.stringify()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.stringify())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.stringify() == other.stringify()
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        self.stringify().as_bytes().cmp(other.stringify().as_bytes())
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.stringify().hash(state);
    }
}

/// Parses an integer per the value syntax.
pub fn parse_integer(text: &str, default: i64) -> Result<i64, String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(default);
    }

    match trimmed {
        "true" | "on" | "yes" => return Ok(1),
        "false" | "off" | "no" | "null" => return Ok(0),
        _ => {}
    }

    let (negative, digits) = match trimmed.as_bytes()[0] {
        b'-' => (true, &trimmed[1..]),
        b'+' => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let parsed = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16)
    } else if let Some(oct) = digits.strip_prefix("0o").or_else(|| digits.strip_prefix("0O")) {
        i64::from_str_radix(oct, 8)
    } else if let Some(bin) = digits.strip_prefix("0b").or_else(|| digits.strip_prefix("0B")) {
        i64::from_str_radix(bin, 2)
    } else {
        digits.parse::<i64>()
    };

    match parsed {
        Ok(magnitude) => Ok(if negative { -magnitude } else { magnitude }),
        Err(_) => Err(format!("not an integer: {trimmed}")),
    }
}

/// Interprets a boolean operand; only the canonical keywords are accepted.
pub fn parse_boolean(text: &str) -> Result<bool, String> {
    match text.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(format!("not a boolean: {other}")),
    }
}

const ESCAPES: &[(u8, u8)] = &[
    (b'a', 0x07),
    (b'b', 0x08),
    (b'e', 0x1B),
    (b'f', 0x0C),
    (b'n', b'\n'),
    (b'r', b'\r'),
    (b't', b'\t'),
    (b'v', 0x0B),
    (b'\\', b'\\'),
    (b'"', b'"'),
    (b'\'', b'\''),
    (b'`', b'`'),
];

/// Resolves a single-character escape mnemonic.
#[must_use]
pub fn escape_char(mnemonic: u8) -> Option<u8> {
    ESCAPES.iter().find(|(m, _)| *m == mnemonic).map(|(_, c)| *c)
}

fn is_bareword_byte(b: u8) -> bool {
    !b.is_ascii_control()
        && b != 0x7F
        && b != b' '
        && !matches!(b, b'(' | b')' | b'[' | b']' | b'{' | b'}' | b'\\' | b';' | b'"' | b'`')
}

/// Escapes one list element for inclusion in a canonical list string.
///
/// Elements that read back as a single bareword pass through; elements free
/// of backslashes and illegal bytes become verbatims; everything else is
/// quoted with the string escape set.
#[must_use]
pub fn escape_list_element(element: &str) -> String {
    if !element.is_empty() && element.bytes().all(is_bareword_byte) {
        return element.to_owned();
    }

    let verbatim_safe = !element.is_empty()
        && element
            .bytes()
            .all(|b| b == b'\n' || b == b'\t' || (!b.is_ascii_control() && b != 0x7F && b != b'\\'));
    if verbatim_safe {
        return format!("\\{{{element}\\}}");
    }

    let mut out = String::with_capacity(element.len() + 2);
    out.push('"');
    for b in element.bytes() {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            b'`' => out.push_str("\\`"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            b if b.is_ascii_control() || b == 0x7F => {
                out.push_str(&format!("\\x{b:02X}"));
            }
            b => out.push(b as char),
        }
    }
    out.push('"');
    out
}

/// Parses canonical list text into a [`List`].
///
/// `[…]` groups become nested [`Value::List`]s; `"…"` and `\{…\}` atoms
/// become strings (the latter with its content taken raw, honouring `\{`
/// `\}` nesting and `\;`-escapes).
pub fn parse_list(text: &str) -> Result<List, String> {
    let mut parser = ListParser {
        bytes: text.as_bytes(),
        pos: 0,
    };
    let values = parser.parse_elements(None)?;
    Ok(List::from_values(values))
}

struct ListParser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl ListParser<'_> {
    fn parse_elements(&mut self, closing: Option<u8>) -> Result<Vec<Value>, String> {
        let mut out = Vec::new();
        loop {
            self.skip_whitespace();
            let Some(b) = self.peek() else {
                return match closing {
                    None => Ok(out),
                    Some(c) => Err(format!("unterminated list; expected `{}`", c as char)),
                };
            };

            if Some(b) == closing {
                self.pos += 1;
                return Ok(out);
            }

            match b {
                b'[' => {
                    self.pos += 1;
                    let inner = self.parse_elements(Some(b']'))?;
                    out.push(Value::List(List::from_values(inner)));
                }
                b']' => return Err("unbalanced `]`".to_owned()),
                b'"' => out.push(Value::str(self.parse_quoted()?)),
                b'\\' => {
                    if self.peek_at(1) == Some(b'{') {
                        out.push(Value::str(self.parse_verbatim()?));
                    } else {
                        return Err("stray backslash in list".to_owned());
                    }
                }
                _ => out.push(Value::str(self.parse_bareword())),
            }
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(b) = self.peek() {
            if b == b' ' || b == b'\t' || b == b'\n' || b == b'\r' {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, off: usize) -> Option<u8> {
        self.bytes.get(self.pos + off).copied()
    }

    fn parse_bareword(&mut self) -> String {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if is_bareword_byte(b) {
                self.pos += 1;
            } else {
                break;
            }
        }
        String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned()
    }

    fn parse_quoted(&mut self) -> Result<String, String> {
        self.pos += 1; // opening quote
        let mut out = Vec::new();
        loop {
            let Some(b) = self.peek() else {
                return Err("unterminated quoted element".to_owned());
            };
            self.pos += 1;
            match b {
                b'"' => return Ok(String::from_utf8_lossy(&out).into_owned()),
                b'\\' => {
                    let Some(esc) = self.peek() else {
                        return Err("backslash at end of quoted element".to_owned());
                    };
                    self.pos += 1;
                    if esc == b'x' {
                        let (Some(hi), Some(lo)) = (self.peek(), self.peek_at(1)) else {
                            return Err("truncated hex escape".to_owned());
                        };
                        let hex = [hi, lo];
                        let hex = std::str::from_utf8(&hex).map_err(|_| "bad hex escape".to_owned())?;
                        let byte =
                            u8::from_str_radix(hex, 16).map_err(|_| format!("bad hex escape: \\x{hex}"))?;
                        out.push(byte);
                        self.pos += 2;
                    } else if let Some(c) = escape_char(esc) {
                        out.push(c);
                    } else {
                        return Err(format!("invalid escape: \\{}", esc as char));
                    }
                }
                b => out.push(b),
            }
        }
    }

    fn parse_verbatim(&mut self) -> Result<String, String> {
        self.pos += 2; // `\{`
        let mut depth = 1usize;
        let mut out = Vec::new();
        loop {
            let Some(b) = self.peek() else {
                return Err("unterminated verbatim element".to_owned());
            };
            if b == b'\\' {
                match self.peek_at(1) {
                    Some(b'{') => {
                        depth += 1;
                        out.extend_from_slice(b"\\{");
                        self.pos += 2;
                    }
                    Some(b'}') => {
                        depth -= 1;
                        self.pos += 2;
                        if depth == 0 {
                            return Ok(String::from_utf8_lossy(&out).into_owned());
                        }
                        out.extend_from_slice(b"\\}");
                    }
                    Some(b';') => {
                        self.pos += 2;
                        let Some(esc) = self.peek() else {
                            return Err("backslash sequence at end of verbatim element".to_owned());
                        };
                        self.pos += 1;
                        if esc == b'x' {
                            let (Some(hi), Some(lo)) = (self.peek(), self.peek_at(1)) else {
                                return Err("truncated hex escape".to_owned());
                            };
                            let hex = [hi, lo];
                            let hex =
                                std::str::from_utf8(&hex).map_err(|_| "bad hex escape".to_owned())?;
                            let byte = u8::from_str_radix(hex, 16)
                                .map_err(|_| format!("bad hex escape: \\;x{hex}"))?;
                            out.push(byte);
                            self.pos += 2;
                        } else if let Some(c) = escape_char(esc) {
                            out.push(c);
                        } else {
                            return Err(format!("invalid escape: \\;{}", esc as char));
                        }
                    }
                    _ => {
                        out.push(b'\\');
                        self.pos += 1;
                    }
                }
            } else {
                out.push(b);
                self.pos += 1;
            }
        }
    }
}
